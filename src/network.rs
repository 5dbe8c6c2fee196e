//! Network access for the controller.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderName, HeaderValue};
use std::time::Duration;

use crate::cache::{Request, Response};

/// Something that can put a request on the wire.
#[allow(async_fn_in_trait)]
pub trait Network: Send + Sync {
  /// Fetch a request. HTTP error statuses are responses, not errors;
  /// only transport failures are `Err`.
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// reqwest-backed network client
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("ecolook-sw/", env!("CARGO_PKG_VERSION")))
      .connect_timeout(Duration::from_secs(10))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid request method '{}': {}", request.method, e))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| eyre!("Invalid header name '{}': {}", name, e))?;
      let value = HeaderValue::from_str(value)
        .map_err(|e| eyre!("Invalid value for header {}: {}", name, e))?;
      builder = builder.header(name, value);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let url = response.url().to_string();
    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      url,
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  /// Serve exactly one canned HTTP response on a local port.
  async fn serve_once(raw: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut buf = [0u8; 4096];
      let _ = socket.read(&mut buf).await;
      socket.write_all(raw.as_bytes()).await.unwrap();
      socket.shutdown().await.unwrap();
    });

    format!("http://{}", addr)
  }

  #[tokio::test]
  async fn test_fetch_returns_response_as_is() {
    let base = serve_once(
      "HTTP/1.1 404 Not Found\r\ncontent-type: text/plain\r\ncontent-length: 4\r\nconnection: close\r\n\r\ngone",
    )
    .await;

    let network = HttpNetwork::new().unwrap();
    let request = Request::parse("GET", &format!("{}/missing.png", base)).unwrap();
    let response = network.fetch(&request).await.unwrap();

    assert_eq!(response.status, 404);
    assert_eq!(response.status_text, "Not Found");
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert_eq!(response.body, b"gone");
    assert!(!response.is_ok());
  }

  #[tokio::test]
  async fn test_fetch_connection_refused_is_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let network = HttpNetwork::new().unwrap();
    let request = Request::parse("GET", &format!("http://{}/", addr)).unwrap();
    assert!(network.fetch(&request).await.is_err());
  }
}
