mod cache;
mod config;
mod event;
mod logging;
mod network;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;

use cache::{
  CacheController, CacheResult, CacheSource, CacheStorage, Request, Response, SqliteStorage,
};
use event::{Event, EventOutcome};
use network::HttpNetwork;

#[derive(Parser, Debug)]
#[command(name = "ecolook-sw")]
#[command(about = "Offline caching agent for the EcoLook web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/ecolook-sw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache database to use instead of the configured one
  #[arg(long)]
  database: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the asset manifest into the current generation
  Install,
  /// Delete every cache generation except the current one
  Activate,
  /// Install, then activate if the install succeeded
  Register,
  /// Serve requests cache-first, falling back to the network
  Fetch {
    /// Absolute URLs, or paths relative to the configured origin
    #[arg(required = true)]
    urls: Vec<String>,

    /// Extra request header as NAME:VALUE (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Write response bodies to stdout
    #[arg(long)]
    body: bool,
  },
  /// List cache generations
  Keys,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(config.log_dir.as_deref())?;

  let database = match args.database.or_else(|| config.database.clone()) {
    Some(path) => path,
    None => SqliteStorage::default_path()?,
  };

  let controller = CacheController::new(
    config.cache_config()?,
    SqliteStorage::open(&database)?,
    HttpNetwork::new()?,
  );

  match args.command {
    Command::Install => {
      event::dispatch(&controller, Event::Install).await?;
      println!("installed {}", controller.config().cache_name());
    }
    Command::Activate => {
      if let EventOutcome::Activated(report) = event::dispatch(&controller, Event::Activate).await? {
        print_activation(&report);
      }
    }
    Command::Register => {
      let report = event::register(&controller).await?;
      println!("installed {}", controller.config().cache_name());
      print_activation(&report);
    }
    Command::Fetch {
      urls,
      headers,
      body,
    } => {
      let events = urls
        .iter()
        .map(|u| -> Result<Event> {
          let request = headers
            .iter()
            .fold(resolve_request(&config.origin, u)?, |req, (name, value)| {
              req.with_header(name, value)
            });
          Ok(Event::Fetch(request))
        })
        .collect::<Result<Vec<_>>>()?;

      let results = event::dispatch_all(&controller, events).await;

      let mut failed = 0;
      let mut stdout = std::io::stdout().lock();
      for (url, result) in urls.iter().zip(results) {
        match result {
          Ok(EventOutcome::Responded(result)) => {
            eprintln!(
              "{} {} {} {} ({} bytes)",
              result.data.status,
              describe_source(&result),
              url,
              result.data.header("content-type").unwrap_or("-"),
              result.data.body.len()
            );
            if body {
              stdout.write_all(&result.data.body)?;
            }
          }
          Ok(other) => return Err(eyre!("Unexpected outcome for fetch: {:?}", other)),
          Err(e) => {
            failed += 1;
            eprintln!("failed {}: {}", url, e);
          }
        }
      }
      stdout.flush()?;

      if failed > 0 {
        return Err(eyre!("{} of {} requests failed", failed, urls.len()));
      }
    }
    Command::Keys => {
      let current = controller.config().cache_name();
      for tag in controller.storage().keys().await? {
        let count = controller.storage().entry_count(&tag).await?;
        let marker = if tag == current { "*" } else { " " };
        println!("{} {} ({} entries)", marker, tag, count);
      }
    }
  }

  Ok(())
}

/// Build a GET for `target`, resolving bare paths against the page origin.
fn resolve_request(origin: &str, target: &str) -> Result<Request> {
  let base = url::Url::parse(origin).map_err(|e| eyre!("Invalid origin '{}': {}", origin, e))?;
  let url = base
    .join(target)
    .map_err(|e| eyre!("Invalid URL '{}': {}", target, e))?;
  Ok(Request::get(url))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
  let (name, value) = s
    .split_once(':')
    .ok_or_else(|| format!("expected NAME:VALUE, got '{}'", s))?;
  Ok((name.trim().to_string(), value.trim().to_string()))
}

/// Where a fetch result came from, with the time it was cached.
fn describe_source(result: &CacheResult<Response>) -> String {
  match (&result.source, result.cached_at) {
    (CacheSource::Cache { generation }, Some(at)) => {
      format!("cache:{} (cached {})", generation, at.format("%Y-%m-%d %H:%M:%S UTC"))
    }
    (source, _) => source.to_string(),
  }
}

fn print_activation(report: &cache::ActivationReport) {
  println!("active {}", report.current);
  for tag in &report.removed {
    println!("removed {}", tag);
  }
  for tag in &report.retained {
    println!("kept {} (delete failed)", tag);
  }
}
