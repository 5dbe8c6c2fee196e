//! Lifecycle events raised by the host and their dispatch.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use tracing::{info_span, Instrument};

use crate::cache::{ActivationReport, CacheResult, Request, Response};

/// Handlers for the three lifecycle events.
///
/// The host awaits the returned future before it considers the event
/// resolved; an `Err` is the event's failure.
#[allow(async_fn_in_trait)]
pub trait Lifecycle {
  async fn on_install(&self) -> Result<()>;

  async fn on_fetch(&self, request: Request) -> Result<CacheResult<Response>>;

  async fn on_activate(&self) -> Result<ActivationReport>;
}

/// Lifecycle events
#[derive(Debug, Clone)]
pub enum Event {
  /// A new version is being installed
  Install,
  /// The page issued a request
  Fetch(Request),
  /// The installed version is taking over
  Activate,
}

impl Event {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Install => "install",
      Self::Fetch(_) => "fetch",
      Self::Activate => "activate",
    }
  }
}

/// What a resolved event produced
#[derive(Debug)]
pub enum EventOutcome {
  Installed,
  Responded(CacheResult<Response>),
  Activated(ActivationReport),
}

/// Run the handler for one event and wait for it to resolve.
pub async fn dispatch<L: Lifecycle>(lifecycle: &L, event: Event) -> Result<EventOutcome> {
  let span = match &event {
    Event::Fetch(request) => info_span!("event", kind = event.name(), url = %request.url),
    _ => info_span!("event", kind = event.name()),
  };

  async move {
    match event {
      Event::Install => lifecycle.on_install().await.map(|_| EventOutcome::Installed),
      Event::Fetch(request) => lifecycle.on_fetch(request).await.map(EventOutcome::Responded),
      Event::Activate => lifecycle.on_activate().await.map(EventOutcome::Activated),
    }
  }
  .instrument(span)
  .await
}

/// Dispatch independent events concurrently. Results come back in input order.
pub async fn dispatch_all<L: Lifecycle>(
  lifecycle: &L,
  events: Vec<Event>,
) -> Vec<Result<EventOutcome>> {
  join_all(events.into_iter().map(|event| dispatch(lifecycle, event))).await
}

/// Install, then activate only if the install succeeded.
///
/// A failed install never reaches activation, so the generations of the
/// previous version stay in place.
pub async fn register<L: Lifecycle>(lifecycle: &L) -> Result<ActivationReport> {
  dispatch(lifecycle, Event::Install)
    .await
    .map_err(|e| eyre!("Installation failed: {}", e))?;

  match dispatch(lifecycle, Event::Activate).await? {
    EventOutcome::Activated(report) => Ok(report),
    other => Err(eyre!("Unexpected outcome for activate: {:?}", other)),
  }
}
