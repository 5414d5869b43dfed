//! Session lifecycle webhooks
//!
//! The connection driver notifies a [`HookDispatcher`] when a client starts
//! or stops publishing or playing, but only for virtual hosts that enable
//! hooks and configure a URL for the event. Delivery (HTTP or otherwise)
//! is up to the implementation.

use async_trait::async_trait;
use thiserror::Error;

use crate::session::Request;

/// Lifecycle event reported to hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Publish,
    Unpublish,
    Play,
    Stop,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::Publish => "on_publish",
            HookEvent::Unpublish => "on_unpublish",
            HookEvent::Play => "on_play",
            HookEvent::Stop => "on_stop",
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hook failure
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook endpoint denied the transition
    #[error("{url} rejected the request: {reason}")]
    Rejected { url: String, reason: String },

    /// The hook endpoint could not be reached or answered garbage
    #[error("{url} failed: {reason}")]
    Failed { url: String, reason: String },
}

/// Receiver of lifecycle webhooks
///
/// A failing `on_publish` or `on_play` aborts that transition and closes
/// the connection. Failures of `on_unpublish` and `on_stop` are only logged.
#[async_trait]
pub trait HookDispatcher: Send + Sync + 'static {
    async fn on_publish(&self, _url: &str, _req: &Request) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_unpublish(&self, _url: &str, _req: &Request) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_play(&self, _url: &str, _req: &Request) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_stop(&self, _url: &str, _req: &Request) -> Result<(), HookError> {
        Ok(())
    }
}

/// Dispatcher that accepts everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl HookDispatcher for NoopHooks {}

/// Route an event to the matching dispatcher method
pub async fn dispatch(
    hooks: &dyn HookDispatcher,
    event: HookEvent,
    url: &str,
    req: &Request,
) -> Result<(), HookError> {
    tracing::debug!(event = %event, url = url, stream = %req.stream_url(), "Calling hook");
    match event {
        HookEvent::Publish => hooks.on_publish(url, req).await,
        HookEvent::Unpublish => hooks.on_unpublish(url, req).await,
        HookEvent::Play => hooks.on_play(url, req).await,
        HookEvent::Stop => hooks.on_stop(url, req).await,
    }
}
