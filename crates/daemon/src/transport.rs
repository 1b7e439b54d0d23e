//! Outbound delivery of responses to app identities.
//!
//! The broker never talks to a socket directly. Intake and the move engine
//! hand responses to a [`Transport`], which knows how to reach an app by its
//! identity. [`ChannelTransport`] keeps everything in process;
//! [`crate::ipc::IpcTransport`] delivers over the local Unix socket.

use std::future::Future;

use link_protocol::LinkResponse;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised while delivering a response.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No live connection for the app.
    #[error("app {0} is not connected")]
    AppUnavailable(String),

    /// The underlying channel or socket is gone.
    #[error("transport closed")]
    Closed,

    /// The response could not be encoded.
    #[error("failed to encode response: {0}")]
    Encode(String),
}

/// Delivers responses addressed by app identity.
///
/// Implementations must be cheap to share; the broker clones the transport
/// into every intake task and into the move engine.
pub trait Transport: Send + Sync + 'static {
    /// Send one response to the app registered under `app_id`.
    fn send_to_app(
        &self,
        app_id: &str,
        response: &LinkResponse,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Deliver a response, logging instead of failing when delivery does not work.
pub async fn deliver<T: Transport + ?Sized>(transport: &T, app_id: &str, response: &LinkResponse) {
    match transport.send_to_app(app_id, response).await {
        Ok(()) => tracing::debug!(
            app_id,
            tracking_id = %response.tracking_id(),
            status = %response.status(),
            "Response delivered"
        ),
        Err(e) => tracing::warn!(
            app_id,
            tracking_id = %response.tracking_id(),
            status = %response.status(),
            error = %e,
            "Failed to deliver response"
        ),
    }
}

/// A delivered response and the app it was addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub app_id: String,
    pub response: LinkResponse,
}

/// In-process transport that forwards every delivery onto a channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelTransport {
    /// Create a transport and the receiver that observes its deliveries.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    async fn send_to_app(
        &self,
        app_id: &str,
        response: &LinkResponse,
    ) -> Result<(), TransportError> {
        self.tx
            .send(Delivery {
                app_id: app_id.to_string(),
                response: response.clone(),
            })
            .map_err(|_| TransportError::Closed)
    }
}
