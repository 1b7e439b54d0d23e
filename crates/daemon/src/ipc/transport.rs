//! Broker side of the IPC socket: app registry, delivery and the accept loop.

use std::sync::Arc;

use dashmap::DashMap;
use link_protocol::LinkResponse;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{IpcRequest, IpcResponse};
use super::server::{IpcConnection, IpcError, IpcServer, IpcWriter};
use crate::files::validate_segment;
use crate::intake::RequestIntake;
use crate::transport::{Transport, TransportError};

type Outbox = mpsc::UnboundedSender<IpcResponse>;

/// [`Transport`] that delivers to apps connected over the IPC socket.
///
/// Each registered connection owns a writer task fed by a channel; the
/// registry maps the lower-cased app identity to that channel. Responses for
/// an identity with no live connection are dropped.
#[derive(Debug, Clone, Default)]
pub struct IpcTransport {
    apps: Arc<DashMap<String, Outbox>>,
}

impl IpcTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identities with a live connection.
    pub fn connected_apps(&self) -> Vec<String> {
        let mut apps: Vec<String> = self.apps.iter().map(|e| e.key().clone()).collect();
        apps.sort();
        apps
    }

    fn register(&self, app_id: &str, outbox: Outbox) {
        if let Some(previous) = self.apps.insert(app_id.to_string(), outbox) {
            if !previous.is_closed() {
                warn!(app_id, "App registered again, replacing previous connection");
            }
        }
    }

    fn unregister(&self, app_id: &str, outbox: &Outbox) {
        self.apps
            .remove_if(app_id, |_, current| current.same_channel(outbox));
    }
}

impl Transport for IpcTransport {
    async fn send_to_app(
        &self,
        app_id: &str,
        response: &LinkResponse,
    ) -> Result<(), TransportError> {
        let key = app_id.to_lowercase();
        let outbox = self
            .apps
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::AppUnavailable(key.clone()))?;

        outbox
            .send(IpcResponse::Response(response.clone()))
            .map_err(|_| TransportError::AppUnavailable(key))
    }
}

/// Accept app connections until `shutdown` fires.
///
/// Every connection is served on its own task, and every submitted request
/// is handed to `intake` on its own task.
pub async fn serve(
    server: IpcServer,
    intake: RequestIntake<IpcTransport>,
    transport: IpcTransport,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("IPC accept loop received shutdown signal");
                break;
            }
            accepted = server.accept() => match accepted {
                Ok(conn) => {
                    let intake = intake.clone();
                    let transport = transport.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(conn, intake, transport, shutdown).await {
                            debug!(error = %e, "IPC connection ended with error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Failed to accept IPC connection"),
            },
        }
    }
}

/// Serve one app connection.
///
/// Until the app registers, only `Ping` and `Register` are accepted.
pub async fn serve_connection(
    mut conn: IpcConnection,
    intake: RequestIntake<IpcTransport>,
    transport: IpcTransport,
    shutdown: CancellationToken,
) -> Result<(), IpcError> {
    let app_id = loop {
        match conn.read_request().await? {
            None => return Ok(()),
            Some(IpcRequest::Ping) => conn.send_response(&IpcResponse::Pong).await?,
            Some(IpcRequest::Register { app_id }) => {
                let app_id = app_id.trim().to_lowercase();
                match validate_segment("app_id", &app_id) {
                    Ok(()) => break app_id,
                    Err(e) => {
                        conn.send_response(&IpcResponse::Error {
                            message: e.to_string(),
                        })
                        .await?
                    }
                }
            }
            Some(IpcRequest::Submit { .. }) => {
                conn.send_response(&IpcResponse::Error {
                    message: "register before submitting".to_string(),
                })
                .await?
            }
        }
    };

    // frames queued before the writer task starts go out after Registered
    let (outbox, frames) = mpsc::unbounded_channel();
    transport.register(&app_id, outbox.clone());

    if let Err(e) = conn
        .send_response(&IpcResponse::Registered {
            app_id: app_id.clone(),
        })
        .await
    {
        transport.unregister(&app_id, &outbox);
        return Err(e);
    }

    let (mut reader, writer) = conn.split();
    info!(app_id = %app_id, "App connected");

    let writer_task = tokio::spawn(write_frames(writer, frames, app_id.clone()));

    let result = loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            frame = reader.read_request() => frame,
        };

        match frame {
            Ok(None) => break Ok(()),
            Ok(Some(IpcRequest::Submit { request })) => {
                intake.spawn_handle(request, app_id.clone());
            }
            Ok(Some(IpcRequest::Ping)) => {
                let _ = outbox.send(IpcResponse::Pong);
            }
            Ok(Some(IpcRequest::Register { .. })) => {
                let _ = outbox.send(IpcResponse::Error {
                    message: format!("connection is already registered as {app_id}"),
                });
            }
            Err(IpcError::Json(e)) => {
                let _ = outbox.send(IpcResponse::Error {
                    message: format!("invalid frame: {e}"),
                });
            }
            Err(e) => break Err(e),
        }
    };

    transport.unregister(&app_id, &outbox);
    drop(outbox);
    writer_task.abort();
    info!(app_id = %app_id, "App disconnected");
    result
}

async fn write_frames(
    mut writer: IpcWriter,
    mut frames: mpsc::UnboundedReceiver<IpcResponse>,
    app_id: String,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.send_response(&frame).await {
            warn!(app_id = %app_id, error = %e, "Failed to write IPC frame");
            break;
        }
    }
}
