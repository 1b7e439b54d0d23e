//! IPC client an app uses to talk to the broker via Unix Domain Sockets.
//!
//! Registration and pings follow a request-response pattern. Link responses
//! are pushed by the broker, so after [`IpcClient::submit`] the app reads
//! them with [`IpcClient::next_response`].

use std::io;
use std::path::Path;
use std::time::Duration;

use link_protocol::{LinkRequest, LinkResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::messages::{IpcRequest, IpcResponse};
use super::server::IpcError;

/// Default timeout for client operations in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

fn timed_out(what: &str) -> IpcError {
    IpcError::Io(io::Error::new(io::ErrorKind::TimedOut, format!("{what} timed out")))
}

/// A client for communicating with the broker via IPC.
pub struct IpcClient {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
    timeout: Duration,
}

impl IpcClient {
    /// Connect to the broker at the specified socket path.
    ///
    /// Fails when nothing is listening, which usually means the broker is not running.
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        Self::connect_with_timeout(path, Duration::from_secs(DEFAULT_TIMEOUT_SECS)).await
    }

    /// Connect to the broker with a custom timeout for every operation.
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| timed_out("connection"))??;

        let (read_half, write_half) = tokio::io::split(stream);

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout,
        })
    }

    /// Set the timeout for operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a frame and wait for the next frame from the broker.
    pub async fn send(&mut self, request: IpcRequest) -> Result<IpcResponse, IpcError> {
        self.write_frame(&request).await?;
        self.read_frame().await
    }

    async fn write_frame(&mut self, request: &IpcRequest) -> Result<(), IpcError> {
        let mut json = serde_json::to_string(request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<IpcResponse, IpcError> {
        let mut line = String::new();
        let bytes_read = tokio::time::timeout(self.timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| timed_out("read"))??;

        if bytes_read == 0 {
            return Err(IpcError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "broker closed connection",
            )));
        }

        Ok(serde_json::from_str(line.trim())?)
    }

    /// Check that the broker responds.
    pub async fn ping(&mut self) -> Result<bool, IpcError> {
        let response = self.send(IpcRequest::Ping).await?;
        Ok(matches!(response, IpcResponse::Pong))
    }

    /// Register this connection as `app_id`. Returns the identity the broker stored.
    pub async fn register(&mut self, app_id: &str) -> Result<String, IpcError> {
        let request = IpcRequest::Register {
            app_id: app_id.to_string(),
        };
        match self.send(request).await? {
            IpcResponse::Registered { app_id } => Ok(app_id),
            IpcResponse::Error { message } => Err(IpcError::Protocol(message)),
            other => Err(IpcError::Protocol(format!(
                "unexpected reply to Register: {other:?}"
            ))),
        }
    }

    /// Submit a link request. Replies arrive through [`next_response`](Self::next_response).
    pub async fn submit(&mut self, request: LinkRequest) -> Result<(), IpcError> {
        self.write_frame(&IpcRequest::Submit {
            request: Some(request),
        })
        .await
    }

    /// Wait for the next link response addressed to this app.
    pub async fn next_response(&mut self) -> Result<LinkResponse, IpcError> {
        match self.read_frame().await? {
            IpcResponse::Response(response) => Ok(response),
            IpcResponse::Error { message } => Err(IpcError::Protocol(message)),
            other => Err(IpcError::Protocol(format!("unexpected frame: {other:?}"))),
        }
    }
}
