//! IPC server accepting app connections via Unix Domain Sockets.
//!
//! The server listens on a Unix socket. Each accepted connection is split
//! into a reader for inbound frames and a writer for outbound frames, so
//! responses can be pushed while the app is still submitting.

use std::io;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::{UnixListener, UnixStream};

use super::messages::{IpcRequest, IpcResponse};

/// A server that listens for IPC connections on a Unix Domain Socket.
pub struct IpcServer {
    listener: UnixListener,
}

impl IpcServer {
    /// Bind the server to the specified socket path.
    ///
    /// Parent directories are created. A stale socket file at the path is
    /// removed first.
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;

        Ok(Self { listener })
    }

    /// Wait for the next incoming connection.
    pub async fn accept(&self) -> Result<IpcConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(IpcConnection::new(stream))
    }
}

/// A connection to one app.
pub struct IpcConnection {
    reader: IpcReader,
    writer: IpcWriter,
}

impl IpcConnection {
    fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: IpcReader {
                inner: BufReader::new(read_half),
            },
            writer: IpcWriter { inner: write_half },
        }
    }

    /// Read the next frame. `None` once the app has disconnected.
    pub async fn read_request(&mut self) -> Result<Option<IpcRequest>, IpcError> {
        self.reader.read_request().await
    }

    /// Send one frame.
    pub async fn send_response(&mut self, response: &IpcResponse) -> Result<(), IpcError> {
        self.writer.send_response(response).await
    }

    /// Separate the reading and writing sides.
    pub fn split(self) -> (IpcReader, IpcWriter) {
        (self.reader, self.writer)
    }
}

/// Reading side of an [`IpcConnection`].
pub struct IpcReader {
    inner: BufReader<ReadHalf<UnixStream>>,
}

impl IpcReader {
    /// Read the next frame. `None` once the app has disconnected.
    pub async fn read_request(&mut self) -> Result<Option<IpcRequest>, IpcError> {
        let mut line = String::new();
        let bytes_read = self.inner.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        let request = serde_json::from_str(line.trim())?;
        Ok(Some(request))
    }
}

/// Writing side of an [`IpcConnection`].
pub struct IpcWriter {
    inner: WriteHalf<UnixStream>,
}

impl IpcWriter {
    /// Send one newline-terminated JSON frame.
    pub async fn send_response(&mut self, response: &IpcResponse) -> Result<(), IpcError> {
        let mut json = serde_json::to_string(response)?;
        json.push('\n');

        self.inner.write_all(json.as_bytes()).await?;
        self.inner.flush().await?;

        Ok(())
    }
}

/// Errors that can occur during IPC communication.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A JSON serialization/deserialization error occurred.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer sent a frame that is not valid at this point.
    #[error("protocol error: {0}")]
    Protocol(String),
}
