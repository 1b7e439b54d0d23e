//! Unix Domain Socket transport between apps and the broker.
//!
//! ## Overview
//!
//! The IPC system uses a JSON newline-delimited protocol. Each frame is a
//! single JSON object followed by a newline. An app connects, registers its
//! identity, and then submits link requests; the broker pushes every
//! response addressed to that identity down the same connection.
//!
//! ```text
//!   app                                broker
//!    │── {"Register":{"app_id":"appa"}} ─▶│
//!    │◀─ {"Registered":{"app_id":"appa"}} │
//!    │── {"Submit":{"request":{...}}} ───▶│
//!    │◀─ {"Response":{... Pending ...}} ──│
//!    │◀─ {"Response":{... Successful ...}}│
//! ```
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/link-daemon/broker.sock`
//! - Fallback: `/tmp/link-daemon-$UID/broker.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use link_daemon::ipc::{get_socket_path, IpcClient};
//! use link_protocol::LinkRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&get_socket_path()).await?;
//!     client.register("appa").await?;
//!
//!     client.submit(LinkRequest::new("a.jpg", "appb").with_ids("t-1", "c-1")).await?;
//!     let pending = client.next_response().await?;
//!     let terminal = client.next_response().await?;
//!     println!("{} -> {}", pending.status(), terminal.status());
//!     Ok(())
//! }
//! ```

mod client;
mod messages;
mod server;
mod transport;

pub use client::IpcClient;
pub use messages::{IpcRequest, IpcResponse};
pub use server::{IpcConnection, IpcError, IpcReader, IpcServer, IpcWriter};
pub use transport::{serve, serve_connection, IpcTransport};

use std::path::PathBuf;

/// Socket file name inside the runtime directory.
const SOCKET_FILE: &str = "broker.sock";

/// Get the socket path the broker listens on.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/link-daemon/broker.sock`
/// 2. Otherwise: `/tmp/link-daemon-$UID/broker.sock`
#[cfg(unix)]
pub fn get_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(runtime_dir) if !runtime_dir.is_empty() => {
            PathBuf::from(runtime_dir).join("link-daemon").join(SOCKET_FILE)
        }
        _ => {
            // UID of the owner of our own /proc entry
            let uid = std::fs::metadata("/proc/self")
                .map(|m| m.uid())
                .unwrap_or(0);

            PathBuf::from(format!("/tmp/link-daemon-{}", uid)).join(SOCKET_FILE)
        }
    }
}

/// Non-Unix platforms have no Unix Domain Sockets; connecting will fail.
#[cfg(not(unix))]
pub fn get_socket_path() -> PathBuf {
    PathBuf::from("/tmp/link-daemon-unsupported").join(SOCKET_FILE)
}
