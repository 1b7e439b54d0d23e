//! # Link Daemon Library
//!
//! A host-level broker that moves files between the staging directories of
//! co-resident apps.
//!
//! ## Overview
//!
//! Every app owns `<xfer_root>/<app>/outbox` and `<xfer_root>/<app>/inbox`.
//! An app asks for one of its outbox files to be delivered to another app's
//! inbox; the broker acknowledges with `Pending`, performs the move on a
//! single consumer, writes a receipt next to the delivered file and reports
//! the outcome to both parties.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Broker Orchestrator                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  IPC socket ─▶ RequestIntake ─▶ TransferQueue ─▶ MoveEngine      │
//! │                    │  ▲                            │  ▲          │
//! │                    ▼  │                            ▼  │          │
//! │             PluginPipeline (pre)          PluginPipeline (post)  │
//! │                    │                               │             │
//! │                    └──── Pending ───┐  ┌─ outcome ─┘             │
//! │                                     ▼  ▼                         │
//! │                                   Transport                      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use link_daemon::{BrokerOrchestrator, ChannelTransport, Config, PluginPipeline};
//! use link_daemon::link_protocol::LinkRequest;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let (transport, mut deliveries) = ChannelTransport::new();
//!
//!     let orchestrator = BrokerOrchestrator::new(config, PluginPipeline::new(), transport)?;
//!     orchestrator.start().await?;
//!
//!     let request = LinkRequest::new("image.jpg", "appb").with_ids("t-1", "c-1");
//!     orchestrator.intake().handle(Some(request), "appa").await;
//!
//!     while let Some(delivery) = deliveries.recv().await {
//!         println!("{} <- {}", delivery.app_id, delivery.response.status());
//!     }
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`files`]: Path validation, atomic copies and receipts
//! - [`intake`]: Request admission and the `Pending` acknowledgement
//! - [`ipc`]: Unix socket transport for apps
//! - [`mover`]: The move algorithm and its single-consumer engine
//! - [`orchestrator`]: Component wiring and lifecycle
//! - [`plugins`]: Ordered request/response transforms
//! - [`queue`]: FIFO hand-off between intake and engine
//! - [`transport`]: Outbound delivery abstraction

pub mod config;
pub mod files;
pub mod intake;
pub mod ipc;
pub mod mover;
pub mod orchestrator;
pub mod plugins;
pub mod queue;
pub mod transport;

// Re-export protocol for convenience
pub use link_protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError, LinkConfig};

// Re-export pipeline types for convenience
pub use intake::{IntakeOutcome, RequestIntake, DEPLOYMENT_APP_ID};
pub use mover::{MoveEngine, MoveError, MoveSettings, DOWNLINK_APP_ID};
pub use queue::{transfer_queue, QueueError, QueueReceiver, QueueSender};

// Re-export plugin types for convenience
pub use plugins::{
    builtin_plugins, LinkPlugin, PluginDescriptor, PluginError, PluginPermissions, PluginPipeline,
};

// Re-export transport types for convenience
pub use ipc::IpcTransport;
pub use transport::{ChannelTransport, Delivery, Transport, TransportError};

// Re-export orchestrator types for convenience
pub use orchestrator::{BrokerOrchestrator, OrchestratorEvent, OrchestratorState};
