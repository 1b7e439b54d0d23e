//! # Link Protocol Library
//!
//! Message definitions shared by the link broker and the apps that use it.
//!
//! ## Overview
//!
//! An app asks the broker to move a file out of its own `outbox` into another
//! app's `inbox` by sending a [`LinkRequest`]. The broker answers twice: once
//! with a `Pending` [`LinkResponse`] when the request is accepted, and once with
//! a terminal status after the move has been attempted. Both responses carry
//! the caller's tracking and correlation identifiers unchanged.
//!
//! ```text
//!   app A                      broker                       app B
//!     │── LinkRequest ───────────▶│                            │
//!     │◀────────── Pending ───────│                            │
//!     │                           │── move outbox → inbox      │
//!     │◀────────── Successful ────│─────────── Successful ────▶│
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use link_protocol::{LinkRequest, LinkResponse, StatusCode};
//!
//! let request = LinkRequest::new("image.jpg", "app-b").with_ids("t-1", "c-1");
//! let ack = LinkResponse::pending(request);
//! assert_eq!(ack.status(), StatusCode::Pending);
//! assert_eq!(ack.tracking_id(), "t-1");
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Request/response definitions
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{LinkRequest, LinkResponse, LinkType, Priority, ResponseHeader, StatusCode};
