//! IPC frame types exchanged between apps and the broker.
//!
//! An app connects, registers its identity, then submits link requests on the
//! same connection. Responses for that identity are pushed down the
//! connection whenever the broker produces them.

use link_protocol::{LinkRequest, LinkResponse};
use serde::{Deserialize, Serialize};

/// Frames sent from an app to the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the broker is alive. Allowed before registration.
    Ping,
    /// Bind this connection to an app identity.
    Register {
        /// Identity responses are addressed to. Matched case-insensitively.
        app_id: String,
    },
    /// Submit a link request on behalf of the registered identity.
    Submit {
        /// The request. `null` is accepted and discarded by the broker.
        request: Option<LinkRequest>,
    },
}

/// Frames sent from the broker to an app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    /// Response to a Ping request.
    Pong,
    /// Registration accepted.
    Registered {
        /// The identity as the broker stores it.
        app_id: String,
    },
    /// A link response addressed to this app.
    Response(LinkResponse),
    /// The previous frame could not be handled.
    Error {
        /// Human-readable error message.
        message: String,
    },
}
