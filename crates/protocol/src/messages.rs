//! Link service message definitions.
//!
//! Apps talk to the broker with exactly two message kinds. A [`LinkRequest`]
//! asks the broker to move a file from the sender's outbox into another app's
//! inbox; every reply is a [`LinkResponse`] that embeds a snapshot of the
//! request it answers. Both serialize to camelCase JSON, which is also the
//! format of the receipt written beside a delivered file.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Outcome of a link request.
///
/// Every status other than [`StatusCode::Pending`] is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StatusCode {
    /// Accepted and queued; a terminal response follows later.
    #[default]
    Pending,
    /// The file was delivered and a receipt written.
    Successful,
    /// The request was refused.
    Rejected,
    /// The destination is not permitted for this broker.
    Unauthorized,
    /// The request carried a malformed or missing field.
    InvalidArgument,
    /// A source path was missing, or the destination exists without overwrite.
    NotFound,
    /// A filesystem operation failed while processing the request.
    InternalServiceError,
}

impl StatusCode {
    /// Returns true once no further responses will follow for a request.
    pub fn is_terminal(self) -> bool {
        self != StatusCode::Pending
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Pending => "Pending",
            StatusCode::Successful => "Successful",
            StatusCode::Rejected => "Rejected",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::InvalidArgument => "InvalidArgument",
            StatusCode::NotFound => "NotFound",
            StatusCode::InternalServiceError => "InternalServiceError",
        };
        f.write_str(name)
    }
}

/// Direction of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinkType {
    /// Ground to host.
    Uplink,
    /// Host to ground. The destination is always the platform transport service.
    Downlink,
    /// Host to another host.
    Crosslink,
    /// Between two apps on the same host.
    App2App,
    /// Not specified by the caller.
    #[default]
    Unknown,
}

/// Caller-assigned priority. Carried through, not used for scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Request to move a file from the source app's outbox to the destination app's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkRequest {
    /// Caller-supplied tracking identifier, echoed on every response.
    pub tracking_id: String,
    /// Caller-supplied correlation identifier, echoed on every response.
    pub correlation_id: String,
    /// App that owns the outbox the file is taken from.
    pub source_app_id: String,
    /// App whose inbox receives the file.
    pub destination_app_id: String,
    /// Name of the file inside the outbox.
    pub file_name: String,
    /// Optional relative directory below both the outbox and the inbox.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subdirectory: String,
    /// Direction of the link.
    pub link_type: LinkType,
    /// Replace an existing destination file.
    pub overwrite: bool,
    /// Keep the source file after a successful transfer.
    pub leave_source_file: bool,
    /// Expiration carried for the caller's benefit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
    /// Caller-assigned priority.
    pub priority: Priority,
}

impl LinkRequest {
    /// Create a request for `file_name` addressed to `destination_app_id`.
    pub fn new(file_name: impl Into<String>, destination_app_id: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            destination_app_id: destination_app_id.into(),
            ..Default::default()
        }
    }

    /// Set the tracking and correlation identifiers.
    pub fn with_ids(
        mut self,
        tracking_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        self.tracking_id = tracking_id.into();
        self.correlation_id = correlation_id.into();
        self
    }

    /// Set the originating app.
    pub fn with_source(mut self, source_app_id: impl Into<String>) -> Self {
        self.source_app_id = source_app_id.into();
        self
    }

    /// Set the relative subdirectory.
    pub fn with_subdirectory(mut self, subdirectory: impl Into<String>) -> Self {
        self.subdirectory = subdirectory.into();
        self
    }

    /// Set the link type.
    pub fn with_link_type(mut self, link_type: LinkType) -> Self {
        self.link_type = link_type;
        self
    }

    /// Allow replacing an existing destination file.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Keep or remove the source file after a successful transfer.
    pub fn with_leave_source_file(mut self, leave_source_file: bool) -> Self {
        self.leave_source_file = leave_source_file;
        self
    }

    /// True when every field holds its default value.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Parse a request from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Header shared by every response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseHeader {
    pub tracking_id: String,
    pub correlation_id: String,
    pub status: StatusCode,
    /// Human-readable detail, empty on success.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Reply to a [`LinkRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkResponse {
    pub response_header: ResponseHeader,
    /// Snapshot of the request this response answers.
    pub link_request: LinkRequest,
    /// Size of the delivered file in KiB. Set only on success.
    #[serde(rename = "fileSizeKB", skip_serializing_if = "Option::is_none")]
    pub file_size_kb: Option<u64>,
    /// When the file was delivered. Set only on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_processed_time: Option<DateTime<Utc>>,
}

impl LinkResponse {
    /// Build the `Pending` acknowledgment for a request.
    ///
    /// The identifiers are copied from the request and never change afterwards.
    pub fn pending(request: LinkRequest) -> Self {
        Self {
            response_header: ResponseHeader {
                tracking_id: request.tracking_id.clone(),
                correlation_id: request.correlation_id.clone(),
                status: StatusCode::Pending,
                message: String::new(),
            },
            link_request: request,
            file_size_kb: None,
            link_processed_time: None,
        }
    }

    /// Current status.
    pub fn status(&self) -> StatusCode {
        self.response_header.status
    }

    /// Set the status and its explanatory message.
    pub fn set_status(&mut self, status: StatusCode, message: impl Into<String>) {
        self.response_header.status = status;
        self.response_header.message = message.into();
    }

    /// Tracking identifier of the request this response answers.
    pub fn tracking_id(&self) -> &str {
        &self.response_header.tracking_id
    }

    /// Correlation identifier of the request this response answers.
    pub fn correlation_id(&self) -> &str {
        &self.response_header.correlation_id
    }

    /// Serialize as indented JSON, the format used for receipts.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a response from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
