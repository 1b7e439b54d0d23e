//! Move engine: the single consumer that applies queued link requests.
//!
//! The engine drains the transfer queue completely, one item at a time, then
//! waits up to the poll interval for more work. Every filesystem mutation in
//! the broker happens on this one task, so the shared transfer tree never has
//! two writers. Blocking file I/O for an item runs under
//! [`tokio::task::spawn_blocking`]; a panic there fails only that item.
//!
//! ## Per-item steps
//!
//! ```text
//! normalize destination ─▶ check names ─▶ resolve outbox/inbox
//!        ─▶ conflict check ─▶ rename probe ─▶ atomic copy ─▶ receipt
//!        ─▶ source cleanup ─▶ post plugins ─▶ notify
//! ```

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use link_protocol::{LinkResponse, LinkType, StatusCode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::LinkConfig;
use crate::files::{
    atomic_copy, ensure_contained, is_regular_file, probe_rename, validate_segment,
    validate_subdirectory, write_receipt, PathError, ReceiptError,
};
use crate::plugins::PluginPipeline;
use crate::queue::{QueueError, QueueReceiver};
use crate::transport::{deliver, Transport};

/// Identity every downlink is delivered to, whatever the caller asked for.
pub const DOWNLINK_APP_ID: &str = "platform-mts";

/// Per-app directory other apps deliver into.
pub const INBOX_DIR: &str = "inbox";

/// Per-app directory an app stages outgoing files in.
pub const OUTBOX_DIR: &str = "outbox";

/// Reasons a queued link request fails.
#[derive(Debug, Error)]
pub enum MoveError {
    #[error("destinationAppId is required")]
    MissingDestination,

    #[error(transparent)]
    InvalidPath(#[from] PathError),

    #[error("source app directory not found: {}", .0.display())]
    SourceAppNotFound(PathBuf),

    #[error("subdirectory not found: {}", .0.display())]
    SubdirectoryNotFound(PathBuf),

    #[error("source file not found: {}", .0.display())]
    SourceFileNotFound(PathBuf),

    #[error("destination file already exists and overwrite is not set: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("failed to create destination directory {}: {source}", .path.display())]
    CreateDestination { path: PathBuf, source: io::Error },

    #[error("failed to remove existing destination file {}: {source}", .path.display())]
    RemoveDestination { path: PathBuf, source: io::Error },

    #[error("source file is busy {}: {source}", .path.display())]
    SourceBusy { path: PathBuf, source: io::Error },

    #[error("failed to copy {} to {}: {source}", .from.display(), .to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error(transparent)]
    Receipt(#[from] ReceiptError),

    #[error("move aborted: {0}")]
    Aborted(String),
}

impl MoveError {
    /// Status reported to the caller for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            MoveError::MissingDestination | MoveError::InvalidPath(_) => {
                StatusCode::InvalidArgument
            }
            MoveError::SourceAppNotFound(_)
            | MoveError::SubdirectoryNotFound(_)
            | MoveError::SourceFileNotFound(_)
            | MoveError::DestinationExists(_) => StatusCode::NotFound,
            MoveError::CreateDestination { .. }
            | MoveError::RemoveDestination { .. }
            | MoveError::SourceBusy { .. }
            | MoveError::Copy { .. }
            | MoveError::Receipt(_)
            | MoveError::Aborted(_) => StatusCode::InternalServiceError,
        }
    }
}

/// Filesystem half of the engine. Runs on a blocking thread.
#[derive(Debug, Clone)]
pub struct MoveSettings {
    /// Root holding one directory per app.
    pub xfer_root: PathBuf,
    /// Replaces the request's `leave_source_file` when set.
    pub leave_source_file_override: Option<bool>,
}

impl From<&LinkConfig> for MoveSettings {
    fn from(config: &LinkConfig) -> Self {
        Self {
            xfer_root: config.xfer_root.clone(),
            leave_source_file_override: config.leave_source_file(),
        }
    }
}

impl MoveSettings {
    /// Apply one queued request and return its terminal response.
    pub fn execute(&self, mut response: LinkResponse) -> LinkResponse {
        match self.transfer(&mut response) {
            Ok(source_file) => {
                info!(
                    tracking_id = %response.tracking_id(),
                    destination = %response.link_request.destination_app_id,
                    file = %response.link_request.file_name,
                    file_size_kb = ?response.file_size_kb,
                    "LinkRequest completed"
                );
                self.cleanup_source(&mut response, source_file);
            }
            Err(e) => {
                warn!(
                    tracking_id = %response.tracking_id(),
                    correlation_id = %response.correlation_id(),
                    status = %e.status(),
                    error = %e,
                    "LinkRequest failed"
                );
                response.file_size_kb = None;
                response.link_processed_time = None;
                response.set_status(e.status(), e.to_string());
            }
        }
        response
    }

    /// Steps up to and including the receipt. Returns the source file path.
    fn transfer(&self, response: &mut LinkResponse) -> Result<PathBuf, MoveError> {
        let request = &mut response.link_request;

        if request.link_type == LinkType::Downlink {
            debug!(
                requested = %request.destination_app_id,
                "Downlink destination forced to {DOWNLINK_APP_ID}"
            );
            request.destination_app_id = DOWNLINK_APP_ID.to_string();
        }
        if request.destination_app_id.trim().is_empty() {
            return Err(MoveError::MissingDestination);
        }
        request.destination_app_id = request.destination_app_id.to_lowercase();

        validate_segment("destinationAppId", &request.destination_app_id)?;
        validate_segment("sourceAppId", &request.source_app_id)?;
        validate_segment("fileName", &request.file_name)?;
        let subdirectory = validate_subdirectory(&request.subdirectory)?;

        let source_root = self.xfer_root.join(&request.source_app_id);
        let mut source_dir = source_root.join(OUTBOX_DIR);
        let mut dest_dir = self
            .xfer_root
            .join(&request.destination_app_id)
            .join(INBOX_DIR);

        if !source_root.is_dir() {
            return Err(MoveError::SourceAppNotFound(source_root));
        }

        // links are resolved against these; nothing may leave them
        let canonical_root = fs::canonicalize(&self.xfer_root)
            .map_err(|_| MoveError::SourceAppNotFound(source_root.clone()))?;
        let outbox_base = canonical_root
            .join(&request.source_app_id)
            .join(OUTBOX_DIR);
        let inbox_base = canonical_root
            .join(&request.destination_app_id)
            .join(INBOX_DIR);

        let has_subdirectory = !subdirectory.as_os_str().is_empty();
        if has_subdirectory {
            source_dir.push(&subdirectory);
            dest_dir.push(&subdirectory);
        }
        ensure_contained(&source_dir, &outbox_base)?;
        if has_subdirectory && !source_dir.is_dir() {
            return Err(MoveError::SubdirectoryNotFound(source_dir));
        }

        ensure_contained(&dest_dir, &inbox_base)?;
        fs::create_dir_all(&dest_dir).map_err(|source| MoveError::CreateDestination {
            path: dest_dir.clone(),
            source,
        })?;
        ensure_contained(&dest_dir, &inbox_base)?;

        let source_file = source_dir.join(&request.file_name);
        let dest_file = dest_dir.join(&request.file_name);
        debug!(source = ?source_file, destination = ?dest_file, "Resolved transfer paths");

        if !is_regular_file(&source_file)? {
            return Err(MoveError::SourceFileNotFound(source_file));
        }

        if fs::symlink_metadata(&dest_file).is_ok() {
            if !request.overwrite {
                return Err(MoveError::DestinationExists(dest_file));
            }
            debug!(destination = ?dest_file, "Removing existing destination file");
            fs::remove_file(&dest_file).map_err(|source| MoveError::RemoveDestination {
                path: dest_file.clone(),
                source,
            })?;
        }

        probe_rename(&source_file).map_err(|source| MoveError::SourceBusy {
            path: source_file.clone(),
            source,
        })?;

        let bytes = atomic_copy(&source_file, &dest_file).map_err(|source| MoveError::Copy {
            from: source_file.clone(),
            to: dest_file.clone(),
            source,
        })?;

        response.file_size_kb = Some(bytes / 1024);
        response.link_processed_time = Some(Utc::now());
        response.set_status(StatusCode::Successful, "");

        write_receipt(&dest_dir, &response.link_request.file_name, response)?;

        Ok(source_file)
    }

    /// Remove the source after a successful transfer unless it is to be kept.
    ///
    /// A failure here is logged; the transfer stays successful.
    fn cleanup_source(&self, response: &mut LinkResponse, source_file: PathBuf) {
        let request = &mut response.link_request;

        if let Some(leave) = self.leave_source_file_override {
            if leave != request.leave_source_file {
                debug!(
                    tracking_id = %request.tracking_id,
                    requested = request.leave_source_file,
                    configured = leave,
                    "Configured leave_source_file wins"
                );
                request.leave_source_file = leave;
            }
        }

        if request.leave_source_file {
            return;
        }

        match fs::remove_file(&source_file) {
            Ok(()) => debug!(source = ?source_file, "Removed source file"),
            Err(e) => error!(
                tracking_id = %request.tracking_id,
                source = ?source_file,
                status = %StatusCode::InternalServiceError,
                error = %e,
                "Failed to remove source file after successful transfer"
            ),
        }
    }
}

/// Background consumer of the transfer queue.
pub struct MoveEngine<T: Transport> {
    settings: Arc<MoveSettings>,
    pipeline: Arc<PluginPipeline>,
    transport: Arc<T>,
    poll_interval: Duration,
}

impl<T: Transport> MoveEngine<T> {
    pub fn new(config: &LinkConfig, pipeline: Arc<PluginPipeline>, transport: Arc<T>) -> Self {
        Self {
            settings: Arc::new(MoveSettings::from(config)),
            pipeline,
            transport,
            poll_interval: config.poll_interval(),
        }
    }

    /// Consume `queue` until `shutdown` fires or every producer is gone.
    ///
    /// Cancellation is observed only while idle, so an item that has started
    /// always finishes. Items still queued at shutdown are dropped.
    pub async fn run(self, mut queue: QueueReceiver, shutdown: CancellationToken) {
        info!(
            xfer_root = ?self.settings.xfer_root,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Move engine started"
        );

        loop {
            for item in queue.drain() {
                self.process(item).await;
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Move engine received shutdown signal");
                    break;
                }
                next = queue.recv_timeout(self.poll_interval) => match next {
                    Ok(Some(item)) => {
                        self.process(item).await;
                    }
                    Ok(None) => {}
                    Err(QueueError::Closed) => {
                        info!("Transfer queue closed");
                        break;
                    }
                },
            }
        }

        let abandoned = queue.drain();
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "Dropping queued LinkRequests at shutdown");
            for item in &abandoned {
                debug!(tracking_id = %item.tracking_id(), "Dropped LinkRequest");
            }
        }

        info!("Move engine stopped");
    }

    /// Process one item end to end and return the response that was delivered.
    ///
    /// Returns `None` when a plugin vetoed the response.
    pub async fn process(&self, item: LinkResponse) -> Option<LinkResponse> {
        let tracking_id = item.tracking_id().to_string();
        debug!(tracking_id = %tracking_id, "Processing LinkRequest");

        let settings = Arc::clone(&self.settings);
        let fallback = item.clone();
        let response = match tokio::task::spawn_blocking(move || settings.execute(item)).await {
            Ok(response) => response,
            Err(e) => {
                error!(tracking_id = %tracking_id, error = %e, "Move task failed");
                let err = MoveError::Aborted(e.to_string());
                let mut response = fallback;
                response.set_status(err.status(), err.to_string());
                response
            }
        };

        let request = response.link_request.clone();
        let Some((request, mut response)) = self.pipeline.post_transform(request, response) else {
            info!(tracking_id = %tracking_id, "LinkResponse dropped by plugin");
            return None;
        };
        response.link_request = request;

        self.notify(&response).await;
        Some(response)
    }

    /// Failures go to the originating app; successes also go to the destination.
    async fn notify(&self, response: &LinkResponse) {
        let request = &response.link_request;
        deliver(self.transport.as_ref(), &request.source_app_id, response).await;
        if response.status() == StatusCode::Successful {
            deliver(self.transport.as_ref(), &request.destination_app_id, response).await;
        }
    }
}
