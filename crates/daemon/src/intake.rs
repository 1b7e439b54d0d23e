//! Request intake: acknowledge, pre-process and enqueue inbound link requests.

use std::sync::Arc;

use link_protocol::{LinkRequest, LinkResponse, StatusCode};
use tracing::{debug, error, info, warn};

use crate::plugins::PluginPipeline;
use crate::queue::QueueSender;
use crate::transport::{deliver, Transport};

/// Identity of the platform deployment manager.
///
/// Transfers addressed to it are refused unless the broker is configured to
/// allow them.
pub const DEPLOYMENT_APP_ID: &str = "platform-deployment";

/// Outcome of handling one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Absent or default request; nothing was sent.
    Discarded,
    /// A plugin vetoed the request; nothing was sent.
    Vetoed,
    /// Refused with `Unauthorized`; not enqueued.
    Unauthorized,
    /// Acknowledged with `Pending` and enqueued.
    Queued,
    /// Acknowledged, but the move engine is gone; the caller was then told
    /// `InternalServiceError`.
    QueueClosed,
}

/// Front door of the broker.
///
/// Every call to [`handle`](Self::handle) performs at most one enqueue and
/// sends at most one reply, except when the queue turns out to be closed.
/// Clones share the pipeline, queue and transport.
pub struct RequestIntake<T: Transport> {
    pipeline: Arc<PluginPipeline>,
    queue: QueueSender,
    transport: Arc<T>,
    allow_deployment_destination: bool,
}

impl<T: Transport> Clone for RequestIntake<T> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            queue: self.queue.clone(),
            transport: Arc::clone(&self.transport),
            allow_deployment_destination: self.allow_deployment_destination,
        }
    }
}

impl<T: Transport> RequestIntake<T> {
    pub fn new(
        pipeline: Arc<PluginPipeline>,
        queue: QueueSender,
        transport: Arc<T>,
        allow_deployment_destination: bool,
    ) -> Self {
        Self {
            pipeline,
            queue,
            transport,
            allow_deployment_destination,
        }
    }

    /// Handle one request delivered on behalf of `caller_app_id`.
    ///
    /// The request's source is bound to the caller: an empty `sourceAppId` is
    /// filled in, and one naming another app is refused with `Unauthorized`.
    pub async fn handle(
        &self,
        request: Option<LinkRequest>,
        caller_app_id: &str,
    ) -> IntakeOutcome {
        let mut request = match request {
            Some(request) if !request.is_empty() => request,
            _ => {
                warn!(caller = caller_app_id, "Discarding empty LinkRequest");
                return IntakeOutcome::Discarded;
            }
        };

        if !request.source_app_id.is_empty()
            && !request.source_app_id.eq_ignore_ascii_case(caller_app_id)
        {
            warn!(
                tracking_id = %request.tracking_id,
                caller = caller_app_id,
                source = %request.source_app_id,
                "Refusing LinkRequest for another app's outbox"
            );
            let mut response = LinkResponse::pending(request);
            response.set_status(
                StatusCode::Unauthorized,
                format!(
                    "Caller '{}' may not send from '{}'",
                    caller_app_id, response.link_request.source_app_id
                ),
            );
            deliver(self.transport.as_ref(), caller_app_id, &response).await;
            return IntakeOutcome::Unauthorized;
        }
        request.source_app_id = caller_app_id.to_string();

        info!(
            tracking_id = %request.tracking_id,
            correlation_id = %request.correlation_id,
            source = %request.source_app_id,
            destination = %request.destination_app_id,
            file = %request.file_name,
            "Received LinkRequest"
        );

        let mut response = LinkResponse::pending(request.clone());

        let Some(request) = self.pipeline.pre_transform(request) else {
            info!(
                tracking_id = %response.tracking_id(),
                correlation_id = %response.correlation_id(),
                "LinkRequest dropped by plugin"
            );
            return IntakeOutcome::Vetoed;
        };
        response.link_request = request;

        if !self.allow_deployment_destination
            && is_deployment_app(&response.link_request.destination_app_id)
        {
            warn!(
                tracking_id = %response.tracking_id(),
                destination = %response.link_request.destination_app_id,
                "Refusing transfer to deployment service"
            );
            response.set_status(
                StatusCode::Unauthorized,
                format!(
                    "Transfers to '{}' are not permitted",
                    response.link_request.destination_app_id
                ),
            );
            deliver(self.transport.as_ref(), caller_app_id, &response).await;
            return IntakeOutcome::Unauthorized;
        }

        // Pending must reach the caller before the engine can dequeue the item.
        deliver(self.transport.as_ref(), caller_app_id, &response).await;

        // The only path with two replies: Pending, then InternalServiceError.
        if let Err(e) = self.queue.enqueue(response.clone()) {
            error!(
                tracking_id = %response.tracking_id(),
                error = %e,
                "Failed to enqueue LinkRequest"
            );
            response.set_status(StatusCode::InternalServiceError, e.to_string());
            deliver(self.transport.as_ref(), caller_app_id, &response).await;
            return IntakeOutcome::QueueClosed;
        }

        debug!(tracking_id = %response.tracking_id(), "LinkRequest queued");
        IntakeOutcome::Queued
    }

    /// Handle a request on its own task.
    pub fn spawn_handle(
        &self,
        request: Option<LinkRequest>,
        caller_app_id: String,
    ) -> tokio::task::JoinHandle<IntakeOutcome> {
        let intake = self.clone();
        tokio::spawn(async move { intake.handle(request, &caller_app_id).await })
    }
}

/// Case-insensitive match against [`DEPLOYMENT_APP_ID`].
pub fn is_deployment_app(app_id: &str) -> bool {
    app_id.trim().eq_ignore_ascii_case(DEPLOYMENT_APP_ID)
}
