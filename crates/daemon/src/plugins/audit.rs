//! Built-in plugin that records every link in the log.

use link_protocol::{LinkRequest, LinkResponse};
use tracing::info;

use super::{LinkPlugin, PluginResult};

/// Logs each inbound request and each terminal status. Never mutates or vetoes.
#[derive(Debug, Default)]
pub struct StatusAuditPlugin;

impl StatusAuditPlugin {
    /// Registration name.
    pub const NAME: &'static str = "status-audit";

    pub fn new() -> Self {
        Self
    }
}

impl LinkPlugin for StatusAuditPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn transform_request(&self, request: LinkRequest) -> PluginResult<Option<LinkRequest>> {
        info!(
            tracking_id = %request.tracking_id,
            correlation_id = %request.correlation_id,
            source = %request.source_app_id,
            destination = %request.destination_app_id,
            file = %request.file_name,
            link_type = ?request.link_type,
            "link requested"
        );
        Ok(Some(request))
    }

    fn transform_response(
        &self,
        request: LinkRequest,
        response: LinkResponse,
    ) -> PluginResult<(Option<LinkRequest>, Option<LinkResponse>)> {
        info!(
            tracking_id = %response.tracking_id(),
            correlation_id = %response.correlation_id(),
            status = %response.status(),
            message = %response.response_header.message,
            file_size_kb = ?response.file_size_kb,
            "link finished"
        );
        Ok((Some(request), Some(response)))
    }
}

#[cfg(test)]
mod tests {
    use link_protocol::StatusCode;

    use super::*;

    #[test]
    fn test_audit_is_pass_through() {
        let plugin = StatusAuditPlugin::new();
        let request = LinkRequest::new("a.jpg", "appb").with_ids("t", "c");
        assert_eq!(
            plugin.transform_request(request.clone()).unwrap(),
            Some(request.clone())
        );

        let mut response = LinkResponse::pending(request.clone());
        response.set_status(StatusCode::NotFound, "missing");
        let (req, resp) = plugin
            .transform_response(request.clone(), response.clone())
            .unwrap();
        assert_eq!(req, Some(request));
        assert_eq!(resp, Some(response));
    }
}
