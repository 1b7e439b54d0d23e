//! Plugin pipeline for link requests and responses.
//!
//! Plugins see every request once on intake and every terminal response once
//! before it is delivered. They may rewrite what they are given, or veto it by
//! returning nothing, in which case the message is dropped without a reply.
//!
//! # Failure isolation
//!
//! A plugin that returns an error or panics is skipped for that call: the value
//! it was given flows on to the next plugin unchanged.

pub mod audit;
pub mod pipeline;

pub use audit::StatusAuditPlugin;
pub use pipeline::{PluginPipeline, RegisteredPlugin};

use link_protocol::{LinkRequest, LinkResponse};
use thiserror::Error;

use crate::config::{PluginEntry, PluginPermissionName, DEFAULT_PROCESSING_ORDER};

/// Errors a plugin can report.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin could not process the message.
    #[error("plugin failed: {0}")]
    Failed(String),

    /// The plugin panicked.
    #[error("plugin panicked: {0}")]
    Panicked(String),
}

/// Result type for plugin hooks.
pub type PluginResult<T> = Result<T, PluginError>;

bitflags::bitflags! {
    /// Hooks a plugin declares interest in. Informational only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PluginPermissions: u32 {
        /// Sees inbound requests.
        const LINK_REQUEST = 1 << 0;
        /// Sees terminal responses.
        const LINK_RESPONSE = 1 << 1;
        /// Every hook.
        const ALL = Self::LINK_REQUEST.bits() | Self::LINK_RESPONSE.bits();
    }
}

impl PluginPermissions {
    /// Combine the permission names from a config entry.
    pub fn from_names(names: &[PluginPermissionName]) -> Self {
        names.iter().fold(Self::empty(), |acc, name| {
            acc | match name {
                PluginPermissionName::LinkRequest => Self::LINK_REQUEST,
                PluginPermissionName::LinkResponse => Self::LINK_RESPONSE,
                PluginPermissionName::All => Self::ALL,
            }
        })
    }
}

/// Ordering and permissions for a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginDescriptor {
    /// Lower values run first; ties keep registration order.
    pub processing_order: i32,
    /// Declared permissions.
    pub permissions: PluginPermissions,
}

impl Default for PluginDescriptor {
    fn default() -> Self {
        Self {
            processing_order: DEFAULT_PROCESSING_ORDER,
            permissions: PluginPermissions::ALL,
        }
    }
}

impl From<&PluginEntry> for PluginDescriptor {
    fn from(entry: &PluginEntry) -> Self {
        Self {
            processing_order: entry.processing_order,
            permissions: PluginPermissions::from_names(&entry.permissions),
        }
    }
}

/// Extension point run on requests at intake and on responses before delivery.
///
/// Both hooks default to passing their input through unchanged.
pub trait LinkPlugin: Send + Sync {
    /// Name used in configuration and logs.
    fn name(&self) -> &str;

    /// Transform an inbound request. `Ok(None)` vetoes it.
    fn transform_request(&self, request: LinkRequest) -> PluginResult<Option<LinkRequest>> {
        Ok(Some(request))
    }

    /// Transform a terminal response and its request. `None` on either side vetoes both.
    fn transform_response(
        &self,
        request: LinkRequest,
        response: LinkResponse,
    ) -> PluginResult<(Option<LinkRequest>, Option<LinkResponse>)> {
        Ok((Some(request), Some(response)))
    }
}

/// Plugins compiled into the daemon binary.
pub fn builtin_plugins() -> Vec<Box<dyn LinkPlugin>> {
    vec![Box::new(StatusAuditPlugin::new())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_from_names() {
        assert_eq!(
            PluginPermissions::from_names(&[PluginPermissionName::LinkRequest]),
            PluginPermissions::LINK_REQUEST
        );
        assert_eq!(
            PluginPermissions::from_names(&[
                PluginPermissionName::LinkRequest,
                PluginPermissionName::LinkResponse
            ]),
            PluginPermissions::ALL
        );
        assert!(PluginPermissions::from_names(&[]).is_empty());
    }

    #[test]
    fn test_descriptor_from_entry() {
        let entry = PluginEntry {
            name: "x".to_string(),
            processing_order: 5,
            permissions: vec![PluginPermissionName::LinkResponse],
        };
        let descriptor = PluginDescriptor::from(&entry);
        assert_eq!(descriptor.processing_order, 5);
        assert_eq!(descriptor.permissions, PluginPermissions::LINK_RESPONSE);
    }

    #[test]
    fn test_default_descriptor() {
        let descriptor = PluginDescriptor::default();
        assert_eq!(descriptor.processing_order, 100);
        assert_eq!(descriptor.permissions, PluginPermissions::ALL);
    }

    #[test]
    fn test_builtin_plugins() {
        let names: Vec<String> = builtin_plugins()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["status-audit".to_string()]);
    }
}
