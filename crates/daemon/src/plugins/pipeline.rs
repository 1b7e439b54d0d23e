//! Ordered plugin chain with fold, veto and fail-open semantics.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use link_protocol::{LinkRequest, LinkResponse};
use tracing::{debug, error, info, warn};

use super::{LinkPlugin, PluginDescriptor, PluginError, PluginResult};
use crate::config::PluginEntry;

/// A plugin together with its descriptor.
pub struct RegisteredPlugin {
    plugin: Box<dyn LinkPlugin>,
    descriptor: PluginDescriptor,
}

impl RegisteredPlugin {
    /// Name the plugin registered under.
    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    /// Ordering and permissions.
    pub fn descriptor(&self) -> PluginDescriptor {
        self.descriptor
    }
}

/// Ordered chain of plugins.
///
/// Plugins run by ascending `processing_order`; plugins with equal order run
/// in registration order. The order is fixed when a plugin is registered.
#[derive(Default)]
pub struct PluginPipeline {
    plugins: Vec<RegisteredPlugin>,
}

impl PluginPipeline {
    /// Create an empty pipeline. Every message passes through unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pipeline from config entries, picking plugins from `available` by name.
    ///
    /// Entries naming a plugin that is not available are logged and skipped.
    /// Available plugins without an entry are not registered.
    pub fn from_entries(entries: &[PluginEntry], available: Vec<Box<dyn LinkPlugin>>) -> Self {
        let mut available: Vec<Option<Box<dyn LinkPlugin>>> =
            available.into_iter().map(Some).collect();
        let mut pipeline = Self::new();

        for entry in entries {
            let found = available
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|p| p.name() == entry.name))
                .and_then(Option::take);

            match found {
                Some(plugin) => pipeline.register(plugin, PluginDescriptor::from(entry)),
                None => warn!(plugin = %entry.name, "Configured plugin is not available, skipping"),
            }
        }

        pipeline
    }

    /// Register a plugin.
    pub fn register(&mut self, plugin: Box<dyn LinkPlugin>, descriptor: PluginDescriptor) {
        info!(
            plugin = plugin.name(),
            processing_order = descriptor.processing_order,
            permissions = ?descriptor.permissions,
            "Registered plugin"
        );
        self.plugins.push(RegisteredPlugin { plugin, descriptor });
        // stable sort keeps registration order for equal processing orders
        self.plugins
            .sort_by_key(|registered| registered.descriptor.processing_order);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_plugin(
        mut self,
        plugin: Box<dyn LinkPlugin>,
        descriptor: PluginDescriptor,
    ) -> Self {
        self.register(plugin, descriptor);
        self
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugins are registered.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugin names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(RegisteredPlugin::name).collect()
    }

    /// Run every plugin's request hook in order.
    ///
    /// Returns `None` as soon as a plugin vetoes; later plugins do not run.
    pub fn pre_transform(&self, request: LinkRequest) -> Option<LinkRequest> {
        let mut current = request;

        for registered in &self.plugins {
            let name = registered.name();
            let input = current.clone();
            debug!(plugin = name, tracking_id = %current.tracking_id, "transform_request: START");

            match invoke(name, "transform_request", || {
                registered.plugin.transform_request(input)
            }) {
                Some(Some(next)) => current = next,
                Some(None) => {
                    info!(
                        plugin = name,
                        tracking_id = %current.tracking_id,
                        correlation_id = %current.correlation_id,
                        "Plugin vetoed LinkRequest"
                    );
                    return None;
                }
                None => {}
            }

            debug!(plugin = name, tracking_id = %current.tracking_id, "transform_request: END");
        }

        Some(current)
    }

    /// Run every plugin's response hook in order.
    ///
    /// The request and response travel together: a veto on either drops both.
    pub fn post_transform(
        &self,
        request: LinkRequest,
        response: LinkResponse,
    ) -> Option<(LinkRequest, LinkResponse)> {
        let mut current = (request, response);

        for registered in &self.plugins {
            let name = registered.name();
            let (request_in, response_in) = current.clone();
            debug!(
                plugin = name,
                tracking_id = %current.1.tracking_id(),
                "transform_response: START"
            );

            match invoke(name, "transform_response", || {
                registered.plugin.transform_response(request_in, response_in)
            }) {
                Some((Some(request), Some(response))) => current = (request, response),
                Some(_) => {
                    info!(
                        plugin = name,
                        tracking_id = %current.1.tracking_id(),
                        correlation_id = %current.1.correlation_id(),
                        "Plugin vetoed LinkResponse"
                    );
                    return None;
                }
                None => {}
            }

            debug!(
                plugin = name,
                tracking_id = %current.1.tracking_id(),
                "transform_response: END"
            );
        }

        Some(current)
    }
}

/// Call a plugin hook, turning errors and panics into `None`.
fn invoke<T>(plugin: &str, hook: &str, call: impl FnOnce() -> PluginResult<T>) -> Option<T> {
    let result = panic::catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(PluginError::Panicked(panic_message(payload.as_ref()))));

    match result {
        Ok(value) => Some(value),
        Err(e) => {
            error!(plugin, hook, error = %e, "Plugin hook failed, passing input through");
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use link_protocol::StatusCode;

    use super::*;
    use crate::config::PluginPermissionName;
    use crate::plugins::PluginPermissions;

    /// Appends its tag to the subdirectory so the call order is observable.
    struct Tagger {
        name: String,
        tag: &'static str,
    }

    impl Tagger {
        fn boxed(name: &str, tag: &'static str) -> Box<dyn LinkPlugin> {
            Box::new(Self {
                name: name.to_string(),
                tag,
            })
        }
    }

    impl LinkPlugin for Tagger {
        fn name(&self) -> &str {
            &self.name
        }

        fn transform_request(&self, mut request: LinkRequest) -> PluginResult<Option<LinkRequest>> {
            request.subdirectory.push_str(self.tag);
            Ok(Some(request))
        }

        fn transform_response(
            &self,
            request: LinkRequest,
            mut response: LinkResponse,
        ) -> PluginResult<(Option<LinkRequest>, Option<LinkResponse>)> {
            response.response_header.message.push_str(self.tag);
            Ok((Some(request), Some(response)))
        }
    }

    struct Veto {
        calls: Arc<AtomicUsize>,
        veto_request_only: bool,
    }

    impl LinkPlugin for Veto {
        fn name(&self) -> &str {
            "veto"
        }

        fn transform_request(&self, _request: LinkRequest) -> PluginResult<Option<LinkRequest>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        fn transform_response(
            &self,
            request: LinkRequest,
            response: LinkResponse,
        ) -> PluginResult<(Option<LinkRequest>, Option<LinkResponse>)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.veto_request_only {
                Ok((None, Some(response)))
            } else {
                Ok((Some(request), None))
            }
        }
    }

    struct Failing {
        panic: bool,
    }

    impl LinkPlugin for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn transform_request(&self, mut request: LinkRequest) -> PluginResult<Option<LinkRequest>> {
            // mutate the input before failing; the mutation must not leak
            request.file_name = "corrupted".to_string();
            if self.panic {
                panic!("request hook exploded");
            }
            Err(PluginError::Failed("request hook failed".to_string()))
        }

        fn transform_response(
            &self,
            _request: LinkRequest,
            mut response: LinkResponse,
        ) -> PluginResult<(Option<LinkRequest>, Option<LinkResponse>)> {
            response.set_status(StatusCode::Rejected, "corrupted");
            if self.panic {
                panic!("response hook exploded");
            }
            Err(PluginError::Failed("response hook failed".to_string()))
        }
    }

    /// Records every request it sees.
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl LinkPlugin for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn transform_request(&self, request: LinkRequest) -> PluginResult<Option<LinkRequest>> {
            self.seen.lock().unwrap().push(request.file_name.clone());
            Ok(Some(request))
        }
    }

    fn descriptor(order: i32) -> PluginDescriptor {
        PluginDescriptor {
            processing_order: order,
            permissions: PluginPermissions::ALL,
        }
    }

    fn request() -> LinkRequest {
        LinkRequest::new("a.jpg", "appb").with_ids("t-1", "c-1")
    }

    #[test]
    fn test_empty_pipeline_passes_through() {
        let pipeline = PluginPipeline::new();
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.pre_transform(request()), Some(request()));

        let response = LinkResponse::pending(request());
        let (req, resp) = pipeline
            .post_transform(request(), response.clone())
            .unwrap();
        assert_eq!(req, request());
        assert_eq!(resp, response);
    }

    #[test]
    fn test_order_by_processing_order_then_registration() {
        let pipeline = PluginPipeline::new()
            .with_plugin(Tagger::boxed("late", "C"), descriptor(200))
            .with_plugin(Tagger::boxed("first-tie", "A"), descriptor(100))
            .with_plugin(Tagger::boxed("second-tie", "B"), descriptor(100))
            .with_plugin(Tagger::boxed("early", "0"), descriptor(-5));

        assert_eq!(
            pipeline.names(),
            vec!["early", "first-tie", "second-tie", "late"]
        );

        let out = pipeline.pre_transform(request()).unwrap();
        assert_eq!(out.subdirectory, "0ABC");

        let (_, resp) = pipeline
            .post_transform(request(), LinkResponse::pending(request()))
            .unwrap();
        assert_eq!(resp.response_header.message, "0ABC");
    }

    #[test]
    fn test_request_veto_stops_fold() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PluginPipeline::new()
            .with_plugin(
                Box::new(Veto {
                    calls: Arc::clone(&calls),
                    veto_request_only: false,
                }),
                descriptor(1),
            )
            .with_plugin(
                Box::new(Recorder {
                    seen: Arc::clone(&seen),
                }),
                descriptor(2),
            );

        assert!(pipeline.pre_transform(request()).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_response_veto_on_either_side_drops_both() {
        for veto_request_only in [true, false] {
            let calls = Arc::new(AtomicUsize::new(0));
            let pipeline = PluginPipeline::new()
                .with_plugin(
                    Box::new(Veto {
                        calls: Arc::clone(&calls),
                        veto_request_only,
                    }),
                    descriptor(1),
                )
                .with_plugin(Tagger::boxed("after", "X"), descriptor(2));

            let out = pipeline.post_transform(request(), LinkResponse::pending(request()));
            assert!(out.is_none());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_failing_plugin_is_fail_open() {
        for panic in [false, true] {
            let pipeline = PluginPipeline::new()
                .with_plugin(Tagger::boxed("before", "A"), descriptor(1))
                .with_plugin(Box::new(Failing { panic }), descriptor(2))
                .with_plugin(Tagger::boxed("after", "B"), descriptor(3));

            let out = pipeline.pre_transform(request()).unwrap();
            assert_eq!(out.file_name, "a.jpg");
            assert_eq!(out.subdirectory, "AB");

            let (_, resp) = pipeline
                .post_transform(request(), LinkResponse::pending(request()))
                .unwrap();
            assert_eq!(resp.status(), StatusCode::Pending);
            assert_eq!(resp.response_header.message, "AB");
        }
    }

    #[test]
    fn test_from_entries_uses_config_order_and_skips_unknown() {
        let entries = vec![
            PluginEntry {
                name: "second".to_string(),
                processing_order: 20,
                permissions: vec![PluginPermissionName::LinkRequest],
            },
            PluginEntry {
                name: "missing".to_string(),
                ..Default::default()
            },
            PluginEntry {
                name: "first".to_string(),
                processing_order: 10,
                permissions: vec![PluginPermissionName::All],
            },
        ];
        let available = vec![
            Tagger::boxed("first", "1"),
            Tagger::boxed("second", "2"),
            Tagger::boxed("unlisted", "U"),
        ];

        let pipeline = PluginPipeline::from_entries(&entries, available);
        assert_eq!(pipeline.names(), vec!["first", "second"]);
        assert_eq!(pipeline.pre_transform(request()).unwrap().subdirectory, "12");
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
