//! Event envelope construction

use chrono::Utc;
use std::sync::Arc;

use super::config::AnalyticsConfig;
use super::event::{Event, EventElement, Metadata, UiElement};
use super::host::{ElementPathResolver, SelectorPathResolver};

/// Per-call options supplied by producers
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Compute a hierarchical locator for the bound element
    pub include_element_path: bool,
    pub element_id: Option<String>,
    /// Stamp the event with this time instead of now, e.g. the end of a tracked interval
    pub custom_timestamp: Option<i64>,
}

/// Builds a normalized [`Event`]
///
/// ```ignore
/// let event = EventBuilder::new("cta_click")
///     .metadata(&payload)
///     .element(&button)
///     .config(&config)
///     .build();
/// ```
pub struct EventBuilder<'a> {
    event_type: &'a str,
    metadata: Option<&'a Metadata>,
    options: Option<&'a BuildOptions>,
    element: Option<&'a Arc<dyn UiElement>>,
    config: Option<&'a AnalyticsConfig>,
    paths: Option<&'a dyn ElementPathResolver>,
}

impl<'a> EventBuilder<'a> {
    pub fn new(event_type: &'a str) -> Self {
        Self {
            event_type,
            metadata: None,
            options: None,
            element: None,
            config: None,
            paths: None,
        }
    }

    pub fn metadata(mut self, metadata: &'a Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn options(mut self, options: &'a BuildOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn element(mut self, element: &'a Arc<dyn UiElement>) -> Self {
        self.element = Some(element);
        self
    }

    pub fn config(mut self, config: &'a AnalyticsConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Resolver used for `include_element_path`; defaults to [`SelectorPathResolver`]
    pub fn path_resolver(mut self, paths: &'a dyn ElementPathResolver) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn build(self) -> Event {
        let timestamp = self
            .options
            .and_then(|o| o.custom_timestamp)
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        let element = match self.element {
            Some(handle) => self.bind_element(handle),
            None => EventElement::default(),
        };

        let event = Event {
            event_type: self.event_type.to_string(),
            metadata: self.metadata.cloned().unwrap_or_default(),
            default_metadata: self.config.map(|c| c.default_metadata.clone()).unwrap_or_default(),
            timestamp,
            element,
        };

        if self.config.is_some_and(|c| c.debug) {
            log::info!(
                "Built event: {}",
                serde_json::to_string(&event).unwrap_or_else(|_| event.event_type.clone())
            );
        }

        event
    }

    fn bind_element(&self, handle: &Arc<dyn UiElement>) -> EventElement {
        let include_path = self.options.is_some_and(|o| o.include_element_path);
        let element_path = include_path.then(|| match self.paths {
            Some(paths) => paths.resolve(handle.as_ref()),
            None => SelectorPathResolver.resolve(handle.as_ref()),
        });

        EventElement {
            element_ref: Some(Arc::downgrade(handle)),
            element_id: self.options.and_then(|o| o.element_id.clone()),
            element_path,
        }
    }
}
