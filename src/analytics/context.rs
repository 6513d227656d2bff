//! Consumer-facing handle scoped to an active provider

use std::sync::Arc;

use super::builder::{BuildOptions, EventBuilder};
use super::config::AnalyticsConfig;
use super::error::AnalyticsError;
use super::event::{Metadata, UiElement};
use super::listener::Listener;
use super::queue::SharedQueue;
use super::scheduler::ProviderInner;

/// Handle obtained from [`Provider::context`](super::Provider::context)
///
/// Registration, tracking and explicit drains fail with
/// [`AnalyticsError::ProviderInactive`] once the provider has been stopped.
#[derive(Clone)]
pub struct AnalyticsContext {
    inner: Arc<ProviderInner>,
}

impl AnalyticsContext {
    pub(crate) fn new(inner: Arc<ProviderInner>) -> Self {
        Self { inner }
    }

    fn require_active(&self, operation: &'static str) -> Result<Arc<AnalyticsConfig>, AnalyticsError> {
        self.inner
            .active_config()
            .ok_or(AnalyticsError::ProviderInactive { operation })
    }

    /// Register the consumer of dispatched batches, replacing any previous one
    pub fn set_listener<L>(&self, listener: L) -> Result<(), AnalyticsError>
    where
        L: Listener + 'static,
    {
        self.require_active("set_listener")?;
        self.inner.listener.set(Arc::new(listener));
        Ok(())
    }

    pub fn has_listener(&self) -> bool {
        self.inner.listener.has_listener()
    }

    pub fn config(&self) -> Result<Arc<AnalyticsConfig>, AnalyticsError> {
        self.require_active("config")
    }

    /// Build an event with the active config and enqueue it
    pub fn track(
        &self,
        event_type: &str,
        metadata: Option<&Metadata>,
        options: &BuildOptions,
        element: Option<&Arc<dyn UiElement>>,
    ) -> Result<(), AnalyticsError> {
        let config = self.require_active("track")?;
        if event_type.is_empty() {
            return Err(AnalyticsError::EmptyEventType);
        }

        let mut builder = EventBuilder::new(event_type)
            .options(options)
            .config(&config)
            .path_resolver(self.inner.host.paths.as_ref());
        if let Some(metadata) = metadata {
            builder = builder.metadata(metadata);
        }
        if let Some(element) = element {
            builder = builder.element(element);
        }

        self.inner.queue.enqueue(builder.build());
        Ok(())
    }

    /// Drain the queue and deliver it now; returns the number of events delivered
    pub fn flush(&self) -> Result<usize, AnalyticsError> {
        self.require_active("flush")?;
        Ok(self.inner.flush_to_listener())
    }

    /// Producer handle to the underlying queue
    pub fn queue(&self) -> SharedQueue {
        self.inner.queue.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::event::Event;
    use crate::analytics::host::{ElementPathResolver, EnvMeta, Host};
    use crate::analytics::{AnalyticsConfig, Provider};
    use serde_json::json;
    use std::sync::Mutex;

    fn provider() -> Provider {
        Provider::new(SharedQueue::new(), Host::new(Arc::new(EnvMeta::default())))
    }

    fn config() -> AnalyticsConfig {
        AnalyticsConfig {
            batch_interval: 60_000,
            metadata_interval: 60_000,
            ..AnalyticsConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_enqueues_with_active_config() {
        let provider = provider();
        let mut cfg = config();
        cfg.default_metadata.insert("app".to_string(), json!("shop"));
        provider.start(cfg).unwrap();
        let ctx = provider.context().unwrap();

        let mut metadata = Metadata::new();
        metadata.insert("sku".to_string(), json!("A-1"));
        let options = BuildOptions {
            custom_timestamp: Some(99),
            ..BuildOptions::default()
        };
        ctx.track("add_to_cart", Some(&metadata), &options, None).unwrap();

        let queued = provider.queue().flush();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].event_type, "add_to_cart");
        assert_eq!(queued[0].timestamp, 99);
        assert_eq!(queued[0].metadata["sku"], "A-1");
        assert_eq!(queued[0].default_metadata["app"], "shop");
    }

    struct Tab;

    impl UiElement for Tab {
        fn tag(&self) -> &str {
            "tab"
        }
    }

    struct ScreenPaths;

    impl ElementPathResolver for ScreenPaths {
        fn resolve(&self, element: &dyn UiElement) -> String {
            format!("settings/{}", element.tag())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_uses_host_path_resolver() {
        let host = Host::new(Arc::new(EnvMeta::default())).with_path_resolver(Arc::new(ScreenPaths));
        let provider = Provider::new(SharedQueue::new(), host);
        provider.start(config()).unwrap();

        let tab: Arc<dyn UiElement> = Arc::new(Tab);
        let options = BuildOptions {
            include_element_path: true,
            ..BuildOptions::default()
        };
        provider
            .context()
            .unwrap()
            .track("tab_open", None, &options, Some(&tab))
            .unwrap();

        let queued = provider.queue().flush();
        assert_eq!(queued[0].element.element_path.as_deref(), Some("settings/tab"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_rejects_empty_type() {
        let provider = provider();
        provider.start(config()).unwrap();
        let ctx = provider.context().unwrap();

        assert_eq!(
            ctx.track("", None, &BuildOptions::default(), None),
            Err(AnalyticsError::EmptyEventType)
        );
        assert!(provider.queue().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_delivers_immediately() {
        let provider = provider();
        provider.start(config()).unwrap();
        let ctx = provider.context().unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        ctx.set_listener(move |batch: Vec<Event>| -> eyre::Result<()> {
            sink.lock().unwrap().extend(batch);
            Ok(())
        })
        .unwrap();

        ctx.track("a", None, &BuildOptions::default(), None).unwrap();
        ctx.track("b", None, &BuildOptions::default(), None).unwrap();
        assert_eq!(ctx.flush(), Ok(2));
        assert_eq!(received.lock().unwrap().len(), 2);
        assert_eq!(ctx.flush(), Ok(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_fails_fast_after_stop() {
        let provider = provider();
        provider.start(config()).unwrap();
        let ctx = provider.context().unwrap();
        provider.stop();

        assert_eq!(
            ctx.set_listener(|_batch: Vec<Event>| -> eyre::Result<()> { Ok(()) }),
            Err(AnalyticsError::ProviderInactive {
                operation: "set_listener"
            })
        );
        assert_eq!(ctx.flush(), Err(AnalyticsError::ProviderInactive { operation: "flush" }));
        assert!(ctx.config().is_err());
        assert!(!ctx.has_listener());
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_survives_restart() {
        let provider = provider();
        provider.start(config()).unwrap();
        let ctx = provider.context().unwrap();
        provider.stop();
        provider.start(config()).unwrap();

        assert!(ctx.config().is_ok());
        assert!(ctx.flush().is_ok());
    }
}
