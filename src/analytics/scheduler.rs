//! Dispatch scheduler
//!
//! A [`Provider`] owns two independent periodic timers while active:
//!
//! - flush: drains the shared queue and hands the batch to the listener
//! - heartbeat: builds a synthetic `metadata_heartbeat` event and delivers it
//!   directly, bypassing the queue
//!
//! Both timers run on one Tokio task and each tick is handed to the blocking
//! pool, so a slow listener never stalls a runtime worker. Every drain and
//! delivery holds the provider's delivery lock, so ticks and explicit flushes
//! never overlap and batches reach the listener in enqueue order. Each
//! activation carries a generation number; a tick only runs while its
//! generation is the active one, so stopping or restarting invalidates both
//! timers at once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::builder::EventBuilder;
use super::config::{self, AnalyticsConfig, ConfigOverrides};
use super::context::AnalyticsContext;
use super::error::AnalyticsError;
use super::host::Host;
use super::listener::ListenerSlot;
use super::queue::SharedQueue;

/// Event type of the synthetic heartbeat
pub const HEARTBEAT_EVENT_TYPE: &str = "metadata_heartbeat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    Flush,
    Heartbeat,
}

struct Activation {
    config: Arc<AnalyticsConfig>,
    generation: u64,
    timers: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    generation: u64,
    active: Option<Activation>,
}

pub(crate) struct ProviderInner {
    pub(crate) queue: SharedQueue,
    pub(crate) listener: ListenerSlot,
    pub(crate) host: Host,
    state: Mutex<State>,
    /// Held across every drain-and-deliver
    delivery: Mutex<()>,
}

impl ProviderInner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn active_config(&self) -> Option<Arc<AnalyticsConfig>> {
        self.lock().active.as_ref().map(|a| a.config.clone())
    }

    fn config_for(&self, generation: u64) -> Option<Arc<AnalyticsConfig>> {
        self.lock()
            .active
            .as_ref()
            .filter(|a| a.generation == generation)
            .map(|a| a.config.clone())
    }

    fn lock_delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drain the queue into the listener; returns the number of events delivered.
    ///
    /// Blocks while another delivery is in progress.
    pub(crate) fn flush_to_listener(&self) -> usize {
        let _delivery = self.lock_delivery();
        let batch = self.queue.flush();
        if batch.is_empty() {
            return 0;
        }

        let size = batch.len();
        if !self.listener.deliver(batch) {
            log::debug!("Drained {} events with no listener registered", size);
            return 0;
        }
        size
    }

    fn heartbeat(&self, config: &AnalyticsConfig) -> bool {
        let _delivery = self.lock_delivery();
        if !self.listener.has_listener() || !config.send_metadata {
            return false;
        }

        if config.send_metadata_only_when_visible && !self.host.visibility.is_visible() {
            if config.is_dev() {
                log::info!("Skipping metadata heartbeat, host not visible");
            }
            return false;
        }

        let event = EventBuilder::new(HEARTBEAT_EVENT_TYPE)
            .config(config)
            .path_resolver(self.host.paths.as_ref())
            .build();

        if config.is_dev() {
            log::info!("Sending metadata heartbeat at {}", event.timestamp);
        }

        self.listener.deliver(vec![event])
    }

    /// Returns false once `generation` is no longer the active one
    fn run_tick(&self, generation: u64, tick: Tick) -> bool {
        let Some(config) = self.config_for(generation) else {
            return false;
        };

        match tick {
            Tick::Flush => {
                self.flush_to_listener();
            }
            Tick::Heartbeat => {
                self.heartbeat(&config);
            }
        }
        true
    }
}

const MIN_PERIOD: Duration = Duration::from_millis(1);

fn timer_period(period: Duration, field: &str) -> Duration {
    if period.is_zero() {
        log::warn!("{} of 0ms cannot be scheduled, using 1ms", field);
    }
    period.max(MIN_PERIOD)
}

fn spawn_timers(
    inner: &Arc<ProviderInner>,
    config: &AnalyticsConfig,
    generation: u64,
) -> Result<JoinHandle<()>, AnalyticsError> {
    let runtime = Handle::try_current().map_err(|_| AnalyticsError::NoRuntime)?;

    let flush_period = timer_period(config.batch_period(), "batch_interval");
    let heartbeat_period = timer_period(config.metadata_period(), "metadata_interval");
    let started = Instant::now();
    let provider = Arc::downgrade(inner);

    Ok(runtime.spawn(async move {
        let mut flush_timer = interval_at(started + flush_period, flush_period);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat_timer = interval_at(started + heartbeat_period, heartbeat_period);
        heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let tick = tokio::select! {
                biased;
                _ = flush_timer.tick() => Tick::Flush,
                _ = heartbeat_timer.tick() => Tick::Heartbeat,
            };

            let Some(provider) = provider.upgrade() else {
                break;
            };
            match tokio::task::spawn_blocking(move || provider.run_tick(generation, tick)).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => log::error!("{:?} tick failed: {}", tick, e),
            }
        }
    }))
}

/// Scheduler bound to the host's mount/unmount lifecycle
///
/// Dropping the provider stops it. Events still queued at that point stay in
/// the [`SharedQueue`].
pub struct Provider {
    inner: Arc<ProviderInner>,
}

impl Provider {
    pub fn new(queue: SharedQueue, host: Host) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                queue,
                listener: ListenerSlot::new(),
                host,
                state: Mutex::new(State::default()),
                delivery: Mutex::new(()),
            }),
        }
    }

    /// Resolve `overrides` against this provider's environment snapshot
    pub fn resolve(&self, overrides: Option<&ConfigOverrides>) -> AnalyticsConfig {
        config::resolve(overrides, self.inner.host.environment.as_ref())
    }

    /// Start both timers. Must be called from within a Tokio runtime.
    pub fn start(&self, config: AnalyticsConfig) -> Result<(), AnalyticsError> {
        let mut state = self.inner.lock();
        if state.active.is_some() {
            return Err(AnalyticsError::AlreadyActive);
        }

        let generation = state.generation + 1;
        let timers = spawn_timers(&self.inner, &config, generation)?;
        state.generation = generation;

        if config.is_dev() {
            log::info!(
                "Analytics provider initialized (flush every {}ms, heartbeat every {}ms)",
                config.batch_interval,
                config.metadata_interval
            );
        }

        state.active = Some(Activation {
            config: Arc::new(config),
            generation,
            timers,
        });
        Ok(())
    }

    /// Cancel both timers and unregister the listener.
    ///
    /// Idempotent; a tick already running completes. Queued events are kept.
    pub fn stop(&self) {
        let activation = self.inner.lock().active.take();
        if let Some(activation) = activation {
            activation.timers.abort();
            self.inner.listener.clear();
            if activation.config.is_dev() {
                log::info!("Analytics provider stopped, {} events left queued", self.inner.queue.len());
            }
        }
    }

    /// Swap in a new config while active.
    ///
    /// If any scheduling field changed both timers are restarted with the new
    /// periods and `true` is returned; otherwise the snapshot is replaced in place.
    pub fn reconfigure(&self, config: AnalyticsConfig) -> Result<bool, AnalyticsError> {
        let mut state = self.inner.lock();
        let restart = match &state.active {
            Some(active) => active.config.schedule_differs(&config),
            None => {
                return Err(AnalyticsError::ProviderInactive {
                    operation: "reconfigure",
                });
            }
        };

        if !restart {
            if let Some(active) = state.active.as_mut() {
                active.config = Arc::new(config);
            }
            return Ok(false);
        }

        let generation = state.generation + 1;
        let timers = spawn_timers(&self.inner, &config, generation)?;
        state.generation = generation;

        if config.is_dev() {
            log::info!(
                "Analytics provider restarted (flush every {}ms, heartbeat every {}ms)",
                config.batch_interval,
                config.metadata_interval
            );
        }

        let previous = state.active.replace(Activation {
            config: Arc::new(config),
            generation,
            timers,
        });
        if let Some(previous) = previous {
            previous.timers.abort();
        }
        Ok(true)
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active.is_some()
    }

    /// Config of the current activation
    pub fn config(&self) -> Option<Arc<AnalyticsConfig>> {
        self.inner.active_config()
    }

    /// Consumer-facing handle; only available while active
    pub fn context(&self) -> Result<AnalyticsContext, AnalyticsError> {
        if !self.is_active() {
            return Err(AnalyticsError::ProviderInactive { operation: "context" });
        }
        Ok(AnalyticsContext::new(self.inner.clone()))
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.inner.queue
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::event::Event;
    use crate::analytics::host::{EnvMeta, VisibilityFlag};
    use tokio::time::sleep;

    type Batches = Arc<Mutex<Vec<Vec<Event>>>>;

    fn host() -> Host {
        Host::new(Arc::new(EnvMeta {
            page_title: "Test".to_string(),
            ..EnvMeta::default()
        }))
    }

    fn recorder(batches: &Batches) -> impl Fn(Vec<Event>) -> eyre::Result<()> + Send + Sync + 'static {
        let batches = batches.clone();
        move |batch| {
            batches.lock().unwrap().push(batch);
            Ok(())
        }
    }

    fn config(batch_interval: u64, metadata_interval: u64) -> AnalyticsConfig {
        AnalyticsConfig {
            batch_interval,
            metadata_interval,
            ..AnalyticsConfig::default()
        }
    }

    fn event(event_type: &str) -> Event {
        EventBuilder::new(event_type).build()
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let provider = Provider::new(SharedQueue::new(), host());
        assert_eq!(provider.start(config(1000, 5000)), Err(AnalyticsError::NoRuntime));
        assert!(!provider.is_active());
    }

    #[test]
    fn test_context_requires_active_provider() {
        let provider = Provider::new(SharedQueue::new(), host());
        assert_eq!(
            provider.context().err(),
            Some(AnalyticsError::ProviderInactive { operation: "context" })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_fails() {
        let provider = Provider::new(SharedQueue::new(), host());
        provider.start(config(1000, 5000)).unwrap();
        assert_eq!(provider.start(config(1000, 5000)), Err(AnalyticsError::AlreadyActive));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let provider = Provider::new(SharedQueue::new(), host());
        provider.start(config(1000, 5000)).unwrap();
        provider.stop();
        provider.stop();
        assert!(!provider.is_active());
        assert!(provider.config().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_tick_delivers_batch() {
        let batches: Batches = Arc::default();
        let provider = Provider::new(SharedQueue::new(), host());
        provider.start(config(1000, 60_000)).unwrap();
        provider.context().unwrap().set_listener(recorder(&batches)).unwrap();

        provider.queue().enqueue(event("a"));
        provider.queue().enqueue(event("b"));
        sleep(Duration::from_millis(1050)).await;

        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(provider.queue().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_drain_does_not_call_listener() {
        let batches: Batches = Arc::default();
        let mut cfg = config(1000, 60_000);
        cfg.send_metadata = false;
        let provider = Provider::new(SharedQueue::new(), host());
        provider.start(cfg).unwrap();
        provider.context().unwrap().set_listener(recorder(&batches)).unwrap();

        sleep(Duration::from_millis(5050)).await;
        assert!(batches.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_requires_listener() {
        let batches: Batches = Arc::default();
        let provider = Provider::new(SharedQueue::new(), host());
        provider.start(config(60_000, 1000)).unwrap();

        // three heartbeat ticks pass with nobody listening
        sleep(Duration::from_millis(3050)).await;
        provider.context().unwrap().set_listener(recorder(&batches)).unwrap();
        assert!(batches.lock().unwrap().is_empty());

        sleep(Duration::from_millis(1000)).await;
        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].event_type, HEARTBEAT_EVENT_TYPE);
        assert!(provider.queue().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unregisters_listener() {
        let batches: Batches = Arc::default();
        let provider = Provider::new(SharedQueue::new(), host());
        provider.start(config(1000, 60_000)).unwrap();
        provider.context().unwrap().set_listener(recorder(&batches)).unwrap();

        provider.stop();
        provider.start(config(1000, 60_000)).unwrap();
        let ctx = provider.context().unwrap();
        assert!(!ctx.has_listener());

        provider.queue().enqueue(event("a"));
        sleep(Duration::from_millis(1050)).await;
        assert!(batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_zero_period_is_clamped() {
        assert_eq!(timer_period(Duration::ZERO, "batch_interval"), Duration::from_millis(1));
        assert_eq!(
            timer_period(config(250, 5000).batch_period(), "batch_interval"),
            Duration::from_millis(250)
        );
        assert_eq!(
            timer_period(config(250, 5000).metadata_period(), "metadata_interval"),
            Duration::from_secs(5)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_slow_listener_does_not_stall_runtime() {
        let provider = Provider::new(SharedQueue::new(), host());
        let mut cfg = config(50, 60_000);
        cfg.send_metadata = false;
        provider.start(cfg).unwrap();
        provider
            .context()
            .unwrap()
            .set_listener(|_batch: Vec<Event>| -> eyre::Result<()> {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .unwrap();

        provider.queue().enqueue(event("slow"));
        sleep(Duration::from_millis(100)).await;

        // the listener is busy on the blocking pool; async timers keep running
        let started = std::time::Instant::now();
        sleep(Duration::from_millis(20)).await;
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_disabled() {
        let batches: Batches = Arc::default();
        let mut cfg = config(1000, 500);
        cfg.send_metadata = false;
        let provider = Provider::new(SharedQueue::new(), host());
        provider.start(cfg).unwrap();
        provider.context().unwrap().set_listener(recorder(&batches)).unwrap();

        sleep(Duration::from_millis(10_050)).await;
        assert!(batches.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_gated_on_visibility() {
        let batches: Batches = Arc::default();
        let visibility = VisibilityFlag::new(false);
        let mut cfg = config(60_000, 1000);
        cfg.send_metadata_only_when_visible = true;
        let provider = Provider::new(SharedQueue::new(), host().with_visibility(Arc::new(visibility.clone())));
        provider.start(cfg).unwrap();
        provider.context().unwrap().set_listener(recorder(&batches)).unwrap();

        sleep(Duration::from_millis(3050)).await;
        assert!(batches.lock().unwrap().is_empty());

        visibility.set_visible(true);
        sleep(Duration::from_millis(1000)).await;
        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].event_type, HEARTBEAT_EVENT_TYPE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_carries_default_metadata() {
        let batches: Batches = Arc::default();
        let provider = Provider::new(SharedQueue::new(), host());
        let cfg = provider.resolve(Some(&ConfigOverrides {
            batch_interval: Some(60_000),
            metadata_interval: Some(2000),
            ..ConfigOverrides::default()
        }));
        provider.start(cfg).unwrap();
        provider.context().unwrap().set_listener(recorder(&batches)).unwrap();

        sleep(Duration::from_millis(2050)).await;
        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].default_metadata["page_title"], "Test");
        assert!(batches[0][0].metadata.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_without_schedule_change_keeps_timers() {
        let provider = Provider::new(SharedQueue::new(), host());
        let cfg = config(1000, 5000);
        provider.start(cfg.clone()).unwrap();

        let mut debug = cfg.clone();
        debug.debug = true;
        assert_eq!(provider.reconfigure(debug), Ok(false));
        assert!(provider.config().unwrap().debug);

        assert_eq!(provider.reconfigure(config(250, 5000)), Ok(true));
        assert_eq!(provider.config().unwrap().batch_interval, 250);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_inactive_fails() {
        let provider = Provider::new(SharedQueue::new(), host());
        assert_eq!(
            provider.reconfigure(config(1000, 5000)),
            Err(AnalyticsError::ProviderInactive {
                operation: "reconfigure"
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_listener_does_not_stop_ticks() {
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();
        let provider = Provider::new(SharedQueue::new(), host());
        provider.start(config(1000, 60_000)).unwrap();
        provider
            .context()
            .unwrap()
            .set_listener(move |_batch: Vec<Event>| -> eyre::Result<()> {
                *counter.lock().unwrap() += 1;
                eyre::bail!("backend unavailable")
            })
            .unwrap();

        provider.queue().enqueue(event("a"));
        sleep(Duration::from_millis(1050)).await;
        provider.queue().enqueue(event("b"));
        sleep(Duration::from_millis(1000)).await;

        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_timers() {
        let queue = SharedQueue::new();
        let batches: Batches = Arc::default();
        {
            let provider = Provider::new(queue.clone(), host());
            provider.start(config(1000, 60_000)).unwrap();
            provider.context().unwrap().set_listener(recorder(&batches)).unwrap();
        }

        queue.enqueue(event("late"));
        sleep(Duration::from_millis(3000)).await;
        assert!(batches.lock().unwrap().is_empty());
        assert_eq!(queue.len(), 1);
    }
}
