//! Single-slot consumer registration

use eyre::Result;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::event::Event;

/// Receives dispatched batches
pub trait Listener: Send + Sync {
    fn on_batch(&self, batch: Vec<Event>) -> Result<()>;
}

impl<F> Listener for F
where
    F: Fn(Vec<Event>) -> Result<()> + Send + Sync,
{
    fn on_batch(&self, batch: Vec<Event>) -> Result<()> {
        self(batch)
    }
}

/// Holds at most one listener; setting a new one replaces the old
#[derive(Clone, Default)]
pub struct ListenerSlot {
    inner: Arc<Mutex<Option<Arc<dyn Listener>>>>,
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, listener: Arc<dyn Listener>) {
        *self.lock() = Some(listener);
    }

    /// Empty the slot
    pub fn clear(&self) {
        *self.lock() = None;
    }

    pub fn has_listener(&self) -> bool {
        self.lock().is_some()
    }

    pub fn current(&self) -> Option<Arc<dyn Listener>> {
        self.lock().clone()
    }

    /// Hand `batch` to the registered listener.
    ///
    /// Returns false when the slot is empty. Errors and panics raised by the
    /// listener are logged and swallowed.
    pub fn deliver(&self, batch: Vec<Event>) -> bool {
        let Some(listener) = self.current() else {
            return false;
        };

        let size = batch.len();
        match catch_unwind(AssertUnwindSafe(|| listener.on_batch(batch))) {
            Ok(Ok(())) => log::debug!("Delivered batch of {} events", size),
            Ok(Err(e)) => log::error!("Listener failed on batch of {} events: {:#}", size, e),
            Err(_) => log::error!("Listener panicked on batch of {} events", size),
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<dyn Listener>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ListenerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSlot")
            .field("has_listener", &self.has_listener())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::builder::EventBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: Arc<AtomicUsize>) -> Arc<dyn Listener> {
        Arc::new(move |batch: Vec<Event>| -> Result<()> {
            counter.fetch_add(batch.len(), Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_empty_slot_is_a_noop() {
        let slot = ListenerSlot::new();
        assert!(!slot.has_listener());
        assert!(!slot.deliver(vec![EventBuilder::new("click").build()]));
    }

    #[test]
    fn test_last_writer_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let slot = ListenerSlot::new();

        slot.set(counting(first.clone()));
        slot.set(counting(second.clone()));
        assert!(slot.deliver(vec![EventBuilder::new("click").build()]));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_empties_slot() {
        let counter = Arc::new(AtomicUsize::new(0));
        let slot = ListenerSlot::new();
        slot.set(counting(counter.clone()));
        slot.clear();

        assert!(!slot.has_listener());
        assert!(!slot.deliver(vec![EventBuilder::new("click").build()]));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failing_listener_is_isolated() {
        let slot = ListenerSlot::new();
        slot.set(Arc::new(|_batch: Vec<Event>| -> Result<()> { eyre::bail!("transport down") }));
        assert!(slot.deliver(vec![EventBuilder::new("click").build()]));

        slot.set(Arc::new(|_batch: Vec<Event>| -> Result<()> { panic!("listener bug") }));
        assert!(slot.deliver(vec![EventBuilder::new("click").build()]));

        // slot still usable afterwards
        let counter = Arc::new(AtomicUsize::new(0));
        slot.set(counting(counter.clone()));
        slot.deliver(vec![EventBuilder::new("click").build()]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
