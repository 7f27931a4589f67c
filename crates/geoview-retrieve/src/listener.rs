//! Retrieval listeners and the fan-out dispatcher.
//!
//! Listeners are push-only: each callback receives the [`Retrieval`] and re-reads
//! whatever state it needs from it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use crate::retrieval::Retrieval;
use crate::sync::{lock, panic_message};

/// Observer of a single [`Retrieval`].
///
/// Every method has an empty default so implementors only override what they need.
/// Callbacks run on whichever thread produced the event, usually a worker.
pub trait RetrievalListener: Send + Sync {
    /// The pipeline stage changed.
    fn status_changed(&self, _retrieval: &Retrieval) {}

    /// Position or length changed.
    fn progress(&self, _retrieval: &Retrieval) {}

    /// Cached content became available.
    fn cached(&self, _retrieval: &Retrieval) {}

    /// A job finished with a completed or canceled outcome.
    fn complete(&self, _retrieval: &Retrieval) {}

    /// A job finished with a paused outcome.
    fn paused(&self, _retrieval: &Retrieval) {}

    /// A caller was added or removed.
    fn callers_changed(&self, _retrieval: &Retrieval) {}
}

/// Ordered list of listeners that broadcasts each event to all of them.
///
/// Dispatch iterates over a snapshot taken when the event starts, so a listener
/// added mid-dispatch only sees later events. A listener that panics is logged and
/// skipped; the remaining listeners still receive the event.
pub struct CompoundListener<L: ?Sized> {
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> CompoundListener<L> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<L>) { lock(&self.listeners).push(listener); }

    /// Remove a listener by identity. Returns `true` if it was registered.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = lock(&self.listeners);
        match listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize { lock(&self.listeners).len() }

    pub fn is_empty(&self) -> bool { lock(&self.listeners).is_empty() }

    /// Point-in-time copy of the registered listeners.
    pub fn snapshot(&self) -> Vec<Arc<L>> { lock(&self.listeners).clone() }

    /// Invoke `f` on every listener of the current snapshot, isolating panics.
    pub fn dispatch(&self, event: &'static str, f: impl Fn(&L)) {
        for listener in self.snapshot() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(&listener))) {
                tracing::error!(
                    event,
                    panic = %panic_message(payload.as_ref()),
                    "listener failed, continuing with remaining listeners"
                );
            }
        }
    }
}

impl<L: ?Sized> Default for CompoundListener<L> {
    fn default() -> Self { Self::new() }
}

impl RetrievalListener for CompoundListener<dyn RetrievalListener> {
    fn status_changed(&self, retrieval: &Retrieval) {
        self.dispatch("status_changed", |l| l.status_changed(retrieval));
    }

    fn progress(&self, retrieval: &Retrieval) { self.dispatch("progress", |l| l.progress(retrieval)); }

    fn cached(&self, retrieval: &Retrieval) { self.dispatch("cached", |l| l.cached(retrieval)); }

    fn complete(&self, retrieval: &Retrieval) { self.dispatch("complete", |l| l.complete(retrieval)); }

    fn paused(&self, retrieval: &Retrieval) { self.dispatch("paused", |l| l.paused(retrieval)); }

    fn callers_changed(&self, retrieval: &Retrieval) {
        self.dispatch("callers_changed", |l| l.callers_changed(retrieval));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Counter: Send + Sync {
        fn hit(&self);
    }

    struct Counting(AtomicUsize);

    impl Counter for Counting {
        fn hit(&self) { self.0.fetch_add(1, Ordering::SeqCst); }
    }

    struct Panicking;

    impl Counter for Panicking {
        fn hit(&self) { panic!("listener misbehaved"); }
    }

    #[test]
    fn test_panicking_listener_does_not_stop_dispatch() {
        let compound: CompoundListener<dyn Counter> = CompoundListener::new();
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        compound.add(Arc::new(Panicking));
        compound.add(counting.clone());

        compound.dispatch("hit", |l| l.hit());
        compound.dispatch("hit", |l| l.hit());

        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_by_identity() {
        let compound: CompoundListener<dyn Counter> = CompoundListener::new();
        let first: Arc<dyn Counter> = Arc::new(Counting(AtomicUsize::new(0)));
        let second: Arc<dyn Counter> = Arc::new(Counting(AtomicUsize::new(0)));
        compound.add(first.clone());
        compound.add(second.clone());

        assert!(compound.remove(&first));
        assert!(!compound.remove(&first));
        assert_eq!(compound.len(), 1);
        assert!(Arc::ptr_eq(&compound.snapshot()[0], &second));
    }

    #[test]
    fn test_listener_added_during_dispatch_misses_current_event() {
        struct Adder {
            target: Arc<CompoundListener<dyn Counter>>,
            late: Arc<Counting>,
        }

        impl Counter for Adder {
            fn hit(&self) { self.target.add(self.late.clone()); }
        }

        let compound: Arc<CompoundListener<dyn Counter>> = Arc::new(CompoundListener::new());
        let late = Arc::new(Counting(AtomicUsize::new(0)));
        compound.add(Arc::new(Adder {
            target: compound.clone(),
            late: late.clone(),
        }));

        compound.dispatch("hit", |l| l.hit());
        assert_eq!(late.0.load(Ordering::SeqCst), 0);

        compound.dispatch("hit", |l| l.hit());
        assert_eq!(late.0.load(Ordering::SeqCst), 1);
    }
}
