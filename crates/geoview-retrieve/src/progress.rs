//! Progress sinks fed by [`RetrievalMonitor`](crate::RetrievalMonitor).
//!
//! A sink is the host's progress display (a bar, a status line, a log). Several sinks
//! can watch one job through [`CompoundProgressSink`]; each receives identical
//! events and a cancel request from any one of them cancels the job.

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::listener::CompoundListener;

pub trait ProgressSink: Send + Sync {
    /// A task of `total` units (bytes) started; `None` when the size is unknown.
    fn begin_task(&self, _name: &str, _total: Option<u64>) {}

    /// `amount` more units were processed.
    fn worked(&self, _amount: u64) {}

    /// The task entered a named sub-step.
    fn sub_task(&self, _name: &str) {}

    /// The task finished, whatever its outcome.
    fn done(&self) {}

    /// The user asked to cancel through this sink.
    fn is_canceled(&self) -> bool { false }
}

/// Fan-out over several progress sinks.
pub type CompoundProgressSink = CompoundListener<dyn ProgressSink>;

impl ProgressSink for CompoundListener<dyn ProgressSink> {
    fn begin_task(&self, name: &str, total: Option<u64>) {
        self.dispatch("begin_task", |s| s.begin_task(name, total));
    }

    fn worked(&self, amount: u64) { self.dispatch("worked", |s| s.worked(amount)); }

    fn sub_task(&self, name: &str) { self.dispatch("sub_task", |s| s.sub_task(name)); }

    fn done(&self) { self.dispatch("done", |s| s.done()); }

    fn is_canceled(&self) -> bool {
        self.snapshot()
            .iter()
            .any(|s| catch_unwind(AssertUnwindSafe(|| s.is_canceled())).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSink {
        total: Mutex<Option<u64>>,
        worked: AtomicU64,
        sub_tasks: Mutex<Vec<String>>,
        done: AtomicBool,
        cancel: AtomicBool,
    }

    impl ProgressSink for RecordingSink {
        fn begin_task(&self, _name: &str, total: Option<u64>) { *self.total.lock().unwrap() = total; }

        fn worked(&self, amount: u64) { self.worked.fetch_add(amount, Ordering::SeqCst); }

        fn sub_task(&self, name: &str) { self.sub_tasks.lock().unwrap().push(name.to_string()); }

        fn done(&self) { self.done.store(true, Ordering::SeqCst); }

        fn is_canceled(&self) -> bool { self.cancel.load(Ordering::SeqCst) }
    }

    #[test]
    fn test_every_sink_receives_identical_events() {
        let compound = CompoundProgressSink::new();
        let first = Arc::new(RecordingSink::default());
        let second = Arc::new(RecordingSink::default());
        compound.add(first.clone());
        compound.add(second.clone());

        compound.begin_task("tile", Some(100));
        compound.sub_task("Reading");
        compound.worked(40);
        compound.worked(60);
        compound.done();

        for sink in [&first, &second] {
            assert_eq!(*sink.total.lock().unwrap(), Some(100));
            assert_eq!(sink.worked.load(Ordering::SeqCst), 100);
            assert_eq!(*sink.sub_tasks.lock().unwrap(), vec!["Reading".to_string()]);
            assert!(sink.done.load(Ordering::SeqCst));
        }
    }

    #[test]
    fn test_cancel_from_any_sink_propagates() {
        let compound = CompoundProgressSink::new();
        let quiet = Arc::new(RecordingSink::default());
        let canceling = Arc::new(RecordingSink::default());
        compound.add(quiet);
        compound.add(canceling.clone());

        assert!(!compound.is_canceled());
        canceling.cancel.store(true, Ordering::SeqCst);
        assert!(compound.is_canceled());
    }
}
