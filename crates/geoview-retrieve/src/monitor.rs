//! Bridge between a retriever's progress calls and its observers.
//!
//! A [`RetrievalMonitor`] is handed to [`Retriever::retrieve`](crate::Retriever::retrieve).
//! Every mutator is a one-way push to two places at once: the job's progress
//! sinks and the job's own stage (which a [`Retrieval`](crate::Retrieval) mirrors).
//! The monitor is written from one worker thread and read from any thread.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use url::Url;

use crate::data::RetrievalStatus;
use crate::progress::{CompoundProgressSink, ProgressSink};
use crate::sync::lock;

const UNKNOWN_LENGTH: u64 = u64::MAX;

/// A resource that an external cancel may force-close, unblocking pending I/O.
pub trait Closeable: Send + Sync {
    fn close(&self);
}

/// Pause and cancel requests for one job, plus the resource to close on cancel.
pub(crate) struct JobControl {
    paused: AtomicBool,
    canceled: AtomicBool,
    closeable: Mutex<Option<Box<dyn Closeable>>>,
}

impl JobControl {
    pub(crate) fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            closeable: Mutex::new(None),
        }
    }

    pub(crate) fn is_paused(&self) -> bool { self.paused.load(Ordering::Acquire) }

    pub(crate) fn is_canceled(&self) -> bool { self.canceled.load(Ordering::Acquire) }

    pub(crate) fn request_pause(&self) { self.paused.store(true, Ordering::Release); }

    pub(crate) fn request_cancel(&self) {
        let closeable = {
            let mut slot = lock(&self.closeable);
            self.canceled.store(true, Ordering::Release);
            slot.take()
        };
        if let Some(closeable) = closeable {
            closeable.close();
        }
    }

    /// Register the resource to close on cancel. Closes it at once if already canceled.
    pub(crate) fn set_closeable(&self, closeable: Box<dyn Closeable>) {
        let mut slot = lock(&self.closeable);
        if self.is_canceled() {
            drop(slot);
            closeable.close();
        } else {
            *slot = Some(closeable);
        }
    }

    pub(crate) fn clear_closeable(&self) { lock(&self.closeable).take(); }
}

/// Receives the monitor's updates on behalf of the owning retrieval.
pub(crate) trait JobObserver: Send + Sync {
    fn stage_changed(&self, stage: RetrievalStatus);
    fn position_changed(&self, position: u64);
    fn length_changed(&self, length: Option<u64>);
}

pub struct RetrievalMonitor {
    url: Url,
    stage: Arc<AtomicU8>,
    control: Arc<JobControl>,
    sink: Arc<dyn ProgressSink>,
    observer: Option<Arc<dyn JobObserver>>,
    position: AtomicU64,
    length: AtomicU64,
}

impl RetrievalMonitor {
    /// A monitor that is not attached to any job, for running a retriever directly.
    pub fn new(url: Url, sink: Arc<dyn ProgressSink>) -> Self {
        Self::for_job(
            url,
            Arc::new(AtomicU8::new(RetrievalStatus::NotStarted.to_u8())),
            Arc::new(JobControl::new()),
            sink,
            None,
        )
    }

    /// A detached monitor with no progress sinks.
    pub fn detached(url: Url) -> Self { Self::new(url, Arc::new(CompoundProgressSink::new())) }

    pub(crate) fn for_job(
        url: Url,
        stage: Arc<AtomicU8>,
        control: Arc<JobControl>,
        sink: Arc<dyn ProgressSink>,
        observer: Option<Arc<dyn JobObserver>>,
    ) -> Self {
        Self {
            url,
            stage,
            control,
            sink,
            observer,
            position: AtomicU64::new(0),
            length: AtomicU64::new(UNKNOWN_LENGTH),
        }
    }

    /// The URL being retrieved.
    pub fn url(&self) -> &Url { &self.url }

    pub fn update_status(&self, stage: RetrievalStatus) {
        self.stage.store(stage.to_u8(), Ordering::Release);
        self.sink.sub_task(&stage.to_string());
        if let Some(observer) = &self.observer {
            observer.stage_changed(stage);
        }
    }

    /// Advance the position by `delta` bytes.
    pub fn progress(&self, delta: u64) {
        let position = self.position.fetch_add(delta, Ordering::AcqRel).saturating_add(delta);
        self.sink.worked(delta);
        if let Some(observer) = &self.observer {
            observer.position_changed(position);
        }
    }

    /// Set the absolute position in bytes.
    pub fn set_position(&self, position: u64) {
        let previous = self.position.swap(position, Ordering::AcqRel);
        if position > previous {
            self.sink.worked(position - previous);
        }
        if let Some(observer) = &self.observer {
            observer.position_changed(position);
        }
    }

    /// Set the total length in bytes, `None` when unknown.
    pub fn set_length(&self, length: Option<u64>) {
        self.length.store(length.unwrap_or(UNKNOWN_LENGTH), Ordering::Release);
        self.sink.begin_task(self.url.as_str(), length);
        if let Some(observer) = &self.observer {
            observer.length_changed(length);
        }
    }

    pub fn position(&self) -> u64 { self.position.load(Ordering::Acquire) }

    pub fn length(&self) -> Option<u64> {
        match self.length.load(Ordering::Acquire) {
            UNKNOWN_LENGTH => None,
            length => Some(length),
        }
    }

    pub fn status(&self) -> RetrievalStatus { RetrievalStatus::from_u8(self.stage.load(Ordering::Acquire)) }

    /// Cancel was requested, either on the job or through a progress sink.
    pub fn is_canceled(&self) -> bool { self.control.is_canceled() || self.sink.is_canceled() }

    pub fn is_paused(&self) -> bool { self.control.is_paused() }

    /// Register the resource to close when the job is canceled.
    pub fn set_closeable(&self, closeable: Box<dyn Closeable>) { self.control.set_closeable(closeable); }

    /// Ask the retriever to pause. Used when driving a retriever without a job.
    pub fn request_pause(&self) { self.control.request_pause(); }

    /// Ask the retriever to cancel. Used when driving a retriever without a job.
    pub fn request_cancel(&self) { self.control.request_cancel(); }
}
