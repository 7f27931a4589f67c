use std::collections::HashSet;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};

use url::Url;

use crate::data::{
    ControlState, RetrievalData, RetrievalProperties, RetrievalResult, RetrievalStatus, RetrieverOutcome,
    RetrieverStatus,
};
use crate::error::{Result, RetrievalError};
use crate::job::RetrievalJob;
use crate::listener::{CompoundListener, RetrievalListener};
use crate::monitor::JobObserver;
use crate::progress::{CompoundProgressSink, ProgressSink};
use crate::retriever::Retriever;
use crate::scheduler::{Priority, Scheduler};
use crate::sync::{lock, panic_message, read, wait_while, write};

const UNKNOWN_LENGTH: u64 = u64::MAX;

/// Opaque identifier of a component that requested a retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Caller(Arc<str>);

impl Caller {
    pub fn new(id: impl Into<Arc<str>>) -> Self { Self(id.into()) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for Caller {
    fn from(id: &str) -> Self { Self::new(id) }
}

impl From<String> for Caller {
    fn from(id: String) -> Self { Self::new(id) }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Default)]
struct RunState {
    job: Option<Arc<RetrievalJob>>,
    /// A `start` call holds the claim while it checks the cache and builds the job.
    starting: bool,
    paused: bool,
    canceled: bool,
}

impl RunState {
    fn active_job(&self) -> Option<Arc<RetrievalJob>> {
        self.job.as_ref().filter(|job| !job.is_completed()).cloned()
    }

    fn is_running(&self) -> bool { self.starting || self.active_job().is_some() }
}

struct RetrievalInner {
    url: Url,
    properties: RetrievalProperties,
    retriever: Arc<dyn Retriever>,
    scheduler: Arc<dyn Scheduler>,
    callers: RwLock<HashSet<Caller>>,
    status: AtomicU8,
    position: AtomicU64,
    length: AtomicU64,
    cached_data: RwLock<Option<RetrievalData>>,
    result: RwLock<Option<RetrievalResult>>,
    run: Mutex<RunState>,
    resumed: Condvar,
    listeners: CompoundListener<dyn RetrievalListener>,
    progress: Arc<CompoundProgressSink>,
}

/// One logical fetch of a URL, shared by every caller that asked for it.
///
/// A retrieval is a cheap handle; clones refer to the same operation. It can be
/// started, paused, resumed (by starting again) and canceled. Each start runs a new
/// [`RetrievalJob`]; the job's outcome becomes the retrieval's result.
#[derive(Clone)]
pub struct Retrieval {
    inner: Arc<RetrievalInner>,
}

impl Retrieval {
    pub fn new(
        caller: impl Into<Caller>,
        url: Url,
        retriever: Arc<dyn Retriever>,
        properties: RetrievalProperties,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let callers = HashSet::from([caller.into()]);
        Self {
            inner: Arc::new(RetrievalInner {
                url,
                properties,
                retriever,
                scheduler,
                callers: RwLock::new(callers),
                status: AtomicU8::new(RetrievalStatus::NotStarted.to_u8()),
                position: AtomicU64::new(0),
                length: AtomicU64::new(UNKNOWN_LENGTH),
                cached_data: RwLock::new(None),
                result: RwLock::new(None),
                run: Mutex::new(RunState::default()),
                resumed: Condvar::new(),
                listeners: CompoundListener::new(),
                progress: Arc::new(CompoundProgressSink::new()),
            }),
        }
    }

    pub fn url(&self) -> &Url { &self.inner.url }

    pub fn properties(&self) -> &RetrievalProperties { &self.inner.properties }

    /// Whether `self` and `other` are handles to the same retrieval.
    pub fn ptr_eq(&self, other: &Retrieval) -> bool { Arc::ptr_eq(&self.inner, &other.inner) }

    pub(crate) fn downgrade(&self) -> WeakRetrieval { WeakRetrieval(Arc::downgrade(&self.inner)) }

    pub fn callers(&self) -> HashSet<Caller> { read(&self.inner.callers).clone() }

    /// Add a caller. Returns `false` if it was already present.
    pub fn add_caller(&self, caller: impl Into<Caller>) -> bool {
        let added = write(&self.inner.callers).insert(caller.into());
        if added {
            self.inner.listeners.callers_changed(self);
        }
        added
    }

    /// Remove a caller. Returns `false` if it was not present.
    pub fn remove_caller(&self, caller: &Caller) -> bool {
        let removed = write(&self.inner.callers).remove(caller);
        if removed {
            self.inner.listeners.callers_changed(self);
        }
        removed
    }

    pub fn add_listener(&self, listener: Arc<dyn RetrievalListener>) { self.inner.listeners.add(listener); }

    pub fn remove_listener(&self, listener: &Arc<dyn RetrievalListener>) -> bool {
        self.inner.listeners.remove(listener)
    }

    /// Attach a progress sink to every job this retrieval runs from now on.
    pub fn add_progress_sink(&self, sink: Arc<dyn ProgressSink>) { self.inner.progress.add(sink); }

    /// Current pipeline stage.
    pub fn status(&self) -> RetrievalStatus { RetrievalStatus::from_u8(self.inner.status.load(Ordering::Acquire)) }

    pub fn position(&self) -> u64 { self.inner.position.load(Ordering::Acquire) }

    /// Total length in bytes, `None` while unknown.
    pub fn length(&self) -> Option<u64> {
        match self.inner.length.load(Ordering::Acquire) {
            UNKNOWN_LENGTH => None,
            length => Some(length),
        }
    }

    /// Completion in `[0, 1]`; `-1` when the length is unknown, `1` for empty content.
    pub fn percentage(&self) -> f32 {
        match self.length() {
            None => -1.0,
            Some(0) => 1.0,
            Some(length) => (self.position() as f64 / length as f64).clamp(0.0, 1.0) as f32,
        }
    }

    pub fn cached_data(&self) -> Option<RetrievalData> { read(&self.inner.cached_data).clone() }

    pub fn result(&self) -> Option<RetrievalResult> { read(&self.inner.result).clone() }

    pub fn has_result(&self) -> bool { read(&self.inner.result).is_some() }

    /// The freshest content: the result's data if it has any, otherwise cached data.
    pub fn data(&self) -> Option<RetrievalData> {
        read(&self.inner.result)
            .as_ref()
            .and_then(|result| result.data().cloned())
            .or_else(|| self.cached_data())
    }

    /// The job currently running, if any.
    pub fn current_job(&self) -> Option<Arc<RetrievalJob>> { lock(&self.inner.run).active_job() }

    pub fn is_running(&self) -> bool { lock(&self.inner.run).is_running() }

    pub fn is_paused(&self) -> bool { lock(&self.inner.run).paused }

    pub fn is_canceled(&self) -> bool { lock(&self.inner.run).canceled }

    pub fn control_state(&self) -> ControlState {
        let run = lock(&self.inner.run);
        if run.is_running() {
            ControlState::Running
        } else if run.paused {
            ControlState::Paused
        } else if run.canceled {
            ControlState::Canceled
        } else if self.has_result() {
            ControlState::Completed
        } else {
            ControlState::Idle
        }
    }

    /// Start (or resume) the retrieval. Does nothing while a job is already running.
    ///
    /// Only the call that wins the start consults the retriever's cache, so concurrent
    /// callers never fire `cached` more than once per job. Position and length restart
    /// from zero and unknown for every new job.
    pub fn start(&self) {
        let inner = &self.inner;
        {
            let mut run = lock(&inner.run);
            if run.is_running() {
                return;
            }
            run.starting = true;
        }

        let cached = if inner.properties.use_cache { self.check_cache() } else { None };
        if let Some(data) = &cached {
            self.set_cached_data(data.clone());
        }

        let job = Arc::new(
            RetrievalJob::new(Arc::clone(&inner.retriever), inner.url.clone(), inner.properties.clone())
                .with_cached_data(cached)
                .with_progress_sink(inner.progress.clone())
                .with_observer(Arc::new(RetrievalObserver(Arc::downgrade(inner)))),
        );
        let weak = Arc::downgrade(inner);
        job.on_complete(move |job, outcome| {
            if let Some(inner) = weak.upgrade() {
                Retrieval { inner }.job_completed(job, outcome);
            }
        });

        self.set_position(0);
        self.set_length(None);
        {
            let mut run = lock(&inner.run);
            run.job = Some(Arc::clone(&job));
            run.starting = false;
            run.paused = false;
            run.canceled = false;
            inner.resumed.notify_all();
        }

        tracing::debug!(url = %inner.url, retriever = inner.retriever.name(), "starting retrieval");
        job.schedule(inner.scheduler.as_ref(), Priority::Normal);
    }

    /// The retriever's cached copy; a panicking cache lookup counts as a miss.
    fn check_cache(&self) -> Option<RetrievalData> {
        let inner = &self.inner;
        catch_unwind(AssertUnwindSafe(|| inner.retriever.check_cache(&inner.url))).unwrap_or_else(|payload| {
            tracing::error!(url = %inner.url, panic = %panic_message(payload.as_ref()), "cache lookup panicked");
            None
        })
    }

    /// Ask the running job to pause. Has no effect when nothing is running.
    pub fn pause(&self) {
        let job = {
            let mut run = lock(&self.inner.run);
            let Some(job) = run.active_job() else { return };
            run.paused = true;
            job
        };
        tracing::debug!(url = %self.inner.url, "pause requested");
        job.pause();
    }

    /// Ask the running job to cancel, closing its transport. Has no effect when nothing is running.
    pub fn cancel(&self) {
        let job = {
            let mut run = lock(&self.inner.run);
            let Some(job) = run.active_job() else { return };
            run.canceled = true;
            job
        };
        tracing::debug!(url = %self.inner.url, "cancel requested");
        job.cancel();
    }

    /// Block until no job is running and the retrieval is not paused, then return the result.
    ///
    /// A paused retrieval keeps the caller blocked until [`start`](Retrieval::start) is
    /// called again. Returns [`RetrievalError::Interrupted`] if the last job was dropped
    /// by its scheduler; the interrupted result stays available through [`result`](Retrieval::result).
    pub fn wait_and_get_result(&self) -> Result<Option<RetrievalResult>> {
        loop {
            let job = {
                let run = wait_while(&self.inner.resumed, lock(&self.inner.run), |run| run.paused || run.starting);
                run.active_job()
            };
            match job {
                Some(job) => job.join()?,
                None => break,
            }
        }
        let result = self.result();
        if result.as_ref().is_some_and(|r| matches!(r.error(), Some(RetrievalError::Interrupted))) {
            return Err(RetrievalError::Interrupted);
        }
        Ok(result)
    }

    fn job_completed(&self, job: &RetrievalJob, outcome: &RetrieverOutcome) {
        {
            let mut run = lock(&self.inner.run);
            if run.job.as_deref().is_some_and(|current| std::ptr::eq(current, job)) {
                run.job = None;
            }
            *write(&self.inner.result) = outcome.result.clone();
            match outcome.status {
                RetrieverStatus::Paused => {
                    run.paused = true;
                    run.canceled = false;
                }
                RetrieverStatus::Canceled => {
                    run.paused = false;
                    run.canceled = true;
                }
                RetrieverStatus::Completed => {
                    run.paused = false;
                    run.canceled = false;
                }
            }
            self.inner.resumed.notify_all();
        }

        match outcome.status {
            RetrieverStatus::Paused => self.inner.listeners.paused(self),
            RetrieverStatus::Completed | RetrieverStatus::Canceled => self.inner.listeners.complete(self),
        }
    }

    fn set_status(&self, status: RetrievalStatus) {
        let previous = self.inner.status.swap(status.to_u8(), Ordering::AcqRel);
        if previous != status.to_u8() {
            self.inner.listeners.status_changed(self);
        }
    }

    fn set_position(&self, position: u64) {
        let previous = self.inner.position.swap(position, Ordering::AcqRel);
        if previous != position {
            self.inner.listeners.progress(self);
        }
    }

    fn set_length(&self, length: Option<u64>) {
        let length = length.unwrap_or(UNKNOWN_LENGTH);
        let previous = self.inner.length.swap(length, Ordering::AcqRel);
        if previous != length {
            self.inner.listeners.progress(self);
        }
    }

    fn set_cached_data(&self, data: RetrievalData) {
        *write(&self.inner.cached_data) = Some(data);
        self.inner.listeners.cached(self);
    }
}

impl fmt::Debug for Retrieval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrieval")
            .field("url", &self.inner.url.as_str())
            .field("status", &self.status())
            .field("state", &self.control_state())
            .field("position", &self.position())
            .field("length", &self.length())
            .finish()
    }
}

/// Non-owning handle to a [`Retrieval`].
#[derive(Clone)]
pub(crate) struct WeakRetrieval(Weak<RetrievalInner>);

impl WeakRetrieval {
    pub(crate) fn upgrade(&self) -> Option<Retrieval> { self.0.upgrade().map(|inner| Retrieval { inner }) }

    pub(crate) fn is_live(&self) -> bool { self.0.strong_count() > 0 }
}

/// Mirrors a job's monitor updates onto its retrieval.
struct RetrievalObserver(Weak<RetrievalInner>);

impl RetrievalObserver {
    fn retrieval(&self) -> Option<Retrieval> { self.0.upgrade().map(|inner| Retrieval { inner }) }
}

impl JobObserver for RetrievalObserver {
    fn stage_changed(&self, stage: RetrievalStatus) {
        if let Some(retrieval) = self.retrieval() {
            retrieval.set_status(stage);
        }
    }

    fn position_changed(&self, position: u64) {
        if let Some(retrieval) = self.retrieval() {
            retrieval.set_position(position);
        }
    }

    fn length_changed(&self, length: Option<u64>) {
        if let Some(retrieval) = self.retrieval() {
            retrieval.set_length(length);
        }
    }
}
