use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use url::Url;

use crate::data::{
    RetrievalData, RetrievalProperties, RetrievalResult, RetrievalStatus, RetrieverOutcome, RetrieverStatus,
};
use crate::error::{Result, RetrievalError};
use crate::monitor::{JobControl, JobObserver, RetrievalMonitor};
use crate::progress::{CompoundProgressSink, ProgressSink};
use crate::retriever::Retriever;
use crate::scheduler::{Priority, Scheduler};
use crate::sync::{lock, panic_message, wait_while};

type CompletionHook = Box<dyn FnOnce(&RetrievalJob, &RetrieverOutcome) + Send>;

#[derive(Default)]
struct Hooks {
    pending: Vec<CompletionHook>,
    finished: bool,
}

#[derive(Default)]
struct JobState {
    outcome: Option<RetrieverOutcome>,
    done: bool,
    interrupted: bool,
}

/// One scheduled call to [`Retriever::retrieve`].
///
/// `source_url` is the URL that was asked for; `result_url` is the URL actually
/// fetched, which differs when the content is served from a cache.
/// Completion hooks run on the worker before waiters are released, so anything a
/// hook records is visible once [`join`](RetrievalJob::join) returns.
pub struct RetrievalJob {
    source_url: Url,
    result_url: Url,
    from_cache: bool,
    retriever: Arc<dyn Retriever>,
    properties: RetrievalProperties,
    cached: Option<RetrievalData>,
    sink: Arc<dyn ProgressSink>,
    observer: Option<Arc<dyn JobObserver>>,
    stage: Arc<AtomicU8>,
    control: Arc<JobControl>,
    scheduled: AtomicBool,
    hooks: Mutex<Hooks>,
    state: Mutex<JobState>,
    done: Condvar,
}

impl RetrievalJob {
    pub fn new(retriever: Arc<dyn Retriever>, url: Url, properties: RetrievalProperties) -> Self {
        Self {
            source_url: url.clone(),
            result_url: url,
            from_cache: false,
            retriever,
            properties,
            cached: None,
            sink: Arc::new(CompoundProgressSink::new()),
            observer: None,
            stage: Arc::new(AtomicU8::new(RetrievalStatus::NotStarted.to_u8())),
            control: Arc::new(JobControl::new()),
            scheduled: AtomicBool::new(false),
            hooks: Mutex::new(Hooks::default()),
            state: Mutex::new(JobState::default()),
            done: Condvar::new(),
        }
    }

    /// Mark this job as serving `source_url` from the cached location it was built with.
    #[must_use]
    pub fn from_cache(mut self, source_url: Url) -> Self {
        self.source_url = source_url;
        self.from_cache = true;
        self
    }

    /// Content already available from the cache, handed to the retriever.
    #[must_use]
    pub fn with_cached_data(mut self, cached: Option<RetrievalData>) -> Self {
        self.cached = cached;
        self
    }

    #[must_use]
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub(crate) fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn source_url(&self) -> &Url { &self.source_url }

    pub fn result_url(&self) -> &Url { &self.result_url }

    pub fn is_from_cache(&self) -> bool { self.from_cache }

    pub fn properties(&self) -> &RetrievalProperties { &self.properties }

    pub fn status(&self) -> RetrievalStatus { RetrievalStatus::from_u8(self.stage.load(Ordering::Acquire)) }

    pub fn is_completed(&self) -> bool { lock(&self.state).done }

    /// The outcome once the job has completed.
    pub fn outcome(&self) -> Option<RetrieverOutcome> {
        let state = lock(&self.state);
        if state.done { state.outcome.clone() } else { None }
    }

    /// The result once the job has completed; `None` before that.
    pub fn retrieval_result(&self) -> Option<RetrievalResult> { self.outcome().and_then(|o| o.result) }

    /// Block until the job has completed.
    ///
    /// Returns [`RetrievalError::Interrupted`] if the scheduler dropped the job unrun.
    pub fn join(&self) -> Result<()> {
        let state = wait_while(&self.done, lock(&self.state), |state| !state.done);
        if state.interrupted { Err(RetrievalError::Interrupted) } else { Ok(()) }
    }

    /// Block until the job has completed, then return its result.
    pub fn wait_and_get_retrieval_result(&self) -> Result<Option<RetrievalResult>> {
        self.join()?;
        Ok(self.retrieval_result())
    }

    /// Request cancellation and close the retriever's registered resource.
    pub fn cancel(&self) { self.control.request_cancel(); }

    /// Request the retriever to pause.
    pub fn pause(&self) { self.control.request_pause(); }

    pub fn is_cancel_requested(&self) -> bool { self.control.is_canceled() }

    pub fn is_pause_requested(&self) -> bool { self.control.is_paused() }

    /// Run `hook` when the job completes, or right away if it already has.
    pub fn on_complete(&self, hook: impl FnOnce(&RetrievalJob, &RetrieverOutcome) + Send + 'static) {
        {
            let mut hooks = lock(&self.hooks);
            if !hooks.finished {
                hooks.pending.push(Box::new(hook));
                return;
            }
        }
        let outcome = lock(&self.state).outcome.clone();
        if let Some(outcome) = outcome {
            hook(self, &outcome);
        }
    }

    /// Hand the job to `scheduler`. Only the first call has an effect.
    pub fn schedule(self: &Arc<Self>, scheduler: &dyn Scheduler, priority: Priority) {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            tracing::warn!(url = %self.result_url, "retrieval job already scheduled");
            return;
        }
        let run = ScheduledRun(Some(Arc::clone(self)));
        scheduler.schedule(priority, Box::new(move || run.run()));
    }

    fn set_stage(&self, stage: RetrievalStatus) {
        self.stage.store(stage.to_u8(), Ordering::Release);
        if let Some(observer) = &self.observer {
            observer.stage_changed(stage);
        }
    }

    fn run(&self) {
        tracing::debug!(url = %self.result_url, retriever = self.retriever.name(), "retrieval job started");

        let outcome = if self.control.is_canceled() {
            RetrieverOutcome::canceled(None)
        } else {
            self.set_stage(RetrievalStatus::Started);
            let monitor = RetrievalMonitor::for_job(
                self.result_url.clone(),
                Arc::clone(&self.stage),
                Arc::clone(&self.control),
                Arc::clone(&self.sink),
                self.observer.clone(),
            );
            let attempt = catch_unwind(AssertUnwindSafe(|| {
                self.retriever
                    .retrieve(&self.result_url, &monitor, &self.properties, self.cached.as_ref())
            }));
            match attempt {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => RetrieverOutcome::completed(RetrievalResult::failure(e)),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(url = %self.result_url, panic = %message, "retriever panicked");
                    RetrieverOutcome::completed(RetrievalResult::failure(RetrievalError::Panicked(message)))
                }
            }
        };
        self.control.clear_closeable();
        self.finish(outcome, false);
    }

    fn abandon(&self) {
        tracing::warn!(url = %self.result_url, "retrieval job dropped before running");
        let result = RetrievalResult::failure(RetrievalError::Interrupted);
        self.finish(RetrieverOutcome::canceled(Some(result)), true);
    }

    fn finish(&self, outcome: RetrieverOutcome, interrupted: bool) {
        let stage = match outcome.status {
            RetrieverStatus::Completed if outcome.is_successful() => RetrievalStatus::Success,
            RetrieverStatus::Completed => RetrievalStatus::Error,
            RetrieverStatus::Paused | RetrieverStatus::Canceled => RetrievalStatus::Interrupted,
        };
        self.set_stage(stage);
        self.sink.done();
        tracing::debug!(url = %self.result_url, ?stage, status = ?outcome.status, "retrieval job finished");

        {
            let mut state = lock(&self.state);
            state.outcome = Some(outcome.clone());
            state.interrupted = interrupted;
        }

        let hooks = {
            let mut hooks = lock(&self.hooks);
            hooks.finished = true;
            std::mem::take(&mut hooks.pending)
        };
        for hook in hooks {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(self, &outcome))) {
                tracing::error!(
                    url = %self.result_url,
                    panic = %panic_message(payload.as_ref()),
                    "completion hook failed"
                );
            }
        }

        lock(&self.state).done = true;
        self.done.notify_all();
    }
}

/// The scheduled task. Dropping it without running abandons the job.
struct ScheduledRun(Option<Arc<RetrievalJob>>);

impl ScheduledRun {
    fn run(mut self) {
        if let Some(job) = self.0.take() {
            job.run();
        }
    }
}

impl Drop for ScheduledRun {
    fn drop(&mut self) {
        if let Some(job) = self.0.take() {
            job.abandon();
        }
    }
}
