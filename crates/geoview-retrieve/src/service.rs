use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use url::Url;

use crate::cache::ResourceCache;
use crate::config::ServiceConfig;
use crate::data::RetrievalProperties;
use crate::job::RetrievalJob;
use crate::retrieval::{Caller, Retrieval, WeakRetrieval};
use crate::retriever::Retriever;
use crate::scheduler::{Priority, Scheduler};
use crate::sync::{lock, read, write};

/// How [`RetrievalService::retrieve_with`] waits for the job it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RetrievalMode {
    /// Schedule the job and return immediately.
    #[default]
    Background,
    /// Schedule the job at high priority and block until it completes.
    Immediate,
}

type RetrievalKey = (Url, RetrievalProperties);

/// Entry point for retrieving resources.
///
/// Owns the retriever registry and the optional cache collaborator, and hands out
/// either bare [`RetrievalJob`]s ([`retrieve`](Self::retrieve)) or shared, restartable
/// [`Retrieval`]s ([`retrieval`](Self::retrieval)).
pub struct RetrievalService {
    config: ServiceConfig,
    caching_enabled: AtomicBool,
    scheduler: Arc<dyn Scheduler>,
    cache: Option<Arc<dyn ResourceCache>>,
    retrievers: RwLock<Vec<Arc<dyn Retriever>>>,
    retrievals: Mutex<HashMap<RetrievalKey, WeakRetrieval>>,
}

impl RetrievalService {
    pub fn new(config: ServiceConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            caching_enabled: AtomicBool::new(config.caching_enabled),
            config,
            scheduler,
            cache: None,
            retrievers: RwLock::new(Vec::new()),
            retrievals: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ResourceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &ServiceConfig { &self.config }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> { &self.scheduler }

    /// Register a retriever. Lookup is first match in registration order.
    pub fn register_retriever(&self, retriever: Arc<dyn Retriever>) {
        tracing::debug!(retriever = retriever.name(), "registering retriever");
        write(&self.retrievers).push(retriever);
    }

    pub fn retrievers(&self) -> Vec<Arc<dyn Retriever>> { read(&self.retrievers).clone() }

    /// The first registered retriever that supports `url`.
    pub fn find_retriever(&self, url: &Url) -> Option<Arc<dyn Retriever>> {
        read(&self.retrievers).iter().find(|r| r.supports(url)).cloned()
    }

    /// Caching is on in the configuration and a cache collaborator is attached.
    pub fn is_caching_enabled(&self) -> bool { self.cache.is_some() && self.caching_enabled.load(Ordering::Acquire) }

    pub fn set_caching_enabled(&self, enabled: bool) { self.caching_enabled.store(enabled, Ordering::Release); }

    /// Fetch `url` in the background without forcing a refresh.
    pub fn retrieve(&self, url: &Url) -> Option<Arc<RetrievalJob>> {
        self.retrieve_with(url, RetrievalMode::Background, false)
    }

    /// Fetch `url`, serving it from the cache collaborator unless `force_refresh` is set.
    ///
    /// Returns `None` when no registered retriever supports the URL to fetch.
    pub fn retrieve_with(&self, url: &Url, mode: RetrievalMode, force_refresh: bool) -> Option<Arc<RetrievalJob>> {
        let caching = self.is_caching_enabled();
        let cached_url = if caching && !force_refresh {
            self.cache.as_ref().and_then(|cache| cache.check_cache(url))
        } else {
            None
        };
        let from_cache = cached_url.is_some();
        let fetch_url = cached_url.unwrap_or_else(|| url.clone());

        let Some(retriever) = self.find_retriever(&fetch_url) else {
            tracing::debug!(url = %fetch_url, "no retriever supports url");
            return None;
        };

        let mut job = RetrievalJob::new(retriever, fetch_url, self.config.default_properties.clone());
        if from_cache {
            tracing::trace!(url = %url, cached = %job.result_url(), "serving from cache");
            job = job.from_cache(url.clone());
        }
        let job = Arc::new(job);

        if caching && !from_cache {
            if let Some(cache) = self.cache.clone() {
                job.on_complete(move |job, outcome| {
                    if !outcome.is_successful() {
                        return;
                    }
                    let Some(data) = outcome.result().and_then(|r| r.data()) else { return };
                    if let Err(e) = cache.put_resource(job.source_url(), &mut data.as_reader()) {
                        tracing::warn!(url = %job.source_url(), error = %e, "failed to store resource in cache");
                    }
                });
            }
        }

        match mode {
            RetrievalMode::Background => job.schedule(self.scheduler.as_ref(), Priority::Normal),
            RetrievalMode::Immediate => {
                job.schedule(self.scheduler.as_ref(), Priority::High);
                if let Err(e) = job.join() {
                    tracing::warn!(url = %url, error = %e, "interrupted while waiting for immediate retrieval");
                }
            }
        }
        Some(job)
    }

    /// A retrieval of `url` for `caller`, not yet started.
    ///
    /// While a retrieval for the same URL and properties is still referenced, it is
    /// returned again with `caller` added instead of creating a duplicate.
    /// Returns `None` when no registered retriever supports the URL.
    pub fn retrieval(
        &self,
        caller: impl Into<Caller>,
        url: Url,
        properties: RetrievalProperties,
    ) -> Option<Retrieval> {
        let caller = caller.into();
        let key = (url, properties);

        let existing = {
            let mut retrievals = lock(&self.retrievals);
            retrievals.retain(|_, retrieval| retrieval.is_live());
            match retrievals.get(&key).and_then(WeakRetrieval::upgrade) {
                Some(existing) => existing,
                None => {
                    let retriever = self.find_retriever(&key.0)?;
                    let retrieval =
                        Retrieval::new(caller, key.0.clone(), retriever, key.1.clone(), Arc::clone(&self.scheduler));
                    retrievals.insert(key, retrieval.downgrade());
                    return Some(retrieval);
                }
            }
        };

        existing.add_caller(caller);
        Some(existing)
    }

    /// [`retrieval`](Self::retrieval) with the configured default properties.
    pub fn retrieval_with_defaults(&self, caller: impl Into<Caller>, url: Url) -> Option<Retrieval> {
        self.retrieval(caller, url, self.config.default_properties.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RetrievalData, RetrievalResult, RetrieverOutcome};
    use crate::error::Result;
    use crate::monitor::RetrievalMonitor;
    use crate::scheduler::ThreadScheduler;
    use std::io::Read;
    use std::sync::atomic::AtomicUsize;

    /// Serves `payload` for one scheme and counts calls.
    struct SchemeRetriever {
        scheme: &'static str,
        payload: &'static [u8],
        calls: AtomicUsize,
    }

    impl SchemeRetriever {
        fn new(scheme: &'static str, payload: &'static [u8]) -> Arc<Self> {
            Arc::new(Self { scheme, payload, calls: AtomicUsize::new(0) })
        }
    }

    impl Retriever for SchemeRetriever {
        fn supports(&self, url: &Url) -> bool { url.scheme() == self.scheme }

        fn retrieve(
            &self,
            _url: &Url,
            _monitor: &RetrievalMonitor,
            _properties: &RetrievalProperties,
            _cached: Option<&RetrievalData>,
        ) -> Result<RetrieverOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RetrieverOutcome::completed(RetrievalResult::success(RetrievalData::new(self.payload))))
        }
    }

    /// Maps cached URLs to `cached:` URLs; stored bytes are kept for inspection.
    #[derive(Default)]
    struct MemoryCache {
        entries: Mutex<HashMap<Url, Vec<u8>>>,
    }

    impl ResourceCache for MemoryCache {
        fn check_cache(&self, url: &Url) -> Option<Url> {
            lock(&self.entries)
                .contains_key(url)
                .then(|| Url::parse(&format!("cached:{}", url.host_str().unwrap_or_default())).unwrap())
        }

        fn put_resource(&self, url: &Url, content: &mut dyn Read) -> Result<()> {
            let mut bytes = Vec::new();
            content.read_to_end(&mut bytes)?;
            lock(&self.entries).insert(url.clone(), bytes);
            Ok(())
        }
    }

    fn service() -> RetrievalService {
        RetrievalService::new(ServiceConfig::default(), Arc::new(ThreadScheduler::new()))
    }

    fn url(s: &str) -> Url { Url::parse(s).unwrap() }

    #[test]
    fn test_first_registered_retriever_wins() {
        let service = service();
        let first = SchemeRetriever::new("scheme", b"first");
        let second = SchemeRetriever::new("scheme", b"second");
        service.register_retriever(first.clone());
        service.register_retriever(second);

        let found = service.find_retriever(&url("scheme://ok")).unwrap();
        assert!(Arc::ptr_eq(&found, &(first as Arc<dyn Retriever>)));
        assert_eq!(service.retrievers().len(), 2);
        assert!(service.find_retriever(&url("other://x")).is_none());
    }

    #[test]
    fn test_unsupported_url_yields_no_job() {
        let service = service();
        service.register_retriever(SchemeRetriever::new("scheme", b""));
        assert!(service.retrieve(&url("unsupported://x")).is_none());
        assert!(service.retrieval_with_defaults("layer", url("unsupported://x")).is_none());
    }

    #[test]
    fn test_immediate_mode_returns_completed_job() {
        let service = service();
        service.register_retriever(SchemeRetriever::new("scheme", b"payload"));

        let job = service.retrieve_with(&url("scheme://ok"), RetrievalMode::Immediate, false).unwrap();
        assert!(job.is_completed());
        assert_eq!(job.retrieval_result().unwrap().as_string().unwrap(), "payload");
    }

    #[test]
    fn test_caching_requires_cache_collaborator() {
        let service = service();
        assert!(!service.is_caching_enabled());

        let service = service.with_cache(Arc::new(MemoryCache::default()));
        assert!(service.is_caching_enabled());
        service.set_caching_enabled(false);
        assert!(!service.is_caching_enabled());
    }

    #[test]
    fn test_successful_fetch_is_written_back_and_then_served_from_cache() {
        let cache = Arc::new(MemoryCache::default());
        let service = service().with_cache(cache.clone());
        let origin = SchemeRetriever::new("scheme", b"tile");
        let cached = SchemeRetriever::new("cached", b"tile from cache");
        service.register_retriever(origin.clone());
        service.register_retriever(cached.clone());

        let source = url("scheme://tile");
        let job = service.retrieve_with(&source, RetrievalMode::Immediate, false).unwrap();
        assert!(!job.is_from_cache());
        assert_eq!(lock(&cache.entries).get(&source).map(Vec::as_slice), Some(&b"tile"[..]));

        let job = service.retrieve_with(&source, RetrievalMode::Immediate, false).unwrap();
        assert!(job.is_from_cache());
        assert_eq!(job.source_url(), &source);
        assert_eq!(job.result_url().scheme(), "cached");
        assert_eq!(cached.calls.load(Ordering::SeqCst), 1);

        let job = service.retrieve_with(&source, RetrievalMode::Immediate, true).unwrap();
        assert!(!job.is_from_cache());
        assert_eq!(origin.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disabled_caching_fetches_origin_and_skips_write_back() {
        let cache = Arc::new(MemoryCache::default());
        let source = url("scheme://tile");
        lock(&cache.entries).insert(source.clone(), b"stale".to_vec());

        let service = RetrievalService::new(
            ServiceConfig::default().caching_enabled(false),
            Arc::new(ThreadScheduler::new()),
        )
        .with_cache(cache.clone());
        let origin = SchemeRetriever::new("scheme", b"origin");
        let cached = SchemeRetriever::new("cached", b"tile from cache");
        service.register_retriever(origin.clone());
        service.register_retriever(cached.clone());
        assert!(!service.is_caching_enabled());

        let job = service.retrieve_with(&source, RetrievalMode::Immediate, false).unwrap();
        assert!(!job.is_from_cache());
        assert_eq!(job.retrieval_result().unwrap().as_string().unwrap(), "origin");
        assert_eq!(origin.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.calls.load(Ordering::SeqCst), 0);
        assert_eq!(lock(&cache.entries).get(&source).map(Vec::as_slice), Some(&b"stale"[..]));

        let fresh = url("scheme://other");
        service.retrieve_with(&fresh, RetrievalMode::Immediate, false).unwrap();
        assert!(!lock(&cache.entries).contains_key(&fresh));
    }

    #[test]
    fn test_live_retrieval_is_shared() {
        let service = service();
        service.register_retriever(SchemeRetriever::new("scheme", b""));

        let first = service.retrieval_with_defaults("a", url("scheme://ok")).unwrap();
        let second = service.retrieval_with_defaults("b", url("scheme://ok")).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(first.callers().len(), 2);

        let props = RetrievalProperties::default().use_cache(false);
        let third = service.retrieval("c", url("scheme://ok"), props).unwrap();
        assert!(!third.ptr_eq(&first));
    }

    #[test]
    fn test_dropped_retrieval_is_not_reused() {
        let service = service();
        service.register_retriever(SchemeRetriever::new("scheme", b""));

        let first = service.retrieval_with_defaults("a", url("scheme://ok")).unwrap();
        drop(first);
        let second = service.retrieval_with_defaults("b", url("scheme://ok")).unwrap();
        assert_eq!(second.callers().len(), 1);
    }
}
