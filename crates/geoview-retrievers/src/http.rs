use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use geoview_retrieve::{
    Closeable, ResourceCache, Result, RetrievalData, RetrievalError, RetrievalMonitor, RetrievalProperties,
    RetrievalResult, RetrievalStatus, Retriever, RetrieverOutcome, Url,
};
use tempfile::NamedTempFile;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::dir_cache::entry_name;

/// Fetches `http` and `https` URLs with `reqwest`.
///
/// Retrievers run on blocking worker threads; each retrieval drives its request to
/// completion on `handle` with [`Handle::block_on`]. It must therefore not be called
/// from inside an async task.
///
/// With a cache attached, [`check_cache`](Retriever::check_cache) loads the cached
/// copy of a URL and retrievals that allow it (`use_cache` without `refresh_cache`)
/// are answered from it without touching the network. Fresh downloads are written
/// back to the cache.
///
/// A [`RetrievalService`](geoview_retrieve::RetrievalService) with a cache of its own
/// also writes successful jobs back. Attach a given cache to the service or to the
/// retriever, not both, or each download is stored twice.
pub struct HttpRetriever {
    handle: Handle,
    clients: Mutex<HashMap<Option<Duration>, reqwest::Client>>,
    cache: Option<Arc<dyn ResourceCache>>,
    download_dir: Option<PathBuf>,
}

/// How far a body read got.
enum Body {
    Complete(RetrievalData),
    Stopped { data: RetrievalData, paused: bool },
}

struct CancelOnClose(CancellationToken);

impl Closeable for CancelOnClose {
    fn close(&self) { self.0.cancel(); }
}

fn request_error(e: reqwest::Error) -> RetrievalError {
    if e.is_timeout() { RetrievalError::Timeout } else { RetrievalError::Protocol(e.to_string()) }
}

async fn next_chunk<S>(stream: &mut S, read_timeout: Option<Duration>) -> Result<Option<Bytes>>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    let next = match read_timeout {
        Some(limit) => tokio::time::timeout(limit, stream.next())
            .await
            .map_err(|_| RetrievalError::Timeout)?,
        None => stream.next().await,
    };
    next.transpose().map_err(request_error)
}

impl HttpRetriever {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            clients: Mutex::new(HashMap::new()),
            cache: None,
            download_dir: None,
        }
    }

    /// Serve cached copies from `cache` and store fresh downloads in it.
    ///
    /// This makes the retriever the owner of write-back for that cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ResourceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Directory where bodies are kept for retrievals with `file_required` set.
    #[must_use]
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// One client per connect timeout, reused across retrievals.
    fn client(&self, connect_timeout: Option<Duration>) -> Result<reqwest::Client> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&connect_timeout) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().map_err(request_error)?;
        clients.insert(connect_timeout, client.clone());
        Ok(client)
    }

    async fn fetch(
        &self,
        client: &reqwest::Client,
        url: &Url,
        monitor: &RetrievalMonitor,
        properties: &RetrievalProperties,
        token: &CancellationToken,
    ) -> Result<Body> {
        monitor.update_status(RetrievalStatus::Connecting);
        let response = tokio::select! {
            _ = token.cancelled() => {
                return Ok(Body::Stopped { data: RetrievalData::new(Bytes::new()), paused: false });
            }
            response = client.get(url.as_str()).send() => response.map_err(request_error)?,
        };
        monitor.update_status(RetrievalStatus::Connected);

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Protocol(format!("{url} answered {status}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let with_type = |body: BytesMut| {
            let data = RetrievalData::new(body.freeze());
            match &content_type {
                Some(content_type) => data.with_content_type(content_type.clone()),
                None => data,
            }
        };

        monitor.set_length(response.content_length());
        monitor.update_status(RetrievalStatus::Reading);

        let mut body = BytesMut::new();
        let mut stream = Box::pin(response.bytes_stream());
        loop {
            let canceled = monitor.is_canceled();
            if canceled || monitor.is_paused() {
                return Ok(Body::Stopped { data: with_type(body), paused: !canceled });
            }

            let chunk = tokio::select! {
                _ = token.cancelled() => {
                    return Ok(Body::Stopped { data: with_type(body), paused: false });
                }
                chunk = next_chunk(&mut stream, properties.read_timeout) => chunk?,
            };
            match chunk {
                Some(chunk) => {
                    body.extend_from_slice(&chunk);
                    monitor.progress(chunk.len() as u64);
                }
                None => break,
            }
        }

        Ok(Body::Complete(with_type(body)))
    }

    fn keep_on_disk(&self, url: &Url, data: RetrievalData) -> Result<RetrievalData> {
        let Some(dir) = &self.download_dir else { return Ok(data) };
        fs::create_dir_all(dir)?;

        let path = dir.join(entry_name(url));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&data.as_buffer())?;
        tmp.persist(&path).map_err(|e| RetrievalError::Io(e.error))?;
        Ok(data.with_file(path))
    }
}

impl Retriever for HttpRetriever {
    fn supports(&self, url: &Url) -> bool { matches!(url.scheme(), "http" | "https") }

    fn check_cache(&self, url: &Url) -> Option<RetrievalData> {
        let location = self.cache.as_ref()?.check_cache(url)?;
        let path = location.to_file_path().ok()?;
        match fs::read(&path) {
            Ok(content) => Some(RetrievalData::new(content).with_file(path)),
            Err(e) => {
                tracing::debug!(url = %url, path = %path.display(), error = %e, "cached copy unreadable");
                None
            }
        }
    }

    fn retrieve(
        &self,
        url: &Url,
        monitor: &RetrievalMonitor,
        properties: &RetrievalProperties,
        cached: Option<&RetrievalData>,
    ) -> Result<RetrieverOutcome> {
        if properties.use_cache && !properties.refresh_cache {
            if let Some(cached) = cached {
                tracing::debug!(url = %url, "answered from cache");
                monitor.set_length(Some(cached.len() as u64));
                monitor.set_position(cached.len() as u64);
                return Ok(RetrieverOutcome::completed(RetrievalResult::success(cached.clone())));
            }
        }

        let client = self.client(properties.connect_timeout)?;
        let token = CancellationToken::new();
        monitor.set_closeable(Box::new(CancelOnClose(token.clone())));

        let body = self.handle.block_on(self.fetch(&client, url, monitor, properties, &token))?;
        let data = match body {
            Body::Complete(data) => data,
            Body::Stopped { data, paused } => {
                tracing::debug!(url = %url, read = data.len(), paused, "http read stopped");
                let partial = RetrievalResult::partial(data, None);
                return Ok(if paused {
                    RetrieverOutcome::paused(Some(partial))
                } else {
                    RetrieverOutcome::canceled(Some(partial))
                });
            }
        };

        if properties.use_cache {
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.put_resource(url, &mut data.as_reader()) {
                    tracing::warn!(url = %url, error = %e, "failed to store response in cache");
                }
            }
        }

        let data = if properties.file_required { self.keep_on_disk(url, data)? } else { data };
        Ok(RetrieverOutcome::completed(RetrievalResult::success(data)))
    }
}
