use std::fs::File;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use geoview_retrieve::{
    Closeable, Result, RetrievalData, RetrievalError, RetrievalMonitor, RetrievalProperties, RetrievalResult,
    RetrievalStatus, Retriever, RetrieverOutcome, Url,
};

const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Reads `file:` URLs from the local filesystem.
///
/// The file is read in chunks; pause and cancel requests are honoured between
/// chunks and return whatever was read so far as a partial result.
#[derive(Debug, Clone)]
pub struct FileRetriever {
    chunk_size: usize,
}

impl Default for FileRetriever {
    fn default() -> Self { Self { chunk_size: DEFAULT_CHUNK_SIZE } }
}

impl FileRetriever {
    pub fn new() -> Self { Self::default() }

    /// Default: 8 KiB
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

struct StopFlag(Arc<AtomicBool>);

impl Closeable for StopFlag {
    fn close(&self) { self.0.store(true, Ordering::Release); }
}

impl Retriever for FileRetriever {
    fn supports(&self, url: &Url) -> bool { url.scheme() == "file" }

    fn retrieve(
        &self,
        url: &Url,
        monitor: &RetrievalMonitor,
        _properties: &RetrievalProperties,
        _cached: Option<&RetrievalData>,
    ) -> Result<RetrieverOutcome> {
        let path = url.to_file_path().map_err(|()| RetrievalError::UnsupportedUrl(url.to_string()))?;

        monitor.update_status(RetrievalStatus::Connecting);
        let mut file = File::open(&path)?;
        let length = file.metadata()?.len();

        let stop = Arc::new(AtomicBool::new(false));
        monitor.set_closeable(Box::new(StopFlag(Arc::clone(&stop))));
        monitor.update_status(RetrievalStatus::Connected);
        monitor.set_length(Some(length));
        monitor.update_status(RetrievalStatus::Reading);

        let mut content = Vec::with_capacity(usize::try_from(length).unwrap_or(0));
        let mut chunk = vec![0u8; self.chunk_size];
        loop {
            if monitor.is_canceled() || stop.load(Ordering::Acquire) {
                tracing::debug!(path = %path.display(), read = content.len(), "file read canceled");
                let partial = RetrievalResult::partial(RetrievalData::new(content), None);
                return Ok(RetrieverOutcome::canceled(Some(partial)));
            }
            if monitor.is_paused() {
                tracing::debug!(path = %path.display(), read = content.len(), "file read paused");
                let partial = RetrievalResult::partial(RetrievalData::new(content), None);
                return Ok(RetrieverOutcome::paused(Some(partial)));
            }

            let read = file.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            content.extend_from_slice(&chunk[..read]);
            monitor.progress(read as u64);
        }

        let data = RetrievalData::new(content).with_file(path);
        Ok(RetrieverOutcome::completed(RetrievalResult::success(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(content: &[u8]) -> (NamedTempFile, Url) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        let url = Url::from_file_path(file.path()).unwrap();
        (file, url)
    }

    #[test]
    fn test_reads_whole_file_and_reports_progress() {
        let content = vec![3u8; 20_000];
        let (file, url) = file_with(&content);
        let monitor = RetrievalMonitor::detached(url.clone());

        let outcome = FileRetriever::new()
            .retrieve(&url, &monitor, &RetrievalProperties::default(), None)
            .unwrap();

        assert!(outcome.is_successful());
        let data = outcome.result().unwrap().data().unwrap();
        assert_eq!(data.len(), 20_000);
        assert_eq!(data.file(), Some(file.path()));
        assert_eq!(monitor.length(), Some(20_000));
        assert_eq!(monitor.position(), 20_000);
        assert_eq!(monitor.status(), RetrievalStatus::Reading);
    }

    #[test]
    fn test_cancel_before_first_chunk_returns_partial() {
        let (_file, url) = file_with(b"never read");
        let monitor = RetrievalMonitor::detached(url.clone());
        monitor.request_cancel();

        let outcome = FileRetriever::new()
            .retrieve(&url, &monitor, &RetrievalProperties::default(), None)
            .unwrap();

        assert_eq!(outcome.status, geoview_retrieve::RetrieverStatus::Canceled);
        let partial = outcome.result().unwrap();
        assert!(!partial.is_successful());
        assert!(partial.data().unwrap().is_empty());
    }

    #[test]
    fn test_pause_returns_paused_outcome() {
        let (_file, url) = file_with(b"paused");
        let monitor = RetrievalMonitor::detached(url.clone());
        monitor.request_pause();

        let outcome = FileRetriever::new()
            .retrieve(&url, &monitor, &RetrievalProperties::default(), None)
            .unwrap();
        assert_eq!(outcome.status, geoview_retrieve::RetrieverStatus::Paused);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("missing.bin")).unwrap();
        let monitor = RetrievalMonitor::detached(url.clone());

        let err = FileRetriever::new()
            .retrieve(&url, &monitor, &RetrievalProperties::default(), None)
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Io(_)));
    }

    #[test]
    fn test_supports_only_file_scheme() {
        let retriever = FileRetriever::new();
        assert!(retriever.supports(&Url::parse("file:///tmp/x").unwrap()));
        assert!(!retriever.supports(&Url::parse("https://example.com/x").unwrap()));
    }
}
