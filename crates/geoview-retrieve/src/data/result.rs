use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::data::status::RetrieverStatus;
use crate::error::RetrievalError;

/// Content produced by a retriever.
///
/// All accessors are views over the same immutable bytes. Each call hands out an
/// independent buffer or reader, so reading one view never consumes another.
#[derive(Clone, PartialEq, Eq)]
pub struct RetrievalData {
    bytes: Bytes,
    content_type: Option<String>,
    file: Option<PathBuf>,
}

impl RetrievalData {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: None,
            file: None,
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Record the on-disk location of the content.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// The content as a shared byte buffer.
    pub fn as_buffer(&self) -> Bytes { self.bytes.clone() }

    /// A fresh reader positioned at the start of the content.
    pub fn as_reader(&self) -> Cursor<Bytes> { Cursor::new(self.bytes.clone()) }

    /// The content decoded as UTF-8, replacing invalid sequences.
    pub fn as_string(&self) -> String { String::from_utf8_lossy(&self.bytes).into_owned() }

    pub fn content_type(&self) -> Option<&str> { self.content_type.as_deref() }

    pub fn file(&self) -> Option<&Path> { self.file.as_deref() }

    pub fn len(&self) -> usize { self.bytes.len() }

    pub fn is_empty(&self) -> bool { self.bytes.is_empty() }
}

impl fmt::Debug for RetrievalData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrievalData")
            .field("len", &self.bytes.len())
            .field("content_type", &self.content_type)
            .field("file", &self.file)
            .finish()
    }
}

/// Outcome of a retrieval: success flag, optional error and message, optional data.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    successful: bool,
    data: Option<RetrievalData>,
    error: Option<Arc<RetrievalError>>,
    message: Option<String>,
}

impl RetrievalResult {
    pub fn success(data: RetrievalData) -> Self {
        Self {
            successful: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn failure(error: RetrievalError) -> Self {
        Self {
            successful: false,
            data: None,
            error: Some(Arc::new(error)),
            message: None,
        }
    }

    /// An unsuccessful result that still carries whatever content was read.
    pub fn partial(data: RetrievalData, error: Option<RetrievalError>) -> Self {
        Self {
            successful: false,
            data: Some(data),
            error: error.map(Arc::new),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_successful(&self) -> bool { self.successful }

    pub fn data(&self) -> Option<&RetrievalData> { self.data.as_ref() }

    pub fn has_data(&self) -> bool { self.data.is_some() }

    pub fn error(&self) -> Option<&RetrievalError> { self.error.as_deref() }

    /// User-facing message, defaulting to the error's description.
    pub fn message(&self) -> Option<String> {
        self.message
            .clone()
            .or_else(|| self.error.as_ref().map(|e| e.to_string()))
    }

    /// Byte view of the data; empty if there is none.
    pub fn as_buffer(&self) -> Bytes {
        self.data.as_ref().map(RetrievalData::as_buffer).unwrap_or_default()
    }

    pub fn as_reader(&self) -> Option<Cursor<Bytes>> { self.data.as_ref().map(RetrievalData::as_reader) }

    pub fn as_string(&self) -> Option<String> { self.data.as_ref().map(RetrievalData::as_string) }
}

/// A retriever's result paired with how the retriever finished.
#[derive(Debug, Clone)]
pub struct RetrieverOutcome {
    pub result: Option<RetrievalResult>,
    pub status: RetrieverStatus,
}

impl RetrieverOutcome {
    pub fn completed(result: RetrievalResult) -> Self {
        Self {
            result: Some(result),
            status: RetrieverStatus::Completed,
        }
    }

    pub fn paused(partial: Option<RetrievalResult>) -> Self {
        Self {
            result: partial,
            status: RetrieverStatus::Paused,
        }
    }

    pub fn canceled(partial: Option<RetrievalResult>) -> Self {
        Self {
            result: partial,
            status: RetrieverStatus::Canceled,
        }
    }

    pub fn result(&self) -> Option<&RetrievalResult> { self.result.as_ref() }

    /// `true` when the retriever completed with a successful result.
    pub fn is_successful(&self) -> bool {
        self.status == RetrieverStatus::Completed
            && self.result.as_ref().is_some_and(RetrievalResult::is_successful)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_views_do_not_consume_each_other() {
        let data = RetrievalData::new(&b"layer tile"[..]);

        let mut first = String::new();
        data.as_reader().read_to_string(&mut first).unwrap();
        let mut second = Vec::new();
        data.as_reader().read_to_end(&mut second).unwrap();

        assert_eq!(first, "layer tile");
        assert_eq!(second, b"layer tile");
        assert_eq!(data.as_buffer().len(), 10);
        assert_eq!(data.as_string(), "layer tile");
    }

    #[test]
    fn test_message_defaults_to_error() {
        let result = RetrievalResult::failure(RetrievalError::Protocol("HTTP 404".into()));
        assert!(!result.is_successful());
        assert_eq!(result.message().as_deref(), Some("protocol error: HTTP 404"));

        let result = result.with_message("tile not found");
        assert_eq!(result.message().as_deref(), Some("tile not found"));
    }

    #[test]
    fn test_success_has_no_message() {
        let result = RetrievalResult::success(RetrievalData::new(vec![1, 2, 3]));
        assert!(result.message().is_none());
        assert_eq!(result.as_buffer().as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn test_partial_keeps_data() {
        let result = RetrievalResult::partial(RetrievalData::new(vec![0; 4]), None);
        assert!(!result.is_successful());
        assert!(result.has_data());
        assert_eq!(result.as_buffer().len(), 4);
    }

    #[test]
    fn test_outcome_success_requires_completed_status() {
        let ok = RetrievalResult::success(RetrievalData::new(vec![1]));
        assert!(RetrieverOutcome::completed(ok.clone()).is_successful());
        assert!(!RetrieverOutcome::paused(Some(ok)).is_successful());
        assert!(!RetrieverOutcome::canceled(None).is_successful());
    }
}
