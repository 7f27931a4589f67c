//! Protocol-specific fetch strategies.

use url::Url;

use crate::data::{RetrievalData, RetrievalProperties, RetrieverOutcome};
use crate::error::Result;
use crate::monitor::RetrievalMonitor;

/// A fetch strategy for a family of URLs.
///
/// Retrievers are registered with a [`RetrievalService`](crate::RetrievalService)
/// and picked by [`supports`](Retriever::supports) in registration order.
pub trait Retriever: Send + Sync {
    /// Whether this retriever can fetch `url`. Must be free of side effects.
    fn supports(&self, url: &Url) -> bool;

    /// Cached content for `url`, if any. Must not perform network I/O.
    fn check_cache(&self, _url: &Url) -> Option<RetrievalData> { None }

    /// Fetch `url`, blocking the calling worker thread until done.
    ///
    /// Implementations poll [`RetrievalMonitor::is_canceled`] and
    /// [`RetrievalMonitor::is_paused`] between chunks and return a canceled or paused
    /// outcome promptly. Any closeable transport should be registered with
    /// [`RetrievalMonitor::set_closeable`] as soon as it is opened.
    ///
    /// Returning `Err`, or panicking, is reported as a completed, unsuccessful result.
    fn retrieve(
        &self,
        url: &Url,
        monitor: &RetrievalMonitor,
        properties: &RetrievalProperties,
        cached: Option<&RetrievalData>,
    ) -> Result<RetrieverOutcome>;

    /// Short name used in logs.
    fn name(&self) -> &str { std::any::type_name::<Self>() }
}
