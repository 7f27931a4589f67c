//! Stock [`Retriever`](geoview_retrieve::Retriever)s and a directory-backed
//! [`ResourceCache`](geoview_retrieve::ResourceCache).
//!
//! - [`FileRetriever`] serves `file:` URLs, including cache hits from [`DirectoryCache`].
//! - [`HttpRetriever`] serves `http`/`https` with `reqwest` (feature `reqwest`, on by default).
//!
//! ```no_run
//! use std::sync::Arc;
//! use geoview_retrieve::{RetrievalService, ServiceConfig, TokioScheduler};
//! use geoview_retrievers::{DirectoryCache, FileRetriever, HttpRetriever};
//!
//! # fn main() -> geoview_retrieve::Result<()> {
//! let config = ServiceConfig::load("retrieval.toml")?;
//! let scheduler = TokioScheduler::new(config.worker_threads)?;
//! let cache = Arc::new(DirectoryCache::new("cache")?);
//!
//! let service = RetrievalService::new(config, Arc::new(scheduler.clone())).with_cache(cache);
//! service.register_retriever(Arc::new(FileRetriever::new()));
//! service.register_retriever(Arc::new(HttpRetriever::new(scheduler.handle().clone())));
//! # Ok(())
//! # }
//! ```

mod dir_cache;
mod file;
#[cfg(feature = "reqwest")]
mod http;

pub use dir_cache::DirectoryCache;
pub use file::FileRetriever;
#[cfg(feature = "reqwest")]
pub use http::HttpRetriever;
