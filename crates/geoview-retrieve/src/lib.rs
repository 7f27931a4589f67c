//! Asynchronous resource retrieval with pause, cancel, caching and listener fan-out.
//!
//! # Architecture
//!
//! Layers, from the bottom up:
//! - [`data`] - Immutable configuration and value types
//! - [`Retriever`] - Pluggable, protocol-specific fetch strategies
//! - [`RetrievalJob`] - One scheduled `retrieve` call on a worker
//! - [`Retrieval`] - A shared, restartable fetch of one URL with listeners
//! - [`RetrievalService`] - Retriever registry, cache integration and entry point
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use geoview_retrieve::{RetrievalService, ServiceConfig, ThreadScheduler};
//!
//! # fn example(retriever: Arc<dyn geoview_retrieve::Retriever>) -> geoview_retrieve::Result<()> {
//! let service = RetrievalService::new(ServiceConfig::default(), Arc::new(ThreadScheduler::new()));
//! service.register_retriever(retriever);
//!
//! let url = url::Url::parse("file:///tmp/tile.png").expect("valid url");
//! if let Some(retrieval) = service.retrieval_with_defaults("layer-1", url) {
//!     retrieval.start();
//!     let result = retrieval.wait_and_get_result()?;
//!     println!("successful: {:?}", result.map(|r| r.is_successful()));
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod data;
pub mod listener;
pub mod monitor;
pub mod progress;
pub mod retriever;
pub mod scheduler;

mod error;
mod job;
mod retrieval;
mod service;
mod sync;

pub use cache::ResourceCache;
pub use config::ServiceConfig;
pub use data::{
    ControlState, RetrievalData, RetrievalProperties, RetrievalResult, RetrievalStatus,
    RetrieverOutcome, RetrieverStatus,
};
pub use error::{Result, RetrievalError};
pub use job::RetrievalJob;
pub use listener::{CompoundListener, RetrievalListener};
pub use monitor::{Closeable, RetrievalMonitor};
pub use progress::{CompoundProgressSink, ProgressSink};
pub use retrieval::{Caller, Retrieval};
pub use retriever::Retriever;
pub use scheduler::{Priority, Scheduler, Task, ThreadScheduler, TokioScheduler};
pub use service::{RetrievalMode, RetrievalService};

pub use url::Url;
