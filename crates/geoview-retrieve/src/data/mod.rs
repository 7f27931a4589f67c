//! Immutable data types shared by retrievers, jobs and retrievals.
//!
//! These types are plain values: they are cloned across threads rather than
//! shared behind locks.

pub mod properties;
pub mod result;
pub mod status;

pub use properties::RetrievalProperties;
pub use result::{RetrievalData, RetrievalResult, RetrieverOutcome};
pub use status::{ControlState, RetrievalStatus, RetrieverStatus};
