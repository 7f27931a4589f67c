//! Cache collaborator used by [`RetrievalService`](crate::RetrievalService).
//!
//! The service only asks two things of a cache: where a cached copy of a URL
//! lives, and to store freshly fetched content. Storage layout and eviction are
//! entirely up to the implementation.

use std::io::Read;

use url::Url;

use crate::error::Result;

pub trait ResourceCache: Send + Sync {
    /// Location of the cached copy of `url`, if present. Must be cheap.
    fn check_cache(&self, url: &Url) -> Option<Url>;

    /// Store the content read from `content` as the cached copy of `url`.
    fn put_resource(&self, url: &Url, content: &mut dyn Read) -> Result<()>;
}
