use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Immutable configuration snapshot for one [`Retrieval`](crate::Retrieval).
///
/// Properties take part in identifying a retrieval: two requests for the same URL
/// share an in-flight retrieval only when their properties are equal.
///
/// # Examples
///
/// ```
/// use geoview_retrieve::RetrievalProperties;
/// use std::time::Duration;
///
/// let properties = RetrievalProperties::default()
///     .refresh_cache(true)
///     .read_timeout(Some(Duration::from_secs(5)));
/// assert!(properties.use_cache);
/// assert!(properties.refresh_cache);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalProperties {
    /// Consult the retriever's cache before fetching.
    ///
    /// Default: true
    pub use_cache: bool,

    /// Fetch even when cached content is available.
    ///
    /// Default: false
    pub refresh_cache: bool,

    /// Timeout for establishing a connection, honoured by the retriever.
    ///
    /// Default: 10s
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Option<Duration>,

    /// Timeout between reads, honoured by the retriever.
    ///
    /// Default: 60s
    #[serde(rename = "read_timeout_ms", with = "millis")]
    pub read_timeout: Option<Duration>,

    /// The caller needs the content on disk, not only in memory.
    ///
    /// Default: false
    pub file_required: bool,
}

impl Default for RetrievalProperties {
    fn default() -> Self {
        Self {
            use_cache: true,
            refresh_cache: false,
            connect_timeout: Some(Duration::from_secs(10)),
            read_timeout: Some(Duration::from_secs(60)),
            file_required: false,
        }
    }
}

impl RetrievalProperties {
    #[must_use]
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    #[must_use]
    pub fn refresh_cache(mut self, refresh_cache: bool) -> Self {
        self.refresh_cache = refresh_cache;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn file_required(mut self, file_required: bool) -> Self {
        self.file_required = file_required;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
