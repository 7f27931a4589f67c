//! Service configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::RetrievalProperties;
use crate::error::Result;

/// Configuration for a [`RetrievalService`](crate::RetrievalService).
///
/// # Examples
///
/// ```
/// use geoview_retrieve::ServiceConfig;
///
/// let config = ServiceConfig::from_toml_str(r#"
///     caching_enabled = false
///     worker_threads = 2
///
///     [default_properties]
///     read_timeout_ms = 5000
/// "#).unwrap();
///
/// assert!(!config.caching_enabled);
/// assert_eq!(config.worker_threads, 2);
/// assert!(config.default_properties.use_cache);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Consult the cache collaborator at all.
    ///
    /// Default: true
    pub caching_enabled: bool,

    /// Async worker threads for a scheduler built from this configuration.
    ///
    /// Default: 4
    pub worker_threads: usize,

    /// Properties used when a caller does not supply its own.
    pub default_properties: RetrievalProperties,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            caching_enabled: true,
            worker_threads: 4,
            default_properties: RetrievalProperties::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> { Ok(toml::from_str(source)?) }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    #[must_use]
    pub fn caching_enabled(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }

    #[must_use]
    pub fn worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    #[must_use]
    pub fn default_properties(mut self, properties: RetrievalProperties) -> Self {
        self.default_properties = properties;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(ServiceConfig::from_toml_str("").unwrap(), ServiceConfig::default());
    }

    #[test]
    fn test_nested_properties() {
        let config = ServiceConfig::from_toml_str(
            r#"
            [default_properties]
            use_cache = false
            connect_timeout_ms = 250
            file_required = true
            "#,
        )
        .unwrap();

        assert!(config.caching_enabled);
        assert!(!config.default_properties.use_cache);
        assert!(config.default_properties.file_required);
        assert_eq!(config.default_properties.connect_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = ServiceConfig::from_toml_str("worker_threads = \"many\"").unwrap_err();
        assert!(matches!(err, crate::RetrievalError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "caching_enabled = false").unwrap();
        let config = ServiceConfig::load(file.path()).unwrap();
        assert!(!config.caching_enabled);
    }
}
