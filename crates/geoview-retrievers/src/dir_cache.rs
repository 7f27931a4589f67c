use std::ffi::OsStr;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use geoview_retrieve::{ResourceCache, Result, RetrievalError, Url};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

/// File name used for `url` in a cache directory.
pub(crate) fn entry_name(url: &Url) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

fn is_entry_name(name: &OsStr) -> bool {
    name.to_str().is_some_and(|name| name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// A [`ResourceCache`] storing one file per URL in a directory.
///
/// Entries are named by the hex SHA-256 of the URL and written through a temporary
/// file in the same directory, so readers never observe a partial entry.
/// [`check_cache`](ResourceCache::check_cache) hands out `file:` URLs.
#[derive(Debug, Clone)]
pub struct DirectoryCache {
    root: PathBuf,
}

impl DirectoryCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        let root = fs::canonicalize(root.as_ref())?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path { &self.root }

    /// Where the entry for `url` lives, whether or not it exists.
    pub fn entry_path(&self, url: &Url) -> PathBuf { self.root.join(entry_name(url)) }

    /// Remove the entry for `url`. Returns `false` if there was none.
    pub fn remove(&self, url: &Url) -> Result<bool> {
        match fs::remove_file(self.entry_path(url)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every entry. Returns how many were removed.
    ///
    /// Only entry names are touched; temporary files of writes in flight stay.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() && is_entry_name(&entry.file_name()) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        tracing::debug!(root = %self.root.display(), removed, "cache cleared");
        Ok(removed)
    }
}

impl ResourceCache for DirectoryCache {
    fn check_cache(&self, url: &Url) -> Option<Url> {
        let path = self.entry_path(url);
        if !path.is_file() {
            return None;
        }
        Url::from_file_path(&path).ok()
    }

    fn put_resource(&self, url: &Url, content: &mut dyn Read) -> Result<()> {
        let path = self.entry_path(url);
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        let written = io::copy(content, &mut tmp)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| RetrievalError::Cache(format!("{}: {}", path.display(), e.error)))?;

        tracing::trace!(url = %url, path = %path.display(), bytes = written, "resource cached");
        Ok(())
    }
}
