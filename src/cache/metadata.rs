use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::fragments::FragmentIndex;
use super::range::ByteRange;
use crate::error::Result;

/// Suffix appended to a cached file's path to locate its configuration sidecar
pub const CONFIGURATION_SUFFIX: &str = ".cfg";

/// Sidecar location for the cached bytes at `file_path` (`<file_path>.cfg`)
pub fn sidecar_path(file_path: &Path) -> PathBuf {
    let mut path = OsString::from(file_path.as_os_str());
    path.push(CONFIGURATION_SUFFIX);
    PathBuf::from(path)
}

/// Resource properties learned from the first remote response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// Total size in bytes (from Content-Length / Content-Range)
    pub content_length: u64,

    /// MIME type of the resource
    pub content_type: String,
}

impl ResourceInfo {
    pub fn new(content_length: u64, content_type: impl Into<String>) -> Self {
        Self {
            content_length,
            content_type: content_type.into(),
        }
    }
}

/// Cache metadata for a single resource, persisted next to its byte file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfiguration {
    /// Byte ranges present in the cache file
    #[serde(default)]
    pub fragments: FragmentIndex,

    /// Known once a remote response has been observed
    #[serde(default)]
    pub info: Option<ResourceInfo>,
}

impl CacheConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the configuration stored at `path`.
    ///
    /// A missing sidecar yields an empty configuration. An unreadable or corrupt one is
    /// logged and also replaced by an empty configuration, the cache then refetches.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            debug!("No cache configuration at {:?}, starting empty", path);
            return Self::default();
        }

        match Self::read_from(path) {
            Ok(configuration) => {
                debug!(
                    "Loaded cache configuration {:?} with {} fragments",
                    path,
                    configuration.fragments.len()
                );
                configuration
            }
            Err(e) => {
                warn!(
                    "Failed to load cache configuration {:?}: {}, starting with empty configuration",
                    path, e
                );
                Self::default()
            }
        }
    }

    /// Strict variant of [`CacheConfiguration::load`] that surfaces I/O and parse errors
    pub fn read_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write the configuration to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string(self)?;
        fs::write(path, contents)?;
        debug!(
            "Saved cache configuration {:?} ({} fragments, {} bytes cached)",
            path,
            self.fragments.len(),
            self.fragments.cached_bytes()
        );
        Ok(())
    }

    /// Record a newly cached range
    pub fn add_fragment(&mut self, range: ByteRange) {
        self.fragments.add(range);
    }

    /// Replace the resource info, dropping fragments beyond the new length
    pub fn set_info(&mut self, info: ResourceInfo) {
        self.fragments.truncate(info.content_length);
        self.info = Some(info);
    }

    /// Whether every byte of the resource is cached (requires known length)
    pub fn is_complete(&self) -> bool {
        match &self.info {
            Some(info) => self
                .fragments
                .contains(&ByteRange::new(0, info.content_length)),
            None => false,
        }
    }

    /// Cached fraction of the resource (0.0 to 1.0), 0.0 when the length is unknown
    pub fn progress(&self) -> f64 {
        match &self.info {
            Some(info) if info.content_length > 0 => {
                self.fragments.cached_bytes() as f64 / info.content_length as f64
            }
            _ => 0.0,
        }
    }
}
