use std::fmt;
use std::path::Path;
use std::str::FromStr;
use url::Url;

use crate::error::{CacheError, Result};

/// Stable identity of a cached resource, derived from its locator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    url: Url,
}

impl ResourceKey {
    /// Parse a locator such as `https://cdn.example.com/videos/intro.mp4`
    pub fn parse(locator: &str) -> Result<Self> {
        let url = Url::parse(locator).map_err(|source| CacheError::InvalidLocator {
            locator: locator.to_string(),
            source,
        })?;
        Ok(Self { url })
    }

    /// Canonical locator string used as the digest input
    pub fn canonical(&self) -> &str {
        self.url.as_str()
    }

    /// Lowercase hex MD5 of the canonical locator
    pub fn digest(&self) -> String {
        format!("{:x}", md5::compute(self.canonical()))
    }

    /// File extension of the locator's path, if any
    pub fn extension(&self) -> Option<&str> {
        Path::new(self.url.path())
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
    }

    /// File name used for the cached bytes: `<digest>[.<extension>]`
    pub fn to_filename(&self) -> String {
        match self.extension() {
            Some(ext) => format!("{}.{}", self.digest(), ext),
            None => self.digest(),
        }
    }
}

impl FromStr for ResourceKey {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}
