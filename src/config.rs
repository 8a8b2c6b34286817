use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::cache::{CacheManager, ExpirationPolicy, LockingMode};

/// Cache settings, usually read from `config.toml` at startup and applied to the
/// process-wide [`CacheManager`] before any handler is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Directory to store cached files (platform cache directory when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    /// Maximum size of a single local read in kilobytes
    #[serde(default = "default_package_size_kb")]
    pub package_size_kb: u32,

    /// Extension of media files considered by the expiration sweep
    #[serde(default = "default_media_extension")]
    pub media_extension: String,

    /// Whether reads also serialize against writes
    #[serde(default)]
    pub locking: LockingMode,

    /// Expiration stamped on newly created cache files. Kept last so TOML output
    /// places its table after the plain keys.
    #[serde(default)]
    pub expiration: ExpirationPolicy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: None,
            expiration: ExpirationPolicy::default(),
            package_size_kb: default_package_size_kb(),
            media_extension: default_media_extension(),
            locking: LockingMode::default(),
        }
    }
}

impl CacheSettings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading cache settings from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;
        let settings: CacheSettings = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse settings file {:?}", path))?;
        settings.validate()?;
        info!("Cache settings loaded from {:?}", path);
        Ok(settings)
    }

    /// Load settings from `path`, or from the default location, falling back to defaults
    /// when no file exists there.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = Self::default_settings_path()?;
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            debug!("No settings file at {:?}, using defaults", default_path);
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write settings file {:?}", path))?;
        Ok(())
    }

    /// Default settings file, `<config dir>/range-cache/config.toml`
    pub fn default_settings_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))?;
        Ok(config_dir.join("range-cache").join("config.toml"))
    }

    /// Get the cache directory path, using platform-specific defaults if not set
    pub fn cache_directory(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.directory {
            Ok(dir.clone())
        } else {
            Self::default_cache_directory()
        }
    }

    /// Get platform-specific default cache directory
    pub fn default_cache_directory() -> Result<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            // ~/Library/Caches/RangeCache/media
            let cache_dir = dirs::cache_dir()
                .or_else(|| dirs::home_dir().map(|h| h.join("Library/Caches")))
                .ok_or_else(|| anyhow::anyhow!("Failed to get cache directory"))?;
            Ok(cache_dir.join("RangeCache").join("media"))
        }
        #[cfg(not(target_os = "macos"))]
        {
            // ~/.cache/range-cache/media
            let cache_dir = dirs::cache_dir()
                .ok_or_else(|| anyhow::anyhow!("Failed to get cache directory"))?;
            Ok(cache_dir.join("range-cache").join("media"))
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.package_size_kb == 0 {
            return Err(anyhow::anyhow!("package_size_kb must be greater than 0"));
        }

        if self.media_extension.is_empty() || self.media_extension.contains('.') {
            return Err(anyhow::anyhow!(
                "media_extension must be a bare extension such as \"mp4\""
            ));
        }

        Ok(())
    }

    pub fn package_size_bytes(&self) -> u64 {
        u64::from(self.package_size_kb) * 1024
    }

    /// Push these settings into `manager`
    pub fn apply(&self, manager: &CacheManager) -> Result<()> {
        self.validate()?;
        manager.configure_directory(self.cache_directory()?);
        manager.configure_expiration(self.expiration);
        manager.configure_package_size(self.package_size_bytes());
        manager.configure_media_extension(self.media_extension.clone());
        manager.configure_locking(self.locking);
        Ok(())
    }
}

fn default_package_size_kb() -> u32 {
    512
}

fn default_media_extension() -> String {
    "mp4".to_string()
}
