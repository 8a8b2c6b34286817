//! Process-wide cache policy.
//!
//! The [`CacheManager`] owns the cache root directory and the expiration instant
//! stamped on newly created cache files. Each cached resource's byte file carries its
//! expiration as the filesystem modification time; [`CacheManager::sweep_expired`]
//! compares that timestamp against the current time.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, DirEntry};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use super::handler::LockingMode;
use super::key::ResourceKey;
use super::metadata::{CacheConfiguration, sidecar_path};
use super::planner::DEFAULT_PACKAGE_SIZE;
use crate::config::CacheSettings;
use crate::error::{CacheError, Result};

const SECONDS_PER_DAY: u64 = 86_400;

/// Stand-in for "never expires": 2400-01-01T00:00:00Z, within range of common filesystems
const NEVER_EXPIRES_SECS: u64 = 13_569_465_600;

/// Default extension of cached media files considered by the expiration sweep
pub const DEFAULT_MEDIA_EXTENSION: &str = "mp4";

static GLOBAL_MANAGER: Lazy<CacheManager> = Lazy::new(|| {
    let settings = CacheSettings::default();
    let directory = settings
        .cache_directory()
        .unwrap_or_else(|_| std::env::temp_dir().join("range-cache"));
    info!("Initializing global cache manager at {:?}", directory);
    CacheManager::new(directory)
});

/// When newly created cache files expire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationPolicy {
    /// Files never expire
    Never,
    /// Files expire the given number of seconds after the policy is configured
    AfterSeconds(u64),
    /// Files expire the given number of days after the policy is configured
    AfterDays(u32),
    /// Files expire at a fixed instant
    AtInstant(DateTime<Utc>),
    /// Files are expired as soon as they are created
    AlreadyExpired,
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self::AfterDays(7)
    }
}

impl ExpirationPolicy {
    /// Absolute expiration instant relative to `now`
    pub fn resolve(&self, now: SystemTime) -> SystemTime {
        let never = UNIX_EPOCH + Duration::from_secs(NEVER_EXPIRES_SECS);
        match *self {
            Self::Never => never,
            Self::AfterSeconds(secs) => now
                .checked_add(Duration::from_secs(secs))
                .unwrap_or(never),
            Self::AfterDays(days) => now
                .checked_add(Duration::from_secs(u64::from(days) * SECONDS_PER_DAY))
                .unwrap_or(never),
            Self::AtInstant(instant) => SystemTime::from(instant),
            Self::AlreadyExpired => UNIX_EPOCH,
        }
    }
}

/// Snapshot of the manager state handed to newly opened handlers
#[derive(Debug, Clone)]
pub struct ManagerState {
    pub directory: PathBuf,
    pub expiration: SystemTime,
    pub media_extension: String,
    pub package_size: u64,
    pub locking: LockingMode,
}

/// Cache root, expiration and housekeeping shared by every handler
#[derive(Debug)]
pub struct CacheManager {
    state: RwLock<ManagerState>,
}

impl CacheManager {
    /// Create a manager rooted at `directory` with the default seven day expiration
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            state: RwLock::new(ManagerState {
                directory: directory.into(),
                expiration: ExpirationPolicy::default().resolve(SystemTime::now()),
                media_extension: DEFAULT_MEDIA_EXTENSION.to_string(),
                package_size: DEFAULT_PACKAGE_SIZE,
                locking: LockingMode::default(),
            }),
        }
    }

    /// Process-wide manager, expected to be configured once at startup
    pub fn global() -> &'static CacheManager {
        &GLOBAL_MANAGER
    }

    pub fn configure_directory(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        info!("Cache directory set to {:?}", path);
        self.state.write().directory = path;
    }

    /// Resolve `policy` against the current time; all files created afterwards share it
    pub fn configure_expiration(&self, policy: ExpirationPolicy) {
        let expiration = policy.resolve(SystemTime::now());
        info!(
            "Cache expiration set to {:?} ({})",
            policy,
            DateTime::<Utc>::from(expiration).to_rfc3339()
        );
        self.state.write().expiration = expiration;
    }

    pub fn configure_package_size(&self, package_size: u64) {
        self.state.write().package_size = package_size;
    }

    pub fn configure_locking(&self, locking: LockingMode) {
        self.state.write().locking = locking;
    }

    pub fn configure_media_extension(&self, extension: impl Into<String>) {
        self.state.write().media_extension = extension.into();
    }

    pub fn directory(&self) -> PathBuf {
        self.state.read().directory.clone()
    }

    pub fn expiration_instant(&self) -> SystemTime {
        self.state.read().expiration
    }

    pub fn snapshot(&self) -> ManagerState {
        self.state.read().clone()
    }

    /// Path of the cached bytes for `key`
    pub fn path_for(&self, key: &ResourceKey) -> PathBuf {
        self.state.read().directory.join(key.to_filename())
    }

    /// Path of the configuration sidecar for `key`
    pub fn configuration_path_for(&self, key: &ResourceKey) -> PathBuf {
        sidecar_path(&self.path_for(key))
    }

    /// Load the persisted configuration for `key` without opening a handler
    pub fn cached_configuration(&self, key: &ResourceKey) -> Result<CacheConfiguration> {
        let path = self.configuration_path_for(key);
        if !path.exists() {
            return Ok(CacheConfiguration::default());
        }
        CacheConfiguration::read_from(&path)
    }

    /// Allocated size of the regular files directly under the cache root.
    ///
    /// Failures are swallowed: an unreadable directory or entry counts as zero.
    pub fn total_cached_size(&self) -> u64 {
        let directory = self.directory();
        let entries = match fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list cache directory {:?}: {}", directory, e);
                return 0;
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| !is_hidden(entry))
            .filter_map(|entry| entry.metadata().ok())
            .filter(|metadata| metadata.is_file())
            .map(|metadata| allocated_size(&metadata))
            .sum()
    }

    /// Remove every entry under the cache root.
    ///
    /// Fails only when the directory cannot be listed; a missing directory is already empty.
    pub fn purge_all(&self) -> Result<()> {
        let directory = self.directory();
        let Some(entries) = list_directory(&directory)? else {
            return Ok(());
        };

        let mut removed = 0;
        for entry in entries.filter_map(|entry| entry.ok()) {
            let path = entry.path();
            let result = match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => fs::remove_dir_all(&path),
                _ => fs::remove_file(&path),
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove cache entry {:?}: {}", path, e),
            }
        }

        info!("Purged {} entries from cache directory {:?}", removed, directory);
        Ok(())
    }

    /// Delete cached media files whose expiration instant has passed, with their sidecars.
    ///
    /// Returns the number of media files removed. Fails only when the directory cannot be
    /// listed; per-file failures are logged and skipped.
    pub fn sweep_expired(&self) -> Result<usize> {
        let (directory, extension) = {
            let state = self.state.read();
            (state.directory.clone(), state.media_extension.clone())
        };
        let Some(entries) = list_directory(&directory)? else {
            return Ok(0);
        };

        let now = SystemTime::now();
        let mut removed = 0;

        for entry in entries.filter_map(|entry| entry.ok()) {
            if is_hidden(&entry) {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(extension.as_str()) {
                continue;
            }

            let expires_at = match entry.metadata().and_then(|metadata| metadata.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!("Failed to read modification time of {:?}: {}", path, e);
                    continue;
                }
            };
            if expires_at >= now {
                continue;
            }

            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove expired cache file {:?}: {}", path, e);
                continue;
            }
            removed += 1;
            debug!("Removed expired cache file {:?}", path);

            let sidecar = sidecar_path(&path);
            if sidecar.exists()
                && let Err(e) = fs::remove_file(&sidecar)
            {
                warn!("Failed to remove cache configuration {:?}: {}", sidecar, e);
            }
        }

        if removed > 0 {
            info!("Expired cache sweep removed {} files from {:?}", removed, directory);
        }
        Ok(removed)
    }
}

fn list_directory(directory: &Path) -> Result<Option<fs::ReadDir>> {
    match fs::read_dir(directory) {
        Ok(entries) => Ok(Some(entries)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Cache directory {:?} does not exist yet", directory);
            Ok(None)
        }
        Err(source) => Err(CacheError::DirectoryListing {
            path: directory.to_path_buf(),
            source,
        }),
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

#[cfg(unix)]
fn allocated_size(metadata: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    // st_blocks is always counted in 512-byte units
    metadata.blocks() * 512
}

#[cfg(not(unix))]
fn allocated_size(metadata: &fs::Metadata) -> u64 {
    metadata.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn create_test_manager() -> (CacheManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let manager = CacheManager::new(temp_dir.path());
        (manager, temp_dir)
    }

    fn touch(path: &Path, len: usize, modified: SystemTime) {
        fs::write(path, vec![7u8; len]).unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(modified).unwrap();
    }

    #[test]
    fn test_expiration_policy_resolution() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        assert_eq!(
            ExpirationPolicy::AfterSeconds(30).resolve(now),
            now + Duration::from_secs(30)
        );
        assert_eq!(
            ExpirationPolicy::AfterDays(2).resolve(now),
            now + Duration::from_secs(2 * SECONDS_PER_DAY)
        );
        assert_eq!(ExpirationPolicy::AlreadyExpired.resolve(now), UNIX_EPOCH);
        assert!(
            ExpirationPolicy::Never.resolve(now)
                > now + Duration::from_secs(300 * 365 * SECONDS_PER_DAY)
        );

        let instant = DateTime::parse_from_rfc3339("2031-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            ExpirationPolicy::AtInstant(instant).resolve(now),
            SystemTime::from(instant)
        );
    }

    #[test]
    fn test_path_for_is_stable() {
        let (manager, temp_dir) = create_test_manager();
        let key = ResourceKey::parse("https://example.com/videos/intro.mp4").unwrap();

        let first = manager.path_for(&key);
        let again = ResourceKey::parse("https://example.com/videos/intro.mp4").unwrap();
        let second = manager.path_for(&again);
        assert_eq!(first, second);
        assert_eq!(first.parent(), Some(temp_dir.path()));
        assert_eq!(first.extension().and_then(|e| e.to_str()), Some("mp4"));

        let sidecar = manager.configuration_path_for(&key);
        assert_eq!(
            sidecar.file_name().unwrap().to_string_lossy(),
            format!("{}.cfg", key.to_filename())
        );
    }

    #[test]
    fn test_configure_expiration_moves_the_instant() {
        let (manager, _temp_dir) = create_test_manager();
        manager.configure_expiration(ExpirationPolicy::AlreadyExpired);
        assert_eq!(manager.expiration_instant(), UNIX_EPOCH);

        manager.configure_expiration(ExpirationPolicy::AfterSeconds(3600));
        assert!(manager.expiration_instant() > SystemTime::now());
    }

    #[test]
    fn test_relative_policy_is_resolved_once() {
        use crate::cache::handler::CacheHandler;

        let (manager, _temp_dir) = create_test_manager();
        manager.configure_expiration(ExpirationPolicy::AfterSeconds(3600));

        let first = ResourceKey::parse("https://example.com/videos/first.mp4").unwrap();
        let second = ResourceKey::parse("https://example.com/videos/second.mp4").unwrap();
        drop(CacheHandler::open_in(&manager, &first).unwrap());
        std::thread::sleep(Duration::from_millis(1100));
        drop(CacheHandler::open_in(&manager, &second).unwrap());

        let modified = |key: &ResourceKey| {
            fs::metadata(manager.path_for(key))
                .unwrap()
                .modified()
                .unwrap()
        };
        assert_eq!(modified(&first), modified(&second));
    }

    #[test]
    fn test_total_cached_size_skips_directories() {
        let (manager, temp_dir) = create_test_manager();
        assert_eq!(manager.total_cached_size(), 0);

        touch(&temp_dir.path().join("a.mp4"), 4096, SystemTime::now());
        fs::create_dir(temp_dir.path().join("nested")).unwrap();
        let nested: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        fs::write(temp_dir.path().join("nested").join("b.mp4"), nested).unwrap();

        let size = manager.total_cached_size();
        assert!(size > 0);
        assert!(size < 1024 * 1024, "nested file counted: {}", size);
    }

    #[test]
    fn test_total_cached_size_of_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CacheManager::new(temp_dir.path().join("missing"));
        assert_eq!(manager.total_cached_size(), 0);
    }

    #[test]
    fn test_purge_all() {
        let (manager, temp_dir) = create_test_manager();
        touch(&temp_dir.path().join("a.mp4"), 10, SystemTime::now());
        touch(&temp_dir.path().join("a.mp4.cfg"), 10, SystemTime::now());
        fs::create_dir(temp_dir.path().join("nested")).unwrap();

        manager.purge_all().unwrap();

        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_purge_missing_directory_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CacheManager::new(temp_dir.path().join("missing"));
        assert!(manager.purge_all().is_ok());
    }

    #[test]
    fn test_purge_unlistable_path_fails() {
        let (manager, temp_dir) = create_test_manager();
        let file = temp_dir.path().join("plain-file");
        fs::write(&file, b"x").unwrap();
        manager.configure_directory(&file);

        let err = manager.purge_all().unwrap_err();
        assert!(matches!(err, CacheError::DirectoryListing { .. }));
    }

    #[test]
    fn test_sweep_expired() {
        let (manager, temp_dir) = create_test_manager();
        let past = SystemTime::now() - Duration::from_secs(3600);
        let future = SystemTime::now() + Duration::from_secs(3600);

        let expired = temp_dir.path().join("expired.mp4");
        let fresh = temp_dir.path().join("fresh.mp4");
        let other = temp_dir.path().join("old.webm");
        touch(&expired, 10, past);
        touch(&sidecar_path(&expired), 10, SystemTime::now());
        touch(&fresh, 10, future);
        touch(&sidecar_path(&fresh), 10, SystemTime::now());
        touch(&other, 10, past);

        let removed = manager.sweep_expired().unwrap();

        assert_eq!(removed, 1);
        assert!(!expired.exists());
        assert!(!sidecar_path(&expired).exists());
        assert!(fresh.exists());
        assert!(sidecar_path(&fresh).exists());
        assert!(other.exists(), "only the media extension is swept");
    }

    #[test]
    fn test_sweep_respects_configured_extension() {
        let (manager, temp_dir) = create_test_manager();
        manager.configure_media_extension("webm");
        let past = SystemTime::now() - Duration::from_secs(60);

        let webm = temp_dir.path().join("old.webm");
        let mp4 = temp_dir.path().join("old.mp4");
        touch(&webm, 10, past);
        touch(&mp4, 10, past);

        assert_eq!(manager.sweep_expired().unwrap(), 1);
        assert!(!webm.exists());
        assert!(mp4.exists());
    }

    #[test]
    fn test_cached_configuration_defaults_when_missing() {
        let (manager, _temp_dir) = create_test_manager();
        let key = ResourceKey::parse("https://example.com/none.mp4").unwrap();
        let configuration = manager.cached_configuration(&key).unwrap();
        assert!(configuration.fragments.is_empty());
        assert!(configuration.info.is_none());
    }
}
