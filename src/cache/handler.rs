use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use super::key::ResourceKey;
use super::manager::CacheManager;
use super::metadata::{CacheConfiguration, ResourceInfo, sidecar_path};
use super::planner::{CacheAction, plan_actions};
use super::range::ByteRange;
use crate::error::{CacheError, Result};

/// Upper bound on the buffer preallocated for a single read
const MAX_READ_PREALLOCATION: u64 = 8 * 1024 * 1024;

/// How `read` relates to the write path of the same handler.
///
/// With `Independent` (the default) reads and writes only serialize against their own
/// kind, so a read overlapping an in-flight write may observe a torn write. `Exclusive`
/// makes reads also take the write lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockingMode {
    #[default]
    Independent,
    Exclusive,
}

/// Cached bytes and metadata of one resource during a playback or prefetch session.
///
/// Two handlers opened for the same key share no lock.
#[derive(Debug)]
pub struct CacheHandler {
    key: ResourceKey,
    file_path: PathBuf,
    configuration_path: PathBuf,
    package_size: u64,
    locking: LockingMode,
    configuration: RwLock<CacheConfiguration>,
    reader: Mutex<File>,
    writer: Mutex<File>,
}

impl CacheHandler {
    /// Open the cache for `key` using the process-wide [`CacheManager`]
    pub fn open(key: &ResourceKey) -> Result<Self> {
        Self::open_in(CacheManager::global(), key)
    }

    /// Open the cache for `key` under `manager`'s directory and expiration policy.
    ///
    /// A newly created backing file gets the manager's expiration instant as its
    /// modification time.
    pub fn open_in(manager: &CacheManager, key: &ResourceKey) -> Result<Self> {
        let state = manager.snapshot();
        let file_path = state.directory.join(key.to_filename());
        let configuration_path = sidecar_path(&file_path);

        fs::create_dir_all(&state.directory).map_err(|source| {
            warn!("Failed to create cache directory {:?}: {}", state.directory, source);
            CacheError::Initialization {
                path: state.directory.clone(),
                source,
            }
        })?;

        let created = create_backing_file(&file_path, state.expiration).map_err(|source| {
            warn!("Failed to create cache file {:?}: {}", file_path, source);
            CacheError::Initialization {
                path: file_path.clone(),
                source,
            }
        })?;

        // A fresh byte file holds nothing, whatever a leftover sidecar claims
        let configuration = if created {
            discard_stale_sidecar(&configuration_path);
            CacheConfiguration::default()
        } else {
            CacheConfiguration::load(&configuration_path)
        };

        let open_error = |source| CacheError::Initialization {
            path: file_path.clone(),
            source,
        };
        let reader = File::open(&file_path).map_err(open_error)?;
        let writer = OpenOptions::new()
            .write(true)
            .open(&file_path)
            .map_err(open_error)?;

        info!(
            "Opened cache handler for {} at {:?} ({} fragments)",
            key,
            file_path,
            configuration.fragments.len()
        );

        Ok(Self {
            key: key.clone(),
            file_path,
            configuration_path,
            package_size: state.package_size,
            locking: state.locking,
            configuration: RwLock::new(configuration),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        })
    }

    /// Local/remote steps needed to serve `range` from the current cache state
    pub fn plan_actions(&self, range: ByteRange) -> Vec<CacheAction> {
        let configuration = self.configuration.read();
        plan_actions(
            range,
            &configuration.fragments,
            configuration.info.as_ref(),
            self.package_size,
        )
    }

    /// Store fetched bytes at `range.offset` and record them as cached.
    ///
    /// On failure the fragment index is left unchanged and the range stays uncached.
    pub fn write(&self, data: &[u8], range: ByteRange) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let written = ByteRange::new(range.offset, data.len() as u64);
        if written.length != range.length {
            warn!(
                "Cache write for {} carries {} bytes, recording {}",
                range, written.length, written
            );
        }

        let mut writer = self.writer.lock();
        with_preserved_mtime(&mut writer, &self.file_path, |file| {
            file.seek(SeekFrom::Start(written.offset))?;
            file.write_all(data)
        })
        .map_err(|source| {
            warn!("Failed to write {} to {:?}: {}", written, self.file_path, source);
            CacheError::Write {
                offset: written.offset,
                source,
            }
        })?;

        self.configuration.write().add_fragment(written);
        Ok(())
    }

    /// Read `range` from the cache file; shorter than requested if the file ends first
    pub fn read(&self, range: ByteRange) -> Result<Vec<u8>> {
        let _write_guard = match self.locking {
            LockingMode::Exclusive => Some(self.writer.lock()),
            LockingMode::Independent => None,
        };
        let mut reader = self.reader.lock();

        let read_error = |source| CacheError::Read {
            offset: range.offset,
            source,
        };
        reader
            .seek(SeekFrom::Start(range.offset))
            .map_err(read_error)?;

        let mut buffer = Vec::with_capacity(range.length.min(MAX_READ_PREALLOCATION) as usize);
        Read::take(&mut *reader, range.length)
            .read_to_end(&mut buffer)
            .map_err(read_error)?;

        Ok(buffer)
    }

    /// Record the resource's length and type, truncating the cache file to that length
    pub fn set_resource_info(&self, info: ResourceInfo) -> Result<()> {
        let mut writer = self.writer.lock();
        let content_length = info.content_length;

        with_preserved_mtime(&mut writer, &self.file_path, |file| {
            file.set_len(content_length)?;
            file.sync_all()
        })?;

        let mut configuration = self.configuration.write();
        configuration.set_info(info);
        configuration.save(&self.configuration_path)?;

        info!(
            "Resource info for {}: {} bytes, {}",
            self.key,
            content_length,
            configuration
                .info
                .as_ref()
                .map(|info| info.content_type.as_str())
                .unwrap_or_default()
        );
        Ok(())
    }

    /// Flush the cache file and persist the configuration sidecar
    pub fn save(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        with_preserved_mtime(&mut writer, &self.file_path, |file| file.sync_all())?;
        self.configuration.read().save(&self.configuration_path)
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn configuration_path(&self) -> &Path {
        &self.configuration_path
    }

    pub fn package_size(&self) -> u64 {
        self.package_size
    }

    pub fn locking(&self) -> LockingMode {
        self.locking
    }

    /// Snapshot of the in-memory configuration, including unsaved fragments
    pub fn configuration(&self) -> CacheConfiguration {
        self.configuration.read().clone()
    }

    pub fn resource_info(&self) -> Option<ResourceInfo> {
        self.configuration.read().info.clone()
    }
}

impl Drop for CacheHandler {
    fn drop(&mut self) {
        if let Err(e) = self.writer.get_mut().sync_data() {
            warn!("Failed to flush cache file {:?}: {}", self.file_path, e);
        }
        debug!("Closed cache handler for {}", self.key);
    }
}

/// Create the backing file with `expiration` as its modification time, if it does not exist.
///
/// Returns `true` when the file was created by this call.
fn create_backing_file(path: &Path, expiration: SystemTime) -> io::Result<bool> {
    let file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };

    if let Err(e) = file.set_modified(expiration) {
        warn!("Failed to stamp expiration on new cache file {:?}: {}", path, e);
    }
    debug!("Created cache file {:?}", path);
    Ok(true)
}

fn discard_stale_sidecar(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => warn!("Discarded sidecar {:?} left without its cache file", path),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove stale sidecar {:?}: {}", path, e),
    }
}

/// Run `op` on `file` and put its modification time back afterwards.
///
/// The modification time of a cache file is its expiration marker, so every write path
/// goes through here.
fn with_preserved_mtime<T>(
    file: &mut File,
    path: &Path,
    op: impl FnOnce(&mut File) -> io::Result<T>,
) -> io::Result<T> {
    let modified = match file.metadata().and_then(|metadata| metadata.modified()) {
        Ok(modified) => Some(modified),
        Err(e) => {
            warn!("Failed to read modification time of {:?}: {}", path, e);
            None
        }
    };

    let result = op(file);

    if let Some(modified) = modified
        && let Err(e) = file.set_modified(modified)
    {
        warn!("Failed to restore modification time of {:?}: {}", path, e);
    }

    result
}
