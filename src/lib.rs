// Byte-range disk cache for streamed media resources.
// The CLI in src/main.rs is a thin wrapper over this library.

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{
    ByteRange, CacheAction, CacheConfiguration, CacheHandler, CacheManager, ExpirationPolicy,
    FragmentIndex, LockingMode, ResourceInfo, ResourceKey,
};
pub use config::CacheSettings;
pub use error::{CacheError, Result};
