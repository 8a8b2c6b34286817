pub mod fragments;
pub mod handler;
pub mod key;
pub mod manager;
pub mod metadata;
pub mod planner;
pub mod range;


pub use fragments::FragmentIndex;
pub use handler::{CacheHandler, LockingMode};
pub use key::ResourceKey;
pub use manager::{CacheManager, ExpirationPolicy, ManagerState};
pub use metadata::{CacheConfiguration, ResourceInfo, sidecar_path};
pub use planner::{CacheAction, DEFAULT_PACKAGE_SIZE, plan_actions};
pub use range::ByteRange;
