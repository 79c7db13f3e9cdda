//! Configuration Management Module
//!
//! Handles persistent storage of Lagoon instance profiles, the default and
//! current profile pointers, and CLI feature switches.

pub mod storage;
pub mod store;
pub mod types;

pub use storage::{config_file, ConfigStorage, StorageError, CONFIG_FILE_NAME};
pub use store::{ProfileStore, StoreError};
pub use types::{Auxiliary, ConfigFile, FeatureFlags, Profile, ProfileFields};
