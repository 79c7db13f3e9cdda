//! Profile Store
//!
//! In-memory view of the config file plus the mutations the CLI performs on
//! it. Every mutation flushes the whole document before returning. A failed
//! flush is reported, but the in-memory change stays visible so the caller
//! can decide whether to retry.

use tracing::{debug, info, warn};

use super::storage::{ConfigStorage, StorageError};
use super::types::{ConfigFile, FeatureFlags, Profile, ProfileFields};

/// Profile store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid profile: {0}")]
    Validation(String),

    #[error("Profile '{0}' does not exist")]
    NotFound(String),

    #[error("Failed to persist config: {0}")]
    Persistence(#[from] StorageError),
}

/// Named Lagoon profiles plus the `default` and `current` pointers
#[derive(Debug)]
pub struct ProfileStore {
    storage: ConfigStorage,
    config: ConfigFile,
}

impl ProfileStore {
    /// Load the store from `storage`
    ///
    /// Pointers naming profiles that are not in the file are dropped (and
    /// the file rewritten) so the store never holds a dangling reference.
    pub async fn open(storage: ConfigStorage) -> Result<Self, StoreError> {
        let mut config = storage.load().await?;
        let cleared = config.normalize();

        let store = Self { storage, config };
        if !cleared.is_empty() {
            warn!(
                "Cleared {} pointer(s) referencing missing profiles: {:?}",
                cleared.len(),
                cleared
            );
            store.flush().await?;
        }

        debug!(
            "Loaded {} profile(s) from {:?}",
            store.config.profiles.len(),
            store.storage.path()
        );
        Ok(store)
    }

    #[cfg(test)]
    fn from_parts(storage: ConfigStorage, config: ConfigFile) -> Self {
        Self { storage, config }
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.config.profiles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.config.profiles.contains_key(name)
    }

    /// All profiles, sorted by name
    pub fn list(&self) -> Vec<(&str, &Profile)> {
        self.config
            .profiles
            .iter()
            .map(|(name, profile)| (name.as_str(), profile))
            .collect()
    }

    pub fn default_profile(&self) -> Option<&str> {
        self.config.default.as_deref()
    }

    pub fn current_profile(&self) -> Option<&str> {
        self.config.current.as_deref()
    }

    pub fn features(&self) -> FeatureFlags {
        self.config.features
    }

    /// Merge the supplied fields into `name`, creating it if it is new.
    ///
    /// Empty fields are ignored. Creating a profile requires hostname, port
    /// and API endpoint; a supplied port must be a valid TCP port.
    pub async fn upsert(&mut self, name: &str, fields: ProfileFields) -> Result<&Profile, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation("profile name must not be empty".to_string()));
        }
        if let Some(port) = ProfileFields::supplied(&fields.port) {
            if port.parse::<u16>().map_or(true, |p| p == 0) {
                return Err(StoreError::Validation(format!(
                    "port '{}' is not a valid TCP port",
                    port
                )));
            }
        }

        match self.config.profiles.get_mut(name) {
            Some(profile) => {
                merge_fields(profile, &fields);
                debug!("Updated profile '{}'", name);
            }
            None => {
                let required = (
                    ProfileFields::supplied(&fields.hostname),
                    ProfileFields::supplied(&fields.port),
                    ProfileFields::supplied(&fields.api_endpoint),
                );
                let (Some(hostname), Some(port), Some(api_endpoint)) = required else {
                    return Err(StoreError::Validation(format!(
                        "new profile '{}' needs hostname, port and API endpoint",
                        name
                    )));
                };
                let mut profile = Profile::new(hostname, port, api_endpoint);
                merge_fields(&mut profile, &fields);
                self.config.profiles.insert(name.to_string(), profile);
                info!("Added profile '{}'", name);
            }
        }

        self.flush().await?;
        Ok(&self.config.profiles[name])
    }

    /// Remove `name`, clearing `default`/`current` if they pointed at it
    pub async fn delete(&mut self, name: &str) -> Result<Profile, StoreError> {
        let name = name.trim();
        let removed = self
            .config
            .profiles
            .remove(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        if self.config.default.as_deref() == Some(name) {
            info!("Deleted profile '{}' was the default, clearing it", name);
            self.config.default = None;
        }
        if self.config.current.as_deref() == Some(name) {
            info!("Deleted profile '{}' was current, clearing it", name);
            self.config.current = None;
        }

        self.flush().await?;
        Ok(removed)
    }

    pub async fn set_default(&mut self, name: &str) -> Result<(), StoreError> {
        self.ensure_exists(name)?;
        self.config.default = Some(name.to_string());
        self.flush().await
    }

    pub async fn set_current(&mut self, name: &str) -> Result<(), StoreError> {
        self.ensure_exists(name)?;
        self.config.current = Some(name.to_string());
        self.flush().await
    }

    /// Drop the cached token for `name` so the next request re-authenticates
    pub async fn clear_token(&mut self, name: &str) -> Result<(), StoreError> {
        let profile = self
            .config
            .profiles
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        if profile.token.take().is_none() {
            return Ok(());
        }
        self.flush().await
    }

    pub async fn set_features(&mut self, features: FeatureFlags) -> Result<(), StoreError> {
        self.config.features = features;
        self.flush().await
    }

    /// Persist the whole document atomically
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.storage.save(&self.config).await?;
        Ok(())
    }

    fn ensure_exists(&self, name: &str) -> Result<(), StoreError> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(StoreError::NotFound(name.to_string()))
        }
    }
}

fn merge_fields(profile: &mut Profile, fields: &ProfileFields) {
    if let Some(v) = ProfileFields::supplied(&fields.hostname) {
        profile.hostname = v.to_string();
    }
    if let Some(v) = ProfileFields::supplied(&fields.port) {
        profile.port = v.to_string();
    }
    if let Some(v) = ProfileFields::supplied(&fields.api_endpoint) {
        profile.api_endpoint = v.to_string();
    }
    if let Some(v) = ProfileFields::supplied(&fields.ui) {
        profile.auxiliary.ui = Some(v.to_string());
    }
    if let Some(v) = ProfileFields::supplied(&fields.logs) {
        profile.auxiliary.logs = Some(v.to_string());
    }
    if let Some(v) = ProfileFields::supplied(&fields.token) {
        profile.token = Some(v.to_string());
    }
}
