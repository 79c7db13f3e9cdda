//! Configuration Storage
//!
//! Handles reading/writing the profile file to disk.
//! Config location: ~/.lagoon.yml unless `--config-file` points elsewhere.

use std::path::{Path, PathBuf};
use std::io::Write;
use tokio::fs;

use super::types::ConfigFile;

/// Default config file name inside the home directory
pub const CONFIG_FILE_NAME: &str = ".lagoon.yml";

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine home directory")]
    NoConfigDir,

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config file {path} is not valid YAML: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Get the default config file path (~/.lagoon.yml)
pub fn config_file() -> Result<PathBuf, StorageError> {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_FILE_NAME))
        .ok_or(StorageError::NoConfigDir)
}

/// Configuration storage manager
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    /// Create a new storage manager with default path
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            path: config_file()?,
        })
    }

    /// Create storage manager with custom path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ensure the config directory exists
    async fn ensure_dir(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }
        Ok(())
    }

    /// Load configuration from disk
    ///
    /// Returns an empty config if the file doesn't exist. A file that fails
    /// to parse is backed up and reported; it is never replaced by defaults.
    pub async fn load(&self) -> Result<ConfigFile, StorageError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {:?}, starting empty", self.path);
                return Ok(ConfigFile::default());
            }
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };

        if contents.trim().is_empty() {
            return Ok(ConfigFile::default());
        }

        serde_yaml::from_str::<ConfigFile>(&contents).map_err(|source| {
            tracing::warn!("Config file corrupted: {}", source);
            match self.backup_blocking() {
                Ok(backup_path) => {
                    tracing::warn!("Corrupted config backed up to {:?}", backup_path)
                }
                Err(backup_err) => {
                    tracing::error!("Failed to backup corrupted config: {}", backup_err)
                }
            }
            StorageError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })
    }

    /// Save configuration to disk
    ///
    /// Writes a uniquely named sibling temp file, syncs it, then renames it
    /// over the real file so readers only ever see a complete document.
    /// Concurrent writers never share a temp file; the last rename wins.
    pub async fn save(&self, config: &ConfigFile) -> Result<(), StorageError> {
        self.ensure_dir().await?;

        let yaml = serde_yaml::to_string(config)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, yaml.as_bytes()))
            .await
            .map_err(|e| StorageError::io(&self.path, std::io::Error::other(e)))??;

        tracing::debug!("Config flushed to {:?}", self.path);
        Ok(())
    }

    /// Get config file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy the current file aside as `<name>.backup.<timestamp>`
    fn backup_blocking(&self) -> std::io::Result<PathBuf> {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(
            ".backup.{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));
        let backup_path = PathBuf::from(name);
        std::fs::copy(&self.path, &backup_path)?;
        Ok(backup_path)
    }
}

/// Temp files are created owner-only (0600 on Unix); the file holds
/// bearer tokens.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut prefix = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| CONFIG_FILE_NAME.into());
    prefix.push(".");

    let mut temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| StorageError::io(dir, e))?;
    temp.write_all(contents)
        .map_err(|e| StorageError::io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io(temp.path(), e))?;

    // On failure the temp file is removed when the returned handle drops
    temp.persist(path)
        .map_err(|e| StorageError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Profile;
    use std::io::Write;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_nonexistent() {
        let temp = tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp.path().join("lagoon.yml"));

        let config = storage.load().await.unwrap();
        assert!(config.profiles.is_empty());
        assert_eq!(config.default, None);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp.path().join("nested/dir/lagoon.yml"));

        let mut config = ConfigFile::default();
        config
            .profiles
            .insert("local".to_string(), Profile::new("localhost", "2020", "http://localhost:3000/graphql"));
        config.default = Some("local".to_string());
        config.features.update_check_disable = true;

        storage.save(&config).await.unwrap();

        let loaded = storage.load().await.unwrap();
        assert_eq!(loaded, config);
        let leftovers: Vec<_> = std::fs::read_dir(storage.path().parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name())
            .filter(|name| name != "lagoon.yml")
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp.path().join("lagoon.yml"));
        storage.save(&ConfigFile::default()).await.unwrap();

        let mode = std::fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_backed_up_not_replaced() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("lagoon.yml");
        std::fs::write(&path, "profiles: [unclosed").unwrap();
        let storage = ConfigStorage::with_path(&path);

        let err = storage.load().await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));

        // Original untouched, one backup alongside it
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "profiles: [unclosed");
        let backups = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".backup."))
            .count();
        assert_eq!(backups, 1);
    }

    fn config_with_profiles(count: usize) -> ConfigFile {
        let mut config = ConfigFile::default();
        for i in 0..count {
            config.profiles.insert(
                format!("lagoon-{:02}", i),
                Profile::new(
                    format!("ssh-{}.example.com", i),
                    "32222",
                    format!("https://api-{}.example.com/graphql", i),
                ),
            );
        }
        config
    }

    #[tokio::test]
    async fn test_stale_temp_writer_cannot_corrupt_save() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("lagoon.yml");
        let storage = ConfigStorage::with_path(&path);

        // Another process still holds an open handle on a sibling temp file
        let mut other = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp.path().join("lagoon.yml.tmp"))
            .unwrap();

        let large = config_with_profiles(20);
        storage.save(&large).await.unwrap();

        let small = serde_yaml::to_string(&config_with_profiles(1)).unwrap();
        other.write_all(small.as_bytes()).unwrap();
        other.sync_all().unwrap();

        assert_eq!(storage.load().await.unwrap(), large);
    }

    #[tokio::test]
    async fn test_concurrent_saves_leave_one_complete_document() {
        let temp = tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp.path().join("lagoon.yml"));
        let large = config_with_profiles(20);
        let small = config_with_profiles(1);

        for _ in 0..10 {
            let (a, b) = tokio::join!(storage.save(&large), storage.save(&small));
            a.unwrap();
            b.unwrap();

            let loaded = storage.load().await.unwrap();
            assert!(loaded == large || loaded == small);
        }
    }
}
