use std::env::current_exe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use directories_next::ProjectDirs;
use tokio::fs;
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{debug, info, warn};
use std::fs::OpenOptions;
use std::str;

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path to <exe name>.json in the same directory as the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\bledob-control.exe => F:\bledob-control.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to bledob-control.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("io", "bledob", "bledob-control").map(|dirs| {
        dirs.config_dir().join("bledob-control.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        match std::fs::metadata(&path) {
            Ok(attr) => {
                if attr.is_file() {
                    return Ok(path);
                }
            }
            Err(err) => {
                debug!("Could not read metadata of: {}; Using local path instead. ({:?})", path.to_string_lossy(), err);
            },
        }
    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

/// Holds the lock file next to the config file. Locking it makes sure the config file is used by
/// only one instance of this application.
pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        match self.rw_lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(source) => Err(ConfigError::CanNotLock { source }),
        }
    }
}

/// Reads and writes the preferences document at one path. Saves replace the file atomically.
#[derive(Debug, Clone)]
pub struct ConfigIO {
    path: Arc<PathBuf>,
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

impl ConfigIO {
    /// Opens the config file at its standard (or portable) location.
    pub fn new_sync() -> Result<Self, ConfigError> {
        let path = get_config_path()?;
        Self::open_sync(&path)
    }

    pub fn open_sync(path: &Path) -> Result<Self, ConfigError> {
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        Ok(ConfigIO { path: Arc::new(path.to_path_buf()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn locker(&self) -> Result<ConfigIOLocker, ConfigError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(sibling_path(&self.path, ".lock"))?;

        Ok(ConfigIOLocker { rw_lock: RwLock::new(file) })
    }

    /// Reads the document. A missing file is an [`ConfigError::IOError`] of kind `NotFound`, an
    /// empty file reads as the defaults.
    pub async fn read(&self) -> Result<Config, ConfigError> {
        debug!("Reading config file");
        let content = fs::read(self.path.as_path()).await?;

        if content.is_empty() {
            return Ok(Config::default());
        }

        let content = str::from_utf8(&content)?;
        let config: Config = serde_json::from_str(content)?;
        Ok(config)
    }

    pub async fn save(&self, config: Config) -> Result<(), ConfigError> {
        debug!("Saving config");
        let content = serde_json::to_string_pretty(&config)?;

        let temporary = sibling_path(&self.path, ".tmp");
        fs::write(&temporary, content.as_bytes()).await?;
        fs::rename(&temporary, self.path.as_path()).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn temp_config_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir()
        .join(format!("bledob-control-test-{}", std::process::id()))
        .join(format!("{}.json", name));
    if let Some(directory) = path.parent() {
        let _ = std::fs::create_dir_all(directory);
    }
    let _ = std::fs::remove_file(&path);
    path
}
