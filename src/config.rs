use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::error::{NoteError, NoteResult};
use crate::models::Config;

/// Debounce delay for config saves (1 second)
const SAVE_DEBOUNCE_MS: u64 = 1000;

/// Environment variable that overrides the configured API base URL
pub const API_URL_ENV: &str = "NOTESYNC_API_URL";

const CONFIG_DIR_NAME: &str = "notesync";
const CONFIG_FILE_NAME: &str = "config.json";

/// ConfigManager handles loading, saving, and updating the sync configuration.
///
/// Features:
/// - Thread-safe access via RwLock
/// - Debounced saving to avoid excessive disk writes
/// - Merges saved config with defaults for missing fields
/// - `NOTESYNC_API_URL` overrides the stored API base URL
pub struct ConfigManager {
    /// The current configuration, shared with the debounced save task
    config: Arc<RwLock<Config>>,
    /// Path to the configuration file
    config_path: Arc<PathBuf>,
    /// Handle to the debounced save task
    save_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Location of `config.json` in the platform configuration directory.
pub fn default_config_path() -> NoteResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or_else(|| NoteError::Config("No configuration directory on this platform".to_string()))
}

impl ConfigManager {
    /// Creates a new ConfigManager with the given config file path.
    ///
    /// Loads existing configuration from disk, merging with defaults for any
    /// missing fields, then applies the environment override.
    ///
    /// # Arguments
    /// * `config_path` - Path to the config.json file
    ///
    /// # Returns
    /// * `Ok(ConfigManager)` - A new ConfigManager instance
    /// * `Err(NoteError::Config)` - If reading or parsing fails
    pub fn new(config_path: PathBuf) -> NoteResult<Self> {
        let config = Self::load_from_file(&config_path)?;
        let config = apply_env_override(config, std::env::var(API_URL_ENV).ok());

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: Arc::new(config_path),
            save_handle: Mutex::new(None),
        })
    }

    /// Creates a ConfigManager backed by [`default_config_path`].
    pub fn load_default() -> NoteResult<Self> {
        Self::new(default_config_path()?)
    }

    /// Loads configuration from file, merging with defaults.
    ///
    /// If the file doesn't exist, returns default configuration.
    fn load_from_file(path: &Path) -> NoteResult<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| NoteError::Config(format!("Failed to read config file: {}", e)))?;
        merge_config_with_defaults(&content)
    }

    /// Gets a clone of the current configuration.
    pub fn get(&self) -> Config {
        read_config(&self.config)
    }

    /// Updates the configuration using a closure.
    ///
    /// The closure receives a mutable reference to the config and can modify it.
    /// Nothing is written to disk; see [`ConfigManager::update_and_save`].
    ///
    /// # Arguments
    /// * `f` - A closure that modifies the configuration
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut config);
    }

    /// Schedules a debounced save operation.
    ///
    /// If a save is already scheduled, it will be cancelled and a new one
    /// will be scheduled. The save will occur after SAVE_DEBOUNCE_MS milliseconds.
    pub async fn schedule_save(&self) {
        let mut handle_guard = self.save_handle.lock().await;

        if let Some(handle) = handle_guard.take() {
            handle.abort();
        }

        let config_ref = Arc::clone(&self.config);
        let path_ref = Arc::clone(&self.config_path);

        let handle = tokio::spawn(async move {
            sleep(Duration::from_millis(SAVE_DEBOUNCE_MS)).await;

            let config = read_config(&config_ref);
            if let Err(e) = write_config(&path_ref, &config) {
                log::warn!("Debounced config save failed: {}", e);
            }
        });

        *handle_guard = Some(handle);
    }

    /// Updates the configuration and schedules a debounced save.
    ///
    /// # Arguments
    /// * `f` - A closure that modifies the configuration
    pub async fn update_and_save<F>(&self, f: F)
    where
        F: FnOnce(&mut Config),
    {
        self.update(f);
        self.schedule_save().await;
    }

    /// Saves the configuration to disk immediately.
    ///
    /// # Returns
    /// * `Ok(())` - If save was successful
    /// * `Err(NoteError::Config)` - If serializing or writing fails
    pub fn save_sync(&self) -> NoteResult<()> {
        write_config(&self.config_path, &self.get())
    }

    /// Returns the config file path.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

fn read_config(config: &RwLock<Config>) -> Config {
    config
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn write_config(path: &Path, config: &Config) -> NoteResult<()> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| NoteError::Config(format!("Failed to serialize config: {}", e)))?;

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| NoteError::Config(format!("Failed to create config directory: {}", e)))?;
    }
    fs::write(path, content)
        .map_err(|e| NoteError::Config(format!("Failed to write config file: {}", e)))
}

/// Replaces the API base URL when the override is set and non-empty.
pub fn apply_env_override(mut config: Config, api_url: Option<String>) -> Config {
    if let Some(url) = api_url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) {
        log::debug!("Using API base URL from {}", API_URL_ENV);
        config.api_base_url = url;
    }
    config
}

/// Merges a partial config JSON with defaults.
///
/// Missing fields, and fields of the wrong type, keep their default values.
///
/// # Arguments
/// * `partial_json` - JSON string with partial configuration
///
/// # Returns
/// * `Ok(Config)` - The merged configuration
/// * `Err(NoteError::Config)` - If the text is not JSON
pub fn merge_config_with_defaults(partial_json: &str) -> NoteResult<Config> {
    if partial_json.trim().is_empty() {
        return Ok(Config::default());
    }

    let json_value: serde_json::Value = serde_json::from_str(partial_json)
        .map_err(|e| NoteError::Config(format!("Failed to parse config: {}", e)))?;

    let mut config = Config::default();

    if let Some(obj) = json_value.as_object() {
        if let Some(v) = obj.get("api_base_url").and_then(|v| v.as_str()) {
            config.api_base_url = v.to_string();
        }
        if let Some(v) = obj.get("poll_interval_secs").and_then(|v| v.as_u64()) {
            config.poll_interval_secs = v;
        }
        if let Some(v) = obj.get("request_timeout_secs").and_then(|v| v.as_u64()) {
            config.request_timeout_secs = v;
        }
        if let Some(v) = obj.get("log_filter").and_then(|v| v.as_str()) {
            config.log_filter = v.to_string();
        }
    }

    Ok(config)
}
