//! Configuration management for migrate-doctor
//!
//! Stores settings in ~/.config/migrate-doctor/config.json. Every field has a
//! default, so a missing or partial file is fine.

use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR_NAME: &str = "migrate-doctor";
const CONFIG_FILE_NAME: &str = "config.json";
const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
const KEYRING_SERVICE: &str = "migrate-doctor";
const KEYRING_USERNAME: &str = "openrouter_api_key";

pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.5";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model id sent to the reasoning provider
    pub model: String,
    /// Reasoning iterations allowed per agent run
    pub max_iterations: u32,
    /// Approximate token ceiling per agent run
    pub max_token_budget: u64,
    /// Fast-path diagnoses at or above this confidence skip the agent
    pub fast_path_threshold: f64,
    /// Max tokens requested per completion
    pub max_completion_tokens: u32,
    pub request_timeout_secs: u64,
    pub tools: ToolConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_iterations: 15,
            max_token_budget: 500_000,
            fast_path_threshold: 0.9,
            max_completion_tokens: 8192,
            request_timeout_secs: 90,
            tools: ToolConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Byte ceiling for un-ranged `readFile` output
    pub read_file_max_bytes: usize,
    /// Line cap for `searchCode` output
    pub search_max_results: usize,
    pub list_max_entries: usize,
    pub command_timeout_ms: u64,
    /// Bytes kept from each of stdout/stderr of `runCommand`
    pub command_max_output_bytes: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            read_file_max_bytes: 15_000,
            search_max_results: 50,
            list_max_entries: 500,
            command_timeout_ms: 60_000,
            command_max_output_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_age_hours: u64,
    /// Directory (relative to the project root) holding cache entries
    pub dir_name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_hours: 24,
            dir_name: ".migrate-doctor-cache".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours.saturating_mul(3600))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_ms: 1000,
        }
    }
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR_NAME))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join(CONFIG_FILE_NAME))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from an explicit path. A corrupt file is moved aside and defaults are used.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    /// Get the OpenRouter API key (from environment or keychain)
    pub fn api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                return Some(key);
            }
        }

        match read_keyring_key() {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "failed to read API key from system keychain; set {} instead",
                    API_KEY_ENV
                );
                None
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn read_keyring_key() -> Result<Option<String>, keyring::Error> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)?;
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err),
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}
