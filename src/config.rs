//! Configuration management for codeloop
//!
//! Stores settings in ~/.config/codeloop/config.json

use crate::keyring;
use crate::language::Language;
use crate::remote::HttpOptions;
use crate::store::{preserve_corrupt_file, SnippetStore, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_SERVICE_URL: &str = "http://127.0.0.1:8000";

const ENV_SERVICE_URL: &str = "CODELOOP_SERVICE_URL";
const ENV_STORE: &str = "CODELOOP_STORE";
const ENV_API_TOKEN: &str = "CODELOOP_API_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the code-generation service
    pub service_url: String,
    /// Snippet library file; the platform data directory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    pub default_language: Language,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_SERVICE_URL.to_string(),
            store_path: None,
            default_language: Language::Python,
            request_timeout_secs: 120,
            max_retries: 3,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("failed to write config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("unknown config key '{0}' (expected one of: {keys})", keys = Config::KEYS.join(", "))]
    UnknownKey(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

impl Config {
    /// Keys accepted by [`Config::set_value`]
    pub const KEYS: [&'static str; 5] = [
        "service_url",
        "store_path",
        "default_language",
        "request_timeout_secs",
        "max_retries",
    ];

    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("codeloop"))
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from the default location, or return defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load config from `path`. A file that doesn't parse is moved aside.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                let backup = preserve_corrupt_file(path, &content);
                warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    warn!(error = %e, "failed to set config directory permissions");
                }
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        write_config_atomic(path, &content).map_err(io_err)
    }

    /// Update one setting from its textual form. An empty `store_path` unsets it.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        let invalid = |key: &'static str, reason: String| ConfigError::InvalidValue { key, reason };
        match key.trim() {
            "service_url" => {
                url::Url::parse(value).map_err(|e| invalid("service_url", e.to_string()))?;
                self.service_url = value.to_string();
            }
            "store_path" => {
                self.store_path = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            "default_language" => {
                self.default_language = value
                    .parse()
                    .map_err(|e: crate::language::UnknownLanguage| {
                        invalid("default_language", e.to_string())
                    })?;
            }
            "request_timeout_secs" => {
                self.request_timeout_secs = value
                    .parse()
                    .map_err(|e: std::num::ParseIntError| {
                        invalid("request_timeout_secs", e.to_string())
                    })?;
            }
            "max_retries" => {
                self.max_retries = value
                    .parse()
                    .map_err(|e: std::num::ParseIntError| invalid("max_retries", e.to_string()))?;
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Overlay `CODELOOP_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v: &String| !v.trim().is_empty());
        if let Some(url) = non_empty(ENV_SERVICE_URL) {
            self.service_url = url.trim().to_string();
        }
        if let Some(path) = non_empty(ENV_STORE) {
            self.store_path = Some(PathBuf::from(path));
        }
    }

    /// Snippet library location
    pub fn store_path(&self) -> Result<PathBuf, StoreError> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => SnippetStore::default_path(),
        }
    }

    /// Bearer token for the service: keychain first, then `CODELOOP_API_TOKEN`.
    pub fn service_token(&self) -> Option<String> {
        let from_keychain = match keyring::get_service_token() {
            Ok(token) => token,
            Err(err) => {
                keyring::warn_keychain_error_once("the service token", &err);
                None
            }
        };
        from_keychain
            .or_else(|| std::env::var(ENV_API_TOKEN).ok())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    pub fn http_options(&self, api_token: Option<String>) -> HttpOptions {
        HttpOptions {
            timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            max_retries: self.max_retries,
            api_token,
            ..HttpOptions::default()
        }
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/codeloop/config.json".to_string())
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
                warn!(error = %e, "failed to set temp config file permissions");
            }
        }

        file.write_all(content.as_bytes())?;
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
