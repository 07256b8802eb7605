//! Keychain storage for the code service token
//!
//! All credentials live in one JSON keychain entry, so a desktop session
//! prompts at most once.

use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use tracing::warn;

const KEYRING_SERVICE: &str = "codeloop-credentials";
const KEYRING_USERNAME: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    service_token: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    #[error("keychain access is disabled (CODELOOP_DISABLE_KEYRING)")]
    Disabled,
    #[error("keychain error: {0}")]
    Keyring(String),
    #[error("failed to parse stored credentials: {0}")]
    Parse(String),
}

impl From<keyring::Error> for CredentialError {
    fn from(err: keyring::Error) -> Self {
        CredentialError::Keyring(err.to_string())
    }
}

type CredentialResult<T> = Result<T, CredentialError>;

static CREDENTIALS_CACHE: OnceLock<Mutex<Option<StoredCredentials>>> = OnceLock::new();
static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

fn credentials_cache() -> &'static Mutex<Option<StoredCredentials>> {
    CREDENTIALS_CACHE.get_or_init(|| Mutex::new(None))
}

/// Never touch the real keychain from tests.
pub fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    flag_enabled(&std::env::var("CODELOOP_DISABLE_KEYRING").unwrap_or_default())
}

fn flag_enabled(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

/// Log keychain trouble once per process
pub fn warn_keychain_error_once(context: &str, err: &CredentialError) {
    if KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
        return;
    }
    warn!(
        error = %err,
        "couldn't access system keychain for {context}; set CODELOOP_API_TOKEN to bypass it"
    );
}

fn read_credentials_uncached() -> CredentialResult<StoredCredentials> {
    if keyring_disabled() {
        return Ok(StoredCredentials::default());
    }
    let entry = keyring_entry()?;
    match entry.get_password() {
        Ok(json) => parse_credentials(&json),
        Err(keyring::Error::NoEntry) => Ok(StoredCredentials::default()),
        Err(err) => Err(err.into()),
    }
}

fn parse_credentials(json: &str) -> CredentialResult<StoredCredentials> {
    serde_json::from_str(json).map_err(|e| CredentialError::Parse(e.to_string()))
}

fn write_credentials(creds: &StoredCredentials) -> CredentialResult<()> {
    if keyring_disabled() {
        return Err(CredentialError::Disabled);
    }
    let json = serde_json::to_string(creds).map_err(|e| CredentialError::Parse(e.to_string()))?;
    keyring_entry()?.set_password(&json)?;
    Ok(())
}

fn read_credentials_cached() -> CredentialResult<StoredCredentials> {
    let mut guard = match credentials_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(creds) = guard.as_ref() {
        return Ok(creds.clone());
    }
    let creds = read_credentials_uncached()?;
    *guard = Some(creds.clone());
    Ok(creds)
}

fn update_cache(creds: StoredCredentials) {
    let mut guard = match credentials_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Some(creds);
}

/// Service token stored in the keychain, if any
pub fn get_service_token() -> CredentialResult<Option<String>> {
    Ok(read_credentials_cached()?.service_token)
}

pub fn set_service_token(token: &str) -> CredentialResult<()> {
    let mut creds = read_credentials_cached().unwrap_or_default();
    creds.service_token = Some(token.to_string());
    write_credentials(&creds)?;
    update_cache(creds);
    Ok(())
}
