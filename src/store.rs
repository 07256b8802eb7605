//! Snippet library persistence
//!
//! The whole library lives in one JSON file holding a sequence of snippet
//! records. Every mutation reads the full collection, changes it and writes
//! it back atomically while holding an exclusive advisory lock, so several
//! `codeloop` processes can share one library.

use crate::language::Language;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const STORE_FILE: &str = "snippets.json";
const LOCK_FILE: &str = ".snippets.lock";
const STORE_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const STORE_LOCK_RETRY: Duration = Duration::from_millis(50);

/// Identity and creation-order key of a snippet.
///
/// Ids written by this crate are numeric. Older libraries may hold arbitrary
/// string ids; those are kept verbatim and sort after every numeric id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum SnippetId {
    Number(u64),
    Text(String),
}

impl SnippetId {
    pub fn new(raw: u64) -> Self {
        SnippetId::Number(raw)
    }

    pub fn as_number(&self) -> Option<u64> {
        match self {
            SnippetId::Number(n) => Some(*n),
            SnippetId::Text(_) => None,
        }
    }
}

impl fmt::Display for SnippetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnippetId::Number(n) => f.pad(&n.to_string()),
            SnippetId::Text(s) => f.pad(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("snippet id must not be empty")]
pub struct EmptySnippetId;

impl FromStr for SnippetId {
    type Err = EmptySnippetId;

    /// Digits parse as a numeric id, anything else is a text id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EmptySnippetId);
        }
        Ok(s.parse::<u64>()
            .map(SnippetId::Number)
            .unwrap_or_else(|_| SnippetId::Text(s.to_string())))
    }
}

// Quoted numeric ids from hand-edited libraries normalize to numbers.
impl<'de> Deserialize<'de> for SnippetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(u64),
            Text(String),
        }

        match RawId::deserialize(deserializer)? {
            RawId::Number(n) => Ok(SnippetId::Number(n)),
            RawId::Text(s) => s
                .parse()
                .map_err(|_| serde::de::Error::custom("snippet id must not be empty")),
        }
    }
}

/// A saved (description, language, code) record. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub id: SnippetId,
    pub description: String,
    pub language: Language,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Snippet {
    /// One-line label used by snippet lists
    pub fn label(&self) -> String {
        format!("{} | {}", self.description, self.language)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access snippet store at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "snippet store at {} was corrupted ({reason}); a backup was saved to {}",
        path.display(),
        backup.display()
    )]
    Corrupt {
        path: PathBuf,
        backup: PathBuf,
        reason: String,
    },
    #[error("timed out waiting for snippet store lock ({0:?})")]
    LockTimeout(Duration),
    #[error("failed to serialize snippets: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("could not determine a data directory for the snippet store")]
    NoDataDir,
}

type StoreResult<T> = Result<T, StoreError>;

fn system_now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

pub struct SnippetStore {
    path: PathBuf,
    lock_path: PathBuf,
    now_millis: fn() -> u64,
    lock_timeout: Duration,
}

struct StoreLock {
    file: fs::File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl SnippetStore {
    /// Store backed by the given JSON file. Nothing is touched until first use.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path
            .parent()
            .map(|dir| dir.join(LOCK_FILE))
            .unwrap_or_else(|| PathBuf::from(LOCK_FILE));
        Self {
            path,
            lock_path,
            now_millis: system_now_millis,
            lock_timeout: STORE_LOCK_TIMEOUT,
        }
    }

    /// `<data_dir>/codeloop/snippets.json`
    pub fn default_path() -> StoreResult<PathBuf> {
        dirs::data_dir()
            .map(|p| p.join("codeloop").join(STORE_FILE))
            .ok_or(StoreError::NoDataDir)
    }

    #[cfg(test)]
    fn with_clock(mut self, now_millis: fn() -> u64) -> Self {
        self.now_millis = now_millis;
        self
    }

    #[cfg(test)]
    fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a new snippet and return its freshly assigned id.
    pub fn save(
        &self,
        description: &str,
        language: &Language,
        code: &str,
    ) -> StoreResult<SnippetId> {
        let _lock = self.lock(true)?;
        let mut snippets = self.read_all()?;
        let id = next_id(&snippets, (self.now_millis)());
        snippets.push(Snippet {
            id: id.clone(),
            description: description.to_string(),
            language: language.clone(),
            code: code.to_string(),
            created_at: Some(Utc::now()),
        });
        self.write_all(&snippets)?;
        debug!(%id, count = snippets.len(), "saved snippet");
        Ok(id)
    }

    /// All snippets in creation order.
    pub fn list(&self) -> StoreResult<Vec<Snippet>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let _lock = self.lock(false)?;
        self.read_all()
    }

    pub fn find(&self, id: &SnippetId) -> StoreResult<Option<Snippet>> {
        Ok(self.list()?.into_iter().find(|s| &s.id == id))
    }

    /// Remove a snippet. Returns `false` (and writes nothing) for unknown ids.
    pub fn delete(&self, id: &SnippetId) -> StoreResult<bool> {
        if !self.path.exists() {
            debug!(%id, "delete on empty store");
            return Ok(false);
        }
        let _lock = self.lock(true)?;
        let mut snippets = self.read_all()?;
        let before = snippets.len();
        snippets.retain(|s| &s.id != id);
        if snippets.len() == before {
            debug!(%id, "delete of unknown snippet ignored");
            return Ok(false);
        }
        self.write_all(&snippets)?;
        debug!(%id, count = snippets.len(), "deleted snippet");
        Ok(true)
    }

    fn read_all(&self) -> StoreResult<Vec<Snippet>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(&self.path)(err)),
        };
        let trimmed = content.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Vec<Snippet>>(trimmed) {
            Ok(snippets) => Ok(snippets),
            Err(err) => {
                let backup = preserve_corrupt_file(&self.path, &content);
                warn!(path = %self.path.display(), error = %err, "snippet store corrupted");
                Err(StoreError::Corrupt {
                    path: self.path.clone(),
                    backup,
                    reason: err.to_string(),
                })
            }
        }
    }

    fn write_all(&self, snippets: &[Snippet]) -> StoreResult<()> {
        let content = serde_json::to_string_pretty(snippets)?;
        write_atomic(&self.path, &content).map_err(io_err(&self.path))
    }

    fn lock(&self, exclusive: bool) -> StoreResult<StoreLock> {
        if let Some(dir) = self.lock_path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(io_err(dir))?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(io_err(&self.lock_path))?;

        let start = Instant::now();
        loop {
            let result = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match result {
                Ok(()) => break,
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(io_err(&self.lock_path)(err));
                    }
                    if start.elapsed() >= self.lock_timeout {
                        warn!(
                            timeout = ?self.lock_timeout,
                            "gave up waiting for snippet store lock"
                        );
                        return Err(StoreError::LockTimeout(self.lock_timeout));
                    }
                    debug!(exclusive, "waiting for snippet store lock");
                    std::thread::sleep(STORE_LOCK_RETRY);
                }
            }
        }

        Ok(StoreLock { file })
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

/// Strictly greater than every numeric id, and no smaller than the clock.
fn next_id(existing: &[Snippet], now_millis: u64) -> SnippetId {
    let after_last = existing
        .iter()
        .filter_map(|s| s.id.as_number())
        .max()
        .map_or(0, |max| max.saturating_add(1));
    SnippetId::Number(after_last.max(now_millis))
}

/// Move an unreadable file aside without clobbering earlier backups.
pub(crate) fn preserve_corrupt_file(path: &Path, content: &str) -> PathBuf {
    let backup = corrupt_backup_path(path);
    if fs::rename(path, &backup).is_err() {
        let _ = fs::write(&backup, content);
    }
    backup
}

/// `<name>.corrupt`, or a timestamped name when that one is taken.
fn corrupt_backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    let first = path.with_file_name(&name);
    if !first.exists() {
        return first;
    }
    name.push(format!("-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")));
    let stamped = path.with_file_name(&name);
    let mut candidate = stamped.clone();
    let mut n = 1;
    while candidate.exists() {
        let mut numbered = stamped.clone().into_os_string();
        numbered.push(format!("-{n}"));
        candidate = PathBuf::from(numbered);
        n += 1;
    }
    candidate
}

fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = file.set_permissions(fs::Permissions::from_mode(0o600));
        }

        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(tmp: &TempDir) -> SnippetStore {
        SnippetStore::open(tmp.path().join("lib").join(STORE_FILE))
    }

    fn frozen_clock() -> u64 {
        1_700_000_000_000
    }

    #[test]
    fn test_list_on_missing_store_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        assert!(store.list().unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_save_then_list_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let before = store.list().unwrap().len();

        let id = store
            .save("sort a list", &Language::Python, "def s(x):\n    return sorted(x)")
            .unwrap();

        let all = store.list().unwrap();
        assert_eq!(all.len(), before + 1);
        let saved = &all[0];
        assert_eq!(saved.id, id);
        assert_eq!(saved.description, "sort a list");
        assert_eq!(saved.language, Language::Python);
        assert_eq!(saved.code, "def s(x):\n    return sorted(x)");
    }

    #[test]
    fn test_same_millisecond_saves_get_distinct_increasing_ids() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp).with_clock(frozen_clock);

        let a = store.save("a", &Language::Python, "1").unwrap();
        let b = store.save("b", &Language::Python, "2").unwrap();
        let c = store.save("c", &Language::Go, "3").unwrap();

        assert!(a < b && b < c);
        assert_eq!(a.as_number(), Some(frozen_clock()));
        let ids: Vec<_> = store.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn test_delete_then_find_reports_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let keep = store.save("keep", &Language::Rust, "fn a() {}").unwrap();
        let gone = store.save("gone", &Language::Rust, "fn b() {}").unwrap();

        assert!(store.delete(&gone).unwrap());
        assert!(store.find(&gone).unwrap().is_none());
        assert!(store.find(&keep).unwrap().is_some());
    }

    #[test]
    fn test_delete_unknown_id_leaves_list_unchanged() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        store.save("one", &Language::Python, "x = 1").unwrap();
        let before = store.list().unwrap();

        assert!(!store.delete(&SnippetId::new(42)).unwrap());
        assert_eq!(store.list().unwrap(), before);
    }

    #[test]
    fn test_ids_stay_unique_after_deleting_newest() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp).with_clock(frozen_clock);
        let first = store.save("a", &Language::Python, "1").unwrap();
        let second = store.save("b", &Language::Python, "2").unwrap();
        store.delete(&second).unwrap();

        let third = store.save("c", &Language::Python, "3").unwrap();
        assert_ne!(third, first);
        assert!(third > first);
    }

    #[test]
    fn test_reads_browser_export_layout() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"[
                {"id":1715000000000,"description":"is even","language":"python",
                 "code":"def is_even(n): return n % 2 == 0"},
                {"id":"1715000000001","description":"legacy","language":"fortran","code":"x"}
            ]"#,
        )
        .unwrap();

        let all = store.list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, SnippetId::new(1_715_000_000_000));
        assert_eq!(all[1].language, Language::Other("fortran".into()));
        assert!(all[0].created_at.is_none());

        let next = store.save("new", &Language::Python, "y").unwrap();
        assert!(next > all[1].id);
    }

    #[test]
    fn test_corrupt_store_is_preserved_not_overwritten() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{not json").unwrap();

        let err = store.save("x", &Language::Python, "y").unwrap_err();
        let backup = match err {
            StoreError::Corrupt { backup, .. } => backup,
            other => panic!("unexpected error: {other}"),
        };
        assert_eq!(fs::read_to_string(backup).unwrap(), "{not json");
    }

    #[test]
    fn test_second_corruption_keeps_first_backup() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();

        fs::write(store.path(), "{first").unwrap();
        let first = match store.list().unwrap_err() {
            StoreError::Corrupt { backup, .. } => backup,
            other => panic!("unexpected error: {other}"),
        };
        fs::write(store.path(), "{second").unwrap();
        let second = match store.list().unwrap_err() {
            StoreError::Corrupt { backup, .. } => backup,
            other => panic!("unexpected error: {other}"),
        };

        assert_ne!(first, second);
        assert_eq!(fs::read_to_string(&first).unwrap(), "{first");
        assert_eq!(fs::read_to_string(&second).unwrap(), "{second");
    }

    #[test]
    fn test_text_ids_load_and_delete_without_corruption() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp).with_clock(frozen_clock);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"[{"id":"a1b2","description":"legacy","language":"python","code":"x = 1"}]"#,
        )
        .unwrap();

        let all = store.list().unwrap();
        assert_eq!(all[0].id, SnippetId::Text("a1b2".into()));

        let fresh = store.save("new", &Language::Python, "y = 2").unwrap();
        assert_eq!(fresh.as_number(), Some(frozen_clock()));
        let legacy: SnippetId = "a1b2".parse().unwrap();
        assert_eq!(store.find(&legacy).unwrap().unwrap().description, "legacy");
        assert!(store.delete(&legacy).unwrap());

        let left = store.list().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, fresh);
        assert!(!store.path().with_file_name("snippets.json.corrupt").exists());
    }

    #[test]
    fn test_snippet_id_parsing() {
        assert_eq!("42".parse::<SnippetId>().unwrap(), SnippetId::new(42));
        assert_eq!(" abc ".parse::<SnippetId>().unwrap(), SnippetId::Text("abc".into()));
        assert_eq!("  ".parse::<SnippetId>(), Err(EmptySnippetId));
        assert!(SnippetId::new(u64::MAX) < SnippetId::Text("0a".into()));
    }

    fn hold_lock(store: &SnippetStore, exclusive: bool) -> fs::File {
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(store.path().with_file_name(LOCK_FILE))
            .unwrap();
        if exclusive {
            file.lock_exclusive().unwrap();
        } else {
            file.lock_shared().unwrap();
        }
        file
    }

    #[test]
    fn test_save_times_out_while_another_writer_holds_the_lock() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp).with_lock_timeout(Duration::from_millis(120));
        store.save("first", &Language::Python, "0").unwrap();
        let holder = hold_lock(&store, true);

        let started = Instant::now();
        match store.save("x", &Language::Python, "y") {
            Err(StoreError::LockTimeout(timeout)) => {
                assert_eq!(timeout, Duration::from_millis(120))
            }
            other => panic!("expected lock timeout, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_millis(120));
        assert!(matches!(store.list(), Err(StoreError::LockTimeout(_))));

        FileExt::unlock(&holder).unwrap();
        assert!(store.save("x", &Language::Python, "y").is_ok());
    }

    #[test]
    fn test_readers_share_the_lock_but_block_writers() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp).with_lock_timeout(Duration::from_millis(120));
        store.save("kept", &Language::Python, "1").unwrap();
        let _reader = hold_lock(&store, false);

        assert_eq!(store.list().unwrap().len(), 1);
        assert!(matches!(
            store.delete(&SnippetId::new(1)),
            Err(StoreError::LockTimeout(_))
        ));
    }

    #[test]
    fn test_whitespace_only_store_reads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "  \n").unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_snippet_label() {
        let snippet = Snippet {
            id: SnippetId::new(1),
            description: "sort a list".into(),
            language: Language::JavaScript,
            code: String::new(),
            created_at: None,
        };
        assert_eq!(snippet.label(), "sort a list | javascript");
    }
}
