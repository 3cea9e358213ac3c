//! Durable storage for the session collection.
//!
//! State lives in a small key/value [`Storage`]: one blob holds the whole session collection,
//! and separate keys hold the user's display name and UI preferences. [`SessionStore`] owns the
//! record format and the one schema migration (defaulting a missing `category`).

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::observability::{STORE_FAILURES, STORE_MIGRATED_RECORDS, STORE_SAVES};
use crate::types::{Category, Message, Session, SessionId};

/// Key of the session collection blob.
pub const SESSIONS_KEY: &str = "sessions";

/// Key a blob that failed to parse is copied to before it can be overwritten.
pub const CORRUPT_SESSIONS_KEY: &str = "sessions.corrupt";

/// Key of the optional user display name.
pub const USER_NAME_KEY: &str = "user_name";

/// Key of the UI preferences.
pub const PREFERENCES_KEY: &str = "preferences";

///////////////////////////////////////////// Storage //////////////////////////////////////////////

/// A flat string key/value store.
pub trait Storage: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replaces the value stored under `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`; removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Returns the raw bytes stored under `key`. Content that is not UTF-8 is not an error here.
    fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(key)?.map(String::into_bytes))
    }

    /// Replaces the value stored under `key` with raw bytes.
    fn set_bytes(&self, key: &str, value: &[u8]) -> Result<()> {
        self.set(key, &String::from_utf8_lossy(value))
    }
}

/// Storage keeping one file per key inside a directory.
///
/// Writes go to a temporary file that is synced and then renamed over the target, so a crash
/// mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Opens storage rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| {
            Error::io(
                format!("failed to create data directory {}", dir.display()),
                err,
            )
        })?;
        Ok(Self { dir })
    }

    /// The directory backing this storage.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(Error::validation(
                format!("invalid storage key {key:?}"),
                Some("key".to_string()),
            ));
        }
        Ok(self.dir.join(key))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(bytes) = self.get_bytes(key)? else {
            return Ok(None);
        };
        String::from_utf8(bytes).map(Some).map_err(|err| {
            Error::serialization(format!("{key} is not valid UTF-8"), Some(Box::new(err)))
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_bytes(key, value.as_bytes())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::io(format!("failed to remove {}", path.display()), err)),
        }
    }

    fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::io(format!("failed to read {}", path.display()), err)),
        }
    }

    fn set_bytes(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp_path = self.dir.join(format!(".{key}.tmp"));
        let write = || -> std::io::Result<()> {
            let mut tmp_file = File::create(&tmp_path)?;
            tmp_file.write_all(value)?;
            tmp_file.sync_all()?;
            drop(tmp_file);
            fs::rename(&tmp_path, &path)
        };
        write().map_err(|err| {
            let _ = fs::remove_file(&tmp_path);
            Error::io(format!("failed to write {}", path.display()), err)
        })
    }
}

/// Storage held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Creates empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates in-memory storage seeded with one value.
    pub fn with_value(key: &str, value: &str) -> Self {
        let storage = Self::new();
        if let Ok(mut values) = storage.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
        storage
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| Error::validation("memory storage lock poisoned", None))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| Error::validation("memory storage lock poisoned", None))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| Error::validation("memory storage lock poisoned", None))?;
        values.remove(key);
        Ok(())
    }
}

/////////////////////////////////////////// Preferences ////////////////////////////////////////////

/// Presentation preferences. Stored apart from sessions and never migrated with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Index into the presentation layer's font size table.
    #[serde(default = "Preferences::default_font_size_index")]
    pub font_size_index: usize,
    /// Font family name.
    #[serde(default = "Preferences::default_font_family")]
    pub font_family: String,
}

impl Preferences {
    fn default_font_size_index() -> usize {
        2
    }

    fn default_font_family() -> String {
        "Amiri".to_string()
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            font_size_index: Self::default_font_size_index(),
            font_family: Self::default_font_family(),
        }
    }
}

/////////////////////////////////////////// SessionStore ///////////////////////////////////////////

/// On-disk shape of a session. `category` is optional because records written before
/// categories existed do not carry it.
#[derive(Serialize, Deserialize)]
struct StoredSession {
    id: SessionId,
    title: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    messages: Vec<Message>,
}

impl StoredSession {
    fn from_session(session: &Session) -> Self {
        Self {
            id: session.id,
            title: session.title.clone(),
            category: Some(session.category.key().to_string()),
            messages: session.messages.clone(),
        }
    }

    fn into_session(self) -> Session {
        let category = match self.category {
            None => {
                STORE_MIGRATED_RECORDS.click();
                tracing::debug!(session_id = %self.id, "defaulting missing category");
                Category::Uncategorized
            }
            Some(key) => key.parse().unwrap_or_else(|_| {
                tracing::warn!(
                    session_id = %self.id,
                    category = %key,
                    "unknown category in stored session"
                );
                Category::Uncategorized
            }),
        };
        Session {
            id: self.id,
            title: self.title,
            category,
            messages: self.messages,
        }
    }
}

/// Loads and saves the session collection and its side keys.
///
/// When stored sessions could not be read and no copy of them could be kept, saves are refused
/// so the only copy is not overwritten.
pub struct SessionStore {
    storage: Box<dyn Storage>,
    overwrite_blocked: AtomicBool,
}

impl SessionStore {
    /// Creates a store over the given storage.
    pub fn new(storage: impl Storage + 'static) -> Self {
        Self {
            storage: Box::new(storage),
            overwrite_blocked: AtomicBool::new(false),
        }
    }

    /// Creates a store backed by files under `dir`.
    pub fn open_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(FileStorage::open(dir)?))
    }

    /// Creates a store that forgets everything when dropped.
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }

    /// Loads every stored session, migrating records that predate categories.
    ///
    /// A missing blob is an empty collection. A blob that is not UTF-8 or does not parse is
    /// copied byte for byte to [`CORRUPT_SESSIONS_KEY`] and reported as an error. If it cannot be
    /// read or copied, later saves fail until a load succeeds.
    pub fn load(&self) -> Result<Vec<Session>> {
        let blob = match self.storage.get_bytes(SESSIONS_KEY) {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                self.overwrite_blocked.store(false, Ordering::SeqCst);
                return Ok(Vec::new());
            }
            Err(err) => {
                STORE_FAILURES.click();
                tracing::warn!(error = %err, "could not read stored sessions; saves disabled");
                self.overwrite_blocked.store(true, Ordering::SeqCst);
                return Err(err);
            }
        };
        match decode_sessions(&blob) {
            Ok(sessions) => {
                self.overwrite_blocked.store(false, Ordering::SeqCst);
                Ok(sessions)
            }
            Err(err) => {
                STORE_FAILURES.click();
                tracing::warn!(error = %err, "stored sessions are unreadable; keeping a copy");
                let preserved = self.storage.set_bytes(CORRUPT_SESSIONS_KEY, &blob);
                if let Err(copy_err) = &preserved {
                    tracing::warn!(
                        error = %copy_err,
                        "could not preserve unreadable sessions; saves disabled"
                    );
                }
                self.overwrite_blocked.store(preserved.is_err(), Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Overwrites the stored collection with `sessions`.
    ///
    /// # Errors
    ///
    /// Fails without writing when the last load found unreadable sessions it could not preserve.
    pub fn save(&self, sessions: &[Session]) -> Result<()> {
        if self.overwrite_blocked.load(Ordering::SeqCst) {
            STORE_FAILURES.click();
            return Err(Error::serialization(
                "refusing to overwrite stored sessions that could not be read or preserved",
                None,
            ));
        }
        let records: Vec<StoredSession> =
            sessions.iter().map(StoredSession::from_session).collect();
        let blob = serde_json::to_string(&records).map_err(|err| {
            Error::serialization("failed to serialize sessions", Some(Box::new(err)))
        })?;
        self.storage.set(SESSIONS_KEY, &blob).inspect_err(|_| {
            STORE_FAILURES.click();
        })?;
        STORE_SAVES.click();
        Ok(())
    }

    /// The stored display name, if one was set.
    pub fn display_name(&self) -> Result<Option<String>> {
        Ok(self
            .storage
            .get(USER_NAME_KEY)?
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty()))
    }

    /// Stores or clears the display name.
    pub fn set_display_name(&self, name: Option<&str>) -> Result<()> {
        match name.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => self.storage.set(USER_NAME_KEY, name),
            None => self.storage.remove(USER_NAME_KEY),
        }
    }

    /// The stored preferences, or defaults when none are stored.
    pub fn preferences(&self) -> Result<Preferences> {
        match self.storage.get(PREFERENCES_KEY)? {
            Some(blob) => Ok(serde_json::from_str(&blob)?),
            None => Ok(Preferences::default()),
        }
    }

    /// Stores the preferences.
    pub fn save_preferences(&self, preferences: &Preferences) -> Result<()> {
        let blob = serde_json::to_string(preferences)?;
        self.storage.set(PREFERENCES_KEY, &blob)
    }
}

fn decode_sessions(blob: &[u8]) -> Result<Vec<Session>> {
    let text = std::str::from_utf8(blob).map_err(|err| {
        Error::serialization("stored sessions are not valid UTF-8", Some(Box::new(err)))
    })?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let records: Vec<StoredSession> = serde_json::from_str(text).map_err(|err| {
        Error::serialization("failed to parse stored sessions", Some(Box::new(err)))
    })?;
    Ok(records
        .into_iter()
        .map(StoredSession::into_session)
        .collect())
}
