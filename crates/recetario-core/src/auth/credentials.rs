use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use keyring::Entry;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Credential, Identity, Role};

const SERVICE_NAME: &str = "recetario";

/// Credentials file name for the file-backed store
pub const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("credential file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("credential store lock poisoned")]
    Poisoned,
}

/// The three entries that make up a persisted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Token,
    User,
    Role,
}

impl StoreKey {
    pub const ALL: [StoreKey; 3] = [StoreKey::Token, StoreKey::User, StoreKey::Role];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Token => "token",
            StoreKey::User => "user",
            StoreKey::Role => "role",
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable string-keyed storage for session entries.
///
/// `remove` of an absent key is not an error.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError>;
    fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: StoreKey) -> Result<(), StoreError>;
}

/// Raw entries as read from the store, before parsing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawCredentials {
    pub token: Option<String>,
    pub user: Option<String>,
    pub role: Option<String>,
}

impl RawCredentials {
    pub fn is_complete(&self) -> bool {
        self.token.is_some() && self.user.is_some() && self.role.is_some()
    }

    /// Parse the user and role blobs. `None` if anything is missing.
    pub fn parse(&self) -> Option<Result<Credential, serde_json::Error>> {
        let (token, user, role) = (self.token.as_ref()?, self.user.as_ref()?, self.role.as_ref()?);
        Some(parse_entries(token, user, role))
    }
}

fn parse_entries(token: &str, user: &str, role: &str) -> Result<Credential, serde_json::Error> {
    let user: Identity = serde_json::from_str(user)?;
    let role: Role = serde_json::from_str(role)?;
    Ok(Credential {
        token: token.to_string(),
        user,
        role,
    })
}

pub fn load_raw(store: &dyn CredentialStore) -> Result<RawCredentials, StoreError> {
    Ok(RawCredentials {
        token: store.get(StoreKey::Token)?,
        user: store.get(StoreKey::User)?,
        role: store.get(StoreKey::Role)?,
    })
}

/// Write all three entries. On failure, whatever was written is cleared again
/// so the store never holds a partial session.
pub fn save_credential(store: &dyn CredentialStore, credential: &Credential) -> Result<(), StoreError> {
    let user = serde_json::to_string(&credential.user)?;
    let role = serde_json::to_string(&credential.role)?;

    let result = store
        .set(StoreKey::Token, &credential.token)
        .and_then(|_| store.set(StoreKey::User, &user))
        .and_then(|_| store.set(StoreKey::Role, &role));

    if let Err(e) = result {
        warn!(error = %e, "Failed to persist credential, clearing partial state");
        let _ = clear_auth_data(store);
        return Err(e);
    }
    Ok(())
}

/// Remove the token, user and role entries. Idempotent.
///
/// Every key is attempted even if an earlier removal fails; the first error
/// is returned.
pub fn clear_auth_data(store: &dyn CredentialStore) -> Result<(), StoreError> {
    let mut first_err = None;
    for key in StoreKey::ALL {
        if let Err(e) = store.remove(key) {
            warn!(key = %key, error = %e, "Failed to remove credential entry");
            first_err.get_or_insert(e);
        }
    }
    debug!("Cleared auth data");
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ============================================================================
// Keychain
// ============================================================================

/// OS keychain backed store, one keychain entry per key.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: StoreKey) -> Result<Entry, StoreError> {
        Ok(Entry::new(&self.service, key.as_str())?)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// File
// ============================================================================

/// JSON file backed store for machines without a keychain.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            path: dir.join(CREDENTIALS_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if map.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(self.read_map()?.remove(key.as_str()))
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut map = self.read_map()?;
        map.insert(key.as_str().to_string(), value.to_string());
        self.write_map(&map)
    }

    fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut map = self.read_map()?;
        if map.remove(key.as_str()).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

// ============================================================================
// Memory
// ============================================================================

/// In-process store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<StoreKey, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(&key).cloned())
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(&key);
        Ok(())
    }
}
