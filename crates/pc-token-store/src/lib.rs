//! Platform CLI Token Store
//!
//! Persists authenticated accounts at one of several trust levels:
//! - `secure`: AES-256-GCM file, random key kept in the OS keychain
//! - `file`: AES-256-GCM file, key embedded in the binary or configured
//! - `memory`: process-local, nothing written to disk
//! - `null`: stores nothing
//!
//! `auto` resolves to `secure` when the `os-keychain` feature is compiled in
//! and to `file` otherwise.
//!
//! Every level drops records on read whose access token has expired and that
//! have nothing left to renew it with.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

mod file;
mod keychain;
mod memory;
mod record;
mod secure;

pub use file::{FileStore, EMBEDDED_FILE_KEY};
#[cfg(feature = "os-keychain")]
pub use keychain::OsKeychain;
pub use keychain::{default_keychain, Keychain, MemoryKeychain, UnavailableKeychain};
pub use memory::MemoryStore;
pub use record::{AccountSelector, AuthenticatorKind, TokenRecord, UserInfo};
pub use secure::{SecureStore, KEYCHAIN_ACCOUNT, KEYCHAIN_SERVICE};

/// File name of the `secure` level store
pub const SECURE_STORE_FILE: &str = "tokens.secure.enc";
/// File name of the `file` level store
pub const FILE_STORE_FILE: &str = "tokens.file.enc";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(
        "Token store {} cannot be decrypted with the current key. \
         Run `pc logout --all` to reset it.",
        path.display()
    )]
    BadKey { path: PathBuf },

    #[error(
        "Token store {} is corrupt. Run `pc logout --all` to reset it.",
        path.display()
    )]
    Corrupt { path: PathBuf },

    #[error(
        "Secure token store unavailable: {message}. \
         Set token_store.level = \"file\" (or PC_TOKEN_STORE=file) to use the file store instead."
    )]
    SecureStoreUnavailable { message: String },

    #[error("Unknown token store level: {0}")]
    InvalidLevel(String),

    #[error("No directory for the token store; set token_store.dir or PC_HOME")]
    NoDirectory,

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// The store exists but cannot be read; resetting it is the remedy
    pub fn is_bad_key(&self) -> bool {
        matches!(self, StoreError::BadKey { .. } | StoreError::Corrupt { .. })
    }
}

/// Token store trust level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreLevel {
    Auto,
    Secure,
    File,
    Memory,
    Null,
}

impl StoreLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreLevel::Auto => "auto",
            StoreLevel::Secure => "secure",
            StoreLevel::File => "file",
            StoreLevel::Memory => "memory",
            StoreLevel::Null => "null",
        }
    }

    /// Replace `auto` with the concrete level for this build
    pub fn resolve(self) -> StoreLevel {
        match self {
            StoreLevel::Auto if cfg!(feature = "os-keychain") => StoreLevel::Secure,
            StoreLevel::Auto => StoreLevel::File,
            other => other,
        }
    }
}

impl FromStr for StoreLevel {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(StoreLevel::Auto),
            "secure" => Ok(StoreLevel::Secure),
            "file" => Ok(StoreLevel::File),
            "memory" => Ok(StoreLevel::Memory),
            "null" => Ok(StoreLevel::Null),
            _ => Err(StoreError::InvalidLevel(s.to_string())),
        }
    }
}

impl fmt::Display for StoreLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for [`TokenStore::open`]
#[derive(Clone)]
pub struct StoreOptions {
    /// Directory holding the store files
    pub dir: Option<PathBuf>,
    /// Key material for the `file` level, [`EMBEDDED_FILE_KEY`] when `None`
    pub file_key: Option<String>,
    pub keychain: Arc<dyn Keychain>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            dir: pc_common::pc_home(),
            file_key: None,
            keychain: default_keychain(),
        }
    }
}

impl StoreOptions {
    fn path_for(&self, file_name: &str) -> Result<PathBuf, StoreError> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(file_name))
            .ok_or(StoreError::NoDirectory)
    }
}

/// Token store at a resolved trust level
pub enum TokenStore {
    Secure(SecureStore),
    File(FileStore),
    Memory(MemoryStore),
    Null,
}

impl TokenStore {
    /// Create the store for `level`, resolving `auto` first
    pub async fn open(level: StoreLevel, options: &StoreOptions) -> Result<Self, StoreError> {
        let resolved = level.resolve();
        let store = match resolved {
            StoreLevel::Secure => {
                let path = options.path_for(SECURE_STORE_FILE)?;
                TokenStore::Secure(SecureStore::open(path, options.keychain.clone()).await?)
            }
            StoreLevel::File => {
                let path = options.path_for(FILE_STORE_FILE)?;
                match &options.file_key {
                    Some(key) => TokenStore::File(FileStore::new(path, key.as_bytes())),
                    None => TokenStore::File(FileStore::with_embedded_key(path)),
                }
            }
            StoreLevel::Memory => TokenStore::Memory(MemoryStore::new()),
            StoreLevel::Null => TokenStore::Null,
            StoreLevel::Auto => return Err(StoreError::InvalidLevel(level.to_string())),
        };
        info!(requested = %level, level = %resolved, "Opened token store");
        Ok(store)
    }

    /// Parse `level` and open the store
    pub async fn open_str(level: &str, options: &StoreOptions) -> Result<Self, StoreError> {
        Self::open(level.parse()?, options).await
    }

    pub fn level(&self) -> StoreLevel {
        match self {
            TokenStore::Secure(_) => StoreLevel::Secure,
            TokenStore::File(_) => StoreLevel::File,
            TokenStore::Memory(_) => StoreLevel::Memory,
            TokenStore::Null => StoreLevel::Null,
        }
    }

    /// All live records, in insertion order
    pub async fn list(&self) -> Result<Vec<TokenRecord>, StoreError> {
        match self {
            TokenStore::Secure(s) => s.list().await,
            TokenStore::File(s) => s.list().await,
            TokenStore::Memory(s) => s.list().await,
            TokenStore::Null => Ok(Vec::new()),
        }
    }

    /// Insert or replace the record with the same hash
    pub async fn set(&self, record: TokenRecord) -> Result<(), StoreError> {
        match self {
            TokenStore::Secure(s) => s.set(record).await,
            TokenStore::File(s) => s.set(record).await,
            TokenStore::Memory(s) => s.set(record).await,
            TokenStore::Null => Ok(()),
        }
    }

    /// Remove matching records, optionally only those for `base_url`
    pub async fn delete(
        &self,
        selector: &AccountSelector,
        base_url: Option<&str>,
    ) -> Result<Vec<TokenRecord>, StoreError> {
        match self {
            TokenStore::Secure(s) => s.delete(selector, base_url).await,
            TokenStore::File(s) => s.delete(selector, base_url).await,
            TokenStore::Memory(s) => s.delete(selector, base_url).await,
            TokenStore::Null => Ok(Vec::new()),
        }
    }

    /// Remove every record, optionally only those for `base_url`
    pub async fn clear(&self, base_url: Option<&str>) -> Result<Vec<TokenRecord>, StoreError> {
        self.delete(&AccountSelector::All, base_url).await
    }

    /// Discard the store entirely, including an unreadable file
    pub async fn reset(&self) -> Result<(), StoreError> {
        match self {
            TokenStore::Secure(s) => s.reset().await,
            TokenStore::File(s) => s.reset().await,
            TokenStore::Memory(s) => s.reset().await,
            TokenStore::Null => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!("Secure".parse::<StoreLevel>().unwrap(), StoreLevel::Secure);
        assert_eq!(" null ".parse::<StoreLevel>().unwrap(), StoreLevel::Null);
        assert!(matches!(
            "vault".parse::<StoreLevel>(),
            Err(StoreError::InvalidLevel(_))
        ));
    }

    #[test]
    fn test_auto_resolves_to_concrete_level() {
        let resolved = StoreLevel::Auto.resolve();
        if cfg!(feature = "os-keychain") {
            assert_eq!(resolved, StoreLevel::Secure);
        } else {
            assert_eq!(resolved, StoreLevel::File);
        }
        assert_eq!(StoreLevel::Memory.resolve(), StoreLevel::Memory);
    }

    #[test]
    fn test_bad_key_message_is_actionable() {
        let err = StoreError::BadKey {
            path: PathBuf::from("/tmp/tokens.file.enc"),
        };
        assert!(err.to_string().contains("pc logout --all"));
        assert!(err.is_bad_key());
    }
}
