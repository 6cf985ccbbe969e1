//! Encrypted file store whose key lives in the OS keychain

use parking_lot::RwLock;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::file::FileStore;
use crate::keychain::Keychain;
use crate::{AccountSelector, StoreError, TokenRecord};

/// Keychain service under which the store key is saved
pub const KEYCHAIN_SERVICE: &str = "pc-cli";
/// Keychain account under which the store key is saved
pub const KEYCHAIN_ACCOUNT: &str = "token-store-key";

const KEY_LEN: usize = 16;

/// Token store encrypted with a random key held by the keychain.
///
/// The key is created on first use. Losing it (keychain wiped, different
/// user) makes the file unreadable; [`SecureStore::reset`] recovers.
pub struct SecureStore {
    inner: RwLock<FileStore>,
    keychain: Arc<dyn Keychain>,
}

impl SecureStore {
    /// Open the store, fetching or creating its key.
    ///
    /// Fails with [`StoreError::SecureStoreUnavailable`] when the keychain cannot be used.
    pub async fn open(path: impl Into<PathBuf>, keychain: Arc<dyn Keychain>) -> Result<Self, StoreError> {
        let path = path.into();
        let key = match keychain.get_secret(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT).await? {
            Some(key) => {
                debug!(keychain = keychain.name(), "Using existing token store key");
                key
            }
            None => {
                let key = generate_key();
                keychain
                    .set_secret(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT, &key)
                    .await?;
                info!(keychain = keychain.name(), "Created token store key");
                key
            }
        };

        Ok(Self {
            inner: RwLock::new(FileStore::new(path, key.as_bytes())),
            keychain,
        })
    }

    fn current(&self) -> FileStore {
        self.inner.read().clone()
    }

    pub async fn list(&self) -> Result<Vec<TokenRecord>, StoreError> {
        self.current().list().await
    }

    pub async fn set(&self, record: TokenRecord) -> Result<(), StoreError> {
        self.current().set(record).await
    }

    pub async fn delete(
        &self,
        selector: &AccountSelector,
        base_url: Option<&str>,
    ) -> Result<Vec<TokenRecord>, StoreError> {
        self.current().delete(selector, base_url).await
    }

    /// Delete the file and rotate the key
    pub async fn reset(&self) -> Result<(), StoreError> {
        let current = self.current();
        current.reset().await?;

        self.keychain
            .delete_secret(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT)
            .await?;
        let key = generate_key();
        self.keychain
            .set_secret(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT, &key)
            .await?;
        *self.inner.write() = FileStore::new(current.path().to_path_buf(), key.as_bytes());

        info!(path = ?current.path(), "Reset secure token store with a new key");
        Ok(())
    }
}

/// Random store key, hex encoded
pub fn generate_key() -> String {
    let mut key = [0u8; KEY_LEN];
    rand::rng().fill(&mut key);
    hex::encode(key)
}
