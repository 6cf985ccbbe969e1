//! OS keychain access behind a small capability trait.
//!
//! The secure store only needs to read, write and delete one secret, so the
//! trait stays that narrow. Tests use [`MemoryKeychain`]; builds without the
//! `os-keychain` feature get [`UnavailableKeychain`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::StoreError;

/// Secret storage provided by the operating system
#[async_trait]
pub trait Keychain: Send + Sync {
    /// Read a secret, `None` when no entry exists
    async fn get_secret(&self, service: &str, account: &str) -> Result<Option<String>, StoreError>;

    async fn set_secret(&self, service: &str, account: &str, secret: &str) -> Result<(), StoreError>;

    /// Remove a secret; removing a missing entry succeeds
    async fn delete_secret(&self, service: &str, account: &str) -> Result<(), StoreError>;

    fn name(&self) -> &str;
}

/// Keychain for this build: the OS keychain when compiled in, otherwise unavailable
pub fn default_keychain() -> Arc<dyn Keychain> {
    #[cfg(feature = "os-keychain")]
    {
        Arc::new(OsKeychain)
    }
    #[cfg(not(feature = "os-keychain"))]
    {
        Arc::new(UnavailableKeychain::new("built without OS keychain support"))
    }
}

fn unavailable(err: impl std::fmt::Display) -> StoreError {
    StoreError::SecureStoreUnavailable {
        message: err.to_string(),
    }
}

/// Platform keychain via the `keyring` crate (macOS Keychain, Windows
/// Credential Manager, Secret Service on Linux)
#[cfg(feature = "os-keychain")]
#[derive(Debug, Default, Clone, Copy)]
pub struct OsKeychain;

#[cfg(feature = "os-keychain")]
impl OsKeychain {
    async fn blocking<T, F>(f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    {
        // keyring talks to platform services synchronously
        tokio::task::spawn_blocking(f).await.map_err(unavailable)?
    }
}

#[cfg(feature = "os-keychain")]
#[async_trait]
impl Keychain for OsKeychain {
    async fn get_secret(&self, service: &str, account: &str) -> Result<Option<String>, StoreError> {
        let (service, account) = (service.to_string(), account.to_string());
        Self::blocking(move || {
            let entry = keyring::Entry::new(&service, &account).map_err(unavailable)?;
            match entry.get_password() {
                Ok(secret) => Ok(Some(secret)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(unavailable(e)),
            }
        })
        .await
    }

    async fn set_secret(&self, service: &str, account: &str, secret: &str) -> Result<(), StoreError> {
        let (service, account, secret) = (service.to_string(), account.to_string(), secret.to_string());
        Self::blocking(move || {
            let entry = keyring::Entry::new(&service, &account).map_err(unavailable)?;
            entry.set_password(&secret).map_err(unavailable)
        })
        .await
    }

    async fn delete_secret(&self, service: &str, account: &str) -> Result<(), StoreError> {
        let (service, account) = (service.to_string(), account.to_string());
        Self::blocking(move || {
            let entry = keyring::Entry::new(&service, &account).map_err(unavailable)?;
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(unavailable(e)),
            }
        })
        .await
    }

    fn name(&self) -> &str {
        "os"
    }
}

/// In-process keychain
#[derive(Debug, Default)]
pub struct MemoryKeychain {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Keychain for MemoryKeychain {
    async fn get_secret(&self, service: &str, account: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .entries
            .lock()
            .get(&(service.to_string(), account.to_string()))
            .cloned())
    }

    async fn set_secret(&self, service: &str, account: &str, secret: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .insert((service.to_string(), account.to_string()), secret.to_string());
        Ok(())
    }

    async fn delete_secret(&self, service: &str, account: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .remove(&(service.to_string(), account.to_string()));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Keychain that fails every call
#[derive(Debug, Clone)]
pub struct UnavailableKeychain {
    reason: String,
}

impl UnavailableKeychain {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl Keychain for UnavailableKeychain {
    async fn get_secret(&self, _service: &str, _account: &str) -> Result<Option<String>, StoreError> {
        Err(unavailable(&self.reason))
    }

    async fn set_secret(&self, _service: &str, _account: &str, _secret: &str) -> Result<(), StoreError> {
        Err(unavailable(&self.reason))
    }

    async fn delete_secret(&self, _service: &str, _account: &str) -> Result<(), StoreError> {
        Err(unavailable(&self.reason))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_keychain_roundtrip() {
        let keychain = MemoryKeychain::new();
        assert!(keychain.get_secret("svc", "acct").await.unwrap().is_none());

        keychain.set_secret("svc", "acct", "value").await.unwrap();
        assert_eq!(keychain.get_secret("svc", "acct").await.unwrap().as_deref(), Some("value"));

        keychain.delete_secret("svc", "acct").await.unwrap();
        keychain.delete_secret("svc", "acct").await.unwrap();
        assert!(keychain.get_secret("svc", "acct").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_keychain_reports_reason() {
        let keychain = UnavailableKeychain::new("no session bus");
        let err = keychain.get_secret("svc", "acct").await.unwrap_err();
        assert!(matches!(err, StoreError::SecureStoreUnavailable { .. }));
        assert!(err.to_string().contains("no session bus"));
    }
}
