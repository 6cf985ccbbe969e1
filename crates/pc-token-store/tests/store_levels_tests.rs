//! Behaviour shared by every token store level

use chrono::{Duration, Utc};
use pc_token_store::{
    AccountSelector, AuthenticatorKind, MemoryKeychain, StoreError, StoreLevel, StoreOptions,
    TokenRecord, TokenStore, UnavailableKeychain, UserInfo,
};
use std::sync::Arc;
use tempfile::TempDir;

fn record(hash: &str, name: &str, base_url: &str) -> TokenRecord {
    let now = Utc::now();
    TokenRecord {
        hash: hash.to_string(),
        base_url: base_url.to_string(),
        realm: "platform".to_string(),
        client_id: "pc-cli".to_string(),
        name: name.to_string(),
        authenticator: AuthenticatorKind::Pkce,
        interactive: true,
        credential: None,
        access_token: format!("at-{hash}"),
        refresh_token: Some(format!("rt-{hash}")),
        id_token: None,
        access_expires_at: now + Duration::minutes(5),
        refresh_expires_at: Some(now + Duration::hours(1)),
        user: UserInfo {
            username: Some(name.to_string()),
            ..Default::default()
        },
        created_at: now,
        updated_at: now,
    }
}

fn options(dir: &TempDir) -> StoreOptions {
    StoreOptions {
        dir: Some(dir.path().to_path_buf()),
        file_key: None,
        keychain: Arc::new(MemoryKeychain::new()),
    }
}

async fn persistent_stores(dir: &TempDir) -> Vec<TokenStore> {
    let opts = options(dir);
    vec![
        TokenStore::open(StoreLevel::Secure, &opts).await.unwrap(),
        TokenStore::open(StoreLevel::File, &opts).await.unwrap(),
        TokenStore::open(StoreLevel::Memory, &opts).await.unwrap(),
    ]
}

#[tokio::test]
async fn test_set_replaces_record_with_same_hash() {
    let dir = tempfile::tempdir().unwrap();
    for store in persistent_stores(&dir).await {
        store.set(record("h1", "alice", "https://a.example.com")).await.unwrap();
        let mut updated = record("h1", "alice", "https://a.example.com");
        updated.access_token = "rotated".to_string();
        store.set(updated).await.unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1, "level {}", store.level());
        assert_eq!(records[0].access_token, "rotated");
    }
}

#[tokio::test]
async fn test_clear_filters_by_base_url() {
    let dir = tempfile::tempdir().unwrap();
    for store in persistent_stores(&dir).await {
        store.set(record("h1", "alice", "https://a.example.com")).await.unwrap();
        store.set(record("h2", "bob", "https://b.example.com")).await.unwrap();

        let removed = store.clear(Some("https://a.example.com/")).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].name, "alice");

        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "bob");

        store.clear(None).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_delete_unknown_name_removes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    for store in persistent_stores(&dir).await {
        store.set(record("h1", "alice", "https://a.example.com")).await.unwrap();
        let removed = store
            .delete(&AccountSelector::Names(vec!["nobody".into()]), None)
            .await
            .unwrap();
        assert!(removed.is_empty());
        assert_eq!(store.list().await.unwrap().len(), 1);
        store.reset().await.unwrap();
    }
}

#[tokio::test]
async fn test_purge_on_read_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();
    for store in persistent_stores(&dir).await {
        let mut stale = record("old", "old", "https://a.example.com");
        stale.access_expires_at = now - Duration::hours(3);
        stale.refresh_expires_at = Some(now - Duration::hours(2));
        store.set(stale).await.unwrap();
        store.set(record("h1", "alice", "https://a.example.com")).await.unwrap();

        let first = store.list().await.unwrap();
        let second = store.list().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        store.reset().await.unwrap();
    }
}

#[tokio::test]
async fn test_null_store_keeps_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::open(StoreLevel::Null, &options(&dir)).await.unwrap();
    store.set(record("h1", "alice", "https://a.example.com")).await.unwrap();
    assert!(store.list().await.unwrap().is_empty());
    assert!(store.clear(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_file_store_with_configured_key() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options(&dir);
    opts.file_key = Some("team-shared-key".to_string());

    let store = TokenStore::open(StoreLevel::File, &opts).await.unwrap();
    store.set(record("h1", "alice", "https://a.example.com")).await.unwrap();

    // The built-in key cannot read a file written with a configured key
    let default_key = TokenStore::open(StoreLevel::File, &options(&dir)).await.unwrap();
    let err = default_key.list().await.unwrap_err();
    assert!(err.is_bad_key());

    default_key.reset().await.unwrap();
    assert!(default_key.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_secure_level_without_keychain_fails() {
    let dir = tempfile::tempdir().unwrap();
    let opts = StoreOptions {
        keychain: Arc::new(UnavailableKeychain::new("no keychain in CI")),
        ..options(&dir)
    };
    let result = TokenStore::open(StoreLevel::Secure, &opts).await;
    match result {
        Err(StoreError::SecureStoreUnavailable { message }) => {
            assert!(message.contains("no keychain in CI"))
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("secure store opened without a keychain"),
    }
}

#[tokio::test]
async fn test_open_str_rejects_unknown_level() {
    let dir = tempfile::tempdir().unwrap();
    let result = TokenStore::open_str("plaintext", &options(&dir)).await;
    assert!(matches!(result, Err(StoreError::InvalidLevel(_))));
}

#[tokio::test]
async fn test_missing_directory_is_reported() {
    let opts = StoreOptions {
        dir: None,
        file_key: None,
        keychain: Arc::new(MemoryKeychain::new()),
    };
    let result = TokenStore::open(StoreLevel::File, &opts).await;
    assert!(matches!(result, Err(StoreError::NoDirectory)));
}
