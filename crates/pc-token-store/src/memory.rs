//! Process-local token store

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::record::{purge, take_matching, upsert};
use crate::{AccountSelector, StoreError, TokenRecord};

/// Ordered in-memory collection of records, lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<TokenRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list(&self) -> Result<Vec<TokenRecord>, StoreError> {
        let mut records = self.records.write().await;
        let purged = purge(&mut records, Utc::now());
        if purged > 0 {
            debug!(purged, "Purged expired records");
        }
        Ok(records.clone())
    }

    pub async fn set(&self, record: TokenRecord) -> Result<(), StoreError> {
        upsert(&mut *self.records.write().await, record);
        Ok(())
    }

    pub async fn delete(
        &self,
        selector: &AccountSelector,
        base_url: Option<&str>,
    ) -> Result<Vec<TokenRecord>, StoreError> {
        Ok(take_matching(&mut *self.records.write().await, selector, base_url))
    }

    pub async fn reset(&self) -> Result<(), StoreError> {
        self.records.write().await.clear();
        Ok(())
    }
}
