//! Authenticated account handed to command handlers

use chrono::Utc;
use pc_token_store::TokenRecord;

/// A stored login plus platform metadata.
///
/// `organization`, `team` and `roles` stay empty until a command handler
/// hydrates them from the platform API.
#[derive(Debug, Clone)]
pub struct Account {
    pub hash: String,
    pub name: String,
    pub record: TokenRecord,
    pub organization: Option<String>,
    pub team: Option<String>,
    pub roles: Vec<String>,
}

impl Account {
    /// The access token is past its expiry and could not be renewed
    pub fn is_expired(&self) -> bool {
        self.record.is_access_expired(Utc::now())
    }

    pub fn access_token(&self) -> &str {
        &self.record.access_token
    }

    pub fn base_url(&self) -> &str {
        &self.record.base_url
    }
}

impl From<TokenRecord> for Account {
    fn from(record: TokenRecord) -> Self {
        Self {
            hash: record.hash.clone(),
            name: record.name.clone(),
            record,
            organization: None,
            team: None,
            roles: Vec::new(),
        }
    }
}
