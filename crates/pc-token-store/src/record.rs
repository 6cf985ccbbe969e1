//! Persisted credential record and the expiry rules applied on read.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which authenticator produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticatorKind {
    Pkce,
    ClientSecret,
    SignedJwt,
}

impl AuthenticatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthenticatorKind::Pkce => "pkce",
            AuthenticatorKind::ClientSecret => "client_secret",
            AuthenticatorKind::SignedJwt => "signed_jwt",
        }
    }
}

impl fmt::Display for AuthenticatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity details returned by the userinfo endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One stored account: tokens plus what is needed to renew them.
///
/// Keyed by `hash`; a second record with the same hash replaces the first.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// Identity hash of the authenticator that produced the tokens
    pub hash: String,
    pub base_url: String,
    pub realm: String,
    pub client_id: String,
    /// Account display name
    pub name: String,
    pub authenticator: AuthenticatorKind,
    /// Whether the account was obtained through a browser login
    #[serde(default)]
    pub interactive: bool,
    /// Client secret or PEM private key for service accounts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub access_expires_at: DateTime<Utc>,
    /// `None` means the refresh token, if any, does not expire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: UserInfo,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("hash", &self.hash)
            .field("base_url", &self.base_url)
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .field("name", &self.name)
            .field("authenticator", &self.authenticator)
            .field("interactive", &self.interactive)
            .field("credential_set", &self.credential.is_some())
            .field("refresh_token_set", &self.refresh_token.is_some())
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

impl TokenRecord {
    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        self.access_expires_at <= now
    }

    /// True when the access token expires within `threshold` of `now`
    pub fn expires_within(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.access_expires_at - threshold <= now
    }

    /// A refresh token exists and has not passed its expiry
    pub fn has_usable_refresh_token(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token.is_some() && self.refresh_expires_at.map_or(true, |at| at > now)
    }

    /// Service accounts keep their credential and can always exchange it again
    pub fn can_reauthenticate(&self) -> bool {
        !self.interactive && self.credential.is_some()
    }

    /// Dropped on read: access expired and nothing left to renew it with.
    pub fn is_purgeable(&self, now: DateTime<Utc>) -> bool {
        if !self.is_access_expired(now) {
            return false;
        }
        match self.refresh_expires_at {
            Some(at) if at <= now => true,
            _ => self.refresh_token.is_none() && !self.can_reauthenticate(),
        }
    }

    /// Matches either the full identity hash or the stored name
    pub fn matches(&self, name_or_hash: &str) -> bool {
        self.hash == name_or_hash || self.name == name_or_hash
    }

    pub fn matches_base_url(&self, base_url: Option<&str>) -> bool {
        match base_url {
            None => true,
            Some(filter) => self.base_url.trim_end_matches('/') == filter.trim_end_matches('/'),
        }
    }
}

/// Which stored accounts an operation applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountSelector {
    All,
    /// Account names or identity hashes
    Names(Vec<String>),
}

impl AccountSelector {
    pub fn matches(&self, record: &TokenRecord) -> bool {
        match self {
            AccountSelector::All => true,
            AccountSelector::Names(names) => names.iter().any(|n| record.matches(n)),
        }
    }
}

/// Insert or replace by hash, keeping the original position on replace
pub(crate) fn upsert(records: &mut Vec<TokenRecord>, record: TokenRecord) {
    match records.iter_mut().find(|r| r.hash == record.hash) {
        Some(existing) => *existing = record,
        None => records.push(record),
    }
}

/// Drop purgeable records, returning how many were removed
pub(crate) fn purge(records: &mut Vec<TokenRecord>, now: DateTime<Utc>) -> usize {
    let before = records.len();
    records.retain(|r| !r.is_purgeable(now));
    before - records.len()
}

/// Remove and return every record matching the selector and base URL filter
pub(crate) fn take_matching(
    records: &mut Vec<TokenRecord>,
    selector: &AccountSelector,
    base_url: Option<&str>,
) -> Vec<TokenRecord> {
    let (removed, kept) = std::mem::take(records)
        .into_iter()
        .partition(|r| selector.matches(r) && r.matches_base_url(base_url));
    *records = kept;
    removed
}
