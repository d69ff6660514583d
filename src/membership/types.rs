//! Core data model shared by the engine and the store contracts.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::membership::principal::Principal;

/// An account as exposed outside the engine boundary: no credential
/// material. The store-internal form is [`AccountRecord`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    /// Opaque, store-assigned identifier.
    pub id: String,
    /// Unique login handle (e.g. email), distinct from `id`.
    pub userkey: String,
    pub roles: HashSet<String>,
    pub culture: Option<String>,
    /// Arbitrary profile data; opaque to the engine.
    pub data: Value,
    pub confirmed: bool,
    pub banned: bool,
    pub created_at: DateTime<Utc>,
    pub password_reset_token: Option<String>,
    pub confirmation_token: Option<String>,
}

/// Salt and digest for one account. Values are secrecy-wrapped and only
/// readable inside this crate, so credential material cannot leave the
/// engine boundary.
#[derive(Clone, Debug)]
pub struct Credentials {
    salt: SecretString,
    digest: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(salt: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            salt: SecretString::from(salt.into()),
            digest: SecretString::from(digest.into()),
        }
    }

    pub(crate) fn salt(&self) -> &str {
        self.salt.expose_secret()
    }

    pub(crate) fn matches(&self, candidate_digest: &str) -> bool {
        self.digest.expose_secret() == candidate_digest
    }
}

/// Store-internal account form, reused on the login path where the digest
/// must be verified.
#[derive(Clone, Debug)]
pub struct AccountRecord {
    pub account: Account,
    credentials: Credentials,
}

impl AccountRecord {
    #[must_use]
    pub fn new(account: Account, credentials: Credentials) -> Self {
        Self {
            account,
            credentials,
        }
    }

    pub(crate) fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

/// A persisted session. The `token` is the only externally visible
/// reference; the internal `id` never travels to clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Globally unique opaque token; also the antiforgery derivation key.
    pub token: String,
    /// `None` for anonymous sessions.
    pub account_id: Option<String>,
    pub anonymous: bool,
    pub created_at: DateTime<Utc>,
    /// Absolute UTC expiration computed at issuance; never extended on read.
    pub expiration: DateTime<Utc>,
    pub client_ip: String,
    pub client_info: Option<String>,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration < now
    }
}

/// A recorded failed login, used only to count recent failures within the
/// throttle window. Append-only; retention is a store concern.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub userkey: String,
    pub client_ip: String,
    pub at: DateTime<Utc>,
}

/// Outcome of a successful login or session resolution.
#[derive(Clone, Debug)]
pub struct AuthenticationResult {
    pub principal: Principal,
    pub session: Session,
}

/// Partial account update; unset fields are left untouched. `data` patches
/// are merged shallowly into the existing profile data.
#[derive(Clone, Debug, Default)]
pub struct AccountUpdate {
    pub culture: Option<String>,
    pub data: Option<Value>,
    pub roles: Option<HashSet<String>>,
    pub confirmed: Option<bool>,
    pub banned: Option<bool>,
    pub password_reset_token: Option<String>,
}

/// Fields that can be explicitly cleared by an update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountField {
    ConfirmationToken,
    PasswordResetToken,
}

const DEFAULT_PAGE_SIZE: i64 = 50;

/// Listing filter for [`crate::store::AccountStore::get_accounts`].
#[derive(Clone, Debug)]
pub struct AccountQuery {
    /// Case-insensitive match against the userkey.
    pub search: Option<String>,
    pub offset: i64,
    pub limit: i64,
}

impl Default for AccountQuery {
    fn default() -> Self {
        Self {
            search: None,
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of accounts, credential-free.
#[derive(Clone, Debug)]
pub struct AccountPage {
    pub total: i64,
    pub items: Vec<Account>,
}

#[cfg(test)]
mod tests {
    use super::{Account, AccountRecord, Credentials, Session};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::collections::HashSet;

    fn account(id: &str, userkey: &str) -> Account {
        Account {
            id: id.to_string(),
            userkey: userkey.to_string(),
            roles: HashSet::new(),
            culture: None,
            data: json!({}),
            confirmed: false,
            banned: false,
            created_at: Utc::now(),
            password_reset_token: None,
            confirmation_token: None,
        }
    }

    #[test]
    fn credentials_never_appear_in_debug_output() {
        let record = AccountRecord::new(
            account("1", "a@b.com"),
            Credentials::new("the-salt", "the-digest"),
        );
        let debug = format!("{record:?}");
        assert!(!debug.contains("the-salt"));
        assert!(!debug.contains("the-digest"));
    }

    #[test]
    fn session_expiration_is_a_lazy_comparison() {
        let now = Utc::now();
        let session = Session {
            id: "1".to_string(),
            token: "token".to_string(),
            account_id: None,
            anonymous: true,
            created_at: now,
            expiration: now + Duration::minutes(20),
            client_ip: "1.2.3.4".to_string(),
            client_info: None,
        };
        assert!(!session.is_expired(now));
        assert!(!session.is_expired(now + Duration::minutes(20)));
        assert!(session.is_expired(now + Duration::minutes(21)));
    }
}
