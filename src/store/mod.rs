//! Storage contracts consumed by the membership engine, and the two
//! implementations shipped with the crate.
//!
//! The engine is generic over `S: AccountStore + SessionStore`; store calls
//! are its only suspension points. Both traits return `anyhow::Result`:
//! a failing store is an infrastructure error, surfaced to collaborators as
//! [`crate::error::MembershipError::Store`], never as a denial.

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::membership::types::{
    Account, AccountField, AccountPage, AccountQuery, AccountRecord, AccountUpdate, Session,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryMembershipStore;
pub use postgres::PgMembershipStore;

/// Persistence contract for accounts and login attempts.
#[allow(async_fn_in_trait)]
pub trait AccountStore {
    /// Store-internal account form, credentials included.
    async fn get_account(&self, userkey: &str) -> Result<Option<AccountRecord>>;

    async fn get_account_by_id(&self, id: &str) -> Result<Option<AccountRecord>>;

    /// Credential-free listing, filtered and paged by `query`.
    async fn get_accounts(&self, query: &AccountQuery) -> Result<AccountPage>;

    /// Persists a new account, assigning its identifier. Duplicate userkeys
    /// are a store error: the engine checks for conflicts beforehand, and a
    /// lost race surfaces as an infrastructure failure.
    async fn create_account(
        &self,
        userkey: &str,
        digest: &str,
        salt: &str,
        data: Value,
        roles: HashSet<String>,
        confirmation_token: Option<String>,
    ) -> Result<Account>;

    async fn update_account(&self, userkey: &str, update: &AccountUpdate) -> Result<()>;

    async fn update_account_by_id(
        &self,
        id: &str,
        update: &AccountUpdate,
        unset: &[AccountField],
    ) -> Result<()>;

    async fn delete_account(&self, userkey: &str) -> Result<()>;

    /// Returns whether a record was actually deleted.
    async fn delete_account_by_id(&self, id: &str) -> Result<bool>;

    /// Replaces digest and salt together.
    async fn change_password(&self, id: &str, digest: &str, salt: &str) -> Result<()>;

    /// Appends one failed login attempt.
    async fn save_login_attempt(
        &self,
        userkey: &str,
        client_ip: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Counts failed attempts for `userkey` with `start <= at <= end`.
    async fn count_failed_login_attempts(
        &self,
        userkey: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64>;
}

/// Persistence contract for sessions.
#[allow(async_fn_in_trait)]
pub trait SessionStore {
    /// Creates a session, assigning its identifier and unique token.
    /// `account_id == None` creates an anonymous session.
    async fn create_session(
        &self,
        account_id: Option<&str>,
        expiration: DateTime<Utc>,
        client_ip: &str,
        client_info: Option<&str>,
    ) -> Result<Session>;

    async fn get_session(&self, id: &str) -> Result<Option<Session>>;

    /// Lookup by the external token. Expired sessions are still returned;
    /// expiration is enforced lazily by the engine.
    async fn get_session_by_token(&self, token: &str) -> Result<Option<Session>>;

    /// Idempotent: destroying an absent session is not an error.
    async fn destroy_session(&self, token: &str) -> Result<()>;

    async fn save_session_data(&self, token: &str, data: &Value) -> Result<()>;

    async fn get_session_data(&self, token: &str) -> Result<Option<Value>>;
}
