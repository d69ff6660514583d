//! In-memory store for tests and database-free embedding.

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AccountStore, SessionStore};
use crate::membership::types::{
    Account, AccountField, AccountPage, AccountQuery, AccountRecord, AccountUpdate, Credentials,
    LoginAttempt, Session,
};
use crate::membership::generate_session_token;

#[derive(Debug, Default)]
pub struct MemoryMembershipStore {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    /// Keyed by userkey; id lookups scan values.
    accounts: HashMap<String, AccountRecord>,
    /// Keyed by the external session token.
    sessions: HashMap<String, Session>,
    session_data: HashMap<String, Value>,
    login_attempts: Vec<LoginAttempt>,
}

impl MemoryMembershipStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_update(record: &mut AccountRecord, update: &AccountUpdate, unset: &[AccountField]) {
    let account = &mut record.account;
    if let Some(culture) = &update.culture {
        account.culture = Some(culture.clone());
    }
    if let Some(patch) = &update.data {
        merge_data(&mut account.data, patch);
    }
    if let Some(roles) = &update.roles {
        account.roles = roles.clone();
    }
    if let Some(confirmed) = update.confirmed {
        account.confirmed = confirmed;
    }
    if let Some(banned) = update.banned {
        account.banned = banned;
    }
    if let Some(token) = &update.password_reset_token {
        account.password_reset_token = Some(token.clone());
    }
    for field in unset {
        match field {
            AccountField::ConfirmationToken => account.confirmation_token = None,
            AccountField::PasswordResetToken => account.password_reset_token = None,
        }
    }
}

/// Shallow merge: object keys from `patch` replace keys in `target`;
/// non-object patches replace the value wholesale.
fn merge_data(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                target_map.insert(key.clone(), value.clone());
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

impl AccountStore for MemoryMembershipStore {
    async fn get_account(&self, userkey: &str) -> Result<Option<AccountRecord>> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(userkey).cloned())
    }

    async fn get_account_by_id(&self, id: &str) -> Result<Option<AccountRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .find(|record| record.account.id == id)
            .cloned())
    }

    async fn get_accounts(&self, query: &AccountQuery) -> Result<AccountPage> {
        let state = self.state.lock().await;
        let search = query.search.as_deref().map(str::to_lowercase);
        let mut matches: Vec<&AccountRecord> = state
            .accounts
            .values()
            .filter(|record| match &search {
                Some(needle) => record.account.userkey.to_lowercase().contains(needle),
                None => true,
            })
            .collect();
        matches.sort_by(|a, b| a.account.userkey.cmp(&b.account.userkey));

        let total = i64::try_from(matches.len()).unwrap_or(i64::MAX);
        let offset = usize::try_from(query.offset).unwrap_or(0);
        let limit = usize::try_from(query.limit).unwrap_or(0);
        let items = matches
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|record| record.account.clone())
            .collect();
        Ok(AccountPage { total, items })
    }

    async fn create_account(
        &self,
        userkey: &str,
        digest: &str,
        salt: &str,
        data: Value,
        roles: HashSet<String>,
        confirmation_token: Option<String>,
    ) -> Result<Account> {
        let mut state = self.state.lock().await;
        if state.accounts.contains_key(userkey) {
            return Err(anyhow!("account `{userkey}` already exists"));
        }
        let account = Account {
            id: Uuid::new_v4().to_string(),
            userkey: userkey.to_string(),
            roles,
            culture: None,
            data,
            confirmed: false,
            banned: false,
            created_at: Utc::now(),
            password_reset_token: None,
            confirmation_token,
        };
        let record = AccountRecord::new(account.clone(), Credentials::new(salt, digest));
        state.accounts.insert(userkey.to_string(), record);
        Ok(account)
    }

    async fn update_account(&self, userkey: &str, update: &AccountUpdate) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state
            .accounts
            .get_mut(userkey)
            .ok_or_else(|| anyhow!("account `{userkey}` not found"))?;
        apply_update(record, update, &[]);
        Ok(())
    }

    async fn update_account_by_id(
        &self,
        id: &str,
        update: &AccountUpdate,
        unset: &[AccountField],
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state
            .accounts
            .values_mut()
            .find(|record| record.account.id == id)
            .ok_or_else(|| anyhow!("account `{id}` not found"))?;
        apply_update(record, update, unset);
        Ok(())
    }

    async fn delete_account(&self, userkey: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.accounts.remove(userkey);
        Ok(())
    }

    async fn delete_account_by_id(&self, id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let userkey = state
            .accounts
            .values()
            .find(|record| record.account.id == id)
            .map(|record| record.account.userkey.clone());
        match userkey {
            Some(userkey) => {
                state.accounts.remove(&userkey);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn change_password(&self, id: &str, digest: &str, salt: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state
            .accounts
            .values_mut()
            .find(|record| record.account.id == id)
            .ok_or_else(|| anyhow!("account `{id}` not found"))?;
        *record = AccountRecord::new(record.account.clone(), Credentials::new(salt, digest));
        Ok(())
    }

    async fn save_login_attempt(
        &self,
        userkey: &str,
        client_ip: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.login_attempts.push(LoginAttempt {
            userkey: userkey.to_string(),
            client_ip: client_ip.to_string(),
            at,
        });
        Ok(())
    }

    async fn count_failed_login_attempts(
        &self,
        userkey: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64> {
        let state = self.state.lock().await;
        let count = state
            .login_attempts
            .iter()
            .filter(|attempt| {
                attempt.userkey == userkey && attempt.at >= start && attempt.at <= end
            })
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

impl SessionStore for MemoryMembershipStore {
    async fn create_session(
        &self,
        account_id: Option<&str>,
        expiration: DateTime<Utc>,
        client_ip: &str,
        client_info: Option<&str>,
    ) -> Result<Session> {
        let token = generate_session_token()?;
        let session = Session {
            id: Uuid::new_v4().to_string(),
            token: token.clone(),
            account_id: account_id.map(str::to_string),
            anonymous: account_id.is_none(),
            created_at: Utc::now(),
            expiration,
            client_ip: client_ip.to_string(),
            client_info: client_info.map(str::to_string),
        };
        let mut state = self.state.lock().await;
        state.sessions.insert(token, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .find(|session| session.id == id)
            .cloned())
    }

    async fn get_session_by_token(&self, token: &str) -> Result<Option<Session>> {
        let state = self.state.lock().await;
        Ok(state.sessions.get(token).cloned())
    }

    async fn destroy_session(&self, token: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.sessions.remove(token);
        state.session_data.remove(token);
        Ok(())
    }

    async fn save_session_data(&self, token: &str, data: &Value) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.sessions.contains_key(token) {
            return Err(anyhow!("session not found"));
        }
        state.session_data.insert(token.to_string(), data.clone());
        Ok(())
    }

    async fn get_session_data(&self, token: &str) -> Result<Option<Value>> {
        let state = self.state.lock().await;
        Ok(state.session_data.get(token).cloned())
    }
}
