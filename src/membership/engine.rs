//! Membership engine: account lifecycle, login, and session resolution.
//!
//! Flow Overview: collaborators resolve every request to a principal through
//! [`MembershipEngine::try_login_by_session_key`], falling back to
//! [`MembershipEngine::initialize_anonymous_session`] when resolution fails
//! for any reason; credentialed login goes through
//! [`MembershipEngine::try_login`], which throttles on recent failed
//! attempts before verifying the password.
//!
//! The engine holds no mutable state of its own; the store is the only
//! shared resource and store calls are the only suspension points.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;
use uuid::Uuid;

use crate::error::MembershipError;
use crate::membership::options::MembershipOptions;
use crate::membership::password;
use crate::membership::principal::Principal;
use crate::membership::types::{
    Account, AccountField, AccountPage, AccountQuery, AccountRecord, AccountUpdate,
    AuthenticationResult,
};
use crate::membership::utils::validate_userkey;
use crate::store::{AccountStore, SessionStore};

pub struct MembershipEngine<S> {
    store: S,
    options: MembershipOptions,
}

impl<S> MembershipEngine<S>
where
    S: AccountStore + SessionStore,
{
    /// Builds an engine over `store`, validating `options`.
    ///
    /// # Errors
    /// `InvalidParameter` when an option carries a non-positive value.
    pub fn new(store: S, options: MembershipOptions) -> Result<Self, MembershipError> {
        options.validate()?;
        Ok(Self { store, options })
    }

    #[must_use]
    pub fn options(&self) -> &MembershipOptions {
        &self.options
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates a new account.
    ///
    /// When account confirmation is required by configuration, a
    /// confirmation token is stamped on the new account for the
    /// collaborator layer to deliver (e.g. by email).
    ///
    /// A cancellation that interrupts this call after the store write may
    /// leave the account created; check before retrying.
    ///
    /// # Errors
    /// `InvalidParameter` for a blank userkey or weak password,
    /// `AccountAlreadyExisting` when the userkey is taken.
    pub async fn create_account(
        &self,
        userkey: &str,
        password: &str,
        data: Option<Value>,
        roles: Option<HashSet<String>>,
    ) -> Result<Account, MembershipError> {
        if !validate_userkey(userkey) {
            return Err(MembershipError::InvalidParameter("userkey"));
        }
        if !password::validate_password(password) {
            return Err(MembershipError::InvalidParameter("password"));
        }
        if self.store.get_account(userkey).await?.is_some() {
            return Err(MembershipError::AccountAlreadyExisting);
        }

        let salt = password::new_salt();
        let digest = password::hash_password(password, &salt);
        let confirmation_token = self
            .options
            .requires_account_confirmation()
            .then(|| Uuid::new_v4().to_string());

        let account = self
            .store
            .create_account(
                userkey,
                &digest,
                &salt,
                data.unwrap_or_else(|| Value::Object(Map::new())),
                roles.unwrap_or_default(),
                confirmation_token,
            )
            .await?;
        Ok(account)
    }

    /// Store-internal account form, for login-path reuse. Credential
    /// material stays crate-private inside the record.
    pub async fn get_account(
        &self,
        userkey: &str,
    ) -> Result<Option<AccountRecord>, MembershipError> {
        Ok(self.store.get_account(userkey).await?)
    }

    /// Credential-free account view.
    pub async fn get_account_by_id(
        &self,
        account_id: &str,
    ) -> Result<Option<Account>, MembershipError> {
        Ok(self
            .store
            .get_account_by_id(account_id)
            .await?
            .map(|record| record.account))
    }

    /// Credential-free account listing.
    pub async fn get_accounts(
        &self,
        query: &AccountQuery,
    ) -> Result<AccountPage, MembershipError> {
        Ok(self.store.get_accounts(query).await?)
    }

    /// # Errors
    /// `AccountNotFound` when no account carries `userkey`.
    pub async fn update_account(
        &self,
        userkey: &str,
        update: &AccountUpdate,
    ) -> Result<(), MembershipError> {
        if self.store.get_account(userkey).await?.is_none() {
            return Err(MembershipError::AccountNotFound);
        }
        self.store.update_account(userkey, update).await?;
        Ok(())
    }

    /// # Errors
    /// `AccountNotFound` when no account carries `userkey`.
    pub async fn ban_account(&self, userkey: &str) -> Result<(), MembershipError> {
        self.update_account(
            userkey,
            &AccountUpdate {
                banned: Some(true),
                ..AccountUpdate::default()
            },
        )
        .await
    }

    /// Confirms an account using the token stamped at creation. Confirming
    /// an already-confirmed account is a no-op.
    ///
    /// # Errors
    /// `InvalidParameter` for blank arguments, `AccountNotFound`, or
    /// `InvalidToken` on mismatch.
    pub async fn confirm_account(
        &self,
        account_id: &str,
        confirmation_token: &str,
    ) -> Result<(), MembershipError> {
        if account_id.trim().is_empty() {
            return Err(MembershipError::InvalidParameter("account_id"));
        }
        if confirmation_token.trim().is_empty() {
            return Err(MembershipError::InvalidParameter("confirmation_token"));
        }

        let Some(record) = self.store.get_account_by_id(account_id).await? else {
            return Err(MembershipError::AccountNotFound);
        };
        if record.account.confirmed {
            return Ok(());
        }
        if record.account.confirmation_token.as_deref() != Some(confirmation_token) {
            return Err(MembershipError::InvalidToken);
        }

        self.store
            .update_account_by_id(
                &record.account.id,
                &AccountUpdate {
                    confirmed: Some(true),
                    ..AccountUpdate::default()
                },
                &[AccountField::ConfirmationToken],
            )
            .await?;
        Ok(())
    }

    /// Deletes the account with the given userkey.
    ///
    /// # Errors
    /// `AccountNotFound` when absent: deletion is not a silent no-op.
    pub async fn delete_account(&self, userkey: &str) -> Result<(), MembershipError> {
        if self.store.get_account(userkey).await?.is_none() {
            return Err(MembershipError::AccountNotFound);
        }
        self.store.delete_account(userkey).await?;
        Ok(())
    }

    /// Deletes an account after verifying its current password.
    ///
    /// # Errors
    /// `AccountNotFound`, `InvalidPassword` on digest mismatch, or
    /// `NoDocumentDeleted` when the store removed nothing.
    pub async fn delete_account_with_validation(
        &self,
        account_id: &str,
        current_password: &str,
    ) -> Result<(), MembershipError> {
        let Some(record) = self.store.get_account_by_id(account_id).await? else {
            return Err(MembershipError::AccountNotFound);
        };
        let digest = password::hash_password(current_password, record.credentials().salt());
        if !record.credentials().matches(&digest) {
            return Err(MembershipError::InvalidPassword);
        }
        if !self.store.delete_account_by_id(account_id).await? {
            return Err(MembershipError::NoDocumentDeleted);
        }
        Ok(())
    }

    /// Whether `password` matches the stored digest for the account.
    ///
    /// Values failing the password validator never match.
    ///
    /// # Errors
    /// `InvalidParameter` for blank arguments, `AccountNotFound`.
    pub async fn is_password_correct(
        &self,
        account_id: &str,
        password: &str,
    ) -> Result<bool, MembershipError> {
        if account_id.trim().is_empty() {
            return Err(MembershipError::InvalidParameter("account_id"));
        }
        if password.is_empty() {
            return Err(MembershipError::InvalidParameter("password"));
        }
        if !password::validate_password(password) {
            return Ok(false);
        }
        let Some(record) = self.store.get_account_by_id(account_id).await? else {
            return Err(MembershipError::AccountNotFound);
        };
        let digest = password::hash_password(password, record.credentials().salt());
        Ok(record.credentials().matches(&digest))
    }

    /// Replaces the password for the account with the given userkey,
    /// generating a fresh salt.
    ///
    /// # Errors
    /// `InvalidParameter` for a blank userkey or weak password,
    /// `AccountNotFound`.
    pub async fn update_password(
        &self,
        userkey: &str,
        new_password: &str,
    ) -> Result<(), MembershipError> {
        if !validate_userkey(userkey) {
            return Err(MembershipError::InvalidParameter("userkey"));
        }
        if !password::validate_password(new_password) {
            return Err(MembershipError::InvalidParameter("password"));
        }
        let Some(record) = self.store.get_account(userkey).await? else {
            return Err(MembershipError::AccountNotFound);
        };

        let salt = password::new_salt();
        let digest = password::hash_password(new_password, &salt);
        self.store
            .change_password(&record.account.id, &digest, &salt)
            .await?;
        Ok(())
    }

    /// Changes a password on behalf of the account holder, verifying the
    /// current password first.
    ///
    /// # Errors
    /// `InvalidParameter` for blank arguments, `AccountNotFound`,
    /// `WrongPassword` when the current password does not match, or a
    /// password-pair validation error for the new values.
    pub async fn change_password(
        &self,
        account_id: &str,
        current_password: &str,
        password_one: &str,
        password_two: &str,
    ) -> Result<(), MembershipError> {
        if account_id.trim().is_empty() {
            return Err(MembershipError::InvalidParameter("account_id"));
        }
        if !self.is_password_correct(account_id, current_password).await? {
            return Err(MembershipError::WrongPassword);
        }
        password::validate_passwords(password_one, password_two)?;

        let salt = password::new_salt();
        let digest = password::hash_password(password_one, &salt);
        self.store
            .change_password(account_id, &digest, &salt)
            .await?;
        Ok(())
    }

    /// Stamps a fresh password-reset token on the account and returns it
    /// for the collaborator layer to deliver.
    ///
    /// # Errors
    /// `AccountNotFound`.
    pub async fn initialize_password_reset(
        &self,
        userkey: &str,
    ) -> Result<String, MembershipError> {
        if self.store.get_account(userkey).await?.is_none() {
            return Err(MembershipError::AccountNotFound);
        }
        let token = Uuid::new_v4().to_string();
        self.store
            .update_account(
                userkey,
                &AccountUpdate {
                    password_reset_token: Some(token.clone()),
                    ..AccountUpdate::default()
                },
            )
            .await?;
        Ok(token)
    }

    /// Checks a password-reset token without consuming it.
    ///
    /// # Errors
    /// `AccountNotFound`, `MissingPasswordResetToken` when no reset was
    /// initialized, `InvalidToken` on mismatch.
    pub async fn validate_password_reset_token(
        &self,
        account_id: &str,
        token: &str,
    ) -> Result<(), MembershipError> {
        let Some(record) = self.store.get_account_by_id(account_id).await? else {
            return Err(MembershipError::AccountNotFound);
        };
        let stored = record
            .account
            .password_reset_token
            .as_deref()
            .filter(|stored| !stored.trim().is_empty());
        let Some(stored) = stored else {
            return Err(MembershipError::MissingPasswordResetToken);
        };
        if stored != token {
            return Err(MembershipError::InvalidToken);
        }
        Ok(())
    }

    /// Commits a password reset requested via an out-of-band token,
    /// consuming the token.
    ///
    /// # Errors
    /// `InvalidParameter` for blank arguments, plus every error of
    /// [`Self::validate_password_reset_token`] and the password-pair
    /// validation errors.
    pub async fn commit_password_reset(
        &self,
        account_id: &str,
        token: &str,
        password_one: &str,
        password_two: &str,
    ) -> Result<(), MembershipError> {
        if account_id.trim().is_empty() {
            return Err(MembershipError::InvalidParameter("account_id"));
        }
        if token.trim().is_empty() {
            return Err(MembershipError::InvalidParameter("token"));
        }
        self.validate_password_reset_token(account_id, token).await?;
        password::validate_passwords(password_one, password_two)?;

        let salt = password::new_salt();
        let digest = password::hash_password(password_one, &salt);
        self.store
            .change_password(account_id, &digest, &salt)
            .await?;
        self.store
            .update_account_by_id(
                account_id,
                &AccountUpdate::default(),
                &[AccountField::PasswordResetToken],
            )
            .await?;
        Ok(())
    }

    /// Attempts a credentialed login.
    ///
    /// The throttle window is checked before password verification: a
    /// correct password submitted during lockout still returns
    /// `TooManyAttempts`.
    ///
    /// # Errors
    /// `WrongCombo` for an unknown userkey or wrong password (never
    /// distinguished, to avoid user enumeration), `TooManyAttempts`,
    /// `RequireConfirmation`, `BannedAccount`.
    pub async fn try_login(
        &self,
        userkey: &str,
        password: &str,
        remember: bool,
        client_ip: &str,
        client_info: Option<&str>,
    ) -> Result<AuthenticationResult, MembershipError> {
        let Some(record) = self.store.get_account(userkey).await? else {
            return Err(MembershipError::WrongCombo);
        };

        let attempts = self.get_failed_login_attempts(userkey).await?;
        if attempts >= self.options.failed_login_attempts_limit() {
            warn!("login throttled for `{userkey}`: {attempts} recent failed attempts");
            return Err(MembershipError::TooManyAttempts);
        }

        let digest = password::hash_password(password, record.credentials().salt());
        if !record.credentials().matches(&digest) {
            self.report_login_attempt(userkey, client_ip).await?;
            return Err(MembershipError::WrongCombo);
        }

        if self.options.requires_account_confirmation() && !record.account.confirmed {
            return Err(MembershipError::RequireConfirmation);
        }
        if record.account.banned {
            return Err(MembershipError::BannedAccount);
        }

        let expiration = self.new_expiration(remember);
        let session = self
            .store
            .create_session(Some(&record.account.id), expiration, client_ip, client_info)
            .await?;
        let principal = Principal::for_account(&record.account, session.clone(), self.options.area());
        Ok(AuthenticationResult { principal, session })
    }

    /// Resolves a session token into a principal.
    ///
    /// Returns `Ok(None)` for absent or expired sessions; anonymous
    /// sessions resolve to unauthenticated principals. Resolution never
    /// extends the session expiration.
    pub async fn try_login_by_session_key(
        &self,
        session_token: &str,
    ) -> Result<Option<AuthenticationResult>, MembershipError> {
        if session_token.is_empty() {
            return Ok(None);
        }
        let Some(session) = self.store.get_session_by_token(session_token).await? else {
            return Ok(None);
        };
        if session.is_expired(Utc::now()) {
            return Ok(None);
        }

        if session.anonymous {
            let principal = Principal::for_anonymous(session.clone(), self.options.area());
            return Ok(Some(AuthenticationResult { principal, session }));
        }

        let Some(account_id) = session.account_id.as_deref() else {
            return Ok(None);
        };
        let Some(record) = self.store.get_account_by_id(account_id).await? else {
            return Ok(None);
        };
        let principal = Principal::for_account(&record.account, session.clone(), self.options.area());
        Ok(Some(AuthenticationResult { principal, session }))
    }

    /// Creates a session for an unauthenticated client. Used whenever
    /// session resolution fails for any reason; a request must never be
    /// left without a session.
    ///
    /// A cancellation that interrupts this call after the store write may
    /// leave the session created; check before retrying.
    pub async fn initialize_anonymous_session(
        &self,
        client_ip: &str,
        client_info: Option<&str>,
    ) -> Result<AuthenticationResult, MembershipError> {
        let expiration = self.new_expiration(true);
        let session = self
            .store
            .create_session(None, expiration, client_ip, client_info)
            .await?;
        let principal = Principal::for_anonymous(session.clone(), self.options.area());
        Ok(AuthenticationResult { principal, session })
    }

    /// Failed attempts for `userkey` within the trailing `minutes_limit`
    /// window ending now.
    pub async fn get_failed_login_attempts(
        &self,
        userkey: &str,
    ) -> Result<i64, MembershipError> {
        let end = Utc::now();
        let start = end - Duration::minutes(self.options.minutes_limit());
        Ok(self
            .store
            .count_failed_login_attempts(userkey, start, end)
            .await?)
    }

    /// Records a failed login attempt.
    pub async fn report_login_attempt(
        &self,
        userkey: &str,
        client_ip: &str,
    ) -> Result<(), MembershipError> {
        self.store
            .save_login_attempt(userkey, client_ip, Utc::now())
            .await?;
        Ok(())
    }

    /// Destroys a session (logout). Idempotent.
    pub async fn destroy_session(&self, session_token: &str) -> Result<(), MembershipError> {
        self.store.destroy_session(session_token).await?;
        Ok(())
    }

    pub async fn save_session_data(
        &self,
        session_token: &str,
        data: &Value,
    ) -> Result<(), MembershipError> {
        self.store.save_session_data(session_token, data).await?;
        Ok(())
    }

    pub async fn get_session_data(
        &self,
        session_token: &str,
    ) -> Result<Option<Value>, MembershipError> {
        Ok(self.store.get_session_data(session_token).await?)
    }

    /// Absolute UTC expiration for a new session: long ("remembered") or
    /// short duration from now.
    #[must_use]
    pub fn new_expiration(&self, remember: bool) -> DateTime<Utc> {
        let milliseconds = if remember {
            self.options.long_time_expiration_ms()
        } else {
            self.options.short_time_expiration_ms()
        };
        Utc::now() + Duration::milliseconds(milliseconds)
    }
}
