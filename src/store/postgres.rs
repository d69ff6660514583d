//! PostgreSQL store for accounts, sessions, and login attempts.
//!
//! The pool handle is injected at construction and shared across requests;
//! lifecycle (init at process start, drain at shutdown) belongs to the
//! embedding application, as does schema management. Expected tables:
//! `accounts`, `sessions`, `login_attempts`.

use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{AccountStore, SessionStore};
use crate::membership::types::{
    Account, AccountField, AccountPage, AccountQuery, AccountRecord, AccountUpdate, Credentials,
    Session,
};
use crate::membership::generate_session_token;

#[derive(Clone, Debug)]
pub struct PgMembershipStore {
    pool: PgPool,
}

impl PgMembershipStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ACCOUNT_COLUMNS: &str = "id, userkey, digest, salt, roles::text AS roles, culture, \
     data::text AS data, confirmed, banned, created_at, password_reset_token, confirmation_token";

fn account_from_row(row: &PgRow) -> Result<Account> {
    let roles: HashSet<String> = serde_json::from_str(&row.get::<String, _>("roles"))
        .context("failed to decode account roles")?;
    let data: Value = serde_json::from_str(&row.get::<String, _>("data"))
        .context("failed to decode account data")?;
    Ok(Account {
        id: row.get::<Uuid, _>("id").to_string(),
        userkey: row.get("userkey"),
        roles,
        culture: row.get("culture"),
        data,
        confirmed: row.get("confirmed"),
        banned: row.get("banned"),
        created_at: row.get("created_at"),
        password_reset_token: row.get("password_reset_token"),
        confirmation_token: row.get("confirmation_token"),
    })
}

fn record_from_row(row: &PgRow) -> Result<AccountRecord> {
    let account = account_from_row(row)?;
    let credentials = Credentials::new(row.get::<String, _>("salt"), row.get::<String, _>("digest"));
    Ok(AccountRecord::new(account, credentials))
}

fn session_from_row(row: &PgRow) -> Session {
    Session {
        id: row.get::<Uuid, _>("id").to_string(),
        token: row.get("token"),
        account_id: row
            .get::<Option<Uuid>, _>("account_id")
            .map(|id| id.to_string()),
        anonymous: row.get("anonymous"),
        created_at: row.get("created_at"),
        expiration: row.get("expiration"),
        client_ip: row.get("client_ip"),
        client_info: row.get("client_info"),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

impl AccountStore for PgMembershipStore {
    async fn get_account(&self, userkey: &str) -> Result<Option<AccountRecord>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE userkey = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(userkey)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account")?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn get_account_by_id(&self, id: &str) -> Result<Option<AccountRecord>> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account by id")?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn get_accounts(&self, query: &AccountQuery) -> Result<AccountPage> {
        let search = query.search.as_deref();

        let count_query = "SELECT COUNT(*) FROM accounts \
             WHERE ($1::text IS NULL OR userkey ILIKE '%' || $1 || '%')";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let total: i64 = sqlx::query(count_query)
            .bind(search)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to count accounts")?
            .get(0);

        let page_query = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE ($1::text IS NULL OR userkey ILIKE '%' || $1 || '%') \
             ORDER BY userkey OFFSET $2 LIMIT $3"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let rows = sqlx::query(&page_query)
            .bind(search)
            .bind(query.offset)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list accounts")?;

        let items = rows
            .iter()
            .map(account_from_row)
            .collect::<Result<Vec<_>>>()?;
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
        let roles_json = serde_json::to_string(&roles).context("failed to serialize roles")?;
        let data_json = serde_json::to_string(&data).context("failed to serialize account data")?;

        let query = r"
            INSERT INTO accounts
                (userkey, digest, salt, roles, data, confirmation_token)
            VALUES ($1, $2, $3, $4::jsonb, $5::jsonb, $6)
            RETURNING id, created_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(userkey)
            .bind(digest)
            .bind(salt)
            .bind(&roles_json)
            .bind(&data_json)
            .bind(confirmation_token.as_deref())
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        let row = match row {
            Ok(row) => row,
            Err(err) if is_unique_violation(&err) => {
                return Err(anyhow!("account `{userkey}` already exists"));
            }
            Err(err) => return Err(err).context("failed to insert account"),
        };

        Ok(Account {
            id: row.get::<Uuid, _>("id").to_string(),
            userkey: userkey.to_string(),
            roles,
            culture: None,
            data,
            confirmed: false,
            banned: false,
            created_at: row.get("created_at"),
            password_reset_token: None,
            confirmation_token,
        })
    }

    async fn update_account(&self, userkey: &str, update: &AccountUpdate) -> Result<()> {
        let roles_json = update
            .roles
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to serialize roles")?;
        let data_json = update
            .data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to serialize account data")?;

        // data || patch is a shallow jsonb merge, matching the engine contract.
        let query = r"
            UPDATE accounts SET
                culture = COALESCE($2, culture),
                data = CASE WHEN $3::jsonb IS NULL THEN data ELSE data || $3::jsonb END,
                roles = COALESCE($4::jsonb, roles),
                confirmed = COALESCE($5, confirmed),
                banned = COALESCE($6, banned),
                password_reset_token = COALESCE($7, password_reset_token)
            WHERE userkey = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(userkey)
            .bind(update.culture.as_deref())
            .bind(data_json.as_deref())
            .bind(roles_json.as_deref())
            .bind(update.confirmed)
            .bind(update.banned)
            .bind(update.password_reset_token.as_deref())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update account")?;
        Ok(())
    }

    async fn update_account_by_id(
        &self,
        id: &str,
        update: &AccountUpdate,
        unset: &[AccountField],
    ) -> Result<()> {
        let id = Uuid::parse_str(id).context("invalid account id")?;
        let roles_json = update
            .roles
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to serialize roles")?;
        let data_json = update
            .data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to serialize account data")?;
        let unset_reset_token = unset.contains(&AccountField::PasswordResetToken);
        let unset_confirmation_token = unset.contains(&AccountField::ConfirmationToken);

        let query = r"
            UPDATE accounts SET
                culture = COALESCE($2, culture),
                data = CASE WHEN $3::jsonb IS NULL THEN data ELSE data || $3::jsonb END,
                roles = COALESCE($4::jsonb, roles),
                confirmed = COALESCE($5, confirmed),
                banned = COALESCE($6, banned),
                password_reset_token =
                    CASE WHEN $8 THEN NULL ELSE COALESCE($7, password_reset_token) END,
                confirmation_token =
                    CASE WHEN $9 THEN NULL ELSE confirmation_token END
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(update.culture.as_deref())
            .bind(data_json.as_deref())
            .bind(roles_json.as_deref())
            .bind(update.confirmed)
            .bind(update.banned)
            .bind(update.password_reset_token.as_deref())
            .bind(unset_reset_token)
            .bind(unset_confirmation_token)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update account by id")?;
        Ok(())
    }

    async fn delete_account(&self, userkey: &str) -> Result<()> {
        let query = "DELETE FROM accounts WHERE userkey = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(userkey)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete account")?;
        Ok(())
    }

    async fn delete_account_by_id(&self, id: &str) -> Result<bool> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(false);
        };
        let query = "DELETE FROM accounts WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete account by id")?;
        Ok(result.rows_affected() > 0)
    }

    async fn change_password(&self, id: &str, digest: &str, salt: &str) -> Result<()> {
        let id = Uuid::parse_str(id).context("invalid account id")?;
        let query = "UPDATE accounts SET digest = $2, salt = $3 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(digest)
            .bind(salt)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to change password")?;
        Ok(())
    }

    async fn save_login_attempt(
        &self,
        userkey: &str,
        client_ip: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let query = r"
            INSERT INTO login_attempts (userkey, client_ip, created_at)
            VALUES ($1, $2, $3)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(userkey)
            .bind(client_ip)
            .bind(at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save login attempt")?;
        Ok(())
    }

    async fn count_failed_login_attempts(
        &self,
        userkey: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64> {
        let query = "SELECT COUNT(*) FROM login_attempts \
             WHERE userkey = $1 AND created_at >= $2 AND created_at <= $3";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(userkey)
            .bind(start)
            .bind(end)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to count login attempts")?;
        Ok(row.get(0))
    }
}

impl SessionStore for PgMembershipStore {
    async fn create_session(
        &self,
        account_id: Option<&str>,
        expiration: DateTime<Utc>,
        client_ip: &str,
        client_info: Option<&str>,
    ) -> Result<Session> {
        let account_id = account_id
            .map(Uuid::parse_str)
            .transpose()
            .context("invalid account id")?;

        let query = r"
            INSERT INTO sessions
                (token, account_id, anonymous, expiration, client_ip, client_info)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, created_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );

        // Token collisions are vanishingly rare but the column is unique;
        // retry a few times before giving up.
        for _ in 0..3 {
            let token = generate_session_token()?;
            let result = sqlx::query(query)
                .bind(&token)
                .bind(account_id)
                .bind(account_id.is_none())
                .bind(expiration)
                .bind(client_ip)
                .bind(client_info)
                .fetch_one(&self.pool)
                .instrument(span.clone())
                .await;

            match result {
                Ok(row) => {
                    return Ok(Session {
                        id: row.get::<Uuid, _>("id").to_string(),
                        token,
                        account_id: account_id.map(|id| id.to_string()),
                        anonymous: account_id.is_none(),
                        created_at: row.get("created_at"),
                        expiration,
                        client_ip: client_ip.to_string(),
                        client_info: client_info.map(str::to_string),
                    });
                }
                Err(err) if is_unique_violation(&err) => {}
                Err(err) => return Err(err).context("failed to insert session"),
            }
        }

        Err(anyhow!("failed to generate unique session token"))
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let query = r"
            SELECT id, token, account_id, anonymous, created_at, expiration, client_ip, client_info
            FROM sessions
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn get_session_by_token(&self, token: &str) -> Result<Option<Session>> {
        let query = r"
            SELECT id, token, account_id, anonymous, created_at, expiration, client_ip, client_info
            FROM sessions
            WHERE token = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session by token")?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn destroy_session(&self, token: &str) -> Result<()> {
        // Logout is idempotent; it's fine if no rows are deleted.
        let query = "DELETE FROM sessions WHERE token = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to destroy session")?;
        Ok(())
    }

    async fn save_session_data(&self, token: &str, data: &Value) -> Result<()> {
        let data_json = serde_json::to_string(data).context("failed to serialize session data")?;
        let query = "UPDATE sessions SET data = $2::jsonb WHERE token = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(token)
            .bind(&data_json)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save session data")?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("session not found"));
        }
        Ok(())
    }

    async fn get_session_data(&self, token: &str) -> Result<Option<Value>> {
        let query = "SELECT data::text AS data FROM sessions WHERE token = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to read session data")?;

        let Some(row) = row else {
            return Ok(None);
        };
        row.get::<Option<String>, _>("data")
            .map(|raw| serde_json::from_str(&raw).context("failed to decode session data"))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::is_unique_violation;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
    }
}
