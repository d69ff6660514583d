//! Antiforgery tokens using the double-submit strategy, session based.
//!
//! One logical token value is serialized twice, producing two different
//! encrypted strings: one travels as a cookie, the other embedded in the
//! page and returned via request header (for AJAX requests) or form field.
//! Both ciphertexts are bound to the session because the encryption key is
//! derived from the session token: a token stolen without control of that
//! exact session's cookie is useless.
//!
//! Issuance returns both values explicitly; the transport layer is
//! responsible for turning `cookie_value` into a Set-Cookie and rendering
//! `page_value` into the response.

use thiserror::Error;
use uuid::Uuid;

use crate::crypto::cipher;
use crate::membership::types::Session;

/// Request header carrying the second token.
pub const HEADER_NAME: &str = "X-AFT";
/// Form field carrying the second token when no header is present.
pub const FORM_NAME: &str = "aft";
/// Cookie carrying the first token.
pub const COOKIE_NAME: &str = "aftck";

/// Request methods exempt from validation.
const IGNORED_METHODS: [&str; 3] = ["GET", "OPTIONS", "HEAD"];

#[derive(Debug, Error)]
pub enum AntiforgeryError {
    /// Missing, undecryptable, or mismatched tokens. Detail is never
    /// surfaced.
    #[error("invalid antiforgery token")]
    InvalidToken,
    /// The guard ran without a resolved session: it must be wired after
    /// session resolution, so this is a fatal configuration error.
    #[error("missing session context")]
    MissingSession,
}

/// The two serialized forms of one issued token.
#[derive(Clone, Debug)]
pub struct IssuedTokens {
    /// Value for the `aftck` cookie.
    pub cookie_value: String,
    /// Value to embed in the outgoing page or response.
    pub page_value: String,
}

/// Issues a session-bound antiforgery token pair.
///
/// When `existing_cookie` still decrypts under this session's key, its
/// decrypted value is reused so the logical token stays stable across
/// page loads within one session; otherwise a fresh value is minted.
/// Both returned ciphertexts differ byte-for-byte even though they
/// decrypt to the same value.
///
/// # Errors
/// `MissingSession` when called without a resolved session.
pub fn issue(
    session: Option<&Session>,
    existing_cookie: Option<&str>,
) -> Result<IssuedTokens, AntiforgeryError> {
    let session = session.ok_or(AntiforgeryError::MissingSession)?;
    let key = session.token.as_str();

    let value = existing_cookie
        .and_then(|cookie| cipher::try_decrypt(cookie, key))
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Ok(IssuedTokens {
        cookie_value: cipher::encrypt(&value, key),
        page_value: cipher::encrypt(&value, key),
    })
}

/// Validates the token pair of a request.
///
/// Safe methods (GET, OPTIONS, HEAD) always pass. For all other methods
/// both tokens must be present, decrypt under the session's key, and
/// decrypt to the same value. Callers pass the header value as
/// `second_token` when present, otherwise the form value.
///
/// # Errors
/// `MissingSession` when called without a resolved session,
/// `InvalidToken` otherwise.
pub fn validate(
    method: &str,
    session: Option<&Session>,
    cookie_token: Option<&str>,
    second_token: Option<&str>,
) -> Result<(), AntiforgeryError> {
    if IGNORED_METHODS.contains(&method) {
        return Ok(());
    }

    let session = session.ok_or(AntiforgeryError::MissingSession)?;
    let key = session.token.as_str();

    let (Some(cookie_token), Some(second_token)) = (cookie_token, second_token) else {
        return Err(AntiforgeryError::InvalidToken);
    };
    if cookie_token.is_empty() || second_token.is_empty() {
        return Err(AntiforgeryError::InvalidToken);
    }

    // Decryption fails for tokens issued under another session's key.
    let cookie_value =
        cipher::try_decrypt(cookie_token, key).ok_or(AntiforgeryError::InvalidToken)?;
    let second_value =
        cipher::try_decrypt(second_token, key).ok_or(AntiforgeryError::InvalidToken)?;

    if cookie_value != second_value {
        return Err(AntiforgeryError::InvalidToken);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{issue, validate, AntiforgeryError};
    use crate::crypto::cipher;
    use crate::membership::types::Session;
    use chrono::{Duration, Utc};

    fn session(token: &str) -> Session {
        let now = Utc::now();
        Session {
            id: "1".to_string(),
            token: token.to_string(),
            account_id: None,
            anonymous: true,
            created_at: now,
            expiration: now + Duration::minutes(20),
            client_ip: "1.2.3.4".to_string(),
            client_info: None,
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn issue_then_validate_roundtrip() {
        let session = session("session-token-a");
        let tokens = issue(Some(&session), None).unwrap();

        assert!(validate(
            "POST",
            Some(&session),
            Some(&tokens.cookie_value),
            Some(&tokens.page_value),
        )
        .is_ok());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn issued_pair_differs_but_decrypts_to_same_value() {
        let session = session("session-token-a");
        let tokens = issue(Some(&session), None).unwrap();

        assert_ne!(tokens.cookie_value, tokens.page_value);
        let cookie = cipher::try_decrypt(&tokens.cookie_value, &session.token).unwrap();
        let page = cipher::try_decrypt(&tokens.page_value, &session.token).unwrap();
        assert_eq!(cookie, page);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn reissue_with_valid_cookie_keeps_the_logical_token() {
        let session = session("session-token-a");
        let first = issue(Some(&session), None).unwrap();
        let second = issue(Some(&session), Some(&first.cookie_value)).unwrap();

        let first_value = cipher::try_decrypt(&first.cookie_value, &session.token).unwrap();
        let second_value = cipher::try_decrypt(&second.cookie_value, &session.token).unwrap();
        assert_eq!(first_value, second_value);
        // The serialized forms still rotate.
        assert_ne!(first.cookie_value, second.cookie_value);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn reissue_with_foreign_cookie_mints_a_fresh_token() {
        let session_a = session("session-token-a");
        let session_b = session("session-token-b");
        let foreign = issue(Some(&session_a), None).unwrap();
        let minted = issue(Some(&session_b), Some(&foreign.cookie_value)).unwrap();

        let foreign_value = cipher::try_decrypt(&foreign.cookie_value, &session_a.token).unwrap();
        let minted_value = cipher::try_decrypt(&minted.cookie_value, &session_b.token).unwrap();
        assert_ne!(foreign_value, minted_value);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn tampered_tokens_fail_validation() {
        let session = session("session-token-a");
        let tokens = issue(Some(&session), None).unwrap();

        let mut tampered = tokens.cookie_value.clone();
        tampered.replace_range(0..1, if tampered.starts_with('A') { "B" } else { "A" });
        assert!(matches!(
            validate(
                "POST",
                Some(&session),
                Some(&tampered),
                Some(&tokens.page_value),
            ),
            Err(AntiforgeryError::InvalidToken)
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn tokens_issued_for_another_session_fail_validation() {
        let session_a = session("session-token-a");
        let session_b = session("session-token-b");
        let tokens = issue(Some(&session_a), None).unwrap();

        assert!(matches!(
            validate(
                "POST",
                Some(&session_b),
                Some(&tokens.cookie_value),
                Some(&tokens.page_value),
            ),
            Err(AntiforgeryError::InvalidToken)
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn mismatched_pair_fails_validation() {
        let session = session("session-token-a");
        let first = issue(Some(&session), None).unwrap();
        // Second pair minted without the cookie: a different logical value.
        let second = issue(Some(&session), None).unwrap();

        assert!(matches!(
            validate(
                "POST",
                Some(&session),
                Some(&first.cookie_value),
                Some(&second.page_value),
            ),
            Err(AntiforgeryError::InvalidToken)
        ));
    }

    #[test]
    fn safe_methods_skip_validation() {
        for method in ["GET", "OPTIONS", "HEAD"] {
            assert!(validate(method, None, None, None).is_ok());
        }
    }

    #[test]
    fn missing_tokens_fail_validation() {
        let session = session("session-token-a");
        assert!(matches!(
            validate("POST", Some(&session), None, None),
            Err(AntiforgeryError::InvalidToken)
        ));
        assert!(matches!(
            validate("DELETE", Some(&session), Some(""), Some("")),
            Err(AntiforgeryError::InvalidToken)
        ));
    }

    #[test]
    fn missing_session_is_a_wiring_error() {
        assert!(matches!(
            issue(None, None),
            Err(AntiforgeryError::MissingSession)
        ));
        assert!(matches!(
            validate("POST", None, None, None),
            Err(AntiforgeryError::MissingSession)
        ));
    }
}
