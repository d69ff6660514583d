//! Small helpers for userkey validation and token generation.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::{rngs::OsRng, RngCore};

/// A userkey must carry at least one non-whitespace character.
pub(crate) fn validate_userkey(userkey: &str) -> bool {
    !userkey.trim().is_empty()
}

/// Create a new session token.
///
/// The raw value is the only external reference to the session; stores
/// persist it verbatim for lookup by token.
pub(crate) fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
