//! Error taxonomy for the membership core.
//!
//! Denials (validation, auth, token problems) are plain variants with stable
//! [`MembershipError::code`] strings so the collaborator layer can branch and
//! map them to HTTP statuses without parsing text. Only
//! [`MembershipError::Store`] represents an exceptional condition.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("invalid parameter: `{0}`")]
    InvalidParameter(&'static str),
    #[error("missing password")]
    MissingPassword,
    #[error("password mismatch")]
    PasswordMismatch,
    #[error("password too weak")]
    WeakPassword,
    #[error("account not found")]
    AccountNotFound,
    #[error("account already existing")]
    AccountAlreadyExisting,
    #[error("wrong credentials")]
    WrongCombo,
    #[error("too many login attempts")]
    TooManyAttempts,
    #[error("account requires confirmation")]
    RequireConfirmation,
    #[error("banned account")]
    BannedAccount,
    #[error("wrong password")]
    WrongPassword,
    #[error("invalid password")]
    InvalidPassword,
    #[error("invalid token")]
    InvalidToken,
    #[error("missing password reset token")]
    MissingPasswordResetToken,
    #[error("no document deleted")]
    NoDocumentDeleted,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Coarse classification mirroring how collaborators map errors to statuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Auth,
    Token,
    Store,
}

impl MembershipError {
    /// Stable reason code for collaborator layers. Never localized.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParameter(_) => "InvalidParameter",
            Self::MissingPassword => "MissingPassword",
            Self::PasswordMismatch => "PasswordMismatch",
            Self::WeakPassword => "WeakPassword",
            Self::AccountNotFound => "AccountNotFound",
            Self::AccountAlreadyExisting => "AccountAlreadyExisting",
            Self::WrongCombo => "WrongCombo",
            Self::TooManyAttempts => "TooManyAttempts",
            Self::RequireConfirmation => "RequireConfirmation",
            Self::BannedAccount => "BannedAccount",
            Self::WrongPassword => "WrongPassword",
            Self::InvalidPassword => "InvalidPassword",
            Self::InvalidToken => "InvalidToken",
            Self::MissingPasswordResetToken => "MissingPasswordResetToken",
            Self::NoDocumentDeleted => "NoDocumentDeleted",
            Self::Store(_) => "StoreFailure",
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter(_)
            | Self::MissingPassword
            | Self::PasswordMismatch
            | Self::WeakPassword => ErrorKind::Validation,
            Self::AccountNotFound | Self::NoDocumentDeleted => ErrorKind::NotFound,
            Self::AccountAlreadyExisting => ErrorKind::Conflict,
            Self::WrongCombo
            | Self::TooManyAttempts
            | Self::RequireConfirmation
            | Self::BannedAccount
            | Self::WrongPassword
            | Self::InvalidPassword => ErrorKind::Auth,
            Self::InvalidToken | Self::MissingPasswordResetToken => ErrorKind::Token,
            Self::Store(_) => ErrorKind::Store,
        }
    }

    /// Whether this is a denial the caller can surface, as opposed to an
    /// infrastructure failure that should propagate.
    #[must_use]
    pub fn is_denial(&self) -> bool {
        !matches!(self, Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, MembershipError};

    #[test]
    fn codes_are_stable() {
        assert_eq!(MembershipError::WrongCombo.code(), "WrongCombo");
        assert_eq!(MembershipError::TooManyAttempts.code(), "TooManyAttempts");
        assert_eq!(
            MembershipError::AccountAlreadyExisting.code(),
            "AccountAlreadyExisting"
        );
        assert_eq!(
            MembershipError::InvalidParameter("userkey").code(),
            "InvalidParameter"
        );
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            MembershipError::WeakPassword.kind(),
            ErrorKind::Validation
        );
        assert_eq!(MembershipError::AccountNotFound.kind(), ErrorKind::NotFound);
        assert_eq!(
            MembershipError::AccountAlreadyExisting.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(MembershipError::BannedAccount.kind(), ErrorKind::Auth);
        assert_eq!(MembershipError::InvalidToken.kind(), ErrorKind::Token);
    }

    #[test]
    fn store_errors_are_not_denials() {
        let err = MembershipError::from(anyhow::anyhow!("connection refused"));
        assert!(!err.is_denial());
        assert_eq!(err.kind(), ErrorKind::Store);
        assert!(MembershipError::WrongCombo.is_denial());
    }
}
