//! Engine options, validated at construction.

use crate::error::MembershipError;

const DEFAULT_SHORT_TIME_EXPIRATION_MS: i64 = 20 * 60 * 1000;
const DEFAULT_LONG_TIME_EXPIRATION_MS: i64 = 365 * 24 * 60 * 60 * 1000;
const DEFAULT_FAILED_LOGIN_ATTEMPTS_LIMIT: i64 = 4;
const DEFAULT_MINUTES_LIMIT: i64 = 15;

/// Application area the engine serves. A closed set carried as data on every
/// [`crate::membership::Principal`]: the public and admin surfaces share one
/// engine implementation and differ only by this tag and their configured
/// stores.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Area {
    #[default]
    Public,
    Admin,
}

#[derive(Clone, Debug)]
pub struct MembershipOptions {
    short_time_expiration_ms: i64,
    long_time_expiration_ms: i64,
    failed_login_attempts_limit: i64,
    minutes_limit: i64,
    requires_account_confirmation: bool,
    area: Area,
}

impl Default for MembershipOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl MembershipOptions {
    #[must_use]
    pub fn new() -> Self {
        Self {
            short_time_expiration_ms: DEFAULT_SHORT_TIME_EXPIRATION_MS,
            long_time_expiration_ms: DEFAULT_LONG_TIME_EXPIRATION_MS,
            failed_login_attempts_limit: DEFAULT_FAILED_LOGIN_ATTEMPTS_LIMIT,
            minutes_limit: DEFAULT_MINUTES_LIMIT,
            requires_account_confirmation: false,
            area: Area::Public,
        }
    }

    #[must_use]
    pub fn with_short_time_expiration_ms(mut self, milliseconds: i64) -> Self {
        self.short_time_expiration_ms = milliseconds;
        self
    }

    #[must_use]
    pub fn with_long_time_expiration_ms(mut self, milliseconds: i64) -> Self {
        self.long_time_expiration_ms = milliseconds;
        self
    }

    #[must_use]
    pub fn with_failed_login_attempts_limit(mut self, limit: i64) -> Self {
        self.failed_login_attempts_limit = limit;
        self
    }

    #[must_use]
    pub fn with_minutes_limit(mut self, minutes: i64) -> Self {
        self.minutes_limit = minutes;
        self
    }

    #[must_use]
    pub fn with_requires_account_confirmation(mut self, required: bool) -> Self {
        self.requires_account_confirmation = required;
        self
    }

    #[must_use]
    pub fn with_area(mut self, area: Area) -> Self {
        self.area = area;
        self
    }

    #[must_use]
    pub fn short_time_expiration_ms(&self) -> i64 {
        self.short_time_expiration_ms
    }

    #[must_use]
    pub fn long_time_expiration_ms(&self) -> i64 {
        self.long_time_expiration_ms
    }

    #[must_use]
    pub fn failed_login_attempts_limit(&self) -> i64 {
        self.failed_login_attempts_limit
    }

    #[must_use]
    pub fn minutes_limit(&self) -> i64 {
        self.minutes_limit
    }

    #[must_use]
    pub fn requires_account_confirmation(&self) -> bool {
        self.requires_account_confirmation
    }

    #[must_use]
    pub fn area(&self) -> Area {
        self.area
    }

    pub(crate) fn validate(&self) -> Result<(), MembershipError> {
        if self.short_time_expiration_ms <= 0 {
            return Err(MembershipError::InvalidParameter("short_time_expiration"));
        }
        if self.long_time_expiration_ms <= 0 {
            return Err(MembershipError::InvalidParameter("long_time_expiration"));
        }
        if self.failed_login_attempts_limit <= 0 {
            return Err(MembershipError::InvalidParameter(
                "failed_login_attempts_limit",
            ));
        }
        if self.minutes_limit <= 0 {
            return Err(MembershipError::InvalidParameter("minutes_limit"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Area, MembershipOptions};
    use crate::error::MembershipError;

    #[test]
    fn defaults_and_overrides() {
        let options = MembershipOptions::new();
        assert_eq!(options.short_time_expiration_ms(), 20 * 60 * 1000);
        assert_eq!(options.long_time_expiration_ms(), 365 * 24 * 60 * 60 * 1000);
        assert_eq!(options.failed_login_attempts_limit(), 4);
        assert_eq!(options.minutes_limit(), 15);
        assert!(!options.requires_account_confirmation());
        assert_eq!(options.area(), Area::Public);

        let options = options
            .with_short_time_expiration_ms(1000)
            .with_long_time_expiration_ms(2000)
            .with_failed_login_attempts_limit(2)
            .with_minutes_limit(5)
            .with_requires_account_confirmation(true)
            .with_area(Area::Admin);
        assert_eq!(options.short_time_expiration_ms(), 1000);
        assert_eq!(options.long_time_expiration_ms(), 2000);
        assert_eq!(options.failed_login_attempts_limit(), 2);
        assert_eq!(options.minutes_limit(), 5);
        assert!(options.requires_account_confirmation());
        assert_eq!(options.area(), Area::Admin);
    }

    #[test]
    fn validation_rejects_non_positive_values() {
        let invalid = MembershipOptions::new().with_minutes_limit(0);
        assert!(matches!(
            invalid.validate(),
            Err(MembershipError::InvalidParameter("minutes_limit"))
        ));
        assert!(MembershipOptions::new().validate().is_ok());
    }
}
