//! Security principal resolved for the current request.
//!
//! A principal is ephemeral: constructed per request from a session and,
//! for authenticated sessions, the owning account. It is never persisted.

use std::collections::HashSet;

use crate::error::MembershipError;
use crate::membership::options::Area;
use crate::membership::types::{Account, Session};

#[derive(Clone, Debug)]
pub struct Principal {
    /// `None` for anonymous principals.
    pub account_id: Option<String>,
    pub roles: HashSet<String>,
    pub culture: Option<String>,
    pub authenticated: bool,
    pub area: Area,
    /// The session this principal was resolved from.
    pub session: Session,
}

impl Principal {
    pub(crate) fn for_account(account: &Account, session: Session, area: Area) -> Self {
        Self {
            account_id: Some(account.id.clone()),
            roles: account.roles.clone(),
            culture: account.culture.clone(),
            authenticated: true,
            area,
            session,
        }
    }

    pub(crate) fn for_anonymous(session: Session, area: Area) -> Self {
        Self {
            account_id: None,
            roles: HashSet::new(),
            culture: None,
            authenticated: false,
            area,
            session,
        }
    }

    #[must_use]
    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// True when the principal holds at least one of `roles`.
    ///
    /// # Errors
    /// `InvalidParameter` when `roles` is empty: an empty requirement is a
    /// caller bug, not an open door.
    pub fn has_any_role(&self, roles: &[&str]) -> Result<bool, MembershipError> {
        if roles.is_empty() {
            return Err(MembershipError::InvalidParameter("roles"));
        }
        Ok(roles.iter().any(|role| self.is_in_role(role)))
    }

    /// True when the principal holds every one of `roles`.
    ///
    /// # Errors
    /// `InvalidParameter` when `roles` is empty.
    pub fn has_all_role(&self, roles: &[&str]) -> Result<bool, MembershipError> {
        if roles.is_empty() {
            return Err(MembershipError::InvalidParameter("roles"));
        }
        Ok(roles.iter().all(|role| self.is_in_role(role)))
    }
}
