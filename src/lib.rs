//! # Custode (Membership & Session Core)
//!
//! `custode` is the authentication and session-management core of a web
//! application: account credential handling, session issuance and validation
//! (including anonymous sessions), login-attempt throttling, and a
//! double-submit antiforgery token scheme built on symmetric encryption.
//!
//! HTTP routing, templating, cookie plumbing, and configuration loading are
//! collaborator concerns: they call into this crate through the
//! [`membership::MembershipEngine`] and [`antiforgery`] surfaces and the
//! store contracts in [`store`].
//!
//! ## Sessions
//!
//! Every request is expected to carry *some* session. Resolution goes through
//! [`membership::MembershipEngine::try_login_by_session_key`]; when that
//! fails for any reason (missing cookie, undecryptable token, expired
//! session) the collaborator falls back to
//! [`membership::MembershipEngine::initialize_anonymous_session`].
//!
//! Expiration is absolute: sessions carry a UTC expiration computed at
//! issuance, checked lazily at read time. Reads never extend a session and
//! no background reaper runs.
//!
//! ## Login Throttling
//!
//! Failed logins are recorded per userkey; [`membership::MembershipEngine::try_login`]
//! counts failures within a trailing window (default 15 minutes) and denies
//! with `TooManyAttempts` at the configured limit (default 4) *before*
//! verifying the password.
//!
//! ## Antiforgery
//!
//! Mutating requests are guarded by the double-submit scheme in
//! [`antiforgery`]: one logical token value, encrypted twice under a key
//! derived from the session token, delivered as a cookie and as a
//! header-or-form value.

pub mod antiforgery;
pub mod crypto;
pub mod error;
pub mod membership;
pub mod store;
