//! End-to-end flow through the public API: anonymous bootstrap, signup,
//! login, antiforgery round trip, logout.

use custode::antiforgery;
use custode::error::MembershipError;
use custode::membership::{MembershipEngine, MembershipOptions};
use custode::store::MemoryMembershipStore;

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn full_session_lifecycle() {
    let engine =
        MembershipEngine::new(MemoryMembershipStore::new(), MembershipOptions::new()).unwrap();

    // First contact: no cookie, so the request gets an anonymous session.
    let anonymous = engine
        .initialize_anonymous_session("203.0.113.9", Some("Mozilla/5.0"))
        .await
        .unwrap();
    assert!(!anonymous.principal.authenticated);

    // The signup page issues an antiforgery pair bound to that session.
    let tokens = antiforgery::issue(Some(&anonymous.session), None).unwrap();
    antiforgery::validate(
        "POST",
        Some(&anonymous.session),
        Some(&tokens.cookie_value),
        Some(&tokens.page_value),
    )
    .unwrap();

    // Signup, then login with the new credentials.
    engine
        .create_account("ada@example.com", "Tr0ub4dor!", None, None)
        .await
        .unwrap();
    let login = engine
        .try_login("ada@example.com", "Tr0ub4dor!", true, "203.0.113.9", None)
        .await
        .unwrap();
    assert!(login.principal.authenticated);

    // Tokens issued under the anonymous session are useless now.
    assert!(antiforgery::validate(
        "POST",
        Some(&login.session),
        Some(&tokens.cookie_value),
        Some(&tokens.page_value),
    )
    .is_err());

    // A fresh pair under the authenticated session validates.
    let tokens = antiforgery::issue(Some(&login.session), None).unwrap();
    antiforgery::validate(
        "POST",
        Some(&login.session),
        Some(&tokens.cookie_value),
        Some(&tokens.page_value),
    )
    .unwrap();

    // The session cookie resolves on subsequent requests until logout.
    let resolved = engine
        .try_login_by_session_key(&login.session.token)
        .await
        .unwrap()
        .unwrap();
    assert!(resolved.principal.authenticated);

    engine.destroy_session(&login.session.token).await.unwrap();
    assert!(engine
        .try_login_by_session_key(&login.session.token)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn lockout_scenario_from_repeated_failures() {
    let engine =
        MembershipEngine::new(MemoryMembershipStore::new(), MembershipOptions::new()).unwrap();
    engine
        .create_account("ada@example.com", "Tr0ub4dor!", None, None)
        .await
        .unwrap();

    for _ in 0..4 {
        let denied = engine
            .try_login("ada@example.com", "WrongPass", false, "1.2.3.4", None)
            .await;
        assert!(matches!(denied, Err(MembershipError::WrongCombo)));
    }

    let locked_out = engine
        .try_login("ada@example.com", "Tr0ub4dor!", false, "1.2.3.4", None)
        .await;
    assert!(matches!(locked_out, Err(MembershipError::TooManyAttempts)));
}
