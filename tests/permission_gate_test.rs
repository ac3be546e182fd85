// tests/permission_gate_test.rs
// S4: a user with read access to one project but none to a second is
// denied a cross-project (no scope) search under strict isolation, and
// allowed once the search is scoped to the project they hold a grant on.

mod common;

use memoryd::error::ServiceError;
use memoryd::permission::PermissionLevel;

#[tokio::test]
async fn s4_strict_isolation_denies_unscoped_search_but_allows_scoped_search() {
    let config = common::test_config(8);
    let provider = common::scripted_provider(
        8,
        r#"{"title":"t","summary":"s","content":"some content","keywords":["k"],"quality_score":0.9}"#,
    );
    // u1 holds read on p1 only; p2 is never granted.
    let orchestrator = common::start_orchestrator(
        config,
        provider,
        &[("u1", "p1", PermissionLevel::Read)],
    )
    .await;

    let unscoped = orchestrator.search_memories("u1", "x", None, 5, 0.0, true, false).await;
    assert!(
        matches!(unscoped, Err(ServiceError::PermissionDenied(_))),
        "unscoped search should be denied under strict isolation for a user without a global grant"
    );

    let scoped = orchestrator.search_memories("u1", "x", Some("p1"), 5, 0.0, true, false).await;
    assert!(scoped.is_ok(), "search scoped to a project the user holds read access on should be allowed");

    let other_project = orchestrator.search_memories("u1", "x", Some("p2"), 5, 0.0, true, false).await;
    assert!(
        matches!(other_project, Err(ServiceError::PermissionDenied(_))),
        "search scoped to a project the user has no grant on should be denied"
    );
}
