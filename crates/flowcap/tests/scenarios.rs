//! End-to-end enforcement scenarios over the reference three-level
//! lattice: `public < internal < confidential` with a `customer_log`
//! sink capped at `public`.

use flowcap::{
    fork, merge, BranchFn, FlowConfig, FlowError, ForkPolicy, MergePolicy, Policy,
};

fn policy() -> Policy {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    FlowConfig::three_level_example().build().unwrap()
}

/// A confidential value produced inside a nested scope, handed directly
/// to a public sink, is refused with full diagnostic detail.
#[test]
fn scenario_a_confidential_value_blocked_at_public_sink() {
    let policy = policy();
    let root = policy.root_scope();
    let internal = policy.level("internal").unwrap();
    let confidential = policy.level("confidential").unwrap();

    let err = root
        .enter(internal, |outer| {
            outer.enter(confidential, |inner| {
                let v = inner.wrap("ssn=123-45-6789".to_string(), "confidential")?;
                policy.check_and_consume("customer_log", v).map(|_| ())
            })
        })
        .unwrap_err();

    assert_eq!(
        err,
        FlowError::Leak {
            sink: "customer_log".to_string(),
            owned_level: "confidential".to_string(),
            max_level: "public".to_string(),
        }
    );
}

/// The same value passes after an explicit, justified declassification.
#[test]
fn scenario_b_declassified_value_reaches_the_sink() {
    let policy = policy();
    let root = policy.root_scope();
    let confidential = policy.level("confidential").unwrap();

    let raw = root
        .enter(confidential, |scope| {
            let v = scope.wrap("quarterly numbers look fine".to_string(), "confidential")?;
            let lowered = scope.declassify(&v, "public", "approved-summary")?;
            policy.check_and_consume("customer_log", lowered)
        })
        .unwrap();

    assert_eq!(raw, "quarterly numbers look fine");
    assert_eq!(policy.declassifications().len(), 1);
}

/// Two fork branches at `public` and `internal` merge under join-all to
/// an `internal` result.
#[test]
fn scenario_c_join_all_merge_takes_the_join() {
    let policy = policy();
    let root = policy.root_scope();
    let public = policy.level("public").unwrap();

    let branches: Vec<BranchFn<String>> = vec![
        Box::new(|scope| scope.wrap("from the docs".to_string(), "public")),
        Box::new(|scope| scope.wrap("from the wiki".to_string(), "internal")),
    ];
    let outcomes = fork(&root, public, ForkPolicy::FailFast, branches).unwrap();
    let merged = merge(&root, outcomes, MergePolicy::JoinAll, |values| {
        values.join("\n")
    })
    .unwrap();

    assert_eq!(merged.level(), policy.level("internal").unwrap());
}

/// First-success where branch 1 fails and branch 2 succeeds at
/// `confidential`: the result is exactly `confidential` — the failed
/// branch never produced a value and contributes nothing.
#[test]
fn scenario_d_first_success_uses_only_the_winning_branch() {
    let policy = policy();
    let root = policy.root_scope();
    let public = policy.level("public").unwrap();

    let branches: Vec<BranchFn<String>> = vec![
        Box::new(|_| {
            Err(FlowError::Branch {
                index: 0,
                message: "provider timeout".to_string(),
            })
        }),
        Box::new(|scope| scope.wrap("fallback answer".to_string(), "confidential")),
    ];
    let outcomes = fork(&root, public, ForkPolicy::CollectAll, branches).unwrap();
    let merged = merge(
        &root,
        outcomes,
        MergePolicy::FirstSuccess {
            join_unobserved: false,
        },
        |v| v.concat(),
    )
    .unwrap();

    assert_eq!(merged.level(), policy.level("confidential").unwrap());
}

/// The audit chain stays verifiable across a full scenario.
#[test]
fn scenario_audit_chain_verifies_end_to_end() {
    let policy = policy();
    let root = policy.root_scope();
    let confidential = policy.level("confidential").unwrap();

    let _ = root.enter(confidential, |scope| {
        let v = scope.wrap("secret".to_string(), "confidential")?;
        let _ = policy.check_and_consume("customer_log", v.clone());
        let lowered = scope.declassify(&v, "public", "redacted")?;
        policy.check_and_consume("customer_log", lowered).map(|_| ())
    });

    assert!(policy.audit().verify_chain().is_ok());
    assert!(policy.audit().len() >= 4);
}
