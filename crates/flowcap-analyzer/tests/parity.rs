//! Parity between runtime enforcement and static verdicts.
//!
//! Each case pairs a source snippet with a runtime execution of the same
//! pipeline over the same policy. Where the runtime refuses a write, the
//! analyzer must flag the call site; where the runtime permits it, the
//! analyzer must stay quiet.

use flowcap::{FlowConfig, FlowError, Policy};
use flowcap_analyzer::{Analyzer, ViolationKind};

fn policy() -> Policy {
    FlowConfig::three_level_example().build().unwrap()
}

fn analyze(source: &str) -> Vec<flowcap_analyzer::Violation> {
    Analyzer::new(policy())
        .analyze_file("case.rs", source)
        .unwrap()
        .violations
}

#[test]
fn parity_confidential_to_public_sink() {
    // Static side.
    let violations = analyze(
        r#"
fn pipeline(policy: &Policy) {
    let scope = policy.root_scope();
    let v = scope.wrap(load_record(), "confidential").unwrap();
    let _ = policy.check_and_consume("customer_log", v);
}
"#,
    );
    assert_eq!(violations.len(), 1, "{violations:?}");
    assert_eq!(violations[0].kind, ViolationKind::Leak);
    assert_eq!(violations[0].subject, "customer_log");
    assert_eq!(violations[0].observed_level.as_deref(), Some("confidential"));
    assert_eq!(violations[0].required_level.as_deref(), Some("public"));
    assert_eq!(violations[0].span.line, 5);

    // Runtime side.
    let policy = policy();
    let root = policy.root_scope();
    let v = root.wrap("record".to_string(), "confidential").unwrap();
    assert!(matches!(
        policy.check_and_consume("customer_log", v),
        Err(FlowError::Leak { .. })
    ));
}

#[test]
fn parity_public_to_public_sink() {
    let violations = analyze(
        r#"
fn pipeline(policy: &Policy) {
    let scope = policy.root_scope();
    let v = scope.wrap(load_banner(), "public").unwrap();
    let _ = policy.check_and_consume("customer_log", v);
}
"#,
    );
    assert!(violations.is_empty(), "{violations:?}");

    let policy = policy();
    let root = policy.root_scope();
    let v = root.wrap("banner".to_string(), "public").unwrap();
    assert!(policy.check_and_consume("customer_log", v).is_ok());
}

#[test]
fn parity_map_preserves_the_level() {
    let violations = analyze(
        r#"
fn pipeline(policy: &Policy) {
    let scope = policy.root_scope();
    let v = scope.wrap(load_record(), "confidential").unwrap();
    let masked = scope.map(&v, "mask", |s| redact(s));
    let _ = policy.check_and_consume("customer_log", masked);
}
"#,
    );
    assert_eq!(violations.len(), 1, "{violations:?}");
    assert_eq!(violations[0].kind, ViolationKind::Leak);
    assert_eq!(violations[0].span.line, 6);

    let policy = policy();
    let root = policy.root_scope();
    let v = root.wrap("record".to_string(), "confidential").unwrap();
    let masked = root.map(&v, "mask", |s| format!("{s}***"));
    assert!(matches!(
        policy.check_and_consume("customer_log", masked),
        Err(FlowError::Leak { .. })
    ));
}

#[test]
fn parity_combine_takes_the_join() {
    let violations = analyze(
        r#"
fn pipeline(policy: &Policy) {
    let scope = policy.root_scope();
    let a = scope.wrap(load_banner(), "public").unwrap();
    let b = scope.wrap(load_record(), "internal").unwrap();
    let joined = scope.combine(&a, &b, "concat", |x, y| concat(x, y));
    let _ = policy.check_and_consume("customer_log", joined);
}
"#,
    );
    assert_eq!(violations.len(), 1, "{violations:?}");
    assert_eq!(violations[0].kind, ViolationKind::Leak);
    assert_eq!(violations[0].observed_level.as_deref(), Some("internal"));

    let policy = policy();
    let root = policy.root_scope();
    let a = root.wrap("banner".to_string(), "public").unwrap();
    let b = root.wrap("record".to_string(), "internal").unwrap();
    let joined = root.combine(&a, &b, "concat", |x, y| format!("{x}{y}"));
    assert!(matches!(
        policy.check_and_consume("customer_log", joined),
        Err(FlowError::Leak { .. })
    ));
}

#[test]
fn parity_declassified_value_passes() {
    let violations = analyze(
        r#"
fn pipeline(policy: &Policy) {
    let scope = policy.root_scope();
    let v = scope.wrap(load_record(), "confidential").unwrap();
    let summary = scope.declassify(&v, "public", "approved-summary").unwrap();
    let _ = policy.check_and_consume("customer_log", summary);
}
"#,
    );
    assert!(violations.is_empty(), "{violations:?}");

    let policy = policy();
    let root = policy.root_scope();
    let scope_result = root.enter(policy.level("confidential").unwrap(), |scope| {
        let v = scope.wrap("record".to_string(), "confidential")?;
        let summary = scope.declassify(&v, "public", "approved-summary")?;
        policy.check_and_consume("customer_log", summary)
    });
    assert!(scope_result.is_ok());
}

#[test]
fn parity_wrap_inside_elevated_scope_is_not_trusted() {
    // The runtime floors a wrap at the enclosing scope's effective
    // ceiling, so a "public" wrap inside a confidential region still
    // leaks. Statically the closure's scope handle has an unknown
    // ceiling, so the analyzer must refuse to vouch for the wrap.
    let violations = analyze(
        r#"
fn pipeline(policy: &Policy) {
    let root = policy.root_scope();
    let ceiling = policy.level("confidential").unwrap();
    let _ = root.enter(ceiling, |scope| {
        let v = scope.wrap(load_banner(), "public").unwrap();
        policy.check_and_consume("customer_log", v)
    });
}
"#,
    );
    assert_eq!(violations.len(), 1, "{violations:?}");
    assert_eq!(violations[0].kind, ViolationKind::UndeterminedLevel);
    assert_eq!(violations[0].subject, "customer_log");

    // Runtime side: the same pipeline refuses the write as a leak.
    let policy = policy();
    let root = policy.root_scope();
    let confidential = policy.level("confidential").unwrap();
    let err = root
        .enter(confidential, |scope| {
            let v = scope.wrap("banner".to_string(), "public")?;
            policy.check_and_consume("customer_log", v).map(|_| ())
        })
        .unwrap_err();
    assert!(matches!(err, FlowError::Leak { .. }));
}

#[test]
fn parity_unknown_sink_fails_closed_on_both_sides() {
    let violations = analyze(
        r#"
fn pipeline(policy: &Policy) {
    let scope = policy.root_scope();
    let v = scope.wrap(load_banner(), "public").unwrap();
    let _ = policy.check_and_consume("telemetry", v);
}
"#,
    );
    assert_eq!(violations.len(), 1, "{violations:?}");
    assert_eq!(violations[0].kind, ViolationKind::UnknownSink);

    let policy = policy();
    let root = policy.root_scope();
    let v = root.wrap("banner".to_string(), "public").unwrap();
    assert!(matches!(
        policy.check_and_consume("telemetry", v),
        Err(FlowError::UnknownSink { .. })
    ));
}

#[test]
fn static_branch_join_flags_the_worst_path() {
    // One arm rebinds the payload at a higher level. The runtime leaks
    // only when that arm executes; the analyzer must assume it can.
    let violations = analyze(
        r#"
fn pipeline(policy: &Policy, escalate: bool) {
    let scope = policy.root_scope();
    let mut v = scope.wrap(load_banner(), "public").unwrap();
    if escalate {
        v = scope.wrap(load_record(), "confidential").unwrap();
    }
    let _ = policy.check_and_consume("customer_log", v);
}
"#,
    );
    assert_eq!(violations.len(), 1, "{violations:?}");
    assert_eq!(violations[0].kind, ViolationKind::Leak);
    assert_eq!(violations[0].span.line, 8);
}

#[test]
fn static_level_attribute_grounds_a_parameter() {
    let clean = analyze(
        r#"
fn emit(policy: &Policy, #[level(public)] payload: Owned<String>) {
    let _ = policy.check_and_consume("customer_log", payload);
}
"#,
    );
    assert!(clean.is_empty(), "{clean:?}");

    let flagged = analyze(
        r#"
fn emit(policy: &Policy, payload: Owned<String>) {
    let _ = policy.check_and_consume("customer_log", payload);
}
"#,
    );
    assert_eq!(flagged.len(), 1, "{flagged:?}");
    assert_eq!(flagged[0].kind, ViolationKind::UndeterminedLevel);
}

#[test]
fn static_loop_accumulation_reaches_fixed_point() {
    let violations = analyze(
        r#"
fn pipeline(policy: &Policy, batch: Vec<String>) {
    let scope = policy.root_scope();
    let mut acc = scope.wrap(seed(), "public").unwrap();
    for item in batch {
        let next = scope.wrap(classify(item), "internal").unwrap();
        acc = scope.combine(&acc, &next, "fold", |a, b| merge(a, b));
    }
    let _ = policy.check_and_consume("customer_log", acc);
}
"#,
    );
    assert_eq!(violations.len(), 1, "{violations:?}");
    assert_eq!(violations[0].kind, ViolationKind::Leak);
    assert_eq!(violations[0].observed_level.as_deref(), Some("internal"));
    assert_eq!(violations[0].span.line, 9);
}

#[test]
fn static_sink_inside_closure_is_checked() {
    let violations = analyze(
        r#"
fn pipeline(policy: &Policy, scope: &ScopeHandle) {
    let handler = move |v| {
        let _ = policy.check_and_consume("customer_log", v);
    };
    run(handler);
}
"#,
    );
    // The closure parameter has no proven level.
    assert_eq!(violations.len(), 1, "{violations:?}");
    assert_eq!(violations[0].kind, ViolationKind::UndeterminedLevel);
}

#[test]
fn static_report_is_deterministic_and_sorted() {
    let source = r#"
fn second(policy: &Policy) {
    let scope = policy.root_scope();
    let v = scope.wrap(load_record(), "confidential").unwrap();
    let _ = policy.check_and_consume("customer_log", v);
}

fn first(policy: &Policy) {
    let scope = policy.root_scope();
    let v = scope.wrap(load_record(), "internal").unwrap();
    let _ = policy.check_and_consume("customer_log", v);
}
"#;
    let a = analyze(source);
    let b = analyze(source);
    assert_eq!(a, b);
    assert_eq!(a.len(), 2);
    assert!(a[0].span.line < a[1].span.line);
}

#[test]
fn static_rewrap_laundering_is_flagged_while_runtime_cannot_see_it() {
    // Runtime wrap cannot inspect provenance of an unwrapped value; the
    // analyzer can, and flags the laundering pattern.
    let violations = analyze(
        r#"
fn pipeline(policy: &Policy) {
    let scope = policy.root_scope();
    let v = scope.wrap(load_record(), "confidential").unwrap();
    let laundered = scope.wrap(v, "public").unwrap();
    let _ = policy.check_and_consume("customer_log", laundered);
}
"#,
    );
    let kinds: Vec<ViolationKind> = violations.iter().map(|v| v.kind).collect();
    assert!(kinds.contains(&ViolationKind::SuspiciousRewrap), "{violations:?}");
}

#[test]
fn parse_failure_is_an_error_not_a_clean_report() {
    let result = Analyzer::new(policy()).analyze_file("broken.rs", "fn pipeline( {");
    assert!(result.is_err());
}
