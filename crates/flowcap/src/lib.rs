//! # Flowcap
//!
//! Capability-scoped values and runtime information-flow enforcement for
//! pipelines that route sensitive data through LLM calls.
//!
//! Application code acquires a [`ScopeHandle`], produces [`Owned`] values
//! inside it, and either passes them onward (sensitivity preserved), hands
//! them to a registered sink through the single checked choke point
//! ([`Policy::check_and_consume`]), or lowers them through the audited
//! [`declassify`](ScopeHandle::declassify) escape hatch. A value computed
//! from restricted data can never reach a sink with a lower ceiling
//! without an explicit, recorded declassification.
//!
//! ## Quick Start
//!
//! ```rust
//! use flowcap::{FlowConfig, FlowError};
//!
//! let policy = FlowConfig::three_level_example().build().unwrap();
//! let root = policy.root_scope();
//!
//! let secret = root.wrap("raw credential".to_string(), "confidential").unwrap();
//! let masked = root.map(&secret, "mask", |s| format!("{}***", &s[..3]));
//!
//! // Refused: the sink is capped at `public`.
//! assert!(matches!(
//!     policy.check_and_consume("customer_log", masked),
//!     Err(FlowError::Leak { .. })
//! ));
//!
//! // Permitted after an audited declassification.
//! let summary = root.declassify(&secret, "public", "approved-summary").unwrap();
//! let raw = policy.check_and_consume("customer_log", summary).unwrap();
//! assert_eq!(raw, "raw credential");
//! ```
//!
//! ## Design
//!
//! - The capability lattice and sink registry are built once from a
//!   [`FlowConfig`] document into an immutable [`Policy`], passed by
//!   reference everywhere. No hidden singletons.
//! - Scopes form a tree; a child's effective ceiling is the join of its
//!   own and every ancestor's, so nesting can only raise the ambient
//!   trust requirement.
//! - Scope bindings are explicit handles captured lexically, so they
//!   survive async suspension and concurrent branches never interfere.
//! - Every enforcement decision lands in a hash-chained [`AuditLog`].
//!
//! The companion crate `flowcap-analyzer` re-derives these semantics
//! statically over source code and flags sink call sites that are not
//! provably safe.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod audit;
pub mod combine;
pub mod config;
pub mod error;
pub mod lattice;
pub mod owned;
pub mod scope;
pub mod sink;

pub use audit::{AuditEntry, AuditLog, ChainError, FlowEvent};
pub use combine::{
    fork, fork_concurrent, merge, AsyncBranchFn, BranchFn, BranchFuture, BranchOutcome,
    ForkPolicy, MergePolicy,
};
pub use config::{FlowConfig, Policy, SinkDecl};
pub use error::{FlowError, Result};
pub use lattice::{CapabilityLattice, Level, OrderPair};
pub use owned::{DeclassificationRecord, Owned, ProvenanceEntry};
pub use scope::{ScopeHandle, ScopeState};
pub use sink::{Sink, SinkKind, SinkRegistry};
