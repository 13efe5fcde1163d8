//! Configuration surface and the immutable policy object built from it.
//!
//! Capability levels, their order, and sink declarations arrive as one
//! static document at process start. [`FlowConfig::build`] validates the
//! whole document and produces a [`Policy`] — the explicit, shareable
//! object every scope and the static analyzer receive by reference. There
//! is deliberately no process-wide singleton: tests and embedders
//! construct as many independent policies as they like.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::AuditLog;
use crate::error::{FlowError, Result};
use crate::lattice::{CapabilityLattice, Level, OrderPair};
use crate::scope::ScopeHandle;
use crate::sink::{SinkKind, SinkRegistry};

/// A declared sink in the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkDecl {
    /// Sink name, referenced by `check_and_consume` call sites.
    pub name: String,
    /// Name of the maximum level the sink accepts.
    pub max_level: String,
    /// What kind of boundary the sink is.
    pub kind: SinkKind,
}

/// The static configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Declared capability level names.
    #[serde(default)]
    pub levels: Vec<String>,
    /// Declared `lower < upper` pairs.
    #[serde(default)]
    pub order: Vec<OrderPair>,
    /// Declared sinks.
    #[serde(default)]
    pub sinks: Vec<SinkDecl>,
}

impl FlowConfig {
    /// Parse a configuration document from JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| FlowError::config(format!("invalid config document: {e}")))
    }

    /// The `public < internal < confidential` lattice with a
    /// `customer_log` sink capped at `public` — the shape used throughout
    /// the documentation and tests.
    pub fn three_level_example() -> Self {
        Self {
            levels: vec![
                "public".to_string(),
                "internal".to_string(),
                "confidential".to_string(),
            ],
            order: vec![
                OrderPair {
                    lower: "public".to_string(),
                    upper: "internal".to_string(),
                },
                OrderPair {
                    lower: "internal".to_string(),
                    upper: "confidential".to_string(),
                },
            ],
            sinks: vec![SinkDecl {
                name: "customer_log".to_string(),
                max_level: "public".to_string(),
                kind: SinkKind::Log,
            }],
        }
    }

    /// Validate the document and build an immutable [`Policy`].
    ///
    /// Fails fast with [`FlowError::Config`] on any malformation —
    /// duplicate or cyclic levels, order pairs or sink ceilings naming
    /// unknown levels, conflicting sink redeclarations — before any scope
    /// can be created.
    pub fn build(&self) -> Result<Policy> {
        let lattice = CapabilityLattice::build(&self.levels, &self.order)?;

        let mut sinks = SinkRegistry::default();
        for decl in &self.sinks {
            let max_level = lattice.level(&decl.max_level).map_err(|_| {
                FlowError::config(format!(
                    "sink '{}' names unknown level '{}'",
                    decl.name, decl.max_level
                ))
            })?;
            sinks.register(&decl.name, max_level, decl.kind)?;
        }

        Ok(Policy {
            inner: Arc::new(PolicyInner {
                lattice,
                sinks,
                audit: AuditLog::in_memory(),
            }),
        })
    }
}

#[derive(Debug)]
struct PolicyInner {
    lattice: CapabilityLattice,
    sinks: SinkRegistry,
    audit: AuditLog,
}

/// The immutable enforcement policy: lattice, sinks, audit log.
///
/// Cloning is cheap and shares the underlying state. Read-only after
/// construction, so it is freely consulted from concurrent scopes
/// without synchronization.
#[derive(Debug, Clone)]
pub struct Policy {
    inner: Arc<PolicyInner>,
}

impl Policy {
    /// The capability lattice.
    pub fn lattice(&self) -> &CapabilityLattice {
        &self.inner.lattice
    }

    /// The sink registry.
    pub fn sinks(&self) -> &SinkRegistry {
        &self.inner.sinks
    }

    /// The audit log shared by everything under this policy.
    pub fn audit(&self) -> &AuditLog {
        &self.inner.audit
    }

    /// Look up a level handle by name.
    pub fn level(&self, name: &str) -> Result<Level> {
        self.inner.lattice.level(name)
    }

    /// A fresh root scope under this policy, with the bottom ceiling.
    pub fn root_scope(&self) -> ScopeHandle {
        ScopeHandle::root(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_example() {
        let policy = FlowConfig::three_level_example().build().unwrap();
        assert!(policy.level("confidential").is_ok());
        assert_eq!(policy.sinks().len(), 1);
        assert!(policy.audit().is_empty());
    }

    #[test]
    fn test_json_round_trip() {
        let config = FlowConfig::three_level_example();
        let json = serde_json::to_string(&config).unwrap();
        let back = FlowConfig::from_json(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn test_from_json_document() {
        let config = FlowConfig::from_json(
            r#"{
                "levels": ["public", "secret"],
                "order": [{"lower": "public", "upper": "secret"}],
                "sinks": [{"name": "audit_cache", "max_level": "secret", "kind": "cache"}]
            }"#,
        )
        .unwrap();
        let policy = config.build().unwrap();
        assert_eq!(policy.sinks().get("audit_cache").unwrap().kind, crate::sink::SinkKind::Cache);
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = FlowConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, FlowError::Config { .. }));
    }

    #[test]
    fn test_sink_with_unknown_level_rejected() {
        let mut config = FlowConfig::three_level_example();
        config.sinks[0].max_level = "ghost".to_string();
        let err = config.build().unwrap_err();
        assert!(matches!(err, FlowError::Config { .. }));
    }

    #[test]
    fn test_policies_are_independent() {
        let a = FlowConfig::three_level_example().build().unwrap();
        let b = FlowConfig::three_level_example().build().unwrap();
        let root = a.root_scope();
        let owned = root.wrap(1_u8, "public").unwrap();
        a.check_and_consume("customer_log", owned).unwrap();
        assert_eq!(a.audit().len(), 1);
        assert!(b.audit().is_empty());
    }
}
