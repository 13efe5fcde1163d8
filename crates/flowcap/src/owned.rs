//! Capability-tagged values and the operations that move them.
//!
//! An [`Owned`] value pairs a plain value with the capability level it
//! requires and the provenance chain that produced it. Owned values are
//! immutable: every transform yields a new value. The raw inner value
//! escapes only through [`Policy::check_and_consume`] (a sink write below
//! the sink's ceiling) — there is deliberately no public accessor.
//!
//! All producing operations live on [`ScopeHandle`], because every derived
//! value belongs to the scope that derived it and is floored at that
//! scope's effective ceiling.
//!
//! [`Policy::check_and_consume`]: crate::config::Policy::check_and_consume

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::FlowEvent;
use crate::config::Policy;
use crate::error::{FlowError, Result};
use crate::lattice::Level;
use crate::scope::ScopeHandle;

/// One step in a value's provenance chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    /// The scope in which this step happened.
    pub scope_id: Uuid,
    /// The operation name (`wrap`, `combine`, a caller-supplied transform
    /// name, `declassify`, ...).
    pub operation: String,
    /// When the step happened.
    pub timestamp: DateTime<Utc>,
}

impl ProvenanceEntry {
    fn now(scope_id: Uuid, operation: &str) -> Self {
        Self {
            scope_id,
            operation: operation.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// The auditable record of an explicit level lowering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclassificationRecord {
    /// The scope that performed the declassification.
    pub owning_scope_id: Uuid,
    /// Level name before lowering.
    pub from_level: String,
    /// Level name after lowering.
    pub to_level: String,
    /// The caller-supplied justification tag.
    pub justification_tag: String,
}

/// A value tagged with the capability level it requires.
#[derive(Debug, Clone)]
pub struct Owned<T> {
    value: T,
    level: Level,
    provenance: Vec<ProvenanceEntry>,
}

impl<T> Owned<T> {
    pub(crate) fn new(value: T, level: Level, provenance: Vec<ProvenanceEntry>) -> Self {
        Self {
            value,
            level,
            provenance,
        }
    }

    /// The capability level this value requires of any consumer.
    pub fn level(&self) -> Level {
        self.level
    }

    /// The ordered chain of operations that produced this value.
    pub fn provenance(&self) -> &[ProvenanceEntry] {
        &self.provenance
    }

    /// Read-only view used by transforms within the core.
    pub(crate) fn value(&self) -> &T {
        &self.value
    }

    /// Extract the raw value. Crate-private: the only public paths out
    /// are a checked sink write or an audited declassification followed
    /// by one.
    pub(crate) fn into_value(self) -> T {
        self.value
    }
}

impl ScopeHandle {
    /// Wrap a plain value at the named level inside this scope.
    ///
    /// The resulting level is the join of the named level and this
    /// scope's effective ceiling: a scope cannot mint values below its
    /// own ambient trust requirement. Fails with
    /// [`FlowError::InvalidLevel`] when the name is not registered.
    pub fn wrap<T>(&self, value: T, level_name: &str) -> Result<Owned<T>> {
        let declared = self.policy().level(level_name)?;
        let level = self.policy().lattice().join(declared, self.ceiling());
        Ok(Owned::new(
            value,
            level,
            vec![ProvenanceEntry::now(self.id(), "wrap")],
        ))
    }

    /// Transform a value, preserving its level.
    ///
    /// The original is untouched; the result carries the original
    /// provenance with `operation` appended.
    pub fn map<T, U>(&self, owned: &Owned<T>, operation: &str, f: impl FnOnce(&T) -> U) -> Owned<U> {
        let mut provenance = owned.provenance.clone();
        provenance.push(ProvenanceEntry::now(self.id(), operation));
        Owned::new(f(owned.value()), owned.level, provenance)
    }

    /// Combine two values; the result's level is the join of both inputs.
    ///
    /// This is the only way two owned values meet, and it is where mixed
    /// sensitivity is prevented from silently washing out.
    pub fn combine<A, B, U>(
        &self,
        a: &Owned<A>,
        b: &Owned<B>,
        operation: &str,
        f: impl FnOnce(&A, &B) -> U,
    ) -> Owned<U> {
        let level = self.policy().lattice().join(a.level, b.level);
        let mut provenance = a.provenance.clone();
        provenance.extend(b.provenance.iter().cloned());
        provenance.push(ProvenanceEntry::now(self.id(), operation));
        Owned::new(f(a.value(), b.value()), level, provenance)
    }

    /// Explicitly lower a value's level — the audited escape hatch.
    ///
    /// Requires a non-empty justification tag and a target strictly below
    /// the current level; anything else is
    /// [`FlowError::UnauthorizedDeclassify`]. Which callers may supply a
    /// valid justification is an external policy concern.
    pub fn declassify<T: Clone>(
        &self,
        owned: &Owned<T>,
        target_name: &str,
        justification: &str,
    ) -> Result<Owned<T>> {
        let lattice = self.policy().lattice();
        let target = self.policy().level(target_name)?;

        if justification.trim().is_empty() {
            return Err(FlowError::UnauthorizedDeclassify {
                reason: "missing justification tag".to_string(),
            });
        }
        if target == owned.level || !lattice.leq(target, owned.level) {
            return Err(FlowError::UnauthorizedDeclassify {
                reason: format!(
                    "target level '{}' is not strictly below '{}'",
                    lattice.name(target),
                    lattice.name(owned.level)
                ),
            });
        }

        let from = lattice.name(owned.level).to_string();
        let to = lattice.name(target).to_string();
        tracing::info!(
            scope = %self.id(),
            from = %from,
            to = %to,
            justification,
            "declassified value"
        );
        self.policy().audit().record(FlowEvent::Declassified {
            scope_id: self.id(),
            from,
            to,
            justification: justification.to_string(),
        });

        let mut provenance = owned.provenance.clone();
        provenance.push(ProvenanceEntry::now(self.id(), "declassify"));
        Ok(Owned::new(owned.value().clone(), target, provenance))
    }
}

impl Policy {
    /// All declassification records in audit order.
    pub fn declassifications(&self) -> Vec<DeclassificationRecord> {
        self.audit()
            .entries_where(|e| matches!(e, FlowEvent::Declassified { .. }))
            .into_iter()
            .filter_map(|entry| match entry.event {
                FlowEvent::Declassified {
                    scope_id,
                    from,
                    to,
                    justification,
                } => Some(DeclassificationRecord {
                    owning_scope_id: scope_id,
                    from_level: from,
                    to_level: to,
                    justification_tag: justification,
                }),
                _ => None,
            })
            .collect()
    }
}
