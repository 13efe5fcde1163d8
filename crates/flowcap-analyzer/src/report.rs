//! Analysis findings and their serialized report form.

use serde::{Deserialize, Serialize};

use crate::ir::Span;

/// What went wrong at a flagged site.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A payload with a proven level flows to a sink with a lower ceiling.
    Leak,
    /// The payload level could not be statically determined.
    UndeterminedLevel,
    /// A never-wrapped value reaches a sink.
    RawValueAtSink,
    /// The named sink is not registered.
    UnknownSink,
    /// A level name that the lattice does not declare.
    UnknownLevel,
    /// A re-wrap that would lower an owned value outside declassify.
    SuspiciousRewrap,
    /// Declassification without a non-empty justification.
    UnjustifiedDeclassify,
    /// Declassification whose target is not strictly below the source.
    IllegalDeclassify,
}

/// One flagged site. Ordering is (file, line, column, kind) so reports
/// are stable across runs regardless of traversal order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Violation {
    /// Source file.
    pub file: String,
    /// Position of the flagged expression.
    pub span: Span,
    /// The kind of finding.
    pub kind: ViolationKind,
    /// The sink or operation the finding is about.
    pub subject: String,
    /// The ceiling or target level the site had to satisfy, if any.
    pub required_level: Option<String>,
    /// The level the analysis proved for the payload, if any.
    pub observed_level: Option<String>,
    /// Human-readable explanation.
    pub reason: String,
}

/// The full result of analyzing one or more units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// All findings, sorted by (file, line, column, kind) and deduplicated.
    pub violations: Vec<Violation>,
}

impl AnalysisReport {
    /// Whether the analysis found nothing to flag.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Serialize the report as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}: {:?} [{}]: {}",
            self.file, self.span.line, self.span.column, self.kind, self.subject, self.reason
        )
    }
}
