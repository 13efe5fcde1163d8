//! # Flowcap Analyzer
//!
//! Static companion to the `flowcap` runtime: re-derives the same
//! capability-flow semantics over source code and flags every sink call
//! site that is not provably safe under the configured policy.
//!
//! The pipeline has three stages. [`lower`] parses Rust text with
//! `ra_ap_syntax` and translates functions and closures into a closed
//! tagged IR ([`ir`]). [`flow`] propagates symbolic levels through that
//! IR with the runtime's own lattice, joining across branches and
//! iterating loops to a fixed point. [`report`] carries the findings in
//! a deterministic, serializable form.
//!
//! The analysis fails closed: anything it cannot parse is an error,
//! anything it cannot model is undetermined, and undetermined payloads
//! at a sink are violations. A clean report is a proof sketch, a flagged
//! report is a work list; there is no silent third state.
//!
//! ```rust
//! use flowcap::FlowConfig;
//! use flowcap_analyzer::Analyzer;
//!
//! let policy = FlowConfig::three_level_example().build().unwrap();
//! let analyzer = Analyzer::new(policy);
//!
//! let source = r#"
//! fn leak(policy: &Policy, scope: &ScopeHandle) {
//!     let v = scope.wrap(read_record(), "confidential").unwrap();
//!     let _ = policy.check_and_consume("customer_log", v);
//! }
//! "#;
//! let report = analyzer.analyze_file("pipeline.rs", source).unwrap();
//! assert!(!report.is_clean());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod flow;
pub mod ir;
pub mod lower;
pub mod report;

use thiserror::Error;

use flowcap::Policy;

pub use ir::{CallOp, Expr, FuncIr, ParamIr, Span, Stmt};
pub use report::{AnalysisReport, Violation, ViolationKind};

/// Errors the analyzer itself can fail with. Findings about the analyzed
/// code are not errors; they come back inside [`AnalysisReport`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalyzerError {
    /// The source text could not be parsed. Unparseable code cannot be
    /// vouched for, so this aborts the analysis instead of degrading it.
    #[error("parse error in {file}: {message}")]
    Parse {
        /// The file that failed to parse.
        file: String,
        /// The first parser diagnostic.
        message: String,
    },
}

/// The static analyzer, bound to one [`Policy`].
///
/// The same lattice, sink registry, and level names the runtime enforces
/// with are used for the static verdicts, so the two can never disagree
/// about what a level or a ceiling means.
#[derive(Debug, Clone)]
pub struct Analyzer {
    policy: Policy,
}

impl Analyzer {
    /// Create an analyzer over the given policy.
    pub fn new(policy: Policy) -> Self {
        Analyzer { policy }
    }

    /// Parse and analyze one source file.
    pub fn analyze_file(&self, file: &str, source: &str) -> Result<AnalysisReport, AnalyzerError> {
        let units = lower::lower_source(file, source)?;
        tracing::debug!(file, units = units.len(), "lowered source for analysis");
        Ok(self.analyze_units(&units))
    }

    /// Analyze already-lowered units. Findings from all units are merged
    /// into one report, sorted by (file, line, column, kind), deduplicated.
    pub fn analyze_units(&self, units: &[FuncIr]) -> AnalysisReport {
        let mut violations = Vec::new();
        for unit in units {
            violations.extend(flow::FlowPass::new(&self.policy).analyze_unit(unit));
        }
        violations.sort();
        violations.dedup();
        AnalysisReport { violations }
    }
}
