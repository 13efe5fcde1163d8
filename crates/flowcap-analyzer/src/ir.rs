//! Closed intermediate representation the dataflow pass runs over.
//!
//! The frontend in [`crate::lower`] translates source text into this
//! small tagged language and everything downstream operates on it alone.
//! Keeping the IR closed means the propagation rules in [`crate::flow`]
//! enumerate every construct exhaustively: a new surface form must be
//! lowered to one of these variants (or to [`CallOp::Unsupported`],
//! which the pass treats as wholly undetermined) before it can influence
//! a verdict.

use serde::{Deserialize, Serialize};

/// A position in the analyzed source, 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

/// One analyzable unit: a function or closure body with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncIr {
    /// Source file the unit came from.
    pub file: String,
    /// Function name, or a synthesized `outer::closure@line` name.
    pub name: String,
    /// Where the unit begins.
    pub span: Span,
    /// Parameters in declaration order.
    pub params: Vec<ParamIr>,
    /// Lowered body statements.
    pub body: Vec<Stmt>,
}

/// A function parameter as seen by the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamIr {
    /// Binding name.
    pub name: String,
    /// Level asserted by a `#[level(..)]` attribute, if present.
    pub declared_level: Option<String>,
    /// Whether the parameter type is a capability-owned wrapper.
    pub owned: bool,
    /// Whether the parameter is a scope handle. Its ceiling is unknown
    /// to the analysis, so wraps through it are not trusted.
    #[serde(default)]
    pub scope: bool,
}

/// Statements. Control flow is normalized to [`Stmt::Branch`]; loops are
/// lowered to a branch between the body and the empty path and iterated
/// to a fixed point by the propagation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stmt {
    /// `let target = value`.
    Assign {
        /// Name being bound.
        target: String,
        /// Right-hand side.
        value: Expr,
    },
    /// An expression evaluated for effect.
    Expr {
        /// The expression.
        value: Expr,
    },
    /// `return value` or a trailing block expression.
    Return {
        /// The returned expression, if any.
        value: Option<Expr>,
    },
    /// Alternative paths; exactly one executes at runtime.
    Branch {
        /// The alternative statement sequences.
        arms: Vec<Vec<Stmt>>,
    },
}

/// Expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    /// A constant with no capability attached.
    Literal {
        /// Source position.
        span: Span,
    },
    /// A reference to a binding.
    Ident {
        /// The referenced name.
        name: String,
        /// Source position.
        span: Span,
    },
    /// A call. String-literal configuration arguments of recognized
    /// operations are resolved into `op` during lowering; `args` carries
    /// the payload arguments (for [`CallOp::Wrap`], the receiving scope
    /// handle followed by the payload).
    Call {
        /// What the call does to capability levels.
        op: CallOp,
        /// Payload arguments.
        args: Vec<Expr>,
        /// Source position of the call.
        span: Span,
    },
}

/// The capability-relevant classification of a call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CallOp {
    /// Attach a declared level to a value. `args[0]` is the wrapping
    /// scope handle and `args[1]` the payload; the runtime floors the
    /// declared level at the scope's effective ceiling, so the result is
    /// exact only when that ceiling is statically known.
    Wrap {
        /// The declared level name.
        level: String,
    },
    /// The policy's root scope: a handle whose effective ceiling is the
    /// lattice bottom.
    RootScope,
    /// Level-preserving transform of a single owned value.
    Map,
    /// Combine owned values; the result takes the join of the inputs.
    Combine,
    /// Audited lowering to `target`.
    Declassify {
        /// The target level name.
        target: String,
        /// Whether a non-empty justification literal was supplied.
        justified: bool,
    },
    /// Hand a value to a registered sink.
    Sink {
        /// The sink name, or `"<dynamic>"` when not a literal.
        name: String,
    },
    /// A call the analysis has no model for. The result level is the
    /// join of the payload argument levels.
    Opaque {
        /// Callee name, for diagnostics.
        name: String,
    },
    /// A construct the frontend could not lower at all. The result is
    /// always undetermined.
    Unsupported,
}

impl Expr {
    /// The source position of this expression.
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal { span } | Expr::Ident { span, .. } | Expr::Call { span, .. } => *span,
        }
    }
}
