//! Symbolic propagation of capability levels over the IR.
//!
//! The abstract domain mirrors the runtime exactly where it can and
//! degrades to [`Sym::Undetermined`] where it cannot. The soundness
//! direction is fixed: a sink call site passes only when the analysis
//! can prove the payload level flows below the sink ceiling, so every
//! loss of precision surfaces as a reported violation, never as a
//! silent pass.

use std::collections::BTreeMap;

use flowcap::{Level, Policy};

use crate::ir::{CallOp, Expr, FuncIr, Span, Stmt};
use crate::report::{Violation, ViolationKind};

/// Symbolic level of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sym {
    /// Not capability-owned; carries no level.
    Raw,
    /// Owned at exactly this level.
    Exact(Level),
    /// A scope handle whose effective ceiling is statically known
    /// (`Some`) or not (`None`).
    Scope(Option<Level>),
    /// Owned status or level not statically known.
    Undetermined,
}

/// Join of two symbolic levels across alternative paths. Mixing an
/// owned value with a raw one loses the proof either way.
fn join_sym(policy: &Policy, a: Sym, b: Sym) -> Sym {
    match (a, b) {
        (Sym::Raw, Sym::Raw) => Sym::Raw,
        (Sym::Exact(x), Sym::Exact(y)) => Sym::Exact(policy.lattice().join(x, y)),
        (Sym::Scope(x), Sym::Scope(y)) => Sym::Scope(if x == y { x } else { None }),
        _ => Sym::Undetermined,
    }
}

/// The level a call's payload carries into the operation: the lattice
/// join of every owned argument, `Raw` when no argument is owned, and
/// `Undetermined` as soon as any argument is. Scope handles carry no
/// payload level of their own.
fn payload(policy: &Policy, args: &[Sym]) -> Sym {
    let mut acc = Sym::Raw;
    for &sym in args {
        acc = match (acc, sym) {
            (current, Sym::Raw | Sym::Scope(_)) => current,
            (Sym::Raw, other) => other,
            (Sym::Exact(x), Sym::Exact(y)) => Sym::Exact(policy.lattice().join(x, y)),
            _ => Sym::Undetermined,
        };
    }
    acc
}

type Env = BTreeMap<String, Sym>;

pub(crate) struct FlowPass<'a> {
    policy: &'a Policy,
    file: String,
    violations: Vec<Violation>,
}

impl<'a> FlowPass<'a> {
    pub(crate) fn new(policy: &'a Policy) -> Self {
        FlowPass {
            policy,
            file: String::new(),
            violations: Vec::new(),
        }
    }

    /// Run the pass over one unit and return its violations, sorted and
    /// deduplicated. Loop arms are re-executed to a fixed point, so the
    /// same site can fire more than once before deduplication.
    pub(crate) fn analyze_unit(mut self, unit: &FuncIr) -> Vec<Violation> {
        self.file = unit.file.clone();
        let mut env = Env::new();
        for param in &unit.params {
            let sym = match &param.declared_level {
                Some(name) => match self.policy.level(name) {
                    Ok(level) => Sym::Exact(level),
                    Err(_) => {
                        self.report(
                            unit.span,
                            ViolationKind::UnknownLevel,
                            &param.name,
                            None,
                            Some(name.clone()),
                            format!("parameter attribute names undeclared level '{name}'"),
                        );
                        Sym::Undetermined
                    }
                },
                None if param.scope => Sym::Scope(None),
                None if param.owned => Sym::Undetermined,
                None => Sym::Raw,
            };
            env.insert(param.name.clone(), sym);
        }
        self.exec_stmts(&unit.body, &mut env);
        self.violations.sort();
        self.violations.dedup();
        self.violations
    }

    fn exec_stmts(&mut self, stmts: &[Stmt], env: &mut Env) {
        for stmt in stmts {
            match stmt {
                Stmt::Assign { target, value } => {
                    let sym = self.eval(value, env);
                    env.insert(target.clone(), sym);
                }
                Stmt::Expr { value } => {
                    let _ = self.eval(value, env);
                }
                Stmt::Return { value } => {
                    if let Some(value) = value {
                        let _ = self.eval(value, env);
                    }
                }
                Stmt::Branch { arms } => self.exec_branch(arms, env),
            }
        }
    }

    /// Execute every arm from the incoming environment and join the
    /// results pointwise. Iterated until the environment stabilizes,
    /// bounded by the lattice height, so loop back-edges converge.
    fn exec_branch(&mut self, arms: &[Vec<Stmt>], env: &mut Env) {
        let max_rounds = self.policy.lattice().level_names().len() + 2;
        for _ in 0..max_rounds {
            let mut arm_envs = Vec::with_capacity(arms.len());
            for arm in arms {
                let mut arm_env = env.clone();
                self.exec_stmts(arm, &mut arm_env);
                arm_envs.push(arm_env);
            }
            let joined = self.join_envs(&arm_envs);
            if joined == *env {
                return;
            }
            *env = joined;
        }
    }

    fn join_envs(&self, arm_envs: &[Env]) -> Env {
        let mut joined = Env::new();
        for arm_env in arm_envs {
            for name in arm_env.keys() {
                if joined.contains_key(name) {
                    continue;
                }
                let mut sym = None;
                for other in arm_envs {
                    sym = Some(match (sym, other.get(name)) {
                        (None, Some(&s)) => s,
                        (Some(acc), Some(&s)) => join_sym(self.policy, acc, s),
                        // Bound on one path only: no proof on the other.
                        (_, None) => Sym::Undetermined,
                    });
                    if sym == Some(Sym::Undetermined) {
                        break;
                    }
                }
                if let Some(sym) = sym {
                    joined.insert(name.clone(), sym);
                }
            }
        }
        joined
    }

    fn eval(&mut self, expr: &Expr, env: &mut Env) -> Sym {
        match expr {
            Expr::Literal { .. } => Sym::Raw,
            Expr::Ident { name, .. } => env.get(name).copied().unwrap_or(Sym::Undetermined),
            Expr::Call { op, args, span } => {
                let arg_syms: Vec<Sym> = args.iter().map(|a| self.eval(a, env)).collect();
                self.eval_call(op, &arg_syms, *span)
            }
        }
    }

    fn eval_call(&mut self, op: &CallOp, args: &[Sym], span: Span) -> Sym {
        match op {
            CallOp::Wrap { level } => self.eval_wrap(level, args, span),
            CallOp::RootScope => Sym::Scope(Some(self.policy.lattice().bottom())),
            CallOp::Map | CallOp::Combine => payload(self.policy, args),
            CallOp::Declassify { target, justified } => {
                self.eval_declassify(target, *justified, args, span)
            }
            CallOp::Sink { name } => self.eval_sink(name, args, span),
            CallOp::Opaque { .. } => payload(self.policy, args),
            CallOp::Unsupported => Sym::Undetermined,
        }
    }

    fn eval_wrap(&mut self, level: &str, args: &[Sym], span: Span) -> Sym {
        let declared = match self.policy.level(level) {
            Ok(declared) => declared,
            Err(_) => {
                self.report(
                    span,
                    ViolationKind::UnknownLevel,
                    "wrap",
                    None,
                    Some(level.to_string()),
                    format!("wrap names undeclared level '{level}'"),
                );
                return Sym::Undetermined;
            }
        };
        let (receiver, rest) = match args.split_first() {
            Some((&receiver, rest)) => (Some(receiver), rest),
            None => (None, args),
        };
        // Wrapping an already-owned value discards its provenance. That
        // is fine when the new level dominates the old one and a
        // laundering attempt otherwise.
        match payload(self.policy, rest) {
            Sym::Raw => {}
            // `payload` skips scope arguments, so it never yields one.
            Sym::Scope(_) => unreachable!("payload never yields a scope handle"),
            Sym::Exact(existing) if self.policy.lattice().leq(existing, declared) => {}
            Sym::Exact(existing) => {
                self.report(
                    span,
                    ViolationKind::SuspiciousRewrap,
                    "wrap",
                    Some(level.to_string()),
                    Some(self.policy.lattice().name(existing).to_string()),
                    "re-wrap would lower an owned value without declassification".to_string(),
                );
            }
            Sym::Undetermined => {
                self.report(
                    span,
                    ViolationKind::SuspiciousRewrap,
                    "wrap",
                    Some(level.to_string()),
                    None,
                    "cannot prove the wrapped argument is not already owned at a higher level"
                        .to_string(),
                );
            }
        }
        // The runtime floors the declared level at the wrapping scope's
        // effective ceiling. The result is exact only when that ceiling
        // is statically known; a wrap through a handle of unknown
        // ceiling cannot be vouched for.
        match receiver {
            Some(Sym::Scope(Some(ceiling))) => {
                Sym::Exact(self.policy.lattice().join(declared, ceiling))
            }
            _ => Sym::Undetermined,
        }
    }

    fn eval_declassify(&mut self, target: &str, justified: bool, args: &[Sym], span: Span) -> Sym {
        let target_level = match self.policy.level(target) {
            Ok(level) => level,
            Err(_) => {
                self.report(
                    span,
                    ViolationKind::UnknownLevel,
                    "declassify",
                    None,
                    Some(target.to_string()),
                    format!("declassify names undeclared level '{target}'"),
                );
                return Sym::Undetermined;
            }
        };
        if !justified {
            self.report(
                span,
                ViolationKind::UnjustifiedDeclassify,
                "declassify",
                Some(target.to_string()),
                None,
                "declassification without a non-empty justification".to_string(),
            );
        }
        if let Sym::Exact(from) = payload(self.policy, args) {
            let lat = self.policy.lattice();
            if from == target_level || !lat.leq(target_level, from) {
                self.report(
                    span,
                    ViolationKind::IllegalDeclassify,
                    "declassify",
                    Some(target.to_string()),
                    Some(lat.name(from).to_string()),
                    "declassification target is not strictly below the source level".to_string(),
                );
            }
        }
        Sym::Exact(target_level)
    }

    fn eval_sink(&mut self, name: &str, args: &[Sym], span: Span) -> Sym {
        let Some(sink) = self.policy.sinks().get(name) else {
            self.report(
                span,
                ViolationKind::UnknownSink,
                name,
                None,
                None,
                format!("sink '{name}' is not registered"),
            );
            return Sym::Raw;
        };
        let ceiling = sink.max_level;
        let ceiling_name = self.policy.lattice().name(ceiling).to_string();
        match payload(self.policy, args) {
            // `payload` skips scope arguments, so it never yields one.
            Sym::Scope(_) => unreachable!("payload never yields a scope handle"),
            Sym::Exact(level) if self.policy.lattice().leq(level, ceiling) => {}
            Sym::Exact(level) => {
                self.report(
                    span,
                    ViolationKind::Leak,
                    name,
                    Some(ceiling_name),
                    Some(self.policy.lattice().name(level).to_string()),
                    "payload level exceeds the sink ceiling".to_string(),
                );
            }
            Sym::Raw => {
                self.report(
                    span,
                    ViolationKind::RawValueAtSink,
                    name,
                    Some(ceiling_name),
                    None,
                    "sink receives a value that was never capability-wrapped".to_string(),
                );
            }
            Sym::Undetermined => {
                self.report(
                    span,
                    ViolationKind::UndeterminedLevel,
                    name,
                    Some(ceiling_name),
                    None,
                    "payload level cannot be statically determined".to_string(),
                );
            }
        }
        // The choke point returns the unwrapped payload.
        Sym::Raw
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &mut self,
        span: Span,
        kind: ViolationKind,
        subject: &str,
        required_level: Option<String>,
        observed_level: Option<String>,
        reason: String,
    ) {
        self.violations.push(Violation {
            file: self.file.clone(),
            span,
            kind,
            subject: subject.to_string(),
            required_level,
            observed_level,
            reason,
        });
    }
}
