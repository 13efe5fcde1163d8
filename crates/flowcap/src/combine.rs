//! Fork/merge combinators: run sub-computations under derived scopes and
//! recombine their owned results under a declared policy.
//!
//! Each branch runs in its own child scope, so concurrent branches never
//! share a scope binding. The sequential [`fork`] preserves declaration
//! order; [`fork_concurrent`] spawns branches on the tokio runtime and
//! collects outcomes in true completion order, which is what the
//! order-sensitive `first-success` merge policy requires.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::task::JoinSet;

use crate::error::{FlowError, Result};
use crate::lattice::Level;
use crate::owned::{Owned, ProvenanceEntry};
use crate::scope::{CompletionGuard, ScopeHandle};

/// How a fork reacts to a failing branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForkPolicy {
    /// Stop at the first failure and report it.
    #[default]
    FailFast,
    /// Run every branch and report all outcomes, failures included.
    CollectAll,
}

/// How merged results combine levels and values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Every branch must succeed; the result level is the join over all
    /// branch levels and the value comes from the caller's reducer.
    JoinAll,
    /// The first successful outcome (in the order the outcomes were
    /// collected — completion order for concurrent forks) wins.
    FirstSuccess {
        /// When true, levels of the other successful branches are joined
        /// into the result even though their values go unused. The
        /// default elsewhere is `false`: a branch that is never observed
        /// does not inflate the result's sensitivity.
        join_unobserved: bool,
    },
}

/// The outcome of one fork branch.
#[derive(Debug)]
pub struct BranchOutcome<T> {
    /// The branch's index in declaration order.
    pub index: usize,
    /// The branch's result.
    pub result: Result<Owned<T>>,
}

/// A boxed synchronous branch body.
pub type BranchFn<T> = Box<dyn FnOnce(&ScopeHandle) -> Result<Owned<T>> + Send>;

/// The boxed future produced by an asynchronous branch body.
pub type BranchFuture<T> = Pin<Box<dyn Future<Output = Result<Owned<T>>> + Send>>;

/// A boxed asynchronous branch body. The handle it receives is its own
/// child scope, captured by the future at spawn time.
pub type AsyncBranchFn<T> = Box<dyn FnOnce(ScopeHandle) -> BranchFuture<T> + Send>;

/// Run branches sequentially, each under its own child scope.
///
/// Under [`ForkPolicy::FailFast`] the first failing branch aborts the
/// fork with [`FlowError::Branch`]; under [`ForkPolicy::CollectAll`]
/// every branch runs and its outcome is reported.
pub fn fork<T>(
    parent: &ScopeHandle,
    ceiling: Level,
    policy: ForkPolicy,
    branches: Vec<BranchFn<T>>,
) -> Result<Vec<BranchOutcome<T>>> {
    let mut outcomes = Vec::with_capacity(branches.len());
    for (index, branch) in branches.into_iter().enumerate() {
        let result = parent.enter(ceiling, |scope| branch(scope));
        match (policy, result) {
            (ForkPolicy::FailFast, Err(e)) => return Err(branch_error(index, e)),
            (_, result) => outcomes.push(BranchOutcome { index, result }),
        }
    }
    Ok(outcomes)
}

/// Run branches concurrently on the tokio runtime.
///
/// Every branch captures its own child scope handle at spawn time.
/// Outcomes are collected in completion order. A panicking or cancelled
/// branch surfaces as a branch failure through the same channel as an
/// ordinary error; under [`ForkPolicy::FailFast`] the remaining branches
/// are aborted.
pub async fn fork_concurrent<T>(
    parent: &ScopeHandle,
    ceiling: Level,
    policy: ForkPolicy,
    branches: Vec<AsyncBranchFn<T>>,
) -> Result<Vec<BranchOutcome<T>>>
where
    T: Send + 'static,
{
    let mut set: JoinSet<(usize, Result<Owned<T>>)> = JoinSet::new();
    let mut task_index: HashMap<tokio::task::Id, usize> = HashMap::new();

    for (index, branch) in branches.into_iter().enumerate() {
        let child = parent.child(ceiling);
        child.begin();
        let fut = branch(child.clone());
        let handle = set.spawn(async move {
            let guard = CompletionGuard::new(child.clone());
            let result = fut.await;
            guard.disarm();
            child.finish(result.is_ok());
            (index, result)
        });
        task_index.insert(handle.id(), index);
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = set.join_next().await {
        let (index, result) = match joined {
            Ok((index, result)) => (index, result),
            Err(join_err) => {
                let index = task_index
                    .get(&join_err.id())
                    .copied()
                    .unwrap_or(usize::MAX);
                let message = if join_err.is_cancelled() {
                    "branch cancelled".to_string()
                } else {
                    "branch panicked".to_string()
                };
                (index, Err(FlowError::Branch { index, message }))
            }
        };

        match (policy, result) {
            (ForkPolicy::FailFast, Err(e)) => {
                set.abort_all();
                return Err(branch_error(index, e));
            }
            (_, result) => outcomes.push(BranchOutcome { index, result }),
        }
    }
    Ok(outcomes)
}

/// Merge branch outcomes under a policy.
///
/// `reduce` is consulted only by [`MergePolicy::JoinAll`]; it receives
/// every branch value in the order the outcomes were collected.
pub fn merge<T>(
    scope: &ScopeHandle,
    outcomes: Vec<BranchOutcome<T>>,
    policy: MergePolicy,
    reduce: impl FnOnce(Vec<T>) -> T,
) -> Result<Owned<T>> {
    if outcomes.is_empty() {
        return Err(FlowError::MergeFailed {
            reason: "no branch outcomes to merge".to_string(),
        });
    }
    let lattice = scope.policy().lattice().clone();

    match policy {
        MergePolicy::JoinAll => {
            let mut level = lattice.bottom();
            let mut values = Vec::with_capacity(outcomes.len());
            for outcome in outcomes {
                match outcome.result {
                    Ok(owned) => {
                        level = lattice.join(level, owned.level());
                        values.push(owned.into_value());
                    }
                    Err(e) => {
                        return Err(FlowError::MergeFailed {
                            reason: format!("branch {} failed: {e}", outcome.index),
                        })
                    }
                }
            }
            Ok(Owned::new(
                reduce(values),
                level,
                vec![merge_provenance(scope, "merge(join-all)")],
            ))
        }
        MergePolicy::FirstSuccess { join_unobserved } => {
            let mut winner: Option<Owned<T>> = None;
            let mut observed_levels = Vec::new();
            for outcome in outcomes {
                if let Ok(owned) = outcome.result {
                    if winner.is_none() {
                        winner = Some(owned);
                    } else if join_unobserved {
                        observed_levels.push(owned.level());
                    }
                }
            }
            let Some(winner) = winner else {
                return Err(FlowError::MergeFailed {
                    reason: "no branch succeeded".to_string(),
                });
            };
            let mut level = winner.level();
            for other in observed_levels {
                level = lattice.join(level, other);
            }
            Ok(Owned::new(
                winner.into_value(),
                level,
                vec![merge_provenance(scope, "merge(first-success)")],
            ))
        }
    }
}

/// A branch failure keeps its original index and message; any other error
/// is wrapped once with the failing branch's index.
fn branch_error(index: usize, error: FlowError) -> FlowError {
    match error {
        FlowError::Branch { .. } => error,
        other => FlowError::Branch {
            index,
            message: other.to_string(),
        },
    }
}

fn merge_provenance(scope: &ScopeHandle, operation: &str) -> ProvenanceEntry {
    ProvenanceEntry {
        scope_id: scope.id(),
        operation: operation.to_string(),
        timestamp: chrono::Utc::now(),
    }
}
