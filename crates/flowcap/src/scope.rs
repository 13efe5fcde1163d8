//! Nested execution scopes carrying an ambient capability ceiling.
//!
//! A scope is a dynamic region: values produced inside it are floored at
//! its effective ceiling, which is the join of its declared ceiling and
//! every ancestor's. Child scopes can only raise the ambient trust
//! requirement, never lower it.
//!
//! There is no ambient "current scope" variable. A [`ScopeHandle`] is a
//! cheap `Arc` clone passed explicitly: synchronous bodies receive the
//! child handle as an argument, and asynchronous or spawned work captures
//! its handle lexically at creation time. Two concurrent branches can
//! therefore never observe or mutate each other's binding, and the
//! binding trivially survives suspension points because it lives in the
//! future itself.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::FlowEvent;
use crate::config::Policy;
use crate::error::Result;
use crate::lattice::Level;

/// Lifecycle of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Constructed but its body has not started.
    Created,
    /// Its body is running (possibly suspended at an await point).
    Active,
    /// Its body returned successfully.
    Completed,
    /// Its body returned an error or panicked.
    Failed,
}

impl ScopeState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Active,
            2 => Self::Completed,
            _ => Self::Failed,
        }
    }
}

#[derive(Debug)]
struct ScopeInner {
    id: Uuid,
    parent_id: Option<Uuid>,
    declared_ceiling: Level,
    effective_ceiling: Level,
    created_at: DateTime<Utc>,
    state: AtomicU8,
    policy: Policy,
}

/// A handle to one node in the scope tree.
///
/// Cloning is cheap and shares the underlying scope.
#[derive(Debug, Clone)]
pub struct ScopeHandle {
    inner: Arc<ScopeInner>,
}

impl ScopeHandle {
    /// The root scope for a policy: bottom ceiling, perpetually active.
    ///
    /// Code running "outside any scope" runs here; asking for the current
    /// scope is never an error.
    pub(crate) fn root(policy: Policy) -> Self {
        let bottom = policy.lattice().bottom();
        Self {
            inner: Arc::new(ScopeInner {
                id: Uuid::new_v4(),
                parent_id: None,
                declared_ceiling: bottom,
                effective_ceiling: bottom,
                created_at: Utc::now(),
                state: AtomicU8::new(1),
                policy,
            }),
        }
    }

    /// Derive a child scope without entering it. Used by the fork
    /// combinators, which manage the child lifecycle themselves.
    pub(crate) fn child(&self, declared_ceiling: Level) -> Self {
        let effective = self
            .policy()
            .lattice()
            .join(declared_ceiling, self.inner.effective_ceiling);
        Self {
            inner: Arc::new(ScopeInner {
                id: Uuid::new_v4(),
                parent_id: Some(self.inner.id),
                declared_ceiling,
                effective_ceiling: effective,
                created_at: Utc::now(),
                state: AtomicU8::new(0),
                policy: self.policy().clone(),
            }),
        }
    }

    /// Unique identifier of this scope.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Identifier of the parent scope, if this is not a root.
    pub fn parent_id(&self) -> Option<Uuid> {
        self.inner.parent_id
    }

    /// The ceiling declared when this scope was created.
    pub fn declared_ceiling(&self) -> Level {
        self.inner.declared_ceiling
    }

    /// The effective ceiling: join of the declared ceiling and every
    /// ancestor's effective ceiling.
    pub fn ceiling(&self) -> Level {
        self.inner.effective_ceiling
    }

    /// When this scope was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ScopeState {
        ScopeState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// The policy this scope enforces.
    pub fn policy(&self) -> &Policy {
        &self.inner.policy
    }

    pub(crate) fn begin(&self) {
        self.inner.state.store(1, Ordering::Release);
        self.policy().audit().record(FlowEvent::ScopeOpened {
            scope_id: self.id(),
            parent_id: self.parent_id(),
            ceiling: self.policy().lattice().name(self.ceiling()).to_string(),
        });
    }

    pub(crate) fn finish(&self, completed: bool) {
        let next = if completed { 2 } else { 3 };
        self.inner.state.store(next, Ordering::Release);
        self.policy().audit().record(FlowEvent::ScopeClosed {
            scope_id: self.id(),
            completed,
        });
    }

    /// Run `body` inside a child scope with the given declared ceiling.
    ///
    /// The child is active exactly for the dynamic extent of `body` and
    /// reaches a terminal state on every exit path: `Completed` on `Ok`,
    /// `Failed` on `Err` or panic. The parent handle is untouched either
    /// way.
    pub fn enter<T>(
        &self,
        ceiling: Level,
        body: impl FnOnce(&ScopeHandle) -> Result<T>,
    ) -> Result<T> {
        let child = self.child(ceiling);
        child.begin();
        let guard = CompletionGuard::new(child.clone());
        let result = body(&child);
        guard.disarm();
        child.finish(result.is_ok());
        result
    }

    /// Async counterpart of [`enter`](Self::enter).
    ///
    /// The child handle is moved into the future, so the binding travels
    /// with the logical task across suspension points and resumes intact
    /// on whatever thread polls it next. The child reaches a terminal
    /// state on every exit path, panics and dropped futures included.
    pub async fn enter_async<T, F, Fut>(&self, ceiling: Level, body: F) -> Result<T>
    where
        F: FnOnce(ScopeHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let child = self.child(ceiling);
        child.begin();
        let guard = CompletionGuard::new(child.clone());
        let result = body(child.clone()).await;
        guard.disarm();
        child.finish(result.is_ok());
        result
    }
}

/// Marks a scope failed if the region it covers unwinds or is dropped
/// instead of reaching the normal completion path.
pub(crate) struct CompletionGuard {
    scope: ScopeHandle,
    armed: bool,
}

impl CompletionGuard {
    pub(crate) fn new(scope: ScopeHandle) -> Self {
        Self { scope, armed: true }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.armed {
            self.scope.finish(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;
    use crate::error::FlowError;

    fn policy() -> Policy {
        FlowConfig::three_level_example().build().unwrap()
    }

    #[test]
    fn test_root_is_active_with_bottom_ceiling() {
        let policy = policy();
        let root = policy.root_scope();
        assert_eq!(root.state(), ScopeState::Active);
        assert_eq!(root.ceiling(), policy.lattice().bottom());
        assert!(root.parent_id().is_none());
    }

    #[test]
    fn test_child_ceiling_is_join_of_ancestors() {
        let policy = policy();
        let root = policy.root_scope();
        let internal = policy.level("internal").unwrap();
        let public = policy.level("public").unwrap();

        root.enter(internal, |outer| {
            assert_eq!(outer.ceiling(), internal);
            // Declaring a lower ceiling inside cannot lower the ambient one.
            outer.enter(public, |inner| {
                assert_eq!(inner.ceiling(), internal);
                assert_eq!(inner.declared_ceiling(), public);
                assert_eq!(inner.parent_id(), Some(outer.id()));
                Ok(())
            })
        })
        .unwrap();
    }

    #[test]
    fn test_terminal_state_on_success() {
        let policy = policy();
        let root = policy.root_scope();
        let internal = policy.level("internal").unwrap();

        let mut seen = None;
        root.enter(internal, |scope| {
            seen = Some(scope.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.unwrap().state(), ScopeState::Completed);
    }

    #[test]
    fn test_terminal_state_on_error() {
        let policy = policy();
        let root = policy.root_scope();
        let internal = policy.level("internal").unwrap();

        let mut seen = None;
        let result: Result<()> = root.enter(internal, |scope| {
            seen = Some(scope.clone());
            Err(FlowError::MergeFailed {
                reason: "boom".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(seen.unwrap().state(), ScopeState::Failed);
        // The parent is untouched.
        assert_eq!(root.state(), ScopeState::Active);
    }

    #[test]
    fn test_failed_state_on_panic() {
        let policy = policy();
        let root = policy.root_scope();
        let internal = policy.level("internal").unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<()> = root.enter(internal, |scope| {
                tx.send(scope.clone()).unwrap();
                panic!("body panicked");
            });
        }));
        assert!(caught.is_err());
        assert_eq!(rx.recv().unwrap().state(), ScopeState::Failed);
        assert_eq!(root.state(), ScopeState::Active);
    }

    #[test]
    fn test_scope_lifecycle_is_audited() {
        let policy = policy();
        let root = policy.root_scope();
        let internal = policy.level("internal").unwrap();
        root.enter(internal, |_| Ok(())).unwrap();

        let opened = policy
            .audit()
            .entries_where(|e| matches!(e, FlowEvent::ScopeOpened { .. }));
        let closed = policy
            .audit()
            .entries_where(|e| matches!(e, FlowEvent::ScopeClosed { .. }));
        assert_eq!(opened.len(), 1);
        assert_eq!(closed.len(), 1);
    }

    #[tokio::test]
    async fn test_scope_survives_suspension() {
        let policy = policy();
        let root = policy.root_scope();
        let confidential = policy.level("confidential").unwrap();

        root.enter_async(confidential, |scope| async move {
            let before = scope.ceiling();
            tokio::task::yield_now().await;
            assert_eq!(scope.ceiling(), before);
            assert_eq!(scope.state(), ScopeState::Active);
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_failed_state_on_async_panic() {
        let policy = policy();
        let root = policy.root_scope();
        let internal = policy.level("internal").unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let task = tokio::spawn(async move {
            let _: Result<()> = root
                .enter_async(internal, |scope| async move {
                    tx.send(scope.clone()).unwrap();
                    panic!("async body panicked");
                })
                .await;
        });
        assert!(task.await.is_err());
        assert_eq!(rx.recv().unwrap().state(), ScopeState::Failed);
    }

    #[tokio::test]
    async fn test_concurrent_tasks_have_independent_bindings() {
        let policy = policy();
        let root = policy.root_scope();
        let internal = policy.level("internal").unwrap();
        let confidential = policy.level("confidential").unwrap();

        let a = root.child(internal);
        let b = root.child(confidential);

        let ta = tokio::spawn(async move {
            tokio::task::yield_now().await;
            a.ceiling()
        });
        let tb = tokio::spawn(async move {
            tokio::task::yield_now().await;
            b.ceiling()
        });

        assert_eq!(ta.await.unwrap(), internal);
        assert_eq!(tb.await.unwrap(), confidential);
    }
}
