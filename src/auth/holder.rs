//! Binding of security contexts to execution units.
//!
//! An execution unit is the tokio task currently being polled, or the OS
//! thread when no task is running. Runtimes reuse both (a keep-alive
//! connection task serves many requests, a blocking pool reuses threads), so
//! every binding made for a request must be released when the request ends.
//! [`ContextGuard`] does that on drop.
//!
//! One [`ContextStrategy`] is chosen at startup and turned into a
//! [`SecurityContextHolder`] with [`ContextStrategy::build`]. The holder is
//! then handed to the pipeline; there is no process-global lookup. Building a
//! second holder with another strategy while requests are in flight leaves
//! those requests bound to the old holder.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::ThreadId;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::context::SecurityContext;

/// The unit of execution a context is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionUnit {
    Task(tokio::task::Id),
    Thread(ThreadId),
}

impl ExecutionUnit {
    /// The unit the caller is running on.
    pub fn current() -> Self {
        match tokio::task::try_id() {
            Some(id) => Self::Task(id),
            None => Self::Thread(std::thread::current().id()),
        }
    }
}

/// Policy for binding a security context to execution units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ContextStrategy {
    /// Bound to the current unit only; spawned children start empty.
    #[default]
    Confined,
    /// Bound to the current unit; children spawned through the holder start
    /// with a copy of the parent's context.
    Inherited,
    /// One context for the whole process. Concurrent requests overwrite each
    /// other, so this is only suitable for single-threaded use and tests.
    Global,
}

impl ContextStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confined => "confined",
            Self::Inherited => "inherited",
            Self::Global => "global",
        }
    }

    /// Build a holder with the storage this strategy requires.
    pub fn build(self) -> SecurityContextHolder {
        let storage: Arc<dyn ContextStorage> = match self {
            Self::Confined | Self::Inherited => Arc::new(UnitBoundStorage::default()),
            Self::Global => Arc::new(GlobalStorage::default()),
        };
        SecurityContextHolder::with_storage(self, storage)
    }
}

impl fmt::Display for ContextStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ContextStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "confined" => Ok(Self::Confined),
            "inherited" => Ok(Self::Inherited),
            "global" => Ok(Self::Global),
            other => Err(anyhow::anyhow!("Unknown context strategy `{}`", other)),
        }
    }
}

/// Storage discipline behind a [`SecurityContextHolder`].
pub trait ContextStorage: Send + Sync {
    /// Read the context bound to `unit`, without binding anything.
    fn load(&self, unit: ExecutionUnit) -> Option<SecurityContext>;

    /// Read the context bound to `unit`, binding an empty one if absent.
    fn load_or_default(&self, unit: ExecutionUnit) -> SecurityContext;

    /// Bind `context` to `unit`.
    fn store(&self, unit: ExecutionUnit, context: SecurityContext);

    /// Unbind and return whatever was bound to `unit`.
    fn remove(&self, unit: ExecutionUnit) -> Option<SecurityContext>;
}

/// Binding table keyed by execution unit.
#[derive(Default)]
pub struct UnitBoundStorage {
    bindings: DashMap<ExecutionUnit, SecurityContext>,
}

impl UnitBoundStorage {
    /// Number of units with a live binding.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl ContextStorage for UnitBoundStorage {
    fn load(&self, unit: ExecutionUnit) -> Option<SecurityContext> {
        self.bindings.get(&unit).map(|ctx| ctx.value().clone())
    }

    fn load_or_default(&self, unit: ExecutionUnit) -> SecurityContext {
        self.bindings.entry(unit).or_default().value().clone()
    }

    fn store(&self, unit: ExecutionUnit, context: SecurityContext) {
        self.bindings.insert(unit, context);
    }

    fn remove(&self, unit: ExecutionUnit) -> Option<SecurityContext> {
        self.bindings.remove(&unit).map(|(_, ctx)| ctx)
    }
}

/// Single process-wide slot; the unit is ignored.
#[derive(Default)]
pub struct GlobalStorage {
    slot: RwLock<Option<SecurityContext>>,
}

impl ContextStorage for GlobalStorage {
    fn load(&self, _unit: ExecutionUnit) -> Option<SecurityContext> {
        self.slot.read().clone()
    }

    fn load_or_default(&self, _unit: ExecutionUnit) -> SecurityContext {
        if let Some(ctx) = self.slot.read().as_ref() {
            return ctx.clone();
        }
        self.slot.write().get_or_insert_with(SecurityContext::empty).clone()
    }

    fn store(&self, _unit: ExecutionUnit, context: SecurityContext) {
        *self.slot.write() = Some(context);
    }

    fn remove(&self, _unit: ExecutionUnit) -> Option<SecurityContext> {
        self.slot.write().take()
    }
}

/// Associates security contexts with the current execution unit.
///
/// Cloning is cheap; clones share the same storage.
#[derive(Clone)]
pub struct SecurityContextHolder {
    strategy: ContextStrategy,
    storage: Arc<dyn ContextStorage>,
}

impl SecurityContextHolder {
    /// Create a holder over a custom storage.
    pub fn with_storage(strategy: ContextStrategy, storage: Arc<dyn ContextStorage>) -> Self {
        Self { strategy, storage }
    }

    /// Get the active strategy.
    pub fn strategy(&self) -> ContextStrategy {
        self.strategy
    }

    /// Create a new, empty context.
    pub fn create_empty_context(&self) -> SecurityContext {
        SecurityContext::empty()
    }

    /// Get the context bound to the current unit.
    ///
    /// Never absent: an empty context is created and bound on first access.
    pub fn get(&self) -> SecurityContext {
        self.storage.load_or_default(ExecutionUnit::current())
    }

    /// Bind a context to the current unit.
    pub fn set(&self, context: SecurityContext) {
        self.storage.store(ExecutionUnit::current(), context);
    }

    /// Remove the binding of the current unit.
    pub fn clear(&self) {
        self.storage.remove(ExecutionUnit::current());
    }

    /// Read the current unit's context without binding one.
    pub fn peek(&self) -> Option<SecurityContext> {
        self.storage.load(ExecutionUnit::current())
    }

    /// Check whether the current unit has a binding, without creating one.
    pub fn is_bound(&self) -> bool {
        self.peek().is_some()
    }

    /// Open a request scope on the current unit.
    ///
    /// When the returned guard drops, the unit's binding is restored to what
    /// it was on entry; for an outermost scope that means cleared.
    pub fn enter(&self) -> ContextGuard {
        self.enter_with(None)
    }

    /// Open a request scope and bind `initial` for its duration.
    pub fn enter_with(&self, initial: Option<SecurityContext>) -> ContextGuard {
        let unit = ExecutionUnit::current();
        let previous = self.storage.load(unit);
        if let Some(ctx) = initial {
            self.storage.store(unit, ctx);
        }
        ContextGuard {
            holder: self.clone(),
            unit,
            previous,
        }
    }

    /// The context a child spawned now should start with.
    fn inherited_context(&self) -> Option<SecurityContext> {
        match self.strategy {
            ContextStrategy::Inherited => self.storage.load(ExecutionUnit::current()),
            ContextStrategy::Confined | ContextStrategy::Global => None,
        }
    }

    /// Spawn a tokio task whose binding follows the active strategy.
    ///
    /// The child's binding is released when the task finishes.
    pub fn spawn_task<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let inherited = self.inherited_context();
        let holder = self.clone();
        tokio::spawn(async move {
            let _guard = holder.enter_with(inherited);
            future.await
        })
    }

    /// Spawn an OS thread whose binding follows the active strategy.
    pub fn spawn_thread<F, T>(&self, f: F) -> std::thread::JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let inherited = self.inherited_context();
        let holder = self.clone();
        std::thread::spawn(move || {
            let _guard = holder.enter_with(inherited);
            f()
        })
    }
}

impl Default for SecurityContextHolder {
    fn default() -> Self {
        ContextStrategy::default().build()
    }
}

impl fmt::Debug for SecurityContextHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContextHolder")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Scope over one execution unit's binding.
///
/// Restores the binding captured on entry when dropped, on every exit path:
/// normal return, `?`, panic unwinding, or a dropped future.
#[must_use = "the binding is released when the guard drops"]
pub struct ContextGuard {
    holder: SecurityContextHolder,
    unit: ExecutionUnit,
    previous: Option<SecurityContext>,
}

impl ContextGuard {
    /// The unit this guard releases.
    pub fn unit(&self) -> ExecutionUnit {
        self.unit
    }

    /// Get the context currently bound to the guarded unit.
    pub fn context(&self) -> SecurityContext {
        self.holder.storage.load_or_default(self.unit)
    }

    /// Bind a context to the guarded unit.
    pub fn set(&self, context: SecurityContext) {
        self.holder.storage.store(self.unit, context);
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(previous) => self.holder.storage.store(self.unit, previous),
            None => {
                if self.holder.storage.remove(self.unit).is_some() {
                    debug!(unit = ?self.unit, "Cleared security context binding");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::Authentication;

    fn authenticated_context(name: &str) -> SecurityContext {
        SecurityContext::with_authentication(Authentication::authenticated(name, None, Vec::new()))
    }

    #[test]
    fn test_get_lazily_binds_empty_context() {
        let holder = ContextStrategy::Confined.build();
        assert!(!holder.is_bound());

        let ctx = holder.get();
        assert!(ctx.is_empty());
        assert!(holder.is_bound());

        holder.clear();
        assert!(!holder.is_bound());
    }

    #[test]
    fn test_create_empty_context_does_not_bind() {
        for strategy in [ContextStrategy::Confined, ContextStrategy::Inherited, ContextStrategy::Global] {
            let holder = strategy.build();
            holder.set(authenticated_context("abc"));

            let empty = holder.create_empty_context();
            assert!(empty.is_empty());
            assert_eq!(empty, SecurityContext::empty());
            // The existing binding is untouched.
            assert_eq!(holder.get(), authenticated_context("abc"));
            holder.clear();
        }
    }

    #[test]
    fn test_set_get_clear() {
        let holder = ContextStrategy::Confined.build();
        holder.set(authenticated_context("abc"));
        assert_eq!(holder.get(), authenticated_context("abc"));

        holder.clear();
        assert!(holder.get().is_empty());
    }

    #[test]
    fn test_confined_threads_are_isolated() {
        let holder = ContextStrategy::Confined.build();
        holder.set(authenticated_context("parent"));

        let child = holder.clone();
        let seen = std::thread::spawn(move || child.get()).join().unwrap();
        assert!(seen.is_empty());

        let seen = holder.spawn_thread({
            let holder = holder.clone();
            move || holder.get()
        });
        assert!(seen.join().unwrap().is_empty());
        holder.clear();
    }

    #[test]
    fn test_inherited_thread_gets_copy() {
        let holder = ContextStrategy::Inherited.build();
        holder.set(authenticated_context("parent"));

        let child_holder = holder.clone();
        let handle = holder.spawn_thread(move || {
            let seen = child_holder.get();
            child_holder.set(authenticated_context("child"));
            seen
        });

        assert_eq!(handle.join().unwrap(), authenticated_context("parent"));
        // Child writes do not reach the parent.
        assert_eq!(holder.get(), authenticated_context("parent"));
        holder.clear();
    }

    #[test]
    fn test_global_is_shared_across_threads() {
        let holder = ContextStrategy::Global.build();
        holder.set(authenticated_context("everyone"));

        let other = holder.clone();
        let seen = std::thread::spawn(move || other.get()).join().unwrap();
        assert_eq!(seen, authenticated_context("everyone"));
        holder.clear();
        assert!(!holder.is_bound());
    }

    #[test]
    fn test_guard_clears_on_drop() {
        let holder = ContextStrategy::Confined.build();
        {
            let guard = holder.enter();
            guard.set(authenticated_context("abc"));
            assert!(holder.get().is_authenticated());
        }
        assert!(!holder.is_bound());
    }

    #[test]
    fn test_nested_guard_restores_outer_binding() {
        let holder = ContextStrategy::Confined.build();
        let outer = holder.enter_with(Some(authenticated_context("outer")));
        {
            let inner = holder.enter();
            inner.set(authenticated_context("inner"));
        }
        assert_eq!(holder.get(), authenticated_context("outer"));
        drop(outer);
        assert!(!holder.is_bound());
    }

    #[test]
    fn test_guard_clears_on_panic() {
        let holder = ContextStrategy::Confined.build();
        let inner = holder.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = inner.enter();
            inner.set(authenticated_context("abc"));
            panic!("handler failed");
        }));

        assert!(result.is_err());
        assert!(!holder.is_bound());
    }

    #[tokio::test]
    async fn test_confined_task_starts_empty() {
        let holder = ContextStrategy::Confined.build();
        let _guard = holder.enter_with(Some(authenticated_context("parent")));

        let child = holder.clone();
        let seen = holder.spawn_task(async move { child.get() }).await.unwrap();
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_inherited_task_gets_copy_and_is_released() {
        let holder = ContextStrategy::Inherited.build();
        let _guard = holder.enter_with(Some(authenticated_context("parent")));

        let child = holder.clone();
        let seen = holder.spawn_task(async move { child.get() }).await.unwrap();
        assert_eq!(seen, authenticated_context("parent"));
    }

    #[test]
    fn test_strategy_parse_and_display() {
        assert_eq!("confined".parse::<ContextStrategy>().unwrap(), ContextStrategy::Confined);
        assert_eq!(" Inherited ".parse::<ContextStrategy>().unwrap(), ContextStrategy::Inherited);
        assert_eq!("GLOBAL".parse::<ContextStrategy>().unwrap(), ContextStrategy::Global);
        assert!("threadlocal".parse::<ContextStrategy>().is_err());
        assert_eq!(ContextStrategy::Global.to_string(), "global");
        assert_eq!(ContextStrategy::default(), ContextStrategy::Confined);
    }

    #[test]
    fn test_strategy_serde() {
        let parsed: ContextStrategy = serde_json::from_str("\"inherited\"").unwrap();
        assert_eq!(parsed, ContextStrategy::Inherited);
        assert_eq!(serde_json::to_string(&ContextStrategy::Global).unwrap(), "\"global\"");
    }

    #[test]
    fn test_unit_bound_storage_does_not_grow_after_guard() {
        let storage = Arc::new(UnitBoundStorage::default());
        let holder = SecurityContextHolder::with_storage(ContextStrategy::Confined, storage.clone());
        {
            let _guard = holder.enter_with(Some(authenticated_context("abc")));
            assert_eq!(storage.len(), 1);
        }
        assert!(storage.is_empty());
    }
}
