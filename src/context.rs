//! Contexts: live activations of a scope
//!
//! A [`Context`] services lookups for in-flight calls: it owns the
//! activation's singleton store and exit stack, and is installed as the
//! thread's *current* context while its guard is alive. Contexts nest;
//! a child reads through to its parent's caches but never mutates them,
//! and resources entered in the child tear down when the child closes.

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::RandomState;
use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use crate::error::{DiError, Result};
use crate::exit::{ExitStack, Managed};
use crate::key::Key;
use crate::provider::Binding;
use crate::resolver::{self, BindKind};
use crate::scope::Scope;
use crate::signature::{Blueprint, CallArgs, Instance};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

type SharedProducer = Shared<BoxFuture<'static, Result<Instance>>>;

/// Per-activation storage: singletons, in-flight async producers, and
/// the exit stack. The root context shares the scope's store; nested
/// contexts get their own.
pub(crate) struct ContextStore {
    singletons: DashMap<Key, Instance, RandomState>,
    pending: DashMap<Key, SharedProducer, RandomState>,
    // Per-key production locks. A single scope-wide mutex would deadlock
    // on singleton chains (producing A takes the lock, then resolving
    // A's singleton dependency B takes it again); per-key locks follow
    // the dependency DAG, which bind-time cycle detection keeps acyclic.
    locks: DashMap<Key, Arc<Mutex<()>>, RandomState>,
    exit: Mutex<ExitStack>,
    closed: AtomicBool,
}

impl ContextStore {
    pub(crate) fn new() -> Self {
        Self {
            singletons: DashMap::with_hasher(RandomState::new()),
            pending: DashMap::with_hasher(RandomState::new()),
            locks: DashMap::with_hasher(RandomState::new()),
            exit: Mutex::new(ExitStack::new()),
            closed: AtomicBool::new(false),
        }
    }
}

struct ContextInner {
    scope: Scope,
    parent: Option<Context>,
    store: Arc<ContextStore>,
}

thread_local! {
    static CURRENT: RefCell<Vec<Context>> = const { RefCell::new(Vec::new()) };
}

/// The activation of a scope a task resolves through.
///
/// Cheap to clone; all clones share the activation's caches.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub(crate) fn root(scope: Scope) -> Self {
        let store = scope.root_store();
        Self {
            inner: Arc::new(ContextInner {
                scope,
                parent: None,
                store,
            }),
        }
    }

    /// The thread's current context, installed by the innermost live
    /// guard.
    pub fn current() -> Result<Context> {
        CURRENT
            .with(|stack| stack.borrow().last().cloned())
            .ok_or(DiError::NoContext)
    }

    #[inline]
    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    /// The scope lock, when the scope runs in parallel mode.
    #[inline]
    pub fn lock(&self) -> Option<&Mutex<()>> {
        self.inner.scope.lock()
    }

    /// The memoised resolver for `key`, if any provider serves it.
    pub fn find(&self, key: &Key) -> Result<Option<Binding>> {
        self.inner.scope.find(key)
    }

    /// Resolve `key` to a value. Fails with `Unresolved` when nothing
    /// serves the key and with `AsyncFromSync` when its binding is async.
    pub fn make(&self, key: &Key) -> Result<Instance> {
        #[cfg(feature = "logging")]
        trace!(target: "spindle", key = %key, "Resolving");

        match self.find(key)? {
            Some(binding) => binding.resolve_sync(self, key),
            None => Err(self.inner.scope.unresolved(key)),
        }
    }

    /// Resolve `key`, awaiting async bindings.
    pub async fn make_async(&self, key: &Key) -> Result<Instance> {
        match self.find(key)? {
            Some(binding) => binding.resolve(self).await,
            None => Err(self.inner.scope.unresolved(key)),
        }
    }

    /// Resolve `Key::of::<T>()` and downcast.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let key = Key::of::<T>();
        self.make(&key)?
            .downcast::<T>()
            .map_err(|_| DiError::type_mismatch::<T>(key))
    }

    /// Async variant of [`Context::get`].
    pub async fn get_async<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let key = Key::of::<T>();
        self.make_async(&key)
            .await?
            .downcast::<T>()
            .map_err(|_| DiError::type_mismatch::<T>(key))
    }

    /// Treat a blueprint as an ad-hoc factory: caller-supplied arguments
    /// pre-fill slots, missing parameters resolve through this context.
    pub fn call(&self, blueprint: &Blueprint, args: CallArgs) -> Result<Instance> {
        let (merged, provides) = self.prepare_call(blueprint, &args);
        let binding = resolver::compile(&merged, self.scope(), &provides, BindKind::Factory)?;
        binding.resolve_sync(self, &provides)
    }

    /// Async variant of [`Context::call`].
    pub async fn call_async(&self, blueprint: &Blueprint, args: CallArgs) -> Result<Instance> {
        let (merged, provides) = self.prepare_call(blueprint, &args);
        let binding = resolver::compile(&merged, self.scope(), &provides, BindKind::Factory)?;
        binding.resolve(self).await
    }

    fn prepare_call(&self, blueprint: &Blueprint, args: &CallArgs) -> (Blueprint, Key) {
        let merged = blueprint
            .clone()
            .with_arguments(blueprint.arguments().overlaid(args));
        let provides = blueprint
            .provided_key()
            .cloned()
            .unwrap_or_else(|| Key::token(blueprint.name()));
        (merged, provides)
    }

    /// Enter a managed value: its teardown joins this activation's exit
    /// stack, the inner value is returned.
    pub fn enter(&self, managed: Managed) -> Result<Instance> {
        self.ensure_open()?;
        let mut exit = self.inner.store.exit.lock();
        Ok(exit.enter(&managed))
    }

    /// Open a nested context: it reads through to this one's caches but
    /// keeps its own singleton store and exit stack.
    pub fn nest(&self) -> ContextGuard {
        let child = Context {
            inner: Arc::new(ContextInner {
                scope: self.inner.scope.clone(),
                parent: Some(self.clone()),
                store: Arc::new(ContextStore::new()),
            }),
        };
        ContextGuard::activate(child)
    }

    // ── Internal: storage for the memoisation decorators ──

    /// Produced-value lookup, reading through the parent chain.
    pub(crate) fn cached(&self, key: &Key) -> Option<Instance> {
        if let Some(value) = self.inner.store.singletons.get(key) {
            return Some(value.clone());
        }
        self.inner.parent.as_ref().and_then(|p| p.cached(key))
    }

    /// Store a produced value at this activation only.
    pub(crate) fn cache(&self, key: Key, value: Instance) {
        self.inner.store.singletons.insert(key, value);
    }

    /// The production lock for `key` at this activation; `None` in
    /// cooperative mode, where no other task can race the producer.
    pub(crate) fn key_lock(&self, key: &Key) -> Option<Arc<Mutex<()>>> {
        self.inner.scope.lock()?;
        let lock = self
            .inner
            .store
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Some(Arc::clone(lock.value()))
    }

    /// The shared producer future for `key`, creating it at most once.
    pub(crate) fn once_future(
        &self,
        key: &Key,
        make: impl FnOnce() -> BoxFuture<'static, Result<Instance>>,
    ) -> SharedProducer {
        let entry = self
            .inner
            .store
            .pending
            .entry(key.clone())
            .or_insert_with(|| make().shared());
        entry.value().clone()
    }

    pub(crate) fn clear_pending(&self, key: &Key) {
        self.inner.store.pending.remove(key);
    }

    /// Enter a value on the exit stack if it is a [`Managed`] wrapper;
    /// plain values pass through untouched.
    pub(crate) fn enter_instance(&self, value: Instance) -> Result<Instance> {
        match value.downcast::<Managed>() {
            Ok(managed) => {
                self.ensure_open()?;
                let mut exit = self.inner.store.exit.lock();
                Ok(exit.enter(&managed))
            }
            Err(plain) => Ok(plain),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.store.closed.load(Ordering::Acquire) {
            Err(DiError::NoContext)
        } else {
            Ok(())
        }
    }

    fn close_sync(&self, error: Option<DiError>) -> Result<()> {
        if self.inner.store.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "spindle",
            scope = %self.inner.scope.container().name(),
            "Closing context"
        );

        let mut stack = {
            let mut exit = self.inner.store.exit.lock();
            std::mem::take(&mut *exit)
        };
        stack.close(error)
    }

    async fn close_async(&self, error: Option<DiError>) -> Result<()> {
        if self.inner.store.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut stack = {
            let mut exit = self.inner.store.exit.lock();
            std::mem::take(&mut *exit)
        };
        stack.aclose(error).await
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("scope", &self.inner.scope.container().name())
            .field("nested", &self.inner.parent.is_some())
            .field("singletons", &self.inner.store.singletons.len())
            .field("exit_pending", &self.inner.store.exit.lock().len())
            .finish()
    }
}

/// RAII guard for an entered context.
///
/// While alive, the context is the thread's current one. Dropping the
/// guard unwinds the exit stack; use [`ContextGuard::close`] (or
/// [`ContextGuard::aclose`] for async teardown) to observe teardown
/// failures instead of discarding them.
pub struct ContextGuard {
    ctx: Context,
}

impl ContextGuard {
    pub(crate) fn activate(ctx: Context) -> Self {
        CURRENT.with(|stack| stack.borrow_mut().push(ctx.clone()));
        Self { ctx }
    }

    /// A handle to the entered context, e.g. to move into tasks.
    pub fn context(&self) -> Context {
        self.ctx.clone()
    }

    /// Close now, surfacing teardown failures.
    pub fn close(self) -> Result<()> {
        self.ctx.close_sync(None)
    }

    /// Close with a propagating error for the teardown callbacks to see.
    pub fn close_with(self, error: DiError) -> Result<()> {
        self.ctx.close_sync(Some(error))
    }

    /// Close, awaiting async teardown callbacks.
    pub async fn aclose(self) -> Result<()> {
        self.ctx.close_async(None).await
    }
}

impl Deref for ContextGuard {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.ctx
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack
                .iter()
                .rposition(|c| Arc::ptr_eq(&c.inner, &self.ctx.inner))
            {
                stack.remove(pos);
            }
        });

        if let Err(_teardown) = self.ctx.close_sync(None) {
            #[cfg(feature = "logging")]
            tracing::error!(
                target: "spindle",
                scope = %self.ctx.inner.scope.container().name(),
                error = %_teardown,
                "Teardown failed during implicit context close"
            );
        }
    }
}

impl fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextGuard").field("ctx", &self.ctx).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::signature::Blueprint;
    use std::sync::atomic::AtomicU32;

    struct Service;

    fn simple_scope() -> Scope {
        let c = Container::new("ctx-tests");
        c.factory(Blueprint::of0(|| Service)).unwrap();
        Scope::new(&c).unwrap()
    }

    #[test]
    fn current_follows_guard_lifetime() {
        assert!(Context::current().is_err());
        let scope = simple_scope();
        {
            let _ctx = scope.enter();
            assert!(Context::current().is_ok());
        }
        assert!(matches!(Context::current(), Err(DiError::NoContext)));
    }

    #[test]
    fn nested_context_is_current_until_closed() {
        let scope = simple_scope();
        let outer = scope.enter();
        let outer_ctx = outer.context();
        {
            let inner = outer.nest();
            let current = Context::current().unwrap();
            assert!(Arc::ptr_eq(&current.inner, &inner.context().inner));
        }
        let current = Context::current().unwrap();
        assert!(Arc::ptr_eq(&current.inner, &outer_ctx.inner));
    }

    #[test]
    fn nested_singletons_are_discarded_on_close() {
        static BUILDS: AtomicU32 = AtomicU32::new(0);
        struct Counted;

        let c = Container::new("nested-singletons");
        c.singleton(Blueprint::of0(|| {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            Counted
        }))
        .unwrap();
        let scope = Scope::new(&c).unwrap();
        let outer = scope.enter();

        {
            let inner = outer.nest();
            inner.get::<Counted>().unwrap();
            inner.get::<Counted>().unwrap();
        }
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);

        // The child's cache died with it; the outer context builds anew.
        outer.get::<Counted>().unwrap();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn nested_context_reads_parent_singletons() {
        static BUILDS: AtomicU32 = AtomicU32::new(0);
        struct Counted;

        let c = Container::new("nested-read-through");
        c.singleton(Blueprint::of0(|| {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            Counted
        }))
        .unwrap();
        let scope = Scope::new(&c).unwrap();
        let outer = scope.enter();
        outer.get::<Counted>().unwrap();

        let inner = outer.nest();
        inner.get::<Counted>().unwrap();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn enter_pushes_teardown_on_this_activation() {
        let scope = simple_scope();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let outer = scope.enter();
        {
            let order = Arc::clone(&order);
            outer
                .enter(Managed::new(Service).cleanup(move || order.lock().push("outer")))
                .unwrap();
        }
        {
            let inner = outer.nest();
            let order2 = Arc::clone(&order);
            inner
                .enter(Managed::new(Service).cleanup(move || order2.lock().push("inner")))
                .unwrap();
        }
        // Child teardown ran at child close; outer still pending.
        assert_eq!(*order.lock(), vec!["inner"]);
        outer.close().unwrap();
        assert_eq!(*order.lock(), vec!["inner", "outer"]);
    }

    #[test]
    fn close_with_forwards_the_propagating_error() {
        let scope = simple_scope();
        let seen: Arc<Mutex<Option<DiError>>> = Arc::new(Mutex::new(None));

        let ctx = scope.enter();
        {
            let seen = Arc::clone(&seen);
            ctx.enter(Managed::new(Service).on_close(move |err| {
                *seen.lock() = err;
                Ok(())
            }))
            .unwrap();
        }
        ctx.close_with(DiError::NoContext).unwrap();
        assert!(matches!(*seen.lock(), Some(DiError::NoContext)));
    }

    #[test]
    fn make_reports_unresolved() {
        let scope = simple_scope();
        let ctx = scope.enter();
        struct Nowhere;
        assert!(matches!(
            ctx.make(&Key::of::<Nowhere>()),
            Err(DiError::Unresolved { .. })
        ));
    }

    #[test]
    fn sync_make_refuses_async_binding() {
        struct Slow;
        let c = Container::new("sync-vs-async");
        c.factory(Blueprint::of0_async(|| async { Slow })).unwrap();
        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();
        assert!(matches!(
            ctx.make(&Key::of::<Slow>()),
            Err(DiError::AsyncFromSync { .. })
        ));
    }

    #[tokio::test]
    async fn make_async_drives_async_bindings() {
        struct Slow(u32);
        let c = Container::new("async-make");
        c.factory(Blueprint::of0_async(|| async { Slow(11) })).unwrap();
        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();
        let slow = ctx.get_async::<Slow>().await.unwrap();
        assert_eq!(slow.0, 11);
    }

    #[test]
    fn call_overlays_user_arguments() {
        let c = Container::new("call");
        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();

        let bp = Blueprint::new("sum", |args: CallArgs| {
            let a = *args.get::<u32>(0)?;
            let b = *args.get::<u32>(1)?;
            Ok(Arc::new(a + b) as Instance)
        })
        .param(crate::signature::Param::positional("a"))
        .param(crate::signature::Param::positional("b"))
        .arg(1u32)
        .arg(2u32);

        // Caller overrides the first partial argument.
        let result = ctx
            .call(&bp, CallArgs::new().with(40u32))
            .unwrap()
            .downcast::<u32>()
            .unwrap();
        assert_eq!(*result, 42);
    }
}
