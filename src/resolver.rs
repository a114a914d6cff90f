//! Factory resolver: from blueprint to specialised closure
//!
//! Given a blueprint and a scope, the resolver classifies each declared
//! parameter into a slot (fixed value, container dependency, or default),
//! then selects a closure from a small matrix keyed on
//! (has-positional, has-keyword, is-async) so the per-call path branches
//! as little as possible. Singleton and resource semantics are layered on
//! as decorators over the compiled closure.

use std::fmt;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::join_all;

use crate::context::Context;
use crate::error::{DiError, Result};
use crate::key::Key;
use crate::provider::Binding;
use crate::scope::Scope;
use crate::signature::{ArgValue, Blueprint, CallArgs, Callable, Instance, SyncCallable};

#[cfg(feature = "logging")]
use tracing::trace;

/// How the compiled closure is wrapped.
#[derive(Clone, Copy, Debug)]
pub(crate) enum BindKind {
    Factory,
    Singleton,
    Resource,
    Callable { partial: bool },
}

// =============================================================================
// Parameter classification
// =============================================================================

enum SlotSource {
    /// Literal from the partial arguments; yielded as-is
    Fixed(Instance),
    /// Resolved through the scope's binding for `key`
    Dep { key: Key, binding: Binding },
    /// Not provided; the declared default fills the slot
    Default(Instance),
}

struct Slot {
    name: String,
    source: SlotSource,
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            SlotSource::Fixed(_) => "fixed".to_string(),
            SlotSource::Dep { key, .. } => format!("dep({key})"),
            SlotSource::Default(_) => "default".to_string(),
        };
        write!(f, "{}={}", self.name, source)
    }
}

struct Plan {
    pos: Vec<Slot>,
    kw: Vec<Slot>,
    deps: Vec<Key>,
    any_async_dep: bool,
}

/// Pair every declared parameter with a slot. Positional slots keep
/// declaration order; an unprovided positional without value or default
/// stops further positional collection to preserve call-site semantics.
/// Unprovided keyword parameters are simply omitted.
fn classify(bp: &Blueprint, scope: &Scope) -> Result<Plan> {
    let bound = bp.signature().bind_partial(bp.arguments(), bp.name())?;

    let mut plan = Plan {
        pos: Vec::new(),
        kw: Vec::new(),
        deps: Vec::new(),
        any_async_dep: false,
    };
    let mut skip_pos = false;

    for entry in bound {
        let (value, marker) = match entry.value {
            Some(ArgValue::Literal(v)) => (Some(v), None),
            Some(ArgValue::Marker(m)) => (None, Some(m)),
            None => (None, None),
        };

        // Dependency candidate: value marker, else default marker, else
        // the annotation.
        let dep_key = if value.is_some() {
            None
        } else if let Some(m) = &marker {
            m.is_injectable().then(|| m.dependency().clone())
        } else if let Some(ArgValue::Marker(dm)) = &entry.default {
            dm.is_injectable().then(|| dm.dependency().clone())
        } else {
            entry.annotation.clone()
        };

        let default_literal = match &entry.default {
            Some(ArgValue::Literal(v)) => Some(v.clone()),
            _ => None,
        };

        let resolved = match &dep_key {
            Some(k) if scope.is_provided(k) => scope.find(k)?.map(|b| (k.clone(), b)),
            _ => None,
        };

        if entry.kind.is_positional() {
            if skip_pos {
                continue;
            }
            if let Some((key, binding)) = resolved {
                plan.any_async_dep |= binding.is_async();
                plan.deps.push(key.clone());
                plan.pos.push(Slot {
                    name: entry.name,
                    source: SlotSource::Dep { key, binding },
                });
            } else if let Some(v) = value {
                plan.pos.push(Slot {
                    name: entry.name,
                    source: SlotSource::Fixed(v),
                });
            } else if let Some(d) = default_literal {
                plan.pos.push(Slot {
                    name: entry.name,
                    source: SlotSource::Default(d),
                });
            } else {
                skip_pos = true;
            }
        } else if let Some(v) = value {
            plan.kw.push(Slot {
                name: entry.name,
                source: SlotSource::Fixed(v),
            });
        } else if let Some((key, binding)) = resolved {
            plan.any_async_dep |= binding.is_async();
            plan.deps.push(key.clone());
            plan.kw.push(Slot {
                name: entry.name,
                source: SlotSource::Dep { key, binding },
            });
        }
        // Unprovided keyword parameters fall back to the callee's own
        // default handling.
    }

    Ok(plan)
}

/// The keys a blueprint would resolve through `scope`, in slot order.
pub(crate) fn dependency_keys(bp: &Blueprint, scope: &Scope) -> Result<Vec<Key>> {
    classify(bp, scope).map(|plan| plan.deps)
}

// =============================================================================
// Compilation
// =============================================================================

pub(crate) fn compile(
    bp: &Blueprint,
    scope: &Scope,
    provides: &Key,
    kind: BindKind,
) -> Result<Binding> {
    let plan = classify(bp, scope)?;

    #[cfg(feature = "logging")]
    trace!(
        target: "spindle",
        key = %provides,
        blueprint = bp.name(),
        kind = ?kind,
        positional = plan.pos.len(),
        keyword = plan.kw.len(),
        deps = ?plan.deps,
        is_async = bp.is_async() || plan.any_async_dep,
        "Compiling resolver"
    );

    let pos = Arc::new(plan.pos);
    let kw = Arc::new(plan.kw);

    if let BindKind::Callable { partial } = kind {
        return Ok(callable_binding(
            bp.callable().clone(),
            pos,
            kw,
            partial,
            plan.any_async_dep,
        ));
    }

    let base = match bp.callable() {
        Callable::Sync(f) if !plan.any_async_dep => sync_matrix(f.clone(), pos, kw),
        callable => async_matrix(callable.clone(), pos, kw),
    };

    Ok(match kind {
        BindKind::Singleton => memoize(base, provides.clone(), false),
        BindKind::Resource => memoize(base, provides.clone(), true),
        _ => base,
    })
}

// =============================================================================
// Slot resolution
// =============================================================================

fn resolve_pos_sync(pos: &[Slot], ctx: &Context) -> Result<Vec<Instance>> {
    let mut out = Vec::with_capacity(pos.len());
    for slot in pos {
        out.push(match &slot.source {
            SlotSource::Fixed(v) | SlotSource::Default(v) => v.clone(),
            SlotSource::Dep { key, binding } => binding.resolve_sync(ctx, key)?,
        });
    }
    Ok(out)
}

fn resolve_kw_sync(
    kw: &[Slot],
    ctx: &Context,
    skip: Option<&CallArgs>,
) -> Result<Vec<(String, Instance)>> {
    let mut out = Vec::with_capacity(kw.len());
    for slot in kw {
        if skip.is_some_and(|user| user.has_kw(&slot.name)) {
            continue;
        }
        let value = match &slot.source {
            SlotSource::Fixed(v) | SlotSource::Default(v) => v.clone(),
            SlotSource::Dep { key, binding } => binding.resolve_sync(ctx, key)?,
        };
        out.push((slot.name.clone(), value));
    }
    Ok(out)
}

// Ready now, or waiting on the i-th gathered future.
enum Pre {
    Ready(Instance),
    Pending(usize),
}

/// Resolve both slot lists, gathering every async dependency in one
/// concurrent join. Positional order is preserved by index.
async fn resolve_slots_async(
    pos: &[Slot],
    kw: &[Slot],
    skip: Option<&CallArgs>,
    ctx: &Context,
) -> Result<(Vec<Instance>, Vec<(String, Instance)>)> {
    let mut pre_pos = Vec::with_capacity(pos.len());
    let mut pre_kw = Vec::new();
    let mut pending = Vec::new();

    for slot in pos {
        pre_pos.push(match &slot.source {
            SlotSource::Fixed(v) | SlotSource::Default(v) => Pre::Ready(v.clone()),
            SlotSource::Dep { binding: Binding::Sync(r), .. } => Pre::Ready(r(ctx)?),
            SlotSource::Dep { binding: Binding::Async(r), .. } => {
                pending.push(r(ctx));
                Pre::Pending(pending.len() - 1)
            }
        });
    }
    for slot in kw {
        if skip.is_some_and(|user| user.has_kw(&slot.name)) {
            continue;
        }
        let pre = match &slot.source {
            SlotSource::Fixed(v) | SlotSource::Default(v) => Pre::Ready(v.clone()),
            SlotSource::Dep { binding: Binding::Sync(r), .. } => Pre::Ready(r(ctx)?),
            SlotSource::Dep { binding: Binding::Async(r), .. } => {
                pending.push(r(ctx));
                Pre::Pending(pending.len() - 1)
            }
        };
        pre_kw.push((slot.name.clone(), pre));
    }

    let gathered: Vec<Instance> = join_all(pending)
        .await
        .into_iter()
        .collect::<Result<_>>()?;

    let positional = pre_pos
        .into_iter()
        .map(|p| match p {
            Pre::Ready(v) => v,
            Pre::Pending(i) => gathered[i].clone(),
        })
        .collect();
    let keyword = pre_kw
        .into_iter()
        .map(|(name, p)| {
            let value = match p {
                Pre::Ready(v) => v,
                Pre::Pending(i) => gathered[i].clone(),
            };
            (name, value)
        })
        .collect();
    Ok((positional, keyword))
}

async fn invoke(callable: &Callable, call: CallArgs) -> Result<Instance> {
    match callable {
        Callable::Sync(f) => f(call),
        Callable::Async(f) => f(call).await,
    }
}

// =============================================================================
// Specialised closures: (has-positional, has-keyword, is-async)
// =============================================================================

fn sync_matrix(f: SyncCallable, pos: Arc<Vec<Slot>>, kw: Arc<Vec<Slot>>) -> Binding {
    match (pos.is_empty(), kw.is_empty()) {
        (true, true) => plain_resolver(f),
        (false, true) => args_resolver(f, pos),
        (true, false) => kwds_resolver(f, kw),
        (false, false) => args_kwds_resolver(f, pos, kw),
    }
}

fn async_matrix(f: Callable, pos: Arc<Vec<Slot>>, kw: Arc<Vec<Slot>>) -> Binding {
    match (pos.is_empty(), kw.is_empty()) {
        (true, true) => async_plain_resolver(f),
        (false, true) => async_args_resolver(f, pos),
        (true, false) => async_kwds_resolver(f, kw),
        (false, false) => async_args_kwds_resolver(f, pos, kw),
    }
}

fn plain_resolver(f: SyncCallable) -> Binding {
    Binding::Sync(Arc::new(move |_ctx| f(CallArgs::new())))
}

fn args_resolver(f: SyncCallable, pos: Arc<Vec<Slot>>) -> Binding {
    Binding::Sync(Arc::new(move |ctx| {
        let mut call = CallArgs::new();
        for value in resolve_pos_sync(&pos, ctx)? {
            call.push(value);
        }
        f(call)
    }))
}

fn kwds_resolver(f: SyncCallable, kw: Arc<Vec<Slot>>) -> Binding {
    Binding::Sync(Arc::new(move |ctx| {
        let mut call = CallArgs::new();
        for (name, value) in resolve_kw_sync(&kw, ctx, None)? {
            call.push_kw(name, value);
        }
        f(call)
    }))
}

fn args_kwds_resolver(f: SyncCallable, pos: Arc<Vec<Slot>>, kw: Arc<Vec<Slot>>) -> Binding {
    Binding::Sync(Arc::new(move |ctx| {
        let mut call = CallArgs::new();
        for value in resolve_pos_sync(&pos, ctx)? {
            call.push(value);
        }
        for (name, value) in resolve_kw_sync(&kw, ctx, None)? {
            call.push_kw(name, value);
        }
        f(call)
    }))
}

fn async_plain_resolver(f: Callable) -> Binding {
    Binding::Async(Arc::new(move |_ctx| {
        let f = f.clone();
        Box::pin(async move { invoke(&f, CallArgs::new()).await })
    }))
}

fn async_args_resolver(f: Callable, pos: Arc<Vec<Slot>>) -> Binding {
    async_args_kwds_resolver(f, pos, Arc::new(Vec::new()))
}

fn async_kwds_resolver(f: Callable, kw: Arc<Vec<Slot>>) -> Binding {
    async_args_kwds_resolver(f, Arc::new(Vec::new()), kw)
}

fn async_args_kwds_resolver(f: Callable, pos: Arc<Vec<Slot>>, kw: Arc<Vec<Slot>>) -> Binding {
    Binding::Async(Arc::new(move |ctx| {
        let ctx = ctx.clone();
        let f = f.clone();
        let pos = Arc::clone(&pos);
        let kw = Arc::clone(&kw);
        Box::pin(async move {
            let (positional, keyword) = resolve_slots_async(&pos, &kw, None, &ctx).await?;
            let mut call = CallArgs::new();
            for value in positional {
                call.push(value);
            }
            for (name, value) in keyword {
                call.push_kw(name, value);
            }
            invoke(&f, call).await
        })
    }))
}

// =============================================================================
// Memoisation decorators (singleton, resource)
// =============================================================================

/// Wrap a compiled closure with at-most-once semantics keyed on `key`.
/// With `enter`, the produced value joins the context's exit stack
/// before being cached.
fn memoize(inner: Binding, key: Key, enter: bool) -> Binding {
    match inner {
        Binding::Sync(r) => Binding::Sync(Arc::new(move |ctx| {
            if let Some(v) = ctx.cached(&key) {
                return Ok(v);
            }
            match ctx.key_lock(&key) {
                // Parallel mode: double-checked under the key's
                // production lock.
                Some(lock) => {
                    let _guard = lock.lock();
                    if let Some(v) = ctx.cached(&key) {
                        return Ok(v);
                    }
                    produce_sync(&r, ctx, &key, enter)
                }
                None => produce_sync(&r, ctx, &key, enter),
            }
        })),
        Binding::Async(r) => Binding::Async(Arc::new(move |ctx| {
            let ctx = ctx.clone();
            let key = key.clone();
            let r = r.clone();
            Box::pin(async move {
                if let Some(v) = ctx.cached(&key) {
                    return Ok(v);
                }
                // One shared producer future per key; every concurrent
                // waiter awaits the same one.
                let fut = ctx.once_future(&key, || {
                    let ctx = ctx.clone();
                    let key = key.clone();
                    let r = r.clone();
                    async move {
                        let v = r(&ctx).await?;
                        let v = if enter { ctx.enter_instance(v)? } else { v };
                        ctx.cache(key.clone(), v.clone());
                        Ok(v)
                    }
                    .boxed()
                });
                let value = fut.await;
                ctx.clear_pending(&key);
                value
            })
        })),
    }
}

fn produce_sync(
    r: &crate::provider::SyncResolver,
    ctx: &Context,
    key: &Key,
    enter: bool,
) -> Result<Instance> {
    let v = r(ctx)?;
    let v = if enter { ctx.enter_instance(v)? } else { v };
    ctx.cache(key.clone(), v.clone());
    Ok(v)
}

// =============================================================================
// Callable factories
// =============================================================================

/// The resolved value of a callable-factory provider: a closure curried
/// over the injected arguments, accepting further arguments at call time.
///
/// Prefix mode puts injected arguments before caller-supplied ones;
/// partial mode binds caller arguments left-to-right first and fills the
/// tail with injected ones. Caller keyword arguments always override
/// injected keyword arguments.
pub struct InjectedFn {
    ctx: Context,
    callable: Callable,
    pos: Arc<Vec<Slot>>,
    kw: Arc<Vec<Slot>>,
    partial: bool,
    has_async_deps: bool,
}

impl InjectedFn {
    /// Whether calling requires an async driver.
    #[inline]
    pub fn is_async(&self) -> bool {
        self.callable.is_async() || self.has_async_deps
    }

    /// Invoke with the caller's arguments, resolving injected slots from
    /// the context this value was made under.
    pub fn call(&self, user: CallArgs) -> Result<Instance> {
        if self.is_async() {
            return Err(DiError::AsyncFromSync {
                what: "callable value".into(),
            });
        }
        let injected = resolve_pos_sync(&self.pos, &self.ctx)?;
        let keyword = resolve_kw_sync(&self.kw, &self.ctx, Some(&user))?;
        match &self.callable {
            Callable::Sync(f) => f(self.merge(injected, keyword, &user)),
            Callable::Async(_) => Err(DiError::AsyncFromSync {
                what: "callable value".into(),
            }),
        }
    }

    /// Invoke, awaiting async dependencies and an async callable.
    pub async fn call_async(&self, user: CallArgs) -> Result<Instance> {
        let (injected, keyword) =
            resolve_slots_async(&self.pos, &self.kw, Some(&user), &self.ctx).await?;
        invoke(&self.callable, self.merge(injected, keyword, &user)).await
    }

    fn merge(
        &self,
        injected: Vec<Instance>,
        keyword: Vec<(String, Instance)>,
        user: &CallArgs,
    ) -> CallArgs {
        let mut call = CallArgs::new();
        if self.partial {
            for value in user.positional() {
                call.push(value.clone());
            }
            for value in injected {
                call.push(value);
            }
        } else {
            for value in injected {
                call.push(value);
            }
            for value in user.positional() {
                call.push(value.clone());
            }
        }
        for (name, value) in keyword {
            call.push_kw(name, value);
        }
        for (name, value) in user.keyword() {
            call.push_kw(name.clone(), value.clone());
        }
        call
    }
}

impl fmt::Debug for InjectedFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectedFn")
            .field("positional", &self.pos.len())
            .field("keyword", &self.kw.len())
            .field("partial", &self.partial)
            .field("is_async", &self.is_async())
            .finish()
    }
}

fn callable_binding(
    callable: Callable,
    pos: Arc<Vec<Slot>>,
    kw: Arc<Vec<Slot>>,
    partial: bool,
    has_async_deps: bool,
) -> Binding {
    Binding::Sync(Arc::new(move |ctx| {
        Ok(Arc::new(InjectedFn {
            ctx: ctx.clone(),
            callable: callable.clone(),
            pos: Arc::clone(&pos),
            kw: Arc::clone(&kw),
            partial,
            has_async_deps,
        }) as Instance)
    }))
}
