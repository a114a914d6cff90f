//! Providers: the rules for producing values
//!
//! A [`Provider`] is an immutable record describing how to produce a value
//! for one key in one container. The six kinds collapse into a single sum
//! type; binding dispatches on the tag and hands factories to the resolver
//! for closure compilation.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use once_cell::sync::OnceCell;

use crate::container::Container;
use crate::context::Context;
use crate::error::{DiError, Result};
use crate::key::Key;
use crate::resolver::{self, BindKind};
use crate::scope::Scope;
use crate::signature::{Blueprint, Instance};

#[cfg(feature = "logging")]
use tracing::trace;

/// Synchronous bound resolver: invoke under a context to get a value.
pub type SyncResolver = Arc<dyn Fn(&Context) -> Result<Instance> + Send + Sync>;

/// Asynchronous bound resolver.
pub type AsyncResolver =
    Arc<dyn Fn(&Context) -> BoxFuture<'static, Result<Instance>> + Send + Sync>;

/// What [`Provider::bind`] produces: a zero-dependency closure, compiled
/// for one scope, that yields the provider's value under a context.
///
/// A binding is async when its callable is async or any dependency bound
/// async; async bindings can only be driven through `make_async`.
#[derive(Clone)]
pub enum Binding {
    Sync(SyncResolver),
    Async(AsyncResolver),
}

impl Binding {
    #[inline]
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }

    /// Invoke synchronously; async bindings are refused.
    pub(crate) fn resolve_sync(&self, ctx: &Context, key: &Key) -> Result<Instance> {
        match self {
            Self::Sync(r) => r(ctx),
            Self::Async(_) => Err(DiError::AsyncFromSync {
                what: format!("binding for {key}"),
            }),
        }
    }

    /// Invoke, awaiting when async.
    pub(crate) async fn resolve(&self, ctx: &Context) -> Result<Instance> {
        match self {
            Self::Sync(r) => r(ctx),
            Self::Async(r) => r(ctx).await,
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Binding::Sync"),
            Self::Async(_) => f.write_str("Binding::Async"),
        }
    }
}

/// Optional predicate limiting where a provider can bind.
pub type Predicate = Arc<dyn Fn(&Scope) -> bool + Send + Sync>;

/// The provider variants.
pub enum ProviderKind {
    /// Serve the key by delegating to another key's binding
    Alias { target: Key },
    /// A fixed value, cloned out on every resolve
    Value { value: Instance },
    /// Invoke the blueprint afresh on every resolve
    Factory(Blueprint),
    /// Invoke once per context, then serve the cached value
    Singleton(Blueprint),
    /// As singleton, plus teardown on the context's exit stack
    Resource(Blueprint),
    /// The resolved value is itself a callable over the injected arguments
    CallableFactory { blueprint: Blueprint, partial: bool },
}

impl ProviderKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Alias { .. } => "alias",
            Self::Value { .. } => "value",
            Self::Factory(_) => "factory",
            Self::Singleton(_) => "singleton",
            Self::Resource(_) => "resource",
            Self::CallableFactory { .. } => "callable",
        }
    }
}

/// An immutable rule for producing a value for one key in one container.
///
/// Configure fluently before registration; registration freezes the
/// record and attaches it to exactly one container.
pub struct Provider {
    provides: Option<Key>,
    kind: ProviderKind,
    is_default: bool,
    guard: Option<Predicate>,
    container: OnceCell<Container>,
}

impl Provider {
    fn from_kind(provides: Option<Key>, kind: ProviderKind) -> Self {
        Self {
            provides,
            kind,
            is_default: false,
            guard: None,
            container: OnceCell::new(),
        }
    }

    /// Alias provider: `provides` resolves to whatever `target` resolves to.
    pub fn alias(provides: Key, target: Key) -> Self {
        Self::from_kind(Some(provides), ProviderKind::Alias { target })
    }

    /// Value provider for an explicit key.
    pub fn value_at(provides: Key, value: Instance) -> Self {
        Self::from_kind(Some(provides), ProviderKind::Value { value })
    }

    /// Value provider keyed by the value's type.
    pub fn value<T: Send + Sync + 'static>(value: T) -> Self {
        Self::value_at(Key::of::<T>(), Arc::new(value))
    }

    /// Factory provider: a fresh value per resolve.
    pub fn factory(blueprint: Blueprint) -> Self {
        let provides = blueprint.provided_key().cloned();
        Self::from_kind(provides, ProviderKind::Factory(blueprint))
    }

    /// Singleton provider: at most one value per context.
    pub fn singleton(blueprint: Blueprint) -> Self {
        let provides = blueprint.provided_key().cloned();
        Self::from_kind(provides, ProviderKind::Singleton(blueprint))
    }

    /// Resource provider: a singleton whose teardown joins the exit stack.
    pub fn resource(blueprint: Blueprint) -> Self {
        let provides = blueprint.provided_key().cloned();
        Self::from_kind(provides, ProviderKind::Resource(blueprint))
    }

    /// Callable-factory provider in prefix mode: injected arguments
    /// precede caller-supplied ones.
    pub fn callable(blueprint: Blueprint) -> Self {
        let provides = blueprint.provided_key().cloned();
        Self::from_kind(
            provides,
            ProviderKind::CallableFactory {
                blueprint,
                partial: false,
            },
        )
    }

    /// Callable-factory provider in partial mode: caller-supplied
    /// arguments bind left-to-right first, injected ones fill the tail.
    pub fn callable_partial(blueprint: Blueprint) -> Self {
        let provides = blueprint.provided_key().cloned();
        Self::from_kind(
            provides,
            ProviderKind::CallableFactory {
                blueprint,
                partial: true,
            },
        )
    }

    /// Mark as a default: it defers to any non-default provider for the
    /// same key in the same lookup.
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Restrict binding with a predicate over the scope.
    pub fn when(mut self, predicate: impl Fn(&Scope) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Arc::new(predicate));
        self
    }

    /// Override the key this provider registers under.
    pub fn provides_key(mut self, key: Key) -> Self {
        self.provides = Some(key);
        self
    }

    #[inline]
    pub fn provides(&self) -> Option<&Key> {
        self.provides.as_ref()
    }

    #[inline]
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    #[inline]
    pub fn kind(&self) -> &ProviderKind {
        &self.kind
    }

    #[inline]
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// The container this provider is registered with, once attached.
    #[inline]
    pub fn container(&self) -> Option<&Container> {
        self.container.get()
    }

    /// Attach to a container. A provider belongs to at most one; attaching
    /// to the same container twice is a no-op.
    pub(crate) fn set_container(&self, container: &Container) -> bool {
        match self.container.try_insert(container.clone()) {
            Ok(_) => true,
            Err((existing, _)) => existing == container,
        }
    }

    /// Whether this provider can serve `key` inside `scope`.
    pub(crate) fn can_bind(&self, scope: &Scope, _key: &Key) -> bool {
        let in_scope = self
            .container
            .get()
            .is_some_and(|c| scope.spans(c));
        in_scope && self.guard.as_ref().is_none_or(|g| g(scope))
    }

    /// Combine with lower-priority providers for the same key. Defaults
    /// were already elided by the lookup; the primary wins, but a lower
    /// provider registered under a different key is a registry
    /// inconsistency.
    pub(crate) fn substitute(self: &Arc<Self>, lower: &[Arc<Provider>]) -> Result<Arc<Provider>> {
        if let Some(primary_key) = self.provides() {
            for other in lower {
                if let Some(other_key) = other.provides() {
                    if other_key != primary_key {
                        return Err(DiError::BindingConflict {
                            key: primary_key.clone(),
                            reason: format!(
                                "substituted {} provider registers {other_key}",
                                other.kind_name()
                            ),
                        });
                    }
                }
            }
        }
        Ok(Arc::clone(self))
    }

    /// Compile a resolver for `key` in `scope`.
    pub(crate) fn bind(self: &Arc<Self>, scope: &Scope, key: &Key) -> Result<Binding> {
        #[cfg(feature = "logging")]
        trace!(
            target: "spindle",
            key = %key,
            kind = self.kind_name(),
            "Binding provider"
        );

        match &self.kind {
            ProviderKind::Alias { target } => bind_alias(scope, key, target),
            ProviderKind::Value { value } => {
                let value = value.clone();
                Ok(Binding::Sync(Arc::new(move |_ctx| Ok(value.clone()))))
            }
            ProviderKind::Factory(bp) => {
                resolver::compile(bp, scope, &self.key_for(key), BindKind::Factory)
            }
            ProviderKind::Singleton(bp) => {
                resolver::compile(bp, scope, &self.key_for(key), BindKind::Singleton)
            }
            ProviderKind::Resource(bp) => {
                resolver::compile(bp, scope, &self.key_for(key), BindKind::Resource)
            }
            ProviderKind::CallableFactory { blueprint, partial } => resolver::compile(
                blueprint,
                scope,
                &self.key_for(key),
                BindKind::Callable { partial: *partial },
            ),
        }
    }

    // The key bindings memoise under: the registered key when present,
    // else the key the lookup asked for.
    fn key_for(&self, requested: &Key) -> Key {
        self.provides.clone().unwrap_or_else(|| requested.clone())
    }
}

// Follow the alias chain to a non-alias key, then bind that key. The
// chain is walked eagerly so a cycle is reported as such rather than as
// a generic dependency cycle.
fn bind_alias(scope: &Scope, key: &Key, target: &Key) -> Result<Binding> {
    let mut chain = vec![key.clone()];
    let mut current = target.clone();
    loop {
        if chain.contains(&current) {
            chain.push(current);
            return Err(DiError::AliasCycle { chain });
        }
        chain.push(current.clone());
        match scope.resolve_provider(&current)? {
            Some(p) => match p.kind() {
                ProviderKind::Alias { target } => current = target.clone(),
                _ => break,
            },
            None => break,
        }
    }
    match scope.find(&current)? {
        Some(binding) => Ok(binding),
        None => Err(scope.unresolved(&current)),
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("provides", &self.provides)
            .field("kind", &self.kind.name())
            .field("is_default", &self.is_default)
            .field("attached", &self.container.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::Blueprint;

    struct Widget;

    #[test]
    fn provider_infers_key_from_blueprint() {
        let p = Provider::factory(Blueprint::of0(|| Widget));
        assert_eq!(p.provides(), Some(&Key::of::<Widget>()));
        assert_eq!(p.kind_name(), "factory");
        assert!(!p.is_default());
    }

    #[test]
    fn default_flag_is_fluent() {
        let p = Provider::value(Widget).as_default();
        assert!(p.is_default());
    }

    #[test]
    fn attaches_to_one_container_only() {
        let a = Container::new("a");
        let b = Container::new("b");
        let p = Provider::value(Widget);
        assert!(p.set_container(&a));
        assert!(p.set_container(&a));
        assert!(!p.set_container(&b));
        assert_eq!(p.container(), Some(&a));
    }

    #[test]
    fn substitute_keeps_the_primary() {
        let primary = Arc::new(Provider::value(Widget));
        let lower = Arc::new(Provider::factory(Blueprint::of0(|| Widget)).as_default());
        let combined = primary.substitute(&[lower]).unwrap();
        assert!(Arc::ptr_eq(&combined, &primary));
    }

    #[test]
    fn substitute_rejects_key_mismatch() {
        struct Other;
        let primary = Arc::new(Provider::value(Widget));
        let stray = Arc::new(Provider::value(Other));
        assert!(matches!(
            primary.substitute(&[stray]),
            Err(DiError::BindingConflict { .. })
        ));
    }
}
