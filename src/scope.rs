//! Scopes: a sealed container graph plus its binding cache
//!
//! Opening a scope snapshots the container's inclusion graph in lookup
//! order and seals every member. Bindings are compiled lazily per key and
//! memoised, including negative results, so repeated lookups return the
//! same resolver object.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::container::Container;
use crate::context::{Context, ContextGuard, ContextStore};
use crate::error::{DiError, Result};
use crate::key::{Key, is_injectable};
use crate::provider::{Binding, Provider};
use crate::resolver;
use crate::signature::Blueprint;

#[cfg(feature = "logging")]
use tracing::debug;

/// Threading model for a scope, chosen at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// One logical task at a time; no lock, suspension only in async
    /// resolvers
    Cooperative,
    /// Multiple OS threads may enter; singleton and resource production
    /// is double-checked under the scope lock
    #[default]
    Parallel,
}

struct ScopeInner {
    container: Container,
    /// Pre-order lookup: self first, then included containers
    /// newest-first, depth-first. The reverse of the DRO.
    lookup: Vec<Container>,
    bindings: DashMap<Key, Option<Binding>, RandomState>,
    lock: Option<Mutex<()>>,
    concurrency: Concurrency,
    store: Arc<ContextStore>,
}

/// A running instantiation of a container graph.
///
/// Cloning is cheap; all clones share one binding cache and one root
/// activation store.
///
/// # Examples
///
/// ```rust
/// use spindle::{Blueprint, Container, Scope};
///
/// struct Service;
///
/// let container = Container::new("app");
/// container.factory(Blueprint::of0(|| Service)).unwrap();
///
/// let scope = Scope::new(&container).unwrap();
/// let ctx = scope.enter();
/// assert!(ctx.get::<Service>().is_ok());
/// ```
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

thread_local! {
    // Per-thread resolution stack for cycle detection at bind time.
    static BIND_STACK: RefCell<Vec<Key>> = const { RefCell::new(Vec::new()) };
}

impl Scope {
    /// Open a scope in the default (parallel) mode.
    pub fn new(container: &Container) -> Result<Self> {
        Self::with_concurrency(container, Concurrency::default())
    }

    /// Open a scope with an explicit threading model.
    pub fn with_concurrency(container: &Container, concurrency: Concurrency) -> Result<Self> {
        let lookup = container.lookup_order()?;
        for member in &lookup {
            member.seal();
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "spindle",
            container = %container.name(),
            graph_size = lookup.len(),
            mode = ?concurrency,
            "Opening scope"
        );

        let lock = match concurrency {
            Concurrency::Parallel => Some(Mutex::new(())),
            Concurrency::Cooperative => None,
        };

        Ok(Self {
            inner: Arc::new(ScopeInner {
                container: container.clone(),
                lookup,
                bindings: DashMap::with_hasher(RandomState::new()),
                lock,
                concurrency,
                store: Arc::new(ContextStore::new()),
            }),
        })
    }

    #[inline]
    pub fn container(&self) -> &Container {
        &self.inner.container
    }

    #[inline]
    pub fn concurrency(&self) -> Concurrency {
        self.inner.concurrency
    }

    /// The scope lock, present in parallel mode. Its presence tells the
    /// memoisation decorators to double-check; callers may also take it
    /// for their own scope-wide one-shot initialisation.
    #[inline]
    pub fn lock(&self) -> Option<&Mutex<()>> {
        self.inner.lock.as_ref()
    }

    /// Enter the scope: installs the root context as the thread's current
    /// context. Dropping (or closing) the guard unwinds the exit stack.
    pub fn enter(&self) -> ContextGuard {
        ContextGuard::activate(Context::root(self.clone()))
    }

    /// Cheap test: does any container in the graph have a provider that
    /// can bind `key`? Does not compile anything.
    pub fn is_provided(&self, key: &Key) -> bool {
        matches!(self.resolve_provider(key), Ok(Some(_)))
    }

    /// The memoised binding for `key`, compiling it on first access.
    /// Negative results are memoised too; bind failures are not.
    pub fn find(&self, key: &Key) -> Result<Option<Binding>> {
        if let Some(cached) = self.inner.bindings.get(key) {
            return Ok(cached.clone());
        }

        BIND_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.iter().any(|k| k == key) {
                let mut chain = stack.clone();
                chain.push(key.clone());
                return Err(DiError::DependencyCycle { chain });
            }
            stack.push(key.clone());
            Ok(())
        })?;

        let outcome = (|| match self.resolve_provider(key)? {
            Some(provider) => Ok(Some(provider.bind(self, key)?)),
            None => Ok(None),
        })();

        BIND_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        let binding = outcome?;
        // Concurrent binders race benignly; the first store wins and
        // every caller reads the stored one back.
        let entry = self.inner.bindings.entry(key.clone()).or_insert(binding);
        Ok(entry.value().clone())
    }

    /// Reduce the provider stacks for `key` across the lookup order:
    /// newest-first, defaults elided when any non-default survives, the
    /// head substituted over the rest.
    pub(crate) fn resolve_provider(&self, key: &Key) -> Result<Option<Arc<Provider>>> {
        if !is_injectable(key) {
            return Ok(None);
        }
        let mut candidates: Vec<Arc<Provider>> = Vec::new();
        for container in &self.inner.lookup {
            let mut providers = container.providers_for(key);
            providers.reverse();
            candidates.extend(providers);
        }
        candidates.retain(|p| p.can_bind(self, key));
        let non_default: Vec<_> = candidates
            .iter()
            .filter(|p| !p.is_default())
            .cloned()
            .collect();
        let candidates = if non_default.is_empty() {
            candidates
        } else {
            non_default
        };
        match candidates.split_first() {
            None => Ok(None),
            Some((primary, rest)) => primary.substitute(rest).map(Some),
        }
    }

    /// Whether `container` is part of this scope's graph.
    pub(crate) fn spans(&self, container: &Container) -> bool {
        self.inner.lookup.iter().any(|c| c == container)
    }

    /// The keys a blueprint would resolve through this scope.
    pub fn dependencies_of(&self, blueprint: &Blueprint) -> Result<Vec<Key>> {
        resolver::dependency_keys(blueprint, self)
    }

    pub(crate) fn root_store(&self) -> Arc<ContextStore> {
        Arc::clone(&self.inner.store)
    }

    pub(crate) fn unresolved(&self, key: &Key) -> DiError {
        DiError::Unresolved {
            key: key.clone(),
            suggestions: self.suggestions(key),
        }
    }

    // Nearby keys by case-insensitive name containment, for diagnostics.
    fn suggestions(&self, key: &Key) -> Vec<Key> {
        let target = key.display_name().to_lowercase();
        let mut found = Vec::new();
        for container in &self.inner.lookup {
            for candidate in container.registered_keys() {
                if candidate == *key || found.contains(&candidate) {
                    continue;
                }
                let name = candidate.display_name().to_lowercase();
                if name.contains(&target) || target.contains(&name) {
                    found.push(candidate);
                }
            }
        }
        found.truncate(5);
        found
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("container", &self.container().name())
            .field("graph_size", &self.inner.lookup.len())
            .field("bindings_cached", &self.inner.bindings.len())
            .field("concurrency", &self.concurrency())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Provider;
    use crate::signature::Blueprint;

    struct Widget;
    struct Gadget;

    fn binding_ptr_eq(a: &Option<Binding>, b: &Option<Binding>) -> bool {
        match (a, b) {
            (Some(Binding::Sync(x)), Some(Binding::Sync(y))) => Arc::ptr_eq(x, y),
            (Some(Binding::Async(x)), Some(Binding::Async(y))) => Arc::ptr_eq(x, y),
            (None, None) => true,
            _ => false,
        }
    }

    #[test]
    fn binding_cache_returns_same_resolver() {
        let c = Container::new("cache");
        c.factory(Blueprint::of0(|| Widget)).unwrap();
        let scope = Scope::new(&c).unwrap();

        let first = scope.find(&Key::of::<Widget>()).unwrap();
        let second = scope.find(&Key::of::<Widget>()).unwrap();
        assert!(binding_ptr_eq(&first, &second));
    }

    #[test]
    fn negative_results_are_cached() {
        let c = Container::new("neg");
        let scope = Scope::new(&c).unwrap();
        assert!(scope.find(&Key::of::<Widget>()).unwrap().is_none());
        assert!(scope.find(&Key::of::<Widget>()).unwrap().is_none());
        assert!(!scope.is_provided(&Key::of::<Widget>()));
    }

    #[test]
    fn opening_a_scope_seals_the_graph() {
        let base = Container::new("base");
        let app = Container::new("app");
        app.include([&base]).unwrap();
        let _scope = Scope::new(&app).unwrap();

        assert!(app.is_sealed());
        assert!(base.is_sealed());
        assert!(matches!(
            base.factory(Blueprint::of0(|| Widget)),
            Err(DiError::ConcurrentMutation { .. })
        ));
    }

    #[test]
    fn included_containers_provide_keys() {
        let base = Container::new("base");
        base.factory(Blueprint::of0(|| Widget)).unwrap();
        let app = Container::new("app");
        app.include([&base]).unwrap();

        let scope = Scope::new(&app).unwrap();
        assert!(scope.is_provided(&Key::of::<Widget>()));
        assert!(!scope.is_provided(&Key::of::<Gadget>()));
    }

    #[test]
    fn last_registration_wins() {
        struct Tagged(&'static str);

        let c = Container::new("wins");
        c.register(
            Provider::factory(Blueprint::of0(|| Tagged("first"))),
        )
        .unwrap();
        c.register(
            Provider::factory(Blueprint::of0(|| Tagged("second"))),
        )
        .unwrap();

        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();
        let tagged = ctx.get::<Tagged>().unwrap();
        assert_eq!(tagged.0, "second");
    }

    #[test]
    fn own_providers_shadow_included_ones() {
        struct Tagged(&'static str);

        let base = Container::new("base");
        base.factory(Blueprint::of0(|| Tagged("base"))).unwrap();
        let app = Container::new("app");
        app.include([&base]).unwrap();
        app.factory(Blueprint::of0(|| Tagged("app"))).unwrap();

        let scope = Scope::new(&app).unwrap();
        let ctx = scope.enter();
        assert_eq!(ctx.get::<Tagged>().unwrap().0, "app");
    }

    #[test]
    fn default_providers_defer_to_non_defaults() {
        struct Tagged(&'static str);

        let c = Container::new("defaults");
        c.register(Provider::factory(Blueprint::of0(|| Tagged("fallback"))).as_default())
            .unwrap();
        c.register(Provider::factory(Blueprint::of0(|| Tagged("real"))))
            .unwrap();

        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();
        assert_eq!(ctx.get::<Tagged>().unwrap().0, "real");

        // Without the non-default, the default serves the key.
        let only_default = Container::new("defaults-only");
        only_default
            .register(Provider::factory(Blueprint::of0(|| Tagged("fallback"))).as_default())
            .unwrap();
        let scope = Scope::new(&only_default).unwrap();
        let ctx = scope.enter();
        assert_eq!(ctx.get::<Tagged>().unwrap().0, "fallback");
    }

    #[test]
    fn guarded_providers_step_aside() {
        struct Tagged(&'static str);

        let c = Container::new("guarded");
        c.register(Provider::factory(Blueprint::of0(|| Tagged("open"))))
            .unwrap();
        c.register(Provider::factory(Blueprint::of0(|| Tagged("never"))).when(|_| false))
            .unwrap();

        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();
        // The newest provider is guarded off; the older one serves.
        assert_eq!(ctx.get::<Tagged>().unwrap().0, "open");
    }

    #[test]
    fn dependency_cycle_is_detected() {
        struct Ping;
        struct Pong;

        let c = Container::new("cycle");
        c.factory(Blueprint::of1(|_pong: Arc<Pong>| Ping)).unwrap();
        c.factory(Blueprint::of1(|_ping: Arc<Ping>| Pong)).unwrap();

        let scope = Scope::new(&c).unwrap();
        assert!(matches!(
            scope.find(&Key::of::<Ping>()),
            Err(DiError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn alias_cycle_is_detected() {
        let c = Container::new("alias-cycle");
        let a = Key::token("a");
        let b = Key::token("b");
        c.alias(a.clone(), b.clone()).unwrap();
        c.alias(b.clone(), a.clone()).unwrap();

        let scope = Scope::new(&c).unwrap();
        assert!(matches!(
            scope.find(&a),
            Err(DiError::AliasCycle { .. })
        ));
    }

    #[test]
    fn unresolved_suggests_similar_keys() {
        let c = Container::new("suggest");
        c.value_at(Key::token("db-primary"), Arc::new(Widget))
            .unwrap();
        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();
        let err = ctx.make(&Key::token("db")).unwrap_err();
        match err {
            DiError::Unresolved { suggestions, .. } => {
                assert_eq!(suggestions.len(), 1);
                assert_eq!(suggestions[0].display_name(), "db-primary");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn lookup_reduces_to_the_registered_provider() {
        let c = Container::new("roundtrip");
        let registered = c.factory(Blueprint::of0(|| Widget)).unwrap();
        let scope = Scope::new(&c).unwrap();

        let resolved = scope
            .resolve_provider(&Key::of::<Widget>())
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&resolved, &registered));
    }

    #[test]
    fn dependencies_are_reported_in_slot_order() {
        let c = Container::new("deps");
        c.factory(Blueprint::of0(|| Widget)).unwrap();
        c.factory(Blueprint::of0(|| Gadget)).unwrap();

        struct Combined;
        let bp = Blueprint::of2(|_w: Arc<Widget>, _g: Arc<Gadget>| Combined);
        let scope = Scope::new(&c).unwrap();
        assert_eq!(
            scope.dependencies_of(&bp).unwrap(),
            vec![Key::of::<Widget>(), Key::of::<Gadget>()]
        );
    }
}
