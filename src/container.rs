//! Containers: ordered registries of providers
//!
//! A `Container` maps keys to stacks of providers (most recent last) and
//! may include other containers, exposing their bindings transitively.
//! The inclusion graph must stay acyclic; opening a scope snapshots it in
//! dependency-resolution order and seals every member against further
//! registration.
//!
//! # Examples
//!
//! ```rust
//! use spindle::{Blueprint, Container, Scope};
//! use std::sync::Arc;
//!
//! struct Database;
//! struct UserRepo { db: Arc<Database> }
//!
//! let base = Container::new("base");
//! base.singleton(Blueprint::of0(|| Database)).unwrap();
//!
//! let app = Container::new("app");
//! app.include([&base]).unwrap();
//! app.factory(Blueprint::of1(|db: Arc<Database>| UserRepo { db })).unwrap();
//!
//! let scope = Scope::new(&app).unwrap();
//! let ctx = scope.enter();
//! let repo = ctx.get::<UserRepo>().unwrap();
//! # let _ = repo;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{DiError, Result};
use crate::key::{Key, is_injectable};
use crate::provider::Provider;
use crate::signature::{Blueprint, Instance};

#[cfg(feature = "logging")]
use tracing::debug;

static CONTAINER_IDS: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct Registry {
    bindings: HashMap<Key, Vec<Arc<Provider>>, ahash::RandomState>,
    included: Vec<Container>,
}

struct ContainerInner {
    name: Arc<str>,
    id: u64,
    registry: RwLock<Registry>,
    sealed: AtomicBool,
}

/// A named, process-uniquely-identified registry of providers.
///
/// Cloning is cheap (shared handle). Equality is identity; hashing is by
/// name, so namesake containers can share map buckets without ever being
/// conflated.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    /// Create an empty container.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        let name = name.into();
        let id = CONTAINER_IDS.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "logging")]
        debug!(
            target: "spindle",
            container = %name,
            id,
            "Creating container"
        );

        Self {
            inner: Arc::new(ContainerInner {
                name,
                id,
                registry: RwLock::new(Registry::default()),
                sealed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a container that includes `others` from the start.
    pub fn with_includes<'a>(
        name: impl Into<Arc<str>>,
        others: impl IntoIterator<Item = &'a Container>,
    ) -> Result<Self> {
        let container = Self::new(name);
        container.include(others)?;
        Ok(container)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Process-unique monotonic id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a provider under its key. Later registrations for the
    /// same key win over earlier ones.
    pub fn register(&self, provider: Provider) -> Result<Arc<Provider>> {
        let key = provider.provides().cloned().ok_or_else(|| {
            DiError::InvalidBlueprint {
                name: self.name().to_string(),
                reason: "provider has no key to register under".into(),
            }
        })?;
        if !is_injectable(&key) {
            return Err(DiError::NotInjectable { key });
        }
        self.ensure_open()?;

        let provider = Arc::new(provider);
        if !provider.set_container(self) {
            return Err(DiError::BindingConflict {
                key,
                reason: "provider is already registered with another container".into(),
            });
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "spindle",
            container = %self.name(),
            key = %key,
            kind = provider.kind_name(),
            is_default = provider.is_default(),
            "Registering provider"
        );

        let mut registry = self.inner.registry.write();
        let stack = registry.bindings.entry(key).or_default();
        if !stack.iter().any(|p| Arc::ptr_eq(p, &provider)) {
            stack.push(Arc::clone(&provider));
        }
        Ok(provider)
    }

    /// Register several providers at once.
    pub fn provide<I: IntoIterator<Item = Provider>>(&self, providers: I) -> Result<()> {
        for provider in providers {
            self.register(provider)?;
        }
        Ok(())
    }

    /// Register a fixed value under its type key.
    pub fn value<T: Send + Sync + 'static>(&self, value: T) -> Result<Arc<Provider>> {
        self.register(Provider::value(value))
    }

    /// Register a fixed value under an explicit key.
    pub fn value_at(&self, key: Key, value: Instance) -> Result<Arc<Provider>> {
        self.register(Provider::value_at(key, value))
    }

    /// Register an alias: `provides` resolves to `target`'s value.
    pub fn alias(&self, provides: Key, target: Key) -> Result<Arc<Provider>> {
        self.register(Provider::alias(provides, target))
    }

    /// Register a factory: a fresh value per resolve.
    pub fn factory(&self, blueprint: Blueprint) -> Result<Arc<Provider>> {
        self.register(Provider::factory(blueprint))
    }

    /// Register a singleton: one value per context.
    pub fn singleton(&self, blueprint: Blueprint) -> Result<Arc<Provider>> {
        self.register(Provider::singleton(blueprint))
    }

    /// Register a resource: a singleton torn down when the context closes.
    pub fn resource(&self, blueprint: Blueprint) -> Result<Arc<Provider>> {
        self.register(Provider::resource(blueprint))
    }

    /// Register a callable factory (prefix mode).
    pub fn callable(&self, blueprint: Blueprint) -> Result<Arc<Provider>> {
        self.register(Provider::callable(blueprint))
    }

    /// Register a callable factory in partial mode.
    pub fn callable_partial(&self, blueprint: Blueprint) -> Result<Arc<Provider>> {
        self.register(Provider::callable_partial(blueprint))
    }

    // =========================================================================
    // Inclusion graph
    // =========================================================================

    /// Expose other containers' bindings through this one. Duplicates
    /// and self-inclusion are ignored.
    pub fn include<'a>(&self, others: impl IntoIterator<Item = &'a Container>) -> Result<()> {
        self.ensure_open()?;
        let mut registry = self.inner.registry.write();
        for other in others {
            if other == self || registry.included.iter().any(|c| c == other) {
                continue;
            }

            #[cfg(feature = "logging")]
            debug!(
                target: "spindle",
                container = %self.name(),
                included = %other.name(),
                "Including container"
            );

            registry.included.push(other.clone());
        }
        Ok(())
    }

    /// Directly included containers, in inclusion order.
    pub fn included(&self) -> Vec<Container> {
        self.inner.registry.read().included.clone()
    }

    /// Reflexive, transitive inclusion test.
    pub fn includes(&self, other: &Container) -> bool {
        fn walk(current: &Container, target: &Container, seen: &mut Vec<u64>) -> bool {
            if current == target {
                return true;
            }
            if seen.contains(&current.id()) {
                return false;
            }
            seen.push(current.id());
            current
                .inner
                .registry
                .read()
                .included
                .iter()
                .any(|c| walk(c, target, seen))
        }
        walk(self, other, &mut Vec::new())
    }

    /// Dependency-resolution order: a deterministic traversal of the
    /// inclusion graph yielding each container exactly once, self last.
    /// Fails on an inclusion cycle.
    pub fn dro(&self) -> Result<Vec<Container>> {
        let mut order = self.lookup_order()?;
        order.reverse();
        Ok(order)
    }

    /// Binding-lookup order: self first, then included containers
    /// newest-first, depth-first. The reverse of [`Container::dro`].
    pub(crate) fn lookup_order(&self) -> Result<Vec<Container>> {
        fn visit(
            current: &Container,
            out: &mut Vec<Container>,
            seen: &mut Vec<u64>,
            path: &mut Vec<(u64, String)>,
        ) -> Result<()> {
            if path.iter().any(|(id, _)| *id == current.id()) {
                let mut chain: Vec<String> = path.iter().map(|(_, n)| n.clone()).collect();
                chain.push(current.name().to_string());
                return Err(DiError::InclusionCycle { chain });
            }
            if seen.contains(&current.id()) {
                return Ok(());
            }
            seen.push(current.id());
            out.push(current.clone());
            path.push((current.id(), current.name().to_string()));
            let included = current.inner.registry.read().included.clone();
            for child in included.iter().rev() {
                visit(child, out, seen, path)?;
            }
            path.pop();
            Ok(())
        }

        let mut out = Vec::new();
        visit(self, &mut out, &mut Vec::new(), &mut Vec::new())?;
        Ok(out)
    }

    // =========================================================================
    // Lookup support
    // =========================================================================

    /// The provider stack for a key, in registration order.
    pub(crate) fn providers_for(&self, key: &Key) -> Vec<Arc<Provider>> {
        self.inner
            .registry
            .read()
            .bindings
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Every key with at least one provider in this container.
    pub(crate) fn registered_keys(&self) -> Vec<Key> {
        self.inner.registry.read().bindings.keys().cloned().collect()
    }

    /// Number of keys with providers in this container alone.
    pub fn len(&self) -> usize {
        self.inner.registry.read().bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.read().bindings.is_empty()
    }

    // =========================================================================
    // Sealing
    // =========================================================================

    /// Freeze the container: opening a scope seals every container it can
    /// see, and registration against a sealed container is rejected.
    pub(crate) fn seal(&self) {
        if !self.inner.sealed.swap(true, Ordering::AcqRel) {
            #[cfg(feature = "logging")]
            debug!(
                target: "spindle",
                container = %self.name(),
                keys = self.len(),
                "Sealing container"
            );
        }
    }

    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_sealed() {
            Err(DiError::ConcurrentMutation {
                container: self.name().to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Container {}

impl Hash for Container {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.name.hash(state);
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name())
            .field("id", &self.id())
            .field("keys", &self.len())
            .field("included", &self.inner.registry.read().included.len())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
