//! # Spindle - Composable Dependency Injection for Rust
//!
//! A container runtime that registers *providers* for abstract *keys* and
//! resolves keys into values on demand, recursively supplying each
//! provider's declared dependencies with correct sharing, caching, and
//! lifetime semantics.
//!
//! ## Features
//!
//! - 🧩 **Composable containers** - include other containers and resolve
//!   across the whole graph in a deterministic order
//! - 🏷️ **Rich keys** - types, generic instantiations, function
//!   references, and unique named tokens
//! - 🏭 **Six provider kinds** - alias, value, factory, singleton,
//!   resource, and callable factory
//! - 📦 **Scoped lifetimes** - per-context singletons and LIFO resource
//!   teardown via an exit stack
//! - ⚡ **Async resolution** - async factories and concurrent dependency
//!   gathering, runtime-agnostic
//! - 🧵 **Parallel or cooperative scopes** - double-checked singleton
//!   production under the scope lock, or lock-free single-task mode
//! - 📊 **Observable** - optional `tracing` integration with JSON or
//!   pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use spindle::{Blueprint, Container, Scope};
//! use std::sync::Arc;
//!
//! struct Database { url: String }
//! struct UserService { db: Arc<Database> }
//!
//! let container = Container::new("app");
//! container.singleton(Blueprint::of0(|| Database {
//!     url: "postgres://localhost".into(),
//! })).unwrap();
//! container.factory(Blueprint::of1(|db: Arc<Database>| UserService { db })).unwrap();
//!
//! let scope = Scope::new(&container).unwrap();
//! let ctx = scope.enter();
//!
//! let users = ctx.get::<UserService>().unwrap();
//! assert_eq!(users.db.url, "postgres://localhost");
//!
//! // Singletons are shared; factories are fresh per resolve.
//! let again = ctx.get::<UserService>().unwrap();
//! assert!(Arc::ptr_eq(&users.db, &again.db));
//! ```
//!
//! ## Containers compose
//!
//! ```rust
//! use spindle::{Blueprint, Container, Scope};
//!
//! struct Config { debug: bool }
//!
//! let base = Container::new("base");
//! base.value(Config { debug: true }).unwrap();
//!
//! let app = Container::new("app");
//! app.include([&base]).unwrap();
//!
//! let scope = Scope::new(&app).unwrap();
//! let ctx = scope.enter();
//! assert!(ctx.get::<Config>().unwrap().debug);
//! ```
//!
//! ## Resources tear down in reverse
//!
//! ```rust
//! use spindle::{Blueprint, Container, Key, Managed, Scope};
//!
//! struct Conn;
//!
//! let container = Container::new("app");
//! container.resource(
//!     Blueprint::of0(|| Managed::new(Conn).cleanup(|| { /* close */ }))
//!         .provides(Key::of::<Conn>()),
//! ).unwrap();
//!
//! let scope = Scope::new(&container).unwrap();
//! let ctx = scope.enter();
//! ctx.get::<Conn>().unwrap();
//! ctx.close().unwrap(); // teardown runs here, LIFO
//! ```

mod container;
mod context;
mod error;
mod exit;
mod inject;
mod key;
#[cfg(feature = "logging")]
pub mod logging;
mod provider;
mod resolver;
mod scope;
mod signature;

pub use container::Container;
pub use context::{Context, ContextGuard};
pub use error::{DiError, Result};
pub use exit::{ExitStack, Managed, Teardown};
pub use inject::{Injected, inject};
pub use key::{Key, Marker, is_injectable};
pub use provider::{AsyncResolver, Binding, Provider, ProviderKind, SyncResolver};
pub use resolver::InjectedFn;
pub use scope::{Concurrency, Scope};
pub use signature::{
    ArgValue, Arguments, AsyncCallable, Blueprint, CallArgs, Callable, Instance, Param, ParamKind,
    Signature, SyncCallable, instance,
};

// Re-export tracing macros for convenience when logging is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Blueprint, CallArgs, Concurrency, Container, Context, DiError, Key, Managed, Marker,
        Param, Provider, Result, Scope, inject,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    // ── Chain resolution ──

    #[test]
    fn factory_chain_builds_once_per_call() {
        static FOO_BUILDS: AtomicU32 = AtomicU32::new(0);

        struct Foo(u32);
        struct Bar {
            foo: Arc<Foo>,
        }
        struct Baz {
            bar: Arc<Bar>,
        }

        let c = Container::new("chain");
        c.factory(Blueprint::of0(|| {
            Foo(FOO_BUILDS.fetch_add(1, Ordering::SeqCst))
        }))
        .unwrap();
        c.factory(Blueprint::of1(|foo: Arc<Foo>| Bar { foo })).unwrap();
        c.factory(Blueprint::of1(|bar: Arc<Bar>| Baz { bar })).unwrap();

        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();

        let first = ctx.get::<Baz>().unwrap();
        assert_eq!(FOO_BUILDS.load(Ordering::SeqCst), 1);

        let second = ctx.get::<Baz>().unwrap();
        assert_eq!(FOO_BUILDS.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&first.bar.foo, &second.bar.foo));
    }

    // ── Singleton sharing ──

    #[test]
    fn singletons_are_shared_across_factory_values() {
        static FOO_BUILDS: AtomicU32 = AtomicU32::new(0);

        struct Foo;
        struct Bar {
            _foo: Arc<Foo>,
        }
        struct Baz {
            bar: Arc<Bar>,
        }

        let c = Container::new("sharing");
        c.factory(Blueprint::of0(|| {
            FOO_BUILDS.fetch_add(1, Ordering::SeqCst);
            Foo
        }))
        .unwrap();
        c.singleton(Blueprint::of1(|foo: Arc<Foo>| Bar { _foo: foo }))
            .unwrap();
        c.factory(Blueprint::of1(|bar: Arc<Bar>| Baz { bar })).unwrap();

        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();

        let one = ctx.get::<Baz>().unwrap();
        let two = ctx.get::<Baz>().unwrap();

        assert!(!Arc::ptr_eq(&one, &two));
        assert!(Arc::ptr_eq(&one.bar, &two.bar));
        assert_eq!(FOO_BUILDS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn singleton_factory_runs_exactly_once() {
        static BUILDS: AtomicU32 = AtomicU32::new(0);
        struct Shared;

        let c = Container::new("once");
        c.singleton(Blueprint::of0(|| {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            Shared
        }))
        .unwrap();

        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();
        let values: Vec<_> = (0..5).map(|_| ctx.get::<Shared>().unwrap()).collect();
        for pair in values.windows(2) {
            assert!(Arc::ptr_eq(&pair[0], &pair[1]));
        }
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parallel_singleton_is_at_most_once() {
        static BUILDS: AtomicU32 = AtomicU32::new(0);
        struct Shared;

        let c = Container::new("parallel-once");
        c.singleton(Blueprint::of0(|| {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            Shared
        }))
        .unwrap();

        let scope = Scope::new(&c).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scope = scope.clone();
                std::thread::spawn(move || {
                    let ctx = scope.enter();
                    let v = ctx.get::<Shared>().unwrap();
                    Arc::as_ptr(&v) as usize
                })
            })
            .collect();
        let addrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }

    // ── Aliases ──

    #[test]
    fn alias_to_singleton_is_identical() {
        struct StdoutWriter;

        let writer = Key::token("writer");
        let c = Container::new("alias-singleton");
        c.singleton(Blueprint::of0(|| StdoutWriter)).unwrap();
        c.alias(writer.clone(), Key::of::<StdoutWriter>()).unwrap();

        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();

        let via_alias = ctx.make(&writer).unwrap();
        let direct = ctx.make(&Key::of::<StdoutWriter>()).unwrap();
        assert!(Arc::ptr_eq(&via_alias, &direct));
    }

    #[test]
    fn alias_to_factory_is_equal_but_distinct() {
        struct StdoutWriter(u32);
        static SEQ: AtomicU32 = AtomicU32::new(0);

        let writer = Key::token("writer");
        let c = Container::new("alias-factory");
        c.factory(Blueprint::of0(|| {
            StdoutWriter(SEQ.fetch_add(1, Ordering::SeqCst))
        }))
        .unwrap();
        c.alias(writer.clone(), Key::of::<StdoutWriter>()).unwrap();

        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();

        let via_alias = ctx.make(&writer).unwrap();
        let direct = ctx.make(&Key::of::<StdoutWriter>()).unwrap();
        assert!(!Arc::ptr_eq(&via_alias, &direct));
        assert!(via_alias.downcast::<StdoutWriter>().is_ok());
    }

    // ── Resources ──

    #[test]
    fn resources_tear_down_lifo_and_collect_failures() {
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        struct ResA;
        struct ResB;
        struct ResC;

        let c = Container::new("resources");
        {
            let order = Arc::clone(&order);
            c.resource(
                Blueprint::of0(move || {
                    let order = Arc::clone(&order);
                    Managed::new(ResA).cleanup(move || order.lock().push("a"))
                })
                .provides(Key::of::<ResA>()),
            )
            .unwrap();
        }
        c.resource(
            Blueprint::of0(|| {
                Managed::new(ResB).on_close(|_| Err(DiError::NoContext))
            })
            .provides(Key::of::<ResB>()),
        )
        .unwrap();
        {
            let order = Arc::clone(&order);
            c.resource(
                Blueprint::of0(move || {
                    let order = Arc::clone(&order);
                    Managed::new(ResC).cleanup(move || order.lock().push("c"))
                })
                .provides(Key::of::<ResC>()),
            )
            .unwrap();
        }

        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();
        // Enter in a, b, c order.
        ctx.get::<ResA>().unwrap();
        ctx.get::<ResB>().unwrap();
        ctx.get::<ResC>().unwrap();

        let err = ctx.close().unwrap_err();
        // c tore down first, then b failed, then a still ran.
        assert_eq!(*order.lock(), vec!["c", "a"]);
        match err {
            DiError::TeardownFailure { failures, .. } => assert_eq!(failures.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn resource_factory_runs_once_per_scope() {
        static BUILDS: AtomicU32 = AtomicU32::new(0);
        static CLOSES: AtomicU32 = AtomicU32::new(0);
        struct Conn;

        let c = Container::new("resource-once");
        c.resource(
            Blueprint::of0(|| {
                BUILDS.fetch_add(1, Ordering::SeqCst);
                Managed::new(Conn).cleanup(|| {
                    CLOSES.fetch_add(1, Ordering::SeqCst);
                })
            })
            .provides(Key::of::<Conn>()),
        )
        .unwrap();

        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();
        ctx.get::<Conn>().unwrap();
        ctx.get::<Conn>().unwrap();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
        assert_eq!(CLOSES.load(Ordering::SeqCst), 0);

        ctx.close().unwrap();
        assert_eq!(CLOSES.load(Ordering::SeqCst), 1);
    }

    // ── Callable factories ──

    fn join_args(args: &CallArgs) -> String {
        args.positional()
            .iter()
            .map(|v| v.clone().downcast::<&'static str>().map(|s| *s).unwrap_or("?"))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn tagged_blueprint() -> Blueprint {
        Blueprint::new("joiner", |args: CallArgs| {
            let mut out = join_args(&args);
            if let Some(mode) = args.kw_opt::<&'static str>("mode") {
                out.push_str(&format!(";mode={}", *mode));
            }
            Ok(Arc::new(out) as Instance)
        })
        .param(Param::positional("injected").key(Key::token("ignored")))
        .param(Param::keyword("mode"))
    }

    fn callable_container(partial: bool) -> (Container, Key) {
        let tag = Key::token("tag");
        let c = Container::new(if partial { "partial" } else { "prefix" });
        c.value_at(tag.clone(), Arc::new("inj") as Instance).unwrap();

        let bp = tagged_blueprint()
            .arg_marker(Marker::new(tag.clone()))
            .kwarg("mode", "injected");
        let fn_key = Key::token("joiner");
        let bp = bp.provides(fn_key.clone());
        if partial {
            c.callable_partial(bp).unwrap();
        } else {
            c.callable(bp).unwrap();
        }
        (c, fn_key)
    }

    #[test]
    fn callable_prefix_mode_puts_injected_first() {
        let (c, fn_key) = callable_container(false);
        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();

        let f = ctx
            .make(&fn_key)
            .unwrap()
            .downcast::<InjectedFn>()
            .unwrap();
        let out = f
            .call(CallArgs::new().with("a").with("b"))
            .unwrap()
            .downcast::<String>()
            .unwrap();
        assert_eq!(*out, "inj,a,b;mode=injected");
    }

    #[test]
    fn callable_partial_mode_fills_the_tail() {
        let (c, fn_key) = callable_container(true);
        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();

        let f = ctx
            .make(&fn_key)
            .unwrap()
            .downcast::<InjectedFn>()
            .unwrap();
        let out = f
            .call(CallArgs::new().with("a").with("b"))
            .unwrap()
            .downcast::<String>()
            .unwrap();
        assert_eq!(*out, "a,b,inj;mode=injected");
    }

    #[test]
    fn caller_kwargs_override_injected_kwargs() {
        let (c, fn_key) = callable_container(false);
        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();

        let f = ctx
            .make(&fn_key)
            .unwrap()
            .downcast::<InjectedFn>()
            .unwrap();
        let out = f
            .call(CallArgs::new().with_kw("mode", "user"))
            .unwrap()
            .downcast::<String>()
            .unwrap();
        assert_eq!(*out, "inj;mode=user");
    }

    // ── Markers in partial arguments ──

    #[test]
    fn markers_override_annotations() {
        struct Real(u32);

        let special = Key::token("special");
        let c = Container::new("markers");
        c.value(Real(1)).unwrap();
        c.value_at(special.clone(), Arc::new(Real(2)) as Instance)
            .unwrap();

        struct Holder(u32);
        let bp = Blueprint::new("holder", |args: CallArgs| {
            Ok(Arc::new(Holder(args.get::<Real>(0)?.0)) as Instance)
        })
        .provides(Key::of::<Holder>())
        .param(Param::positional("real").of::<Real>())
        .arg_marker(Marker::new(special));
        c.factory(bp).unwrap();

        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();
        // The marker redirects the slot away from the annotation.
        assert_eq!(ctx.get::<Holder>().unwrap().0, 2);
    }

    #[test]
    fn unprovided_dependency_falls_back_to_default() {
        struct Missing;
        struct Holder(u32);

        let c = Container::new("defaults");
        let bp = Blueprint::new("holder", |args: CallArgs| {
            Ok(Arc::new(Holder(*args.get::<u32>(0)?)) as Instance)
        })
        .provides(Key::of::<Holder>())
        .param(Param::positional("n").of::<Missing>().default_value(9u32));
        c.factory(bp).unwrap();

        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();
        assert_eq!(ctx.get::<Holder>().unwrap().0, 9);
    }

    // ── Async resolution ──

    #[tokio::test]
    async fn async_dependencies_gather_in_order() {
        struct Left(u32);
        struct Right(u32);
        struct Sum(u32);

        let c = Container::new("async-gather");
        c.factory(Blueprint::of0_async(|| async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Left(40)
        }))
        .unwrap();
        c.factory(Blueprint::of0_async(|| async { Right(2) })).unwrap();
        c.factory(Blueprint::of2(|l: Arc<Left>, r: Arc<Right>| Sum(l.0 + r.0)))
            .unwrap();

        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();
        let sum = ctx.get_async::<Sum>().await.unwrap();
        assert_eq!(sum.0, 42);
    }

    #[tokio::test]
    async fn async_singleton_produces_once_under_contention() {
        static BUILDS: AtomicU32 = AtomicU32::new(0);
        struct Shared;

        let c = Container::new("async-once");
        c.singleton(Blueprint::of0_async(|| async {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Shared
        }))
        .unwrap();

        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();
        let (a, b) = tokio::join!(ctx.get_async::<Shared>(), ctx.get_async::<Shared>());
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_resource_tears_down_via_aclose() {
        static CLOSES: AtomicU32 = AtomicU32::new(0);
        struct Conn;

        let c = Container::new("async-resource");
        c.resource(
            Blueprint::of0_async(|| async {
                Managed::new(Conn).on_close_async(|_| async {
                    CLOSES.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .provides(Key::of::<Conn>()),
        )
        .unwrap();

        let scope = Scope::new(&c).unwrap();
        let ctx = scope.enter();
        ctx.get_async::<Conn>().await.unwrap();
        ctx.aclose().await.unwrap();
        assert_eq!(CLOSES.load(Ordering::SeqCst), 1);
    }
}
