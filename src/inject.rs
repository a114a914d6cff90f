//! The injection decorator
//!
//! [`inject`] wraps a blueprint so its missing arguments are fetched from
//! the thread's current context at call time. The wrapper registers the
//! blueprint as a callable factory under a freshly minted injection
//! token, keeps the original blueprint reachable, and exposes the token
//! so the provider graph can refer back to it.

use std::fmt;
use std::sync::Arc;

use crate::container::Container;
use crate::context::Context;
use crate::error::{DiError, Result};
use crate::key::Key;
use crate::resolver::InjectedFn;
use crate::signature::{Blueprint, CallArgs, Instance};

/// Wrap `blueprint` so calls resolve missing arguments from the current
/// context.
///
/// The blueprint is registered with `container` as a callable factory
/// under a unique token named after it; the returned [`Injected`] holds
/// that token.
///
/// # Examples
///
/// ```rust
/// use spindle::{inject, Blueprint, CallArgs, Container, Scope};
/// use std::sync::Arc;
///
/// struct Greeter { prefix: &'static str }
///
/// let container = Container::new("app");
/// container.value(Greeter { prefix: "hello" }).unwrap();
///
/// let greet = inject(
///     &container,
///     Blueprint::of1(|g: Arc<Greeter>| format!("{}!", g.prefix)),
/// )
/// .unwrap();
///
/// let scope = Scope::new(&container).unwrap();
/// let ctx = scope.enter();
/// let out = greet.call(CallArgs::new()).unwrap();
/// assert_eq!(*out.downcast::<String>().unwrap(), "hello!");
/// # drop(ctx);
/// ```
pub fn inject(container: &Container, blueprint: Blueprint) -> Result<Injected> {
    let token = Key::token(format!("inject:{}", blueprint.name()));
    container.callable(blueprint.clone().provides(token.clone()))?;
    Ok(Injected {
        inner: blueprint,
        token,
    })
}

/// A callable whose missing arguments are injected from the current
/// context.
pub struct Injected {
    inner: Blueprint,
    token: Key,
}

impl Injected {
    /// The injection token this wrapper registered under.
    #[inline]
    pub fn token(&self) -> &Key {
        &self.token
    }

    /// The wrapped blueprint, unchanged.
    #[inline]
    pub fn inner(&self) -> &Blueprint {
        &self.inner
    }

    /// Invoke under the current context. Supplied arguments win over
    /// injected ones; with no active context this fails with
    /// [`DiError::NoContext`].
    pub fn call(&self, args: CallArgs) -> Result<Instance> {
        let ctx = Context::current()?;
        self.resolved(&ctx)?.call(args)
    }

    /// Async variant of [`Injected::call`].
    pub async fn call_async(&self, args: CallArgs) -> Result<Instance> {
        let ctx = Context::current()?;
        self.resolved(&ctx)?.call_async(args).await
    }

    /// Invoke under an explicit context instead of the thread-local one.
    pub fn call_in(&self, ctx: &Context, args: CallArgs) -> Result<Instance> {
        self.resolved(ctx)?.call(args)
    }

    fn resolved(&self, ctx: &Context) -> Result<Arc<InjectedFn>> {
        ctx.make(&self.token)?
            .downcast::<InjectedFn>()
            .map_err(|_| DiError::type_mismatch::<InjectedFn>(self.token.clone()))
    }
}

impl fmt::Debug for Injected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injected")
            .field("token", &self.token)
            .field("blueprint", &self.inner.name())
            .finish()
    }
}
