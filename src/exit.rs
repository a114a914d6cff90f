//! LIFO teardown of scoped resources
//!
//! Resources entered in a context are unwound in reverse order when the
//! context closes. A failing callback never stops the unwind: every
//! callback runs, failures are collected, and the first one is re-raised
//! as [`DiError::TeardownFailure`] with the original in-flight error (if
//! any) preserved as its source.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::{DiError, Result};
use crate::signature::Instance;

/// A teardown callback, sync or async.
///
/// Callbacks receive the error that was propagating when the unwind
/// began (or a failure from a later callback), mirroring nested
/// `with`-style cleanup.
pub enum Teardown {
    Sync(Box<dyn FnOnce(Option<DiError>) -> Result<()> + Send>),
    Async(Box<dyn FnOnce(Option<DiError>) -> BoxFuture<'static, Result<()>> + Send>),
}

impl Teardown {
    #[inline]
    pub fn is_sync(&self) -> bool {
        matches!(self, Self::Sync(_))
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Teardown::Sync"),
            Self::Async(_) => f.write_str("Teardown::Async"),
        }
    }
}

/// A value paired with its teardown.
///
/// Resource factories produce `Managed` values; entering one on a
/// context hands the teardown to the exit stack and yields the inner
/// value.
///
/// # Examples
///
/// ```rust
/// use spindle::Managed;
///
/// struct Conn;
/// impl Conn {
///     fn close(&self) {}
/// }
///
/// let conn = std::sync::Arc::new(Conn);
/// let managed = Managed::from_arc(conn.clone()).cleanup(move || conn.close());
/// ```
pub struct Managed {
    value: Instance,
    teardown: Mutex<Option<Teardown>>,
}

impl Managed {
    /// Manage a value with no teardown.
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self::from_instance(Arc::new(value))
    }

    /// Manage an already-shared value with no teardown.
    pub fn from_arc<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self::from_instance(value)
    }

    /// Manage a type-erased value with no teardown.
    pub fn from_instance(value: Instance) -> Self {
        Self {
            value,
            teardown: Mutex::new(None),
        }
    }

    /// Attach a teardown that sees the propagating error, if any.
    pub fn on_close(
        self,
        f: impl FnOnce(Option<DiError>) -> Result<()> + Send + 'static,
    ) -> Self {
        *self.teardown.lock() = Some(Teardown::Sync(Box::new(f)));
        self
    }

    /// Attach an infallible teardown that ignores the propagating error.
    pub fn cleanup(self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_close(move |_| {
            f();
            Ok(())
        })
    }

    /// Attach an async teardown. Contexts closed synchronously refuse to
    /// run it and report the refusal as a teardown failure.
    pub fn on_close_async<Fut>(
        self,
        f: impl FnOnce(Option<DiError>) -> Fut + Send + 'static,
    ) -> Self
    where
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        *self.teardown.lock() = Some(Teardown::Async(Box::new(move |err| Box::pin(f(err)))));
        self
    }

    /// The managed value.
    #[inline]
    pub fn value(&self) -> Instance {
        self.value.clone()
    }

    /// Detach the teardown, if it has not been taken yet.
    pub(crate) fn take_teardown(&self) -> Option<Teardown> {
        self.teardown.lock().take()
    }
}

impl fmt::Debug for Managed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Managed")
            .field("has_teardown", &self.teardown.lock().is_some())
            .finish()
    }
}

/// LIFO register of teardown callbacks, run when a context closes.
#[derive(Default)]
pub struct ExitStack {
    callbacks: Vec<Teardown>,
}

impl ExitStack {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a teardown callback.
    #[inline]
    pub fn push(&mut self, teardown: Teardown) {
        self.callbacks.push(teardown);
    }

    /// Register a plain callback that ignores the propagating error.
    pub fn callback(&mut self, f: impl FnOnce() + Send + 'static) {
        self.push(Teardown::Sync(Box::new(move |_| {
            f();
            Ok(())
        })));
    }

    /// Enter a managed value: its teardown joins the stack, the inner
    /// value is returned.
    pub fn enter(&mut self, managed: &Managed) -> Instance {
        if let Some(teardown) = managed.take_teardown() {
            self.push(teardown);
        }
        managed.value()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Unwind synchronously. Async callbacks cannot run here; each one is
    /// recorded as a failure and the unwind continues.
    pub fn close(&mut self, error: Option<DiError>) -> Result<()> {
        let mut current = error.clone();
        let mut failures = Vec::new();
        while let Some(teardown) = self.callbacks.pop() {
            match teardown {
                Teardown::Sync(f) => {
                    if let Err(e) = f(current.clone()) {
                        failures.push(e.clone());
                        current = Some(e);
                    }
                }
                Teardown::Async(_) => {
                    let e = DiError::AsyncFromSync {
                        what: "teardown".into(),
                    };
                    failures.push(e.clone());
                    current = Some(e);
                }
            }
        }
        finish_unwind(failures, error)
    }

    /// Unwind, awaiting async callbacks.
    pub async fn aclose(&mut self, error: Option<DiError>) -> Result<()> {
        let mut current = error.clone();
        let mut failures = Vec::new();
        while let Some(teardown) = self.callbacks.pop() {
            let outcome = match teardown {
                Teardown::Sync(f) => f(current.clone()),
                Teardown::Async(f) => f(current.clone()).await,
            };
            if let Err(e) = outcome {
                failures.push(e.clone());
                current = Some(e);
            }
        }
        finish_unwind(failures, error)
    }
}

fn finish_unwind(failures: Vec<DiError>, original: Option<DiError>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(DiError::TeardownFailure {
            failures,
            source: original.map(Box::new),
        })
    }
}

impl fmt::Debug for ExitStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExitStack")
            .field("pending", &self.callbacks.len())
            .finish()
    }
}
