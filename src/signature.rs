//! The call protocol: signatures, arguments, and blueprints
//!
//! Rust has no runtime signature reflection, so every factory carries an
//! explicit descriptor: a [`Blueprint`] bundles the callable with its
//! [`Signature`] (the declared parameters) and any partial [`Arguments`]
//! supplied up front. The factory resolver reads the descriptor to decide
//! which parameters come from the container, which are fixed values, and
//! which fall back to defaults.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::{DiError, Result};
use crate::key::{Key, Marker};

/// Type-erased value produced by providers and passed between callables.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Wrap a value as an [`Instance`].
#[inline]
pub fn instance<T: Send + Sync + 'static>(value: T) -> Instance {
    Arc::new(value)
}

// =============================================================================
// Call-time arguments
// =============================================================================

/// Positional and keyword values passed to a callable at invocation time.
///
/// # Examples
///
/// ```rust
/// use spindle::CallArgs;
///
/// let args = CallArgs::new().with(10u32).with_kw("retries", 3u32);
/// assert_eq!(*args.get::<u32>(0).unwrap(), 10);
/// assert_eq!(*args.kw::<u32>("retries").unwrap(), 3);
/// ```
#[derive(Clone, Default)]
pub struct CallArgs {
    positional: Vec<Instance>,
    keyword: Vec<(String, Instance)>,
}

impl CallArgs {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    #[inline]
    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.positional.push(Arc::new(value));
        self
    }

    /// Append an already-erased positional argument.
    #[inline]
    pub fn with_instance(mut self, value: Instance) -> Self {
        self.positional.push(value);
        self
    }

    /// Append a keyword argument.
    #[inline]
    pub fn with_kw<T: Send + Sync + 'static>(mut self, name: impl Into<String>, value: T) -> Self {
        self.keyword.push((name.into(), Arc::new(value)));
        self
    }

    #[inline]
    pub fn positional(&self) -> &[Instance] {
        &self.positional
    }

    #[inline]
    pub fn keyword(&self) -> &[(String, Instance)] {
        &self.keyword
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// Positional argument `i`, downcast to `T`.
    pub fn get<T: Send + Sync + 'static>(&self, i: usize) -> Result<Arc<T>> {
        let value = self.positional.get(i).ok_or_else(|| DiError::BadArgument {
            what: format!("#{i}"),
            reason: "missing positional argument".into(),
        })?;
        value.clone().downcast::<T>().map_err(|_| DiError::BadArgument {
            what: format!("#{i}"),
            reason: format!("expected {}", std::any::type_name::<T>()),
        })
    }

    /// Keyword argument `name`, downcast to `T`.
    pub fn kw<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let value = self
            .keyword
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| DiError::BadArgument {
                what: name.to_string(),
                reason: "missing keyword argument".into(),
            })?;
        value.clone().downcast::<T>().map_err(|_| DiError::BadArgument {
            what: name.to_string(),
            reason: format!("expected {}", std::any::type_name::<T>()),
        })
    }

    /// Keyword argument `name` if present and of type `T`.
    pub fn kw_opt<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.kw::<T>(name).ok()
    }

    #[inline]
    pub(crate) fn push(&mut self, value: Instance) {
        self.positional.push(value);
    }

    #[inline]
    pub(crate) fn push_kw(&mut self, name: String, value: Instance) {
        self.keyword.push((name, value));
    }

    #[inline]
    pub(crate) fn has_kw(&self, name: &str) -> bool {
        self.keyword.iter().any(|(n, _)| n == name)
    }
}

impl fmt::Debug for CallArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallArgs")
            .field("positional", &self.positional.len())
            .field(
                "keyword",
                &self.keyword.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// =============================================================================
// Partial arguments
// =============================================================================

/// A partial-argument entry: a literal value or a marker to resolve later.
#[derive(Clone)]
pub enum ArgValue {
    /// Fixed value, used as-is
    Literal(Instance),
    /// Resolve this marker's key at call time
    Marker(Marker),
}

impl ArgValue {
    #[inline]
    pub fn is_marker(&self) -> bool {
        matches!(self, Self::Marker(_))
    }
}

impl fmt::Debug for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(_) => f.write_str("Literal(..)"),
            Self::Marker(m) => write!(f, "Marker({})", m.dependency()),
        }
    }
}

/// Partial positional and keyword arguments declared on a blueprint.
///
/// Entries may be literals (fixed values) or [`Marker`]s (resolved from
/// the container at call time, overriding the parameter's annotation).
#[derive(Clone, Default, Debug)]
pub struct Arguments {
    pub(crate) args: Vec<ArgValue>,
    pub(crate) kwargs: Vec<(String, ArgValue)>,
}

impl Arguments {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a literal positional argument.
    pub fn arg<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.args.push(ArgValue::Literal(Arc::new(value)));
        self
    }

    /// Append a marker positional argument.
    pub fn arg_marker(mut self, marker: Marker) -> Self {
        self.args.push(ArgValue::Marker(marker));
        self
    }

    /// Append a literal keyword argument.
    pub fn kwarg<T: Send + Sync + 'static>(mut self, name: impl Into<String>, value: T) -> Self {
        self.kwargs.push((name.into(), ArgValue::Literal(Arc::new(value))));
        self
    }

    /// Append a marker keyword argument.
    pub fn kwarg_marker(mut self, name: impl Into<String>, marker: Marker) -> Self {
        self.kwargs.push((name.into(), ArgValue::Marker(marker)));
        self
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// Overlay caller-supplied values: positional values replace entries
    /// by index (extending past the end), keyword values replace entries
    /// by name. Used by ad-hoc `Context::call`.
    pub(crate) fn overlaid(&self, user: &CallArgs) -> Arguments {
        let mut args = self.args.clone();
        for (i, value) in user.positional().iter().enumerate() {
            let literal = ArgValue::Literal(value.clone());
            if i < args.len() {
                args[i] = literal;
            } else {
                args.push(literal);
            }
        }
        let mut kwargs = self.kwargs.clone();
        for (name, value) in user.keyword() {
            let literal = ArgValue::Literal(value.clone());
            if let Some(slot) = kwargs.iter_mut().find(|(n, _)| n == name) {
                slot.1 = literal;
            } else {
                kwargs.push((name.clone(), literal));
            }
        }
        Arguments { args, kwargs }
    }
}

// =============================================================================
// Signatures
// =============================================================================

/// How a parameter binds at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Bound by position only
    Positional,
    /// Collects remaining positional arguments, one slot per entry
    VarPositional,
    /// Bound by position or by name; passed by name
    PositionalOrKeyword,
    /// Bound by name only
    KeywordOnly,
    /// Collects remaining keyword arguments, one slot per entry
    VarKeyword,
}

impl ParamKind {
    // Declaration-order rank, for signature validation.
    fn rank(self) -> u8 {
        match self {
            Self::Positional => 0,
            Self::PositionalOrKeyword => 1,
            Self::VarPositional => 2,
            Self::KeywordOnly => 3,
            Self::VarKeyword => 4,
        }
    }

    /// Whether values for this kind land in the positional tuple.
    #[inline]
    pub fn is_positional(self) -> bool {
        matches!(self, Self::Positional | Self::VarPositional)
    }
}

/// One declared parameter of a factory callable.
#[derive(Clone, Debug)]
pub struct Param {
    pub(crate) name: &'static str,
    pub(crate) kind: ParamKind,
    pub(crate) annotation: Option<Key>,
    pub(crate) default: Option<ArgValue>,
}

impl Param {
    /// Positional-or-keyword parameter (the common kind).
    #[inline]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::PositionalOrKeyword,
            annotation: None,
            default: None,
        }
    }

    /// Positional-only parameter.
    #[inline]
    pub fn positional(name: &'static str) -> Self {
        Self {
            kind: ParamKind::Positional,
            ..Self::new(name)
        }
    }

    /// Keyword-only parameter.
    #[inline]
    pub fn keyword(name: &'static str) -> Self {
        Self {
            kind: ParamKind::KeywordOnly,
            ..Self::new(name)
        }
    }

    /// Var-positional parameter (collects extra positional arguments).
    #[inline]
    pub fn var_positional(name: &'static str) -> Self {
        Self {
            kind: ParamKind::VarPositional,
            ..Self::new(name)
        }
    }

    /// Var-keyword parameter (collects extra keyword arguments).
    #[inline]
    pub fn var_keyword(name: &'static str) -> Self {
        Self {
            kind: ParamKind::VarKeyword,
            ..Self::new(name)
        }
    }

    /// Annotate with the dependency key to resolve when no value is given.
    #[inline]
    pub fn key(mut self, key: Key) -> Self {
        self.annotation = Some(key);
        self
    }

    /// Annotate with `Key::of::<T>()`.
    #[inline]
    pub fn of<T: ?Sized + 'static>(self) -> Self {
        self.key(Key::of::<T>())
    }

    /// Default value used when the dependency is not provided.
    #[inline]
    pub fn default_value<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.default = Some(ArgValue::Literal(Arc::new(value)));
        self
    }

    /// Marker default: resolve this key when no value is given, taking
    /// precedence over the annotation.
    #[inline]
    pub fn default_marker(mut self, marker: Marker) -> Self {
        self.default = Some(ArgValue::Marker(marker));
        self
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn kind(&self) -> ParamKind {
        self.kind
    }
}

/// The declared parameter list of a factory callable.
#[derive(Clone, Debug, Default)]
pub struct Signature {
    params: Vec<Param>,
}

/// One entry produced by binding partial arguments against a signature.
///
/// Var-kinds expand to one entry per collected argument; their entries
/// carry no annotation and no default.
#[derive(Clone)]
pub(crate) struct BoundParam {
    pub name: String,
    pub kind: ParamKind,
    pub annotation: Option<Key>,
    pub default: Option<ArgValue>,
    pub value: Option<ArgValue>,
}

impl Signature {
    #[inline]
    pub fn new(params: Vec<Param>) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub(crate) fn push(&mut self, param: Param) {
        self.params.push(param);
    }

    fn validate(&self, name: &str) -> Result<()> {
        let mut last_rank = 0u8;
        let mut var_pos = 0;
        let mut var_kw = 0;
        for p in &self.params {
            let rank = p.kind.rank();
            if rank < last_rank {
                return Err(DiError::InvalidBlueprint {
                    name: name.to_string(),
                    reason: format!("parameter '{}' is declared out of order", p.name),
                });
            }
            last_rank = rank;
            match p.kind {
                ParamKind::VarPositional => var_pos += 1,
                ParamKind::VarKeyword => var_kw += 1,
                _ => {}
            }
        }
        if var_pos > 1 || var_kw > 1 {
            return Err(DiError::InvalidBlueprint {
                name: name.to_string(),
                reason: "at most one var-positional and one var-keyword parameter".into(),
            });
        }
        Ok(())
    }

    /// Bind partial arguments to parameters, expanding var-kinds one
    /// entry per collected argument. Every declared parameter yields at
    /// least zero entries; order follows the declaration.
    pub(crate) fn bind_partial(
        &self,
        arguments: &Arguments,
        name: &str,
    ) -> Result<Vec<BoundParam>> {
        self.validate(name)?;

        let mut positional: std::collections::VecDeque<ArgValue> =
            arguments.args.iter().cloned().collect();
        let mut keyword: Vec<(String, ArgValue)> = arguments.kwargs.clone();
        let mut out = Vec::with_capacity(self.params.len());

        let take_kw = |keyword: &mut Vec<(String, ArgValue)>, name: &str| {
            keyword
                .iter()
                .position(|(n, _)| n == name)
                .map(|i| keyword.remove(i).1)
        };

        for param in &self.params {
            match param.kind {
                ParamKind::Positional => {
                    if take_kw(&mut keyword, param.name).is_some() {
                        return Err(DiError::InvalidBlueprint {
                            name: name.to_string(),
                            reason: format!("'{}' is positional-only", param.name),
                        });
                    }
                    out.push(BoundParam {
                        name: param.name.to_string(),
                        kind: param.kind,
                        annotation: param.annotation.clone(),
                        default: param.default.clone(),
                        value: positional.pop_front(),
                    });
                }
                ParamKind::PositionalOrKeyword => {
                    let from_pos = positional.pop_front();
                    let from_kw = take_kw(&mut keyword, param.name);
                    if from_pos.is_some() && from_kw.is_some() {
                        return Err(DiError::InvalidBlueprint {
                            name: name.to_string(),
                            reason: format!("got multiple values for '{}'", param.name),
                        });
                    }
                    out.push(BoundParam {
                        name: param.name.to_string(),
                        kind: param.kind,
                        annotation: param.annotation.clone(),
                        default: param.default.clone(),
                        value: from_pos.or(from_kw),
                    });
                }
                ParamKind::VarPositional => {
                    for value in positional.drain(..) {
                        out.push(BoundParam {
                            name: param.name.to_string(),
                            kind: param.kind,
                            annotation: None,
                            default: None,
                            value: Some(value),
                        });
                    }
                }
                ParamKind::KeywordOnly => {
                    out.push(BoundParam {
                        name: param.name.to_string(),
                        kind: param.kind,
                        annotation: param.annotation.clone(),
                        default: param.default.clone(),
                        value: take_kw(&mut keyword, param.name),
                    });
                }
                ParamKind::VarKeyword => {
                    for (kw_name, value) in keyword.drain(..) {
                        out.push(BoundParam {
                            name: kw_name,
                            kind: param.kind,
                            annotation: None,
                            default: None,
                            value: Some(value),
                        });
                    }
                }
            }
        }

        if !positional.is_empty() {
            return Err(DiError::InvalidBlueprint {
                name: name.to_string(),
                reason: format!("{} extra positional argument(s)", positional.len()),
            });
        }
        if let Some((unexpected, _)) = keyword.first() {
            return Err(DiError::InvalidBlueprint {
                name: name.to_string(),
                reason: format!("unexpected keyword argument '{unexpected}'"),
            });
        }
        Ok(out)
    }
}

// =============================================================================
// Callables and blueprints
// =============================================================================

/// Synchronous type-erased callable.
pub type SyncCallable = Arc<dyn Fn(CallArgs) -> Result<Instance> + Send + Sync>;
/// Asynchronous type-erased callable.
pub type AsyncCallable =
    Arc<dyn Fn(CallArgs) -> BoxFuture<'static, Result<Instance>> + Send + Sync>;

/// A factory callable, sync or async.
#[derive(Clone)]
pub enum Callable {
    Sync(SyncCallable),
    Async(AsyncCallable),
}

impl Callable {
    #[inline]
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }
}

/// A factory callable together with its dependency descriptor.
///
/// The typed helpers cover the common case:
///
/// ```rust
/// use spindle::Blueprint;
/// use std::sync::Arc;
///
/// struct Database;
/// struct UserRepo { db: Arc<Database> }
///
/// let db = Blueprint::of0(|| Database);
/// let repo = Blueprint::of1(|db: Arc<Database>| UserRepo { db });
/// ```
///
/// For signatures with defaults, markers, or var-kinds, build the
/// descriptor explicitly with [`Blueprint::new`] and [`Param`].
#[derive(Clone)]
pub struct Blueprint {
    name: Arc<str>,
    callable: Callable,
    signature: Signature,
    arguments: Arguments,
    provides: Option<Key>,
}

impl Blueprint {
    /// Blueprint over a synchronous callable with an empty signature.
    pub fn new(
        name: impl Into<Arc<str>>,
        callable: impl Fn(CallArgs) -> Result<Instance> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            callable: Callable::Sync(Arc::new(callable)),
            signature: Signature::default(),
            arguments: Arguments::new(),
            provides: None,
        }
    }

    /// Blueprint over an asynchronous callable with an empty signature.
    pub fn new_async(
        name: impl Into<Arc<str>>,
        callable: impl Fn(CallArgs) -> BoxFuture<'static, Result<Instance>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            callable: Callable::Async(Arc::new(callable)),
            signature: Signature::default(),
            arguments: Arguments::new(),
            provides: None,
        }
    }

    /// Declare a parameter. Parameters are matched in declaration order.
    pub fn param(mut self, param: Param) -> Self {
        self.signature.push(param);
        self
    }

    /// Replace the partial arguments.
    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }

    /// Append a literal positional partial argument.
    pub fn arg<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.arguments = self.arguments.arg(value);
        self
    }

    /// Append a marker positional partial argument.
    pub fn arg_marker(mut self, marker: Marker) -> Self {
        self.arguments = self.arguments.arg_marker(marker);
        self
    }

    /// Append a literal keyword partial argument.
    pub fn kwarg<T: Send + Sync + 'static>(mut self, name: impl Into<String>, value: T) -> Self {
        self.arguments = self.arguments.kwarg(name, value);
        self
    }

    /// Append a marker keyword partial argument.
    pub fn kwarg_marker(mut self, name: impl Into<String>, marker: Marker) -> Self {
        self.arguments = self.arguments.kwarg_marker(name, marker);
        self
    }

    /// Set the key this blueprint registers under.
    pub fn provides(mut self, key: Key) -> Self {
        self.provides = Some(key);
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn provided_key(&self) -> Option<&Key> {
        self.provides.as_ref()
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[inline]
    pub(crate) fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    #[inline]
    pub(crate) fn callable(&self) -> &Callable {
        &self.callable
    }

    #[inline]
    pub fn is_async(&self) -> bool {
        self.callable.is_async()
    }

    // ── Typed helpers ──

    /// Zero-dependency factory: `|| T`.
    pub fn of0<T, F>(f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::new(std::any::type_name::<T>(), move |_args| {
            Ok(Arc::new(f()) as Instance)
        })
        .provides(Key::of::<T>())
    }

    /// One-dependency factory: `|a: Arc<A>| T`.
    pub fn of1<A, T, F>(f: F) -> Self
    where
        A: Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: Fn(Arc<A>) -> T + Send + Sync + 'static,
    {
        Self::new(std::any::type_name::<T>(), move |args: CallArgs| {
            let a = args.get::<A>(0)?;
            Ok(Arc::new(f(a)) as Instance)
        })
        .provides(Key::of::<T>())
        .param(Param::positional("a0").of::<A>())
    }

    /// Two-dependency factory: `|a: Arc<A>, b: Arc<B>| T`.
    pub fn of2<A, B, T, F>(f: F) -> Self
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: Fn(Arc<A>, Arc<B>) -> T + Send + Sync + 'static,
    {
        Self::new(std::any::type_name::<T>(), move |args: CallArgs| {
            let a = args.get::<A>(0)?;
            let b = args.get::<B>(1)?;
            Ok(Arc::new(f(a, b)) as Instance)
        })
        .provides(Key::of::<T>())
        .param(Param::positional("a0").of::<A>())
        .param(Param::positional("a1").of::<B>())
    }

    /// Three-dependency factory: `|a: Arc<A>, b: Arc<B>, c: Arc<C>| T`.
    pub fn of3<A, B, C, T, F>(f: F) -> Self
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
        C: Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: Fn(Arc<A>, Arc<B>, Arc<C>) -> T + Send + Sync + 'static,
    {
        Self::new(std::any::type_name::<T>(), move |args: CallArgs| {
            let a = args.get::<A>(0)?;
            let b = args.get::<B>(1)?;
            let c = args.get::<C>(2)?;
            Ok(Arc::new(f(a, b, c)) as Instance)
        })
        .provides(Key::of::<T>())
        .param(Param::positional("a0").of::<A>())
        .param(Param::positional("a1").of::<B>())
        .param(Param::positional("a2").of::<C>())
    }

    /// Zero-dependency async factory: `|| async { T }`.
    pub fn of0_async<T, F, Fut>(f: F) -> Self
    where
        T: Send + Sync + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
    {
        Self::new_async(std::any::type_name::<T>(), move |_args| {
            let fut = f();
            Box::pin(async move { Ok(Arc::new(fut.await) as Instance) })
        })
        .provides(Key::of::<T>())
    }

    /// One-dependency async factory: `|a: Arc<A>| async { T }`.
    pub fn of1_async<A, T, F, Fut>(f: F) -> Self
    where
        A: Send + Sync + 'static,
        T: Send + Sync + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
        F: Fn(Arc<A>) -> Fut + Send + Sync + 'static,
    {
        Self::new_async(std::any::type_name::<T>(), move |args: CallArgs| {
            let fut = args.get::<A>(0).map(&f);
            Box::pin(async move {
                match fut {
                    Ok(fut) => Ok(Arc::new(fut.await) as Instance),
                    Err(e) => Err(e),
                }
            })
        })
        .provides(Key::of::<T>())
        .param(Param::positional("a0").of::<A>())
    }
}

impl fmt::Debug for Blueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blueprint")
            .field("name", &self.name)
            .field("params", &self.signature.params().len())
            .field("is_async", &self.is_async())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_u32(v: &ArgValue) -> u32 {
        match v {
            ArgValue::Literal(v) => *v.clone().downcast::<u32>().unwrap(),
            ArgValue::Marker(_) => panic!("expected literal"),
        }
    }

    #[test]
    fn call_args_roundtrip() {
        let args = CallArgs::new().with(7u8).with_kw("flag", true);
        assert_eq!(*args.get::<u8>(0).unwrap(), 7);
        assert_eq!(*args.kw::<bool>("flag").unwrap(), true);
        assert!(args.get::<u8>(1).is_err());
        assert!(args.kw::<u8>("missing").is_err());
        assert!(args.get::<u16>(0).is_err());
    }

    #[test]
    fn bind_partial_positional_order() {
        let sig = Signature::new(vec![Param::positional("a"), Param::positional("b")]);
        let args = Arguments::new().arg(1u32).arg(2u32);
        let bound = sig.bind_partial(&args, "f").unwrap();
        assert_eq!(bound.len(), 2);
        assert_eq!(as_u32(bound[0].value.as_ref().unwrap()), 1);
        assert_eq!(as_u32(bound[1].value.as_ref().unwrap()), 2);
    }

    #[test]
    fn bind_partial_var_positional_expands() {
        let sig = Signature::new(vec![
            Param::positional("a"),
            Param::var_positional("rest"),
        ]);
        let args = Arguments::new().arg(1u32).arg(2u32).arg(3u32);
        let bound = sig.bind_partial(&args, "f").unwrap();
        assert_eq!(bound.len(), 3);
        assert_eq!(bound[1].name, "rest");
        assert_eq!(bound[2].name, "rest");
        assert_eq!(as_u32(bound[2].value.as_ref().unwrap()), 3);
        assert!(bound[1].annotation.is_none());
    }

    #[test]
    fn bind_partial_var_keyword_expands() {
        let sig = Signature::new(vec![Param::keyword("a"), Param::var_keyword("extra")]);
        let args = Arguments::new().kwarg("a", 1u32).kwarg("x", 2u32).kwarg("y", 3u32);
        let bound = sig.bind_partial(&args, "f").unwrap();
        assert_eq!(bound.len(), 3);
        assert_eq!(bound[0].name, "a");
        assert_eq!(bound[1].name, "x");
        assert_eq!(bound[2].name, "y");
    }

    #[test]
    fn bind_partial_rejects_extras() {
        let sig = Signature::new(vec![Param::positional("a")]);
        let too_many = Arguments::new().arg(1u32).arg(2u32);
        assert!(matches!(
            sig.bind_partial(&too_many, "f"),
            Err(DiError::InvalidBlueprint { .. })
        ));

        let unknown_kw = Arguments::new().kwarg("nope", 1u32);
        assert!(matches!(
            sig.bind_partial(&unknown_kw, "f"),
            Err(DiError::InvalidBlueprint { .. })
        ));
    }

    #[test]
    fn bind_partial_rejects_duplicate_binding() {
        let sig = Signature::new(vec![Param::new("a")]);
        let args = Arguments::new().arg(1u32).kwarg("a", 2u32);
        assert!(matches!(
            sig.bind_partial(&args, "f"),
            Err(DiError::InvalidBlueprint { .. })
        ));
    }

    #[test]
    fn bind_partial_rejects_out_of_order_params() {
        let sig = Signature::new(vec![Param::keyword("k"), Param::positional("p")]);
        assert!(matches!(
            sig.bind_partial(&Arguments::new(), "f"),
            Err(DiError::InvalidBlueprint { .. })
        ));
    }

    #[test]
    fn overlaid_arguments_prefer_user_values() {
        let base = Arguments::new().arg(1u32).kwarg("k", 2u32);
        let user = CallArgs::new().with(9u32).with_kw("k", 8u32).with_kw("extra", 7u32);
        let merged = base.overlaid(&user);
        assert_eq!(as_u32(&merged.args[0]), 9);
        assert_eq!(merged.kwargs.len(), 2);
        assert_eq!(as_u32(&merged.kwargs[0].1), 8);
        assert_eq!(merged.kwargs[1].0, "extra");
    }

    #[test]
    fn typed_blueprints_declare_dependencies() {
        struct Db;
        struct Repo;

        let bp = Blueprint::of1(|_db: Arc<Db>| Repo);
        assert_eq!(bp.provided_key(), Some(&Key::of::<Repo>()));
        assert_eq!(bp.signature().params().len(), 1);
        assert_eq!(
            bp.signature().params()[0].annotation.as_ref(),
            Some(&Key::of::<Db>())
        );
        assert!(!bp.is_async());
    }
}
