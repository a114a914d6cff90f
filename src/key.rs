//! Keys identify what can be injected
//!
//! A [`Key`] names one dependency in a container: a concrete (possibly
//! generic) type, a callable, or an opaque token minted at runtime.
//! Primitive scalars, strings, the unit type, and `dyn Any` are
//! blacklisted: they are too ambiguous to act as dependency identities,
//! so [`is_injectable`] rejects them and containers refuse to register
//! providers under them. Use a [`Key::token`] when a primitive value
//! needs a distinct identity (`Key::token("db-url")`).

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;

/// Identifies one dependency in a container.
///
/// Equality and hashing are value-based on the variant and its id; the
/// display name rides along for diagnostics only.
///
/// # Examples
///
/// ```rust
/// use spindle::Key;
///
/// struct Database;
///
/// let by_type = Key::of::<Database>();
/// assert_eq!(by_type, Key::of::<Database>());
///
/// // Tokens are unique by construction, even with the same name.
/// let a = Key::token("cache");
/// let b = Key::token("cache");
/// assert_ne!(a, b);
/// ```
#[derive(Clone)]
pub enum Key {
    /// A concrete type or a generic instantiation, identified by `TypeId`
    Type(TypeId, &'static str),
    /// A free function or method reference, identified by its fn item type
    Callable(TypeId, &'static str),
    /// An opaque token, unique by construction and string-named
    Token(u64, Arc<str>),
}

static TOKEN_IDS: AtomicU64 = AtomicU64::new(1);

impl Key {
    /// Key for the type `T`.
    ///
    /// Generic instantiations get distinct keys: `Key::of::<Repo<User>>()`
    /// and `Key::of::<Repo<Order>>()` are different.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Type(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    /// Key for a function or method reference.
    ///
    /// Every fn item has its own unique type, so two different functions
    /// always get different keys:
    ///
    /// ```rust
    /// use spindle::Key;
    ///
    /// fn make_pool() {}
    /// fn make_cache() {}
    ///
    /// assert_ne!(Key::of_callable(&make_pool), Key::of_callable(&make_cache));
    /// assert_eq!(Key::of_callable(&make_pool), Key::of_callable(&make_pool));
    /// ```
    #[inline]
    pub fn of_callable<F: 'static>(_f: &F) -> Self {
        Self::Callable(TypeId::of::<F>(), std::any::type_name::<F>())
    }

    /// Mint a fresh injection token.
    ///
    /// Tokens compare unequal to every other key, including tokens with
    /// the same name. The name is carried for diagnostics.
    pub fn token(name: impl Into<Arc<str>>) -> Self {
        Self::Token(TOKEN_IDS.fetch_add(1, Ordering::Relaxed), name.into())
    }

    /// Human-readable name for error messages and logs.
    #[inline]
    pub fn display_name(&self) -> &str {
        match self {
            Self::Type(_, name) | Self::Callable(_, name) => name,
            Self::Token(_, name) => name,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Type(a, _), Self::Type(b, _)) => a == b,
            (Self::Callable(a, _), Self::Callable(b, _)) => a == b,
            (Self::Token(a, _), Self::Token(b, _)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Type(id, _) | Self::Callable(id, _) => id.hash(state),
            Self::Token(id, _) => id.hash(state),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(_, name) => write!(f, "Key::Type({name})"),
            Self::Callable(_, name) => write!(f, "Key::Callable({name})"),
            Self::Token(id, name) => write!(f, "Key::Token({id}, {name:?})"),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(id, name) => write!(f, "{name}#{id}"),
            _ => f.write_str(self.display_name()),
        }
    }
}

// Keys that can never identify a dependency. Mirrors the classic DI
// blacklist: scalars, strings, byte-strings, unit, and the open
// universal type.
static BLACKLIST: Lazy<HashSet<TypeId>> = Lazy::new(|| {
    let mut set = HashSet::new();
    set.insert(TypeId::of::<i8>());
    set.insert(TypeId::of::<i16>());
    set.insert(TypeId::of::<i32>());
    set.insert(TypeId::of::<i64>());
    set.insert(TypeId::of::<i128>());
    set.insert(TypeId::of::<isize>());
    set.insert(TypeId::of::<u8>());
    set.insert(TypeId::of::<u16>());
    set.insert(TypeId::of::<u32>());
    set.insert(TypeId::of::<u64>());
    set.insert(TypeId::of::<u128>());
    set.insert(TypeId::of::<usize>());
    set.insert(TypeId::of::<f32>());
    set.insert(TypeId::of::<f64>());
    set.insert(TypeId::of::<bool>());
    set.insert(TypeId::of::<char>());
    set.insert(TypeId::of::<str>());
    set.insert(TypeId::of::<&'static str>());
    set.insert(TypeId::of::<String>());
    set.insert(TypeId::of::<Vec<u8>>());
    set.insert(TypeId::of::<&'static [u8]>());
    set.insert(TypeId::of::<()>());
    set.insert(TypeId::of::<dyn Any>());
    set
});

/// Whether a key may identify a dependency.
///
/// Returns `false` for blacklisted type keys; callables and tokens are
/// always injectable.
#[inline]
pub fn is_injectable(key: &Key) -> bool {
    match key {
        Key::Type(id, _) => !BLACKLIST.contains(id),
        Key::Callable(..) | Key::Token(..) => true,
    }
}

/// A sentinel carrying a key to resolve at call time.
///
/// Markers appear inside a blueprint's partial arguments (or as a
/// parameter default) where a literal value would otherwise go; the
/// factory resolver replaces them with the value the key resolves to.
///
/// # Examples
///
/// ```rust
/// use spindle::{Key, Marker};
///
/// struct Mailer;
///
/// let marker = Marker::new(Key::of::<Mailer>());
/// assert_eq!(marker.dependency(), &Key::of::<Mailer>());
/// assert!(marker.is_injectable());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Marker {
    dependency: Key,
    injectable: bool,
}

impl Marker {
    /// Marker that resolves `dependency` at call time.
    #[inline]
    pub fn new(dependency: Key) -> Self {
        Self {
            dependency,
            injectable: true,
        }
    }

    /// Marker that is never resolved; the slot falls back to its default.
    #[inline]
    pub fn non_injectable(dependency: Key) -> Self {
        Self {
            dependency,
            injectable: false,
        }
    }

    /// The key this marker stands for.
    #[inline]
    pub fn dependency(&self) -> &Key {
        &self.dependency
    }

    /// Whether the marker participates in resolution.
    #[inline]
    pub fn is_injectable(&self) -> bool {
        self.injectable && is_injectable(&self.dependency)
    }
}

// Markers are transparent: where a key is wanted, a marker stands for
// its dependency.
impl From<Marker> for Key {
    fn from(marker: Marker) -> Key {
        marker.dependency
    }
}
