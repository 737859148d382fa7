//! Provider tokens
//!
//! A [`Token`] is the identity under which a provider is registered and an
//! instance is looked up: a Rust type, a string, or a unique [`Symbol`].

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a Rust type, comparable by `TypeId`.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: Any + ?Sized>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name.
    pub fn type_name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path, generics kept.
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        match base.rfind("::") {
            Some(pos) => &self.name[pos + 2..],
            None => self.name,
        }
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

static NEXT_SYMBOL: AtomicU64 = AtomicU64::new(1);

/// A unique token; two symbols never compare equal, whatever their description.
#[derive(Clone)]
pub struct Symbol {
    id: u64,
    description: Arc<str>,
}

impl Symbol {
    pub fn new(description: impl Into<Arc<str>>) -> Self {
        Self {
            id: NEXT_SYMBOL.fetch_add(1, Ordering::Relaxed),
            description: description.into(),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.description)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.description)
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Token {
    Type(TypeKey),
    Name(Arc<str>),
    Symbol(Symbol),
}

impl Token {
    pub fn of<T: Any + ?Sized>() -> Self {
        Self::Type(TypeKey::of::<T>())
    }

    pub fn name(name: impl Into<Arc<str>>) -> Self {
        Self::Name(name.into())
    }

    pub fn type_key(&self) -> Option<TypeKey> {
        match self {
            Self::Type(key) => Some(*key),
            _ => None,
        }
    }
}

impl From<TypeKey> for Token {
    fn from(key: TypeKey) -> Self {
        Self::Type(key)
    }
}

impl From<Symbol> for Token {
    fn from(symbol: Symbol) -> Self {
        Self::Symbol(symbol)
    }
}

impl From<&str> for Token {
    fn from(name: &str) -> Self {
        Self::Name(name.into())
    }
}

impl From<String> for Token {
    fn from(name: String) -> Self {
        Self::Name(name.into())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(key) => write!(f, "{:?}", key),
            Self::Name(name) => write!(f, "{:?}", name),
            Self::Symbol(symbol) => write!(f, "{:?}", symbol),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(key) => write!(f, "{}", key),
            Self::Name(name) => f.write_str(name),
            Self::Symbol(symbol) => write!(f, "{}", symbol),
        }
    }
}
