use crate::error::{Result, WeaveError};
use crate::token::Token;
use indexmap::IndexMap;
use std::fmt::Debug;

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    mutable: bool,
}

/// Insertion-ordered token store.
///
/// Keys are immutable by default: the first `set` fixes the value and any
/// later `set` on the same key fails with [`WeaveError::DuplicateProvider`].
#[derive(Debug, Clone)]
pub struct ProviderList<V> {
    slots: IndexMap<Token, Slot<V>>,
}

impl<V> Default for ProviderList<V> {
    fn default() -> Self {
        Self {
            slots: IndexMap::new(),
        }
    }
}

impl<V: Debug> ProviderList<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, token: Token, value: V) -> Result<()> {
        self.insert(token, value, false)
    }

    /// Set a key that may be set again later.
    pub fn set_mutable(&mut self, token: Token, value: V) -> Result<()> {
        self.insert(token, value, true)
    }

    fn insert(&mut self, token: Token, value: V, mutable: bool) -> Result<()> {
        match self.slots.get_mut(&token) {
            Some(slot) if slot.mutable => {
                slot.value = value;
                Ok(())
            }
            Some(_) => Err(WeaveError::DuplicateProvider {
                token: token.to_string(),
                value: format!("{:?}", value),
            }),
            None => {
                self.slots.insert(token, Slot { value, mutable });
                Ok(())
            }
        }
    }

    pub fn get(&self, token: &Token) -> Option<&V> {
        self.slots.get(token).map(|slot| &slot.value)
    }

    pub fn has(&self, token: &Token) -> bool {
        self.slots.contains_key(token)
    }

    pub fn is_mutable(&self, token: &Token) -> bool {
        self.slots.get(token).is_some_and(|slot| slot.mutable)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Token> {
        self.slots.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.slots.values().map(|slot| &slot.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Token, &V)> {
        self.slots.iter().map(|(token, slot)| (token, &slot.value))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
