//! Metadata store
//!
//! A side-table of decorator records keyed by target type, member and
//! parameter position. Records are written by explicit registration
//! ([`Class`]) during start-up and read by the injector and the router.
//!
//! # Inheritance
//!
//! [`MetadataStore::get_all_metadata_for_target`] walks the `extends` chain
//! from the most-derived type to the root:
//!
//! ```text
//! own entries (declaration order)
//!   + parent entries not overridden (parent declaration order)
//!   + grand-parent entries not overridden ...
//! ```
//!
//! Constructor decorators survive once per decorator id. Every other entry is
//! overridden only by an entry with the same decorator id, property key and
//! parameter index.

mod class;
mod decorators;

pub use class::{Arguments, Class, Constructor, LifecycleHook};
pub use decorators::{
    ActionMeta, AfterConstruct, Connect, Controller, ControllerOptions, Decorator, Delete, Get,
    Head, Inject, Injectable, Module, ModuleOptions, OnError, Options, Patch, Post, Put,
    RootModule, Trace, verb_decorator,
};

use crate::token::{Token, TypeKey};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Identity of a decorator, e.g. `@Injectable`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecoratorId(&'static str);

impl DecoratorId {
    pub const fn new(id: &'static str) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for DecoratorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Display for DecoratorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DecoratorType {
    Constructor,
    Property,
    Method,
    Parameter,
    Mixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Constructor,
    Named(String),
}

impl PropertyKey {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Constructor => "constructor",
            Self::Named(name) => name,
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decorator arguments, type-erased.
#[derive(Clone, Default)]
pub struct Args {
    value: Option<Arc<dyn Any + Send + Sync>>,
    type_name: &'static str,
}

impl Args {
    pub fn new<A: Any + Send + Sync>(value: A) -> Self {
        Self {
            value: Some(Arc::new(value)),
            type_name: std::any::type_name::<A>(),
        }
    }

    pub fn get<A: Any>(&self) -> Option<&A> {
        self.value.as_ref().and_then(|value| value.downcast_ref::<A>())
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(_) => write!(f, "Args({})", self.type_name),
            None => f.write_str("Args(none)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetadataEntry {
    pub target: TypeKey,
    pub property_key: PropertyKey,
    pub parameter_index: Option<usize>,
    pub decorator_id: DecoratorId,
    pub decorator_type: DecoratorType,
    pub args: Args,
    pub design_type: Option<Token>,
    pub design_param: Vec<Token>,
    pub design_return: Option<Token>,
}

impl MetadataEntry {
    pub fn new(target: TypeKey, decorator_id: DecoratorId, decorator_type: DecoratorType) -> Self {
        Self {
            target,
            property_key: PropertyKey::Constructor,
            parameter_index: None,
            decorator_id,
            decorator_type,
            args: Args::default(),
            design_type: None,
            design_param: Vec::new(),
            design_return: None,
        }
    }

    pub fn property(mut self, key: impl Into<String>) -> Self {
        self.property_key = PropertyKey::named(key);
        self
    }

    pub fn parameter(mut self, index: usize) -> Self {
        self.parameter_index = Some(index);
        self
    }

    pub fn args<A: Any + Send + Sync>(mut self, args: A) -> Self {
        self.args = Args::new(args);
        self
    }

    pub fn design_type(mut self, token: impl Into<Token>) -> Self {
        self.design_type = Some(token.into());
        self
    }

    pub fn design_return(mut self, token: impl Into<Token>) -> Self {
        self.design_return = Some(token.into());
        self
    }

    pub fn is_constructor(&self) -> bool {
        self.decorator_type == DecoratorType::Constructor
    }

    /// Two entries with the same key override each other across the inheritance chain.
    pub(crate) fn same_slot(&self, other: &MetadataEntry) -> bool {
        self.decorator_id == other.decorator_id
            && self.property_key == other.property_key
            && self.parameter_index == other.parameter_index
    }
}

/// Everything registered for one class.
#[derive(Clone)]
pub(crate) struct ClassRecord {
    pub key: TypeKey,
    pub parent: Option<TypeKey>,
    pub constructor: Option<Constructor>,
    pub design_param: Vec<Token>,
    pub entries: Vec<MetadataEntry>,
}

impl ClassRecord {
    pub fn new(key: TypeKey) -> Self {
        Self {
            key,
            parent: None,
            constructor: None,
            design_param: Vec::new(),
            entries: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct MetadataStore {
    classes: DashMap<TypeId, ClassRecord>,
}

static STORE: Lazy<MetadataStore> = Lazy::new(MetadataStore::new);

/// The process-wide store used by injectors and routers.
pub fn store() -> &'static MetadataStore {
    &STORE
}

/// Id of a decorator type.
pub fn get_decorator_id<D: Decorator>() -> DecoratorId {
    D::ID
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry to the target's own metadata.
    pub fn record(&self, target: TypeKey, entry: MetadataEntry) {
        self.classes
            .entry(target.id())
            .or_insert_with(|| ClassRecord::new(target))
            .entries
            .push(entry);
    }

    pub fn set_parent(&self, target: TypeKey, parent: TypeKey) {
        self.classes
            .entry(target.id())
            .or_insert_with(|| ClassRecord::new(target))
            .parent = Some(parent);
    }

    /// Replace whatever was registered for the record's class.
    pub(crate) fn define(&self, record: ClassRecord) {
        tracing::debug!(
            class = %record.key,
            entries = record.entries.len(),
            "Registering class metadata"
        );
        self.classes.insert(record.key.id(), record);
    }

    pub fn contains(&self, target: TypeKey) -> bool {
        self.classes.contains_key(&target.id())
    }

    pub fn parent_of(&self, target: TypeKey) -> Option<TypeKey> {
        self.classes.get(&target.id()).and_then(|record| record.parent)
    }

    pub fn constructor(&self, target: TypeKey) -> Option<Constructor> {
        self.classes
            .get(&target.id())
            .and_then(|record| record.constructor.clone())
    }

    /// Constructor parameter tokens declared by the class itself.
    pub fn design_param(&self, target: TypeKey) -> Vec<Token> {
        self.classes
            .get(&target.id())
            .map(|record| record.design_param.clone())
            .unwrap_or_default()
    }

    /// Own entries only, in declaration order.
    pub fn get_metadata_for_target(&self, target: TypeKey) -> Vec<MetadataEntry> {
        self.classes
            .get(&target.id())
            .map(|record| record.entries.clone())
            .unwrap_or_default()
    }

    /// Own entries followed by the non-overridden entries of every ancestor.
    pub fn get_all_metadata_for_target(&self, target: TypeKey) -> Vec<MetadataEntry> {
        let chain = self.chain(target);
        let Some(most_derived) = chain.first() else {
            return Vec::new();
        };
        let derived_params = most_derived
            .constructor
            .as_ref()
            .map(|_| most_derived.design_param.clone());

        let mut result: Vec<MetadataEntry> = Vec::new();
        let mut constructor_ids = HashSet::new();

        for (depth, record) in chain.iter().enumerate() {
            for entry in &record.entries {
                if entry.is_constructor() {
                    if !constructor_ids.insert(entry.decorator_id) {
                        continue;
                    }
                    let mut entry = entry.clone();
                    if depth > 0 {
                        if let Some(params) = &derived_params {
                            entry.design_param = params.clone();
                        }
                    }
                    result.push(entry);
                } else if !result.iter().any(|kept| kept.same_slot(entry)) {
                    result.push(entry.clone());
                }
            }
        }
        result
    }

    pub fn is_decorator_defined(&self, target: TypeKey, decorator_id: DecoratorId) -> bool {
        self.get_all_metadata_for_target(target)
            .iter()
            .any(|entry| entry.decorator_id == decorator_id)
    }

    /// The surviving constructor decorator entry with the given id.
    pub fn get_class_metadata(
        &self,
        target: TypeKey,
        decorator_id: DecoratorId,
    ) -> Option<MetadataEntry> {
        self.get_all_metadata_for_target(target)
            .into_iter()
            .find(|entry| entry.is_constructor() && entry.decorator_id == decorator_id)
    }

    pub fn get_method_metadata(&self, target: TypeKey, method: &str) -> Vec<MetadataEntry> {
        self.get_all_metadata_for_target(target)
            .into_iter()
            .filter(|entry| {
                entry.decorator_type == DecoratorType::Method && entry.property_key.as_str() == method
            })
            .collect()
    }

    pub fn get_property_metadata(&self, target: TypeKey, property: &str) -> Vec<MetadataEntry> {
        self.get_all_metadata_for_target(target)
            .into_iter()
            .filter(|entry| {
                entry.decorator_type != DecoratorType::Method
                    && entry.parameter_index.is_none()
                    && entry.property_key.as_str() == property
            })
            .collect()
    }

    /// Records from `target` up to the root; stops on unknown or repeated classes.
    fn chain(&self, target: TypeKey) -> Vec<ClassRecord> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(target);
        while let Some(key) = next {
            if !seen.insert(key) {
                tracing::warn!(class = %key, "Inheritance cycle in metadata, stopping walk");
                break;
            }
            let Some(record) = self.classes.get(&key.id()).map(|record| record.clone()) else {
                break;
            };
            next = record.parent;
            chain.push(record);
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Base;
    struct Child;
    struct Leaf;
    struct Logger;
    struct Cache;
    struct Repository;

    fn inject_property(target: TypeKey, name: &str, token: Token) -> MetadataEntry {
        MetadataEntry::new(target, Inject::ID, DecoratorType::Property)
            .property(name)
            .args(token.clone())
            .design_type(token)
    }

    fn injectable(target: TypeKey) -> MetadataEntry {
        MetadataEntry::new(target, Injectable::ID, DecoratorType::Constructor)
    }

    fn describe(entries: &[MetadataEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|entry| {
                format!(
                    "{}:{}:{}",
                    entry.target, entry.decorator_id, entry.property_key
                )
            })
            .collect()
    }

    fn fixture() -> MetadataStore {
        let store = MetadataStore::new();
        let base = TypeKey::of::<Base>();
        let child = TypeKey::of::<Child>();

        store.record(base, injectable(base));
        store.record(base, inject_property(base, "logger", Token::of::<Logger>()));
        store.record(base, inject_property(base, "cache", Token::of::<Cache>()));

        store.set_parent(child, base);
        store.record(child, injectable(child));
        store.record(child, inject_property(child, "repository", Token::of::<Repository>()));
        store.record(child, inject_property(child, "cache", Token::name("cache.v2")));
        store
    }

    #[test]
    fn test_unknown_target_is_empty() {
        let store = MetadataStore::new();
        assert!(store.get_all_metadata_for_target(TypeKey::of::<Base>()).is_empty());
    }

    #[test]
    fn test_own_then_inherited_order() {
        let store = fixture();
        let entries = store.get_all_metadata_for_target(TypeKey::of::<Child>());
        assert_eq!(
            describe(&entries),
            vec![
                "Child:@Injectable:constructor",
                "Child:@Inject:repository",
                "Child:@Inject:cache",
                "Base:@Inject:logger",
            ]
        );
        // the derived cache override wins
        assert_eq!(entries[2].args.get::<Token>(), Some(&Token::name("cache.v2")));
    }

    #[test]
    fn test_single_constructor_entry_per_decorator() {
        let store = fixture();
        let entries = store.get_all_metadata_for_target(TypeKey::of::<Child>());
        let constructors: Vec<_> = entries.iter().filter(|e| e.is_constructor()).collect();
        assert_eq!(constructors.len(), 1);
        assert_eq!(constructors[0].target, TypeKey::of::<Child>());
    }

    #[test]
    fn test_grandparent_entries_follow_parent_entries() {
        let store = fixture();
        let leaf = TypeKey::of::<Leaf>();
        store.set_parent(leaf, TypeKey::of::<Child>());
        store.record(leaf, inject_property(leaf, "logger", Token::name("leaf.logger")));

        let entries = store.get_all_metadata_for_target(leaf);
        assert_eq!(
            describe(&entries),
            vec![
                "Leaf:@Inject:logger",
                "Child:@Injectable:constructor",
                "Child:@Inject:repository",
                "Child:@Inject:cache",
            ]
        );
    }

    #[test]
    fn test_parameter_entries_keyed_by_index() {
        let store = MetadataStore::new();
        let base = TypeKey::of::<Base>();
        let child = TypeKey::of::<Child>();
        store.set_parent(child, base);

        let param = |target: TypeKey, index: usize, token: Token| {
            MetadataEntry::new(target, Inject::ID, DecoratorType::Parameter)
                .parameter(index)
                .args(token)
        };
        store.record(base, param(base, 0, Token::name("a")));
        store.record(base, param(base, 1, Token::name("b")));
        store.record(child, param(child, 1, Token::name("c")));

        let entries = store.get_all_metadata_for_target(child);
        let tokens: Vec<_> = entries
            .iter()
            .map(|e| (e.parameter_index, e.args.get::<Token>().cloned()))
            .collect();
        assert_eq!(
            tokens,
            vec![
                (Some(1), Some(Token::name("c"))),
                (Some(0), Some(Token::name("a"))),
            ]
        );
    }

    #[test]
    fn test_inherited_constructor_takes_derived_design_params() {
        struct Plain;
        let store = MetadataStore::new();
        let base = TypeKey::of::<Base>();
        let plain = TypeKey::of::<Plain>();

        let mut base_record = ClassRecord::new(base);
        base_record.design_param = vec![Token::of::<Logger>()];
        let mut entry = injectable(base);
        entry.design_param = vec![Token::of::<Logger>()];
        base_record.entries.push(entry);
        store.define(base_record);

        let mut plain_record = ClassRecord::new(plain);
        plain_record.parent = Some(base);
        plain_record.design_param = vec![Token::of::<Cache>(), Token::of::<Repository>()];
        plain_record.constructor =
            Some(Arc::new(|_: &Arguments| Ok(crate::di::Instance::new(Plain))));
        store.define(plain_record);

        let entries = store.get_all_metadata_for_target(plain);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target, base);
        assert_eq!(
            entries[0].design_param,
            vec![Token::of::<Cache>(), Token::of::<Repository>()]
        );
    }

    #[test]
    fn test_queries() {
        let store = fixture();
        let child = TypeKey::of::<Child>();
        assert!(store.is_decorator_defined(child, Injectable::ID));
        assert!(!store.is_decorator_defined(child, Controller::ID));
        assert!(store.get_class_metadata(child, Injectable::ID).is_some());
        assert_eq!(store.get_property_metadata(child, "logger").len(), 1);
        assert_eq!(get_decorator_id::<Inject>().as_str(), "@Inject");
        assert_eq!(DecoratorType::Parameter.to_string(), "parameter");
        assert_eq!("mixed".parse::<DecoratorType>().unwrap(), DecoratorType::Mixed);
    }
}
