//! Dependency graph construction
//!
//! Turns a provider registry into a list of nodes ordered so that every node
//! comes after the nodes it depends on. Cycles are found with an explicit
//! path of tokens currently being visited.

use crate::di::{Factory, Injector, Provider, ProviderKind, ProviderList};
use crate::error::{Result, WeaveError};
use crate::metadata::{
    Controller, Decorator, Inject, Injectable, MetadataStore, Module, PropertyKey, RootModule,
};
use crate::token::{Token, TypeKey};
use std::collections::HashSet;

/// Tokens a provider needs before it can be built.
#[derive(Debug, Clone, Default)]
pub(crate) struct Requirements {
    /// Constructor parameters, in order.
    pub params: Vec<Token>,
    /// `@Inject` properties, in metadata order.
    pub properties: Vec<(String, Token)>,
    /// Tokens the scoped providers of a factory expect from outside.
    pub external: Vec<Token>,
}

impl Requirements {
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.params
            .iter()
            .chain(self.properties.iter().map(|(_, token)| token))
            .chain(self.external.iter())
    }
}

pub(crate) fn requirements(store: &MetadataStore, provider: &Provider) -> Result<Requirements> {
    match &provider.kind {
        ProviderKind::UseValue(_) => Ok(Requirements::default()),
        ProviderKind::UseClass(key) => class_requirements(store, *key),
        ProviderKind::UseFactory(_) => {
            let local: HashSet<&Token> = provider.providers.iter().map(Provider::token).collect();
            let mut external: Vec<Token> = Vec::new();
            for scoped in &provider.providers {
                for token in requirements(store, scoped)?.tokens() {
                    if !local.contains(token)
                        && !is_injector_token(token)
                        && !external.contains(token)
                    {
                        external.push(token.clone());
                    }
                }
            }
            Ok(Requirements {
                external,
                ..Requirements::default()
            })
        }
    }
}

fn class_requirements(store: &MetadataStore, key: TypeKey) -> Result<Requirements> {
    let entries = store.get_all_metadata_for_target(key);
    let constructible = [Injectable::ID, Controller::ID, Module::ID, RootModule::ID];
    if !entries
        .iter()
        .any(|entry| entry.is_constructor() && constructible.contains(&entry.decorator_id))
    {
        return Err(WeaveError::configuration(format!(
            "{} is not injectable, register it with Class::<{}>::new().injectable()",
            key, key
        )));
    }
    if store.constructor(key).is_none() {
        return Err(WeaveError::ConstructorMissing {
            class: key.to_string(),
        });
    }

    let mut params = store.design_param(key);
    let mut overridden = HashSet::new();
    let mut properties: Vec<(String, Token)> = Vec::new();

    for entry in entries.iter().filter(|entry| entry.decorator_id == Inject::ID) {
        let token = entry
            .args
            .get::<Token>()
            .cloned()
            .or_else(|| entry.design_type.clone())
            .ok_or_else(|| {
                WeaveError::configuration(format!(
                    "@Inject on {}.{} has no token",
                    key, entry.property_key
                ))
            })?;

        match (entry.parameter_index, &entry.property_key) {
            (Some(index), PropertyKey::Constructor) => {
                // most-derived entries come first
                if !overridden.insert(index) {
                    continue;
                }
                let slot = params.get_mut(index).ok_or_else(|| {
                    WeaveError::configuration(format!(
                        "@Inject on parameter #{} of {}, which declares {} parameters",
                        index,
                        key,
                        store.design_param(key).len()
                    ))
                })?;
                *slot = token;
            }
            (None, PropertyKey::Named(name)) => {
                if !properties.iter().any(|(kept, _)| kept == name) {
                    properties.push((name.clone(), token));
                }
            }
            _ => {}
        }
    }

    Ok(Requirements {
        params,
        properties,
        external: Vec::new(),
    })
}

pub(crate) fn is_injector_token(token: &Token) -> bool {
    *token == Token::of::<Injector>()
}

#[derive(Debug, Clone)]
pub(crate) struct DependencyNode {
    pub token: Token,
    pub provider: Provider,
    pub requirements: Requirements,
}

/// Providers of one injector, dependencies first.
#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    nodes: Vec<DependencyNode>,
}

impl DependencyGraph {
    pub fn build(
        registry: &ProviderList<Provider>,
        parent: Option<&Injector>,
        store: &MetadataStore,
    ) -> Result<Self> {
        let mut builder = GraphBuilder {
            registry,
            parent,
            store,
            nodes: Vec::with_capacity(registry.len()),
            placed: HashSet::new(),
            path: Vec::new(),
        };
        for token in registry.keys() {
            builder.visit(token)?;
        }
        Ok(Self {
            nodes: builder.nodes,
        })
    }

    pub fn nodes(&self) -> &[DependencyNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

struct GraphBuilder<'a> {
    registry: &'a ProviderList<Provider>,
    parent: Option<&'a Injector>,
    store: &'a MetadataStore,
    nodes: Vec<DependencyNode>,
    placed: HashSet<Token>,
    path: Vec<Token>,
}

impl GraphBuilder<'_> {
    fn visit(&mut self, token: &Token) -> Result<()> {
        if self.placed.contains(token) {
            return Ok(());
        }
        if let Some(start) = self.path.iter().position(|open| open == token) {
            let cycle = self.path[start..]
                .iter()
                .chain(std::iter::once(token))
                .map(Token::to_string)
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(WeaveError::CircularDependency { cycle });
        }
        let Some(provider) = self.registry.get(token) else {
            return Err(WeaveError::DependencyNotFound {
                token: token.to_string(),
                requested_by: self
                    .path
                    .last()
                    .map(Token::to_string)
                    .unwrap_or_else(|| "injector".to_string()),
            });
        };

        self.path.push(token.clone());
        let requirements = requirements(self.store, provider)?;
        for dependency in requirements.tokens() {
            if self.registry.has(dependency) {
                self.visit(dependency)?;
            } else if is_injector_token(dependency)
                || self.parent.is_some_and(|parent| parent.has(dependency))
            {
                continue;
            } else {
                return Err(WeaveError::DependencyNotFound {
                    token: dependency.to_string(),
                    requested_by: token.to_string(),
                });
            }
        }
        self.path.pop();

        if matches!(provider.kind, ProviderKind::UseFactory(Factory::Async(_))) {
            tracing::trace!(token = %token, "Async factory placed in graph");
        }
        self.placed.insert(token.clone());
        self.nodes.push(DependencyNode {
            token: token.clone(),
            provider: provider.clone(),
            requirements,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Class;

    struct Engine;
    struct Wheel;
    struct Car;
    struct Chicken;
    struct Egg;

    fn registry(providers: Vec<Provider>) -> ProviderList<Provider> {
        let mut list = ProviderList::new();
        for provider in providers {
            list.set(provider.provide.clone(), provider).unwrap();
        }
        list
    }

    fn order(graph: &DependencyGraph) -> Vec<String> {
        graph.nodes().iter().map(|n| n.token.to_string()).collect()
    }

    #[test]
    fn test_dependencies_come_first() {
        let store = MetadataStore::new();
        Class::<Car>::new()
            .injectable()
            .param::<Engine>()
            .inject_property("wheel", Token::of::<Wheel>())
            .constructor(|_| Ok(Car))
            .register_in(&store);
        Class::<Engine>::new()
            .injectable()
            .constructor(|_| Ok(Engine))
            .register_in(&store);
        Class::<Wheel>::new()
            .injectable()
            .constructor(|_| Ok(Wheel))
            .register_in(&store);

        let list = registry(vec![
            Provider::class::<Car>(),
            Provider::class::<Wheel>(),
            Provider::class::<Engine>(),
        ]);
        let graph = DependencyGraph::build(&list, None, &store).unwrap();
        assert_eq!(order(&graph), vec!["Engine", "Wheel", "Car"]);
    }

    #[test]
    fn test_cycle_is_named() {
        let store = MetadataStore::new();
        Class::<Chicken>::new()
            .injectable()
            .param::<Egg>()
            .constructor(|_| Ok(Chicken))
            .register_in(&store);
        Class::<Egg>::new()
            .injectable()
            .param::<Chicken>()
            .constructor(|_| Ok(Egg))
            .register_in(&store);

        let list = registry(vec![Provider::class::<Chicken>(), Provider::class::<Egg>()]);
        let err = DependencyGraph::build(&list, None, &store).unwrap_err();
        match err {
            WeaveError::CircularDependency { cycle } => {
                assert_eq!(cycle, "Chicken -> Egg -> Chicken")
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_dependency_names_requester() {
        let store = MetadataStore::new();
        Class::<Car>::new()
            .injectable()
            .param::<Engine>()
            .constructor(|_| Ok(Car))
            .register_in(&store);

        let list = registry(vec![Provider::class::<Car>()]);
        let err = DependencyGraph::build(&list, None, &store).unwrap_err();
        assert_eq!(err.to_string(), "No provider for Engine, requested by Car");
    }

    #[test]
    fn test_unregistered_class_is_a_configuration_error() {
        let store = MetadataStore::new();
        let list = registry(vec![Provider::class::<Wheel>()]);
        let err = DependencyGraph::build(&list, None, &store).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_factory_requires_external_tokens_of_scoped_providers() {
        let store = MetadataStore::new();
        Class::<Car>::new()
            .injectable()
            .param::<Engine>()
            .param::<Wheel>()
            .constructor(|_| Ok(Car))
            .register_in(&store);

        let factory = Provider::use_factory("car", |_| Ok(1u8))
            .with_providers(vec![Provider::class::<Car>(), Provider::use_value(Token::of::<Wheel>(), Wheel)]);
        let reqs = requirements(&store, &factory).unwrap();
        assert_eq!(reqs.external, vec![Token::of::<Engine>()]);
    }
}
