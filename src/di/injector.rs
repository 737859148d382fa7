//! Injector
//!
//! An injector owns the providers it was created with and the instances built
//! from them. Creation resolves the whole dependency graph eagerly; lookups
//! that miss locally fall back to the parent chain.
//!
//! ```text
//! Created -> ResolvingGraph -> Instantiated -> Destroyed
//!                  |                                ^
//!                  +------------ (error) -----------+
//! ```

use super::graph::{DependencyGraph, DependencyNode, Requirements, is_injector_token};
use super::{Factory, Instance, Provider, ProviderDecl, ProviderKind, ProviderList, verify_providers};
use crate::error::{Result, WeaveError};
use crate::metadata::{AfterConstruct, Arguments, Decorator, LifecycleHook, store};
use crate::token::{Token, TypeKey};
use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum InjectorState {
    Created,
    ResolvingGraph,
    Instantiated,
    Destroyed,
}

pub struct Injector {
    id: Uuid,
    target: Token,
    parent: Option<Arc<Injector>>,
    providers: Vec<Provider>,
    registry: ProviderList<Provider>,
    instances: RwLock<ProviderList<Instance>>,
    state: RwLock<InjectorState>,
    this: Weak<Injector>,
}

impl Injector {
    /// Build a root injector and every instance its providers describe.
    ///
    /// When `target` is a type token without a provider of its own, the
    /// target class is added as the last provider.
    pub fn create_and_resolve<I>(target: impl Into<Token>, providers: I) -> Result<Arc<Self>>
    where
        I: IntoIterator,
        I::Item: Into<ProviderDecl>,
    {
        let injector = Self::prepare(None, target.into(), verify_providers(providers))?;
        injector.resolve_graph()?;
        Ok(injector)
    }

    pub fn create_and_resolve_child<I>(
        parent: &Arc<Injector>,
        target: impl Into<Token>,
        providers: I,
    ) -> Result<Arc<Self>>
    where
        I: IntoIterator,
        I::Item: Into<ProviderDecl>,
    {
        let injector = Self::prepare(
            Some(parent.clone()),
            target.into(),
            verify_providers(providers),
        )?;
        injector.resolve_graph()?;
        Ok(injector)
    }

    /// Like [`Injector::create_and_resolve`], but async factories and async
    /// lifecycle hooks are awaited.
    pub fn create_and_resolve_async<I>(
        target: impl Into<Token>,
        providers: I,
    ) -> BoxFuture<'static, Result<Arc<Self>>>
    where
        I: IntoIterator,
        I::Item: Into<ProviderDecl>,
    {
        let prepared = Self::prepare(None, target.into(), verify_providers(providers));
        Self::finish_async(prepared)
    }

    pub fn create_and_resolve_child_async<I>(
        parent: &Arc<Injector>,
        target: impl Into<Token>,
        providers: I,
    ) -> BoxFuture<'static, Result<Arc<Self>>>
    where
        I: IntoIterator,
        I::Item: Into<ProviderDecl>,
    {
        let prepared = Self::prepare(
            Some(parent.clone()),
            target.into(),
            verify_providers(providers),
        );
        Self::finish_async(prepared)
    }

    fn finish_async(prepared: Result<Arc<Self>>) -> BoxFuture<'static, Result<Arc<Self>>> {
        async move {
            let injector = prepared?;
            injector.clone().resolve_graph_async().await?;
            Ok(injector)
        }
        .boxed()
    }

    fn prepare(
        parent: Option<Arc<Injector>>,
        target: Token,
        mut providers: Vec<Provider>,
    ) -> Result<Arc<Self>> {
        if let Some(parent) = &parent {
            parent.ensure_alive()?;
        }
        if let Token::Type(key) = &target {
            if !providers.iter().any(|provider| provider.provide == target) {
                providers.push(super::verify_provider(*key));
            }
        }

        let mut registry = ProviderList::new();
        for provider in &providers {
            if provider.is_mutable {
                registry.set_mutable(provider.provide.clone(), provider.clone())?;
            } else {
                registry.set(provider.provide.clone(), provider.clone())?;
            }
        }

        Ok(Arc::new_cyclic(|this| Self {
            id: Uuid::new_v4(),
            target,
            parent,
            providers,
            registry,
            instances: RwLock::new(ProviderList::new()),
            state: RwLock::new(InjectorState::Created),
            this: this.clone(),
        }))
    }

    fn resolve_graph(self: &Arc<Self>) -> Result<()> {
        self.set_state(InjectorState::ResolvingGraph);
        let result = self.build_graph().and_then(|graph| {
            for node in graph.nodes() {
                let instance = self.instantiate(node)?;
                self.store_instance(node, instance)?;
            }
            Ok(())
        });
        self.settle(result)
    }

    fn resolve_graph_async(self: Arc<Self>) -> BoxFuture<'static, Result<()>> {
        async move {
            self.set_state(InjectorState::ResolvingGraph);
            let result = async {
                let graph = self.build_graph()?;
                for node in graph.nodes() {
                    let instance = self.instantiate_async(node).await?;
                    self.store_instance(node, instance)?;
                }
                Ok::<(), WeaveError>(())
            }
            .await;
            self.settle(result)
        }
        .boxed()
    }

    fn build_graph(&self) -> Result<DependencyGraph> {
        let graph = DependencyGraph::build(&self.registry, self.parent.as_deref(), store())?;
        tracing::debug!(
            injector = %self.id,
            target = %self.target,
            providers = graph.len(),
            "Resolved dependency graph"
        );
        Ok(graph)
    }

    fn settle(&self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                self.set_state(InjectorState::Instantiated);
                tracing::debug!(injector = %self.id, target = %self.target, "Injector ready");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    injector = %self.id,
                    target = %self.target,
                    error = %err,
                    "Injector resolution failed"
                );
                self.destroy();
                Err(err)
            }
        }
    }

    fn instantiate(self: &Arc<Self>, node: &DependencyNode) -> Result<Instance> {
        match &node.provider.kind {
            ProviderKind::UseValue(value) => Ok(value.clone()),
            ProviderKind::UseClass(key) => {
                let instance = self.construct(*key, &node.requirements)?;
                for hook in hooks(*key) {
                    match hook {
                        LifecycleHook::Sync(hook) => hook(&instance)?,
                        LifecycleHook::Async(_) => {
                            return Err(WeaveError::AsyncRequired {
                                token: node.token.to_string(),
                            });
                        }
                    }
                }
                Ok(instance)
            }
            ProviderKind::UseFactory(Factory::Sync(factory)) => {
                let scope = Self::create_and_resolve_child(
                    self,
                    factory_scope(&node.token),
                    node.provider.providers.clone(),
                )?;
                let result = factory(&scope);
                scope.destroy();
                result
            }
            ProviderKind::UseFactory(Factory::Async(_)) => Err(WeaveError::AsyncRequired {
                token: node.token.to_string(),
            }),
        }
    }

    async fn instantiate_async(self: &Arc<Self>, node: &DependencyNode) -> Result<Instance> {
        match &node.provider.kind {
            ProviderKind::UseValue(value) => Ok(value.clone()),
            ProviderKind::UseClass(key) => {
                let instance = self.construct(*key, &node.requirements)?;
                for hook in hooks(*key) {
                    match hook {
                        LifecycleHook::Sync(hook) => hook(&instance)?,
                        LifecycleHook::Async(hook) => hook(instance.clone()).await?,
                    }
                }
                Ok(instance)
            }
            ProviderKind::UseFactory(factory) => {
                let scope = Self::create_and_resolve_child_async(
                    self,
                    factory_scope(&node.token),
                    node.provider.providers.clone(),
                )
                .await?;
                let result = match factory {
                    Factory::Sync(factory) => factory(&scope),
                    Factory::Async(factory) => factory(scope.clone()).await,
                };
                scope.destroy();
                result
            }
        }
    }

    fn construct(self: &Arc<Self>, key: TypeKey, requirements: &Requirements) -> Result<Instance> {
        let constructor = store()
            .constructor(key)
            .ok_or_else(|| WeaveError::ConstructorMissing {
                class: key.to_string(),
            })?;

        let params = requirements
            .params
            .iter()
            .map(|token| Ok((token.clone(), self.get(token)?)))
            .collect::<Result<Vec<_>>>()?;
        let properties = requirements
            .properties
            .iter()
            .map(|(name, token)| Ok((name.clone(), (token.clone(), self.get(token)?))))
            .collect::<Result<IndexMap<_, _>>>()?;

        let arguments = Arguments::new(key, params, properties, self.clone());
        let instance = constructor(&arguments)?;
        tracing::trace!(injector = %self.id, class = %key, "Constructed instance");
        Ok(instance)
    }

    fn store_instance(&self, node: &DependencyNode, instance: Instance) -> Result<()> {
        let mut instances = self.write_instances();
        if node.provider.is_mutable {
            instances.set_mutable(node.token.clone(), instance)
        } else {
            instances.set(node.token.clone(), instance)
        }
    }

    /// Instance for `token`, from this injector or the nearest ancestor.
    pub fn get(&self, token: &Token) -> Result<Instance> {
        self.ensure_alive()?;
        if let Some(instance) = self.read_instances().get(token) {
            return Ok(instance.clone());
        }
        if is_injector_token(token) {
            if let Some(this) = self.this.upgrade() {
                return Ok(Instance::from_arc(this));
            }
        }
        match &self.parent {
            Some(parent) => parent.get(token).map_err(|err| match err {
                WeaveError::DependencyNotFound { .. } => self.not_found(token),
                other => other,
            }),
            None => Err(self.not_found(token)),
        }
    }

    pub fn get_as<T: Any + Send + Sync>(&self, token: &Token) -> Result<Arc<T>> {
        let instance = self.get(token)?;
        instance
            .downcast::<T>()
            .ok_or_else(|| WeaveError::DowncastFailed {
                token: token.to_string(),
                type_name: std::any::type_name::<T>().to_string(),
            })
    }

    /// Shorthand for `get_as::<T>(&Token::of::<T>())`.
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.get_as::<T>(&Token::of::<T>())
    }

    pub fn has(&self, token: &Token) -> bool {
        if self.is_destroyed() {
            return false;
        }
        self.read_instances().has(token)
            || is_injector_token(token)
            || self.parent.as_ref().is_some_and(|parent| parent.has(token))
    }

    /// Store an instance after resolution. Only new tokens and tokens whose
    /// provider was marked mutable are accepted.
    pub fn set(&self, token: impl Into<Token>, instance: Instance) -> Result<()> {
        self.ensure_alive()?;
        self.write_instances().set(token.into(), instance)
    }

    /// Drop every instance. Lookups on a destroyed injector fail.
    pub fn destroy(&self) {
        let previous = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, InjectorState::Destroyed)
        };
        if previous == InjectorState::Destroyed {
            return;
        }
        self.write_instances().clear();
        tracing::debug!(injector = %self.id, target = %self.target, "Injector destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == InjectorState::Destroyed
    }

    pub fn state(&self) -> InjectorState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target(&self) -> &Token {
        &self.target
    }

    pub fn parent(&self) -> Option<&Arc<Injector>> {
        self.parent.as_ref()
    }

    /// Providers this injector was created with, after normalization.
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    /// Tokens with a local instance, in instantiation order.
    pub fn tokens(&self) -> Vec<Token> {
        self.read_instances().keys().cloned().collect()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(WeaveError::InjectorDestroyed {
                injector: self.target.to_string(),
            });
        }
        Ok(())
    }

    fn not_found(&self, token: &Token) -> WeaveError {
        WeaveError::DependencyNotFound {
            token: token.to_string(),
            requested_by: self.target.to_string(),
        }
    }

    fn set_state(&self, next: InjectorState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn read_instances(&self) -> RwLockReadGuard<'_, ProviderList<Instance>> {
        self.instances.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_instances(&self) -> RwLockWriteGuard<'_, ProviderList<Instance>> {
        self.instances.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("state", &self.state())
            .field("parent", &self.parent.as_ref().map(|parent| parent.id))
            .finish()
    }
}

fn factory_scope(token: &Token) -> Token {
    Token::name(format!("factory:{}", token))
}

/// `@AfterConstruct` hooks declared by the class itself.
fn hooks(key: TypeKey) -> Vec<LifecycleHook> {
    store()
        .get_all_metadata_for_target(key)
        .into_iter()
        .filter(|entry| entry.decorator_id == AfterConstruct::ID && entry.target == key)
        .filter_map(|entry| entry.args.get::<LifecycleHook>().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::metadata::Class;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Config {
        url: &'static str,
    }

    struct Repository {
        config: Arc<Config>,
    }

    struct Service {
        repository: Arc<Repository>,
        label: Arc<String>,
    }

    fn register_service_graph() {
        Class::<Config>::new()
            .injectable()
            .constructor(|_| Ok(Config { url: "mem://" }))
            .register();
        Class::<Repository>::new()
            .injectable()
            .param::<Config>()
            .constructor(|args| {
                Ok(Repository {
                    config: args.param(0)?,
                })
            })
            .register();
        Class::<Service>::new()
            .injectable()
            .param::<Repository>()
            .inject_property("label", "label")
            .constructor(|args| {
                Ok(Service {
                    repository: args.param(0)?,
                    label: args.property("label")?,
                })
            })
            .register();
    }

    #[test]
    fn test_resolves_graph_in_dependency_order() {
        register_service_graph();
        let injector = Injector::create_and_resolve(
            Token::of::<Service>(),
            vec![
                ProviderDecl::class::<Repository>(),
                ProviderDecl::class::<Config>(),
                Provider::use_value("label", String::from("users")).into(),
            ],
        )
        .unwrap();

        let service = injector.resolve::<Service>().unwrap();
        assert_eq!(service.label.as_str(), "users");
        assert_eq!(service.repository.config.url, "mem://");
        assert!(Arc::ptr_eq(
            &service.repository,
            &injector.resolve::<Repository>().unwrap()
        ));
        assert_eq!(injector.state(), InjectorState::Instantiated);
        assert_eq!(injector.providers().len(), 4);
        assert_eq!(
            injector.tokens().last().map(Token::to_string).as_deref(),
            Some("Service")
        );
    }

    #[test]
    fn test_child_reads_parent_instances() {
        register_service_graph();
        let parent =
            Injector::create_and_resolve("app", vec![ProviderDecl::class::<Config>()]).unwrap();
        let child = Injector::create_and_resolve_child(
            &parent,
            "child",
            vec![ProviderDecl::class::<Repository>()],
        )
        .unwrap();

        let repository = child.resolve::<Repository>().unwrap();
        assert!(Arc::ptr_eq(
            &repository.config,
            &parent.resolve::<Config>().unwrap()
        ));
        assert!(!parent.has(&Token::of::<Repository>()));
        assert!(child.has(&Token::of::<Config>()));
    }

    #[test]
    fn test_missing_provider_fails_and_names_requester() {
        register_service_graph();
        let err = Injector::create_and_resolve(
            "app",
            vec![ProviderDecl::class::<Repository>()],
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "No provider for Config, requested by Repository");
    }

    #[test]
    fn test_duplicate_provider_is_rejected() {
        let err = Injector::create_and_resolve(
            "app",
            vec![
                Provider::use_value("port", 1u16),
                Provider::use_value("port", 2u16),
            ],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_set_respects_mutability() {
        let injector = Injector::create_and_resolve(
            "app",
            vec![
                Provider::use_value("port", 1u16),
                Provider::use_value("host", "a").mutable(),
            ],
        )
        .unwrap();

        assert!(injector.set("port", Instance::new(2u16)).is_err());
        injector.set("host", Instance::new("b")).unwrap();
        injector.set("fresh", Instance::new(true)).unwrap();
        assert_eq!(*injector.get_as::<&str>(&Token::name("host")).unwrap(), "b");
        assert!(*injector.get_as::<bool>(&Token::name("fresh")).unwrap());
    }

    #[test]
    fn test_injector_token_resolves_to_itself() {
        let injector = Injector::create_and_resolve("app", Vec::<Provider>::new()).unwrap();
        let same = injector.resolve::<Injector>().unwrap();
        assert!(Arc::ptr_eq(&injector, &same));
    }

    #[test]
    fn test_factory_runs_with_scoped_injector() {
        register_service_graph();
        let injector = Injector::create_and_resolve(
            "app",
            vec![
                ProviderDecl::class::<Config>(),
                Provider::use_factory("repository-url", |scope: &Arc<Injector>| {
                    let repository = scope.resolve::<Repository>()?;
                    Ok(repository.config.url.to_string())
                })
                .with_providers(vec![ProviderDecl::class::<Repository>()])
                .into(),
            ],
        )
        .unwrap();

        let url = injector.get_as::<String>(&Token::name("repository-url")).unwrap();
        assert_eq!(url.as_str(), "mem://");
        // scoped providers stay in the factory's injector
        assert!(!injector.has(&Token::of::<Repository>()));
    }

    #[test]
    fn test_factory_scope_is_destroyed_after_factory_returns() {
        let kept: Arc<Mutex<Option<Arc<Injector>>>> = Arc::new(Mutex::new(None));
        let slot = kept.clone();
        let injector = Injector::create_and_resolve(
            "app",
            vec![
                Provider::use_factory("answer", move |scope: &Arc<Injector>| {
                    *slot.lock().unwrap() = Some(scope.clone());
                    Ok(42u32)
                })
                .with_providers(vec![Provider::use_value("seed", 1u8)]),
            ],
        )
        .unwrap();

        assert_eq!(*injector.get_as::<u32>(&Token::name("answer")).unwrap(), 42);
        let scope = kept.lock().unwrap().clone().unwrap();
        assert_eq!(scope.target().to_string(), "factory:answer");
        assert_eq!(scope.state(), InjectorState::Destroyed);
        assert!(!scope.has(&Token::name("seed")));
    }

    #[tokio::test]
    async fn test_async_factory_scope_is_destroyed() {
        let kept: Arc<Mutex<Option<Arc<Injector>>>> = Arc::new(Mutex::new(None));
        let slot = kept.clone();
        let injector = Injector::create_and_resolve_async(
            "app",
            vec![Provider::use_async_factory("answer", move |scope: Arc<Injector>| {
                let slot = slot.clone();
                async move {
                    let seed = scope.get_as::<u8>(&Token::name("seed"))?;
                    *slot.lock().unwrap() = Some(scope);
                    Ok::<_, WeaveError>(u32::from(*seed) + 41)
                }
            })
            .with_providers(vec![Provider::use_value("seed", 1u8)])],
        )
        .await
        .unwrap();

        assert_eq!(*injector.get_as::<u32>(&Token::name("answer")).unwrap(), 42);
        let scope = kept.lock().unwrap().clone().unwrap();
        assert!(scope.is_destroyed());
    }

    #[test]
    fn test_repeated_get_returns_the_same_instance() {
        register_service_graph();
        let injector = Injector::create_and_resolve(
            Token::of::<Repository>(),
            vec![ProviderDecl::class::<Config>()],
        )
        .unwrap();

        let token = Token::of::<Repository>();
        let first = injector.get(&token).unwrap();
        let second = injector.get(&token).unwrap();
        assert!(first.ptr_eq(&second));
        assert!(Arc::ptr_eq(
            &injector.resolve::<Repository>().unwrap(),
            &injector.resolve::<Repository>().unwrap()
        ));
    }

    struct Ping {
        _pong: Arc<Pong>,
    }

    struct Pong {
        _ping: Arc<Ping>,
    }

    fn register_ping_pong() {
        Class::<Ping>::new()
            .injectable()
            .param::<Pong>()
            .constructor(|args| Ok(Ping { _pong: args.param(0)? }))
            .register();
        Class::<Pong>::new()
            .injectable()
            .param::<Ping>()
            .constructor(|args| Ok(Pong { _ping: args.param(0)? }))
            .register();
    }

    #[test]
    fn test_circular_dependency_fails_resolution() {
        register_ping_pong();
        let err = Injector::create_and_resolve(
            "app",
            vec![ProviderDecl::class::<Ping>(), ProviderDecl::class::<Pong>()],
        )
        .unwrap_err();
        match err {
            WeaveError::CircularDependency { cycle } => assert_eq!(cycle, "Ping -> Pong -> Ping"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_async_circular_dependency_fails_resolution() {
        register_ping_pong();
        let err = Injector::create_and_resolve_async(
            "app",
            vec![ProviderDecl::class::<Ping>(), ProviderDecl::class::<Pong>()],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WeaveError::CircularDependency { .. }));
        assert_eq!(err.kind(), ErrorKind::Resolution);
    }

    #[test]
    fn test_sync_injector_rejects_async_factory() {
        let err = Injector::create_and_resolve(
            "app",
            vec![Provider::use_async_factory("slow", |_| async { Ok(1u8) })],
        )
        .unwrap_err();
        assert!(matches!(err, WeaveError::AsyncRequired { .. }));
    }

    #[tokio::test]
    async fn test_async_factory_and_hooks() {
        struct Warm {
            ready: Mutex<bool>,
        }
        static HOOKS: AtomicUsize = AtomicUsize::new(0);

        Class::<Warm>::new()
            .injectable()
            .constructor(|_| {
                Ok(Warm {
                    ready: Mutex::new(false),
                })
            })
            .after_construct("count", |_: &Warm| {
                HOOKS.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .after_construct_async("warm_up", |warm: Arc<Warm>| async move {
                *warm.ready.lock().unwrap() = true;
                Ok(())
            })
            .register();

        let injector = Injector::create_and_resolve_async(
            Token::of::<Warm>(),
            vec![Provider::use_async_factory("answer", |_| async { Ok(42u32) })],
        )
        .await
        .unwrap();

        assert_eq!(*injector.get_as::<u32>(&Token::name("answer")).unwrap(), 42);
        assert!(*injector.resolve::<Warm>().unwrap().ready.lock().unwrap());
        assert_eq!(HOOKS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_destroy_blocks_lookups() {
        let injector =
            Injector::create_and_resolve("app", vec![Provider::use_value("port", 1u16)]).unwrap();
        injector.destroy();
        injector.destroy();
        assert!(injector.is_destroyed());
        assert!(matches!(
            injector.get(&Token::name("port")),
            Err(WeaveError::InjectorDestroyed { .. })
        ));
        assert!(!injector.has(&Token::name("port")));
    }
}
