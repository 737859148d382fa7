use crate::di::{Injector, Instance};
use crate::error::Result;
use crate::token::{Token, TypeKey};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub type SyncFactory = Arc<dyn Fn(&Arc<Injector>) -> Result<Instance> + Send + Sync>;
pub type AsyncFactory =
    Arc<dyn Fn(Arc<Injector>) -> BoxFuture<'static, Result<Instance>> + Send + Sync>;

#[derive(Clone)]
pub enum Factory {
    Sync(SyncFactory),
    /// Only an async injector can run it.
    Async(AsyncFactory),
}

#[derive(Clone)]
pub enum ProviderKind {
    UseClass(TypeKey),
    UseFactory(Factory),
    UseValue(Instance),
}

/// How to produce the value of a token.
#[derive(Clone)]
pub struct Provider {
    pub provide: Token,
    pub kind: ProviderKind,
    /// Providers of the factory-scoped injector a factory runs against.
    pub providers: Vec<Provider>,
    pub is_mutable: bool,
}

impl Provider {
    /// `{ provide: T, use_class: T }`
    pub fn class<T: Any>() -> Self {
        let key = TypeKey::of::<T>();
        Self::new(key.into(), ProviderKind::UseClass(key))
    }

    pub fn use_class<T: Any>(provide: impl Into<Token>) -> Self {
        Self::new(provide.into(), ProviderKind::UseClass(TypeKey::of::<T>()))
    }

    pub fn use_value<V: Any + Send + Sync>(provide: impl Into<Token>, value: V) -> Self {
        Self::new(provide.into(), ProviderKind::UseValue(Instance::new(value)))
    }

    pub fn use_instance(provide: impl Into<Token>, instance: Instance) -> Self {
        Self::new(provide.into(), ProviderKind::UseValue(instance))
    }

    pub fn use_factory<V, F>(provide: impl Into<Token>, factory: F) -> Self
    where
        V: Any + Send + Sync,
        F: Fn(&Arc<Injector>) -> Result<V> + Send + Sync + 'static,
    {
        let factory: SyncFactory =
            Arc::new(move |injector: &Arc<Injector>| factory(injector).map(Instance::new));
        Self::new(provide.into(), ProviderKind::UseFactory(Factory::Sync(factory)))
    }

    pub fn use_async_factory<V, F, Fut>(provide: impl Into<Token>, factory: F) -> Self
    where
        V: Any + Send + Sync,
        F: Fn(Arc<Injector>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let factory: AsyncFactory = Arc::new(move |injector: Arc<Injector>| {
            factory(injector)
                .map(|result| result.map(Instance::new))
                .boxed()
        });
        Self::new(provide.into(), ProviderKind::UseFactory(Factory::Async(factory)))
    }

    fn new(provide: Token, kind: ProviderKind) -> Self {
        Self {
            provide,
            kind,
            providers: Vec::new(),
            is_mutable: false,
        }
    }

    /// Providers visible to the factory through its scoped injector.
    pub fn with_providers<I>(mut self, providers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ProviderDecl>,
    {
        self.providers = verify_providers(providers);
        self
    }

    /// Allow `Injector::set` to replace the value later.
    pub fn mutable(mut self) -> Self {
        self.is_mutable = true;
        self
    }

    pub fn token(&self) -> &Token {
        &self.provide
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ProviderKind::UseClass(key) => format!("use_class: {:?}", key),
            ProviderKind::UseFactory(Factory::Sync(_)) => "use_factory".to_string(),
            ProviderKind::UseFactory(Factory::Async(_)) => "use_factory (async)".to_string(),
            ProviderKind::UseValue(instance) => format!("use_value: {:?}", instance),
        };
        write!(f, "{{ provide: {:?}, {}", self.provide, kind)?;
        if self.is_mutable {
            f.write_str(", mutable")?;
        }
        f.write_str(" }")
    }
}

/// A provider as written in module or controller options.
#[derive(Debug, Clone)]
pub enum ProviderDecl {
    /// A bare class, shorthand for `{ provide: T, use_class: T }`.
    Class(TypeKey),
    Provider(Provider),
}

impl ProviderDecl {
    pub fn class<T: Any>() -> Self {
        Self::Class(TypeKey::of::<T>())
    }
}

impl From<TypeKey> for ProviderDecl {
    fn from(key: TypeKey) -> Self {
        Self::Class(key)
    }
}

impl From<Provider> for ProviderDecl {
    fn from(provider: Provider) -> Self {
        Self::Provider(provider)
    }
}

pub fn verify_provider(decl: impl Into<ProviderDecl>) -> Provider {
    match decl.into() {
        ProviderDecl::Class(key) => Provider::new(key.into(), ProviderKind::UseClass(key)),
        ProviderDecl::Provider(provider) => provider,
    }
}

/// Normalize declarations; an empty (or `None`) list yields no providers.
pub fn verify_providers<I>(list: I) -> Vec<Provider>
where
    I: IntoIterator,
    I::Item: Into<ProviderDecl>,
{
    list.into_iter().map(verify_provider).collect()
}

/// Readable name of a token, `None` when there is no token.
pub fn get_provider_name(token: Option<&Token>) -> Option<String> {
    token.map(|token| token.to_string())
}

/// `base` first, then the entries of `incoming` whose tokens `base` lacks.
pub fn shift_left(base: &[Provider], incoming: &[Provider]) -> Vec<Provider> {
    let tokens: HashSet<&Token> = base.iter().map(Provider::token).collect();
    base.iter()
        .cloned()
        .chain(
            incoming
                .iter()
                .filter(|provider| !tokens.contains(provider.token()))
                .cloned(),
        )
        .collect()
}

/// The entries of `incoming` whose tokens `base` lacks, then `base`.
pub fn shift_right(base: &[Provider], incoming: &[Provider]) -> Vec<Provider> {
    let tokens: HashSet<&Token> = base.iter().map(Provider::token).collect();
    incoming
        .iter()
        .filter(|provider| !tokens.contains(provider.token()))
        .cloned()
        .chain(base.iter().cloned())
        .collect()
}
