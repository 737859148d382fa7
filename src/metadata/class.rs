use super::decorators::{
    ActionMeta, AfterConstruct, Controller, ControllerOptions, Decorator, Inject, Injectable,
    Module, ModuleOptions, OnError, RootModule, verb_decorator,
};
use super::{ClassRecord, DecoratorType, MetadataEntry, MetadataStore, store};
use crate::di::{Injector, Instance};
use crate::error::{Result, WeaveError};
use crate::router::{ActionHandler, Payload, RequestContext};
use crate::token::{Token, TypeKey};
use axum::http::Method;
use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Builds an instance of a class from its resolved dependencies.
pub type Constructor = Arc<dyn Fn(&Arguments) -> Result<Instance> + Send + Sync>;

/// Callback attached with `@AfterConstruct`.
#[derive(Clone)]
pub enum LifecycleHook {
    Sync(Arc<dyn Fn(&Instance) -> Result<()> + Send + Sync>),
    Async(Arc<dyn Fn(Instance) -> BoxFuture<'static, Result<()>> + Send + Sync>),
}

impl fmt::Debug for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("LifecycleHook::Sync"),
            Self::Async(_) => f.write_str("LifecycleHook::Async"),
        }
    }
}

/// Resolved dependencies handed to a [`Constructor`].
pub struct Arguments {
    target: TypeKey,
    params: Vec<(Token, Instance)>,
    properties: IndexMap<String, (Token, Instance)>,
    injector: Arc<Injector>,
}

impl Arguments {
    pub(crate) fn new(
        target: TypeKey,
        params: Vec<(Token, Instance)>,
        properties: IndexMap<String, (Token, Instance)>,
        injector: Arc<Injector>,
    ) -> Self {
        Self {
            target,
            params,
            properties,
            injector,
        }
    }

    /// Constructor parameter at `index`.
    pub fn param<P: Any + Send + Sync>(&self, index: usize) -> Result<Arc<P>> {
        let (token, instance) =
            self.params
                .get(index)
                .ok_or_else(|| WeaveError::DependencyNotFound {
                    token: format!("parameter #{}", index),
                    requested_by: self.target.to_string(),
                })?;
        downcast(token, instance)
    }

    /// Value injected into the named property.
    pub fn property<P: Any + Send + Sync>(&self, name: &str) -> Result<Arc<P>> {
        let (token, instance) =
            self.properties
                .get(name)
                .ok_or_else(|| WeaveError::DependencyNotFound {
                    token: format!("property {}", name),
                    requested_by: self.target.to_string(),
                })?;
        downcast(token, instance)
    }

    pub fn injector(&self) -> &Arc<Injector> {
        &self.injector
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

fn downcast<P: Any + Send + Sync>(token: &Token, instance: &Instance) -> Result<Arc<P>> {
    instance
        .downcast::<P>()
        .ok_or_else(|| WeaveError::DowncastFailed {
            token: token.to_string(),
            type_name: std::any::type_name::<P>().to_string(),
        })
}

/// Registration of a class and its decorators.
///
/// Stands in for decorator syntax: every call records one metadata entry (or
/// one piece of class information) and [`Class::register`] commits them.
///
/// ```rust,ignore
/// Class::<UserService>::new()
///     .injectable()
///     .param::<UserRepository>()
///     .inject_param(1, "config")
///     .inject_property("logger", Token::of::<Logger>())
///     .constructor(|args| {
///         Ok(UserService {
///             repository: args.param(0)?,
///             config: args.param(1)?,
///             logger: args.property("logger")?,
///         })
///     })
///     .register();
/// ```
pub struct Class<T> {
    record: ClassRecord,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Default for Class<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Any + Send + Sync> Class<T> {
    pub fn new() -> Self {
        Self {
            record: ClassRecord::new(TypeKey::of::<T>()),
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> TypeKey {
        self.record.key
    }

    /// Inherit the metadata registered for `P`.
    pub fn extends<P: Any>(mut self) -> Self {
        self.record.parent = Some(TypeKey::of::<P>());
        self
    }

    pub fn constructor<F>(mut self, constructor: F) -> Self
    where
        F: Fn(&Arguments) -> Result<T> + Send + Sync + 'static,
    {
        self.record.constructor = Some(Arc::new(move |args: &Arguments| {
            constructor(args).map(Instance::new)
        }));
        self
    }

    /// Next constructor parameter, looked up by its type.
    pub fn param<P: Any + ?Sized>(self) -> Self {
        self.param_token(Token::of::<P>())
    }

    /// Next constructor parameter, looked up by an explicit token.
    pub fn param_token(mut self, token: impl Into<Token>) -> Self {
        let token = token.into();
        self.record.design_param.push(token.clone());
        for entry in &mut self.record.entries {
            if entry.is_constructor() && entry.target == self.record.key {
                entry.design_param.push(token.clone());
            }
        }
        self
    }

    pub fn injectable(self) -> Self {
        self.class_decorator(Injectable::ID, None::<()>)
    }

    /// `@Inject(token)` on constructor parameter `index`.
    pub fn inject_param(self, index: usize, token: impl Into<Token>) -> Self {
        let key = self.record.key;
        let token = token.into();
        self.push(
            MetadataEntry::new(key, Inject::ID, DecoratorType::Parameter)
                .parameter(index)
                .design_type(token.clone())
                .args(token),
        )
    }

    /// `@Inject(token)` on a property.
    pub fn inject_property(self, name: impl Into<String>, token: impl Into<Token>) -> Self {
        let key = self.record.key;
        let token = token.into();
        self.push(
            MetadataEntry::new(key, Inject::ID, DecoratorType::Property)
                .property(name)
                .design_type(token.clone())
                .args(token),
        )
    }

    pub fn after_construct<F>(self, method: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        let hook = LifecycleHook::Sync(Arc::new(move |instance: &Instance| {
            match instance.downcast_ref::<T>() {
                Some(value) => hook(value),
                None => Err(hook_downcast_error::<T>(instance)),
            }
        }));
        self.method_decorator(AfterConstruct::ID, method, hook)
    }

    pub fn after_construct_async<F, Fut>(self, method: impl Into<String>, hook: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let hook = LifecycleHook::Async(Arc::new(move |instance: Instance| {
            let future: BoxFuture<'static, Result<()>> = match instance.downcast::<T>() {
                Some(value) => hook(value).boxed(),
                None => futures::future::ready(Err(hook_downcast_error::<T>(&instance))).boxed(),
            };
            future
        }));
        self.method_decorator(AfterConstruct::ID, method, hook)
    }

    pub fn controller(self, options: ControllerOptions) -> Self {
        self.class_decorator(Controller::ID, Some(options))
    }

    pub fn module(self, options: ModuleOptions) -> Self {
        self.class_decorator(Module::ID, Some(options))
    }

    pub fn root_module(self, options: ModuleOptions) -> Self {
        self.class_decorator(RootModule::ID, Some(options))
    }

    /// Route decorator on a controller method.
    pub fn action<F, Fut, R>(
        self,
        method: Method,
        path: impl Into<String>,
        name: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Arc<T>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<Payload>,
    {
        let decorator = verb_decorator(&method);
        let meta = ActionMeta {
            method: Some(method),
            path: path.into(),
            handler: action_handler(handler),
        };
        self.method_decorator(decorator, name, meta)
    }

    pub fn get<F, Fut, R>(self, path: impl Into<String>, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<T>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<Payload>,
    {
        self.action(Method::GET, path, name, handler)
    }

    pub fn post<F, Fut, R>(self, path: impl Into<String>, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<T>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<Payload>,
    {
        self.action(Method::POST, path, name, handler)
    }

    pub fn put<F, Fut, R>(self, path: impl Into<String>, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<T>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<Payload>,
    {
        self.action(Method::PUT, path, name, handler)
    }

    pub fn delete<F, Fut, R>(
        self,
        path: impl Into<String>,
        name: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Arc<T>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<Payload>,
    {
        self.action(Method::DELETE, path, name, handler)
    }

    pub fn patch<F, Fut, R>(
        self,
        path: impl Into<String>,
        name: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Arc<T>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<Payload>,
    {
        self.action(Method::PATCH, path, name, handler)
    }

    /// Error action, invoked for failures on paths matching `path`.
    pub fn on_error<F, Fut, R>(
        self,
        path: impl Into<String>,
        name: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Arc<T>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<Payload>,
    {
        let meta = ActionMeta {
            method: None,
            path: path.into(),
            handler: action_handler(handler),
        };
        self.method_decorator(OnError::ID, name, meta)
    }

    /// Record a custom decorator entry; its target is forced to this class.
    pub fn decorate(self, mut entry: MetadataEntry) -> Self {
        entry.target = self.record.key;
        if entry.is_constructor() {
            entry.design_param = self.record.design_param.clone();
        }
        self.push(entry)
    }

    /// Commit into the process-wide store.
    pub fn register(self) {
        store().define(self.record);
    }

    pub fn register_in(self, store: &MetadataStore) {
        store.define(self.record);
    }

    fn class_decorator<A: Any + Send + Sync>(
        self,
        id: super::DecoratorId,
        args: Option<A>,
    ) -> Self {
        let key = self.record.key;
        let mut entry = MetadataEntry::new(key, id, DecoratorType::Constructor);
        if let Some(args) = args {
            entry = entry.args(args);
        }
        entry.design_param = self.record.design_param.clone();
        self.push(entry)
    }

    fn method_decorator<A: Any + Send + Sync>(
        self,
        id: super::DecoratorId,
        method: impl Into<String>,
        args: A,
    ) -> Self {
        let key = self.record.key;
        let mut entry = MetadataEntry::new(key, id, DecoratorType::Method)
            .property(method)
            .args(args);
        if TypeId::of::<A>() == TypeId::of::<ActionMeta>() {
            entry = entry.design_return(Token::of::<Payload>());
        }
        self.push(entry)
    }

    /// Later declarations of the same slot replace earlier ones in place.
    fn push(mut self, entry: MetadataEntry) -> Self {
        let existing = self.record.entries.iter().position(|kept| {
            if entry.is_constructor() {
                kept.is_constructor() && kept.decorator_id == entry.decorator_id
            } else {
                kept.same_slot(&entry)
            }
        });
        match existing {
            Some(index) => self.record.entries[index] = entry,
            None => self.record.entries.push(entry),
        }
        self
    }
}

fn hook_downcast_error<T>(instance: &Instance) -> WeaveError {
    WeaveError::DowncastFailed {
        token: instance.type_name().to_string(),
        type_name: std::any::type_name::<T>().to_string(),
    }
}

fn action_handler<T, F, Fut, R>(handler: F) -> ActionHandler
where
    T: Any + Send + Sync,
    F: Fn(Arc<T>, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: Into<Payload>,
{
    Arc::new(move |instance: Instance, cx: RequestContext| {
        let future: BoxFuture<'static, Result<Payload>> = match instance.downcast::<T>() {
            Some(controller) => handler(controller, cx)
                .map(|result| result.map(|value| -> Payload { value.into() }))
                .boxed(),
            None => futures::future::ready(Err(hook_downcast_error::<T>(&instance))).boxed(),
        };
        future
    })
}
