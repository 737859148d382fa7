//! Built-in decorators and their arguments.

use super::DecoratorId;
use crate::di::ProviderDecl;
use crate::router::ActionHandler;
use crate::token::{Token, TypeKey};
use axum::http::Method;
use std::fmt;

/// A decorator known by a stable id.
pub trait Decorator {
    const ID: DecoratorId;
}

macro_rules! decorators {
    ($($(#[$doc:meta])* $name:ident => $id:literal),* $(,)?) => {
        $(
            $(#[$doc])*
            pub struct $name;

            impl Decorator for $name {
                const ID: DecoratorId = DecoratorId::new($id);
            }
        )*
    };
}

decorators! {
    /// Marks a class as constructible by an injector.
    Injectable => "@Injectable",
    /// Overrides the token of a constructor parameter, or injects a property.
    Inject => "@Inject",
    /// Method run once the instance is built.
    AfterConstruct => "@AfterConstruct",
    Controller => "@Controller",
    Module => "@Module",
    RootModule => "@RootModule",
    Get => "@GET",
    Post => "@POST",
    Put => "@PUT",
    Delete => "@DELETE",
    Patch => "@PATCH",
    Head => "@HEAD",
    Options => "@OPTIONS",
    Trace => "@TRACE",
    Connect => "@CONNECT",
    /// Error handler for paths matching its pattern.
    OnError => "@OnError",
}

/// Decorator id recorded for a controller action answering `method`.
pub fn verb_decorator(method: &Method) -> DecoratorId {
    match *method {
        Method::GET => Get::ID,
        Method::POST => Post::ID,
        Method::PUT => Put::ID,
        Method::DELETE => Delete::ID,
        Method::PATCH => Patch::ID,
        Method::HEAD => Head::ID,
        Method::OPTIONS => Options::ID,
        Method::TRACE => Trace::ID,
        Method::CONNECT => Connect::ID,
        _ => DecoratorId::new("@Route"),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    pub path: String,
    pub providers: Vec<ProviderDecl>,
}

impl ControllerOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            providers: Vec::new(),
        }
    }

    pub fn provider(mut self, provider: impl Into<ProviderDecl>) -> Self {
        self.providers.push(provider.into());
        self
    }

    pub fn class<T: 'static>(self) -> Self {
        self.provider(TypeKey::of::<T>())
    }
}

/// Arguments of `@Module` and `@RootModule`.
#[derive(Debug, Clone, Default)]
pub struct ModuleOptions {
    pub imports: Vec<TypeKey>,
    pub exports: Vec<Token>,
    pub providers: Vec<ProviderDecl>,
    pub controllers: Vec<TypeKey>,
    pub shared_providers: Vec<ProviderDecl>,
}

impl ModuleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn import<M: 'static>(mut self) -> Self {
        self.imports.push(TypeKey::of::<M>());
        self
    }

    pub fn export(mut self, token: impl Into<Token>) -> Self {
        self.exports.push(token.into());
        self
    }

    pub fn provider(mut self, provider: impl Into<ProviderDecl>) -> Self {
        self.providers.push(provider.into());
        self
    }

    pub fn class<T: 'static>(self) -> Self {
        self.provider(TypeKey::of::<T>())
    }

    pub fn controller<C: 'static>(mut self) -> Self {
        self.controllers.push(TypeKey::of::<C>());
        self
    }

    pub fn shared_provider(mut self, provider: impl Into<ProviderDecl>) -> Self {
        self.shared_providers.push(provider.into());
        self
    }
}

/// Arguments of a route decorator on a controller method.
#[derive(Clone)]
pub struct ActionMeta {
    /// `None` for error actions, which answer any method.
    pub method: Option<Method>,
    pub path: String,
    pub handler: ActionHandler,
}

impl fmt::Debug for ActionMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionMeta")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
