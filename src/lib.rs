//! # Weave
//!
//! Dependency injection and regex routing for axum services, organised in
//! modules the way NestJS-style frameworks do it.
//!
//! Classes are registered once at start-up with the [`Class`] builder, which
//! records the same metadata a decorator would: which classes are injectable,
//! what their constructors need, which methods answer which routes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use weave::prelude::*;
//!
//! struct Greeter;
//! struct HelloController {
//!     greeter: Arc<Greeter>,
//! }
//! struct AppModule;
//!
//! impl Greeter {
//!     fn greet(&self, name: &str) -> String {
//!         format!("Hello, {}!", name)
//!     }
//! }
//!
//! # async fn run() -> weave::Result<()> {
//! Class::<Greeter>::new()
//!     .injectable()
//!     .constructor(|_| Ok(Greeter))
//!     .register();
//!
//! Class::<HelloController>::new()
//!     .controller(ControllerOptions::new("/hello"))
//!     .param::<Greeter>()
//!     .constructor(|args| Ok(HelloController { greeter: args.param(0)? }))
//!     .get("/<name>", "greet", |this: Arc<HelloController>, cx: RequestContext| async move {
//!         Ok(this.greeter.greet(cx.param("name").unwrap_or("world")))
//!     })
//!     .register();
//!
//! Class::<AppModule>::new()
//!     .root_module(
//!         ModuleOptions::new()
//!             .class::<Greeter>()
//!             .controller::<HelloController>(),
//!     )
//!     .constructor(|_| Ok(AppModule))
//!     .register();
//!
//! let modules =
//!     ModuleInjector::create_and_resolve(TypeKey::of::<AppModule>(), Vec::<Provider>::new())?;
//! let router = Router::from_module(&modules)?;
//! weave::server::run(router, &ServerConfig::load()?).await
//! # }
//! ```

pub mod config;
pub mod di;
pub mod error;
pub mod metadata;
pub mod module;
pub mod router;
pub mod server;
pub mod token;

pub use config::ServerConfig;
pub use di::{Injector, Instance, Provider, ProviderDecl};
pub use error::{ErrorKind, Result, WeaveError};
pub use metadata::{Class, ControllerOptions, ModuleOptions};
pub use module::ModuleInjector;
pub use router::{Payload, RequestContext, Router};
pub use token::{Symbol, Token, TypeKey};

pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use weave::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigLoader, ServerConfig};
    pub use crate::di::{Injector, InjectorState, Instance, Provider, ProviderDecl};
    pub use crate::error::{ErrorKind, Result, WeaveError};
    pub use crate::metadata::{Arguments, Class, ControllerOptions, ModuleOptions};
    pub use crate::module::ModuleInjector;
    pub use crate::router::{
        Handler, Payload, RequestContext, ResolvedRoute, Router, ServerRequest, ServerResponse,
    };
    pub use crate::token::{Symbol, Token, TypeKey};
    pub use async_trait::async_trait;
    pub use axum::http::{Method, StatusCode};
    pub use std::sync::Arc;
}
