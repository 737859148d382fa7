//! Dependency injection
//!
//! Providers describe how a token gets its value; an [`Injector`] turns a list
//! of providers into instances, resolving dependencies through its own
//! registry first and its parent chain second.

mod graph;
mod injector;
mod instance;
mod provider;
mod provider_list;

pub use injector::{Injector, InjectorState};
pub use instance::Instance;
pub use provider::{
    AsyncFactory, Factory, Provider, ProviderDecl, ProviderKind, SyncFactory, get_provider_name,
    shift_left, shift_right, verify_provider, verify_providers,
};
pub use provider_list::ProviderList;
