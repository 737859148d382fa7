//! Module injector
//!
//! Builds one injector per module reachable from a root module. All of them
//! are children of a single shared injector holding the root's
//! `shared_providers`, so shared singletons are built once.
//!
//! A module sees its own providers plus whatever its direct imports export.
//! Imports are processed depth first, so a module's injector is built after
//! the injectors of everything it imports.

use crate::di::{Injector, Instance, Provider, shift_left, verify_providers};
use crate::error::{Result, WeaveError};
use crate::metadata::{Controller, Decorator, Module, ModuleOptions, RootModule, store};
use crate::token::{Token, TypeKey};
use indexmap::IndexMap;
use std::sync::Arc;

/// A module after its injector was built.
#[derive(Debug)]
pub struct LoadedModule {
    key: TypeKey,
    options: ModuleOptions,
    injector: Arc<Injector>,
    exports: IndexMap<Token, Instance>,
}

impl LoadedModule {
    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn options(&self) -> &ModuleOptions {
        &self.options
    }

    pub fn injector(&self) -> &Arc<Injector> {
        &self.injector
    }

    /// Exported instances, visible to modules importing this one.
    pub fn exports(&self) -> &IndexMap<Token, Instance> {
        &self.exports
    }
}

#[derive(Debug)]
pub struct ModuleInjector {
    root: TypeKey,
    shared: Arc<Injector>,
    modules: IndexMap<TypeKey, LoadedModule>,
}

impl ModuleInjector {
    /// Resolve `root` and everything it imports.
    ///
    /// `shared_providers` are merged after the root's own shared providers;
    /// on a token clash the root's declaration wins.
    pub fn create_and_resolve<I>(root: TypeKey, shared_providers: I) -> Result<Arc<Self>>
    where
        I: IntoIterator,
        I::Item: Into<crate::di::ProviderDecl>,
    {
        let (root_options, plan) = plan(root)?;
        let shared = Injector::create_and_resolve(
            shared_token(),
            shared_list(&root_options, verify_providers(shared_providers)),
        )?;

        let mut modules = IndexMap::new();
        for (key, options) in plan {
            let providers = providers_or_abort(&shared, &modules, &options)?;
            let injector = match Injector::create_and_resolve_child(&shared, key, providers) {
                Ok(injector) => injector,
                Err(err) => return Err(abort(&shared, &modules, err)),
            };
            match seal(key, options, injector) {
                Ok(module) => modules.insert(key, module),
                Err(err) => return Err(abort(&shared, &modules, err)),
            };
        }
        Ok(Self::finish(root, shared, modules))
    }

    /// Like [`ModuleInjector::create_and_resolve`], with every injector
    /// resolved asynchronously.
    pub async fn create_and_resolve_async(
        root: TypeKey,
        shared_providers: Vec<Provider>,
    ) -> Result<Arc<Self>> {
        let (root_options, plan) = plan(root)?;
        let shared = Injector::create_and_resolve_async(
            shared_token(),
            shared_list(&root_options, shared_providers),
        )
        .await?;

        let mut modules = IndexMap::new();
        for (key, options) in plan {
            let providers = providers_or_abort(&shared, &modules, &options)?;
            let injector =
                match Injector::create_and_resolve_child_async(&shared, key, providers).await {
                    Ok(injector) => injector,
                    Err(err) => return Err(abort(&shared, &modules, err)),
                };
            match seal(key, options, injector) {
                Ok(module) => modules.insert(key, module),
                Err(err) => return Err(abort(&shared, &modules, err)),
            };
        }
        Ok(Self::finish(root, shared, modules))
    }

    fn finish(
        root: TypeKey,
        shared: Arc<Injector>,
        modules: IndexMap<TypeKey, LoadedModule>,
    ) -> Arc<Self> {
        tracing::info!(root = %root, modules = modules.len(), "Modules resolved");
        Arc::new(Self {
            root,
            shared,
            modules,
        })
    }

    pub fn root(&self) -> TypeKey {
        self.root
    }

    pub fn get_injector(&self, module: TypeKey) -> Option<&Arc<Injector>> {
        self.modules.get(&module).map(LoadedModule::injector)
    }

    pub fn get_metadata(&self, module: TypeKey) -> Option<&ModuleOptions> {
        self.modules.get(&module).map(LoadedModule::options)
    }

    /// Loaded modules, imports before importers; the root comes last.
    pub fn modules(&self) -> impl Iterator<Item = &LoadedModule> {
        self.modules.values()
    }

    pub fn shared_injector(&self) -> &Arc<Injector> {
        &self.shared
    }

    pub fn destroy(&self) {
        for module in self.modules.values().rev() {
            module.injector.destroy();
        }
        self.shared.destroy();
    }
}

fn shared_token() -> Token {
    Token::name("shared")
}

fn shared_list(root_options: &ModuleOptions, extra: Vec<Provider>) -> Vec<Provider> {
    shift_left(
        &verify_providers(root_options.shared_providers.clone()),
        &extra,
    )
}

fn abort(
    shared: &Injector,
    modules: &IndexMap<TypeKey, LoadedModule>,
    err: WeaveError,
) -> WeaveError {
    for module in modules.values() {
        module.injector.destroy();
    }
    shared.destroy();
    err
}

fn options_of(key: TypeKey, root: TypeKey) -> Result<ModuleOptions> {
    let id = if key == root { RootModule::ID } else { Module::ID };
    let entry = store().get_class_metadata(key, id).ok_or_else(|| {
        WeaveError::configuration(if key == root {
            format!("{} is not registered as a root module", key)
        } else {
            format!("{} is imported but is not registered as a module", key)
        })
    })?;
    entry.args.get::<ModuleOptions>().cloned().ok_or_else(|| {
        WeaveError::configuration(format!("{} {} carries no module options", key, id))
    })
}

/// Modules in build order, each after everything it imports.
fn plan(root: TypeKey) -> Result<(ModuleOptions, Vec<(TypeKey, ModuleOptions)>)> {
    let root_options = options_of(root, root)?;
    let mut planner = Planner {
        root,
        order: Vec::new(),
        stack: Vec::new(),
    };
    planner.visit(root, root_options.clone())?;
    Ok((root_options, planner.order))
}

struct Planner {
    root: TypeKey,
    order: Vec<(TypeKey, ModuleOptions)>,
    stack: Vec<TypeKey>,
}

impl Planner {
    fn visit(&mut self, key: TypeKey, options: ModuleOptions) -> Result<()> {
        self.stack.push(key);
        for import in &options.imports {
            if let Some(start) = self.stack.iter().position(|open| open == import) {
                let cycle = self.stack[start..]
                    .iter()
                    .chain(std::iter::once(import))
                    .map(TypeKey::to_string)
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(WeaveError::configuration(format!(
                    "Module import cycle: {}",
                    cycle
                )));
            }
            if self.order.iter().any(|(done, _)| done == import) {
                continue;
            }
            let imported = options_of(*import, self.root)?;
            self.visit(*import, imported)?;
        }
        self.stack.pop();

        for controller in &options.controllers {
            if !store().is_decorator_defined(*controller, Controller::ID) {
                return Err(WeaveError::configuration(format!(
                    "{} lists {} as a controller, but it is not registered with @Controller",
                    key, controller
                )));
            }
        }
        tracing::debug!(module = %key, imports = options.imports.len(), "Module planned");
        self.order.push((key, options));
        Ok(())
    }
}

/// Own providers, then the exports of each import and the import itself.
/// [`module_providers`], tearing down everything built so far on failure.
fn providers_or_abort(
    shared: &Injector,
    modules: &IndexMap<TypeKey, LoadedModule>,
    options: &ModuleOptions,
) -> Result<Vec<Provider>> {
    module_providers(options, modules).map_err(|err| abort(shared, modules, err))
}

fn module_providers(
    options: &ModuleOptions,
    loaded: &IndexMap<TypeKey, LoadedModule>,
) -> Result<Vec<Provider>> {
    let mut imported = Vec::new();
    for import in &options.imports {
        let module = loaded.get(import).ok_or_else(|| {
            WeaveError::configuration(format!("Module {} was not loaded", import))
        })?;
        let instance = module.injector.get(&Token::Type(*import))?;
        let visible = std::iter::once((Token::Type(*import), instance)).chain(
            module
                .exports
                .iter()
                .map(|(token, instance)| (token.clone(), instance.clone())),
        );
        for (token, instance) in visible {
            // the same instance may arrive through several imports
            if !imported.iter().any(|provider: &Provider| provider.provide == token) {
                imported.push(Provider::use_instance(token, instance));
            }
        }
    }
    Ok(shift_left(&verify_providers(options.providers.clone()), &imported))
}

fn seal(key: TypeKey, options: ModuleOptions, injector: Arc<Injector>) -> Result<LoadedModule> {
    let local = injector.tokens();
    let mut exports = IndexMap::new();
    for token in &options.exports {
        if !local.contains(token) {
            injector.destroy();
            return Err(WeaveError::configuration(format!(
                "{} exports {}, which it neither provides nor imports",
                key, token
            )));
        }
        exports.insert(token.clone(), injector.get(token)?);
    }
    Ok(LoadedModule {
        key,
        options,
        injector,
        exports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Class, ControllerOptions};

    struct Clock;
    struct Users;
    struct Audit;
    struct UsersModule;
    struct AuditModule;
    struct AppModule;

    fn register() {
        Class::<Clock>::new()
            .injectable()
            .constructor(|_| Ok(Clock))
            .register();
        Class::<Users>::new()
            .injectable()
            .param::<Clock>()
            .constructor(|_| Ok(Users))
            .register();
        Class::<Audit>::new()
            .injectable()
            .param::<Users>()
            .param::<Clock>()
            .constructor(|_| Ok(Audit))
            .register();
        Class::<UsersModule>::new()
            .module(ModuleOptions::new().class::<Users>().export(Token::of::<Users>()))
            .constructor(|_| Ok(UsersModule))
            .register();
        Class::<AuditModule>::new()
            .module(
                ModuleOptions::new()
                    .import::<UsersModule>()
                    .class::<Audit>()
                    .export(Token::of::<Audit>()),
            )
            .constructor(|_| Ok(AuditModule))
            .register();
        Class::<AppModule>::new()
            .root_module(
                ModuleOptions::new()
                    .import::<UsersModule>()
                    .import::<AuditModule>()
                    .shared_provider(TypeKey::of::<Clock>()),
            )
            .constructor(|_| Ok(AppModule))
            .register();
    }

    #[test]
    fn test_modules_share_exports_and_singletons() {
        register();
        let modules =
            ModuleInjector::create_and_resolve(TypeKey::of::<AppModule>(), Vec::<Provider>::new())
                .unwrap();

        let order: Vec<String> = modules.modules().map(|m| m.key().to_string()).collect();
        assert_eq!(order, vec!["UsersModule", "AuditModule", "AppModule"]);

        let users = modules.get_injector(TypeKey::of::<UsersModule>()).unwrap();
        let audit = modules.get_injector(TypeKey::of::<AuditModule>()).unwrap();
        let app = modules.get_injector(TypeKey::of::<AppModule>()).unwrap();
        assert!(Arc::ptr_eq(
            &users.resolve::<Users>().unwrap(),
            &audit.resolve::<Users>().unwrap()
        ));
        assert!(app.has(&Token::of::<Audit>()));
        // Audit is only visible where AuditModule is imported
        assert!(!users.has(&Token::of::<Audit>()));
        assert!(Arc::ptr_eq(
            &app.resolve::<Clock>().unwrap(),
            &modules.shared_injector().resolve::<Clock>().unwrap()
        ));
        assert!(Arc::ptr_eq(
            &users.resolve::<Clock>().unwrap(),
            &audit.resolve::<Clock>().unwrap()
        ));
        assert_eq!(
            modules
                .get_metadata(TypeKey::of::<AuditModule>())
                .map(|options| options.imports.len()),
            Some(1)
        );
    }

    #[test]
    fn test_failed_import_lookup_destroys_built_injectors() {
        register();
        let shared = Injector::create_and_resolve(shared_token(), Vec::<Provider>::new()).unwrap();
        let users_key = TypeKey::of::<UsersModule>();
        let users = Injector::create_and_resolve_child(
            &shared,
            users_key,
            vec![Provider::class::<Clock>(), Provider::class::<Users>()],
        )
        .unwrap();
        let users_options = options_of(users_key, TypeKey::of::<AppModule>()).unwrap();
        let mut modules = IndexMap::new();
        modules.insert(users_key, seal(users_key, users_options, users.clone()).unwrap());

        // the import can no longer hand out its module instance
        users.destroy();
        let audit_options = ModuleOptions::new().import::<UsersModule>();
        let err = providers_or_abort(&shared, &modules, &audit_options).unwrap_err();
        assert!(matches!(err, WeaveError::InjectorDestroyed { .. }));
        assert!(shared.is_destroyed());
    }

    #[test]
    fn test_root_must_be_a_root_module() {
        register();
        let err =
            ModuleInjector::create_and_resolve(TypeKey::of::<UsersModule>(), Vec::<Provider>::new())
                .unwrap_err();
        assert!(err.to_string().contains("root module"), "{}", err);
    }

    #[test]
    fn test_import_cycle_is_rejected() {
        struct Ping;
        struct Pong;
        struct Top;
        Class::<Ping>::new()
            .module(ModuleOptions::new().import::<Pong>())
            .constructor(|_| Ok(Ping))
            .register();
        Class::<Pong>::new()
            .module(ModuleOptions::new().import::<Ping>())
            .constructor(|_| Ok(Pong))
            .register();
        Class::<Top>::new()
            .root_module(ModuleOptions::new().import::<Ping>())
            .constructor(|_| Ok(Top))
            .register();

        let err = ModuleInjector::create_and_resolve(TypeKey::of::<Top>(), Vec::<Provider>::new())
            .unwrap_err();
        assert!(err.to_string().contains("Ping -> Pong -> Ping"), "{}", err);
    }

    #[test]
    fn test_unprovided_export_is_rejected() {
        struct Leaky;
        struct LeakyRoot;
        Class::<Leaky>::new()
            .module(ModuleOptions::new().export("nothing"))
            .constructor(|_| Ok(Leaky))
            .register();
        Class::<LeakyRoot>::new()
            .root_module(ModuleOptions::new().import::<Leaky>())
            .constructor(|_| Ok(LeakyRoot))
            .register();

        let err =
            ModuleInjector::create_and_resolve(TypeKey::of::<LeakyRoot>(), Vec::<Provider>::new())
                .unwrap_err();
        assert!(err.to_string().contains("exports nothing"), "{}", err);
    }

    #[test]
    fn test_controller_must_be_registered() {
        struct Plain;
        struct Routed;
        struct Site;
        Class::<Routed>::new()
            .controller(ControllerOptions::new("/routed"))
            .constructor(|_| Ok(Routed))
            .register();
        Class::<Site>::new()
            .root_module(ModuleOptions::new().controller::<Routed>().controller::<Plain>())
            .constructor(|_| Ok(Site))
            .register();

        let err = ModuleInjector::create_and_resolve(TypeKey::of::<Site>(), Vec::<Provider>::new())
            .unwrap_err();
        assert!(err.to_string().contains("Plain"), "{}", err);
    }

    #[tokio::test]
    async fn test_async_resolution_with_extra_shared_providers() {
        register();
        let modules = ModuleInjector::create_and_resolve_async(
            TypeKey::of::<AppModule>(),
            vec![Provider::use_async_factory("region", |_| async {
                Ok(String::from("eu"))
            })],
        )
        .await
        .unwrap();
        let app = modules.get_injector(TypeKey::of::<AppModule>()).unwrap();
        assert_eq!(
            app.get_as::<String>(&Token::name("region")).unwrap().as_str(),
            "eu"
        );

        modules.destroy();
        assert!(app.is_destroyed());
        assert!(modules.shared_injector().is_destroyed());
    }
}
