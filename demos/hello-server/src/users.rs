use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use weave::prelude::*;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub name: String,
}

#[derive(Default)]
pub struct UserRepository {
    users: RwLock<Vec<User>>,
}

impl UserRepository {
    fn all(&self) -> Vec<User> {
        self.users.read().map(|users| users.clone()).unwrap_or_default()
    }

    fn find(&self, id: u32) -> Option<User> {
        self.all().into_iter().find(|user| user.id == id)
    }

    fn insert(&self, name: String) -> Result<User> {
        let mut users = self
            .users
            .write()
            .map_err(|_| WeaveError::http(StatusCode::INTERNAL_SERVER_ERROR, "user store poisoned"))?;
        let user = User {
            id: users.len() as u32 + 1,
            name,
        };
        users.push(user.clone());
        Ok(user)
    }
}

pub struct UserService {
    repository: Arc<UserRepository>,
}

impl UserService {
    pub fn list(&self) -> Vec<User> {
        self.repository.all()
    }

    pub fn get(&self, id: u32) -> Result<User> {
        self.repository
            .find(id)
            .ok_or_else(|| WeaveError::http(StatusCode::NOT_FOUND, format!("User {} not found", id)))
    }

    pub fn create(&self, input: CreateUser) -> Result<User> {
        if input.name.trim().is_empty() {
            return Err(WeaveError::http(StatusCode::BAD_REQUEST, "name must not be empty"));
        }
        self.repository.insert(input.name)
    }
}

pub struct UserController {
    users: Arc<UserService>,
}

pub struct UsersModule;

pub fn register() {
    Class::<UserRepository>::new()
        .injectable()
        .constructor(|_| Ok(UserRepository::default()))
        .after_construct("log_ready", |_: &UserRepository| {
            tracing::info!("User repository ready");
            Ok(())
        })
        .register();

    Class::<UserService>::new()
        .injectable()
        .param::<UserRepository>()
        .constructor(|args| {
            Ok(UserService {
                repository: args.param(0)?,
            })
        })
        .register();

    Class::<UserController>::new()
        .controller(ControllerOptions::new("/users"))
        .param::<UserService>()
        .constructor(|args| {
            Ok(UserController {
                users: args.param(0)?,
            })
        })
        .get("/", "list", |this: Arc<UserController>, _cx: RequestContext| async move {
            Payload::json(&this.users.list())
        })
        .get("/<id:(\\d+)>", "get", |this: Arc<UserController>, cx: RequestContext| async move {
            let id = cx.route().params.parse::<u32>("id")?;
            Payload::json(&this.users.get(id)?)
        })
        .post("/", "create", |this: Arc<UserController>, cx: RequestContext| async move {
            let user = this.users.create(cx.request().json()?)?;
            cx.response().set_status(StatusCode::CREATED);
            Payload::json(&user)
        })
        .register();

    Class::<UsersModule>::new()
        .module(
            ModuleOptions::new()
                .class::<UserRepository>()
                .class::<UserService>()
                .controller::<UserController>()
                .export(Token::of::<UserService>()),
        )
        .constructor(|_| Ok(UsersModule))
        .register();
}
