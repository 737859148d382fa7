use crate::users::UsersModule;
use serde_json::json;
use weave::prelude::*;

pub struct AppController;

pub struct AppModule;

/// Greeting shared by every module.
pub struct Banner(pub String);

pub fn register() {
    Class::<AppController>::new()
        .controller(ControllerOptions::new("/"))
        .constructor(|_| Ok(AppController))
        .get("/", "index", |_this: Arc<AppController>, cx: RequestContext| async move {
            let banner = cx.resolve::<Banner>()?;
            Ok(banner.0.clone())
        })
        .on_error("(.*)", "error", |_this: Arc<AppController>, cx: RequestContext| async move {
            let status = cx
                .response()
                .status()
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let message = cx
                .error()
                .map(ToString::to_string)
                .unwrap_or_else(|| "Unknown error".to_string());
            tracing::warn!(path = %cx.route().path, %status, %message, "Request failed");
            Ok(json!({
                "status": status.as_u16(),
                "message": message,
                "path": cx.route().path,
            }))
        })
        .register();

    Class::<AppModule>::new()
        .root_module(
            ModuleOptions::new()
                .import::<UsersModule>()
                .controller::<AppController>()
                .shared_provider(Provider::use_value(
                    Token::of::<Banner>(),
                    Banner("Hello from weave".to_string()),
                )),
        )
        .constructor(|_| Ok(AppModule))
        .register();
}
