use tracing_subscriber::EnvFilter;
use weave::prelude::*;

mod app;
mod users;

#[tokio::main]
async fn main() -> weave::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,weave=debug")),
        )
        .init();

    users::register();
    app::register();

    let config = ServerConfig::load()?;
    let modules =
        ModuleInjector::create_and_resolve_async(TypeKey::of::<app::AppModule>(), Vec::new()).await?;

    let router = Router::from_module(&modules)?
        .get("/health", |_cx: RequestContext| async { Ok("ok") })?;
    tracing::info!(routes = ?router.routes(), "Starting hello-server on {}", config.addr());

    weave::server::run(router, &config).await?;
    modules.destroy();
    Ok(())
}
