//! Router
//!
//! Routes are tried in registration order; the first one whose method and
//! pattern match handles the request. Every request gets a short-lived
//! injector holding the [`ServerRequest`], [`ServerResponse`] and
//! [`ResolvedRoute`], destroyed once the handler returns.
//!
//! When a handler fails (or nothing matches) the first error route whose
//! pattern matches the path runs with the failure available under
//! `Token::of::<WeaveError>()`. Without one, the error goes back to the
//! transport.

mod context;
mod handler;
mod pattern;

pub use context::{Payload, RequestContext, ResolvedRoute, ServerRequest, ServerResponse};
pub use handler::{ActionHandler, Handler};
pub use pattern::{RouteParams, RoutePattern};

use crate::di::{Injector, Instance, Provider, ProviderDecl, shift_left, verify_providers};
use crate::error::{Result, WeaveError};
use crate::metadata::{
    ActionMeta, Controller, ControllerOptions, Decorator, DecoratorType, store,
};
use crate::module::ModuleInjector;
use crate::token::{Token, TypeKey};
use axum::body::{Body, Bytes};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use percent_encoding::percent_decode_str;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Default request body limit, 2 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

enum Target {
    Handler(Arc<dyn Handler>),
    Action {
        module: Arc<Injector>,
        controller: TypeKey,
        providers: Vec<Provider>,
        handler: ActionHandler,
    },
}

struct Route {
    /// `None` answers any method.
    method: Option<Method>,
    pattern: RoutePattern,
    target: Target,
}

impl Route {
    fn describe(&self) -> String {
        let method = self
            .method
            .as_ref()
            .map(Method::to_string)
            .unwrap_or_else(|| "*".to_string());
        format!("{} {}", method, self.pattern.as_str())
    }
}

pub struct Router {
    routes: Vec<Route>,
    error_routes: Vec<Route>,
    providers: Vec<Provider>,
    base: Option<Arc<Injector>>,
    modules: Option<Arc<ModuleInjector>>,
    body_limit: usize,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.iter().map(Route::describe).collect::<Vec<_>>())
            .field(
                "error_routes",
                &self.error_routes.iter().map(Route::describe).collect::<Vec<_>>(),
            )
            .field("body_limit", &self.body_limit)
            .finish_non_exhaustive()
    }
}

macro_rules! verb {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            pub fn $name<F, Fut, R>(self, pattern: &str, handler: F) -> Result<Self>
            where
                F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
                Fut: Future<Output = Result<R>> + Send + 'static,
                R: Into<Payload> + Send + 'static,
            {
                self.route(Method::$method, pattern, handler)
            }
        )*
    };
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            error_routes: Vec::new(),
            providers: Vec::new(),
            base: None,
            modules: None,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Register every controller action of every loaded module.
    ///
    /// Closure routes added later run against the root module's injector.
    pub fn from_module(modules: &Arc<ModuleInjector>) -> Result<Self> {
        let mut router = Self::new();
        router.base = modules.get_injector(modules.root()).cloned();
        router.modules = Some(modules.clone());

        for module in modules.modules() {
            for controller in &module.options().controllers {
                let options = store()
                    .get_class_metadata(*controller, Controller::ID)
                    .and_then(|entry| entry.args.get::<ControllerOptions>().cloned())
                    .ok_or_else(|| {
                        WeaveError::configuration(format!(
                            "{} is not registered with @Controller",
                            controller
                        ))
                    })?;
                let providers = verify_providers(options.providers.clone());

                for entry in store().get_all_metadata_for_target(*controller) {
                    if entry.decorator_type != DecoratorType::Method {
                        continue;
                    }
                    let Some(action) = entry.args.get::<ActionMeta>() else {
                        continue;
                    };
                    let path = join_paths(&options.path, &action.path);
                    let route = Route {
                        method: action.method.clone(),
                        pattern: RoutePattern::compile(&path)?,
                        target: Target::Action {
                            module: module.injector().clone(),
                            controller: *controller,
                            providers: providers.clone(),
                            handler: action.handler.clone(),
                        },
                    };
                    tracing::info!(
                        controller = %controller,
                        action = %entry.property_key,
                        route = %route.describe(),
                        "Mapped route"
                    );
                    if route.method.is_some() {
                        router.routes.push(route);
                    } else {
                        router.error_routes.push(route);
                    }
                }
            }
        }
        Ok(router)
    }

    /// Injector closure routes run against (as the parent of their request
    /// injector).
    pub fn with_injector(mut self, injector: Arc<Injector>) -> Self {
        self.base = Some(injector);
        self
    }

    /// Providers added to every request injector.
    pub fn with_providers<I>(mut self, providers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ProviderDecl>,
    {
        self.providers.extend(verify_providers(providers));
        self
    }

    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn route<F, Fut, R>(self, method: Method, pattern: &str, handler: F) -> Result<Self>
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<Payload> + Send + 'static,
    {
        self.push(Some(method), pattern, Arc::new(handler), false)
    }

    verb! {
        get => GET,
        post => POST,
        put => PUT,
        delete => DELETE,
        patch => PATCH,
        head => HEAD,
        options => OPTIONS,
        trace => TRACE,
        connect => CONNECT,
    }

    /// Route answering every method.
    pub fn any<F, Fut, R>(self, pattern: &str, handler: F) -> Result<Self>
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<Payload> + Send + 'static,
    {
        self.push(None, pattern, Arc::new(handler), false)
    }

    /// Error route for failures on paths matching `pattern`.
    pub fn on_error<F, Fut, R>(self, pattern: &str, handler: F) -> Result<Self>
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<Payload> + Send + 'static,
    {
        self.push(None, pattern, Arc::new(handler), true)
    }

    /// Register a [`Handler`] implementation; `None` answers every method.
    pub fn handler<H: Handler>(self, method: Option<Method>, pattern: &str, handler: H) -> Result<Self> {
        self.push(method, pattern, Arc::new(handler), false)
    }

    pub fn error_handler<H: Handler>(self, pattern: &str, handler: H) -> Result<Self> {
        self.push(None, pattern, Arc::new(handler), true)
    }

    fn push(
        mut self,
        method: Option<Method>,
        pattern: &str,
        handler: Arc<dyn Handler>,
        error: bool,
    ) -> Result<Self> {
        let route = Route {
            method,
            pattern: RoutePattern::compile(pattern)?,
            target: Target::Handler(handler),
        };
        tracing::debug!(route = %route.describe(), error, "Route added");
        if error {
            self.error_routes.push(route);
        } else {
            self.routes.push(route);
        }
        Ok(self)
    }

    /// Registered routes as `METHOD pattern`, error routes last.
    pub fn routes(&self) -> Vec<String> {
        self.routes
            .iter()
            .chain(self.error_routes.iter())
            .map(Route::describe)
            .collect()
    }

    pub fn modules(&self) -> Option<&Arc<ModuleInjector>> {
        self.modules.as_ref()
    }

    /// Serve one request.
    pub async fn handle(&self, request: Request<Body>) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let (body, unread) = match read_body(body, self.body_limit).await {
            Ok(body) => (body, None),
            Err(err) => (Bytes::new(), Some(err)),
        };
        let request = Arc::new(ServerRequest::new(parts.method, parts.uri, parts.headers, body));
        let response = ServerResponse::default();

        let path = decode(request.uri().path());
        let url = request
            .uri()
            .path_and_query()
            .map(|pq| decode(pq.as_str()))
            .unwrap_or_else(|| path.clone());

        tracing::debug!(method = %request.method(), path = %path, "Dispatching request");
        let outcome = match unread {
            Some(err) => Err(err),
            None => self.dispatch(&request, &response, &path, &url).await,
        };
        match outcome {
            Ok(payload) => Ok(render(payload, &response, StatusCode::OK)),
            Err(err) => self.recover(err, &request, &response, &path, &url).await,
        }
    }

    async fn dispatch(
        &self,
        request: &Arc<ServerRequest>,
        response: &ServerResponse,
        path: &str,
        url: &str,
    ) -> Result<Payload> {
        let method = request.method();
        let matched = self.routes.iter().find_map(|route| {
            let method_matches = route.method.as_ref().is_none_or(|m| m == method);
            if !method_matches {
                return None;
            }
            route.pattern.matches(path).map(|params| (route, params))
        });
        let Some((route, params)) = matched else {
            return Err(WeaveError::NoRouteFound {
                method: method.to_string(),
                url: url.to_string(),
            });
        };

        let resolved = ResolvedRoute {
            method: method.clone(),
            path: path.to_string(),
            url: url.to_string(),
            params,
            pattern: route.pattern.as_str().to_string(),
        };
        self.invoke(route, request, response, resolved, None).await
    }

    async fn recover(
        &self,
        err: WeaveError,
        request: &Arc<ServerRequest>,
        response: &ServerResponse,
        path: &str,
        url: &str,
    ) -> Result<Response> {
        let status = response.status().unwrap_or_else(|| err.status_code());
        let matched = self
            .error_routes
            .iter()
            .find_map(|route| route.pattern.matches(path).map(|params| (route, params)));
        let Some((route, params)) = matched else {
            tracing::warn!(path = %path, status = %status, error = %err, "Unhandled request error");
            return Err(err);
        };

        tracing::debug!(
            path = %path,
            route = %route.describe(),
            error = %err,
            "Routing to error handler"
        );
        response.set_status(status);
        let resolved = ResolvedRoute {
            method: request.method().clone(),
            path: path.to_string(),
            url: url.to_string(),
            params,
            pattern: route.pattern.as_str().to_string(),
        };
        match self
            .invoke(route, request, response, resolved, Some(Arc::new(err)))
            .await
        {
            Ok(payload) => Ok(render(payload, response, status)),
            Err(second) => {
                tracing::error!(path = %path, error = %second, "Error handler failed");
                Err(second)
            }
        }
    }

    async fn invoke(
        &self,
        route: &Route,
        request: &Arc<ServerRequest>,
        response: &ServerResponse,
        resolved: ResolvedRoute,
        error: Option<Arc<WeaveError>>,
    ) -> Result<Payload> {
        let route_info = Arc::new(resolved);
        let mut scoped = vec![
            Provider::use_instance(Token::of::<ServerRequest>(), Instance::from_arc(request.clone())),
            Provider::use_value(Token::of::<ServerResponse>(), response.clone()),
            Provider::use_instance(Token::of::<ResolvedRoute>(), Instance::from_arc(route_info.clone())),
        ];
        if let Some(error) = &error {
            scoped.push(Provider::use_instance(
                Token::of::<WeaveError>(),
                Instance::from_arc(error.clone()),
            ));
        }
        scoped = shift_left(&scoped, &self.providers);

        match &route.target {
            Target::Handler(handler) => {
                let injector = match &self.base {
                    Some(base) => {
                        Injector::create_and_resolve_child_async(base, request_token(), scoped).await?
                    }
                    None => Injector::create_and_resolve_async(request_token(), scoped).await?,
                };
                let cx = RequestContext::new(
                    injector.clone(),
                    request.clone(),
                    response.clone(),
                    route_info,
                    error,
                );
                let result = handler.call(cx).await;
                injector.destroy();
                result
            }
            Target::Action {
                module,
                controller,
                providers,
                handler,
            } => {
                let scoped = shift_left(&scoped, providers);
                let injector =
                    Injector::create_and_resolve_child_async(module, *controller, scoped).await?;
                let instance = match injector.get(&Token::Type(*controller)) {
                    Ok(instance) => instance,
                    Err(err) => {
                        injector.destroy();
                        return Err(err);
                    }
                };
                let cx = RequestContext::new(
                    injector.clone(),
                    request.clone(),
                    response.clone(),
                    route_info,
                    error,
                );
                let result = handler(instance, cx).await;
                injector.destroy();
                result
            }
        }
    }

    /// Plain HTTP adapter: every request goes through [`Router::handle`].
    pub fn pipe(self) -> axum::Router {
        let router = Arc::new(self);
        axum::Router::new().fallback(move |request: Request<Body>| {
            let router = router.clone();
            async move {
                match router.handle(request).await {
                    Ok(response) => response,
                    Err(err) => err.into_response(),
                }
            }
        })
    }
}

/// Collect the body, failing with 413 once it grows past `limit` bytes.
async fn read_body(body: Body, limit: usize) -> Result<Bytes> {
    let mut stream = body.into_data_stream();
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| {
            WeaveError::transport(format!("Failed to read request body: {}", err))
        })?;
        if buffer.len() + chunk.len() > limit {
            return Err(WeaveError::http(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("Request body exceeds {} bytes", limit),
            ));
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buffer))
}

fn request_token() -> Token {
    Token::name("request")
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// `"/users"` + `"/<id>"` is `"/users/<id>"`; an empty or `"/"` action path
/// maps to the controller path itself.
fn join_paths(controller: &str, action: &str) -> String {
    let base = controller.trim_end_matches('/');
    let action = action.trim_start_matches('/');
    match (base.is_empty(), action.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{}", action),
        (false, true) => ensure_leading_slash(base),
        (false, false) => format!("{}/{}", ensure_leading_slash(base), action),
    }
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

fn render(payload: Payload, response: &ServerResponse, default_status: StatusCode) -> Response {
    let status = response.status().unwrap_or(default_status);
    let mut headers = response.headers();
    if let Some((name, value)) = payload.content_type_header() {
        headers.entry(name).or_insert(value);
    }
    (status, headers, Body::from(payload.into_body())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths("/users", "/<id>"), "/users/<id>");
        assert_eq!(join_paths("/users/", "list"), "/users/list");
        assert_eq!(join_paths("users", "/"), "/users");
        assert_eq!(join_paths("", ""), "/");
        assert_eq!(join_paths("/", "/home/(.*)"), "/home/(.*)");
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode("/home/hello%20world"), "/home/hello world");
        assert_eq!(decode("/plain"), "/plain");
    }

    #[tokio::test]
    async fn test_handle_without_match_is_not_found() {
        let router = Router::new()
            .get("/", |_cx: RequestContext| async { Ok("root") })
            .unwrap();
        let request = Request::builder()
            .uri("/missing%20page?x=1")
            .body(Body::empty())
            .unwrap();
        let err = router.handle(request).await.unwrap_err();
        assert_eq!(err.to_string(), "No route found: GET /missing page?x=1");
    }

    #[tokio::test]
    async fn test_oversized_body_reaches_error_route_as_payload_too_large() {
        let router = Router::new()
            .body_limit(4)
            .post("/upload", |cx: RequestContext| async move {
                Ok(format!("{} bytes", cx.request().body().len()))
            })
            .unwrap()
            .on_error("/(.*)", |cx: RequestContext| async move {
                Ok(cx.error().map(ToString::to_string).unwrap_or_default())
            })
            .unwrap();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .body(Body::from("too long"))
            .unwrap();
        let response = router.handle(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"Request body exceeds 4 bytes");

        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .body(Body::from("tiny"))
            .unwrap();
        let response = router.handle(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_request_injector_carries_route() {
        let router = Router::new()
            .with_providers(vec![Provider::use_value("greeting", "hello")])
            .get("/greet/<name>", |cx: RequestContext| async move {
                let greeting = cx.injector().get_as::<&str>(&Token::name("greeting"))?;
                let route = cx.resolve::<ResolvedRoute>()?;
                Ok(format!("{} {}", greeting, route.params.get("name").unwrap_or("?")))
            })
            .unwrap();
        let request = Request::builder()
            .uri("/greet/ana")
            .body(Body::empty())
            .unwrap();
        let response = router.handle(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"hello ana");
    }
}
