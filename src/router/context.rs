use super::RouteParams;
use crate::di::{Injector, Instance};
use crate::error::{Result, WeaveError};
use crate::token::Token;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

/// The incoming request with its body fully read.
#[derive(Debug, Clone)]
pub struct ServerRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl ServerRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.body).map_err(|err| {
            WeaveError::http(StatusCode::BAD_REQUEST, format!("Body is not UTF-8: {}", err))
        })
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|err| {
            WeaveError::http(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {}", err))
        })
    }
}

#[derive(Debug, Default)]
struct ResponseParts {
    status: Option<StatusCode>,
    headers: HeaderMap,
}

/// Response status and headers, shared by everything serving one request.
#[derive(Debug, Clone, Default)]
pub struct ServerResponse {
    parts: Arc<Mutex<ResponseParts>>,
}

impl ServerResponse {
    pub fn set_status(&self, status: StatusCode) {
        self.lock().status = Some(status);
    }

    /// Status chosen by a handler, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.lock().status
    }

    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.lock().headers.insert(name, value);
    }

    pub fn insert_header(&self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| WeaveError::Handler(anyhow::Error::new(err)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| WeaveError::Handler(anyhow::Error::new(err)))?;
        self.set_header(name, value);
        Ok(())
    }

    pub fn headers(&self) -> HeaderMap {
        self.lock().headers.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ResponseParts> {
        self.parts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The route that matched a request.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub method: Method,
    /// Percent-decoded path.
    pub path: String,
    /// Percent-decoded path and query.
    pub url: String,
    pub params: RouteParams,
    pub pattern: String,
}

/// Everything a handler can reach while serving one request.
#[derive(Clone)]
pub struct RequestContext {
    injector: Arc<Injector>,
    request: Arc<ServerRequest>,
    response: ServerResponse,
    route: Arc<ResolvedRoute>,
    error: Option<Arc<WeaveError>>,
}

impl RequestContext {
    pub(crate) fn new(
        injector: Arc<Injector>,
        request: Arc<ServerRequest>,
        response: ServerResponse,
        route: Arc<ResolvedRoute>,
        error: Option<Arc<WeaveError>>,
    ) -> Self {
        Self {
            injector,
            request,
            response,
            route,
            error,
        }
    }

    /// The request-scoped injector.
    pub fn injector(&self) -> &Arc<Injector> {
        &self.injector
    }

    pub fn request(&self) -> &ServerRequest {
        &self.request
    }

    pub fn response(&self) -> &ServerResponse {
        &self.response
    }

    pub fn route(&self) -> &ResolvedRoute {
        &self.route
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.route.params.get(name)
    }

    /// The failure being handled; only set inside error routes.
    pub fn error(&self) -> Option<&WeaveError> {
        self.error.as_deref()
    }

    pub fn get(&self, token: &Token) -> Result<Instance> {
        self.injector.get(token)
    }

    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.injector.resolve::<T>()
    }
}

/// Body returned by a handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    body: Bytes,
    content_type: Option<&'static str>,
}

impl Payload {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(body: impl Into<Bytes>, content_type: &'static str) -> Self {
        Self {
            body: body.into(),
            content_type: Some(content_type),
        }
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value).map_err(anyhow::Error::from)?;
        Ok(Self::new(body, "application/json"))
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn content_type(&self) -> Option<&'static str> {
        self.content_type
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub(crate) fn content_type_header(&self) -> Option<(HeaderName, HeaderValue)> {
        let value = HeaderValue::from_str(self.content_type?).ok()?;
        Some((header::CONTENT_TYPE, value))
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::new(text, "text/plain; charset=utf-8")
    }
}

impl From<&'static str> for Payload {
    fn from(text: &'static str) -> Self {
        Self::new(text, "text/plain; charset=utf-8")
    }
}

impl From<Bytes> for Payload {
    fn from(body: Bytes) -> Self {
        Self::new(body, "application/octet-stream")
    }
}

impl From<Vec<u8>> for Payload {
    fn from(body: Vec<u8>) -> Self {
        Self::new(body, "application/octet-stream")
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value.to_string(), "application/json")
    }
}
