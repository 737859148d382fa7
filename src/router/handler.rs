use super::{Payload, RequestContext};
use crate::di::Instance;
use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// A controller method bound to its controller type; the instance is the
/// controller built for the current request.
pub type ActionHandler =
    Arc<dyn Fn(Instance, RequestContext) -> BoxFuture<'static, Result<Payload>> + Send + Sync>;

/// A route handler that is not bound to a controller.
///
/// Implemented for every `Fn(RequestContext) -> impl Future<Output = Result<R>>`
/// where `R: Into<Payload>`.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, cx: RequestContext) -> Result<Payload>;
}

#[async_trait]
impl<F, Fut, R> Handler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: Into<Payload> + Send + 'static,
{
    async fn call(&self, cx: RequestContext) -> Result<Payload> {
        (self)(cx).await.map(Into::into)
    }
}
