use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WeaveError>;

/// Broad classification of a [`WeaveError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ErrorKind {
    Configuration,
    Resolution,
    Routing,
    Handler,
    Transport,
}

#[derive(Debug, Error)]
pub enum WeaveError {
    #[error("Provider {token} is already defined, cannot set {value}")]
    DuplicateProvider { token: String, value: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("No provider for {token}, requested by {requested_by}")]
    DependencyNotFound { token: String, requested_by: String },

    #[error("Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    #[error("Injector {injector} is destroyed")]
    InjectorDestroyed { injector: String },

    #[error("Failed to downcast {token} to {type_name}")]
    DowncastFailed { token: String, type_name: String },

    #[error("{token} needs an async injector")]
    AsyncRequired { token: String },

    #[error("No constructor registered for {class}")]
    ConstructorMissing { class: String },

    #[error("No route found: {method} {url}")]
    NoRouteFound { method: String, url: String },

    #[error("{message}")]
    Http { status: StatusCode, message: String },

    #[error(transparent)]
    Handler(#[from] anyhow::Error),

    #[error("Transport error: {message}")]
    Transport { message: String },
}

impl WeaveError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateProvider { .. } | Self::Configuration { .. } => {
                ErrorKind::Configuration
            }
            Self::DependencyNotFound { .. }
            | Self::CircularDependency { .. }
            | Self::InjectorDestroyed { .. }
            | Self::DowncastFailed { .. }
            | Self::AsyncRequired { .. }
            | Self::ConstructorMissing { .. } => ErrorKind::Resolution,
            Self::NoRouteFound { .. } => ErrorKind::Routing,
            Self::Http { .. } | Self::Handler(_) => ErrorKind::Handler,
            Self::Transport { .. } => ErrorKind::Transport,
        }
    }

    /// Status code used when nothing else decided one.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoRouteFound { .. } => StatusCode::NOT_FOUND,
            Self::Http { status, .. } => *status,
            Self::Transport { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WeaveError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            Json(json!({
                "statusCode": status.as_u16(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        )
            .into_response()
    }
}
