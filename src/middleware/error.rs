use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Authentication errors for the middleware layer.
///
/// Login-pipeline failures are not here: they flow through the structured
/// JSON responses. This type only covers request-shape and configuration
/// problems.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request is missing or malforms a required parameter.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()).into_response(),
            Self::Config(_) => {
                tracing::error!(error = %self, "Auth configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}
