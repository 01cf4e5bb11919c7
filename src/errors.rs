use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types.
///
/// The first five variants are the run-level aborts a scan request can end
/// with before any streaming starts. Candidate-level failures never reach
/// this type's `IntoResponse`; the pipeline logs and drops them.
#[derive(Debug)]
pub enum AppError {
    /// No session could be resolved for the request.
    AuthRequired,
    /// The user has no pass, or the pass has expired.
    NoActivePass,
    /// The user's pass has no remaining leads.
    QuotaExhausted { used: i32, limit: i32 },
    /// Required request input is absent or blank.
    MissingInput(String),
    /// Request input is present but unusable.
    InvalidInput(String),
    /// Every acquisition provider failed or returned nothing.
    NoLeadsFound,
    /// Resource not found error.
    NotFound(String),
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::AuthRequired => write!(f, "Authentication required"),
            AppError::NoActivePass => write!(
                f,
                "No active day pass. Purchase a day pass to start scanning for leads"
            ),
            AppError::QuotaExhausted { used, limit } => write!(
                f,
                "Day pass lead limit reached ({}/{}). Purchase another pass to continue",
                used, limit
            ),
            AppError::MissingInput(msg) => write!(f, "Missing required fields: {}", msg),
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::NoLeadsFound => write!(f, "No leads found"),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl AppError {
    /// HTTP status for this error when returned synchronously.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthRequired => StatusCode::UNAUTHORIZED,
            AppError::NoActivePass | AppError::QuotaExhausted { .. } => StatusCode::FORBIDDEN,
            AppError::MissingInput(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NoLeadsFound | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::WithContext { source, .. } => source.status_code(),
        }
    }
}

impl IntoResponse for AppError {
    /// Maps each error to its status code and a `{"error": ...}` body.
    /// Server-side failures are logged and their details withheld.
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = match &self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                "Database error".to_string()
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            AppError::AuthRequired => {
                tracing::warn!("Rejected unauthenticated request");
                "Unauthorized".to_string()
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                return source.clone().into_response();
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

// Make AppError cloneable for WithContext variant
impl Clone for AppError {
    /// Clones the error.
    ///
    /// Note: `sqlx::Error` is not cloneable, so `DatabaseError` is simplified to `RowNotFound` during cloning.
    fn clone(&self) -> Self {
        match self {
            AppError::AuthRequired => AppError::AuthRequired,
            AppError::NoActivePass => AppError::NoActivePass,
            AppError::QuotaExhausted { used, limit } => AppError::QuotaExhausted {
                used: *used,
                limit: *limit,
            },
            AppError::MissingInput(msg) => AppError::MissingInput(msg.clone()),
            AppError::InvalidInput(msg) => AppError::InvalidInput(msg.clone()),
            AppError::NoLeadsFound => AppError::NoLeadsFound,
            AppError::NotFound(msg) => AppError::NotFound(msg.clone()),
            AppError::DatabaseError(_e) => AppError::DatabaseError(sqlx::Error::RowNotFound),
            AppError::InternalError(msg) => AppError::InternalError(msg.clone()),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: f(),
        })
    }
}
