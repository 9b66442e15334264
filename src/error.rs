//! HTTP error responses
//!
//! Handlers return [`AppError`]. Client errors carry a message meant for the
//! user; internal errors are logged with their cause and the client only sees
//! a generic message.
//!
//! ```ignore
//! async fn handler(State(state): State<AppState>) -> Result<Json<Post>, AppError> {
//!     let post = state.posts.find_post(id).await?   // StoreError -> 500, logged
//!         .ok_or_else(|| AppError::not_found("Post not found"))?;
//!     Ok(Json(post))
//! }
//! ```

use std::fmt;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::auth::{AuthError, HashError, TokenError};
use crate::mail::MailError;
use crate::store::StoreError;
use crate::validation::ValidationError;

const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred";

// ============================================================================
// Error Types
// ============================================================================

/// Application error returned from handlers.
#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    /// User-facing message
    pub message: String,
    /// Offending input field, for validation failures
    pub field: Option<String>,
    /// Internal cause; logged, never sent
    pub details: Option<String>,
    /// Seconds until the client may retry
    pub retry_after: Option<u64>,
}

/// Error categories, one per response status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Validation,
    /// Account is temporarily locked
    Locked,
    RateLimited,
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Locked => StatusCode::LOCKED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Validation => "validation_error",
            Self::Locked => "account_locked",
            Self::RateLimited => "rate_limited",
            Self::Internal => "internal_error",
        })
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            field: None,
            details: None,
            retry_after: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn locked(message: impl Into<String>, retry_after: u64) -> Self {
        Self::new(ErrorKind::Locked, message).with_retry_after(retry_after)
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        Self::new(ErrorKind::RateLimited, "Rate limit exceeded").with_retry_after(retry_after)
    }

    /// Internal failure; `source` is logged, not returned.
    pub fn internal(message: impl Into<String>, source: impl fmt::Display) -> Self {
        Self {
            details: Some(source.to_string()),
            ..Self::new(ErrorKind::Internal, message)
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    fn log(&self) {
        let details = self.details.as_deref().unwrap_or("none");

        match self.kind {
            ErrorKind::Internal => {
                tracing::error!(
                    error_kind = %self.kind,
                    message = %self.message,
                    details = %details,
                    "Internal error"
                );
            }
            ErrorKind::Unauthorized | ErrorKind::Forbidden | ErrorKind::Locked => {
                tracing::warn!(
                    error_kind = %self.kind,
                    message = %self.message,
                    "Auth error"
                );
            }
            _ => {
                tracing::debug!(
                    error_kind = %self.kind,
                    message = %self.message,
                    "Client error"
                );
            }
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

// ============================================================================
// Error Response
// ============================================================================

/// JSON body of an error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();

        let message = match self.kind {
            ErrorKind::Internal => INTERNAL_ERROR_MESSAGE.to_string(),
            _ => self.message,
        };

        let body = ErrorResponse {
            error: self.kind.to_string(),
            message,
            field: self.field,
        };

        let mut response = (self.kind.status_code(), Json(body)).into_response();
        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError {
            field: err.field,
            ..AppError::new(ErrorKind::Validation, err.message)
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { field: "username" } => {
                AppError::conflict("That username is taken").with_field("username")
            }
            StoreError::Conflict { field: "email" } => {
                AppError::conflict("Please enter a unique Email Id").with_field("email")
            }
            StoreError::Conflict { field } => {
                AppError::conflict(format!("{field} already in use")).with_field(field)
            }
            StoreError::NotFound => AppError::not_found("Not found"),
            StoreError::Database(e) => AppError::internal("Database error", e),
        }
    }
}

impl From<HashError> for AppError {
    fn from(err: HashError) -> Self {
        AppError::internal("Password hashing failed", err)
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        AppError::internal("Token signing failed", err)
    }
}

impl From<MailError> for AppError {
    fn from(err: MailError) -> Self {
        AppError::internal("Mail delivery failed", err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Store(e) => e.into(),
            AuthError::Hash(e) => e.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
