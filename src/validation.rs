//! Request validation
//!
//! Request bodies implement [`Validate`] and are extracted with
//! [`ValidatedJson`], which rejects malformed JSON with 400 and failed
//! validation with 422 before the handler runs.
//!
//! # Example
//!
//! ```ignore
//! use quillpost::validation::{validate_email, validate_length, Validate, ValidationError};
//!
//! #[derive(Deserialize)]
//! struct UpdateAccount {
//!     username: String,
//!     email: String,
//! }
//!
//! impl Validate for UpdateAccount {
//!     fn validate(&self) -> Result<(), ValidationError> {
//!         validate_length(&self.username, 2, 50, "username")?;
//!         validate_email(&self.email)
//!     }
//! }
//! ```

use std::fmt;

use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// Validation error with field context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Field that failed validation (if applicable)
    pub field: Option<String>,
    /// Error code for programmatic handling
    pub code: ValidationErrorCode,
    /// Human-readable message
    pub message: String,
}

impl ValidationError {
    pub fn for_field(
        field: impl Into<String>,
        code: ValidationErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: Some(field.into()),
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}: {}", field, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validation error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorCode {
    /// Value is required but missing/empty
    Required,
    TooShort,
    TooLong,
    InvalidEmail,
    /// Value must equal another field
    Mismatch,
}

impl fmt::Display for ValidationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "required"),
            Self::TooShort => write!(f, "too_short"),
            Self::TooLong => write!(f, "too_long"),
            Self::InvalidEmail => write!(f, "invalid_email"),
            Self::Mismatch => write!(f, "mismatch"),
        }
    }
}

/// Implemented by request types checked on extraction.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;

    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

// ============================================================================
// Validators
// ============================================================================

/// Reject empty or whitespace-only values.
pub fn validate_required(value: &str, field: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::for_field(
            field,
            ValidationErrorCode::Required,
            "This field is required.",
        ));
    }
    Ok(())
}

/// Character count within `min..=max`.
pub fn validate_length(
    value: &str,
    min: usize,
    max: usize,
    field: &str,
) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len < min {
        return Err(ValidationError::for_field(
            field,
            ValidationErrorCode::TooShort,
            format!("Field must be between {min} and {max} characters long."),
        ));
    }
    if len > max {
        return Err(ValidationError::for_field(
            field,
            ValidationErrorCode::TooLong,
            format!("Field must be between {min} and {max} characters long."),
        ));
    }
    Ok(())
}

/// Pragmatic email shape check; does not prove deliverability.
pub fn validate_email(value: &str) -> Result<(), ValidationError> {
    let invalid = || {
        ValidationError::for_field(
            "email",
            ValidationErrorCode::InvalidEmail,
            "Invalid email address.",
        )
    };

    let (local, domain) = value.split_once('@').ok_or_else(invalid)?;

    if local.is_empty() || local.len() > 64 || domain.contains('@') {
        return Err(invalid());
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return Err(invalid());
    }
    if domain.is_empty() || domain.len() > 255 || !domain.contains('.') {
        return Err(invalid());
    }
    if domain.starts_with('.') || domain.ends_with('.') || domain.contains("..") {
        return Err(invalid());
    }
    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(invalid());
    }

    Ok(())
}

/// Confirmation fields must repeat the original exactly.
pub fn validate_matches(
    value: &str,
    other: &str,
    field: &str,
    other_field: &str,
) -> Result<(), ValidationError> {
    if value != other {
        return Err(ValidationError::for_field(
            field,
            ValidationErrorCode::Mismatch,
            format!("Field must be equal to {other_field}."),
        ));
    }
    Ok(())
}

// ============================================================================
// Extractor
// ============================================================================

/// JSON body that has passed [`Validate::validate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            tracing::debug!(error = %e, "JSON parsing failed");
            AppError::bad_request(e.body_text())
        })?;

        if let Err(error) = value.validate() {
            tracing::debug!(
                field = ?error.field,
                code = %error.code,
                "Validation failed"
            );
            return Err(error.into());
        }

        Ok(ValidatedJson(value))
    }
}
