//! Response envelope and error-to-status mapping.
//!
//! # Invariants
//! - Every handler returns exactly one of `data` or `error`.
//! - 5xx responses never leak internal error text to the caller.

use log::error;
use serde::Serialize;
use tiernote_core::{sanitize_message, CoreError};

const MAX_LOGGED_ERROR_CHARS: usize = 240;

/// Machine-readable failure details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    /// Stable error code, see `CoreError::code`.
    pub code: String,
    pub message: String,
    /// Tier limit, present for quota rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Usage before the rejected reservation, present for quota rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used: Option<u64>,
}

/// Status-coded response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: 200,
            data: Some(data),
            error: None,
        }
    }

    /// Maps a core error to its status and caller-safe message.
    pub fn failure(operation: &str, err: CoreError) -> Self {
        let status = status_for(&err);
        let (limit, used) = match &err {
            CoreError::QuotaExceeded(details) => (Some(details.limit), Some(details.used)),
            _ => (None, None),
        };
        let message = if status >= 500 {
            error!(
                "event=api_call module=api status=error operation={} http_status={} error_code={} error={}",
                operation,
                status,
                err.code(),
                sanitize_message(&err.to_string(), MAX_LOGGED_ERROR_CHARS)
            );
            generic_message(status).to_string()
        } else {
            err.to_string()
        };

        Self {
            status,
            data: None,
            error: Some(ApiError {
                code: err.code().to_string(),
                message,
                limit,
                used,
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub(crate) fn from_result(operation: &str, result: Result<T, CoreError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::failure(operation, err),
        }
    }
}

/// HTTP status for one core error class.
pub fn status_for(err: &CoreError) -> u16 {
    match err {
        CoreError::Validation(_) => 400,
        CoreError::QuotaExceeded(_)
        | CoreError::FeatureUnavailable { .. }
        | CoreError::TierUnknown(_) => 403,
        CoreError::NotFound { .. } => 404,
        CoreError::Conflict(_) => 409,
        CoreError::Unavailable(_) | CoreError::Blob(_) => 503,
        CoreError::Db(_) | CoreError::Internal(_) => 500,
    }
}

fn generic_message(status: u16) -> &'static str {
    if status == 503 {
        "service temporarily unavailable, retry later"
    } else {
        "internal error"
    }
}
