//! Error taxonomy for relay services.
//!
//! One variant per outcome a client or operator can be told apart from the
//! other: each maps to a stable code and an HTTP-ish status so every service
//! answers the same way regardless of transport.

use thiserror::Error;
use uuid::Uuid;

/// A taxonomy error, optionally carrying the org and correlation id it
/// occurred under so it can be echoed back to the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unauthenticated: {reason}")]
    Unauthenticated { reason: String },

    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("invalid: {reason}")]
    Invalid { reason: String },

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("quota exceeded: {quota}")]
    QuotaExceeded { quota: String },

    #[error("backpressure: {resource}")]
    Backpressure { resource: String },

    #[error("conflict: {reason}")]
    Conflict { reason: String },

    #[error("unavailable: {resource}")]
    Unavailable { resource: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("substrate error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("password hashing error: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// The stable taxonomy code surfaced to clients in error frames and
    /// HTTP responses — never a Rust type name or message fragment.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthenticated { .. } => "UNAUTHENTICATED",
            Error::Forbidden { .. } => "FORBIDDEN",
            Error::Invalid { .. } => "INVALID",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Error::Backpressure { .. } => "BACKPRESSURE",
            Error::Conflict { .. } => "CONFLICT",
            Error::Unavailable { .. } => "UNAVAILABLE",
            Error::Database(_) | Error::Redis(_) => "UNAVAILABLE",
            Error::InvalidToken(_) => "UNAUTHENTICATED",
            Error::PasswordHash(_) | Error::Json(_) | Error::Internal(_) => "INTERNAL",
        }
    }

    /// Whether this error alone should close the connection immediately, no
    /// retry budget. Repeated `Unauthenticated`/`InvalidToken` failures are
    /// handled separately, by the caller's own consecutive-failure counter
    /// (three in a row closes it) — neither variant closes on its own.
    pub fn closes_connection(&self) -> bool {
        false
    }
}

/// An error frame as sent back to a connected client, echoing its
/// correlation id when the caller supplied one.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorFrame {
    pub code: &'static str,
    pub message: String,
    pub correlation_id: Option<Uuid>,
}

impl Error {
    pub fn to_frame(&self, correlation_id: Option<Uuid>) -> ErrorFrame {
        ErrorFrame {
            code: self.code(),
            message: self.to_string(),
            correlation_id,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_does_not_close_connection() {
        let err = Error::Forbidden {
            reason: "cross-tenant channel".into(),
        };
        assert!(!err.closes_connection());
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[test]
    fn unauthenticated_does_not_close_connection_alone() {
        let err = Error::Unauthenticated {
            reason: "missing bearer token".into(),
        };
        assert!(!err.closes_connection());
    }

    #[test]
    fn database_maps_to_unavailable() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), "UNAVAILABLE");
    }
}
