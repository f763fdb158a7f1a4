//! Seckill Error Types
//!
//! One taxonomy for the whole sale path. Terminal business outcomes
//! (sold out, cap exceeded, ...) are memoized; transient system
//! errors (store, queue) are not, so clients can safely retry them.

use thiserror::Error;

/// Sale pipeline error types
///
/// Error codes are stable strings used in API responses and memoized
/// result blobs.
#[derive(Error, Debug, Clone)]
pub enum SeckillError {
    // === Validation ===
    #[error("Invalid quantity {0} (must be 1..=5)")]
    InvalidQuantity(i64),

    #[error("Missing request id")]
    MissingRequestId,

    // === Business outcomes ===
    #[error("Activity sold out")]
    SoldOut,

    #[error("Insufficient stock (remaining {0})")]
    InsufficientStock(i64),

    #[error("Purchase limit exceeded")]
    PurchaseLimitExceeded,

    #[error("Rate limited on {0} dimension")]
    RateLimited(&'static str),

    #[error("Activity not found: {0}")]
    ActivityNotFound(i64),

    #[error("Activity is not running")]
    ActivityNotRunning,

    #[error("Activity not open to this user yet")]
    NotInGrayRange,

    #[error("User is not eligible for this activity")]
    NotEligible,

    // === System ===
    #[error("Service busy, retry later")]
    BreakerOpen,

    #[error("Hot store error: {0}")]
    Store(String),

    #[error("Queue publish failed: {0}")]
    QueuePublish(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Result not found")]
    ResultNotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SeckillError {
    /// Stable error code for API responses and memoized blobs
    pub fn code(&self) -> &'static str {
        match self {
            SeckillError::InvalidQuantity(_) => "INVALID_QUANTITY",
            SeckillError::MissingRequestId => "MISSING_REQUEST_ID",
            SeckillError::SoldOut => "SOLD_OUT",
            SeckillError::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            SeckillError::PurchaseLimitExceeded => "PURCHASE_LIMIT_EXCEEDED",
            SeckillError::RateLimited(_) => "RATE_LIMITED",
            SeckillError::ActivityNotFound(_) => "ACTIVITY_NOT_FOUND",
            SeckillError::ActivityNotRunning => "ACTIVITY_NOT_RUNNING",
            SeckillError::NotInGrayRange => "NOT_IN_GRAY_RANGE",
            SeckillError::NotEligible => "NOT_ELIGIBLE",
            SeckillError::BreakerOpen => "BREAKER_OPEN",
            SeckillError::Store(_) => "STORE_ERROR",
            SeckillError::QueuePublish(_) => "QUEUE_PUBLISH_FAILED",
            SeckillError::Database(_) => "DATABASE_ERROR",
            SeckillError::ResultNotFound => "RESULT_NOT_FOUND",
            SeckillError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            SeckillError::InvalidQuantity(_) | SeckillError::MissingRequestId => 400,
            SeckillError::SoldOut
            | SeckillError::InsufficientStock(_)
            | SeckillError::PurchaseLimitExceeded
            | SeckillError::NotInGrayRange
            | SeckillError::NotEligible
            | SeckillError::ActivityNotRunning => 200,
            SeckillError::ActivityNotFound(_) | SeckillError::ResultNotFound => 404,
            SeckillError::RateLimited(_) => 429,
            SeckillError::BreakerOpen => 503,
            SeckillError::Store(_)
            | SeckillError::QueuePublish(_)
            | SeckillError::Database(_)
            | SeckillError::Internal(_) => 500,
        }
    }
}

impl From<crate::store::StoreError> for SeckillError {
    fn from(e: crate::store::StoreError) -> Self {
        SeckillError::Store(e.to_string())
    }
}

impl From<sqlx::Error> for SeckillError {
    fn from(e: sqlx::Error) -> Self {
        SeckillError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for SeckillError {
    fn from(e: serde_json::Error) -> Self {
        SeckillError::Internal(format!("serialization: {}", e))
    }
}
