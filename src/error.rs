use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },
    #[error("Wallet {wallet_id} is frozen: {reason}")]
    WalletFrozen { wallet_id: Uuid, reason: String },
    #[error("KYC approval required (current status: {0})")]
    KycRequired(String),
    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Verification failed: {0}")]
    VerificationFailed(String),
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Routing error: {0}")]
    RoutingError(String),
    #[error("Payouts blocked: {0}")]
    PayoutsBlocked(String),
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(err: rocksdb::Error) -> Self {
        PaymentError::StorageError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;

impl PaymentError {
    /// HTTP-style status for the error class.
    pub fn status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError(_) => 400,
            PaymentError::Unauthorized(_) => 401,
            PaymentError::Forbidden(_)
            | PaymentError::KycRequired(_)
            | PaymentError::PayoutsBlocked(_) => 403,
            PaymentError::NotFound(_) => 404,
            PaymentError::Conflict(_) | PaymentError::ConcurrentModification(_) => 409,
            PaymentError::InsufficientBalance { .. } | PaymentError::RoutingError(_) => 422,
            PaymentError::WalletFrozen { .. } => 423,
            PaymentError::RateLimited(_) => 429,
            PaymentError::VerificationFailed(_) => 502,
            PaymentError::ProviderUnavailable(_) => 503,
            _ => 500,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::ValidationError(_) => "validation_error",
            PaymentError::Unauthorized(_) => "unauthorized",
            PaymentError::Forbidden(_) => "forbidden",
            PaymentError::NotFound(_) => "not_found",
            PaymentError::Conflict(_) => "conflict",
            PaymentError::InsufficientBalance { .. } => "insufficient_balance",
            PaymentError::WalletFrozen { .. } => "wallet_frozen",
            PaymentError::KycRequired(_) => "kyc_required",
            PaymentError::ProviderUnavailable(_) => "provider_unavailable",
            PaymentError::VerificationFailed(_) => "verification_failed",
            PaymentError::RateLimited(_) => "rate_limited",
            PaymentError::RoutingError(_) => "routing_error",
            PaymentError::PayoutsBlocked(_) => "payouts_blocked",
            PaymentError::ConcurrentModification(_) => "concurrent_modification",
            _ => "internal_error",
        }
    }

    /// Message safe to show an end user. Storage and provider internals never leak.
    pub fn public_message(&self) -> String {
        match self {
            PaymentError::ValidationError(msg) | PaymentError::RoutingError(msg) => msg.clone(),
            PaymentError::Unauthorized(_) => "Authentication required".to_string(),
            PaymentError::Forbidden(_) => "You are not allowed to perform this action".to_string(),
            PaymentError::NotFound(_) => "Resource not found".to_string(),
            PaymentError::Conflict(_) => "Request conflicts with current state".to_string(),
            PaymentError::InsufficientBalance { .. } => "Insufficient available balance".to_string(),
            PaymentError::WalletFrozen { .. } => "Wallet is frozen pending review".to_string(),
            PaymentError::KycRequired(_) => "Identity verification is required".to_string(),
            PaymentError::ProviderUnavailable(_) => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::VerificationFailed(_) => "Payment could not be verified".to_string(),
            PaymentError::RateLimited(_) => "Too many requests, try again later".to_string(),
            PaymentError::PayoutsBlocked(_) => "Payouts are currently unavailable".to_string(),
            PaymentError::ConcurrentModification(_) => "Please retry the request".to_string(),
            _ => "Internal error".to_string(),
        }
    }
}

/// Error body returned to callers of the exposed operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub code: String,
    pub message: String,
}

impl From<&PaymentError> for ErrorResponse {
    fn from(err: &PaymentError) -> Self {
        Self {
            status: err.status_code(),
            code: err.code().to_string(),
            message: err.public_message(),
        }
    }
}
