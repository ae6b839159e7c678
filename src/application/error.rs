use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::BalanceBucket;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient {bucket} balance in wallet {wallet_id}: have {available}, need {required}")]
    InsufficientBalance {
        wallet_id: String,
        bucket: BalanceBucket,
        available: Decimal,
        required: Decimal,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Integrity check failed for {target}: {detail}")]
    Integrity { target: String, detail: String },

    #[error("Duplicate operation: {0}")]
    DuplicateOperation(String),

    #[error("No exchange rate available for {from} -> {to}")]
    RateNotFound { from: String, to: String },

    #[error("Wallet {0} is administratively frozen")]
    WalletFrozen(String),

    #[error("Concurrent modification of wallet {0}, retries exhausted")]
    Concurrency(String),

    #[error("Job {0} is already running")]
    AlreadyRunning(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound { kind, id: id.into() }
    }
}
