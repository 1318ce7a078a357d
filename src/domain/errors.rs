use rust_decimal::Decimal;
use thiserror::Error;

/// Reasons an admission decision can reject a start-bot request.
///
/// Rejection never mutates state: the caller sees the reason and the
/// user's account is exactly as it was before the request.
#[derive(Debug, Error, PartialEq)]
pub enum AdmissionRejected {
    #[error("Bot quota exceeded: {active} active bots, quota {quota}")]
    QuotaExceeded { active: usize, quota: usize },

    #[error("Insufficient balance: requested ${requested}, free ${free}")]
    InsufficientBalance { requested: Decimal, free: Decimal },

    #[error("Invalid allocation: ${requested} (must be > 0)")]
    InvalidAllocation { requested: Decimal },
}

/// Exchange-side or transport-side dispatch failure.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Order rejected by exchange: {reason}")]
    Rejected { reason: String },

    #[error("Dispatch failed: {reason}")]
    Transport { reason: String },
}

/// Violations of internal invariants. Fatal to the single operation,
/// never allowed to corrupt other users' or other bots' state.
#[derive(Debug, Error)]
pub enum InvariantViolation {
    #[error("Invalid bot status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Unknown user: {user_id}")]
    UnknownUser { user_id: String },

    #[error("Unknown bot: {bot_id}")]
    UnknownBot { bot_id: String },

    #[error("Capital ledger mismatch for {user_id}: allocated ${allocated}, free ${free}")]
    LedgerMismatch {
        user_id: String,
        allocated: Decimal,
        free: Decimal,
    },

    #[error("Running bot {bot_id} has no entry price")]
    MissingEntryPrice { bot_id: String },

    #[error("Non-positive price {price} for {symbol}")]
    NonPositivePrice { symbol: String, price: f64 },
}

/// Precondition failures in the risk math. These are caller programming
/// errors, reported before any nonsensical numeric result is produced.
#[derive(Debug, Error, PartialEq)]
pub enum RiskError {
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },
}

/// Top-level error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Admission(#[from] AdmissionRejected),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}
