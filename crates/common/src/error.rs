use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy surfaced by the core. These are kinds, not
/// one-per-call-site type names: every crate in the workspace maps its own
/// failures onto this enum at its public boundary.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("wallet not found for address {0}")]
    WalletNotFound(String),

    #[error("idempotency key conflict: stored payload differs from request")]
    ConflictingIdempotencyKey,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("adapter transient error: {0}")]
    AdapterTransient(String),

    #[error("rpc failure: {0}")]
    RpcFailure(String),

    #[error("permanent adapter error: {0}")]
    PermanentAdapter(String),

    #[error("invalid balance: debits and credits do not match ({debits} != {credits})")]
    InvalidBalance { debits: String, credits: String },

    #[error("unknown account: {0}")]
    UnknownAccount(String),
}

impl CoreError {
    /// Whether retrying the operation that produced this error has any
    /// chance of succeeding without external intervention. Callers that need
    /// the job-queue's four-way classification (transient / rpc_failure /
    /// permanent / unknown) should prefer [`ErrorType::classify`], which
    /// additionally inspects the error message for adapter errors that
    /// carry no machine-readable code — this method handles the typed case.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            CoreError::Validation(_)
                | CoreError::NotFound(_)
                | CoreError::LimitExceeded(_)
                | CoreError::PermanentAdapter(_)
                | CoreError::InvalidTransition { .. }
                | CoreError::InvalidBalance { .. }
                | CoreError::UnknownAccount(_)
        ) && !matches!(self, CoreError::WalletNotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::StorageUnavailable(_)
                | CoreError::AdapterTransient(_)
                | CoreError::RpcFailure(_)
                | CoreError::WalletNotFound(_)
        )
    }
}

/// The four-way bucket persisted on a funding event job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Transient,
    RpcFailure,
    Permanent,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Transient => "transient",
            ErrorType::RpcFailure => "rpc_failure",
            ErrorType::Permanent => "permanent",
            ErrorType::Unknown => "unknown",
        }
    }

    /// Typed-first classification for a job-processing failure: known
    /// [`CoreError`] variants map directly, and the handful of
    /// free-text variants fall back to [`ErrorType::classify_message`].
    pub fn classify(err: &CoreError) -> ErrorType {
        match err {
            CoreError::RpcFailure(_) => ErrorType::RpcFailure,
            CoreError::AdapterTransient(_) | CoreError::StorageUnavailable(_) | CoreError::WalletNotFound(_) => {
                ErrorType::Transient
            }
            CoreError::PermanentAdapter(_)
            | CoreError::NotFound(_)
            | CoreError::LimitExceeded(_)
            | CoreError::InvalidTransition { .. }
            | CoreError::InvalidBalance { .. }
            | CoreError::UnknownAccount(_) => ErrorType::Permanent,
            // A validation failure is permanent by construction; the message
            // is only consulted for the more specific bucket (e.g. an
            // upstream RPC reason embedded in the rejection text).
            CoreError::Validation(message) => match Self::classify_message(message) {
                ErrorType::Unknown => ErrorType::Permanent,
                other => other,
            },
            CoreError::Conflict(message) => Self::classify_message(message),
            CoreError::ConflictingIdempotencyKey | CoreError::InsufficientBalance(_) => ErrorType::Unknown,
        }
    }

    /// Keyword fallback for error text that carries no machine-readable
    /// code, e.g. an adapter's validation-failure message embedding the
    /// reason a chain RPC gave for rejecting a deposit.
    pub fn classify_message(message: &str) -> ErrorType {
        let lower = message.to_lowercase();
        if lower.contains("wallet not found") {
            return ErrorType::Transient;
        }
        const TRANSIENT: &[&str] = &[
            "timeout",
            "connection",
            "network",
            "too many requests",
            " 429",
            " 408",
            " 500",
            " 502",
            " 503",
            " 504",
        ];
        if TRANSIENT.iter().any(|kw| lower.contains(kw)) {
            return ErrorType::Transient;
        }
        const RPC: &[&str] = &["rpc", "chain", "node", "provider"];
        if RPC.iter().any(|kw| lower.contains(kw)) {
            return ErrorType::RpcFailure;
        }
        const PERMANENT: &[&str] = &["validation", "malformed", "invalid", "not found"];
        if PERMANENT.iter().any(|kw| lower.contains(kw)) {
            return ErrorType::Permanent;
        }
        ErrorType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_not_found_is_transient_despite_the_word_not_found() {
        assert!(CoreError::WalletNotFound("0xdead".to_string()).is_transient());
        assert_eq!(ErrorType::classify(&CoreError::WalletNotFound("0xdead".to_string())), ErrorType::Transient);
    }

    #[test]
    fn typed_rpc_failure_classifies_as_rpc_failure() {
        assert_eq!(ErrorType::classify(&CoreError::RpcFailure("node unreachable".to_string())), ErrorType::RpcFailure);
    }

    #[test]
    fn validation_message_mentioning_an_rpc_reason_classifies_by_keyword() {
        let err = CoreError::Validation("invalid deposit: chain node rejected tx".to_string());
        assert_eq!(ErrorType::classify(&err), ErrorType::RpcFailure);
    }

    #[test]
    fn validation_with_no_keyword_match_defaults_permanent() {
        let err = CoreError::Validation("deposit amount 0.01 below minimum 1.00".to_string());
        assert_eq!(ErrorType::classify(&err), ErrorType::Permanent);
    }

    #[test]
    fn classify_message_keyword_table() {
        assert_eq!(ErrorType::classify_message("request timeout after 5s"), ErrorType::Transient);
        assert_eq!(ErrorType::classify_message("received HTTP 503 from upstream"), ErrorType::Transient);
        assert_eq!(ErrorType::classify_message("rpc node returned an error"), ErrorType::RpcFailure);
        assert_eq!(ErrorType::classify_message("malformed payload"), ErrorType::Permanent);
        assert_eq!(ErrorType::classify_message("something odd happened"), ErrorType::Unknown);
    }
}
