//! Error taxonomy.
//!
//! Message-content problems are never errors: handlers collect them into
//! reason strings and persist `status = "invalid: ..."`. The types here
//! cover everything else: composing doomed messages, integrity violations
//! that must halt processing, and base-chain transport failures that are
//! merely retryable.
use thiserror::Error;

/// Failures raised by the ledger core itself.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A debit/credit could not be applied (negative quantity, untracked
    /// asset, or balance would go negative).
    #[error("balance error: {0}")]
    Balance(String),

    /// Strict (compose-time) validation failed. Carries every problem so
    /// callers cannot construct a doomed transaction.
    #[error("cannot compose message: {}", problems.join("; "))]
    Compose {
        /// Human-readable reasons, in validation order.
        problems: Vec<String>,
    },

    /// Issued supply and held supply disagree for an asset. Fatal:
    /// processing must stop, recovery requires operator intervention
    /// (typically a reparse).
    #[error("conservation violated for {asset}: issued {issued}, held {held}")]
    Conservation {
        /// Asset whose books do not balance.
        asset: String,
        /// Total issued supply.
        issued: i64,
        /// Total currently held across balances and escrows.
        held: i64,
    },

    /// An internal invariant was broken. Fatal, like `Conservation`.
    #[error("integrity error: {0}")]
    Integrity(String),
}

/// Failures of the base-chain node dependency. Distinct from
/// [`LedgerError`] so callers can tell "try again later" from "your data
/// is wrong".
#[derive(Debug, Error)]
pub enum NodeError {
    /// Transport-level failure; retry with backoff.
    #[error("base chain node unreachable: {0}")]
    Unreachable(String),

    /// The node answered but is itself still syncing.
    #[error("base chain node is not synced")]
    NotSynced,
}
