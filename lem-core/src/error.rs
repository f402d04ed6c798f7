//! Settlement error types.
//!
//! Only configuration errors surface here. Numeric degeneracies and
//! non-convergence are recovered inside the mechanisms and recorded in the
//! round diagnostics instead.

use thiserror::Error;

use crate::types::BidId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettleError {
    /// The requested residual mechanism is not in the registry.
    #[error("unknown residual mechanism `{0}`")]
    UnknownMechanism(String),

    /// A mechanism was registered twice under the same identifier.
    #[error("residual mechanism `{0}` is already registered")]
    DuplicateMechanism(String),

    /// A bid record failed validation.
    #[error("invalid bid {id}: {reason}")]
    InvalidBid { id: BidId, reason: String },

    /// Two bids in one round share an identifier.
    #[error("duplicate bid id {0}")]
    DuplicateBid(BidId),

    /// A configuration value is missing, unknown or out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type SettleResult<T> = Result<T, SettleError>;

impl SettleError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        SettleError::InvalidConfig(message.into())
    }

    pub(crate) fn bid(id: BidId, reason: impl Into<String>) -> Self {
        SettleError::InvalidBid {
            id,
            reason: reason.into(),
        }
    }
}
