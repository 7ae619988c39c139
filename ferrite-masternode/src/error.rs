use thiserror::Error;

use ferrite_shared_types::OutPoint;

/// Rejection reasons reported synchronously to a lock request submitter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockRequestError {
    #[error("Transaction has no lockable inputs")]
    Empty,

    #[error("Input {0} is already spent")]
    InputAlreadySpent(OutPoint),

    #[error("Input {0} is locked by a competing transaction")]
    InputAlreadyLocked(OutPoint),

    #[error("Lock fee too low: paid {paid}, required {required}")]
    FeeTooLow { paid: u64, required: u64 },

    #[error("Transaction rejected by consensus validation")]
    ConsensusInvalid,

    #[error("Transaction was previously rejected")]
    PreviouslyRejected,
}

/// Classification of silently dropped votes. Logged, never returned to the
/// network caller; the protocol tolerates lossy vote delivery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VoteError {
    #[error("voter {0} is not in the active masternode set")]
    UnknownVoter(OutPoint),

    #[error("voter {0} is not eligible for this input at the current height")]
    NotEligible(OutPoint),

    #[error("duplicate vote from voter {0}")]
    DuplicateVote(OutPoint),

    #[error("signature verification failed for voter {0}")]
    BadSignature(OutPoint),

    #[error("outpoint {0} is in attacked state")]
    AttackedOutpoint(OutPoint),

    #[error("vote references input {0} not present in the candidate")]
    UnknownInput(OutPoint),

    #[error("orphan vote limit reached for voter {0}")]
    OrphanLimit(OutPoint),

    #[error("a competing candidate won the lock race for input {0}")]
    LostConflict(OutPoint),

    #[error("no voter ranking available at the current height")]
    NoRanking,
}
