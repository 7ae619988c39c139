//! Masternode services for Ferrite Coin: the QuickSilver instant
//! transaction locking engine and its supporting pieces.

pub mod constants;
pub mod error;
pub mod lock_candidate;
pub mod lock_request;
pub mod quicksilver;
pub mod voter_ranking;

pub use error::{LockRequestError, VoteError};
pub use lock_candidate::{LockCandidate, OutpointLockState, OutpointState};
pub use lock_request::LockRequest;
pub use quicksilver::{
    ChainView, LocalVoter, LockEngine, LockEvent, LockNotifier, LockRelay, LockStatus,
    QuickSilverConfig, QuickSilverStats, VoterRoster,
};
pub use voter_ranking::VoterRanking;
