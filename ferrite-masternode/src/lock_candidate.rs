//! Per-input vote tallies and per-transaction lock candidates.

use std::collections::HashMap;

use log::{debug, warn};

use ferrite_shared_types::quicksilver::LockVote;
use ferrite_shared_types::{Hash, OutPoint};

use crate::error::VoteError;
use crate::lock_request::LockRequest;
use crate::quicksilver::QuickSilverConfig;

/// State of one input's vote tally.
///
/// `Attacked` is terminal: once a conflicting double-spend attempt defeats
/// this tally it can never become ready again, no matter how many further
/// votes arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutpointState {
    Collecting,
    Attacked,
}

/// Vote tally for exactly one input of one candidate transaction.
#[derive(Debug, Clone)]
pub struct OutpointLockState {
    outpoint: OutPoint,
    signatures_required: usize,
    state: OutpointState,
    /// Accepted votes keyed by voter collateral outpoint.
    votes: HashMap<OutPoint, LockVote>,
    /// Votes cleared by `mark_attacked`, retained as evidence only.
    attack_evidence: Vec<LockVote>,
}

impl OutpointLockState {
    pub fn new(outpoint: OutPoint, signatures_required: usize) -> Self {
        OutpointLockState {
            outpoint,
            signatures_required,
            state: OutpointState::Collecting,
            votes: HashMap::new(),
            attack_evidence: Vec::new(),
        }
    }

    pub fn outpoint(&self) -> &OutPoint {
        &self.outpoint
    }

    pub fn state(&self) -> OutpointState {
        self.state
    }

    pub fn is_attacked(&self) -> bool {
        self.state == OutpointState::Attacked
    }

    /// Accepts one vote per distinct voter. Rejects without side effect when
    /// the tally is attacked or the voter already voted. The signature has
    /// been verified by the engine before the vote reaches the tally.
    pub fn add_vote(&mut self, vote: LockVote) -> Result<(), VoteError> {
        if self.is_attacked() {
            return Err(VoteError::AttackedOutpoint(self.outpoint.clone()));
        }
        if self.votes.contains_key(&vote.voter) {
            return Err(VoteError::DuplicateVote(vote.voter));
        }
        self.votes.insert(vote.voter.clone(), vote);
        Ok(())
    }

    /// Marks this tally as defeated by a conflicting candidate. Idempotent.
    /// Existing votes are cleared from the live tally but kept as evidence.
    pub fn mark_attacked(&mut self) {
        if self.is_attacked() {
            return;
        }
        warn!(
            "Outpoint {} tally attacked, clearing {} votes",
            self.outpoint,
            self.votes.len()
        );
        self.state = OutpointState::Attacked;
        self.attack_evidence.extend(self.votes.drain().map(|(_, vote)| vote));
    }

    /// Number of currently counting votes; reported as zero once attacked.
    pub fn vote_count(&self) -> usize {
        match self.state {
            OutpointState::Collecting => self.votes.len(),
            OutpointState::Attacked => 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        !self.is_attacked() && self.vote_count() >= self.signatures_required
    }

    pub fn has_voter_voted(&self, voter: &OutPoint) -> bool {
        self.votes.contains_key(voter)
    }

    pub fn votes(&self) -> impl Iterator<Item = &LockVote> {
        self.votes.values()
    }

    /// Evidence retained from a defeated tally.
    pub fn attack_evidence(&self) -> &[LockVote] {
        &self.attack_evidence
    }

    pub fn set_confirmed_height(&mut self, height: i64) {
        for vote in self.votes.values_mut() {
            vote.confirmed_height = height;
        }
    }
}

/// A transaction attempting to accumulate enough votes on every input to be
/// considered provisionally locked.
#[derive(Debug, Clone)]
pub struct LockCandidate {
    request: LockRequest,
    inputs: HashMap<OutPoint, OutpointLockState>,
    created_at: u64,
    confirmed_height: i64,
}

impl LockCandidate {
    pub fn new(request: LockRequest, now: u64) -> Self {
        let required = request.signatures_required();
        let inputs = request
            .outpoints()
            .into_iter()
            .map(|outpoint| {
                (
                    outpoint.clone(),
                    OutpointLockState::new(outpoint, required),
                )
            })
            .collect();
        LockCandidate {
            request,
            inputs,
            created_at: now,
            confirmed_height: -1,
        }
    }

    pub fn txid(&self) -> Hash {
        self.request.txid()
    }

    pub fn request(&self) -> &LockRequest {
        &self.request
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn confirmed_height(&self) -> i64 {
        self.confirmed_height
    }

    pub fn set_confirmed_height(&mut self, height: i64) {
        self.confirmed_height = height;
        for state in self.inputs.values_mut() {
            state.set_confirmed_height(height);
        }
    }

    pub fn input_state(&self, outpoint: &OutPoint) -> Option<&OutpointLockState> {
        self.inputs.get(outpoint)
    }

    pub fn input_state_mut(&mut self, outpoint: &OutPoint) -> Option<&mut OutpointLockState> {
        self.inputs.get_mut(outpoint)
    }

    pub fn input_states(&self) -> impl Iterator<Item = &OutpointLockState> {
        self.inputs.values()
    }

    /// Routes a vote to the tally of its input.
    pub fn add_vote(&mut self, vote: LockVote) -> Result<(), VoteError> {
        match self.inputs.get_mut(&vote.outpoint) {
            Some(state) => state.add_vote(vote),
            None => Err(VoteError::UnknownInput(vote.outpoint)),
        }
    }

    pub fn is_all_ready(&self) -> bool {
        self.inputs.values().all(|state| state.is_ready())
    }

    pub fn has_attacked_input(&self) -> bool {
        self.inputs.values().any(|state| state.is_attacked())
    }

    /// The weakest input's tally; this input gates readiness.
    pub fn min_vote_count(&self) -> usize {
        self.inputs
            .values()
            .map(|state| state.vote_count())
            .min()
            .unwrap_or(0)
    }

    /// All currently counting votes across every input.
    pub fn all_votes(&self) -> Vec<LockVote> {
        self.inputs
            .values()
            .flat_map(|state| state.votes().cloned())
            .collect()
    }

    /// Whether this candidate is due for eviction.
    ///
    /// A candidate still collecting votes times out quickly; an attacked or
    /// ready-but-unconfirmed candidate is kept longer so straggler evidence
    /// can still be recorded.
    pub fn is_expired(&self, now: u64, config: &QuickSilverConfig) -> bool {
        let age = now.saturating_sub(self.created_at);
        if self.has_attacked_input() || self.is_all_ready() {
            age > config.failed_lock_timeout_secs
        } else {
            age > config.lock_timeout_secs
        }
    }
}

/// One side of a conflicting double-spend race over a single outpoint.
#[derive(Debug, Clone, Copy)]
pub struct ConflictSide {
    pub votes: usize,
    pub created_at: u64,
    pub txid: Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// The candidate the incoming vote belongs to wins; the existing tally
    /// for this outpoint is attacked.
    ChallengerWins,
    /// The existing candidate keeps the outpoint; the challenger's tally is
    /// attacked and the incoming vote is rejected.
    IncumbentWins,
}

/// Decides a double-spend race over one outpoint once the challenger has
/// pulled level with or ahead of the incumbent.
///
/// The side with strictly more votes wins. On an exact tie the candidate
/// seen first wins, and equal timestamps fall back to the smaller txid so
/// the decision is total. This is a local heuristic, not finality: nodes
/// observing votes in different order may transiently disagree, and only
/// block confirmation settles the outcome.
pub fn resolve_conflict(challenger: ConflictSide, incumbent: ConflictSide) -> ConflictOutcome {
    if challenger.votes > incumbent.votes {
        debug!(
            "Conflict: challenger {} outvotes incumbent {} ({} > {})",
            hex::encode(challenger.txid),
            hex::encode(incumbent.txid),
            challenger.votes,
            incumbent.votes
        );
        return ConflictOutcome::ChallengerWins;
    }
    if challenger.votes < incumbent.votes {
        return ConflictOutcome::IncumbentWins;
    }
    match challenger.created_at.cmp(&incumbent.created_at) {
        std::cmp::Ordering::Less => ConflictOutcome::ChallengerWins,
        std::cmp::Ordering::Greater => ConflictOutcome::IncumbentWins,
        std::cmp::Ordering::Equal => {
            if challenger.txid < incumbent.txid {
                ConflictOutcome::ChallengerWins
            } else {
                ConflictOutcome::IncumbentWins
            }
        }
    }
}
