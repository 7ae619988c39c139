//! QuickSilver: the masternode-quorum instant transaction locking engine.
//!
//! The engine is driven purely by inbound events (lock requests, votes,
//! new blocks) plus a periodic sweep. All mutable state sits behind one
//! coarse mutex; network relay and observer notification are dispatched
//! after the lock is released.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};

use ferrite_crypto::{verify_detached, FerriteKeyPair};
use ferrite_shared_types::quicksilver::{LockVote, QuickSilverMessage};
use ferrite_shared_types::{Hash, OutPoint, Transaction, TransactionSignature};

use crate::constants::{
    BASE_SIGNATURES_REQUIRED, FAILED_LOCK_TIMEOUT_SECS, LOCK_CONFIRMATION_DEPTH,
    LOCK_TIMEOUT_SECS, MANY_INPUTS_WARN_THRESHOLD, MIN_LOCK_FEE, MIN_LOCK_FEE_PER_INPUT,
    ORPHAN_VOTES_PER_VOTER, ORPHAN_VOTE_TIMEOUT_SECS, QUORUM_SIZE, REJECTED_CACHE_MAX,
};
use crate::error::{LockRequestError, VoteError};
use crate::lock_candidate::{resolve_conflict, ConflictOutcome, ConflictSide, LockCandidate};
use crate::lock_request::LockRequest;
use crate::voter_ranking::VoterRanking;

/// Read-only view of the confirmed chain and UTXO state, owned elsewhere.
pub trait ChainView: Send + Sync {
    fn is_spent(&self, outpoint: &OutPoint) -> bool;
    fn current_height(&self) -> u64;
    fn block_hash_at(&self, height: u64) -> Option<Hash>;
    /// Confirmation count of a transaction, 0 while unconfirmed.
    fn tx_confirmations(&self, txid: &Hash) -> u64;
    /// Full consensus validity of a transaction, delegated to the node's
    /// validation engine.
    fn is_transaction_valid(&self, tx: &Transaction) -> bool;
}

/// Provider of the active masternode roster.
pub trait VoterRoster: Send + Sync {
    fn active_voters(&self, height: u64) -> Vec<OutPoint>;
    /// Operator public key registered for a collateral outpoint.
    fn operator_key(&self, collateral: &OutPoint) -> Option<[u8; 32]>;
}

/// Fire-and-forget network relay; delivery is at-least-once best-effort and
/// retries are the relay's concern, never the engine's.
pub trait LockRelay: Send + Sync {
    fn broadcast(&self, message: &QuickSilverMessage);
}

/// Sink for wallet/UI lock lifecycle notifications.
pub trait LockNotifier: Send + Sync {
    fn notify(&self, event: LockEvent);
}

/// Lock lifecycle events surfaced to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    /// Every input of the transaction reached quorum.
    Locked(Hash),
    /// A conflicting double-spend attempt defeated the candidate.
    Attacked(Hash),
    /// The candidate timed out before reaching quorum.
    Expired(Hash),
    /// A conflicting transaction confirmed in a block after the lock was
    /// granted. Severe anomaly; block confirmation is authoritative.
    Invalidated(Hash),
}

/// Read-only lock status for RPC/UI layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    Absent,
    Pending { votes: usize, required: usize },
    Locked,
    Attacked,
}

/// Tunables of the QuickSilver engine. Defaults are the protocol constants.
#[derive(Debug, Clone)]
pub struct QuickSilverConfig {
    pub lock_timeout_secs: u64,
    pub failed_lock_timeout_secs: u64,
    pub orphan_vote_timeout_secs: u64,
    pub orphan_votes_per_voter: usize,
    pub quorum_size: usize,
    pub base_signatures_required: usize,
    pub min_lock_fee: u64,
    pub min_lock_fee_per_input: u64,
    pub many_inputs_warn_threshold: usize,
    pub lock_confirmation_depth: u64,
}

impl Default for QuickSilverConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: LOCK_TIMEOUT_SECS,
            failed_lock_timeout_secs: FAILED_LOCK_TIMEOUT_SECS,
            orphan_vote_timeout_secs: ORPHAN_VOTE_TIMEOUT_SECS,
            orphan_votes_per_voter: ORPHAN_VOTES_PER_VOTER,
            quorum_size: QUORUM_SIZE,
            base_signatures_required: BASE_SIGNATURES_REQUIRED,
            min_lock_fee: MIN_LOCK_FEE,
            min_lock_fee_per_input: MIN_LOCK_FEE_PER_INPUT,
            many_inputs_warn_threshold: MANY_INPUTS_WARN_THRESHOLD,
            lock_confirmation_depth: LOCK_CONFIRMATION_DEPTH,
        }
    }
}

/// The local node's voter identity, present only on masternodes.
pub struct LocalVoter {
    pub collateral: OutPoint,
    pub keypair: FerriteKeyPair,
}

/// Counters exposed to the RPC layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickSilverStats {
    pub candidates: usize,
    pub orphan_votes: usize,
    pub locked_outpoints: usize,
}

#[derive(Default)]
struct EngineState {
    /// In-flight candidates keyed by txid.
    candidates: HashMap<Hash, LockCandidate>,
    /// Votes received before their transaction, keyed by txid.
    orphan_votes: HashMap<Hash, Vec<LockVote>>,
    /// Cached orphan votes per voter, bounding cache growth per identity.
    orphan_counts: HashMap<OutPoint, usize>,
    /// Candidates with live vote tallies per outpoint; more than one entry
    /// means an active double-spend race.
    voted_outpoints: HashMap<OutPoint, HashSet<Hash>>,
    /// Finalized locks: outpoint to the transaction that locked it.
    locked_outpoints: HashMap<OutPoint, Hash>,
    /// Transactions whose lock finalized.
    locked_txids: HashSet<Hash>,
    /// Recently rejected lock requests, bounded.
    rejected: HashSet<Hash>,
    /// Voter ordering for the current height, recomputed lazily.
    ranking: Option<VoterRanking>,
}

/// Relay messages and notifications collected under the engine lock and
/// dispatched after it is released.
#[derive(Default)]
struct Outbox {
    messages: Vec<QuickSilverMessage>,
    events: Vec<LockEvent>,
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The QuickSilver orchestrator. Owns every in-flight candidate and cache;
/// collaborators are injected at construction.
pub struct LockEngine {
    config: QuickSilverConfig,
    chain: Arc<dyn ChainView>,
    roster: Arc<dyn VoterRoster>,
    relay: Arc<dyn LockRelay>,
    notifier: Arc<dyn LockNotifier>,
    local_voter: Option<LocalVoter>,
    state: Mutex<EngineState>,
}

impl LockEngine {
    pub fn new(
        config: QuickSilverConfig,
        chain: Arc<dyn ChainView>,
        roster: Arc<dyn VoterRoster>,
        relay: Arc<dyn LockRelay>,
        notifier: Arc<dyn LockNotifier>,
        local_voter: Option<LocalVoter>,
    ) -> Self {
        LockEngine {
            config,
            chain,
            roster,
            relay,
            notifier,
            local_voter,
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Entry point for "I want this transaction locked".
    pub fn submit_lock_request(&self, tx: Transaction) -> Result<LockStatus, LockRequestError> {
        self.submit_lock_request_at(tx, unix_time())
    }

    pub fn submit_lock_request_at(
        &self,
        tx: Transaction,
        now: u64,
    ) -> Result<LockStatus, LockRequestError> {
        let mut outbox = Outbox::default();
        let result = {
            let mut state = self.state.lock().unwrap();
            self.submit_locked(&mut state, tx, now, &mut outbox)
        };
        self.dispatch(outbox);
        result
    }

    /// Entry point for inbound network votes. Malformed votes are dropped
    /// silently; the network tolerates lossy vote delivery.
    pub fn ingest_vote(&self, vote: LockVote) {
        self.ingest_vote_at(vote, unix_time())
    }

    pub fn ingest_vote_at(&self, vote: LockVote, now: u64) {
        let mut outbox = Outbox::default();
        {
            let mut state = self.state.lock().unwrap();
            self.ensure_ranking(&mut state);
            let txid = vote.txid;
            if let Err(err) = self.process_vote_locked(&mut state, vote, now, &mut outbox) {
                debug!("Dropped lock vote for {}: {}", hex::encode(txid), err);
            }
        }
        self.dispatch(outbox);
    }

    /// Block-tip change: refresh the voter ranking, sweep, and re-verify
    /// granted locks against the authoritative chain.
    pub fn on_new_block(&self, height: u64, block_hash: Hash) {
        self.on_new_block_at(height, block_hash, unix_time())
    }

    pub fn on_new_block_at(&self, height: u64, block_hash: Hash, now: u64) {
        let mut outbox = Outbox::default();
        {
            let mut state = self.state.lock().unwrap();

            let voters = self.roster.active_voters(height);
            state.ranking = Some(VoterRanking::compute(height, block_hash, voters));

            for candidate in state.candidates.values_mut() {
                if candidate.confirmed_height() < 0 {
                    let confirmations = self.chain.tx_confirmations(&candidate.txid());
                    if confirmations > 0 {
                        let confirmed = height.saturating_sub(confirmations - 1) as i64;
                        candidate.set_confirmed_height(confirmed);
                    }
                }
            }

            self.sweep_locked(&mut state, now, &mut outbox);

            let invalidated: Vec<(OutPoint, Hash)> = state
                .locked_outpoints
                .iter()
                .filter(|(outpoint, txid)| {
                    self.chain.is_spent(outpoint) && self.chain.tx_confirmations(txid) == 0
                })
                .map(|(outpoint, txid)| (outpoint.clone(), *txid))
                .collect();
            for (outpoint, txid) in invalidated {
                error!(
                    "Locked outpoint {} was spent by a conflicting confirmed transaction; \
                     voiding lock on {}",
                    outpoint,
                    hex::encode(txid)
                );
                self.release_lock_locked(&mut state, txid);
                outbox.events.push(LockEvent::Invalidated(txid));
            }

            let pending: Vec<Hash> = state
                .candidates
                .iter()
                .filter(|(txid, candidate)| {
                    !state.locked_txids.contains(*txid) && !candidate.has_attacked_input()
                })
                .map(|(txid, _)| *txid)
                .collect();
            for txid in pending {
                self.cast_local_votes(&mut state, txid, now, &mut outbox);
            }
        }
        self.dispatch(outbox);
    }

    /// Periodic sweep evicting expired candidates and stale orphan votes.
    pub fn check_and_remove(&self) {
        self.check_and_remove_at(unix_time())
    }

    pub fn check_and_remove_at(&self, now: u64) {
        let mut outbox = Outbox::default();
        {
            let mut state = self.state.lock().unwrap();
            self.sweep_locked(&mut state, now, &mut outbox);
        }
        self.dispatch(outbox);
    }

    /// Read-only lock status for a transaction.
    pub fn query_lock_status(&self, txid: &Hash) -> LockStatus {
        let state = self.state.lock().unwrap();
        self.status_locked(&state, txid)
    }

    /// Whether the mempool should refuse a spend of this outpoint because a
    /// competing transaction holds a finalized lock on it.
    pub fn is_outpoint_locked(&self, outpoint: &OutPoint, spender: &Hash) -> bool {
        let state = self.state.lock().unwrap();
        match state.locked_outpoints.get(outpoint) {
            Some(holder) => holder != spender,
            None => false,
        }
    }

    pub fn stats(&self) -> QuickSilverStats {
        let state = self.state.lock().unwrap();
        QuickSilverStats {
            candidates: state.candidates.len(),
            orphan_votes: state.orphan_votes.values().map(|votes| votes.len()).sum(),
            locked_outpoints: state.locked_outpoints.len(),
        }
    }

    fn submit_locked(
        &self,
        state: &mut EngineState,
        tx: Transaction,
        now: u64,
        outbox: &mut Outbox,
    ) -> Result<LockStatus, LockRequestError> {
        let txid = tx.txid();

        // Resubmission is idempotent
        if state.locked_txids.contains(&txid) || state.candidates.contains_key(&txid) {
            return Ok(self.status_locked(state, &txid));
        }
        if state.rejected.contains(&txid) {
            return Err(LockRequestError::PreviouslyRejected);
        }

        let request = match LockRequest::validate(tx, self.chain.as_ref(), &self.config) {
            Ok(request) => request,
            Err(err) => {
                info!("Rejected lock request {}: {}", hex::encode(txid), err);
                self.remember_rejected(state, txid);
                return Err(err);
            }
        };

        for outpoint in request.outpoints() {
            if let Some(holder) = state.locked_outpoints.get(&outpoint) {
                if *holder != txid {
                    info!(
                        "Rejected lock request {}: input {} already locked by {}",
                        hex::encode(txid),
                        outpoint,
                        hex::encode(holder)
                    );
                    self.remember_rejected(state, txid);
                    return Err(LockRequestError::InputAlreadyLocked(outpoint));
                }
            }
        }

        self.ensure_ranking(state);

        info!(
            "Tracking lock candidate {}: {} inputs, {} signatures required per input",
            hex::encode(txid),
            request.outpoints().len(),
            request.signatures_required()
        );
        state.candidates.insert(txid, LockCandidate::new(request, now));

        // Replay votes that arrived before the transaction
        if let Some(votes) = state.orphan_votes.remove(&txid) {
            debug!(
                "Replaying {} orphan votes into candidate {}",
                votes.len(),
                hex::encode(txid)
            );
            for vote in votes {
                if let Some(count) = state.orphan_counts.get_mut(&vote.voter) {
                    *count = count.saturating_sub(1);
                }
                if let Err(err) = self.process_vote_locked(state, vote, now, outbox) {
                    debug!("Orphan vote replay dropped for {}: {}", hex::encode(txid), err);
                }
            }
        }

        self.cast_local_votes(state, txid, now, outbox);

        if let Some(candidate) = state.candidates.get(&txid) {
            outbox
                .messages
                .push(QuickSilverMessage::LockRequest(candidate.request().tx().clone()));
        }
        Ok(self.status_locked(state, &txid))
    }

    fn remember_rejected(&self, state: &mut EngineState, txid: Hash) {
        if state.rejected.len() >= REJECTED_CACHE_MAX {
            state.rejected.clear();
        }
        state.rejected.insert(txid);
    }

    /// The full vote ingestion pipeline. Runs under the engine lock; the
    /// signature is verified before conflict resolution so that a forged
    /// vote can never poison a competing candidate.
    fn process_vote_locked(
        &self,
        state: &mut EngineState,
        mut vote: LockVote,
        now: u64,
        outbox: &mut Outbox,
    ) -> Result<(), VoteError> {
        vote.created_at = now;

        let operator_key = self
            .roster
            .operator_key(&vote.voter)
            .ok_or_else(|| VoteError::UnknownVoter(vote.voter.clone()))?;
        verify_detached(&operator_key, &vote.digest(), vote.signature.as_bytes())
            .map_err(|_| VoteError::BadSignature(vote.voter.clone()))?;

        {
            let ranking = state.ranking.as_ref().ok_or(VoteError::NoRanking)?;
            if !ranking.is_voter_eligible(&vote.voter, &vote.outpoint, self.config.quorum_size) {
                return Err(VoteError::NotEligible(vote.voter.clone()));
            }
        }

        let txid = vote.txid;
        if !state.candidates.contains_key(&txid) {
            return self.cache_orphan_locked(state, vote);
        }

        {
            let candidate = state.candidates.get(&txid).unwrap();
            let tally = candidate
                .input_state(&vote.outpoint)
                .ok_or_else(|| VoteError::UnknownInput(vote.outpoint.clone()))?;
            if tally.is_attacked() {
                return Err(VoteError::AttackedOutpoint(vote.outpoint.clone()));
            }
            if tally.has_voter_voted(&vote.voter) {
                return Err(VoteError::DuplicateVote(vote.voter.clone()));
            }
        }

        // A finalized lock on this outpoint always defeats a late challenger
        if let Some(holder) = state.locked_outpoints.get(&vote.outpoint).copied() {
            if holder != txid {
                warn!(
                    "Vote for {} targets input {} already locked by {}; marking challenger attacked",
                    hex::encode(txid),
                    vote.outpoint,
                    hex::encode(holder)
                );
                self.attack_candidate_input(state, txid, &vote.outpoint, outbox);
                return Err(VoteError::LostConflict(vote.outpoint.clone()));
            }
        }

        // Double-spend race: other candidates are collecting votes for the
        // same physical input. A race is decided the moment one side pulls
        // level with or ahead of a rival; until then a trailing tally keeps
        // accumulating.
        self.resolve_races_locked(state, txid, &vote.outpoint, outbox)?;

        state
            .voted_outpoints
            .entry(vote.outpoint.clone())
            .or_default()
            .insert(txid);

        let candidate = state.candidates.get_mut(&txid).unwrap();
        candidate.add_vote(vote.clone())?;
        debug!(
            "Accepted vote from {} for input {} of {} ({}/{})",
            vote.voter,
            vote.outpoint,
            hex::encode(txid),
            candidate
                .input_state(&vote.outpoint)
                .map(|tally| tally.vote_count())
                .unwrap_or(0),
            candidate.request().signatures_required()
        );
        outbox.messages.push(QuickSilverMessage::LockVote(vote));

        if state.candidates.get(&txid).unwrap().is_all_ready() {
            self.finalize_locked(state, txid, outbox);
        }
        Ok(())
    }

    /// Resolves the vote races over one outpoint for the candidate an
    /// incoming vote belongs to (the challenger), whose tally is about to
    /// grow by one. Rivals the challenger pulls level with or ahead of are
    /// compared; the loser's tally is poisoned. A rival still strictly ahead
    /// is left alone, and the challenger keeps accumulating.
    ///
    /// Returns an error when the challenger itself loses a race; the
    /// incoming vote is then rejected.
    fn resolve_races_locked(
        &self,
        state: &mut EngineState,
        challenger_txid: Hash,
        outpoint: &OutPoint,
        outbox: &mut Outbox,
    ) -> Result<(), VoteError> {
        let rivals: Vec<Hash> = match state.voted_outpoints.get(outpoint) {
            Some(txids) => txids
                .iter()
                .filter(|txid| **txid != challenger_txid)
                .copied()
                .collect(),
            None => return Ok(()),
        };
        if rivals.is_empty() {
            return Ok(());
        }

        // The incoming vote has been verified and deduplicated; it will
        // raise the challenger's tally to this count
        let challenger_side = match self.conflict_side(state, challenger_txid, outpoint) {
            Some(side) => ConflictSide { votes: side.votes + 1, ..side },
            None => return Ok(()),
        };

        for rival_txid in rivals {
            let rival_side = match self.conflict_side(state, rival_txid, outpoint) {
                Some(side) => side,
                // Evicted or already attacked; stale index entry
                None => continue,
            };
            if challenger_side.votes < rival_side.votes {
                // Still trailing; the race stays open
                continue;
            }

            warn!(
                "Double-spend attempt on input {}: {} ({} votes) vs {} ({} votes)",
                outpoint,
                hex::encode(challenger_txid),
                challenger_side.votes,
                hex::encode(rival_txid),
                rival_side.votes
            );

            match resolve_conflict(challenger_side, rival_side) {
                ConflictOutcome::ChallengerWins => {
                    self.attack_candidate_input(state, rival_txid, outpoint, outbox);
                }
                ConflictOutcome::IncumbentWins => {
                    self.attack_candidate_input(state, challenger_txid, outpoint, outbox);
                    return Err(VoteError::LostConflict(outpoint.clone()));
                }
            }
        }
        Ok(())
    }

    fn conflict_side(
        &self,
        state: &EngineState,
        txid: Hash,
        outpoint: &OutPoint,
    ) -> Option<ConflictSide> {
        let candidate = state.candidates.get(&txid)?;
        let tally = candidate.input_state(outpoint)?;
        if tally.is_attacked() {
            return None;
        }
        Some(ConflictSide {
            votes: tally.vote_count(),
            created_at: candidate.created_at(),
            txid,
        })
    }

    fn attack_candidate_input(
        &self,
        state: &mut EngineState,
        txid: Hash,
        outpoint: &OutPoint,
        outbox: &mut Outbox,
    ) {
        if let Some(candidate) = state.candidates.get_mut(&txid) {
            let first_attack = !candidate.has_attacked_input();
            if let Some(tally) = candidate.input_state_mut(outpoint) {
                tally.mark_attacked();
            }
            if first_attack {
                outbox.events.push(LockEvent::Attacked(txid));
            }
        }
    }

    fn cache_orphan_locked(&self, state: &mut EngineState, vote: LockVote) -> Result<(), VoteError> {
        let cached = state.orphan_counts.get(&vote.voter).copied().unwrap_or(0);
        if cached >= self.config.orphan_votes_per_voter {
            return Err(VoteError::OrphanLimit(vote.voter.clone()));
        }
        let entry = state.orphan_votes.entry(vote.txid).or_default();
        if entry
            .iter()
            .any(|cached| cached.voter == vote.voter && cached.outpoint == vote.outpoint)
        {
            return Err(VoteError::DuplicateVote(vote.voter.clone()));
        }
        debug!(
            "Caching orphan vote from {} for unknown transaction {}",
            vote.voter,
            hex::encode(vote.txid)
        );
        *state.orphan_counts.entry(vote.voter.clone()).or_insert(0) += 1;
        entry.push(vote);
        Ok(())
    }

    /// Finalizes a candidate whose every input reached quorum: records the
    /// locks, notifies observers, and re-broadcasts the winning vote set.
    fn finalize_locked(&self, state: &mut EngineState, txid: Hash, outbox: &mut Outbox) {
        if state.locked_txids.contains(&txid) {
            return;
        }
        let (outpoints, votes) = {
            let candidate = match state.candidates.get(&txid) {
                Some(candidate) => candidate,
                None => return,
            };
            (candidate.request().outpoints(), candidate.all_votes())
        };

        state.locked_txids.insert(txid);
        for outpoint in &outpoints {
            state.locked_outpoints.insert(outpoint.clone(), txid);
        }
        info!(
            "Transaction {} locked on all {} inputs",
            hex::encode(txid),
            outpoints.len()
        );
        outbox.events.push(LockEvent::Locked(txid));
        for vote in votes {
            outbox.messages.push(QuickSilverMessage::LockVote(vote));
        }
    }

    /// Signs and ingests this node's own votes for every candidate input it
    /// is eligible for. No-op on nodes without a voter identity.
    fn cast_local_votes(
        &self,
        state: &mut EngineState,
        txid: Hash,
        now: u64,
        outbox: &mut Outbox,
    ) {
        let local = match &self.local_voter {
            Some(local) => local,
            None => return,
        };

        let to_vote: Vec<OutPoint> = {
            let ranking = match state.ranking.as_ref() {
                Some(ranking) => ranking,
                None => return,
            };
            let candidate = match state.candidates.get(&txid) {
                Some(candidate) => candidate,
                None => return,
            };
            candidate
                .input_states()
                .filter(|tally| !tally.is_attacked() && !tally.has_voter_voted(&local.collateral))
                .map(|tally| tally.outpoint().clone())
                .filter(|outpoint| {
                    ranking.is_voter_eligible(&local.collateral, outpoint, self.config.quorum_size)
                })
                .collect()
        };

        for outpoint in to_vote {
            let digest = LockVote::signing_digest(&txid, &outpoint, &local.collateral);
            let signature = local.keypair.sign(&digest);
            let vote = LockVote::new(
                txid,
                outpoint.clone(),
                local.collateral.clone(),
                TransactionSignature::new(signature.to_bytes()),
            );
            match self.process_vote_locked(state, vote, now, outbox) {
                Ok(()) => info!(
                    "Cast local lock vote for input {} of {}",
                    outpoint,
                    hex::encode(txid)
                ),
                Err(err) => debug!(
                    "Local vote for {} dropped: {}",
                    hex::encode(txid),
                    err
                ),
            }
        }
    }

    /// Evicts candidates past their timeout or confirmation depth, and
    /// orphan votes past theirs.
    fn sweep_locked(&self, state: &mut EngineState, now: u64, outbox: &mut Outbox) {
        // Confirmation supersedes the lock entirely
        let confirmed: Vec<Hash> = state
            .candidates
            .keys()
            .filter(|txid| {
                self.chain.tx_confirmations(txid) >= self.config.lock_confirmation_depth
            })
            .copied()
            .collect();
        for txid in confirmed {
            debug!(
                "Candidate {} reached confirmation depth, lock no longer needed",
                hex::encode(txid)
            );
            self.release_lock_locked(state, txid);
        }

        let expired: Vec<(Hash, bool, bool)> = state
            .candidates
            .iter()
            .filter(|(_, candidate)| candidate.is_expired(now, &self.config))
            .map(|(txid, candidate)| {
                (
                    *txid,
                    candidate.has_attacked_input(),
                    state.locked_txids.contains(txid),
                )
            })
            .collect();
        for (txid, attacked, locked) in expired {
            state.candidates.remove(&txid);
            state.voted_outpoints.retain(|_, txids| {
                txids.remove(&txid);
                !txids.is_empty()
            });
            if locked {
                // The lock itself persists until confirmation or invalidation
                debug!(
                    "Evicting finalized candidate {} after evidence window",
                    hex::encode(txid)
                );
            } else if attacked {
                info!("Evicting attacked candidate {}", hex::encode(txid));
            } else {
                info!(
                    "Lock candidate {} timed out before reaching quorum",
                    hex::encode(txid)
                );
                outbox.events.push(LockEvent::Expired(txid));
            }
        }

        let EngineState {
            orphan_votes,
            orphan_counts,
            ..
        } = state;
        let mut dropped = 0usize;
        orphan_votes.retain(|_, votes| {
            votes.retain(|vote| {
                let keep = now.saturating_sub(vote.created_at) <= self.config.orphan_vote_timeout_secs;
                if !keep {
                    if let Some(count) = orphan_counts.get_mut(&vote.voter) {
                        *count = count.saturating_sub(1);
                    }
                    dropped += 1;
                }
                keep
            });
            !votes.is_empty()
        });
        if dropped > 0 {
            debug!("Dropped {} orphan votes past their timeout", dropped);
        }
    }

    /// Removes every trace of a lock attempt: candidate, indexes, lock marks.
    fn release_lock_locked(&self, state: &mut EngineState, txid: Hash) {
        state.candidates.remove(&txid);
        state.locked_txids.remove(&txid);
        state.locked_outpoints.retain(|_, holder| *holder != txid);
        state.voted_outpoints.retain(|_, txids| {
            txids.remove(&txid);
            !txids.is_empty()
        });
    }

    fn ensure_ranking(&self, state: &mut EngineState) {
        let height = self.chain.current_height();
        let stale = state
            .ranking
            .as_ref()
            .map(|ranking| ranking.height() != height)
            .unwrap_or(true);
        if !stale {
            return;
        }
        match self.chain.block_hash_at(height) {
            Some(block_hash) => {
                let voters = self.roster.active_voters(height);
                state.ranking = Some(VoterRanking::compute(height, block_hash, voters));
            }
            None => warn!("No block hash at height {}, voter ranking unavailable", height),
        }
    }

    fn status_locked(&self, state: &EngineState, txid: &Hash) -> LockStatus {
        if state.locked_txids.contains(txid) {
            return LockStatus::Locked;
        }
        match state.candidates.get(txid) {
            Some(candidate) if candidate.has_attacked_input() => LockStatus::Attacked,
            Some(candidate) => LockStatus::Pending {
                votes: candidate.min_vote_count(),
                required: candidate.request().signatures_required(),
            },
            None => LockStatus::Absent,
        }
    }

    fn dispatch(&self, outbox: Outbox) {
        for message in &outbox.messages {
            self.relay.broadcast(message);
        }
        for event in outbox.events {
            self.notifier.notify(event);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::{standard_tx, EmptyChain};
    use super::*;
    use ferrite_crypto::FerriteKeyPair;
    use std::sync::Mutex as StdMutex;

    struct TestRoster {
        voters: Vec<(OutPoint, [u8; 32])>,
    }

    impl VoterRoster for TestRoster {
        fn active_voters(&self, _height: u64) -> Vec<OutPoint> {
            self.voters.iter().map(|(collateral, _)| collateral.clone()).collect()
        }
        fn operator_key(&self, collateral: &OutPoint) -> Option<[u8; 32]> {
            self.voters
                .iter()
                .find(|(candidate, _)| candidate == collateral)
                .map(|(_, key)| *key)
        }
    }

    #[derive(Default)]
    struct RecordingRelay {
        messages: StdMutex<Vec<QuickSilverMessage>>,
    }

    impl LockRelay for RecordingRelay {
        fn broadcast(&self, message: &QuickSilverMessage) {
            self.messages.lock().unwrap().push(message.clone());
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: StdMutex<Vec<LockEvent>>,
    }

    impl LockNotifier for RecordingNotifier {
        fn notify(&self, event: LockEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct Fixture {
        engine: LockEngine,
        keypairs: Vec<(OutPoint, FerriteKeyPair)>,
        relay: Arc<RecordingRelay>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture(voter_count: u8) -> Fixture {
        let keypairs: Vec<(OutPoint, FerriteKeyPair)> = (0..voter_count)
            .map(|i| {
                (
                    OutPoint { txid: [0xF0; 32], vout: i as u32 },
                    FerriteKeyPair::generate(),
                )
            })
            .collect();
        let roster = TestRoster {
            voters: keypairs
                .iter()
                .map(|(collateral, keypair)| (collateral.clone(), keypair.public_key_bytes()))
                .collect(),
        };
        let relay = Arc::new(RecordingRelay::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = LockEngine::new(
            QuickSilverConfig::default(),
            Arc::new(EmptyChain),
            Arc::new(roster),
            relay.clone(),
            notifier.clone(),
            None,
        );
        Fixture { engine, keypairs, relay, notifier }
    }

    fn signed_vote(fixture: &Fixture, voter_index: usize, txid: Hash, outpoint: &OutPoint) -> LockVote {
        let (collateral, keypair) = &fixture.keypairs[voter_index];
        let digest = LockVote::signing_digest(&txid, outpoint, collateral);
        let signature = keypair.sign(&digest);
        LockVote::new(
            txid,
            outpoint.clone(),
            collateral.clone(),
            TransactionSignature::new(signature.to_bytes()),
        )
    }

    #[test]
    fn test_query_absent_transaction() {
        let fixture = fixture(4);
        assert_eq!(fixture.engine.query_lock_status(&[1u8; 32]), LockStatus::Absent);
    }

    #[test]
    fn test_submit_tracks_candidate_and_relays_request() {
        let fixture = fixture(10);
        let outpoint = OutPoint { txid: [5u8; 32], vout: 0 };
        let tx = standard_tx(&[outpoint], 10_000);
        let txid = tx.txid();

        let status = fixture.engine.submit_lock_request_at(tx.clone(), 1_000).unwrap();
        assert_eq!(status, LockStatus::Pending { votes: 0, required: 6 });

        // Resubmission is idempotent
        let status = fixture.engine.submit_lock_request_at(tx, 1_001).unwrap();
        assert_eq!(status, LockStatus::Pending { votes: 0, required: 6 });
        assert_eq!(fixture.engine.query_lock_status(&txid), status);

        let messages = fixture.relay.messages.lock().unwrap();
        assert!(matches!(messages[0], QuickSilverMessage::LockRequest(_)));
    }

    #[test]
    fn test_rejected_request_is_cached() {
        let fixture = fixture(4);
        let outpoint = OutPoint { txid: [5u8; 32], vout: 0 };
        let tx = standard_tx(&[outpoint], 1); // under the fee floor

        let err = fixture.engine.submit_lock_request_at(tx.clone(), 1_000).unwrap_err();
        assert!(matches!(err, LockRequestError::FeeTooLow { .. }));

        let err = fixture.engine.submit_lock_request_at(tx, 1_001).unwrap_err();
        assert_eq!(err, LockRequestError::PreviouslyRejected);
    }

    #[test]
    fn test_vote_from_unknown_voter_is_dropped() {
        let fixture = fixture(10);
        let outpoint = OutPoint { txid: [5u8; 32], vout: 0 };
        let tx = standard_tx(&[outpoint.clone()], 10_000);
        let txid = tx.txid();
        fixture.engine.submit_lock_request_at(tx, 1_000).unwrap();

        let stranger = FerriteKeyPair::generate();
        let stranger_collateral = OutPoint { txid: [0xEE; 32], vout: 9 };
        let digest = LockVote::signing_digest(&txid, &outpoint, &stranger_collateral);
        let vote = LockVote::new(
            txid,
            outpoint,
            stranger_collateral,
            TransactionSignature::new(stranger.sign(&digest).to_bytes()),
        );
        fixture.engine.ingest_vote_at(vote, 1_001);

        assert_eq!(
            fixture.engine.query_lock_status(&txid),
            LockStatus::Pending { votes: 0, required: 6 }
        );
    }

    #[test]
    fn test_vote_with_bad_signature_is_dropped() {
        let fixture = fixture(10);
        let outpoint = OutPoint { txid: [5u8; 32], vout: 0 };
        let tx = standard_tx(&[outpoint.clone()], 10_000);
        let txid = tx.txid();
        fixture.engine.submit_lock_request_at(tx, 1_000).unwrap();

        let mut vote = signed_vote(&fixture, 0, txid, &outpoint);
        vote.signature = TransactionSignature::new([0u8; 64]);
        fixture.engine.ingest_vote_at(vote, 1_001);

        assert_eq!(
            fixture.engine.query_lock_status(&txid),
            LockStatus::Pending { votes: 0, required: 6 }
        );
    }

    #[test]
    fn test_orphan_cache_per_voter_bound() {
        let fixture = fixture(10);
        let config_cap = QuickSilverConfig::default().orphan_votes_per_voter;

        // All votes reference unknown transactions, all from voter 0
        for i in 0..(config_cap + 5) {
            let mut txid = [0u8; 32];
            txid[0] = (i & 0xFF) as u8;
            txid[1] = (i >> 8) as u8;
            let outpoint = OutPoint { txid: [9u8; 32], vout: i as u32 };
            let vote = signed_vote(&fixture, 0, txid, &outpoint);
            fixture.engine.ingest_vote_at(vote, 1_000);
        }

        assert_eq!(fixture.engine.stats().orphan_votes, config_cap);
    }

    #[test]
    fn test_notifier_receives_locked_event() {
        let fixture = fixture(10);
        let outpoint = OutPoint { txid: [5u8; 32], vout: 0 };
        let tx = standard_tx(&[outpoint.clone()], 10_000);
        let txid = tx.txid();
        fixture.engine.submit_lock_request_at(tx, 1_000).unwrap();

        for voter_index in 0..6 {
            let vote = signed_vote(&fixture, voter_index, txid, &outpoint);
            fixture.engine.ingest_vote_at(vote, 1_001);
        }

        assert_eq!(fixture.engine.query_lock_status(&txid), LockStatus::Locked);
        let events = fixture.notifier.events.lock().unwrap();
        assert!(events.contains(&LockEvent::Locked(txid)));
    }
}
