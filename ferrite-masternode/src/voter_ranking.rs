//! Deterministic, height-seeded ranking of the active voter set.
//!
//! Every correctly implemented node must derive the same ordering from the
//! same block hash and roster, so ranking is a pure blake3 sort with no
//! node-local input.

use log::debug;

use ferrite_shared_types::{Hash, OutPoint};

/// Score a voter for the height-wide ranking.
fn ranking_score(voter: &OutPoint, block_hash: &Hash) -> Hash {
    let mut data = Vec::new();
    data.extend_from_slice(&voter.encode_to_vec().unwrap_or_default());
    data.extend_from_slice(block_hash);
    data.extend_from_slice(b"QUICKSILVER_RANK_SEED");
    blake3::hash(&data).into()
}

/// Secondary score scoping a voter to one input, so that not every voter is
/// expected to vote on every input.
fn input_score(voter: &OutPoint, block_hash: &Hash, input: &OutPoint) -> Hash {
    let mut data = Vec::new();
    data.extend_from_slice(&voter.encode_to_vec().unwrap_or_default());
    data.extend_from_slice(block_hash);
    data.extend_from_slice(&input.encode_to_vec().unwrap_or_default());
    data.extend_from_slice(b"QUICKSILVER_INPUT_SEED");
    blake3::hash(&data).into()
}

/// Snapshot of the voter ordering at one block height. Recomputed lazily on
/// height change and cached by the engine; never persisted.
#[derive(Debug, Clone)]
pub struct VoterRanking {
    height: u64,
    block_hash: Hash,
    ranked: Vec<OutPoint>,
}

impl VoterRanking {
    /// Derives the ranking for `height` from the block hash and roster.
    pub fn compute(height: u64, block_hash: Hash, voters: Vec<OutPoint>) -> Self {
        let mut scored: Vec<(Hash, OutPoint)> = voters
            .into_iter()
            .map(|voter| (ranking_score(&voter, &block_hash), voter))
            .collect();
        scored.sort();
        let ranked: Vec<OutPoint> = scored.into_iter().map(|(_, voter)| voter).collect();

        debug!(
            "Computed voter ranking at height {} over {} voters",
            height,
            ranked.len()
        );
        VoterRanking {
            height,
            block_hash,
            ranked,
        }
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn ranked(&self) -> &[OutPoint] {
        &self.ranked
    }

    /// The deterministic subset of voters expected to vote on `input`:
    /// the top `quorum_size` by per-input score.
    pub fn eligible_voters(&self, input: &OutPoint, quorum_size: usize) -> Vec<OutPoint> {
        let mut scored: Vec<(Hash, &OutPoint)> = self
            .ranked
            .iter()
            .map(|voter| (input_score(voter, &self.block_hash, input), voter))
            .collect();
        scored.sort();
        scored
            .into_iter()
            .take(quorum_size)
            .map(|(_, voter)| voter.clone())
            .collect()
    }

    pub fn is_voter_eligible(&self, voter: &OutPoint, input: &OutPoint, quorum_size: usize) -> bool {
        self.eligible_voters(input, quorum_size).contains(voter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voters(n: u8) -> Vec<OutPoint> {
        (0..n)
            .map(|i| OutPoint { txid: [i; 32], vout: 0 })
            .collect()
    }

    #[test]
    fn test_ranking_is_deterministic_and_complete() {
        let set = voters(20);
        let a = VoterRanking::compute(5, [9u8; 32], set.clone());
        let b = VoterRanking::compute(5, [9u8; 32], set.clone());
        assert_eq!(a.ranked(), b.ranked());
        assert_eq!(a.ranked().len(), 20);

        // Every voter appears exactly once
        for voter in &set {
            assert_eq!(a.ranked().iter().filter(|v| *v == voter).count(), 1);
        }
    }

    #[test]
    fn test_ranking_changes_with_block_hash() {
        let set = voters(20);
        let a = VoterRanking::compute(5, [1u8; 32], set.clone());
        let b = VoterRanking::compute(6, [2u8; 32], set);
        assert_ne!(a.ranked(), b.ranked());
    }

    #[test]
    fn test_eligibility_selects_a_bounded_per_input_subset() {
        let set = voters(30);
        let ranking = VoterRanking::compute(5, [9u8; 32], set);

        let input_a = OutPoint { txid: [100u8; 32], vout: 0 };
        let input_b = OutPoint { txid: [200u8; 32], vout: 1 };

        let eligible_a = ranking.eligible_voters(&input_a, 10);
        let eligible_b = ranking.eligible_voters(&input_b, 10);
        assert_eq!(eligible_a.len(), 10);
        assert_eq!(eligible_b.len(), 10);
        // Different inputs select different subsets (with overwhelming probability)
        assert_ne!(eligible_a, eligible_b);

        for voter in &eligible_a {
            assert!(ranking.is_voter_eligible(voter, &input_a, 10));
        }
        let outsider = OutPoint { txid: [77u8; 32], vout: 3 };
        assert!(!ranking.is_voter_eligible(&outsider, &input_a, 10));
    }

    #[test]
    fn test_small_roster_everyone_is_eligible() {
        let set = voters(4);
        let ranking = VoterRanking::compute(5, [9u8; 32], set.clone());
        let input = OutPoint { txid: [100u8; 32], vout: 0 };
        let eligible = ranking.eligible_voters(&input, 10);
        assert_eq!(eligible.len(), 4);
        for voter in &set {
            assert!(ranking.is_voter_eligible(voter, &input, 10));
        }
    }
}
