//! Validation of transactions requesting a QuickSilver input lock.

use log::warn;

use ferrite_shared_types::{Hash, OutPoint, Transaction};

use crate::error::LockRequestError;
use crate::quicksilver::{ChainView, QuickSilverConfig};

/// Minimum fee a lock request must pay, linear in input count with a floor.
pub fn min_fee(input_count: usize, config: &QuickSilverConfig) -> u64 {
    std::cmp::max(
        config.min_lock_fee,
        input_count as u64 * config.min_lock_fee_per_input,
    )
}

/// Number of distinct voter signatures required per input.
///
/// Monotonically non-decreasing in the input count: the base requirement,
/// plus one for every five inputs, capped at the voter pool size.
pub fn required_signatures(input_count: usize, config: &QuickSilverConfig) -> usize {
    let extra = input_count.saturating_sub(1) / 5;
    std::cmp::min(config.quorum_size, config.base_signatures_required + extra)
}

/// A validated, read-only view over a transaction requesting a lock.
#[derive(Debug, Clone)]
pub struct LockRequest {
    tx: Transaction,
    txid: Hash,
    signatures_required: usize,
}

impl LockRequest {
    /// Validates `tx` as a lock request against the current chain view.
    ///
    /// Rejects empty/coinbase transactions, transactions spending an already
    /// spent input, underpaying transactions, and transactions the consensus
    /// validator refuses. An input count above the soft threshold only logs
    /// a warning.
    pub fn validate(
        tx: Transaction,
        chain: &dyn ChainView,
        config: &QuickSilverConfig,
    ) -> Result<LockRequest, LockRequestError> {
        if tx.is_coinbase() || tx.input_count() == 0 || tx.output_count() == 0 {
            return Err(LockRequestError::Empty);
        }

        let txid = tx.txid();

        if tx.input_count() > config.many_inputs_warn_threshold {
            warn!(
                "Lock request {} has {} inputs (threshold {}), vote fanout will be large",
                hex::encode(txid),
                tx.input_count(),
                config.many_inputs_warn_threshold
            );
        }

        for input in tx.get_inputs() {
            if chain.is_spent(&input.previous_output) {
                return Err(LockRequestError::InputAlreadySpent(
                    input.previous_output.clone(),
                ));
            }
        }

        let required = min_fee(tx.input_count(), config);
        if tx.get_fee() < required {
            return Err(LockRequestError::FeeTooLow {
                paid: tx.get_fee(),
                required,
            });
        }

        if !chain.is_transaction_valid(&tx) {
            return Err(LockRequestError::ConsensusInvalid);
        }

        let signatures_required = required_signatures(tx.input_count(), config);
        Ok(LockRequest {
            tx,
            txid,
            signatures_required,
        })
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn txid(&self) -> Hash {
        self.txid
    }

    pub fn signatures_required(&self) -> usize {
        self.signatures_required
    }

    /// The outpoints this request wants locked, in input order.
    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.tx
            .get_inputs()
            .iter()
            .map(|input| input.previous_output.clone())
            .collect()
    }
}
