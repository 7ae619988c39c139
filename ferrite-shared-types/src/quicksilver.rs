//! Wire types for the QuickSilver instant transaction locking protocol.

use serde::{Deserialize, Serialize};

use crate::{Hash, OutPoint, Transaction, TransactionSignature};

fn unconfirmed_height() -> i64 {
    -1
}

/// One signed assertion that input `outpoint` of transaction `txid` should lock.
///
/// Field order (txid, outpoint, voter, signature) is the wire order and must
/// stay stable across versions for network interop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockVote {
    /// Hash of the transaction whose input the vote attests to.
    pub txid: Hash,
    /// The input being locked.
    pub outpoint: OutPoint,
    /// The voting masternode's collateral outpoint.
    pub voter: OutPoint,
    /// Operator-key signature over the vote digest.
    pub signature: TransactionSignature,
    /// Local receive/creation timestamp in unix seconds. Never serialized.
    #[serde(skip)]
    pub created_at: u64,
    /// Height at which the voted transaction confirmed, -1 while unconfirmed.
    /// Never serialized.
    #[serde(skip, default = "unconfirmed_height")]
    pub confirmed_height: i64,
}

impl LockVote {
    pub fn new(txid: Hash, outpoint: OutPoint, voter: OutPoint, signature: TransactionSignature) -> Self {
        LockVote {
            txid,
            outpoint,
            voter,
            signature,
            created_at: 0,
            confirmed_height: -1,
        }
    }

    /// The message a voter signs: blake3 over the wire-order encoding of
    /// (txid, outpoint, voter).
    pub fn signing_digest(txid: &Hash, outpoint: &OutPoint, voter: &OutPoint) -> Hash {
        let mut data = Vec::new();
        data.extend_from_slice(txid);
        data.extend_from_slice(&outpoint.encode_to_vec().unwrap_or_default());
        data.extend_from_slice(&voter.encode_to_vec().unwrap_or_default());
        blake3::hash(&data).into()
    }

    pub fn digest(&self) -> Hash {
        Self::signing_digest(&self.txid, &self.outpoint, &self.voter)
    }
}

/// QuickSilver message types for network relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QuickSilverMessage {
    /// A transaction requesting an input lock; carries the full transaction bytes.
    LockRequest(Transaction),
    /// A single masternode locking vote.
    LockVote(LockVote),
}
