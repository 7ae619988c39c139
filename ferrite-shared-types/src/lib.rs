use serde::{Deserialize, Serialize};
use bincode;
use std::hash::Hash as StdHash;

pub type PublicKey = [u8; 32];
pub type Hash = [u8; 32];

pub mod masternode;
pub mod quicksilver;

/// Represents a reference to a specific transaction output.
#[derive(Debug, Clone, PartialEq, Eq, StdHash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// The transaction ID (hash) of the transaction containing the output.
    pub txid: [u8; 32],
    /// The index of the output within that transaction.
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: [u8; 32], vout: u32) -> Self {
        OutPoint { txid, vout }
    }

    pub fn encode_to_vec(&self) -> Result<Vec<u8>, Box<bincode::ErrorKind>> {
        bincode::serialize(self)
    }
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.vout)
    }
}

/// Represents a transaction input, referencing a previous transaction's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// The `OutPoint` referencing the output being spent.
    pub previous_output: OutPoint,
    /// The script signature, providing proof of ownership.
    pub script_sig: Vec<u8>,
    /// A sequence number, typically used for replace-by-fee or relative lock-times.
    pub sequence: u32,
    /// Cryptographic witnesses for SegWit-like transactions (e.g., signatures, public keys).
    pub witness: Vec<Vec<u8>>,
}

/// Represents a transaction output, specifying a value and a locking script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// The value of the output in satoshis.
    pub value: u64,
    /// The locking script (scriptPubKey) that defines the conditions for spending this output.
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: u64, script_pubkey: Vec<u8>) -> Self {
        TxOutput { value, script_pubkey }
    }
}

/// Represents the transaction types the locking subsystem operates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Transaction {
    Standard {
        version: u32,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        lock_time: u32,
        fee: u64,
        witness: Vec<Vec<u8>>,
    },
    Coinbase {
        version: u32,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        lock_time: u32,
        witness: Vec<Vec<u8>>,
    },
}

impl Transaction {
    /// Returns a slice of `TxInput`s for the transaction.
    ///
    /// This method provides a unified way to access the inputs regardless of the transaction type.
    pub fn get_inputs(&self) -> &[TxInput] {
        match self {
            Transaction::Standard { inputs, .. } => inputs,
            Transaction::Coinbase { inputs, .. } => inputs,
        }
    }

    /// Returns a slice of `TxOutput`s for the transaction.
    pub fn get_outputs(&self) -> &[TxOutput] {
        match self {
            Transaction::Standard { outputs, .. } => outputs,
            Transaction::Coinbase { outputs, .. } => outputs,
        }
    }

    /// Returns the transaction fee.
    pub fn get_fee(&self) -> u64 {
        match self {
            Transaction::Standard { fee, .. } => *fee,
            Transaction::Coinbase { .. } => 0,
        }
    }

    /// Returns the canonical byte representation of the transaction.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Box<bincode::ErrorKind>> {
        bincode::serialize(self)
    }

    /// Calculates and returns the transaction ID (hash) of the transaction.
    pub fn txid(&self) -> [u8; 32] {
        let bytes = self.to_bytes().unwrap();
        blake3::hash(&bytes).into()
    }

    /// Checks if the transaction is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        matches!(self, Transaction::Coinbase { .. })
    }

    /// Returns the number of inputs in the transaction.
    pub fn input_count(&self) -> usize {
        self.get_inputs().len()
    }

    /// Returns the number of outputs in the transaction.
    pub fn output_count(&self) -> usize {
        self.get_outputs().len()
    }
}

/// Represents a cryptographic signature used in transactions and other messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    #[serde(with = "serde_bytes")]
    pub bytes: [u8; 64],
}

impl TransactionSignature {
    pub fn new(bytes: [u8; 64]) -> Self {
        TransactionSignature { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }
}
