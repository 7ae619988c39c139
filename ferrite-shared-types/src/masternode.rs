use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{OutPoint, PublicKey};

/// MasternodeID is a unique identifier for a Masternode, derived from its collateral outpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MasternodeID(pub OutPoint);

impl From<OutPoint> for MasternodeID {
    fn from(outpoint: OutPoint) -> Self {
        MasternodeID(outpoint)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MasternodeIdentity {
    pub collateral_outpoint: OutPoint,
    pub operator_public_key: PublicKey, // Ed25519 public key
    pub network_address: String,        // IP:Port
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum MasternodeStatus {
    Registered,
    Active,
    Offline,
    Banned,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MasternodeEntry {
    pub identity: MasternodeIdentity,
    pub status: MasternodeStatus,
    pub registered_height: u64,
    pub last_seen_height: u64,
}

#[derive(Debug, Error)]
pub enum MasternodeListError {
    #[error("Masternode already registered: {0}")]
    AlreadyRegistered(OutPoint),

    #[error("Masternode not found: {0}")]
    NotFound(OutPoint),
}

/// The node's view of the masternode roster, keyed by collateral outpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasternodeList {
    pub map: HashMap<MasternodeID, MasternodeEntry>,
}

impl MasternodeList {
    pub fn new() -> Self {
        MasternodeList { map: HashMap::new() }
    }

    pub fn register_masternode(
        &mut self,
        identity: MasternodeIdentity,
        current_height: u64,
    ) -> Result<(), MasternodeListError> {
        let mn_id = MasternodeID(identity.collateral_outpoint.clone());
        if self.map.contains_key(&mn_id) {
            return Err(MasternodeListError::AlreadyRegistered(mn_id.0));
        }

        let entry = MasternodeEntry {
            identity,
            status: MasternodeStatus::Registered,
            registered_height: current_height,
            last_seen_height: current_height,
        };
        self.map.insert(mn_id, entry);
        Ok(())
    }

    pub fn update_masternode_status(
        &mut self,
        mn_id: &MasternodeID,
        new_status: MasternodeStatus,
    ) -> Result<(), MasternodeListError> {
        match self.map.get_mut(mn_id) {
            Some(entry) => {
                entry.status = new_status;
                Ok(())
            }
            None => Err(MasternodeListError::NotFound(mn_id.0.clone())),
        }
    }

    pub fn get_masternode(&self, mn_id: &MasternodeID) -> Option<&MasternodeEntry> {
        self.map.get(mn_id)
    }

    pub fn remove_masternode(&mut self, mn_id: &MasternodeID) -> Option<MasternodeEntry> {
        self.map.remove(mn_id)
    }

    pub fn count_active_masternodes(&self) -> usize {
        self.map
            .values()
            .filter(|mn| mn.status == MasternodeStatus::Active)
            .count()
    }

    /// Collateral outpoints of all currently active masternodes.
    pub fn active_collaterals(&self) -> Vec<OutPoint> {
        self.map
            .values()
            .filter(|mn| mn.status == MasternodeStatus::Active)
            .map(|mn| mn.identity.collateral_outpoint.clone())
            .collect()
    }

    /// Operator key for a collateral outpoint, if the masternode is known.
    pub fn operator_key(&self, collateral: &OutPoint) -> Option<PublicKey> {
        self.map
            .get(&MasternodeID(collateral.clone()))
            .map(|mn| mn.identity.operator_public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_identity(txid_val: u8) -> MasternodeIdentity {
        let mut txid = [0u8; 32];
        txid[0] = txid_val;
        MasternodeIdentity {
            collateral_outpoint: OutPoint { txid, vout: 0 },
            operator_public_key: [txid_val; 32],
            network_address: format!("10.0.0.{}:9999", txid_val),
        }
    }

    #[test]
    fn test_register_and_activate() {
        let mut list = MasternodeList::new();
        let identity = dummy_identity(1);
        let mn_id = MasternodeID(identity.collateral_outpoint.clone());

        list.register_masternode(identity.clone(), 100).unwrap();
        assert_eq!(list.count_active_masternodes(), 0);

        // Duplicate registration is rejected
        assert!(list.register_masternode(identity, 101).is_err());

        list.update_masternode_status(&mn_id, MasternodeStatus::Active).unwrap();
        assert_eq!(list.count_active_masternodes(), 1);
        assert_eq!(list.active_collaterals(), vec![mn_id.0.clone()]);
        assert_eq!(list.operator_key(&mn_id.0), Some([1u8; 32]));
    }

    #[test]
    fn test_unknown_masternode() {
        let mut list = MasternodeList::new();
        let mn_id = MasternodeID(OutPoint { txid: [9u8; 32], vout: 0 });
        assert!(list.update_masternode_status(&mn_id, MasternodeStatus::Offline).is_err());
        assert!(list.operator_key(&mn_id.0).is_none());
    }
}
