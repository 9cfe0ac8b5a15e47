// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MAC-command blocks in the cache.
//!
//! Two lifecycles: *queued* blocks wait for the next downlink opportunity
//! (insertion-ordered list per device); *pending* blocks were sent and
//! await the device's answer, keyed by `(DevEUI, CID)`. Both expire with
//! the device session. Inserting a pending block for a CID that already
//! has one replaces it.

use super::{mac_command_queue_key, pending_mac_command_key, Storage};
use crate::Result;
use lrwn::{Cid, EUI64, MacCommand};
use serde::{Deserialize, Serialize};

/// Commands sharing one CID, kept together because answers pair with
/// requests positionally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacCommandBlock {
    pub cid: Cid,
    pub commands: Vec<MacCommand>,
}

impl MacCommandBlock {
    pub fn new(cid: Cid, commands: Vec<MacCommand>) -> Self {
        MacCommandBlock { cid, commands }
    }

    /// Wire size of the block (CIDs + payloads).
    pub fn encoded_len(&self) -> Result<usize> {
        Ok(lrwn::maccommand::encode_many(&self.commands)?.len())
    }
}

impl Storage {
    // -- pending ---------------------------------------------------------

    pub fn set_pending_mac_command(&self, dev_eui: EUI64, block: &MacCommandBlock) -> Result<()> {
        self.cache().set(
            &pending_mac_command_key(dev_eui, block.cid),
            serde_json::to_vec(block)?,
            self.session_ttl(),
        );
        Ok(())
    }

    pub fn get_pending_mac_command(
        &self,
        dev_eui: EUI64,
        cid: Cid,
    ) -> Result<Option<MacCommandBlock>> {
        match self.cache().get(&pending_mac_command_key(dev_eui, cid)) {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn delete_pending_mac_command(&self, dev_eui: EUI64, cid: Cid) {
        self.cache().del(&pending_mac_command_key(dev_eui, cid));
    }

    // -- queued ----------------------------------------------------------

    /// Append a block to the device's downlink MAC queue.
    pub fn create_mac_command_queue_item(
        &self,
        dev_eui: EUI64,
        block: &MacCommandBlock,
    ) -> Result<()> {
        let key = mac_command_queue_key(dev_eui);
        let mut queue = self.read_mac_command_queue_raw(&key)?;
        queue.push(block.clone());
        self.cache()
            .set(&key, serde_json::to_vec(&queue)?, self.session_ttl());
        Ok(())
    }

    pub fn get_mac_command_queue(&self, dev_eui: EUI64) -> Result<Vec<MacCommandBlock>> {
        self.read_mac_command_queue_raw(&mac_command_queue_key(dev_eui))
    }

    /// Remove one block (matched by content) from the queue.
    pub fn delete_mac_command_queue_item(
        &self,
        dev_eui: EUI64,
        block: &MacCommandBlock,
    ) -> Result<()> {
        let key = mac_command_queue_key(dev_eui);
        let mut queue = self.read_mac_command_queue_raw(&key)?;
        if let Some(pos) = queue.iter().position(|b| b == block) {
            queue.remove(pos);
        }
        self.cache()
            .set(&key, serde_json::to_vec(&queue)?, self.session_ttl());
        Ok(())
    }

    pub fn flush_mac_command_queue(&self, dev_eui: EUI64) {
        self.cache().del(&mac_command_queue_key(dev_eui));
    }

    fn read_mac_command_queue_raw(&self, key: &str) -> Result<Vec<MacCommandBlock>> {
        match self.cache().get(key) {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lrwn::maccommand::DevStatusAnsPayload;
    use std::time::Duration;

    fn storage() -> Storage {
        Storage::open_in_memory(Duration::from_secs(60)).unwrap()
    }

    fn dev_status_block() -> MacCommandBlock {
        MacCommandBlock::new(Cid::DevStatus, vec![MacCommand::DevStatusReq])
    }

    #[test]
    fn test_pending_insert_replaces() {
        let s = storage();
        let dev_eui = EUI64([1; 8]);

        let first = dev_status_block();
        let second = MacCommandBlock::new(
            Cid::DevStatus,
            vec![MacCommand::DevStatusAns(DevStatusAnsPayload {
                battery: 1,
                margin: 2,
            })],
        );

        s.set_pending_mac_command(dev_eui, &first).unwrap();
        s.set_pending_mac_command(dev_eui, &second).unwrap();

        let got = s.get_pending_mac_command(dev_eui, Cid::DevStatus).unwrap();
        assert_eq!(got, Some(second));
    }

    #[test]
    fn test_pending_absent_is_none() {
        let s = storage();
        assert_eq!(
            s.get_pending_mac_command(EUI64([1; 8]), Cid::LinkAdr).unwrap(),
            None
        );
    }

    #[test]
    fn test_queue_preserves_insertion_order() {
        let s = storage();
        let dev_eui = EUI64([1; 8]);

        let a = dev_status_block();
        let b = MacCommandBlock::new(Cid::DeviceTime, vec![MacCommand::DeviceTimeReq]);
        s.create_mac_command_queue_item(dev_eui, &a).unwrap();
        s.create_mac_command_queue_item(dev_eui, &b).unwrap();

        let queue = s.get_mac_command_queue(dev_eui).unwrap();
        assert_eq!(queue, vec![a.clone(), b.clone()]);

        s.delete_mac_command_queue_item(dev_eui, &a).unwrap();
        assert_eq!(s.get_mac_command_queue(dev_eui).unwrap(), vec![b]);

        s.flush_mac_command_queue(dev_eui);
        assert!(s.get_mac_command_queue(dev_eui).unwrap().is_empty());
    }
}
