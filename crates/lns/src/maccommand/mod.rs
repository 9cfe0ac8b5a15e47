// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MAC-command engine.
//!
//! Turns server intent into request blocks ([`channels`],
//! [`new_channel::request_new_channels`]) and interprets device answers,
//! mutating the session in place. Answers pair with the pending request
//! positionally; a count mismatch is a protocol violation that drops the
//! block.
//!
//! Per-CID error counters track repeated negative acknowledgements. Once a
//! counter passes the configured threshold the request generators stop
//! re-enqueuing that CID, so a device that keeps refusing a setting is
//! left alone instead of being hammered every downlink.

pub mod channels;
pub mod link_adr;
pub mod misc;
pub mod new_channel;
pub mod rekey;

use crate::region::Band;
use crate::storage::{DeviceProfile, DeviceSession, MacCommandBlock};
use crate::{Error, Result};
use lrwn::Cid;
use tracing::{error, warn};

/// Collaborators and uplink context for answer handling.
pub struct AnswerContext<'a> {
    pub band: &'a Band,
    /// Device profile of the answering device (reset handling reads the
    /// factory defaults from it).
    pub device_profile: &'a DeviceProfile,
    /// Number of gateways that received the uplink carrying the answers.
    pub rx_gateway_count: u8,
    /// Best SNR among those gateways.
    pub rx_best_snr: f64,
    /// Data-rate of that uplink.
    pub rx_dr: u8,
}

/// Dispatch one answer (or device-initiated request) block.
///
/// Returns response blocks to queue for the next downlink. The caller is
/// responsible for fetching `pending` from the pending store and for
/// deleting it afterwards.
pub fn handle_answer(
    ctx: &AnswerContext<'_>,
    ds: &mut DeviceSession,
    block: &MacCommandBlock,
    pending: Option<&MacCommandBlock>,
) -> Result<Vec<MacCommandBlock>> {
    if block.commands.is_empty() {
        return Err(Error::Validation("empty mac-command block".into()));
    }

    match block.cid {
        Cid::LinkAdr => link_adr::handle_link_adr_ans(ctx, ds, block, pending),
        Cid::NewChannel => new_channel::handle_new_channel_ans(ds, block, pending),
        Cid::Rekey => rekey::handle_rekey_ind(ds, block),
        Cid::Reset => misc::handle_reset_ind(ctx, ds, block),
        Cid::LinkCheck => misc::handle_link_check_req(ctx, ds),
        Cid::RxParamSetup => misc::handle_rx_param_setup_ans(ds, block, pending),
        Cid::RxTimingSetup => misc::handle_rx_timing_setup_ans(ds, pending),
        Cid::DutyCycle => misc::handle_duty_cycle_ans(ds, pending),
        Cid::DevStatus => misc::handle_dev_status_ans(ds, block),
        Cid::DlChannel => misc::handle_dl_channel_ans(ds, block, pending),
        Cid::TxParamSetup => misc::handle_tx_param_setup_ans(ds, pending),
        Cid::DeviceTime => misc::handle_device_time_req(ds),
        Cid::PingSlotInfo => misc::handle_ping_slot_info_req(ds, block),
        Cid::PingSlotChannel => misc::handle_ping_slot_channel_ans(ds, block, pending),
        Cid::RejoinParamSetup => misc::handle_rejoin_param_setup_ans(ds, block, pending),
        Cid::AdrParamSetup => misc::handle_adr_param_setup_ans(ds, pending),
        Cid::BeaconFreq => misc::handle_beacon_freq_ans(ds, block, pending),
        cid => {
            error!(dev_eui = %ds.dev_eui, cid = ?cid, "unexpected uplink mac-command");
            Err(Error::UnexpectedMacCommandPayload(cid))
        }
    }
}

/// True once the device refused this CID more often than the threshold
/// allows; request generators skip the CID and log once per attempt.
pub fn exceeded_error_count(ds: &DeviceSession, cid: Cid, threshold: u32) -> bool {
    let count = ds.mac_command_error_count.get(&cid).copied().unwrap_or(0);
    if count > threshold {
        warn!(dev_eui = %ds.dev_eui, cid = ?cid, count, "mac-command error count exceeded, giving up");
        return true;
    }
    false
}

pub(crate) fn reset_error_count(ds: &mut DeviceSession, cid: Cid) {
    ds.mac_command_error_count.remove(&cid);
}

pub(crate) fn increment_error_count(ds: &mut DeviceSession, cid: Cid) {
    *ds.mac_command_error_count.entry(cid).or_insert(0) += 1;
}

/// Positional pairing contract shared by all per-command handlers: the
/// answer count must match the pending request count.
pub(crate) fn require_pending<'a>(
    cid: Cid,
    answers: usize,
    pending: Option<&'a MacCommandBlock>,
) -> Result<&'a MacCommandBlock> {
    let pending = pending.ok_or(Error::NoPendingMacCommand(cid))?;
    if pending.commands.is_empty() {
        return Err(Error::NoPendingMacCommand(cid));
    }
    if answers != pending.commands.len() {
        return Err(Error::PendingMacCommandCount {
            cid,
            got: answers,
            want: pending.commands.len(),
        });
    }
    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_count_threshold() {
        let mut ds = DeviceSession::default();
        assert!(!exceeded_error_count(&ds, Cid::LinkAdr, 3));

        for _ in 0..4 {
            increment_error_count(&mut ds, Cid::LinkAdr);
        }
        assert!(exceeded_error_count(&ds, Cid::LinkAdr, 3));

        reset_error_count(&mut ds, Cid::LinkAdr);
        assert!(!exceeded_error_count(&ds, Cid::LinkAdr, 3));
    }

    #[test]
    fn test_require_pending_count_mismatch() {
        let pending = MacCommandBlock::new(
            Cid::NewChannel,
            vec![lrwn::MacCommand::DevStatusReq, lrwn::MacCommand::DevStatusReq],
        );
        assert!(matches!(
            require_pending(Cid::NewChannel, 1, Some(&pending)),
            Err(Error::PendingMacCommandCount { got: 1, want: 2, .. })
        ));
        assert!(matches!(
            require_pending(Cid::NewChannel, 1, None),
            Err(Error::NoPendingMacCommand(Cid::NewChannel))
        ));
    }
}
