// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LinkADRAns handling.

use super::{increment_error_count, require_pending, reset_error_count, AnswerContext};
use crate::storage::{DeviceSession, MacCommandBlock};
use crate::{Error, Result};
use lrwn::maccommand::LinkAdrReqPayload;
use lrwn::{Cid, MacCommand};
use tracing::{info, warn};

/// Apply a LinkADRAns against the pending LinkADRReq block.
///
/// The device acknowledges the whole block at once; every answer must set
/// all three status bits for the changes to apply. On success the enabled
/// channel set is rebuilt from the pending mask banks and DR, TX power and
/// NbTrans are taken from the last pending payload.
pub fn handle_link_adr_ans(
    ctx: &AnswerContext<'_>,
    ds: &mut DeviceSession,
    block: &MacCommandBlock,
    pending: Option<&MacCommandBlock>,
) -> Result<Vec<MacCommandBlock>> {
    let pending = require_pending(Cid::LinkAdr, block.commands.len(), pending)?;

    let answers = block
        .commands
        .iter()
        .map(|cmd| match cmd {
            MacCommand::LinkAdrAns(p) => Ok(*p),
            _ => Err(Error::UnexpectedMacCommandPayload(Cid::LinkAdr)),
        })
        .collect::<Result<Vec<_>>>()?;

    let requests = pending
        .commands
        .iter()
        .map(|cmd| match cmd {
            MacCommand::LinkAdrReq(p) => Ok(*p),
            _ => Err(Error::UnexpectedMacCommandPayload(Cid::LinkAdr)),
        })
        .collect::<Result<Vec<LinkAdrReqPayload>>>()?;

    if !answers.iter().all(|a| a.all_ack()) {
        increment_error_count(ds, Cid::LinkAdr);
        let nack = answers.iter().find(|a| !a.all_ack()).expect("nack present");
        warn!(
            dev_eui = %ds.dev_eui,
            channel_mask_ack = nack.channel_mask_ack,
            data_rate_ack = nack.data_rate_ack,
            power_ack = nack.power_ack,
            "link_adr request not acknowledged"
        );
        return Ok(Vec::new());
    }

    let mut enabled: Vec<usize> = Vec::new();
    for req in &requests {
        let bank = req.ch_mask_cntl as usize * 16;
        for (i, set) in req.ch_mask.iter().enumerate() {
            if *set {
                enabled.push(bank + i);
            }
        }
    }
    enabled.sort_unstable();
    enabled.dedup();

    let last = match requests.last() {
        Some(last) => last,
        None => return Err(Error::NoPendingMacCommand(Cid::LinkAdr)),
    };
    ds.dr = last.data_rate;
    ds.tx_power_index = last.tx_power;
    ds.nb_trans = last.nb_rep;
    ds.enabled_uplink_channels = enabled;
    reset_error_count(ds, Cid::LinkAdr);

    if !ds.channels_are_valid(ctx.band.uplink_channels().len()) {
        warn!(dev_eui = %ds.dev_eui, "acknowledged channel mask enables undefined channels");
    }

    info!(
        dev_eui = %ds.dev_eui,
        dr = ds.dr,
        tx_power_index = ds.tx_power_index,
        nb_trans = ds.nb_trans,
        enabled_channels = ?ds.enabled_uplink_channels,
        "link_adr request acknowledged"
    );

    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::eu868;
    use crate::storage::DeviceProfile;
    use lrwn::maccommand::LinkAdrAnsPayload;

    fn ctx_parts() -> (crate::region::Band, DeviceProfile) {
        (eu868(), DeviceProfile::default())
    }

    fn pending_block() -> MacCommandBlock {
        let mut ch_mask = [false; 16];
        ch_mask[0] = true;
        ch_mask[1] = true;
        ch_mask[2] = true;
        MacCommandBlock::new(
            Cid::LinkAdr,
            vec![MacCommand::LinkAdrReq(LinkAdrReqPayload {
                data_rate: 5,
                tx_power: 3,
                ch_mask,
                ch_mask_cntl: 0,
                nb_rep: 2,
            })],
        )
    }

    fn ans_block(ok: bool) -> MacCommandBlock {
        MacCommandBlock::new(
            Cid::LinkAdr,
            vec![MacCommand::LinkAdrAns(LinkAdrAnsPayload {
                channel_mask_ack: true,
                data_rate_ack: ok,
                power_ack: true,
            })],
        )
    }

    #[test]
    fn test_ack_applies_last_payload() {
        let (band, dp) = ctx_parts();
        let ctx = AnswerContext {
            band: &band,
            device_profile: &dp,
            rx_gateway_count: 1,
            rx_best_snr: 0.0,
            rx_dr: 0,
        };
        let mut ds = DeviceSession::default();
        ds.mac_command_error_count.insert(Cid::LinkAdr, 2);

        let pending = pending_block();
        let resp = handle_link_adr_ans(&ctx, &mut ds, &ans_block(true), Some(&pending)).unwrap();
        assert!(resp.is_empty());
        assert_eq!(ds.dr, 5);
        assert_eq!(ds.tx_power_index, 3);
        assert_eq!(ds.nb_trans, 2);
        assert_eq!(ds.enabled_uplink_channels, vec![0, 1, 2]);
        assert!(ds.mac_command_error_count.get(&Cid::LinkAdr).is_none());
    }

    #[test]
    fn test_nack_increments_error_count() {
        let (band, dp) = ctx_parts();
        let ctx = AnswerContext {
            band: &band,
            device_profile: &dp,
            rx_gateway_count: 1,
            rx_best_snr: 0.0,
            rx_dr: 0,
        };
        let mut ds = DeviceSession::default();

        let pending = pending_block();
        handle_link_adr_ans(&ctx, &mut ds, &ans_block(false), Some(&pending)).unwrap();
        assert_eq!(ds.dr, 0);
        assert_eq!(ds.mac_command_error_count[&Cid::LinkAdr], 1);
    }

    #[test]
    fn test_missing_pending_is_protocol_error() {
        let (band, dp) = ctx_parts();
        let ctx = AnswerContext {
            band: &band,
            device_profile: &dp,
            rx_gateway_count: 1,
            rx_best_snr: 0.0,
            rx_dr: 0,
        };
        let mut ds = DeviceSession::default();
        assert!(matches!(
            handle_link_adr_ans(&ctx, &mut ds, &ans_block(true), None),
            Err(Error::NoPendingMacCommand(Cid::LinkAdr))
        ));
    }
}
