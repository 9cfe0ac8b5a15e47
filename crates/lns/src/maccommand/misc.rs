// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Handlers for the remaining MAC commands.
//!
//! All follow the same pattern: validate structural pairing with the
//! pending request where one exists, mutate the session on success,
//! increment the per-CID error counter on a negative acknowledgement.

use super::{increment_error_count, require_pending, reset_error_count, AnswerContext};
use crate::gps;
use crate::storage::{DeviceSession, MacCommandBlock};
use crate::{Error, Result};
use chrono::Utc;
use lrwn::maccommand::{DeviceTimeAnsPayload, LinkCheckAnsPayload, Version};
use lrwn::{Cid, MacCommand};
use tracing::{info, warn};

pub fn handle_rx_param_setup_ans(
    ds: &mut DeviceSession,
    block: &MacCommandBlock,
    pending: Option<&MacCommandBlock>,
) -> Result<Vec<MacCommandBlock>> {
    let pending = require_pending(Cid::RxParamSetup, block.commands.len(), pending)?;

    let ans = match &block.commands[0] {
        MacCommand::RxParamSetupAns(p) => p,
        _ => return Err(Error::UnexpectedMacCommandPayload(Cid::RxParamSetup)),
    };
    let req = match &pending.commands[0] {
        MacCommand::RxParamSetupReq(p) => p,
        _ => return Err(Error::UnexpectedMacCommandPayload(Cid::RxParamSetup)),
    };

    if ans.all_ack() {
        ds.rx1_dr_offset = req.rx1_dr_offset;
        ds.rx2_dr = req.rx2_data_rate;
        ds.rx2_frequency = req.frequency;
        reset_error_count(ds, Cid::RxParamSetup);
        info!(
            dev_eui = %ds.dev_eui,
            rx1_dr_offset = req.rx1_dr_offset,
            rx2_dr = req.rx2_data_rate,
            rx2_frequency = req.frequency,
            "rx_param_setup request acknowledged"
        );
    } else {
        increment_error_count(ds, Cid::RxParamSetup);
        warn!(
            dev_eui = %ds.dev_eui,
            channel_ack = ans.channel_ack,
            rx2_data_rate_ack = ans.rx2_data_rate_ack,
            rx1_dr_offset_ack = ans.rx1_dr_offset_ack,
            "rx_param_setup request not acknowledged"
        );
    }
    Ok(Vec::new())
}

/// RXTimingSetupAns carries no status bits; receiving it is the ack.
pub fn handle_rx_timing_setup_ans(
    ds: &mut DeviceSession,
    pending: Option<&MacCommandBlock>,
) -> Result<Vec<MacCommandBlock>> {
    let pending = require_pending(Cid::RxTimingSetup, 1, pending)?;
    let req = match &pending.commands[0] {
        MacCommand::RxTimingSetupReq(p) => p,
        _ => return Err(Error::UnexpectedMacCommandPayload(Cid::RxTimingSetup)),
    };

    ds.rx_delay = req.delay;
    reset_error_count(ds, Cid::RxTimingSetup);
    info!(dev_eui = %ds.dev_eui, rx_delay = req.delay, "rx_timing_setup request acknowledged");
    Ok(Vec::new())
}

/// Device status is reported onward by the uplink path; the session only
/// records when it last asked.
pub fn handle_dev_status_ans(
    ds: &mut DeviceSession,
    block: &MacCommandBlock,
) -> Result<Vec<MacCommandBlock>> {
    let ans = match &block.commands[0] {
        MacCommand::DevStatusAns(p) => p,
        _ => return Err(Error::UnexpectedMacCommandPayload(Cid::DevStatus)),
    };

    ds.last_device_status_request = Some(Utc::now());
    info!(
        dev_eui = %ds.dev_eui,
        battery = ans.battery,
        margin = ans.margin,
        "dev_status answer received"
    );
    Ok(Vec::new())
}

pub fn handle_dl_channel_ans(
    ds: &mut DeviceSession,
    block: &MacCommandBlock,
    pending: Option<&MacCommandBlock>,
) -> Result<Vec<MacCommandBlock>> {
    let _ = require_pending(Cid::DlChannel, block.commands.len(), pending)?;

    let ans = match &block.commands[0] {
        MacCommand::DlChannelAns(p) => p,
        _ => return Err(Error::UnexpectedMacCommandPayload(Cid::DlChannel)),
    };

    if ans.channel_frequency_ok && ans.uplink_frequency_exists {
        reset_error_count(ds, Cid::DlChannel);
        info!(dev_eui = %ds.dev_eui, "dl_channel request acknowledged");
    } else {
        increment_error_count(ds, Cid::DlChannel);
        warn!(
            dev_eui = %ds.dev_eui,
            channel_frequency_ok = ans.channel_frequency_ok,
            uplink_frequency_exists = ans.uplink_frequency_exists,
            "dl_channel request not acknowledged"
        );
    }
    Ok(Vec::new())
}

/// DutyCycleAns carries no status bits.
pub fn handle_duty_cycle_ans(
    ds: &mut DeviceSession,
    pending: Option<&MacCommandBlock>,
) -> Result<Vec<MacCommandBlock>> {
    let _ = require_pending(Cid::DutyCycle, 1, pending)?;
    reset_error_count(ds, Cid::DutyCycle);
    info!(dev_eui = %ds.dev_eui, "duty_cycle request acknowledged");
    Ok(Vec::new())
}

/// TXParamSetupAns carries no status bits.
pub fn handle_tx_param_setup_ans(
    ds: &mut DeviceSession,
    pending: Option<&MacCommandBlock>,
) -> Result<Vec<MacCommandBlock>> {
    let _ = require_pending(Cid::TxParamSetup, 1, pending)?;
    reset_error_count(ds, Cid::TxParamSetup);
    info!(dev_eui = %ds.dev_eui, "tx_param_setup request acknowledged");
    Ok(Vec::new())
}

/// Answer with the server clock in GPS time.
pub fn handle_device_time_req(ds: &mut DeviceSession) -> Result<Vec<MacCommandBlock>> {
    let now = gps::time_since_gps_epoch(Utc::now());
    let fractional = ((now.subsec_millis() as u32 * 256) / 1_000) as u8;

    info!(dev_eui = %ds.dev_eui, gps_seconds = now.as_secs(), "device_time request received");

    Ok(vec![MacCommandBlock::new(
        Cid::DeviceTime,
        vec![MacCommand::DeviceTimeAns(DeviceTimeAnsPayload {
            seconds_since_gps_epoch: now.as_secs() as u32,
            fractional,
        })],
    )])
}

/// Margin relative to the demodulation floor of the uplink's data-rate.
pub fn handle_link_check_req(
    ctx: &AnswerContext<'_>,
    ds: &mut DeviceSession,
) -> Result<Vec<MacCommandBlock>> {
    let required = ctx.band.required_snr(ctx.rx_dr)?;
    let margin = (ctx.rx_best_snr - required).max(0.0) as u8;

    info!(
        dev_eui = %ds.dev_eui,
        margin,
        gw_cnt = ctx.rx_gateway_count,
        "link_check request received"
    );

    Ok(vec![MacCommandBlock::new(
        Cid::LinkCheck,
        vec![MacCommand::LinkCheckAns(LinkCheckAnsPayload {
            margin,
            gw_cnt: ctx.rx_gateway_count,
        })],
    )])
}

/// A ResetInd means the device fell back to its factory MAC state; mirror
/// that in the session and confirm with the negotiated minor version.
pub fn handle_reset_ind(
    ctx: &AnswerContext<'_>,
    ds: &mut DeviceSession,
    block: &MacCommandBlock,
) -> Result<Vec<MacCommandBlock>> {
    if block.commands.len() != 1 {
        return Err(Error::Validation(format!(
            "exactly one reset_ind expected, got {}",
            block.commands.len()
        )));
    }
    let dev_version = match &block.commands[0] {
        MacCommand::ResetInd(v) => *v,
        _ => return Err(Error::UnexpectedMacCommandPayload(Cid::Reset)),
    };

    let dp = ctx.device_profile;
    ds.rx_delay = dp.rx_delay_1;
    ds.rx1_dr_offset = dp.rx_dr_offset_1;
    ds.rx2_dr = dp.rx_data_rate_2;
    ds.rx2_frequency = dp.rx_freq_2;
    ds.extra_uplink_channels.clear();
    ds.enabled_uplink_channels = ctx.band.default_enabled_uplink_channels();
    ds.tx_power_index = 0;
    ds.nb_trans = 1;
    ds.mac_command_error_count.clear();

    info!(
        dev_eui = %ds.dev_eui,
        dev_lorawan_version_minor = dev_version.minor,
        "reset_ind received, session restored to factory state"
    );

    Ok(vec![MacCommandBlock::new(
        Cid::Reset,
        vec![MacCommand::ResetConf(Version {
            minor: dev_version.minor.min(1),
        })],
    )])
}

/// The device announces its ping-slot periodicity before entering Class B.
pub fn handle_ping_slot_info_req(
    ds: &mut DeviceSession,
    block: &MacCommandBlock,
) -> Result<Vec<MacCommandBlock>> {
    let req = match &block.commands[0] {
        MacCommand::PingSlotInfoReq(p) => p,
        _ => return Err(Error::UnexpectedMacCommandPayload(Cid::PingSlotInfo)),
    };

    // periodicity 0..=7: 2^(7-p) pings per beacon period
    ds.ping_slot_nb = 1 << (7 - req.periodicity.min(7)) as usize;
    // the device only negotiates ping slots once it tracks the beacon
    ds.beacon_locked = true;
    ds.beacon_locked_at = Some(Utc::now());

    info!(
        dev_eui = %ds.dev_eui,
        periodicity = req.periodicity,
        ping_slot_nb = ds.ping_slot_nb,
        "ping_slot_info request received"
    );

    Ok(vec![MacCommandBlock::new(
        Cid::PingSlotInfo,
        vec![MacCommand::PingSlotInfoAns],
    )])
}

pub fn handle_ping_slot_channel_ans(
    ds: &mut DeviceSession,
    block: &MacCommandBlock,
    pending: Option<&MacCommandBlock>,
) -> Result<Vec<MacCommandBlock>> {
    let pending = require_pending(Cid::PingSlotChannel, block.commands.len(), pending)?;

    let ans = match &block.commands[0] {
        MacCommand::PingSlotChannelAns(p) => p,
        _ => return Err(Error::UnexpectedMacCommandPayload(Cid::PingSlotChannel)),
    };
    let req = match &pending.commands[0] {
        MacCommand::PingSlotChannelReq(p) => p,
        _ => return Err(Error::UnexpectedMacCommandPayload(Cid::PingSlotChannel)),
    };

    if ans.channel_frequency_ok && ans.data_rate_ok {
        ds.ping_slot_frequency = req.frequency;
        ds.ping_slot_dr = req.dr;
        reset_error_count(ds, Cid::PingSlotChannel);
        info!(
            dev_eui = %ds.dev_eui,
            frequency = req.frequency,
            dr = req.dr,
            "ping_slot_channel request acknowledged"
        );
    } else {
        increment_error_count(ds, Cid::PingSlotChannel);
        warn!(
            dev_eui = %ds.dev_eui,
            channel_frequency_ok = ans.channel_frequency_ok,
            data_rate_ok = ans.data_rate_ok,
            "ping_slot_channel request not acknowledged"
        );
    }
    Ok(Vec::new())
}

pub fn handle_rejoin_param_setup_ans(
    ds: &mut DeviceSession,
    block: &MacCommandBlock,
    pending: Option<&MacCommandBlock>,
) -> Result<Vec<MacCommandBlock>> {
    let _ = require_pending(Cid::RejoinParamSetup, block.commands.len(), pending)?;

    let ans = match &block.commands[0] {
        MacCommand::RejoinParamSetupAns(p) => p,
        _ => return Err(Error::UnexpectedMacCommandPayload(Cid::RejoinParamSetup)),
    };

    // time_ok false means the device cannot honor the periodicity; the
    // count-based fallback still applies, so this is not a failure.
    reset_error_count(ds, Cid::RejoinParamSetup);
    info!(
        dev_eui = %ds.dev_eui,
        time_ok = ans.time_ok,
        "rejoin_param_setup request acknowledged"
    );
    Ok(Vec::new())
}

/// ADRParamSetupAns carries no status bits.
pub fn handle_adr_param_setup_ans(
    ds: &mut DeviceSession,
    pending: Option<&MacCommandBlock>,
) -> Result<Vec<MacCommandBlock>> {
    let _ = require_pending(Cid::AdrParamSetup, 1, pending)?;
    reset_error_count(ds, Cid::AdrParamSetup);
    info!(dev_eui = %ds.dev_eui, "adr_param_setup request acknowledged");
    Ok(Vec::new())
}

pub fn handle_beacon_freq_ans(
    ds: &mut DeviceSession,
    block: &MacCommandBlock,
    pending: Option<&MacCommandBlock>,
) -> Result<Vec<MacCommandBlock>> {
    let _ = require_pending(Cid::BeaconFreq, block.commands.len(), pending)?;

    let ans = match &block.commands[0] {
        MacCommand::BeaconFreqAns(p) => p,
        _ => return Err(Error::UnexpectedMacCommandPayload(Cid::BeaconFreq)),
    };

    if ans.beacon_frequency_ok {
        reset_error_count(ds, Cid::BeaconFreq);
        info!(dev_eui = %ds.dev_eui, "beacon_freq request acknowledged");
    } else {
        increment_error_count(ds, Cid::BeaconFreq);
        warn!(dev_eui = %ds.dev_eui, "beacon_freq request not acknowledged");
    }
    Ok(Vec::new())
}
