// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data-uplink handling.
//!
//! DevAddr lookup can match several sessions (addresses are not unique);
//! the real sender is the one whose keys validate the MIC with an
//! acceptable frame counter. After validation the session advances, MAC
//! answers run through the engine, signal quality is recorded, the
//! application payload goes to the app server and a Class A downlink
//! opportunity is scheduled.

use super::RxPacket;
use crate::backend::{DownlinkAckRequest, UplinkDataRequest};
use crate::context::ServerContext;
use crate::downlink;
use crate::maccommand::{self, AnswerContext};
use crate::storage::device_session::get_full_f_cnt_up;
use crate::storage::{
    Device, DeviceGatewayRxInfo, DeviceGatewayRxInfoSet, DeviceProfile, DeviceSession,
    MacCommandBlock, ServiceProfile,
};
use crate::{Error, Result};
use lrwn::crypto::Direction;
use tracing::{info, warn};

pub fn handle_data_up(ctx: &ServerContext, rx_packet: RxPacket) -> Result<()> {
    let dev_addr = match rx_packet.phy_payload.mac_payload() {
        Some(mac) => mac.fhdr.dev_addr,
        None => return Err(Error::Validation("mac-payload expected".into())),
    };

    let (mut ds, full_f_cnt, mut phy) = select_session(ctx, &rx_packet, dev_addr)?;

    let device = ctx.storage.get_device(ds.dev_eui)?;
    ensure_enabled(&device)?;
    let dp = ctx
        .storage
        .get_and_cache_device_profile(device.device_profile_id)?;
    let sp = ctx.storage.get_service_profile(device.service_profile_id)?;

    let confirmed = phy.mhdr.m_type.is_confirmed();
    let (f_ctrl, f_port) = {
        let mac = phy.mac_payload().expect("validated data frame");
        (mac.fhdr.f_ctrl, mac.f_port)
    };

    // device acknowledged an outstanding confirmed downlink
    if f_ctrl.ack && ds.confirmed_downlink_pending {
        handle_downlink_ack(ctx, &mut ds)?;
    }

    // counters advance before anything downstream can fail per-frame
    ds.f_cnt_up = full_f_cnt.wrapping_add(1);
    ds.conf_f_cnt = if confirmed { full_f_cnt } else { 0 };

    // MAC commands arrive in FOpts, or as the whole FRMPayload on FPort 0
    let mac_commands = extract_mac_commands(&mut phy, &ds, f_port)?;
    handle_mac_answers(ctx, &mut ds, &dp, &rx_packet, mac_commands);

    save_rx_info_set(ctx, &ds, &rx_packet)?;
    ctx.storage.save_device_session(&ds)?;

    // application payload (FPort > 0)
    if let Some(port) = f_port {
        if port > 0 {
            forward_to_application_server(ctx, &phy, &ds, &sp, &rx_packet, full_f_cnt, confirmed)?;
        }
    }

    info!(
        dev_eui = %ds.dev_eui,
        dev_addr = %ds.dev_addr,
        f_cnt = full_f_cnt,
        confirmed,
        "uplink frame processed"
    );

    // Class A response window
    downlink::data::handle_class_a_response(ctx, ds, &device, &dp, &sp, &rx_packet, confirmed)
}

/// Try every session registered for the address: reconstruct the full
/// counter, stamp it into the frame and check the MIC with the session's
/// keys. Exactly one session can win.
fn select_session(
    ctx: &ServerContext,
    rx_packet: &RxPacket,
    dev_addr: lrwn::DevAddr,
) -> Result<(DeviceSession, u32, lrwn::PhyPayload)> {
    let sessions = ctx.storage.get_device_sessions_for_dev_addr(dev_addr)?;
    if sessions.is_empty() {
        return Err(Error::NoDeviceSession);
    }

    let truncated = rx_packet
        .phy_payload
        .mac_payload()
        .expect("data frame")
        .fhdr
        .f_cnt;

    for ds in sessions {
        let full_f_cnt = if ds.skip_fcnt_check {
            Some(truncated)
        } else {
            let dp = ctx
                .storage
                .get_device(ds.dev_eui)
                .and_then(|d| ctx.storage.get_and_cache_device_profile(d.device_profile_id));
            let supports_32bit = dp.map(|p| p.supports_32bit_fcnt).unwrap_or(true);
            get_full_f_cnt_up(
                ds.f_cnt_up,
                truncated,
                supports_32bit,
                ctx.config.network.fcnt_wrap_tolerance,
            )
        };
        let Some(full_f_cnt) = full_f_cnt else {
            continue;
        };

        let mut phy = rx_packet.phy_payload.clone();
        phy.mac_payload_mut().expect("data frame").fhdr.f_cnt = full_f_cnt;

        let valid = if ds.lorawan_11() {
            let conf_f_cnt = if phy.mac_payload().expect("data frame").fhdr.f_ctrl.ack {
                (ds.conf_f_cnt_down & 0xffff) as u16
            } else {
                0
            };
            let tx_ch = ctx
                .band
                .uplink_channel_index(rx_packet.tx_info.frequency, &ds.extra_uplink_channels)?
                as u8;
            phy.validate_uplink_mic_11(
                &ds.s_nwk_s_int_key,
                &ds.f_nwk_s_int_key,
                conf_f_cnt,
                rx_packet.dr,
                tx_ch,
            )?
        } else {
            phy.validate_mic_legacy(Direction::Uplink, &ds.f_nwk_s_int_key)?
        };

        if valid {
            return Ok((ds, full_f_cnt, phy));
        }
    }

    Err(Error::InvalidMic)
}

fn handle_downlink_ack(ctx: &ServerContext, ds: &mut DeviceSession) -> Result<()> {
    ds.confirmed_downlink_pending = false;

    // resolve the pending queue item the ack belongs to
    if let Ok(qi) = ctx.storage.get_next_device_queue_item(ds.dev_eui) {
        if qi.is_pending {
            ctx.storage.delete_device_queue_item(qi.id)?;
            ctx.app_server.handle_downlink_ack(DownlinkAckRequest {
                dev_eui: ds.dev_eui,
                f_cnt: qi.f_cnt,
                acknowledged: true,
            })?;
            info!(dev_eui = %ds.dev_eui, f_cnt = qi.f_cnt, "confirmed downlink acknowledged");
        }
    }
    Ok(())
}

fn extract_mac_commands(
    phy: &mut lrwn::PhyPayload,
    ds: &DeviceSession,
    f_port: Option<u8>,
) -> Result<Vec<MacCommandBlock>> {
    let raw = if f_port == Some(0) {
        phy.crypt_frm_payload(Direction::Uplink, &ds.nwk_s_enc_key);
        phy.mac_payload().expect("data frame").frm_payload.clone()
    } else {
        phy.mac_payload().expect("data frame").fhdr.f_opts.clone()
    };
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let commands = match lrwn::maccommand::decode_many(true, &raw) {
        Ok(c) => c,
        Err(e) => {
            // a device sending garbage commands should not lose the frame
            warn!(dev_eui = %ds.dev_eui, error = %e, "decode mac-commands error, ignoring");
            return Ok(Vec::new());
        }
    };

    // group consecutive commands sharing a CID into blocks
    let mut blocks: Vec<MacCommandBlock> = Vec::new();
    for cmd in commands {
        match blocks.last_mut() {
            Some(block) if block.cid == cmd.cid() => block.commands.push(cmd),
            _ => blocks.push(MacCommandBlock::new(cmd.cid(), vec![cmd])),
        }
    }
    Ok(blocks)
}

/// Run each block through the engine. A failing block aborts only itself:
/// it is dropped, logged and counted against the CID.
fn handle_mac_answers(
    ctx: &ServerContext,
    ds: &mut DeviceSession,
    dp: &DeviceProfile,
    rx_packet: &RxPacket,
    blocks: Vec<MacCommandBlock>,
) {
    let best_snr = rx_packet
        .rx_info_set
        .iter()
        .map(|rx| rx.lora_snr)
        .fold(f64::MIN, f64::max);

    let answer_ctx = AnswerContext {
        band: &ctx.band,
        device_profile: dp,
        rx_gateway_count: rx_packet.rx_info_set.len().min(255) as u8,
        rx_best_snr: best_snr,
        rx_dr: rx_packet.dr,
    };

    for block in blocks {
        let pending = match ctx.storage.get_pending_mac_command(ds.dev_eui, block.cid) {
            Ok(p) => p,
            Err(e) => {
                warn!(dev_eui = %ds.dev_eui, cid = ?block.cid, error = %e,
                    "read pending mac-command error");
                None
            }
        };

        match maccommand::handle_answer(&answer_ctx, ds, &block, pending.as_ref()) {
            Ok(responses) => {
                for response in responses {
                    if let Err(e) = ctx.storage.create_mac_command_queue_item(ds.dev_eui, &response)
                    {
                        warn!(dev_eui = %ds.dev_eui, cid = ?response.cid, error = %e,
                            "queue mac-command response error");
                    }
                }
            }
            Err(e) => {
                warn!(dev_eui = %ds.dev_eui, cid = ?block.cid, error = %e,
                    "handle mac-command block error, block dropped");
                *ds.mac_command_error_count.entry(block.cid).or_insert(0) += 1;
            }
        }

        ctx.storage.delete_pending_mac_command(ds.dev_eui, block.cid);
    }
}

fn save_rx_info_set(ctx: &ServerContext, ds: &DeviceSession, rx_packet: &RxPacket) -> Result<()> {
    let set = DeviceGatewayRxInfoSet {
        dev_eui: ds.dev_eui,
        dr: rx_packet.dr,
        items: rx_packet
            .rx_info_set
            .iter()
            .map(|rx| DeviceGatewayRxInfo {
                gateway_id: rx.gateway_id,
                rssi: rx.rssi,
                lora_snr: rx.lora_snr,
                context: rx.context.clone(),
            })
            .collect(),
    };
    ctx.storage.save_device_gateway_rx_info_set(&set)
}

#[allow(clippy::too_many_arguments)]
fn forward_to_application_server(
    ctx: &ServerContext,
    phy: &lrwn::PhyPayload,
    ds: &DeviceSession,
    sp: &ServiceProfile,
    rx_packet: &RxPacket,
    full_f_cnt: u32,
    confirmed: bool,
) -> Result<()> {
    let mac = phy.mac_payload().expect("data frame");
    let f_port = mac.f_port.unwrap_or(0);

    // FRMPayload stays encrypted under the AppSKey, which never reaches
    // the network server; the app server decrypts.
    ctx.app_server.handle_uplink_data(UplinkDataRequest {
        dev_eui: ds.dev_eui,
        join_eui: ds.join_eui,
        f_port,
        f_cnt: full_f_cnt,
        adr: mac.fhdr.f_ctrl.adr,
        dr: rx_packet.dr,
        confirmed,
        data: mac.frm_payload.clone(),
        tx_info: rx_packet.tx_info.clone(),
        rx_info: if sp.add_gw_metadata {
            rx_packet.rx_info_set.clone()
        } else {
            Vec::new()
        },
    })
}

pub(crate) fn ensure_enabled(device: &Device) -> Result<()> {
    if device.is_disabled {
        return Err(Error::Validation(format!(
            "device {} is disabled",
            device.dev_eui
        )));
    }
    Ok(())
}
