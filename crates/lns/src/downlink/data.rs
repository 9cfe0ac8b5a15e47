// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data-downlink assembly.
//!
//! One assembly path serves all windows: pull frame candidates (pending
//! MAC blocks, the application-queue head, an outstanding confirmed
//! retransmission), map them onto the window's RF parameters, walk the
//! device's gateways strongest-first until one accepts, then commit the
//! session state.
//!
//! MAC commands ride in FOpts up to 15 bytes; a larger batch is sent as a
//! MAC-only FPort-0 frame (encrypted under NwkSEncKey) and the application
//! payload waits for the next opportunity.

use super::{modulation_for_dr, tx_power_dbm};
use crate::context::ServerContext;
use crate::gateway::{DownlinkFrame, DownlinkFrameItem, DownlinkTiming, DownlinkTxInfo};
use crate::gps;
use crate::maccommand::{self, channels, new_channel};
use crate::region::Channel;
use crate::storage::{
    Device, DeviceMode, DeviceProfile, DeviceQueueItem, DeviceSession, MacCommandBlock,
    ServiceProfile,
};
use crate::uplink::RxPacket;
use crate::{Error, Result};
use chrono::Utc;
use lrwn::crypto::Direction;
use lrwn::{Cid, FCtrl, Fhdr, MType, MacCommand, MacPayload, Major, Mhdr, Payload, PhyPayload};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

const JOIN_ACCEPT_DELAY_1: Duration = Duration::from_secs(5);
const JOIN_ACCEPT_DELAY_2: Duration = Duration::from_secs(6);

/// Receive window the frame is being assembled for.
enum Window {
    /// RX1 + RX2 fallback relative to the uplink.
    ClassA {
        uplink_frequency: u32,
        uplink_dr: u8,
    },
    /// RX2 parameters, transmit immediately.
    ClassC,
    /// Ping slot, beacon-aligned emit time.
    ClassB { emit_at: Duration },
}

/// Class A: respond in the device's receive windows right after a valid
/// uplink. `must_ack` is set for confirmed uplinks.
pub fn handle_class_a_response(
    ctx: &ServerContext,
    ds: DeviceSession,
    device: &Device,
    dp: &DeviceProfile,
    sp: &ServiceProfile,
    rx_packet: &RxPacket,
    must_ack: bool,
) -> Result<()> {
    let gateways: Vec<(lrwn::EUI64, Vec<u8>)> = rx_packet
        .rx_info_set
        .iter()
        .map(|rx| (rx.gateway_id, rx.context.clone()))
        .collect();

    send_data_down(
        ctx,
        ds,
        device,
        dp,
        sp,
        &gateways,
        Window::ClassA {
            uplink_frequency: rx_packet.tx_info.frequency,
            uplink_dr: rx_packet.dr,
        },
        must_ack,
    )
}

/// Scheduler entry for Class B/C devices with queued downlinks.
pub fn handle_scheduled_device_queue(ctx: &ServerContext, dev_eui: lrwn::EUI64) -> Result<()> {
    let ds = match ctx.storage.get_device_session(dev_eui) {
        Ok(ds) => ds,
        Err(Error::NotFound) => {
            // no session: the queue can never drain; drop the head
            if let Ok(qi) = ctx.storage.get_next_device_queue_item(dev_eui) {
                ctx.storage.delete_device_queue_item(qi.id)?;
            }
            warn!(dev_eui = %dev_eui, "queue item without device-session dropped");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let device = ctx.storage.get_device(dev_eui)?;
    let dp = ctx
        .storage
        .get_and_cache_device_profile(device.device_profile_id)?;
    let sp = ctx.storage.get_service_profile(device.service_profile_id)?;

    let rx_info = ctx.storage.get_device_gateway_rx_info_set(dev_eui)?;
    let gateways: Vec<(lrwn::EUI64, Vec<u8>)> = rx_info
        .items
        .iter()
        .map(|item| (item.gateway_id, item.context.clone()))
        .collect();

    let window = match device.mode {
        DeviceMode::B => {
            let qi = ctx.storage.get_next_device_queue_item(dev_eui)?;
            let emit_at = match qi.emit_at_gps_epoch {
                Some(t) => t,
                None => next_device_ping_slot(&ds)?,
            };
            Window::ClassB { emit_at }
        }
        _ => Window::ClassC,
    };

    send_data_down(ctx, ds, &device, &dp, &sp, &gateways, window, false)
}

/// Next ping slot for a device session, shortly after now.
pub fn next_device_ping_slot(ds: &DeviceSession) -> Result<Duration> {
    if ds.ping_slot_nb == 0 {
        return Err(Error::Validation(format!(
            "device {} has no ping-slot periodicity",
            ds.dev_eui
        )));
    }
    let ping_period = lrwn::classb::PING_PERIOD_BASE / ds.ping_slot_nb;
    Ok(lrwn::classb::next_ping_slot_after(
        gps::time_since_gps_epoch(Utc::now()),
        ds.dev_addr,
        ping_period,
    )?)
}

/// Transmit a join-accept in the join receive windows (5 s / 6 s).
pub fn send_join_accept(
    ctx: &ServerContext,
    ds: &DeviceSession,
    rx_packet: &RxPacket,
    phy_payload: Vec<u8>,
) -> Result<()> {
    let rx1_freq = ctx
        .band
        .rx1_frequency(rx_packet.tx_info.frequency, &ds.extra_uplink_channels)?;
    let rx1_dr = ctx.band.rx1_data_rate(rx_packet.dr, 0);

    for rx in &rx_packet.rx_info_set {
        let frame = DownlinkFrame {
            downlink_id: ctx.next_downlink_id(),
            gateway_id: rx.gateway_id,
            items: vec![
                DownlinkFrameItem {
                    phy_payload: phy_payload.clone(),
                    tx_info: DownlinkTxInfo {
                        frequency: rx1_freq,
                        power: ctx.band.max_eirp,
                        modulation: modulation_for_dr(ctx, rx1_dr)?,
                        timing: DownlinkTiming::Delay {
                            delay: JOIN_ACCEPT_DELAY_1,
                        },
                        context: rx.context.clone(),
                    },
                },
                DownlinkFrameItem {
                    phy_payload: phy_payload.clone(),
                    tx_info: DownlinkTxInfo {
                        frequency: ctx.band.rx2_frequency,
                        power: ctx.band.max_eirp,
                        modulation: modulation_for_dr(ctx, ctx.band.rx2_dr)?,
                        timing: DownlinkTiming::Delay {
                            delay: JOIN_ACCEPT_DELAY_2,
                        },
                        context: rx.context.clone(),
                    },
                },
            ],
        };

        match ctx.gateway.send_downlink_frame(frame) {
            Ok(()) => {
                info!(dev_eui = %ds.dev_eui, gateway_id = %rx.gateway_id, "join-accept sent");
                return Ok(());
            }
            Err(e) => {
                warn!(gateway_id = %rx.gateway_id, error = %e, "join-accept refused, trying next gateway");
            }
        }
    }
    Err(Error::NoGateway)
}

#[allow(clippy::too_many_arguments)]
fn send_data_down(
    ctx: &ServerContext,
    mut ds: DeviceSession,
    device: &Device,
    dp: &DeviceProfile,
    sp: &ServiceProfile,
    gateways: &[(lrwn::EUI64, Vec<u8>)],
    window: Window,
    must_ack: bool,
) -> Result<()> {
    // -- frame candidates ------------------------------------------------
    let mac_blocks = collect_mac_blocks(ctx, &mut ds, sp);
    let queue_items = ctx.storage.get_device_queue_items(ds.dev_eui)?;
    let queue_item = next_sendable_item(&queue_items);

    if mac_blocks.is_empty() && queue_item.is_none() && !must_ack {
        return Ok(());
    }

    // -- RF parameters ---------------------------------------------------
    let (primary_dr, primary_freq) = match &window {
        Window::ClassA {
            uplink_frequency,
            uplink_dr,
        } => (
            ctx.band.rx1_data_rate(*uplink_dr, ds.rx1_dr_offset),
            ctx.band
                .rx1_frequency(*uplink_frequency, &ds.extra_uplink_channels)?,
        ),
        Window::ClassC => (ds.rx2_dr, ds.rx2_frequency),
        Window::ClassB { .. } => (ds.ping_slot_dr, ds.ping_slot_frequency),
    };
    let max_payload = ctx.band.max_payload_size(primary_dr)?;

    // -- payload-size validation -----------------------------------------
    let queue_item = match queue_item {
        Some(qi) if qi.frm_payload.len() > max_payload => {
            warn!(
                dev_eui = %ds.dev_eui,
                size = qi.frm_payload.len(),
                max = max_payload,
                dr = primary_dr,
                "queue item exceeds max payload size for data-rate"
            );
            if matches!(window, Window::ClassA { .. }) {
                // retry in a later window, e.g. after ADR raised the DR
                None
            } else {
                // a scheduled item would spin forever; drop it
                ctx.storage.delete_device_queue_item(qi.id)?;
                None
            }
        }
        other => other,
    };

    if mac_blocks.is_empty() && queue_item.is_none() && !must_ack {
        return Ok(());
    }

    // -- frame layout ----------------------------------------------------
    let mac_bytes = encode_blocks(&mac_blocks)?;
    let (fopts_blocks, fport0_payload) = if queue_item.is_some() {
        if mac_bytes.len() <= 15 {
            (mac_blocks.clone(), None)
        } else {
            // MAC batch too large to ride along; it gets its own frame on
            // the next opportunity
            (Vec::new(), None)
        }
    } else if mac_bytes.len() <= 15 {
        (mac_blocks.clone(), None)
    } else {
        (Vec::new(), Some(mac_bytes.clone()))
    };

    let included_blocks: Vec<MacCommandBlock> = if fport0_payload.is_some() {
        mac_blocks.clone()
    } else {
        fopts_blocks.clone()
    };
    if included_blocks.is_empty() && queue_item.is_none() && !must_ack {
        return Ok(());
    }

    let confirmed = queue_item.as_ref().map(|qi| qi.confirmed).unwrap_or(false);
    let more_pending = queue_items.len() > usize::from(queue_item.is_some());

    let (f_cnt, f_port, frm_payload) = match (&queue_item, &fport0_payload) {
        (Some(qi), _) => (qi.f_cnt, Some(qi.f_port), qi.frm_payload.clone()),
        (None, Some(mac)) => (ds.n_f_cnt_down, Some(0), mac.clone()),
        (None, None) => (ds.n_f_cnt_down, None, Vec::new()),
    };

    let mut phy = PhyPayload {
        mhdr: Mhdr {
            m_type: if confirmed {
                MType::ConfirmedDataDown
            } else {
                MType::UnconfirmedDataDown
            },
            major: Major::LoRaWanR1,
        },
        payload: Payload::Mac(MacPayload {
            fhdr: Fhdr {
                dev_addr: ds.dev_addr,
                f_ctrl: FCtrl {
                    adr: sp.adr,
                    ack: must_ack,
                    f_pending: more_pending,
                    ..Default::default()
                },
                f_cnt,
                f_opts: encode_blocks(&fopts_blocks)?,
            },
            f_port,
            frm_payload,
        }),
        mic: [0; 4],
    };

    // FPort 0 payloads are MAC commands and encrypt under NwkSEncKey;
    // application payloads arrive pre-encrypted from the app server.
    if fport0_payload.is_some() {
        phy.crypt_frm_payload(Direction::Downlink, &ds.nwk_s_enc_key);
    }

    if ds.lorawan_11() {
        let conf_f_cnt = if must_ack {
            (ds.conf_f_cnt & 0xffff) as u16
        } else {
            0
        };
        phy.set_downlink_mic_11(&ds.s_nwk_s_int_key, conf_f_cnt)?;
    } else {
        phy.set_mic_legacy(Direction::Downlink, &ds.f_nwk_s_int_key)?;
    }
    let phy_bytes = phy.to_vec()?;

    // -- gateway walk ----------------------------------------------------
    let power = tx_power_dbm(ctx, dp.max_eirp);
    let mut sent = false;
    for (gateway_id, context) in gateways {
        let items = build_frame_items(ctx, &ds, &window, primary_dr, primary_freq, power, context, &phy_bytes)?;
        let frame = DownlinkFrame {
            downlink_id: ctx.next_downlink_id(),
            gateway_id: *gateway_id,
            items,
        };
        match ctx.gateway.send_downlink_frame(frame) {
            Ok(()) => {
                sent = true;
                info!(
                    dev_eui = %ds.dev_eui,
                    gateway_id = %gateway_id,
                    f_cnt,
                    confirmed,
                    mac_blocks = included_blocks.len(),
                    "downlink frame sent"
                );
                break;
            }
            Err(e) => {
                warn!(gateway_id = %gateway_id, error = %e, "downlink refused, trying next gateway");
            }
        }
    }
    if !sent {
        // leave the queue item for the next pass
        warn!(dev_eui = %ds.dev_eui, "no gateway available for downlink");
        return Err(Error::NoGateway);
    }

    // -- state commit ----------------------------------------------------
    for block in &included_blocks {
        if expects_answer(block) {
            ctx.storage.set_pending_mac_command(ds.dev_eui, block)?;
        }
        ctx.storage.delete_mac_command_queue_item(ds.dev_eui, block)?;
    }

    if let Some(mut qi) = queue_item {
        if qi.confirmed {
            qi.is_pending = true;
            let timeout = confirmed_timeout(device, dp);
            qi.retry_after = Some(Utc::now() + chrono::Duration::seconds(timeout.as_secs() as i64));
            qi.timeout_after = qi.retry_after;
            ctx.storage.update_device_queue_item(&mut qi)?;
            ds.confirmed_downlink_pending = true;
            ds.conf_f_cnt_down = qi.f_cnt;
        } else {
            ctx.storage.delete_device_queue_item(qi.id)?;
        }
        if ds.lorawan_11() && qi.f_port > 0 {
            ds.a_f_cnt_down = qi.f_cnt.wrapping_add(1);
        } else {
            ds.n_f_cnt_down = qi.f_cnt.wrapping_add(1);
        }
    } else if f_port == Some(0) || f_port.is_none() {
        ds.n_f_cnt_down = ds.n_f_cnt_down.wrapping_add(1);
    }

    ctx.storage.save_device_session(&ds)?;
    Ok(())
}

/// Retransmission budget for confirmed downlinks.
fn confirmed_timeout(device: &Device, dp: &DeviceProfile) -> Duration {
    let secs = match device.mode {
        DeviceMode::B => dp.class_b_timeout_secs,
        DeviceMode::C => dp.class_c_timeout_secs,
        DeviceMode::A => 0,
    };
    if secs > 0 {
        Duration::from_secs(secs as u64)
    } else {
        Duration::from_secs(60)
    }
}

/// Head of the queue, unless it is a confirmed item still inside its
/// retry hold-off.
fn next_sendable_item(items: &[DeviceQueueItem]) -> Option<DeviceQueueItem> {
    let head = items.first()?;
    if head.is_pending {
        match head.retry_after {
            Some(t) if t <= Utc::now() => Some(head.clone()),
            _ => None,
        }
    } else {
        Some(head.clone())
    }
}

/// Queued blocks plus freshly generated requests: channel-mask repair,
/// out-of-band channel installation, periodic device-status polls. CIDs
/// past their error threshold are skipped.
fn collect_mac_blocks(
    ctx: &ServerContext,
    ds: &mut DeviceSession,
    sp: &ServiceProfile,
) -> Vec<MacCommandBlock> {
    let mut blocks = match ctx.storage.get_mac_command_queue(ds.dev_eui) {
        Ok(b) => b,
        Err(e) => {
            warn!(dev_eui = %ds.dev_eui, error = %e, "read mac-command queue error");
            Vec::new()
        }
    };
    let threshold = ctx.config.network.mac_command_error_threshold;

    // channel-mask repair
    let mut desired: Vec<usize> = ctx.band.default_enabled_uplink_channels();
    desired.extend(ds.extra_uplink_channels.keys().copied());
    desired.sort_unstable();
    let mut enabled = ds.enabled_uplink_channels.clone();
    enabled.sort_unstable();

    if enabled != desired
        && !blocks.iter().any(|b| b.cid == Cid::LinkAdr)
        && !maccommand::exceeded_error_count(ds, Cid::LinkAdr, threshold)
    {
        if let Some(block) = channels::request_channel_reconfigure(&ctx.band, ds) {
            blocks.push(block);
        }
    }

    // out-of-band channels from configuration
    let wanted = wanted_extra_channels(ctx);
    if !wanted.is_empty()
        && !blocks.iter().any(|b| b.cid == Cid::NewChannel)
        && !maccommand::exceeded_error_count(ds, Cid::NewChannel, threshold)
    {
        if let Some(block) = new_channel::request_new_channels(
            ctx.config.network.max_new_channels_per_downlink,
            &ds.extra_uplink_channels,
            &wanted,
        ) {
            blocks.push(block);
        }
    }

    // periodic device-status poll
    if sp.dev_status_req_freq > 0 && !blocks.iter().any(|b| b.cid == Cid::DevStatus) {
        let interval = chrono::Duration::seconds(86_400 / i64::from(sp.dev_status_req_freq));
        let due = ds
            .last_device_status_request
            .map_or(true, |t| Utc::now() - t >= interval);
        if due {
            blocks.push(MacCommandBlock::new(
                Cid::DevStatus,
                vec![MacCommand::DevStatusReq],
            ));
            ds.last_device_status_request = Some(Utc::now());
        }
    }

    blocks
}

fn wanted_extra_channels(ctx: &ServerContext) -> BTreeMap<usize, Channel> {
    let base = ctx.band.uplink_channels().len();
    ctx.config
        .network
        .extra_channels
        .iter()
        .enumerate()
        .map(|(i, c)| {
            (
                base + i,
                Channel {
                    frequency: c.frequency,
                    min_dr: c.min_dr,
                    max_dr: c.max_dr,
                },
            )
        })
        .collect()
}

fn encode_blocks(blocks: &[MacCommandBlock]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for block in blocks {
        out.extend_from_slice(&lrwn::maccommand::encode_many(&block.commands)?);
    }
    Ok(out)
}

/// Downlink requests that await a device answer become pending blocks.
fn expects_answer(block: &MacCommandBlock) -> bool {
    block.commands.iter().any(|cmd| {
        matches!(
            cmd,
            MacCommand::LinkAdrReq(_)
                | MacCommand::DutyCycleReq(_)
                | MacCommand::RxParamSetupReq(_)
                | MacCommand::DevStatusReq
                | MacCommand::NewChannelReq(_)
                | MacCommand::RxTimingSetupReq(_)
                | MacCommand::TxParamSetupReq(_)
                | MacCommand::DlChannelReq(_)
                | MacCommand::AdrParamSetupReq(_)
                | MacCommand::ForceRejoinReq(_)
                | MacCommand::RejoinParamSetupReq(_)
                | MacCommand::PingSlotChannelReq(_)
                | MacCommand::BeaconFreqReq(_)
        )
    })
}

#[allow(clippy::too_many_arguments)]
fn build_frame_items(
    ctx: &ServerContext,
    ds: &DeviceSession,
    window: &Window,
    primary_dr: u8,
    primary_freq: u32,
    power: i32,
    context: &[u8],
    phy_bytes: &[u8],
) -> Result<Vec<DownlinkFrameItem>> {
    let rx_delay = Duration::from_secs(u64::from(ds.rx_delay.max(1)));

    Ok(match window {
        Window::ClassA { .. } => vec![
            DownlinkFrameItem {
                phy_payload: phy_bytes.to_vec(),
                tx_info: DownlinkTxInfo {
                    frequency: primary_freq,
                    power,
                    modulation: modulation_for_dr(ctx, primary_dr)?,
                    timing: DownlinkTiming::Delay { delay: rx_delay },
                    context: context.to_vec(),
                },
            },
            DownlinkFrameItem {
                phy_payload: phy_bytes.to_vec(),
                tx_info: DownlinkTxInfo {
                    frequency: ds.rx2_frequency,
                    power,
                    modulation: modulation_for_dr(ctx, ds.rx2_dr)?,
                    timing: DownlinkTiming::Delay {
                        delay: rx_delay + Duration::from_secs(1),
                    },
                    context: context.to_vec(),
                },
            },
        ],
        Window::ClassC => vec![DownlinkFrameItem {
            phy_payload: phy_bytes.to_vec(),
            tx_info: DownlinkTxInfo {
                frequency: primary_freq,
                power,
                modulation: modulation_for_dr(ctx, primary_dr)?,
                timing: DownlinkTiming::Immediately,
                context: Vec::new(),
            },
        }],
        Window::ClassB { emit_at } => vec![DownlinkFrameItem {
            phy_payload: phy_bytes.to_vec(),
            tx_info: DownlinkTxInfo {
                frequency: primary_freq,
                power,
                modulation: modulation_for_dr(ctx, primary_dr)?,
                timing: DownlinkTiming::GpsEpoch {
                    time_since_gps_epoch: *emit_at,
                },
                context: Vec::new(),
            },
        }],
    })
}
