// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast enqueue and fan-out.
//!
//! A group-level enqueue expands to one queue item per *distinct* gateway
//! covering at least one member device. Class C items share frequency and
//! DR but are staggered in wall-clock schedule time by the configured
//! device-downlink lock duration so one gateway never has overlapping
//! transmissions; Class B items get beacon-aligned emit times derived
//! from the group's ping-slot period.

use crate::context::ServerContext;
use crate::gateway::{DownlinkFrame, DownlinkFrameItem, DownlinkTiming, DownlinkTxInfo};
use crate::gps;
use crate::storage::{MulticastGroupType, MulticastQueueItem};
use crate::{Error, Result};
use chrono::Utc;
use lrwn::crypto::Direction;
use lrwn::{FCtrl, Fhdr, MType, MacPayload, Major, Mhdr, Payload, PhyPayload};
use tracing::{info, warn};

/// Validate, fan out and commit a group-level queue item.
///
/// `qi.f_cnt` must not be behind the group counter; on success the group
/// counter advances to `qi.f_cnt + 1` atomically with the queue writes.
pub fn enqueue_queue_item(ctx: &ServerContext, qi: MulticastQueueItem) -> Result<Vec<i64>> {
    let group = ctx.storage.get_multicast_group(qi.multicast_group_id)?;
    if qi.f_cnt < group.f_cnt {
        return Err(Error::InvalidFCnt);
    }

    // distinct gateways, each the best receiver of at least one member
    let members = ctx.storage.get_multicast_group_dev_euis(group.id)?;
    let mut gateways: Vec<lrwn::EUI64> = Vec::new();
    for dev_eui in &members {
        match ctx.storage.get_device_gateway_rx_info_set(*dev_eui) {
            Ok(set) => {
                if let Some(best) = set.items.first() {
                    if !gateways.contains(&best.gateway_id) {
                        gateways.push(best.gateway_id);
                    }
                }
            }
            Err(Error::NotFound) => {
                warn!(dev_eui = %dev_eui, "multicast member without rx-info, skipped");
            }
            Err(e) => return Err(e),
        }
    }
    if gateways.is_empty() {
        return Err(Error::NoGateway);
    }

    let mut items = Vec::with_capacity(gateways.len());
    match group.group_type {
        MulticastGroupType::C => {
            let lock = ctx.config.class_c_downlink_lock();
            for (i, gateway_id) in gateways.iter().enumerate() {
                items.push(MulticastQueueItem {
                    multicast_group_id: group.id,
                    gateway_id: *gateway_id,
                    f_cnt: qi.f_cnt,
                    f_port: qi.f_port,
                    frm_payload: qi.frm_payload.clone(),
                    schedule_at: Utc::now()
                        + chrono::Duration::milliseconds((lock.as_millis() * i as u128) as i64),
                    emit_at_gps_epoch: None,
                    ..Default::default()
                });
            }
        }
        MulticastGroupType::B => {
            if group.ping_slot_period == 0 {
                return Err(Error::Validation(format!(
                    "multicast-group {} has no ping-slot period",
                    group.id
                )));
            }
            // walk forward one slot per gateway so emit times never collide
            let mut after = gps::time_since_gps_epoch(Utc::now());
            for gateway_id in &gateways {
                let emit_at = lrwn::classb::next_ping_slot_after(
                    after,
                    group.mc_addr,
                    group.ping_slot_period,
                )?;
                after = emit_at;

                items.push(MulticastQueueItem {
                    multicast_group_id: group.id,
                    gateway_id: *gateway_id,
                    f_cnt: qi.f_cnt,
                    f_port: qi.f_port,
                    frm_payload: qi.frm_payload.clone(),
                    // hand the item to the scheduler well before emission
                    schedule_at: gps::time_from_gps_epoch(emit_at)
                        - chrono::Duration::from_std(ctx.config.scheduler_interval() * 2)
                            .unwrap_or_else(|_| chrono::Duration::seconds(2)),
                    emit_at_gps_epoch: Some(emit_at),
                    ..Default::default()
                });
            }
        }
    }

    ctx.storage
        .commit_multicast_enqueue(group.id, qi.f_cnt + 1, &mut items)?;

    info!(
        multicast_group_id = %group.id,
        f_cnt = qi.f_cnt,
        gateways = items.len(),
        group_type = ?group.group_type,
        "multicast queue-items enqueued"
    );
    Ok(items.iter().map(|item| item.id).collect())
}

/// Scheduler execution of a due item: build the frame, transmit through
/// the item's pinned gateway, delete the item. A refused transmission
/// leaves the item queued for the next pass.
pub fn schedule_queue_item(ctx: &ServerContext, qi: &MulticastQueueItem) -> Result<()> {
    let group = ctx.storage.get_multicast_group(qi.multicast_group_id)?;

    let mut phy = PhyPayload {
        mhdr: Mhdr {
            m_type: MType::UnconfirmedDataDown,
            major: Major::LoRaWanR1,
        },
        payload: Payload::Mac(MacPayload {
            fhdr: Fhdr {
                dev_addr: group.mc_addr,
                f_ctrl: FCtrl::default(),
                f_cnt: qi.f_cnt,
                f_opts: Vec::new(),
            },
            // payload is encrypted by the application server under the
            // multicast application key
            f_port: Some(qi.f_port),
            frm_payload: qi.frm_payload.clone(),
        }),
        mic: [0; 4],
    };
    phy.set_mic_legacy(Direction::Downlink, &group.mc_nwk_s_key)?;

    let timing = match qi.emit_at_gps_epoch {
        Some(emit_at) => DownlinkTiming::GpsEpoch {
            time_since_gps_epoch: emit_at,
        },
        None => DownlinkTiming::Immediately,
    };

    let frame = DownlinkFrame {
        downlink_id: ctx.next_downlink_id(),
        gateway_id: qi.gateway_id,
        items: vec![DownlinkFrameItem {
            phy_payload: phy.to_vec()?,
            tx_info: DownlinkTxInfo {
                frequency: group.frequency,
                power: ctx.band.max_eirp,
                modulation: super::modulation_for_dr(ctx, group.dr)?,
                timing,
                context: Vec::new(),
            },
        }],
    };

    ctx.gateway.send_downlink_frame(frame)?;
    ctx.storage.delete_multicast_queue_item(qi.id)?;

    info!(
        multicast_group_id = %group.id,
        gateway_id = %qi.gateway_id,
        f_cnt = qi.f_cnt,
        "multicast downlink sent"
    );
    Ok(())
}
