// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Uplink pipeline: deduplicate, assemble, classify, dispatch.
//!
//! Any number of frames enter concurrently; the only serialization point
//! is the single-winner lock per deduplication fingerprint. The winner
//! sleeps out the dedup window, drains the collect set and processes the
//! logical uplink exactly once. A late copy of the same transmission
//! (after the winner drained the set) starts a fresh collect round and is
//! treated as a new emission.

pub mod data;
pub mod join;

use crate::context::ServerContext;
use crate::gateway::{UplinkFrame, UplinkRxInfo, UplinkTxInfo};
use crate::{Error, Result};
use lrwn::{MType, Payload, PhyPayload};
use std::time::Duration;
use tracing::{debug, warn};

// Cache key templates for the dedup collect set and its winner lock.
const COLLECT_KEY_TEMPL: &str = "lora:ns:rx:collect";

fn collect_key(tx_hex: &str, phy_hex: &str) -> String {
    format!("{COLLECT_KEY_TEMPL}:{tx_hex}:{phy_hex}")
}

fn collect_lock_key(tx_hex: &str, phy_hex: &str) -> String {
    format!("{COLLECT_KEY_TEMPL}:{tx_hex}:{phy_hex}:lock")
}

/// One logical uplink after deduplication.
#[derive(Debug, Clone)]
pub struct RxPacket {
    pub phy_payload: PhyPayload,
    /// Wire bytes, forwarded as-is on the join and proprietary paths.
    pub raw_phy_payload: Vec<u8>,
    pub tx_info: UplinkTxInfo,
    /// All receptions, strongest RSSI first.
    pub rx_info_set: Vec<UplinkRxInfo>,
    pub dr: u8,
}

/// Entry point for every frame delivered by the gateway bus.
///
/// Collects copies of the same transmission received by multiple gateways
/// and runs the downstream handling exactly once per emission.
pub async fn handle_uplink_frame(ctx: &ServerContext, frame: UplinkFrame) -> Result<()> {
    let tx_hex = hex::encode(frame.tx_info.fingerprint_bytes());
    let phy_hex = hex::encode(&frame.phy_payload);

    let key = collect_key(&tx_hex, &phy_hex);
    let lock_key = collect_lock_key(&tx_hex, &phy_hex);

    // keep the set readable even with a very low dedup delay configured
    let dedup_delay = ctx.config.deduplication_delay();
    let dedup_ttl = std::cmp::max(dedup_delay * 2, Duration::from_millis(200));

    ctx.storage
        .cache()
        .sadd_expire(&key, serde_json::to_vec(&frame)?, dedup_ttl);

    if !ctx
        .storage
        .cache()
        .set_nx(&lock_key, b"lock".to_vec(), dedup_ttl)
    {
        // another receiver owns this fingerprint
        return Ok(());
    }

    // more copies may arrive from other gateways
    tokio::time::sleep(dedup_delay).await;

    let members = ctx.storage.cache().smembers_del(&key);
    if members.is_empty() {
        return Err(Error::EmptyCollectSet);
    }

    let rx_packet = assemble_rx_packet(ctx, &members)?;
    debug!(
        gateways = rx_packet.rx_info_set.len(),
        dr = rx_packet.dr,
        m_type = ?rx_packet.phy_payload.mhdr.m_type,
        "uplink collected"
    );

    dispatch(ctx, rx_packet)
}

/// Build the canonical packet from the collect-set members: parse the PHY
/// payload once, derive the DR from the TX parameters via the band table,
/// and merge all receptions sorted by signal strength.
fn assemble_rx_packet(ctx: &ServerContext, members: &[Vec<u8>]) -> Result<RxPacket> {
    let mut out: Option<RxPacket> = None;

    for raw in members {
        let frame: UplinkFrame = match serde_json::from_slice(raw) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "malformed collect-set member, skipping");
                continue;
            }
        };

        match &mut out {
            None => {
                let phy_payload = PhyPayload::from_slice(&frame.phy_payload)?;
                let dr = ctx
                    .band
                    .get_data_rate_index(true, &frame.tx_info.modulation.data_rate())?;
                out = Some(RxPacket {
                    phy_payload,
                    raw_phy_payload: frame.phy_payload,
                    tx_info: frame.tx_info,
                    rx_info_set: vec![frame.rx_info],
                    dr,
                });
            }
            Some(packet) => packet.rx_info_set.push(frame.rx_info),
        }
    }

    let mut packet = out.ok_or(Error::NoRxInfo)?;
    if packet.rx_info_set.is_empty() {
        return Err(Error::NoRxInfo);
    }
    packet.rx_info_set.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    Ok(packet)
}

fn dispatch(ctx: &ServerContext, rx_packet: RxPacket) -> Result<()> {
    match rx_packet.phy_payload.mhdr.m_type {
        MType::JoinRequest | MType::RejoinRequest => join::handle_join_request(ctx, rx_packet),
        MType::UnconfirmedDataUp | MType::ConfirmedDataUp => {
            data::handle_data_up(ctx, rx_packet)
        }
        MType::Proprietary => handle_proprietary_up(ctx, rx_packet),
        m_type => {
            warn!(m_type = ?m_type, "uplink with downlink message-type, dropping");
            Err(Error::Validation(format!(
                "unexpected uplink message-type {m_type:?}"
            )))
        }
    }
}

/// Proprietary frames skip all session processing and go straight to the
/// application server.
fn handle_proprietary_up(ctx: &ServerContext, rx_packet: RxPacket) -> Result<()> {
    let mac_payload = match &rx_packet.phy_payload.payload {
        Payload::Proprietary(b) => b.clone(),
        _ => return Err(Error::Validation("proprietary payload expected".into())),
    };

    ctx.app_server
        .handle_proprietary_up(crate::backend::ProprietaryUpRequest {
            mac_payload,
            mic: rx_packet.phy_payload.mic,
            tx_info: rx_packet.tx_info,
            rx_info: rx_packet.rx_info_set,
        })
}
