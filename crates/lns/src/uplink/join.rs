// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Join-request handling.
//!
//! The network server does not hold root keys: it assigns a DevAddr,
//! forwards the raw join-request to the join server and builds a fresh
//! session from the returned key envelopes. The join-accept comes back
//! fully encrypted and is transmitted verbatim in the join response
//! windows.

use super::RxPacket;
use crate::backend::{JoinAnswer, JoinRequest, KeyEnvelope};
use crate::context::ServerContext;
use crate::downlink;
use crate::{Error, Result};
use lrwn::{AES128Key, DevAddr, Payload};
use std::collections::HashMap;
use tracing::info;

pub fn handle_join_request(ctx: &ServerContext, rx_packet: RxPacket) -> Result<()> {
    let (jr, rejoin) = match &rx_packet.phy_payload.payload {
        Payload::JoinRequest(jr) => (*jr, false),
        Payload::RejoinRequest(raw) => (parse_rejoin(ctx, raw)?, true),
        _ => return Err(Error::Validation("join-request payload expected".into())),
    };

    let device = ctx.storage.get_device(jr.dev_eui)?;
    super::data::ensure_enabled(&device)?;
    let dp = ctx
        .storage
        .get_and_cache_device_profile(device.device_profile_id)?;
    if !dp.supports_join {
        return Err(Error::Validation(format!(
            "device {} is ABP, join-request rejected",
            jr.dev_eui
        )));
    }

    let dev_addr = DevAddr::new(rand::random());

    let request = JoinRequest {
        phy_payload: rx_packet.raw_phy_payload.clone(),
        dev_eui: jr.dev_eui,
        join_eui: jr.join_eui,
        dev_addr,
        dl_settings_rx1_dr_offset: dp.rx_dr_offset_1,
        dl_settings_rx2_dr: dp.rx_data_rate_2,
        rx_delay: ctx.config.network.rx1_delay,
    };
    let answer = if rejoin {
        ctx.join_server.rejoin_req(request)?
    } else {
        ctx.join_server.join_req(request)?
    };

    let ds = session_from_join_answer(ctx, &dp, &jr, dev_addr, &answer)?;

    // the previous activation's state is void
    ctx.storage.flush_device_queue(ds.dev_eui)?;
    ctx.storage.flush_mac_command_queue(ds.dev_eui);
    ctx.storage.save_device_session(&ds)?;

    info!(
        dev_eui = %jr.dev_eui,
        join_eui = %jr.join_eui,
        dev_addr = %dev_addr,
        dev_nonce = jr.dev_nonce,
        "device activated by join-request"
    );

    downlink::data::send_join_accept(ctx, &ds, &rx_packet, answer.phy_payload)
}

/// Rejoin-request types 0 and 2: `type | NetID | DevEUI | RJcount`. The
/// JoinEUI comes from the existing session (type 1 carries its own and is
/// validated by the join server either way).
fn parse_rejoin(
    ctx: &ServerContext,
    raw: &[u8],
) -> Result<lrwn::phy::JoinRequestPayload> {
    if raw.len() != 14 || (raw[0] != 0 && raw[0] != 2) {
        return Err(Error::Validation(format!(
            "unsupported rejoin-request ({} bytes)",
            raw.len()
        )));
    }
    let mut dev_eui = [0u8; 8];
    dev_eui.copy_from_slice(&raw[4..12]);
    dev_eui.reverse();
    let dev_eui = lrwn::EUI64(dev_eui);

    let join_eui = ctx
        .storage
        .get_device_session(dev_eui)
        .map(|ds| ds.join_eui)
        .unwrap_or_default();

    Ok(lrwn::phy::JoinRequestPayload {
        join_eui,
        dev_eui,
        dev_nonce: u16::from_le_bytes([raw[12], raw[13]]),
    })
}

fn session_from_join_answer(
    ctx: &ServerContext,
    dp: &crate::storage::DeviceProfile,
    jr: &lrwn::phy::JoinRequestPayload,
    dev_addr: DevAddr,
    answer: &JoinAnswer,
) -> Result<crate::storage::DeviceSession> {
    let keks = &ctx.config.keks;

    let (f_nwk_s_int_key, s_nwk_s_int_key, nwk_s_enc_key) = if dp.lorawan_11() {
        (
            unwrap_key_envelope(keks, required(&answer.f_nwk_s_int_key, "FNwkSIntKey")?)?,
            unwrap_key_envelope(keks, required(&answer.s_nwk_s_int_key, "SNwkSIntKey")?)?,
            unwrap_key_envelope(keks, required(&answer.nwk_s_enc_key, "NwkSEncKey")?)?,
        )
    } else {
        let key = unwrap_key_envelope(keks, required(&answer.nwk_s_key, "NwkSKey")?)?;
        (key, key, key)
    };

    Ok(crate::storage::DeviceSession {
        dev_eui: jr.dev_eui,
        dev_addr,
        join_eui: jr.join_eui,
        mac_version: dp.mac_version.clone(),
        f_nwk_s_int_key,
        s_nwk_s_int_key,
        nwk_s_enc_key,
        nb_trans: 1,
        rx_delay: ctx.config.network.rx1_delay,
        rx1_dr_offset: dp.rx_dr_offset_1,
        rx2_dr: dp.rx_data_rate_2,
        rx2_frequency: if dp.rx_freq_2 > 0 {
            dp.rx_freq_2
        } else {
            ctx.band.rx2_frequency
        },
        enabled_uplink_channels: ctx.band.default_enabled_uplink_channels(),
        ping_slot_dr: dp.ping_slot_dr,
        ping_slot_frequency: if dp.ping_slot_freq > 0 {
            dp.ping_slot_freq
        } else {
            ctx.band.ping_slot_frequency
        },
        ..Default::default()
    })
}

fn required<'a>(ke: &'a Option<KeyEnvelope>, name: &str) -> Result<&'a KeyEnvelope> {
    ke.as_ref()
        .ok_or_else(|| Error::JoinServer(format!("{name} missing from join-answer")))
}

/// Extract the session key from a join-server envelope.
///
/// An empty KEK label means the key travels in the clear and is used
/// byte-for-byte; otherwise the label selects a configured KEK and the
/// payload is RFC 3394-unwrapped.
pub fn unwrap_key_envelope(
    keks: &HashMap<String, AES128Key>,
    ke: &KeyEnvelope,
) -> Result<AES128Key> {
    let raw = if ke.kek_label.is_empty() {
        ke.aes_key.clone()
    } else {
        let kek = keks
            .get(&ke.kek_label)
            .ok_or_else(|| Error::UnknownKekLabel(ke.kek_label.clone()))?;
        lrwn::keywrap::unwrap(kek, &ke.aes_key)?
    };

    let arr: [u8; 16] = raw
        .try_into()
        .map_err(|_| Error::JoinServer("key envelope does not hold a 128-bit key".into()))?;
    Ok(AES128Key::new(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_label_uses_key_as_is() {
        let keks = HashMap::new();
        let ke = KeyEnvelope {
            kek_label: String::new(),
            aes_key: vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16],
        };
        let key = unwrap_key_envelope(&keks, &ke).unwrap();
        assert_eq!(
            key.as_bytes(),
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]
        );
    }

    #[test]
    fn test_labelled_envelope_is_unwrapped() {
        let kek = AES128Key::new([7; 16]);
        let session_key = [0x42u8; 16];
        let wrapped = lrwn::keywrap::wrap(&kek, &session_key).unwrap();

        let keks = HashMap::from([("lora-eu".to_string(), kek)]);
        let ke = KeyEnvelope {
            kek_label: "lora-eu".into(),
            aes_key: wrapped,
        };

        let key = unwrap_key_envelope(&keks, &ke).unwrap();
        assert_eq!(key.as_bytes(), &session_key);
    }

    #[test]
    fn test_unknown_label_is_an_error() {
        let keks = HashMap::new();
        let ke = KeyEnvelope {
            kek_label: "nope".into(),
            aes_key: vec![0; 24],
        };
        assert!(matches!(
            unwrap_key_envelope(&keks, &ke),
            Err(Error::UnknownKekLabel(label)) if label == "nope"
        ));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let keks = HashMap::new();
        let ke = KeyEnvelope {
            kek_label: String::new(),
            aes_key: vec![0; 8],
        };
        assert!(unwrap_key_envelope(&keks, &ke).is_err());
    }
}
