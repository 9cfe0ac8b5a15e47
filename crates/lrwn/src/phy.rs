// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PHYPayload codec.
//!
//! A frame is `MHDR | payload | MIC`. Data frames carry a MACPayload
//! (FHDR, optional FPort, FRMPayload); join-accepts stay opaque because the
//! join server produces them fully encrypted; rejoin-requests and
//! proprietary frames are kept as raw bytes and forwarded.

use crate::crypto::{self, Direction};
use crate::{AES128Key, DevAddr, Error, Result, EUI64};
use serde::{Deserialize, Serialize};

/// MAC message type, upper three bits of the MHDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    RejoinRequest,
    Proprietary,
}

impl MType {
    fn from_bits(v: u8) -> Self {
        match v {
            0 => MType::JoinRequest,
            1 => MType::JoinAccept,
            2 => MType::UnconfirmedDataUp,
            3 => MType::UnconfirmedDataDown,
            4 => MType::ConfirmedDataUp,
            5 => MType::ConfirmedDataDown,
            6 => MType::RejoinRequest,
            _ => MType::Proprietary,
        }
    }

    fn bits(self) -> u8 {
        match self {
            MType::JoinRequest => 0,
            MType::JoinAccept => 1,
            MType::UnconfirmedDataUp => 2,
            MType::UnconfirmedDataDown => 3,
            MType::ConfirmedDataUp => 4,
            MType::ConfirmedDataDown => 5,
            MType::RejoinRequest => 6,
            MType::Proprietary => 7,
        }
    }

    pub fn is_uplink_data(self) -> bool {
        matches!(self, MType::UnconfirmedDataUp | MType::ConfirmedDataUp)
    }

    pub fn is_confirmed(self) -> bool {
        matches!(self, MType::ConfirmedDataUp | MType::ConfirmedDataDown)
    }
}

/// LoRaWAN major version, lower two bits of the MHDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Major {
    LoRaWanR1,
}

/// MAC header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mhdr {
    pub m_type: MType,
    pub major: Major,
}

impl Mhdr {
    pub fn decode(b: u8) -> Result<Self> {
        let major = b & 0x03;
        if major != 0 {
            return Err(Error::InvalidMajor(major));
        }
        Ok(Mhdr {
            m_type: MType::from_bits(b >> 5),
            major: Major::LoRaWanR1,
        })
    }

    pub fn encode(self) -> u8 {
        self.m_type.bits() << 5
    }
}

/// Frame-control byte. Bit 4 is FPending on downlinks and ClassB on uplinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FCtrl {
    pub adr: bool,
    pub adr_ack_req: bool,
    pub ack: bool,
    pub f_pending: bool,
    pub f_opts_len: u8,
}

impl FCtrl {
    fn decode(b: u8) -> Self {
        FCtrl {
            adr: b & 0x80 != 0,
            adr_ack_req: b & 0x40 != 0,
            ack: b & 0x20 != 0,
            f_pending: b & 0x10 != 0,
            f_opts_len: b & 0x0f,
        }
    }

    fn encode(self) -> u8 {
        let mut b = self.f_opts_len & 0x0f;
        if self.adr {
            b |= 0x80;
        }
        if self.adr_ack_req {
            b |= 0x40;
        }
        if self.ack {
            b |= 0x20;
        }
        if self.f_pending {
            b |= 0x10;
        }
        b
    }
}

/// Frame header. `f_cnt` holds the full 32-bit counter in memory; only the
/// low 16 bits travel on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fhdr {
    pub dev_addr: DevAddr,
    pub f_ctrl: FCtrl,
    pub f_cnt: u32,
    pub f_opts: Vec<u8>,
}

/// Data-frame payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacPayload {
    pub fhdr: Fhdr,
    pub f_port: Option<u8>,
    pub frm_payload: Vec<u8>,
}

/// Join-request payload (validated and answered by the join server; the
/// network server only needs the identifiers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequestPayload {
    pub join_eui: EUI64,
    pub dev_eui: EUI64,
    pub dev_nonce: u16,
}

/// MHDR-selected frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    JoinRequest(JoinRequestPayload),
    JoinAccept(Vec<u8>),
    Mac(MacPayload),
    RejoinRequest(Vec<u8>),
    Proprietary(Vec<u8>),
}

/// Top-level LoRaWAN frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhyPayload {
    pub mhdr: Mhdr,
    pub payload: Payload,
    pub mic: [u8; 4],
}

impl PhyPayload {
    /// Decode a frame from raw gateway bytes.
    pub fn from_slice(b: &[u8]) -> Result<Self> {
        if b.len() < 5 {
            return Err(Error::BufferTooShort {
                need: 5,
                got: b.len(),
            });
        }
        let mhdr = Mhdr::decode(b[0])?;
        let mic_off = b.len() - 4;
        let mut mic = [0u8; 4];
        mic.copy_from_slice(&b[mic_off..]);
        let body = &b[1..mic_off];

        let payload = match mhdr.m_type {
            MType::JoinRequest => {
                if body.len() != 18 {
                    return Err(Error::BufferTooShort {
                        need: 23,
                        got: b.len(),
                    });
                }
                let mut join_eui = [0u8; 8];
                join_eui.copy_from_slice(&body[0..8]);
                join_eui.reverse();
                let mut dev_eui = [0u8; 8];
                dev_eui.copy_from_slice(&body[8..16]);
                dev_eui.reverse();
                Payload::JoinRequest(JoinRequestPayload {
                    join_eui: EUI64(join_eui),
                    dev_eui: EUI64(dev_eui),
                    dev_nonce: u16::from_le_bytes([body[16], body[17]]),
                })
            }
            MType::JoinAccept => Payload::JoinAccept(body.to_vec()),
            MType::RejoinRequest => Payload::RejoinRequest(body.to_vec()),
            MType::Proprietary => Payload::Proprietary(body.to_vec()),
            _ => Payload::Mac(decode_mac_payload(body, b.len())?),
        };

        Ok(PhyPayload { mhdr, payload, mic })
    }

    /// Encode including the MIC.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut out = self.mic_message()?;
        out.extend_from_slice(&self.mic);
        Ok(out)
    }

    /// MHDR plus payload bytes, the region the MIC is computed over.
    pub fn mic_message(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.mhdr.encode()];
        match &self.payload {
            Payload::JoinRequest(jr) => {
                let mut join_eui = jr.join_eui.0;
                join_eui.reverse();
                let mut dev_eui = jr.dev_eui.0;
                dev_eui.reverse();
                out.extend_from_slice(&join_eui);
                out.extend_from_slice(&dev_eui);
                out.extend_from_slice(&jr.dev_nonce.to_le_bytes());
            }
            Payload::JoinAccept(b) | Payload::RejoinRequest(b) | Payload::Proprietary(b) => {
                out.extend_from_slice(b);
            }
            Payload::Mac(mac) => encode_mac_payload(mac, &mut out)?,
        }
        Ok(out)
    }

    /// Borrow the MACPayload of a data frame.
    pub fn mac_payload(&self) -> Option<&MacPayload> {
        match &self.payload {
            Payload::Mac(m) => Some(m),
            _ => None,
        }
    }

    pub fn mac_payload_mut(&mut self) -> Option<&mut MacPayload> {
        match &mut self.payload {
            Payload::Mac(m) => Some(m),
            _ => None,
        }
    }

    /// Validate a LoRaWAN 1.0 data MIC.
    pub fn validate_mic_legacy(&self, dir: Direction, key: &AES128Key) -> Result<bool> {
        let mac = match self.mac_payload() {
            Some(m) => m,
            None => return Ok(false),
        };
        let msg = self.mic_message()?;
        let mic = crypto::compute_legacy_mic(key, dir, mac.fhdr.dev_addr, mac.fhdr.f_cnt, &msg);
        Ok(mic == self.mic)
    }

    /// Validate a LoRaWAN 1.1 uplink data MIC (split over both keys).
    pub fn validate_uplink_mic_11(
        &self,
        s_nwk_s_int_key: &AES128Key,
        f_nwk_s_int_key: &AES128Key,
        conf_fcnt: u16,
        tx_dr: u8,
        tx_ch: u8,
    ) -> Result<bool> {
        let mac = match self.mac_payload() {
            Some(m) => m,
            None => return Ok(false),
        };
        let msg = self.mic_message()?;
        let mic = crypto::compute_uplink_mic_11(
            s_nwk_s_int_key,
            f_nwk_s_int_key,
            conf_fcnt,
            tx_dr,
            tx_ch,
            mac.fhdr.dev_addr,
            mac.fhdr.f_cnt,
            &msg,
        );
        Ok(mic == self.mic)
    }

    /// Stamp a LoRaWAN 1.0 data MIC.
    pub fn set_mic_legacy(&mut self, dir: Direction, key: &AES128Key) -> Result<()> {
        let (dev_addr, f_cnt) = {
            let mac = self.mac_payload().ok_or(Error::BufferTooShort {
                need: 7,
                got: 0,
            })?;
            (mac.fhdr.dev_addr, mac.fhdr.f_cnt)
        };
        let msg = self.mic_message()?;
        self.mic = crypto::compute_legacy_mic(key, dir, dev_addr, f_cnt, &msg);
        Ok(())
    }

    /// Stamp a LoRaWAN 1.1 uplink data MIC.
    pub fn set_uplink_mic_11(
        &mut self,
        s_nwk_s_int_key: &AES128Key,
        f_nwk_s_int_key: &AES128Key,
        conf_fcnt: u16,
        tx_dr: u8,
        tx_ch: u8,
    ) -> Result<()> {
        let (dev_addr, f_cnt) = {
            let mac = self.mac_payload().ok_or(Error::BufferTooShort {
                need: 7,
                got: 0,
            })?;
            (mac.fhdr.dev_addr, mac.fhdr.f_cnt)
        };
        let msg = self.mic_message()?;
        self.mic = crypto::compute_uplink_mic_11(
            s_nwk_s_int_key,
            f_nwk_s_int_key,
            conf_fcnt,
            tx_dr,
            tx_ch,
            dev_addr,
            f_cnt,
            &msg,
        );
        Ok(())
    }

    /// Stamp a LoRaWAN 1.1 downlink data MIC (`conf_fcnt` = acknowledged
    /// uplink counter, 0 when ACK is not set or for 1.0 devices).
    pub fn set_downlink_mic_11(&mut self, key: &AES128Key, conf_fcnt: u16) -> Result<()> {
        let (dev_addr, f_cnt) = {
            let mac = self.mac_payload().ok_or(Error::BufferTooShort {
                need: 7,
                got: 0,
            })?;
            (mac.fhdr.dev_addr, mac.fhdr.f_cnt)
        };
        let msg = self.mic_message()?;
        self.mic = crypto::compute_downlink_mic_11(key, conf_fcnt, dev_addr, f_cnt, &msg);
        Ok(())
    }

    /// Encrypt or decrypt the FRMPayload in place.
    pub fn crypt_frm_payload(&mut self, dir: Direction, key: &AES128Key) {
        if let Payload::Mac(mac) = &mut self.payload {
            if !mac.frm_payload.is_empty() {
                mac.frm_payload = crypto::encrypt_frm_payload(
                    key,
                    dir,
                    mac.fhdr.dev_addr,
                    mac.fhdr.f_cnt,
                    &mac.frm_payload,
                );
            }
        }
    }
}

fn decode_mac_payload(body: &[u8], frame_len: usize) -> Result<MacPayload> {
    if body.len() < 7 {
        return Err(Error::BufferTooShort {
            need: 12,
            got: frame_len,
        });
    }
    let dev_addr = DevAddr::from_le_bytes([body[0], body[1], body[2], body[3]]);
    let f_ctrl = FCtrl::decode(body[4]);
    let f_cnt = u16::from_le_bytes([body[5], body[6]]) as u32;

    let opts_end = 7 + f_ctrl.f_opts_len as usize;
    if body.len() < opts_end {
        return Err(Error::BufferTooShort {
            need: opts_end + 5,
            got: frame_len,
        });
    }
    let f_opts = body[7..opts_end].to_vec();

    let (f_port, frm_payload) = if body.len() > opts_end {
        (Some(body[opts_end]), body[opts_end + 1..].to_vec())
    } else {
        (None, Vec::new())
    };

    Ok(MacPayload {
        fhdr: Fhdr {
            dev_addr,
            f_ctrl,
            f_cnt,
            f_opts,
        },
        f_port,
        frm_payload,
    })
}

fn encode_mac_payload(mac: &MacPayload, out: &mut Vec<u8>) -> Result<()> {
    if mac.fhdr.f_opts.len() > 15 {
        return Err(Error::FOptsTooLong(mac.fhdr.f_opts.len()));
    }
    let mut f_ctrl = mac.fhdr.f_ctrl;
    f_ctrl.f_opts_len = mac.fhdr.f_opts.len() as u8;

    out.extend_from_slice(&mac.fhdr.dev_addr.to_le_bytes());
    out.push(f_ctrl.encode());
    out.extend_from_slice(&(mac.fhdr.f_cnt as u16).to_le_bytes());
    out.extend_from_slice(&mac.fhdr.f_opts);
    if let Some(port) = mac.f_port {
        out.push(port);
        out.extend_from_slice(&mac.frm_payload);
    }
    Ok(())
}
