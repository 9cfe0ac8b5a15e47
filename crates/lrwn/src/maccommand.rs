// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed MAC-command codec.
//!
//! Commands are a tagged sum type keyed by [`Cid`]; the same CID byte names
//! a request in one direction and an answer in the other, so decoding takes
//! the frame direction. Encode and decode are total over the variant set.
//!
//! Frequencies travel as 24-bit multiples of 100 Hz.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// MAC command identifier (one byte on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Cid {
    Reset,
    LinkCheck,
    LinkAdr,
    DutyCycle,
    RxParamSetup,
    DevStatus,
    NewChannel,
    RxTimingSetup,
    TxParamSetup,
    DlChannel,
    Rekey,
    AdrParamSetup,
    DeviceTime,
    ForceRejoin,
    RejoinParamSetup,
    PingSlotInfo,
    PingSlotChannel,
    BeaconFreq,
}

impl Cid {
    pub fn byte(self) -> u8 {
        match self {
            Cid::Reset => 0x01,
            Cid::LinkCheck => 0x02,
            Cid::LinkAdr => 0x03,
            Cid::DutyCycle => 0x04,
            Cid::RxParamSetup => 0x05,
            Cid::DevStatus => 0x06,
            Cid::NewChannel => 0x07,
            Cid::RxTimingSetup => 0x08,
            Cid::TxParamSetup => 0x09,
            Cid::DlChannel => 0x0a,
            Cid::Rekey => 0x0b,
            Cid::AdrParamSetup => 0x0c,
            Cid::DeviceTime => 0x0d,
            Cid::ForceRejoin => 0x0e,
            Cid::RejoinParamSetup => 0x0f,
            Cid::PingSlotInfo => 0x10,
            Cid::PingSlotChannel => 0x11,
            Cid::BeaconFreq => 0x13,
        }
    }

    pub fn from_byte(b: u8, uplink: bool) -> Result<Self> {
        Ok(match b {
            0x01 => Cid::Reset,
            0x02 => Cid::LinkCheck,
            0x03 => Cid::LinkAdr,
            0x04 => Cid::DutyCycle,
            0x05 => Cid::RxParamSetup,
            0x06 => Cid::DevStatus,
            0x07 => Cid::NewChannel,
            0x08 => Cid::RxTimingSetup,
            0x09 => Cid::TxParamSetup,
            0x0a => Cid::DlChannel,
            0x0b => Cid::Rekey,
            0x0c => Cid::AdrParamSetup,
            0x0d => Cid::DeviceTime,
            0x0e => Cid::ForceRejoin,
            0x0f => Cid::RejoinParamSetup,
            0x10 => Cid::PingSlotInfo,
            0x11 => Cid::PingSlotChannel,
            0x13 => Cid::BeaconFreq,
            cid => return Err(Error::UnknownCid { cid, uplink }),
        })
    }
}

/// LoRaWAN minor version carried by Reset/Rekey handshakes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub minor: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAdrReqPayload {
    pub data_rate: u8,
    pub tx_power: u8,
    /// 16 channels relative to `ch_mask_cntl * 16`.
    pub ch_mask: [bool; 16],
    pub ch_mask_cntl: u8,
    pub nb_rep: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAdrAnsPayload {
    pub channel_mask_ack: bool,
    pub data_rate_ack: bool,
    pub power_ack: bool,
}

impl LinkAdrAnsPayload {
    pub fn all_ack(&self) -> bool {
        self.channel_mask_ack && self.data_rate_ack && self.power_ack
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCheckAnsPayload {
    pub margin: u8,
    pub gw_cnt: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxParamSetupReqPayload {
    pub rx1_dr_offset: u8,
    pub rx2_data_rate: u8,
    pub frequency: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxParamSetupAnsPayload {
    pub channel_ack: bool,
    pub rx2_data_rate_ack: bool,
    pub rx1_dr_offset_ack: bool,
}

impl RxParamSetupAnsPayload {
    pub fn all_ack(&self) -> bool {
        self.channel_ack && self.rx2_data_rate_ack && self.rx1_dr_offset_ack
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevStatusAnsPayload {
    pub battery: u8,
    pub margin: i8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChannelReqPayload {
    pub ch_index: u8,
    pub frequency: u32,
    pub min_dr: u8,
    pub max_dr: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChannelAnsPayload {
    pub channel_frequency_ok: bool,
    pub data_rate_range_ok: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxTimingSetupReqPayload {
    /// RX1 delay in seconds, 0 meaning 1.
    pub delay: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxParamSetupReqPayload {
    pub uplink_dwell_time_400ms: bool,
    pub downlink_dwell_time_400ms: bool,
    pub max_eirp_index: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlChannelReqPayload {
    pub ch_index: u8,
    pub frequency: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlChannelAnsPayload {
    pub channel_frequency_ok: bool,
    pub uplink_frequency_exists: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdrParamSetupReqPayload {
    pub limit_exp: u8,
    pub delay_exp: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTimeAnsPayload {
    pub seconds_since_gps_epoch: u32,
    /// 1/256 second steps.
    pub fractional: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceRejoinReqPayload {
    pub period: u8,
    pub max_retries: u8,
    pub rejoin_type: u8,
    pub dr: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejoinParamSetupReqPayload {
    pub max_time_n: u8,
    pub max_count_n: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejoinParamSetupAnsPayload {
    pub time_ok: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingSlotInfoReqPayload {
    /// Ping-slot periodicity exponent, period = 2^periodicity seconds.
    pub periodicity: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingSlotChannelReqPayload {
    pub frequency: u32,
    pub dr: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingSlotChannelAnsPayload {
    pub channel_frequency_ok: bool,
    pub data_rate_ok: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconFreqReqPayload {
    pub frequency: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconFreqAnsPayload {
    pub beacon_frequency_ok: bool,
}

/// One MAC command. Uplink variants come from the device, downlink
/// variants are produced by the network server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacCommand {
    // uplink
    ResetInd(Version),
    LinkCheckReq,
    LinkAdrAns(LinkAdrAnsPayload),
    DutyCycleAns,
    RxParamSetupAns(RxParamSetupAnsPayload),
    DevStatusAns(DevStatusAnsPayload),
    NewChannelAns(NewChannelAnsPayload),
    RxTimingSetupAns,
    TxParamSetupAns,
    DlChannelAns(DlChannelAnsPayload),
    RekeyInd(Version),
    AdrParamSetupAns,
    DeviceTimeReq,
    RejoinParamSetupAns(RejoinParamSetupAnsPayload),
    PingSlotInfoReq(PingSlotInfoReqPayload),
    PingSlotChannelAns(PingSlotChannelAnsPayload),
    BeaconFreqAns(BeaconFreqAnsPayload),

    // downlink
    ResetConf(Version),
    LinkCheckAns(LinkCheckAnsPayload),
    LinkAdrReq(LinkAdrReqPayload),
    DutyCycleReq(u8),
    RxParamSetupReq(RxParamSetupReqPayload),
    DevStatusReq,
    NewChannelReq(NewChannelReqPayload),
    RxTimingSetupReq(RxTimingSetupReqPayload),
    TxParamSetupReq(TxParamSetupReqPayload),
    DlChannelReq(DlChannelReqPayload),
    RekeyConf(Version),
    AdrParamSetupReq(AdrParamSetupReqPayload),
    DeviceTimeAns(DeviceTimeAnsPayload),
    ForceRejoinReq(ForceRejoinReqPayload),
    RejoinParamSetupReq(RejoinParamSetupReqPayload),
    PingSlotInfoAns,
    PingSlotChannelReq(PingSlotChannelReqPayload),
    BeaconFreqReq(BeaconFreqReqPayload),
}

impl MacCommand {
    pub fn cid(&self) -> Cid {
        match self {
            MacCommand::ResetInd(_) | MacCommand::ResetConf(_) => Cid::Reset,
            MacCommand::LinkCheckReq | MacCommand::LinkCheckAns(_) => Cid::LinkCheck,
            MacCommand::LinkAdrAns(_) | MacCommand::LinkAdrReq(_) => Cid::LinkAdr,
            MacCommand::DutyCycleAns | MacCommand::DutyCycleReq(_) => Cid::DutyCycle,
            MacCommand::RxParamSetupAns(_) | MacCommand::RxParamSetupReq(_) => Cid::RxParamSetup,
            MacCommand::DevStatusAns(_) | MacCommand::DevStatusReq => Cid::DevStatus,
            MacCommand::NewChannelAns(_) | MacCommand::NewChannelReq(_) => Cid::NewChannel,
            MacCommand::RxTimingSetupAns | MacCommand::RxTimingSetupReq(_) => Cid::RxTimingSetup,
            MacCommand::TxParamSetupAns | MacCommand::TxParamSetupReq(_) => Cid::TxParamSetup,
            MacCommand::DlChannelAns(_) | MacCommand::DlChannelReq(_) => Cid::DlChannel,
            MacCommand::RekeyInd(_) | MacCommand::RekeyConf(_) => Cid::Rekey,
            MacCommand::AdrParamSetupAns | MacCommand::AdrParamSetupReq(_) => Cid::AdrParamSetup,
            MacCommand::DeviceTimeReq | MacCommand::DeviceTimeAns(_) => Cid::DeviceTime,
            MacCommand::ForceRejoinReq(_) => Cid::ForceRejoin,
            MacCommand::RejoinParamSetupAns(_) | MacCommand::RejoinParamSetupReq(_) => {
                Cid::RejoinParamSetup
            }
            MacCommand::PingSlotInfoReq(_) | MacCommand::PingSlotInfoAns => Cid::PingSlotInfo,
            MacCommand::PingSlotChannelAns(_) | MacCommand::PingSlotChannelReq(_) => {
                Cid::PingSlotChannel
            }
            MacCommand::BeaconFreqAns(_) | MacCommand::BeaconFreqReq(_) => Cid::BeaconFreq,
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        out.push(self.cid().byte());
        match self {
            MacCommand::ResetInd(v)
            | MacCommand::ResetConf(v)
            | MacCommand::RekeyInd(v)
            | MacCommand::RekeyConf(v) => out.push(v.minor & 0x0f),

            MacCommand::LinkCheckReq
            | MacCommand::DutyCycleAns
            | MacCommand::RxTimingSetupAns
            | MacCommand::TxParamSetupAns
            | MacCommand::AdrParamSetupAns
            | MacCommand::DeviceTimeReq
            | MacCommand::DevStatusReq
            | MacCommand::PingSlotInfoAns => {}

            MacCommand::LinkCheckAns(p) => {
                out.push(p.margin);
                out.push(p.gw_cnt);
            }
            MacCommand::LinkAdrReq(p) => {
                out.push((p.data_rate << 4) | (p.tx_power & 0x0f));
                let mut mask: u16 = 0;
                for (i, set) in p.ch_mask.iter().enumerate() {
                    if *set {
                        mask |= 1 << i;
                    }
                }
                out.extend_from_slice(&mask.to_le_bytes());
                out.push(((p.ch_mask_cntl & 0x07) << 4) | (p.nb_rep & 0x0f));
            }
            MacCommand::LinkAdrAns(p) => {
                let mut b = 0u8;
                if p.channel_mask_ack {
                    b |= 0x01;
                }
                if p.data_rate_ack {
                    b |= 0x02;
                }
                if p.power_ack {
                    b |= 0x04;
                }
                out.push(b);
            }
            MacCommand::DutyCycleReq(max_duty_cycle) => out.push(max_duty_cycle & 0x0f),
            MacCommand::RxParamSetupReq(p) => {
                out.push(((p.rx1_dr_offset & 0x07) << 4) | (p.rx2_data_rate & 0x0f));
                encode_freq(p.frequency, out)?;
            }
            MacCommand::RxParamSetupAns(p) => {
                let mut b = 0u8;
                if p.channel_ack {
                    b |= 0x01;
                }
                if p.rx2_data_rate_ack {
                    b |= 0x02;
                }
                if p.rx1_dr_offset_ack {
                    b |= 0x04;
                }
                out.push(b);
            }
            MacCommand::DevStatusAns(p) => {
                out.push(p.battery);
                out.push((p.margin as u8) & 0x3f);
            }
            MacCommand::NewChannelReq(p) => {
                out.push(p.ch_index);
                encode_freq(p.frequency, out)?;
                out.push(((p.max_dr & 0x0f) << 4) | (p.min_dr & 0x0f));
            }
            MacCommand::NewChannelAns(p) => {
                let mut b = 0u8;
                if p.channel_frequency_ok {
                    b |= 0x01;
                }
                if p.data_rate_range_ok {
                    b |= 0x02;
                }
                out.push(b);
            }
            MacCommand::RxTimingSetupReq(p) => out.push(p.delay & 0x0f),
            MacCommand::TxParamSetupReq(p) => {
                let mut b = p.max_eirp_index & 0x0f;
                if p.uplink_dwell_time_400ms {
                    b |= 0x10;
                }
                if p.downlink_dwell_time_400ms {
                    b |= 0x20;
                }
                out.push(b);
            }
            MacCommand::DlChannelReq(p) => {
                out.push(p.ch_index);
                encode_freq(p.frequency, out)?;
            }
            MacCommand::DlChannelAns(p) => {
                let mut b = 0u8;
                if p.channel_frequency_ok {
                    b |= 0x01;
                }
                if p.uplink_frequency_exists {
                    b |= 0x02;
                }
                out.push(b);
            }
            MacCommand::AdrParamSetupReq(p) => {
                out.push(((p.limit_exp & 0x0f) << 4) | (p.delay_exp & 0x0f));
            }
            MacCommand::DeviceTimeAns(p) => {
                out.extend_from_slice(&p.seconds_since_gps_epoch.to_le_bytes());
                out.push(p.fractional);
            }
            MacCommand::ForceRejoinReq(p) => {
                out.push(((p.period & 0x07) << 3) | (p.max_retries & 0x07));
                out.push(((p.rejoin_type & 0x07) << 4) | (p.dr & 0x0f));
            }
            MacCommand::RejoinParamSetupReq(p) => {
                out.push(((p.max_time_n & 0x0f) << 4) | (p.max_count_n & 0x0f));
            }
            MacCommand::RejoinParamSetupAns(p) => {
                out.push(u8::from(p.time_ok));
            }
            MacCommand::PingSlotInfoReq(p) => out.push(p.periodicity & 0x07),
            MacCommand::PingSlotChannelReq(p) => {
                encode_freq(p.frequency, out)?;
                out.push(p.dr & 0x0f);
            }
            MacCommand::PingSlotChannelAns(p) => {
                let mut b = 0u8;
                if p.channel_frequency_ok {
                    b |= 0x01;
                }
                if p.data_rate_ok {
                    b |= 0x02;
                }
                out.push(b);
            }
            MacCommand::BeaconFreqReq(p) => encode_freq(p.frequency, out)?,
            MacCommand::BeaconFreqAns(p) => out.push(u8::from(p.beacon_frequency_ok)),
        }
        Ok(())
    }
}

/// Encode a list of commands (FOpts or FPort-0 FRMPayload contents).
pub fn encode_many(cmds: &[MacCommand]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for cmd in cmds {
        cmd.encode_into(&mut out)?;
    }
    Ok(out)
}

/// Decode a command stream in the given direction. Decoding is strict: an
/// unknown CID or a truncated payload fails the whole stream, because
/// command boundaries cannot be re-synchronized.
pub fn decode_many(uplink: bool, b: &[u8]) -> Result<Vec<MacCommand>> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < b.len() {
        let cid = Cid::from_byte(b[i], uplink)?;
        i += 1;
        let rest = &b[i..];
        let (cmd, used) = if uplink {
            decode_uplink(cid, rest)?
        } else {
            decode_downlink(cid, rest)?
        };
        out.push(cmd);
        i += used;
    }
    Ok(out)
}

fn take<const N: usize>(cid: Cid, b: &[u8]) -> Result<[u8; N]> {
    if b.len() < N {
        return Err(Error::TruncatedMacCommand { cid });
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&b[..N]);
    Ok(arr)
}

fn decode_freq(b: [u8; 3]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], 0]) * 100
}

fn encode_freq(freq: u32, out: &mut Vec<u8>) -> Result<()> {
    if freq % 100 != 0 || freq / 100 > 0x00ff_ffff {
        return Err(Error::InvalidFrequency(freq));
    }
    let v = (freq / 100).to_le_bytes();
    out.extend_from_slice(&v[..3]);
    Ok(())
}

fn decode_uplink(cid: Cid, b: &[u8]) -> Result<(MacCommand, usize)> {
    Ok(match cid {
        Cid::Reset => {
            let p = take::<1>(cid, b)?;
            (MacCommand::ResetInd(Version { minor: p[0] & 0x0f }), 1)
        }
        Cid::LinkCheck => (MacCommand::LinkCheckReq, 0),
        Cid::LinkAdr => {
            let p = take::<1>(cid, b)?;
            (
                MacCommand::LinkAdrAns(LinkAdrAnsPayload {
                    channel_mask_ack: p[0] & 0x01 != 0,
                    data_rate_ack: p[0] & 0x02 != 0,
                    power_ack: p[0] & 0x04 != 0,
                }),
                1,
            )
        }
        Cid::DutyCycle => (MacCommand::DutyCycleAns, 0),
        Cid::RxParamSetup => {
            let p = take::<1>(cid, b)?;
            (
                MacCommand::RxParamSetupAns(RxParamSetupAnsPayload {
                    channel_ack: p[0] & 0x01 != 0,
                    rx2_data_rate_ack: p[0] & 0x02 != 0,
                    rx1_dr_offset_ack: p[0] & 0x04 != 0,
                }),
                1,
            )
        }
        Cid::DevStatus => {
            let p = take::<2>(cid, b)?;
            // sign-extend the 6-bit margin
            let raw = p[1] & 0x3f;
            let margin = if raw & 0x20 != 0 {
                (raw | 0xc0) as i8
            } else {
                raw as i8
            };
            (
                MacCommand::DevStatusAns(DevStatusAnsPayload {
                    battery: p[0],
                    margin,
                }),
                2,
            )
        }
        Cid::NewChannel => {
            let p = take::<1>(cid, b)?;
            (
                MacCommand::NewChannelAns(NewChannelAnsPayload {
                    channel_frequency_ok: p[0] & 0x01 != 0,
                    data_rate_range_ok: p[0] & 0x02 != 0,
                }),
                1,
            )
        }
        Cid::RxTimingSetup => (MacCommand::RxTimingSetupAns, 0),
        Cid::TxParamSetup => (MacCommand::TxParamSetupAns, 0),
        Cid::DlChannel => {
            let p = take::<1>(cid, b)?;
            (
                MacCommand::DlChannelAns(DlChannelAnsPayload {
                    channel_frequency_ok: p[0] & 0x01 != 0,
                    uplink_frequency_exists: p[0] & 0x02 != 0,
                }),
                1,
            )
        }
        Cid::Rekey => {
            let p = take::<1>(cid, b)?;
            (MacCommand::RekeyInd(Version { minor: p[0] & 0x0f }), 1)
        }
        Cid::AdrParamSetup => (MacCommand::AdrParamSetupAns, 0),
        Cid::DeviceTime => (MacCommand::DeviceTimeReq, 0),
        Cid::ForceRejoin => {
            return Err(Error::UnknownCid {
                cid: cid.byte(),
                uplink: true,
            })
        }
        Cid::RejoinParamSetup => {
            let p = take::<1>(cid, b)?;
            (
                MacCommand::RejoinParamSetupAns(RejoinParamSetupAnsPayload {
                    time_ok: p[0] & 0x01 != 0,
                }),
                1,
            )
        }
        Cid::PingSlotInfo => {
            let p = take::<1>(cid, b)?;
            (
                MacCommand::PingSlotInfoReq(PingSlotInfoReqPayload {
                    periodicity: p[0] & 0x07,
                }),
                1,
            )
        }
        Cid::PingSlotChannel => {
            let p = take::<1>(cid, b)?;
            (
                MacCommand::PingSlotChannelAns(PingSlotChannelAnsPayload {
                    channel_frequency_ok: p[0] & 0x01 != 0,
                    data_rate_ok: p[0] & 0x02 != 0,
                }),
                1,
            )
        }
        Cid::BeaconFreq => {
            let p = take::<1>(cid, b)?;
            (
                MacCommand::BeaconFreqAns(BeaconFreqAnsPayload {
                    beacon_frequency_ok: p[0] & 0x01 != 0,
                }),
                1,
            )
        }
    })
}

fn decode_downlink(cid: Cid, b: &[u8]) -> Result<(MacCommand, usize)> {
    Ok(match cid {
        Cid::Reset => {
            let p = take::<1>(cid, b)?;
            (MacCommand::ResetConf(Version { minor: p[0] & 0x0f }), 1)
        }
        Cid::LinkCheck => {
            let p = take::<2>(cid, b)?;
            (
                MacCommand::LinkCheckAns(LinkCheckAnsPayload {
                    margin: p[0],
                    gw_cnt: p[1],
                }),
                2,
            )
        }
        Cid::LinkAdr => {
            let p = take::<4>(cid, b)?;
            let mask = u16::from_le_bytes([p[1], p[2]]);
            let mut ch_mask = [false; 16];
            for (i, slot) in ch_mask.iter_mut().enumerate() {
                *slot = mask & (1 << i) != 0;
            }
            (
                MacCommand::LinkAdrReq(LinkAdrReqPayload {
                    data_rate: p[0] >> 4,
                    tx_power: p[0] & 0x0f,
                    ch_mask,
                    ch_mask_cntl: (p[3] >> 4) & 0x07,
                    nb_rep: p[3] & 0x0f,
                }),
                4,
            )
        }
        Cid::DutyCycle => {
            let p = take::<1>(cid, b)?;
            (MacCommand::DutyCycleReq(p[0] & 0x0f), 1)
        }
        Cid::RxParamSetup => {
            let p = take::<4>(cid, b)?;
            (
                MacCommand::RxParamSetupReq(RxParamSetupReqPayload {
                    rx1_dr_offset: (p[0] >> 4) & 0x07,
                    rx2_data_rate: p[0] & 0x0f,
                    frequency: decode_freq([p[1], p[2], p[3]]),
                }),
                4,
            )
        }
        Cid::DevStatus => (MacCommand::DevStatusReq, 0),
        Cid::NewChannel => {
            let p = take::<5>(cid, b)?;
            (
                MacCommand::NewChannelReq(NewChannelReqPayload {
                    ch_index: p[0],
                    frequency: decode_freq([p[1], p[2], p[3]]),
                    min_dr: p[4] & 0x0f,
                    max_dr: p[4] >> 4,
                }),
                5,
            )
        }
        Cid::RxTimingSetup => {
            let p = take::<1>(cid, b)?;
            (
                MacCommand::RxTimingSetupReq(RxTimingSetupReqPayload { delay: p[0] & 0x0f }),
                1,
            )
        }
        Cid::TxParamSetup => {
            let p = take::<1>(cid, b)?;
            (
                MacCommand::TxParamSetupReq(TxParamSetupReqPayload {
                    uplink_dwell_time_400ms: p[0] & 0x10 != 0,
                    downlink_dwell_time_400ms: p[0] & 0x20 != 0,
                    max_eirp_index: p[0] & 0x0f,
                }),
                1,
            )
        }
        Cid::DlChannel => {
            let p = take::<4>(cid, b)?;
            (
                MacCommand::DlChannelReq(DlChannelReqPayload {
                    ch_index: p[0],
                    frequency: decode_freq([p[1], p[2], p[3]]),
                }),
                4,
            )
        }
        Cid::Rekey => {
            let p = take::<1>(cid, b)?;
            (MacCommand::RekeyConf(Version { minor: p[0] & 0x0f }), 1)
        }
        Cid::AdrParamSetup => {
            let p = take::<1>(cid, b)?;
            (
                MacCommand::AdrParamSetupReq(AdrParamSetupReqPayload {
                    limit_exp: p[0] >> 4,
                    delay_exp: p[0] & 0x0f,
                }),
                1,
            )
        }
        Cid::DeviceTime => {
            let p = take::<5>(cid, b)?;
            (
                MacCommand::DeviceTimeAns(DeviceTimeAnsPayload {
                    seconds_since_gps_epoch: u32::from_le_bytes([p[0], p[1], p[2], p[3]]),
                    fractional: p[4],
                }),
                5,
            )
        }
        Cid::ForceRejoin => {
            let p = take::<2>(cid, b)?;
            (
                MacCommand::ForceRejoinReq(ForceRejoinReqPayload {
                    period: (p[0] >> 3) & 0x07,
                    max_retries: p[0] & 0x07,
                    rejoin_type: (p[1] >> 4) & 0x07,
                    dr: p[1] & 0x0f,
                }),
                2,
            )
        }
        Cid::RejoinParamSetup => {
            let p = take::<1>(cid, b)?;
            (
                MacCommand::RejoinParamSetupReq(RejoinParamSetupReqPayload {
                    max_time_n: p[0] >> 4,
                    max_count_n: p[0] & 0x0f,
                }),
                1,
            )
        }
        Cid::PingSlotInfo => (MacCommand::PingSlotInfoAns, 0),
        Cid::PingSlotChannel => {
            let p = take::<4>(cid, b)?;
            (
                MacCommand::PingSlotChannelReq(PingSlotChannelReqPayload {
                    frequency: decode_freq([p[0], p[1], p[2]]),
                    dr: p[3] & 0x0f,
                }),
                4,
            )
        }
        Cid::BeaconFreq => {
            let p = take::<3>(cid, b)?;
            (
                MacCommand::BeaconFreqReq(BeaconFreqReqPayload {
                    frequency: decode_freq([p[0], p[1], p[2]]),
                }),
                3,
            )
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uplink_stream_roundtrip() {
        let cmds = vec![
            MacCommand::LinkAdrAns(LinkAdrAnsPayload {
                channel_mask_ack: true,
                data_rate_ack: true,
                power_ack: false,
            }),
            MacCommand::DevStatusAns(DevStatusAnsPayload {
                battery: 128,
                margin: -12,
            }),
            MacCommand::RekeyInd(Version { minor: 1 }),
            MacCommand::DeviceTimeReq,
        ];
        let b = encode_many(&cmds).unwrap();
        assert_eq!(decode_many(true, &b).unwrap(), cmds);
    }

    #[test]
    fn test_downlink_stream_roundtrip() {
        let mut ch_mask = [false; 16];
        ch_mask[0] = true;
        ch_mask[1] = true;
        ch_mask[2] = true;

        let cmds = vec![
            MacCommand::LinkAdrReq(LinkAdrReqPayload {
                data_rate: 5,
                tx_power: 2,
                ch_mask,
                ch_mask_cntl: 0,
                nb_rep: 1,
            }),
            MacCommand::NewChannelReq(NewChannelReqPayload {
                ch_index: 3,
                frequency: 867_100_000,
                min_dr: 0,
                max_dr: 5,
            }),
            MacCommand::RxParamSetupReq(RxParamSetupReqPayload {
                rx1_dr_offset: 2,
                rx2_data_rate: 0,
                frequency: 869_525_000,
            }),
            MacCommand::DeviceTimeAns(DeviceTimeAnsPayload {
                seconds_since_gps_epoch: 1_234_567,
                fractional: 128,
            }),
        ];
        let b = encode_many(&cmds).unwrap();
        assert_eq!(decode_many(false, &b).unwrap(), cmds);
    }

    #[test]
    fn test_dev_status_margin_sign_extension() {
        // margin -32 encodes as 0b100000
        let b = encode_many(&[MacCommand::DevStatusAns(DevStatusAnsPayload {
            battery: 1,
            margin: -32,
        })])
        .unwrap();
        match &decode_many(true, &b).unwrap()[0] {
            MacCommand::DevStatusAns(p) => assert_eq!(p.margin, -32),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_cid_fails_stream() {
        assert_eq!(
            decode_many(true, &[0x7f]),
            Err(Error::UnknownCid {
                cid: 0x7f,
                uplink: true
            })
        );
    }

    #[test]
    fn test_truncated_payload_fails() {
        // LinkAdrReq wants 4 bytes
        assert_eq!(
            decode_many(false, &[0x03, 0x50]),
            Err(Error::TruncatedMacCommand { cid: Cid::LinkAdr })
        );
    }

    #[test]
    fn test_frequency_must_be_multiple_of_100() {
        let mut out = Vec::new();
        let res = MacCommand::BeaconFreqReq(BeaconFreqReqPayload { frequency: 101 })
            .encode_into(&mut out);
        assert_eq!(res, Err(Error::InvalidFrequency(101)));
    }
}
