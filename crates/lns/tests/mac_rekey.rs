// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RekeyInd over the full uplink path (LoRaWAN 1.1).

mod common;

use common::{harness, Harness};
use lns::gateway::{ModulationInfo, UplinkFrame, UplinkRxInfo, UplinkTxInfo};
use lns::storage::{Device, DeviceProfile, DeviceSession, RoutingProfile, ServiceProfile};
use lns::uplink::handle_uplink_frame;
use lrwn::maccommand::{encode_many, Version};
use lrwn::{
    AES128Key, Cid, DevAddr, EUI64, FCtrl, Fhdr, MType, MacCommand, MacPayload, Major, Mhdr,
    Payload, PhyPayload,
};

fn snwk() -> AES128Key {
    AES128Key::new([2; 16])
}

fn fnwk() -> AES128Key {
    AES128Key::new([3; 16])
}

fn create_11_device(h: &Harness, dev_eui: EUI64, dev_addr: DevAddr) {
    let storage = &h.ctx.storage;
    let mut dp = DeviceProfile {
        mac_version: "1.1.0".into(),
        supports_32bit_fcnt: true,
        ..Default::default()
    };
    let mut sp = ServiceProfile::default();
    let mut rp = RoutingProfile::default();
    storage.create_device_profile(&mut dp).unwrap();
    storage.create_service_profile(&mut sp).unwrap();
    storage.create_routing_profile(&mut rp).unwrap();

    let mut device = Device {
        dev_eui,
        device_profile_id: dp.id,
        service_profile_id: sp.id,
        routing_profile_id: rp.id,
        ..Default::default()
    };
    storage.create_device(&mut device).unwrap();

    storage
        .save_device_session(&DeviceSession {
            dev_eui,
            dev_addr,
            mac_version: "1.1.0".into(),
            s_nwk_s_int_key: snwk(),
            f_nwk_s_int_key: fnwk(),
            nwk_s_enc_key: AES128Key::new([4; 16]),
            f_cnt_up: 0,
            nb_trans: 1,
            rx_delay: 1,
            rx2_frequency: 869_525_000,
            enabled_uplink_channels: vec![0, 1, 2],
            ..Default::default()
        })
        .unwrap();
}

fn rekey_uplink(dev_addr: DevAddr, dev_minor: u8) -> UplinkFrame {
    let f_opts = encode_many(&[MacCommand::RekeyInd(Version { minor: dev_minor })]).unwrap();

    let mut phy = PhyPayload {
        mhdr: Mhdr {
            m_type: MType::UnconfirmedDataUp,
            major: Major::LoRaWanR1,
        },
        payload: Payload::Mac(MacPayload {
            fhdr: Fhdr {
                dev_addr,
                f_ctrl: FCtrl::default(),
                f_cnt: 0,
                f_opts,
            },
            f_port: None,
            frm_payload: vec![],
        }),
        mic: [0; 4],
    };
    // SF7 on 868.1 MHz: DR 5, channel 0
    phy.set_uplink_mic_11(&snwk(), &fnwk(), 0, 5, 0).unwrap();

    UplinkFrame {
        phy_payload: phy.to_vec().unwrap(),
        tx_info: UplinkTxInfo {
            frequency: 868_100_000,
            modulation: ModulationInfo::Lora {
                bandwidth_khz: 125,
                spreading_factor: 7,
                code_rate: "4/5".into(),
            },
        },
        rx_info: UplinkRxInfo {
            gateway_id: EUI64([5; 8]),
            rssi: -40,
            lora_snr: 9.0,
            time: None,
            context: vec![],
        },
    }
}

fn queued_rekey_conf_minor(h: &Harness, dev_eui: EUI64) -> u8 {
    let queue = h.ctx.storage.get_mac_command_queue(dev_eui).unwrap();
    let block = queue
        .iter()
        .find(|b| b.cid == Cid::Rekey)
        .expect("rekey_conf queued");
    match &block.commands[0] {
        MacCommand::RekeyConf(v) => v.minor,
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_rekey_conf_clamped_to_device_minor() {
    let h = harness();
    let dev_eui = EUI64([6, 6, 6, 6, 6, 6, 6, 1]);
    let dev_addr = DevAddr([6, 6, 6, 1]);
    create_11_device(&h, dev_eui, dev_addr);

    handle_uplink_frame(&h.ctx, rekey_uplink(dev_addr, 0))
        .await
        .unwrap();

    // the answer went out with the class A downlink; inspect the frame
    let frames = h.gateway.downlink_frames.lock();
    assert_eq!(frames.len(), 1);
    let phy = PhyPayload::from_slice(&frames[0].items[0].phy_payload).unwrap();
    let mac = phy.mac_payload().unwrap();
    let commands = lrwn::maccommand::decode_many(false, &mac.fhdr.f_opts).unwrap();
    assert_eq!(commands, vec![MacCommand::RekeyConf(Version { minor: 0 })]);
}

#[tokio::test]
async fn test_rekey_conf_matches_device_at_server_minor() {
    let h = harness();
    let dev_eui = EUI64([6, 6, 6, 6, 6, 6, 6, 2]);
    let dev_addr = DevAddr([6, 6, 6, 2]);
    create_11_device(&h, dev_eui, dev_addr);

    // stop the response downlink so the queued block can be inspected
    h.gateway.refuse_gateways.lock().push(EUI64([5; 8]));

    let res = handle_uplink_frame(&h.ctx, rekey_uplink(dev_addr, 1)).await;
    assert!(matches!(res, Err(lns::Error::NoGateway)));

    assert_eq!(queued_rekey_conf_minor(&h, dev_eui), 1);
}
