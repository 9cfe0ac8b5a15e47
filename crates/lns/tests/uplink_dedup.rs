// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::unreadable_literal)] // test constants
#![allow(clippy::float_cmp)] // test assertions with constants

//! Uplink deduplication: the same transmission heard by several gateways
//! must produce exactly one logical uplink.

mod common;

use common::{create_device, harness, session_key};
use lns::uplink::handle_uplink_frame;
use lrwn::crypto::Direction;
use lrwn::{DevAddr, EUI64, FCtrl, Fhdr, MType, MacPayload, Major, Mhdr, Payload, PhyPayload};
use lns::gateway::{ModulationInfo, UplinkFrame, UplinkRxInfo, UplinkTxInfo};

fn data_up_frame(dev_addr: DevAddr, f_cnt: u32) -> Vec<u8> {
    let mut phy = PhyPayload {
        mhdr: Mhdr {
            m_type: MType::UnconfirmedDataUp,
            major: Major::LoRaWanR1,
        },
        payload: Payload::Mac(MacPayload {
            fhdr: Fhdr {
                dev_addr,
                f_ctrl: FCtrl::default(),
                f_cnt,
                f_opts: vec![],
            },
            f_port: Some(10),
            frm_payload: vec![1, 2, 3, 4],
        }),
        mic: [0; 4],
    };
    phy.set_mic_legacy(Direction::Uplink, &session_key()).unwrap();
    phy.to_vec().unwrap()
}

fn tx_info() -> UplinkTxInfo {
    UplinkTxInfo {
        frequency: 868_300_000,
        modulation: ModulationInfo::Lora {
            bandwidth_khz: 125,
            spreading_factor: 10,
            code_rate: "4/5".into(),
        },
    }
}

fn rx_info(gateway_id: EUI64, rssi: i32) -> UplinkRxInfo {
    UplinkRxInfo {
        gateway_id,
        rssi,
        lora_snr: 5.5,
        time: None,
        context: vec![1, 2, 3, 4],
    }
}

#[tokio::test]
async fn test_two_gateways_one_callback() {
    let h = harness();
    let dev_addr = DevAddr([1, 2, 3, 4]);
    let dev_eui = EUI64([2, 2, 2, 2, 2, 2, 2, 1]);
    create_device(&h, dev_eui, dev_addr);

    let phy = data_up_frame(dev_addr, 10);
    let gw_a = EUI64([0, 1, 2, 3, 4, 5, 6, 8]);
    let gw_b = EUI64([0, 1, 2, 3, 4, 5, 6, 9]);

    let frame_a = UplinkFrame {
        phy_payload: phy.clone(),
        tx_info: tx_info(),
        rx_info: rx_info(gw_a, -60),
    };
    let frame_b = UplinkFrame {
        phy_payload: phy,
        tx_info: tx_info(),
        rx_info: rx_info(gw_b, -50),
    };

    let (res_a, res_b) = tokio::join!(
        handle_uplink_frame(&h.ctx, frame_a),
        handle_uplink_frame(&h.ctx, frame_b),
    );
    res_a.unwrap();
    res_b.unwrap();

    // exactly one downstream callback
    let uplinks = h.app_server.uplink_data.lock();
    assert_eq!(uplinks.len(), 1);
    let req = &uplinks[0];
    assert_eq!(req.dev_eui, dev_eui);
    assert_eq!(req.f_cnt, 10);
    assert_eq!(req.f_port, 10);
    assert_eq!(req.dr, 2); // SF10/125 on EU868

    // both receptions survive, strongest first
    assert_eq!(req.rx_info.len(), 2);
    assert_eq!(req.rx_info[0].gateway_id, gw_b);
    assert_eq!(req.rx_info[0].rssi, -50);
    assert_eq!(req.rx_info[1].gateway_id, gw_a);

    // rx-info set stored for the downlink scheduler, same ordering
    let set = h.ctx.storage.get_device_gateway_rx_info_set(dev_eui).unwrap();
    assert_eq!(set.dr, 2);
    assert_eq!(set.items.len(), 2);
    assert_eq!(set.items[0].gateway_id, gw_b);

    // counter advanced
    let ds = h.ctx.storage.get_device_session(dev_eui).unwrap();
    assert_eq!(ds.f_cnt_up, 11);
}

#[tokio::test]
async fn test_same_gateway_twice_is_a_singleton() {
    let h = harness();
    let dev_addr = DevAddr([1, 2, 3, 5]);
    let dev_eui = EUI64([2, 2, 2, 2, 2, 2, 2, 2]);
    create_device(&h, dev_eui, dev_addr);

    let phy = data_up_frame(dev_addr, 10);
    let gw = EUI64([0, 1, 2, 3, 4, 5, 6, 8]);
    let frame = UplinkFrame {
        phy_payload: phy,
        tx_info: tx_info(),
        rx_info: rx_info(gw, -60),
    };

    let (res_a, res_b) = tokio::join!(
        handle_uplink_frame(&h.ctx, frame.clone()),
        handle_uplink_frame(&h.ctx, frame),
    );
    res_a.unwrap();
    res_b.unwrap();

    let uplinks = h.app_server.uplink_data.lock();
    assert_eq!(uplinks.len(), 1);
    // the set deduplicated the identical reception
    assert_eq!(uplinks[0].rx_info.len(), 1);
}

#[tokio::test]
async fn test_late_copy_is_a_new_emission() {
    let h = harness();
    let dev_addr = DevAddr([1, 2, 3, 6]);
    let dev_eui = EUI64([2, 2, 2, 2, 2, 2, 2, 3]);
    create_device(&h, dev_eui, dev_addr);

    // counter checks would reject the replay; this test is about dedup
    let mut ds = h.ctx.storage.get_device_session(dev_eui).unwrap();
    ds.skip_fcnt_check = true;
    h.ctx.storage.save_device_session(&ds).unwrap();

    let phy = data_up_frame(dev_addr, 10);
    let gw = EUI64([0, 1, 2, 3, 4, 5, 6, 8]);
    let frame = UplinkFrame {
        phy_payload: phy,
        tx_info: tx_info(),
        rx_info: rx_info(gw, -60),
    };

    handle_uplink_frame(&h.ctx, frame.clone()).await.unwrap();
    // well past the winner's collect
    tokio::time::sleep(h.ctx.config.deduplication_delay() * 2).await;
    handle_uplink_frame(&h.ctx, frame).await.unwrap();

    assert_eq!(h.app_server.uplink_data.lock().len(), 2);
}

#[tokio::test]
async fn test_unknown_dev_addr_is_an_error() {
    let h = harness();
    let frame = UplinkFrame {
        phy_payload: data_up_frame(DevAddr([9, 9, 9, 9]), 1),
        tx_info: tx_info(),
        rx_info: rx_info(EUI64([1; 8]), -60),
    };
    assert!(matches!(
        handle_uplink_frame(&h.ctx, frame).await,
        Err(lns::Error::NoDeviceSession)
    ));
}
