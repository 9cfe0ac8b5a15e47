// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::unreadable_literal)] // test constants

//! Class A response assembly after a valid uplink.

mod common;

use common::{create_device, harness, session_key};
use lns::gateway::{DownlinkTiming, ModulationInfo, UplinkFrame, UplinkRxInfo, UplinkTxInfo};
use lns::storage::DeviceQueueItem;
use lns::uplink::handle_uplink_frame;
use lrwn::crypto::Direction;
use lrwn::{DevAddr, EUI64, FCtrl, Fhdr, MType, MacPayload, Major, Mhdr, Payload, PhyPayload};
use std::time::Duration;

fn uplink(dev_addr: DevAddr, f_cnt: u32, confirmed: bool, gateway_id: EUI64) -> UplinkFrame {
    let mut phy = PhyPayload {
        mhdr: Mhdr {
            m_type: if confirmed {
                MType::ConfirmedDataUp
            } else {
                MType::UnconfirmedDataUp
            },
            major: Major::LoRaWanR1,
        },
        payload: Payload::Mac(MacPayload {
            fhdr: Fhdr {
                dev_addr,
                f_ctrl: FCtrl::default(),
                f_cnt,
                f_opts: vec![],
            },
            f_port: Some(5),
            frm_payload: vec![9, 9, 9],
        }),
        mic: [0; 4],
    };
    phy.set_mic_legacy(Direction::Uplink, &session_key()).unwrap();

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
            gateway_id,
            rssi: -60,
            lora_snr: 7.0,
            time: None,
            context: vec![0xca, 0xfe],
        },
    }
}

#[tokio::test]
async fn test_confirmed_uplink_gets_ack_downlink() {
    let h = harness();
    let dev_addr = DevAddr([1, 1, 1, 1]);
    let dev_eui = EUI64([3, 3, 3, 3, 3, 3, 3, 1]);
    create_device(&h, dev_eui, dev_addr);

    let gw = EUI64([8, 7, 6, 5, 4, 3, 2, 1]);
    handle_uplink_frame(&h.ctx, uplink(dev_addr, 10, true, gw))
        .await
        .unwrap();

    let frames = h.gateway.downlink_frames.lock();
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];
    assert_eq!(frame.gateway_id, gw);
    // RX1 plus RX2 fallback
    assert_eq!(frame.items.len(), 2);

    // RX1: uplink channel and DR (SF7 -> DR5), one second delay
    match &frame.items[0].tx_info.timing {
        DownlinkTiming::Delay { delay } => assert_eq!(*delay, Duration::from_secs(1)),
        other => panic!("unexpected timing {other:?}"),
    }
    assert_eq!(frame.items[0].tx_info.frequency, 868_100_000);
    // RX2 fallback on the session's RX2 parameters
    assert_eq!(frame.items[1].tx_info.frequency, 869_525_000);
    match &frame.items[1].tx_info.timing {
        DownlinkTiming::Delay { delay } => assert_eq!(*delay, Duration::from_secs(2)),
        other => panic!("unexpected timing {other:?}"),
    }

    let phy = PhyPayload::from_slice(&frame.items[0].phy_payload).unwrap();
    let mac = phy.mac_payload().unwrap();
    assert!(mac.fhdr.f_ctrl.ack);
    assert_eq!(mac.fhdr.f_cnt, 0);

    // downlink counter committed
    let ds = h.ctx.storage.get_device_session(dev_eui).unwrap();
    assert_eq!(ds.n_f_cnt_down, 1);
}

#[tokio::test]
async fn test_queue_item_rides_the_response_window() {
    let h = harness();
    let dev_addr = DevAddr([1, 1, 1, 2]);
    let dev_eui = EUI64([3, 3, 3, 3, 3, 3, 3, 2]);
    create_device(&h, dev_eui, dev_addr);

    let mut qi = DeviceQueueItem {
        dev_eui,
        f_port: 7,
        f_cnt: 0,
        frm_payload: vec![0xaa, 0xbb],
        ..Default::default()
    };
    h.ctx.storage.create_device_queue_item(&mut qi).unwrap();

    let gw = EUI64([8, 7, 6, 5, 4, 3, 2, 1]);
    handle_uplink_frame(&h.ctx, uplink(dev_addr, 10, false, gw))
        .await
        .unwrap();

    let frames = h.gateway.downlink_frames.lock();
    assert_eq!(frames.len(), 1);
    let phy = PhyPayload::from_slice(&frames[0].items[0].phy_payload).unwrap();
    let mac = phy.mac_payload().unwrap();
    assert_eq!(mac.f_port, Some(7));
    assert_eq!(mac.frm_payload, vec![0xaa, 0xbb]);
    assert!(!mac.fhdr.f_ctrl.f_pending);

    // unconfirmed item leaves the queue after transmission
    assert!(h.ctx.storage.get_device_queue_items(dev_eui).unwrap().is_empty());
}

#[tokio::test]
async fn test_refused_gateway_falls_back_to_next_best() {
    let h = harness();
    let dev_addr = DevAddr([1, 1, 1, 3]);
    let dev_eui = EUI64([3, 3, 3, 3, 3, 3, 3, 3]);
    create_device(&h, dev_eui, dev_addr);

    let gw_best = EUI64([8, 8, 8, 8, 8, 8, 8, 1]);
    let gw_backup = EUI64([8, 8, 8, 8, 8, 8, 8, 2]);
    h.gateway.refuse_gateways.lock().push(gw_best);

    // two receptions of the confirmed uplink: the stronger gateway refuses
    let frame_best = uplink(dev_addr, 10, true, gw_best);
    let mut frame_backup = frame_best.clone();
    frame_backup.rx_info = UplinkRxInfo {
        gateway_id: gw_backup,
        rssi: -80,
        lora_snr: 2.0,
        time: None,
        context: vec![0xbe, 0xef],
    };

    let (res_a, res_b) = tokio::join!(
        handle_uplink_frame(&h.ctx, frame_best),
        handle_uplink_frame(&h.ctx, frame_backup),
    );
    res_a.unwrap();
    res_b.unwrap();

    let frames = h.gateway.downlink_frames.lock();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].gateway_id, gw_backup);
}
