// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::unreadable_literal)] // test constants

//! Multicast enqueue fan-out and scheduler execution.

mod common;

use common::{harness, Harness};
use lns::downlink::{multicast, Scheduler};
use lns::storage::{
    DeviceGatewayRxInfo, DeviceGatewayRxInfoSet, Device, DeviceProfile, MulticastGroup,
    MulticastGroupType, MulticastQueueItem, RoutingProfile, ServiceProfile,
};
use lns::Error;
use lrwn::{AES128Key, DevAddr, EUI64};
use std::sync::Arc;

struct MulticastFixture {
    group: MulticastGroup,
    gateways: Vec<EUI64>,
}

/// Two member devices, each heard best by its own gateway.
fn create_group(h: &Harness, group_type: MulticastGroupType) -> MulticastFixture {
    let storage = &h.ctx.storage;

    let mut sp = ServiceProfile::default();
    let mut rp = RoutingProfile::default();
    let mut dp = DeviceProfile::default();
    storage.create_service_profile(&mut sp).unwrap();
    storage.create_routing_profile(&mut rp).unwrap();
    storage.create_device_profile(&mut dp).unwrap();

    let mut group = MulticastGroup {
        group_type,
        mc_addr: DevAddr([1, 2, 3, 4]),
        mc_nwk_s_key: AES128Key::new([1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8]),
        frequency: 868_100_000,
        f_cnt: 11,
        dr: 3,
        ping_slot_period: if group_type == MulticastGroupType::B {
            16
        } else {
            0
        },
        service_profile_id: sp.id,
        routing_profile_id: rp.id,
        ..Default::default()
    };
    storage.create_multicast_group(&mut group).unwrap();

    let gateways = vec![EUI64([1, 1, 1, 1, 1, 1, 1, 1]), EUI64([1, 1, 1, 1, 1, 1, 1, 2])];
    let devices = [EUI64([2, 2, 2, 2, 2, 2, 2, 1]), EUI64([2, 2, 2, 2, 2, 2, 2, 2])];

    for (dev_eui, gateway_id) in devices.iter().zip(gateways.iter()) {
        let mut device = Device {
            dev_eui: *dev_eui,
            device_profile_id: dp.id,
            service_profile_id: sp.id,
            routing_profile_id: rp.id,
            ..Default::default()
        };
        storage.create_device(&mut device).unwrap();
        storage
            .add_device_to_multicast_group(*dev_eui, group.id)
            .unwrap();
        storage
            .save_device_gateway_rx_info_set(&DeviceGatewayRxInfoSet {
                dev_eui: *dev_eui,
                dr: 3,
                items: vec![DeviceGatewayRxInfo {
                    gateway_id: *gateway_id,
                    rssi: 50,
                    lora_snr: 5.0,
                    context: vec![],
                }],
            })
            .unwrap();
    }

    MulticastFixture { group, gateways }
}

fn queue_item(group_id: uuid::Uuid, f_cnt: u32) -> MulticastQueueItem {
    MulticastQueueItem {
        multicast_group_id: group_id,
        f_cnt,
        f_port: 2,
        frm_payload: vec![1, 2, 3, 4],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_invalid_f_cnt() {
    let h = harness();
    let f = create_group(&h, MulticastGroupType::C);

    let res = multicast::enqueue_queue_item(&h.ctx, queue_item(f.group.id, 10));
    assert!(matches!(res, Err(Error::InvalidFCnt)));

    // no writes happened
    assert!(h
        .ctx
        .storage
        .get_multicast_queue_items_for_group(f.group.id)
        .unwrap()
        .is_empty());
    assert_eq!(h.ctx.storage.get_multicast_group(f.group.id).unwrap().f_cnt, 11);
}

#[tokio::test]
async fn test_class_c_staggers_by_lock_duration() {
    let h = harness();
    let f = create_group(&h, MulticastGroupType::C);

    multicast::enqueue_queue_item(&h.ctx, queue_item(f.group.id, 11)).unwrap();

    let items = h
        .ctx
        .storage
        .get_multicast_queue_items_for_group(f.group.id)
        .unwrap();
    assert_eq!(items.len(), 2);
    assert_ne!(items[0].gateway_id, items[1].gateway_id);
    assert!(f.gateways.contains(&items[0].gateway_id));
    assert!(items[0].emit_at_gps_epoch.is_none());
    assert!(items[1].emit_at_gps_epoch.is_none());

    let delta = (items[1].schedule_at - items[0].schedule_at)
        .num_milliseconds()
        .unsigned_abs();
    assert_eq!(
        delta,
        h.ctx.config.class_c_downlink_lock().as_millis() as u64
    );

    assert_eq!(h.ctx.storage.get_multicast_group(f.group.id).unwrap().f_cnt, 12);
}

#[tokio::test]
async fn test_class_b_gets_ping_slot_emit_times() {
    let h = harness();
    let f = create_group(&h, MulticastGroupType::B);

    multicast::enqueue_queue_item(&h.ctx, queue_item(f.group.id, 11)).unwrap();

    let items = h
        .ctx
        .storage
        .get_multicast_queue_items_for_group(f.group.id)
        .unwrap();
    assert_eq!(items.len(), 2);

    let emit_a = items[0].emit_at_gps_epoch.expect("class B emit time");
    let emit_b = items[1].emit_at_gps_epoch.expect("class B emit time");
    assert_ne!(emit_a, emit_b);
    assert_ne!(items[0].schedule_at, items[1].schedule_at);

    assert_eq!(h.ctx.storage.get_multicast_group(f.group.id).unwrap().f_cnt, 12);
}

#[tokio::test]
async fn test_scheduler_transmits_due_class_c_item() {
    let h = harness();
    let f = create_group(&h, MulticastGroupType::C);

    multicast::enqueue_queue_item(&h.ctx, queue_item(f.group.id, 11)).unwrap();

    // first item is due immediately, second only after the lock duration
    Scheduler::new(Arc::clone(&h.ctx)).tick();

    let frames = h.gateway.downlink_frames.lock();
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];
    assert_eq!(frame.items.len(), 1);
    assert_eq!(frame.items[0].tx_info.frequency, 868_100_000);

    let remaining = h
        .ctx
        .storage
        .get_multicast_queue_items_for_group(f.group.id)
        .unwrap();
    assert_eq!(remaining.len(), 1);
}

#[tokio::test]
async fn test_refused_gateway_leaves_item_queued() {
    let h = harness();
    let f = create_group(&h, MulticastGroupType::C);
    h.gateway.refuse_gateways.lock().push(f.gateways[0]);

    multicast::enqueue_queue_item(&h.ctx, queue_item(f.group.id, 11)).unwrap();
    Scheduler::new(Arc::clone(&h.ctx)).tick();

    // transmission failed: the due item stays queued for the next pass
    let remaining = h
        .ctx
        .storage
        .get_multicast_queue_items_for_group(f.group.id)
        .unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(h.gateway.downlink_frames.lock().is_empty());
}
