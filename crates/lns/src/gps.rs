// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! GPS time conversions.
//!
//! Class B scheduling and DeviceTimeAns run on GPS time: seconds since
//! 1980-01-06T00:00:00Z, not adjusted for leap seconds. The fixed offset
//! below is correct for frames after 2017-01-01; update it when the next
//! leap second is announced.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// UTC-to-GPS leap-second offset.
pub const LEAP_SECONDS: i64 = 18;

fn gps_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1980, 1, 6, 0, 0, 0).unwrap()
}

/// Duration since the GPS epoch for a UTC instant.
pub fn time_since_gps_epoch(t: DateTime<Utc>) -> Duration {
    let millis = (t - gps_epoch()).num_milliseconds() + LEAP_SECONDS * 1_000;
    Duration::from_millis(millis.max(0) as u64)
}

/// UTC instant for a duration since the GPS epoch.
pub fn time_from_gps_epoch(d: Duration) -> DateTime<Utc> {
    gps_epoch() + chrono::Duration::milliseconds(d.as_millis() as i64 - LEAP_SECONDS * 1_000)
}
