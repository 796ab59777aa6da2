// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic clock reads.
//!
//! Page-flip timestamps from the kernel are on `CLOCK_MONOTONIC`, so the
//! same clock is used for wait deadlines and flip latency.

use core::time::Duration;

use rustix::time::{ClockId, Timespec, clock_gettime};

/// Returns the current `CLOCK_MONOTONIC` time.
#[must_use]
pub fn now() -> Duration {
    timespec_to_duration(clock_gettime(ClockId::Monotonic))
}

pub(crate) fn timespec_to_duration(timespec: Timespec) -> Duration {
    let seconds = u64::try_from(timespec.tv_sec).unwrap_or(0);
    let nanos = u32::try_from(timespec.tv_nsec)
        .unwrap_or(0)
        .min(999_999_999);
    Duration::new(seconds, nanos)
}

/// Converts a wait bound to a poll timeout, saturating on overflow.
pub(crate) fn duration_to_timespec(duration: Duration) -> Timespec {
    Timespec {
        tv_sec: i64::try_from(duration.as_secs()).unwrap_or(i64::MAX),
        tv_nsec: i64::from(duration.subsec_nanos()),
    }
}
