// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! High-resolution monotonic counter helpers.
//!
//! Frame timestamps in the shared-memory ring are expressed in QPC ticks;
//! the ring header carries the tick frequency so consumers on either side
//! of the process boundary agree on the time base. On Unix the counter is
//! `CLOCK_MONOTONIC` read in nanoseconds, giving a fixed frequency of 1 GHz.

/// Ticks per second of [`qpc_now`].
pub const QPC_FREQUENCY: u64 = 1_000_000_000;

/// Current value of the high-resolution monotonic counter, in ticks.
pub fn qpc_now() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: clock_gettime with a valid timespec pointer has no other
    // preconditions; CLOCK_MONOTONIC is always available on supported targets.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as u64 * QPC_FREQUENCY + ts.tv_nsec as u64
}

/// Converts a duration in seconds to a tick count at the given frequency.
pub fn seconds_delta_to_qpc(seconds: f64, frequency: u64) -> u64 {
    (seconds * frequency as f64) as u64
}

/// Converts a tick delta to milliseconds at the given frequency.
pub fn qpc_delta_to_ms(delta: u64, frequency: u64) -> f64 {
    delta as f64 / (frequency as f64 / 1000.)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qpc_is_monotonic() {
        let a = qpc_now();
        let b = qpc_now();
        assert!(b >= a);
    }

    #[test]
    fn tick_conversions_are_inverse() {
        let ticks = seconds_delta_to_qpc(0.1, QPC_FREQUENCY);
        assert_eq!(ticks, 100_000_000);
        let ms = qpc_delta_to_ms(ticks, QPC_FREQUENCY);
        assert!((ms - 100.0).abs() < 1e-9);
    }
}
