// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Last-resort diagnostic channel.
//!
//! Faults inside the logging pipeline itself (a panicking policy or driver,
//! a failed enqueue) cannot be reported through the pipeline. They land here
//! instead: a process-wide, lazily constructed ring buffer of recent panic
//! lines plus an immediate stderr echo. Must stay callable from drop paths
//! and from inside a poisoned pipeline, so it never blocks and never fails.

use std::collections::VecDeque;
use std::sync::{Mutex, OnceLock};

const RING_CAPACITY: usize = 64;

struct PanicLogger {
    ring: Mutex<VecDeque<String>>,
}

static INSTANCE: OnceLock<PanicLogger> = OnceLock::new();

fn instance() -> &'static PanicLogger {
    INSTANCE.get_or_init(|| PanicLogger {
        ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
    })
}

/// Records a pipeline fault. Non-blocking: if the ring is contended the
/// message still reaches stderr.
pub fn panic_log(message: impl Into<String>) {
    let message = message.into();
    eprintln!("[pmlog-panic] {message}");
    if let Ok(mut ring) = instance().ring.try_lock() {
        if ring.len() == RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(message);
    }
}

/// Snapshot of the most recent panic lines, oldest first.
pub fn recent_panics() -> Vec<String> {
    match instance().ring.try_lock() {
        Ok(ring) => ring.iter().cloned().collect(),
        Err(_) => Vec::new(),
    }
}
