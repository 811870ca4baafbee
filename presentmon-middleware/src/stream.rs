// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;

use presentmon_ipc::ring::FrameRingView;

/// Client view of one tracked process's frame ring, opened from the name
/// returned by `StartStream`.
pub struct StreamClient {
    ring: FrameRingView,
}

impl StreamClient {
    pub fn open(shm_name: &str) -> io::Result<Self> {
        Ok(Self {
            ring: FrameRingView::open(shm_name)?,
        })
    }

    pub fn ring(&self) -> &FrameRingView {
        &self.ring
    }

    pub fn qpc_frequency(&self) -> u64 {
        self.ring.header().ticks_per_second()
    }
}
