// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Cross-process synchronization primitives stored inside a shared-memory
//! segment. Plain atomics with a yielding spin wait: publication happens
//! once per service lifetime and reads are short, so neither primitive
//! needs to park threads in the kernel.

use std::sync::atomic::{AtomicI32, Ordering};

fn backoff(spins: &mut u32) {
    *spins += 1;
    if *spins < 64 {
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
}

/// Counting semaphore. Lives in shared memory; all processes operate on the
/// same count.
#[repr(C)]
pub struct ShmSemaphore {
    count: AtomicI32,
}

impl ShmSemaphore {
    pub fn new(initial: i32) -> Self {
        Self {
            count: AtomicI32::new(initial),
        }
    }

    pub fn post(&self) {
        self.count.fetch_add(1, Ordering::Release);
    }

    /// Blocks until a permit is available and takes it.
    pub fn wait(&self) {
        let mut spins = 0;
        loop {
            let current = self.count.load(Ordering::Acquire);
            if current > 0
                && self
                    .count
                    .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                return;
            }
            backoff(&mut spins);
        }
    }
}

/// Shared/exclusive mutex. State is the reader count, with -1 marking an
/// exclusive holder.
#[repr(C)]
pub struct ShmSharedMutex {
    state: AtomicI32,
}

impl ShmSharedMutex {
    pub fn new() -> Self {
        Self {
            state: AtomicI32::new(0),
        }
    }

    pub fn lock_shared(&self) -> ShmSharedGuard<'_> {
        let mut spins = 0;
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current >= 0
                && self
                    .state
                    .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                return ShmSharedGuard { lock: self };
            }
            backoff(&mut spins);
        }
    }

    pub fn lock_exclusive(&self) -> ShmExclusiveGuard<'_> {
        let mut spins = 0;
        while self
            .state
            .compare_exchange(0, -1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            backoff(&mut spins);
        }
        ShmExclusiveGuard { lock: self }
    }
}

impl Default for ShmSharedMutex {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ShmSharedGuard<'a> {
    lock: &'a ShmSharedMutex,
}

impl Drop for ShmSharedGuard<'_> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(1, Ordering::Release);
    }
}

pub struct ShmExclusiveGuard<'a> {
    lock: &'a ShmSharedMutex,
}

impl Drop for ShmExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.lock.state.store(0, Ordering::Release);
    }
}
