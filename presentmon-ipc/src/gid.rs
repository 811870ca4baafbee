// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Global identifiers shared by the service and its clients. Clients may
//! override the pipe and segment names at construction; everything else is
//! fixed protocol surface.

pub const DEFAULT_CONTROL_PIPE_NAME: &str = "/tmp/presentmon-2-control-pipe";
pub const DEFAULT_INTROSPECTION_SHM_NAME: &str = "presentmon-2-bip-shm";

pub const INTROSPECTION_SEGMENT_SIZE: usize = 0x10_0000;
pub const INTROSPECTION_ROOT_NAME: &str = "in-root";
pub const INTROSPECTION_MUTEX_NAME: &str = "in-mtx";
pub const INTROSPECTION_SEMAPHORE_NAME: &str = "in-sem";

/// Number of posts to the readiness semaphore on publication; an upper
/// bound on the number of simultaneous initial waiters.
pub const INTROSPECTION_READINESS_POSTS: u32 = 8;

pub const DEFAULT_RING_ENTRIES: u64 = 1024;

/// Name of the per-process frame ring negotiated by `StartStream`,
/// namespaced under the service's segment name so concurrent service
/// instances never collide.
pub fn stream_shm_name(service_name: &str, target_pid: u32) -> String {
    format!("{service_name}-frames-{target_pid}")
}
