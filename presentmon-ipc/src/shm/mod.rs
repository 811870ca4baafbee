// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Named shared memory, the segment allocator, and the cross-process
//! primitives built on it.

mod containers;
mod segment;
mod sync;
#[cfg(unix)]
mod unix;

pub use containers::{ShmString, ShmVec};
pub use segment::{SegmentError, ShmSegment};
pub use sync::{ShmSemaphore, ShmSharedMutex};
#[cfg(unix)]
pub use unix::{MappedMem, NamedShmHandle};
