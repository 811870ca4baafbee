// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Introspection publication.
//!
//! The service creates the named segment exclusively, plants the shared
//! introspection mutex, the readiness semaphore and the root object in its
//! named-object directory, populates the catalog, and finally releases the
//! readiness holdoff. Publication happens once per service lifetime.

use presentmon_ipc::gid;
use presentmon_ipc::intro::{populate, IntrospectionRoot};
use presentmon_ipc::shm::{SegmentError, ShmSegment, ShmSemaphore, ShmSharedMutex};

pub struct ServiceComms {
    segment: ShmSegment,
    root_offset: u64,
}

impl ServiceComms {
    pub fn new(shm_name: &str) -> Result<Self, SegmentError> {
        let segment = ShmSegment::create(shm_name, gid::INTROSPECTION_SEGMENT_SIZE)?;
        segment.publish(gid::INTROSPECTION_MUTEX_NAME, ShmSharedMutex::new())?;
        let semaphore_offset =
            segment.publish(gid::INTROSPECTION_SEMAPHORE_NAME, ShmSemaphore::new(0))?;
        let root_offset =
            segment.publish(gid::INTROSPECTION_ROOT_NAME, IntrospectionRoot::new())?;

        {
            // SAFETY: the root was just published and nothing reads it until
            // the semaphore below is posted.
            let root = unsafe { &mut *segment.at::<IntrospectionRoot>(root_offset) };
            populate(&segment, root)?;
        }

        // release the holdoff once construction is complete
        // SAFETY: offset was published for a semaphore.
        let semaphore = unsafe { segment.resolve::<ShmSemaphore>(semaphore_offset) };
        for _ in 0..gid::INTROSPECTION_READINESS_POSTS {
            semaphore.post();
        }
        Ok(Self {
            segment,
            root_offset,
        })
    }

    pub fn segment(&self) -> &ShmSegment {
        &self.segment
    }

    pub fn introspection_root(&self) -> &IntrospectionRoot {
        // SAFETY: offset was published for the root and populate finished
        // before construction returned.
        unsafe { self.segment.resolve(self.root_offset) }
    }
}
