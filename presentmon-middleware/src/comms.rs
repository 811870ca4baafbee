// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client access to the published introspection catalog.
//!
//! Readers wait on the readiness semaphore and immediately repost it, so
//! the holdoff stops limiting entry after the first release. Lookups run
//! under a shared lock on the introspection mutex; the service would take
//! it exclusively if it ever republished (current contract: populate
//! once).

use presentmon_ipc::gid;
use presentmon_ipc::intro::api::PM_INTROSPECTION_ROOT;
use presentmon_ipc::intro::{BlockAllocator, CloneError, IntrospectionRoot, ProbeAllocator};
use presentmon_ipc::shm::{SegmentError, ShmSegment, ShmSemaphore, ShmSharedMutex};

#[derive(Debug, thiserror::Error)]
pub enum CommsError {
    #[error("introspection segment unusable: {0}")]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    Clone(#[from] CloneError),
}

pub struct MiddlewareComms {
    segment: ShmSegment,
}

impl MiddlewareComms {
    pub fn new(shm_name: &str) -> Result<Self, CommsError> {
        Ok(Self {
            segment: ShmSegment::open(shm_name)?,
        })
    }

    fn wait_on_introspection_holdoff(&self) -> Result<(), CommsError> {
        let offset = self.segment.find(gid::INTROSPECTION_SEMAPHORE_NAME)?;
        // SAFETY: the service published this offset for a semaphore.
        let semaphore = unsafe { self.segment.resolve::<ShmSemaphore>(offset) };
        semaphore.wait();
        // return the slot we just took; the holdoff should not limit entry
        // once released
        semaphore.post();
        Ok(())
    }

    /// Runs `body` with the root under a shared introspection lock.
    pub fn with_root<R>(
        &self,
        body: impl FnOnce(&ShmSegment, &IntrospectionRoot) -> R,
    ) -> Result<R, CommsError> {
        self.wait_on_introspection_holdoff()?;
        let mutex_offset = self.segment.find(gid::INTROSPECTION_MUTEX_NAME)?;
        // SAFETY: the service published this offset for the shared mutex.
        let mutex = unsafe { self.segment.resolve::<ShmSharedMutex>(mutex_offset) };
        let _shared = mutex.lock_shared();
        let root_offset = self.segment.find(gid::INTROSPECTION_ROOT_NAME)?;
        // SAFETY: the service published this offset for the root, and the
        // shared lock keeps it stable while we read.
        let root = unsafe { self.segment.resolve::<IntrospectionRoot>(root_offset) };
        Ok(body(&self.segment, root))
    }

    /// Deep-clones the catalog into a single heap block owned by the
    /// caller; freeing the returned root reclaims the whole block.
    pub fn introspection_root(&self) -> Result<*mut PM_INTROSPECTION_ROOT, CommsError> {
        let cloned = self.with_root(|segment, root| -> Result<_, CommsError> {
            // probe pass sizes the block without touching memory
            let mut probe = ProbeAllocator::new();
            root.api_clone(segment, &mut probe);
            let mut block = BlockAllocator::new(probe.total_size())?;
            let cloned = root.api_clone(segment, &mut block);
            debug_assert_eq!(block.used(), probe.total_size());
            Ok(cloned)
        })??;
        Ok(cloned)
    }
}
