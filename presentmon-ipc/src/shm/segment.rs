// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A named shared-memory segment with a bump allocator and a small
//! directory of named objects.
//!
//! Everything stored in a segment is addressed by byte offset from the
//! mapping base, never by pointer, so processes mapping the segment at
//! different addresses agree on the structure. The allocator cursor and the
//! directory both live inside the segment header and are updated with
//! atomics; only the creating process publishes objects.

use std::cell::UnsafeCell;
use std::io;
use std::mem::{align_of, size_of};
use std::sync::atomic::{AtomicU64, Ordering};

use super::unix::{MappedMem, NamedShmHandle};

const SEGMENT_MAGIC: u64 = 0x504d_3253_4547_3031; // "PM2SEG01"
const MAX_NAMED_OBJECTS: usize = 8;
const NAME_CAPACITY: usize = 24;

#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("shared memory i/o failure: {0}")]
    Io(#[from] io::Error),
    #[error("segment does not carry the expected magic")]
    BadMagic,
    #[error("segment allocator exhausted ({requested} bytes requested)")]
    OutOfSpace { requested: usize },
    #[error("named object directory is full")]
    DirectoryFull,
    #[error("object name {0:?} exceeds the directory name capacity")]
    NameTooLong(String),
    #[error("named object {0:?} not found in segment")]
    MissingObject(&'static str),
}

#[repr(C)]
struct DirEntry {
    // written by the publisher before the offset store releases it
    name: UnsafeCell<[u8; NAME_CAPACITY]>,
    // offset 0 marks an empty slot
    offset: AtomicU64,
}

#[repr(C)]
struct SegmentHeader {
    magic: u64,
    capacity: u64,
    alloc_cursor: AtomicU64,
    directory: [DirEntry; MAX_NAMED_OBJECTS],
}

/// A mapped segment, either created (owning the name, unlinked on drop) or
/// opened as a viewer.
pub struct ShmSegment {
    map: MappedMem,
}

impl ShmSegment {
    /// Creates the named segment exclusively and initializes its header.
    pub fn create(name: &str, size: usize) -> Result<Self, SegmentError> {
        let map = NamedShmHandle::create(name, size)?.map()?;
        // SAFETY: sole mapping at this point; fresh shm is zero-filled, so
        // the directory starts empty and only the scalars need writing.
        unsafe {
            let header = map.base() as *mut SegmentHeader;
            (*header).capacity = map.len() as u64;
            (*header).alloc_cursor = AtomicU64::new(first_offset());
            (*header).magic = SEGMENT_MAGIC;
        }
        tracing::debug!(name, size = map.len(), "created shared memory segment");
        Ok(Self { map })
    }

    /// Opens an existing named segment and validates its header.
    pub fn open(name: &str) -> Result<Self, SegmentError> {
        let map = NamedShmHandle::open(name)?.map()?;
        let segment = Self { map };
        if segment.header().magic != SEGMENT_MAGIC {
            return Err(SegmentError::BadMagic);
        }
        Ok(segment)
    }

    fn header(&self) -> &SegmentHeader {
        // SAFETY: the header sits at the mapping base and the mapping is at
        // least one page, far larger than the header.
        unsafe { &*(self.map.base() as *const SegmentHeader) }
    }

    /// Allocates `size` bytes at `align` alignment, returning the offset.
    /// Allocations are never individually freed; the segment is populate
    /// once, read many.
    pub fn alloc(&self, size: usize, align: usize) -> Result<u64, SegmentError> {
        debug_assert!(align.is_power_of_two());
        let header = self.header();
        let capacity = header.capacity;
        loop {
            let cursor = header.alloc_cursor.load(Ordering::Acquire);
            let aligned = (cursor + align as u64 - 1) & !(align as u64 - 1);
            let end = aligned + size as u64;
            if end > capacity {
                return Err(SegmentError::OutOfSpace { requested: size });
            }
            if header
                .alloc_cursor
                .compare_exchange(cursor, end, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(aligned);
            }
        }
    }

    /// Raw pointer to the object at `offset`.
    ///
    /// # Safety
    /// `offset` must come from [`Self::alloc`] (or the directory) for an
    /// object of type `T`; the caller is responsible for aliasing rules.
    pub unsafe fn at<T>(&self, offset: u64) -> *mut T {
        debug_assert!(offset as usize + size_of::<T>() <= self.map.len());
        debug_assert_eq!(offset as usize % align_of::<T>(), 0);
        self.map.base().add(offset as usize) as *mut T
    }

    /// Shared reference to the object at `offset`.
    ///
    /// # Safety
    /// Same contract as [`Self::at`]; additionally no exclusive reference
    /// to the object may exist.
    pub unsafe fn resolve<T>(&self, offset: u64) -> &T {
        &*self.at::<T>(offset)
    }

    /// Allocates an object, moves `value` into it, and registers it in the
    /// named-object directory. Only the creating process publishes.
    pub fn publish<T>(&self, name: &'static str, value: T) -> Result<u64, SegmentError> {
        if name.len() > NAME_CAPACITY {
            return Err(SegmentError::NameTooLong(name.into()));
        }
        let offset = self.alloc(size_of::<T>(), align_of::<T>())?;
        // SAFETY: freshly allocated, correctly aligned, unaliased.
        unsafe { self.at::<T>(offset).write(value) };
        for entry in &self.header().directory {
            if entry.offset.load(Ordering::Acquire) != 0 {
                continue;
            }
            // SAFETY: the slot is unpublished, so no reader looks at the
            // name until the offset store below releases it.
            unsafe {
                (&mut *entry.name.get())[..name.len()].copy_from_slice(name.as_bytes());
            }
            entry.offset.store(offset, Ordering::Release);
            return Ok(offset);
        }
        Err(SegmentError::DirectoryFull)
    }

    /// Looks up a published object's offset by name.
    pub fn find(&self, name: &'static str) -> Result<u64, SegmentError> {
        for entry in &self.header().directory {
            let offset = entry.offset.load(Ordering::Acquire);
            if offset == 0 {
                continue;
            }
            // SAFETY: the Acquire load above ordered the name write before
            // this read, and published names are never rewritten.
            let stored = unsafe { &*entry.name.get() };
            let len = stored.iter().position(|&b| b == 0).unwrap_or(NAME_CAPACITY);
            if &stored[..len] == name.as_bytes() {
                return Ok(offset);
            }
        }
        Err(SegmentError::MissingObject(name))
    }

    /// Bytes currently consumed by the allocator, header included.
    pub fn used(&self) -> u64 {
        self.header().alloc_cursor.load(Ordering::Acquire)
    }
}

fn first_offset() -> u64 {
    // keep every allocation at least 16-byte alignable
    ((size_of::<SegmentHeader>() as u64 - 1) & !15) + 16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("pm-test-{tag}-{}", std::process::id())
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn alloc_respects_alignment_and_capacity() {
        let seg = ShmSegment::create(&unique_name("seg-alloc"), 4096).unwrap();
        let a = seg.alloc(3, 1).unwrap();
        let b = seg.alloc(8, 8).unwrap();
        assert_eq!(b % 8, 0);
        assert!(b >= a + 3);
        // a page-aligned 4096-byte segment cannot hand out a megabyte
        assert!(matches!(
            seg.alloc(0x10_0000, 8),
            Err(SegmentError::OutOfSpace { .. })
        ));
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn publish_and_find_cross_mapping() {
        let name = unique_name("seg-dir");
        let seg = ShmSegment::create(&name, 4096).unwrap();
        let offset = seg.publish::<u64>("answer", 42).unwrap();

        let viewer = ShmSegment::open(&name).unwrap();
        let found = viewer.find("answer").unwrap();
        assert_eq!(found, offset);
        // SAFETY: offset was published for a u64.
        assert_eq!(unsafe { *viewer.resolve::<u64>(found) }, 42);
        assert!(matches!(
            viewer.find("missing"),
            Err(SegmentError::MissingObject("missing"))
        ));
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn open_rejects_foreign_segments() {
        let name = unique_name("seg-magic");
        let _raw = NamedShmHandle::create(&name, 4096).unwrap();
        assert!(matches!(
            ShmSegment::open(&name),
            Err(SegmentError::BadMagic)
        ));
    }
}
