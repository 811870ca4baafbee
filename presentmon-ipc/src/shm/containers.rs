// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Offset-based vector and string types backed by a segment allocator.
//!
//! Both store offsets instead of pointers so values embedded in shared
//! memory stay valid across processes. Elements must be plain data
//! (`Copy`); growth allocates a fresh block from the bump allocator and
//! abandons the old one, which is acceptable for a populate-once tree.

use std::marker::PhantomData;
use std::mem::{align_of, size_of};

use super::segment::{SegmentError, ShmSegment};

#[repr(C)]
pub struct ShmVec<T> {
    offset: u64,
    len: u32,
    capacity: u32,
    _marker: PhantomData<T>,
}

// manual impls: derived Clone/Copy would demand T: Copy on the struct
// itself, and the offset representation is copyable regardless
impl<T> Clone for ShmVec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ShmVec<T> {}

impl<T: Copy> ShmVec<T> {
    pub fn new() -> Self {
        Self {
            offset: 0,
            len: 0,
            capacity: 0,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, segment: &ShmSegment, value: T) -> Result<(), SegmentError> {
        if self.len == self.capacity {
            self.grow(segment)?;
        }
        // SAFETY: the block at self.offset was allocated for capacity
        // elements of T and len < capacity after grow.
        unsafe {
            segment
                .at::<T>(self.offset)
                .add(self.len as usize)
                .write(value);
        }
        self.len += 1;
        Ok(())
    }

    fn grow(&mut self, segment: &ShmSegment) -> Result<(), SegmentError> {
        let new_capacity = (self.capacity * 2).max(4);
        let new_offset = segment.alloc(size_of::<T>() * new_capacity as usize, align_of::<T>())?;
        if self.len > 0 {
            // SAFETY: source and destination are distinct allocations of
            // sufficient size.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    segment.at::<T>(self.offset) as *const T,
                    segment.at::<T>(new_offset),
                    self.len as usize,
                );
            }
        }
        self.offset = new_offset;
        self.capacity = new_capacity;
        Ok(())
    }

    /// Borrows the elements out of the segment.
    pub fn as_slice<'s>(&self, segment: &'s ShmSegment) -> &'s [T] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: offset/len describe a live allocation written by push.
        unsafe { std::slice::from_raw_parts(segment.at::<T>(self.offset), self.len as usize) }
    }
}

impl<T: Copy> Default for ShmVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable UTF-8 string stored in a segment.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ShmString {
    offset: u64,
    len: u32,
}

impl ShmString {
    pub fn from_str(segment: &ShmSegment, text: &str) -> Result<Self, SegmentError> {
        let offset = segment.alloc(text.len().max(1), 1)?;
        // SAFETY: freshly allocated block of at least text.len() bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(text.as_ptr(), segment.at::<u8>(offset), text.len());
        }
        Ok(Self {
            offset,
            len: text.len() as u32,
        })
    }

    pub fn as_str<'s>(&self, segment: &'s ShmSegment) -> &'s str {
        if self.len == 0 {
            return "";
        }
        // SAFETY: the bytes were copied from a &str and never mutated.
        unsafe {
            let bytes =
                std::slice::from_raw_parts(segment.at::<u8>(self.offset), self.len as usize);
            std::str::from_utf8_unchecked(bytes)
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
