// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Two-pass deep clone of the introspection tree into a single heap block.
//!
//! The probe pass walks the tree with an allocator that only accumulates
//! aligned sizes and hands back null pointers; nothing is written. The
//! block pass repeats the identical walk with a bump allocator over one
//! `malloc` block, constructing the C-ABI structs and patching their child
//! pointers. Because both passes traverse the same code path, the block is
//! exactly as large as the probe said, and the root struct is the first
//! allocation, so freeing the root pointer frees the whole clone.

use std::ffi::c_void;
use std::mem::{align_of, size_of};
use std::os::raw::c_char;

use super::api::*;
use super::{
    IntrospectionDevice, IntrospectionDeviceMetricInfo, IntrospectionEnum, IntrospectionEnumKey,
    IntrospectionMetric, IntrospectionRoot, IntrospectionStatInfo,
};
use crate::shm::{ShmSegment, ShmString};

#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("failed to allocate {0} byte block for introspection clone")]
    BlockAllocation(usize),
}

/// Allocator contract shared by the probe and block passes. Returns null
/// when probing; clone code must tolerate null and skip its writes.
pub trait ApiAlloc {
    fn alloc(&mut self, size: usize, align: usize) -> *mut u8;
}

/// Accumulates the aligned byte total without touching memory.
#[derive(Default)]
pub struct ProbeAllocator {
    total: usize,
}

impl ProbeAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_size(&self) -> usize {
        self.total
    }
}

impl ApiAlloc for ProbeAllocator {
    fn alloc(&mut self, size: usize, align: usize) -> *mut u8 {
        self.total = align_up(self.total, align) + size;
        std::ptr::null_mut()
    }
}

/// Bump allocator over a single heap block sized by a probe pass.
pub struct BlockAllocator {
    base: *mut u8,
    capacity: usize,
    cursor: usize,
}

impl BlockAllocator {
    pub fn new(capacity: usize) -> Result<Self, CloneError> {
        // SAFETY: plain allocation; freed wholesale by the API consumer
        // via the root pointer.
        let base = unsafe { libc::malloc(capacity.max(1)) } as *mut u8;
        if base.is_null() {
            return Err(CloneError::BlockAllocation(capacity));
        }
        Ok(Self {
            base,
            capacity,
            cursor: 0,
        })
    }

    /// Bytes handed out so far; equals the probe total after a full clone.
    pub fn used(&self) -> usize {
        self.cursor
    }

    pub fn base_ptr(&self) -> *mut u8 {
        self.base
    }
}

impl ApiAlloc for BlockAllocator {
    fn alloc(&mut self, size: usize, align: usize) -> *mut u8 {
        let offset = align_up(self.cursor, align);
        let end = offset + size;
        debug_assert!(end <= self.capacity, "clone outgrew its probe");
        if end > self.capacity {
            return std::ptr::null_mut();
        }
        self.cursor = end;
        // SAFETY: offset stays within the malloc'd block.
        unsafe { self.base.add(offset) }
    }
}

fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

fn alloc_one<T>(alloc: &mut dyn ApiAlloc) -> *mut T {
    alloc.alloc(size_of::<T>(), align_of::<T>()) as *mut T
}

unsafe fn emplace<T>(slot: *mut T, value: T) {
    if !slot.is_null() {
        slot.write(value);
    }
}

fn clone_string(
    segment: &ShmSegment,
    string: &ShmString,
    alloc: &mut dyn ApiAlloc,
) -> *mut PM_INTROSPECTION_STRING {
    let this = alloc_one::<PM_INTROSPECTION_STRING>(alloc);
    let text = string.as_str(segment);
    let buffer = alloc.alloc(text.len() + 1, 1);
    if !buffer.is_null() {
        // SAFETY: buffer has room for the text plus the terminator.
        unsafe {
            std::ptr::copy_nonoverlapping(text.as_ptr(), buffer, text.len());
            buffer.add(text.len()).write(0);
        }
    }
    unsafe {
        emplace(
            this,
            PM_INTROSPECTION_STRING {
                pData: buffer as *const c_char,
            },
        )
    };
    this
}

fn clone_obj_array<T>(
    segment: &ShmSegment,
    items: &[T],
    alloc: &mut dyn ApiAlloc,
    mut clone_item: impl FnMut(&T, &ShmSegment, &mut dyn ApiAlloc) -> *const c_void,
) -> *mut PM_INTROSPECTION_OBJARRAY {
    let this = alloc_one::<PM_INTROSPECTION_OBJARRAY>(alloc);
    let data = alloc.alloc(
        size_of::<*const c_void>() * items.len(),
        align_of::<*const c_void>(),
    ) as *mut *const c_void;
    for (index, item) in items.iter().enumerate() {
        let element = clone_item(item, segment, alloc);
        if !data.is_null() {
            // SAFETY: data holds items.len() pointer slots.
            unsafe { data.add(index).write(element) };
        }
    }
    unsafe {
        emplace(
            this,
            PM_INTROSPECTION_OBJARRAY {
                pData: data,
                size: items.len(),
            },
        )
    };
    this
}

impl IntrospectionEnumKey {
    fn api_clone(
        &self,
        segment: &ShmSegment,
        alloc: &mut dyn ApiAlloc,
    ) -> *mut PM_INTROSPECTION_ENUM_KEY {
        let this = alloc_one::<PM_INTROSPECTION_ENUM_KEY>(alloc);
        let content = PM_INTROSPECTION_ENUM_KEY {
            enumId: self.enum_id,
            value: self.value,
            pSymbol: clone_string(segment, &self.symbol, alloc),
            pName: clone_string(segment, &self.name, alloc),
            pShortName: clone_string(segment, &self.short_name, alloc),
            pDescription: clone_string(segment, &self.description, alloc),
        };
        unsafe { emplace(this, content) };
        this
    }
}

impl IntrospectionEnum {
    fn api_clone(
        &self,
        segment: &ShmSegment,
        alloc: &mut dyn ApiAlloc,
    ) -> *mut PM_INTROSPECTION_ENUM {
        let this = alloc_one::<PM_INTROSPECTION_ENUM>(alloc);
        let content = PM_INTROSPECTION_ENUM {
            id: self.id,
            pSymbol: clone_string(segment, &self.symbol, alloc),
            pDescription: clone_string(segment, &self.description, alloc),
            pKeys: clone_obj_array(segment, self.keys.as_slice(segment), alloc, |key, s, a| {
                key.api_clone(s, a) as *const c_void
            }),
        };
        unsafe { emplace(this, content) };
        this
    }
}

impl IntrospectionDevice {
    fn api_clone(
        &self,
        segment: &ShmSegment,
        alloc: &mut dyn ApiAlloc,
    ) -> *mut PM_INTROSPECTION_DEVICE {
        let this = alloc_one::<PM_INTROSPECTION_DEVICE>(alloc);
        let content = PM_INTROSPECTION_DEVICE {
            id: self.id,
            r#type: self.device_type,
            vendor: self.vendor,
            pName: clone_string(segment, &self.name, alloc),
        };
        unsafe { emplace(this, content) };
        this
    }
}

impl IntrospectionMetric {
    fn api_clone(
        &self,
        segment: &ShmSegment,
        alloc: &mut dyn ApiAlloc,
    ) -> *mut PM_INTROSPECTION_METRIC {
        let this = alloc_one::<PM_INTROSPECTION_METRIC>(alloc);
        let type_info = alloc_one::<PM_INTROSPECTION_DATA_TYPE_INFO>(alloc);
        unsafe {
            emplace(
                type_info,
                PM_INTROSPECTION_DATA_TYPE_INFO {
                    r#type: self.type_info.data_type,
                    enumId: self.type_info.enum_id,
                },
            )
        };
        let content = PM_INTROSPECTION_METRIC {
            id: self.id,
            r#type: self.metric_type,
            unit: self.unit,
            pTypeInfo: type_info,
            pStatInfo: clone_obj_array(
                segment,
                self.stats.as_slice(segment),
                alloc,
                |stat: &IntrospectionStatInfo, _s, a| {
                    let slot = alloc_one::<PM_INTROSPECTION_STAT_INFO>(a);
                    unsafe { emplace(slot, PM_INTROSPECTION_STAT_INFO { stat: stat.stat }) };
                    slot as *const c_void
                },
            ),
            pDeviceMetricInfo: clone_obj_array(
                segment,
                self.device_infos.as_slice(segment),
                alloc,
                |info: &IntrospectionDeviceMetricInfo, _s, a| {
                    let slot = alloc_one::<PM_INTROSPECTION_DEVICE_METRIC_INFO>(a);
                    unsafe {
                        emplace(
                            slot,
                            PM_INTROSPECTION_DEVICE_METRIC_INFO {
                                deviceId: info.device_id,
                                availability: info.availability,
                                arraySize: info.array_size,
                            },
                        )
                    };
                    slot as *const c_void
                },
            ),
        };
        unsafe { emplace(this, content) };
        this
    }
}

impl IntrospectionRoot {
    /// Clones the tree through `alloc`. The root struct is the first
    /// allocation, so under a [`BlockAllocator`] the returned pointer is
    /// the block base and frees the entire clone.
    pub fn api_clone(
        &self,
        segment: &ShmSegment,
        alloc: &mut dyn ApiAlloc,
    ) -> *mut PM_INTROSPECTION_ROOT {
        let this = alloc_one::<PM_INTROSPECTION_ROOT>(alloc);
        let content = PM_INTROSPECTION_ROOT {
            pMetrics: clone_obj_array(
                segment,
                self.metrics.as_slice(segment),
                alloc,
                |metric, s, a| metric.api_clone(s, a) as *const c_void,
            ),
            pEnums: clone_obj_array(segment, self.enums.as_slice(segment), alloc, |e, s, a| {
                e.api_clone(s, a) as *const c_void
            }),
            pDevices: clone_obj_array(
                segment,
                self.devices.as_slice(segment),
                alloc,
                |device, s, a| device.api_clone(s, a) as *const c_void,
            ),
        };
        unsafe { emplace(this, content) };
        this
    }
}

/// Frees a tree returned by a block-allocator clone.
///
/// # Safety
/// `root` must be the exact pointer returned by the clone and must not be
/// used afterwards.
pub unsafe fn free_api_root(root: *mut PM_INTROSPECTION_ROOT) {
    libc::free(root as *mut c_void);
}
