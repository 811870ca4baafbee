// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! C-ABI mirror of the introspection tree, matching the published
//! `PresentMonAPI` header. Struct and field names follow the C header
//! rather than Rust conventions so the two stay diffable.
//!
//! Instances are only ever produced by the deep clone in [`super::clone`],
//! live inside a single contiguous heap block, and are freed by freeing
//! the root pointer.

#![allow(non_camel_case_types, non_snake_case)]

use std::ffi::c_void;
use std::os::raw::c_char;

use crate::values::{
    PmDataType, PmDeviceType, PmDeviceVendor, PmEnumId, PmMetric, PmMetricAvailability,
    PmMetricType, PmStat, PmUnit,
};

/// NUL-terminated string owned by the clone block.
#[repr(C)]
pub struct PM_INTROSPECTION_STRING {
    pub pData: *const c_char,
}

/// Array of pointers to cloned child objects.
#[repr(C)]
pub struct PM_INTROSPECTION_OBJARRAY {
    pub pData: *const *const c_void,
    pub size: usize,
}

#[repr(C)]
pub struct PM_INTROSPECTION_ENUM_KEY {
    pub enumId: PmEnumId,
    pub value: i32,
    pub pSymbol: *const PM_INTROSPECTION_STRING,
    pub pName: *const PM_INTROSPECTION_STRING,
    pub pShortName: *const PM_INTROSPECTION_STRING,
    pub pDescription: *const PM_INTROSPECTION_STRING,
}

#[repr(C)]
pub struct PM_INTROSPECTION_ENUM {
    pub id: PmEnumId,
    pub pSymbol: *const PM_INTROSPECTION_STRING,
    pub pDescription: *const PM_INTROSPECTION_STRING,
    pub pKeys: *const PM_INTROSPECTION_OBJARRAY,
}

#[repr(C)]
pub struct PM_INTROSPECTION_DEVICE {
    pub id: u32,
    pub r#type: PmDeviceType,
    pub vendor: PmDeviceVendor,
    pub pName: *const PM_INTROSPECTION_STRING,
}

#[repr(C)]
pub struct PM_INTROSPECTION_DEVICE_METRIC_INFO {
    pub deviceId: u32,
    pub availability: PmMetricAvailability,
    pub arraySize: u32,
}

#[repr(C)]
pub struct PM_INTROSPECTION_DATA_TYPE_INFO {
    pub r#type: PmDataType,
    pub enumId: PmEnumId,
}

#[repr(C)]
pub struct PM_INTROSPECTION_STAT_INFO {
    pub stat: PmStat,
}

#[repr(C)]
pub struct PM_INTROSPECTION_METRIC {
    pub id: PmMetric,
    pub r#type: PmMetricType,
    pub unit: PmUnit,
    pub pTypeInfo: *const PM_INTROSPECTION_DATA_TYPE_INFO,
    pub pStatInfo: *const PM_INTROSPECTION_OBJARRAY,
    pub pDeviceMetricInfo: *const PM_INTROSPECTION_OBJARRAY,
}

#[repr(C)]
pub struct PM_INTROSPECTION_ROOT {
    pub pMetrics: *const PM_INTROSPECTION_OBJARRAY,
    pub pEnums: *const PM_INTROSPECTION_OBJARRAY,
    pub pDevices: *const PM_INTROSPECTION_OBJARRAY,
}
