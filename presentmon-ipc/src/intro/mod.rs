// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The introspection catalog: a self-describing tree of metrics,
//! enumerations and devices that the service builds inside a shared-memory
//! segment and clients deep-clone into a single C-ABI heap block.
//!
//! Node types are plain data whose containers are offset-based
//! ([`ShmVec`]/[`ShmString`]), so the whole tree is position-independent.
//! The tree is a strict DAG: metrics reference enums and devices by id
//! only.

pub mod api;
mod clone;
mod populate;

pub use clone::{free_api_root, ApiAlloc, BlockAllocator, CloneError, ProbeAllocator};
pub use populate::populate;

use crate::shm::{SegmentError, ShmSegment, ShmString, ShmVec};
use crate::values::{
    PmDataType, PmDeviceType, PmDeviceVendor, PmEnumId, PmMetric, PmMetricAvailability,
    PmMetricType, PmStat, PmUnit,
};

#[repr(C)]
#[derive(Clone, Copy)]
pub struct IntrospectionEnumKey {
    pub enum_id: PmEnumId,
    pub value: i32,
    pub symbol: ShmString,
    pub name: ShmString,
    pub short_name: ShmString,
    pub description: ShmString,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct IntrospectionEnum {
    pub id: PmEnumId,
    pub symbol: ShmString,
    pub description: ShmString,
    pub keys: ShmVec<IntrospectionEnumKey>,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct IntrospectionDevice {
    pub id: u32,
    pub device_type: PmDeviceType,
    pub vendor: PmDeviceVendor,
    pub name: ShmString,
}

/// Availability and array size of one metric on one device. An array size
/// greater than one means the metric is indexed on that device.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct IntrospectionDeviceMetricInfo {
    pub device_id: u32,
    pub availability: PmMetricAvailability,
    pub array_size: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct IntrospectionDataTypeInfo {
    pub data_type: PmDataType,
    /// Which published enum interprets the value when `data_type` is
    /// [`PmDataType::Enum`]; `PmEnumId::Status` otherwise (ignored).
    pub enum_id: PmEnumId,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct IntrospectionStatInfo {
    pub stat: PmStat,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct IntrospectionMetric {
    pub id: PmMetric,
    pub metric_type: PmMetricType,
    pub unit: PmUnit,
    pub type_info: IntrospectionDataTypeInfo,
    pub stats: ShmVec<IntrospectionStatInfo>,
    pub device_infos: ShmVec<IntrospectionDeviceMetricInfo>,
}

impl IntrospectionMetric {
    /// Device-metric info for `device_id`, if the metric knows the device.
    pub fn device_info<'s>(
        &self,
        segment: &'s ShmSegment,
        device_id: u32,
    ) -> Option<&'s IntrospectionDeviceMetricInfo> {
        self.device_infos
            .as_slice(segment)
            .iter()
            .find(|info| info.device_id == device_id)
    }
}

/// Root of the catalog; owns the three ordered sequences.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct IntrospectionRoot {
    pub metrics: ShmVec<IntrospectionMetric>,
    pub enums: ShmVec<IntrospectionEnum>,
    pub devices: ShmVec<IntrospectionDevice>,
}

impl IntrospectionRoot {
    pub fn new() -> Self {
        Self {
            metrics: ShmVec::new(),
            enums: ShmVec::new(),
            devices: ShmVec::new(),
        }
    }

    pub fn add_metric(
        &mut self,
        segment: &ShmSegment,
        metric: IntrospectionMetric,
    ) -> Result<(), SegmentError> {
        self.metrics.push(segment, metric)
    }

    pub fn add_enum(
        &mut self,
        segment: &ShmSegment,
        introspection_enum: IntrospectionEnum,
    ) -> Result<(), SegmentError> {
        self.enums.push(segment, introspection_enum)
    }

    pub fn add_device(
        &mut self,
        segment: &ShmSegment,
        device: IntrospectionDevice,
    ) -> Result<(), SegmentError> {
        self.devices.push(segment, device)
    }

    pub fn find_metric<'s>(
        &self,
        segment: &'s ShmSegment,
        id: PmMetric,
    ) -> Option<&'s IntrospectionMetric> {
        self.metrics
            .as_slice(segment)
            .iter()
            .find(|metric| metric.id == id)
    }

    pub fn find_enum<'s>(
        &self,
        segment: &'s ShmSegment,
        id: PmEnumId,
    ) -> Option<&'s IntrospectionEnum> {
        self.enums
            .as_slice(segment)
            .iter()
            .find(|introspection_enum| introspection_enum.id == id)
    }

    pub fn find_device<'s>(
        &self,
        segment: &'s ShmSegment,
        id: u32,
    ) -> Option<&'s IntrospectionDevice> {
        self.devices
            .as_slice(segment)
            .iter()
            .find(|device| device.id == id)
    }
}

impl Default for IntrospectionRoot {
    fn default() -> Self {
        Self::new()
    }
}
