// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Value enumerations shared across the wire protocol, the introspection
//! catalog, the frame ring, and the C ABI. All are `#[repr(i32)]` so they
//! can be stored in shared memory and crossed over the C boundary as plain
//! 32-bit integers.

use serde::{Deserialize, Serialize};

/// Status of a control-pipe call or API entry point.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PmStatus {
    Success,
    Failure,
    SessionNotOpen,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PmMetric {
    DisplayedFps,
    PresentedFps,
    FrameTime,
    GpuBusyTime,
    CpuBusyTime,
    CpuWaitTime,
    DisplayBusyTime,
    DroppedFrames,
    GpuPower,
    GpuFanSpeed,
    GpuFrequency,
    GpuTemperature,
    GpuUtilization,
    CpuUtilization,
    CpuPower,
    CpuFrequency,
    CpuTemperature,
    Application,
    RenderLatency,
    DisplayLatency,
    SyncInterval,
    PresentMode,
    AllowsTearing,
    GpuPsuPower,
    GpuPsuType,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmDeviceVendor {
    Intel,
    Nvidia,
    Amd,
    Unknown,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PmPresentMode {
    HardwareLegacyFlip,
    HardwareLegacyCopyToFrontBuffer,
    HardwareIndependentFlip,
    ComposedFlip,
    HardwareComposedIndependentFlip,
    ComposedCopyWithGpuGdi,
    ComposedCopyWithCpuGdi,
    #[default]
    Unknown,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PmPsuType {
    #[default]
    None,
    Pcie,
    SixPin,
    EightPin,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmUnit {
    Dimensionless,
    Boolean,
    Fps,
    Milliseconds,
    Percent,
    Watts,
    SyncInterval,
    Volts,
    Megahertz,
    Celsius,
    Rpm,
    Bps,
    Bytes,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PmStat {
    Avg,
    Percentile99,
    Percentile95,
    Percentile90,
    Max,
    Min,
    Raw,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmDataType {
    Double,
    Int32,
    Uint32,
    Enum,
    String,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmGraphicsRuntime {
    Unknown,
    Dxgi,
    D3d9,
}

/// Identifies one of the published enumerations inside the catalog.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmEnumId {
    Status,
    Metric,
    DeviceVendor,
    PresentMode,
    PsuType,
    Unit,
    Stat,
    DataType,
    GraphicsRuntime,
    DeviceType,
    MetricAvailability,
    MetricType,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmDeviceType {
    Independent,
    GraphicsAdapter,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmMetricAvailability {
    Available,
    Unavailable,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmMetricType {
    Dynamic,
    Static,
}

/// Final compositor state of a presented frame.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentResult {
    Presented,
    Dropped,
    Discarded,
}

/// Bit positions of the GPU telemetry capability set carried in each frame
/// record; a set bit means the corresponding sample is valid.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuTelemetryCapBits {
    GpuPower,
    GpuSustainedPowerLimit,
    GpuVoltage,
    GpuFrequency,
    GpuTemperature,
    GpuUtilization,
    FanSpeed0,
    FanSpeed1,
    FanSpeed2,
    FanSpeed3,
    FanSpeed4,
    GpuMemPower,
    GpuMemVoltage,
    GpuMemFrequency,
    GpuMemTemperature,
    PsuInfo0,
    PsuInfo1,
    PsuInfo2,
    PsuInfo3,
    PsuInfo4,
}

impl GpuTelemetryCapBits {
    pub const fn mask(self) -> u64 {
        1u64 << self as u32
    }
}

/// Bit positions of the CPU telemetry capability set.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuTelemetryCapBits {
    CpuUtilization,
    CpuPower,
    CpuTemperature,
    CpuFrequency,
}

impl CpuTelemetryCapBits {
    pub const fn mask(self) -> u64 {
        1u64 << self as u32
    }
}
