// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Service-side population of the introspection catalog.
//!
//! Everything queryable is declared here: the value enumerations with their
//! keys, the devices, and the metrics with their statistics and per-device
//! availability. Runs once per service lifetime, before the readiness
//! semaphore is posted.

use super::{
    IntrospectionDataTypeInfo, IntrospectionDevice, IntrospectionDeviceMetricInfo,
    IntrospectionEnum, IntrospectionEnumKey, IntrospectionMetric, IntrospectionRoot,
    IntrospectionStatInfo,
};
use crate::shm::{SegmentError, ShmSegment, ShmString, ShmVec};
use crate::values::{
    PmDataType, PmDeviceType, PmDeviceVendor, PmEnumId, PmMetric, PmMetricAvailability,
    PmMetricType, PmStat, PmUnit,
};

/// Universal device id used by metrics that are not tied to an adapter.
pub const DEVICE_ID_UNIVERSAL: u32 = 0;
/// Device id of the primary graphics adapter.
pub const DEVICE_ID_GRAPHICS_ADAPTER: u32 = 1;

const ALL_STATS: &[PmStat] = &[
    PmStat::Avg,
    PmStat::Percentile99,
    PmStat::Percentile95,
    PmStat::Percentile90,
    PmStat::Max,
    PmStat::Min,
    PmStat::Raw,
];

/// (value, symbol, name, short name, description)
type KeySpec = (i32, &'static str, &'static str, &'static str, &'static str);

pub fn populate(segment: &ShmSegment, root: &mut IntrospectionRoot) -> Result<(), SegmentError> {
    populate_enums(segment, root)?;
    populate_devices(segment, root)?;
    populate_metrics(segment, root)?;
    Ok(())
}

fn add_enum(
    segment: &ShmSegment,
    root: &mut IntrospectionRoot,
    id: PmEnumId,
    symbol: &str,
    description: &str,
    keys: &[KeySpec],
) -> Result<(), SegmentError> {
    let mut key_vec = ShmVec::new();
    for &(value, key_symbol, name, short_name, key_description) in keys {
        key_vec.push(
            segment,
            IntrospectionEnumKey {
                enum_id: id,
                value,
                symbol: ShmString::from_str(segment, key_symbol)?,
                name: ShmString::from_str(segment, name)?,
                short_name: ShmString::from_str(segment, short_name)?,
                description: ShmString::from_str(segment, key_description)?,
            },
        )?;
    }
    root.add_enum(
        segment,
        IntrospectionEnum {
            id,
            symbol: ShmString::from_str(segment, symbol)?,
            description: ShmString::from_str(segment, description)?,
            keys: key_vec,
        },
    )
}

fn populate_enums(segment: &ShmSegment, root: &mut IntrospectionRoot) -> Result<(), SegmentError> {
    add_enum(
        segment,
        root,
        PmEnumId::Status,
        "PM_STATUS",
        "Result of an API call or control-pipe request",
        &[
            (0, "PM_STATUS_SUCCESS", "Success", "OK", "Operation succeeded"),
            (1, "PM_STATUS_FAILURE", "Failure", "Fail", "Operation failed"),
            (
                2,
                "PM_STATUS_SESSION_NOT_OPEN",
                "Session Not Open",
                "NoSes",
                "Entry point used before opening a session",
            ),
        ],
    )?;
    add_enum(
        segment,
        root,
        PmEnumId::Metric,
        "PM_METRIC",
        "Metrics queryable through dynamic queries",
        &[
            (0, "PM_METRIC_DISPLAYED_FPS", "Displayed FPS", "DFPS", "Rate of frame changes visible on screen"),
            (1, "PM_METRIC_PRESENTED_FPS", "Presented FPS", "PFPS", "Rate of application present calls"),
            (2, "PM_METRIC_FRAME_TIME", "Frame Time", "FT", "Time between application presents"),
            (3, "PM_METRIC_GPU_BUSY_TIME", "GPU Busy Time", "GPUB", "Time the GPU spent working on a frame"),
            (4, "PM_METRIC_CPU_BUSY_TIME", "CPU Busy Time", "CPUB", "Time the CPU spent preparing a frame"),
            (5, "PM_METRIC_CPU_WAIT_TIME", "CPU Wait Time", "CPUW", "Time the CPU spent blocked in present"),
            (6, "PM_METRIC_DISPLAY_BUSY_TIME", "Display Busy Time", "DSPB", "Time between successive screen updates"),
            (7, "PM_METRIC_DROPPED_FRAMES", "Dropped Frames", "Drop", "Fraction of frames never displayed"),
            (8, "PM_METRIC_GPU_POWER", "GPU Power", "GPWR", "Power draw of the graphics adapter"),
            (9, "PM_METRIC_GPU_FAN_SPEED", "GPU Fan Speed", "GFAN", "Fan speed of the graphics adapter, per fan"),
            (10, "PM_METRIC_GPU_FREQUENCY", "GPU Frequency", "GFRQ", "Clock speed of the graphics adapter"),
            (11, "PM_METRIC_GPU_TEMPERATURE", "GPU Temperature", "GTMP", "Temperature of the graphics adapter"),
            (12, "PM_METRIC_GPU_UTILIZATION", "GPU Utilization", "GUTL", "Busy fraction of the graphics adapter"),
            (13, "PM_METRIC_CPU_UTILIZATION", "CPU Utilization", "CUTL", "Busy fraction of the CPU"),
            (14, "PM_METRIC_CPU_POWER", "CPU Power", "CPWR", "Power draw of the CPU"),
            (15, "PM_METRIC_CPU_FREQUENCY", "CPU Frequency", "CFRQ", "Clock speed of the CPU"),
            (16, "PM_METRIC_CPU_TEMPERATURE", "CPU Temperature", "CTMP", "Temperature of the CPU"),
            (17, "PM_METRIC_APPLICATION", "Application", "App", "Name of the tracked executable"),
            (18, "PM_METRIC_RENDER_LATENCY", "Render Latency", "RLat", "Time from present stop to screen arrival"),
            (19, "PM_METRIC_DISPLAY_LATENCY", "Display Latency", "DLat", "Time from present start to screen arrival"),
            (20, "PM_METRIC_SYNC_INTERVAL", "Sync Interval", "SI", "Vertical sync interval of the latest present"),
            (21, "PM_METRIC_PRESENT_MODE", "Present Mode", "PMode", "Present mode of the latest present"),
            (22, "PM_METRIC_ALLOWS_TEARING", "Allows Tearing", "Tear", "Whether the latest present allowed tearing"),
            (23, "PM_METRIC_GPU_PSU_POWER", "GPU PSU Power", "PSUW", "Power draw of the adapter's supply inputs, per input"),
            (24, "PM_METRIC_GPU_PSU_TYPE", "GPU PSU Type", "PSUT", "Connector type of the adapter's supply inputs, per input"),
        ],
    )?;
    add_enum(
        segment,
        root,
        PmEnumId::DeviceVendor,
        "PM_DEVICE_VENDOR",
        "Hardware vendor of a device",
        &[
            (0, "PM_DEVICE_VENDOR_INTEL", "Intel", "INTC", "Intel Corporation"),
            (1, "PM_DEVICE_VENDOR_NVIDIA", "NVIDIA", "NVDA", "NVIDIA Corporation"),
            (2, "PM_DEVICE_VENDOR_AMD", "AMD", "AMD", "Advanced Micro Devices"),
            (3, "PM_DEVICE_VENDOR_UNKNOWN", "Unknown", "Unk", "Vendor not recognized"),
        ],
    )?;
    add_enum(
        segment,
        root,
        PmEnumId::PresentMode,
        "PM_PRESENT_MODE",
        "Method used to present a frame",
        &[
            (0, "PM_PRESENT_MODE_HARDWARE_LEGACY_FLIP", "Hardware: Legacy Flip", "HLF", "Legacy hardware flip"),
            (1, "PM_PRESENT_MODE_HARDWARE_LEGACY_COPY_TO_FRONT_BUFFER", "Hardware: Legacy Copy to Front Buffer", "HLC", "Legacy copy to the front buffer"),
            (2, "PM_PRESENT_MODE_HARDWARE_INDEPENDENT_FLIP", "Hardware: Independent Flip", "HIF", "Independent hardware flip"),
            (3, "PM_PRESENT_MODE_COMPOSED_FLIP", "Composed: Flip", "CF", "Flip through the compositor"),
            (4, "PM_PRESENT_MODE_HARDWARE_COMPOSED_INDEPENDENT_FLIP", "Hardware Composed: Independent Flip", "HCIF", "Hardware-composed independent flip"),
            (5, "PM_PRESENT_MODE_COMPOSED_COPY_WITH_GPU_GDI", "Composed: Copy with GPU GDI", "CCGG", "Composed copy using GPU GDI"),
            (6, "PM_PRESENT_MODE_COMPOSED_COPY_WITH_CPU_GDI", "Composed: Copy with CPU GDI", "CCCG", "Composed copy using CPU GDI"),
            (7, "PM_PRESENT_MODE_UNKNOWN", "Unknown", "Unk", "Present mode not recognized"),
        ],
    )?;
    add_enum(
        segment,
        root,
        PmEnumId::PsuType,
        "PM_PSU_TYPE",
        "Power supply connector type",
        &[
            (0, "PM_PSU_TYPE_NONE", "None", "None", "No power supply input"),
            (1, "PM_PSU_TYPE_PCIE", "PCIe", "PCIe", "PCIe slot power"),
            (2, "PM_PSU_TYPE_6PIN", "6-pin", "6pin", "Six-pin auxiliary connector"),
            (3, "PM_PSU_TYPE_8PIN", "8-pin", "8pin", "Eight-pin auxiliary connector"),
        ],
    )?;
    add_enum(
        segment,
        root,
        PmEnumId::Unit,
        "PM_UNIT",
        "Unit of a metric value",
        &[
            (0, "PM_UNIT_DIMENSIONLESS", "Dimensionless", "", "No unit"),
            (1, "PM_UNIT_BOOLEAN", "Boolean", "bool", "True or false"),
            (2, "PM_UNIT_FPS", "Frames Per Second", "fps", "Frames per second"),
            (3, "PM_UNIT_MILLISECONDS", "Milliseconds", "ms", "Thousandths of a second"),
            (4, "PM_UNIT_PERCENT", "Percent", "%", "Fraction out of one hundred"),
            (5, "PM_UNIT_WATTS", "Watts", "W", "Joules per second"),
            (6, "PM_UNIT_SYNC_INTERVAL", "Sync Interval", "vsync", "Count of vertical sync intervals"),
            (7, "PM_UNIT_VOLTS", "Volts", "V", "Electrical potential"),
            (8, "PM_UNIT_MEGAHERTZ", "Megahertz", "MHz", "Millions of cycles per second"),
            (9, "PM_UNIT_CELSIUS", "Degrees Celsius", "C", "Temperature in Celsius"),
            (10, "PM_UNIT_RPM", "Revolutions per Minute", "RPM", "Rotational speed"),
            (11, "PM_UNIT_BPS", "Bits per Second", "bps", "Data rate"),
            (12, "PM_UNIT_BYTES", "Bytes", "B", "Quantity of binary data"),
        ],
    )?;
    add_enum(
        segment,
        root,
        PmEnumId::Stat,
        "PM_STAT",
        "Statistic computed over a query window",
        &[
            (0, "PM_STAT_AVG", "Average", "avg", "Arithmetic mean"),
            (1, "PM_STAT_PERCENTILE_99", "99th Percentile", "p99", "Value at the 99th percentile"),
            (2, "PM_STAT_PERCENTILE_95", "95th Percentile", "p95", "Value at the 95th percentile"),
            (3, "PM_STAT_PERCENTILE_90", "90th Percentile", "p90", "Value at the 90th percentile"),
            (4, "PM_STAT_MAX", "Maximum", "max", "Largest value"),
            (5, "PM_STAT_MIN", "Minimum", "min", "Smallest value"),
            (6, "PM_STAT_RAW", "Raw", "raw", "Most recent value"),
        ],
    )?;
    add_enum(
        segment,
        root,
        PmEnumId::DataType,
        "PM_DATA_TYPE",
        "Wire type of a metric value",
        &[
            (0, "PM_DATA_TYPE_DOUBLE", "Double", "dbl", "64-bit floating point"),
            (1, "PM_DATA_TYPE_INT32", "Int32", "i32", "Signed 32-bit integer"),
            (2, "PM_DATA_TYPE_UINT32", "Uint32", "u32", "Unsigned 32-bit integer"),
            (3, "PM_DATA_TYPE_ENUM", "Enum", "enum", "Value of a published enumeration"),
            (4, "PM_DATA_TYPE_STRING", "String", "str", "NUL-terminated text"),
        ],
    )?;
    add_enum(
        segment,
        root,
        PmEnumId::GraphicsRuntime,
        "PM_GRAPHICS_RUNTIME",
        "Graphics runtime used by the presenting process",
        &[
            (0, "PM_GRAPHICS_RUNTIME_UNKNOWN", "Unknown", "Unk", "Runtime not recognized"),
            (1, "PM_GRAPHICS_RUNTIME_DXGI", "DXGI", "DXGI", "DirectX Graphics Infrastructure"),
            (2, "PM_GRAPHICS_RUNTIME_D3D9", "Direct3D 9", "D3D9", "Legacy Direct3D 9 runtime"),
        ],
    )?;
    add_enum(
        segment,
        root,
        PmEnumId::DeviceType,
        "PM_DEVICE_TYPE",
        "Kind of device a metric is reported for",
        &[
            (0, "PM_DEVICE_TYPE_INDEPENDENT", "Device Independent", "Ind", "Not tied to any adapter"),
            (1, "PM_DEVICE_TYPE_GRAPHICS_ADAPTER", "Graphics Adapter", "GPU", "A graphics adapter"),
        ],
    )?;
    add_enum(
        segment,
        root,
        PmEnumId::MetricAvailability,
        "PM_METRIC_AVAILABILITY",
        "Whether a metric is available on a device",
        &[
            (0, "PM_METRIC_AVAILABILITY_AVAILABLE", "Available", "Avail", "Metric is reported"),
            (1, "PM_METRIC_AVAILABILITY_UNAVAILABLE", "Unavailable", "Unavail", "Metric is not reported"),
        ],
    )?;
    add_enum(
        segment,
        root,
        PmEnumId::MetricType,
        "PM_METRIC_TYPE",
        "Temporal behavior of a metric",
        &[
            (0, "PM_METRIC_TYPE_DYNAMIC", "Dynamic", "Dyn", "Computed over a sliding window of frames"),
            (1, "PM_METRIC_TYPE_STATIC", "Static", "Stat", "Fixed property of the system"),
        ],
    )?;
    Ok(())
}

fn populate_devices(
    segment: &ShmSegment,
    root: &mut IntrospectionRoot,
) -> Result<(), SegmentError> {
    root.add_device(
        segment,
        IntrospectionDevice {
            id: DEVICE_ID_UNIVERSAL,
            device_type: PmDeviceType::Independent,
            vendor: PmDeviceVendor::Unknown,
            name: ShmString::from_str(segment, "Device-independent")?,
        },
    )?;
    root.add_device(
        segment,
        IntrospectionDevice {
            id: DEVICE_ID_GRAPHICS_ADAPTER,
            device_type: PmDeviceType::GraphicsAdapter,
            vendor: PmDeviceVendor::Intel,
            name: ShmString::from_str(segment, "Arc A770")?,
        },
    )?;
    Ok(())
}

struct MetricSpec {
    id: PmMetric,
    metric_type: PmMetricType,
    unit: PmUnit,
    data_type: PmDataType,
    /// Interpreting enum for [`PmDataType::Enum`] values; ignored otherwise.
    enum_id: PmEnumId,
    stats: &'static [PmStat],
    /// (device id, availability, array size)
    devices: &'static [(u32, PmMetricAvailability, u32)],
}

const UNIVERSAL: &[(u32, PmMetricAvailability, u32)] =
    &[(DEVICE_ID_UNIVERSAL, PmMetricAvailability::Available, 1)];
const ADAPTER: &[(u32, PmMetricAvailability, u32)] = &[(
    DEVICE_ID_GRAPHICS_ADAPTER,
    PmMetricAvailability::Available,
    1,
)];
const ADAPTER_FANS: &[(u32, PmMetricAvailability, u32)] = &[(
    DEVICE_ID_GRAPHICS_ADAPTER,
    PmMetricAvailability::Available,
    5,
)];
const ADAPTER_PSUS: &[(u32, PmMetricAvailability, u32)] = &[(
    DEVICE_ID_GRAPHICS_ADAPTER,
    PmMetricAvailability::Available,
    5,
)];

fn populate_metrics(
    segment: &ShmSegment,
    root: &mut IntrospectionRoot,
) -> Result<(), SegmentError> {
    use PmDataType::*;
    use PmMetric::*;
    use PmMetricType::*;
    use PmUnit::*;

    let dynamic = |id, unit, devices| MetricSpec {
        id,
        metric_type: Dynamic,
        unit,
        data_type: Double,
        enum_id: PmEnumId::Status,
        stats: ALL_STATS,
        devices,
    };
    let specs = [
        dynamic(DisplayedFps, Fps, UNIVERSAL),
        dynamic(PresentedFps, Fps, UNIVERSAL),
        dynamic(FrameTime, Milliseconds, UNIVERSAL),
        dynamic(GpuBusyTime, Milliseconds, ADAPTER),
        dynamic(CpuBusyTime, Milliseconds, UNIVERSAL),
        dynamic(CpuWaitTime, Milliseconds, UNIVERSAL),
        dynamic(DisplayBusyTime, Milliseconds, UNIVERSAL),
        dynamic(DroppedFrames, Dimensionless, UNIVERSAL),
        dynamic(GpuPower, Watts, ADAPTER),
        dynamic(GpuFanSpeed, Rpm, ADAPTER_FANS),
        dynamic(GpuFrequency, Megahertz, ADAPTER),
        dynamic(GpuTemperature, Celsius, ADAPTER),
        dynamic(GpuUtilization, Percent, ADAPTER),
        dynamic(CpuUtilization, Percent, UNIVERSAL),
        dynamic(CpuPower, Watts, UNIVERSAL),
        dynamic(CpuFrequency, Megahertz, UNIVERSAL),
        dynamic(CpuTemperature, Celsius, UNIVERSAL),
        dynamic(RenderLatency, Milliseconds, UNIVERSAL),
        dynamic(DisplayLatency, Milliseconds, UNIVERSAL),
        MetricSpec {
            id: Application,
            metric_type: Static,
            unit: Dimensionless,
            data_type: String,
            enum_id: PmEnumId::Status,
            stats: &[PmStat::Raw],
            devices: UNIVERSAL,
        },
        MetricSpec {
            id: PmMetric::SyncInterval,
            metric_type: Dynamic,
            unit: PmUnit::SyncInterval,
            data_type: Int32,
            enum_id: PmEnumId::Status,
            stats: &[PmStat::Raw],
            devices: UNIVERSAL,
        },
        MetricSpec {
            id: PmMetric::PresentMode,
            metric_type: Dynamic,
            unit: Dimensionless,
            data_type: Enum,
            enum_id: PmEnumId::PresentMode,
            stats: &[PmStat::Raw],
            devices: UNIVERSAL,
        },
        MetricSpec {
            id: PmMetric::AllowsTearing,
            metric_type: Dynamic,
            unit: Boolean,
            data_type: Uint32,
            enum_id: PmEnumId::Status,
            stats: &[PmStat::Raw],
            devices: UNIVERSAL,
        },
        dynamic(GpuPsuPower, Watts, ADAPTER_PSUS),
        MetricSpec {
            id: PmMetric::GpuPsuType,
            metric_type: Dynamic,
            unit: Dimensionless,
            data_type: Enum,
            enum_id: PmEnumId::PsuType,
            stats: &[PmStat::Raw],
            devices: ADAPTER_PSUS,
        },
    ];

    for spec in specs {
        let mut stats = ShmVec::new();
        for &stat in spec.stats {
            stats.push(segment, IntrospectionStatInfo { stat })?;
        }
        let mut device_infos = ShmVec::new();
        for &(device_id, availability, array_size) in spec.devices {
            device_infos.push(
                segment,
                IntrospectionDeviceMetricInfo {
                    device_id,
                    availability,
                    array_size,
                },
            )?;
        }
        root.add_metric(
            segment,
            IntrospectionMetric {
                id: spec.id,
                metric_type: spec.metric_type,
                unit: spec.unit,
                type_info: IntrospectionDataTypeInfo {
                    data_type: spec.data_type,
                    enum_id: PmEnumId::Status,
                },
                stats,
                device_infos,
            },
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn populated_segment(tag: &str) -> (ShmSegment, IntrospectionRoot) {
        let segment = ShmSegment::create(
            &format!("pm-test-{tag}-{}", std::process::id()),
            crate::gid::INTROSPECTION_SEGMENT_SIZE,
        )
        .unwrap();
        let mut root = IntrospectionRoot::new();
        populate(&segment, &mut root).unwrap();
        (segment, root)
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn metric_and_enum_ids_are_unique() {
        let (segment, root) = populated_segment("pop-unique");
        let metric_ids: HashSet<_> = root
            .metrics
            .as_slice(&segment)
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(metric_ids.len(), root.metrics.len());
        let enum_ids: HashSet<_> = root
            .enums
            .as_slice(&segment)
            .iter()
            .map(|e| e.id as i32)
            .collect();
        assert_eq!(enum_ids.len(), root.enums.len());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn metric_device_references_resolve() {
        let (segment, root) = populated_segment("pop-refs");
        for metric in root.metrics.as_slice(&segment) {
            for info in metric.device_infos.as_slice(&segment) {
                assert!(
                    root.find_device(&segment, info.device_id).is_some(),
                    "metric {:?} references unknown device {}",
                    metric.id,
                    info.device_id
                );
                assert!(info.array_size > 0);
            }
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn fan_speed_is_indexed() {
        let (segment, root) = populated_segment("pop-fan");
        let fan = root.find_metric(&segment, PmMetric::GpuFanSpeed).unwrap();
        let info = fan
            .device_info(&segment, DEVICE_ID_GRAPHICS_ADAPTER)
            .unwrap();
        assert_eq!(info.array_size, 5);
    }
}
