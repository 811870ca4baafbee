// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Dynamic query registration and polling.
//!
//! A registered query is immutable apart from its clock-delta companion:
//! polling re-anchors the producer-vs-consumer tick delta whenever it
//! steps by more than [`FRAME_DELTA_STEP_THRESHOLD`], which absorbs clock
//! skew and producer stalls. Each poll walks the ring backward from the
//! latest record until the adjusted window is covered, derives per-frame
//! intervals grouped by swap chain, and writes one statistics blob row per
//! chain.

use std::collections::HashMap;

use presentmon_common::timing;
use presentmon_ipc::intro::{IntrospectionMetric, IntrospectionRoot};
use presentmon_ipc::ring::FrameRecord;
use presentmon_ipc::shm::ShmSegment;
use presentmon_ipc::values::{
    CpuTelemetryCapBits, GpuTelemetryCapBits, PmDataType, PmMetric, PmMetricAvailability,
    PmMetricType, PmPresentMode, PmStat, PresentResult,
};

use crate::stream::StreamClient;

/// Tick threshold past which a changed clock delta is adopted wholesale
/// instead of treated as jitter.
pub const FRAME_DELTA_STEP_THRESHOLD: u64 = 50_000_000;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("metric {0:?} is not in the introspection catalog")]
    UnknownMetric(PmMetric),
    #[error("static metric {0:?} in dynamic metric query specification")]
    StaticMetric(PmMetric),
    #[error("string-typed metric {0:?} cannot be queried dynamically")]
    StringMetric(PmMetric),
    #[error("metric {metric:?} is not available on device {device_id}")]
    DeviceUnavailable { metric: PmMetric, device_id: u32 },
    #[error("array index {index} out of range for metric {metric:?} (size {size})")]
    InvalidArrayIndex {
        metric: PmMetric,
        index: u32,
        size: u32,
    },
    #[error("output blob holds {actual} bytes but the query needs {needed}")]
    BlobTooSmall { needed: usize, actual: usize },
}

/// One (metric, statistic, device, array index) output slot. Byte offsets
/// are assigned packed in registration order; every numeric output is
/// eight bytes.
#[derive(Debug, Clone, Copy)]
pub struct QueryElement {
    pub metric: PmMetric,
    pub stat: PmStat,
    pub device_id: u32,
    pub array_index: u32,
    pub data_offset: u64,
    pub data_size: u64,
}

impl QueryElement {
    pub fn new(metric: PmMetric, stat: PmStat, device_id: u32, array_index: u32) -> Self {
        Self {
            metric,
            stat,
            device_id,
            array_index,
            data_offset: 0,
            data_size: 0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CompiledStats {
    pub calc_avg: bool,
    pub calc_percentile_99: bool,
    pub calc_percentile_95: bool,
    pub calc_percentile_90: bool,
    pub calc_max: bool,
    pub calc_min: bool,
    pub calc_raw: bool,
}

impl CompiledStats {
    fn set(&mut self, stat: PmStat) {
        match stat {
            PmStat::Avg => self.calc_avg = true,
            PmStat::Percentile99 => self.calc_percentile_99 = true,
            PmStat::Percentile95 => self.calc_percentile_95 = true,
            PmStat::Percentile90 => self.calc_percentile_90 = true,
            PmStat::Max => self.calc_max = true,
            PmStat::Min => self.calc_min = true,
            PmStat::Raw => self.calc_raw = true,
        }
    }
}

/// Registered dynamic query. Not concurrent-safe per handle: each poll
/// mutates the stored frame-data delta.
pub struct DynamicQuery {
    pub(crate) process_id: u32,
    pub(crate) window_size_ms: f64,
    pub(crate) metric_offset_ms: f64,
    pub(crate) elements: Vec<QueryElement>,
    pub(crate) compiled_metrics: HashMap<PmMetric, CompiledStats>,
    pub(crate) accum_fps_data: bool,
    pub(crate) accum_gpu_bits: u64,
    pub(crate) accum_cpu_bits: u64,
    pub(crate) frame_data_delta: u64,
}

impl DynamicQuery {
    /// Bytes of blob consumed per swap chain.
    pub fn blob_stride(&self) -> usize {
        self.elements
            .iter()
            .map(|element| (element.data_offset + element.data_size) as usize)
            .max()
            .unwrap_or(0)
    }

    pub fn elements(&self) -> &[QueryElement] {
        &self.elements
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Last observed producer-vs-consumer clock delta, in ticks.
    pub fn frame_data_delta(&self) -> u64 {
        self.frame_data_delta
    }

    /// Which statistics the query computes for `metric`.
    pub fn compiled_stats(&self, metric: PmMetric) -> Option<CompiledStats> {
        self.compiled_metrics.get(&metric).copied()
    }
}

/// Validates elements against the catalog and builds the query. Offsets
/// are written back into `elements` the way the C API reports them.
pub fn register_dynamic_query(
    segment: &ShmSegment,
    root: &IntrospectionRoot,
    elements: &mut [QueryElement],
    process_id: u32,
    window_size_ms: f64,
    metric_offset_ms: f64,
) -> Result<DynamicQuery, QueryError> {
    let mut compiled_metrics: HashMap<PmMetric, CompiledStats> = HashMap::new();
    let mut accum_fps_data = false;
    let mut accum_gpu_bits = 0u64;
    let mut accum_cpu_bits = 0u64;
    let mut offset = 0u64;

    for element in elements.iter_mut() {
        let metric: &IntrospectionMetric = root
            .find_metric(segment, element.metric)
            .ok_or(QueryError::UnknownMetric(element.metric))?;
        if metric.metric_type != PmMetricType::Dynamic {
            return Err(QueryError::StaticMetric(element.metric));
        }
        if metric.type_info.data_type == PmDataType::String {
            return Err(QueryError::StringMetric(element.metric));
        }
        let info = metric
            .device_info(segment, element.device_id)
            .filter(|info| info.availability == PmMetricAvailability::Available)
            .ok_or(QueryError::DeviceUnavailable {
                metric: element.metric,
                device_id: element.device_id,
            })?;
        if element.array_index >= info.array_size {
            return Err(QueryError::InvalidArrayIndex {
                metric: element.metric,
                index: element.array_index,
                size: info.array_size,
            });
        }

        match element.metric {
            PmMetric::PresentedFps
            | PmMetric::DisplayedFps
            | PmMetric::FrameTime
            | PmMetric::GpuBusyTime
            | PmMetric::CpuBusyTime
            | PmMetric::CpuWaitTime
            | PmMetric::DisplayBusyTime
            | PmMetric::DroppedFrames
            | PmMetric::RenderLatency
            | PmMetric::DisplayLatency => accum_fps_data = true,
            PmMetric::GpuPower => accum_gpu_bits |= GpuTelemetryCapBits::GpuPower.mask(),
            PmMetric::GpuFanSpeed => {
                let bit = match element.array_index {
                    0 => GpuTelemetryCapBits::FanSpeed0,
                    1 => GpuTelemetryCapBits::FanSpeed1,
                    2 => GpuTelemetryCapBits::FanSpeed2,
                    3 => GpuTelemetryCapBits::FanSpeed3,
                    4 => GpuTelemetryCapBits::FanSpeed4,
                    index => {
                        return Err(QueryError::InvalidArrayIndex {
                            metric: element.metric,
                            index,
                            size: 5,
                        })
                    }
                };
                accum_gpu_bits |= bit.mask();
            }
            PmMetric::GpuPsuPower | PmMetric::GpuPsuType => {
                let bit = match element.array_index {
                    0 => GpuTelemetryCapBits::PsuInfo0,
                    1 => GpuTelemetryCapBits::PsuInfo1,
                    2 => GpuTelemetryCapBits::PsuInfo2,
                    3 => GpuTelemetryCapBits::PsuInfo3,
                    4 => GpuTelemetryCapBits::PsuInfo4,
                    index => {
                        return Err(QueryError::InvalidArrayIndex {
                            metric: element.metric,
                            index,
                            size: 5,
                        })
                    }
                };
                accum_gpu_bits |= bit.mask();
            }
            PmMetric::GpuFrequency => accum_gpu_bits |= GpuTelemetryCapBits::GpuFrequency.mask(),
            PmMetric::GpuTemperature => {
                accum_gpu_bits |= GpuTelemetryCapBits::GpuTemperature.mask()
            }
            PmMetric::GpuUtilization => {
                accum_gpu_bits |= GpuTelemetryCapBits::GpuUtilization.mask()
            }
            PmMetric::CpuUtilization => accum_cpu_bits |= CpuTelemetryCapBits::CpuUtilization.mask(),
            PmMetric::CpuPower => accum_cpu_bits |= CpuTelemetryCapBits::CpuPower.mask(),
            PmMetric::CpuFrequency => accum_cpu_bits |= CpuTelemetryCapBits::CpuFrequency.mask(),
            PmMetric::CpuTemperature => {
                accum_cpu_bits |= CpuTelemetryCapBits::CpuTemperature.mask()
            }
            _ => {}
        }

        compiled_metrics
            .entry(element.metric)
            .or_default()
            .set(element.stat);

        element.data_offset = offset;
        element.data_size = 8;
        offset += element.data_size;
    }

    Ok(DynamicQuery {
        process_id,
        window_size_ms,
        metric_offset_ms,
        elements: elements.to_vec(),
        compiled_metrics,
        accum_fps_data,
        accum_gpu_bits,
        accum_cpu_bits,
        frame_data_delta: 0,
    })
}

/// Rolling per-swap-chain window accumulated during the backward walk.
/// The `*_0` fields track the most recently processed (i.e. oldest so far)
/// frame; derived intervals need the frame after it, which was processed
/// one step earlier.
#[derive(Default)]
struct SwapChainData {
    insertion_order: usize,

    displayed_fps: Vec<f64>,
    presented_fps: Vec<f64>,
    frame_times_ms: Vec<f64>,
    gpu_sum_ms: Vec<f64>,
    dropped: Vec<f64>,
    cpu_busy_ms: Vec<f64>,
    cpu_wait_ms: Vec<f64>,
    display_busy_ms: Vec<f64>,
    render_latency_ms: Vec<f64>,
    display_latency_ms: Vec<f64>,

    gpu_power_w: Vec<f64>,
    gpu_fan_rpm: [Vec<f64>; 5],
    gpu_psu_power_w: [Vec<f64>; 5],
    gpu_psu_type: [Vec<f64>; 5],
    gpu_frequency_mhz: Vec<f64>,
    gpu_temperature_c: Vec<f64>,
    gpu_utilization: Vec<f64>,
    cpu_utilization: Vec<f64>,
    cpu_power_w: Vec<f64>,
    cpu_frequency_mhz: Vec<f64>,
    cpu_temperature_c: Vec<f64>,

    present_start_0: u64,
    present_stop_0: u64,
    gpu_duration_0: u64,
    display_0_screen_time: u64,
    display_1_screen_time: u64,
    display_count: u32,
    num_presents: u32,
    displayed_0: bool,

    // properties of the most recent frame of the chain
    sync_interval: i32,
    present_mode: PmPresentMode,
    allows_tearing: i32,
}

impl SwapChainData {
    fn new(insertion_order: usize) -> Self {
        Self {
            insertion_order,
            present_mode: PmPresentMode::Unknown,
            ..Self::default()
        }
    }
}

/// Evaluates the query against the stream's ring, writing one blob row of
/// statistics per swap chain observed in the window. `num_swap_chains`
/// carries the row capacity in and the emitted row count out; conditions
/// that yield no data (no frames, inactive producer, collapsed window)
/// report zero rows without error.
pub fn poll_dynamic_query(
    query: &mut DynamicQuery,
    client: &StreamClient,
    blob: &mut [u8],
    num_swap_chains: &mut u32,
) -> Result<(), QueryError> {
    let capacity = *num_swap_chains as usize;
    *num_swap_chains = 0;
    if capacity == 0 {
        return Ok(());
    }
    let stride = query.blob_stride();
    if blob.len() < stride * capacity {
        return Err(QueryError::BlobTooSmall {
            needed: stride * capacity,
            actual: blob.len(),
        });
    }

    let ring = client.ring();
    if !ring.header().process_active() {
        return Ok(());
    }
    let qpc_frequency = client.qpc_frequency();
    let client_qpc = timing::qpc_now();

    // seek to the newest frame inside the offset-adjusted window
    let Some(mut index) = ring.latest_frame_index() else {
        return Ok(());
    };
    let Some(mut frame) = ring.read_frame_by_index(index) else {
        return Ok(());
    };
    let mut adjusted_window_ms = query.window_size_ms;
    let offset_ticks = timing::seconds_delta_to_qpc(query.metric_offset_ms / 1000., qpc_frequency);
    if offset_ticks != 0 {
        let adjusted_qpc = adjusted_read_origin(
            client_qpc,
            frame.present_event.present_start_time,
            offset_ticks,
            &mut query.frame_data_delta,
        );
        if adjusted_qpc > frame.present_event.present_start_time {
            // the origin is ahead of the newest data: shrink the window by
            // the overshoot
            let overshoot_ms = timing::qpc_delta_to_ms(
                adjusted_qpc - frame.present_event.present_start_time,
                qpc_frequency,
            );
            adjusted_window_ms -= overshoot_ms;
            if adjusted_window_ms <= 0.0 {
                return Ok(());
            }
        } else {
            loop {
                if !ring.decrement_index(&mut index) {
                    // keep the caller-visible index on the last valid frame
                    index += 1;
                    break;
                }
                let Some(older) = ring.read_frame_by_index(index) else {
                    return Ok(());
                };
                frame = older;
                if adjusted_qpc >= frame.present_event.present_start_time {
                    break;
                }
            }
        }
    }

    // backward aggregation over the window
    let window_ticks = timing::seconds_delta_to_qpc(adjusted_window_ms / 1000., qpc_frequency);
    let end_qpc = frame
        .present_event
        .present_start_time
        .saturating_sub(window_ticks);
    let mut last_checked_qpc = frame.present_event.present_start_time;
    let mut swap_chain_data: HashMap<u64, SwapChainData> = HashMap::new();

    while frame.present_event.present_start_time > end_qpc {
        accumulate_frame(query, &mut swap_chain_data, &frame, qpc_frequency);
        if !ring.decrement_index(&mut index) {
            break;
        }
        let Some(older) = ring.read_frame_by_index(index) else {
            break;
        };
        if older.present_event.present_start_time > last_checked_qpc {
            // producer lapped us mid-walk; timestamps must be non-increasing
            break;
        }
        last_checked_qpc = older.present_event.present_start_time;
        frame = older;
    }

    // one blob row of statistics per chain, in insertion order, capped by
    // the caller's capacity
    let mut chains: Vec<&SwapChainData> = swap_chain_data.values().collect();
    chains.sort_by_key(|chain| chain.insertion_order);
    let emitted = chains.len().min(capacity);
    for (row, chain) in chains.into_iter().take(emitted).enumerate() {
        let base = row * stride;
        for element in &query.elements {
            let value = match element.metric {
                // properties of the chain's most recent frame, not
                // windowed series
                PmMetric::SyncInterval => chain.sync_interval as f64,
                PmMetric::PresentMode => chain.present_mode as i32 as f64,
                PmMetric::AllowsTearing => chain.allows_tearing as f64,
                _ => compute_stat(select_values(chain, element), element.stat),
            };
            let slot = base + element.data_offset as usize;
            blob[slot..slot + 8].copy_from_slice(&value.to_le_bytes());
        }
    }
    *num_swap_chains = emitted as u32;
    Ok(())
}

/// Maintains the smoothed producer-vs-consumer tick delta and returns the
/// adjusted read origin.
fn adjusted_read_origin(
    current_qpc: u64,
    frame_qpc: u64,
    offset_ticks: u64,
    frame_data_delta: &mut u64,
) -> u64 {
    let current_delta = current_qpc.saturating_sub(frame_qpc);
    if *frame_data_delta == 0 {
        *frame_data_delta = current_delta;
    } else if frame_data_delta.abs_diff(current_delta) > FRAME_DELTA_STEP_THRESHOLD {
        *frame_data_delta = current_delta;
    }
    current_qpc.saturating_sub(*frame_data_delta + offset_ticks)
}

fn accumulate_frame(
    query: &DynamicQuery,
    swap_chain_data: &mut HashMap<u64, SwapChainData>,
    frame: &FrameRecord,
    qpc_frequency: u64,
) {
    let present = &frame.present_event;
    let next_order = swap_chain_data.len();
    let chain = swap_chain_data
        .entry(present.swap_chain_address)
        .or_insert_with(|| SwapChainData::new(next_order));

    // the previous first frame becomes "next" relative to this older one
    let next_present_start = chain.present_start_0;
    let next_present_stop = chain.present_stop_0;
    let next_gpu_duration = chain.gpu_duration_0;

    chain.displayed_0 = present.final_state == PresentResult::Presented;
    chain.present_start_0 = present.present_start_time;
    chain.present_stop_0 = present.present_stop_time;
    chain.gpu_duration_0 = present.gpu_duration;
    chain.num_presents += 1;

    if chain.displayed_0 {
        chain.display_1_screen_time = chain.display_0_screen_time;
        chain.display_0_screen_time = present.screen_time;
        chain.display_count += 1;
        if query.accum_fps_data {
            chain.display_latency_ms.push(timing::qpc_delta_to_ms(
                present.screen_time.saturating_sub(present.present_start_time),
                qpc_frequency,
            ));
            chain.render_latency_ms.push(timing::qpc_delta_to_ms(
                present.screen_time.saturating_sub(present.present_stop_time),
                qpc_frequency,
            ));
        }
    }

    if chain.num_presents == 1 {
        chain.sync_interval = present.sync_interval;
        chain.present_mode = present.present_mode;
        chain.allows_tearing = present.supports_tearing as i32;
    }

    if chain.num_presents > 1 && query.accum_fps_data {
        let cpu_start = present.present_stop_time;
        let cpu_busy = next_present_start.saturating_sub(cpu_start);
        let cpu_wait = next_present_stop.saturating_sub(next_present_start);
        let gpu_busy = next_gpu_duration;
        let display_busy = chain
            .display_1_screen_time
            .saturating_sub(chain.display_0_screen_time);

        let frame_time_ms = timing::qpc_delta_to_ms(cpu_busy + cpu_wait, qpc_frequency);
        let gpu_busy_ms = timing::qpc_delta_to_ms(gpu_busy, qpc_frequency);
        let display_busy_ms = timing::qpc_delta_to_ms(display_busy, qpc_frequency);

        chain.frame_times_ms.push(frame_time_ms);
        chain
            .cpu_busy_ms
            .push(timing::qpc_delta_to_ms(cpu_busy, qpc_frequency));
        chain
            .cpu_wait_ms
            .push(timing::qpc_delta_to_ms(cpu_wait, qpc_frequency));
        chain.gpu_sum_ms.push(gpu_busy_ms);
        chain.dropped.push(if chain.displayed_0 { 0. } else { 1. });
        if frame_time_ms > 0. {
            chain.presented_fps.push(1000. / frame_time_ms);
        }

        if chain.displayed_0 && chain.display_count >= 2 && display_busy > 0 {
            chain.display_busy_ms.push(display_busy_ms);
            chain.displayed_fps.push(1000. / display_busy_ms);
        }
    }

    let gpu = &frame.power_telemetry;
    let wants = |bit: GpuTelemetryCapBits| {
        query.accum_gpu_bits & bit.mask() != 0 && gpu.cap_bits & bit.mask() != 0
    };
    if wants(GpuTelemetryCapBits::GpuPower) {
        chain.gpu_power_w.push(gpu.gpu_power_w);
    }
    if wants(GpuTelemetryCapBits::GpuFrequency) {
        chain.gpu_frequency_mhz.push(gpu.gpu_frequency_mhz);
    }
    if wants(GpuTelemetryCapBits::GpuTemperature) {
        chain.gpu_temperature_c.push(gpu.gpu_temperature_c);
    }
    if wants(GpuTelemetryCapBits::GpuUtilization) {
        chain.gpu_utilization.push(gpu.gpu_utilization);
    }
    let fan_bits = [
        GpuTelemetryCapBits::FanSpeed0,
        GpuTelemetryCapBits::FanSpeed1,
        GpuTelemetryCapBits::FanSpeed2,
        GpuTelemetryCapBits::FanSpeed3,
        GpuTelemetryCapBits::FanSpeed4,
    ];
    for (slot, bit) in fan_bits.into_iter().enumerate() {
        if wants(bit) {
            chain.gpu_fan_rpm[slot].push(gpu.fan_speed_rpm[slot]);
        }
    }
    let psu_bits = [
        GpuTelemetryCapBits::PsuInfo0,
        GpuTelemetryCapBits::PsuInfo1,
        GpuTelemetryCapBits::PsuInfo2,
        GpuTelemetryCapBits::PsuInfo3,
        GpuTelemetryCapBits::PsuInfo4,
    ];
    for (slot, bit) in psu_bits.into_iter().enumerate() {
        if wants(bit) {
            chain.gpu_psu_power_w[slot].push(gpu.psu[slot].psu_power_w);
            chain.gpu_psu_type[slot].push(gpu.psu[slot].psu_type as i32 as f64);
        }
    }

    let cpu = &frame.cpu_telemetry;
    let wants_cpu = |bit: CpuTelemetryCapBits| {
        query.accum_cpu_bits & bit.mask() != 0 && cpu.cap_bits & bit.mask() != 0
    };
    if wants_cpu(CpuTelemetryCapBits::CpuUtilization) {
        chain.cpu_utilization.push(cpu.cpu_utilization);
    }
    if wants_cpu(CpuTelemetryCapBits::CpuPower) {
        chain.cpu_power_w.push(cpu.cpu_power_w);
    }
    if wants_cpu(CpuTelemetryCapBits::CpuFrequency) {
        chain.cpu_frequency_mhz.push(cpu.cpu_frequency_mhz);
    }
    if wants_cpu(CpuTelemetryCapBits::CpuTemperature) {
        chain.cpu_temperature_c.push(cpu.cpu_temperature_c);
    }
}

fn select_values<'c>(chain: &'c SwapChainData, element: &QueryElement) -> &'c [f64] {
    match element.metric {
        PmMetric::DisplayedFps => &chain.displayed_fps,
        PmMetric::PresentedFps => &chain.presented_fps,
        PmMetric::FrameTime => &chain.frame_times_ms,
        PmMetric::GpuBusyTime => &chain.gpu_sum_ms,
        PmMetric::CpuBusyTime => &chain.cpu_busy_ms,
        PmMetric::CpuWaitTime => &chain.cpu_wait_ms,
        PmMetric::DisplayBusyTime => &chain.display_busy_ms,
        PmMetric::DroppedFrames => &chain.dropped,
        PmMetric::GpuPower => &chain.gpu_power_w,
        PmMetric::GpuFanSpeed => chain
            .gpu_fan_rpm
            .get(element.array_index as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        PmMetric::GpuPsuPower => chain
            .gpu_psu_power_w
            .get(element.array_index as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        PmMetric::GpuPsuType => chain
            .gpu_psu_type
            .get(element.array_index as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        PmMetric::GpuFrequency => &chain.gpu_frequency_mhz,
        PmMetric::GpuTemperature => &chain.gpu_temperature_c,
        PmMetric::GpuUtilization => &chain.gpu_utilization,
        PmMetric::CpuUtilization => &chain.cpu_utilization,
        PmMetric::CpuPower => &chain.cpu_power_w,
        PmMetric::CpuFrequency => &chain.cpu_frequency_mhz,
        PmMetric::CpuTemperature => &chain.cpu_temperature_c,
        PmMetric::RenderLatency => &chain.render_latency_ms,
        PmMetric::DisplayLatency => &chain.display_latency_ms,
        _ => &[],
    }
}

/// Values arrive newest first, so `Raw` is the front element. Empty inputs
/// yield zero.
fn compute_stat(values: &[f64], stat: PmStat) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    match stat {
        PmStat::Avg => values.iter().sum::<f64>() / values.len() as f64,
        PmStat::Percentile99 => percentile(values, 0.99),
        PmStat::Percentile95 => percentile(values, 0.95),
        PmStat::Percentile90 => percentile(values, 0.90),
        PmStat::Max => values.iter().cloned().fold(f64::MIN, f64::max),
        PmStat::Min => values.iter().cloned().fold(f64::MAX, f64::min),
        PmStat::Raw => values[0],
    }
}

/// Linear-interpolation percentile on a sorted copy.
fn percentile(values: &[f64], fraction: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = fraction * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_on_empty_inputs_are_zero() {
        for stat in [
            PmStat::Avg,
            PmStat::Percentile99,
            PmStat::Max,
            PmStat::Min,
            PmStat::Raw,
        ] {
            assert_eq!(compute_stat(&[], stat), 0.0);
        }
    }

    #[test]
    fn percentiles_interpolate_linearly() {
        let values = [4., 1., 3., 2.]; // sorted: 1 2 3 4
        assert!((percentile(&values, 0.5) - 2.5).abs() < 1e-12);
        assert!((percentile(&values, 0.90) - 3.7).abs() < 1e-12);
        assert!((percentile(&values, 0.99) - 3.97).abs() < 1e-9);
    }

    #[test]
    fn raw_takes_the_newest_value() {
        let values = [5., 4., 3.];
        assert_eq!(compute_stat(&values, PmStat::Raw), 5.0);
        assert_eq!(compute_stat(&values, PmStat::Max), 5.0);
        assert_eq!(compute_stat(&values, PmStat::Min), 3.0);
        assert!((compute_stat(&values, PmStat::Avg) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn delta_steps_are_adopted() {
        let mut delta = 0u64;
        // first observation is adopted verbatim
        let origin = adjusted_read_origin(1_000_000, 900_000, 0, &mut delta);
        assert_eq!(delta, 100_000);
        assert_eq!(origin, 900_000);
        // small wobble keeps the stored delta
        adjusted_read_origin(2_000_000, 1_899_000, 0, &mut delta);
        assert_eq!(delta, 100_000);
        // a jump past the threshold re-anchors
        adjusted_read_origin(100_000_000, 20_000_000, 0, &mut delta);
        assert_eq!(delta, 80_000_000);
    }
}
