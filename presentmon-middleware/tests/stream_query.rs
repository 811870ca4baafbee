// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-to-end stream negotiation and dynamic query evaluation against a
//! live in-process service.

use std::sync::atomic::{AtomicU32, Ordering};

use presentmon_common::timing;
use presentmon_ipc::gid;
use presentmon_ipc::ring::{
    CpuTelemetry, FrameRecord, FrameRingView, GpuTelemetry, PresentEvent, PsuTelemetry,
};
use presentmon_ipc::values::{
    GpuTelemetryCapBits, PmGraphicsRuntime, PmMetric, PmPresentMode, PmPsuType, PmStat, PmStatus,
    PresentResult,
};
use presentmon_middleware::{Middleware, MiddlewareOptions, QueryElement, QueryError};
use presentmon_service::{PresentMonService, ServiceOptions};
use tempfile::TempDir;

const FRAME_SPACING_TICKS: u64 = 16_600_000; // 16.6 ms at 1 GHz
const STOP_OFFSET_TICKS: u64 = 2_000_000; // present stop trails start by 2 ms
const SCREEN_OFFSET_TICKS: u64 = 10_000_000; // screen time trails start by 10 ms
const GPU_DURATION_TICKS: u64 = 8_000_000; // 8 ms of GPU work per frame

const DEVICE_UNIVERSAL: u32 = 0;
const DEVICE_ADAPTER: u32 = 1;

static INSTANCE: AtomicU32 = AtomicU32::new(0);

fn start_pair(tag: &str) -> anyhow::Result<(PresentMonService, Middleware, String, TempDir)> {
    let n = INSTANCE.fetch_add(1, Ordering::Relaxed);
    let pipe_dir = tempfile::tempdir()?;
    let pipe_name = pipe_dir.path().join("control-pipe");
    let pipe_name = pipe_name.to_str().unwrap().to_string();
    let shm_name = format!("pm-test-shm-{tag}-{}-{n}", std::process::id());
    let service = PresentMonService::new(ServiceOptions {
        pipe_name: Some(pipe_name.clone()),
        shm_name: Some(shm_name.clone()),
        ring_entries: Some(256),
    })?;
    let middleware = Middleware::new(MiddlewareOptions {
        pipe_name: Some(pipe_name),
        shm_name: Some(shm_name.clone()),
    })?;
    Ok((service, middleware, shm_name, pipe_dir))
}

fn frame(chain: u64, start: u64, presented: bool) -> FrameRecord {
    FrameRecord {
        present_event: PresentEvent::new(
            chain,
            start,
            start + STOP_OFFSET_TICKS,
            GPU_DURATION_TICKS,
            start + SCREEN_OFFSET_TICKS,
            1,
            PmPresentMode::HardwareIndependentFlip,
            false,
            if presented {
                PresentResult::Presented
            } else {
                PresentResult::Discarded
            },
            PmGraphicsRuntime::Dxgi,
        ),
        power_telemetry: GpuTelemetry::default(),
        cpu_telemetry: CpuTelemetry::default(),
    }
}

/// Writes `count` frames spaced uniformly, the newest anchored at `anchor`.
fn write_cadence(service: &PresentMonService, pid: u32, chain: u64, count: u64, anchor: u64) {
    let writer = service.frame_writer(pid).unwrap();
    let mut writer = writer.lock().unwrap();
    for i in 0..count {
        let start = anchor - (count - 1 - i) * FRAME_SPACING_TICKS;
        writer.write_frame(&frame(chain, start, true));
    }
}

fn read_blob(blob: &[u8], stride: usize, row: usize, offset: u64) -> f64 {
    let base = row * stride + offset as usize;
    f64::from_le_bytes(blob[base..base + 8].try_into().unwrap())
}

#[test]
fn start_stop_round_trip_tears_down_the_ring() -> anyhow::Result<()> {
    let (service, mut middleware, shm_name, _pipe_dir) = start_pair("roundtrip")?;

    assert_eq!(middleware.start_streaming(42), PmStatus::Success);
    let ring_name = gid::stream_shm_name(&shm_name, 42);

    {
        let writer = service.frame_writer(42).unwrap();
        let mut writer = writer.lock().unwrap();
        writer.write_frame(&frame(0xaaa, 1_000_000, true));
        writer.write_frame(&frame(0xaaa, 2_000_000, true));
    }

    let client = middleware.stream_client(42).unwrap();
    let header = client.ring().header();
    assert_eq!(header.head_idx(), 0);
    assert_eq!(header.tail_idx(), 2);
    let newest = client.ring().latest_frame_index().unwrap();
    assert_eq!(newest, 1);
    for index in 0..2 {
        assert!(client.ring().read_frame_by_index(index).is_some());
    }

    assert_eq!(middleware.stop_streaming(42), PmStatus::Success);
    assert!(middleware.stream_client(42).is_none());
    // last viewer gone: the service unlinked the segment
    assert!(FrameRingView::open(&ring_name).is_err());
    Ok(())
}

#[test]
fn restarting_a_stream_renegotiates_the_ring() -> anyhow::Result<()> {
    let (_service, mut middleware, shm_name, _pipe_dir) = start_pair("restart")?;
    let ring_name = gid::stream_shm_name(&shm_name, 7);

    assert_eq!(middleware.start_streaming(7), PmStatus::Success);
    assert!(FrameRingView::open(&ring_name).is_ok());
    assert_eq!(middleware.stop_streaming(7), PmStatus::Success);
    assert!(FrameRingView::open(&ring_name).is_err());

    // a fresh start negotiates a fresh ring under the same name
    assert_eq!(middleware.start_streaming(7), PmStatus::Success);
    assert!(FrameRingView::open(&ring_name).is_ok());
    assert_eq!(middleware.stop_streaming(7), PmStatus::Success);
    Ok(())
}

#[test]
fn uniform_cadence_yields_expected_window_statistics() -> anyhow::Result<()> {
    let (service, mut middleware, _shm, _pipe_dir) = start_pair("window")?;
    assert_eq!(middleware.start_streaming(42), PmStatus::Success);
    write_cadence(&service, 42, 0xabc, 10, timing::qpc_now());

    let mut elements = vec![
        QueryElement::new(PmMetric::FrameTime, PmStat::Avg, DEVICE_UNIVERSAL, 0),
        QueryElement::new(PmMetric::DisplayedFps, PmStat::Avg, DEVICE_UNIVERSAL, 0),
        QueryElement::new(PmMetric::GpuBusyTime, PmStat::Avg, DEVICE_ADAPTER, 0),
        QueryElement::new(PmMetric::FrameTime, PmStat::Raw, DEVICE_UNIVERSAL, 0),
    ];
    let mut query = middleware.register_dynamic_query(&mut elements, 42, 100.0, 0.0)?;
    assert_eq!(elements[1].data_offset, 8);
    assert_eq!(elements[3].data_size, 8);

    let stride = query.blob_stride();
    let mut blob = vec![0u8; stride * 4];
    let mut num_swap_chains = 4u32;
    middleware.poll_dynamic_query(&mut query, &mut blob, &mut num_swap_chains)?;
    assert_eq!(num_swap_chains, 1);

    let frame_time_avg = read_blob(&blob, stride, 0, elements[0].data_offset);
    let displayed_fps_avg = read_blob(&blob, stride, 0, elements[1].data_offset);
    let gpu_busy_avg = read_blob(&blob, stride, 0, elements[2].data_offset);
    let frame_time_raw = read_blob(&blob, stride, 0, elements[3].data_offset);

    assert!((frame_time_avg - 16.6).abs() <= 0.1, "avg {frame_time_avg}");
    assert!(
        (displayed_fps_avg - 1000.0 / 16.6).abs() <= 0.5,
        "fps {displayed_fps_avg}"
    );
    assert!((gpu_busy_avg - 8.0).abs() <= 0.1, "gpu {gpu_busy_avg}");
    assert!((frame_time_raw - 16.6).abs() <= 0.1, "raw {frame_time_raw}");
    Ok(())
}

#[test]
fn psu_samples_honor_the_capability_bits() -> anyhow::Result<()> {
    let (service, mut middleware, _shm, _pipe_dir) = start_pair("psu")?;
    assert_eq!(middleware.start_streaming(42), PmStatus::Success);

    {
        let writer = service.frame_writer(42).unwrap();
        let mut writer = writer.lock().unwrap();
        let anchor = timing::qpc_now();
        for i in 0..6u64 {
            let mut record = frame(0xabc, anchor - (5 - i) * FRAME_SPACING_TICKS, true);
            // only input 0 reports; input 1 stays capability-dark
            record.power_telemetry.cap_bits = GpuTelemetryCapBits::PsuInfo0.mask();
            record.power_telemetry.psu[0] = PsuTelemetry::new(PmPsuType::EightPin, 42.0, 12.0);
            record.power_telemetry.psu[1] = PsuTelemetry::new(PmPsuType::Pcie, 75.0, 12.0);
            writer.write_frame(&record);
        }
    }

    let mut elements = vec![
        QueryElement::new(PmMetric::GpuPsuPower, PmStat::Avg, DEVICE_ADAPTER, 0),
        QueryElement::new(PmMetric::GpuPsuType, PmStat::Raw, DEVICE_ADAPTER, 0),
        QueryElement::new(PmMetric::GpuPsuPower, PmStat::Avg, DEVICE_ADAPTER, 1),
    ];
    let mut query = middleware.register_dynamic_query(&mut elements, 42, 500.0, 0.0)?;
    let stride = query.blob_stride();
    let mut blob = vec![0u8; stride];
    let mut num_swap_chains = 1u32;
    middleware.poll_dynamic_query(&mut query, &mut blob, &mut num_swap_chains)?;
    assert_eq!(num_swap_chains, 1);

    let psu0_power = read_blob(&blob, stride, 0, elements[0].data_offset);
    let psu0_type = read_blob(&blob, stride, 0, elements[1].data_offset);
    let psu1_power = read_blob(&blob, stride, 0, elements[2].data_offset);
    assert!((psu0_power - 42.0).abs() < 1e-9, "psu0 {psu0_power}");
    assert_eq!(psu0_type, PmPsuType::EightPin as i32 as f64);
    // the dark input yields the empty-window sentinel
    assert_eq!(psu1_power, 0.0);
    Ok(())
}

#[test]
fn emitted_chains_match_the_scanned_window() -> anyhow::Result<()> {
    let (service, mut middleware, _shm, _pipe_dir) = start_pair("closure")?;
    assert_eq!(middleware.start_streaming(42), PmStatus::Success);

    // two interleaved swap chains
    {
        let writer = service.frame_writer(42).unwrap();
        let mut writer = writer.lock().unwrap();
        let anchor = timing::qpc_now();
        for i in 0..8u64 {
            let chain = if i % 2 == 0 { 0xaaa } else { 0xbbb };
            let start = anchor - (7 - i) * FRAME_SPACING_TICKS;
            writer.write_frame(&frame(chain, start, true));
        }
    }

    let mut elements = vec![QueryElement::new(
        PmMetric::FrameTime,
        PmStat::Avg,
        DEVICE_UNIVERSAL,
        0,
    )];
    let mut query = middleware.register_dynamic_query(&mut elements, 42, 500.0, 0.0)?;
    let stride = query.blob_stride();

    let mut blob = vec![0u8; stride * 4];
    let mut num_swap_chains = 4u32;
    middleware.poll_dynamic_query(&mut query, &mut blob, &mut num_swap_chains)?;
    assert_eq!(num_swap_chains, 2);

    // excess chains are dropped deterministically by the caller's capacity
    let mut small_blob = vec![0u8; stride];
    let mut capped = 1u32;
    middleware.poll_dynamic_query(&mut query, &mut small_blob, &mut capped)?;
    assert_eq!(capped, 1);
    Ok(())
}

#[test]
fn clock_step_re_anchors_the_delta() -> anyhow::Result<()> {
    let (service, mut middleware, _shm, _pipe_dir) = start_pair("skew")?;
    assert_eq!(middleware.start_streaming(42), PmStatus::Success);
    write_cadence(&service, 42, 0xabc, 10, timing::qpc_now());

    let mut elements = vec![QueryElement::new(
        PmMetric::FrameTime,
        PmStat::Avg,
        DEVICE_UNIVERSAL,
        0,
    )];
    let mut query = middleware.register_dynamic_query(&mut elements, 42, 100.0, 5.0)?;
    let stride = query.blob_stride();
    let mut blob = vec![0u8; stride * 4];

    let mut num_swap_chains = 4u32;
    middleware.poll_dynamic_query(&mut query, &mut blob, &mut num_swap_chains)?;
    assert_eq!(num_swap_chains, 1);
    let first_delta = query.frame_data_delta();

    // producer timestamps fall 200 ms behind, far past the step threshold
    write_cadence(&service, 42, 0xabc, 10, timing::qpc_now() - 200_000_000);
    let mut num_swap_chains = 4u32;
    middleware.poll_dynamic_query(&mut query, &mut blob, &mut num_swap_chains)?;
    assert_eq!(num_swap_chains, 1, "poll after the step must re-anchor");
    let second_delta = query.frame_data_delta();
    assert!(second_delta.abs_diff(first_delta) > 150_000_000);
    Ok(())
}

#[test]
fn registration_validates_against_the_catalog() -> anyhow::Result<()> {
    let (_service, middleware, _shm, _pipe_dir) = start_pair("register")?;

    // static metrics are rejected
    let mut elements = vec![QueryElement::new(
        PmMetric::Application,
        PmStat::Raw,
        DEVICE_UNIVERSAL,
        0,
    )];
    assert!(matches!(
        middleware.register_dynamic_query(&mut elements, 1, 100.0, 0.0),
        Err(presentmon_middleware::MiddlewareError::Query(
            QueryError::StaticMetric(PmMetric::Application)
        ))
    ));

    // fan speed is indexed 0..=4
    let mut elements = vec![QueryElement::new(
        PmMetric::GpuFanSpeed,
        PmStat::Avg,
        DEVICE_ADAPTER,
        7,
    )];
    assert!(matches!(
        middleware.register_dynamic_query(&mut elements, 1, 100.0, 0.0),
        Err(presentmon_middleware::MiddlewareError::Query(
            QueryError::InvalidArrayIndex { index: 7, .. }
        ))
    ));

    // adapter metrics are not available on the universal device
    let mut elements = vec![QueryElement::new(
        PmMetric::GpuPower,
        PmStat::Avg,
        DEVICE_UNIVERSAL,
        0,
    )];
    assert!(matches!(
        middleware.register_dynamic_query(&mut elements, 1, 100.0, 0.0),
        Err(presentmon_middleware::MiddlewareError::Query(
            QueryError::DeviceUnavailable { .. }
        ))
    ));
    Ok(())
}
