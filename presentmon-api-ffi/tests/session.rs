// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Full session lifecycle through the C ABI against an in-process service.
//! Kept as a single test because the session slot is process-wide.

use std::ffi::CString;
use std::ptr;

use presentmon_api_ffi::*;
use presentmon_common::timing;
use presentmon_ipc::ring::{CpuTelemetry, FrameRecord, GpuTelemetry, PresentEvent};
use presentmon_ipc::values::{
    PmGraphicsRuntime, PmMetric, PmPresentMode, PmStat, PmStatus, PresentResult,
};
use presentmon_service::{PresentMonService, ServiceOptions};

const FRAME_SPACING_TICKS: u64 = 16_600_000;

fn frame(start: u64) -> FrameRecord {
    FrameRecord {
        present_event: PresentEvent::new(
            0xfeed,
            start,
            start + 2_000_000,
            8_000_000,
            start + 10_000_000,
            1,
            PmPresentMode::HardwareIndependentFlip,
            false,
            PresentResult::Presented,
            PmGraphicsRuntime::Dxgi,
        ),
        power_telemetry: GpuTelemetry::default(),
        cpu_telemetry: CpuTelemetry::default(),
    }
}

#[test]
fn session_lifecycle() -> anyhow::Result<()> {
    let pipe_dir = tempfile::tempdir()?;
    let pipe_name = pipe_dir.path().join("control-pipe");
    let pipe_name = pipe_name.to_str().unwrap().to_string();
    let shm_name = format!("pm-test-shm-ffi-{}", std::process::id());
    let service = PresentMonService::new(ServiceOptions {
        pipe_name: Some(pipe_name.clone()),
        shm_name: Some(shm_name.clone()),
        ring_entries: Some(64),
    })?;

    // everything except open reports the missing session
    let mut root = ptr::null();
    assert_eq!(
        unsafe { pmEnumerateInterface(&mut root) },
        PmStatus::SessionNotOpen
    );
    assert_eq!(pmStartTrackingProcess(42), PmStatus::SessionNotOpen);
    assert_eq!(pmCloseSession(), PmStatus::SessionNotOpen);

    let pipe_c = CString::new(pipe_name)?;
    let shm_c = CString::new(shm_name)?;
    assert_eq!(
        unsafe { pmOpenSessionWithOptions(pipe_c.as_ptr(), shm_c.as_ptr()) },
        PmStatus::Success
    );
    // double-open is rejected
    assert_eq!(pmOpenSession(), PmStatus::Failure);

    // enumerate, spot-check, free
    assert_eq!(unsafe { pmEnumerateInterface(&mut root) }, PmStatus::Success);
    assert!(!root.is_null());
    unsafe {
        let metrics = &*(*root).pMetrics;
        assert!(metrics.size > 0);
        let enums = &*(*root).pEnums;
        assert!(enums.size > 0);
    }
    assert_eq!(unsafe { pmFreeInterface(root) }, PmStatus::Success);

    // track, produce frames, query
    assert_eq!(pmStartTrackingProcess(42), PmStatus::Success);
    {
        let writer = service.frame_writer(42).unwrap();
        let mut writer = writer.lock().unwrap();
        let anchor = timing::qpc_now();
        for i in 0..10u64 {
            writer.write_frame(&frame(anchor - (9 - i) * FRAME_SPACING_TICKS));
        }
    }

    let mut elements = [PM_QUERY_ELEMENT {
        metric: PmMetric::FrameTime,
        stat: PmStat::Avg,
        deviceId: 0,
        arrayIndex: 0,
        dataOffset: 0,
        dataSize: 0,
    }];
    let mut query = ptr::null_mut();
    assert_eq!(
        unsafe {
            pmRegisterDynamicQuery(&mut query, elements.as_mut_ptr(), 1, 42, 100.0, 0.0)
        },
        PmStatus::Success
    );
    assert_eq!(elements[0].dataSize, 8);

    let mut blob = [0u8; 8 * 4];
    let mut num_swap_chains = 4u32;
    assert_eq!(
        unsafe { pmPollDynamicQuery(query, blob.as_mut_ptr(), &mut num_swap_chains) },
        PmStatus::Success
    );
    assert_eq!(num_swap_chains, 1);
    let frame_time = f64::from_le_bytes(blob[..8].try_into()?);
    assert!((frame_time - 16.6).abs() <= 0.1, "avg {frame_time}");

    assert_eq!(unsafe { pmFreeDynamicQuery(query) }, PmStatus::Success);
    assert_eq!(pmStopTrackingProcess(42), PmStatus::Success);
    assert_eq!(pmCloseSession(), PmStatus::Success);
    drop(service);
    Ok(())
}
