// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Deep-clone behavior of the introspection catalog: the probe pass sizes
//! the block exactly, repeated clones are structurally equal but pointer
//! distinct, and freeing one clone leaves others intact.

use std::ffi::CStr;

use presentmon_ipc::gid;
use presentmon_ipc::intro::api::*;
use presentmon_ipc::intro::{
    free_api_root, populate, BlockAllocator, IntrospectionRoot, ProbeAllocator,
};
use presentmon_ipc::shm::ShmSegment;

fn populated_segment(tag: &str) -> anyhow::Result<(ShmSegment, IntrospectionRoot)> {
    let segment = ShmSegment::create(
        &format!("pm-test-{tag}-{}", std::process::id()),
        gid::INTROSPECTION_SEGMENT_SIZE,
    )?;
    let mut root = IntrospectionRoot::new();
    populate(&segment, &mut root)?;
    Ok((segment, root))
}

fn clone_root(segment: &ShmSegment, root: &IntrospectionRoot) -> anyhow::Result<*mut PM_INTROSPECTION_ROOT> {
    let mut probe = ProbeAllocator::new();
    root.api_clone(segment, &mut probe);
    let mut block = BlockAllocator::new(probe.total_size())?;
    let cloned = root.api_clone(segment, &mut block);
    assert_eq!(
        block.used(),
        probe.total_size(),
        "block pass diverged from probe pass"
    );
    assert_eq!(cloned as *mut u8, block.base_ptr());
    Ok(cloned)
}

unsafe fn string_of(ptr: *const PM_INTROSPECTION_STRING) -> String {
    CStr::from_ptr((*ptr).pData).to_str().unwrap().to_owned()
}

unsafe fn obj_array<'a, T>(ptr: *const PM_INTROSPECTION_OBJARRAY) -> Vec<&'a T> {
    let array = &*ptr;
    (0..array.size)
        .map(|i| &*(*array.pData.add(i) as *const T))
        .collect()
}

/// Flattens a cloned tree into a comparable description.
unsafe fn describe(root: *const PM_INTROSPECTION_ROOT) -> Vec<String> {
    let mut out = Vec::new();
    let root = &*root;
    for metric in obj_array::<PM_INTROSPECTION_METRIC>(root.pMetrics) {
        out.push(format!(
            "metric {:?} type {:?} unit {:?} data {:?} stats {} devices {}",
            metric.id,
            metric.r#type,
            metric.unit,
            (*metric.pTypeInfo).r#type,
            (*metric.pStatInfo).size,
            (*metric.pDeviceMetricInfo).size,
        ));
        for info in obj_array::<PM_INTROSPECTION_DEVICE_METRIC_INFO>(metric.pDeviceMetricInfo) {
            out.push(format!(
                "  device {} avail {:?} array {}",
                info.deviceId, info.availability, info.arraySize
            ));
        }
    }
    for e in obj_array::<PM_INTROSPECTION_ENUM>(root.pEnums) {
        out.push(format!("enum {:?} {}", e.id, string_of(e.pSymbol)));
        for key in obj_array::<PM_INTROSPECTION_ENUM_KEY>(e.pKeys) {
            out.push(format!(
                "  key {} {} | {} | {} | {}",
                key.value,
                string_of(key.pSymbol),
                string_of(key.pName),
                string_of(key.pShortName),
                string_of(key.pDescription),
            ));
        }
    }
    for device in obj_array::<PM_INTROSPECTION_DEVICE>(root.pDevices) {
        out.push(format!(
            "device {} {:?} {:?} {}",
            device.id,
            device.r#type,
            device.vendor,
            string_of(device.pName)
        ));
    }
    out
}

#[test]
fn clone_is_tight_and_self_contained() -> anyhow::Result<()> {
    let (segment, root) = populated_segment("clone-tight")?;
    let cloned = clone_root(&segment, &root)?;
    // spot-check that strings came through with terminators intact
    unsafe {
        let description = describe(cloned);
        assert!(description
            .iter()
            .any(|line| line.contains("PM_METRIC_DISPLAYED_FPS")));
        free_api_root(cloned);
    }
    Ok(())
}

#[test]
fn sequential_clones_are_equal_but_distinct() -> anyhow::Result<()> {
    let (segment, root) = populated_segment("clone-idem")?;
    let first = clone_root(&segment, &root)?;
    let second = clone_root(&segment, &root)?;
    assert_ne!(first, second);
    unsafe {
        assert_eq!(describe(first), describe(second));
        // freeing one tree must not disturb the other
        free_api_root(first);
        let after = describe(second);
        assert!(!after.is_empty());
        free_api_root(second);
    }
    Ok(())
}

#[test]
fn clone_counts_match_shared_tree() -> anyhow::Result<()> {
    let (segment, root) = populated_segment("clone-counts")?;
    let cloned = clone_root(&segment, &root)?;
    unsafe {
        let api = &*cloned;
        assert_eq!((*api.pMetrics).size, root.metrics.len());
        assert_eq!((*api.pEnums).size, root.enums.len());
        assert_eq!((*api.pDevices).size, root.devices.len());
        free_api_root(cloned);
    }
    Ok(())
}
