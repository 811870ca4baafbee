// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-process frame ring: a single-producer/single-consumer circular
//! buffer of fixed-size frame records in named shared memory.
//!
//! The service owns the ring and writes records as present events arrive;
//! clients merely view it. There is no lock: synchronization is the index
//! pair plus the `process_active` flag, release-stored by the writer and
//! acquire-loaded by readers. Readers walk backward from the latest record
//! and must tolerate wraparound; delivery is lossy once the writer laps a
//! slow reader.

use std::io;
use std::mem::{align_of, size_of};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use static_assertions::const_assert_eq;

use crate::shm::{MappedMem, NamedShmHandle};
use crate::values::{PmGraphicsRuntime, PmPresentMode, PmPsuType, PresentResult};

/// Timing and routing facts of one present event, in QPC ticks.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PresentEvent {
    pub swap_chain_address: u64,
    pub present_start_time: u64,
    pub present_stop_time: u64,
    pub gpu_duration: u64,
    pub screen_time: u64,
    pub sync_interval: i32,
    pub present_mode: PmPresentMode,
    pub supports_tearing: u32,
    pub final_state: PresentResult,
    pub runtime: PmGraphicsRuntime,
    _pad: u32,
}

impl PresentEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        swap_chain_address: u64,
        present_start_time: u64,
        present_stop_time: u64,
        gpu_duration: u64,
        screen_time: u64,
        sync_interval: i32,
        present_mode: PmPresentMode,
        supports_tearing: bool,
        final_state: PresentResult,
        runtime: PmGraphicsRuntime,
    ) -> Self {
        Self {
            swap_chain_address,
            present_start_time,
            present_stop_time,
            gpu_duration,
            screen_time,
            sync_interval,
            present_mode,
            supports_tearing: supports_tearing as u32,
            final_state,
            runtime,
            _pad: 0,
        }
    }
}

/// One power-supply input of the adapter; valid when the matching
/// `PsuInfo` capability bit is set.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct PsuTelemetry {
    pub psu_type: PmPsuType,
    _pad: u32,
    pub psu_power_w: f64,
    pub psu_voltage_v: f64,
}

impl PsuTelemetry {
    pub fn new(psu_type: PmPsuType, psu_power_w: f64, psu_voltage_v: f64) -> Self {
        Self {
            psu_type,
            _pad: 0,
            psu_power_w,
            psu_voltage_v,
        }
    }
}

/// GPU power/thermal samples gated by a capability bitset
/// ([`crate::values::GpuTelemetryCapBits`]); only samples whose bit is set
/// are meaningful.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct GpuTelemetry {
    pub cap_bits: u64,
    pub gpu_power_w: f64,
    pub gpu_sustained_power_limit_w: f64,
    pub gpu_voltage_v: f64,
    pub gpu_frequency_mhz: f64,
    pub gpu_temperature_c: f64,
    pub gpu_utilization: f64,
    pub fan_speed_rpm: [f64; 5],
    pub gpu_mem_power_w: f64,
    pub gpu_mem_voltage_v: f64,
    pub gpu_mem_frequency_mhz: f64,
    pub gpu_mem_temperature_c: f64,
    pub psu: [PsuTelemetry; 5],
}

/// CPU samples gated by [`crate::values::CpuTelemetryCapBits`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuTelemetry {
    pub cap_bits: u64,
    pub cpu_utilization: f64,
    pub cpu_power_w: f64,
    pub cpu_temperature_c: f64,
    pub cpu_frequency_mhz: f64,
}

/// One slot of the ring. Written exactly once per index by the producer;
/// readable until the ring wraps over it.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct FrameRecord {
    pub present_event: PresentEvent,
    pub power_telemetry: GpuTelemetry,
    pub cpu_telemetry: CpuTelemetry,
}

// the record must pack to a multiple of its alignment so the slot array
// has no per-element padding surprises across compilers
const_assert_eq!(size_of::<FrameRecord>() % align_of::<FrameRecord>(), 0);

#[repr(C)]
pub struct RingHeader {
    head_idx: AtomicU64,
    tail_idx: AtomicU64,
    max_entries: u64,
    is_full: AtomicU32,
    process_active: AtomicU32,
    ticks_per_second: u64,
}

impl RingHeader {
    pub fn head_idx(&self) -> u64 {
        self.head_idx.load(Ordering::Acquire)
    }

    pub fn tail_idx(&self) -> u64 {
        self.tail_idx.load(Ordering::Acquire)
    }

    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }

    pub fn is_full(&self) -> bool {
        self.is_full.load(Ordering::Acquire) != 0
    }

    pub fn process_active(&self) -> bool {
        self.process_active.load(Ordering::Acquire) != 0
    }

    pub fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }
}

fn records_offset() -> usize {
    let header = size_of::<RingHeader>();
    let align = align_of::<FrameRecord>();
    (header + align - 1) & !(align - 1)
}

fn ring_size(max_entries: u64) -> usize {
    records_offset() + size_of::<FrameRecord>() * max_entries as usize
}

/// Service-side writer; owns the named segment, which disappears when the
/// writer drops.
pub struct FrameRingWriter {
    map: MappedMem,
}

impl FrameRingWriter {
    pub fn create(name: &str, max_entries: u64, ticks_per_second: u64) -> io::Result<Self> {
        assert!(max_entries >= 2, "ring needs at least two entries");
        let map = NamedShmHandle::create(name, ring_size(max_entries))?.map()?;
        let writer = Self { map };
        // SAFETY: sole mapping until the name is handed to a client.
        unsafe {
            let header = writer.map.base() as *mut RingHeader;
            (*header).max_entries = max_entries;
            (*header).ticks_per_second = ticks_per_second;
            (*header).process_active = AtomicU32::new(1);
        }
        tracing::debug!(name, max_entries, "created frame ring");
        Ok(writer)
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: header lives at the mapping base.
        unsafe { &*(self.map.base() as *const RingHeader) }
    }

    fn slot(&self, index: u64) -> *mut FrameRecord {
        debug_assert!(index < self.header().max_entries);
        // SAFETY: index is within the slot array sized at create.
        unsafe { (self.map.base().add(records_offset()) as *mut FrameRecord).add(index as usize) }
    }

    /// Appends a frame, overwriting the oldest once the ring is full.
    pub fn write_frame(&mut self, frame: &FrameRecord) {
        let header = self.header();
        let tail = header.tail_idx.load(Ordering::Relaxed);
        // SAFETY: the slot at tail is outside the readable window until the
        // tail store below publishes it.
        unsafe { self.slot(tail).write_volatile(*frame) };
        let next = (tail + 1) % header.max_entries;
        if header.is_full.load(Ordering::Relaxed) != 0 {
            // lapping: the oldest readable entry moves forward with us
            header.head_idx.store(next, Ordering::Release);
        } else if next == header.head_idx.load(Ordering::Relaxed) {
            header.is_full.store(1, Ordering::Release);
        }
        header.tail_idx.store(next, Ordering::Release);
    }

    /// Marks the producer as gone; readers must stop after observing this.
    pub fn mark_process_inactive(&self) {
        self.header().process_active.store(0, Ordering::Release);
    }

    pub fn ticks_per_second(&self) -> u64 {
        self.header().ticks_per_second
    }
}

impl Drop for FrameRingWriter {
    fn drop(&mut self) {
        self.mark_process_inactive();
    }
}

/// Client-side view of a ring created by the service.
pub struct FrameRingView {
    map: MappedMem,
}

impl FrameRingView {
    pub fn open(name: &str) -> io::Result<Self> {
        let map = NamedShmHandle::open(name)?.map()?;
        if map.len() < size_of::<RingHeader>() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "shared memory too small for a ring header",
            ));
        }
        Ok(Self { map })
    }

    pub fn header(&self) -> &RingHeader {
        // SAFETY: length was validated in open.
        unsafe { &*(self.map.base() as *const RingHeader) }
    }

    /// Index of the most recently written record, or `None` while empty.
    pub fn latest_frame_index(&self) -> Option<u64> {
        let header = self.header();
        let tail = header.tail_idx();
        if !header.is_full() && tail == header.head_idx() {
            return None;
        }
        Some(if tail == 0 {
            header.max_entries() - 1
        } else {
            tail - 1
        })
    }

    /// Copies the record at `index` out of the ring.
    pub fn read_frame_by_index(&self, index: u64) -> Option<FrameRecord> {
        let header = self.header();
        if index >= header.max_entries() {
            return None;
        }
        // SAFETY: index is in range; volatile read because the producer may
        // overwrite concurrently (the walk detects the resulting
        // non-monotonic timestamps and stops).
        Some(unsafe {
            (self.map.base().add(records_offset()) as *const FrameRecord)
                .add(index as usize)
                .read_volatile()
        })
    }

    /// Steps `index` to the previously written record. Wraps from zero to
    /// the top of the ring when full (else to the tail), and reports
    /// `false` when the step would cross the head, i.e. the walk has run
    /// out of data.
    pub fn decrement_index(&self, index: &mut u64) -> bool {
        let header = self.header();
        if !header.process_active() {
            return false;
        }
        let wrap_target = if header.is_full() {
            header.max_entries() - 1
        } else {
            header.tail_idx()
        };
        *index = if *index == 0 { wrap_target } else { *index - 1 };
        *index != header.head_idx()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(start: u64) -> FrameRecord {
        FrameRecord {
            present_event: PresentEvent::new(
                0xabc0,
                start,
                start + 100,
                50,
                start + 200,
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

    fn ring_pair(tag: &str, entries: u64) -> (FrameRingWriter, FrameRingView) {
        let name = format!("pm-test-{tag}-{}", std::process::id());
        let writer = FrameRingWriter::create(&name, entries, 1_000_000).unwrap();
        let view = FrameRingView::open(&name).unwrap();
        (writer, view)
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn empty_ring_has_no_latest_frame() {
        let (_writer, view) = ring_pair("ring-empty", 4);
        assert!(view.latest_frame_index().is_none());
        assert!(view.header().process_active());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn latest_tracks_writes() {
        let (mut writer, view) = ring_pair("ring-latest", 4);
        writer.write_frame(&frame(100));
        assert_eq!(view.latest_frame_index(), Some(0));
        writer.write_frame(&frame(200));
        assert_eq!(view.latest_frame_index(), Some(1));
        let record = view.read_frame_by_index(1).unwrap();
        assert_eq!(record.present_event.present_start_time, 200);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn backward_walk_stops_at_head() {
        let (mut writer, view) = ring_pair("ring-walk", 8);
        for i in 0..3 {
            writer.write_frame(&frame(100 * (i + 1)));
        }
        let mut index = view.latest_frame_index().unwrap();
        let mut seen = vec![view
            .read_frame_by_index(index)
            .unwrap()
            .present_event
            .present_start_time];
        while view.decrement_index(&mut index) {
            seen.push(
                view.read_frame_by_index(index)
                    .unwrap()
                    .present_event
                    .present_start_time,
            );
        }
        // head itself is a sentinel the walk never lands on
        assert_eq!(seen, vec![300, 200]);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn wrapped_ring_reports_full_and_walks_whole_window() {
        let (mut writer, view) = ring_pair("ring-wrap", 4);
        for i in 0..6 {
            writer.write_frame(&frame(100 * (i + 1)));
        }
        let header = view.header();
        assert!(header.is_full());
        assert_eq!(header.head_idx(), header.tail_idx());

        let mut index = view.latest_frame_index().unwrap();
        let mut seen = vec![view
            .read_frame_by_index(index)
            .unwrap()
            .present_event
            .present_start_time];
        while view.decrement_index(&mut index) {
            seen.push(
                view.read_frame_by_index(index)
                    .unwrap()
                    .present_event
                    .present_start_time,
            );
        }
        assert_eq!(seen, vec![600, 500, 400]);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn inactive_process_stops_walks() {
        let (mut writer, view) = ring_pair("ring-inactive", 4);
        writer.write_frame(&frame(100));
        writer.write_frame(&frame(200));
        writer.mark_process_inactive();
        assert!(!view.header().process_active());
        let mut index = view.latest_frame_index().unwrap();
        assert!(!view.decrement_index(&mut index));
    }
}
