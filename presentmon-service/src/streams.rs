// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ownership and reference counting of per-process frame rings.
//!
//! `StartStream` allocates or reuses the ring for the target process and
//! registers the requesting client; `StopStream` deregisters it. When the
//! last client leaves, the ring is torn down and its name unlinked.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};

use presentmon_common::timing;
use presentmon_ipc::gid;
use presentmon_ipc::ring::FrameRingWriter;

struct StreamEntry {
    shm_name: String,
    writer: Arc<Mutex<FrameRingWriter>>,
    clients: HashSet<u32>,
}

pub struct StreamManager {
    service_name: String,
    ring_entries: u64,
    streams: HashMap<u32, StreamEntry>,
}

impl StreamManager {
    pub fn new(service_name: String, ring_entries: u64) -> Self {
        Self {
            service_name,
            ring_entries,
            streams: HashMap::new(),
        }
    }

    /// Binds `client_pid` to the ring of `target_pid`, creating the ring on
    /// first use, and returns the segment name for the client to open.
    pub fn start_stream(&mut self, client_pid: u32, target_pid: u32) -> io::Result<String> {
        if let Some(entry) = self.streams.get_mut(&target_pid) {
            entry.clients.insert(client_pid);
            return Ok(entry.shm_name.clone());
        }
        let shm_name = gid::stream_shm_name(&self.service_name, target_pid);
        let writer =
            FrameRingWriter::create(&shm_name, self.ring_entries, timing::QPC_FREQUENCY)?;
        let mut clients = HashSet::new();
        clients.insert(client_pid);
        self.streams.insert(
            target_pid,
            StreamEntry {
                shm_name: shm_name.clone(),
                writer: Arc::new(Mutex::new(writer)),
                clients,
            },
        );
        Ok(shm_name)
    }

    /// Deregisters `client_pid` from the ring of `target_pid`; returns true
    /// when this was the last reference and the ring was torn down.
    pub fn stop_stream(&mut self, client_pid: u32, target_pid: u32) -> bool {
        let Some(entry) = self.streams.get_mut(&target_pid) else {
            return false;
        };
        entry.clients.remove(&client_pid);
        if entry.clients.is_empty() {
            self.streams.remove(&target_pid);
            return true;
        }
        false
    }

    pub fn writer(&self, target_pid: u32) -> Option<Arc<Mutex<FrameRingWriter>>> {
        self.streams
            .get(&target_pid)
            .map(|entry| Arc::clone(&entry.writer))
    }
}
