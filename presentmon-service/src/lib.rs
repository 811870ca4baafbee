// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Service side of the PresentMon core.
//!
//! On construction the service publishes the introspection catalog into a
//! named shared-memory segment, stands up the control-pipe server, and
//! manages one frame ring per tracked process. The ETW-facing producer is
//! an external collaborator: it obtains a ring writer from
//! [`PresentMonService::frame_writer`] and pushes frame records into it.

pub mod comms;
pub mod server;
pub mod streams;

use std::io;
use std::sync::{Arc, Mutex};

use presentmon_common::log::{Channel, Component, IdentificationTable, StderrDriver};
use presentmon_ipc::gid;
use presentmon_ipc::ring::FrameRingWriter;
use presentmon_ipc::shm::SegmentError;

use comms::ServiceComms;
use server::PipeServer;
use streams::StreamManager;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to publish introspection segment: {0}")]
    Segment(#[from] SegmentError),
    #[error("control pipe failure: {0}")]
    Pipe(#[from] io::Error),
}

/// Construction-time overrides; everything else comes from the identifier
/// module defaults.
#[derive(Default, Clone)]
pub struct ServiceOptions {
    pub pipe_name: Option<String>,
    pub shm_name: Option<String>,
    pub ring_entries: Option<u64>,
}

pub struct PresentMonService {
    // declared first: the server joins its threads before anything else
    // is torn down
    _server: PipeServer,
    comms: ServiceComms,
    streams: Arc<Mutex<StreamManager>>,
    _log: Arc<Channel>,
}

impl PresentMonService {
    pub fn new(options: ServiceOptions) -> Result<Self, ServiceError> {
        let ident = IdentificationTable::new();
        let log = Arc::new(Channel::new(vec![
            Component::object(ident.clone()),
            Component::driver(StderrDriver::with_identification(ident)),
        ]));

        let shm_name = options
            .shm_name
            .as_deref()
            .unwrap_or(gid::DEFAULT_INTROSPECTION_SHM_NAME)
            .to_string();
        let pipe_name = options
            .pipe_name
            .as_deref()
            .unwrap_or(gid::DEFAULT_CONTROL_PIPE_NAME)
            .to_string();

        let comms = ServiceComms::new(&shm_name)?;
        let streams = Arc::new(Mutex::new(StreamManager::new(
            shm_name,
            options.ring_entries.unwrap_or(gid::DEFAULT_RING_ENTRIES),
        )));
        let server = PipeServer::start(&pipe_name, Arc::clone(&streams), Arc::clone(&log))?;

        Ok(Self {
            comms,
            streams,
            _server: server,
            _log: log,
        })
    }

    pub fn comms(&self) -> &ServiceComms {
        &self.comms
    }

    /// Ring writer for a tracked process, registered by a `StartStream`
    /// request. The producer pushes frame records through this handle.
    pub fn frame_writer(&self, target_pid: u32) -> Option<Arc<Mutex<FrameRingWriter>>> {
        self.streams.lock().ok()?.writer(target_pid)
    }
}
