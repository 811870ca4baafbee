// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Concrete middleware: the session a consumer holds against a running
//! service. Owns the control-pipe connection, the introspection view, and
//! one stream client per tracked process.

use std::collections::HashMap;
use std::io;

use presentmon_ipc::gid;
use presentmon_ipc::intro::api::PM_INTROSPECTION_ROOT;
use presentmon_ipc::intro::free_api_root;
use presentmon_ipc::pipe::{
    Opcode, StartStreamRequest, StartStreamResponse, StatusResponse, StopStreamRequest,
};
use presentmon_ipc::values::PmStatus;

use crate::comms::{CommsError, MiddlewareComms};
use crate::pipe_client::PipeClient;
use crate::query::{self, DynamicQuery, QueryElement, QueryError};
use crate::stream::StreamClient;

#[derive(Debug, thiserror::Error)]
pub enum MiddlewareError {
    #[error("service not found: {0}")]
    Connect(#[source] io::Error),
    #[error(transparent)]
    Comms(#[from] CommsError),
    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Construction-time overrides for the control pipe and introspection
/// segment names.
#[derive(Default, Clone)]
pub struct MiddlewareOptions {
    pub pipe_name: Option<String>,
    pub shm_name: Option<String>,
}

pub struct Middleware {
    pipe: PipeClient,
    comms: MiddlewareComms,
    stream_clients: HashMap<u32, StreamClient>,
}

impl Middleware {
    pub fn new(options: MiddlewareOptions) -> Result<Self, MiddlewareError> {
        let pipe_name = options
            .pipe_name
            .as_deref()
            .unwrap_or(gid::DEFAULT_CONTROL_PIPE_NAME);
        let shm_name = options
            .shm_name
            .as_deref()
            .unwrap_or(gid::DEFAULT_INTROSPECTION_SHM_NAME);
        let pipe = PipeClient::connect(pipe_name).map_err(MiddlewareError::Connect)?;
        let comms = MiddlewareComms::new(shm_name)?;
        Ok(Self {
            pipe,
            comms,
            stream_clients: HashMap::new(),
        })
    }

    /// Clones the introspection catalog for the caller; free with
    /// [`Middleware::free_introspection_root`].
    pub fn introspection_root(&self) -> Result<*mut PM_INTROSPECTION_ROOT, CommsError> {
        self.comms.introspection_root()
    }

    /// # Safety
    /// `root` must come from [`Middleware::introspection_root`] and must
    /// not be used afterwards.
    pub unsafe fn free_introspection_root(root: *mut PM_INTROSPECTION_ROOT) {
        free_api_root(root);
    }

    /// Requests streaming of `target_pid` and opens the returned ring.
    pub fn start_streaming(&mut self, target_pid: u32) -> PmStatus {
        let response: StartStreamResponse = match self
            .pipe
            .call(Opcode::StartStream, &StartStreamRequest { target_pid })
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "start stream call failed");
                return PmStatus::Failure;
            }
        };
        if response.status != PmStatus::Success {
            return response.status;
        }
        if !self.stream_clients.contains_key(&target_pid) {
            match StreamClient::open(&response.shm_name) {
                Ok(client) => {
                    self.stream_clients.insert(target_pid, client);
                }
                Err(e) => {
                    tracing::warn!(error = %e, shm_name = %response.shm_name, "failed to open stream ring");
                    return PmStatus::Failure;
                }
            }
        }
        PmStatus::Success
    }

    /// Stops streaming `target_pid` and drops the local ring view.
    pub fn stop_streaming(&mut self, target_pid: u32) -> PmStatus {
        let response: StatusResponse = match self
            .pipe
            .call(Opcode::StopStream, &StopStreamRequest { target_pid })
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "stop stream call failed");
                return PmStatus::Failure;
            }
        };
        if response.status == PmStatus::Success {
            self.stream_clients.remove(&target_pid);
        }
        response.status
    }

    pub fn stream_client(&self, target_pid: u32) -> Option<&StreamClient> {
        self.stream_clients.get(&target_pid)
    }

    /// Validates `elements` against the catalog and builds a query handle.
    /// Byte offsets are assigned into `elements` in registration order.
    pub fn register_dynamic_query(
        &self,
        elements: &mut [QueryElement],
        process_id: u32,
        window_size_ms: f64,
        metric_offset_ms: f64,
    ) -> Result<Box<DynamicQuery>, MiddlewareError> {
        let query = self.comms.with_root(|segment, root| {
            query::register_dynamic_query(
                segment,
                root,
                elements,
                process_id,
                window_size_ms,
                metric_offset_ms,
            )
        })??;
        Ok(Box::new(query))
    }

    /// Polls a registered query. Absent stream clients and inactive
    /// producers report zero swap chains without error.
    pub fn poll_dynamic_query(
        &self,
        query: &mut DynamicQuery,
        blob: &mut [u8],
        num_swap_chains: &mut u32,
    ) -> Result<(), QueryError> {
        let Some(client) = self.stream_clients.get(&query.process_id()) else {
            *num_swap_chains = 0;
            return Ok(());
        };
        query::poll_dynamic_query(query, client, blob, num_swap_chains)
    }
}
