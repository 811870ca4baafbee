// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Control-pipe server.
//!
//! A Unix-domain listener stands in for the Windows message-mode named
//! pipe. The accept loop runs on its own thread; each client session gets
//! a handler thread that decodes length-delimited request messages,
//! dispatches them against the stream manager, and writes the response as
//! a single message. Handler threads poll a shutdown flag between reads so
//! the server can stop while sessions are open.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use std::{fs, io};

use bytes::{Bytes, BytesMut};
use tokio_util::codec::LengthDelimitedCodec;

use presentmon_common::log::{Channel, Level};
use presentmon_common::pmlog;
use presentmon_ipc::pipe::{
    self, Opcode, StartStreamRequest, StartStreamResponse, StatusResponse, StopStreamRequest,
};
use presentmon_ipc::values::PmStatus;

use crate::streams::StreamManager;

const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct PipeServer {
    path: PathBuf,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    sessions: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl PipeServer {
    pub fn start(
        pipe_name: &str,
        streams: Arc<Mutex<StreamManager>>,
        log: Arc<Channel>,
    ) -> io::Result<Self> {
        let path = PathBuf::from(pipe_name);
        // a previous service instance may have left its socket behind
        let _ = fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let sessions = Arc::new(Mutex::new(Vec::new()));
        let accept_shutdown = Arc::clone(&shutdown);
        let accept_sessions = Arc::clone(&sessions);
        let accept_thread = std::thread::Builder::new()
            .name("pm-pipe-server".into())
            .spawn(move || accept_loop(listener, streams, log, accept_shutdown, accept_sessions))?;

        Ok(Self {
            path,
            shutdown,
            accept_thread: Some(accept_thread),
            sessions,
        })
    }
}

impl Drop for PipeServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }
        if let Ok(mut sessions) = self.sessions.lock() {
            for session in sessions.drain(..) {
                let _ = session.join();
            }
        }
        let _ = fs::remove_file(&self.path);
    }
}

fn accept_loop(
    listener: UnixListener,
    streams: Arc<Mutex<StreamManager>>,
    log: Arc<Channel>,
    shutdown: Arc<AtomicBool>,
    sessions: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, _)) => {
                let streams = Arc::clone(&streams);
                let log = Arc::clone(&log);
                let shutdown = Arc::clone(&shutdown);
                let spawned = std::thread::Builder::new()
                    .name("pm-pipe-session".into())
                    .spawn(move || handle_session(stream, streams, log, shutdown));
                match spawned {
                    Ok(handle) => {
                        if let Ok(mut sessions) = sessions.lock() {
                            sessions.push(handle);
                        }
                    }
                    Err(_) => tracing::warn!("failed to spawn control pipe session thread"),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "control pipe accept failed");
                break;
            }
        }
    }
}

fn handle_session(
    mut stream: UnixStream,
    streams: Arc<Mutex<StreamManager>>,
    log: Arc<Channel>,
    shutdown: Arc<AtomicBool>,
) {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(READ_POLL_INTERVAL));
    let mut codec = LengthDelimitedCodec::new();
    let mut buffer = BytesMut::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    while !shutdown.load(Ordering::Acquire) {
        loop {
            match pipe::take_frame(&mut codec, &mut buffer) {
                Ok(Some(frame)) => {
                    let Ok(response) = dispatch(&frame, &streams, &log) else {
                        return;
                    };
                    if stream.write_all(&response).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
        match stream.read(&mut chunk) {
            // client closed its end of the pipe
            Ok(0) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(_) => return,
        }
    }
}

fn dispatch(
    frame: &[u8],
    streams: &Arc<Mutex<StreamManager>>,
    log: &Channel,
) -> io::Result<Bytes> {
    let (header, payload) = pipe::decode_header(frame)?;
    match header.opcode {
        Opcode::StartStream => {
            let request: StartStreamRequest = pipe::decode_payload(payload)?;
            let response = match streams
                .lock()
                .map_err(|_| ())
                .and_then(|mut s| {
                    s.start_stream(header.client_pid, request.target_pid)
                        .map_err(|_| ())
                }) {
                Ok(shm_name) => {
                    pmlog!(log, Level::Info)
                        .note("stream started")
                        .watch("client_pid", &header.client_pid)
                        .watch("target_pid", &request.target_pid);
                    StartStreamResponse {
                        status: PmStatus::Success,
                        shm_name,
                    }
                }
                Err(()) => {
                    pmlog!(log, Level::Error)
                        .note("failed to start stream")
                        .watch("target_pid", &request.target_pid);
                    StartStreamResponse {
                        status: PmStatus::Failure,
                        shm_name: String::new(),
                    }
                }
            };
            pipe::encode_message(header.opcode, header.request_id, header.client_pid, &response)
        }
        Opcode::StopStream => {
            let request: StopStreamRequest = pipe::decode_payload(payload)?;
            let status = match streams.lock() {
                Ok(mut s) => {
                    let torn_down = s.stop_stream(header.client_pid, request.target_pid);
                    pmlog!(log, Level::Info)
                        .note("stream stopped")
                        .watch("target_pid", &request.target_pid)
                        .watch("torn_down", &torn_down);
                    PmStatus::Success
                }
                Err(_) => PmStatus::Failure,
            };
            pipe::encode_message(
                header.opcode,
                header.request_id,
                header.client_pid,
                &StatusResponse { status },
            )
        }
    }
}
