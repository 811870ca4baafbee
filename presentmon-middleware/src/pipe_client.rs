// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Blocking control-pipe client.
//!
//! Connection retries the busy/absent pipe for up to twenty seconds, the
//! way a Windows client would spin on `ERROR_PIPE_BUSY` with
//! `WaitNamedPipe`. Each call writes its request as one message and then
//! reads response chunks into a growing buffer until the codec yields a
//! complete frame; a frame for a different request id is discarded.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::LengthDelimitedCodec;

use presentmon_ipc::pipe::{self, Opcode};

const PIPE_BUSY_TIMEOUT: Duration = Duration::from_secs(20);
const PIPE_RETRY_INTERVAL: Duration = Duration::from_millis(50);

pub struct PipeClient {
    stream: UnixStream,
    client_pid: u32,
    next_request_id: u64,
}

impl PipeClient {
    pub fn connect(pipe_name: &str) -> io::Result<Self> {
        let deadline = Instant::now() + PIPE_BUSY_TIMEOUT;
        let stream = loop {
            match UnixStream::connect(pipe_name) {
                Ok(stream) => break stream,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                    ) =>
                {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "control pipe sessions full",
                        ));
                    }
                    std::thread::sleep(PIPE_RETRY_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        };
        Ok(Self {
            stream,
            client_pid: std::process::id(),
            next_request_id: 0,
        })
    }

    pub fn client_pid(&self) -> u32 {
        self.client_pid
    }

    /// Sends one request and blocks for its response.
    pub fn call<Req, Resp>(&mut self, opcode: Opcode, request: &Req) -> io::Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let message = pipe::encode_message(opcode, request_id, self.client_pid, request)?;
        // the request must go out atomically as a single message
        self.stream.write_all(&message)?;

        let mut codec = LengthDelimitedCodec::new();
        let mut buffer = BytesMut::with_capacity(4096);
        let mut chunk = [0u8; 4096];
        loop {
            while let Some(frame) = pipe::take_frame(&mut codec, &mut buffer)? {
                let (header, response) = pipe::decode_message(&frame)?;
                if header.request_id == request_id {
                    return Ok(response);
                }
                tracing::debug!(
                    request_id = header.request_id,
                    "discarding stale control pipe response"
                );
            }
            match self.stream.read(&mut chunk)? {
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "control pipe closed mid-response",
                    ))
                }
                n => buffer.extend_from_slice(&chunk[..n]),
            }
        }
    }
}
