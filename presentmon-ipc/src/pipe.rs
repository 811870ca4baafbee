// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Control-pipe wire protocol.
//!
//! Every request and response is one length-delimited message: a fixed
//! header `{opcode, request id, client pid, payload length}` followed by a
//! bincode payload. Framing uses `LengthDelimitedCodec` driven manually
//! over a `BytesMut`, so the same codec serves the blocking client and the
//! service's connection loop without an async runtime.

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::values::PmStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    StartStream,
    StopStream,
}

/// Fixed message header; `payload_len` is the byte length of the encoded
/// payload that follows it inside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub opcode: Opcode,
    pub request_id: u64,
    pub client_pid: u32,
    pub payload_len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartStreamRequest {
    pub target_pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopStreamRequest {
    pub target_pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartStreamResponse {
    pub status: PmStatus,
    /// Name of the negotiated frame-ring segment; empty on failure.
    pub shm_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: PmStatus,
}

fn to_io(err: bincode::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Encodes one message into a framed byte buffer ready for a single write.
pub fn encode_message<P: Serialize>(
    opcode: Opcode,
    request_id: u64,
    client_pid: u32,
    payload: &P,
) -> io::Result<Bytes> {
    let payload = bincode::serialize(payload).map_err(to_io)?;
    let header = MessageHeader {
        opcode,
        request_id,
        client_pid,
        payload_len: payload.len() as u32,
    };
    let mut message = bincode::serialize(&header).map_err(to_io)?;
    message.extend_from_slice(&payload);
    let mut framed = BytesMut::new();
    LengthDelimitedCodec::new().encode(Bytes::from(message), &mut framed)?;
    Ok(framed.freeze())
}

/// Decodes the header and payload out of one complete frame.
pub fn decode_message<P: DeserializeOwned>(frame: &[u8]) -> io::Result<(MessageHeader, P)> {
    let mut cursor = io::Cursor::new(frame);
    let header: MessageHeader = bincode::deserialize_from(&mut cursor).map_err(to_io)?;
    let remaining = frame.len() as u64 - cursor.position();
    if remaining != header.payload_len as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "message payload length mismatch",
        ));
    }
    let payload = bincode::deserialize_from(&mut cursor).map_err(to_io)?;
    Ok((header, payload))
}

/// Decodes the header alone, leaving payload interpretation to the opcode
/// dispatch.
pub fn decode_header(frame: &[u8]) -> io::Result<(MessageHeader, &[u8])> {
    let mut cursor = io::Cursor::new(frame);
    let header: MessageHeader = bincode::deserialize_from(&mut cursor).map_err(to_io)?;
    let start = cursor.position() as usize;
    Ok((header, &frame[start..]))
}

pub fn decode_payload<P: DeserializeOwned>(payload: &[u8]) -> io::Result<P> {
    bincode::deserialize(payload).map_err(to_io)
}

/// Pulls the next complete frame out of `buffer`, or `None` when more data
/// is pending.
pub fn take_frame(
    codec: &mut LengthDelimitedCodec,
    buffer: &mut BytesMut,
) -> io::Result<Option<BytesMut>> {
    codec.decode(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn start_stream_round_trips() {
        let request = StartStreamRequest { target_pid: 42 };
        let encoded = encode_message(Opcode::StartStream, 7, 1234, &request).unwrap();

        let mut codec = LengthDelimitedCodec::new();
        let mut buffer = BytesMut::from(&encoded[..]);
        let frame = take_frame(&mut codec, &mut buffer).unwrap().unwrap();
        let (header, decoded): (_, StartStreamRequest) = decode_message(&frame).unwrap();
        assert_eq!(header.opcode, Opcode::StartStream);
        assert_eq!(header.request_id, 7);
        assert_eq!(header.client_pid, 1234);
        assert_eq!(decoded, request);

        // encode → decode → re-encode is byte-identical
        let reencoded =
            encode_message(header.opcode, header.request_id, header.client_pid, &decoded).unwrap();
        assert_eq!(&encoded[..], &reencoded[..]);
    }

    #[test]
    fn partial_frames_report_more_data_pending() {
        let encoded =
            encode_message(Opcode::StopStream, 1, 2, &StopStreamRequest { target_pid: 9 }).unwrap();
        let mut codec = LengthDelimitedCodec::new();
        let mut buffer = BytesMut::from(&encoded[..encoded.len() - 3]);
        assert!(take_frame(&mut codec, &mut buffer).unwrap().is_none());
        buffer.extend_from_slice(&encoded[encoded.len() - 3..]);
        assert!(take_frame(&mut codec, &mut buffer).unwrap().is_some());
    }

    #[test]
    fn corrupt_payload_length_is_rejected() {
        let request = StartStreamRequest { target_pid: 5 };
        let encoded = encode_message(Opcode::StartStream, 1, 1, &request).unwrap();
        let mut codec = LengthDelimitedCodec::new();
        let mut buffer = BytesMut::from(&encoded[..]);
        let mut frame = take_frame(&mut codec, &mut buffer).unwrap().unwrap();
        // truncating the payload desynchronizes it from the header
        let truncated = frame.len() - 1;
        frame.truncate(truncated);
        assert!(decode_message::<StartStreamRequest>(&frame).is_err());
    }

    #[test]
    fn status_responses_carry_segment_names() {
        let response = StartStreamResponse {
            status: PmStatus::Success,
            shm_name: "presentmon-2-frames-42".into(),
        };
        let encoded = encode_message(Opcode::StartStream, 3, 42, &response).unwrap();
        let mut codec = LengthDelimitedCodec::new();
        let mut buffer = BytesMut::from(&encoded[..]);
        let frame = take_frame(&mut codec, &mut buffer).unwrap().unwrap();
        let (_, decoded): (_, StartStreamResponse) = decode_message(&frame).unwrap();
        assert_eq!(decoded, response);
    }
}
