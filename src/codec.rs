//! Length-prefixed message framing (component E, spec §4.E/§6).
//!
//! Grounded on `calf::pipe_message_head` / `calf::pipe_message` /
//! `calf::pipe_message_service::receive_completed` in
//! `examples/original_source/include/calf/platform/windows/system_services.hpp`,
//! which walks the receive buffer eight bytes at a time, slices out
//! whole frames, and retains the remainder — the same algorithm spec §4.E
//! specifies formally and this module implements directly over
//! [`crate::overlapped::ReadState`].

use crate::error::{Error, Result};

/// Size of the on-wire header: `id: u32` + `size: u32`, little-endian.
pub const HEADER_LEN: usize = 8;

/// A decoded frame: its header fields plus the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(id: u32, payload: impl Into<Vec<u8>>) -> Message {
        Message {
            id,
            payload: payload.into(),
        }
    }

    /// Writes the 8-byte header followed by the payload verbatim (spec
    /// §4.E producer side).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Convenience wrapper around [`Message::encode`], named to match spec
/// §4.E's `encode(id, payload) -> Message` entry point.
pub fn encode(id: u32, payload: impl Into<Vec<u8>>) -> Vec<u8> {
    Message::new(id, payload).encode()
}

/// Runs one decode pass over `buffer[..valid_len]`, per spec §4.E's
/// algorithm. Returns the whole messages found and the number of bytes
/// consumed from the front of the buffer (the caller retains the
/// remainder via [`crate::overlapped::ReadState::retain_from`]).
///
/// A header advertising `size > max_message_size` is a protocol error:
/// decoding stops immediately and no further messages from this pass (not
/// even ones that appeared earlier in the buffer before the bad header)
/// are silently dropped — messages already pushed onto `out` remain
/// valid, since they were fully framed before the malformed header was
/// reached.
pub fn decode(buffer: &[u8], valid_len: usize, max_message_size: usize, out: &mut Vec<Message>) -> Result<usize> {
    let b = &buffer[..valid_len];
    let mut cursor = 0usize;
    while b.len() - cursor >= HEADER_LEN {
        let id = u32::from_le_bytes(b[cursor..cursor + 4].try_into().unwrap());
        let size = u32::from_le_bytes(b[cursor + 4..cursor + 8].try_into().unwrap()) as usize;
        if size > max_message_size {
            return Err(Error::ProtocolError {
                size: size as u64,
                limit: max_message_size as u64,
            });
        }
        if b.len() - cursor < HEADER_LEN + size {
            break;
        }
        let payload = b[cursor + HEADER_LEN..cursor + HEADER_LEN + size].to_vec();
        out.push(Message { id, payload });
        cursor += HEADER_LEN + size;
    }
    Ok(cursor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_single_message() {
        let encoded = encode(7, b"ping".to_vec());
        let mut out = Vec::new();
        let consumed = decode(&encoded, encoded.len(), 128 * 1024 * 1024, &mut out).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(out, vec![Message::new(7, b"ping".to_vec())]);
    }

    #[test]
    fn empty_payload_round_trips() {
        let encoded = encode(1, Vec::new());
        assert_eq!(encoded.len(), HEADER_LEN);
        let mut out = Vec::new();
        decode(&encoded, encoded.len(), 4096, &mut out).unwrap();
        assert_eq!(out, vec![Message::new(1, Vec::new())]);
    }

    #[test]
    fn incomplete_frame_yields_nothing_and_consumes_nothing() {
        let encoded = encode(2, b"hello world".to_vec());
        let partial = &encoded[..encoded.len() - 3];
        let mut out = Vec::new();
        let consumed = decode(partial, partial.len(), 4096, &mut out).unwrap();
        assert_eq!(consumed, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn multiple_messages_in_one_buffer() {
        let mut buf = Vec::new();
        buf.extend(encode(1, b"aaa".to_vec()));
        buf.extend(encode(2, b"bb".to_vec()));
        buf.extend(encode(3, Vec::new()));
        let mut out = Vec::new();
        let consumed = decode(&buf, buf.len(), 4096, &mut out).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(
            out,
            vec![
                Message::new(1, b"aaa".to_vec()),
                Message::new(2, b"bb".to_vec()),
                Message::new(3, Vec::new()),
            ]
        );
    }

    #[test]
    fn oversize_header_is_protocol_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&42u32.to_le_bytes());
        buf.extend_from_slice(&((128 * 1024 * 1024 + 1) as u32).to_le_bytes());
        let mut out = Vec::new();
        let err = decode(&buf, buf.len(), 128 * 1024 * 1024, &mut out).unwrap_err();
        assert!(matches!(err, Error::ProtocolError { .. }));
        assert!(out.is_empty());
    }

    #[test]
    fn byte_at_a_time_reframing() {
        let mut messages = Vec::new();
        messages.extend(encode(10, b"hello".to_vec()));
        messages.extend(encode(20, b"a bit longer payload here".to_vec()));
        messages.extend(encode(30, Vec::new()));

        let mut buffer = Vec::new();
        let mut offset = 0usize;
        let mut decoded = Vec::new();
        for &byte in &messages {
            buffer.push(byte);
            offset += 1;
            let consumed = decode(&buffer, offset, 4096, &mut decoded).unwrap();
            if consumed > 0 {
                buffer.drain(0..consumed);
                offset -= consumed;
            }
        }
        assert_eq!(
            decoded,
            vec![
                Message::new(10, b"hello".to_vec()),
                Message::new(20, b"a bit longer payload here".to_vec()),
                Message::new(30, Vec::new()),
            ]
        );
        assert_eq!(offset, 0);
    }

    #[test]
    fn split_reads_4100_byte_payload_in_17_chunks() {
        let payload = vec![0xABu8; 4100];
        let encoded = encode(99, payload.clone());
        assert_eq!(encoded.len(), 4108);

        // 17 chunk sizes summing to 4108, deliberately uneven.
        let mut sizes = vec![1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144, 233, 377, 610, 987, 1000];
        let used: usize = sizes.iter().sum();
        sizes.push(4108 - used);
        assert_eq!(sizes.len(), 17);
        assert_eq!(sizes.iter().sum::<usize>(), 4108);

        let mut buffer = Vec::new();
        let mut offset = 0usize;
        let mut decoded = Vec::new();
        let mut pos = 0usize;
        for size in sizes {
            buffer.extend_from_slice(&encoded[pos..pos + size]);
            offset += size;
            pos += size;
            let consumed = decode(&buffer, offset, 128 * 1024 * 1024, &mut decoded).unwrap();
            if consumed > 0 {
                buffer.drain(0..consumed);
                offset -= consumed;
            }
        }
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, 99);
        assert_eq!(decoded[0].payload, payload);
    }
}
