//! Sync-byte framing for the control node serial link.
//!
//! Every packet on the wire is emitted as:
//!
//!   `<0x80 sync><u8 length><payload>`
//!
//! The decoder is incremental: feed it arbitrary chunks and pull whole
//! payloads out. Garbage before a sync byte (boot chatter, a frame cut in
//! half by a reset) is skipped.
use bytes::{Buf, Bytes, BytesMut};

use crate::error::{GatewayError, Result};

pub const SYNC_BYTE: u8 = 0x80;

/// Largest payload a single length byte can describe.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

const HEADER_LEN: usize = 2;

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    skipped: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            skipped: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete payload, or `None` until more bytes arrive.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            if self.buf.is_empty() {
                return None;
            }
            if self.buf[0] != SYNC_BYTE {
                let drop_len = self
                    .buf
                    .iter()
                    .position(|&b| b == SYNC_BYTE)
                    .unwrap_or(self.buf.len());
                self.buf.advance(drop_len);
                self.skipped += drop_len as u64;
                continue;
            }
            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let len = self.buf[1] as usize;
            if self.buf.len() < HEADER_LEN + len {
                return None;
            }
            self.buf.advance(HEADER_LEN);
            return Some(self.buf.split_to(len).freeze());
        }
    }

    /// Bytes discarded while hunting for a sync byte.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Wrap `payload` in a frame ready to be written to the control node.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(GatewayError::Frame(format!(
            "payload of {} bytes exceeds {}",
            payload.len(),
            MAX_PAYLOAD
        )));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(SYNC_BYTE);
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
    Ok(out)
}
