//! Frame `<-> bytes` encode/decode and the streaming frame decoder
//! (spec.md §4.1).

use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

use crate::{
    crypto,
    error::{Error, Result},
    frame::{Frame, MAGIC, ProtocolVersion},
};

/// Bytes from `magic` through `payload_len`, before the variable payload.
const HEADER_LEN: usize = 2 + 3 + 4 + 4 + 4 + 2 + 2;
const CRC_LEN: usize = 4;

/// Per-connection key material. One `FrameCodec` is shared by the encoder
/// and decoder of a single `LocalChannel` (or `MqttChannel`), satisfying the
/// invariant in spec.md §3 that both sides agree on `(local_key,
/// connect_nonce, ack_nonce?)` after HELLO.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    local_key: Vec<u8>,
    /// Present once an "L01" HELLO has completed; `(key, iv)`.
    l01_keys: Option<([u8; 16], [u8; 16])>,
}

impl FrameCodec {
    /// A codec that only knows the per-device secret. Usable immediately for
    /// "1.0" (MQTT, legacy local) traffic; `establish_l01` must be called
    /// before any "L01" frame can be encoded or decoded.
    pub fn new(local_key: impl Into<Vec<u8>>) -> Self {
        Self {
            local_key: local_key.into(),
            l01_keys: None,
        }
    }

    /// Record the nonce pair from a completed "L01" HELLO exchange and
    /// derive the fixed key/IV for the rest of the connection's lifetime.
    pub fn establish_l01(&mut self, connect_nonce: u16, ack_nonce: u16) {
        self.l01_keys = Some(crypto::l01_key_iv(&self.local_key, connect_nonce, ack_nonce));
    }

    pub fn has_l01_keys(&self) -> bool {
        self.l01_keys.is_some()
    }

    /// Encrypt `frame.payload` (if any) and serialize to wire bytes.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let ciphertext = if frame.is_control() || frame.payload.is_empty() {
            Vec::new()
        } else {
            match frame.version {
                ProtocolVersion::V1_0 => {
                    let key = crypto::legacy_key(&self.local_key, frame.timestamp);
                    crypto::ecb_encrypt(&key, &frame.payload)
                },
                ProtocolVersion::L01 => {
                    let (key, iv) = self
                        .l01_keys
                        .ok_or_else(|| Error::DecryptFail("L01 keys not established".into()))?;
                    crypto::cbc_encrypt(&key, &iv, &frame.payload)
                },
            }
        };

        if ciphertext.len() > u16::MAX as usize {
            return Err(Error::DecryptFail("encoded payload too large".into()));
        }

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len() + CRC_LEN);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&frame.version.as_bytes());
        out.extend_from_slice(&frame.sequence.to_be_bytes());
        out.extend_from_slice(&frame.random.to_be_bytes());
        out.extend_from_slice(&frame.timestamp.to_be_bytes());
        out.extend_from_slice(&frame.protocol.to_be_bytes());
        out.extend_from_slice(&(ciphertext.len() as u16).to_be_bytes());
        out.extend_from_slice(&ciphertext);
        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&crc.to_be_bytes());
        Ok(out)
    }

    /// Decode a single, complete frame (header + payload + crc) whose total
    /// length has already been validated against `buf.len()` by the caller.
    fn decode_complete(&self, buf: &[u8]) -> Result<Frame> {
        let crc_offset = buf.len() - CRC_LEN;
        let expected = u32::from_be_bytes(buf[crc_offset..].try_into().unwrap());
        let computed = crc32fast::hash(&buf[..crc_offset]);
        if expected != computed {
            return Err(Error::BadCrc { expected, computed });
        }

        let version_bytes: [u8; 3] = buf[2..5].try_into().unwrap();
        let version = ProtocolVersion::from_bytes(version_bytes).ok_or(Error::UnknownVersion(version_bytes))?;
        let sequence = u32::from_be_bytes(buf[5..9].try_into().unwrap());
        let random = u32::from_be_bytes(buf[9..13].try_into().unwrap());
        let timestamp = u32::from_be_bytes(buf[13..17].try_into().unwrap());
        let protocol = u16::from_be_bytes(buf[17..19].try_into().unwrap());
        let payload_len = u16::from_be_bytes(buf[19..21].try_into().unwrap()) as usize;
        let ciphertext = &buf[HEADER_LEN..HEADER_LEN + payload_len];

        let plaintext = if ciphertext.is_empty() {
            Vec::new()
        } else {
            match version {
                ProtocolVersion::V1_0 => {
                    let key = crypto::legacy_key(&self.local_key, timestamp);
                    crypto::ecb_decrypt(&key, ciphertext)?
                },
                ProtocolVersion::L01 => {
                    let (key, iv) = self
                        .l01_keys
                        .ok_or_else(|| Error::DecryptFail("L01 keys not established".into()))?;
                    crypto::cbc_decrypt(&key, &iv, ciphertext)?
                },
            }
        };

        Ok(Frame {
            protocol,
            sequence,
            random,
            timestamp,
            version,
            payload: plaintext,
        })
    }
}

/// Streaming decoder that preserves a residual buffer of unconsumed bytes
/// across calls, so frames arbitrarily split across TCP reads still decode
/// correctly (spec.md §4.1, §8).
pub struct FrameDecoder {
    codec: FrameCodec,
    residual: BytesMut,
}

impl FrameDecoder {
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            residual: BytesMut::new(),
        }
    }

    pub fn codec_mut(&mut self) -> &mut FrameCodec {
        &mut self.codec
    }

    /// Feed newly-received bytes and drain as many complete frames as are
    /// now available. A single call may yield zero, one, or many frames.
    /// Decode failures are returned alongside successes (in arrival order)
    /// rather than silently swallowed, so callers can log them, but the
    /// decoder itself always advances past the offending bytes.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Result<Frame>> {
        self.residual.extend_from_slice(data);
        let mut out = Vec::new();

        loop {
            if self.residual.len() < HEADER_LEN {
                break;
            }

            if self.residual[0..2] != MAGIC {
                match find_magic(&self.residual[1..]) {
                    Some(offset) => {
                        warn!(skipped = offset + 1, "resynchronizing frame decoder on magic");
                        self.residual.advance(offset + 1);
                        continue;
                    },
                    None => {
                        // No magic anywhere in the remaining buffer except
                        // possibly a partial match at the very end; keep
                        // just that tail and drop the rest as garbage.
                        let keep = if self.residual[self.residual.len() - 1] == MAGIC[0] { 1 } else { 0 };
                        let drop_len = self.residual.len() - keep;
                        self.residual.advance(drop_len);
                        break;
                    },
                }
            }

            let payload_len = u16::from_be_bytes([self.residual[19], self.residual[20]]) as usize;
            let total_len = HEADER_LEN + payload_len + CRC_LEN;
            if self.residual.len() < total_len {
                break;
            }

            let frame_bytes = self.residual.split_to(total_len);
            trace!(total_len, "decoding frame candidate");
            match self.codec.decode_complete(&frame_bytes) {
                Ok(frame) => out.push(Ok(frame)),
                Err(e) => {
                    debug!(error = %e, "dropping undecodable frame");
                    out.push(Err(e));
                },
            }
        }

        out
    }
}

fn find_magic(buf: &[u8]) -> Option<usize> {
    buf.windows(MAGIC.len()).position(|w| w == MAGIC)
}
