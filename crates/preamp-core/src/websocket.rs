//! Minimal RFC 6455 WebSocket pieces: handshake key, frame codec, opcode handling.
//!
//! Only what the bridge needs is implemented.  There are no extensions, and
//! fragmented messages are not reassembled: every frame is classified on its
//! own.
//!
//! Frame layout:
//! ```text
//! [FIN|RSV|opcode:1][MASK|len7:1][ext len:0/2/8][mask key:0/4][payload:N]
//! ```
//! Extended lengths are big-endian.  Frames sent by the server are never
//! masked; frames from browsers always are.

use base64::{engine::general_purpose::STANDARD, Engine};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// GUID appended to the client key before hashing (RFC 6455 §1.3).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Default upper bound on a single inbound frame payload.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

/// Computes the `Sec-WebSocket-Accept` value for a client's `Sec-WebSocket-Key`.
///
/// # Examples
///
/// ```rust
/// use preamp_core::websocket::accept_key;
///
/// // Sample handshake from RFC 6455.
/// assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

// ── Opcodes ───────────────────────────────────────────────────────────────────

/// The 4-bit frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Any value RFC 6455 reserves for future use.
    Reserved(u8),
}

impl From<u8> for Opcode {
    fn from(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }
}

impl Opcode {
    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(v) => v & 0x0F,
        }
    }
}

/// One decoded frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload: Vec<u8>,
}

/// Errors returned by [`decode_frame`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes buffered yet; read more and try again.
    #[error("incomplete frame: need at least {needed} bytes, got {available}")]
    Incomplete { needed: usize, available: usize },

    /// The declared payload length exceeds the configured limit.
    #[error("frame payload of {declared} bytes exceeds limit of {limit}")]
    TooLarge { declared: u64, limit: usize },
}

// ── Decode ────────────────────────────────────────────────────────────────────

/// Decodes one frame from the front of `bytes`.
///
/// Returns the frame and the number of bytes it occupied, so a caller reading
/// from a socket can drain exactly that much from its buffer and retry on
/// [`FrameError::Incomplete`].
///
/// # Errors
///
/// - [`FrameError::Incomplete`] when `bytes` holds only part of a frame.
/// - [`FrameError::TooLarge`] when the declared length exceeds `max_payload`.
pub fn decode_frame(bytes: &[u8], max_payload: usize) -> Result<(Frame, usize), FrameError> {
    require(bytes, 2)?;
    let fin = bytes[0] & 0x80 != 0;
    let opcode = Opcode::from(bytes[0]);
    let masked = bytes[1] & 0x80 != 0;
    let len7 = bytes[1] & 0x7F;

    let mut offset = 2;
    let declared: u64 = match len7 {
        126 => {
            require(bytes, offset + 2)?;
            let len = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            offset += 2;
            u64::from(len)
        }
        127 => {
            require(bytes, offset + 8)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[offset..offset + 8]);
            offset += 8;
            u64::from_be_bytes(raw)
        }
        n => u64::from(n),
    };

    let payload_len = usize::try_from(declared)
        .ok()
        .filter(|len| *len <= max_payload)
        .ok_or(FrameError::TooLarge {
            declared,
            limit: max_payload,
        })?;

    let mask = if masked {
        require(bytes, offset + 4)?;
        let key = [
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ];
        offset += 4;
        Some(key)
    } else {
        None
    };

    let end = offset + payload_len;
    require(bytes, end)?;
    let mut payload = bytes[offset..end].to_vec();
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok((
        Frame {
            fin,
            opcode,
            masked,
            payload,
        },
        end,
    ))
}

fn require(bytes: &[u8], needed: usize) -> Result<(), FrameError> {
    if bytes.len() < needed {
        Err(FrameError::Incomplete {
            needed,
            available: bytes.len(),
        })
    } else {
        Ok(())
    }
}

/// XORs `payload[i]` with `key[i % 4]` in place.  Masking and unmasking are
/// the same operation.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

// ── Encode ────────────────────────────────────────────────────────────────────

/// Encodes an unmasked, final server-to-client frame.
pub fn encode_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 10);
    buf.push(0x80 | opcode.as_u8());
    push_length(&mut buf, 0, payload.len());
    buf.extend_from_slice(payload);
    buf
}

/// Encodes a masked client-to-server frame, as a browser would send it.
pub fn encode_client_frame(opcode: Opcode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 14);
    buf.push(0x80 | opcode.as_u8());
    push_length(&mut buf, 0x80, payload.len());
    buf.extend_from_slice(&mask);
    let start = buf.len();
    buf.extend_from_slice(payload);
    apply_mask(&mut buf[start..], mask);
    buf
}

fn push_length(buf: &mut Vec<u8>, mask_bit: u8, len: usize) {
    if len < 126 {
        buf.push(mask_bit | len as u8);
    } else if len < 65_536 {
        buf.push(mask_bit | 126);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(mask_bit | 127);
        buf.extend_from_slice(&(len as u64).to_be_bytes());
    }
}

/// Convenience wrapper for a text frame.
pub fn text_frame(text: &str) -> Vec<u8> {
    encode_frame(Opcode::Text, text.as_bytes())
}

/// Close frame carrying an optional status code.
pub fn close_frame(code: Option<u16>) -> Vec<u8> {
    match code {
        Some(code) => encode_frame(Opcode::Close, &code.to_be_bytes()),
        None => encode_frame(Opcode::Close, &[]),
    }
}

// ── Classification ────────────────────────────────────────────────────────────

/// What a session should do with a decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A text message.  Invalid UTF-8 yields an empty string.
    Text(String),
    /// The peer is closing, with its status code when one was sent.
    Close(Option<u16>),
    /// Must be answered with a pong echoing this payload.
    Ping(Vec<u8>),
    /// Binary, pong, continuation or reserved opcodes.
    Ignored(Opcode),
}

/// Maps a frame onto the action the session loop takes.
pub fn classify(frame: Frame) -> FrameEvent {
    match frame.opcode {
        Opcode::Text => FrameEvent::Text(String::from_utf8(frame.payload).unwrap_or_default()),
        Opcode::Close => {
            let code = (frame.payload.len() >= 2)
                .then(|| u16::from_be_bytes([frame.payload[0], frame.payload[1]]));
            FrameEvent::Close(code)
        }
        Opcode::Ping => FrameEvent::Ping(frame.payload),
        other => FrameEvent::Ignored(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASK: [u8; 4] = [0x37, 0xFA, 0x21, 0x3D];

    #[test]
    fn test_accept_key_matches_rfc_sample() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_decode_rfc_masked_hello() {
        // Arrange: "Hello" example from RFC 6455 §5.7
        let bytes = [0x81, 0x85, 0x37, 0xFA, 0x21, 0x3D, 0x7F, 0x9F, 0x4D, 0x51, 0x58];

        // Act
        let (frame, used) = decode_frame(&bytes, DEFAULT_MAX_PAYLOAD).unwrap();

        // Assert
        assert!(frame.fin);
        assert!(frame.masked);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.payload, b"Hello");
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_encode_uses_short_length_below_126() {
        let bytes = encode_frame(Opcode::Text, b"Hello");
        assert_eq!(bytes, vec![0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_encode_uses_16_bit_length() {
        let bytes = encode_frame(Opcode::Binary, &[0u8; 126]);
        assert_eq!(&bytes[..4], &[0x82, 126, 0x00, 126]);
        assert_eq!(bytes.len(), 4 + 126);
    }

    #[test]
    fn test_encode_uses_64_bit_length() {
        let bytes = encode_frame(Opcode::Text, &vec![b'a'; 65_536]);
        assert_eq!(bytes[1], 127);
        assert_eq!(&bytes[2..10], &65_536u64.to_be_bytes());
    }

    #[test]
    fn test_decode_reports_incomplete_header() {
        let result = decode_frame(&[0x81], DEFAULT_MAX_PAYLOAD);
        assert_eq!(
            result,
            Err(FrameError::Incomplete {
                needed: 2,
                available: 1
            })
        );
    }

    #[test]
    fn test_decode_reports_incomplete_payload() {
        let bytes = encode_client_frame(Opcode::Text, b"partial", MASK);
        let result = decode_frame(&bytes[..bytes.len() - 2], DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::Incomplete { .. })));
    }

    #[test]
    fn test_decode_rejects_oversized_frame_before_payload_arrives() {
        // Arrange: header declares 1 MiB but no payload follows
        let mut bytes = vec![0x82, 127];
        bytes.extend_from_slice(&(1u64 << 20).to_be_bytes());

        // Act
        let result = decode_frame(&bytes, 1024);

        // Assert
        assert_eq!(
            result,
            Err(FrameError::TooLarge {
                declared: 1 << 20,
                limit: 1024
            })
        );
    }

    #[test]
    fn test_decode_consumes_only_first_frame() {
        let mut bytes = encode_client_frame(Opcode::Text, b"one", MASK);
        let first_len = bytes.len();
        bytes.extend(encode_client_frame(Opcode::Text, b"two", MASK));

        let (frame, used) = decode_frame(&bytes, DEFAULT_MAX_PAYLOAD).unwrap();
        let (second, _) = decode_frame(&bytes[used..], DEFAULT_MAX_PAYLOAD).unwrap();

        assert_eq!(used, first_len);
        assert_eq!(frame.payload, b"one");
        assert_eq!(second.payload, b"two");
    }

    #[test]
    fn test_classify_invalid_utf8_text_is_empty() {
        let frame = Frame {
            fin: true,
            opcode: Opcode::Text,
            masked: true,
            payload: vec![0xFF, 0xFE],
        };
        assert_eq!(classify(frame), FrameEvent::Text(String::new()));
    }

    #[test]
    fn test_classify_close_with_status_code() {
        let bytes = encode_client_frame(Opcode::Close, &1001u16.to_be_bytes(), MASK);
        let (frame, _) = decode_frame(&bytes, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(classify(frame), FrameEvent::Close(Some(1001)));
    }

    #[test]
    fn test_classify_close_without_status_code() {
        let (frame, _) = decode_frame(&close_frame(None), DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(classify(frame), FrameEvent::Close(None));
    }

    #[test]
    fn test_classify_ping_keeps_payload() {
        let bytes = encode_client_frame(Opcode::Ping, b"beat", MASK);
        let (frame, _) = decode_frame(&bytes, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(classify(frame), FrameEvent::Ping(b"beat".to_vec()));
    }

    #[test]
    fn test_classify_binary_and_reserved_are_ignored() {
        let binary = Frame {
            fin: true,
            opcode: Opcode::Binary,
            masked: false,
            payload: vec![1, 2],
        };
        let reserved = Frame {
            opcode: Opcode::from(0x3),
            ..binary.clone()
        };
        assert_eq!(classify(binary), FrameEvent::Ignored(Opcode::Binary));
        assert_eq!(classify(reserved), FrameEvent::Ignored(Opcode::Reserved(3)));
    }

    #[test]
    fn test_opcode_round_trips_through_u8() {
        for value in 0u8..16 {
            assert_eq!(Opcode::from(value).as_u8(), value);
        }
    }
}
