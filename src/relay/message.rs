use std::fmt::Display;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const SEPARATOR: u8 = b'|';
pub const TERMINATOR: u8 = b'\n';

/// CRC-32 (IEEE) of the raw body bytes.
#[inline]
pub fn checksum(body: &[u8]) -> u32 {
    crc32fast::hash(body)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("missing checksum separator")]
    MissingSeparator,
    #[error("checksum is not lowercase hex: {0:?}")]
    InvalidChecksum(String),
    #[error("checksum mismatch, expected {expected:x} got {found:x}")]
    Mismatch { expected: u32, found: u32 },
}

/// A line framed as `<body>|<crc32 as lowercase hex>`.
///
/// The relay never looks inside the body, it only frames what arrived and
/// forwards it. Once built the frame is immutable and cheap to clone for
/// every recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    frame: Bytes,
    body_len: usize,
}

impl Message {
    /// Frame an inbound body. The body must not carry its line terminator.
    pub fn frame(body: &[u8]) -> Self {
        let crc = format!("{:x}", checksum(body));
        let mut frame = BytesMut::with_capacity(body.len() + 1 + crc.len() + 1);
        frame.put_slice(body);
        frame.put_u8(SEPARATOR);
        frame.put_slice(crc.as_bytes());
        frame.put_u8(TERMINATOR);
        Self { frame: frame.freeze(), body_len: body.len() }
    }

    /// Split an already framed line at its last separator.
    /// The checksum is taken as-is and not recomputed.
    pub fn parse(line: &[u8]) -> Result<(Self, u32), FrameError> {
        let line = strip_terminator(line);
        let at = line.iter()
            .rposition(|b| *b == SEPARATOR)
            .ok_or(FrameError::MissingSeparator)?;

        let raw = &line[at + 1..];
        let crc = parse_hex(raw)
            .ok_or_else(|| FrameError::InvalidChecksum(String::from_utf8_lossy(raw).into_owned()))?;

        let mut frame = BytesMut::with_capacity(line.len() + 1);
        frame.put_slice(line);
        frame.put_u8(TERMINATOR);
        Ok((Self { frame: frame.freeze(), body_len: at }, crc))
    }

    /// Parse and check that the carried checksum matches the body.
    pub fn verify(line: &[u8]) -> Result<Self, FrameError> {
        let (msg, found) = Self::parse(line)?;
        let expected = msg.checksum();
        if expected != found {
            return Err(FrameError::Mismatch { expected, found });
        }
        Ok(msg)
    }

    pub fn body(&self) -> &[u8] {
        &self.frame[..self.body_len]
    }

    pub fn checksum(&self) -> u32 {
        checksum(self.body())
    }

    /// Full wire form, terminator included.
    pub fn as_wire(&self) -> &[u8] {
        &self.frame
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let line = &self.frame[..self.frame.len() - 1];
        write!(f, "{}", String::from_utf8_lossy(line))
    }
}

pub fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_hex(raw: &[u8]) -> Option<u32> {
    if raw.is_empty() || raw.len() > 8 {
        return None;
    }
    if !raw.iter().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    let s = std::str::from_utf8(raw).ok()?;
    u32::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod test {
    use super::{checksum, strip_terminator, FrameError, Message};

    #[test]
    fn checksum_known_value() {
        // CRC-32/ISO-HDLC check value
        assert_eq!(checksum(b"123456789"), 0xcbf43926);
        assert_eq!(checksum(b""), 0);
    }

    #[test]
    fn checksum_is_deterministic() {
        let body = b"LINE 0,0,10,10";
        assert_eq!(checksum(body), checksum(body));
    }

    #[test]
    fn single_bit_flip_changes_checksum() {
        let body = b"COLOR 0xff0000ff".to_vec();
        let base = checksum(&body);
        for byte in 0..body.len() {
            for bit in 0..8 {
                let mut flipped = body.clone();
                flipped[byte] ^= 1 << bit;
                assert_ne!(base, checksum(&flipped), "byte {} bit {}", byte, bit);
            }
        }
    }

    #[test]
    fn frame_appends_hex_checksum() {
        let msg = Message::frame(b"LINE 0,0,10,10");
        let expected = format!("LINE 0,0,10,10|{:x}\n", checksum(b"LINE 0,0,10,10"));
        assert_eq!(msg.as_wire(), expected.as_bytes());
        assert_eq!(msg.body(), b"LINE 0,0,10,10");
        assert_eq!(msg.to_string(), expected.trim_end());
    }

    #[test]
    fn frame_keeps_peer_checksum_in_body() {
        let peer = format!("CLEAR;{}", checksum(b"CLEAR"));
        let msg = Message::frame(peer.as_bytes());
        assert_eq!(msg.body(), peer.as_bytes());
        assert!(Message::verify(msg.as_wire()).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let msg = Message::frame(b"LINE 1,2,3,4");
        let mut wire = msg.as_wire().to_vec();
        wire[5] = b'9';
        match Message::verify(&wire) {
            Err(FrameError::Mismatch { found, .. }) => assert_eq!(found, msg.checksum()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_errors() {
        assert_eq!(Message::parse(b"CLEAR\n"), Err(FrameError::MissingSeparator));
        assert!(matches!(Message::parse(b"CLEAR|xyz"), Err(FrameError::InvalidChecksum(_))));
        assert!(matches!(Message::parse(b"CLEAR|"), Err(FrameError::InvalidChecksum(_))));
        assert!(matches!(Message::parse(b"CLEAR|ABCD"), Err(FrameError::InvalidChecksum(_))));
    }

    #[test]
    fn parse_uses_last_separator() {
        let body = b"COLOR a|b";
        let msg = Message::frame(body);
        let (parsed, crc) = Message::parse(msg.as_wire()).unwrap();
        assert_eq!(parsed.body(), body);
        assert_eq!(crc, checksum(body));
    }

    #[test]
    fn strips_crlf() {
        assert_eq!(strip_terminator(b"CLEAR\r\n"), b"CLEAR");
        assert_eq!(strip_terminator(b"CLEAR\n"), b"CLEAR");
        assert_eq!(strip_terminator(b"CLEAR"), b"CLEAR");
    }
}
