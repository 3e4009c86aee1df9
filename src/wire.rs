//! Framing records for the remote shell transport.
//!
//! A frame is a 4-byte little-endian body length followed by that many bytes
//! of a bincode-serialised record: [`CommandQuery`] travelling towards a
//! shell, [`CommandReply`] travelling back. The transport that actually moves
//! frames (a TCP multiplexer, a test harness) lives outside this crate; what
//! is specified here is the byte layout and the tolerance rules: empty
//! bodies are logged and skipped, undecodable bodies are logged with a debug
//! hash and skipped.

use log::debug;
use log::warn;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Size of the length header.
pub const FRAME_HEADER_LEN: usize = 4;

/// Terminal geometry attached to a query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenData {
    /// Terminal width in cells.
    pub size_x: i32,
    /// Terminal height in cells.
    pub size_y: i32,
}

/// Client-to-shell record: raw input bytes plus optional geometry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandQuery {
    /// Raw input bytes, interpreted as keystrokes.
    pub command: Vec<u8>,
    /// Terminal geometry, when the client wants it applied.
    pub screen: Option<ScreenData>,
}

impl CommandQuery {
    /// Wraps raw input bytes in a query.
    pub fn input(bytes: impl Into<Vec<u8>>) -> Self {
        CommandQuery {
            command: bytes.into(),
            screen: None,
        }
    }
}

/// Requested terminal mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConMode {
    /// Byte-at-a-time input.
    Raw,
    /// Line-buffered input.
    #[default]
    Cooked,
}

/// Shell-to-client record: raw output bytes plus an optional mode change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    /// Raw output bytes.
    pub reply: Vec<u8>,
    /// Terminal mode to apply when `configure` is set.
    pub con_mode: ConMode,
    /// Whether the client should apply `con_mode`.
    pub configure: bool,
}

impl CommandReply {
    /// Wraps output text in a reply.
    pub fn output(text: impl AsRef<str>) -> Self {
        CommandReply {
            reply: text.as_ref().as_bytes().to_vec(),
            ..CommandReply::default()
        }
    }

    /// The reply bytes as (lossy) text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.reply).into_owned()
    }
}

/// Outcome of decoding one frame from the front of a byte buffer.
#[derive(Debug, PartialEq)]
pub enum Frame<T> {
    /// A record, and how many bytes it spanned (header included).
    Message(T, usize),
    /// An empty or undecodable frame was skipped; resume after `consumed`.
    Skipped(usize),
    /// Not enough bytes for a whole frame yet.
    Incomplete,
}

/// Serialises `msg` as one length-prefixed frame.
pub fn encode_frame<T: Serialize>(msg: &T) -> Vec<u8> {
    // bincode only fails on unserialisable types; ours are plain data.
    let body = bincode::serialize(msg).unwrap_or_default();
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Decodes one frame from the front of `buf`.
pub fn decode_frame<T: DeserializeOwned>(buf: &[u8]) -> Frame<T> {
    if buf.len() < FRAME_HEADER_LEN {
        return Frame::Incomplete;
    }
    let body_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if body_len == 0 {
        debug!("skipping empty frame");
        return Frame::Skipped(FRAME_HEADER_LEN);
    }
    let total = FRAME_HEADER_LEN + body_len;
    if buf.len() < total {
        return Frame::Incomplete;
    }
    let body = &buf[FRAME_HEADER_LEN..total];
    match bincode::deserialize(body) {
        Ok(msg) => Frame::Message(msg, total),
        Err(err) => {
            warn!(
                "dropping undecodable frame ({} bytes, hash {:08x}): {err}",
                body_len,
                debug_hash(body)
            );
            Frame::Skipped(total)
        }
    }
}

/// A small FNV-1a fold used only to correlate dropped frames in logs.
fn debug_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn query_round_trip() {
        let query = CommandQuery {
            command: b"echo hi\r".to_vec(),
            screen: Some(ScreenData { size_x: 80, size_y: 24 }),
        };
        let bytes = encode_frame(&query);
        match decode_frame::<CommandQuery>(&bytes) {
            Frame::Message(decoded, consumed) => {
                assert_eq!(decoded, query);
                assert_eq!(consumed, bytes.len());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reply_round_trip() {
        let reply = CommandReply {
            reply: b"ok\n".to_vec(),
            con_mode: ConMode::Raw,
            configure: true,
        };
        let bytes = encode_frame(&reply);
        assert_eq!(
            decode_frame::<CommandReply>(&bytes),
            Frame::Message(reply, bytes.len())
        );
    }

    #[test]
    fn short_buffers_are_incomplete() {
        assert_eq!(decode_frame::<CommandReply>(&[]), Frame::Incomplete);
        assert_eq!(decode_frame::<CommandReply>(&[9, 0]), Frame::Incomplete);
        // Header claims more bytes than present.
        assert_eq!(
            decode_frame::<CommandReply>(&[200, 0, 0, 0, 1, 2]),
            Frame::Incomplete
        );
    }

    #[test]
    fn empty_body_is_skipped() {
        assert_eq!(
            decode_frame::<CommandReply>(&[0, 0, 0, 0, 0xff]),
            Frame::Skipped(FRAME_HEADER_LEN)
        );
    }

    #[test]
    fn garbage_body_is_skipped_whole() {
        let mut bytes = vec![4, 0, 0, 0];
        bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        bytes.extend_from_slice(b"tail");
        match decode_frame::<CommandQuery>(&bytes) {
            // Either outcome must consume exactly the bad frame.
            Frame::Skipped(consumed) => assert_eq!(consumed, 8),
            Frame::Message(_, consumed) => assert_eq!(consumed, 8),
            Frame::Incomplete => panic!("frame was complete"),
        }
    }
}
