//! The subset of the Redis Serialization Protocol the bus needs.
//!
//! Replies are one of five types, each introduced by a prefix byte and
//! terminated by `\r\n`:
//!
//! ```text
//! +OK\r\n                              simple string
//! -ERR unknown command\r\n             error
//! :1\r\n                               integer
//! $5\r\nhello\r\n                      bulk string ($-1 is nil)
//! *3\r\n$7\r\nmessage\r\n...           array of replies (*-1 is nil)
//! ```
//!
//! Commands are always sent as arrays of bulk strings.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::{BusError, Result};

/// Largest bulk string Redis itself accepts.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// A decoded reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RespValue {
    /// `+...`
    Simple(String),
    /// `-...`
    Error(String),
    /// `:...`
    Integer(i64),
    /// `$...`, `None` for nil.
    Bulk(Option<Bytes>),
    /// `*...`, `None` for nil.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Bulk string contents, if this is a non-nil bulk string.
    pub fn as_bulk(&self) -> Option<&[u8]> {
        match self {
            Self::Bulk(Some(bytes)) => Some(bytes),
            _ => None,
        }
    }
}

/// A command: an array of bulk string arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Start a command with its name.
    pub fn new(name: &'static str) -> Self {
        Self {
            args: vec![Bytes::from_static(name.as_bytes())],
        }
    }

    /// Append an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Command name.
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }
}

/// Framing codec for a Redis connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = BusError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RespValue>> {
        match parse(src, 0)? {
            Some((value, end)) => {
                src.advance(end);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Command> for RespCodec {
    type Error = BusError;

    fn encode(&mut self, cmd: Command, dst: &mut BytesMut) -> Result<()> {
        dst.put_u8(b'*');
        dst.put_slice(cmd.args.len().to_string().as_bytes());
        dst.put_slice(b"\r\n");
        for arg in &cmd.args {
            dst.put_u8(b'$');
            dst.put_slice(arg.len().to_string().as_bytes());
            dst.put_slice(b"\r\n");
            dst.put_slice(arg);
            dst.put_slice(b"\r\n");
        }
        Ok(())
    }
}

/// Parse one value starting at `pos`. Returns the value and the offset just
/// past it, or `None` when more input is needed.
fn parse(buf: &[u8], pos: usize) -> Result<Option<(RespValue, usize)>> {
    let Some((line, next)) = read_line(buf, pos)? else {
        return Ok(None);
    };
    let (prefix, body) = (line[0], &line[1..]);

    match prefix {
        b'+' => Ok(Some((RespValue::Simple(utf8(body)?), next))),
        b'-' => Ok(Some((RespValue::Error(utf8(body)?), next))),
        b':' => Ok(Some((RespValue::Integer(integer(body)?), next))),
        b'$' => {
            let len = integer(body)?;
            if len < 0 {
                return Ok(Some((RespValue::Bulk(None), next)));
            }
            let len = usize::try_from(len).map_err(|_| protocol("bulk length overflow"))?;
            if len > MAX_BULK_LEN {
                return Err(protocol("bulk string too large"));
            }
            let end = next + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(protocol("bulk string not terminated by CRLF"));
            }
            let data = Bytes::copy_from_slice(&buf[next..end]);
            Ok(Some((RespValue::Bulk(Some(data)), end + 2)))
        }
        b'*' => {
            let count = integer(body)?;
            if count < 0 {
                return Ok(Some((RespValue::Array(None), next)));
            }
            let count = usize::try_from(count).map_err(|_| protocol("array length overflow"))?;
            let mut items = Vec::with_capacity(count.min(64));
            let mut cursor = next;
            for _ in 0..count {
                let Some((item, after)) = parse(buf, cursor)? else {
                    return Ok(None);
                };
                items.push(item);
                cursor = after;
            }
            Ok(Some((RespValue::Array(Some(items)), cursor)))
        }
        other => Err(BusError::Protocol(format!(
            "unexpected reply prefix {:?}",
            char::from(other)
        ))),
    }
}

/// A non-empty line starting at `pos`, without its CRLF, and the offset of
/// the following line.
fn read_line(buf: &[u8], pos: usize) -> Result<Option<(&[u8], usize)>> {
    let Some(rest) = buf.get(pos..) else {
        return Ok(None);
    };
    let Some(cr) = rest.windows(2).position(|w| w == b"\r\n") else {
        return Ok(None);
    };
    if cr == 0 {
        return Err(protocol("empty reply line"));
    }
    Ok(Some((&rest[..cr], pos + cr + 2)))
}

fn integer(digits: &[u8]) -> Result<i64> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| protocol("invalid integer"))
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| protocol("reply line is not UTF-8"))
}

fn protocol(msg: &str) -> BusError {
    BusError::Protocol(msg.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn decode_all(input: &[u8]) -> (Vec<RespValue>, BytesMut) {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(value) = RespCodec.decode(&mut buf).unwrap() {
            out.push(value);
        }
        (out, buf)
    }

    fn bulk(s: &str) -> RespValue {
        RespValue::Bulk(Some(Bytes::copy_from_slice(s.as_bytes())))
    }

    #[test]
    fn simple_error_integer() {
        let (values, rest) = decode_all(b"+PONG\r\n-NOAUTH Authentication required.\r\n:3\r\n");
        assert_eq!(
            values,
            vec![
                RespValue::Simple("PONG".into()),
                RespValue::Error("NOAUTH Authentication required.".into()),
                RespValue::Integer(3),
            ]
        );
        assert!(rest.is_empty());
    }

    #[test]
    fn pubsub_message_frame() {
        let frame = b"*3\r\n$7\r\nmessage\r\n$9\r\nbroadcast\r\n$13\r\n{\"type\":\"x\"}\n\r\n";
        let (values, _) = decode_all(frame);
        assert_eq!(
            values,
            vec![RespValue::Array(Some(vec![
                bulk("message"),
                bulk("broadcast"),
                bulk("{\"type\":\"x\"}\n"),
            ]))]
        );
    }

    #[test]
    fn bulk_may_contain_crlf() {
        let (values, _) = decode_all(b"$4\r\na\r\nb\r\n");
        assert_eq!(values, vec![bulk("a\r\nb")]);
    }

    #[test]
    fn nil_values() {
        let (values, _) = decode_all(b"$-1\r\n*-1\r\n");
        assert_eq!(values, vec![RespValue::Bulk(None), RespValue::Array(None)]);
    }

    #[test]
    fn partial_input_waits_without_consuming() {
        let full = b"*3\r\n$9\r\nsubscribe\r\n$9\r\nbroadcast\r\n:1\r\n";
        for split in 1..full.len() {
            let mut buf = BytesMut::from(&full[..split]);
            assert!(RespCodec.decode(&mut buf).unwrap().is_none(), "split at {split}");
            assert_eq!(buf.len(), split);
            buf.extend_from_slice(&full[split..]);
            assert!(RespCodec.decode(&mut buf).unwrap().is_some());
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn invalid_prefix_is_protocol_error() {
        let mut buf = BytesMut::from(&b"HTTP/1.1 400\r\n"[..]);
        assert_matches!(RespCodec.decode(&mut buf), Err(BusError::Protocol(_)));
    }

    #[test]
    fn bad_bulk_terminator() {
        let mut buf = BytesMut::from(&b"$2\r\nabXY"[..]);
        assert_matches!(RespCodec.decode(&mut buf), Err(BusError::Protocol(_)));
    }

    #[test]
    fn encode_command() {
        let mut dst = BytesMut::new();
        let cmd = Command::new("PUBLISH").arg("broadcast").arg("hi");
        assert_eq!(cmd.name(), b"PUBLISH");
        RespCodec.encode(cmd, &mut dst).unwrap();
        assert_eq!(
            &dst[..],
            b"*3\r\n$7\r\nPUBLISH\r\n$9\r\nbroadcast\r\n$2\r\nhi\r\n"
        );
    }
}
