//! # RESP2 Request Parsing and Reply Encoding
//!
//! Purpose: Split a connection's byte stream into command argument vectors
//! and encode replies, server side.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: A partial frame leaves the buffer untouched and
//!    reports `Ok(None)` until more bytes arrive.
//! 2. **Binary-Safe**: Arguments are raw bytes; nothing assumes UTF-8.

use bytes::{Buf, BytesMut};

/// Largest accepted bulk argument, matching Redis's `proto-max-bulk-len`.
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest accepted argument count per command.
pub const MAX_ARGS: usize = 1024 * 1024;

/// Framing failure; the connection is closed after reporting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespError {
    Protocol,
}

/// Parser for RESP2 command arrays (`*N` of `$len` bulk strings).
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    /// Parses one complete command from the front of `buf`.
    ///
    /// Consumes the frame on success; leaves `buf` unchanged on `Ok(None)`.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        let mut pos = 0;
        let header = match read_line(buf, &mut pos)? {
            Some(line) => line,
            None => return Ok(None),
        };
        if header.first() != Some(&b'*') {
            return Err(RespError::Protocol);
        }
        let count = parse_len(&header[1..], MAX_ARGS)?;

        let mut args = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let line = match read_line(buf, &mut pos)? {
                Some(line) => line,
                None => return Ok(None),
            };
            if line.first() != Some(&b'$') {
                return Err(RespError::Protocol);
            }
            let len = parse_len(&line[1..], MAX_BULK_LEN)?;
            if buf.len() < pos + len + 2 {
                return Ok(None);
            }
            if &buf[pos + len..pos + len + 2] != b"\r\n" {
                return Err(RespError::Protocol);
            }
            args.push(buf[pos..pos + len].to_vec());
            pos += len + 2;
        }

        buf.advance(pos);
        Ok(Some(args))
    }
}

/// Returns the line starting at `pos` (without CRLF) and moves `pos` past it.
fn read_line(buf: &[u8], pos: &mut usize) -> Result<Option<Vec<u8>>, RespError> {
    let rest = &buf[*pos..];
    let end = match rest.windows(2).position(|window| window == b"\r\n") {
        Some(end) => end,
        None => return Ok(None),
    };
    if end == 0 {
        return Err(RespError::Protocol);
    }
    let line = rest[..end].to_vec();
    *pos += end + 2;
    Ok(Some(line))
}

/// Parses a decimal length, rejecting anything above `max`.
fn parse_len(data: &[u8], max: usize) -> Result<usize, RespError> {
    if data.is_empty() {
        return Err(RespError::Protocol);
    }
    let mut value = 0usize;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(RespError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as usize);
        if value > max {
            return Err(RespError::Protocol);
        }
    }
    Ok(value)
}

pub fn resp_simple(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"+");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_ok() -> Vec<u8> {
    resp_simple("OK")
}

/// Error reply with the generic `ERR` prefix.
pub fn resp_error(message: &str) -> Vec<u8> {
    resp_error_code("ERR", message)
}

/// Error reply with a specific code such as `WRONGTYPE` or `NOAUTH`.
pub fn resp_error_code(code: &str, message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(code.len() + message.len() + 4);
    buf.extend_from_slice(b"-");
    buf.extend_from_slice(code.as_bytes());
    buf.extend_from_slice(b" ");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_wrongtype() -> Vec<u8> {
    resp_error_code(
        "WRONGTYPE",
        "Operation against a key holding the wrong kind of value",
    )
}

pub fn resp_integer(value: i64) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b":");
    buf.extend_from_slice(value.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() + 16);
    buf.extend_from_slice(b"$");
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

/// Array reply of optional bulk strings (`None` encodes as a null bulk).
pub fn resp_array<I, T>(items: I) -> Vec<u8>
where
    I: IntoIterator<Item = Option<T>>,
    T: AsRef<[u8]>,
{
    let encoded: Vec<Vec<u8>> = items
        .into_iter()
        .map(|item| match item {
            Some(data) => resp_bulk(data.as_ref()),
            None => resp_null(),
        })
        .collect();

    let mut buf = Vec::new();
    buf.extend_from_slice(b"*");
    buf.extend_from_slice(encoded.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    for item in encoded {
        buf.extend_from_slice(&item);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_command() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n"[..]);
        let args = RespParser::new().parse(&mut buf).unwrap().unwrap();
        assert_eq!(args, vec![b"GET".to_vec(), b"key".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_is_left_in_buffer() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nke"[..]);
        let before = buf.len();
        assert_eq!(RespParser::new().parse(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), before);
    }

    #[test]
    fn pipelined_frames_parse_one_at_a_time() {
        let mut buf = BytesMut::from(&b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n"[..]);
        let mut parser = RespParser::new();
        assert!(parser.parse(&mut buf).unwrap().is_some());
        assert!(parser.parse(&mut buf).unwrap().is_some());
        assert_eq!(parser.parse(&mut buf).unwrap(), None);
    }

    #[test]
    fn binary_arguments_survive() {
        let mut buf = BytesMut::from(&b"*1\r\n$4\r\na\r\nb\r\n"[..]);
        let args = RespParser::new().parse(&mut buf).unwrap().unwrap();
        assert_eq!(args, vec![b"a\r\nb".to_vec()]);
    }

    #[test]
    fn inline_commands_are_rejected() {
        let mut buf = BytesMut::from(&b"PING\r\n"[..]);
        assert_eq!(RespParser::new().parse(&mut buf), Err(RespError::Protocol));
    }

    #[test]
    fn oversized_lengths_are_rejected() {
        let mut buf = BytesMut::from(&b"*1\r\n$18446744073709551615\r\nx\r\n"[..]);
        assert_eq!(RespParser::new().parse(&mut buf), Err(RespError::Protocol));

        let mut buf = BytesMut::from(&b"*1\r\n$536870913\r\n"[..]);
        assert_eq!(RespParser::new().parse(&mut buf), Err(RespError::Protocol));

        let mut buf = BytesMut::from(&b"*99999999999999999999\r\n"[..]);
        assert_eq!(RespParser::new().parse(&mut buf), Err(RespError::Protocol));
    }

    #[test]
    fn bulk_at_the_limit_waits_for_data() {
        let mut buf = BytesMut::from(&b"*1\r\n$536870912\r\n"[..]);
        assert_eq!(RespParser::new().parse(&mut buf), Ok(None));
    }

    #[test]
    fn encodes_array_with_null_slot() {
        let reply = resp_array(vec![Some(b"1".to_vec()), None]);
        assert_eq!(reply, b"*2\r\n$1\r\n1\r\n$-1\r\n".to_vec());
    }
}
