//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse store replies without pulling in
//! a full Redis client, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::io::BufRead;

use pcache_common::{CacheError, CacheResult};

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style replies.
    Simple(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays.
    Array(Vec<RespValue>),
    /// *-1 null array.
    Null,
}

impl RespValue {
    /// Converts an error reply into `CacheError::Server`, passing others through.
    pub fn into_result(self) -> CacheResult<RespValue> {
        match self {
            RespValue::Error(message) => Err(CacheError::server(&message)),
            other => Ok(other),
        }
    }

    /// Expects a `+OK`-style status reply.
    pub fn into_status(self) -> CacheResult<()> {
        match self.into_result()? {
            RespValue::Simple(_) => Ok(()),
            _ => Err(CacheError::UnexpectedResponse),
        }
    }

    pub fn into_integer(self) -> CacheResult<i64> {
        match self.into_result()? {
            RespValue::Integer(value) => Ok(value),
            _ => Err(CacheError::UnexpectedResponse),
        }
    }

    /// Expects a bulk string; `None` for the null bulk reply.
    pub fn into_bulk(self) -> CacheResult<Option<Vec<u8>>> {
        match self.into_result()? {
            RespValue::Bulk(data) => Ok(data),
            _ => Err(CacheError::UnexpectedResponse),
        }
    }

    /// Expects an array of non-null bulk strings.
    pub fn into_bytes_list(self) -> CacheResult<Vec<Vec<u8>>> {
        let items = match self.into_result()? {
            RespValue::Array(items) => items,
            RespValue::Null => return Ok(Vec::new()),
            _ => return Err(CacheError::UnexpectedResponse),
        };
        items
            .into_iter()
            .map(|item| match item {
                RespValue::Bulk(Some(data)) | RespValue::Simple(data) => Ok(data),
                _ => Err(CacheError::UnexpectedResponse),
            })
            .collect()
    }

    /// Like `into_bytes_list`, decoding each entry as UTF-8.
    pub fn into_strings(self) -> CacheResult<Vec<String>> {
        self.into_bytes_list()?
            .into_iter()
            .map(|data| String::from_utf8(data).map_err(|_| CacheError::UnexpectedResponse))
            .collect()
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> CacheResult<RespValue> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(CacheError::Protocol);
    }

    match line_buf[0] {
        b'+' => Ok(RespValue::Simple(line_buf[1..].to_vec())),
        b'-' => Ok(RespValue::Error(line_buf[1..].to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_bulk_len(reader, len, line_buf)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_array_len(reader, len, line_buf)
        }
        _ => Err(CacheError::Protocol),
    }
}

fn parse_bulk_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> CacheResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    let len = len as usize;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(CacheError::Protocol);
    }

    line_buf.clear();
    Ok(RespValue::Bulk(Some(data)))
}

fn parse_array_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> CacheResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Null);
    }
    if len == 0 {
        return Ok(RespValue::Array(Vec::new()));
    }

    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        items.push(read_response(reader, line_buf)?);
    }
    Ok(RespValue::Array(items))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> CacheResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(CacheError::Protocol);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(CacheError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> CacheResult<i64> {
    if data.is_empty() {
        return Err(CacheError::Protocol);
    }
    let mut negative = false;
    let mut idx = 0;
    if data[0] == b'-' {
        negative = true;
        idx = 1;
    }

    let mut value: i64 = 0;
    while idx < data.len() {
        let b = data[idx];
        if !b.is_ascii_digit() {
            return Err(CacheError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
        idx += 1;
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}
