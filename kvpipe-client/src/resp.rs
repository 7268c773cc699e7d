//! # RESP2 Encoding and Parsing
//!
//! Purpose: Frame commands and parse replies for the blocking client,
//! including back-to-back replies produced by a pipelined write.
//!
//! ## Design Principles
//! 1. **Caller-Owned Buffers**: Encoding appends to a buffer the connection
//!    reuses, so a batch of N commands is framed into one write.
//! 2. **Binary-Safe**: Bulk strings are raw `Bytes`.
//! 3. **Null Is Distinct**: `$-1` and `*-1` parse to `None`, so an aborted
//!    transaction can be told apart from an empty result.
//! 4. **Untrusted Lengths**: Length headers above `MAX_FRAME_LEN` are a
//!    protocol error, and no header sizes an allocation beyond
//!    `PREALLOC_LIMIT` up front.

use std::io::{BufRead, Read};

use bytes::Bytes;

use crate::client::{ClientError, ClientResult};

/// Largest bulk string or array length accepted from a server (512 MiB).
pub const MAX_FRAME_LEN: i64 = 512 * 1024 * 1024;

const PREALLOC_LIMIT: usize = 1024;

/// RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK`, `+QUEUED`.
    Simple(Vec<u8>),
    /// `-ERR ...`.
    Error(Vec<u8>),
    /// `:123`.
    Integer(i64),
    /// `$...`, `None` for the null bulk string.
    Bulk(Option<Bytes>),
    /// `*...`, `None` for the null array.
    Array(Option<Vec<RespValue>>),
}

/// Appends one command as a RESP2 array of bulk strings.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one reply.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<RespValue> {
    read_line(reader, line_buf)?;
    let (&kind, rest) = line_buf.split_first().ok_or(ClientError::Protocol)?;

    match kind {
        b'+' => Ok(RespValue::Simple(rest.to_vec())),
        b'-' => Ok(RespValue::Error(rest.to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(rest)?)),
        b'$' => {
            let len = parse_i64(rest)?;
            read_bulk(reader, len).map(RespValue::Bulk)
        }
        b'*' => {
            let len = parse_i64(rest)?;
            read_array(reader, len, line_buf).map(RespValue::Array)
        }
        _ => Err(ClientError::Protocol),
    }
}

/// Reads `count` consecutive replies, in order.
pub fn read_responses<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
    count: usize,
) -> ClientResult<Vec<RespValue>> {
    let mut replies = Vec::with_capacity(count.min(PREALLOC_LIMIT));
    for _ in 0..count {
        replies.push(read_response(reader, line_buf)?);
    }
    Ok(replies)
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> ClientResult<Option<Bytes>> {
    if len < 0 {
        return Ok(None);
    }
    if len > MAX_FRAME_LEN {
        return Err(ClientError::Protocol);
    }
    let mut data = Vec::with_capacity((len as usize).min(PREALLOC_LIMIT));
    let read = reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if read as i64 != len {
        return Err(ClientError::Protocol);
    }

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != *b"\r\n" {
        return Err(ClientError::Protocol);
    }
    Ok(Some(Bytes::from(data)))
}

fn read_array<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> ClientResult<Option<Vec<RespValue>>> {
    if len < 0 {
        return Ok(None);
    }
    if len > MAX_FRAME_LEN {
        return Err(ClientError::Protocol);
    }
    read_responses(reader, line_buf, len as usize).map(Some)
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(ClientError::Protocol);
    }
    if !buf.ends_with(b"\r\n") {
        return Err(ClientError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', digits)) => (true, digits),
        Some(_) => (false, data),
        None => return Err(ClientError::Protocol),
    };
    if digits.is_empty() {
        return Err(ClientError::Protocol);
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ClientError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }
    Ok(if negative { -value } else { value })
}

fn push_usize(out: &mut Vec<u8>, value: usize) {
    // Stack buffer, no heap allocation.
    let mut buf = [0u8; 20];
    let mut len = 0;
    let mut rest = value;
    loop {
        buf[len] = b'0' + (rest % 10) as u8;
        rest /= 10;
        len += 1;
        if rest == 0 {
            break;
        }
    }
    out.extend(buf[..len].iter().rev());
}
