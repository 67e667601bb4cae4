#![forbid(unsafe_code)]

//! RESP wire codec: parses client frames (multibulk and inline) and renders
//! typed server replies for protocol versions 2 and 3.

/// Longest inline command line accepted before the connection is failed.
const INLINE_MAX_LEN: usize = 64 * 1024;

/// Reply protocol negotiated per connection via `HELLO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    #[default]
    Resp2,
    Resp3,
}

impl ProtocolVersion {
    pub fn from_number(n: i64) -> Option<Self> {
        match n {
            2 => Some(Self::Resp2),
            3 => Some(Self::Resp3),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(self) -> i64 {
        match self {
            Self::Resp2 => 2,
            Self::Resp3 => 3,
        }
    }
}

/// A single protocol frame. Client commands arrive as `Array` of
/// `BulkString`; replies use the full variant set. RESP3-only variants are
/// downgraded on the wire when the connection speaks RESP2.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    /// `None` is the RESP2 null bulk string (`$-1`).
    BulkString(Option<Vec<u8>>),
    /// `None` is the RESP2 null array (`*-1`).
    Array(Option<Vec<RespFrame>>),
    /// RESP3 `_`.
    Null,
    Boolean(bool),
    Double(f64),
    BigNumber(String),
    /// Three-character format tag plus payload, e.g. `("txt", b"...")`.
    Verbatim(String, Vec<u8>),
    Map(Vec<(RespFrame, RespFrame)>),
    Set(Vec<RespFrame>),
    Push(Vec<RespFrame>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespParseError {
    /// More bytes are needed before a full frame can be decoded.
    Incomplete,
    InvalidBulkLength,
    InvalidMultibulkLength,
    InvalidPrefix(u8),
    UnsupportedResp3Type(u8),
    InvalidInteger,
    InvalidUtf8,
    InlineTooLong,
}

impl RespFrame {
    #[must_use]
    pub fn ok() -> Self {
        Self::SimpleString("OK".to_string())
    }

    #[must_use]
    pub fn bulk(bytes: impl Into<Vec<u8>>) -> Self {
        Self::BulkString(Some(bytes.into()))
    }

    /// Render for the given protocol version.
    #[must_use]
    pub fn to_bytes(&self, proto: ProtocolVersion) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out, proto);
        out
    }

    fn write(&self, out: &mut Vec<u8>, proto: ProtocolVersion) {
        match self {
            Self::SimpleString(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Self::Error(msg) => {
                out.push(b'-');
                out.extend_from_slice(msg.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Self::Integer(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Self::BulkString(None) => out.extend_from_slice(b"$-1\r\n"),
            Self::BulkString(Some(bytes)) => write_bulk(out, bytes),
            Self::Array(None) => match proto {
                ProtocolVersion::Resp2 => out.extend_from_slice(b"*-1\r\n"),
                ProtocolVersion::Resp3 => out.extend_from_slice(b"_\r\n"),
            },
            Self::Array(Some(items)) => {
                write_header(out, b'*', items.len());
                for item in items {
                    item.write(out, proto);
                }
            }
            Self::Null => match proto {
                ProtocolVersion::Resp2 => out.extend_from_slice(b"$-1\r\n"),
                ProtocolVersion::Resp3 => out.extend_from_slice(b"_\r\n"),
            },
            Self::Boolean(b) => match proto {
                ProtocolVersion::Resp2 => {
                    out.extend_from_slice(if *b { b":1\r\n" } else { b":0\r\n" });
                }
                ProtocolVersion::Resp3 => {
                    out.extend_from_slice(if *b { b"#t\r\n" } else { b"#f\r\n" });
                }
            },
            Self::Double(d) => match proto {
                ProtocolVersion::Resp2 => write_bulk(out, format_double(*d).as_bytes()),
                ProtocolVersion::Resp3 => {
                    out.push(b',');
                    out.extend_from_slice(format_double(*d).as_bytes());
                    out.extend_from_slice(b"\r\n");
                }
            },
            Self::BigNumber(digits) => match proto {
                ProtocolVersion::Resp2 => write_bulk(out, digits.as_bytes()),
                ProtocolVersion::Resp3 => {
                    out.push(b'(');
                    out.extend_from_slice(digits.as_bytes());
                    out.extend_from_slice(b"\r\n");
                }
            },
            Self::Verbatim(format, payload) => match proto {
                ProtocolVersion::Resp2 => write_bulk(out, payload),
                ProtocolVersion::Resp3 => {
                    write_header(out, b'=', format.len() + 1 + payload.len());
                    out.extend_from_slice(format.as_bytes());
                    out.push(b':');
                    out.extend_from_slice(payload);
                    out.extend_from_slice(b"\r\n");
                }
            },
            Self::Map(pairs) => match proto {
                ProtocolVersion::Resp2 => {
                    write_header(out, b'*', pairs.len() * 2);
                    for (k, v) in pairs {
                        k.write(out, proto);
                        v.write(out, proto);
                    }
                }
                ProtocolVersion::Resp3 => {
                    write_header(out, b'%', pairs.len());
                    for (k, v) in pairs {
                        k.write(out, proto);
                        v.write(out, proto);
                    }
                }
            },
            Self::Set(items) => {
                let prefix = match proto {
                    ProtocolVersion::Resp2 => b'*',
                    ProtocolVersion::Resp3 => b'~',
                };
                write_header(out, prefix, items.len());
                for item in items {
                    item.write(out, proto);
                }
            }
            Self::Push(items) => {
                let prefix = match proto {
                    ProtocolVersion::Resp2 => b'*',
                    ProtocolVersion::Resp3 => b'>',
                };
                write_header(out, prefix, items.len());
                for item in items {
                    item.write(out, proto);
                }
            }
        }
    }
}

fn write_header(out: &mut Vec<u8>, prefix: u8, len: usize) {
    out.push(prefix);
    out.extend_from_slice(len.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
}

fn write_bulk(out: &mut Vec<u8>, bytes: &[u8]) {
    write_header(out, b'$', bytes.len());
    out.extend_from_slice(bytes);
    out.extend_from_slice(b"\r\n");
}

/// Shortest representation that parses back to the same double. Matches the
/// reference server's trailing-zero trimming for finite values.
#[must_use]
pub fn format_double(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value == f64::INFINITY {
        "inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{value}")
    }
}

/// Decode one frame from the head of `input`. Returns the frame and the
/// number of bytes consumed. `Incomplete` means no bytes were consumed and
/// the caller should buffer more input.
pub fn parse_frame(input: &[u8]) -> Result<(RespFrame, usize), RespParseError> {
    let Some(&prefix) = input.first() else {
        return Err(RespParseError::Incomplete);
    };
    match prefix {
        b'*' => parse_array(input),
        b'$' => parse_bulk(input),
        b'+' | b'-' | b':' => parse_line_frame(input),
        b'%' | b'~' | b',' | b'#' | b'(' | b'=' | b'_' | b'>' => {
            Err(RespParseError::UnsupportedResp3Type(prefix))
        }
        _ => parse_inline(input),
    }
}

/// Find `\r\n` starting at `from`; returns the index of the `\r`.
fn find_crlf(input: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 1 < input.len() {
        if input[i] == b'\r' && input[i + 1] == b'\n' {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn parse_decimal(bytes: &[u8]) -> Result<i64, RespParseError> {
    let text = std::str::from_utf8(bytes).map_err(|_| RespParseError::InvalidUtf8)?;
    text.parse::<i64>().map_err(|_| RespParseError::InvalidInteger)
}

fn parse_line_frame(input: &[u8]) -> Result<(RespFrame, usize), RespParseError> {
    let end = find_crlf(input, 1).ok_or(RespParseError::Incomplete)?;
    let body = &input[1..end];
    let consumed = end + 2;
    let frame = match input[0] {
        b'+' => {
            let text =
                std::str::from_utf8(body).map_err(|_| RespParseError::InvalidUtf8)?;
            RespFrame::SimpleString(text.to_string())
        }
        b'-' => {
            let text =
                std::str::from_utf8(body).map_err(|_| RespParseError::InvalidUtf8)?;
            RespFrame::Error(text.to_string())
        }
        b':' => RespFrame::Integer(parse_decimal(body)?),
        _ => unreachable!(),
    };
    Ok((frame, consumed))
}

fn parse_bulk(input: &[u8]) -> Result<(RespFrame, usize), RespParseError> {
    let header_end = find_crlf(input, 1).ok_or(RespParseError::Incomplete)?;
    let len = parse_decimal(&input[1..header_end])
        .map_err(|_| RespParseError::InvalidBulkLength)?;
    if len == -1 {
        return Ok((RespFrame::BulkString(None), header_end + 2));
    }
    let len = usize::try_from(len).map_err(|_| RespParseError::InvalidBulkLength)?;
    let body_start = header_end + 2;
    let body_end = body_start + len;
    if input.len() < body_end + 2 {
        return Err(RespParseError::Incomplete);
    }
    if &input[body_end..body_end + 2] != b"\r\n" {
        return Err(RespParseError::InvalidBulkLength);
    }
    let body = input[body_start..body_end].to_vec();
    Ok((RespFrame::BulkString(Some(body)), body_end + 2))
}

fn parse_array(input: &[u8]) -> Result<(RespFrame, usize), RespParseError> {
    let header_end = find_crlf(input, 1).ok_or(RespParseError::Incomplete)?;
    let len = parse_decimal(&input[1..header_end])
        .map_err(|_| RespParseError::InvalidMultibulkLength)?;
    if len == -1 {
        return Ok((RespFrame::Array(None), header_end + 2));
    }
    let len = usize::try_from(len).map_err(|_| RespParseError::InvalidMultibulkLength)?;
    let mut items = Vec::with_capacity(len);
    let mut offset = header_end + 2;
    for _ in 0..len {
        let (item, consumed) = parse_frame(&input[offset..])?;
        items.push(item);
        offset += consumed;
    }
    Ok((RespFrame::Array(Some(items)), offset))
}

/// Inline form: one whitespace-separated line. An empty line decodes to an
/// empty array, which callers treat as "no command".
fn parse_inline(input: &[u8]) -> Result<(RespFrame, usize), RespParseError> {
    let Some(newline) = input.iter().position(|&b| b == b'\n') else {
        if input.len() > INLINE_MAX_LEN {
            return Err(RespParseError::InlineTooLong);
        }
        return Err(RespParseError::Incomplete);
    };
    if newline > INLINE_MAX_LEN {
        return Err(RespParseError::InlineTooLong);
    }
    let mut line = &input[..newline];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    let items: Vec<RespFrame> = line
        .split(|&b| b == b' ' || b == b'\t')
        .filter(|token| !token.is_empty())
        .map(|token| RespFrame::BulkString(Some(token.to_vec())))
        .collect();
    Ok((RespFrame::Array(Some(items)), newline + 1))
}

/// Buffered reader for the byte-stream surface: feed raw bytes, pull out
/// complete command frames. Empty inline lines are skipped.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decode the next complete frame, or `Ok(None)` if more bytes are
    /// needed. Any error other than a short read is connection-fatal.
    pub fn next_frame(&mut self) -> Result<Option<RespFrame>, RespParseError> {
        loop {
            if self.buf.is_empty() {
                return Ok(None);
            }
            match parse_frame(&self.buf) {
                Ok((frame, consumed)) => {
                    self.buf.drain(..consumed);
                    if matches!(&frame, RespFrame::Array(Some(items)) if items.is_empty()) {
                        continue;
                    }
                    return Ok(Some(frame));
                }
                Err(RespParseError::Incomplete) => return Ok(None),
                Err(err) => return Err(err),
            }
        }
    }
}
