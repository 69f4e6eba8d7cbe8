use thiserror::Error;

use crate::config::Limits;
use crate::http::request::{Headers, RequestHead};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid request line")]
    InvalidRequestLine,
    #[error("invalid method token")]
    InvalidMethod,
    #[error("invalid request target")]
    InvalidTarget,
    #[error("unsupported HTTP version")]
    InvalidVersion,
    #[error("invalid header line")]
    InvalidHeader,
    #[error("line not terminated by CRLF")]
    InvalidLineEnding,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("header block exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },
    #[error("{element} exceeds {limit} bytes")]
    FieldTooLong { element: &'static str, limit: usize },
    #[error("declared body of {length} bytes exceeds {limit}")]
    BodyTooLarge { length: u64, limit: u64 },
}

impl ParseError {
    /// True when the input broke a size limit rather than the grammar.
    pub fn is_too_large(&self) -> bool {
        matches!(
            self,
            ParseError::HeaderTooLarge { .. }
                | ParseError::FieldTooLong { .. }
                | ParseError::BodyTooLarge { .. }
        )
    }
}

#[derive(Debug)]
pub enum ParseStatus {
    /// More bytes are needed; nothing is wrong yet.
    Partial,
    /// The head is complete. `consumed` bytes of the buffer belong to it,
    /// anything after that is the start of the body.
    Complete { head: RequestHead, consumed: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePhase {
    RequestLine,
    Headers,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RequestLine {
    method: String,
    target: String,
    version: String,
}

/// Incremental request head parser.
///
/// `parse` is called with the connection's accumulated read buffer every
/// time new bytes arrive. The buffer may only grow between calls; lines
/// already parsed are not scanned again. Once a head is returned the parser
/// is back in its initial state.
#[derive(Debug, Clone)]
pub struct RequestParser {
    limits: Limits,
    phase: ParsePhase,
    /// Start of the first line not yet parsed.
    cursor: usize,
    /// Bytes before this offset are known to hold no LF past `cursor`.
    scanned: usize,
    line: Option<RequestLine>,
    headers: Headers,
    content_length: Option<u64>,
}

impl RequestParser {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            phase: ParsePhase::RequestLine,
            cursor: 0,
            scanned: 0,
            line: None,
            headers: Headers::new(),
            content_length: None,
        }
    }

    pub fn phase(&self) -> ParsePhase {
        self.phase
    }

    pub fn reset(&mut self) {
        self.phase = ParsePhase::RequestLine;
        self.cursor = 0;
        self.scanned = 0;
        self.line = None;
        self.headers = Headers::new();
        self.content_length = None;
    }

    pub fn parse(&mut self, buf: &[u8]) -> Result<ParseStatus, ParseError> {
        let limit = self.limits.max_header_bytes;

        loop {
            let from = self.scanned.max(self.cursor).min(buf.len());
            let Some(offset) = buf[from..].iter().position(|&b| b == b'\n') else {
                self.scanned = buf.len();
                if buf.len() > limit {
                    return Err(ParseError::HeaderTooLarge { limit });
                }
                return Ok(ParseStatus::Partial);
            };

            let line_end = from + offset + 1;
            if line_end > limit {
                return Err(ParseError::HeaderTooLarge { limit });
            }

            let line = buf[self.cursor..line_end - 1]
                .strip_suffix(b"\r")
                .ok_or(ParseError::InvalidLineEnding)?;
            self.cursor = line_end;
            self.scanned = line_end;

            match self.phase {
                ParsePhase::RequestLine => {
                    self.line = Some(parse_request_line(line, &self.limits)?);
                    self.phase = ParsePhase::Headers;
                }
                ParsePhase::Headers if line.is_empty() => {
                    let head = self.finish()?;
                    return Ok(ParseStatus::Complete {
                        head,
                        consumed: line_end,
                    });
                }
                ParsePhase::Headers => {
                    let (name, value) = parse_header_line(line, &self.limits)?;
                    if name.eq_ignore_ascii_case("content-length") {
                        let length = parse_content_length(&value)?;
                        if let Some(limit) = self.limits.max_content_length.filter(|&max| length > max) {
                            return Err(ParseError::BodyTooLarge { length, limit });
                        }
                        match self.content_length {
                            Some(previous) if previous != length => {
                                return Err(ParseError::InvalidContentLength);
                            }
                            _ => self.content_length = Some(length),
                        }
                    }
                    self.headers.append(name, value);
                }
            }
        }
    }

    fn finish(&mut self) -> Result<RequestHead, ParseError> {
        let line = self.line.take().ok_or(ParseError::InvalidRequestLine)?;
        let head = RequestHead {
            method: line.method,
            target: line.target,
            version: line.version,
            headers: std::mem::take(&mut self.headers),
            content_length: self.content_length.unwrap_or(0),
        };
        self.reset();
        Ok(head)
    }
}

/// Parses a complete head from `buf` in one shot.
pub fn parse_request_head(buf: &[u8], limits: &Limits) -> Result<ParseStatus, ParseError> {
    RequestParser::new(limits.clone()).parse(buf)
}

fn parse_request_line(line: &[u8], limits: &Limits) -> Result<RequestLine, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidRequestLine)?;

    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::InvalidRequestLine);
    };

    if method.is_empty() || !method.bytes().all(is_tchar) {
        return Err(ParseError::InvalidMethod);
    }

    if target.len() > limits.max_request_uri {
        return Err(ParseError::FieldTooLong {
            element: "request target",
            limit: limits.max_request_uri,
        });
    }
    if target.is_empty() || !target.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(ParseError::InvalidTarget);
    }

    if !is_http_version(version) {
        return Err(ParseError::InvalidVersion);
    }

    Ok(RequestLine {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
    })
}

fn parse_header_line(line: &[u8], limits: &Limits) -> Result<(String, String), ParseError> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(ParseError::InvalidHeader)?;
    let (name, value) = (&line[..colon], &line[colon + 1..]);

    // Rejects obs-fold continuation lines and whitespace before the colon.
    if name.is_empty() || !name.iter().copied().all(is_tchar) {
        return Err(ParseError::InvalidHeader);
    }
    if name.len() > limits.max_field_name {
        return Err(ParseError::FieldTooLong {
            element: "header name",
            limit: limits.max_field_name,
        });
    }

    let value = value.trim_ascii();
    if value.len() > limits.max_field_value {
        return Err(ParseError::FieldTooLong {
            element: "header value",
            limit: limits.max_field_value,
        });
    }
    if !value.iter().all(|&b| b == b'\t' || (b >= 0x20 && b != 0x7f)) {
        return Err(ParseError::InvalidHeader);
    }

    // Header values are exposed as `&str`, so obs-text that is not valid
    // UTF-8 is refused rather than silently rewritten.
    let name = std::str::from_utf8(name).map_err(|_| ParseError::InvalidHeader)?;
    let value = std::str::from_utf8(value).map_err(|_| ParseError::InvalidHeader)?;
    Ok((name.to_string(), value.to_string()))
}

fn parse_content_length(value: &str) -> Result<u64, ParseError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidContentLength);
    }
    value.parse().map_err(|_| ParseError::InvalidContentLength)
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn is_http_version(version: &str) -> bool {
    let Some(numbers) = version.strip_prefix("HTTP/") else {
        return false;
    };
    let Some((major, minor)) = numbers.split_once('.') else {
        return false;
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    digits(major) && digits(minor)
}
