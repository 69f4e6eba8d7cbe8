use std::net::SocketAddr;

use bytes::Bytes;

use crate::http::body::Body;

/// Request header fields in arrival order.
///
/// Names compare ASCII case-insensitively. Repeated names are all kept:
/// [`Headers::get`] returns the first occurrence and [`Headers::get_all`]
/// yields every one of them.
///
/// Names and values are UTF-8. The parser refuses a field whose value holds
/// non-UTF-8 bytes (such as raw obs-text) as a malformed request instead of
/// decoding it lossily.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// An empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field without touching earlier fields of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Returns the first value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    /// Yields every value stored under `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True if at least one field is named `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates `(name, value)` pairs, names as the client sent them.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields, repeated names counted separately.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Request line and header block, as produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Headers,
    /// Declared body length; zero when no Content-Length was sent.
    pub content_length: u64,
}

/// A parsed HTTP request handed to exactly one handler invocation.
///
/// Everything except the body is fixed once the header block is parsed. The
/// body is a forward-only stream of exactly `content_length` bytes.
#[derive(Debug)]
pub struct Request {
    method: String,
    target: String,
    version: String,
    headers: Headers,
    content_length: u64,
    body: Body,
    peer_addr: Option<SocketAddr>,
    script_name: String,
}

impl Request {
    pub fn new(head: RequestHead, body: Body, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            method: head.method,
            target: head.target,
            version: head.version,
            headers: head.headers,
            content_length: head.content_length,
            body,
            peer_addr,
            script_name: String::new(),
        }
    }

    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    /// The method token, exactly as sent (`GET`, `POST`, ...).
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request target exactly as sent, query string included.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The target up to (not including) the first `?`.
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    /// The text after the first `?`, if there is one.
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// The protocol version, e.g. `HTTP/1.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Retrieves the first value of a header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Declared body length; zero without a Content-Length header.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// The body stream. It can be read once.
    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Remote address of the client, when the request came off a socket.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// The registered prefix this request was dispatched under.
    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    /// The part of the path after [`Request::script_name`].
    pub fn path_info(&self) -> &str {
        self.path()
            .strip_prefix(self.script_name.as_str())
            .unwrap_or_default()
    }

    pub(crate) fn set_script_name(&mut self, prefix: &str) {
        self.script_name = prefix.to_string();
    }
}

/// Builder for constructing Request objects outside a live connection.
#[derive(Debug, Default)]
pub struct RequestBuilder {
    method: Option<String>,
    target: Option<String>,
    version: Option<String>,
    headers: Headers,
    body: Bytes,
    peer_addr: Option<SocketAddr>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        let head = RequestHead {
            method: self.method.ok_or("method missing")?,
            target: self.target.ok_or("target missing")?,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers,
            content_length: self.body.len() as u64,
        };
        Ok(Request::new(head, Body::from_bytes(self.body), self.peer_addr))
    }
}
