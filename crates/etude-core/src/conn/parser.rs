use std::ops::Range;

use memchr::memchr2;

use crate::http::{HTTP_VERSION, Method, Request};

/// Where the parser is within the current request. Never moves backwards
/// until the connection is reset for the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    RequestLine,
    Headers,
    Body,
    Done,
    BadRequest,
}

impl ParseState {
    /// `Done` or `BadRequest`: no further input is needed.
    pub fn is_final(self) -> bool {
        matches!(self, ParseState::Done | ParseState::BadRequest)
    }
}

/// Result of scanning the buffered bytes for one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineStatus {
    /// A complete line; the range excludes the terminator.
    Line(Range<usize>),
    Malformed,
    NeedMore,
}

/// Scan `buf` from `*scan_pos` for a `\n` or `\r\n` terminator.
///
/// On success `*scan_pos` moves past the terminator. On `NeedMore` it is left
/// where scanning should resume, which may be a trailing `\r`.
pub fn scan_line(buf: &[u8], scan_pos: &mut usize, line_start: usize) -> LineStatus {
    let Some(offset) = memchr2(b'\r', b'\n', &buf[*scan_pos..]) else {
        *scan_pos = buf.len();
        return LineStatus::NeedMore;
    };
    let pos = *scan_pos + offset;

    if buf[pos] == b'\n' {
        *scan_pos = pos + 1;
        return LineStatus::Line(line_start..pos);
    }

    match buf.get(pos + 1) {
        None => {
            *scan_pos = pos;
            LineStatus::NeedMore
        }
        Some(b'\n') => {
            *scan_pos = pos + 2;
            LineStatus::Line(line_start..pos)
        }
        Some(_) => LineStatus::Malformed,
    }
}

/// Incremental HTTP/1.1 request parser.
///
/// The parser never copies the buffer it is fed; it only remembers cursors
/// into it, so the same buffer must be passed back (grown, never shifted) on
/// every call until the request is final.
#[derive(Debug)]
pub struct RequestParser {
    state: ParseState,
    scan_pos: usize,
    line_start: usize,
    body_start: usize,
    body_end: usize,
    limit: usize,
    method: Option<Method>,
    target: String,
    host: Option<String>,
    keep_alive: bool,
    content_length: usize,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// A parser for a buffer that can never hold more than `limit` bytes.
    /// A declared body that would end past it is rejected up front.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            state: ParseState::RequestLine,
            scan_pos: 0,
            line_start: 0,
            body_start: 0,
            body_end: 0,
            limit,
            method: None,
            target: String::new(),
            host: None,
            keep_alive: false,
            content_length: 0,
        }
    }

    /// Forget the current request. The target's allocation is kept.
    pub fn reset(&mut self) {
        self.state = ParseState::RequestLine;
        self.scan_pos = 0;
        self.line_start = 0;
        self.body_start = 0;
        self.body_end = 0;
        self.method = None;
        self.target.clear();
        self.host = None;
        self.keep_alive = false;
        self.content_length = 0;
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Consume as much of `buf` as possible.
    ///
    /// `default_document` replaces a target of exactly `/`.
    pub fn advance(&mut self, buf: &[u8], default_document: &str) -> ParseState {
        loop {
            match self.state {
                ParseState::RequestLine | ParseState::Headers => {
                    let range = match scan_line(buf, &mut self.scan_pos, self.line_start) {
                        LineStatus::Line(range) => range,
                        LineStatus::NeedMore => return self.state,
                        LineStatus::Malformed => {
                            self.state = ParseState::BadRequest;
                            return self.state;
                        }
                    };
                    self.line_start = self.scan_pos;
                    let line = &buf[range];
                    self.state = if self.state == ParseState::RequestLine {
                        self.parse_request_line(line, default_document)
                    } else {
                        self.parse_header(line)
                    };
                }
                ParseState::Body => {
                    if buf.len() >= self.body_end {
                        self.state = ParseState::Done;
                    }
                    return self.state;
                }
                ParseState::Done | ParseState::BadRequest => return self.state,
            }
        }
    }

    fn parse_request_line(&mut self, line: &[u8], default_document: &str) -> ParseState {
        let mut tokens = line
            .split(|b| *b == b' ' || *b == b'\t')
            .filter(|t| !t.is_empty());
        let (Some(method), Some(target), Some(version), None) =
            (tokens.next(), tokens.next(), tokens.next(), tokens.next())
        else {
            return ParseState::BadRequest;
        };

        let Some(method) = Method::from_bytes(method) else {
            return ParseState::BadRequest;
        };
        if !version.eq_ignore_ascii_case(HTTP_VERSION.as_bytes()) {
            return ParseState::BadRequest;
        }
        let Ok(target) = std::str::from_utf8(target) else {
            return ParseState::BadRequest;
        };
        let Some(path) = origin_form(target) else {
            return ParseState::BadRequest;
        };

        let without_query = path.split_once('?').map_or(path, |(p, _)| p);
        if without_query.split('/').any(|segment| segment == "..") {
            return ParseState::BadRequest;
        }

        self.method = Some(method);
        self.target.clear();
        if path == "/" {
            self.target.push('/');
            self.target.push_str(default_document);
        } else {
            self.target.push_str(path);
        }
        ParseState::Headers
    }

    fn parse_header(&mut self, line: &[u8]) -> ParseState {
        if line.is_empty() {
            self.body_start = self.scan_pos;
            let Some(end) = self.body_start.checked_add(self.content_length) else {
                return ParseState::BadRequest;
            };
            if end > self.limit {
                return ParseState::BadRequest;
            }
            self.body_end = end;
            return if self.content_length > 0 {
                ParseState::Body
            } else {
                ParseState::Done
            };
        }

        if let Some(value) = header_value(line, b"Connection:") {
            if value.eq_ignore_ascii_case(b"keep-alive") {
                self.keep_alive = true;
            }
        } else if let Some(value) = header_value(line, b"Content-Length:") {
            // Malformed lengths count as no body.
            self.content_length = std::str::from_utf8(value)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
        } else if let Some(value) = header_value(line, b"Host:") {
            self.host = Some(String::from_utf8_lossy(value).into_owned());
        }
        ParseState::Headers
    }

    /// The parsed request, once the parser reached `Done`.
    pub fn request<'a>(&'a self, buf: &'a [u8]) -> Option<Request<'a>> {
        if self.state != ParseState::Done {
            return None;
        }
        let body = buf.get(self.body_start..self.body_end)?;
        Some(Request {
            method: self.method?,
            target: &self.target,
            host: self.host.as_deref(),
            keep_alive: self.keep_alive,
            content_length: self.content_length,
            body,
        })
    }
}

/// Strip an `http://` or `https://` scheme and authority, leaving a path that
/// starts with `/`.
fn origin_form(target: &str) -> Option<&str> {
    let mut rest = target;
    for scheme in ["http://", "https://"] {
        if rest
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        {
            rest = &rest[scheme.len()..];
            rest = &rest[rest.find('/')?..];
            break;
        }
    }
    rest.starts_with('/').then_some(rest)
}

/// Case-insensitive header name match; returns the value with leading
/// whitespace removed.
fn header_value<'a>(line: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    if line.len() < name.len() || !line[..name.len()].eq_ignore_ascii_case(name) {
        return None;
    }
    let value = &line[name.len()..];
    let start = value
        .iter()
        .position(|b| *b != b' ' && *b != b'\t')
        .unwrap_or(value.len());
    Some(value[start..].trim_ascii_end())
}
