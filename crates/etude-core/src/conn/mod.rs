//! Per-connection state: fixed buffers, the incremental parser and the
//! response that is waiting to be flushed.

pub mod parser;
pub mod response;

use std::io::{self, IoSlice, Read};
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;

use arrayvec::ArrayVec;
use memmap2::Mmap;
use tracing::debug;

use crate::config::ServerConfig;
use crate::http::{HttpStatus, Request};
use crate::pool::ResourcePool;
use crate::resolve::{self, Document};
use crate::router::Router;
use crate::syscalls::{Interest, read_nonblocking, writev_nonblocking};

pub use parser::{LineStatus, ParseState, RequestParser};
pub use response::ResponseWriter;

/// The part of the configuration a connection needs.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub doc_root: PathBuf,
    pub default_document: String,
    pub inline_file_limit: usize,
}

impl ConnectionSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            read_buffer_size: config.read_buffer_size,
            write_buffer_size: config.write_buffer_size,
            doc_root: config.doc_root.clone(),
            default_document: config.default_document.clone(),
            inline_file_limit: config.inline_file_limit,
        }
    }
}

/// Result of a completed or interrupted flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The socket stopped accepting data; wait for write readiness.
    NeedsRearmForWrite,
    /// Everything was sent and the connection was reset for the next request.
    CompleteKeepAlive,
    /// Everything was sent; the connection should be closed.
    CompleteClose,
}

/// Second output segment, after the head in the write buffer.
#[derive(Debug, Default)]
enum Body {
    #[default]
    None,
    Mapped(Mmap),
}

impl Body {
    fn bytes(&self) -> &[u8] {
        match self {
            Body::None => &[],
            Body::Mapped(map) => map,
        }
    }
}

pub struct Connection {
    fd: Option<OwnedFd>,
    peer: Option<SocketAddr>,
    settings: Arc<ConnectionSettings>,

    read_buf: Box<[u8]>,
    read_pos: usize,
    parser: RequestParser,

    write_buf: Box<[u8]>,
    write_len: usize,
    body: Body,
    sent: usize,
    keep_alive: bool,
}

impl Connection {
    /// An unopened connection with its buffers allocated once.
    pub fn new(settings: Arc<ConnectionSettings>) -> Self {
        Self {
            fd: None,
            peer: None,
            read_buf: vec![0; settings.read_buffer_size].into_boxed_slice(),
            read_pos: 0,
            parser: RequestParser::with_limit(settings.read_buffer_size),
            write_buf: vec![0; settings.write_buffer_size].into_boxed_slice(),
            write_len: 0,
            body: Body::None,
            sent: 0,
            keep_alive: false,
            settings,
        }
    }

    /// Take ownership of a freshly accepted socket.
    pub fn open(&mut self, fd: OwnedFd, peer: Option<SocketAddr>) {
        self.reset();
        self.fd = Some(fd);
        self.peer = peer;
    }

    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn socket(&self) -> io::Result<RawFd> {
        self.raw_fd()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }

    /// Read everything the socket has into the read buffer.
    ///
    /// Stops early once the buffer is full; the parser then decides whether
    /// a whole request fits. A peer close is an error, and so is any failure
    /// other than "would block".
    pub fn drain(&mut self) -> io::Result<()> {
        let fd = self.socket()?;
        while self.read_pos < self.read_buf.len() {
            match read_nonblocking(fd, &mut self.read_buf[self.read_pos..])? {
                None => return Ok(()),
                Some(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Some(n) => self.read_pos += n,
            }
        }
        Ok(())
    }

    /// Run the parser over everything buffered so far.
    pub fn parse(&mut self) -> ParseState {
        self.parser
            .advance(&self.read_buf[..self.read_pos], &self.settings.default_document)
    }

    /// The parsed request, once parsing reached `Done`.
    pub fn request(&self) -> Option<Request<'_>> {
        self.parser.request(&self.read_buf[..self.read_pos])
    }

    fn read_buffer_full(&self) -> bool {
        self.read_pos == self.read_buf.len()
    }

    /// One worker step: parse, route, resolve and build the response.
    ///
    /// Returns the interest the connection must be re-armed for.
    pub fn process<R>(&mut self, router: &Router<R>, pool: &ResourcePool<R>) -> Interest {
        match self.parse() {
            ParseState::Done => {}
            ParseState::BadRequest => {
                self.respond_error(HttpStatus::BadRequest);
                return Interest::Write;
            }
            _ if self.read_buffer_full() => {
                debug!(peer = ?self.peer, "request exceeds read buffer");
                self.abort();
                return Interest::Write;
            }
            _ => return Interest::Read,
        }

        let resolved = match self.request() {
            Some(req) => router
                .dispatch(&req, pool)
                .and_then(|target| resolve::resolve(&self.settings.doc_root, &target)),
            None => Err(HttpStatus::BadRequest),
        };

        match resolved {
            Ok(document) => self.respond_document(document),
            Err(status) => self.respond_error(status),
        }
        Interest::Write
    }

    /// Queue a built-in error page. A 400 always closes the connection.
    pub fn respond_error(&mut self, status: HttpStatus) {
        self.keep_alive = status != HttpStatus::BadRequest && self.parser.keep_alive();
        self.body = Body::None;
        self.sent = 0;

        let mut writer = ResponseWriter::new(&mut self.write_buf);
        match writer.error_page(status, self.keep_alive) {
            Ok(()) => self.write_len = writer.len(),
            Err(_) => self.abort(),
        }
    }

    /// Queue a resolved document. Small files are copied behind the head;
    /// larger ones are mapped and sent as a second segment.
    pub fn respond_document(&mut self, mut document: Document) {
        self.keep_alive = self.parser.keep_alive();
        self.body = Body::None;
        self.sent = 0;

        let Ok(len) = usize::try_from(document.len) else {
            return self.respond_error(HttpStatus::InternalFault);
        };
        let content_type = document.content_type();
        let mut writer = ResponseWriter::new(&mut self.write_buf);
        if writer
            .head(HttpStatus::FileReady, &content_type, document.len, self.keep_alive)
            .is_err()
        {
            return self.abort();
        }

        if len == 0 {
            self.write_len = writer.len();
            return;
        }

        if len <= self.settings.inline_file_limit && len <= writer.remaining() {
            match document.file.read_exact(&mut writer.spare()[..len]) {
                Ok(()) => {
                    writer.commit(len);
                    self.write_len = writer.len();
                }
                Err(e) => {
                    debug!(path = %document.path.display(), error = %e, "read failed");
                    self.respond_error(HttpStatus::InternalFault);
                }
            }
            return;
        }

        // SAFETY: the mapping is read-only and dropped before the connection
        // is reused; documents are not expected to be truncated while served.
        match unsafe { Mmap::map(&document.file) } {
            Ok(map) if map.len() == len => {
                self.write_len = writer.len();
                self.body = Body::Mapped(map);
            }
            Ok(_) => self.respond_error(HttpStatus::InternalFault),
            Err(e) => {
                debug!(path = %document.path.display(), error = %e, "mmap failed");
                self.respond_error(HttpStatus::InternalFault);
            }
        }
    }

    /// Give up on the request: nothing is sent and the next flush closes.
    pub fn abort(&mut self) {
        self.keep_alive = false;
        self.write_len = 0;
        self.body = Body::None;
        self.sent = 0;
    }

    /// Bytes of the response not yet sent.
    pub fn pending(&self) -> usize {
        (self.write_len + self.body.bytes().len()).saturating_sub(self.sent)
    }

    /// Send the queued response with vectored writes, resuming exactly where
    /// the previous call stopped. Also returns how many bytes this call sent.
    pub fn flush(&mut self) -> io::Result<(FlushOutcome, usize)> {
        let fd = self.socket()?;
        let mut written = 0;

        while self.pending() > 0 {
            let mut segments: ArrayVec<IoSlice<'_>, 2> = ArrayVec::new();
            if self.sent < self.write_len {
                segments.push(IoSlice::new(&self.write_buf[self.sent..self.write_len]));
            }
            let body = self.body.bytes();
            let body_sent = self.sent.saturating_sub(self.write_len);
            if body_sent < body.len() {
                segments.push(IoSlice::new(&body[body_sent..]));
            }

            match writev_nonblocking(fd, &segments)? {
                None => return Ok((FlushOutcome::NeedsRearmForWrite, written)),
                Some(0) => return Err(io::ErrorKind::WriteZero.into()),
                Some(n) => {
                    self.sent += n;
                    written += n;
                }
            }
        }

        self.body = Body::None;
        if self.keep_alive {
            self.reset();
            Ok((FlushOutcome::CompleteKeepAlive, written))
        } else {
            Ok((FlushOutcome::CompleteClose, written))
        }
    }

    /// Clear every cursor and the parser for the next request on the same
    /// socket. Any mapping is released.
    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.parser.reset();
        self.write_len = 0;
        self.body = Body::None;
        self.sent = 0;
        self.keep_alive = false;
    }

    /// Release the socket and every per-request resource.
    pub fn close(&mut self) {
        self.reset();
        self.fd = None;
        self.peer = None;
    }

    /// True when the connection holds no socket, no buffered bytes and no mapping.
    pub fn is_idle(&self) -> bool {
        self.fd.is_none()
            && self.read_pos == 0
            && self.write_len == 0
            && self.sent == 0
            && matches!(self.body, Body::None)
            && self.parser.state() == ParseState::RequestLine
    }
}
