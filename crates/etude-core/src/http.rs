/// The only protocol version the parser accepts.
pub const HTTP_VERSION: &str = "HTTP/1.1";

pub const SERVER_NAME: &str = "etude";

/// Supported request methods: one body-less retrieval, one body-bearing submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Case-insensitive match; anything else is not supported.
    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        if b.eq_ignore_ascii_case(b"GET") {
            Some(Method::Get)
        } else if b.eq_ignore_ascii_case(b"POST") {
            Some(Method::Post)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Final outcome of a request, and the status line it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    /// 200: a document is ready to be sent.
    FileReady,
    /// 400: malformed request or a target that cannot be served.
    BadRequest,
    /// 403: the document exists but is not world-readable.
    Forbidden,
    /// 404: the document does not exist.
    NotFound,
    /// 500: resolution succeeded but the document could not be opened or mapped.
    InternalFault,
}

impl HttpStatus {
    pub fn code(self) -> u16 {
        match self {
            HttpStatus::FileReady => 200,
            HttpStatus::BadRequest => 400,
            HttpStatus::Forbidden => 403,
            HttpStatus::NotFound => 404,
            HttpStatus::InternalFault => 500,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            HttpStatus::FileReady => "OK",
            HttpStatus::BadRequest => "Bad Request",
            HttpStatus::Forbidden => "Forbidden",
            HttpStatus::NotFound => "Not Found",
            HttpStatus::InternalFault => "Internal Error",
        }
    }

    /// Body of the built-in error page.
    pub fn error_page(self) -> &'static str {
        match self {
            HttpStatus::FileReady => "",
            HttpStatus::BadRequest => {
                "Your request has bad syntax or is inherently impossible to satisfy.\n"
            }
            HttpStatus::Forbidden => "You do not have permission to get file from this server.\n",
            HttpStatus::NotFound => "The requested file was not found on this server.\n",
            HttpStatus::InternalFault => {
                "There was an unusual problem serving the requested file.\n"
            }
        }
    }
}

/// Fixed refusal sent when the connection ceiling is reached.
pub const BUSY_RESPONSE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\
Content-Length: 21\r\n\
Connection: close\r\n\
\r\n\
Internal server busy\n";

/// A fully parsed request, borrowing the connection's read buffer.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub method: Method,
    /// Origin-form path, with the default document substituted for `/`.
    pub target: &'a str,
    pub host: Option<&'a str>,
    pub keep_alive: bool,
    pub content_length: usize,
    pub body: &'a [u8],
}

impl<'a> Request<'a> {
    /// The target without any query string, used as the routing key.
    pub fn path(&self) -> &'a str {
        match self.target.find('?') {
            Some(idx) => &self.target[..idx],
            None => self.target,
        }
    }
}
