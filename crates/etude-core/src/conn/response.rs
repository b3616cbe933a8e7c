use std::io::{self, Cursor, Write};
use std::time::SystemTime;

use crate::http::{HTTP_VERSION, HttpStatus, SERVER_NAME};

/// Writes a response head into a fixed buffer. Running out of room is an
/// error rather than a reallocation.
pub struct ResponseWriter<'a> {
    cursor: Cursor<&'a mut [u8]>,
}

impl<'a> ResponseWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            cursor: Cursor::new(buf),
        }
    }

    /// Status line plus every header, ending with the blank line.
    pub fn head(
        &mut self,
        status: HttpStatus,
        content_type: &str,
        content_length: u64,
        keep_alive: bool,
    ) -> io::Result<()> {
        let date = httpdate::fmt_http_date(SystemTime::now());
        write!(
            self.cursor,
            "{} {} {}\r\n\
             Server: {}\r\n\
             Date: {}\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\
             Connection: {}\r\n\
             \r\n",
            HTTP_VERSION,
            status.code(),
            status.reason(),
            SERVER_NAME,
            date,
            content_type,
            content_length,
            if keep_alive { "keep-alive" } else { "close" },
        )
    }

    /// A complete built-in error response.
    pub fn error_page(&mut self, status: HttpStatus, keep_alive: bool) -> io::Result<()> {
        let page = status.error_page();
        self.head(status, "text/html", page.len() as u64, keep_alive)?;
        self.cursor.write_all(page.as_bytes())
    }

    /// Room left after what has been written so far.
    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len() - self.len()
    }

    /// The unused tail of the buffer, for reading a small body in place.
    pub fn spare(&mut self) -> &mut [u8] {
        let pos = self.len();
        &mut self.cursor.get_mut()[pos..]
    }

    /// Mark `n` bytes of [`spare`](Self::spare) as written.
    pub fn commit(&mut self, n: usize) {
        let pos = (self.len() + n).min(self.cursor.get_ref().len());
        self.cursor.set_position(pos as u64);
    }

    pub fn len(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_lists_headers_in_order() {
        let mut buf = [0u8; 512];
        let mut writer = ResponseWriter::new(&mut buf);
        writer.head(HttpStatus::FileReady, "text/plain", 12, true).unwrap();
        let len = writer.len();
        let text = std::str::from_utf8(&buf[..len]).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\nServer: etude\r\nDate: "));
        let tail = "Content-Type: text/plain\r\nContent-Length: 12\r\nConnection: keep-alive\r\n\r\n";
        assert!(text.ends_with(tail));
    }

    #[test]
    fn error_page_carries_its_body() {
        let mut buf = [0u8; 512];
        let mut writer = ResponseWriter::new(&mut buf);
        writer.error_page(HttpStatus::NotFound, false).unwrap();
        let len = writer.len();
        let text = std::str::from_utf8(&buf[..len]).unwrap();

        let body = HttpStatus::NotFound.error_page();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains(&format!("Content-Length: {}\r\n", body.len())));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with(&format!("\r\n\r\n{}", body)));
    }

    #[test]
    fn overflow_is_an_error() {
        let mut buf = [0u8; 32];
        let mut writer = ResponseWriter::new(&mut buf);
        assert!(writer.error_page(HttpStatus::BadRequest, false).is_err());
    }

    #[test]
    fn spare_and_commit_append_in_place() {
        let mut buf = [0u8; 8];
        let mut writer = ResponseWriter::new(&mut buf);
        writer.spare()[..3].copy_from_slice(b"abc");
        writer.commit(3);
        assert_eq!(writer.len(), 3);
        assert_eq!(writer.remaining(), 5);
        assert_eq!(&buf[..3], b"abc");
    }
}
