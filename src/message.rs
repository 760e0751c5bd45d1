use std::io::{self, ErrorKind, Read};
use chrono::Utc;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use crate::def::*;

const NEWLINE: &'static str = "\r\n";
const CONTENT_LENGTH: &'static str = "Content-Length:";
// length of "Content-Length: ", the value is read from this offset on
const CONTENT_LENGTH_OFFSET: usize = 16;
const READ_CHUNK: usize = 1024;

pub const SERVER_NAME: &'static str = "ChatServer";
pub const MAX_HEADER_BYTES: usize = 10000;
pub const MAX_BODY_LENGTH: usize = 1 << 20;

lazy_static! {
    static ref REQUEST_LINE_REGEX: Regex = Regex::new(r"^(?P<method>\S+) +(?P<target>\S+) +(?P<version>HTTP/\d\.\d)$").unwrap();
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Line {
    /// A complete line with its terminator removed. Empty for a blank line.
    Text(String),
    /// Nothing more is readable right now, the read timed out or would block.
    Pending,
    /// The peer closed the connection and every buffered byte was consumed.
    Closed,
}

/// Splits a byte stream into CRLF or LF terminated lines, keeping partial lines between reads.
pub struct LineReader<R> {
    inner: R,
    buffer: Vec<u8>,
    closed: bool,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, buffer: Vec::new(), closed: false }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn next_line(&mut self) -> io::Result<Line> {
        loop {
            if let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
                line.pop();
                if line.last() == Some(&b'\r') { line.pop(); }
                return Ok(Line::Text(String::from_utf8_lossy(&line).into_owned()));
            }

            if self.closed {
                if self.buffer.is_empty() {
                    return Ok(Line::Closed);
                }
                let rest: Vec<u8> = self.buffer.drain(..).collect();
                return Ok(Line::Text(String::from_utf8_lossy(&rest).into_owned()));
            }

            if !self.fill()? {
                return Ok(Line::Pending);
            }
        }
    }

    /// Reads up to `length` raw bytes, buffered ones first. Returns fewer when the
    /// peer closes or stops sending before the length is reached.
    pub fn read_body(&mut self, length: usize) -> io::Result<Vec<u8>> {
        while self.buffer.len() < length && !self.closed {
            if !self.fill()? { break; }
        }

        let take = length.min(self.buffer.len());
        Ok(self.buffer.drain(..take).collect())
    }

    // false when nothing is readable right now
    fn fill(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => { self.closed = true; return Ok(true) },
                Ok(size) => { self.buffer.extend_from_slice(&chunk[..size]); return Ok(true) },
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }
}

/// The pieces of a request line, available only when it is well formed.
pub struct Headline<'a> {
    pub method: &'a str,
    pub target: &'a str,
    pub version: Version,
}

impl<'a> Headline<'a> {
    pub fn parse(line: &'a str) -> Option<Self> {
        let capture = REQUEST_LINE_REGEX.captures(line)?;
        Some(Self {
            method: capture.name("method")?.as_str(),
            target: capture.name("target")?.as_str(),
            version: Version::parse(capture.name("version")?.as_str())?,
        })
    }

    pub fn construct(version: Version, status: Status) -> String {
        match status.message() {
            Some(message) => format!("{} {} {}{}", version, status, message, NEWLINE),
            None => format!("{} {}{}", version, status, NEWLINE),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: Method,
    pub request_line: String,
    pub header_lines: Vec<String>,
    pub body: String,
}

impl ParsedRequest {
    pub fn parse<R: Read>(reader: &mut LineReader<R>) -> Result<Self, ParseError> {
        let request_line = match reader.next_line()? {
            Line::Text(line) if !line.is_empty() => line,
            _ => {
                debug!("no request line received");
                return Ok(Self::error());
            }
        };
        debug!("request: {}", request_line);

        let mut header_lines = Vec::new();
        let mut header_bytes = request_line.len();
        let mut declared_length = None;
        let terminated = loop {
            match reader.next_line()? {
                Line::Text(line) if line.is_empty() => break true,
                Line::Text(line) if header_bytes > MAX_HEADER_BYTES => {
                    // past the cap lines are consumed but only the body length is kept
                    if line.contains(CONTENT_LENGTH) {
                        declared_length = Some(content_length(&[line]));
                    }
                }
                Line::Text(line) => {
                    debug!("line: {}", line);
                    header_bytes += line.len();
                    header_lines.push(line);
                    if header_bytes > MAX_HEADER_BYTES {
                        warn!("header section exceeds {} bytes, not keeping the rest", MAX_HEADER_BYTES);
                    }
                }
                Line::Pending | Line::Closed => break false,
            }
        };

        let body = if terminated {
            let length = declared_length.unwrap_or_else(|| content_length(&header_lines));
            Self::read_body(reader, length)?
        } else {
            String::new()
        };

        Ok(Self { method: Method::classify(&request_line), request_line, header_lines, body })
    }

    fn error() -> Self {
        Self { method: Method::OTHER, request_line: "ERROR".to_string(), header_lines: Vec::new(), body: String::new() }
    }

    fn read_body<R: Read>(reader: &mut LineReader<R>, mut length: usize) -> Result<String, ParseError> {
        debug!("content length: {}", length);
        if length > MAX_BODY_LENGTH {
            warn!("content length {} exceeds {}, ignoring body", length, MAX_BODY_LENGTH);
            length = 0;
        }
        if length == 0 { return Ok(String::new()) }

        let payload = reader.read_body(length)?;
        if payload.len() < length {
            warn!("body ended after {} of {} bytes", payload.len(), length);
            return Ok(String::new());
        }

        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    /// Request target of a well formed request line, used for logging.
    pub fn target(&self) -> Option<&str> {
        Headline::parse(&self.request_line).map(|headline| headline.target)
    }
}

/// Declared body length. The value is read at a fixed offset from the line that
/// mentions `Content-Length:`, the last such line wins and anything unreadable is 0.
pub fn content_length(header_lines: &[String]) -> usize {
    header_lines.iter()
        .filter(|line| line.contains(CONTENT_LENGTH))
        .last()
        .and_then(|line| line.get(CONTENT_LENGTH_OFFSET..))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0)
}

pub struct Response<'a> {
    pub version: Version,
    pub status: Status,
    pub headers: Vec<Header<'a>>,
    pub payload: Vec<u8>,
}

impl<'a> Response<'a> {
    pub fn new(status: Status) -> Self {
        Self { version: Version::V11, status, headers: vec![Header::new("Server", SERVER_NAME)], payload: Vec::new() }
    }

    pub fn page(html: String) -> Self {
        let mut response = Self::new(Status::Ok);
        response.headers.push(Header::new("Date", http_date()));
        response.headers.push(Header::from(ContentType::HTML));
        response.payload = html.into_bytes();
        response
    }

    pub fn bad_request() -> Self {
        Self::new(Status::BadRequest)
    }

    pub fn construct(&self) -> Vec<u8> {
        let mut response = Headline::construct(self.version, self.status).into_bytes();
        for header in &self.headers {
            response.extend(header.construct().as_bytes());
            response.extend(NEWLINE.as_bytes());
        }
        if !self.payload.is_empty() {
            response.extend(Header::new("Content-Length", self.payload.len().to_string()).construct().as_bytes());
            response.extend(NEWLINE.as_bytes());
        }
        response.extend(NEWLINE.as_bytes());
        response.extend(&self.payload);
        response
    }
}

fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Cursor;

    // hands out scripted chunks, an empty chunk reads as WouldBlock
    struct Scripted(VecDeque<Vec<u8>>);

    impl Scripted {
        fn new(chunks: &[&[u8]]) -> Self {
            Self(chunks.iter().map(|c| c.to_vec()).collect())
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(chunk) if chunk.is_empty() => Err(io::Error::new(ErrorKind::WouldBlock, "pending")),
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
            }
        }
    }

    fn parse(raw: &[u8]) -> ParsedRequest {
        ParsedRequest::parse(&mut LineReader::new(Cursor::new(raw.to_vec()))).unwrap()
    }

    fn text(line: &str) -> Line {
        Line::Text(line.to_string())
    }

    #[test]
    fn lines_split_across_reads() {
        let mut reader = LineReader::new(Scripted::new(&[b"GET / HT", b"TP/1.1\r", b"\nHost: x\n\r\n"]));
        assert_eq!(reader.next_line().unwrap(), text("GET / HTTP/1.1"));
        assert_eq!(reader.next_line().unwrap(), text("Host: x"));
        assert_eq!(reader.next_line().unwrap(), text(""));
        assert_eq!(reader.next_line().unwrap(), Line::Closed);
    }

    #[test]
    fn blank_line_differs_from_pending_and_closed() {
        let mut reader = LineReader::new(Scripted::new(&[b"\r\n", b"", b"partial"]));
        assert_eq!(reader.next_line().unwrap(), text(""));
        assert_eq!(reader.next_line().unwrap(), Line::Pending);
        assert_eq!(reader.next_line().unwrap(), text("partial"));
        assert_eq!(reader.next_line().unwrap(), Line::Closed);
    }

    #[test]
    fn read_errors_propagate() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(ErrorKind::ConnectionReset, "reset"))
            }
        }

        let result = ParsedRequest::parse(&mut LineReader::new(Broken));
        assert!(matches!(result, Err(ParseError::IO(_))));
    }

    #[test]
    fn read_body_uses_buffer_first() {
        let mut reader = LineReader::new(Scripted::new(&[b"\r\nabc", b"def", b"", b"ghi"]));
        assert_eq!(reader.next_line().unwrap(), text(""));
        assert_eq!(reader.read_body(4).unwrap(), b"abcd");
        assert_eq!(reader.read_body(10).unwrap(), b"ef");
    }

    #[test]
    fn get_without_body() {
        let request = parse(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.request_line, "GET / HTTP/1.1");
        assert_eq!(request.header_lines, vec!["Host: localhost"]);
        assert_eq!(request.body, "");
        assert_eq!(request.target(), Some("/"));
    }

    #[test]
    fn post_reads_exact_body() {
        let request = parse(b"POST / HTTP/1.1\r\nContent-Length: 30\r\n\r\nusername=Bob&message=Hi+there!trailing");
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.body, "username=Bob&message=Hi+there!");
    }

    #[test]
    fn body_may_contain_newlines() {
        let request = parse(b"POST / HTTP/1.1\nContent-Length: 9\n\nab\r\ncd\nef");
        assert_eq!(request.header_lines, vec!["Content-Length: 9"]);
        assert_eq!(request.body, "ab\r\ncd\nef");
    }

    #[test]
    fn missing_content_length_means_no_body() {
        let request = parse(b"POST / HTTP/1.1\r\nHost: x\r\n\r\nusername=a&message=b");
        assert_eq!(request.body, "");
    }

    #[test]
    fn malformed_content_length_means_no_body() {
        let request = parse(b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\nusername=a&message=b");
        assert_eq!(request.body, "");
    }

    #[test]
    fn content_length_fixed_offset() {
        let lines = |line: &str| vec![line.to_string()];
        assert_eq!(content_length(&lines("Content-Length: 12")), 12);
        assert_eq!(content_length(&lines("Content-Length: 12  ")), 12);
        assert_eq!(content_length(&lines("Content-Length:12")), 2);
        assert_eq!(content_length(&lines("content-length: 12")), 0);
        assert_eq!(content_length(&lines("Content-Length:")), 0);
        assert_eq!(content_length(&["Content-Length: 1".to_string(), "Content-Length: 5".to_string()]), 5);
    }

    #[test]
    fn short_body_degrades_to_empty() {
        let request = parse(b"POST / HTTP/1.1\r\nContent-Length: 50\r\n\r\nusername=a&message=b");
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.body, "");
    }

    #[test]
    fn stalled_body_degrades_to_empty() {
        let mut reader = LineReader::new(Scripted::new(&[b"POST / HTTP/1.1\r\nContent-Length: 20\r\n\r\nuser", b""]));
        let request = ParsedRequest::parse(&mut reader).unwrap();
        assert_eq!(request.body, "");
    }

    #[test]
    fn oversized_body_is_ignored() {
        let raw = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\nusername=a&message=b", MAX_BODY_LENGTH + 1);
        assert_eq!(parse(raw.as_bytes()).body, "");
    }

    #[test]
    fn empty_input_yields_error_line() {
        let request = parse(b"");
        assert_eq!(request.method, Method::OTHER);
        assert_eq!(request.request_line, "ERROR");
        assert!(request.header_lines.is_empty());

        let silent = ParsedRequest::parse(&mut LineReader::new(Scripted::new(&[b""]))).unwrap();
        assert_eq!(silent.request_line, "ERROR");
    }

    #[test]
    fn headers_without_terminator() {
        let request = parse(b"POST / HTTP/1.1\r\nContent-Length: 3");
        assert_eq!(request.header_lines, vec!["Content-Length: 3"]);
        assert_eq!(request.body, "");
    }

    #[test]
    fn header_section_is_capped() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..2000 {
            raw.extend(format!("X-Filler-{}: value\r\n", i).as_bytes());
        }
        raw.extend(b"\r\n");

        let request = parse(&raw);
        assert_eq!(request.method, Method::GET);
        assert!(request.header_lines.len() < 2000);
    }

    #[test]
    fn body_follows_oversized_headers() {
        let mut raw = b"POST / HTTP/1.1\r\n".to_vec();
        for i in 0..600 {
            raw.extend(format!("X-Filler-{}: value\r\n", i).as_bytes());
        }
        raw.extend(b"Content-Length: 20\r\n\r\nusername=a&message=b");

        let request = parse(&raw);
        assert!(raw.len() > MAX_HEADER_BYTES);
        assert!(request.header_lines.len() < 600);
        assert_eq!(request.body, "username=a&message=b");
    }

    #[test]
    fn content_encoding_does_not_touch_body() {
        let request = parse(b"POST / HTTP/1.1\r\nContent-Encoding: gzip\r\nContent-Length: 20\r\n\r\nusername=a&message=b");
        assert_eq!(request.body.len(), 20);
        assert_eq!(request.body, "username=a&message=b");
    }

    #[test]
    fn target_requires_well_formed_line() {
        assert_eq!(parse(b"GET /chat?x=1 HTTP/1.0\r\n\r\n").target(), Some("/chat?x=1"));
        assert_eq!(parse(b"GET\r\n\r\n").target(), None);
    }

    #[test]
    fn construct_page() {
        let response = Response::page("<html></html>".to_string());
        let text = String::from_utf8(response.construct()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200\r\nServer: ChatServer\r\nDate: "));
        assert!(text.contains("\r\nContent-Type: text/html; charset=UTF-8\r\n"));
        assert!(text.contains("\r\nContent-Length: 13\r\n"));
        assert!(text.ends_with("\r\n\r\n<html></html>"));
    }

    #[test]
    fn construct_bad_request() {
        let response = Response::bad_request();
        assert_eq!(response.construct(), b"HTTP/1.1 400 ERROR\r\nServer: ChatServer\r\n\r\n".to_vec());
        assert!(response.headers.iter().all(|h| h.name != "Date"));
    }
}
