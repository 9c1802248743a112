//! Incremental HTTP/1.1 request parser.
//!
//! State machine ported from the original server's `httpRequest::parse`
//! (`REQUEST_LINE` → `HEADERS` → `BODY` → `FINISH`), generalized to the
//! teacher crate's cursor-over-owned-buffer style
//! (`src/http/request.rs`'s `parse_request_line`/`extract_and_parse_header`)
//! instead of re-scanning a `Buffer` each call. CGI, chunked transfer
//! encoding, and multipart upload parsing are out of scope and dropped.
//!
//! BODY does not wait for `Content-Length` bytes to arrive: once
//! headers finish, fewer than 3 readable bytes means there's no body,
//! otherwise whatever is currently buffered becomes the body outright.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    POST,
    DELETE,
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::DELETE => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "DELETE" => Ok(Method::DELETE),
            _ => Err(ParseError::InvalidMethod),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParsingState {
    RequestLine,
    Headers,
    /// Carries the byte count that was readable right after headers
    /// finished — not a promise from `Content-Length`.
    Body(usize),
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    IncompleteRequestLine,
    MalformedRequestLine,
    InvalidMethod,
    InvalidHeaderLine,
    PayloadTooLarge,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::IncompleteRequestLine => write!(f, "incomplete request"),
            ParseError::MalformedRequestLine => write!(f, "malformed request line"),
            ParseError::InvalidMethod => write!(f, "invalid HTTP method"),
            ParseError::InvalidHeaderLine => write!(f, "invalid header line"),
            ParseError::PayloadTooLarge => write!(f, "payload too large"),
        }
    }
}

impl std::error::Error for ParseError {}

const CRLF_LEN: usize = 2;
/// Same name set as the original's `DEFAULT_HTML`: bare resource names
/// that get a `.html` suffix appended.
const DEFAULT_HTML: &[&str] = &["/index", "/register", "/login", "/welcome", "/video", "/picture"];
const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub post: HashMap<String, String>,
    pub body: Vec<u8>,
    pub buffer: Vec<u8>,
    pub cursor: usize,
    pub state: ParsingState,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        HttpRequest {
            method: Method::GET,
            url: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            post: HashMap::new(),
            body: Vec::new(),
            buffer: Vec::with_capacity(4096),
            cursor: 0,
            state: ParsingState::RequestLine,
        }
    }

    pub fn is_keep_alive(&self) -> bool {
        self.headers
            .get("connection")
            .map(|v| v.eq_ignore_ascii_case("keep-alive") && self.version == "1.1")
            .unwrap_or(false)
    }

    /// Drives the state machine as far as the currently buffered bytes
    /// allow. Returns `Ok(())` once `state` reaches `Complete`, or
    /// `Err(IncompleteRequestLine)` when more bytes are needed — the
    /// caller re-feeds `buffer` and calls again.
    pub fn parse_request(&mut self) -> Result<(), ParseError> {
        loop {
            match self.state {
                ParsingState::RequestLine => self.parse_request_line()?,
                ParsingState::Headers => self.parse_headers()?,
                ParsingState::Body(_) => self.parse_body()?,
                ParsingState::Complete => break,
            }
            if self.state == ParsingState::Complete {
                break;
            }
        }
        self.normalize_path();
        self.parse_form_body_if_applicable();
        Ok(())
    }

    /// Whether this completed request should be checked against the
    /// user table, and if so whether it's a login (`true`) or a
    /// register (`false`) attempt — mirrors `DEFAULT_HTML_TAG`.
    pub fn auth_intent(&self) -> Option<bool> {
        if self.method != Method::POST {
            return None;
        }
        match self.url.as_str() {
            "/login.html" => Some(true),
            "/register.html" => Some(false),
            _ => None,
        }
    }

    fn parse_request_line(&mut self) -> Result<(), ParseError> {
        let Some(line_end) = find_crlf(&self.buffer, self.cursor) else {
            return Err(ParseError::IncompleteRequestLine);
        };
        let line = std::str::from_utf8(&self.buffer[self.cursor..line_end])
            .map_err(|_| ParseError::MalformedRequestLine)?;

        let parts: Vec<&str> = line.split_whitespace().collect();
        let [method, url, version] = &parts[..] else {
            return Err(ParseError::MalformedRequestLine);
        };
        let version = version.strip_prefix("HTTP/").unwrap_or(version);

        self.method = method.parse()?;
        self.url = url.to_string();
        self.version = version.to_string();
        self.cursor = line_end + CRLF_LEN;
        self.state = ParsingState::Headers;
        Ok(())
    }

    fn extract_header_line(&mut self) -> Result<Option<(String, String)>, ParseError> {
        let Some(line_end) = find_crlf(&self.buffer, self.cursor) else {
            return Err(ParseError::IncompleteRequestLine);
        };
        let line_bytes = &self.buffer[self.cursor..line_end];
        self.cursor = line_end + CRLF_LEN;
        if line_bytes.is_empty() {
            return Ok(None);
        }
        let line = std::str::from_utf8(line_bytes).map_err(|_| ParseError::InvalidHeaderLine)?;
        let sep = line.find(':').ok_or(ParseError::InvalidHeaderLine)?;
        let key = line[..sep].trim().to_ascii_lowercase();
        let value = line[sep + 1..].trim().to_string();
        Ok(Some((key, value)))
    }

    fn parse_headers(&mut self) -> Result<(), ParseError> {
        loop {
            match self.extract_header_line()? {
                Some((k, v)) => {
                    self.headers.insert(k, v);
                }
                None => {
                    self.state = self.state_after_headers()?;
                    return Ok(());
                }
            }
        }
    }

    /// Fewer than 3 bytes left readable means there's no body worth
    /// waiting for; otherwise BODY grabs whatever is currently
    /// buffered, `Content-Length` notwithstanding — a request line like
    /// `Content-Length: 27` with only 24 bytes of payload on hand still
    /// completes with a 24-byte body rather than blocking forever.
    fn state_after_headers(&self) -> Result<ParsingState, ParseError> {
        let available = self.buffer.len().saturating_sub(self.cursor);
        if available > MAX_BODY_SIZE {
            return Err(ParseError::PayloadTooLarge);
        }
        Ok(if available < 3 {
            ParsingState::Complete
        } else {
            ParsingState::Body(available)
        })
    }

    fn parse_body(&mut self) -> Result<(), ParseError> {
        let ParsingState::Body(remaining) = self.state else {
            unreachable!("parse_body called outside Body state")
        };
        let available = self.buffer.len().saturating_sub(self.cursor);
        let take = remaining.min(available);
        self.body = self.buffer[self.cursor..self.cursor + take].to_vec();
        self.cursor += take;
        self.state = ParsingState::Complete;
        Ok(())
    }

    /// Matches the original's `parsePath_`: `"/"` becomes
    /// `/index.html`, and bare names in `DEFAULT_HTML` get `.html`
    /// appended.
    fn normalize_path(&mut self) {
        if self.state != ParsingState::Complete {
            return;
        }
        if self.url == "/" {
            self.url = "/index.html".to_string();
        } else if DEFAULT_HTML.contains(&self.url.as_str()) {
            self.url.push_str(".html");
        }
    }

    fn parse_form_body_if_applicable(&mut self) {
        if self.state != ParsingState::Complete || self.method != Method::POST {
            return;
        }
        let is_form = self
            .headers
            .get("content-type")
            .map(|v| v == "application/x-www-form-urlencoded")
            .unwrap_or(false);
        if !is_form || self.body.is_empty() {
            return;
        }
        for pair in self.body.split(|&b| b == b'&') {
            let mut parts = pair.splitn(2, |&b| b == b'=');
            let key = percent_decode(parts.next().unwrap_or(&[]));
            let value = percent_decode(parts.next().unwrap_or(&[]));
            self.post.insert(key, value);
        }
    }

    /// Drops everything already consumed by a completed parse and
    /// resets state for the next pipelined request on the same buffer.
    pub fn finish_request(&mut self) {
        self.buffer.drain(..self.cursor);
        self.cursor = 0;
        self.headers.clear();
        self.post.clear();
        self.body.clear();
        self.state = ParsingState::RequestLine;
    }
}

fn find_crlf(buffer: &[u8], start: usize) -> Option<usize> {
    buffer
        .get(start..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|pos| start + pos)
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// `application/x-www-form-urlencoded` decoding: `+` becomes a space,
/// `%HH` becomes the byte it encodes, everything else passes through.
fn percent_decode(bytes: &[u8]) -> String {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_get_request() {
        let mut req = HttpRequest::new();
        req.buffer
            .extend_from_slice(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n");

        req.parse_request().unwrap();

        assert_eq!(req.method, Method::GET);
        assert_eq!(req.url, "/index.html");
        assert_eq!(req.state, ParsingState::Complete);
        assert_eq!(req.headers.get("host").unwrap(), "localhost");
    }

    #[test]
    fn fragmented_headers_accumulate_across_calls() {
        let mut req = HttpRequest::new();

        req.buffer.extend_from_slice(b"GET /path ");
        assert_eq!(req.parse_request().unwrap_err(), ParseError::IncompleteRequestLine);

        req.buffer.extend_from_slice(b"HTTP/1.1\r\n");
        assert_eq!(req.parse_request().unwrap_err(), ParseError::IncompleteRequestLine);
        assert_eq!(req.state, ParsingState::Headers);

        req.buffer.extend_from_slice(b"User-Agent: test\r\n\r\n");
        assert!(req.parse_request().is_ok());
        assert_eq!(req.state, ParsingState::Complete);
    }

    #[test]
    fn post_request_with_complete_body() {
        let mut req = HttpRequest::new();
        req.buffer
            .extend_from_slice(b"POST /api HTTP/1.1\r\nContent-Length: 13\r\n\r\nHello, World!");

        req.parse_request().unwrap();

        assert_eq!(req.method, Method::POST);
        assert_eq!(req.body, b"Hello, World!");
        assert_eq!(req.state, ParsingState::Complete);
    }

    #[test]
    fn body_uses_whatever_is_readable_regardless_of_content_length() {
        // Declares 27 bytes but only 24 are actually on hand; BODY
        // takes what's readable instead of waiting for the declared
        // count.
        let mut req = HttpRequest::new();
        let body: &[u8] = b"username=a&passwd=b%21+c";
        req.buffer
            .extend_from_slice(b"POST /login.html HTTP/1.1\r\nContent-Length: 27\r\n\r\n");
        req.buffer.extend_from_slice(body);

        req.parse_request().unwrap();

        assert_eq!(req.state, ParsingState::Complete);
        assert_eq!(req.body, body);
    }

    #[test]
    fn fewer_than_three_trailing_bytes_finish_without_a_body() {
        let mut req = HttpRequest::new();
        req.buffer.extend_from_slice(b"POST /x HTTP/1.1\r\n\r\nab");

        req.parse_request().unwrap();

        assert_eq!(req.state, ParsingState::Complete);
        assert!(req.body.is_empty());
    }

    #[test]
    fn invalid_method_is_rejected() {
        let mut req = HttpRequest::new();
        req.buffer.extend_from_slice(b"PATCH /invalid HTTP/1.1\r\n\r\n");
        assert_eq!(req.parse_request().unwrap_err(), ParseError::InvalidMethod);
    }

    #[test]
    fn bare_resource_names_get_html_suffix() {
        let mut req = HttpRequest::new();
        req.buffer.extend_from_slice(b"GET /welcome HTTP/1.1\r\n\r\n");
        req.parse_request().unwrap();
        assert_eq!(req.url, "/welcome.html");
    }

    #[test]
    fn root_path_resolves_to_index() {
        let mut req = HttpRequest::new();
        req.buffer.extend_from_slice(b"GET / HTTP/1.1\r\n\r\n");
        req.parse_request().unwrap();
        assert_eq!(req.url, "/index.html");
    }

    #[test]
    fn form_body_is_percent_decoded_into_post_map() {
        let mut req = HttpRequest::new();
        let body = b"username=alice&passwd=p%40ss+word";
        let head = format!(
            "POST /login.html HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        req.buffer.extend_from_slice(head.as_bytes());
        req.buffer.extend_from_slice(body);

        req.parse_request().unwrap();

        assert_eq!(req.post.get("username").unwrap(), "alice");
        assert_eq!(req.post.get("passwd").unwrap(), "p@ss word");
        assert_eq!(req.auth_intent(), Some(true));
    }

    #[test]
    fn finish_request_resets_for_next_pipelined_request() {
        // Each request arrives in its own read, as a keep-alive client
        // waiting for the first response before sending the next would
        // behave — BODY's "grab whatever's readable" rule means bytes
        // from a second request already sitting in the buffer would
        // otherwise be consumed as the first request's body.
        let mut req = HttpRequest::new();
        req.buffer.extend_from_slice(b"GET /index.html HTTP/1.1\r\n\r\n");
        req.parse_request().unwrap();
        req.finish_request();

        req.buffer.extend_from_slice(b"GET /next.html HTTP/1.1\r\n\r\n");
        req.parse_request().unwrap();
        assert_eq!(req.url, "/next.html");
    }
}
