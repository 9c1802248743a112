//! HTTP response builder: status line, headers, and a zero-copy body
//! served either from an owned byte vector or an `mmap`-ed file.
//!
//! Ported from the original server's `httpResponse`. Both documented
//! defects are fixed here rather than reproduced: `code_` is genuinely
//! assigned (not compared) when defaulting to 200, and the length
//! header is spelled `Content-Length`.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Matches the original's `SUFFIX_TYPE` table exactly.
const SUFFIX_TYPE: &[(&str, &str)] = &[
    (".html", "text/html"),
    (".xml", "text/xml"),
    (".xhtml", "application/xhtml+xml"),
    (".txt", "text/plain"),
    (".rtf", "application/rtf"),
    (".pdf", "application/pdf"),
    (".word", "application/nsword"),
    (".png", "image/png"),
    (".gif", "image/gif"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".au", "audio/basic"),
    (".mpeg", "video/mpeg"),
    (".mpg", "video/mpeg"),
    (".avi", "video/x-msvideo"),
    (".gz", "application/x-gzip"),
    (".tar", "application/x-tar"),
    (".css", "text/css"),
    (".js", "text/javascript"),
];

pub fn mime_type_for(path: &str) -> &'static str {
    let Some(idx) = path.rfind('.') else {
        return "text/plain";
    };
    let suffix = &path[idx..];
    SUFFIX_TYPE
        .iter()
        .find(|(ext, _)| *ext == suffix)
        .map(|(_, mime)| *mime)
        .unwrap_or("text/plain")
}

pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        302 => "Found",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        504 => "Gateway Timeout",
        _ => "Bad Request",
    }
}

/// Error-code → on-disk error page, matching `CODE_PATH`.
fn error_page_path(code: u16) -> Option<&'static str> {
    match code {
        400 => Some("/400.html"),
        403 => Some("/403.html"),
        404 => Some("/404.html"),
        _ => None,
    }
}

/// An `mmap`-ed, read-only, private file mapping. `munmap` runs once,
/// in `Drop`, whether the response is replaced, closed, or just
/// dropped at the end of a request.
pub struct MappedFile {
    ptr: *mut libc::c_void,
    len: usize,
}

unsafe impl Send for MappedFile {}

impl MappedFile {
    fn open(path: &Path) -> io::Result<(MappedFile, u64)> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok((MappedFile { ptr: std::ptr::null_mut(), len: 0 }, 0));
        }
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len as usize,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok((MappedFile { ptr, len: len as usize }, len))
    }

    pub fn as_bytes(&self) -> &[u8] {
        if self.ptr.is_null() || self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr, self.len);
            }
        }
    }
}

pub enum Body {
    Empty,
    Owned(Vec<u8>),
    Mapped(MappedFile),
}

impl Body {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Empty => &[],
            Body::Owned(v) => v,
            Body::Mapped(m) => m.as_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct HttpResponse {
    pub code: u16,
    pub keep_alive: bool,
    pub headers: HashMap<String, String>,
    pub body: Body,
    content_type: String,
}

impl HttpResponse {
    pub fn new(code: u16, keep_alive: bool) -> Self {
        HttpResponse {
            code,
            keep_alive,
            headers: HashMap::new(),
            body: Body::Empty,
            content_type: "text/plain".to_string(),
        }
    }

    pub fn set_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    pub fn set_body(mut self, body: Vec<u8>, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self.body = Body::Owned(body);
        self
    }

    /// Resolves the requested path under `src_dir`, mapping it via
    /// `mmap`, promoting to a 404/403 error body on the usual
    /// filesystem failure modes exactly like `makeResponse`/`addContent_`.
    /// 403 is decided the way `makeResponse` does it: by the file's
    /// world-read bit, not by whether this process happens to be able
    /// to open it (root can open anything, so that check never fires).
    pub fn for_static_file(src_dir: &str, path: &str, keep_alive: bool) -> HttpResponse {
        let full_path = Path::new(src_dir).join(path.trim_start_matches('/'));
        match std::fs::metadata(&full_path) {
            Ok(meta) if meta.is_dir() => HttpResponse::error_page(404, src_dir, keep_alive),
            Ok(meta) if meta.permissions().mode() & 0o004 == 0 => {
                HttpResponse::error_page(403, src_dir, keep_alive)
            }
            Ok(_) => match MappedFile::open(&full_path) {
                Ok((mapped, len)) => {
                    let mut response = HttpResponse::new(200, keep_alive);
                    response.content_type = mime_type_for(path).to_string();
                    response.headers.insert("Content-Length".to_string(), len.to_string());
                    response.body = Body::Mapped(mapped);
                    response
                }
                Err(_) => HttpResponse::error_page(404, src_dir, keep_alive),
            },
            Err(_) => HttpResponse::error_page(404, src_dir, keep_alive),
        }
    }

    /// Builds an error response, preferring the on-disk error page for
    /// `code` when one exists and can be opened, falling back to a
    /// minimal inline body otherwise.
    pub fn error_page(code: u16, src_dir: &str, keep_alive: bool) -> HttpResponse {
        if let Some(page) = error_page_path(code) {
            let full_path = Path::new(src_dir).join(page.trim_start_matches('/'));
            if let Ok((mapped, len)) = MappedFile::open(&full_path) {
                let mut response = HttpResponse::new(code, keep_alive);
                response.content_type = "text/html".to_string();
                response.headers.insert("Content-Length".to_string(), len.to_string());
                response.body = Body::Mapped(mapped);
                return response;
            }
        }
        HttpResponse::inline_error(code, "File NotFound!", keep_alive)
    }

    fn inline_error(code: u16, message: &str, keep_alive: bool) -> HttpResponse {
        let body = format!(
            "<html><title>Error</title><body bgcolor=\"ffffff\">{} : {}\n<p>{}</p><hr><em>tinyhttpd</em></body></html>",
            code,
            status_text(code),
            message,
        );
        HttpResponse::new(code, keep_alive).set_body(body.into_bytes(), "text/html")
    }

    pub fn to_head_bytes(&self) -> Vec<u8> {
        let mut head = Vec::new();
        head.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.code, status_text(self.code)).as_bytes());

        if self.keep_alive {
            head.extend_from_slice(b"Connection: keep-alive\r\n");
            head.extend_from_slice(b"Keep-Alive: max=6, timeout=120\r\n");
        } else {
            head.extend_from_slice(b"Connection: close\r\n");
        }
        head.extend_from_slice(format!("Content-Type: {}\r\n", self.content_type).as_bytes());
        if !self.headers.contains_key("Content-Length") {
            head.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        for (k, v) in &self.headers {
            head.extend_from_slice(format!("{k}: {v}\r\n").as_bytes());
        }
        head.extend_from_slice(b"\r\n");
        head
    }

    /// Full response, head plus body, for callers that don't need the
    /// gather-write split `Connection` uses.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.to_head_bytes();
        out.extend_from_slice(self.body.as_bytes());
        out
    }
}
