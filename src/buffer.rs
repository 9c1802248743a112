//! Growable byte buffer with prepend slack, read/write cursors, and
//! scatter/gather socket I/O.
//!
//! Ported field-for-field from the original server's `Buffer` class:
//! a flat byte vector plus `read_index`/`write_index` cursors and a
//! fixed cheap-prepend region, compacted in place before it grows.

use std::io;
use std::os::fd::RawFd;

const CHEAP_PREPEND: usize = 8;
const INIT_BUFF_SIZE: usize = 1024;
/// Stack overflow segment used by [`Buffer::read_from_fd`]'s scatter
/// read, matching the original's 64 KiB `readv` spill buffer.
const READV_OVERFLOW_SIZE: usize = 65536;

pub struct Buffer {
    buf: Vec<u8>,
    read_index: usize,
    write_index: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Buffer::with_capacity(INIT_BUFF_SIZE)
    }

    pub fn with_capacity(init_size: usize) -> Self {
        Buffer {
            buf: vec![0u8; CHEAP_PREPEND + init_size],
            read_index: CHEAP_PREPEND,
            write_index: CHEAP_PREPEND,
        }
    }

    pub fn writable_bytes(&self) -> usize {
        self.buf.len() - self.write_index
    }

    pub fn readable_bytes(&self) -> usize {
        self.write_index - self.read_index
    }

    pub fn prependable_bytes(&self) -> usize {
        self.read_index
    }

    /// The unread slice `[read_index, write_index)`.
    pub fn peek(&self) -> &[u8] {
        &self.buf[self.read_index..self.write_index]
    }

    pub fn retrieve(&mut self, len: usize) {
        assert!(len <= self.readable_bytes());
        if len < self.readable_bytes() {
            self.read_index += len;
        } else {
            self.retrieve_all();
        }
    }

    /// Consumes bytes up to (but not including) `end`, an absolute
    /// offset into the readable region, measured from `peek()`'s start.
    pub fn retrieve_until(&mut self, end: usize) {
        assert!(end <= self.readable_bytes());
        self.retrieve(end);
    }

    pub fn retrieve_all(&mut self) {
        self.read_index = CHEAP_PREPEND;
        self.write_index = CHEAP_PREPEND;
    }

    pub fn retrieve_as_vec(&mut self, len: usize) -> Vec<u8> {
        assert!(len <= self.readable_bytes());
        let result = self.peek()[..len].to_vec();
        self.retrieve(len);
        result
    }

    pub fn retrieve_all_as_vec(&mut self) -> Vec<u8> {
        self.retrieve_as_vec(self.readable_bytes())
    }

    pub fn ensure_writable(&mut self, len: usize) {
        if len > self.writable_bytes() {
            self.make_space(len);
        }
        debug_assert!(len <= self.writable_bytes());
    }

    pub fn has_written(&mut self, len: usize) {
        self.write_index += len;
    }

    pub fn begin_write_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.write_index..]
    }

    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        let start = self.write_index;
        self.buf[start..start + data.len()].copy_from_slice(data);
        self.has_written(data.len());
    }

    /// Scatter-read into the writable tail plus a stack overflow
    /// segment, so a single `readv` drains everything the kernel has
    /// buffered even when it exceeds our current capacity.
    pub fn read_from_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut overflow = [0u8; READV_OVERFLOW_SIZE];
        let writable = self.writable_bytes();

        let mut iov = [
            libc::iovec {
                iov_base: self.begin_write_mut().as_mut_ptr() as *mut libc::c_void,
                iov_len: writable,
            },
            libc::iovec {
                iov_base: overflow.as_mut_ptr() as *mut libc::c_void,
                iov_len: overflow.len(),
            },
        ];

        let len = unsafe { libc::readv(fd, iov.as_mut_ptr(), 2) };
        if len < 0 {
            return Err(io::Error::last_os_error());
        }
        let len = len as usize;
        if len <= writable {
            self.has_written(len);
        } else {
            self.write_index = self.buf.len();
            self.append(&overflow[..len - writable]);
        }
        Ok(len)
    }

    pub fn write_to_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let readable = self.peek();
        if readable.is_empty() {
            return Ok(0);
        }
        let len = unsafe { libc::write(fd, readable.as_ptr() as *const libc::c_void, readable.len()) };
        if len < 0 {
            return Err(io::Error::last_os_error());
        }
        self.retrieve(len as usize);
        Ok(len as usize)
    }

    /// Compacts the readable region back to the prepend boundary if
    /// that frees enough room; otherwise grows the backing vector.
    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len + CHEAP_PREPEND {
            self.buf.resize(self.write_index + len, 0);
        } else {
            let readable = self.readable_bytes();
            self.buf.copy_within(self.read_index..self.write_index, CHEAP_PREPEND);
            self.read_index = CHEAP_PREPEND;
            self.write_index = self.read_index + readable;
        }
    }
}
