//! Leveled, optionally-async file logger.
//!
//! Ported from the block-queue + single-drain-thread design in the
//! original server's `log.cpp`, generalized into an explicitly owned
//! `Logger` (no process-wide singleton) and kept close to the
//! `info!`/`warn!`/`errors!`/`debug!`/`trace!` macro ergonomics of the
//! teacher crate this was grown from.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use chrono::Local;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }

    fn from_u8(v: u8) -> Level {
        match v {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            _ => Level::Error,
        }
    }
}

/// Bounded MPSC-ish queue: many producers push lines, one drain thread
/// pops them. Mirrors the original `blockQueue<T>`'s mutex + two
/// condvars + close flag, minus the blocking-push path (full queue
/// falls back to a direct synchronous write, see [`Logger::write`]).
struct BlockQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
}

struct Inner<T> {
    deque: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

impl<T> BlockQueue<T> {
    fn new(capacity: usize) -> Self {
        BlockQueue {
            inner: Mutex::new(Inner {
                deque: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Non-blocking push. Returns the item back if the queue is full
    /// or closed.
    fn try_push(&self, item: T) -> Result<(), T> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed || inner.deque.len() >= inner.capacity {
            return Err(item);
        }
        inner.deque.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until an item is available or the queue is closed and
    /// drained.
    fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.deque.pop_front() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
    }
}

struct RotationState {
    file: File,
    date: String,
    lines_written: usize,
    sequence: usize,
}

const MAX_LINES_PER_FILE: usize = 50_000;

pub struct Logger {
    dir: PathBuf,
    suffix: String,
    level: AtomicU8,
    queue: Option<Arc<BlockQueue<String>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
    rotation: Mutex<RotationState>,
}

impl Logger {
    /// Opens (creating if necessary) today's log file under `dir` and,
    /// when `queue_capacity` is `Some`, spawns the background drain
    /// thread that owns all file writes.
    pub fn init(
        level: Level,
        dir: impl Into<PathBuf>,
        suffix: impl Into<String>,
        queue_capacity: Option<usize>,
    ) -> std::io::Result<Arc<Logger>> {
        let dir = dir.into();
        let suffix = suffix.into();
        fs::create_dir_all(&dir)?;
        let date = Local::now().format("%Y_%m_%d").to_string();
        let file = open_log_file(&dir, &date, &suffix, 0)?;

        let logger = Arc::new(Logger {
            dir,
            suffix,
            level: AtomicU8::new(level as u8),
            queue: queue_capacity.map(|cap| Arc::new(BlockQueue::new(cap))),
            drain: Mutex::new(None),
            rotation: Mutex::new(RotationState {
                file,
                date,
                lines_written: 0,
                sequence: 0,
            }),
        });

        if let Some(queue) = logger.queue.clone() {
            let worker_logger = logger.clone();
            let handle = std::thread::spawn(move || {
                while let Some(line) = queue.pop() {
                    worker_logger.write_line(&line);
                }
            });
            *logger.drain.lock().unwrap() = Some(handle);
        }

        Ok(logger)
    }

    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Formats and emits one log line. Below the configured level this
    /// is a no-op; otherwise it is queued for the drain thread when
    /// async, or written synchronously when not (or when the queue is
    /// momentarily full).
    pub fn write(&self, level: Level, message: String) {
        if level < self.level() {
            return;
        }
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S%.6f");
        let line = format!("{ts} [{}]: {message}", level.tag());
        match &self.queue {
            Some(queue) => {
                if let Err(line) = queue.try_push(line) {
                    self.write_line(&line);
                }
            }
            None => self.write_line(&line),
        }
    }

    fn write_line(&self, line: &str) {
        let mut rotation = self.rotation.lock().unwrap();
        self.rotate_if_needed(&mut rotation);
        let _ = writeln!(rotation.file, "{line}");
        rotation.lines_written += 1;
    }

    fn rotate_if_needed(&self, rotation: &mut RotationState) {
        let today = Local::now().format("%Y_%m_%d").to_string();
        let needs_new_day = today != rotation.date;
        let needs_new_sequence = rotation.lines_written >= MAX_LINES_PER_FILE;
        if !needs_new_day && !needs_new_sequence {
            return;
        }
        let sequence = if needs_new_day { 0 } else { rotation.sequence + 1 };
        if let Ok(file) = open_log_file(&self.dir, &today, &self.suffix, sequence) {
            rotation.file = file;
            rotation.date = today;
            rotation.sequence = sequence;
            rotation.lines_written = 0;
        }
    }

    pub fn flush(&self) {
        let mut rotation = self.rotation.lock().unwrap();
        let _ = rotation.file.flush();
    }

    /// Signals the drain thread to stop after draining the queue,
    /// joins it, and flushes the file. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(queue) = &self.queue {
            queue.close();
        }
        if let Some(handle) = self.drain.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.flush();
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn open_log_file(dir: &PathBuf, date: &str, suffix: &str, sequence: usize) -> std::io::Result<File> {
    let name = if sequence == 0 {
        format!("{date}{suffix}")
    } else {
        format!("{date}_{sequence}{suffix}")
    };
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(name))
}

#[macro_export]
macro_rules! log {
    ($logger:expr, $level:expr, $($arg:tt)*) => {
        $logger.write($level, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! trace {
    ($logger:expr, $($arg:tt)*) => { $crate::log!($logger, $crate::Level::Trace, $($arg)*) };
}
#[macro_export]
macro_rules! debug {
    ($logger:expr, $($arg:tt)*) => { $crate::log!($logger, $crate::Level::Debug, $($arg)*) };
}
#[macro_export]
macro_rules! info {
    ($logger:expr, $($arg:tt)*) => { $crate::log!($logger, $crate::Level::Info, $($arg)*) };
}
#[macro_export]
macro_rules! warn {
    ($logger:expr, $($arg:tt)*) => { $crate::log!($logger, $crate::Level::Warn, $($arg)*) };
}
#[macro_export]
macro_rules! errors {
    ($logger:expr, $($arg:tt)*) => { $crate::log!($logger, $crate::Level::Error, $($arg)*) };
}
