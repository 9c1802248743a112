//! Event loop binding `mio`'s epoll-backed `Poll` to the worker pool,
//! the idle timer, and the per-connection state machine.
//!
//! Ported from the original server's `webServer::start`/`dealListen_`/
//! `dealRead_`/`dealWrite_`: the reactor thread only polls and
//! dispatches, while the actual read/parse/write work for a ready
//! connection runs on the worker pool and re-arms the connection's
//! one-shot interest before returning, mirroring `EPOLLONESHOT` plus
//! `threadpool_->addTask(...)` in the original.
//!
//! Because a worker thread cannot safely reach back into the reactor's
//! connection table or timer heap, a closed connection is reported by
//! pushing its token onto `closed_queue` instead of mutating shared
//! state directly; the reactor drains that queue once per poll cycle.

use std::collections::{HashMap, VecDeque};
use std::io::Write as _;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Registry, Token};

use weblog::{info, warn, Logger};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::Result;
use crate::pool::{DbPool, WorkerPool};
use crate::timer::TimerHeap;

const LISTENER: Token = Token(0);
/// Matches the original's `MAX_FD`.
const MAX_FD: usize = 65536;

type SharedConnection = Arc<Mutex<Connection>>;
type Connections = Arc<Mutex<HashMap<Token, SharedConnection>>>;
type ClosedQueue = Arc<Mutex<VecDeque<Token>>>;

pub struct Reactor {
    config: Arc<ServerConfig>,
    logger: Arc<Logger>,
    db_pool: Option<Arc<DbPool>>,
    workers: WorkerPool,
}

impl Reactor {
    pub fn new(config: Arc<ServerConfig>, logger: Arc<Logger>, db_pool: Option<Arc<DbPool>>) -> Self {
        let workers = WorkerPool::new(config.worker_count);
        Reactor { config, logger, db_pool, workers }
    }

    pub fn run(&self) -> Result<()> {
        let mut poll = Poll::new()?;
        let addr: SocketAddr = format!("0.0.0.0:{}", self.config.port).parse()?;
        let mut listener = TcpListener::bind(addr)?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
        let registry = poll.registry().try_clone()?;

        let connections: Connections = Arc::new(Mutex::new(HashMap::new()));
        let closed_queue: ClosedQueue = Arc::new(Mutex::new(VecDeque::new()));
        let mut timers = TimerHeap::new();
        let mut next_token = 1usize;
        let mut events = Events::with_capacity(1024);

        info!(
            self.logger,
            "listening on {} (listener {}, conn {})",
            addr,
            if self.config.listener_edge_triggered() { "ET" } else { "LT" },
            if self.config.conn_edge_triggered() { "ET" } else { "LT" }
        );

        loop {
            let timeout = if self.config.idle_timeout_ms > 0 {
                timers.next_tick_ms().map(Duration::from_millis)
            } else {
                None
            };

            match poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in events.iter() {
                let token = event.token();
                if token == LISTENER {
                    self.accept_loop(&listener, &registry, &connections, &closed_queue, &mut timers, &mut next_token);
                    continue;
                }

                let Some(conn) = connections.lock().unwrap().get(&token).cloned() else {
                    continue;
                };

                if self.config.idle_timeout_ms > 0 {
                    timers.adjust(token.0, Duration::from_millis(self.config.idle_timeout_ms));
                }

                if event.is_read_closed() || event.is_error() {
                    closed_queue.lock().unwrap().push_back(token);
                    continue;
                }

                if event.is_readable() {
                    self.dispatch_read(conn, token, registry.try_clone()?, closed_queue.clone());
                } else if event.is_writable() {
                    self.dispatch_write(conn, token, registry.try_clone()?, closed_queue.clone());
                }
            }

            self.drain_closed(&connections, &registry, &mut timers, &closed_queue);
        }
    }

    fn accept_loop(
        &self,
        listener: &TcpListener,
        registry: &Registry,
        connections: &Connections,
        closed_queue: &ClosedQueue,
        timers: &mut TimerHeap,
        next_token: &mut usize,
    ) {
        loop {
            match listener.accept() {
                Ok((mut stream, addr)) => {
                    if connections.lock().unwrap().len() >= MAX_FD {
                        warn!(self.logger, "connection table full, dropping {addr}");
                        let _ = stream.write_all(b"Server busy!");
                        continue;
                    }
                    let token = Token(*next_token);
                    *next_token += 1;
                    let fd = stream.as_raw_fd();

                    if registry.register(&mut stream, token, Interest::READABLE).is_err() {
                        continue;
                    }

                    let conn = Arc::new(Mutex::new(Connection::new(
                        stream,
                        addr,
                        fd,
                        self.config.conn_edge_triggered(),
                    )));
                    connections.lock().unwrap().insert(token, conn.clone());

                    if self.config.idle_timeout_ms > 0 {
                        let closed_queue = closed_queue.clone();
                        timers.add(token.0, Duration::from_millis(self.config.idle_timeout_ms), move || {
                            closed_queue.lock().unwrap().push_back(token);
                        });
                    }

                    info!(self.logger, "client[{fd}] ({addr}) in");
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    fn dispatch_read(&self, conn: SharedConnection, token: Token, registry: Registry, closed_queue: ClosedQueue) {
        let src_dir = self.config.src_dir.clone();
        let db_pool = self.db_pool.clone();
        let logger = self.logger.clone();

        self.workers.submit(move || {
            let mut guard = conn.lock().unwrap();

            match guard.read() {
                Ok(_) => {}
                Err(e) => {
                    warn!(logger, "client[{}] read error: {e}", token.0);
                }
            }

            if guard.should_close() {
                drop(guard);
                closed_queue.lock().unwrap().push_back(token);
                return;
            }

            let wants_write = guard.process(&src_dir, db_pool.as_deref());
            let interest = if wants_write { Interest::WRITABLE } else { Interest::READABLE };
            let _ = registry.reregister(guard.stream_mut(), token, interest);

            if guard.should_close() {
                drop(guard);
                closed_queue.lock().unwrap().push_back(token);
            }
        });
    }

    fn dispatch_write(&self, conn: SharedConnection, token: Token, registry: Registry, closed_queue: ClosedQueue) {
        let logger = self.logger.clone();

        self.workers.submit(move || {
            let mut guard = conn.lock().unwrap();
            match guard.write() {
                Ok(true) => {
                    if guard.should_close() {
                        drop(guard);
                        closed_queue.lock().unwrap().push_back(token);
                        return;
                    }
                    let _ = registry.reregister(guard.stream_mut(), token, Interest::READABLE);
                }
                Ok(false) => {
                    let _ = registry.reregister(guard.stream_mut(), token, Interest::WRITABLE);
                }
                Err(e) => {
                    warn!(logger, "client[{}] write error: {e}", token.0);
                    drop(guard);
                    closed_queue.lock().unwrap().push_back(token);
                }
            }
        });
    }

    fn drain_closed(&self, connections: &Connections, registry: &Registry, timers: &mut TimerHeap, closed_queue: &ClosedQueue) {
        loop {
            let token = closed_queue.lock().unwrap().pop_front();
            let Some(token) = token else { break };
            timers.remove_target(token.0);
            if let Some(conn) = connections.lock().unwrap().remove(&token) {
                let mut guard = conn.lock().unwrap();
                guard.mark_closed();
                let _ = registry.deregister(guard.stream_mut());
                let addr = guard.addr;
                drop(guard);
                info!(self.logger, "client[{}] ({addr}) quit", token.0);
            }
        }
    }
}
