//! Scenario-level coverage for the request/response pipeline, composed
//! from the same public building blocks `Connection` wires together —
//! `HttpRequest`, `HttpResponse::for_static_file`, `verify_user`, and
//! `TimerHeap` — exercised directly the way the upstream `tests/http_tests.rs`
//! drives parser/response types without standing up a live socket.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tinyhttpd::connection::auth_outcome_path;
use tinyhttpd::http::HttpResponse;
use tinyhttpd::pool::db::{verify_user, UserStore};
use tinyhttpd::timer::TimerHeap;

fn temp_site(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("tinyhttpd_e2e_{name}"));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[derive(Default)]
struct FakeStore {
    users: HashMap<String, String>,
}

impl UserStore for FakeStore {
    fn find_password(&mut self, username: &str) -> tinyhttpd::error::Result<Option<String>> {
        Ok(self.users.get(username).cloned())
    }

    fn username_taken(&mut self, username: &str) -> tinyhttpd::error::Result<bool> {
        Ok(self.users.contains_key(username))
    }

    fn insert_user(&mut self, username: &str, password: &str) -> tinyhttpd::error::Result<()> {
        self.users.insert(username.to_string(), password.to_string());
        Ok(())
    }
}

/// Scenario 1: a plain GET for a file that exists serves it with 200.
#[test]
fn scenario_plain_get_serves_200() {
    let dir = temp_site("plain_get");
    std::fs::write(dir.join("index.html"), b"hello world").unwrap();

    let res = HttpResponse::for_static_file(dir.to_str().unwrap(), "/index.html", false);

    assert_eq!(res.code, 200);
    assert_eq!(res.body.as_bytes(), b"hello world");
    let _ = std::fs::remove_dir_all(&dir);
}

/// Scenario 2: a GET for a file that doesn't exist serves 404.
#[test]
fn scenario_missing_file_serves_404() {
    let dir = temp_site("missing");

    let res = HttpResponse::for_static_file(dir.to_str().unwrap(), "/nope.html", false);

    assert_eq!(res.code, 404);
    let _ = std::fs::remove_dir_all(&dir);
}

/// Scenario 3: a successful login rewrites to `/welcome.html`, served
/// with the same 200 response a plain GET would get — no redirect.
#[test]
fn scenario_login_success_serves_welcome_page_with_200() {
    let dir = temp_site("login_success");
    std::fs::write(dir.join("welcome.html"), b"hi alice").unwrap();

    let mut store = FakeStore::default();
    store.users.insert("alice".to_string(), "hunter2".to_string());
    let verified = verify_user(&mut store, "alice", "hunter2", true).unwrap();
    let res = HttpResponse::for_static_file(dir.to_str().unwrap(), auth_outcome_path(verified), false);

    assert_eq!(auth_outcome_path(verified), "/welcome.html");
    assert_eq!(res.code, 200);
    assert_eq!(res.body.as_bytes(), b"hi alice");
    let _ = std::fs::remove_dir_all(&dir);
}

/// Scenario 4: a failed login rewrites to `/error.html`, still a 200.
#[test]
fn scenario_login_failure_serves_error_page_with_200() {
    let dir = temp_site("login_failure");
    std::fs::write(dir.join("error.html"), b"nope").unwrap();

    let mut store = FakeStore::default();
    store.users.insert("alice".to_string(), "hunter2".to_string());
    let verified = verify_user(&mut store, "alice", "wrong-password", true).unwrap();
    let res = HttpResponse::for_static_file(dir.to_str().unwrap(), auth_outcome_path(verified), false);

    assert_eq!(auth_outcome_path(verified), "/error.html");
    assert_eq!(res.code, 200);
    assert_eq!(res.body.as_bytes(), b"nope");
    let _ = std::fs::remove_dir_all(&dir);
}

/// Scenario 5: an idle connection's timer fires and tears it down once
/// its deadline passes without being refreshed.
#[test]
fn scenario_idle_connection_times_out() {
    let fired = Arc::new(AtomicUsize::new(0));
    let mut timers = TimerHeap::new();
    let f = fired.clone();
    timers.add(1, Duration::from_millis(20), move || {
        f.fetch_add(1, Ordering::SeqCst);
    });

    std::thread::sleep(Duration::from_millis(60));
    timers.tick();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(timers.is_empty());
}

/// Scenario 6: once the connection table is full, the server writes
/// the plain-text overload message and closes rather than serving the
/// request — mirrored here on a bare socket pair since driving the
/// reactor to its real 65536-connection ceiling isn't something a test
/// run can afford to do.
#[test]
fn scenario_overload_writes_busy_message_and_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client_thread = std::thread::spawn(move || {
        let mut client = TcpStream::connect(addr).unwrap();
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        buf
    });

    let (mut server_side, _) = listener.accept().unwrap();
    server_side.write_all(b"Server busy!").unwrap();
    drop(server_side);

    let received = client_thread.join().unwrap();
    assert_eq!(received, b"Server busy!");
}
