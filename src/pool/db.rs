//! Bounded MySQL connection pool.
//!
//! Ported from the original server's `sqlConnPool`/`sqlConnRAII`: a
//! counting semaphore of capacity `db_pool_size` gates a mutex-protected
//! queue of live connections. The RAII guard shape (`Deref`/`DerefMut`
//! plus a `Drop` that checks the connection back in) follows
//! `examples/elbaro-zero-mysql`'s `PooledConn`, swapped onto a blocking
//! `Mutex`+`Condvar` semaphore instead of a lock-free queue, since the
//! pool is meant to block callers once it is exhausted rather than fail
//! fast.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};

use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder, Row};

use crate::error::Result;

struct Inner {
    conns: VecDeque<Conn>,
}

pub struct DbPool {
    inner: Mutex<Inner>,
    available: Condvar,
    capacity: usize,
}

impl DbPool {
    pub fn new(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        db_name: &str,
        capacity: usize,
    ) -> Result<DbPool> {
        assert!(capacity > 0);
        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(host))
            .tcp_port(port)
            .user(Some(user))
            .pass(Some(password))
            .db_name(Some(db_name))
            .into();

        let mut conns = VecDeque::with_capacity(capacity);
        for _ in 0..capacity {
            conns.push_back(Conn::new(opts.clone())?);
        }

        Ok(DbPool {
            inner: Mutex::new(Inner { conns }),
            available: Condvar::new(),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.inner.lock().unwrap().conns.len()
    }

    /// Blocks until a connection is available, then hands out an RAII
    /// guard that returns it to the pool on drop.
    pub fn acquire(&self) -> DbGuard<'_> {
        let mut inner = self.inner.lock().unwrap();
        let conn = loop {
            if let Some(conn) = inner.conns.pop_front() {
                break conn;
            }
            inner = self.available.wait(inner).unwrap();
        };
        DbGuard {
            pool: self,
            conn: Some(conn),
        }
    }

    fn check_in(&self, conn: Conn) {
        let mut inner = self.inner.lock().unwrap();
        inner.conns.push_back(conn);
        drop(inner);
        self.available.notify_one();
    }
}

pub struct DbGuard<'a> {
    pool: &'a DbPool,
    conn: Option<Conn>,
}

impl Deref for DbGuard<'_> {
    type Target = Conn;
    fn deref(&self) -> &Conn {
        self.conn.as_ref().expect("connection taken")
    }
}

impl DerefMut for DbGuard<'_> {
    fn deref_mut(&mut self) -> &mut Conn {
        self.conn.as_mut().expect("connection taken")
    }
}

impl Drop for DbGuard<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.check_in(conn);
        }
    }
}

/// The two queries the login/register form handler needs, with bound
/// parameters throughout — the original's `userVerify_` built these
/// with `snprintf` directly into the query string, which is the SQL
/// injection this rewrite fixes.
pub trait UserStore {
    fn find_password(&mut self, username: &str) -> Result<Option<String>>;
    fn username_taken(&mut self, username: &str) -> Result<bool>;
    fn insert_user(&mut self, username: &str, password: &str) -> Result<()>;
}

impl UserStore for Conn {
    fn find_password(&mut self, username: &str) -> Result<Option<String>> {
        let row: Option<Row> = self.exec_first(
            "SELECT username, password FROM user WHERE username = ? LIMIT 1",
            (username,),
        )?;
        Ok(row.map(|mut r| r.take::<String, _>("password").unwrap_or_default()))
    }

    fn username_taken(&mut self, username: &str) -> Result<bool> {
        let row: Option<Row> = self.exec_first(
            "SELECT username FROM user WHERE username = ? LIMIT 1",
            (username,),
        )?;
        Ok(row.is_some())
    }

    fn insert_user(&mut self, username: &str, password: &str) -> Result<()> {
        self.exec_drop(
            "INSERT INTO user(username, password) VALUES (?, ?)",
            (username, password),
        )?;
        Ok(())
    }
}

/// Runs the login-or-register check spec'd for the form handler,
/// returning whether the user should be sent to `/welcome.html`.
/// Generic over `UserStore` rather than `Conn` directly so the check
/// itself can be exercised against a fake store without a live MySQL
/// connection.
pub fn verify_user<T: UserStore>(store: &mut T, name: &str, passwd: &str, is_login: bool) -> Result<bool> {
    if name.is_empty() || passwd.is_empty() {
        return Ok(false);
    }
    if is_login {
        match store.find_password(name)? {
            Some(stored) => Ok(stored == passwd),
            None => Ok(false),
        }
    } else {
        if store.username_taken(name)? {
            return Ok(false);
        }
        store.insert_user(name, passwd)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeStore {
        users: HashMap<String, String>,
    }

    impl UserStore for FakeStore {
        fn find_password(&mut self, username: &str) -> Result<Option<String>> {
            Ok(self.users.get(username).cloned())
        }

        fn username_taken(&mut self, username: &str) -> Result<bool> {
            Ok(self.users.contains_key(username))
        }

        fn insert_user(&mut self, username: &str, password: &str) -> Result<()> {
            self.users.insert(username.to_string(), password.to_string());
            Ok(())
        }
    }

    #[test]
    fn login_succeeds_with_matching_password() {
        let mut store = FakeStore::default();
        store.users.insert("alice".to_string(), "hunter2".to_string());
        assert!(verify_user(&mut store, "alice", "hunter2", true).unwrap());
    }

    #[test]
    fn login_fails_with_wrong_password() {
        let mut store = FakeStore::default();
        store.users.insert("alice".to_string(), "hunter2".to_string());
        assert!(!verify_user(&mut store, "alice", "wrong", true).unwrap());
    }

    #[test]
    fn login_fails_for_unknown_user() {
        let mut store = FakeStore::default();
        assert!(!verify_user(&mut store, "ghost", "anything", true).unwrap());
    }

    #[test]
    fn register_fails_when_username_already_taken() {
        let mut store = FakeStore::default();
        store.users.insert("alice".to_string(), "hunter2".to_string());
        assert!(!verify_user(&mut store, "alice", "newpass", false).unwrap());
    }

    #[test]
    fn register_succeeds_and_is_then_visible_to_login() {
        let mut store = FakeStore::default();
        assert!(verify_user(&mut store, "bob", "secret", false).unwrap());
        assert!(verify_user(&mut store, "bob", "secret", true).unwrap());
    }
}
