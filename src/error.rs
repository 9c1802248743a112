use core::fmt;
use std::{
    error::Error,
    fmt::{Debug, Display, Formatter},
};

/// Top-level startup/config error. Per-connection and per-request
/// failures use the narrower enums in [`crate::http`] and
/// [`crate::pool`] instead — only things that should abort `main`
/// get wrapped here.
pub struct ServerError(pub Box<dyn Error + Send + Sync>);

impl Debug for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\r\x1b[K{}", self)
    }
}

impl Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31mERROR\x1b[0m: {}", self.0)
    }
}

impl Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError(Box::new(e))
    }
}

impl From<std::net::AddrParseError> for ServerError {
    fn from(e: std::net::AddrParseError) -> Self {
        ServerError(Box::new(e))
    }
}

impl From<serde_yaml::Error> for ServerError {
    fn from(e: serde_yaml::Error) -> Self {
        ServerError(Box::new(e))
    }
}

impl From<mysql::Error> for ServerError {
    fn from(e: mysql::Error) -> Self {
        ServerError(Box::new(e))
    }
}

impl From<String> for ServerError {
    fn from(s: String) -> Self {
        ServerError(Box::new(std::io::Error::new(std::io::ErrorKind::Other, s)))
    }
}

impl From<&str> for ServerError {
    fn from(s: &str) -> Self {
        ServerError(Box::new(std::io::Error::new(std::io::ErrorKind::Other, s.to_string())))
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
