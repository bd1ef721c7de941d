use std::{fmt::Display, io};
use thiserror::Error;

/// Session-local failure. Never leaves the session that produced it.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("{0}")]
    Kind(ErrorKind),
    #[error("{kind}: {msg}")]
    Custom { kind: ErrorKind, msg: String },
}

impl ConnError {
    pub fn new(kind: ErrorKind, msg: Option<String>) -> Self {
        match msg {
            Some(msg) => Self::Custom { kind, msg },
            None => Self::Kind(kind),
        }
    }

    pub fn get_kind(&self) -> ErrorKind {
        match self {
            ConnError::Custom { kind, .. } => *kind,
            ConnError::Kind(k) => *k
        }
    }
}

impl From<io::Error> for ConnError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::TimedOut,
            io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => ErrorKind::InvalidData,
            io::ErrorKind::BrokenPipe => ErrorKind::BrokenPipe,
            _ => ErrorKind::ConnectionAborted,
        };
        Self::new(kind, Some(err.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TimedOut,
    InvalidData,
    BrokenPipe,
    ConnectionAborted
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bstr = match self {
            Self::BrokenPipe => "broken pipe",
            Self::ConnectionAborted => "connection aborted",
            Self::InvalidData => "invalid data",
            Self::TimedOut => "timeout"
        };
        f.write_str(bstr)
    }
}
