use std::{num::NonZeroU64, path::PathBuf, time::Duration};
use clap::Parser;
use crate::{connection::session::MAX_LINE_LENGTH, relay::DeliveryPolicy, server::CertificatePath};

pub const DEFAULT_ADDR: &str = "0.0.0.0:1328";

#[derive(Debug, Clone, Parser)]
#[command(name = "relayboard", version, about = "Line relay for shared whiteboard sessions")]
pub struct Config {
    /// Address the relay listens on
    #[arg(long, env = "RELAYBOARD_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Seconds to wait for the next line before dropping a session
    #[arg(long, env = "RELAYBOARD_READ_TIMEOUT")]
    pub read_timeout: Option<NonZeroU64>,

    /// Seconds a single peer write may take
    #[arg(long, env = "RELAYBOARD_WRITE_TIMEOUT")]
    pub write_timeout: Option<NonZeroU64>,

    /// Upper bound on concurrent sessions
    #[arg(long, env = "RELAYBOARD_MAX_SESSIONS", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_sessions: Option<u32>,

    #[arg(long, env = "RELAYBOARD_MAX_LINE_LENGTH", default_value_t = MAX_LINE_LENGTH as u32,
        value_parser = clap::value_parser!(u32).range(1..))]
    pub max_line_length: u32,

    /// Do not echo a line back to the session that sent it
    #[arg(long, env = "RELAYBOARD_EXCLUDE_SENDER")]
    pub exclude_sender: bool,

    #[arg(long, env = "RELAYBOARD_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, env = "RELAYBOARD_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "RELAYBOARD_LOG", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout.map(|s| Duration::from_secs(s.get()))
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout.map(|s| Duration::from_secs(s.get()))
    }

    pub fn max_sessions(&self) -> Option<usize> {
        self.max_sessions.map(|n| n as usize)
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length as usize
    }

    pub fn policy(&self) -> DeliveryPolicy {
        if self.exclude_sender {
            DeliveryPolicy::ExcludeSender
        } else {
            DeliveryPolicy::IncludeSender
        }
    }

    pub fn certificate(&self) -> Option<CertificatePath> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some(CertificatePath::new(cert, key)),
            _ => None,
        }
    }
}
