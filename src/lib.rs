pub mod server;
pub mod config;
pub mod connection;
pub mod relay;
