use std::{net::SocketAddr, sync::{atomic::{AtomicU32, Ordering}, Arc}, time::Duration};
use tokio::{io::split, net::TcpStream, time};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};
use crate::{relay::registry::{RegisterError, SessionHandle, SessionRegistry}, server::Wire};
use super::{line::SocketConnection, session::{Session, MAX_LINE_LENGTH}, SessionId};

/// Turns accepted sockets into registered sessions.
pub struct Proxy {
    registry: SessionRegistry,
    access_total: AtomicU32,
    max_line_length: usize,
    read_timeout: Option<Duration>,
}

impl Proxy {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            access_total: AtomicU32::new(1),
            max_line_length: MAX_LINE_LENGTH,
            read_timeout: None,
        }
    }

    pub fn with_limits(mut self, max_line_length: usize, read_timeout: Option<Duration>) -> Self {
        self.max_line_length = max_line_length;
        self.read_timeout = read_timeout;
        self
    }

    fn request_id(&self) -> SessionId {
        SessionId::from(self.access_total.fetch_add(1, Ordering::Relaxed))
    }

    /// Register the stream and start its receive loop.
    /// Returns `false` when the registry refused it.
    pub fn establish_connection(&self, conn: SocketConnection, addr: SocketAddr) -> bool {
        let id = self.request_id();
        let (reader, writer) = split(conn);
        let handle = Arc::new(SessionHandle::new(id.clone(), addr, Box::new(writer)));

        if let Err(err) = self.registry.insert(Arc::clone(&handle)) {
            match err {
                RegisterError::Full(cap) => warn!(addr = %addr, "[session] refused, registry full ({})", cap),
                RegisterError::Duplicate(id) => warn!(addr = %addr, "[session] refused, duplicate id {}", id),
            }
            return false;
        }

        info!(session = %id, addr = %addr, online = self.registry.len(), "[session] connected");
        let session = Session::new(handle, reader, self.registry.clone(), self.max_line_length, self.read_timeout);
        tokio::spawn(session.run());
        true
    }
}

impl Wire for Proxy {
    async fn connect_with_tls(&self, stream: TcpStream, addr: SocketAddr, tls: TlsAcceptor) {
        if self.registry.is_full() {
            warn!(addr = %addr, "[session] refused before handshake, registry full");
            return;
        }

        let handshake = match self.read_timeout {
            None => tls.accept(stream).await,
            Some(t) => match time::timeout(t, tls.accept(stream)).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(addr = %addr, "[tls] handshake timed out");
                    return;
                }
            }
        };

        let stream = match handshake {
            Ok(v) => v,
            Err(err) => {
                warn!(addr = %addr, "[tls] handshake failed: {}", err);
                return;
            }
        };

        if !self.establish_connection(SocketConnection::secure(stream), addr) {
            debug!(addr = %addr, "[tls] secured stream dropped");
        }
    }

    async fn connect(&self, stream: TcpStream, addr: SocketAddr) {
        if !self.establish_connection(SocketConnection::plain(stream), addr) {
            debug!(addr = %addr, "[stream] dropped");
        }
    }
}
