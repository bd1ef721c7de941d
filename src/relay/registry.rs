use std::{net::SocketAddr, sync::{atomic::{AtomicBool, AtomicUsize, Ordering}, Arc}, time::Duration};
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::{io::{AsyncWrite, AsyncWriteExt}, sync::Mutex, time};
use tracing::{debug, warn};
use crate::connection::{errors::{ConnError, ErrorKind}, SessionId};
use super::{message::Message, Broadcaster, Delivery, DeliveryPolicy};

pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of one connected peer.
pub struct SessionHandle {
    pub id: SessionId,
    pub addr: SocketAddr,
    writer: Mutex<BoxWriter>,
    alive: AtomicBool,
}

impl SessionHandle {
    pub fn new(id: SessionId, addr: SocketAddr, writer: BoxWriter) -> Self {
        Self { id, addr, writer: Mutex::new(writer), alive: AtomicBool::new(true) }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::Release);
    }

    async fn send(&self, msg: &Message, timeout: Option<Duration>) -> Result<(), ConnError> {
        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(msg.as_wire()).await?;
            writer.flush().await
        };

        match timeout {
            None => write.await.map_err(ConnError::from),
            Some(t) => match time::timeout(t, write).await {
                Ok(res) => res.map_err(ConnError::from),
                Err(_) => Err(ConnError::new(ErrorKind::TimedOut, Some(String::from("write timeout")))),
            }
        }
    }

    /// Flush and close the write side.
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegisterError {
    Duplicate(SessionId),
    Full(usize),
}

/// The authoritative set of sessions eligible for broadcast.
///
/// Sharded locks from `DashMap` keep insert, remove and snapshot atomic with
/// respect to each other. No map guard is ever held across an `.await`:
/// broadcast clones the handles out first and writes afterwards.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, Arc<SessionHandle>>>,
    slots: Arc<AtomicUsize>,
    policy: DeliveryPolicy,
    capacity: Option<usize>,
    write_timeout: Option<Duration>,
}

impl SessionRegistry {
    pub fn new(policy: DeliveryPolicy) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            slots: Arc::new(AtomicUsize::new(0)),
            policy,
            capacity: None,
            write_timeout: None,
        }
    }

    pub fn with_capacity(mut self, capacity: Option<usize>) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_write_timeout(mut self, write_timeout: Option<Duration>) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    pub fn insert(&self, handle: Arc<SessionHandle>) -> Result<(), RegisterError> {
        self.reserve()?;
        match self.sessions.entry(handle.id.clone()) {
            Entry::Occupied(o) => {
                self.slots.fetch_sub(1, Ordering::AcqRel);
                Err(RegisterError::Duplicate(o.key().clone()))
            }
            Entry::Vacant(v) => {
                v.insert(handle);
                Ok(())
            }
        }
    }

    // TLS handshakes register from concurrent tasks, so the bound is
    // enforced on a counter rather than on the map length.
    fn reserve(&self) -> Result<(), RegisterError> {
        let cap = self.capacity.unwrap_or(usize::MAX);
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < cap).then_some(n + 1))
            .map(|_| ())
            .map_err(|_| RegisterError::Full(cap))
    }

    /// Only the session's own receive loop calls this.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.remove(id).map(|(_, handle)| {
            self.slots.fetch_sub(1, Ordering::AcqRel);
            handle.kill();
            handle
        })
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|cap| self.slots.load(Ordering::Acquire) >= cap)
    }

    fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}

impl Broadcaster for SessionRegistry {
    async fn broadcast(&self, sender: &SessionId, msg: &Message) -> Delivery {
        let mut report = Delivery::default();
        for peer in self.snapshot() {
            if !self.policy.accepts(sender, &peer.id) || !peer.is_alive() {
                continue;
            }

            match peer.send(msg, self.write_timeout).await {
                Ok(_) => report.delivered += 1,
                Err(err) => {
                    warn!(session = %peer.id, addr = %peer.addr, "[relay] write failed: {}", err);
                    peer.kill();
                    report.failed += 1;
                }
            }
        }

        debug!(sender = %sender, delivered = report.delivered, failed = report.failed, "[relay] broadcast");
        report
    }
}
