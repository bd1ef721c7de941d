use std::{sync::Arc, time::Duration};
use tokio::io::AsyncRead;
use tracing::{debug, info};
use crate::relay::{message::Message, registry::{SessionHandle, SessionRegistry}, Broadcaster};
use super::{errors::ConnError, line::LineReader};

pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Why a receive loop ended.
#[derive(Debug)]
pub enum Closed {
    Eof,
    Failed(ConnError),
}

pub struct Session<R> {
    handle: Arc<SessionHandle>,
    lines: LineReader<R>,
    registry: SessionRegistry,
}

impl<R> Session<R>
    where R: AsyncRead + Unpin + Send + 'static
{
    pub fn new(
        handle: Arc<SessionHandle>,
        reader: R,
        registry: SessionRegistry,
        max_line_length: usize,
        read_timeout: Option<Duration>,
    ) -> Self {
        let lines = LineReader::new(reader, max_line_length, read_timeout);
        Self { handle, lines, registry }
    }

    /// Run the receive loop until the peer leaves, then deregister.
    pub async fn run(mut self) -> Closed {
        let closed = self.receive().await;

        self.registry.remove(&self.handle.id);
        self.handle.shutdown().await;

        match &closed {
            Closed::Eof => info!(session = %self.handle.id, addr = %self.handle.addr, "[session] disconnected"),
            Closed::Failed(err) => info!(
                session = %self.handle.id,
                addr = %self.handle.addr,
                pending = self.lines.pending(),
                "[session] dropped: {}", err
            ),
        }
        closed
    }

    async fn receive(&mut self) -> Closed {
        loop {
            let line = match self.lines.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Closed::Eof,
                Err(err) => return Closed::Failed(err),
            };

            let msg = Message::frame(&line);
            debug!(session = %self.handle.id, "[session] received {}", msg);
            self.registry.broadcast(&self.handle.id, &msg).await;
        }
    }
}
