use std::future::Future;
use crate::connection::SessionId;
use message::Message;

pub mod message;
pub mod registry;

/// Whether the originating session gets its own line back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryPolicy {
    #[default]
    IncludeSender,
    ExcludeSender,
}

impl DeliveryPolicy {
    #[inline]
    pub fn accepts(&self, sender: &SessionId, recipient: &SessionId) -> bool {
        match self {
            Self::IncludeSender => true,
            Self::ExcludeSender => sender != recipient,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

pub trait Broadcaster: Send + Sync {
    /// Fire-and-forget delivery of `msg` to every eligible session.
    /// A failing recipient never stops delivery to the others.
    fn broadcast(&self, sender: &SessionId, msg: &Message) -> impl Future<Output = Delivery> + Send;
}
