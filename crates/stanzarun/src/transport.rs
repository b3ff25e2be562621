//! # Transport
//!
//! Moves whole messages between two engines. A transport has no idea what a
//! frame is; matching replies to calls happens in [`Peer`](crate::peer::Peer).
//! Either end may send whenever it likes.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

/// Why bytes could not be moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An established connection went away.
    ConnectionLost(String),
    /// Nothing is listening at the address.
    Unreachable(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost(detail) => write!(f, "Lost connection ({})", detail),
            Self::Unreachable(address) => write!(f, "No engine listening at {}", address),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// One end of a message pipe. Used behind `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, message: &[u8]) -> Result<()>;

    /// The next message, or `Ok(None)` once the other end has hung up.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}

type Inbox = Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>;

/// In-process pipe over a pair of unbounded channels.
pub struct ChannelTransport {
    outbox: mpsc::UnboundedSender<Vec<u8>>,
    inbox: Inbox,
}

impl ChannelTransport {
    /// Two ends wired to each other.
    pub fn pair() -> (Self, Self) {
        let (left_out, right_in) = mpsc::unbounded_channel();
        let (right_out, left_in) = mpsc::unbounded_channel();
        let end = |outbox, inbox| Self { outbox, inbox: Arc::new(Mutex::new(inbox)) };
        (end(left_out, left_in), end(right_out, right_in))
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: &[u8]) -> Result<()> {
        self.outbox
            .send(message.to_vec())
            .map_err(|_| Error::ConnectionLost("other end dropped".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.inbox.lock().await.recv().await)
    }
}
