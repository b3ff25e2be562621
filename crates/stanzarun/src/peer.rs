//! # Peer
//!
//! The client side of one connection. A background pump task reads reply
//! frames off the transport and hands each one to the caller waiting on its
//! sequence number.
//!
//! There are no timeouts at this layer: a call whose reply never arrives
//! waits until the connection drops, at which point every pending caller is
//! failed with the transport error.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use stanzarpc::CallEncoder;
use stanzarpc::RpcFrame;
use stanzarpc::decode_seq;

use crate::error::Error;
use crate::error::Result;
use crate::transport;
use crate::transport::Transport;

type Pending = DashMap<u64, oneshot::Sender<Result<Vec<u8>>>>;

/// A multiplexed connection to one remote engine.
///
/// Each Peer owns its transport exclusively, so sequence numbers are scoped
/// to a single connection. Dropping the Peer stops its pump and closes the
/// connection.
pub struct Peer {
    address: String,
    transport: Arc<dyn Transport>,
    pending: Arc<Pending>,
    seq_gen: AtomicU64,
    closed: Arc<AtomicBool>,
    pump: AbortHandle,
}

impl Peer {
    /// Takes over `transport` and starts reading replies from it.
    pub fn new(address: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        let address = address.into();
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let pump_transport = transport.clone();
        let pump_pending = pending.clone();
        let pump_closed = closed.clone();
        let pump_address = address.clone();

        let pump = tokio::spawn(async move {
            let error = loop {
                match pump_transport.recv().await {
                    Ok(Some(msg)) => Self::handle_message(&msg, &pump_pending),
                    Ok(None) => break transport::Error::ConnectionLost("Stream closed".into()),
                    Err(e) => break e,
                }
            };
            tracing::debug!(peer = %pump_address, error = %error, "connection closed");

            pump_closed.store(true, Ordering::Release);
            Self::notify_all_pending(&pump_pending, Error::Transport(error));
        });

        Self {
            address,
            transport,
            pending,
            seq_gen: AtomicU64::new(1),
            closed,
            pump: pump.abort_handle(),
        }
    }

    /// The address of the remote engine.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the pump has seen the connection drop.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn notify_all_pending(pending: &Pending, error: Error) {
        let keys: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, tx)) = pending.remove(&key) {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }

    /// Routes one inbound frame to its waiter.
    fn handle_message(msg: &[u8], pending: &Pending) {
        let result = match RpcFrame::from_bytes(msg) {
            Ok(RpcFrame::Reply(reply)) => {
                let outcome = reply.status.map(<[u8]>::to_vec).map_err(Error::Fault);
                (reply.seq, outcome)
            }
            Ok(RpcFrame::Call(call)) => {
                tracing::warn!(seq = call.seq, "peer received a call frame; dropping it");
                return;
            }
            Err(e) => match decode_seq(msg) {
                Ok(seq) => (seq, Err(Error::Rpc(e))),
                Err(_) => {
                    tracing::warn!(error = %e, "peer received an undecodable frame");
                    return;
                }
            },
        };

        let (seq, outcome) = result;
        // A missing entry means the caller already gave up on this sequence number.
        if let Some((_, tx)) = pending.remove(&seq) {
            let _ = tx.send(outcome);
        }
    }

    /// Sends one call and waits for its reply body.
    ///
    /// `Err(Error::Fault)` means the remote engine refused to dispatch the call.
    pub async fn call(&self, provider_id: u16, op: &str, body: &[u8]) -> Result<Vec<u8>> {
        let seq = self.seq_gen.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(seq, tx);

        if self.is_closed() {
            self.pending.remove(&seq);
            return Err(Error::Transport(transport::Error::ConnectionLost(self.address.clone())));
        }

        let frame = match CallEncoder::new(seq, provider_id, op, body).to_bytes() {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.remove(&seq);
                return Err(e.into());
            }
        };

        tracing::trace!(peer = %self.address, seq, provider = provider_id, op, "sending call");
        if let Err(e) = self.transport.send(&frame).await {
            self.pending.remove(&seq);
            return Err(e.into());
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Closed),
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.pump.abort();
        Self::notify_all_pending(&self.pending, Error::Closed);
    }
}
