//! # Futures
//!
//! A [`Future`] is the caller's handle to one in-flight request. The request
//! is already on its way when the future is handed out; `wait` suspends the
//! calling task (never an OS thread) until the reply arrives and unwraps the
//! transported `Outcome`.
//!
//! The first completed wait caches its result, so later waits re-deliver the
//! same value or the same error.

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use stanzarpc::Outcome;
use stanzarpc::Payload;

use crate::error::Error;
use crate::error::Result;

enum State<T> {
    Pending(oneshot::Receiver<Result<Vec<u8>>>),
    Done(Result<T>),
}

/// Handle to an outstanding request whose reply decodes to `T`.
pub struct Future<T> {
    state: State<T>,
}

impl<T> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Pending(_) => "pending",
            State::Done(_) => "done",
        };
        f.debug_struct("Future").field("state", &state).finish()
    }
}

impl<T: Payload + Clone> Future<T> {
    pub(crate) fn pending(rx: oneshot::Receiver<Result<Vec<u8>>>) -> Self {
        Self { state: State::Pending(rx) }
    }

    /// A future that is already resolved.
    pub fn ready(result: Result<T>) -> Self {
        Self { state: State::Done(result) }
    }

    /// Waits for the reply and unwraps it.
    ///
    /// A failed `Outcome` becomes `Error::Remote` carrying the remote message.
    pub async fn wait(&mut self) -> Result<T> {
        let result = match &mut self.state {
            State::Done(result) => return result.clone(),
            State::Pending(rx) => match rx.await {
                Ok(reply) => unwrap_reply(reply),
                Err(_) => Err(Error::Closed),
            },
        };
        self.state = State::Done(result.clone());
        result
    }

    /// Whether the reply has arrived. Never blocks.
    pub fn completed(&mut self) -> bool {
        let result = match &mut self.state {
            State::Done(_) => return true,
            State::Pending(rx) => match rx.try_recv() {
                Ok(reply) => unwrap_reply(reply),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Closed) => Err(Error::Closed),
            },
        };
        self.state = State::Done(result);
        true
    }
}

fn unwrap_reply<T: Payload>(reply: Result<Vec<u8>>) -> Result<T> {
    match Outcome::<T>::from_bytes(&reply?)? {
        Outcome::Success(value) => Ok(value),
        Outcome::Failure(failure) => Err(Error::Remote(failure)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stanzapack::Value;
    use stanzarpc::Status;

    #[tokio::test]
    async fn wait_is_idempotent() {
        let (tx, rx) = oneshot::channel();
        let mut future: Future<Value> = Future::pending(rx);
        assert!(!future.completed());

        let body = Outcome::Success(Value::from(7i64)).to_bytes().unwrap();
        tx.send(Ok(body)).unwrap();

        assert_eq!(future.wait().await, Ok(Value::Int(7)));
        assert_eq!(future.wait().await, Ok(Value::Int(7)));
        assert!(future.completed());
    }

    #[tokio::test]
    async fn failure_becomes_remote_error() {
        let (tx, rx) = oneshot::channel();
        let mut future: Future<bool> = Future::pending(rx);
        let body = Outcome::<bool>::failure(Status::NoSession, "Could not find session").to_bytes().unwrap();
        tx.send(Ok(body)).unwrap();

        assert!(future.completed());
        let err = future.wait().await.unwrap_err();
        assert_eq!(err.status(), Status::NoSession);
        assert_eq!(err.to_string(), "Could not find session");
    }

    #[tokio::test]
    async fn dropped_sender_closes() {
        let (tx, rx) = oneshot::channel::<Result<Vec<u8>>>();
        let mut future: Future<Value> = Future::pending(rx);
        drop(tx);
        assert_eq!(future.wait().await, Err(Error::Closed));
    }
}
