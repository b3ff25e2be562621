//! # StanzaRPC
//!
//! The request/response protocol spoken between session clients and session
//! providers, layered over Stanzapack.
//!
//! ## Architecture
//!
//! Two layers travel together on every connection:
//!
//! - **Frames** (`frame`): the envelope. A `Call` names a provider id and an
//!   operation and carries an opaque body; a `Reply` echoes the sequence number
//!   and either carries the response body or a `Fault` explaining why the
//!   remote engine could not dispatch the call.
//! - **Bodies** (`ops`, `outcome`): typed request payloads and `Outcome<T>`
//!   responses. Application failures (unknown session, interpreter errors)
//!   are successful replies whose body is a failed `Outcome`.

pub mod error;
pub mod frame;
pub mod ops;
pub mod outcome;
pub mod payload;

#[cfg(test)]
mod tests;

pub use error::Fault;
pub use error::Result;
pub use error::RpcError;
pub use frame::CallDecoder;
pub use frame::CallEncoder;
pub use frame::ReplyDecoder;
pub use frame::ReplyErrEncoder;
pub use frame::ReplyOkEncoder;
pub use frame::RpcFrame;
pub use frame::decode_seq;
pub use ops::SessionId;
pub use ops::SessionTarget;
pub use outcome::Failure;
pub use outcome::Outcome;
pub use outcome::Status;
pub use payload::Payload;
