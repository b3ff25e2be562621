//! # Frames
//!
//! The envelope around every message on a connection. A frame is either a
//! `Call` (sequence number, provider, operation, body) or a `Reply` (sequence
//! number plus a body on success, or a [`Fault`] when dispatch failed).
//!
//! Bodies are carried as already-encoded bytes so the envelope can be routed
//! without touching the payload. Decoding never panics on hostile input, and
//! header keys this version does not know are skipped.

use crate::error::Fault;
use crate::error::Result;
use crate::error::RpcError;

use stanzapack::Decoder;
use stanzapack::Encoder;
use stanzapack::ObjectIter;

const CALL: &str = "Call";
const REPLY: &str = "Reply";

/// An outgoing request.
pub struct CallEncoder<'a> {
    pub seq: u64,
    pub provider_id: u16,
    pub op: &'a str,
    pub body: &'a [u8],
}

impl<'a> CallEncoder<'a> {
    pub fn new(seq: u64, provider_id: u16, op: &'a str, body: &'a [u8]) -> Self {
        Self { seq, provider_id, op, body }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        envelope(enc, CALL, None, |enc| {
            put_uint(enc, "seq", self.seq)?;
            put_uint(enc, "provider", u64::from(self.provider_id))?;
            put_field(enc, "op", |enc| enc.str(self.op))?;
            put_field(enc, "body", |enc| enc.bytes(self.body))
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        finish(|enc| self.encode(enc))
    }
}

/// A request as read off the wire, borrowing from the frame bytes.
pub struct CallDecoder<'a> {
    pub seq: u64,
    pub provider_id: u16,
    pub op: &'a str,
    pub body: &'a [u8],
}

impl<'a> CallDecoder<'a> {
    pub fn decode(mut dec: Decoder<'a>) -> Result<Self> {
        let (mut seq, mut provider, mut op, mut body) = (None, None, None, None);
        for_each_field(dec.object()?, |key, val| {
            match key {
                "seq" => seq = Some(val.uint()?),
                "provider" => provider = Some(val.uint()?),
                "op" => op = Some(val.str()?),
                "body" => body = Some(val.bytes()?),
                _ => val.skip()?,
            }
            Ok(())
        })?;

        let provider = required(provider, "provider")?;
        let provider_id = u16::try_from(provider)
            .map_err(|_| RpcError::ProtocolViolation(format!("Provider id {} out of range", provider)))?;

        Ok(Self {
            seq: required(seq, "seq")?,
            provider_id,
            op: required(op, "op")?,
            body: required(body, "body")?,
        })
    }
}

/// A successful reply carrying the handler's encoded response.
pub struct ReplyOkEncoder<'a> {
    pub seq: u64,
    pub body: &'a [u8],
}

impl<'a> ReplyOkEncoder<'a> {
    pub fn new(seq: u64, body: &'a [u8]) -> Self {
        Self { seq, body }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        envelope(enc, REPLY, Some(true), |enc| {
            put_uint(enc, "seq", self.seq)?;
            put_field(enc, "body", |enc| enc.bytes(self.body))
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        finish(|enc| self.encode(enc))
    }
}

/// A reply for a call that never reached a handler.
pub struct ReplyErrEncoder<'a> {
    pub seq: u64,
    pub fault: &'a Fault,
}

impl<'a> ReplyErrEncoder<'a> {
    pub fn new(seq: u64, fault: &'a Fault) -> Self {
        Self { seq, fault }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        envelope(enc, REPLY, Some(false), |enc| {
            put_uint(enc, "seq", self.seq)?;
            enc.variant_begin("fault")?;
            encode_fault(enc, self.fault)?;
            enc.variant_end()?;
            Ok(())
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        finish(|enc| self.encode(enc))
    }
}

/// A reply as read off the wire.
pub struct ReplyDecoder<'a> {
    pub seq: u64,
    /// `Ok` holds the handler's encoded response. `Err` means the remote
    /// engine could not dispatch the call at all.
    pub status: std::result::Result<&'a [u8], Fault>,
}

impl<'a> ReplyDecoder<'a> {
    pub fn decode(mut dec: Decoder<'a>) -> Result<Self> {
        let (ok, mut arm) = match dec.result()? {
            Ok(arm) => (true, arm),
            Err(arm) => (false, arm),
        };

        let (mut seq, mut body, mut fault) = (None, None, None);
        for_each_field(arm.object()?, |key, val| {
            match key {
                "seq" => seq = Some(val.uint()?),
                "body" if ok => body = Some(val.bytes()?),
                "fault" if !ok => fault = Some(decode_fault(val)?),
                _ => val.skip()?,
            }
            Ok(())
        })?;

        let seq = required(seq, "seq")?;
        let status = match ok {
            true => Ok(required(body, "body")?),
            false => Err(required(fault, "fault")?),
        };
        Ok(Self { seq, status })
    }
}

/// Either kind of frame.
pub enum RpcFrame<'a> {
    Call(CallDecoder<'a>),
    Reply(ReplyDecoder<'a>),
}

impl<'a> RpcFrame<'a> {
    pub fn decode(dec: &mut Decoder<'a>) -> Result<Self> {
        match dec.variant()? {
            (CALL, body) => CallDecoder::decode(body).map(RpcFrame::Call),
            (REPLY, body) => ReplyDecoder::decode(body).map(RpcFrame::Reply),
            (other, _) => Err(unknown_frame(other)),
        }
    }

    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self> {
        Self::decode(&mut Decoder::new(bytes))
    }
}

/// Pulls only the sequence number out of a frame, so a frame that fails
/// full decoding can still be answered or matched to its caller.
pub fn decode_seq(bytes: &[u8]) -> Result<u64> {
    let headers = match Decoder::new(bytes).variant()? {
        (CALL, mut body) => body.object()?,
        (REPLY, mut body) => match body.result()? {
            Ok(mut arm) | Err(mut arm) => arm.object()?,
        },
        (other, _) => return Err(unknown_frame(other)),
    };

    let mut seq = None;
    for_each_field(headers, |key, val| {
        match key {
            "seq" if seq.is_none() => seq = Some(val.uint()?),
            _ => val.skip()?,
        }
        Ok(())
    })?;
    required(seq, "seq")
}

fn unknown_frame(kind: &str) -> RpcError {
    RpcError::UnknownVariant(format!("Top-level frame: {}", kind))
}

fn required<T>(field: Option<T>, name: &str) -> Result<T> {
    field.ok_or_else(|| RpcError::ProtocolViolation(format!("Missing {}", name)))
}

fn finish(write: impl FnOnce(&mut Encoder) -> Result<()>) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    write(&mut enc)?;
    Ok(enc.into_bytes()?)
}

/// `kind` wrapping an object of headers, inside a result arm for replies.
fn envelope(
    enc: &mut Encoder,
    kind: &str,
    arm: Option<bool>,
    headers: impl FnOnce(&mut Encoder) -> Result<()>,
) -> Result<()> {
    enc.variant_begin(kind)?;
    match arm {
        Some(true) => enc.result_ok_begin()?,
        Some(false) => enc.result_err_begin()?,
        None => {}
    }
    enc.object_begin()?;
    headers(enc)?;
    enc.object_end()?;
    match arm {
        Some(true) => enc.result_ok_end()?,
        Some(false) => enc.result_err_end()?,
        None => {}
    }
    enc.variant_end()?;
    Ok(())
}

fn put_field(
    enc: &mut Encoder,
    key: &str,
    value: impl FnOnce(&mut Encoder) -> stanzapack::Result<()>,
) -> Result<()> {
    enc.variant_begin(key)?;
    value(enc)?;
    enc.variant_end()?;
    Ok(())
}

fn put_uint(enc: &mut Encoder, key: &str, value: u64) -> Result<()> {
    put_field(enc, key, |enc| enc.uint(value))
}

fn for_each_field<'a>(
    mut fields: ObjectIter<'a>,
    mut visit: impl FnMut(&'a str, &mut Decoder<'a>) -> Result<()>,
) -> Result<()> {
    while let Some((key, mut val)) = fields.next()? {
        visit(key, &mut val)?;
    }
    Ok(())
}

fn encode_fault(enc: &mut Encoder, fault: &Fault) -> Result<()> {
    put_field(enc, fault.as_tag(), |enc| match fault {
        Fault::UnknownProvider(id) => enc.uint(u64::from(*id)),
        Fault::InvalidRegion(id) | Fault::AccessDenied(id) => enc.uint(*id),
        Fault::OutOfBounds { offset, length, size } => {
            enc.object_begin()?;
            for (key, value) in [("offset", offset), ("length", length), ("size", size)] {
                enc.variant_begin(key)?;
                enc.uint(*value)?;
                enc.variant_end()?;
            }
            enc.object_end()
        }
        Fault::UnknownOperation(msg) | Fault::HandlerFailed(msg) | Fault::ProtocolViolation(msg) => enc.str(msg),
    })
}

fn decode_fault(dec: &mut Decoder) -> Result<Fault> {
    let (tag, mut body) = dec.variant()?;
    let fault = match tag {
        "UnknownProvider" => Fault::UnknownProvider(u16::try_from(body.uint()?).unwrap_or(u16::MAX)),
        "InvalidRegion" => Fault::InvalidRegion(body.uint()?),
        "AccessDenied" => Fault::AccessDenied(body.uint()?),
        "OutOfBounds" => {
            let (mut offset, mut length, mut size) = (0, 0, 0);
            for_each_field(body.object()?, |key, val| {
                match key {
                    "offset" => offset = val.uint()?,
                    "length" => length = val.uint()?,
                    "size" => size = val.uint()?,
                    _ => val.skip()?,
                }
                Ok(())
            })?;
            Fault::OutOfBounds { offset, length, size }
        }
        "UnknownOperation" => Fault::UnknownOperation(body.str()?.to_string()),
        "HandlerFailed" => Fault::HandlerFailed(body.str()?.to_string()),
        "ProtocolViolation" => Fault::ProtocolViolation(body.str()?.to_string()),
        other => return Err(RpcError::UnknownVariant(format!("Fault: {}", other))),
    };
    Ok(fault)
}
