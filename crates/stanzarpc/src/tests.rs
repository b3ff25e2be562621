use crate::ops::*;
use crate::*;
use stanzapack::Binary;
use stanzapack::Decoder;
use stanzapack::Encoder;
use stanzapack::Value;

// ============================================================================
//  FRAMES
// ============================================================================

#[test]
fn test_call_frame_roundtrip() -> anyhow::Result<()> {
    let body = GetSessionInfo { name: "main".into() }.to_bytes()?;
    let bytes = CallEncoder::new(42, 7, GET_SESSION_INFO, &body).to_bytes()?;

    match RpcFrame::from_bytes(&bytes)? {
        RpcFrame::Call(call) => {
            assert_eq!(call.seq, 42);
            assert_eq!(call.provider_id, 7);
            assert_eq!(call.op, GET_SESSION_INFO);
            assert_eq!(GetSessionInfo::from_bytes(call.body)?.name, "main");
        }
        RpcFrame::Reply(_) => panic!("expected a call frame"),
    }
    Ok(())
}

#[test]
fn test_reply_ok_roundtrip() -> anyhow::Result<()> {
    let body = Outcome::Success(true).to_bytes()?;
    let bytes = ReplyOkEncoder::new(9, &body).to_bytes()?;

    let RpcFrame::Reply(reply) = RpcFrame::from_bytes(&bytes)? else {
        panic!("expected a reply frame");
    };
    assert_eq!(reply.seq, 9);
    let body = reply.status.map_err(|f| anyhow::anyhow!("{}", f))?;
    assert_eq!(Outcome::<bool>::from_bytes(body)?, Outcome::Success(true));
    Ok(())
}

#[test]
fn test_reply_faults_roundtrip() -> anyhow::Result<()> {
    let faults = [
        Fault::UnknownProvider(3),
        Fault::UnknownOperation("nope".into()),
        Fault::InvalidRegion(11),
        Fault::AccessDenied(12),
        Fault::OutOfBounds { offset: 100, length: 50, size: 128 },
        Fault::HandlerFailed("panicked".into()),
        Fault::ProtocolViolation("garbage".into()),
    ];

    for fault in faults {
        let bytes = ReplyErrEncoder::new(1, &fault).to_bytes()?;
        let RpcFrame::Reply(reply) = RpcFrame::from_bytes(&bytes)? else {
            panic!("expected a reply frame");
        };
        assert_eq!(reply.status, Err(fault));
    }
    Ok(())
}

#[test]
fn test_decode_seq_from_both_frame_kinds() -> anyhow::Result<()> {
    let call = CallEncoder::new(5, 0, EXECUTE, &[]).to_bytes()?;
    assert_eq!(decode_seq(&call)?, 5);

    let reply = ReplyErrEncoder::new(6, &Fault::UnknownProvider(0)).to_bytes()?;
    assert_eq!(decode_seq(&reply)?, 6);
    Ok(())
}

#[test]
fn test_call_missing_provider_is_protocol_violation() -> anyhow::Result<()> {
    let mut enc = Encoder::new();
    enc.variant_begin("Call")?;
    enc.object_begin()?;
    enc.variant_begin("seq")?;
    enc.uint(1)?;
    enc.variant_end()?;
    enc.object_end()?;
    enc.variant_end()?;
    let bytes = enc.into_bytes()?;

    assert!(matches!(RpcFrame::from_bytes(&bytes), Err(RpcError::ProtocolViolation(_))));
    // The sequence number can still be recovered to answer the caller.
    assert_eq!(decode_seq(&bytes)?, 1);
    Ok(())
}

#[test]
fn test_unknown_frame_type() -> anyhow::Result<()> {
    let mut enc = Encoder::new();
    enc.variant_begin("Ping")?;
    enc.null()?;
    enc.variant_end()?;
    let bytes = enc.into_bytes()?;
    assert!(matches!(RpcFrame::from_bytes(&bytes), Err(RpcError::UnknownVariant(_))));
    Ok(())
}

#[test]
fn test_call_frame_skips_unknown_fields() -> anyhow::Result<()> {
    let mut enc = Encoder::new();
    enc.variant_begin("Call")?;
    enc.object_begin()?;
    for (key, val) in [("seq", 3u64), ("trace", 99), ("provider", 1)] {
        enc.variant_begin(key)?;
        enc.uint(val)?;
        enc.variant_end()?;
    }
    enc.variant_begin("op")?;
    enc.str(LOAD)?;
    enc.variant_end()?;
    enc.variant_begin("body")?;
    enc.bytes(&[])?;
    enc.variant_end()?;
    enc.object_end()?;
    enc.variant_end()?;
    let bytes = enc.into_bytes()?;

    let RpcFrame::Call(call) = RpcFrame::from_bytes(&bytes)? else {
        panic!("expected a call frame");
    };
    assert_eq!((call.seq, call.provider_id, call.op), (3, 1, LOAD));
    Ok(())
}

// ============================================================================
//  OUTCOMES
// ============================================================================

#[test]
fn test_outcome_failure_roundtrip() -> anyhow::Result<()> {
    let failure: Outcome<Value> = Outcome::failure(Status::SessionExists, "Session main already exists");
    let decoded = Outcome::<Value>::from_bytes(&failure.to_bytes()?)?;
    assert_eq!(decoded, failure);
    assert_eq!(decoded.status(), Status::SessionExists);
    assert_eq!(decoded.error(), "Session main already exists");
    assert!(decoded.value().is_err());
    Ok(())
}

#[test]
fn test_outcome_success_accessors() {
    let ok = Outcome::Success(Value::from(7i64));
    assert!(ok.is_success());
    assert_eq!(ok.error(), "");
    assert_eq!(ok.status(), Status::Success);
    assert_eq!(ok.value(), Ok(&Value::Int(7)));
    assert_eq!(ok.into_result(), Ok(Value::Int(7)));
}

#[test]
fn test_outcome_rejects_unknown_status() -> anyhow::Result<()> {
    let mut enc = Encoder::new();
    enc.result_err_begin()?;
    enc.object_begin()?;
    enc.variant_begin("status")?;
    enc.int(-99)?;
    enc.variant_end()?;
    enc.variant_begin("message")?;
    enc.str("?")?;
    enc.variant_end()?;
    enc.object_end()?;
    enc.result_err_end()?;
    let bytes = enc.into_bytes()?;

    let mut dec = Decoder::new(&bytes);
    assert!(matches!(Outcome::<Value>::decode(&mut dec), Err(RpcError::UnknownVariant(_))));
    Ok(())
}

#[test]
fn test_status_codes_are_stable() {
    let expected = [
        (Status::Success, 0),
        (Status::Allocation, -1),
        (Status::InvalidArgument, -2),
        (Status::Transport, -3),
        (Status::Language, -4),
        (Status::Code, -5),
        (Status::UnknownProvider, -6),
        (Status::SessionExists, -7),
        (Status::NoSession, -8),
        (Status::SessionInit, -9),
        (Status::Concurrency, -10),
    ];
    for (status, code) in expected {
        assert_eq!(status.code(), code);
        assert_eq!(Status::from_code(code as i64), Some(status));
    }
}

#[test]
fn test_typed_outcome_mismatch() -> anyhow::Result<()> {
    let bytes = Outcome::Success(Value::from("not a bool")).to_bytes()?;
    assert!(matches!(Outcome::<bool>::from_bytes(&bytes), Err(RpcError::TypeMismatch { .. })));
    Ok(())
}

// ============================================================================
//  OPERATION PAYLOADS
// ============================================================================

#[test]
fn test_session_target_wire_form() {
    assert_eq!(SessionTarget::Anonymous.to_wire(), Value::Int(-2));
    assert_eq!(SessionTarget::from_wire(&Value::Int(-2)), Some(SessionTarget::Anonymous));
    assert_eq!(SessionTarget::from_wire(&Value::UInt(4)), Some(SessionTarget::Id(SessionId(4))));
    assert_eq!(SessionTarget::from_wire(&Value::Int(4)), Some(SessionTarget::Id(SessionId(4))));
    assert_eq!(SessionTarget::from_wire(&Value::Int(-1)), None);
    assert_eq!(SessionTarget::from_wire(&Value::from("4")), None);
    assert_eq!(SessionId(3).to_string(), "session-3");
}

#[test]
fn test_large_session_ids_stay_ids() -> anyhow::Result<()> {
    for id in [u64::MAX - 1, u64::MAX, 1 << 63] {
        let target = SessionTarget::Id(SessionId(id));
        assert_eq!(SessionTarget::from_wire(&target.to_wire()), Some(target));

        let request = Load { target, language: None, path: "x".into(), args: vec![] };
        assert_eq!(Load::from_bytes(&request.to_bytes()?)?.target, target);
    }
    Ok(())
}

#[test]
fn test_execute_payload_keeps_binary_args() -> anyhow::Result<()> {
    let request = Execute {
        target: SessionTarget::Anonymous,
        language: Some("tally".into()),
        code: "$0".into(),
        args: vec![Value::from(1u64), Value::Binary(Binary::with_subtype(2388, vec![1, 2]))],
    };
    assert_eq!(Execute::from_bytes(&request.to_bytes()?)?, request);
    Ok(())
}

#[test]
fn test_call_payload_defaults_object() -> anyhow::Result<()> {
    let mut value = Call {
        target: SessionId(0).into(),
        language: None,
        function: "add".into(),
        object: String::new(),
        args: vec![],
    }
    .to_value();
    if let Value::Object(map) = &mut value {
        map.remove("object");
    }
    let decoded = Call::from_value(value)?;
    assert_eq!(decoded.object, "");
    assert_eq!(decoded.language, None);
    Ok(())
}

#[test]
fn test_payload_missing_field() {
    let value = Value::Object([("name", "x")].into_iter().collect());
    assert_eq!(
        CreateSession::from_value(value),
        Err(RpcError::MissingField("language".into()))
    );
}

#[test]
fn test_session_info_roundtrip() -> anyhow::Result<()> {
    let info = SessionInfo { id: SessionId(2), language: "tally".into() };
    let outcome = Outcome::Success(info.clone());
    assert_eq!(Outcome::<SessionInfo>::from_bytes(&outcome.to_bytes()?)?, Outcome::Success(info));
    Ok(())
}
