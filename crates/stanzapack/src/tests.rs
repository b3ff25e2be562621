use crate::json::undump_binary;
use crate::*;

// ============================================================================
//  SCALARS
// ============================================================================

#[test]
fn test_scalars_roundtrip() -> Result<()> {
    let mut enc = Encoder::new();
    enc.null()?;
    enc.bool(true)?;
    enc.bool(false)?;
    enc.int(i64::MIN)?;
    enc.uint(u64::MAX)?;
    enc.float(2.5)?;

    let bytes = enc.into_bytes()?;
    let mut dec = Decoder::new(&bytes);

    dec.null()?;
    assert_eq!(dec.bool()?, true);
    assert_eq!(dec.bool()?, false);
    assert_eq!(dec.int()?, i64::MIN);
    assert_eq!(dec.uint()?, u64::MAX);
    assert_eq!(dec.float()?, 2.5);
    assert_eq!(dec.remaining(), 0);
    Ok(())
}

#[test]
fn test_integers_are_little_endian() -> Result<()> {
    let mut enc = Encoder::new();
    enc.uint(1)?;
    let bytes = enc.into_bytes()?;
    assert_eq!(bytes, vec![Tag::UInt as u8, 1, 0, 0, 0, 0, 0, 0, 0]);
    Ok(())
}

// ============================================================================
//  BLOB TESTS
// ============================================================================

#[test]
fn test_strings_and_bytes() -> Result<()> {
    let mut enc = Encoder::new();
    enc.str("hello")?;
    enc.str("")?;
    enc.bytes(&[1, 2, 3])?;

    let bytes = enc.into_bytes()?;
    let mut dec = Decoder::new(&bytes);

    assert_eq!(dec.str()?, "hello");
    assert_eq!(dec.str()?, "");
    assert_eq!(dec.bytes()?, &[1, 2, 3]);
    Ok(())
}

#[test]
fn test_binary_keeps_subtype() -> Result<()> {
    let mut enc = Encoder::new();
    enc.binary(Some(2388), &[9, 8, 7])?;
    enc.binary(None, &[1])?;

    let bytes = enc.into_bytes()?;
    let mut dec = Decoder::new(&bytes);

    assert_eq!(dec.binary()?, (Some(2388), &[9u8, 8, 7][..]));
    assert_eq!(dec.binary()?, (None, &[1u8][..]));
    Ok(())
}

#[test]
fn test_invalid_utf8_is_rejected() {
    let bytes = vec![Tag::String as u8, 2, 0, 0, 0, 0xff, 0xfe];
    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.str(), Err(Error::InvalidUtf8));
}

// ============================================================================
//  STRUCTURAL STRICTNESS
// ============================================================================

#[test]
fn test_object_rejects_bare_items() -> Result<()> {
    let mut enc = Encoder::new();
    enc.object_begin()?;
    assert_eq!(enc.int(1), Err(Error::InvalidObjectEntry));
    Ok(())
}

#[test]
fn test_variant_requires_exactly_one_payload() -> Result<()> {
    let mut enc = Encoder::new();
    enc.variant_begin("key")?;
    assert_eq!(enc.variant_end(), Err(Error::EmptyAdt(Scope::Variant)));
    enc.int(1)?;
    assert_eq!(enc.int(2), Err(Error::TooManyItems(Scope::Variant)));
    enc.variant_end()?;
    Ok(())
}

#[test]
fn test_unclosed_scope_cannot_finalize() -> Result<()> {
    let mut enc = Encoder::new();
    enc.array_begin()?;
    assert!(matches!(enc.into_bytes(), Err(Error::ScopeStillOpen)));
    Ok(())
}

#[test]
fn test_scope_mismatch() -> Result<()> {
    let mut enc = Encoder::new();
    enc.array_begin()?;
    assert_eq!(
        enc.object_end(),
        Err(Error::ScopeMismatch { expected: Scope::Object, actual: Scope::Array })
    );
    assert_eq!(Encoder::new().array_end(), Err(Error::ScopeUnderflow));
    Ok(())
}

#[test]
fn test_truncated_input() -> Result<()> {
    let bytes = Value::from("truncate me").to_bytes()?;
    let mut dec = Decoder::new(&bytes[..bytes.len() - 1]);
    assert_eq!(dec.str(), Err(Error::UnexpectedEnd));
    Ok(())
}

#[test]
fn test_skip_nested_container() -> Result<()> {
    let nested = Value::Array(vec![Value::object(), Value::from(vec![1u64, 2, 3])]);
    let mut enc = Encoder::new();
    nested.encode(&mut enc)?;
    enc.str("after")?;

    let bytes = enc.into_bytes()?;
    let mut dec = Decoder::new(&bytes);
    dec.skip()?;
    assert_eq!(dec.str()?, "after");
    Ok(())
}

// ============================================================================
//  VALUE TREES
// ============================================================================

fn sample_tree() -> Value {
    let mut inner = Map::new();
    inner.insert("zeta", 1i64);
    inner.insert("alpha", Value::Null);
    let mut root = Map::new();
    root.insert("name", "session");
    root.insert("count", 3u64);
    root.insert("ratio", -0.5);
    root.insert("flags", vec![true, false]);
    root.insert("blob", Binary::with_subtype(7, vec![0, 255]));
    root.insert("inner", inner);
    Value::Object(root)
}

#[test]
fn test_value_tree_roundtrip_keeps_order() -> Result<()> {
    let tree = sample_tree();
    let decoded = Value::from_bytes(&tree.to_bytes()?)?;
    assert_eq!(decoded, tree);

    let keys: Vec<&str> = decoded.get("inner").and_then(Value::as_object).map(|m| m.keys().collect()).unwrap();
    assert_eq!(keys, vec!["zeta", "alpha"]);
    Ok(())
}

#[test]
fn test_trailing_bytes_are_rejected() -> Result<()> {
    let mut bytes = Value::Null.to_bytes()?;
    bytes.push(Tag::Null as u8);
    assert!(Value::from_bytes(&bytes).is_err());
    Ok(())
}

#[test]
fn test_depth_limit() {
    let mut bytes = Vec::new();
    // Hand-build deeply nested arrays: each level is [Tag][Len][Body].
    let depth = value::MAX_DEPTH + 2;
    let mut body: Vec<u8> = vec![Tag::Null as u8];
    for _ in 0..depth {
        let mut wrapped = vec![Tag::Array as u8];
        wrapped.extend_from_slice(&(body.len() as u32).to_le_bytes());
        wrapped.extend_from_slice(&body);
        body = wrapped;
    }
    bytes.extend_from_slice(&body);
    assert_eq!(Value::from_bytes(&bytes), Err(Error::DepthExceeded(value::MAX_DEPTH)));
}

#[test]
fn test_map_insert_replaces_in_place() {
    let mut map = Map::new();
    map.insert("a", 1i64);
    map.insert("b", 2i64);
    assert_eq!(map.insert("a", 3i64), Some(Value::Int(1)));
    let keys: Vec<&str> = map.keys().collect();
    assert_eq!(keys, vec!["a", "b"]);
    assert_eq!(map.get("a"), Some(&Value::Int(3)));
    assert_eq!(map.remove("b"), Some(Value::Int(2)));
    assert_eq!(map.len(), 1);
}

#[test]
fn test_numeric_accessors() {
    assert_eq!(Value::UInt(7).as_i64(), Some(7));
    assert_eq!(Value::Int(-1).as_u64(), None);
    assert_eq!(Value::UInt(u64::MAX).as_i64(), None);
    assert_eq!(Value::Int(2).as_f64(), Some(2.0));
}

// ============================================================================
//  JSON BRIDGE
// ============================================================================

#[test]
fn test_json_parse_keeps_document_order() -> Result<()> {
    let value = Value::from_json_str(r#"{"b": 1, "a": [-2, 0.5, "x", null, true]}"#)?;
    let keys: Vec<&str> = value.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["b", "a"]);
    assert_eq!(value.get("b"), Some(&Value::UInt(1)));
    assert_eq!(
        value.get("a"),
        Some(&Value::Array(vec![
            Value::Int(-2),
            Value::Float(0.5),
            Value::from("x"),
            Value::Null,
            Value::Bool(true),
        ]))
    );
    Ok(())
}

#[test]
fn test_json_invalid_text() {
    assert!(matches!(Value::from_json_str("{not json"), Err(Error::Json(_))));
}

#[test]
fn test_binary_dump_and_undump() -> Result<()> {
    let bin = Binary::with_subtype(2388, vec![1, 2, 250]);
    let text = Value::Binary(bin.clone()).to_json_string();
    assert_eq!(text, r#"{"bytes":[1,2,250],"subtype":2388}"#);

    let reparsed = Value::from_json_str(&text)?;
    assert_eq!(undump_binary(&reparsed), Some(bin));
    Ok(())
}

#[test]
fn test_undump_rejects_out_of_range_bytes() -> Result<()> {
    let value = Value::from_json_str(r#"{"bytes":[1,256],"subtype":1}"#)?;
    assert_eq!(undump_binary(&value), None);
    let value = Value::from_json_str(r#"{"bytes":[1]}"#)?;
    assert_eq!(undump_binary(&value), None);
    Ok(())
}
