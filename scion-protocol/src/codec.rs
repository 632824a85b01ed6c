//! Bidirectional conversion between value trees and the two wire encodings

use serde_json::Value as Json;

use crate::descriptor::TypeDescriptor;
use crate::error::CodecError;
use crate::value::Value;

/// The wire encoding of a [`DynamicValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Human-legible, text-structured encoding.
    Json,
    /// Compact binary encoding. The conventional outbound format.
    Msgpack,
}

/// A schema-dependent encoded value.
///
/// The buffer is opaque without the [`TypeDescriptor`] that produced it; a
/// `DynamicValue` is constructed immediately before or after an RPC boundary
/// and never retained past the call that carried it.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicValue {
    format: WireFormat,
    bytes: Vec<u8>,
}

impl DynamicValue {
    /// Wrap bytes already in the text-structured encoding.
    pub fn from_json(bytes: Vec<u8>) -> Self {
        Self {
            format: WireFormat::Json,
            bytes,
        }
    }

    /// Wrap bytes already in the compact-binary encoding.
    pub fn from_msgpack(bytes: Vec<u8>) -> Self {
        Self {
            format: WireFormat::Msgpack,
            bytes,
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Encode a value against its descriptor into the requested wire format.
///
/// Conforming plugins should encode outbound values with
/// [`WireFormat::Msgpack`]; the JSON path exists because the host is
/// tolerant on ingress and tests want a legible form.
pub fn encode(
    value: &Value,
    descriptor: &TypeDescriptor,
    format: WireFormat,
) -> Result<DynamicValue, CodecError> {
    match format {
        WireFormat::Json => {
            let tree = to_json(value, descriptor)?;
            Ok(DynamicValue {
                format,
                bytes: serde_json::to_vec(&tree)?,
            })
        }
        WireFormat::Msgpack => {
            let tree = to_msgpack(value, descriptor)?;
            let mut bytes = Vec::new();
            rmpv::encode::write_value(&mut bytes, &tree)
                .map_err(|e| CodecError::MalformedMsgpack(e.to_string()))?;
            Ok(DynamicValue { format, bytes })
        }
    }
}

/// Decode a wire payload against its descriptor.
///
/// Either wire format is accepted. A payload whose shape disagrees with the
/// descriptor is rejected with a descriptive error, never coerced.
pub fn decode(value: &DynamicValue, descriptor: &TypeDescriptor) -> Result<Value, CodecError> {
    match value.format {
        WireFormat::Json => {
            let json: Json = serde_json::from_slice(&value.bytes)?;
            from_json(&json, descriptor)
        }
        WireFormat::Msgpack => {
            let mut slice = value.bytes.as_slice();
            let tree = rmpv::decode::read_value(&mut slice)
                .map_err(|e| CodecError::MalformedMsgpack(e.to_string()))?;
            from_msgpack(&tree, descriptor)
        }
    }
}

fn descriptor_kind(descriptor: &TypeDescriptor) -> &'static str {
    match descriptor {
        TypeDescriptor::String => "string",
        TypeDescriptor::Number => "number",
        TypeDescriptor::Bool => "bool",
        TypeDescriptor::List(_) => "list",
        TypeDescriptor::Set(_) => "set",
        TypeDescriptor::Map(_) => "map",
        TypeDescriptor::Object { .. } => "object",
        TypeDescriptor::Tuple(_) => "tuple",
    }
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "sequence",
        Json::Object(_) => "mapping",
    }
}

fn msgpack_kind(value: &rmpv::Value) -> &'static str {
    match value {
        rmpv::Value::Nil => "null",
        rmpv::Value::Boolean(_) => "bool",
        rmpv::Value::Integer(_) | rmpv::Value::F32(_) | rmpv::Value::F64(_) => "number",
        rmpv::Value::String(_) => "string",
        rmpv::Value::Array(_) => "sequence",
        rmpv::Value::Map(_) => "mapping",
        rmpv::Value::Binary(_) => "binary",
        rmpv::Value::Ext(..) => "extension",
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn to_json(value: &Value, descriptor: &TypeDescriptor) -> Result<Json, CodecError> {
    match (value, descriptor) {
        // Null encodes against any descriptor; it is the explicit marker
        // for absent optionals.
        (Value::Null, _) => Ok(Json::Null),
        (Value::Bool(b), TypeDescriptor::Bool) => Ok(Json::Bool(*b)),
        (Value::Number(n), TypeDescriptor::Number) => serde_json::Number::from_f64(*n)
            .map(Json::Number)
            .ok_or(CodecError::InvalidNumber(*n)),
        (Value::String(s), TypeDescriptor::String) => Ok(Json::String(s.clone())),
        // Lists and sets share a wire shape; both value variants encode
        // against either sequence descriptor.
        (
            Value::List(items) | Value::Set(items),
            TypeDescriptor::List(elem) | TypeDescriptor::Set(elem),
        ) => items
            .iter()
            .map(|item| to_json(item, elem))
            .collect::<Result<Vec<_>, _>>()
            .map(Json::Array),
        (Value::Tuple(items), TypeDescriptor::Tuple(elems)) => {
            check_arity(elems.len(), items.len())?;
            items
                .iter()
                .zip(elems)
                .map(|(item, elem)| to_json(item, elem))
                .collect::<Result<Vec<_>, _>>()
                .map(Json::Array)
        }
        (Value::Map(entries), TypeDescriptor::Map(elem)) => {
            let mut out = serde_json::Map::new();
            for (key, entry) in entries {
                out.insert(key.clone(), to_json(entry, elem)?);
            }
            Ok(Json::Object(out))
        }
        (Value::Object(fields), TypeDescriptor::Object { attributes }) => {
            reject_unknown(fields.keys(), attributes)?;
            let mut out = serde_json::Map::new();
            for (name, attr) in attributes {
                let encoded = match fields.get(name) {
                    Some(field) => to_json(field, &attr.descriptor)?,
                    None if attr.optional => Json::Null,
                    None => return Err(CodecError::MissingAttribute { name: name.clone() }),
                };
                out.insert(name.clone(), encoded);
            }
            Ok(Json::Object(out))
        }
        (value, descriptor) => Err(CodecError::mismatch(
            descriptor_kind(descriptor),
            value.kind(),
        )),
    }
}

fn to_msgpack(value: &Value, descriptor: &TypeDescriptor) -> Result<rmpv::Value, CodecError> {
    match (value, descriptor) {
        (Value::Null, _) => Ok(rmpv::Value::Nil),
        (Value::Bool(b), TypeDescriptor::Bool) => Ok(rmpv::Value::Boolean(*b)),
        // Always float64 on the wire so encode/decode is bit-exact.
        (Value::Number(n), TypeDescriptor::Number) => Ok(rmpv::Value::F64(*n)),
        (Value::String(s), TypeDescriptor::String) => Ok(rmpv::Value::from(s.as_str())),
        (
            Value::List(items) | Value::Set(items),
            TypeDescriptor::List(elem) | TypeDescriptor::Set(elem),
        ) => items
            .iter()
            .map(|item| to_msgpack(item, elem))
            .collect::<Result<Vec<_>, _>>()
            .map(rmpv::Value::Array),
        (Value::Tuple(items), TypeDescriptor::Tuple(elems)) => {
            check_arity(elems.len(), items.len())?;
            items
                .iter()
                .zip(elems)
                .map(|(item, elem)| to_msgpack(item, elem))
                .collect::<Result<Vec<_>, _>>()
                .map(rmpv::Value::Array)
        }
        (Value::Map(entries), TypeDescriptor::Map(elem)) => {
            let mut out = Vec::with_capacity(entries.len());
            for (key, entry) in entries {
                out.push((rmpv::Value::from(key.as_str()), to_msgpack(entry, elem)?));
            }
            Ok(rmpv::Value::Map(out))
        }
        (Value::Object(fields), TypeDescriptor::Object { attributes }) => {
            reject_unknown(fields.keys(), attributes)?;
            let mut out = Vec::with_capacity(attributes.len());
            for (name, attr) in attributes {
                let encoded = match fields.get(name) {
                    Some(field) => to_msgpack(field, &attr.descriptor)?,
                    None if attr.optional => rmpv::Value::Nil,
                    None => return Err(CodecError::MissingAttribute { name: name.clone() }),
                };
                out.push((rmpv::Value::from(name.as_str()), encoded));
            }
            Ok(rmpv::Value::Map(out))
        }
        (value, descriptor) => Err(CodecError::mismatch(
            descriptor_kind(descriptor),
            value.kind(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn from_json(json: &Json, descriptor: &TypeDescriptor) -> Result<Value, CodecError> {
    match (json, descriptor) {
        (Json::Null, _) => Ok(Value::Null),
        (Json::Bool(b), TypeDescriptor::Bool) => Ok(Value::Bool(*b)),
        (Json::Number(n), TypeDescriptor::Number) => n
            .as_f64()
            .map(Value::Number)
            .ok_or_else(|| CodecError::mismatch("number", "non-finite number")),
        (Json::String(s), TypeDescriptor::String) => Ok(Value::String(s.clone())),
        (Json::Array(items), TypeDescriptor::List(elem)) => items
            .iter()
            .map(|item| from_json(item, elem))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        (Json::Array(items), TypeDescriptor::Set(elem)) => items
            .iter()
            .map(|item| from_json(item, elem))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Set),
        (Json::Array(items), TypeDescriptor::Tuple(elems)) => {
            check_arity(elems.len(), items.len())?;
            items
                .iter()
                .zip(elems)
                .map(|(item, elem)| from_json(item, elem))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Tuple)
        }
        (Json::Object(entries), TypeDescriptor::Map(elem)) => {
            let mut out = std::collections::BTreeMap::new();
            for (key, entry) in entries {
                out.insert(key.clone(), from_json(entry, elem)?);
            }
            Ok(Value::Map(out))
        }
        (Json::Object(entries), TypeDescriptor::Object { attributes }) => {
            reject_unknown(entries.keys(), attributes)?;
            let mut out = std::collections::BTreeMap::new();
            for (name, attr) in attributes {
                let decoded = match entries.get(name) {
                    Some(entry) => from_json(entry, &attr.descriptor)?,
                    None if attr.optional => Value::Null,
                    None => return Err(CodecError::MissingAttribute { name: name.clone() }),
                };
                out.insert(name.clone(), decoded);
            }
            Ok(Value::Object(out))
        }
        (json, descriptor) => Err(CodecError::mismatch(
            descriptor_kind(descriptor),
            json_kind(json),
        )),
    }
}

fn from_msgpack(tree: &rmpv::Value, descriptor: &TypeDescriptor) -> Result<Value, CodecError> {
    match (tree, descriptor) {
        (rmpv::Value::Nil, _) => Ok(Value::Null),
        (rmpv::Value::Boolean(b), TypeDescriptor::Bool) => Ok(Value::Bool(*b)),
        // Hosts may send integers where the schema says number; widen them.
        (
            rmpv::Value::Integer(_) | rmpv::Value::F32(_) | rmpv::Value::F64(_),
            TypeDescriptor::Number,
        ) => tree
            .as_f64()
            .map(Value::Number)
            .ok_or_else(|| CodecError::mismatch("number", "unrepresentable integer")),
        (rmpv::Value::String(s), TypeDescriptor::String) => s
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| CodecError::mismatch("string", "non-utf8 string")),
        (rmpv::Value::Array(items), TypeDescriptor::List(elem)) => items
            .iter()
            .map(|item| from_msgpack(item, elem))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        (rmpv::Value::Array(items), TypeDescriptor::Set(elem)) => items
            .iter()
            .map(|item| from_msgpack(item, elem))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Set),
        (rmpv::Value::Array(items), TypeDescriptor::Tuple(elems)) => {
            check_arity(elems.len(), items.len())?;
            items
                .iter()
                .zip(elems)
                .map(|(item, elem)| from_msgpack(item, elem))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Tuple)
        }
        (rmpv::Value::Map(entries), TypeDescriptor::Map(elem)) => {
            let mut out = std::collections::BTreeMap::new();
            for (key, entry) in entries {
                let key = key
                    .as_str()
                    .ok_or_else(|| CodecError::mismatch("string key", msgpack_kind(key)))?;
                let decoded = from_msgpack(entry, elem)?;
                if out.insert(key.to_string(), decoded).is_some() {
                    return Err(CodecError::DuplicateKey {
                        name: key.to_string(),
                    });
                }
            }
            Ok(Value::Map(out))
        }
        (rmpv::Value::Map(entries), TypeDescriptor::Object { attributes }) => {
            let mut seen = std::collections::BTreeMap::new();
            for (key, entry) in entries {
                let key = key
                    .as_str()
                    .ok_or_else(|| CodecError::mismatch("string key", msgpack_kind(key)))?;
                if seen.insert(key.to_string(), entry).is_some() {
                    return Err(CodecError::DuplicateKey {
                        name: key.to_string(),
                    });
                }
            }
            reject_unknown(seen.keys(), attributes)?;
            let mut out = std::collections::BTreeMap::new();
            for (name, attr) in attributes {
                let decoded = match seen.get(name) {
                    Some(entry) => from_msgpack(entry, &attr.descriptor)?,
                    None if attr.optional => Value::Null,
                    None => return Err(CodecError::MissingAttribute { name: name.clone() }),
                };
                out.insert(name.clone(), decoded);
            }
            Ok(Value::Object(out))
        }
        (tree, descriptor) => Err(CodecError::mismatch(
            descriptor_kind(descriptor),
            msgpack_kind(tree),
        )),
    }
}

fn check_arity(expected: usize, found: usize) -> Result<(), CodecError> {
    if expected == found {
        Ok(())
    } else {
        Err(CodecError::TupleArity { expected, found })
    }
}

fn reject_unknown<'a, I>(
    names: I,
    attributes: &std::collections::BTreeMap<String, crate::descriptor::AttributeType>,
) -> Result<(), CodecError>
where
    I: IntoIterator<Item = &'a String>,
{
    for name in names {
        if !attributes.contains_key(name) {
            return Err(CodecError::UnknownAttribute { name: name.clone() });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::AttributeType;

    fn service_descriptor() -> TypeDescriptor {
        TypeDescriptor::object([
            (
                "name".to_string(),
                AttributeType::required(TypeDescriptor::String),
            ),
            (
                "replicas".to_string(),
                AttributeType::required(TypeDescriptor::Number),
            ),
            (
                "enabled".to_string(),
                AttributeType::required(TypeDescriptor::Bool),
            ),
            (
                "tags".to_string(),
                AttributeType::required(TypeDescriptor::Set(Box::new(TypeDescriptor::String))),
            ),
            (
                "env".to_string(),
                AttributeType::optional(TypeDescriptor::Map(Box::new(TypeDescriptor::String))),
            ),
            (
                "probe".to_string(),
                AttributeType::required(TypeDescriptor::Tuple(vec![
                    TypeDescriptor::String,
                    TypeDescriptor::Number,
                ])),
            ),
        ])
    }

    fn service_value() -> Value {
        Value::object([
            ("name".to_string(), Value::from("frontend")),
            ("replicas".to_string(), Value::from(3.0)),
            ("enabled".to_string(), Value::from(true)),
            (
                "tags".to_string(),
                Value::Set(vec![Value::from("edge"), Value::from("public")]),
            ),
            (
                "env".to_string(),
                Value::map([("REGION".to_string(), Value::from("eu-west-1"))]),
            ),
            (
                "probe".to_string(),
                Value::Tuple(vec![Value::from("/healthz"), Value::from(15.0)]),
            ),
        ])
    }

    #[test]
    fn round_trips_in_both_formats() {
        let desc = service_descriptor();
        let value = service_value();
        for format in [WireFormat::Json, WireFormat::Msgpack] {
            let wire = encode(&value, &desc, format).unwrap();
            assert_eq!(decode(&wire, &desc).unwrap(), value, "{format:?}");
        }
    }

    #[test]
    fn list_and_set_encodings_are_byte_identical() {
        let items = vec![Value::from("a"), Value::from("b"), Value::from("c")];
        let list_desc = TypeDescriptor::List(Box::new(TypeDescriptor::String));
        let set_desc = TypeDescriptor::Set(Box::new(TypeDescriptor::String));
        for format in [WireFormat::Json, WireFormat::Msgpack] {
            let as_list = encode(&Value::List(items.clone()), &list_desc, format).unwrap();
            let as_set = encode(&Value::Set(items.clone()), &set_desc, format).unwrap();
            assert_eq!(as_list.bytes(), as_set.bytes(), "{format:?}");
        }
    }

    #[test]
    fn list_survives_a_set_descriptor_byte_for_byte() {
        let items = Value::List(vec![Value::from(1.0), Value::from(2.0)]);
        let set_desc = TypeDescriptor::Set(Box::new(TypeDescriptor::Number));
        let first = encode(&items, &set_desc, WireFormat::Msgpack).unwrap();
        let reread = decode(&first, &set_desc).unwrap();
        assert!(matches!(reread, Value::Set(_)));
        let second = encode(&reread, &set_desc, WireFormat::Msgpack).unwrap();
        assert_eq!(first.bytes(), second.bytes());
    }

    #[test]
    fn absent_optional_attribute_encodes_as_explicit_null() {
        let desc = service_descriptor();
        let mut value = service_value();
        if let Value::Object(fields) = &mut value {
            fields.remove("env");
        }
        let wire = encode(&value, &desc, WireFormat::Json).unwrap();
        let text = String::from_utf8(wire.bytes().to_vec()).unwrap();
        assert!(text.contains(r#""env":null"#), "got: {text}");

        let decoded = decode(&wire, &desc).unwrap();
        if let Value::Object(fields) = decoded {
            assert_eq!(fields.get("env"), Some(&Value::Null));
        } else {
            panic!("expected object");
        }
    }

    #[test]
    fn mapping_against_sequence_descriptor_is_rejected() {
        let wire = encode(
            &Value::map([("k".to_string(), Value::from("v"))]),
            &TypeDescriptor::Map(Box::new(TypeDescriptor::String)),
            WireFormat::Msgpack,
        )
        .unwrap();

        let tuple_desc = TypeDescriptor::Tuple(vec![TypeDescriptor::String]);
        let err = decode(&wire, &tuple_desc).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }), "{err}");

        let list_desc = TypeDescriptor::List(Box::new(TypeDescriptor::String));
        let err = decode(&wire, &list_desc).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }), "{err}");
    }

    #[test]
    fn unknown_attribute_is_rejected_in_both_directions() {
        let desc = TypeDescriptor::object([(
            "name".to_string(),
            AttributeType::required(TypeDescriptor::String),
        )]);
        let value = Value::object([
            ("name".to_string(), Value::from("x")),
            ("rogue".to_string(), Value::from("y")),
        ]);
        assert!(matches!(
            encode(&value, &desc, WireFormat::Msgpack),
            Err(CodecError::UnknownAttribute { .. })
        ));

        let wire = DynamicValue::from_json(br#"{"name":"x","rogue":"y"}"#.to_vec());
        assert!(matches!(
            decode(&wire, &desc),
            Err(CodecError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn missing_required_attribute_is_rejected() {
        let desc = service_descriptor();
        let wire = DynamicValue::from_json(br#"{}"#.to_vec());
        assert!(matches!(
            decode(&wire, &desc),
            Err(CodecError::MissingAttribute { .. })
        ));
    }

    #[test]
    fn tuple_arity_is_checked() {
        let desc = TypeDescriptor::Tuple(vec![TypeDescriptor::String, TypeDescriptor::Number]);
        let wire = DynamicValue::from_json(br#"["only-one"]"#.to_vec());
        assert!(matches!(
            decode(&wire, &desc),
            Err(CodecError::TupleArity {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn duplicate_keys_in_msgpack_payloads_are_rejected() {
        let doubled = rmpv::Value::Map(vec![
            (rmpv::Value::from("a"), rmpv::Value::from(1)),
            (rmpv::Value::from("a"), rmpv::Value::from(2)),
        ]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &doubled).unwrap();
        let wire = DynamicValue::from_msgpack(bytes);

        let map_desc = TypeDescriptor::Map(Box::new(TypeDescriptor::Number));
        assert!(matches!(
            decode(&wire, &map_desc),
            Err(CodecError::DuplicateKey { .. })
        ));

        let object_desc = TypeDescriptor::object([(
            "a".to_string(),
            AttributeType::required(TypeDescriptor::Number),
        )]);
        assert!(matches!(
            decode(&wire, &object_desc),
            Err(CodecError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn msgpack_integers_decode_as_numbers() {
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &rmpv::Value::from(42)).unwrap();
        let wire = DynamicValue::from_msgpack(bytes);
        assert_eq!(
            decode(&wire, &TypeDescriptor::Number).unwrap(),
            Value::Number(42.0)
        );
    }

    #[test]
    fn non_finite_numbers_fail_text_encoding() {
        let err = encode(
            &Value::Number(f64::NAN),
            &TypeDescriptor::Number,
            WireFormat::Json,
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::InvalidNumber(_)));
    }

    #[test]
    fn malformed_payloads_are_descriptive_errors() {
        let garbage = DynamicValue::from_json(b"{not json".to_vec());
        assert!(matches!(
            decode(&garbage, &TypeDescriptor::String),
            Err(CodecError::MalformedJson(_))
        ));

        let truncated = DynamicValue::from_msgpack(vec![0x92, 0x01]);
        assert!(matches!(
            decode(&truncated, &TypeDescriptor::List(Box::new(TypeDescriptor::Number))),
            Err(CodecError::MalformedMsgpack(_))
        ));
    }

    #[test]
    fn null_is_accepted_anywhere() {
        for desc in [
            TypeDescriptor::String,
            TypeDescriptor::List(Box::new(TypeDescriptor::Bool)),
            service_descriptor(),
        ] {
            let wire = encode(&Value::Null, &desc, WireFormat::Msgpack).unwrap();
            assert_eq!(decode(&wire, &desc).unwrap(), Value::Null);
        }
    }
}
