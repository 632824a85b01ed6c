//! Recursive type descriptors for schema-driven values

use std::collections::BTreeMap;

use serde_json::{json, Value as Json};

use crate::error::CodecError;

/// The type of a single object attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeType {
    /// Descriptor for the attribute's value.
    pub descriptor: TypeDescriptor,
    /// Optional attributes may be absent from a value; they are still
    /// encoded, as an explicit null.
    pub optional: bool,
}

impl AttributeType {
    /// A required attribute of the given type.
    pub fn required(descriptor: TypeDescriptor) -> Self {
        Self {
            descriptor,
            optional: false,
        }
    }

    /// An optional attribute of the given type.
    pub fn optional(descriptor: TypeDescriptor) -> Self {
        Self {
            descriptor,
            optional: true,
        }
    }
}

/// A recursive description of a value's type.
///
/// The type set is closed and finite; every encode/decode site matches
/// exhaustively over it. Descriptors are acyclic by construction (children
/// are owned) and equality is structural.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    /// UTF-8 text.
    String,
    /// A double-precision number.
    Number,
    /// A boolean.
    Bool,
    /// An ordered sequence of same-typed elements.
    List(Box<TypeDescriptor>),
    /// A collection of same-typed elements. On the wire a set is shaped
    /// exactly like a list; the distinction exists only at the descriptor
    /// and business-logic level.
    Set(Box<TypeDescriptor>),
    /// A mapping from string keys to same-typed values.
    Map(Box<TypeDescriptor>),
    /// A mapping from declared attribute names to per-attribute types.
    Object {
        attributes: BTreeMap<String, AttributeType>,
    },
    /// A positional sequence with a per-position type.
    Tuple(Vec<TypeDescriptor>),
}

impl TypeDescriptor {
    /// Convenience constructor for an object descriptor.
    pub fn object<I>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (String, AttributeType)>,
    {
        Self::Object {
            attributes: attributes.into_iter().collect(),
        }
    }

    /// Serialize the descriptor to its wire form.
    ///
    /// Descriptors always use the JSON encoding regardless of the value
    /// format in use — a host quirk that must not be normalized away.
    pub fn to_wire(&self) -> Vec<u8> {
        // Keys are strings and no non-finite numbers appear, so this
        // serialization cannot fail.
        serde_json::to_vec(&self.to_json()).expect("descriptor trees always serialize to JSON")
    }

    /// Parse a descriptor from its wire form.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, CodecError> {
        let json: Json = serde_json::from_slice(bytes)
            .map_err(|e| CodecError::InvalidDescriptor(e.to_string()))?;
        Self::from_json(&json)
    }

    fn to_json(&self) -> Json {
        match self {
            Self::String => json!("string"),
            Self::Number => json!("number"),
            Self::Bool => json!("bool"),
            Self::List(elem) => json!(["list", elem.to_json()]),
            Self::Set(elem) => json!(["set", elem.to_json()]),
            Self::Map(value) => json!(["map", value.to_json()]),
            Self::Tuple(elems) => {
                let elems: Vec<Json> = elems.iter().map(Self::to_json).collect();
                json!(["tuple", elems])
            }
            Self::Object { attributes } => {
                let mut attrs = serde_json::Map::new();
                let mut optional: Vec<Json> = Vec::new();
                for (name, attr) in attributes {
                    attrs.insert(name.clone(), attr.descriptor.to_json());
                    if attr.optional {
                        optional.push(json!(name));
                    }
                }
                if optional.is_empty() {
                    json!(["object", attrs])
                } else {
                    json!(["object", attrs, optional])
                }
            }
        }
    }

    fn from_json(json: &Json) -> Result<Self, CodecError> {
        match json {
            Json::String(kind) => match kind.as_str() {
                "string" => Ok(Self::String),
                "number" => Ok(Self::Number),
                "bool" => Ok(Self::Bool),
                other => Err(CodecError::InvalidDescriptor(format!(
                    "unknown primitive kind {other:?}"
                ))),
            },
            Json::Array(parts) => Self::from_json_compound(parts),
            other => Err(CodecError::InvalidDescriptor(format!(
                "expected string or array, found {other}"
            ))),
        }
    }

    fn from_json_compound(parts: &[Json]) -> Result<Self, CodecError> {
        let kind = parts
            .first()
            .and_then(Json::as_str)
            .ok_or_else(|| CodecError::InvalidDescriptor("empty compound descriptor".into()))?;
        let payload = parts.get(1).ok_or_else(|| {
            CodecError::InvalidDescriptor(format!("{kind:?} descriptor missing element type"))
        })?;
        match kind {
            "list" => Ok(Self::List(Box::new(Self::from_json(payload)?))),
            "set" => Ok(Self::Set(Box::new(Self::from_json(payload)?))),
            "map" => Ok(Self::Map(Box::new(Self::from_json(payload)?))),
            "tuple" => {
                let elems = payload.as_array().ok_or_else(|| {
                    CodecError::InvalidDescriptor("tuple element types must be an array".into())
                })?;
                let elems = elems
                    .iter()
                    .map(Self::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Tuple(elems))
            }
            "object" => {
                let attrs = payload.as_object().ok_or_else(|| {
                    CodecError::InvalidDescriptor("object attributes must be a map".into())
                })?;
                let optional: Vec<&str> = match parts.get(2) {
                    None => Vec::new(),
                    Some(Json::Array(names)) => names
                        .iter()
                        .map(|n| {
                            n.as_str().ok_or_else(|| {
                                CodecError::InvalidDescriptor(
                                    "optional attribute names must be strings".into(),
                                )
                            })
                        })
                        .collect::<Result<_, _>>()?,
                    Some(other) => {
                        return Err(CodecError::InvalidDescriptor(format!(
                            "optional attribute list must be an array, found {other}"
                        )))
                    }
                };
                let mut attributes = BTreeMap::new();
                for (name, descriptor) in attrs {
                    let descriptor = Self::from_json(descriptor)?;
                    let optional = optional.iter().any(|n| n == name);
                    attributes.insert(
                        name.clone(),
                        AttributeType {
                            descriptor,
                            optional,
                        },
                    );
                }
                Ok(Self::Object { attributes })
            }
            other => Err(CodecError::InvalidDescriptor(format!(
                "unknown compound kind {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> TypeDescriptor {
        TypeDescriptor::object([
            (
                "name".to_string(),
                AttributeType::required(TypeDescriptor::String),
            ),
            (
                "ports".to_string(),
                AttributeType::required(TypeDescriptor::List(Box::new(TypeDescriptor::Number))),
            ),
            (
                "labels".to_string(),
                AttributeType::optional(TypeDescriptor::Map(Box::new(TypeDescriptor::String))),
            ),
            (
                "pair".to_string(),
                AttributeType::required(TypeDescriptor::Tuple(vec![
                    TypeDescriptor::Bool,
                    TypeDescriptor::Set(Box::new(TypeDescriptor::String)),
                ])),
            ),
        ])
    }

    #[test]
    fn wire_round_trip() {
        let desc = nested();
        let parsed = TypeDescriptor::from_wire(&desc.to_wire()).unwrap();
        assert_eq!(parsed, desc);
    }

    #[test]
    fn primitive_wire_form_is_bare_string() {
        assert_eq!(TypeDescriptor::String.to_wire(), br#""string""#);
        assert_eq!(TypeDescriptor::Number.to_wire(), br#""number""#);
        assert_eq!(TypeDescriptor::Bool.to_wire(), br#""bool""#);
    }

    #[test]
    fn object_wire_form_lists_optional_names() {
        let desc = TypeDescriptor::object([
            (
                "a".to_string(),
                AttributeType::required(TypeDescriptor::String),
            ),
            (
                "b".to_string(),
                AttributeType::optional(TypeDescriptor::Bool),
            ),
        ]);
        let wire = String::from_utf8(desc.to_wire()).unwrap();
        assert_eq!(wire, r#"["object",{"a":"string","b":"bool"},["b"]]"#);
    }

    #[test]
    fn rejects_unknown_kinds() {
        assert!(TypeDescriptor::from_wire(br#""complex""#).is_err());
        assert!(TypeDescriptor::from_wire(br#"["matrix","number"]"#).is_err());
        assert!(TypeDescriptor::from_wire(b"17").is_err());
    }

    #[test]
    fn descriptor_equality_is_structural() {
        assert_eq!(nested(), nested());
        assert_ne!(
            TypeDescriptor::List(Box::new(TypeDescriptor::Number)),
            TypeDescriptor::Set(Box::new(TypeDescriptor::Number))
        );
    }
}
