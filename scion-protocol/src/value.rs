//! In-memory value tree for schema-driven encoding

use std::collections::BTreeMap;

/// A tagged, in-memory value tree.
///
/// Variants mirror [`crate::TypeDescriptor`], plus [`Value::Null`] as the
/// explicit marker for optional-but-absent object attributes. Which variant
/// a wire payload decodes into is decided entirely by the descriptor: the
/// encodings themselves cannot tell a map from an object or a list from a
/// set.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Explicit absence. Any descriptor accepts a null.
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(BTreeMap<String, Value>),
    Tuple(Vec<Value>),
}

impl Value {
    /// Human-readable variant name, used in mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
            Self::Tuple(_) => "tuple",
        }
    }

    /// Build an object value from attribute pairs.
    pub fn object<I>(attrs: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Self::Object(attrs.into_iter().collect())
    }

    /// Build a map value from key/value pairs.
    pub fn map<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Self::Map(entries.into_iter().collect())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}
