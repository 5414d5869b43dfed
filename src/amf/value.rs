//! AMF value types
//!
//! Command arguments and stream metadata are carried as a small set of
//! self-describing values. Objects and ECMA arrays keep their properties in
//! encounter order; names are not deduplicated and lookups return the first
//! match.

use crate::error::AmfError;

/// AMF0 value
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    /// IEEE 754 double-precision floating point (0x00)
    Number(f64),

    /// Boolean value (0x01)
    Boolean(bool),

    /// UTF-8 string (0x02, or 0x0C when longer than 65535 bytes)
    String(String),

    /// Null value (0x05)
    Null,

    /// Undefined value (0x06)
    Undefined,

    /// Ordered key-value object (0x03)
    Object(AmfObject),

    /// Associative array (0x08); the declared count is only a hint and is
    /// recomputed on encode
    EcmaArray(AmfObject),

    /// Dense array (0x0A)
    Array(Vec<AmfValue>),

    /// Milliseconds since the Unix epoch (0x0B); the timezone field is dropped
    Date(f64),

    /// End-of-object marker (0x09) seen outside of an object
    ObjectEnd,
}

/// Ordered list of named properties
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AmfObject {
    properties: Vec<(String, AmfValue)>,
}

impl AmfObject {
    /// Create an empty object
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a property; existing properties with the same name are kept
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AmfValue>) -> &mut Self {
        self.properties.push((name.into(), value.into()));
        self
    }

    /// Builder form of [`set`](Self::set)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AmfValue>) -> Self {
        self.set(name, value);
        self
    }

    /// First property with the given name
    pub fn get(&self, name: &str) -> Option<&AmfValue> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// First property with the given name, which must be a string
    pub fn get_string(&self, name: &str) -> Result<&str, AmfError> {
        self.require(name)?.try_str()
    }

    /// First property with the given name, which must be a number
    pub fn get_number(&self, name: &str) -> Result<f64, AmfError> {
        self.require(name)?.try_number()
    }

    /// First property with the given name, which must be a boolean
    pub fn get_bool(&self, name: &str) -> Result<bool, AmfError> {
        self.require(name)?.try_bool()
    }

    fn require(&self, name: &str) -> Result<&AmfValue, AmfError> {
        self.get(name)
            .ok_or_else(|| AmfError::NotFound(name.to_string()))
    }

    /// Iterate over properties in encounter order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AmfValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of properties (duplicates included)
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether the object has no properties
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Remove every property with the given name
    pub fn remove(&mut self, name: &str) {
        self.properties.retain(|(key, _)| key != name);
    }
}

impl<K: Into<String>, V: Into<AmfValue>> FromIterator<(K, V)> for AmfObject {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            properties: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl AmfValue {
    /// Human-readable kind, used in type mismatch errors
    pub fn kind(&self) -> &'static str {
        match self {
            AmfValue::Number(_) => "number",
            AmfValue::Boolean(_) => "boolean",
            AmfValue::String(_) => "string",
            AmfValue::Null => "null",
            AmfValue::Undefined => "undefined",
            AmfValue::Object(_) => "object",
            AmfValue::EcmaArray(_) => "ecma-array",
            AmfValue::Array(_) => "strict-array",
            AmfValue::Date(_) => "date",
            AmfValue::ObjectEnd => "object-end",
        }
    }

    fn mismatch(&self, expected: &'static str) -> AmfError {
        AmfError::UnexpectedValueType {
            expected,
            found: self.kind(),
        }
    }

    /// Try to get this value as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to get this value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as an object (Object or EcmaArray)
    pub fn as_object(&self) -> Option<&AmfObject> {
        match self {
            AmfValue::Object(o) | AmfValue::EcmaArray(o) => Some(o),
            _ => None,
        }
    }

    /// String or a kind mismatch error
    pub fn try_str(&self) -> Result<&str, AmfError> {
        self.as_str().ok_or_else(|| self.mismatch("string"))
    }

    /// Number or a kind mismatch error
    pub fn try_number(&self) -> Result<f64, AmfError> {
        self.as_number().ok_or_else(|| self.mismatch("number"))
    }

    /// Boolean or a kind mismatch error
    pub fn try_bool(&self) -> Result<bool, AmfError> {
        self.as_bool().ok_or_else(|| self.mismatch("boolean"))
    }

    /// Object/EcmaArray or a kind mismatch error
    pub fn try_object(&self) -> Result<&AmfObject, AmfError> {
        self.as_object().ok_or_else(|| self.mismatch("object"))
    }

    /// Try to get this value as a dense array
    pub fn as_array(&self) -> Option<&[AmfValue]> {
        match self {
            AmfValue::Array(elements) => Some(elements),
            _ => None,
        }
    }

    /// Check if this value is null or undefined
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    /// Get a property from an object value
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    /// Get a string property from an object value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    /// Get a number property from an object value
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }
}

impl Default for AmfValue {
    fn default() -> Self {
        AmfValue::Null
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<i32> for AmfValue {
    fn from(v: i32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl From<Vec<AmfValue>> for AmfValue {
    fn from(v: Vec<AmfValue>) -> Self {
        AmfValue::Array(v)
    }
}

impl From<AmfObject> for AmfValue {
    fn from(v: AmfObject) -> Self {
        AmfValue::Object(v)
    }
}
