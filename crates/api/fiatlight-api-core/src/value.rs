//! Value: dynamic runtime instances carried by pins.
//!
//! Every pin value is one of these variants; the static type that constrains it
//! lives in [`TypeDesc`](crate::TypeDesc).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Coarse kind of a [`Value`], handy for diagnostics and quick dispatch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Float,
    Bool,
    Str,
    Enum,
    Record,
    List,
    Optional,
    Variant,
    Tuple,
    Opaque,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
            ValueKind::Str => "str",
            ValueKind::Enum => "enum",
            ValueKind::Record => "record",
            ValueKind::List => "list",
            ValueKind::Optional => "optional",
            ValueKind::Variant => "variant",
            ValueKind::Tuple => "tuple",
            ValueKind::Opaque => "opaque",
        };
        f.write_str(s)
    }
}

/// Payload of a user-registered type that has no structural form (images,
/// device handles, ...). Equality is identity of the shared payload.
#[derive(Clone)]
pub struct OpaqueValue {
    pub type_name: String,
    pub payload: Arc<dyn Any + Send + Sync>,
}

impl OpaqueValue {
    pub fn new<T: Any + Send + Sync>(type_name: impl Into<String>, payload: T) -> Self {
        OpaqueValue {
            type_name: type_name.into(),
            payload: Arc::new(payload),
        }
    }

    /// Borrow the payload as `T` when the types line up.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueValue<{}>", self.type_name)
    }
}

impl PartialEq for OpaqueValue {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && Arc::ptr_eq(&self.payload, &other.payload)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum Value {
    /// Signed integer
    Int(i64),

    /// Double precision float
    Float(f64),

    /// Boolean
    Bool(bool),

    /// Text
    Str(String),

    /// Member of a fieldless enum
    Enum { class: String, member: String },

    /// Record with ordered named fields
    Record(IndexMap<String, Value>),

    /// Homogeneous list
    List(Vec<Value>),

    /// `T | None`
    Optional(Option<Box<Value>>),

    /// One alternative of a tagged union
    Variant { tag: String, value: Box<Value> },

    /// Heterogeneous fixed-arity tuple
    Tuple(Vec<Value>),

    /// User payload without a structural form; never serialized
    #[serde(skip)]
    Opaque(OpaqueValue),
}

impl Value {
    /// Return the coarse kind of this value.
    #[inline]
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Bool(_) => ValueKind::Bool,
            Value::Str(_) => ValueKind::Str,
            Value::Enum { .. } => ValueKind::Enum,
            Value::Record(_) => ValueKind::Record,
            Value::List(_) => ValueKind::List,
            Value::Optional(_) => ValueKind::Optional,
            Value::Variant { .. } => ValueKind::Variant,
            Value::Tuple(_) => ValueKind::Tuple,
            Value::Opaque(_) => ValueKind::Opaque,
        }
    }

    /// Convenience constructors
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn enum_member(class: impl Into<String>, member: impl Into<String>) -> Self {
        Value::Enum {
            class: class.into(),
            member: member.into(),
        }
    }

    pub fn none() -> Self {
        Value::Optional(None)
    }

    pub fn some(inner: Value) -> Self {
        Value::Optional(Some(Box::new(inner)))
    }

    pub fn variant(tag: impl Into<String>, value: Value) -> Self {
        Value::Variant {
            tag: tag.into(),
            value: Box::new(value),
        }
    }

    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floats accept integers, the same way numeric widgets do.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Record(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::Optional(None))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
