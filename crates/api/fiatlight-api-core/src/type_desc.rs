//! Static type descriptors for pins.
//!
//! A [`TypeDesc`] plays the role of the static type annotation: the registry
//! dispatches on it, links compare it, and returned values are checked against it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value::Value;

/// A field in a Record type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDesc {
    pub name: String,
    pub ty: TypeDesc,
    /// Value used when the record is built from defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldDesc {
    pub fn new(name: impl Into<String>, ty: TypeDesc) -> Self {
        FieldDesc {
            name: name.into(),
            ty,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "id", content = "data")]
pub enum TypeDesc {
    // Primitives
    Int,
    Float,
    Bool,
    Str,
    /// Absence of a value; a function returning `Unit` has no outputs.
    Unit,

    /// Fieldless enum with its ordered member names
    Enum { name: String, members: Vec<String> },
    /// Product type with declared fields
    Record { name: String, fields: Vec<FieldDesc> },
    /// `T | None`
    Optional(Box<TypeDesc>),
    /// Homogeneous sequence
    List(Box<TypeDesc>),
    /// Tagged union: ordered (tag, payload type) pairs
    Union(Vec<(String, TypeDesc)>),
    /// Heterogeneous ordered tuple
    Tuple(Vec<TypeDesc>),
    /// Named type. With a base it is a strong alias; without one it must be
    /// registered (enum, record, or a custom factory).
    Named {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base: Option<Box<TypeDesc>>,
    },
}

impl TypeDesc {
    pub fn optional(inner: TypeDesc) -> Self {
        TypeDesc::Optional(Box::new(inner))
    }

    pub fn list(item: TypeDesc) -> Self {
        TypeDesc::List(Box::new(item))
    }

    pub fn named(name: impl Into<String>) -> Self {
        TypeDesc::Named {
            name: name.into(),
            base: None,
        }
    }

    pub fn alias(name: impl Into<String>, base: TypeDesc) -> Self {
        TypeDesc::Named {
            name: name.into(),
            base: Some(Box::new(base)),
        }
    }

    pub fn enumeration<S: Into<String>>(
        name: impl Into<String>,
        members: impl IntoIterator<Item = S>,
    ) -> Self {
        TypeDesc::Enum {
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    /// Convenience: create a Record from a list of (name, type) pairs
    pub fn record_from_pairs(
        name: impl Into<String>,
        pairs: impl IntoIterator<Item = (impl Into<String>, TypeDesc)>,
    ) -> Self {
        let fields = pairs
            .into_iter()
            .map(|(n, ty)| FieldDesc::new(n, ty))
            .collect();
        TypeDesc::Record {
            name: name.into(),
            fields,
        }
    }

    /// Registry key and display name, e.g. `Optional[List[int]]`.
    pub fn type_name(&self) -> String {
        match self {
            TypeDesc::Int => "int".into(),
            TypeDesc::Float => "float".into(),
            TypeDesc::Bool => "bool".into(),
            TypeDesc::Str => "str".into(),
            TypeDesc::Unit => "None".into(),
            TypeDesc::Enum { name, .. } => name.clone(),
            TypeDesc::Record { name, .. } => name.clone(),
            TypeDesc::Named { name, .. } => name.clone(),
            TypeDesc::Optional(inner) => format!("Optional[{}]", inner.type_name()),
            TypeDesc::List(item) => format!("List[{}]", item.type_name()),
            TypeDesc::Union(variants) => {
                let names: Vec<String> = variants.iter().map(|(_, t)| t.type_name()).collect();
                format!("Union[{}]", names.join(", "))
            }
            TypeDesc::Tuple(items) => {
                let names: Vec<String> = items.iter().map(TypeDesc::type_name).collect();
                format!("Tuple[{}]", names.join(", "))
            }
        }
    }

    /// Whether `None` is a legal concrete value.
    pub fn can_be_none(&self) -> bool {
        match self {
            TypeDesc::Optional(_) | TypeDesc::Unit => true,
            TypeDesc::Named {
                base: Some(base), ..
            } => base.can_be_none(),
            _ => false,
        }
    }

    /// Strip alias layers. Opaque named types are returned unchanged.
    pub fn resolve_alias(&self) -> &TypeDesc {
        let mut current = self;
        while let TypeDesc::Named {
            base: Some(base), ..
        } = current
        {
            current = base;
        }
        current
    }

    /// Link legality: structural equality after alias resolution, and `T` may
    /// flow into `Optional[T]`.
    pub fn is_assignable_to(&self, target: &TypeDesc) -> bool {
        let src = self.resolve_alias();
        let dst = target.resolve_alias();
        if src == dst {
            return true;
        }
        match dst {
            TypeDesc::Optional(inner) => src.is_assignable_to(inner),
            _ => false,
        }
    }

    /// Structural check of a value against this type. Named types without a
    /// base accept any value: their shape is owned by the registered handle.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let mismatch = || -> Result<(), String> {
            Err(format!(
                "expected {}, got {}",
                self.type_name(),
                value.kind()
            ))
        };
        match (self, value) {
            (TypeDesc::Int, Value::Int(_))
            | (TypeDesc::Float, Value::Float(_))
            | (TypeDesc::Float, Value::Int(_))
            | (TypeDesc::Bool, Value::Bool(_))
            | (TypeDesc::Str, Value::Str(_)) => Ok(()),
            (TypeDesc::Unit, Value::Optional(None)) => Ok(()),
            (TypeDesc::Unit, Value::Tuple(items)) if items.is_empty() => Ok(()),
            (TypeDesc::Enum { name, members }, Value::Enum { class, member }) => {
                if class != name {
                    return Err(format!("expected enum {name}, got enum {class}"));
                }
                if !members.iter().any(|m| m == member) {
                    return Err(format!("{member} is not a member of {name}"));
                }
                Ok(())
            }
            (TypeDesc::Record { name, fields }, Value::Record(map)) => {
                for field in fields {
                    match map.get(&field.name) {
                        Some(v) => field
                            .ty
                            .check(v)
                            .map_err(|e| format!("{name}.{}: {e}", field.name))?,
                        None => return Err(format!("{name}: missing field {}", field.name)),
                    }
                }
                if let Some(extra) = map
                    .keys()
                    .find(|k| !fields.iter().any(|f| &f.name == *k))
                {
                    return Err(format!("{name}: unknown field {extra}"));
                }
                Ok(())
            }
            (TypeDesc::Optional(_), Value::Optional(None)) => Ok(()),
            (TypeDesc::Optional(inner), Value::Optional(Some(v))) => inner.check(v),
            (TypeDesc::List(item), Value::List(items)) => {
                for (idx, v) in items.iter().enumerate() {
                    item.check(v).map_err(|e| format!("[{idx}]: {e}"))?;
                }
                Ok(())
            }
            (TypeDesc::Union(variants), Value::Variant { tag, value }) => {
                match variants.iter().find(|(t, _)| t == tag) {
                    Some((_, ty)) => ty.check(value),
                    None => Err(format!("{tag} is not a variant of {}", self.type_name())),
                }
            }
            (TypeDesc::Tuple(types), Value::Tuple(items)) => {
                if types.len() != items.len() {
                    return Err(format!(
                        "expected a tuple of {} elements, got {}",
                        types.len(),
                        items.len()
                    ));
                }
                for (idx, (ty, v)) in types.iter().zip(items).enumerate() {
                    ty.check(v).map_err(|e| format!("element {idx}: {e}"))?;
                }
                Ok(())
            }
            (TypeDesc::Named { base: Some(base), .. }, v) => base.check(v),
            (TypeDesc::Named { base: None, .. }, _) => Ok(()),
            _ => mismatch(),
        }
    }

    /// Default value implied by the type alone, if any.
    pub fn default_value(&self) -> Option<Value> {
        match self {
            TypeDesc::Int => Some(Value::Int(0)),
            TypeDesc::Float => Some(Value::Float(0.0)),
            TypeDesc::Bool => Some(Value::Bool(false)),
            TypeDesc::Str => Some(Value::Str(String::new())),
            TypeDesc::Unit => Some(Value::Optional(None)),
            TypeDesc::Enum { name, members } => members
                .first()
                .map(|m| Value::enum_member(name.clone(), m.clone())),
            TypeDesc::Record { fields, .. } => {
                let mut map = indexmap::IndexMap::new();
                for field in fields {
                    let v = match &field.default {
                        Some(v) => v.clone(),
                        None => field.ty.default_value()?,
                    };
                    map.insert(field.name.clone(), v);
                }
                Some(Value::Record(map))
            }
            TypeDesc::Optional(_) => Some(Value::Optional(None)),
            TypeDesc::List(_) => Some(Value::List(Vec::new())),
            TypeDesc::Union(variants) => {
                let (tag, ty) = variants.first()?;
                Some(Value::variant(tag.clone(), ty.default_value()?))
            }
            TypeDesc::Tuple(items) => items
                .iter()
                .map(TypeDesc::default_value)
                .collect::<Option<Vec<_>>>()
                .map(Value::Tuple),
            TypeDesc::Named { base, .. } => base.as_ref().and_then(|b| b.default_value()),
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> TypeDesc {
        TypeDesc::Record {
            name: "Person".into(),
            fields: vec![
                FieldDesc::new("age", TypeDesc::Int).with_default(Value::Int(30)),
                FieldDesc::new("nickname", TypeDesc::optional(TypeDesc::Str)),
            ],
        }
    }

    #[test]
    fn type_names_nest() {
        let ty = TypeDesc::optional(TypeDesc::list(TypeDesc::Int));
        assert_eq!(ty.type_name(), "Optional[List[int]]");
        assert_eq!(person().type_name(), "Person");
    }

    #[test]
    fn assignability_sees_through_aliases_and_optionals() {
        let celsius = TypeDesc::alias("Celsius", TypeDesc::Float);
        assert!(celsius.is_assignable_to(&TypeDesc::Float));
        assert!(TypeDesc::Float.is_assignable_to(&TypeDesc::optional(celsius.clone())));
        assert!(!TypeDesc::Int.is_assignable_to(&TypeDesc::Float));
        assert!(!TypeDesc::optional(TypeDesc::Int).is_assignable_to(&TypeDesc::Int));
    }

    #[test]
    fn record_check_reports_field_path() {
        let bad = Value::record([("age", Value::str("old")), ("nickname", Value::none())]);
        let err = person().check(&bad).unwrap_err();
        assert!(err.contains("Person.age"), "{err}");
        let missing = Value::record([("age", Value::Int(3))]);
        assert!(person().check(&missing).unwrap_err().contains("missing field nickname"));
    }

    #[test]
    fn none_only_checks_for_optional() {
        assert!(TypeDesc::Int.check(&Value::none()).is_err());
        assert!(TypeDesc::optional(TypeDesc::Int).check(&Value::none()).is_ok());
        assert!(TypeDesc::optional(TypeDesc::Int).can_be_none());
        assert!(!TypeDesc::Int.can_be_none());
    }

    #[test]
    fn record_default_uses_field_defaults() {
        let v = person().default_value().expect("default");
        let map = v.as_record().expect("record");
        assert_eq!(map["age"], Value::Int(30));
        assert_eq!(map["nickname"], Value::none());
    }
}
