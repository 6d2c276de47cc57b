//! Envelope-dict codec.
//!
//! Every pin value is persisted as a tagged JSON object:
//!
//! ```text
//! {"type": "Unspecified"}
//! {"type": "Error"}
//! {"type": "Primitive", "value": <json>}
//! {"type": "Enum", "class": "<enum>", "value_name": "<member>"}
//! {"type": "Record", "value": {"<field>": <envelope-dict>, ...}}
//! {"type": "List", "value": [<envelope-dict>, ...]}
//! {"type": "Optional", "value": null | <envelope-dict>}
//! {"type": "Tuple", "values": [<envelope-dict>, ...]}
//! {"type": "Variant", "tag": "<tag>", "value": <envelope-dict>}
//! ```
//!
//! Older settings files stored records as `{"type": "Dict" | "Pydantic",
//! "value": {<field>: <plain json>}}`. Those are still accepted by
//! [`decode_value`] and decoded against the declared field types; saving
//! always writes `"Record"`.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde_json::{json, Map, Number, Value as JsonValue};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

use crate::envelope::Envelope;
use crate::error::FiatError;
use crate::type_desc::TypeDesc;
use crate::value::Value;

/// The `"type"` tag of an envelope-dict.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EnvelopeTag {
    Unspecified,
    Error,
    Primitive,
    Enum,
    Record,
    List,
    Optional,
    Tuple,
    Variant,
    /// Legacy record shapes, read-only.
    LegacyDict,
    LegacyPydantic,
}

impl EnvelopeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeTag::Unspecified => "Unspecified",
            EnvelopeTag::Error => "Error",
            EnvelopeTag::Primitive => "Primitive",
            EnvelopeTag::Enum => "Enum",
            EnvelopeTag::Record => "Record",
            EnvelopeTag::List => "List",
            EnvelopeTag::Optional => "Optional",
            EnvelopeTag::Tuple => "Tuple",
            EnvelopeTag::Variant => "Variant",
            EnvelopeTag::LegacyDict => "Dict",
            EnvelopeTag::LegacyPydantic => "Pydantic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "Unspecified" => EnvelopeTag::Unspecified,
            "Error" => EnvelopeTag::Error,
            "Primitive" => EnvelopeTag::Primitive,
            "Enum" => EnvelopeTag::Enum,
            "Record" => EnvelopeTag::Record,
            "List" => EnvelopeTag::List,
            "Optional" => EnvelopeTag::Optional,
            "Tuple" => EnvelopeTag::Tuple,
            "Variant" => EnvelopeTag::Variant,
            "Dict" => EnvelopeTag::LegacyDict,
            "Pydantic" => EnvelopeTag::LegacyPydantic,
            _ => return None,
        })
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, EnvelopeTag::LegacyDict | EnvelopeTag::LegacyPydantic)
    }
}

/// Errors produced while encoding or decoding envelope-dicts.
#[derive(Debug, Error)]
pub enum JsonError {
    #[error("envelope-dict must be an object with a string \"type\" tag, got {0}")]
    MissingTag(String),
    #[error("unknown envelope-dict tag {0:?}")]
    UnknownTag(String),
    #[error("expected a {expected} envelope-dict, got {found:?}")]
    UnexpectedTag { expected: String, found: String },
    #[error("malformed {tag} envelope-dict: {reason}")]
    Malformed { tag: &'static str, reason: String },
    #[error("cannot encode value: {0}")]
    Unencodable(String),
}

impl From<JsonError> for FiatError {
    fn from(e: JsonError) -> Self {
        FiatError::PersistFailure(e.to_string())
    }
}

// --- Builders ---

pub fn unspecified_dict() -> JsonValue {
    json!({ "type": EnvelopeTag::Unspecified.as_str() })
}

pub fn error_dict() -> JsonValue {
    json!({ "type": EnvelopeTag::Error.as_str() })
}

pub fn primitive_dict(value: JsonValue) -> JsonValue {
    json!({ "type": EnvelopeTag::Primitive.as_str(), "value": value })
}

pub fn enum_dict(class: &str, member: &str) -> JsonValue {
    json!({ "type": EnvelopeTag::Enum.as_str(), "class": class, "value_name": member })
}

pub fn record_dict(fields: IndexMap<String, JsonValue>) -> JsonValue {
    let map: Map<String, JsonValue> = fields.into_iter().collect();
    json!({ "type": EnvelopeTag::Record.as_str(), "value": JsonValue::Object(map) })
}

pub fn list_dict(items: Vec<JsonValue>) -> JsonValue {
    json!({ "type": EnvelopeTag::List.as_str(), "value": items })
}

pub fn optional_dict(inner: Option<JsonValue>) -> JsonValue {
    json!({ "type": EnvelopeTag::Optional.as_str(), "value": inner.unwrap_or(JsonValue::Null) })
}

pub fn tuple_dict(items: Vec<JsonValue>) -> JsonValue {
    json!({ "type": EnvelopeTag::Tuple.as_str(), "values": items })
}

pub fn variant_dict(tag: &str, inner: JsonValue) -> JsonValue {
    json!({ "type": EnvelopeTag::Variant.as_str(), "tag": tag, "value": inner })
}

/// Read the `"type"` tag of an envelope-dict.
pub fn tag_of(dict: &JsonValue) -> Result<EnvelopeTag, JsonError> {
    let tag = dict
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| JsonError::MissingTag(dict.to_string()))?;
    EnvelopeTag::parse(tag).ok_or_else(|| JsonError::UnknownTag(tag.to_string()))
}

fn expect_tag(dict: &JsonValue, expected: EnvelopeTag) -> Result<(), JsonError> {
    let found = tag_of(dict)?;
    if found != expected {
        return Err(JsonError::UnexpectedTag {
            expected: expected.as_str().to_string(),
            found: found.as_str().to_string(),
        });
    }
    Ok(())
}

fn field<'a>(
    dict: &'a JsonValue,
    key: &str,
    tag: EnvelopeTag,
) -> Result<&'a JsonValue, JsonError> {
    dict.get(key).ok_or_else(|| JsonError::Malformed {
        tag: tag.as_str(),
        reason: format!("missing \"{key}\""),
    })
}

// --- Primitives ---

/// Plain JSON of a primitive value.
pub fn primitive_to_json(value: &Value) -> Result<JsonValue, JsonError> {
    match value {
        Value::Int(v) => Ok(JsonValue::from(*v)),
        Value::Float(v) => Number::from_f64(*v)
            .map(JsonValue::Number)
            .ok_or_else(|| JsonError::Unencodable(format!("non finite float {v}"))),
        Value::Bool(v) => Ok(JsonValue::Bool(*v)),
        Value::Str(v) => Ok(JsonValue::String(v.clone())),
        other => Err(JsonError::Unencodable(format!(
            "{} is not a primitive",
            other.kind()
        ))),
    }
}

/// Primitive value from plain JSON, checked against its declared type.
pub fn primitive_from_json(ty: &TypeDesc, raw: &JsonValue) -> Result<Value, JsonError> {
    let bad = || JsonError::Malformed {
        tag: EnvelopeTag::Primitive.as_str(),
        reason: format!("{raw} is not a valid {}", ty.type_name()),
    };
    match ty.resolve_alias() {
        TypeDesc::Int => raw.as_i64().map(Value::Int).ok_or_else(bad),
        TypeDesc::Float => raw.as_f64().map(Value::Float).ok_or_else(bad),
        TypeDesc::Bool => raw.as_bool().map(Value::Bool).ok_or_else(bad),
        TypeDesc::Str => raw.as_str().map(Value::str).ok_or_else(bad),
        _ => Err(bad()),
    }
}

// --- Full codec ---

/// Encode a concrete value as an envelope-dict, driven by its static type.
/// A value whose kind does not fit the type, or a non-finite float, is
/// refused.
pub fn encode_value(ty: &TypeDesc, value: &Value) -> Result<JsonValue, JsonError> {
    match (ty.resolve_alias(), value) {
        (TypeDesc::Int, Value::Int(_))
        | (TypeDesc::Float, Value::Float(_) | Value::Int(_))
        | (TypeDesc::Bool, Value::Bool(_))
        | (TypeDesc::Str, Value::Str(_)) => Ok(primitive_dict(primitive_to_json(value)?)),
        (TypeDesc::Enum { name, members }, Value::Enum { class, member }) => {
            if class != name || !members.iter().any(|m| m == member) {
                return Err(JsonError::Unencodable(format!(
                    "{class}.{member} is not a member of {name}"
                )));
            }
            Ok(enum_dict(class, member))
        }
        (TypeDesc::Record { name, fields }, Value::Record(map)) => {
            let mut out = IndexMap::new();
            for f in fields {
                let v = map.get(&f.name).ok_or_else(|| {
                    JsonError::Unencodable(format!("{name} value has no field {}", f.name))
                })?;
                out.insert(f.name.clone(), encode_value(&f.ty, v)?);
            }
            Ok(record_dict(out))
        }
        (TypeDesc::Optional(_), Value::Optional(None)) => Ok(optional_dict(None)),
        (TypeDesc::Optional(inner), Value::Optional(Some(v))) => {
            Ok(optional_dict(Some(encode_value(inner, v)?)))
        }
        (TypeDesc::List(item), Value::List(items)) => {
            let encoded = items
                .iter()
                .map(|v| encode_value(item, v))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(list_dict(encoded))
        }
        (TypeDesc::Tuple(types), Value::Tuple(items)) if types.len() == items.len() => {
            let encoded = types
                .iter()
                .zip(items)
                .map(|(t, v)| encode_value(t, v))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tuple_dict(encoded))
        }
        (TypeDesc::Union(variants), Value::Variant { tag, value }) => {
            let (_, vty) = variants.iter().find(|(t, _)| t == tag).ok_or_else(|| {
                JsonError::Unencodable(format!("{tag} is not a variant of {}", ty.type_name()))
            })?;
            Ok(variant_dict(tag, encode_value(vty, value)?))
        }
        (t, v) => Err(JsonError::Unencodable(format!(
            "{} value for a {} pin",
            v.kind(),
            t.type_name()
        ))),
    }
}

/// Record types already reported as migrated from a legacy shape.
static LEGACY_MIGRATIONS: Lazy<Mutex<HashSet<String>>> = Lazy::new(Default::default);

/// Log the first legacy migration of each record type. Returns whether this
/// call logged.
pub fn note_legacy_migration(tag: EnvelopeTag, record: &str) -> bool {
    let first = LEGACY_MIGRATIONS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(record.to_string());
    if first {
        log::info!("migrating legacy {} dicts for record {record}", tag.as_str());
    }
    first
}

/// Decode a concrete value from an envelope-dict. Legacy record tags are
/// migrated on the fly.
pub fn decode_value(ty: &TypeDesc, dict: &JsonValue) -> Result<Value, JsonError> {
    let tag = tag_of(dict)?;
    match ty.resolve_alias() {
        TypeDesc::Int | TypeDesc::Float | TypeDesc::Bool | TypeDesc::Str => {
            expect_tag(dict, EnvelopeTag::Primitive)?;
            primitive_from_json(ty, field(dict, "value", tag)?)
        }
        TypeDesc::Enum { name, members } => {
            expect_tag(dict, EnvelopeTag::Enum)?;
            let member = field(dict, "value_name", tag)?
                .as_str()
                .ok_or_else(|| JsonError::Malformed {
                    tag: tag.as_str(),
                    reason: "value_name must be a string".into(),
                })?;
            if !members.iter().any(|m| m == member) {
                return Err(JsonError::Malformed {
                    tag: tag.as_str(),
                    reason: format!("{member} is not a member of {name}"),
                });
            }
            Ok(Value::enum_member(name.clone(), member))
        }
        TypeDesc::Record { name, fields } => {
            if tag.is_legacy() {
                note_legacy_migration(tag, name);
                let raw = field(dict, "value", tag)?;
                return value_from_plain_json(ty, raw);
            }
            expect_tag(dict, EnvelopeTag::Record)?;
            let saved = field(dict, "value", tag)?
                .as_object()
                .ok_or_else(|| JsonError::Malformed {
                    tag: tag.as_str(),
                    reason: "value must be an object".into(),
                })?;
            let mut map = IndexMap::new();
            for f in fields {
                let v = match (saved.get(&f.name), &f.default) {
                    (Some(d), _) => decode_value(&f.ty, d)?,
                    (None, Some(default)) => default.clone(),
                    (None, None) => {
                        return Err(JsonError::Malformed {
                            tag: tag.as_str(),
                            reason: format!("{name} is missing field {}", f.name),
                        })
                    }
                };
                map.insert(f.name.clone(), v);
            }
            Ok(Value::Record(map))
        }
        TypeDesc::Optional(inner) => {
            expect_tag(dict, EnvelopeTag::Optional)?;
            match field(dict, "value", tag)? {
                JsonValue::Null => Ok(Value::none()),
                d => Ok(Value::some(decode_value(inner, d)?)),
            }
        }
        TypeDesc::List(item) => {
            expect_tag(dict, EnvelopeTag::List)?;
            let items = field(dict, "value", tag)?
                .as_array()
                .ok_or_else(|| JsonError::Malformed {
                    tag: tag.as_str(),
                    reason: "value must be an array".into(),
                })?;
            items
                .iter()
                .map(|d| decode_value(item, d))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        TypeDesc::Tuple(types) => {
            expect_tag(dict, EnvelopeTag::Tuple)?;
            let items = field(dict, "values", tag)?
                .as_array()
                .filter(|a| a.len() == types.len())
                .ok_or_else(|| JsonError::Malformed {
                    tag: tag.as_str(),
                    reason: format!("values must be an array of {} items", types.len()),
                })?;
            types
                .iter()
                .zip(items)
                .map(|(t, d)| decode_value(t, d))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Tuple)
        }
        TypeDesc::Union(variants) => {
            expect_tag(dict, EnvelopeTag::Variant)?;
            let vtag = field(dict, "tag", tag)?
                .as_str()
                .ok_or_else(|| JsonError::Malformed {
                    tag: tag.as_str(),
                    reason: "tag must be a string".into(),
                })?;
            let (_, vty) = variants
                .iter()
                .find(|(t, _)| t == vtag)
                .ok_or_else(|| JsonError::Malformed {
                    tag: tag.as_str(),
                    reason: format!("{vtag} is not a variant of {}", ty.type_name()),
                })?;
            Ok(Value::variant(vtag, decode_value(vty, field(dict, "value", tag)?)?))
        }
        other => Err(JsonError::Unencodable(format!(
            "no envelope-dict form for {}",
            other.type_name()
        ))),
    }
}

/// Decode plain JSON (no envelope tags), as written by the legacy record
/// shapes. Enums are given by member name; unions take the first variant that
/// decodes.
pub fn value_from_plain_json(ty: &TypeDesc, raw: &JsonValue) -> Result<Value, JsonError> {
    let bad = |reason: String| JsonError::Malformed {
        tag: EnvelopeTag::LegacyDict.as_str(),
        reason,
    };
    match ty.resolve_alias() {
        TypeDesc::Int | TypeDesc::Float | TypeDesc::Bool | TypeDesc::Str => {
            primitive_from_json(ty, raw)
        }
        TypeDesc::Enum { name, members } => {
            let member = raw
                .as_str()
                .filter(|m| members.iter().any(|x| x == m))
                .ok_or_else(|| bad(format!("{raw} is not a member of {name}")))?;
            Ok(Value::enum_member(name.clone(), member))
        }
        TypeDesc::Record { name, fields } => {
            let obj = raw
                .as_object()
                .ok_or_else(|| bad(format!("{name} must be an object")))?;
            let mut map = IndexMap::new();
            for f in fields {
                let v = match (obj.get(&f.name), &f.default) {
                    (Some(r), _) => value_from_plain_json(&f.ty, r)?,
                    (None, Some(default)) => default.clone(),
                    (None, None) => return Err(bad(format!("{name} is missing field {}", f.name))),
                };
                map.insert(f.name.clone(), v);
            }
            Ok(Value::Record(map))
        }
        TypeDesc::Optional(inner) => match raw {
            JsonValue::Null => Ok(Value::none()),
            r => Ok(Value::some(value_from_plain_json(inner, r)?)),
        },
        TypeDesc::List(item) => raw
            .as_array()
            .ok_or_else(|| bad("list must be an array".into()))?
            .iter()
            .map(|r| value_from_plain_json(item, r))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        TypeDesc::Tuple(types) => {
            let items = raw
                .as_array()
                .filter(|a| a.len() == types.len())
                .ok_or_else(|| bad(format!("tuple must have {} items", types.len())))?;
            types
                .iter()
                .zip(items)
                .map(|(t, r)| value_from_plain_json(t, r))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Tuple)
        }
        TypeDesc::Union(variants) => variants
            .iter()
            .find_map(|(tag, vty)| {
                value_from_plain_json(vty, raw)
                    .ok()
                    .map(|v| Value::variant(tag.clone(), v))
            })
            .ok_or_else(|| bad(format!("{raw} matches no variant of {}", ty.type_name()))),
        other => Err(bad(format!("no plain json form for {}", other.type_name()))),
    }
}

/// Encode a whole envelope. An Invalid pin persists its last valid value.
pub fn encode_envelope(ty: &TypeDesc, env: &Envelope<Value>) -> Result<JsonValue, JsonError> {
    match env {
        Envelope::Unspecified => Ok(unspecified_dict()),
        Envelope::Error => Ok(error_dict()),
        Envelope::Invalid {
            last_valid: None, ..
        } => Ok(unspecified_dict()),
        Envelope::Invalid {
            last_valid: Some(v),
            ..
        } => encode_value(ty, v),
        Envelope::Concrete(v) => encode_value(ty, v),
    }
}

pub fn decode_envelope(ty: &TypeDesc, dict: &JsonValue) -> Result<Envelope<Value>, JsonError> {
    match tag_of(dict)? {
        EnvelopeTag::Unspecified => Ok(Envelope::Unspecified),
        EnvelopeTag::Error => Ok(Envelope::Error),
        _ => decode_value(ty, dict).map(Envelope::Concrete),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_desc::FieldDesc;

    fn color() -> TypeDesc {
        TypeDesc::enumeration("Color", ["Red", "Green"])
    }

    fn settings() -> TypeDesc {
        TypeDesc::Record {
            name: "Settings".into(),
            fields: vec![
                FieldDesc::new("count", TypeDesc::Int),
                FieldDesc::new("title", TypeDesc::optional(TypeDesc::Str)),
                FieldDesc::new("color", color()),
                FieldDesc::new("scale", TypeDesc::Float).with_default(Value::Float(1.0)),
            ],
        }
    }

    #[test]
    fn primitive_shape_matches_wire_format() {
        let json = encode_value(&TypeDesc::Int, &Value::Int(3)).expect("encode");
        assert_eq!(json, json!({"type": "Primitive", "value": 3}));
    }

    #[test]
    fn record_encodes_fields_as_envelope_dicts() {
        let v = Value::record([
            ("count", Value::Int(2)),
            ("title", Value::none()),
            ("color", Value::enum_member("Color", "Green")),
            ("scale", Value::Float(2.5)),
        ]);
        let json = encode_value(&settings(), &v).expect("encode");
        assert_eq!(json["type"], "Record");
        assert_eq!(json["value"]["title"], json!({"type": "Optional", "value": null}));
        assert_eq!(
            json["value"]["color"],
            json!({"type": "Enum", "class": "Color", "value_name": "Green"})
        );
        assert_eq!(decode_value(&settings(), &json).expect("decode"), v);
    }

    #[test]
    fn legacy_dict_is_migrated_against_field_types() {
        let legacy = json!({
            "type": "Pydantic",
            "value": {"count": 4, "title": "hello", "color": "Red"}
        });
        let v = decode_value(&settings(), &legacy).expect("migrate");
        let map = v.as_record().expect("record");
        assert_eq!(map["count"], Value::Int(4));
        assert_eq!(map["title"], Value::some(Value::str("hello")));
        assert_eq!(map["color"], Value::enum_member("Color", "Red"));
        assert_eq!(map["scale"], Value::Float(1.0));

        let resaved = encode_value(&settings(), &v).expect("encode");
        assert_eq!(resaved["type"], "Record");
    }

    #[test]
    fn invalid_envelope_saves_last_valid() {
        let env = Envelope::Concrete(Value::Int(2)).invalidate("must be odd");
        let json = encode_envelope(&TypeDesc::Int, &env).expect("encode");
        assert_eq!(json, json!({"type": "Primitive", "value": 2}));

        let never_valid = Envelope::<Value>::Unspecified.invalidate("nope");
        let json = encode_envelope(&TypeDesc::Int, &never_valid).expect("encode");
        assert_eq!(json, unspecified_dict());
    }

    #[test]
    fn decode_rejects_mismatched_tags() {
        let err = decode_value(&TypeDesc::Int, &json!({"type": "List", "value": []}));
        assert!(matches!(err, Err(JsonError::UnexpectedTag { .. })));
        let err = decode_value(&TypeDesc::Int, &json!({"value": 1}));
        assert!(matches!(err, Err(JsonError::MissingTag(_))));
        let err = decode_value(&color(), &json!({"type": "Enum", "class": "Color", "value_name": "Blue"}));
        assert!(matches!(err, Err(JsonError::Malformed { .. })));
    }

    #[test]
    fn union_and_tuple_shapes() {
        let shape = TypeDesc::Union(vec![
            ("Circle".into(), TypeDesc::Float),
            ("Label".into(), TypeDesc::Str),
        ]);
        let v = Value::variant("Label", Value::str("x"));
        let json = encode_value(&shape, &v).expect("encode");
        assert_eq!(json["tag"], "Label");
        assert_eq!(decode_value(&shape, &json).expect("decode"), v);

        let pair = TypeDesc::Tuple(vec![TypeDesc::Int, TypeDesc::Bool]);
        let v = Value::Tuple(vec![Value::Int(1), Value::Bool(true)]);
        let json = encode_value(&pair, &v).expect("encode");
        assert_eq!(json["values"][1], json!({"type": "Primitive", "value": true}));
        assert_eq!(decode_value(&pair, &json).expect("decode"), v);
    }

    #[test]
    fn non_finite_floats_are_not_encodable() {
        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = encode_value(&TypeDesc::Float, &Value::Float(v));
            assert!(matches!(err, Err(JsonError::Unencodable(_))), "{v}");
        }
        let floats = Value::List(vec![Value::Float(1.0), Value::Float(f64::NAN)]);
        let err = encode_value(&TypeDesc::list(TypeDesc::Float), &floats);
        assert!(matches!(err, Err(JsonError::Unencodable(_))));
    }

    #[test]
    fn encode_refuses_values_of_another_kind() {
        for (ty, v) in [
            (TypeDesc::Int, Value::str("3")),
            (TypeDesc::Str, Value::Int(3)),
            (TypeDesc::Bool, Value::Float(1.0)),
            (TypeDesc::Int, Value::Float(2.0)),
        ] {
            let err = encode_value(&ty, &v).expect_err("kind mismatch");
            assert!(err.to_string().contains("pin"), "{err}");
        }
        let json = encode_value(&TypeDesc::Float, &Value::Int(2)).expect("int widens to float");
        assert_eq!(decode_value(&TypeDesc::Float, &json).expect("decode"), Value::Float(2.0));
    }

    #[test]
    fn encode_refuses_foreign_enum_members() {
        let err = encode_value(&color(), &Value::enum_member("Color", "Purple")).unwrap_err();
        assert!(err.to_string().contains("Purple is not a member of Color"), "{err}");
        let err = encode_value(&color(), &Value::enum_member("Shade", "Red")).unwrap_err();
        assert!(matches!(err, JsonError::Unencodable(_)));
    }

    #[test]
    fn legacy_migrations_are_noted_once_per_record_type() {
        let token = TypeDesc::Record {
            name: "LegacyToken".into(),
            fields: vec![FieldDesc::new("id", TypeDesc::Int)],
        };
        let legacy = json!({"type": "Dict", "value": {"id": 7}});
        decode_value(&token, &legacy).expect("migrate");
        decode_value(&token, &legacy).expect("migrate again");
        assert!(!note_legacy_migration(EnvelopeTag::LegacyDict, "LegacyToken"));

        assert!(note_legacy_migration(EnvelopeTag::LegacyPydantic, "NeverSeenBefore"));
        assert!(!note_legacy_migration(EnvelopeTag::LegacyPydantic, "NeverSeenBefore"));
    }
}
