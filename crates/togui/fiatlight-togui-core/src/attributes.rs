//! Fiat attributes: typed, string-keyed options attached to handles and
//! functions.
//!
//! Raw keys look like `"<target>__<key>"`. The prefix before the first `__`
//! names a parameter, a record field, a union tag, or an output (`return`,
//! `return_1`, ...); keys without `__` belong to the current target.

use fiatlight_api_core::{FiatError, FiatResult, FiatType, Value};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

pub const ROUTE_SEPARATOR: &str = "__";

type ValidatorFn = dyn Fn(&Value) -> Result<Value, String> + Send + Sync;

/// Validator run after every edit: returns the (possibly normalised) value or
/// the reason it was rejected.
#[derive(Clone)]
pub struct Validator {
    name: String,
    check: Arc<ValidatorFn>,
}

impl Validator {
    pub fn new(
        name: impl Into<String>,
        check: impl Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Validator {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Validator written against a concrete Rust type.
    pub fn typed<T: FiatType + 'static>(
        name: impl Into<String>,
        check: impl Fn(T) -> Result<T, String> + Send + Sync + 'static,
    ) -> Self {
        Validator::new(name, move |value| {
            let typed = T::from_value(value).map_err(|e| e.to_string())?;
            check(typed).map(|v| v.to_value())
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, value: &Value) -> Result<Value, String> {
        (self.check)(value)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validator({})", self.name)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttrType {
    Bool,
    Int,
    Float,
    Str,
    IntRange,
    FloatRange,
    FloatPair,
    Validator,
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttrType::Bool => "bool",
            AttrType::Int => "int",
            AttrType::Float => "float",
            AttrType::Str => "str",
            AttrType::IntRange => "int range",
            AttrType::FloatRange => "float range",
            AttrType::FloatPair => "float pair",
            AttrType::Validator => "validator",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    IntRange(i64, i64),
    FloatRange(f64, f64),
    FloatPair(f64, f64),
    Validator(Validator),
}

impl AttrValue {
    pub fn attr_type(&self) -> AttrType {
        match self {
            AttrValue::Bool(_) => AttrType::Bool,
            AttrValue::Int(_) => AttrType::Int,
            AttrValue::Float(_) => AttrType::Float,
            AttrValue::Str(_) => AttrType::Str,
            AttrValue::IntRange(..) => AttrType::IntRange,
            AttrValue::FloatRange(..) => AttrType::FloatRange,
            AttrValue::FloatPair(..) => AttrType::FloatPair,
            AttrValue::Validator(_) => AttrType::Validator,
        }
    }

    /// Convert to `ty` when the conversion is lossless: ints widen to floats,
    /// and ranges and pairs of floats are interchangeable.
    pub fn coerce_to(&self, ty: AttrType) -> Option<AttrValue> {
        match (self, ty) {
            (v, t) if v.attr_type() == t => Some(v.clone()),
            (AttrValue::Int(v), AttrType::Float) => Some(AttrValue::Float(*v as f64)),
            (AttrValue::IntRange(a, b), AttrType::FloatRange) => {
                Some(AttrValue::FloatRange(*a as f64, *b as f64))
            }
            (AttrValue::FloatRange(a, b), AttrType::FloatPair) => Some(AttrValue::FloatPair(*a, *b)),
            (AttrValue::FloatPair(a, b), AttrType::FloatRange) => {
                Some(AttrValue::FloatRange(*a, *b))
            }
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttrValue::Bool(a), AttrValue::Bool(b)) => a == b,
            (AttrValue::Int(a), AttrValue::Int(b)) => a == b,
            (AttrValue::Float(a), AttrValue::Float(b)) => a == b,
            (AttrValue::Str(a), AttrValue::Str(b)) => a == b,
            (AttrValue::IntRange(a0, a1), AttrValue::IntRange(b0, b1)) => a0 == b0 && a1 == b1,
            (AttrValue::FloatRange(a0, a1), AttrValue::FloatRange(b0, b1))
            | (AttrValue::FloatPair(a0, a1), AttrValue::FloatPair(b0, b1)) => {
                a0 == b0 && a1 == b1
            }
            (AttrValue::Validator(a), AttrValue::Validator(b)) => Arc::ptr_eq(&a.check, &b.check),
            _ => false,
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Int(i64::from(v))
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl From<(i64, i64)> for AttrValue {
    fn from((a, b): (i64, i64)) -> Self {
        AttrValue::IntRange(a, b)
    }
}

impl From<(f64, f64)> for AttrValue {
    fn from((a, b): (f64, f64)) -> Self {
        AttrValue::FloatRange(a, b)
    }
}

impl From<Validator> for AttrValue {
    fn from(v: Validator) -> Self {
        AttrValue::Validator(v)
    }
}

/// One attribute a handle kind understands.
#[derive(Clone, Debug)]
pub struct PossibleAttr {
    pub name: &'static str,
    pub ty: AttrType,
    pub default: Option<AttrValue>,
    pub explanation: &'static str,
    /// Allowed values for string attributes; empty means free text.
    pub choices: &'static [&'static str],
}

impl PossibleAttr {
    pub fn new(name: &'static str, ty: AttrType, explanation: &'static str) -> Self {
        PossibleAttr {
            name,
            ty,
            default: None,
            explanation,
            choices: &[],
        }
    }

    pub fn with_default(mut self, default: impl Into<AttrValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_choices(mut self, choices: &'static [&'static str]) -> Self {
        self.choices = choices;
        self
    }
}

/// Attributes every handle accepts.
pub fn common_attrs() -> Vec<PossibleAttr> {
    vec![
        PossibleAttr::new("label", AttrType::Str, "label shown next to the widget"),
        PossibleAttr::new("tooltip", AttrType::Str, "tooltip shown on hover"),
        PossibleAttr::new(
            "validate_value",
            AttrType::Validator,
            "validator appended to the handle's validator chain",
        ),
    ]
}

/// Ordered attribute set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FiatAttributes {
    entries: IndexMap<String, AttrValue>,
}

impl FiatAttributes {
    pub fn new() -> Self {
        FiatAttributes::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// `<param>__<key>`
    pub fn param(self, param: &str, key: &str, value: impl Into<AttrValue>) -> Self {
        self.with(format!("{param}{ROUTE_SEPARATOR}{key}"), value)
    }

    /// `return__<key>` for output 0, `return_<i>__<key>` otherwise.
    pub fn output(self, index: usize, key: &str, value: impl Into<AttrValue>) -> Self {
        let prefix = output_prefix(index);
        self.with(format!("{prefix}{ROUTE_SEPARATOR}{key}"), value)
    }

    /// Function-level key such as `invoke_async`.
    pub fn function(self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.with(key, value)
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.entries.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(AttrValue::as_bool)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(AttrValue::as_int)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(AttrValue::as_float)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(AttrValue::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keys that are not routed elsewhere.
    pub fn own(&self) -> FiatAttributes {
        FiatAttributes {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| !k.contains(ROUTE_SEPARATOR))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Attributes routed to `target`, with the `target__` prefix stripped.
    /// Keys are split at the first `__` only, so `a__b__c` routes `b__c` to `a`.
    pub fn routed_to(&self, target: &str) -> FiatAttributes {
        FiatAttributes {
            entries: self
                .entries
                .iter()
                .filter_map(|(k, v)| {
                    let (prefix, rest) = k.split_once(ROUTE_SEPARATOR)?;
                    (prefix == target).then(|| (rest.to_string(), v.clone()))
                })
                .collect(),
        }
    }

    /// Distinct route prefixes in insertion order.
    pub fn route_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for key in self.entries.keys() {
            if let Some((prefix, _)) = key.split_once(ROUTE_SEPARATOR) {
                if !targets.iter().any(|t| t == prefix) {
                    targets.push(prefix.to_string());
                }
            }
        }
        targets
    }

    /// `self` layered over `defaults`: keys present in both keep `self`'s value.
    pub fn merged_over(&self, defaults: &FiatAttributes) -> FiatAttributes {
        let mut merged = defaults.clone();
        for (k, v) in &self.entries {
            merged.entries.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Check own keys against `possible` (plus the common attributes) and
    /// coerce them to the declared types. Routed keys are left to the caller.
    pub fn validate_own(
        &self,
        possible: &[PossibleAttr],
        target: &str,
    ) -> FiatResult<FiatAttributes> {
        let mut all = possible.to_vec();
        all.extend(common_attrs());
        self.validate_keys(&all, target)
    }

    /// Like [`validate_own`](Self::validate_own) but without the common
    /// attributes.
    pub fn validate_keys(
        &self,
        possible: &[PossibleAttr],
        target: &str,
    ) -> FiatResult<FiatAttributes> {
        let mut checked = FiatAttributes::new();
        for (key, value) in self.entries.iter() {
            if key.contains(ROUTE_SEPARATOR) {
                checked.entries.insert(key.clone(), value.clone());
                continue;
            }
            let Some(known) = possible.iter().find(|p| p.name == key) else {
                let names: Vec<&str> = possible.iter().map(|p| p.name).collect();
                return Err(FiatError::CompileFailure(format!(
                    "unknown attribute `{key}` for {target}; possible attributes: {}",
                    names.join(", ")
                )));
            };
            let coerced = value.coerce_to(known.ty).ok_or_else(|| {
                FiatError::CompileFailure(format!(
                    "attribute `{key}` for {target} must be a {}, got a {}",
                    known.ty,
                    value.attr_type()
                ))
            })?;
            if let (AttrValue::Str(s), false) = (&coerced, known.choices.is_empty()) {
                if !known.choices.contains(&s.as_str()) {
                    return Err(FiatError::CompileFailure(format!(
                        "attribute `{key}` for {target} must be one of {}, got {s:?}",
                        known.choices.join("|")
                    )));
                }
            }
            checked.entries.insert(key.clone(), coerced);
        }
        Ok(checked)
    }
}

/// Attribute prefix of output `index`.
pub fn output_prefix(index: usize) -> String {
    if index == 0 {
        "return".to_string()
    } else {
        format!("return_{index}")
    }
}

/// Output index named by a route prefix (`return` → 0, `return_2` → 2).
pub fn parse_output_prefix(prefix: &str) -> Option<usize> {
    if prefix == "return" {
        return Some(0);
    }
    prefix.strip_prefix("return_")?.parse().ok()
}
