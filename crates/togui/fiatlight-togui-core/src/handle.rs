//! Typed GUI handles.
//!
//! A [`Handle`] owns the value envelope of one pin plus everything needed to
//! edit, present and persist it. Built-in kinds implement every callback
//! natively; a user callback set in [`Callbacks`] always wins over the
//! built-in behaviour for that slot.
//!
//! Composite kinds (record, optional, list, variant, tuple) hold one
//! sub-handle per element. Sub-handles act as renderers for the element
//! values; the envelope lives on the outermost handle only.

use fiatlight_api_core::json::{self, EnvelopeTag};
use fiatlight_api_core::{Envelope, FiatError, FiatResult, FieldDesc, TypeDesc, Value};
use indexmap::IndexMap;
use once_cell::unsync::OnceCell;
use serde_json::{json, Map, Value as JsonValue};
use std::fmt;

use crate::attributes::{AttrValue, FiatAttributes, PossibleAttr, Validator};
use crate::params::{BoolParams, FloatParams, IntParams, StrParams};
use crate::registry::Registry;
use crate::ui::Ui;

/// Lines shown by the in-node summary of a list.
pub const LIST_SUMMARY_MAX_ITEMS: usize = 10;

pub type DefaultValueFn = Box<dyn Fn() -> Value>;
pub type EditFn = Box<dyn Fn(&mut dyn Ui, &Value) -> (bool, Value)>;
pub type PresentFn = Box<dyn Fn(&mut dyn Ui, &Value)>;
pub type PresentStrFn = Box<dyn Fn(&Value) -> String>;
pub type OnChangeFn = Box<dyn FnMut(&Value)>;
pub type HeartbeatFn = Box<dyn FnMut() -> bool>;
pub type SaveFn = Box<dyn Fn(&Value) -> FiatResult<JsonValue>>;
pub type LoadFn = Box<dyn Fn(&JsonValue) -> FiatResult<Value>>;
pub type SaveViewFn = Box<dyn Fn() -> JsonValue>;
pub type LoadViewFn = Box<dyn FnMut(&JsonValue)>;
pub type ClipboardFn = Box<dyn Fn(&Value) -> String>;
pub type AttrsChangedFn = Box<dyn FnMut(&FiatAttributes)>;
pub type ExitFn = Box<dyn FnMut()>;

/// Optional user callbacks. `None` falls back to the built-in behaviour.
#[derive(Default)]
pub struct Callbacks {
    pub default_value: Option<DefaultValueFn>,
    pub edit: Option<EditFn>,
    pub present: Option<PresentFn>,
    pub present_str: Option<PresentStrFn>,
    pub on_change: Option<OnChangeFn>,
    pub on_heartbeat: Option<HeartbeatFn>,
    pub save_to_dict: Option<SaveFn>,
    pub load_from_dict: Option<LoadFn>,
    pub save_view_options: Option<SaveViewFn>,
    pub load_view_options: Option<LoadViewFn>,
    pub clipboard_copy_str: Option<ClipboardFn>,
    pub on_fiat_attributes_changed: Option<AttrsChangedFn>,
    pub on_exit: Option<ExitFn>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set: Vec<&str> = [
            ("default_value", self.default_value.is_some()),
            ("edit", self.edit.is_some()),
            ("present", self.present.is_some()),
            ("present_str", self.present_str.is_some()),
            ("on_change", self.on_change.is_some()),
            ("on_heartbeat", self.on_heartbeat.is_some()),
            ("save_to_dict", self.save_to_dict.is_some()),
            ("load_from_dict", self.load_from_dict.is_some()),
            ("save_view_options", self.save_view_options.is_some()),
            ("load_view_options", self.load_view_options.is_some()),
            ("clipboard_copy_str", self.clipboard_copy_str.is_some()),
            ("on_fiat_attributes_changed", self.on_fiat_attributes_changed.is_some()),
            ("on_exit", self.on_exit.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, is_set)| is_set.then_some(name))
        .collect();
        f.debug_tuple("Callbacks").field(&set).finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandleFlags {
    pub edit_node_compatible: bool,
    pub present_node_compatible: bool,
    pub edit_collapsible: bool,
    pub present_collapsible: bool,
    pub clipboard_copy_possible: bool,
}

impl Default for HandleFlags {
    fn default() -> Self {
        HandleFlags {
            edit_node_compatible: true,
            present_node_compatible: true,
            edit_collapsible: false,
            present_collapsible: false,
            clipboard_copy_possible: true,
        }
    }
}

/// Result of one frame of editing.
#[derive(Clone, Debug, PartialEq)]
pub enum EditOutcome {
    Unchanged,
    Changed,
    /// A validator refused the edit; the pin is now Invalid.
    Rejected(String),
}

#[derive(Debug)]
pub struct RecordField {
    pub desc: FieldDesc,
    pub handle: Handle,
}

/// A handle for a named type that was already being built higher up the
/// current path. It is built from the registry on first use.
pub struct Deferred {
    registry: Registry,
    ty: TypeDesc,
    attrs: FiatAttributes,
    cell: OnceCell<Result<Box<Handle>, FiatError>>,
}

impl Deferred {
    pub(crate) fn new(registry: Registry, ty: TypeDesc, attrs: FiatAttributes) -> Self {
        Deferred {
            registry,
            ty,
            attrs,
            cell: OnceCell::new(),
        }
    }

    pub fn is_materialized(&self) -> bool {
        self.cell.get().is_some()
    }

    fn force(&self) -> Result<&Handle, &FiatError> {
        let built = self.cell.get_or_init(|| {
            log::debug!("materialising deferred handle for {}", self.ty);
            self.registry.lookup(&self.ty, &self.attrs).map(Box::new)
        });
        built.as_ref().map(|h| h.as_ref())
    }

    fn force_mut(&mut self) -> Result<&mut Handle, FiatError> {
        if let Err(e) = self.force() {
            return Err(e.clone());
        }
        match self.cell.get_mut() {
            Some(Ok(handle)) => Ok(handle.as_mut()),
            Some(Err(e)) => Err(e.clone()),
            None => Err(FiatError::CompileFailure(format!(
                "deferred handle for {} was not built",
                self.ty
            ))),
        }
    }

    fn built_mut(&mut self) -> Option<&mut Handle> {
        match self.cell.get_mut() {
            Some(Ok(handle)) => Some(handle.as_mut()),
            _ => None,
        }
    }

    fn built(&self) -> Option<&Handle> {
        match self.cell.get() {
            Some(Ok(handle)) => Some(handle.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("ty", &self.ty.type_name())
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

#[derive(Debug)]
pub enum HandleKind {
    Int(IntParams),
    Float(FloatParams),
    Bool(BoolParams),
    Str(StrParams),
    Enum {
        name: String,
        members: Vec<String>,
    },
    Record {
        name: String,
        fields: Vec<RecordField>,
    },
    Optional(Box<Handle>),
    /// Present-only unless a list editor is registered for the exact type.
    List(Box<Handle>),
    Variant(Vec<(String, Handle)>),
    Tuple(Vec<Handle>),
    /// Registered by user code; behaviour comes from its callbacks. `possible`
    /// lists the attributes it accepts, `None` accepts any.
    Custom {
        possible: Option<Vec<PossibleAttr>>,
    },
    Deferred(Box<Deferred>),
}

impl HandleKind {
    pub fn name(&self) -> &'static str {
        match self {
            HandleKind::Int(_) => "int",
            HandleKind::Float(_) => "float",
            HandleKind::Bool(_) => "bool",
            HandleKind::Str(_) => "str",
            HandleKind::Enum { .. } => "enum",
            HandleKind::Record { .. } => "record",
            HandleKind::Optional(_) => "optional",
            HandleKind::List(_) => "list",
            HandleKind::Variant(_) => "variant",
            HandleKind::Tuple(_) => "tuple",
            HandleKind::Custom { .. } => "custom",
            HandleKind::Deferred(_) => "deferred",
        }
    }
}

pub struct Handle {
    ty: TypeDesc,
    kind: HandleKind,
    value: Envelope<Value>,
    pub callbacks: Callbacks,
    pub flags: HandleFlags,
    validators: Vec<Validator>,
    attrs: FiatAttributes,
    label: String,
    tooltip: Option<String>,
    expanded: bool,
    last_rejected: Option<Value>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("ty", &self.ty.type_name())
            .field("kind", &self.kind.name())
            .field("label", &self.label)
            .field("value", &self.value)
            .finish()
    }
}

impl Handle {
    pub fn new(ty: TypeDesc, kind: HandleKind) -> Self {
        let mut flags = HandleFlags::default();
        match &kind {
            HandleKind::Record { .. } | HandleKind::Tuple(_) => {
                flags.edit_collapsible = true;
                flags.present_collapsible = true;
            }
            HandleKind::List(_) => flags.present_collapsible = true,
            HandleKind::Custom { .. } => flags.clipboard_copy_possible = false,
            _ => {}
        }
        let label = ty.type_name();
        Handle {
            ty,
            kind,
            value: Envelope::Unspecified,
            callbacks: Callbacks::default(),
            flags,
            validators: Vec::new(),
            attrs: FiatAttributes::new(),
            label,
            tooltip: None,
            expanded: true,
            last_rejected: None,
        }
    }

    /// Handle for a user-registered type, driven entirely by callbacks.
    pub fn custom(ty: TypeDesc) -> Self {
        Handle::new(ty, HandleKind::Custom { possible: None })
    }

    pub fn with_callbacks(mut self, set: impl FnOnce(&mut Callbacks)) -> Self {
        set(&mut self.callbacks);
        self
    }

    pub fn with_flags(mut self, set: impl FnOnce(&mut HandleFlags)) -> Self {
        set(&mut self.flags);
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.set_label(label);
        self
    }

    /// Declare the attributes a custom handle accepts.
    pub fn with_possible_attrs(mut self, possible: Vec<PossibleAttr>) -> Self {
        if let HandleKind::Custom { possible: slot } = &mut self.kind {
            *slot = Some(possible);
        }
        self
    }

    pub fn ty(&self) -> &TypeDesc {
        &self.ty
    }

    pub(crate) fn set_ty(&mut self, ty: TypeDesc) {
        self.ty = ty;
    }

    pub fn kind(&self) -> &HandleKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut HandleKind {
        &mut self.kind
    }

    pub fn can_be_none(&self) -> bool {
        self.ty.can_be_none()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wrappers share their label with the wrapped handle.
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
        if let HandleKind::Optional(inner) | HandleKind::List(inner) = &mut self.kind {
            inner.set_label(self.label.clone());
        }
    }

    pub fn tooltip(&self) -> Option<&str> {
        self.tooltip.as_deref()
    }

    pub fn attrs(&self) -> &FiatAttributes {
        &self.attrs
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn add_validator(&mut self, validator: Validator) {
        self.validators.push(validator);
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn set_expanded(&mut self, expanded: bool) {
        self.expanded = expanded;
    }

    pub fn value(&self) -> &Envelope<Value> {
        &self.value
    }

    /// What the user last typed while the pin is Invalid.
    pub fn last_rejected(&self) -> Option<&Value> {
        self.last_rejected.as_ref()
    }

    // --- Envelope transitions ---

    /// Set a value as if the user typed it: type check, validators, then
    /// `on_change`. A rejection leaves the pin Invalid and returns `BadInput`.
    pub fn set_value(&mut self, value: Value) -> FiatResult<()> {
        self.ty.check(&value).map_err(FiatError::TypeMismatch)?;
        match self.commit(value) {
            EditOutcome::Rejected(reason) => Err(FiatError::BadInput(reason)),
            _ => Ok(()),
        }
    }

    /// Replace the envelope without running validators (links, outputs,
    /// loading).
    pub fn set_envelope(&mut self, envelope: Envelope<Value>) {
        self.last_rejected = None;
        self.value = envelope;
        if let (Envelope::Concrete(v), Some(cb)) = (&self.value, self.callbacks.on_change.as_mut()) {
            cb(v);
        }
    }

    pub fn take_envelope(&mut self) -> Envelope<Value> {
        self.last_rejected = None;
        std::mem::take(&mut self.value)
    }

    /// BadInput recovery: go back to the last valid value.
    pub fn restore_last_valid(&mut self) {
        let env = std::mem::take(&mut self.value).restore_last_valid();
        self.set_envelope(env);
    }

    fn commit(&mut self, candidate: Value) -> EditOutcome {
        match self.validate(candidate.clone()) {
            Ok(valid) => {
                self.set_envelope(Envelope::Concrete(valid));
                EditOutcome::Changed
            }
            Err(reason) => {
                log::debug!("{} rejected: {reason}", self.label);
                self.value = std::mem::take(&mut self.value).invalidate(reason.clone());
                self.last_rejected = Some(candidate);
                EditOutcome::Rejected(reason)
            }
        }
    }

    /// Run element validators, then this handle's chain in order. The first
    /// failure wins.
    pub fn validate(&self, value: Value) -> Result<Value, String> {
        let value = match (&self.kind, value) {
            (HandleKind::Record { fields, .. }, Value::Record(mut map)) => {
                for field in fields {
                    if let Some(v) = map.get_mut(&field.desc.name) {
                        *v = field
                            .handle
                            .validate(v.clone())
                            .map_err(|e| format!("{}: {e}", field.desc.name))?;
                    }
                }
                Value::Record(map)
            }
            (HandleKind::Optional(inner), Value::Optional(Some(v))) => {
                Value::some(inner.validate(*v)?)
            }
            (HandleKind::List(item), Value::List(items)) => Value::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(idx, v)| item.validate(v).map_err(|e| format!("[{idx}]: {e}")))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            (HandleKind::Variant(variants), Value::Variant { tag, value }) => {
                match variants.iter().find(|(t, _)| *t == tag) {
                    Some((_, h)) => Value::variant(tag, h.validate(*value)?),
                    None => Value::Variant { tag, value },
                }
            }
            (HandleKind::Tuple(handles), Value::Tuple(items)) => Value::Tuple(
                handles
                    .iter()
                    .zip(items)
                    .map(|(h, v)| h.validate(v))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            (HandleKind::Deferred(d), v) => match d.force() {
                Ok(h) => h.validate(v)?,
                Err(_) => v,
            },
            (_, v) => v,
        };
        self.validators
            .iter()
            .try_fold(value, |acc, validator| validator.apply(&acc))
    }

    /// Value offered when the user sets an Unspecified pin.
    pub fn default_value(&self) -> Option<Value> {
        if let Some(cb) = &self.callbacks.default_value {
            return Some(cb());
        }
        match &self.kind {
            HandleKind::Int(p) => Some(Value::Int(0_i64.clamp(p.range.0, p.range.1.max(p.range.0)))),
            HandleKind::Float(_) => Some(Value::Float(0.0)),
            HandleKind::Bool(_) => Some(Value::Bool(false)),
            HandleKind::Str(_) => Some(Value::str("")),
            HandleKind::Enum { name, members } => members
                .first()
                .map(|m| Value::enum_member(name.clone(), m.clone())),
            HandleKind::Record { fields, .. } => {
                let mut map = IndexMap::new();
                for field in fields {
                    let v = match &field.desc.default {
                        Some(v) => v.clone(),
                        None => field.handle.default_value()?,
                    };
                    map.insert(field.desc.name.clone(), v);
                }
                Some(Value::Record(map))
            }
            HandleKind::Optional(_) => Some(Value::none()),
            HandleKind::List(_) => Some(Value::List(Vec::new())),
            HandleKind::Variant(variants) => {
                let (tag, h) = variants.first()?;
                Some(Value::variant(tag.clone(), h.default_value()?))
            }
            HandleKind::Tuple(handles) => handles
                .iter()
                .map(Handle::default_value)
                .collect::<Option<Vec<_>>>()
                .map(Value::Tuple),
            HandleKind::Custom { .. } => self.ty.default_value(),
            HandleKind::Deferred(d) => d.force().ok().and_then(Handle::default_value),
        }
    }

    // --- Drawing ---

    /// Draw the editor for the current envelope.
    pub fn edit(&mut self, ui: &mut dyn Ui) -> EditOutcome {
        let current = match &self.value {
            Envelope::Concrete(v) => v.clone(),
            Envelope::Invalid { reason, last_valid } => {
                ui.error_text(&format!("{}: {reason}", self.label));
                match self.last_rejected.clone().or_else(|| last_valid.clone()) {
                    Some(v) => v,
                    None => return self.edit_unset(ui),
                }
            }
            Envelope::Unspecified | Envelope::Error => return self.edit_unset(ui),
        };
        let (changed, candidate) = self.edit_value(ui, &current);
        if changed {
            self.commit(candidate)
        } else {
            EditOutcome::Unchanged
        }
    }

    fn edit_unset(&mut self, ui: &mut dyn Ui) -> EditOutcome {
        let state = if self.value.is_error() {
            "Error"
        } else {
            "Unspecified"
        };
        ui.text(&format!("{}: {state}", self.label));
        let Some(default) = self.default_value() else {
            return EditOutcome::Unchanged;
        };
        ui.push_id(&self.label);
        let clicked = ui.button("set");
        ui.pop_id();
        if clicked {
            self.commit(default)
        } else {
            EditOutcome::Unchanged
        }
    }

    /// Draw the presenter for the current envelope.
    pub fn present(&mut self, ui: &mut dyn Ui) {
        match &self.value {
            Envelope::Concrete(v) => {
                let v = v.clone();
                self.present_value(ui, &v);
            }
            Envelope::Unspecified => ui.text(&format!("{}: Unspecified", self.label)),
            Envelope::Error => ui.error_text(&format!("{}: Error", self.label)),
            Envelope::Invalid { reason, .. } => {
                ui.error_text(&format!("{}: Invalid ({reason})", self.label))
            }
        }
    }

    /// One-line (or short multi-line) text of the current envelope.
    pub fn present_str(&self) -> String {
        match &self.value {
            Envelope::Concrete(v) => self.present_str_of(v),
            Envelope::Unspecified => "Unspecified".to_string(),
            Envelope::Error => "Error".to_string(),
            Envelope::Invalid { reason, .. } => format!("Invalid: {reason}"),
        }
    }

    /// Text copied by the clipboard button, if copying applies.
    pub fn clipboard_text(&self) -> Option<String> {
        if !self.flags.clipboard_copy_possible {
            return None;
        }
        let value = self.value.as_concrete()?;
        Some(match &self.callbacks.clipboard_copy_str {
            Some(cb) => cb(value),
            None => self.present_str_of(value),
        })
    }

    pub fn edit_value(&mut self, ui: &mut dyn Ui, value: &Value) -> (bool, Value) {
        if let Some(cb) = &self.callbacks.edit {
            return cb(ui, value);
        }
        let label = self.label.clone();
        let fallback = self.default_value();
        match &mut self.kind {
            HandleKind::Int(params) => {
                let mut v = value.as_int().unwrap_or_default();
                let changed = ui.edit_int(&label, params, &mut v);
                (changed, Value::Int(v))
            }
            HandleKind::Float(params) => {
                let mut v = value.as_float().unwrap_or_default();
                let changed = ui.edit_float(&label, params, &mut v);
                (changed, Value::Float(v))
            }
            HandleKind::Bool(params) => {
                let mut v = value.as_bool().unwrap_or_default();
                let changed = ui.edit_bool(&label, params, &mut v);
                (changed, Value::Bool(v))
            }
            HandleKind::Str(params) => {
                let mut v = value.as_str().unwrap_or_default().to_string();
                let changed = ui.edit_str(&label, params, &mut v);
                (changed, Value::Str(v))
            }
            HandleKind::Enum { name, members } => {
                let mut idx = match value {
                    Value::Enum { member, .. } => {
                        members.iter().position(|m| m == member).unwrap_or(0)
                    }
                    _ => 0,
                };
                let changed = ui.choose(&label, members, &mut idx);
                match members.get(idx) {
                    Some(member) => (changed, Value::enum_member(name.clone(), member.clone())),
                    None => (false, value.clone()),
                }
            }
            HandleKind::Record { fields, .. } => {
                let mut map = match (value, fallback) {
                    (Value::Record(map), _) => map.clone(),
                    (_, Some(Value::Record(map))) => map,
                    _ => IndexMap::new(),
                };
                if self.flags.edit_collapsible {
                    self.expanded = ui.collapsing(&label, self.expanded);
                    if !self.expanded {
                        return (false, value.clone());
                    }
                }
                ui.push_id(&label);
                let mut changed = false;
                for field in fields.iter_mut() {
                    let current = map
                        .get(&field.desc.name)
                        .cloned()
                        .or_else(|| field.desc.default.clone())
                        .or_else(|| field.handle.default_value());
                    let Some(current) = current else {
                        ui.error_text(&format!("{}: no value", field.desc.name));
                        continue;
                    };
                    let (c, v) = field.handle.edit_value(ui, &current);
                    changed |= c;
                    map.insert(field.desc.name.clone(), v);
                }
                ui.pop_id();
                (changed, Value::Record(map))
            }
            HandleKind::Optional(inner) => {
                ui.push_id(&label);
                let mut is_set = !value.is_none();
                let toggled = ui.edit_bool("set", &BoolParams::default(), &mut is_set);
                let result = match (toggled, is_set, value) {
                    (true, false, _) => (true, Value::none()),
                    (true, true, _) => match inner.default_value() {
                        Some(v) => (true, Value::some(v)),
                        None => {
                            log::warn!("{label}: inner handle has no default value");
                            (false, value.clone())
                        }
                    },
                    (false, true, Value::Optional(Some(v))) => {
                        let (c, v) = inner.edit_value(ui, v);
                        (c, Value::some(v))
                    }
                    _ => (false, value.clone()),
                };
                ui.pop_id();
                result
            }
            HandleKind::List(_) | HandleKind::Custom { .. } => {
                self.present_value(ui, value);
                (false, value.clone())
            }
            HandleKind::Variant(variants) => {
                let tags: Vec<String> = variants.iter().map(|(t, _)| t.clone()).collect();
                let (mut idx, inner) = match value {
                    Value::Variant { tag, value } => {
                        (tags.iter().position(|t| t == tag).unwrap_or(0), Some(value))
                    }
                    _ => (0, None),
                };
                ui.push_id(&label);
                let switched = ui.choose("tag", &tags, &mut idx);
                let result = match (variants.get_mut(idx), switched, inner) {
                    (Some((tag, h)), true, _) | (Some((tag, h)), false, None) => {
                        match h.default_value() {
                            Some(v) => (true, Value::variant(tag.clone(), v)),
                            None => (false, value.clone()),
                        }
                    }
                    (Some((tag, h)), false, Some(inner)) => {
                        let (c, v) = h.edit_value(ui, inner);
                        (c, Value::variant(tag.clone(), v))
                    }
                    (None, _, _) => (false, value.clone()),
                };
                ui.pop_id();
                result
            }
            HandleKind::Tuple(handles) => {
                let items = match (value, fallback) {
                    (Value::Tuple(items), _) => items.clone(),
                    (_, Some(Value::Tuple(items))) => items,
                    _ => Vec::new(),
                };
                if self.flags.edit_collapsible {
                    self.expanded = ui.collapsing(&label, self.expanded);
                    if !self.expanded {
                        return (false, value.clone());
                    }
                }
                ui.push_id(&label);
                let mut changed = false;
                let mut out = Vec::with_capacity(items.len());
                for (h, item) in handles.iter_mut().zip(items.iter()) {
                    let (c, v) = h.edit_value(ui, item);
                    changed |= c;
                    out.push(v);
                }
                ui.pop_id();
                (changed, Value::Tuple(out))
            }
            HandleKind::Deferred(d) => match d.force_mut() {
                Ok(h) => h.edit_value(ui, value),
                Err(e) => {
                    ui.error_text(&e.to_string());
                    (false, value.clone())
                }
            },
        }
    }

    pub fn present_value(&mut self, ui: &mut dyn Ui, value: &Value) {
        if let Some(cb) = &self.callbacks.present {
            cb(ui, value);
            return;
        }
        let label = self.label.clone();
        let summary = self.present_str_of(value);
        match (&mut self.kind, value) {
            (HandleKind::Record { fields, .. }, Value::Record(map)) => {
                if self.flags.present_collapsible {
                    self.expanded = ui.collapsing(&label, self.expanded);
                    if !self.expanded {
                        ui.text(&summary);
                        return;
                    }
                }
                ui.push_id(&label);
                for field in fields.iter_mut() {
                    if let Some(v) = map.get(&field.desc.name) {
                        field.handle.present_value(ui, v);
                    }
                }
                ui.pop_id();
            }
            (HandleKind::List(item), Value::List(items)) => {
                ui.text(&summary);
                self.expanded = ui.collapsing("details", self.expanded && !items.is_empty());
                if self.expanded {
                    ui.push_id(&label);
                    for (idx, v) in items.iter().enumerate() {
                        ui.push_id(&idx.to_string());
                        item.present_value(ui, v);
                        ui.pop_id();
                    }
                    ui.pop_id();
                }
            }
            (HandleKind::Optional(inner), Value::Optional(Some(v))) => inner.present_value(ui, v),
            (HandleKind::Variant(variants), Value::Variant { tag, value }) => {
                ui.text(&format!("{label}: {tag}"));
                if let Some((_, h)) = variants.iter_mut().find(|(t, _)| t == tag) {
                    h.present_value(ui, value);
                }
            }
            (HandleKind::Tuple(handles), Value::Tuple(items)) => {
                ui.push_id(&label);
                for (h, v) in handles.iter_mut().zip(items) {
                    h.present_value(ui, v);
                }
                ui.pop_id();
            }
            (HandleKind::Deferred(d), v) => match d.force_mut() {
                Ok(h) => h.present_value(ui, v),
                Err(e) => ui.error_text(&e.to_string()),
            },
            _ => ui.text(&format!("{label}: {summary}")),
        }
    }

    pub fn present_str_of(&self, value: &Value) -> String {
        if let Some(cb) = &self.callbacks.present_str {
            return cb(value);
        }
        match (&self.kind, value) {
            (HandleKind::Record { name, fields }, Value::Record(map)) => {
                let parts: Vec<String> = fields
                    .iter()
                    .filter_map(|f| {
                        let v = map.get(&f.desc.name)?;
                        Some(format!("{}={}", f.desc.name, f.handle.present_str_of(v)))
                    })
                    .collect();
                format!("{name}({})", parts.join(", "))
            }
            (HandleKind::Optional(inner), Value::Optional(Some(v))) => inner.present_str_of(v),
            (HandleKind::List(item), Value::List(items)) => {
                let mut lines = vec![format!("List of {} elements", items.len())];
                for (idx, v) in items.iter().take(LIST_SUMMARY_MAX_ITEMS).enumerate() {
                    lines.push(format!("{idx:02}: {}", item.present_str_of(v)));
                }
                if items.len() > LIST_SUMMARY_MAX_ITEMS {
                    lines.push("...".to_string());
                }
                lines.join("\n")
            }
            (HandleKind::Variant(variants), Value::Variant { tag, value }) => {
                match variants.iter().find(|(t, _)| t == tag) {
                    Some((_, h)) => format!("{tag}: {}", h.present_str_of(value)),
                    None => describe_value(value),
                }
            }
            (HandleKind::Tuple(handles), Value::Tuple(items)) => {
                let parts: Vec<String> = handles
                    .iter()
                    .zip(items)
                    .map(|(h, v)| h.present_str_of(v))
                    .collect();
                format!("({})", parts.join(", "))
            }
            (HandleKind::Deferred(d), v) => match d.force() {
                Ok(h) => h.present_str_of(v),
                Err(_) => describe_value(v),
            },
            (_, v) => describe_value(v),
        }
    }

    // --- Persistence ---

    /// Envelope-dict of the current value. An Invalid pin saves its last
    /// valid value.
    pub fn save_to_dict(&self) -> FiatResult<JsonValue> {
        match &self.value {
            Envelope::Unspecified => Ok(json::unspecified_dict()),
            Envelope::Error => Ok(json::error_dict()),
            Envelope::Invalid {
                last_valid: None, ..
            } => Ok(json::unspecified_dict()),
            Envelope::Invalid {
                last_valid: Some(v),
                ..
            }
            | Envelope::Concrete(v) => self.save_value(v),
        }
    }

    /// Restore the envelope from a dict. Validators do not run on load.
    pub fn load_from_dict(&mut self, dict: &JsonValue) -> FiatResult<()> {
        let envelope = match json::tag_of(dict)? {
            EnvelopeTag::Unspecified => Envelope::Unspecified,
            EnvelopeTag::Error => Envelope::Error,
            _ => Envelope::Concrete(self.load_value(dict)?),
        };
        self.set_envelope(envelope);
        Ok(())
    }

    pub fn save_value(&self, value: &Value) -> FiatResult<JsonValue> {
        if let Some(cb) = &self.callbacks.save_to_dict {
            return cb(value);
        }
        let shape_error = || {
            FiatError::PersistFailure(format!(
                "{} handle cannot save a {} value",
                self.kind.name(),
                value.kind()
            ))
        };
        match (&self.kind, value) {
            (HandleKind::Record { fields, .. }, Value::Record(map)) => {
                let mut out = IndexMap::new();
                for field in fields {
                    let v = map.get(&field.desc.name).ok_or_else(shape_error)?;
                    out.insert(field.desc.name.clone(), field.handle.save_value(v)?);
                }
                Ok(json::record_dict(out))
            }
            (HandleKind::Record { .. }, _) => Err(shape_error()),
            (HandleKind::Optional(_), Value::Optional(None)) => Ok(json::optional_dict(None)),
            (HandleKind::Optional(inner), Value::Optional(Some(v))) => {
                Ok(json::optional_dict(Some(inner.save_value(v)?)))
            }
            (HandleKind::List(item), Value::List(items)) => items
                .iter()
                .map(|v| item.save_value(v))
                .collect::<FiatResult<Vec<_>>>()
                .map(json::list_dict),
            (HandleKind::Variant(variants), Value::Variant { tag, value }) => {
                let (_, h) = variants
                    .iter()
                    .find(|(t, _)| t == tag)
                    .ok_or_else(shape_error)?;
                Ok(json::variant_dict(tag, h.save_value(value)?))
            }
            (HandleKind::Tuple(handles), Value::Tuple(items)) if handles.len() == items.len() => {
                handles
                    .iter()
                    .zip(items)
                    .map(|(h, v)| h.save_value(v))
                    .collect::<FiatResult<Vec<_>>>()
                    .map(json::tuple_dict)
            }
            (HandleKind::Deferred(d), v) => d.force().map_err(Clone::clone)?.save_value(v),
            (HandleKind::Optional(_) | HandleKind::List(_), _)
            | (HandleKind::Variant(_) | HandleKind::Tuple(_), _) => Err(shape_error()),
            (_, v) => Ok(json::encode_value(&self.ty, v)?),
        }
    }

    pub fn load_value(&self, dict: &JsonValue) -> FiatResult<Value> {
        if let Some(cb) = &self.callbacks.load_from_dict {
            return cb(dict);
        }
        let tag = json::tag_of(dict)?;
        let malformed = |reason: &str| {
            FiatError::PersistFailure(format!(
                "cannot load {} from {tag:?} dict: {reason}",
                self.ty
            ))
        };
        match &self.kind {
            HandleKind::Record { name, fields } => {
                if tag.is_legacy() {
                    let ty = TypeDesc::Record {
                        name: name.clone(),
                        fields: fields.iter().map(|f| f.desc.clone()).collect(),
                    };
                    return Ok(json::decode_value(&ty, dict)?);
                }
                if tag != EnvelopeTag::Record {
                    return Err(malformed("expected a Record dict"));
                }
                let saved = dict
                    .get("value")
                    .and_then(JsonValue::as_object)
                    .ok_or_else(|| malformed("value must be an object"))?;
                let mut map = IndexMap::new();
                for field in fields {
                    let v = match (saved.get(&field.desc.name), &field.desc.default) {
                        (Some(d), _) => field.handle.load_value(d)?,
                        (None, Some(default)) => default.clone(),
                        (None, None) => {
                            return Err(malformed(&format!("missing field {}", field.desc.name)))
                        }
                    };
                    map.insert(field.desc.name.clone(), v);
                }
                Ok(Value::Record(map))
            }
            HandleKind::Optional(inner) => {
                if tag != EnvelopeTag::Optional {
                    return Err(malformed("expected an Optional dict"));
                }
                match dict.get("value") {
                    None | Some(JsonValue::Null) => Ok(Value::none()),
                    Some(d) => Ok(Value::some(inner.load_value(d)?)),
                }
            }
            HandleKind::List(item) => {
                if tag != EnvelopeTag::List {
                    return Err(malformed("expected a List dict"));
                }
                dict.get("value")
                    .and_then(JsonValue::as_array)
                    .ok_or_else(|| malformed("value must be an array"))?
                    .iter()
                    .map(|d| item.load_value(d))
                    .collect::<FiatResult<Vec<_>>>()
                    .map(Value::List)
            }
            HandleKind::Variant(variants) => {
                if tag != EnvelopeTag::Variant {
                    return Err(malformed("expected a Variant dict"));
                }
                let vtag = dict
                    .get("tag")
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| malformed("tag must be a string"))?;
                let (_, h) = variants
                    .iter()
                    .find(|(t, _)| t == vtag)
                    .ok_or_else(|| malformed(&format!("unknown variant {vtag}")))?;
                let inner = dict.get("value").ok_or_else(|| malformed("missing value"))?;
                Ok(Value::variant(vtag, h.load_value(inner)?))
            }
            HandleKind::Tuple(handles) => {
                if tag != EnvelopeTag::Tuple {
                    return Err(malformed("expected a Tuple dict"));
                }
                let items = dict
                    .get("values")
                    .and_then(JsonValue::as_array)
                    .filter(|items| items.len() == handles.len())
                    .ok_or_else(|| malformed("values must match the tuple arity"))?;
                handles
                    .iter()
                    .zip(items)
                    .map(|(h, d)| h.load_value(d))
                    .collect::<FiatResult<Vec<_>>>()
                    .map(Value::Tuple)
            }
            HandleKind::Deferred(d) => d.force().map_err(Clone::clone)?.load_value(dict),
            _ => Ok(json::decode_value(&self.ty, dict)?),
        }
    }

    pub fn save_view_options(&self) -> JsonValue {
        if let Some(cb) = &self.callbacks.save_view_options {
            return cb();
        }
        let mut obj = Map::new();
        obj.insert("expanded".into(), json!(self.expanded));
        match &self.kind {
            HandleKind::Record { fields, .. } => {
                let nested: Map<String, JsonValue> = fields
                    .iter()
                    .map(|f| (f.desc.name.clone(), f.handle.save_view_options()))
                    .collect();
                obj.insert("fields".into(), JsonValue::Object(nested));
            }
            HandleKind::Optional(inner) | HandleKind::List(inner) => {
                obj.insert("inner".into(), inner.save_view_options());
            }
            HandleKind::Variant(variants) => {
                let nested: Map<String, JsonValue> = variants
                    .iter()
                    .map(|(t, h)| (t.clone(), h.save_view_options()))
                    .collect();
                obj.insert("variants".into(), JsonValue::Object(nested));
            }
            HandleKind::Tuple(handles) => {
                let nested: Vec<JsonValue> =
                    handles.iter().map(Handle::save_view_options).collect();
                obj.insert("items".into(), JsonValue::Array(nested));
            }
            HandleKind::Deferred(d) => {
                if let Some(h) = d.built() {
                    obj.insert("inner".into(), h.save_view_options());
                }
            }
            _ => {}
        }
        JsonValue::Object(obj)
    }

    pub fn load_view_options(&mut self, options: &JsonValue) {
        if let Some(cb) = self.callbacks.load_view_options.as_mut() {
            cb(options);
            return;
        }
        if let Some(expanded) = options.get("expanded").and_then(JsonValue::as_bool) {
            self.expanded = expanded;
        }
        match &mut self.kind {
            HandleKind::Record { fields, .. } => {
                if let Some(nested) = options.get("fields") {
                    for f in fields.iter_mut() {
                        if let Some(opts) = nested.get(&f.desc.name) {
                            f.handle.load_view_options(opts);
                        }
                    }
                }
            }
            HandleKind::Optional(inner) | HandleKind::List(inner) => {
                if let Some(opts) = options.get("inner") {
                    inner.load_view_options(opts);
                }
            }
            HandleKind::Variant(variants) => {
                if let Some(nested) = options.get("variants") {
                    for (tag, h) in variants.iter_mut() {
                        if let Some(opts) = nested.get(tag.as_str()) {
                            h.load_view_options(opts);
                        }
                    }
                }
            }
            HandleKind::Tuple(handles) => {
                if let Some(nested) = options.get("items").and_then(JsonValue::as_array) {
                    for (h, opts) in handles.iter_mut().zip(nested) {
                        h.load_view_options(opts);
                    }
                }
            }
            HandleKind::Deferred(d) => {
                if let (Some(opts), Ok(h)) = (options.get("inner"), d.force_mut()) {
                    h.load_view_options(opts);
                }
            }
            _ => {}
        }
    }

    // --- Lifecycle ---

    /// Returns `true` when the handle wants the value redrawn.
    pub fn on_heartbeat(&mut self) -> bool {
        let mut needs_refresh = match self.callbacks.on_heartbeat.as_mut() {
            Some(cb) => cb(),
            None => false,
        };
        for child in self.children_mut() {
            needs_refresh |= child.on_heartbeat();
        }
        needs_refresh
    }

    pub fn on_exit(&mut self) {
        if let Some(cb) = self.callbacks.on_exit.as_mut() {
            cb();
        }
        for child in self.children_mut() {
            child.on_exit();
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Handle> {
        match &mut self.kind {
            HandleKind::Record { fields, .. } => fields.iter_mut().map(|f| &mut f.handle).collect(),
            HandleKind::Optional(inner) | HandleKind::List(inner) => vec![inner.as_mut()],
            HandleKind::Variant(variants) => variants.iter_mut().map(|(_, h)| h).collect(),
            HandleKind::Tuple(handles) => handles.iter_mut().collect(),
            HandleKind::Deferred(d) => d.built_mut().into_iter().collect(),
            _ => Vec::new(),
        }
    }

    // --- Attributes ---

    /// Attributes of this handle's own kind, without the common ones.
    pub fn possible_attrs(&self) -> Vec<PossibleAttr> {
        match &self.kind {
            HandleKind::Int(_) => IntParams::possible_attrs(),
            HandleKind::Float(_) => FloatParams::possible_attrs(),
            HandleKind::Bool(_) => BoolParams::possible_attrs(),
            HandleKind::Str(_) => StrParams::possible_attrs(),
            HandleKind::Custom {
                possible: Some(possible),
            } => possible.clone(),
            _ => Vec::new(),
        }
    }

    /// Check and attach attributes, routing `<element>__<key>` keys to
    /// sub-handles. Unknown or mistyped keys fail with `CompileFailure`.
    pub fn apply_attributes(&mut self, attrs: &FiatAttributes) -> FiatResult<()> {
        let target = self.ty.type_name();
        let checked = match &mut self.kind {
            HandleKind::Optional(inner) | HandleKind::List(inner) => {
                let mut forwarded = FiatAttributes::new();
                for (key, value) in attrs.iter() {
                    if key != "label" && key != "tooltip" {
                        forwarded.insert(key, value.clone());
                    }
                }
                inner.apply_attributes(&forwarded)?;
                let mut own = FiatAttributes::new();
                for key in ["label", "tooltip"] {
                    if let Some(v) = attrs.get(key) {
                        own.insert(key, v.clone());
                    }
                }
                own.validate_own(&[], &target)?
            }
            HandleKind::Custom { possible: None } => attrs.clone(),
            HandleKind::Deferred(d) => {
                d.attrs = attrs.merged_over(&d.attrs);
                attrs.own()
            }
            _ => {
                let possible = self.possible_attrs();
                let checked = attrs.validate_own(&possible, &target)?;
                self.route_attributes(&checked, &target)?;
                checked
            }
        };

        match &mut self.kind {
            HandleKind::Int(p) => p.apply(&checked),
            HandleKind::Float(p) => p.apply(&checked),
            HandleKind::Bool(p) => p.apply(&checked),
            HandleKind::Str(p) => p.apply(&checked),
            _ => {}
        }
        if let Some(label) = checked.get_str("label") {
            self.set_label(label.to_string());
        }
        if let Some(tooltip) = checked.get_str("tooltip") {
            self.tooltip = Some(tooltip.to_string());
        }
        let forwards = matches!(
            self.kind,
            HandleKind::Optional(_) | HandleKind::List(_) | HandleKind::Deferred(_)
        );
        if let (Some(AttrValue::Validator(v)), false) = (checked.get("validate_value"), forwards) {
            self.validators.push(v.clone());
        }
        if let Some(cb) = self.callbacks.on_fiat_attributes_changed.as_mut() {
            cb(&checked);
        }
        self.attrs = checked;
        Ok(())
    }

    fn route_attributes(&mut self, attrs: &FiatAttributes, target: &str) -> FiatResult<()> {
        let routes = attrs.route_targets();
        if routes.is_empty() {
            return Ok(());
        }
        let unknown = |route: &str, what: &str| {
            FiatError::CompileFailure(format!(
                "{target} has no {what} `{route}` (attribute `{route}__...`)"
            ))
        };
        match &mut self.kind {
            HandleKind::Record { fields, .. } => {
                for route in &routes {
                    let field = fields
                        .iter_mut()
                        .find(|f| &f.desc.name == route)
                        .ok_or_else(|| unknown(route, "field"))?;
                    field.handle.apply_attributes(&attrs.routed_to(route))?;
                }
            }
            HandleKind::Variant(variants) => {
                for route in &routes {
                    let (_, h) = variants
                        .iter_mut()
                        .find(|(t, _)| t == route)
                        .ok_or_else(|| unknown(route, "variant"))?;
                    h.apply_attributes(&attrs.routed_to(route))?;
                }
            }
            HandleKind::Tuple(handles) => {
                for route in &routes {
                    let idx = route
                        .parse::<usize>()
                        .ok()
                        .filter(|idx| *idx < handles.len())
                        .ok_or_else(|| unknown(route, "element"))?;
                    handles[idx].apply_attributes(&attrs.routed_to(route))?;
                }
            }
            _ => return Err(unknown(&routes[0], "sub-element")),
        }
        Ok(())
    }
}

/// Format `v` with `digits` significant digits, trimming trailing zeros.
pub fn format_significant(v: f64, digits: i32) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    if !v.is_finite() {
        return v.to_string();
    }
    let exponent = v.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= digits {
        let precision = (digits - 1).max(0) as usize;
        let s = format!("{v:.precision$e}");
        return match s.split_once('e') {
            Some((mantissa, exp)) if mantissa.contains('.') => {
                let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
                format!("{mantissa}e{exp}")
            }
            _ => s,
        };
    }
    let decimals = (digits - 1 - exponent).max(0) as usize;
    let s = format!("{v:.decimals$}");
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

/// Handle-independent text of a value.
pub fn describe_value(value: &Value) -> String {
    match value {
        Value::Int(v) => v.to_string(),
        Value::Float(v) => format_significant(*v, 4),
        Value::Bool(v) => v.to_string(),
        Value::Str(v) => v.clone(),
        Value::Enum { member, .. } => member.clone(),
        Value::Record(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{k}={}", describe_value(v)))
                .collect();
            format!("({})", parts.join(", "))
        }
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(describe_value).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Optional(None) => "None".to_string(),
        Value::Optional(Some(v)) => describe_value(v),
        Value::Variant { tag, value } => format!("{tag}: {}", describe_value(value)),
        Value::Tuple(items) => {
            let parts: Vec<String> = items.iter().map(describe_value).collect();
            format!("({})", parts.join(", "))
        }
        Value::Opaque(o) => format!("<{}>", o.type_name),
    }
}

#[cfg(test)]
#[path = "handle_tests.rs"]
mod tests;
