//! Type-to-handle registry.
//!
//! The registry is an explicit context object: callers own it, clone it
//! cheaply and pass it to the signature compiler. Lookup dispatches in a
//! fixed order: exact registration, optional, list, tagged union, enum,
//! record, alias fallback, then failure with the full path of the type.

use fiatlight_api_core::{FiatError, FiatResult, FiatType, TypeDesc};
use hashbrown::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::attributes::FiatAttributes;
use crate::handle::{Deferred, Handle, HandleKind, RecordField};
use crate::params::{BoolParams, FloatParams, IntParams, StrParams};

pub type HandleFactory = Arc<dyn Fn(&FiatAttributes) -> FiatResult<Handle> + Send + Sync>;

#[derive(Clone, Debug)]
struct RegisteredRecord {
    ty: TypeDesc,
    field_attrs: FiatAttributes,
}

#[derive(Clone, Default)]
pub struct Registry {
    factories: HashMap<String, HandleFactory>,
    enums: HashMap<String, TypeDesc>,
    records: HashMap<String, RegisteredRecord>,
    type_attrs: HashMap<String, FiatAttributes>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut factories: Vec<&String> = self.factories.keys().collect();
        factories.sort();
        let mut enums: Vec<&String> = self.enums.keys().collect();
        enums.sort();
        let mut records: Vec<&String> = self.records.keys().collect();
        records.sort();
        f.debug_struct("Registry")
            .field("factories", &factories)
            .field("enums", &enums)
            .field("records", &records)
            .finish()
    }
}

/// Where the dispatcher currently is: a readable path for diagnostics and
/// the named types under construction, for recursion.
#[derive(Default)]
struct Trail {
    path: Vec<String>,
    building: Vec<String>,
}

impl Trail {
    fn describe(&self) -> String {
        self.path.join(" → ")
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Register a factory for the exact type `ty` (matched by type name).
    pub fn register(
        &mut self,
        ty: &TypeDesc,
        factory: impl Fn(&FiatAttributes) -> FiatResult<Handle> + Send + Sync + 'static,
    ) {
        let name = ty.type_name();
        if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
            log::debug!("replacing handle factory for {name}");
        }
    }

    pub fn register_enum(&mut self, ty: TypeDesc) -> FiatResult<()> {
        match &ty {
            TypeDesc::Enum { name, members } => {
                if members.is_empty() {
                    return Err(FiatError::CompileFailure(format!("enum {name} has no members")));
                }
                self.enums.insert(name.clone(), ty.clone());
                Ok(())
            }
            other => Err(FiatError::CompileFailure(format!(
                "register_enum expects an enum, got {other}"
            ))),
        }
    }

    /// Register a record with default per-field attributes
    /// (`<field>__<key>`).
    pub fn register_record(&mut self, ty: TypeDesc, field_attrs: FiatAttributes) -> FiatResult<()> {
        let TypeDesc::Record { name, fields } = &ty else {
            return Err(FiatError::CompileFailure(format!(
                "register_record expects a record, got {ty}"
            )));
        };
        if let Some(own) = field_attrs.own().iter().next() {
            return Err(FiatError::CompileFailure(format!(
                "field attributes of {name} must be routed as <field>__<key>, got `{}`",
                own.0
            )));
        }
        for target in field_attrs.route_targets() {
            if !fields.iter().any(|f| f.name == target) {
                return Err(FiatError::CompileFailure(format!(
                    "record {name} has no field `{target}`"
                )));
            }
        }
        self.records.insert(
            name.clone(),
            RegisteredRecord {
                ty: ty.clone(),
                field_attrs,
            },
        );
        Ok(())
    }

    /// Register the enum or record behind a Rust type.
    pub fn register_fiat_type<T: FiatType>(&mut self) -> FiatResult<()> {
        match T::type_desc() {
            ty @ TypeDesc::Enum { .. } => self.register_enum(ty),
            ty @ TypeDesc::Record { .. } => self.register_record(ty, FiatAttributes::new()),
            other => Err(FiatError::CompileFailure(format!(
                "only enums and records can be registered, got {other}"
            ))),
        }
    }

    /// Default attributes for every use of the named type; per-use
    /// attributes win.
    pub fn register_type_attrs(&mut self, type_name: impl Into<String>, attrs: FiatAttributes) {
        let type_name = type_name.into();
        let merged = match self.type_attrs.get(&type_name) {
            Some(existing) => attrs.merged_over(existing),
            None => attrs,
        };
        self.type_attrs.insert(type_name, merged);
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
            || self.enums.contains_key(type_name)
            || self.records.contains_key(type_name)
    }

    /// Type token for a registered name, as used by textual signatures.
    pub fn type_by_name(&self, type_name: &str) -> Option<TypeDesc> {
        if let Some(ty) = self.enums.get(type_name) {
            return Some(ty.clone());
        }
        if let Some(rec) = self.records.get(type_name) {
            return Some(rec.ty.clone());
        }
        self.factories
            .contains_key(type_name)
            .then(|| TypeDesc::named(type_name))
    }

    pub fn lookup(&self, ty: &TypeDesc, attrs: &FiatAttributes) -> FiatResult<Handle> {
        self.build(ty, attrs, &mut Trail::default())
    }

    /// Lookup with a leading path segment such as ``parameter `x` of `f` ``.
    pub fn lookup_in(
        &self,
        ty: &TypeDesc,
        attrs: &FiatAttributes,
        context: impl Into<String>,
    ) -> FiatResult<Handle> {
        let mut trail = Trail {
            path: vec![context.into()],
            building: Vec::new(),
        };
        self.build(ty, attrs, &mut trail)
    }

    fn build(
        &self,
        ty: &TypeDesc,
        attrs: &FiatAttributes,
        trail: &mut Trail,
    ) -> FiatResult<Handle> {
        let name = ty.type_name();
        let attrs = match self.type_attrs.get(&name) {
            Some(defaults) => attrs.merged_over(defaults),
            None => attrs.clone(),
        };
        let is_named = matches!(ty, TypeDesc::Named { .. } | TypeDesc::Record { .. });
        if is_named && trail.building.contains(&name) {
            log::debug!("{name} is recursive, deferring its handle");
            let deferred = Deferred::new(self.clone(), ty.clone(), attrs);
            return Ok(Handle::new(ty.clone(), HandleKind::Deferred(Box::new(deferred))));
        }

        trail.path.push(name.clone());
        let built = self.dispatch(ty, &name, &attrs, trail);
        let result = built.and_then(|mut handle| {
            handle
                .apply_attributes(&attrs)
                .map_err(|e| at_path(e, trail))?;
            Ok(handle)
        });
        trail.path.pop();
        result
    }

    fn dispatch(
        &self,
        ty: &TypeDesc,
        name: &str,
        attrs: &FiatAttributes,
        trail: &mut Trail,
    ) -> FiatResult<Handle> {
        if let Some(factory) = self.factories.get(name) {
            return factory(attrs);
        }
        match ty {
            TypeDesc::Int => return Ok(Handle::new(ty.clone(), HandleKind::Int(IntParams::default()))),
            TypeDesc::Float => {
                return Ok(Handle::new(ty.clone(), HandleKind::Float(FloatParams::default())))
            }
            TypeDesc::Bool => {
                return Ok(Handle::new(ty.clone(), HandleKind::Bool(BoolParams::default())))
            }
            TypeDesc::Str => {
                return Ok(Handle::new(ty.clone(), HandleKind::Str(StrParams::default())))
            }
            _ => {}
        }
        if let Some(TypeDesc::Enum { name, members }) = self.enums.get(name) {
            return Ok(enum_handle(ty, name, members));
        }
        if let Some(rec) = self.records.get(name) {
            if let TypeDesc::Record { name, fields } = &rec.ty {
                let mut handle = self.build_record(ty, name, fields, trail)?;
                handle
                    .apply_attributes(&rec.field_attrs)
                    .map_err(|e| at_path(e, trail))?;
                return Ok(handle);
            }
        }

        match ty {
            TypeDesc::Optional(inner) => {
                let inner = self.build(inner, &FiatAttributes::new(), trail)?;
                Ok(Handle::new(ty.clone(), HandleKind::Optional(Box::new(inner))))
            }
            TypeDesc::List(item) => {
                let item = self.build(item, &FiatAttributes::new(), trail)?;
                Ok(Handle::new(ty.clone(), HandleKind::List(Box::new(item))))
            }
            TypeDesc::Union(variants) => {
                let mut handles = Vec::with_capacity(variants.len());
                for (tag, vty) in variants {
                    trail.path.push(format!("variant `{tag}`"));
                    let built = self.build(vty, &FiatAttributes::new(), trail);
                    trail.path.pop();
                    handles.push((tag.clone(), built?.with_label(tag.clone())));
                }
                Ok(Handle::new(ty.clone(), HandleKind::Variant(handles)))
            }
            TypeDesc::Tuple(items) => {
                let mut handles = Vec::with_capacity(items.len());
                for (idx, ity) in items.iter().enumerate() {
                    trail.path.push(format!("element {idx}"));
                    let built = self.build(ity, &FiatAttributes::new(), trail);
                    trail.path.pop();
                    handles.push(built?.with_label(idx.to_string()));
                }
                Ok(Handle::new(ty.clone(), HandleKind::Tuple(handles)))
            }
            TypeDesc::Enum { name, members } => Ok(enum_handle(ty, name, members)),
            TypeDesc::Record { name, fields } => self.build_record(ty, name, fields, trail),
            TypeDesc::Named {
                base: Some(base), ..
            } => {
                let mut handle = self.build(base, &FiatAttributes::new(), trail)?;
                handle.set_ty(ty.clone());
                Ok(handle)
            }
            _ => Err(FiatError::CompileFailure(format!(
                "no gui handle registered for `{name}` ({})",
                trail.describe()
            ))),
        }
    }

    fn build_record(
        &self,
        ty: &TypeDesc,
        name: &str,
        fields: &[fiatlight_api_core::FieldDesc],
        trail: &mut Trail,
    ) -> FiatResult<Handle> {
        trail.building.push(name.to_string());
        let mut built = Vec::with_capacity(fields.len());
        let mut failure = None;
        for field in fields {
            trail.path.push(format!("field `{}`", field.name));
            let handle = self.build(&field.ty, &FiatAttributes::new(), trail);
            trail.path.pop();
            match handle {
                Ok(handle) => built.push(RecordField {
                    desc: field.clone(),
                    handle: handle.with_label(field.name.clone()),
                }),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        trail.building.pop();
        match failure {
            Some(e) => Err(e),
            None => Ok(Handle::new(
                ty.clone(),
                HandleKind::Record {
                    name: name.to_string(),
                    fields: built,
                },
            )),
        }
    }
}

fn enum_handle(ty: &TypeDesc, name: &str, members: &[String]) -> Handle {
    Handle::new(
        ty.clone(),
        HandleKind::Enum {
            name: name.to_string(),
            members: members.to_vec(),
        },
    )
}

fn at_path(e: FiatError, trail: &Trail) -> FiatError {
    match e {
        FiatError::CompileFailure(msg) => {
            FiatError::CompileFailure(format!("{msg} ({})", trail.describe()))
        }
        other => other,
    }
}
