//! Function descriptors and their compiled GUI form.
//!
//! A [`FunctionDescriptor`] is the static shape of a user function: ordered
//! parameters, return type and a type-erased callable. [`FunctionGui::compile`]
//! turns it into one input handle per parameter and one output handle per
//! returned value.

use fiatlight_api_core::{
    Envelope, EnvelopeState, FiatError, FiatResult, FiatType, TypeDesc, Value,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::attributes::{output_prefix, parse_output_prefix, AttrType, FiatAttributes, PossibleAttr};
use crate::config::RunConfig;
use crate::gui_node::InternalGui;
use crate::handle::Handle;
use crate::ui::Ui;
use crate::registry::Registry;
use crate::signature;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    PositionalOnly,
    #[default]
    PositionalOrKeyword,
    KeywordOnly,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamDesc {
    pub name: String,
    pub kind: ParamKind,
    pub ty: TypeDesc,
    pub default: Option<Value>,
}

impl ParamDesc {
    pub fn new(name: impl Into<String>, ty: TypeDesc) -> Self {
        ParamDesc {
            name: name.into(),
            kind: ParamKind::default(),
            ty,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_kind(mut self, kind: ParamKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Cooperative stop request shared between the frame loop and one running
/// invocation.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        StopFlag::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Arguments of one invocation. Positional-only parameters are passed
/// positionally, every other parameter by keyword.
#[derive(Clone, Debug, Default)]
pub struct CallArgs {
    positional: Vec<(String, Value)>,
    keyword: IndexMap<String, Value>,
    order: Vec<String>,
    stop: Option<StopFlag>,
}

impl CallArgs {
    pub fn new() -> Self {
        CallArgs::default()
    }

    pub fn push_positional(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.order.push(name.clone());
        self.positional.push((name, value));
    }

    pub fn push_keyword(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.order.push(name.clone());
        self.keyword.insert(name, value);
    }

    pub fn with_stop_flag(mut self, flag: StopFlag) -> Self {
        self.stop = Some(flag);
        self
    }

    pub fn positional(&self) -> impl Iterator<Item = &Value> {
        self.positional.iter().map(|(_, v)| v)
    }

    pub fn keyword(&self) -> &IndexMap<String, Value> {
        &self.keyword
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.keyword.get(name).or_else(|| {
            self.positional
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v)
        })
    }

    /// Argument `idx` in declaration order.
    pub fn arg(&self, idx: usize) -> Option<&Value> {
        self.order.get(idx).and_then(|name| self.get(name))
    }

    pub fn typed<T: FiatType>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("missing argument `{name}`"))?;
        Ok(T::from_value(value)?)
    }

    /// Whether a stoppable invocation was asked to stop.
    pub fn shall_stop(&self) -> bool {
        self.stop.as_ref().is_some_and(StopFlag::is_stop_requested)
    }

    pub fn stop_flag(&self) -> Option<&StopFlag> {
        self.stop.as_ref()
    }
}

pub type Callable = Arc<dyn Fn(&CallArgs) -> anyhow::Result<Value> + Send + Sync>;

/// Rust closures whose parameter and return types are all [`FiatType`]s.
pub trait TypedCallable<Args>: Send + Sync + 'static {
    fn param_types() -> Vec<TypeDesc>;
    fn return_type() -> TypeDesc;
    fn call_typed(&self, args: &CallArgs) -> anyhow::Result<Value>;
}

macro_rules! typed_callable {
    ($($arg:ident : $idx:tt),*) => {
        impl<F, R, $($arg,)*> TypedCallable<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> anyhow::Result<R> + Send + Sync + 'static,
            R: FiatType,
            $($arg: FiatType,)*
        {
            fn param_types() -> Vec<TypeDesc> {
                vec![$($arg::type_desc()),*]
            }

            fn return_type() -> TypeDesc {
                R::type_desc()
            }

            #[allow(unused_variables)]
            fn call_typed(&self, args: &CallArgs) -> anyhow::Result<Value> {
                let out = (self)($({
                    let value = args
                        .arg($idx)
                        .ok_or_else(|| anyhow::anyhow!("missing argument {}", $idx))?;
                    $arg::from_value(value)?
                }),*)?;
                Ok(out.to_value())
            }
        }
    };
}

typed_callable!();
typed_callable!(A: 0);
typed_callable!(A: 0, B: 1);
typed_callable!(A: 0, B: 1, C: 2);
typed_callable!(A: 0, B: 1, C: 2, D: 3);

/// Static description of a user function.
#[derive(Clone)]
pub struct FunctionDescriptor {
    pub name: String,
    pub params: Vec<ParamDesc>,
    pub return_type: TypeDesc,
    pub callable: Callable,
    pub doc: Option<String>,
    pub source: Option<String>,
    /// Textual signature that replaces `params` and `return_type` when
    /// compiled.
    pub signature_override: Option<String>,
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("return_type", &self.return_type.type_name())
            .field("signature_override", &self.signature_override)
            .finish()
    }
}

impl FunctionDescriptor {
    pub fn new(
        name: impl Into<String>,
        callable: impl Fn(&CallArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        FunctionDescriptor {
            name: name.into(),
            params: Vec::new(),
            return_type: TypeDesc::Unit,
            callable: Arc::new(callable),
            doc: None,
            source: None,
            signature_override: None,
        }
    }

    /// Descriptor for a typed closure; parameter names are taken from
    /// `names` in order.
    pub fn typed<Args, F>(name: impl Into<String>, names: &[&str], f: F) -> Self
    where
        F: TypedCallable<Args>,
    {
        let name = name.into();
        let types = F::param_types();
        if names.len() != types.len() {
            log::warn!(
                "`{name}` takes {} parameters but {} names were given",
                types.len(),
                names.len()
            );
        }
        let params = types
            .into_iter()
            .enumerate()
            .map(|(idx, ty)| {
                let pname = names
                    .get(idx)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("arg_{idx}"));
                ParamDesc::new(pname, ty)
            })
            .collect();
        let f = Arc::new(f);
        FunctionDescriptor {
            name,
            params,
            return_type: F::return_type(),
            callable: Arc::new(move |args: &CallArgs| f.call_typed(args)),
            doc: None,
            source: None,
            signature_override: None,
        }
    }

    pub fn param(mut self, param: ParamDesc) -> Self {
        self.params.push(param);
        self
    }

    pub fn returns(mut self, ty: TypeDesc) -> Self {
        self.return_type = ty;
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature_override = Some(signature.into());
        self
    }

    /// Set the default of parameter `name`.
    pub fn with_param_default(mut self, name: &str, default: Value) -> Self {
        match self.params.iter_mut().find(|p| p.name == name) {
            Some(p) => p.default = Some(default),
            None => log::warn!("`{}` has no parameter `{name}`", self.name),
        }
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokePolicy {
    #[default]
    Auto,
    Manual,
    AlwaysDirty,
    /// Manual and always dirty: IO functions (a sensor, a random source)
    /// whose result may change without any input changing. Runs on request
    /// only, without the refresh-needed marker.
    ManualIo,
    Async,
    AsyncStoppable,
}

impl InvokePolicy {
    pub fn is_async(self) -> bool {
        matches!(self, InvokePolicy::Async | InvokePolicy::AsyncStoppable)
    }

    /// Runs only on an explicit trigger.
    pub fn is_manual(self) -> bool {
        matches!(self, InvokePolicy::Manual | InvokePolicy::ManualIo)
    }

    /// Dirtied again after every heartbeat.
    pub fn is_always_dirty(self) -> bool {
        matches!(self, InvokePolicy::AlwaysDirty | InvokePolicy::ManualIo)
    }

    fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "invoke_async" => Some(InvokePolicy::Async),
            "invoke_async_stoppable" => Some(InvokePolicy::AsyncStoppable),
            "invoke_manually" => Some(InvokePolicy::Manual),
            "invoke_always_dirty" => Some(InvokePolicy::AlwaysDirty),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionOptions {
    pub policy: InvokePolicy,
    pub doc_display: bool,
    pub doc_markdown: bool,
    pub doc_user: Option<String>,
    pub doc_show_source: bool,
    pub label: Option<String>,
}

impl Default for FunctionOptions {
    fn default() -> Self {
        FunctionOptions {
            policy: InvokePolicy::Auto,
            doc_display: false,
            doc_markdown: true,
            doc_user: None,
            doc_show_source: false,
            label: None,
        }
    }
}

fn function_attrs() -> Vec<PossibleAttr> {
    vec![
        PossibleAttr::new("invoke_async", AttrType::Bool, "run on a worker thread"),
        PossibleAttr::new(
            "invoke_async_stoppable",
            AttrType::Bool,
            "run on a worker thread with a stop button",
        ),
        PossibleAttr::new("invoke_manually", AttrType::Bool, "only run on explicit request"),
        PossibleAttr::new("invoke_always_dirty", AttrType::Bool, "run again on every frame"),
        PossibleAttr::new("doc_display", AttrType::Bool, "show the documentation"),
        PossibleAttr::new("doc_markdown", AttrType::Bool, "render the documentation as markdown")
            .with_default(true),
        PossibleAttr::new("doc_user", AttrType::Str, "documentation shown instead of the doc"),
        PossibleAttr::new("doc_show_source", AttrType::Bool, "show the function source"),
        PossibleAttr::new("label", AttrType::Str, "node title"),
    ]
}

fn is_manual_io_pair(a: &str, b: &str) -> bool {
    matches!(
        (a, b),
        ("invoke_manually", "invoke_always_dirty") | ("invoke_always_dirty", "invoke_manually")
    )
}

fn options_from(attrs: &FiatAttributes, name: &str) -> FiatResult<FunctionOptions> {
    let own = attrs.own().validate_keys(&function_attrs(), &format!("function `{name}`"))?;
    let flags: Vec<&str> = own
        .iter()
        .filter(|(key, value)| key.starts_with("invoke_") && value.as_bool() == Some(true))
        .map(|(key, _)| key)
        .collect();
    let policy = match flags.as_slice() {
        [] => InvokePolicy::default(),
        [flag] => InvokePolicy::from_flag(flag).unwrap_or_default(),
        [a, b] if is_manual_io_pair(a, b) => InvokePolicy::ManualIo,
        _ => {
            return Err(FiatError::CompileFailure(format!(
                "function `{name}` sets several invoke policies: {}",
                flags.join(", ")
            )))
        }
    };
    let defaults = FunctionOptions::default();
    Ok(FunctionOptions {
        policy,
        doc_display: own.get_bool("doc_display").unwrap_or(defaults.doc_display),
        doc_markdown: own.get_bool("doc_markdown").unwrap_or(defaults.doc_markdown),
        doc_user: own.get_str("doc_user").map(str::to_string),
        doc_show_source: own.get_bool("doc_show_source").unwrap_or(defaults.doc_show_source),
        label: own.get_str("label").map(str::to_string),
    })
}

#[derive(Debug)]
pub struct InputParam {
    pub name: String,
    pub kind: ParamKind,
    pub default: Option<Value>,
    pub handle: Handle,
}

#[derive(Debug)]
pub struct OutputPin {
    pub label: String,
    pub handle: Handle,
}

/// Whether the inputs allow an invocation.
#[derive(Debug)]
pub enum Readiness {
    Ready(CallArgs),
    /// The outputs take this state and the callable is not called.
    Blocked(EnvelopeState),
}

/// A compiled function: input and output handles around a callable.
pub struct FunctionGui {
    name: String,
    inputs: Vec<InputParam>,
    outputs: Vec<OutputPin>,
    return_type: TypeDesc,
    callable: Callable,
    doc: Option<String>,
    source: Option<String>,
    options: FunctionOptions,
    internal_gui: Option<Box<dyn InternalGui>>,
}

impl fmt::Debug for FunctionGui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionGui")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("options", &self.options)
            .field("internal_gui", &self.internal_gui.is_some())
            .finish()
    }
}

impl FunctionGui {
    /// A node with no pins whose body is `gui`. Its function does nothing
    /// and returns unit.
    pub fn gui_only(
        name: impl Into<String>,
        label: Option<String>,
        gui: impl InternalGui + 'static,
    ) -> Self {
        FunctionGui {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            return_type: TypeDesc::Unit,
            callable: Arc::new(|_: &CallArgs| -> anyhow::Result<Value> { Ok(Value::none()) }),
            doc: None,
            source: None,
            options: FunctionOptions {
                label,
                ..FunctionOptions::default()
            },
            internal_gui: Some(Box::new(gui)),
        }
    }

    pub fn compile(
        descriptor: &FunctionDescriptor,
        registry: &Registry,
        attrs: &FiatAttributes,
        config: &RunConfig,
    ) -> FiatResult<Self> {
        let name = descriptor.name.clone();
        let (params, return_type) = match &descriptor.signature_override {
            Some(_) if config.disable_type_eval => {
                return Err(FiatError::CompileFailure(format!(
                    "function `{name}` has a textual signature but type evaluation is disabled"
                )))
            }
            Some(text) => {
                let parsed = signature::parse_signature(text, registry)?;
                (parsed.params, parsed.return_type)
            }
            None => (descriptor.params.clone(), descriptor.return_type.clone()),
        };

        let output_types: Vec<TypeDesc> = match return_type.resolve_alias() {
            TypeDesc::Unit => Vec::new(),
            TypeDesc::Tuple(items) => items.clone(),
            _ => vec![return_type.clone()],
        };
        for route in attrs.route_targets() {
            if params.iter().any(|p| p.name == route) {
                continue;
            }
            match parse_output_prefix(&route) {
                Some(_) if output_types.is_empty() => {
                    return Err(FiatError::CompileFailure(format!(
                        "function `{name}` returns nothing but has attribute `{route}__...`"
                    )))
                }
                Some(idx) if idx < output_types.len() => {}
                Some(idx) => {
                    return Err(FiatError::CompileFailure(format!(
                        "function `{name}` has no output {idx} (attribute `{route}__...`)"
                    )))
                }
                None => {
                    return Err(FiatError::CompileFailure(format!(
                        "function `{name}` has no parameter `{route}` (attribute `{route}__...`)"
                    )))
                }
            }
        }
        let options = options_from(attrs, &name)?;

        let mut inputs = Vec::with_capacity(params.len());
        for p in params {
            if let Some(default) = &p.default {
                p.ty.check(default).map_err(|e| {
                    FiatError::CompileFailure(format!(
                        "default of parameter `{}` of `{name}`: {e}",
                        p.name
                    ))
                })?;
            }
            let param_attrs = attrs.routed_to(&p.name);
            let mut handle = registry.lookup_in(
                &p.ty,
                &param_attrs,
                format!("parameter `{}` of `{name}`", p.name),
            )?;
            if !handle.attrs().contains("label") {
                handle.set_label(p.name.clone());
            }
            if let (Some(default), None) = (&p.default, &handle.callbacks.default_value) {
                let default = default.clone();
                handle.callbacks.default_value = Some(Box::new(move || default.clone()));
            }
            inputs.push(InputParam {
                name: p.name,
                kind: p.kind,
                default: p.default,
                handle,
            });
        }

        let count = output_types.len();
        let mut outputs = Vec::with_capacity(count);
        for (idx, ty) in output_types.iter().enumerate() {
            let label = if count == 1 {
                "Output".to_string()
            } else {
                format!("Output {}", idx + 1)
            };
            let out_attrs = attrs.routed_to(&output_prefix(idx));
            let mut handle =
                registry.lookup_in(ty, &out_attrs, format!("output {idx} of `{name}`"))?;
            if !handle.attrs().contains("label") {
                handle.set_label(label.clone());
            }
            outputs.push(OutputPin { label, handle });
        }

        log::debug!(
            "compiled `{name}`: {} inputs, {} outputs, {:?}",
            inputs.len(),
            outputs.len(),
            options.policy
        );
        Ok(FunctionGui {
            name,
            inputs,
            outputs,
            return_type,
            callable: Arc::clone(&descriptor.callable),
            doc: descriptor.doc.clone(),
            source: descriptor.source.clone(),
            options,
            internal_gui: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Node title: the `label` attribute, or the function name.
    pub fn label(&self) -> &str {
        self.options.label.as_deref().unwrap_or(&self.name)
    }

    pub fn options(&self) -> &FunctionOptions {
        &self.options
    }

    pub fn policy(&self) -> InvokePolicy {
        self.options.policy
    }

    /// Replace the policy chosen by attributes.
    pub fn set_policy(&mut self, policy: InvokePolicy) {
        self.options.policy = policy;
    }

    /// Draw extra widgets inside the node, after its inputs.
    pub fn set_internal_gui(&mut self, gui: impl InternalGui + 'static) {
        self.internal_gui = Some(Box::new(gui));
    }

    pub fn has_internal_gui(&self) -> bool {
        self.internal_gui.is_some()
    }

    /// Returns `true` when the user changed the internal state.
    pub fn draw_internal_gui(&mut self, ui: &mut dyn Ui) -> bool {
        match self.internal_gui.as_mut() {
            Some(gui) => gui.draw(ui),
            None => false,
        }
    }

    pub fn save_internal_gui_state(&self) -> FiatResult<Option<JsonValue>> {
        match &self.internal_gui {
            Some(gui) => gui.save_state(),
            None => Ok(None),
        }
    }

    pub fn load_internal_gui_state(&mut self, state: &JsonValue) -> FiatResult<()> {
        match self.internal_gui.as_mut() {
            Some(gui) => gui.load_state(state),
            None => {
                log::warn!("`{}` has no internal gui, saved gui state ignored", self.name);
                Ok(())
            }
        }
    }

    /// Documentation shown on the node, if any.
    pub fn doc(&self) -> Option<&str> {
        self.options.doc_user.as_deref().or(self.doc.as_deref())
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn return_type(&self) -> &TypeDesc {
        &self.return_type
    }

    pub fn callable(&self) -> Callable {
        Arc::clone(&self.callable)
    }

    pub fn inputs(&self) -> &[InputParam] {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut [InputParam] {
        &mut self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&InputParam> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn input_mut(&mut self, name: &str) -> Option<&mut InputParam> {
        self.inputs.iter_mut().find(|p| p.name == name)
    }

    pub fn outputs(&self) -> &[OutputPin] {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut [OutputPin] {
        &mut self.outputs
    }

    pub fn output(&self, idx: usize) -> Option<&OutputPin> {
        self.outputs.get(idx)
    }

    /// Gather arguments. An Unspecified input with a static default uses the
    /// default. Any other Unspecified or Invalid input blocks with
    /// Unspecified; otherwise any Error input blocks with Error.
    pub fn readiness(&self, stop: Option<StopFlag>) -> Readiness {
        let mut args = CallArgs::new();
        let mut unspecified = false;
        let mut error = false;
        for input in &self.inputs {
            let value = match input.handle.value() {
                Envelope::Concrete(v) => Some(v.clone()),
                Envelope::Unspecified => input.default.clone(),
                Envelope::Invalid { .. } => None,
                Envelope::Error => {
                    error = true;
                    continue;
                }
            };
            match (value, input.kind) {
                (None, _) => unspecified = true,
                (Some(v), ParamKind::PositionalOnly) => args.push_positional(&input.name, v),
                (Some(v), _) => args.push_keyword(&input.name, v),
            }
        }
        if unspecified {
            Readiness::Blocked(EnvelopeState::Unspecified)
        } else if error {
            Readiness::Blocked(EnvelopeState::Error)
        } else {
            Readiness::Ready(match stop {
                Some(flag) => args.with_stop_flag(flag),
                None => args,
            })
        }
    }

    /// Check a returned value against the declared return type.
    pub fn check_return(&self, value: &Value) -> FiatResult<()> {
        if matches!(self.return_type.resolve_alias(), TypeDesc::Unit) {
            return Ok(());
        }
        if value.is_none() && !self.return_type.can_be_none() {
            return Err(FiatError::TypeMismatch(format!(
                "`{}` returned None, which is not allowed for {}",
                self.name, self.return_type
            )));
        }
        self.return_type.check(value).map_err(|e| {
            FiatError::TypeMismatch(format!("`{}` returned a bad value: {e}", self.name))
        })
    }

    /// Type-check `value` and write it to the outputs, splitting tuples.
    pub fn publish(&mut self, value: Value) -> FiatResult<()> {
        self.check_return(&value)?;
        match (self.outputs.len(), value) {
            (0, _) => {}
            (1, v) if !matches!(self.return_type.resolve_alias(), TypeDesc::Tuple(_)) => {
                self.outputs[0].handle.set_envelope(Envelope::Concrete(v))
            }
            (_, Value::Tuple(items)) => {
                for (out, item) in self.outputs.iter_mut().zip(items) {
                    out.handle.set_envelope(Envelope::Concrete(item));
                }
            }
            (_, other) => {
                return Err(FiatError::TypeMismatch(format!(
                    "`{}` returned a {} where a tuple was expected",
                    self.name,
                    other.kind()
                )))
            }
        }
        Ok(())
    }

    /// Put every output in a non-concrete state.
    pub fn set_outputs_state(&mut self, state: EnvelopeState) {
        for out in &mut self.outputs {
            let envelope = match state {
                EnvelopeState::Error => Envelope::Error,
                _ => Envelope::Unspecified,
            };
            out.handle.set_envelope(envelope);
        }
    }

    pub fn on_heartbeat(&mut self) -> bool {
        let mut refresh = false;
        for input in &mut self.inputs {
            refresh |= input.handle.on_heartbeat();
        }
        for out in &mut self.outputs {
            refresh |= out.handle.on_heartbeat();
        }
        refresh
    }

    pub fn on_exit(&mut self) {
        for input in &mut self.inputs {
            input.handle.on_exit();
        }
        for out in &mut self.outputs {
            out.handle.on_exit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Validator;

    fn compile(descriptor: &FunctionDescriptor, attrs: FiatAttributes) -> FiatResult<FunctionGui> {
        FunctionGui::compile(descriptor, &Registry::new(), &attrs, &RunConfig::default())
    }

    fn add() -> FunctionDescriptor {
        FunctionDescriptor::typed("add", &["a", "b"], |a: i64, b: i64| -> anyhow::Result<i64> {
            Ok(a + b)
        })
    }

    #[test]
    fn typed_descriptor_derives_types() {
        let d = add();
        assert_eq!(d.params.len(), 2);
        assert_eq!(d.params[1].name, "b");
        assert_eq!(d.params[0].ty, TypeDesc::Int);
        assert_eq!(d.return_type, TypeDesc::Int);

        let mut args = CallArgs::new();
        args.push_keyword("a", Value::Int(2));
        args.push_keyword("b", Value::Int(3));
        assert_eq!((d.callable)(&args).expect("call"), Value::Int(5));
    }

    #[test]
    fn missing_names_are_generated() {
        let d = FunctionDescriptor::typed("f", &[], |x: f64| -> anyhow::Result<f64> { Ok(x) });
        assert_eq!(d.params[0].name, "arg_0");
    }

    #[test]
    fn outputs_follow_the_return_type() {
        let gui = compile(&add(), FiatAttributes::new()).expect("compile");
        assert_eq!(gui.outputs().len(), 1);
        assert_eq!(gui.outputs()[0].label, "Output");
        assert_eq!(gui.inputs()[0].handle.label(), "a");

        let split = FunctionDescriptor::typed("split", &["x"], |x: f64| -> anyhow::Result<(i64, f64)> {
            Ok((x.trunc() as i64, x.fract()))
        });
        let gui = compile(&split, FiatAttributes::new()).expect("compile");
        let labels: Vec<&str> = gui.outputs().iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, ["Output 1", "Output 2"]);

        let sink = FunctionDescriptor::typed("sink", &["x"], |_x: i64| -> anyhow::Result<()> { Ok(()) });
        let gui = compile(&sink, FiatAttributes::new()).expect("compile");
        assert!(gui.outputs().is_empty());
    }

    #[test]
    fn attributes_route_to_params_and_outputs() {
        let attrs = FiatAttributes::new()
            .param("a", "range", (0_i64, 10_i64))
            .output(0, "label", "sum")
            .function("invoke_manually", true);
        let gui = compile(&add(), attrs).expect("compile");
        assert_eq!(gui.policy(), InvokePolicy::Manual);
        assert_eq!(gui.outputs()[0].handle.label(), "sum");
        let crate::handle::HandleKind::Int(params) = gui.inputs()[0].handle.kind() else {
            panic!("expected int");
        };
        assert_eq!(params.range, (0, 10));
    }

    #[test]
    fn manual_and_always_dirty_combine_into_manual_io() {
        let attrs = FiatAttributes::new()
            .function("invoke_always_dirty", true)
            .function("invoke_manually", true);
        let gui = compile(&add(), attrs).expect("compile");
        assert_eq!(gui.policy(), InvokePolicy::ManualIo);
        assert!(gui.policy().is_manual());
        assert!(gui.policy().is_always_dirty());
        assert!(!gui.policy().is_async());

        let off = FiatAttributes::new()
            .function("invoke_manually", true)
            .function("invoke_always_dirty", false);
        assert_eq!(compile(&add(), off).expect("compile").policy(), InvokePolicy::Manual);
    }

    #[test]
    fn bad_attributes_fail_compilation() {
        let unknown_param = compile(&add(), FiatAttributes::new().param("c", "range", (0_i64, 1_i64)));
        assert!(matches!(unknown_param, Err(FiatError::CompileFailure(_))));

        let sink = FunctionDescriptor::typed("sink", &["x"], |_x: i64| -> anyhow::Result<()> { Ok(()) });
        let no_output = compile(&sink, FiatAttributes::new().output(0, "label", "x"));
        assert!(matches!(no_output, Err(FiatError::CompileFailure(_))));

        let two_policies = compile(
            &add(),
            FiatAttributes::new()
                .function("invoke_async", true)
                .function("invoke_manually", true),
        );
        assert!(matches!(two_policies, Err(FiatError::CompileFailure(_))));

        let three_policies = compile(
            &add(),
            FiatAttributes::new()
                .function("invoke_manually", true)
                .function("invoke_always_dirty", true)
                .function("invoke_async", true),
        );
        assert!(matches!(three_policies, Err(FiatError::CompileFailure(_))));

        let unknown_key = compile(&add(), FiatAttributes::new().function("colour", "red"));
        assert!(matches!(unknown_key, Err(FiatError::CompileFailure(_))));
    }

    #[test]
    fn readiness_respects_defaults_and_states() {
        let d = add().with_param_default("b", Value::Int(10));
        let mut gui = compile(&d, FiatAttributes::new()).expect("compile");
        assert!(matches!(gui.readiness(None), Readiness::Blocked(EnvelopeState::Unspecified)));

        gui.input_mut("a").expect("a").handle.set_value(Value::Int(1)).expect("set");
        let Readiness::Ready(args) = gui.readiness(None) else {
            panic!("expected ready");
        };
        assert_eq!(args.get("b"), Some(&Value::Int(10)));

        gui.input_mut("b").expect("b").handle.set_envelope(Envelope::Error);
        assert!(matches!(gui.readiness(None), Readiness::Blocked(EnvelopeState::Error)));

        gui.input_mut("a").expect("a").handle.set_envelope(Envelope::Unspecified);
        assert!(matches!(gui.readiness(None), Readiness::Blocked(EnvelopeState::Unspecified)));
    }

    #[test]
    fn invalid_inputs_block_like_unspecified() {
        let attrs = FiatAttributes::new().param(
            "a",
            "validate_value",
            Validator::typed("small", |v: i64| if v < 5 { Ok(v) } else { Err("too big".into()) }),
        );
        let mut gui = compile(&add(), attrs).expect("compile");
        let input = gui.input_mut("a").expect("a");
        assert!(input.handle.set_value(Value::Int(9)).is_err());
        gui.input_mut("b").expect("b").handle.set_value(Value::Int(1)).expect("set");
        assert!(matches!(gui.readiness(None), Readiness::Blocked(EnvelopeState::Unspecified)));
    }

    #[test]
    fn positional_only_params_are_passed_positionally() {
        let d = FunctionDescriptor::new("f", |args: &CallArgs| {
            Ok(Value::Int(args.positional().count() as i64 * 10 + args.keyword().len() as i64))
        })
        .param(ParamDesc::new("a", TypeDesc::Int).with_kind(ParamKind::PositionalOnly))
        .param(ParamDesc::new("b", TypeDesc::Int).with_kind(ParamKind::KeywordOnly))
        .returns(TypeDesc::Int);
        let mut gui = compile(&d, FiatAttributes::new()).expect("compile");
        for input in gui.inputs_mut() {
            input.handle.set_value(Value::Int(1)).expect("set");
        }
        let Readiness::Ready(args) = gui.readiness(None) else {
            panic!("expected ready");
        };
        assert_eq!((gui.callable())(&args).expect("call"), Value::Int(11));
    }

    #[test]
    fn publish_checks_and_splits_returns() {
        let split = FunctionDescriptor::typed("split", &["x"], |x: f64| -> anyhow::Result<(i64, f64)> {
            Ok((x as i64, x))
        });
        let mut gui = compile(&split, FiatAttributes::new()).expect("compile");
        gui.publish(Value::Tuple(vec![Value::Int(1), Value::Float(1.5)]))
            .expect("publish");
        assert_eq!(gui.outputs()[1].handle.value().as_concrete(), Some(&Value::Float(1.5)));

        let err = gui.publish(Value::none()).unwrap_err();
        assert!(err.to_string().contains("returned None"), "{err}");

        gui.set_outputs_state(EnvelopeState::Error);
        assert!(gui.outputs()[0].handle.value().is_error());
    }

    #[test]
    fn textual_signatures_can_be_refused() {
        let d = FunctionDescriptor::new("f", |_: &CallArgs| Ok(Value::Int(0)))
            .with_signature("(x: int) -> int");
        let config = RunConfig {
            disable_type_eval: true,
            ..RunConfig::default()
        };
        let err = FunctionGui::compile(&d, &Registry::new(), &FiatAttributes::new(), &config)
            .unwrap_err();
        assert!(matches!(err, FiatError::CompileFailure(_)));

        let gui = compile(&d, FiatAttributes::new()).expect("compile");
        assert_eq!(gui.inputs()[0].name, "x");
        assert_eq!(gui.return_type(), &TypeDesc::Int);
    }

    #[test]
    fn stop_flag_reaches_the_arguments() {
        let flag = StopFlag::new();
        let args = CallArgs::new().with_stop_flag(flag.clone());
        assert!(!args.shall_stop());
        flag.request_stop();
        assert!(args.shall_stop());
    }

    #[test]
    fn gui_only_functions_have_no_pins() {
        let mut gui = FunctionGui::gui_only("note", None, crate::MarkdownGui::new("hi"));
        assert!(gui.inputs().is_empty() && gui.outputs().is_empty());
        assert_eq!(gui.label(), "note");
        assert!(gui.has_internal_gui());
        let Readiness::Ready(args) = gui.readiness(None) else {
            panic!("a pinless function is always ready");
        };
        let value = (gui.callable())(&args).expect("call");
        gui.publish(value).expect("unit result publishes");

        let mut ui = crate::ScriptedUi::new();
        assert!(!gui.draw_internal_gui(&mut ui));
        assert!(ui.saw("markdown[20] hi"));
        let saved = gui.save_internal_gui_state().unwrap().expect("markdown saves state");
        assert_eq!(saved["md_string"], "hi");
    }

    #[test]
    fn compiled_functions_may_carry_an_internal_gui() {
        let mut gui = compile(&add(), FiatAttributes::new()).expect("compile");
        assert!(!gui.has_internal_gui());
        assert!(gui.save_internal_gui_state().unwrap().is_none());
        gui.set_internal_gui(crate::StatefulGui::new(0_i64, |clicks: &mut i64, ui: &mut dyn Ui| {
            let clicked = ui.button("more");
            *clicks += i64::from(clicked);
            clicked
        }));
        let mut ui = crate::ScriptedUi::new();
        ui.script("more", crate::ScriptedAction::Click);
        assert!(gui.draw_internal_gui(&mut ui));
        assert_eq!(gui.save_internal_gui_state().unwrap(), Some(serde_json::json!(1)));
        gui.load_internal_gui_state(&serde_json::json!(7)).expect("load");
        assert_eq!(gui.save_internal_gui_state().unwrap(), Some(serde_json::json!(7)));
    }
}
