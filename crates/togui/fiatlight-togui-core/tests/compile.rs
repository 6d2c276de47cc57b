use fiatlight_api_core::{fiat_enum, fiat_record, EnvelopeState, FiatError, FiatType, TypeDesc, Value};
use fiatlight_togui::{
    EditOutcome, FiatAttributes, FunctionDescriptor, FunctionGui, HandleKind, InvokePolicy,
    Readiness, Registry, RunConfig, ScriptedAction, ScriptedUi, Validator,
};

fiat_enum! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum Shape {
        Circle,
        Square,
    }
}

fiat_record! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct Brush {
        pub shape: Shape,
        pub size: f64 = 2.0,
        pub label: Option<String>,
    }
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_fiat_type::<Shape>().expect("enum");
    registry.register_fiat_type::<Brush>().expect("record");
    registry
}

fn area_fn() -> FunctionDescriptor {
    FunctionDescriptor::typed("area", &["brush", "scale"], |brush: Brush, scale: f64| -> anyhow::Result<f64> {
        let side = brush.size * scale;
        Ok(match brush.shape {
            Shape::Circle => std::f64::consts::PI * side * side / 4.0,
            Shape::Square => side * side,
        })
    })
    .with_param_default("scale", Value::Float(1.0))
    .with_doc("Area covered by one stroke.")
}

// --- Compilation ---

#[test]
fn it_should_compile_a_record_parameter_into_field_editors() {
    let gui = FunctionGui::compile(&area_fn(), &registry(), &FiatAttributes::new(), &RunConfig::default())
        .expect("compile");
    assert_eq!(gui.inputs().len(), 2);
    assert_eq!(gui.doc(), Some("Area covered by one stroke."));

    let brush = &gui.inputs()[0].handle;
    assert_eq!(brush.label(), "brush");
    let HandleKind::Record { fields, .. } = brush.kind() else {
        panic!("expected a record handle, got {}", brush.kind().name());
    };
    let names: Vec<&str> = fields.iter().map(|f| f.desc.name.as_str()).collect();
    assert_eq!(names, ["shape", "size", "label"]);
    assert_eq!(fields[0].handle.kind().name(), "enum");
    assert_eq!(fields[2].handle.kind().name(), "optional");
}

#[test]
fn it_should_route_nested_attributes_through_the_record() {
    let attrs = FiatAttributes::new()
        .param("brush", "size__range", (0.5, 8.0))
        .param("scale", "edit_type", "knob")
        .function("invoke_async", true);
    let gui = FunctionGui::compile(&area_fn(), &registry(), &attrs, &RunConfig::default())
        .expect("compile");
    assert_eq!(gui.policy(), InvokePolicy::Async);

    let HandleKind::Record { fields, .. } = gui.inputs()[0].handle.kind() else {
        panic!("expected record");
    };
    let HandleKind::Float(params) = fields[1].handle.kind() else {
        panic!("expected float field");
    };
    assert_eq!(params.range, (0.5, 8.0));
}

#[test]
fn it_should_name_the_full_path_of_an_unsupported_type() {
    let descriptor = FunctionDescriptor::new("paint", |_| Ok(Value::none())).param(
        fiatlight_togui::ParamDesc::new(
            "layers",
            TypeDesc::list(TypeDesc::named("Layer")),
        ),
    );
    let err = FunctionGui::compile(&descriptor, &registry(), &FiatAttributes::new(), &RunConfig::default())
        .unwrap_err();
    let msg = err.to_string();
    assert!(matches!(err, FiatError::CompileFailure(_)));
    assert!(msg.contains("parameter `layers` of `paint` → List[Layer] → Layer"), "{msg}");
}

// --- Editing and invocation ---

#[test]
fn it_should_edit_then_call_with_typed_arguments() {
    let mut gui = FunctionGui::compile(&area_fn(), &registry(), &FiatAttributes::new(), &RunConfig::default())
        .expect("compile");
    assert!(matches!(gui.readiness(None), Readiness::Blocked(EnvelopeState::Unspecified)));

    let mut ui = ScriptedUi::new();
    ui.script("brush/set", ScriptedAction::Click);
    let input = gui.input_mut("brush").expect("brush");
    assert_eq!(input.handle.edit(&mut ui), EditOutcome::Changed);

    ui.script("brush/shape", ScriptedAction::Choose(1));
    ui.script("brush/size", ScriptedAction::SetFloat(3.0));
    let input = gui.input_mut("brush").expect("brush");
    assert_eq!(input.handle.edit(&mut ui), EditOutcome::Changed);

    let Readiness::Ready(args) = gui.readiness(None) else {
        panic!("expected ready");
    };
    let brush: Brush = args.typed("brush").expect("typed brush");
    assert_eq!(brush.shape, Shape::Square);
    assert_eq!(brush.size, 3.0);

    let result = (gui.callable())(&args).expect("call");
    assert_eq!(result, Value::Float(9.0));
    gui.publish(result).expect("publish");
    assert_eq!(gui.outputs()[0].handle.present_str(), "9");
}

#[test]
fn it_should_surface_callable_errors() {
    let failing = FunctionDescriptor::typed("fail", &["x"], |x: i64| -> anyhow::Result<i64> {
        anyhow::ensure!(x >= 0, "negative input {x}");
        Ok(x)
    });
    let mut gui = FunctionGui::compile(&failing, &Registry::new(), &FiatAttributes::new(), &RunConfig::default())
        .expect("compile");
    gui.input_mut("x")
        .expect("x")
        .handle
        .set_value(Value::Int(-1))
        .expect("set");
    let Readiness::Ready(args) = gui.readiness(None) else {
        panic!("expected ready");
    };
    let err = (gui.callable())(&args).unwrap_err();
    assert_eq!(err.to_string(), "negative input -1");
}

#[test]
fn it_should_keep_validated_values_and_reject_the_rest() {
    let attrs = FiatAttributes::new().param(
        "scale",
        "validate_value",
        Validator::typed("positive", |v: f64| {
            if v > 0.0 {
                Ok(v)
            } else {
                Err("scale must be positive".to_string())
            }
        }),
    );
    let mut gui = FunctionGui::compile(&area_fn(), &registry(), &attrs, &RunConfig::default())
        .expect("compile");
    let scale = gui.input_mut("scale").expect("scale");
    let err = scale.handle.set_value(Value::Float(-1.0)).unwrap_err();
    assert_eq!(err, FiatError::BadInput("scale must be positive".into()));
    assert!(scale.handle.value().is_invalid());

    let brush = Brush {
        shape: Shape::Circle,
        size: 2.0,
        label: None,
    };
    gui.input_mut("brush")
        .expect("brush")
        .handle
        .set_value(brush.to_value())
        .expect("set");
    assert!(matches!(gui.readiness(None), Readiness::Blocked(EnvelopeState::Unspecified)));
}

#[test]
fn it_should_persist_inputs_through_envelope_dicts() {
    let mut gui = FunctionGui::compile(&area_fn(), &registry(), &FiatAttributes::new(), &RunConfig::default())
        .expect("compile");
    let brush = Brush {
        shape: Shape::Square,
        size: 1.25,
        label: Some("fine".into()),
    };
    let input = gui.input_mut("brush").expect("brush");
    input.handle.set_value(brush.to_value()).expect("set");
    let saved = input.handle.save_to_dict().expect("save");
    assert_eq!(saved["value"]["shape"]["value_name"], "Square");

    let mut other = FunctionGui::compile(&area_fn(), &registry(), &FiatAttributes::new(), &RunConfig::default())
        .expect("compile");
    let input = other.input_mut("brush").expect("brush");
    input.handle.load_from_dict(&saved).expect("load");
    let restored = input.handle.value().as_concrete().expect("concrete");
    assert_eq!(Brush::from_value(restored).expect("brush"), brush);
}
