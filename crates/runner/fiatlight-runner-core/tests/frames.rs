use fiatlight_api_core::{Envelope, ErrorKind, FiatError, TypeDesc, Value};
use fiatlight_graph::FunctionGraph;
use fiatlight_runner::{discover_run_config, PinRef, RunMode, Runner};
use fiatlight_test_fixtures::run_configs;
use fiatlight_togui::params::IntParams;
use fiatlight_togui::{
    CallArgs, FiatAttributes, FunctionDescriptor, FunctionGui, MarkdownGui, ParamDesc, Registry,
    RunConfig, ScriptedAction, ScriptedUi, StatefulGui, Ui, RUN_CONFIG_FILE,
};
use std::time::Duration;

fn add_one() -> FunctionDescriptor {
    FunctionDescriptor::typed("add_one", &["x"], |x: i64| -> anyhow::Result<i64> {
        anyhow::ensure!(x >= 0, "negative input {x}");
        Ok(x + 1)
    })
}

fn double() -> FunctionDescriptor {
    FunctionDescriptor::typed("double", &["x"], |x: i64| -> anyhow::Result<i64> { Ok(x * 2) })
}

fn compile(descriptor: &FunctionDescriptor, attrs: FiatAttributes, config: &RunConfig) -> FunctionGui {
    FunctionGui::compile(descriptor, &Registry::new(), &attrs, config).expect("compile")
}

fn graph_with(config: RunConfig, nodes: Vec<(FunctionDescriptor, FiatAttributes)>) -> FunctionGraph {
    let mut graph = FunctionGraph::new(config.clone());
    for (descriptor, attrs) in nodes {
        graph.add_function(compile(&descriptor, attrs, &config));
    }
    graph
}

fn single(descriptor: FunctionDescriptor, attrs: FiatAttributes) -> Runner {
    Runner::notebook(graph_with(RunConfig::default(), vec![(descriptor, attrs)]))
}

fn output(runner: &Runner, node: &str) -> Envelope<Value> {
    runner
        .graph
        .node(node)
        .and_then(|n| n.output_envelope(0))
        .cloned()
        .expect("output")
}

fn position(ui: &ScriptedUi, needle: &str) -> usize {
    ui.transcript()
        .iter()
        .position(|line| line.contains(needle))
        .unwrap_or_else(|| panic!("{needle:?} not drawn in {:#?}", ui.transcript()))
}

// --- Frame phases ---------------------------------------------------------

#[test]
fn it_should_edit_invoke_and_present_within_one_frame() {
    let mut runner = single(add_one(), FiatAttributes::new());
    runner.graph.set_input("add_one", "x", Value::Int(1)).expect("set");
    let mut ui = ScriptedUi::new();
    ui.script("add_one/x", ScriptedAction::SetInt(4));

    let report = runner.run_frame(&mut ui).expect("frame");
    assert_eq!(report.frame, 1);
    assert_eq!(report.edited, 1);
    assert_eq!(report.invoked, 1);
    assert!(report.needs_refresh);
    assert!(report.timings_ms.contains_key("total_ms"));
    assert!(position(&ui, "int add_one/x = 4") < position(&ui, "text Output: 5"));

    let idle = runner.run_frame(&mut ui).expect("frame");
    assert_eq!(idle.invoked, 0);
    assert!(!idle.needs_refresh);
}

#[test]
fn it_should_present_linked_inputs_instead_of_editing_them() {
    let mut graph = graph_with(
        RunConfig::default(),
        vec![
            (add_one(), FiatAttributes::new()),
            (double(), FiatAttributes::new()),
        ],
    );
    graph.add_link("add_one", 0, "double", "x").expect("link");
    graph.set_input("add_one", "x", Value::Int(2)).expect("set");
    let mut runner = Runner::notebook(graph);
    let mut ui = ScriptedUi::new();
    ui.script("double/x", ScriptedAction::SetInt(100));

    runner.run_frame(&mut ui).expect("frame");
    runner.run_frame(&mut ui).expect("frame");
    assert!(ui.saw("text x: 3"));
    assert_eq!(ui.pending_actions(), 1);
    assert_eq!(output(&runner, "double"), Envelope::Concrete(Value::Int(6)));
}

#[test]
fn it_should_run_manual_nodes_from_the_invoke_button() {
    let attrs = FiatAttributes::new().function("invoke_manually", true);
    let mut runner = single(add_one(), attrs);
    runner.graph.set_input("add_one", "x", Value::Int(1)).expect("set");
    let mut ui = ScriptedUi::new();

    let report = runner.run_frame(&mut ui).expect("frame");
    assert!(ui.saw("text (refresh needed)"));
    assert!(report.refresh_needed_label);
    assert_eq!(output(&runner, "add_one"), Envelope::Unspecified);

    ui.script("add_one/Invoke", ScriptedAction::Click);
    let report = runner.run_frame(&mut ui).expect("frame");
    assert_eq!(report.invoked, 1);
    assert!(!report.refresh_needed_label);
    assert_eq!(output(&runner, "add_one"), Envelope::Concrete(Value::Int(2)));
}

#[test]
fn it_should_show_the_exception_with_a_collapsible_traceback() {
    let mut runner = single(add_one(), FiatAttributes::new());
    runner.graph.set_input("add_one", "x", Value::Int(-4)).expect("set");
    let mut ui = ScriptedUi::new();

    runner.run_frame(&mut ui).expect("caught");
    assert!(ui.saw("error Exception (RuntimeFailure): negative input -4"));
    assert!(ui.saw("collapsing add_one/Traceback open=false"));

    ui.script("add_one/Traceback", ScriptedAction::Toggle(true));
    ui.take_transcript();
    runner.run_frame(&mut ui).expect("frame");
    assert!(ui.saw("collapsing add_one/Traceback open=true"));
    assert!(runner.shells.get("add_one").is_some_and(|s| s.traceback_open));
}

#[test]
fn it_should_fail_the_frame_when_exceptions_are_not_caught() {
    let config = RunConfig {
        catch_function_exceptions: false,
        ..RunConfig::default()
    };
    let mut graph = graph_with(config, vec![(add_one(), FiatAttributes::new())]);
    graph.set_input("add_one", "x", Value::Int(-1)).expect("set");
    let mut runner = Runner::notebook(graph);

    let err = runner.run_frame(&mut ScriptedUi::new()).unwrap_err();
    let fiat = err.downcast_ref::<FiatError>().expect("fiat error");
    assert_eq!(fiat.kind(), ErrorKind::RuntimeFailure);
    assert!(format!("{err:#}").contains("invocation phase of frame 1"));
}

#[test]
fn it_should_copy_outputs_to_the_clipboard() {
    let mut runner = single(add_one(), FiatAttributes::new());
    runner.graph.set_input("add_one", "x", Value::Int(2)).expect("set");
    let mut ui = ScriptedUi::new();
    ui.script("add_one/Copy Output", ScriptedAction::Click);
    runner.run_frame(&mut ui).expect("frame");
    assert_eq!(ui.clipboard(), Some("3"));
}

// --- Gui nodes ------------------------------------------------------------

/// add_one plus a counter node edited through its own gui.
fn with_counter(count: i64) -> FunctionGraph {
    let mut graph = graph_with(RunConfig::default(), vec![(add_one(), FiatAttributes::new())]);
    graph.add_gui_node(
        "counter",
        StatefulGui::new(count, |n: &mut i64, ui: &mut dyn Ui| {
            ui.edit_int("n", &IntParams::default(), n)
        }),
        Some("Counter"),
    );
    graph
}

fn counter_state(runner: &Runner) -> Option<serde_json::Value> {
    runner
        .graph
        .node("counter")
        .and_then(|n| n.gui().save_internal_gui_state().expect("save"))
}

#[test]
fn it_should_draw_markdown_nodes_under_their_label() {
    let mut graph = graph_with(RunConfig::default(), vec![(add_one(), FiatAttributes::new())]);
    let mut md = MarkdownGui::new("\n    # Usage\n    type a number\n");
    md.text_width_em = 30.0;
    graph.add_markdown_node(md, None);
    let mut runner = Runner::notebook(graph);
    let mut ui = ScriptedUi::new();

    let report = runner.run_frame(&mut ui).expect("frame");
    assert_eq!(report.edited, 0);
    assert!(position(&ui, "text Documentation") < position(&ui, "markdown[30] # Usage\ntype a number"));
    assert!(runner.graph.nodes().all(|n| n.last_exception().is_none()));
}

#[test]
fn it_should_count_gui_node_edits_and_keep_them_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings_file = fiatlight_runner::settings::settings_file_for(dir.path(), "counter");

    let mut first = Runner::standalone(with_counter(0), &settings_file);
    let mut ui = ScriptedUi::new();
    ui.script("counter/n", ScriptedAction::SetInt(5));
    first.start();
    let report = first.run_frame(&mut ui).expect("frame");
    assert_eq!(report.edited, 1);
    assert!(ui.saw("text Counter"));
    assert_eq!(counter_state(&first), Some(serde_json::json!(5)));
    first.run(&mut ScriptedUi::new(), 1).expect("run");

    let mut second = Runner::standalone(with_counter(0), &settings_file);
    second.start();
    assert!(second.exception_to_display.is_none());
    assert_eq!(counter_state(&second), Some(serde_json::json!(5)));
}

// --- Async ----------------------------------------------------------------

fn slow_add() -> FunctionDescriptor {
    FunctionDescriptor::typed("slow", &["x"], |x: i64| -> anyhow::Result<i64> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(x + 1)
    })
}

#[test]
fn it_should_disable_inputs_while_an_async_call_runs() {
    let config = RunConfig {
        disable_input_during_execution: true,
        ..RunConfig::default()
    };
    let attrs = FiatAttributes::new().function("invoke_async", true);
    let mut graph = graph_with(config, vec![(slow_add(), attrs)]);
    graph.set_input("slow", "x", Value::Int(1)).expect("set");
    let mut runner = Runner::notebook(graph);
    let mut ui = ScriptedUi::new();

    let report = runner.run_frame(&mut ui).expect("dispatch");
    assert!(report.running_async);
    ui.script("slow/x", ScriptedAction::SetInt(9));
    runner.run_frame(&mut ui).expect("frame");
    assert!(ui.saw("disabled slow/x: ignored"));
    assert!(ui.saw("text running"));

    assert!(runner.graph.wait_async(Duration::from_secs(5)).expect("wait"));
    assert_eq!(output(&runner, "slow"), Envelope::Concrete(Value::Int(2)));
}

#[test]
fn it_should_stop_a_stoppable_call_from_the_header() {
    let spin = FunctionDescriptor::new("spin", |args: &CallArgs| {
        for _ in 0..5_000 {
            if args.shall_stop() {
                return Ok(Value::Int(-1));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(Value::Int(0))
    })
    .param(ParamDesc::new("n", TypeDesc::Int))
    .returns(TypeDesc::Int);
    let attrs = FiatAttributes::new().function("invoke_async_stoppable", true);
    let mut runner = single(spin, attrs);
    runner.graph.set_input("spin", "n", Value::Int(1)).expect("set");
    let mut ui = ScriptedUi::new();

    runner.run_frame(&mut ui).expect("dispatch");
    ui.script("spin/Stop", ScriptedAction::Click);
    runner.run_frame(&mut ui).expect("frame");
    assert!(ui.saw("button spin/Stop clicked"));

    assert!(runner.graph.wait_async(Duration::from_secs(5)).expect("wait"));
    assert_eq!(output(&runner, "spin"), Envelope::Unspecified);
    assert!(runner.graph.node("spin").is_some_and(|n| n.last_exception().is_none()));
}

// --- Tabs and queues ------------------------------------------------------

#[test]
fn it_should_edit_large_handles_in_a_focused_tab() {
    let mut runner = single(add_one(), FiatAttributes::new());
    runner.graph.set_input("add_one", "x", Value::Int(1)).expect("set");
    if let Some(node) = runner.graph.node_mut("add_one") {
        node.gui_mut().inputs_mut()[0].handle.flags.edit_node_compatible = false;
    }
    let mut ui = ScriptedUi::new();
    ui.script("add_one/Open x in tab", ScriptedAction::Click);
    runner.run_frame(&mut ui).expect("frame");
    assert_eq!(runner.tabs.tabs().len(), 1);
    assert_eq!(runner.tabs.tabs()[0].pin, PinRef::Input("x".into()));
    assert!(position(&ui, "text Output: 2") < position(&ui, "int add_one - x/x = 1"));

    ui.script("add_one - x/x", ScriptedAction::SetInt(6));
    let report = runner.run_frame(&mut ui).expect("frame");
    assert_eq!(report.edited, 1);
    assert_eq!(output(&runner, "add_one"), Envelope::Concrete(Value::Int(2)));
    runner.run_frame(&mut ui).expect("frame");
    assert_eq!(output(&runner, "add_one"), Envelope::Concrete(Value::Int(7)));

    ui.script("add_one - x/Close tab", ScriptedAction::Click);
    runner.run_frame(&mut ui).expect("frame");
    assert!(runner.tabs.is_empty());
}

#[test]
fn it_should_fire_queued_callbacks_once_around_the_frame() {
    let mut runner = single(add_one(), FiatAttributes::new());
    runner.queues.fire_once_at_frame_start(|graph: &mut FunctionGraph| {
        graph.set_input("add_one", "x", Value::Int(10)).expect("set");
    });
    let seen = std::rc::Rc::new(std::cell::RefCell::new(None));
    let sink = seen.clone();
    runner.queues.fire_once_at_frame_end(move |graph: &mut FunctionGraph| {
        *sink.borrow_mut() = graph
            .node("add_one")
            .and_then(|n| n.output_envelope(0))
            .cloned();
    });

    runner.run_frame(&mut ScriptedUi::new()).expect("frame");
    assert_eq!(*seen.borrow(), Some(Envelope::Concrete(Value::Int(11))));
    assert_eq!(runner.queues.pending(), 0);
}

// --- Run modes ------------------------------------------------------------

#[test]
fn it_should_return_a_snapshot_in_notebook_mode() {
    let mut runner = single(add_one(), FiatAttributes::new());
    runner.graph.set_input("add_one", "x", Value::Int(5)).expect("set");
    let outcome = runner.run(&mut ScriptedUi::new(), 3).expect("run");
    assert_eq!(outcome.frames, 3);
    let snapshot = outcome.snapshot.expect("notebook snapshot");
    assert_eq!(snapshot["add_one"], vec![Envelope::Concrete(Value::Int(6))]);
}

#[test]
fn it_should_stop_looping_once_exit_is_requested() {
    let mut runner = single(add_one(), FiatAttributes::new());
    runner.request_exit();
    let outcome = runner.run(&mut ScriptedUi::new(), 10).expect("run");
    assert_eq!(outcome.frames, 0);
    assert!(runner.is_exit_requested());
}

#[test]
fn it_should_persist_inputs_and_view_between_standalone_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings_file = fiatlight_runner::settings::settings_file_for(dir.path(), "demo");

    let mut first = Runner::standalone(
        graph_with(RunConfig::default(), vec![(add_one(), FiatAttributes::new())]),
        &settings_file,
    );
    first.graph.set_input("add_one", "x", Value::Int(41)).expect("set");
    first.view = serde_json::json!({ "zoom": 1.5 });
    let outcome = first.run(&mut ScriptedUi::new(), 1).expect("run");
    assert!(outcome.snapshot.is_none());
    assert!(settings_file.is_file());

    let mut second = Runner::standalone(
        graph_with(RunConfig::default(), vec![(add_one(), FiatAttributes::new())]),
        &settings_file,
    );
    second.start();
    assert!(second.exception_to_display.is_none());
    assert_eq!(second.view, serde_json::json!({ "zoom": 1.5 }));
    second.run_frame(&mut ScriptedUi::new()).expect("frame");
    assert_eq!(output(&second, "add_one"), Envelope::Concrete(Value::Int(42)));
}

#[test]
fn it_should_report_a_broken_settings_file_and_keep_running() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings_file = dir.path().join("broken.fiatlight.json");
    std::fs::write(&settings_file, "{ not json").expect("write");

    let mut runner = Runner::standalone(
        graph_with(RunConfig::default(), vec![(add_one(), FiatAttributes::new())]),
        &settings_file,
    );
    runner.start();
    let message = runner.exception_to_display.clone().expect("reported");
    assert!(message.contains("failed to parse settings file"));

    let mut ui = ScriptedUi::new();
    ui.script("Dismiss", ScriptedAction::Click);
    runner.run_frame(&mut ui).expect("frame");
    assert!(ui.saw("error failed to parse settings file"));
    assert!(runner.exception_to_display.is_none());
    assert!(matches!(runner.mode, RunMode::Standalone { .. }));
}

#[test]
fn it_should_load_and_save_user_input_files_while_running() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut runner = single(add_one(), FiatAttributes::new());
    runner.graph.set_input("add_one", "x", Value::Int(3)).expect("set");

    let written = runner
        .save_user_inputs_file(&dir.path().join("snapshot"))
        .expect("save");
    assert_eq!(written, dir.path().join("snapshot.fiatlight.json"));

    runner.graph.set_input("add_one", "x", Value::Int(8)).expect("set");
    let report = runner.load_user_inputs_file(&written).expect("load");
    assert!(report.is_clean());
    assert_eq!(
        runner.graph.node("add_one").and_then(|n| n.input_envelope("x")),
        Some(&Envelope::Concrete(Value::Int(3)))
    );

    let err = runner
        .load_user_inputs_file(&dir.path().join("missing.json"))
        .unwrap_err();
    assert!(err.to_string().contains("could not find state file"));
}

#[test]
fn it_should_discover_the_run_config_above_the_working_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nested = dir.path().join("a/b");
    std::fs::create_dir_all(&nested).expect("mkdir");
    assert_eq!(discover_run_config(&nested).expect("defaults"), RunConfig::default());

    let body = run_configs::json("strict").expect("fixture");
    std::fs::write(dir.path().join(RUN_CONFIG_FILE), body).expect("write");
    let config = discover_run_config(&nested).expect("config");
    assert!(!config.catch_function_exceptions);
    assert!(config.disable_input_during_execution);

    std::fs::write(dir.path().join(RUN_CONFIG_FILE), "[1, 2").expect("write");
    assert!(discover_run_config(&nested).is_err());
}
