//! Saving and restoring user inputs, view options and graph compositions.
//!
//! ```json
//! {"functions_nodes": {
//!     "f": {"inputs": {"x": {"name": "x", "data": {"type": "Primitive", "value": 2}}},
//!           "gui_options": {"x": {"expanded": true}, "return": {"expanded": false}}}}}
//! ```
//!
//! Linked inputs are not saved: their value comes from upstream. Nodes with
//! an internal gui also save its state under `internal_gui`.

use fiatlight_api_core::{Envelope, FiatError, FiatResult};
use fiatlight_togui::{FunctionGui, RunConfig};
use serde_json::{json, Map, Value as JsonValue};

use crate::graph::FunctionGraph;
use crate::node::FunctionNode;
use crate::types::{GraphComposition, NodeName};

pub const FUNCTIONS_NODES_KEY: &str = "functions_nodes";
/// Node-state key of the state saved by an internal gui.
pub const INTERNAL_GUI_KEY: &str = "internal_gui";

/// Which nodes came back from a load, and which fell back to defaults.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub restored: Vec<NodeName>,
    pub failed: Vec<(NodeName, FiatError)>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// View-option key of output `idx`.
pub fn output_options_key(idx: usize) -> String {
    match idx {
        0 => "return".to_string(),
        i => format!("return_{i}"),
    }
}

fn save_node(graph: &FunctionGraph, node: &FunctionNode) -> FiatResult<JsonValue> {
    let mut inputs = Map::new();
    let mut gui_options = Map::new();
    for input in node.gui().inputs() {
        gui_options.insert(input.name.clone(), input.handle.save_view_options());
        if graph.is_input_linked(node.name(), &input.name) {
            continue;
        }
        inputs.insert(
            input.name.clone(),
            json!({ "name": input.name, "data": input.handle.save_to_dict()? }),
        );
    }
    for (idx, output) in node.gui().outputs().iter().enumerate() {
        gui_options.insert(output_options_key(idx), output.handle.save_view_options());
    }
    let mut state = json!({ "inputs": inputs, "gui_options": gui_options });
    if let Some(gui_state) = node.gui().save_internal_gui_state()? {
        state[INTERNAL_GUI_KEY] = gui_state;
    }
    Ok(state)
}

fn load_node(
    node: &mut FunctionNode,
    state: &JsonValue,
    linked: &dyn Fn(&str) -> bool,
) -> FiatResult<()> {
    let node_name = node.name().to_string();
    if let Some(inputs) = state.get("inputs") {
        let inputs = inputs.as_object().ok_or_else(|| {
            FiatError::PersistFailure(format!("`{node_name}`: \"inputs\" is not an object"))
        })?;
        for (name, saved) in inputs {
            if linked(name) {
                log::debug!("{node_name}: skipping saved value of linked input `{name}`");
                continue;
            }
            let data = saved.get("data").ok_or_else(|| {
                FiatError::PersistFailure(format!("`{node_name}.{name}` has no \"data\""))
            })?;
            let input = node.gui_mut().input_mut(name).ok_or_else(|| {
                FiatError::PersistFailure(format!("`{node_name}` has no input `{name}`"))
            })?;
            input.handle.load_from_dict(data)?;
        }
    }
    if let Some(options) = state.get("gui_options").and_then(JsonValue::as_object) {
        let gui = node.gui_mut();
        for input in gui.inputs_mut() {
            if let Some(opts) = options.get(&input.name) {
                input.handle.load_view_options(opts);
            }
        }
        for (idx, output) in gui.outputs_mut().iter_mut().enumerate() {
            if let Some(opts) = options.get(&output_options_key(idx)) {
                output.handle.load_view_options(opts);
            }
        }
    }
    if let Some(gui_state) = state.get(INTERNAL_GUI_KEY) {
        node.gui_mut().load_internal_gui_state(gui_state)?;
    }
    Ok(())
}

impl FunctionGraph {
    /// Unlinked inputs and view options of every node.
    pub fn save_user_inputs(&self) -> FiatResult<JsonValue> {
        let mut nodes = Map::new();
        for node in self.nodes() {
            nodes.insert(node.name().to_string(), save_node(self, node)?);
        }
        let mut root = Map::new();
        root.insert(FUNCTIONS_NODES_KEY.into(), JsonValue::Object(nodes));
        Ok(JsonValue::Object(root))
    }

    /// Restore what [`save_user_inputs`](Self::save_user_inputs) wrote.
    ///
    /// A node whose state fails to load is logged and goes back to its
    /// defaults; the other nodes still load. Every restored node is marked
    /// dirty and its last exception is cleared. Only a document without a
    /// `functions_nodes` object is an error.
    pub fn load_user_inputs(&mut self, saved: &JsonValue) -> FiatResult<LoadReport> {
        let states = saved
            .get(FUNCTIONS_NODES_KEY)
            .and_then(JsonValue::as_object)
            .ok_or_else(|| {
                FiatError::PersistFailure(format!("missing \"{FUNCTIONS_NODES_KEY}\" object"))
            })?;
        let mut report = LoadReport::default();
        for (name, state) in states {
            let linked: Vec<String> = self
                .links()
                .iter()
                .filter(|l| l.dst_node == *name)
                .map(|l| l.dst_input.clone())
                .collect();
            let Some(node) = self.node_mut(name) else {
                log::warn!("saved state names unknown function `{name}`, ignored");
                continue;
            };
            let is_linked = |input: &str| linked.iter().any(|l| l == input);
            match load_node(node, state, &is_linked) {
                Ok(()) => report.restored.push(name.clone()),
                Err(e) => {
                    log::warn!("cannot restore `{name}`, using defaults: {e}");
                    reset_unlinked_inputs(node, &is_linked);
                    report.failed.push((name.clone(), e));
                }
            }
            node.clear_exception();
            node.set_dirty();
        }
        Ok(report)
    }

    /// Node names and links.
    pub fn save_graph_composition(&self) -> FiatResult<JsonValue> {
        serde_json::to_value(self.composition())
            .map_err(|e| FiatError::PersistFailure(format!("cannot save composition: {e}")))
    }

    /// Rebuild a graph saved by
    /// [`save_graph_composition`](Self::save_graph_composition).
    pub fn load_graph_composition(
        saved: &JsonValue,
        config: RunConfig,
        factory: impl Fn(&str) -> Option<FunctionGui>,
    ) -> FiatResult<Self> {
        let composition: GraphComposition = serde_json::from_value(saved.clone())
            .map_err(|e| FiatError::PersistFailure(format!("bad composition: {e}")))?;
        FunctionGraph::from_composition(&composition, config, factory)
    }
}

fn reset_unlinked_inputs(node: &mut FunctionNode, linked: &dyn Fn(&str) -> bool) {
    for input in node.gui_mut().inputs_mut() {
        if !linked(&input.name) {
            input.handle.set_envelope(Envelope::Unspecified);
        }
    }
}
