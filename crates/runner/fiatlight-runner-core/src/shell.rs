//! Drawing of one function node: header, input editors, internal gui,
//! output presenters and the error banner.
//!
//! Widget ids are scoped by the node name, so an input `x` of node `add_one`
//! has the id path `add_one/x`.

use fiatlight_graph::FunctionNode;
use fiatlight_togui::{EditOutcome, InvokePolicy, Ui};

use crate::tabs::{FocusedTabs, PinRef};

pub const INVOKE_BUTTON: &str = "Invoke";
pub const STOP_BUTTON: &str = "Stop";
pub const TRACEBACK_LABEL: &str = "Traceback";

/// Per-node drawing state that is not part of the graph.
#[derive(Debug, Clone, Default)]
pub struct NodeShell {
    pub traceback_open: bool,
    pub doc_open: bool,
}

/// Inputs of the node being drawn, and how they may be edited.
#[derive(Debug, Clone, Copy)]
pub struct InputsContext<'a> {
    /// Inputs driven by a link; drawn with their presenter.
    pub linked: &'a [String],
    pub disabled: bool,
}

/// What the input phase of one node did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InputsReport {
    pub edited: usize,
    pub rejected: Vec<String>,
}

impl NodeShell {
    /// Title, refresh marker, async state and the Invoke/Stop buttons.
    pub fn draw_header(&mut self, ui: &mut dyn Ui, node: &mut FunctionNode) {
        ui.text(node.label());
        if node.shall_display_refresh_needed_label() {
            ui.text("(refresh needed)");
        }
        if node.is_running_async() {
            ui.text("running");
            if node.policy() == InvokePolicy::AsyncStoppable && ui.button(STOP_BUTTON) {
                log::debug!("{}: stop requested from the node", node.name());
                node.request_stop();
            }
        }
        if node.policy().is_manual() && ui.button(INVOKE_BUTTON) {
            node.trigger();
        }
        let options = node.gui().options();
        if options.doc_display {
            if let Some(doc) = node.gui().doc() {
                self.doc_open = ui.collapsing("Doc", self.doc_open);
                if self.doc_open {
                    ui.text(doc);
                }
            }
        }
        if options.doc_show_source {
            if let Some(source) = node.gui().source() {
                ui.text(source);
            }
        }
    }

    /// Editors for unlinked inputs, presenters for linked ones, then the
    /// node's internal gui. Handles that cannot live inside a node get an
    /// "open in tab" button instead.
    pub fn draw_inputs(
        &mut self,
        ui: &mut dyn Ui,
        node: &mut FunctionNode,
        ctx: InputsContext<'_>,
        tabs: &mut FocusedTabs,
    ) -> InputsReport {
        let mut report = InputsReport::default();
        let node_name = node.name().to_string();
        ui.begin_disabled(ctx.disabled);
        for input in node.gui_mut().inputs_mut() {
            let pin = PinRef::Input(input.name.clone());
            if ctx.linked.contains(&input.name) {
                input.handle.present(ui);
                continue;
            }
            if !input.handle.flags.edit_node_compatible {
                if ui.button(&format!("Open {} in tab", input.name)) {
                    tabs.open(&node_name, pin);
                }
                continue;
            }
            match input.handle.edit(ui) {
                EditOutcome::Unchanged => {}
                EditOutcome::Changed => report.edited += 1,
                EditOutcome::Rejected(reason) => {
                    log::debug!("{node_name}.{}: {reason}", input.name);
                    report.edited += 1;
                    report.rejected.push(input.name.clone());
                }
            }
        }
        if node.gui_mut().draw_internal_gui(ui) {
            log::debug!("{node_name}: internal gui changed");
            report.edited += 1;
        }
        ui.end_disabled();
        if report.edited > 0 {
            node.mark_input_changed();
        }
        report
    }

    /// Presenters for the outputs, with a copy button for each output that
    /// supports it.
    pub fn draw_outputs(&mut self, ui: &mut dyn Ui, node: &mut FunctionNode, tabs: &mut FocusedTabs) {
        let node_name = node.name().to_string();
        for (idx, output) in node.gui_mut().outputs_mut().iter_mut().enumerate() {
            if !output.handle.flags.present_node_compatible {
                if ui.button(&format!("Open {} in tab", output.label)) {
                    tabs.open(&node_name, PinRef::Output(idx));
                }
                continue;
            }
            output.handle.present(ui);
            if let Some(text) = output.handle.clipboard_text() {
                if ui.button(&format!("Copy {}", output.label)) {
                    ui.set_clipboard_text(&text);
                }
            }
        }
    }

    /// Banner for the node's last exception. The traceback sits in a
    /// collapsible section.
    pub fn draw_error_banner(&mut self, ui: &mut dyn Ui, node: &FunctionNode) {
        let Some(record) = node.last_exception() else {
            return;
        };
        ui.error_text(&format!("Exception ({:?}): {}", record.kind, record.message));
        if let Some(traceback) = &record.traceback {
            self.traceback_open = ui.collapsing(TRACEBACK_LABEL, self.traceback_open);
            if self.traceback_open {
                ui.text(traceback);
            }
        }
    }
}
