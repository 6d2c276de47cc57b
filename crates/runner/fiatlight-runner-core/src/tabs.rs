//! Focused tabs: pins whose handles are too large for a node are drawn in
//! their own tab after the canvas. They stay part of the graph; edits made
//! in a tab dirty the node like any other edit.

use fiatlight_graph::{FunctionGraph, NodeName};
use fiatlight_togui::{EditOutcome, Ui};
use std::fmt;

/// A pin of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PinRef {
    Input(String),
    Output(usize),
}

impl fmt::Display for PinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinRef::Input(name) => write!(f, "{name}"),
            PinRef::Output(idx) => write!(f, "output {idx}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FocusedTab {
    pub node: NodeName,
    pub pin: PinRef,
}

impl FocusedTab {
    pub fn title(&self) -> String {
        format!("{} - {}", self.node, self.pin)
    }
}

#[derive(Debug, Default)]
pub struct FocusedTabs {
    tabs: Vec<FocusedTab>,
}

impl FocusedTabs {
    pub fn new() -> Self {
        FocusedTabs::default()
    }

    /// Open a tab; opening an already open pin is a no-op.
    pub fn open(&mut self, node: &str, pin: PinRef) {
        let tab = FocusedTab {
            node: node.to_string(),
            pin,
        };
        if !self.tabs.contains(&tab) {
            log::debug!("opening tab {}", tab.title());
            self.tabs.push(tab);
        }
    }

    pub fn close(&mut self, tab: &FocusedTab) {
        self.tabs.retain(|t| t != tab);
    }

    /// Drop the tabs of a node that left the graph.
    pub fn close_node(&mut self, node: &str) {
        self.tabs.retain(|t| t.node != node);
    }

    pub fn tabs(&self) -> &[FocusedTab] {
        &self.tabs
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    /// Draw every tab. Returns how many inputs were edited.
    pub fn draw(&mut self, ui: &mut dyn Ui, graph: &mut FunctionGraph, disabled: bool) -> usize {
        let mut edited = 0;
        let mut to_close = Vec::new();
        for tab in &self.tabs {
            let linked = match &tab.pin {
                PinRef::Input(name) => graph.is_input_linked(&tab.node, name),
                PinRef::Output(_) => false,
            };
            let Some(node) = graph.node_mut(&tab.node) else {
                to_close.push(tab.clone());
                continue;
            };
            let title = tab.title();
            ui.push_id(&title);
            ui.text(&title);
            match &tab.pin {
                PinRef::Input(name) => {
                    let outcome = match node.gui_mut().input_mut(name) {
                        Some(input) if linked => {
                            input.handle.present(ui);
                            EditOutcome::Unchanged
                        }
                        Some(input) => {
                            ui.begin_disabled(disabled);
                            let outcome = input.handle.edit(ui);
                            ui.end_disabled();
                            outcome
                        }
                        None => {
                            to_close.push(tab.clone());
                            EditOutcome::Unchanged
                        }
                    };
                    if outcome != EditOutcome::Unchanged {
                        node.mark_input_changed();
                        edited += 1;
                    }
                }
                PinRef::Output(idx) => match node.gui_mut().outputs_mut().get_mut(*idx) {
                    Some(output) => output.handle.present(ui),
                    None => to_close.push(tab.clone()),
                },
            }
            if ui.button("Close tab") {
                to_close.push(tab.clone());
            }
            ui.pop_id();
        }
        for tab in &to_close {
            self.close(tab);
        }
        edited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_twice_keeps_one_tab() {
        let mut tabs = FocusedTabs::new();
        tabs.open("blur", PinRef::Input("image".into()));
        tabs.open("blur", PinRef::Input("image".into()));
        tabs.open("blur", PinRef::Output(0));
        assert_eq!(tabs.tabs().len(), 2);
        assert_eq!(tabs.tabs()[1].title(), "blur - output 0");

        tabs.close_node("blur");
        assert!(tabs.is_empty());
    }
}
