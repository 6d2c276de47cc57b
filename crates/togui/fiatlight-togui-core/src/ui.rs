//! Immediate-mode widget surface used by handles, and a headless
//! implementation driven by a script.

use hashbrown::HashMap;

use crate::params::{BoolParams, FloatParams, IntParams, StrParams};

/// Widgets the handles need from the host toolkit. Every `edit_*` call
/// returns `true` when the user changed the value this frame.
pub trait Ui {
    fn text(&mut self, text: &str);
    fn error_text(&mut self, text: &str);
    fn button(&mut self, label: &str) -> bool;
    fn edit_int(&mut self, label: &str, params: &IntParams, value: &mut i64) -> bool;
    fn edit_float(&mut self, label: &str, params: &FloatParams, value: &mut f64) -> bool;
    fn edit_bool(&mut self, label: &str, params: &BoolParams, value: &mut bool) -> bool;
    fn edit_str(&mut self, label: &str, params: &StrParams, value: &mut String) -> bool;
    /// Combo box over `options`; `selected` is an index into it.
    fn choose(&mut self, label: &str, options: &[String], selected: &mut usize) -> bool;
    /// Collapsible header. Returns whether it is open after this frame.
    fn collapsing(&mut self, label: &str, open: bool) -> bool;
    fn push_id(&mut self, id: &str);
    fn pop_id(&mut self);
    fn begin_disabled(&mut self, disabled: bool);
    fn end_disabled(&mut self);
    fn set_clipboard_text(&mut self, text: &str);
    /// Markdown wrapped at `width_em`. Hosts without a renderer show it as
    /// plain text.
    fn markdown(&mut self, text: &str, _width_em: f64) {
        self.text(text);
    }
}

/// A scripted user action, applied to the widget whose id path matches.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptedAction {
    SetInt(i64),
    SetFloat(f64),
    SetBool(bool),
    SetStr(String),
    Choose(usize),
    Click,
    Toggle(bool),
}

/// Headless [`Ui`]. Widget ids are the `/`-joined id stack plus the widget
/// label; each scripted action is consumed by the first widget that matches
/// it. Everything drawn is recorded in a transcript.
#[derive(Debug, Default)]
pub struct ScriptedUi {
    id_stack: Vec<String>,
    disabled: Vec<bool>,
    script: HashMap<String, ScriptedAction>,
    transcript: Vec<String>,
    clipboard: Option<String>,
}

impl ScriptedUi {
    pub fn new() -> Self {
        ScriptedUi::default()
    }

    /// Queue `action` for the widget at `path`.
    pub fn script(&mut self, path: impl Into<String>, action: ScriptedAction) -> &mut Self {
        self.script.insert(path.into(), action);
        self
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    pub fn take_transcript(&mut self) -> Vec<String> {
        std::mem::take(&mut self.transcript)
    }

    /// Whether any transcript line contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.transcript.iter().any(|line| line.contains(needle))
    }

    pub fn clipboard(&self) -> Option<&str> {
        self.clipboard.as_deref()
    }

    pub fn pending_actions(&self) -> usize {
        self.script.len()
    }

    fn path_of(&self, label: &str) -> String {
        let mut parts: Vec<&str> = self.id_stack.iter().map(String::as_str).collect();
        parts.push(label);
        parts.join("/")
    }

    fn is_disabled(&self) -> bool {
        self.disabled.iter().any(|d| *d)
    }

    fn record(&mut self, line: String) {
        self.transcript.push(line);
    }

    /// Pop the action for `label`. Actions aimed at disabled widgets are
    /// dropped.
    fn take_action(&mut self, label: &str) -> Option<ScriptedAction> {
        let path = self.path_of(label);
        let action = self.script.remove(&path)?;
        if self.is_disabled() {
            self.record(format!("disabled {path}: ignored {action:?}"));
            return None;
        }
        Some(action)
    }
}

impl Ui for ScriptedUi {
    fn text(&mut self, text: &str) {
        self.record(format!("text {text}"));
    }

    fn error_text(&mut self, text: &str) {
        self.record(format!("error {text}"));
    }

    fn button(&mut self, label: &str) -> bool {
        let clicked = matches!(self.take_action(label), Some(ScriptedAction::Click));
        let path = self.path_of(label);
        self.record(format!("button {path}{}", if clicked { " clicked" } else { "" }));
        clicked
    }

    fn edit_int(&mut self, label: &str, params: &IntParams, value: &mut i64) -> bool {
        let changed = match self.take_action(label) {
            Some(ScriptedAction::SetInt(v)) if v != *value => {
                *value = v;
                true
            }
            _ => false,
        };
        let path = self.path_of(label);
        self.record(format!("int {path} = {}", params.format_value(*value)));
        changed
    }

    fn edit_float(&mut self, label: &str, params: &FloatParams, value: &mut f64) -> bool {
        let changed = match self.take_action(label) {
            Some(ScriptedAction::SetFloat(v)) if v != *value => {
                *value = v;
                true
            }
            _ => false,
        };
        let path = self.path_of(label);
        self.record(format!("float {path} = {}", params.format_value(*value)));
        changed
    }

    fn edit_bool(&mut self, label: &str, _params: &BoolParams, value: &mut bool) -> bool {
        let changed = match self.take_action(label) {
            Some(ScriptedAction::SetBool(v)) | Some(ScriptedAction::Toggle(v)) if v != *value => {
                *value = v;
                true
            }
            _ => false,
        };
        let path = self.path_of(label);
        self.record(format!("bool {path} = {value}"));
        changed
    }

    fn edit_str(&mut self, label: &str, _params: &StrParams, value: &mut String) -> bool {
        let changed = match self.take_action(label) {
            Some(ScriptedAction::SetStr(v)) if v != *value => {
                *value = v;
                true
            }
            _ => false,
        };
        let path = self.path_of(label);
        self.record(format!("str {path} = {value:?}"));
        changed
    }

    fn choose(&mut self, label: &str, options: &[String], selected: &mut usize) -> bool {
        let changed = match self.take_action(label) {
            Some(ScriptedAction::Choose(idx)) if idx < options.len() && idx != *selected => {
                *selected = idx;
                true
            }
            _ => false,
        };
        let path = self.path_of(label);
        let current = options.get(*selected).map(String::as_str).unwrap_or("");
        self.record(format!("choose {path} = {current}"));
        changed
    }

    fn collapsing(&mut self, label: &str, open: bool) -> bool {
        let open = match self.take_action(label) {
            Some(ScriptedAction::Toggle(v)) => v,
            Some(ScriptedAction::Click) => !open,
            _ => open,
        };
        let path = self.path_of(label);
        self.record(format!("collapsing {path} open={open}"));
        open
    }

    fn push_id(&mut self, id: &str) {
        self.id_stack.push(id.to_string());
    }

    fn pop_id(&mut self) {
        if self.id_stack.pop().is_none() {
            log::warn!("pop_id called with an empty id stack");
        }
    }

    fn begin_disabled(&mut self, disabled: bool) {
        self.disabled.push(disabled);
    }

    fn end_disabled(&mut self) {
        self.disabled.pop();
    }

    fn set_clipboard_text(&mut self, text: &str) {
        self.record(format!("clipboard {text}"));
        self.clipboard = Some(text.to_string());
    }

    fn markdown(&mut self, text: &str, width_em: f64) {
        self.record(format!("markdown[{width_em}] {text}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_are_keyed_by_id_path() {
        let mut ui = ScriptedUi::new();
        ui.script("node/x", ScriptedAction::SetInt(5));
        let mut value = 1;

        assert!(!ui.edit_int("x", &IntParams::default(), &mut value));
        assert_eq!(ui.pending_actions(), 1);

        ui.push_id("node");
        assert!(ui.edit_int("x", &IntParams::default(), &mut value));
        ui.pop_id();
        assert_eq!(value, 5);
        assert!(ui.saw("int node/x = 5"));
    }

    #[test]
    fn disabled_widgets_drop_actions() {
        let mut ui = ScriptedUi::new();
        ui.script("go", ScriptedAction::Click);
        ui.begin_disabled(true);
        assert!(!ui.button("go"));
        ui.end_disabled();
        assert_eq!(ui.pending_actions(), 0);
        assert!(ui.saw("disabled go"));
    }
}
