//! Node bodies that only draw: a free-form widget callback with optional
//! saved state, and a markdown note.

use fiatlight_api_core::{FiatError, FiatResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::ui::Ui;

/// Widgets drawn inside a node, next to (or instead of) its pins.
pub trait InternalGui {
    /// Draw one frame. Returns `true` when the user changed something.
    fn draw(&mut self, ui: &mut dyn Ui) -> bool;

    /// State written with the user inputs; `None` when there is nothing to
    /// keep.
    fn save_state(&self) -> FiatResult<Option<JsonValue>> {
        Ok(None)
    }

    fn load_state(&mut self, _state: &JsonValue) -> FiatResult<()> {
        Ok(())
    }
}

/// A bare drawing callback. Nothing is saved.
pub struct GuiFn<F>(pub F);

impl<F> InternalGui for GuiFn<F>
where
    F: FnMut(&mut dyn Ui) -> bool,
{
    fn draw(&mut self, ui: &mut dyn Ui) -> bool {
        (self.0)(ui)
    }
}

/// A drawing callback over serializable state, saved and restored with the
/// user inputs.
pub struct StatefulGui<T> {
    state: T,
    draw: Box<dyn FnMut(&mut T, &mut dyn Ui) -> bool>,
}

impl<T> StatefulGui<T> {
    pub fn new(state: T, draw: impl FnMut(&mut T, &mut dyn Ui) -> bool + 'static) -> Self {
        StatefulGui {
            state,
            draw: Box::new(draw),
        }
    }

    pub fn state(&self) -> &T {
        &self.state
    }
}

impl<T: Serialize + DeserializeOwned> InternalGui for StatefulGui<T> {
    fn draw(&mut self, ui: &mut dyn Ui) -> bool {
        (self.draw)(&mut self.state, ui)
    }

    fn save_state(&self) -> FiatResult<Option<JsonValue>> {
        serde_json::to_value(&self.state)
            .map(Some)
            .map_err(|e| FiatError::PersistFailure(format!("cannot save gui state: {e}")))
    }

    fn load_state(&mut self, state: &JsonValue) -> FiatResult<()> {
        self.state = serde_json::from_value(state.clone())
            .map_err(|e| FiatError::PersistFailure(format!("bad gui state: {e}")))?;
        Ok(())
    }
}

impl<T: fmt::Debug> fmt::Debug for StatefulGui<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatefulGui").field("state", &self.state).finish()
    }
}

pub const MARKDOWN_LABEL: &str = "Documentation";

/// A markdown note. Its parameters round-trip through the saved state, so a
/// reloaded session shows the same text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkdownGui {
    pub md_string: String,
    pub text_width_em: f64,
    /// Strip the common leading indentation before rendering.
    pub unindented: bool,
}

impl MarkdownGui {
    pub fn new(md_string: impl Into<String>) -> Self {
        MarkdownGui {
            md_string: md_string.into(),
            text_width_em: 20.0,
            unindented: true,
        }
    }

    /// The text as rendered.
    pub fn rendered(&self) -> String {
        if self.unindented {
            unindent(&self.md_string)
        } else {
            self.md_string.clone()
        }
    }
}

impl InternalGui for MarkdownGui {
    fn draw(&mut self, ui: &mut dyn Ui) -> bool {
        ui.markdown(&self.rendered(), self.text_width_em);
        false
    }

    fn save_state(&self) -> FiatResult<Option<JsonValue>> {
        serde_json::to_value(self)
            .map(Some)
            .map_err(|e| FiatError::PersistFailure(format!("cannot save markdown node: {e}")))
    }

    fn load_state(&mut self, state: &JsonValue) -> FiatResult<()> {
        *self = serde_json::from_value(state.clone())
            .map_err(|e| FiatError::PersistFailure(format!("bad markdown node state: {e}")))?;
        Ok(())
    }
}

/// Remove the indentation shared by every non-blank line, and the blank
/// lines around the text.
fn unindent(text: &str) -> String {
    let indent = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let lines: Vec<&str> = text
        .lines()
        .map(|l| l.get(indent..).unwrap_or_else(|| l.trim_start()))
        .collect();
    lines.join("\n").trim_matches('\n').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::IntParams;
    use crate::ui::{ScriptedAction, ScriptedUi};
    use serde_json::json;

    #[test]
    fn unindent_strips_common_prefix() {
        let md = "\n    # Title\n      indented\n    body\n";
        assert_eq!(unindent(md), "# Title\n  indented\nbody");
        assert_eq!(unindent("flat"), "flat");
    }

    #[test]
    fn markdown_draws_and_keeps_its_text() {
        let mut md = MarkdownGui::new("  *hello*");
        let mut ui = ScriptedUi::new();
        assert!(!md.draw(&mut ui));
        assert!(ui.saw("markdown[20] *hello*"));

        let saved = md.save_state().unwrap().unwrap();
        assert_eq!(saved["text_width_em"], json!(20.0));
        let mut other = MarkdownGui::new("");
        other.load_state(&saved).unwrap();
        assert_eq!(other, md);
        assert!(other.load_state(&json!({"md_string": 3})).is_err());
    }

    #[test]
    fn stateful_gui_edits_and_restores_state() {
        let mut gui = StatefulGui::new(5_i64, |n: &mut i64, ui: &mut dyn Ui| {
            ui.edit_int("n", &IntParams::default(), n)
        });
        let mut ui = ScriptedUi::new();
        ui.script("n", ScriptedAction::SetInt(9));
        assert!(gui.draw(&mut ui));
        assert_eq!(*gui.state(), 9);
        assert_eq!(gui.save_state().unwrap(), Some(json!(9)));

        gui.load_state(&json!(2)).unwrap();
        assert_eq!(*gui.state(), 2);
        assert!(gui.load_state(&json!("two")).is_err());
    }

    #[test]
    fn plain_callbacks_save_nothing() {
        let mut gui = GuiFn(|ui: &mut dyn Ui| ui.button("go"));
        let mut ui = ScriptedUi::new();
        ui.script("go", ScriptedAction::Click);
        assert!(gui.draw(&mut ui));
        assert!(gui.save_state().unwrap().is_none());
    }
}
