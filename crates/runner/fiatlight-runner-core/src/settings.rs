//! The standalone settings file: saved user inputs plus the canvas view
//! state, `{"functions_nodes": {...}, "view": ...}`.

use anyhow::{Context, Result};
use fiatlight_graph::{FunctionGraph, LoadReport};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};

pub const SETTINGS_EXTENSION: &str = ".fiatlight.json";
pub const VIEW_KEY: &str = "view";

/// Settings file of an app: `<app_name>.fiatlight.json` in `dir`.
pub fn settings_file_for(dir: &Path, app_name: &str) -> PathBuf {
    dir.join(format!("{app_name}{SETTINGS_EXTENSION}"))
}

/// Append the settings extension to a bare file name.
pub fn with_default_extension(path: &Path) -> PathBuf {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if !name.contains('.') => path.with_file_name(format!("{name}{SETTINGS_EXTENSION}")),
        _ => path.to_path_buf(),
    }
}

/// Write the user inputs of `graph` and `view` to `path`.
pub fn save(path: &Path, graph: &FunctionGraph, view: &JsonValue) -> Result<()> {
    let mut doc = graph
        .save_user_inputs()
        .context("failed to collect user inputs")?;
    if let JsonValue::Object(map) = &mut doc {
        map.insert(VIEW_KEY.into(), view.clone());
    }
    let text = serde_json::to_string_pretty(&doc).context("failed to encode settings")?;
    fs::write(path, text)
        .with_context(|| format!("failed to write settings file {}", path.display()))?;
    log::info!("saved settings to {}", path.display());
    Ok(())
}

/// What was read back from a settings file.
#[derive(Debug)]
pub struct Loaded {
    pub report: LoadReport,
    pub view: JsonValue,
}

/// Read `path` into `graph`. A missing file is `Ok(None)`.
pub fn load(path: &Path, graph: &mut FunctionGraph) -> Result<Option<Loaded>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("no settings file at {}", path.display());
            return Ok(None);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read settings file {}", path.display()))
        }
    };
    let doc: JsonValue = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse settings file {}", path.display()))?;
    let report = graph
        .load_user_inputs(&doc)
        .with_context(|| format!("failed to load user inputs from {}", path.display()))?;
    for (node, err) in &report.failed {
        log::warn!("{}: `{node}` restored to defaults: {err}", path.display());
    }
    let view = doc.get(VIEW_KEY).cloned().unwrap_or(JsonValue::Null);
    Ok(Some(Loaded { report, view }))
}
