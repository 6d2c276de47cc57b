//! fiatlight-runner
//!
//! Drives a [`FunctionGraph`] frame by frame against a [`Ui`]: node shells,
//! deferred frame queues, focused tabs and the settings file.

pub mod queues;
pub mod scheduler;
pub mod settings;
pub mod shell;
pub mod tabs;

use anyhow::{Context, Result};
use fiatlight_api_core::{Envelope, Value};
use fiatlight_graph::{FunctionGraph, LoadReport, NodeName};
use fiatlight_togui::{RunConfig, Ui};
use hashbrown::HashMap;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

pub use crate::queues::FrameQueues;
pub use crate::shell::NodeShell;
pub use crate::tabs::{FocusedTab, FocusedTabs, PinRef};

/// Load the run config that applies to `start` (defaults when there is no
/// `.fiat_run_config.json` above it).
pub fn discover_run_config(start: &Path) -> Result<RunConfig> {
    RunConfig::discover(start)
        .with_context(|| format!("failed to load the run config for {}", start.display()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Loads `settings_file` on start and saves it on exit.
    Standalone { settings_file: PathBuf },
    /// No settings file; [`Runner::run`] returns a snapshot of the outputs.
    Notebook,
}

#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame: u64,
    /// Nodes invoked (or dispatched) during the invocation phase.
    pub invoked: usize,
    /// Inputs edited in nodes or focused tabs.
    pub edited: usize,
    pub needs_refresh: bool,
    pub running_async: bool,
    pub refresh_needed_label: bool,
    pub timings_ms: HashMap<String, f32>,
}

/// Output envelopes of every node, in graph order.
pub type OutputsSnapshot = IndexMap<NodeName, Vec<Envelope<Value>>>;

#[derive(Debug)]
pub struct RunOutcome {
    pub frames: u64,
    /// Present in notebook mode.
    pub snapshot: Option<OutputsSnapshot>,
}

#[derive(Debug)]
pub struct Runner {
    pub graph: FunctionGraph,
    pub config: RunConfig,
    pub mode: RunMode,
    pub queues: FrameQueues,
    pub tabs: FocusedTabs,
    pub shells: HashMap<NodeName, NodeShell>,
    /// Canvas view state, opaque to the runner; persisted under `"view"`.
    pub view: JsonValue,
    pub frame: u64,
    /// Error shown at the top of the next frames until dismissed.
    pub exception_to_display: Option<String>,
    exit_requested: bool,
}

impl Runner {
    pub fn new(graph: FunctionGraph, mode: RunMode) -> Self {
        Self {
            config: graph.config().clone(),
            graph,
            mode,
            queues: FrameQueues::new(),
            tabs: FocusedTabs::new(),
            shells: HashMap::new(),
            view: JsonValue::Null,
            frame: 0,
            exception_to_display: None,
            exit_requested: false,
        }
    }

    pub fn standalone(graph: FunctionGraph, settings_file: impl Into<PathBuf>) -> Self {
        Self::new(
            graph,
            RunMode::Standalone {
                settings_file: settings_file.into(),
            },
        )
    }

    pub fn notebook(graph: FunctionGraph) -> Self {
        Self::new(graph, RunMode::Notebook)
    }

    pub fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    pub fn is_exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Run a single frame.
    pub fn run_frame(&mut self, ui: &mut dyn Ui) -> Result<FrameReport> {
        crate::scheduler::run_frame(self, ui)
    }

    /// Start, loop until exit is requested or `max_frames` ran, then exit.
    /// Exit runs even when a frame fails; the frame error is returned.
    pub fn run(&mut self, ui: &mut dyn Ui, max_frames: u64) -> Result<RunOutcome> {
        self.start();
        let mut looped = Ok(());
        let mut frames = 0;
        while !self.exit_requested && frames < max_frames {
            if let Err(e) = self.run_frame(ui) {
                looped = Err(e);
                break;
            }
            frames += 1;
        }
        let outcome = self.exit(frames);
        looped?;
        outcome
    }

    /// Standalone mode restores the settings file. A broken file is reported
    /// through `exception_to_display`; the graph keeps its defaults.
    pub fn start(&mut self) {
        let RunMode::Standalone { settings_file } = &self.mode else {
            return;
        };
        match settings::load(settings_file, &mut self.graph) {
            Ok(Some(loaded)) => {
                self.view = loaded.view;
                if !loaded.report.is_clean() {
                    self.exception_to_display = Some(describe_failures(&loaded.report));
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("{e:#}");
                self.exception_to_display = Some(format!("{e:#}"));
            }
        }
    }

    /// Save (standalone) or snapshot (notebook), then release every handle.
    pub fn exit(&mut self, frames: u64) -> Result<RunOutcome> {
        let saved = match &self.mode {
            RunMode::Standalone { settings_file } => {
                settings::save(settings_file, &self.graph, &self.view)
            }
            RunMode::Notebook => Ok(()),
        };
        let snapshot = (self.mode == RunMode::Notebook).then(|| self.outputs_snapshot());
        self.graph.on_exit();
        saved?;
        Ok(RunOutcome { frames, snapshot })
    }

    pub fn outputs_snapshot(&self) -> OutputsSnapshot {
        self.graph
            .nodes()
            .map(|node| {
                let outputs = node
                    .gui()
                    .outputs()
                    .iter()
                    .map(|o| o.handle.value().clone())
                    .collect();
                (node.name().to_string(), outputs)
            })
            .collect()
    }

    /// Save user inputs and the view to `path`; a bare file name gets the
    /// settings extension. Returns the path written.
    pub fn save_user_inputs_file(&self, path: &Path) -> Result<PathBuf> {
        let path = settings::with_default_extension(path);
        settings::save(&path, &self.graph, &self.view)?;
        Ok(path)
    }

    /// Load user inputs while running. Unlike start-up, a missing file is an
    /// error. The restored nodes run on the next frame.
    pub fn load_user_inputs_file(&mut self, path: &Path) -> Result<LoadReport> {
        let loaded = settings::load(path, &mut self.graph)?
            .with_context(|| format!("could not find state file {}", path.display()))?;
        self.view = loaded.view;
        Ok(loaded.report)
    }

    /// Remove a node together with its shell state and tabs.
    pub fn remove_node(&mut self, name: &str) -> Result<()> {
        self.graph.remove_node(name)?;
        self.shells.remove(name);
        self.tabs.close_node(name);
        Ok(())
    }
}

fn describe_failures(report: &LoadReport) -> String {
    let lines: Vec<String> = report
        .failed
        .iter()
        .map(|(node, err)| format!("{node}: {err}"))
        .collect();
    format!(
        "some nodes were restored to their defaults (the functions may have changed):\n{}",
        lines.join("\n")
    )
}
