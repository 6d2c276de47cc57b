use anyhow::{Context, Result};
use hashbrown::HashMap;
use std::time::Instant;

use fiatlight_togui::Ui;

use crate::shell::InputsContext;

const DISMISS_BUTTON: &str = "Dismiss";

fn elapsed_ms(since: Instant) -> f32 {
    since.elapsed().as_secs_f32() * 1000.0
}

/// Run one frame:
///   frame-start queue -> heartbeat -> input edits -> invocation
///   -> output presenters -> focused tabs -> frame-end queue
pub fn run_frame(runner: &mut crate::Runner, ui: &mut dyn Ui) -> Result<crate::FrameReport> {
    runner.frame = runner.frame.wrapping_add(1);
    let frame_started = Instant::now();
    let mut timings = HashMap::new();

    runner.queues.run_frame_start(&mut runner.graph);

    if let Some(message) = &runner.exception_to_display {
        ui.error_text(message);
        if ui.button(DISMISS_BUTTON) {
            runner.exception_to_display = None;
        }
    }

    // Heartbeat: merge async results, handle heartbeats
    let phase = Instant::now();
    let mut needs_refresh = runner
        .graph
        .heartbeat()
        .with_context(|| format!("heartbeat of frame {}", runner.frame))?;
    timings.insert("heartbeat_ms".to_string(), elapsed_ms(phase));

    // Input-edit phase
    let phase = Instant::now();
    let disabled =
        runner.config.disable_input_during_execution && runner.graph.is_any_running_async();
    let order = runner.graph.topo_order();
    let mut edited = 0;
    for name in &order {
        let linked: Vec<String> = runner
            .graph
            .links()
            .iter()
            .filter(|l| &l.dst_node == name)
            .map(|l| l.dst_input.clone())
            .collect();
        let Some(node) = runner.graph.node_mut(name) else {
            continue;
        };
        let shell = runner.shells.entry(name.clone()).or_default();
        ui.push_id(name);
        shell.draw_header(ui, node);
        let report = shell.draw_inputs(
            ui,
            node,
            InputsContext {
                linked: &linked,
                disabled,
            },
            &mut runner.tabs,
        );
        ui.pop_id();
        edited += report.edited;
    }
    timings.insert("inputs_ms".to_string(), elapsed_ms(phase));

    // Invocation phase
    let phase = Instant::now();
    let invoked = runner
        .graph
        .run_pending()
        .with_context(|| format!("invocation phase of frame {}", runner.frame))?;
    timings.insert("invoke_ms".to_string(), elapsed_ms(phase));

    // Output-present phase
    let phase = Instant::now();
    for name in &order {
        let Some(node) = runner.graph.node_mut(name) else {
            continue;
        };
        let shell = runner.shells.entry(name.clone()).or_default();
        ui.push_id(name);
        shell.draw_outputs(ui, node, &mut runner.tabs);
        shell.draw_error_banner(ui, node);
        ui.pop_id();
    }
    timings.insert("outputs_ms".to_string(), elapsed_ms(phase));

    // Focused tabs, drawn after the canvas
    edited += runner.tabs.draw(ui, &mut runner.graph, disabled);

    runner.queues.run_frame_end(&mut runner.graph);

    needs_refresh |= invoked > 0 || edited > 0;
    timings.insert("total_ms".to_string(), elapsed_ms(frame_started));

    Ok(crate::FrameReport {
        frame: runner.frame,
        invoked,
        edited,
        needs_refresh,
        running_async: runner.graph.is_any_running_async(),
        refresh_needed_label: runner.graph.shall_display_refresh_needed_label(),
        timings_ms: timings,
    })
}
