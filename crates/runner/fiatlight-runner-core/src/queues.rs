//! One-shot callbacks run at the start or end of the next frame.

use fiatlight_graph::FunctionGraph;
use std::fmt;

pub type Deferred = Box<dyn FnOnce(&mut FunctionGraph)>;

#[derive(Default)]
pub struct FrameQueues {
    at_start: Vec<Deferred>,
    at_end: Vec<Deferred>,
}

impl fmt::Debug for FrameQueues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameQueues")
            .field("at_start", &self.at_start.len())
            .field("at_end", &self.at_end.len())
            .finish()
    }
}

impl FrameQueues {
    pub fn new() -> Self {
        FrameQueues::default()
    }

    pub fn fire_once_at_frame_start(&mut self, f: impl FnOnce(&mut FunctionGraph) + 'static) {
        self.at_start.push(Box::new(f));
    }

    pub fn fire_once_at_frame_end(&mut self, f: impl FnOnce(&mut FunctionGraph) + 'static) {
        self.at_end.push(Box::new(f));
    }

    pub fn pending(&self) -> usize {
        self.at_start.len() + self.at_end.len()
    }

    /// Run and clear the start queue, in submission order.
    pub fn run_frame_start(&mut self, graph: &mut FunctionGraph) -> usize {
        drain(&mut self.at_start, graph)
    }

    /// Run and clear the end queue, in submission order.
    pub fn run_frame_end(&mut self, graph: &mut FunctionGraph) -> usize {
        drain(&mut self.at_end, graph)
    }
}

fn drain(queue: &mut Vec<Deferred>, graph: &mut FunctionGraph) -> usize {
    let callbacks = std::mem::take(queue);
    let count = callbacks.len();
    for f in callbacks {
        f(graph);
    }
    count
}
