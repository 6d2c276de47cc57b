use fiatlight_api_core::{ErrorKind, FiatError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Nodes are keyed by their unique function name.
pub type NodeName = String;

/// Directed link from an output of one node to an input of another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkSpec {
    #[serde(rename = "src_function_name")]
    pub src_node: NodeName,
    #[serde(rename = "src_output_idx")]
    pub src_output: usize,
    #[serde(rename = "dst_function_name")]
    pub dst_node: NodeName,
    #[serde(rename = "dst_input_name")]
    pub dst_input: String,
}

impl LinkSpec {
    pub fn new(
        src_node: impl Into<NodeName>,
        src_output: usize,
        dst_node: impl Into<NodeName>,
        dst_input: impl Into<String>,
    ) -> Self {
        LinkSpec {
            src_node: src_node.into(),
            src_output,
            dst_node: dst_node.into(),
            dst_input: dst_input.into(),
        }
    }
}

/// Node names and links, without any user input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphComposition {
    pub functions_names: Vec<NodeName>,
    pub functions_nodes_links: Vec<LinkSpec>,
}

/// Last failure of a node's callable or of its return check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub traceback: Option<String>,
}

impl ExceptionRecord {
    /// The traceback is anyhow's report: the cause chain, plus a backtrace
    /// when `RUST_BACKTRACE` enables one.
    pub fn from_error(err: &anyhow::Error) -> Self {
        ExceptionRecord {
            kind: ErrorKind::RuntimeFailure,
            message: err.to_string(),
            traceback: Some(format!("{err:?}")),
        }
    }

    pub fn from_fiat(err: &FiatError) -> Self {
        ExceptionRecord {
            kind: err.kind(),
            message: err.to_string(),
            traceback: None,
        }
    }

    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "function panicked".to_string());
        ExceptionRecord {
            kind: ErrorKind::RuntimeFailure,
            message: format!("panic: {message}"),
            traceback: None,
        }
    }
}

/// Per-node counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub invocation_count: u64,
    pub last_duration: Option<Duration>,
    pub input_change_count: u64,
}
