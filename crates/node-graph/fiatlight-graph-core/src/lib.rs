//! fiatlight-graph-core: function nodes, the function graph and persistence
//! of user inputs

pub mod graph;
pub mod node;
pub mod persistence;
pub mod topo;
pub mod types;


pub use graph::FunctionGraph;
pub use node::{FunctionNode, InvokeOutcome};
pub use persistence::{output_options_key, LoadReport, FUNCTIONS_NODES_KEY, INTERNAL_GUI_KEY};
pub use topo::topo_order;
pub use types::*;
