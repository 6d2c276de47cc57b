//! fiatlight-togui-core: typed GUI handles, the type-to-handle registry and
//! the function compiler

pub mod attributes;
pub mod config;
pub mod function;
pub mod gui_node;
pub mod handle;
pub mod params;
pub mod registry;
pub mod signature;
pub mod ui;

pub use attributes::{AttrType, AttrValue, FiatAttributes, PossibleAttr, Validator};
pub use config::{ConfigError, RunConfig, RUN_CONFIG_FILE};
pub use function::{
    CallArgs, Callable, FunctionDescriptor, FunctionGui, FunctionOptions, InputParam,
    InvokePolicy, OutputPin, ParamDesc, ParamKind, Readiness, StopFlag, TypedCallable,
};
pub use gui_node::{GuiFn, InternalGui, MarkdownGui, StatefulGui, MARKDOWN_LABEL};
pub use handle::{Callbacks, EditOutcome, Handle, HandleFlags, HandleKind};
pub use registry::{HandleFactory, Registry};
pub use signature::{parse_signature, Signature};
pub use ui::{ScriptedAction, ScriptedUi, Ui};
