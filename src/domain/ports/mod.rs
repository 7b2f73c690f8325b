//! Ports: traits the core consumes, implemented by infrastructure.

pub mod cancellation;
pub mod clock;
pub mod file_access;
pub mod model_provider;
pub mod vcs;

pub use cancellation::{CancellationSignal, CancellationSource};
pub use clock::{Clock, ManualClock, SystemClock};
pub use file_access::{ExecOutput, FileAccess, FileStat};
pub use model_provider::{
    Actor, MessagePayload, ModelMessage, ModelProvider, ModelRequest, ModelResponse, PartStream,
    ResponseFormat, StreamPart, ToolCallPart, ToolSchema,
};
pub use vcs::Vcs;
