pub mod hooks;
pub mod orchestrator;
pub mod request;
pub mod result;
pub mod state;
mod steps;

pub use hooks::{CheckpointHook, NoopHook, ScreenshotHook};
pub use orchestrator::Orchestrator;
pub use request::{PostKind, PublishRequest, ValidationError};
pub use result::{ErrorInfo, ErrorKind, StepOutcome, WorkflowResult};
pub use state::{Phase, SessionState, Stage};
