//! External seams (spec §1 "external ports", §6). Concrete adapters live
//! under `infrastructure`; this module only declares the trait contracts,
//! mirroring the teacher's `domain::ports` re-export style.

pub mod artifact_writer;
pub mod device_link;
pub mod event_sink;
pub mod llm_port;

pub use artifact_writer::{to_summary_value, ArtifactWriter, ExecutionLogEntry};
pub use device_link::{DeviceLink, RegisterFrame, TaskReplyFrame, TaskReplyStatus, TaskRequestFrame};
pub use event_sink::EventSink;
pub use llm_port::{LlmPort, PlannerRequest, PlannerResponse, PlannerStatus, ToolCall};
