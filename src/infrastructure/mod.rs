//! Adapters that satisfy the `domain::ports` trait contracts (spec §1
//! "external ports"). Mirrors the teacher's `infrastructure` split: each
//! submodule here owns exactly one seam (logging, config, persistence, the
//! LLM stub, the in-process device transport).

pub mod config;
pub mod device_channel;
pub mod llm_stub;
pub mod logging;
pub mod persistence;

pub use config::{ConfigError, ConfigLoader};
pub use device_channel::ChannelDeviceLink;
pub use llm_stub::ScriptedLlm;
pub use logging::init_logging;
pub use persistence::FileArtifactWriter;
