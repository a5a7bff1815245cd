pub mod config;
pub mod constellation;
pub mod device;
pub mod event;
pub mod priority;
pub mod session;
pub mod task_star;
pub mod task_star_line;

pub use config::CoreConfig;
pub use constellation::{ConstellationConfig, ConstellationError, ConstellationState, TaskConstellation};
pub use device::{Device, DeviceStatus};
pub use event::{Event, EventPayload};
pub use priority::{PriorityCalculator, ReadyKey};
pub use session::{Round, RoundStatus, Session};
pub use task_star::{TaskPatch, TaskPriority, TaskStar, TaskStatus};
pub use task_star_line::{DependencyType, TaskStarLine};
