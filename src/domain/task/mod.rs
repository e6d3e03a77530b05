// Task domain module
// Contains the task aggregate root and its value objects

#![allow(clippy::module_inception)]

pub mod task;
pub mod value_objects;

// Re-export main types for convenience
pub use task::{StatusUpdate, Task, TaskSnapshot};
pub use value_objects::{AgentKind, TaskStatus};
