// Repository traits (ports)
// Implemented by adapters in the infrastructure layer

pub mod message_repository;
pub mod store_error;
pub mod task_repository;

pub use message_repository::MessageRepository;
pub use store_error::{StoreError, StoreResult};
pub use task_repository::{TaskFilter, TaskRepository};
