//! Durable task storage (§4.6).

pub mod task_store;

pub use task_store::{CreateError, TaskStore};
