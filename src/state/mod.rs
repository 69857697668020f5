//! State module for tracking page-task progress
//!
//! # Components
//!
//! - `TaskState`: the lifecycle of a single page task, from fetched page to emitted records

mod task_state;

pub use task_state::TaskState;
