pub mod task_runner;

pub use task_runner::{EngineHandle, EngineTask, TaskRunner, TaskRunnerHandle};
