pub mod orchestrator;
pub mod task_registry;
