use std::fmt;

pub type TaskId = usize;

/// One registration of a task. Ids are reused; the generation tells registrations apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskKey {
    pub id: TaskId,
    pub generation: u64,
}

/// Requests termination of whatever backs a task. Called at most once by the registry.
pub trait Cancel: Send + Sync {
    fn cancel(&self);
}

impl<F> Cancel for F
where
    F: Fn() + Send + Sync,
{
    fn cancel(&self) {
        self()
    }
}

pub struct Task {
    pub id: TaskId,
    pub generation: u64,
    pub label: String,
    cancel: Box<dyn Cancel>,
}

impl Task {
    pub fn new(key: TaskKey, label: String, cancel: Box<dyn Cancel>) -> Self {
        Self {
            id: key.id,
            generation: key.generation,
            label,
            cancel,
        }
    }

    /// Consumes the task, so a removed entry can never be cancelled twice.
    pub fn cancel(self) {
        self.cancel.cancel();
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            label: self.label.clone(),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub id: TaskId,
    pub label: String,
}

impl fmt::Display for TaskSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]: {}", self.id, self.label)
    }
}
