use std::collections::HashMap;

use log::info;
use parking_lot::RwLock;

use crate::error::RegistryError;
use crate::models::task::{Cancel, Task, TaskId, TaskKey, TaskSummary};

pub const MAX_TASK_ID: TaskId = 200_000;

/// The authoritative table of live tasks.
///
/// A task id missing from the registry is neither listed nor cancelable, even if
/// its process is still exiting.
pub struct TaskRegistry {
    state: RwLock<RegistryState>,
    max_task_id: TaskId,
}

struct RegistryState {
    tasks: HashMap<TaskId, Task>,
    last_added: Option<TaskId>,
    next_generation: u64,
}

impl TaskRegistry {
    pub fn with_max_task_id(max_task_id: TaskId) -> Self {
        TaskRegistry {
            state: RwLock::new(RegistryState {
                tasks: HashMap::new(),
                last_added: None,
                next_generation: 0,
            }),
            max_task_id: max_task_id.max(1),
        }
    }

    /// Reserves the first free id after the last one handed out, wrapping at the id limit.
    pub fn add(&self, label: String, cancel: Box<dyn Cancel>) -> Result<TaskKey, RegistryError> {
        let mut state = self.state.write();
        let start = state
            .last_added
            .map_or(0, |last| (last + 1) % self.max_task_id);

        let id = (0..self.max_task_id)
            .map(|offset| (start + offset) % self.max_task_id)
            .find(|id| !state.tasks.contains_key(id))
            .ok_or(RegistryError::Exhausted {
                limit: self.max_task_id,
            })?;

        let key = TaskKey {
            id,
            generation: state.next_generation,
        };
        state.next_generation += 1;
        info!("Task '{}' registered: {}", id, label);
        state.tasks.insert(id, Task::new(key, label, cancel));
        state.last_added = Some(id);
        Ok(key)
    }

    /// Removes the task and requests its termination. False if the id is not live.
    pub fn cancel(&self, id: TaskId) -> bool {
        let task = self.state.write().tasks.remove(&id);
        match task {
            Some(task) => {
                info!("Task '{}' cancelled.", id);
                task.cancel();
                true
            }
            None => false,
        }
    }

    /// Removes a task whose process already finished, without cancelling it.
    /// A newer task that took over the id stays registered.
    pub fn release(&self, key: TaskKey) -> bool {
        let mut state = self.state.write();
        let current = state
            .tasks
            .get(&key.id)
            .is_some_and(|task| task.generation == key.generation);
        if current {
            state.tasks.remove(&key.id);
            info!("Task '{}' released.", key.id);
        }
        current
    }

    pub fn list(&self) -> Vec<TaskSummary> {
        self.state.read().tasks.values().map(Task::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Task> = self.state.write().tasks.drain().map(|(_, task)| task).collect();
        let count = drained.len();
        for task in drained {
            task.cancel();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn noop() -> Box<dyn Cancel> {
        Box::new(|| {})
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Box<dyn Cancel> {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn add(registry: &TaskRegistry, label: &str) -> Result<TaskId, RegistryError> {
        registry.add(label.into(), noop()).map(|key| key.id)
    }

    #[test]
    fn ids_are_handed_out_round_robin() {
        let registry = TaskRegistry::with_max_task_id(10);
        let first = registry.add("a".into(), noop()).unwrap();
        assert_eq!(first.id, 0);
        assert_eq!(add(&registry, "b"), Ok(1));
        assert!(registry.release(first));
        // 0 is free again, but allocation continues after the last id.
        assert_eq!(add(&registry, "c"), Ok(2));
    }

    #[test]
    fn allocation_wraps_around_the_id_space() {
        let registry = TaskRegistry::with_max_task_id(3);
        let keys: Vec<TaskKey> = (0..3).map(|_| registry.add("t".into(), noop()).unwrap()).collect();
        assert_eq!(keys.iter().map(|key| key.id).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(registry.release(keys[1]));
        assert_eq!(add(&registry, "again"), Ok(1));
    }

    #[test]
    fn fails_once_every_id_is_taken() {
        let registry = TaskRegistry::with_max_task_id(4);
        for _ in 0..4 {
            registry.add("t".into(), noop()).unwrap();
        }
        assert_eq!(
            add(&registry, "overflow"),
            Err(RegistryError::Exhausted { limit: 4 })
        );
        assert!(registry.cancel(2));
        assert_eq!(add(&registry, "fits"), Ok(2));
    }

    #[test]
    fn cancel_is_idempotent() {
        let registry = TaskRegistry::with_max_task_id(MAX_TASK_ID);
        let calls = Arc::new(AtomicUsize::new(0));
        let id = registry.add("sleep".into(), counting(&calls)).unwrap().id;

        assert!(registry.cancel(id));
        assert!(!registry.cancel(id));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_does_not_invoke_cancel() {
        let registry = TaskRegistry::with_max_task_id(MAX_TASK_ID);
        let calls = Arc::new(AtomicUsize::new(0));
        let key = registry.add("echo".into(), counting(&calls)).unwrap();

        assert!(registry.release(key));
        assert!(!registry.release(key));
        assert!(!registry.cancel(key.id));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stale_release_leaves_the_reused_id_alone() {
        let registry = TaskRegistry::with_max_task_id(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let old = registry.add("sleep 30".into(), noop()).unwrap();
        assert!(registry.cancel(old.id));

        let new = registry.add("sleep 30".into(), counting(&calls)).unwrap();
        assert_eq!(new.id, old.id);
        assert_ne!(new.generation, old.generation);

        assert!(!registry.release(old));
        assert_eq!(registry.len(), 1);
        assert!(registry.cancel(new.id));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ids_stay_unique_under_churn() {
        let registry = TaskRegistry::with_max_task_id(8);
        let mut live: Vec<TaskKey> = Vec::new();
        for round in 0..200 {
            if live.len() == 8 || (round % 3 == 2 && !live.is_empty()) {
                let key = live.remove(round % live.len());
                assert!(registry.release(key));
            } else {
                let key = registry.add(format!("task {round}"), noop()).unwrap();
                assert!(live.iter().all(|k| k.id != key.id), "id {} handed out twice", key.id);
                live.push(key);
            }
            let listed: HashSet<TaskId> = registry.list().iter().map(|t| t.id).collect();
            assert_eq!(listed, live.iter().map(|k| k.id).collect::<HashSet<_>>());
        }
    }

    #[test]
    fn concurrent_adds_never_collide() {
        let registry = Arc::new(TaskRegistry::with_max_task_id(64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..8)
                        .map(|_| registry.add("t".into(), noop()).unwrap().id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let ids: HashSet<TaskId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(ids.len(), 64);
        assert!(registry.add("full".into(), noop()).is_err());
    }

    #[test]
    fn list_renders_id_and_label() {
        let registry = TaskRegistry::with_max_task_id(MAX_TASK_ID);
        registry.add("bash ping example.com".into(), noop()).unwrap();
        let lines: Vec<String> = registry.list().iter().map(ToString::to_string).collect();
        assert_eq!(lines, vec!["[0]: bash ping example.com".to_string()]);
    }

    #[test]
    fn cancel_all_empties_the_table() {
        let registry = TaskRegistry::with_max_task_id(MAX_TASK_ID);
        let calls = Arc::new(AtomicUsize::new(0));
        registry.add("a".into(), counting(&calls)).unwrap();
        registry.add("b".into(), counting(&calls)).unwrap();

        assert_eq!(registry.cancel_all(), 2);
        assert!(registry.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
