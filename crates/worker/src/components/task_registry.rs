use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use trainsync_config::{RegistryConfig, TransitionPolicyKind};
use trainsync_domain::{ArtifactRecord, Task, TaskConfig, TaskListEntry, TaskStatus};

use crate::collaborators::ProcessControl;

/// 状态写入策略
///
/// `LastWriteWins` 无条件覆盖，`Validated` 拒绝状态机之外的迁移。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionPolicy {
    #[default]
    LastWriteWins,
    Validated,
}

impl From<TransitionPolicyKind> for TransitionPolicy {
    fn from(kind: TransitionPolicyKind) -> Self {
        match kind {
            TransitionPolicyKind::LastWriteWins => TransitionPolicy::LastWriteWins,
            TransitionPolicyKind::Validated => TransitionPolicy::Validated,
        }
    }
}

struct Entry {
    task: Task,
    seq: u64,
}

/// In-memory store of every task this worker knows about.
///
/// All status mutation goes through [`TaskRegistry::set_status`]; readers get
/// snapshot clones so no caller ever holds the lock across an await point.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Entry>>,
    next_seq: AtomicU64,
    policy: TransitionPolicy,
    max_retained_tasks: Option<usize>,
    process_control: Arc<dyn ProcessControl>,
}

impl TaskRegistry {
    pub fn new(process_control: Arc<dyn ProcessControl>) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            policy: TransitionPolicy::default(),
            max_retained_tasks: None,
            process_control,
        }
    }

    pub fn from_config(config: &RegistryConfig, process_control: Arc<dyn ProcessControl>) -> Self {
        let mut registry = Self::new(process_control).with_policy(config.transition_policy.into());
        registry.max_retained_tasks = config.max_retained_tasks;
        registry
    }

    pub fn with_policy(mut self, policy: TransitionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Caps the number of retained tasks. Only terminal tasks are ever evicted.
    pub fn with_max_retained_tasks(mut self, max: usize) -> Self {
        self.max_retained_tasks = Some(max);
        self
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Stores a fresh task in CREATED. An existing task with the same id is
    /// replaced.
    pub async fn register<S: Into<String>>(&self, id: S, config: TaskConfig) {
        let id = id.into();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut tasks = self.tasks.write().await;
        if tasks
            .insert(
                id.clone(),
                Entry {
                    task: Task::new(id.clone(), config),
                    seq,
                },
            )
            .is_some()
        {
            warn!("Task {} re-registered, previous state discarded", id);
        } else {
            info!("Task {} registered", id);
        }

        if let Some(max) = self.max_retained_tasks {
            Self::evict_terminal(&mut tasks, max, &id);
        }
    }

    fn evict_terminal(tasks: &mut HashMap<String, Entry>, max: usize, keep: &str) {
        if tasks.len() <= max {
            return;
        }
        let mut candidates: Vec<(u64, String)> = tasks
            .iter()
            .filter(|(id, entry)| id.as_str() != keep && entry.task.status.is_terminal())
            .map(|(id, entry)| (entry.seq, id.clone()))
            .collect();
        candidates.sort_unstable();

        let excess = tasks.len() - max;
        for (_, id) in candidates.into_iter().take(excess) {
            tasks.remove(&id);
            debug!("Evicted terminal task {}", id);
        }
        if tasks.len() > max {
            warn!(
                "Task registry holds {} tasks, above the retention cap of {}; remaining tasks are still active",
                tasks.len(),
                max
            );
        }
    }

    /// Returns whether the status was applied. Unknown ids and transitions
    /// refused by the policy leave the registry untouched.
    pub async fn set_status(&self, id: &str, status: TaskStatus) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(entry) = tasks.get_mut(id) else {
            debug!("Ignoring status {} for unknown task {}", status, id);
            return false;
        };

        let current = entry.task.status;
        if self.policy == TransitionPolicy::Validated && !current.can_transition_to(status) {
            warn!(
                "Rejected status transition for task {}: {} -> {}",
                id, current, status
            );
            return false;
        }

        entry.task.update_status(status);
        debug!("Task {} status: {} -> {}", id, current, status);
        true
    }

    pub async fn status(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.read().await.get(id).map(|entry| entry.task.status)
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.tasks.read().await.get(id).map(|entry| entry.task.clone())
    }

    pub async fn list(&self) -> Vec<TaskListEntry> {
        self.tasks
            .read()
            .await
            .values()
            .map(|entry| entry.task.list_entry())
            .collect()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.tasks.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// 是否还有占用 worker 的任务
    pub async fn has_active_tasks(&self) -> bool {
        self.tasks
            .read()
            .await
            .values()
            .any(|entry| entry.task.status.is_active())
    }

    pub async fn append_model(&self, id: &str, record: ArtifactRecord) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(id) {
            Some(entry) => {
                entry.task.models.push(record);
                true
            }
            None => false,
        }
    }

    pub async fn append_sample_image(&self, id: &str, record: ArtifactRecord) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(id) {
            Some(entry) => {
                entry.task.sample_images.push(record);
                true
            }
            None => false,
        }
    }

    /// Stops the training process and marks the task TERMINATED. The status
    /// is forced even when stopping fails or panics. The stop request is
    /// issued for unknown ids too; only the status write is skipped, and the
    /// call then returns false.
    pub async fn terminate(&self, id: &str) -> bool {
        info!("Terminating task {}", id);
        match AssertUnwindSafe(self.process_control.stop(id))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => info!("Training process of task {} stopped", id),
            Ok(Err(e)) => error!("Failed to stop training process of task {}: {}", id, e),
            Err(_) => error!("Process control panicked while stopping task {}", id),
        }

        if self.set_status(id, TaskStatus::Terminated).await {
            return true;
        }
        if !self.contains(id).await {
            warn!("Task {} is not registered, nothing to mark as terminated", id);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use trainsync_errors::SyncResult;

    struct NoopControl;

    #[async_trait]
    impl ProcessControl for NoopControl {
        async fn stop(&self, _task_id: &str) -> SyncResult<()> {
            Ok(())
        }
    }

    fn registry() -> TaskRegistry {
        TaskRegistry::new(Arc::new(NoopControl))
    }

    #[tokio::test]
    async fn test_reregistration_overwrites() {
        let registry = registry();
        registry
            .register("task-1", TaskConfig::from_value(json!({ "a": 1 })))
            .await;
        registry.set_status("task-1", TaskStatus::Running).await;
        registry
            .register("task-1", TaskConfig::from_value(json!({ "a": 2 })))
            .await;

        let task = registry.get("task-1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.config.get("a"), Some(&json!(2)));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_set_status_on_unknown_task_is_noop() {
        let registry = registry();
        assert!(!registry.set_status("missing", TaskStatus::Running).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_last_write_wins_accepts_backward_moves() {
        let registry = registry();
        registry.register("task-1", TaskConfig::default()).await;
        assert!(registry.set_status("task-1", TaskStatus::Uploaded).await);
        assert!(registry.set_status("task-1", TaskStatus::Running).await);
        assert_eq!(registry.status("task-1").await, Some(TaskStatus::Running));
    }

    #[tokio::test]
    async fn test_list_reports_name_and_value() {
        let registry = registry();
        registry.register("task-1", TaskConfig::default()).await;
        registry.set_status("task-1", TaskStatus::Finished).await;

        let list = registry.list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "task-1");
        assert_eq!(list[0].status_name, "FINISHED");
        assert_eq!(list[0].status_value, 2);
    }

    #[tokio::test]
    async fn test_policy_from_config() {
        let config = RegistryConfig {
            transition_policy: TransitionPolicyKind::Validated,
            max_retained_tasks: Some(3),
        };
        let registry = TaskRegistry::from_config(&config, Arc::new(NoopControl));
        assert_eq!(registry.policy(), TransitionPolicy::Validated);
    }
}
