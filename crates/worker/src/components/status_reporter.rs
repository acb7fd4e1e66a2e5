use std::sync::Arc;

use tracing::{debug, error, warn};
use trainsync_domain::{ProgressEvent, ResultCode, Task, TaskStatus};

use super::resilient_channel::{ResilientChannel, SendOutcome};
use super::task_registry::TaskRegistry;
use crate::collaborators::CallbackReporter;

/// 向控制面汇报任务结果与进度
///
/// Terminal results go through the callback collaborator; progress events
/// ride the long-lived channel when one is attached. Neither path ever
/// returns an error to the caller.
pub struct StatusReporter {
    worker_id: String,
    callback: Arc<dyn CallbackReporter>,
    channel: Option<Arc<ResilientChannel>>,
}

impl StatusReporter {
    pub fn new<S: Into<String>>(worker_id: S, callback: Arc<dyn CallbackReporter>) -> Self {
        Self {
            worker_id: worker_id.into(),
            callback,
            channel: None,
        }
    }

    pub fn with_channel(mut self, channel: Arc<ResilientChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub async fn report_result(&self, task: &Task, code: ResultCode) {
        let Some(environment) = task.config.environment() else {
            error!(
                "Task {} has no environment configured, result (code={}) not reported",
                task.id,
                code.as_i32()
            );
            return;
        };

        let summary = task.summary(code);
        if let Err(e) = self.callback.report_result(environment, &summary).await {
            error!(
                "Failed to report result of task {} (code={}): {}",
                task.id, summary.code, e
            );
        }
    }

    pub async fn report_by_id(&self, registry: &TaskRegistry, task_id: &str, code: ResultCode) {
        match registry.get(task_id).await {
            Some(task) => self.report_result(&task, code).await,
            None => debug!("Task {} not found, nothing to report", task_id),
        }
    }

    pub async fn publish_progress(&self, event: &ProgressEvent) {
        let Some(ref channel) = self.channel else {
            return;
        };
        let message = match event.to_message() {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to encode progress event for task {}: {}", event.task_id, e);
                return;
            }
        };
        if channel.send(message).await != SendOutcome::Sent {
            warn!(
                "Progress event {} for task {} was not delivered",
                event.event, event.task_id
            );
        }
    }

    pub async fn publish_status(&self, task_id: &str, status: TaskStatus) {
        if self.channel.is_none() {
            return;
        }
        let event = ProgressEvent::task_status(self.worker_id.clone(), task_id, status);
        self.publish_progress(&event).await;
    }
}
