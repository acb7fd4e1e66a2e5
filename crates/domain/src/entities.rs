use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task_config::TaskConfig;

/// 训练任务状态
///
/// 数值与名称是对外接口的一部分（任务列表、状态查询、进度推送），不可调整。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "CREATED")]
    Created,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "FINISHED")]
    Finished,
    #[serde(rename = "TERMINATED")]
    Terminated,
    #[serde(rename = "TRAIN_FAILED")]
    TrainFailed,
    #[serde(rename = "UPLOADED")]
    Uploaded,
    #[serde(rename = "UPLOAD_FAILED")]
    UploadFailed,
}

impl TaskStatus {
    pub fn value(&self) -> i32 {
        match self {
            TaskStatus::Created => 0,
            TaskStatus::Running => 1,
            TaskStatus::Finished => 2,
            TaskStatus::Terminated => 3,
            TaskStatus::TrainFailed => 4,
            TaskStatus::Uploaded => 5,
            TaskStatus::UploadFailed => 6,
        }
    }
    pub fn name(&self) -> &'static str {
        match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Terminated => "TERMINATED",
            TaskStatus::TrainFailed => "TRAIN_FAILED",
            TaskStatus::Uploaded => "UPLOADED",
            TaskStatus::UploadFailed => "UPLOAD_FAILED",
        }
    }
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Uploaded
                | TaskStatus::UploadFailed
                | TaskStatus::TrainFailed
                | TaskStatus::Terminated
        )
    }
    /// 仍占用 worker 的状态，对应"是否空闲"查询
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Created | TaskStatus::Running | TaskStatus::Finished
        )
    }
    /// Forward edges of the lifecycle. Re-applying the current status is
    /// accepted as a no-op transition.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if *self == next {
            return true;
        }
        match (self, next) {
            (TaskStatus::Created, TaskStatus::Running) => true,
            (TaskStatus::Running, TaskStatus::Finished) => true,
            (TaskStatus::Finished, TaskStatus::Uploaded | TaskStatus::UploadFailed) => true,
            (
                TaskStatus::Created | TaskStatus::Running | TaskStatus::Finished,
                TaskStatus::Terminated | TaskStatus::TrainFailed,
            ) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 已上传的产物记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub name: String,
    #[serde(rename = "oss_path")]
    pub remote_path: String,
}

impl ArtifactRecord {
    pub fn new<N: Into<String>, P: Into<String>>(name: N, remote_path: P) -> Self {
        Self {
            name: name.into(),
            remote_path: remote_path.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub config: TaskConfig,
    pub models: Vec<ArtifactRecord>,
    pub sample_images: Vec<ArtifactRecord>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new<S: Into<String>>(id: S, config: TaskConfig) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: TaskStatus::Created,
            config,
            models: Vec::new(),
            sample_images: Vec::new(),
            registered_at: now,
            updated_at: now,
        }
    }
    pub fn update_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
    pub fn summary(&self, code: ResultCode) -> TaskSummary {
        TaskSummary {
            code: code.as_i32(),
            task_id: self.id.clone(),
            models: self.models.clone(),
            sample_images: self.sample_images.clone(),
        }
    }
    pub fn list_entry(&self) -> TaskListEntry {
        TaskListEntry {
            id: self.id.clone(),
            status_name: self.status.name().to_string(),
            status_value: self.status.value(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskListEntry {
    pub id: String,
    pub status_name: String,
    pub status_value: i32,
}

/// 回调结果码：0 成功，1 失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    Failure,
}

impl ResultCode {
    pub fn as_i32(&self) -> i32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::Failure => 1,
        }
    }
}

/// 训练结束后回调控制面的载荷
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSummary {
    pub code: i32,
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub models: Vec<ArtifactRecord>,
    pub sample_images: Vec<ArtifactRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_values_are_stable() {
        assert_eq!(TaskStatus::Created.value(), 0);
        assert_eq!(TaskStatus::Terminated.value(), 3);
        assert_eq!(TaskStatus::TrainFailed.value(), 4);
        assert_eq!(TaskStatus::Uploaded.value(), 5);
        assert_eq!(TaskStatus::UploadFailed.value(), 6);
        assert_eq!(
            serde_json::to_string(&TaskStatus::UploadFailed).unwrap(),
            "\"UPLOAD_FAILED\""
        );
    }

    #[test]
    fn test_terminal_and_active_partition() {
        let all = [
            TaskStatus::Created,
            TaskStatus::Running,
            TaskStatus::Finished,
            TaskStatus::Terminated,
            TaskStatus::TrainFailed,
            TaskStatus::Uploaded,
            TaskStatus::UploadFailed,
        ];
        for status in all {
            assert_ne!(status.is_terminal(), status.is_active(), "{status}");
        }
    }

    #[test]
    fn test_backward_transitions_rejected() {
        assert!(!TaskStatus::Terminated.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Uploaded.can_transition_to(TaskStatus::Finished));
        assert!(!TaskStatus::Finished.can_transition_to(TaskStatus::Created));
        assert!(!TaskStatus::Created.can_transition_to(TaskStatus::Uploaded));
    }

    #[test]
    fn test_forward_transitions_accepted() {
        assert!(TaskStatus::Created.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Finished));
        assert!(TaskStatus::Finished.can_transition_to(TaskStatus::UploadFailed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Terminated));
        assert!(TaskStatus::Created.can_transition_to(TaskStatus::TrainFailed));
        assert!(TaskStatus::Terminated.can_transition_to(TaskStatus::Terminated));
    }

    #[test]
    fn test_summary_wire_format() {
        let mut task = Task::new("t-1", TaskConfig::default());
        task.models
            .push(ArtifactRecord::new("a.safetensors", "lora/20250101/a.safetensors"));

        let value = serde_json::to_value(task.summary(ResultCode::Success)).unwrap();
        assert_eq!(value["code"], 0);
        assert_eq!(value["taskId"], "t-1");
        assert_eq!(value["models"][0]["oss_path"], "lora/20250101/a.safetensors");
        assert!(value["sample_images"].as_array().unwrap().is_empty());
    }
}
