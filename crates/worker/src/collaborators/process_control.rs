use std::collections::HashMap;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use trainsync_errors::{SyncError, SyncResult};

use super::ProcessControl;

/// 按任务ID记录训练进程PID，终止时向进程发送信号
pub struct PidProcessControl {
    running_processes: RwLock<HashMap<String, u32>>,
}

impl PidProcessControl {
    pub fn new() -> Self {
        Self {
            running_processes: RwLock::new(HashMap::new()),
        }
    }

    pub async fn track<S: Into<String>>(&self, task_id: S, pid: u32) {
        let task_id = task_id.into();
        info!("Tracking training process: task_id={}, pid={}", task_id, pid);
        self.running_processes.write().await.insert(task_id, pid);
    }

    pub async fn untrack(&self, task_id: &str) -> Option<u32> {
        self.running_processes.write().await.remove(task_id)
    }

    pub async fn tracked_pid(&self, task_id: &str) -> Option<u32> {
        self.running_processes.read().await.get(task_id).copied()
    }
}

impl Default for PidProcessControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessControl for PidProcessControl {
    async fn stop(&self, task_id: &str) -> SyncResult<()> {
        let Some(pid) = self.untrack(task_id).await else {
            warn!("No tracked training process for task {}", task_id);
            return Err(SyncError::task_not_found(task_id));
        };

        #[cfg(unix)]
        let output = Command::new("kill").arg(pid.to_string()).output().await;
        #[cfg(windows)]
        let output = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                info!("Stopped training process: task_id={}, pid={}", task_id, pid);
                Ok(())
            }
            Ok(output) => {
                let error_msg = String::from_utf8_lossy(&output.stderr);
                error!(
                    "Failed to stop training process: task_id={}, pid={}, error={}",
                    task_id, pid, error_msg
                );
                Err(SyncError::ProcessControl(format!(
                    "stopping pid {pid} failed: {error_msg}"
                )))
            }
            Err(e) => {
                error!(
                    "Failed to run kill command: task_id={}, pid={}, error={}",
                    task_id, pid, e
                );
                Err(SyncError::ProcessControl(format!(
                    "stopping pid {pid} failed: {e}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_untracked_task_fails() {
        let control = PidProcessControl::new();
        let err = control.stop("missing").await.unwrap_err();
        assert!(matches!(err, SyncError::TaskNotFound { ref id } if id == "missing"));
    }

    #[tokio::test]
    async fn test_track_and_untrack() {
        let control = PidProcessControl::new();
        control.track("task-1", 4242).await;
        assert_eq!(control.tracked_pid("task-1").await, Some(4242));
        assert_eq!(control.untrack("task-1").await, Some(4242));
        assert_eq!(control.tracked_pid("task-1").await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_tracked_process() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let control = PidProcessControl::new();
        control.track("task-2", child.id().unwrap()).await;

        assert!(control.stop("task-2").await.is_ok());
        let status = child.wait().await.unwrap();
        assert!(!status.success());
        assert_eq!(control.tracked_pid("task-2").await, None);
    }
}
