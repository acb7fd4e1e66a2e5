use std::io::ErrorKind;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use trainsync_config::SyncConfig;
use trainsync_domain::{ArtifactRecord, ResultCode, Task, TaskStatus};
use trainsync_errors::{SyncError, SyncResult};

use super::status_reporter::StatusReporter;
use super::task_registry::TaskRegistry;
use crate::collaborators::ArtifactUploader;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub workspace_root: PathBuf,
    pub sample_subdir: String,
    pub mirror_dir: Option<PathBuf>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            workspace_root: PathBuf::from(&config.workspace_root),
            sample_subdir: config.sample_subdir.clone(),
            mirror_dir: config.mirror_dir.as_ref().map(PathBuf::from),
        }
    }
}

/// 训练完成后收集产物、上传并汇报最终结果
///
/// The expected epoch count is the only completeness signal: a kind of
/// artifact is uploaded only when the number of candidate files equals it
/// exactly. Uploads run in name order and stop as soon as the task leaves
/// FINISHED, so a termination during sync keeps what was already shipped.
pub struct ArtifactSyncEngine {
    registry: Arc<TaskRegistry>,
    uploader: Arc<dyn ArtifactUploader>,
    reporter: Arc<StatusReporter>,
    settings: SyncSettings,
}

impl ArtifactSyncEngine {
    pub fn new(
        registry: Arc<TaskRegistry>,
        uploader: Arc<dyn ArtifactUploader>,
        reporter: Arc<StatusReporter>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            registry,
            uploader,
            reporter,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Runs the full post-training procedure for one task and returns the
    /// task's status afterwards. Unknown tasks are ignored. Exactly one
    /// terminal result is reported per call, whatever goes wrong inside.
    pub async fn sync_after_completion(&self, task_id: &str) -> Option<TaskStatus> {
        let Some(task) = self.registry.get(task_id).await else {
            debug!("Task {} not found, skipping artifact sync", task_id);
            return None;
        };
        info!("Starting artifact sync for task {}", task_id);

        let (status, code) = match AssertUnwindSafe(self.upload_artifacts(&task))
            .catch_unwind()
            .await
        {
            Ok(Ok(true)) => (TaskStatus::Uploaded, ResultCode::Success),
            Ok(Ok(false)) => {
                warn!(
                    "Task {}: neither model nor sample image count matches the expected epochs",
                    task_id
                );
                (TaskStatus::UploadFailed, ResultCode::Failure)
            }
            Ok(Err(e)) => {
                error!("Artifact sync for task {} failed: {}", task_id, e);
                (TaskStatus::UploadFailed, ResultCode::Failure)
            }
            Err(_) => {
                error!("Artifact sync for task {} panicked", task_id);
                (TaskStatus::UploadFailed, ResultCode::Failure)
            }
        };

        let applied = self.registry.set_status(task_id, status).await;
        let snapshot = self.registry.get(task_id).await.unwrap_or(task);
        // 回调不依赖通道状态，先于进度推送发出
        self.reporter.report_result(&snapshot, code).await;
        if applied {
            self.reporter.publish_status(task_id, status).await;
        }

        let final_status = self.registry.status(task_id).await;
        info!(
            "Artifact sync for task {} finished with {:?}",
            task_id, final_status
        );
        final_status
    }

    /// Runs [`Self::sync_after_completion`] on its own tokio task.
    pub fn spawn_sync(self: &Arc<Self>, task_id: String) -> JoinHandle<Option<TaskStatus>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.sync_after_completion(&task_id).await })
    }

    /// Terminal path for a trainer that exited with an error.
    pub async fn mark_training_failed(&self, task_id: &str) -> bool {
        if !self.registry.set_status(task_id, TaskStatus::TrainFailed).await {
            return false;
        }
        warn!("Task {} training failed", task_id);
        self.reporter
            .report_by_id(&self.registry, task_id, ResultCode::Failure)
            .await;
        self.reporter
            .publish_status(task_id, TaskStatus::TrainFailed)
            .await;
        true
    }

    async fn upload_artifacts(&self, task: &Task) -> SyncResult<bool> {
        let output = task
            .config
            .output_spec()
            .map_err(|e| SyncError::invalid_task_config(&task.id, e.to_string()))?;

        let output_dir = self.settings.workspace_root.join(&output.output_dir);
        let sample_dir = output_dir.join(&self.settings.sample_subdir);
        let models =
            list_candidates(&output_dir, &output.output_name, Some(&output.model_extension)).await?;
        let samples = list_candidates(&sample_dir, &output.output_name, None).await?;

        let models_matched = models.len() == output.expected_epochs;
        let samples_matched = samples.len() == output.expected_epochs;
        info!(
            "Task {}: {} model files, {} sample images, {} epochs expected",
            task.id,
            models.len(),
            samples.len(),
            output.expected_epochs
        );

        if models_matched {
            let date_tag = Local::now().format("%Y%m%d").to_string();
            for name in &models {
                if !self.still_finished(&task.id).await {
                    info!(
                        "Task {} is no longer FINISHED, skipping model file {} and the rest",
                        task.id, name
                    );
                    break;
                }
                let path = output_dir.join(name);
                match self
                    .uploader
                    .upload_model(&output.environment, name, &path, &date_tag)
                    .await
                {
                    Ok(remote_path) => {
                        self.registry
                            .append_model(&task.id, ArtifactRecord::new(name.as_str(), remote_path))
                            .await;
                        self.mirror_model(&path, name, &date_tag).await;
                    }
                    Err(e) => warn!("Task {}: model file {} not uploaded: {}", task.id, name, e),
                }
            }
        }

        if samples_matched {
            for name in &samples {
                if !self.still_finished(&task.id).await {
                    info!(
                        "Task {} is no longer FINISHED, skipping sample image {} and the rest",
                        task.id, name
                    );
                    break;
                }
                let path = sample_dir.join(name);
                match self
                    .uploader
                    .upload_sample_image(&output.environment, name, &path)
                    .await
                {
                    Ok(remote_path) => {
                        self.registry
                            .append_sample_image(
                                &task.id,
                                ArtifactRecord::new(name.as_str(), remote_path),
                            )
                            .await;
                    }
                    Err(e) => warn!("Task {}: sample image {} not uploaded: {}", task.id, name, e),
                }
            }
        }

        Ok(models_matched || samples_matched)
    }

    async fn still_finished(&self, task_id: &str) -> bool {
        self.registry.status(task_id).await == Some(TaskStatus::Finished)
    }

    async fn mirror_model(&self, path: &Path, name: &str, date_tag: &str) {
        let Some(ref mirror_root) = self.settings.mirror_dir else {
            return;
        };
        let target_dir = mirror_root.join(date_tag);
        let result = async {
            tokio::fs::create_dir_all(&target_dir).await?;
            tokio::fs::copy(path, target_dir.join(name)).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;
        match result {
            Ok(()) => debug!("Mirrored {} to {}", name, target_dir.display()),
            Err(e) => error!(
                "Failed to mirror model file {} to {}: {}",
                name,
                target_dir.display(),
                e
            ),
        }
    }
}

/// Regular files (symlinks followed) in `dir` whose name starts with
/// `prefix` and, when given, ends with `extension`, sorted by name. A
/// missing directory has no candidates.
async fn list_candidates(
    dir: &Path,
    prefix: &str,
    extension: Option<&str>,
) -> SyncResult<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} does not exist, no candidates", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !name.starts_with(prefix) || extension.is_some_and(|ext| !name.ends_with(ext)) {
            continue;
        }
        match tokio::fs::metadata(entry.path()).await {
            Ok(metadata) if metadata.is_file() => names.push(name),
            _ => {}
        }
    }
    names.sort();
    Ok(names)
}
