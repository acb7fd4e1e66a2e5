use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 训练输出目录的相对路径以此为根
    pub workspace_root: String,
    pub sample_subdir: String,
    /// 模型文件上传后额外复制一份到 `<mirror_dir>/<YYYYMMDD>/`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror_dir: Option<String>,
    pub upload_timeout_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workspace_root: ".".to_string(),
            sample_subdir: "sample".to_string(),
            mirror_dir: None,
            upload_timeout_seconds: 30,
        }
    }
}

impl ConfigValidator for SyncConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.workspace_root, "sync.workspace_root")?;
        ValidationUtils::validate_not_empty(&self.sample_subdir, "sync.sample_subdir")?;
        ValidationUtils::validate_timeout_seconds(
            self.upload_timeout_seconds,
            "sync.upload_timeout_seconds",
        )?;
        if let Some(ref dir) = self.mirror_dir {
            ValidationUtils::validate_not_empty(dir, "sync.mirror_dir")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub timeout_seconds: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self { timeout_seconds: 30 }
    }
}

impl ConfigValidator for CallbackConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_timeout_seconds(self.timeout_seconds, "callback.timeout_seconds")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicyKind {
    #[default]
    LastWriteWins,
    Validated,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RegistryConfig {
    pub transition_policy: TransitionPolicyKind,
    /// None 表示不淘汰任何任务
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retained_tasks: Option<usize>,
}

impl ConfigValidator for RegistryConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if let Some(max) = self.max_retained_tasks {
            ValidationUtils::validate_count(max, "registry.max_retained_tasks", 1_000_000)?;
        }
        Ok(())
    }
}

/// 训练器 CPU 线程数建议，入口层使用
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub large_dataset_threshold: usize,
    pub large_dataset_cpu_threads: u32,
    pub default_cpu_threads: u32,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            large_dataset_threshold: 200,
            large_dataset_cpu_threads: 8,
            default_cpu_threads: 2,
        }
    }
}

impl TrainerConfig {
    pub fn suggest_cpu_threads(&self, image_count: usize) -> u32 {
        if image_count > self.large_dataset_threshold {
            self.large_dataset_cpu_threads
        } else {
            self.default_cpu_threads
        }
    }
}

impl ConfigValidator for TrainerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.large_dataset_cpu_threads == 0 || self.default_cpu_threads == 0 {
            return Err(crate::ConfigError::Validation(
                "trainer cpu thread counts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
