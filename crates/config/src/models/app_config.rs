use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::{
    environment::EnvironmentConfig,
    logging::LogConfig,
    sync::{CallbackConfig, RegistryConfig, SyncConfig, TrainerConfig},
    worker_channel::{ChannelConfig, WorkerConfig},
};
use crate::validation::ConfigValidator;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    pub channel: ChannelConfig,
    pub sync: SyncConfig,
    pub callback: CallbackConfig,
    pub registry: RegistryConfig,
    pub trainer: TrainerConfig,
    pub logging: LogConfig,
    /// 旧版 JSON 环境配置文件，文件中的环境不会覆盖已配置的同名环境
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environments_file: Option<String>,
    pub environments: HashMap<String, EnvironmentConfig>,
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/trainsync.toml",
                "trainsync.toml",
                "/etc/trainsync/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TRAINSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.merge_environments_file()?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.merge_environments_file()?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Absent environments resolve to an empty config, never an error.
    pub fn environment(&self, name: &str) -> EnvironmentConfig {
        self.environments.get(name).cloned().unwrap_or_default()
    }

    fn merge_environments_file(&mut self) -> Result<()> {
        let Some(ref path) = self.environments_file else {
            return Ok(());
        };
        if !Path::new(path).exists() {
            return Ok(());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("读取环境配置文件失败: {path}"))?;
        if raw.trim().is_empty() {
            return Ok(());
        }
        let from_file: HashMap<String, EnvironmentConfig> = serde_json::from_str(&raw)
            .with_context(|| format!("解析环境配置文件失败: {path}"))?;

        for (name, env) in from_file {
            self.environments.entry(name).or_insert(env);
        }
        Ok(())
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.worker.validate()?;
        self.channel.validate()?;
        self.sync.validate()?;
        self.callback.validate()?;
        self.registry.validate()?;
        self.trainer.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransitionPolicyKind;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.worker.worker_id, "worker-001");
        assert_eq!(config.channel.heartbeat_interval_seconds, 10);
        assert_eq!(config.sync.upload_timeout_seconds, 30);
        assert_eq!(
            config.registry.transition_policy,
            TransitionPolicyKind::LastWriteWins
        );
        assert!(config.registry.max_retained_tasks.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_environment_is_empty() {
        let config = AppConfig::default();
        assert!(config.environment("prod").is_empty());
    }

    #[test]
    fn test_app_config_from_toml() {
        let toml_str = r#"
[worker]
worker_id = "gpu-node-3"

[channel]
enabled = true
url = "ws://control-plane:9000/ws"
heartbeat_interval_seconds = 15

[sync]
workspace_root = "/data/train"
mirror_dir = "/mnt/train_loras"

[registry]
transition_policy = "validated"
max_retained_tasks = 500

[environments.prod.storage]
host = "http://oss.prod"
bucket_name = "loras"
upload_dir = "lora/"
app_id = "a"
app_token = "t"

[environments.prod.control_plane]
host = "http://cp.prod"
"#;

        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.worker.worker_id, "gpu-node-3");
        assert!(config.channel.enabled);
        assert_eq!(config.channel.heartbeat_interval_seconds, 15);
        assert_eq!(config.channel.receive_backoff_ms, 1000);
        assert_eq!(config.sync.mirror_dir.as_deref(), Some("/mnt/train_loras"));
        assert_eq!(config.registry.max_retained_tasks, Some(500));

        let prod = config.environment("prod");
        assert_eq!(prod.storage.unwrap().bucket_name, "loras");
        assert_eq!(prod.control_plane.unwrap().host, "http://cp.prod");
    }

    #[test]
    fn test_app_config_toml_roundtrip() {
        let config = AppConfig::default();
        let serialized = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&serialized).unwrap();
        assert_eq!(parsed.worker.worker_id, config.worker.worker_id);
        assert_eq!(parsed.channel.url, config.channel.url);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let toml_str = r#"
[sync]
upload_timeout_seconds = 0
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }
}
