use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub hostname: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-001".to_string(),
            hostname: "localhost".to_string(),
        }
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.worker_id, "worker.worker_id")?;
        ValidationUtils::validate_not_empty(&self.hostname, "worker.hostname")?;
        Ok(())
    }
}

/// 与控制面之间的长连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub url: String,
    pub heartbeat_interval_seconds: u64,
    pub receive_backoff_ms: u64,
    pub heartbeat_payload: String,
    /// 建连（含握手问候）与单次写入的上限
    pub connect_timeout_seconds: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "ws://localhost:9000/ws/worker".to_string(),
            heartbeat_interval_seconds: 10,
            receive_backoff_ms: 1000,
            heartbeat_payload: "ping".to_string(),
            connect_timeout_seconds: 10,
        }
    }
}

impl ConfigValidator for ChannelConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if !self.enabled {
            return Ok(());
        }
        ValidationUtils::validate_url(&self.url, "channel.url")?;
        ValidationUtils::validate_timeout_seconds(
            self.heartbeat_interval_seconds,
            "channel.heartbeat_interval_seconds",
        )?;
        if self.receive_backoff_ms == 0 {
            return Err(crate::ConfigError::Validation(
                "channel.receive_backoff_ms must be greater than 0".to_string(),
            ));
        }
        ValidationUtils::validate_not_empty(&self.heartbeat_payload, "channel.heartbeat_payload")?;
        ValidationUtils::validate_timeout_seconds(
            self.connect_timeout_seconds,
            "channel.connect_timeout_seconds",
        )?;
        Ok(())
    }
}
