use serde::{Deserialize, Serialize};

/// Per-environment endpoints. Field aliases accept the legacy
/// `oss_config` / `dabi_config` JSON layout.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct EnvironmentConfig {
    #[serde(alias = "oss_config", skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,
    #[serde(alias = "dabi_config", skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<ControlPlaneConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(alias = "oss_host")]
    pub host: String,
    pub bucket_name: String,
    #[serde(alias = "lora_train_dir")]
    pub upload_dir: String,
    pub app_id: String,
    pub app_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub host: String,
}

impl EnvironmentConfig {
    pub fn is_empty(&self) -> bool {
        self.storage.is_none() && self.control_plane.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_layout_is_accepted() {
        let raw = serde_json::json!({
            "oss_config": {
                "oss_host": "http://oss.local",
                "bucket_name": "models",
                "lora_train_dir": "lora/",
                "app_id": "id",
                "app_token": "token"
            },
            "dabi_config": { "host": "http://cp.local" }
        });
        let env: EnvironmentConfig = serde_json::from_value(raw).unwrap();
        let storage = env.storage.unwrap();
        assert_eq!(storage.host, "http://oss.local");
        assert_eq!(storage.upload_dir, "lora/");
        assert_eq!(env.control_plane.unwrap().host, "http://cp.local");
    }

    #[test]
    fn test_default_is_empty() {
        assert!(EnvironmentConfig::default().is_empty());
    }
}
