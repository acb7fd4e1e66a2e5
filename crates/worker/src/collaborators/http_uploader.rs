use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{debug, error, info};
use trainsync_errors::{SyncError, SyncResult};

use super::{ArtifactUploader, EnvironmentLookup};

/// 通过HTTP multipart上传训练产物
///
/// 模型文件直传对象存储网关，样例图片经由控制面的上传接口转存。
/// 两者的响应体都在 `data.path` 中给出远端路径。
pub struct HttpArtifactUploader {
    environments: Arc<dyn EnvironmentLookup>,
    http_client: reqwest::Client,
}

impl HttpArtifactUploader {
    pub fn new(environments: Arc<dyn EnvironmentLookup>, timeout: Duration) -> SyncResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self {
            environments,
            http_client,
        })
    }

    async fn file_part(file_name: &str, local_path: &Path, mime: &str) -> SyncResult<Part> {
        let bytes = tokio::fs::read(local_path).await?;
        Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(|e| SyncError::Upload(format!("invalid mime type {mime}: {e}")))
    }

    async fn post_form(&self, url: &str, form: Form, file_name: &str) -> SyncResult<String> {
        let response = self
            .http_client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("POST {url} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Upload(format!(
                "upload of {file_name} rejected: HTTP {status} - {body}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SyncError::Upload(format!("invalid upload response for {file_name}: {e}")))?;
        extract_remote_path(&body).ok_or_else(|| {
            SyncError::Upload(format!("upload response for {file_name} has no data.path: {body}"))
        })
    }
}

fn extract_remote_path(body: &Value) -> Option<String> {
    body.get("data")?
        .get("path")?
        .as_str()
        .map(str::to_string)
}

#[async_trait]
impl ArtifactUploader for HttpArtifactUploader {
    async fn upload_model(
        &self,
        environment: &str,
        file_name: &str,
        local_path: &Path,
        date_tag: &str,
    ) -> SyncResult<String> {
        let Some(storage) = self.environments.environment(environment).storage else {
            return Err(SyncError::config_error(format!(
                "environment {environment} has no storage settings"
            )));
        };

        let url = format!("{}/upload/multipart", storage.host.trim_end_matches('/'));
        let form = Form::new()
            .text("bucketName", storage.bucket_name)
            .text("dir", format!("{}{date_tag}/", storage.upload_dir))
            .text("appToken", storage.app_token)
            .text("appId", storage.app_id)
            .part(
                "file",
                Self::file_part(file_name, local_path, "application/octet-stream").await?,
            );

        debug!("Uploading model file {} to {}", local_path.display(), url);
        match self.post_form(&url, form, file_name).await {
            Ok(path) => {
                info!("Uploaded model file {}: {}", file_name, path);
                Ok(path)
            }
            Err(e) => {
                error!("Model upload failed for {}: {}", file_name, e);
                Err(e)
            }
        }
    }

    async fn upload_sample_image(
        &self,
        environment: &str,
        file_name: &str,
        local_path: &Path,
    ) -> SyncResult<String> {
        let Some(control_plane) = self.environments.environment(environment).control_plane else {
            return Err(SyncError::config_error(format!(
                "environment {environment} has no control plane settings"
            )));
        };

        let url = format!(
            "{}/lora/train/uploadSampleImage",
            control_plane.host.trim_end_matches('/')
        );
        let form = Form::new().part(
            "file",
            Self::file_part(file_name, local_path, "image/png").await?,
        );

        debug!("Uploading sample image {} to {}", local_path.display(), url);
        match self.post_form(&url, form, file_name).await {
            Ok(path) => {
                info!("Uploaded sample image {}: {}", file_name, path);
                Ok(path)
            }
            Err(e) => {
                error!("Sample image upload failed for {}: {}", file_name, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trainsync_config::AppConfig;

    #[test]
    fn test_extract_remote_path() {
        let body = json!({ "code": 0, "data": { "path": "lora/20240101/a.safetensors" } });
        assert_eq!(
            extract_remote_path(&body).as_deref(),
            Some("lora/20240101/a.safetensors")
        );
        assert_eq!(extract_remote_path(&json!({ "data": null })), None);
        assert_eq!(extract_remote_path(&json!({ "data": { "path": null } })), None);
    }

    #[tokio::test]
    async fn test_unknown_environment_is_a_configuration_error() {
        let uploader =
            HttpArtifactUploader::new(Arc::new(AppConfig::default()), Duration::from_secs(1))
                .unwrap();
        let result = uploader
            .upload_model("missing", "a.safetensors", Path::new("/nonexistent"), "20240101")
            .await;
        assert!(matches!(result, Err(SyncError::Configuration(_))));

        let result = uploader
            .upload_sample_image("missing", "a.png", Path::new("/nonexistent"))
            .await;
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }
}
