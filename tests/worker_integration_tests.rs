use std::sync::Arc;
use std::time::Duration;

use trainsync::app::Application;
use trainsync::shutdown::ShutdownManager;
use trainsync_config::AppConfig;
use trainsync_domain::TaskStatus;
use trainsync_testing_utils::{OutputFixture, TaskConfigBuilder};

/// 所有外部端点都指向一个拒绝连接的本地端口
fn unreachable_config(workspace_root: &str) -> AppConfig {
    let toml = format!(
        r#"
[worker]
worker_id = "worker-it"

[sync]
workspace_root = "{workspace_root}"
upload_timeout_seconds = 2

[callback]
timeout_seconds = 2

[environments.test.storage]
host = "http://127.0.0.1:1"
bucket_name = "models"
upload_dir = "lora/"
app_id = "id"
app_token = "token"

[environments.test.control_plane]
host = "http://127.0.0.1:1"
"#
    );
    AppConfig::from_toml(&toml).unwrap()
}

#[tokio::test]
async fn test_application_runs_until_shutdown() {
    let app = Arc::new(Application::new(AppConfig::default()).unwrap());
    let shutdown = ShutdownManager::new();
    let shutdown_rx = shutdown.subscribe().await;

    let handle = {
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    shutdown.shutdown().await;
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_application_with_unreachable_channel_still_stops() {
    let mut config = AppConfig::default();
    config.channel.enabled = true;
    config.channel.url = "ws://127.0.0.1:1/ws/worker".to_string();
    let app = Arc::new(Application::new(config).unwrap());
    let shutdown = ShutdownManager::new();
    let shutdown_rx = shutdown.subscribe().await;

    let handle = {
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    shutdown.shutdown().await;
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_sync_with_unreachable_storage_reports_uploaded_without_records() {
    let fixture = OutputFixture::new();
    fixture.write_models("output/task", &["lora-1.safetensors", "lora-2.safetensors"]);
    let app = Application::new(unreachable_config(&fixture.root().display().to_string())).unwrap();

    let registry = app.registry();
    registry
        .register("task-1", TaskConfigBuilder::new().with_epochs(2).build())
        .await;
    registry.set_status("task-1", TaskStatus::Running).await;
    registry.set_status("task-1", TaskStatus::Finished).await;

    let status = app.engine().sync_after_completion("task-1").await;

    // 数量匹配即视为成功，单个文件的上传失败只记录日志
    assert_eq!(status, Some(TaskStatus::Uploaded));
    assert!(registry.get("task-1").await.unwrap().models.is_empty());
}

#[tokio::test]
async fn test_terminate_untracked_task_still_terminates() {
    let app = Application::new(AppConfig::default()).unwrap();
    let registry = app.registry();
    registry
        .register("task-1", TaskConfigBuilder::new().build())
        .await;
    registry.set_status("task-1", TaskStatus::Running).await;

    assert!(registry.terminate("task-1").await);
    assert_eq!(registry.status("task-1").await, Some(TaskStatus::Terminated));
    assert!(!registry.has_active_tasks().await);
}

#[tokio::test]
async fn test_training_failure_path() {
    let app = Application::new(unreachable_config(".")).unwrap();
    app.registry()
        .register("task-1", TaskConfigBuilder::new().build())
        .await;

    assert!(app.engine().mark_training_failed("task-1").await);
    assert_eq!(
        app.registry().status("task-1").await,
        Some(TaskStatus::TrainFailed)
    );
}
