//! Test data builders for task configurations and training output trees.

use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use tempfile::TempDir;
use trainsync_domain::{
    TaskConfig, ENVIRONMENT_KEY, EXPECTED_EPOCHS_KEY, MODEL_EXTENSION_KEY, OUTPUT_DIR_KEY,
    OUTPUT_NAME_KEY,
};
use trainsync_worker::SyncSettings;

/// Builder for task configurations with sensible defaults: environment
/// `test`, 3 epochs, output `output/task` with prefix `lora` and extension
/// `safetensors`.
pub struct TaskConfigBuilder {
    values: Map<String, Value>,
}

impl TaskConfigBuilder {
    pub fn new() -> Self {
        let mut values = Map::new();
        values.insert(ENVIRONMENT_KEY.to_string(), json!("test"));
        values.insert(EXPECTED_EPOCHS_KEY.to_string(), json!(3));
        values.insert(OUTPUT_DIR_KEY.to_string(), json!("output/task"));
        values.insert(OUTPUT_NAME_KEY.to_string(), json!("lora"));
        values.insert(MODEL_EXTENSION_KEY.to_string(), json!("safetensors"));
        Self { values }
    }

    pub fn with_environment(self, environment: &str) -> Self {
        self.with_value(ENVIRONMENT_KEY, json!(environment))
    }

    pub fn with_epochs(self, epochs: usize) -> Self {
        self.with_value(EXPECTED_EPOCHS_KEY, json!(epochs))
    }

    pub fn with_output_dir(self, output_dir: &str) -> Self {
        self.with_value(OUTPUT_DIR_KEY, json!(output_dir))
    }

    pub fn with_output_name(self, output_name: &str) -> Self {
        self.with_value(OUTPUT_NAME_KEY, json!(output_name))
    }

    pub fn with_extension(self, extension: &str) -> Self {
        self.with_value(MODEL_EXTENSION_KEY, json!(extension))
    }

    pub fn with_value(mut self, key: &str, value: Value) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    pub fn without(mut self, key: &str) -> Self {
        self.values.remove(key);
        self
    }

    pub fn build(self) -> TaskConfig {
        TaskConfig::new(self.values)
    }
}

impl Default for TaskConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A temporary workspace root holding training output directories.
pub struct OutputFixture {
    root: TempDir,
}

impl OutputFixture {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn output_dir(&self, output_dir: &str) -> PathBuf {
        self.root.path().join(output_dir)
    }

    pub fn write_models(&self, output_dir: &str, names: &[&str]) {
        self.write_files(&self.output_dir(output_dir), names);
    }

    pub fn write_samples(&self, output_dir: &str, names: &[&str]) {
        self.write_files(&self.output_dir(output_dir).join("sample"), names);
    }

    fn write_files(&self, dir: &Path, names: &[&str]) {
        std::fs::create_dir_all(dir).expect("failed to create output dir");
        for name in names {
            std::fs::write(dir.join(name), name.as_bytes()).expect("failed to write file");
        }
    }

    /// Sync settings rooted at this fixture, without a mirror directory.
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            workspace_root: self.root.path().to_path_buf(),
            sample_subdir: "sample".to_string(),
            mirror_dir: None,
        }
    }
}

impl Default for OutputFixture {
    fn default() -> Self {
        Self::new()
    }
}
