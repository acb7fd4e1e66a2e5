use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// 请求方提交的训练参数中与结果同步相关的键
pub const ENVIRONMENT_KEY: &str = "dabi_env";
pub const EXPECTED_EPOCHS_KEY: &str = "max_train_epochs";
pub const OUTPUT_DIR_KEY: &str = "output_dir";
pub const OUTPUT_NAME_KEY: &str = "output_name";
pub const MODEL_EXTENSION_KEY: &str = "save_model_as";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskConfigError {
    #[error("missing key `{0}`")]
    Missing(&'static str),
    #[error("key `{key}` must be {expected}")]
    InvalidType {
        key: &'static str,
        expected: &'static str,
    },
}

/// Opaque training configuration as submitted by the requester.
/// Immutable once attached to a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct TaskConfig(Map<String, Value>);

/// The subset of the configuration the artifact sync needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub environment: String,
    pub expected_epochs: usize,
    pub output_dir: String,
    pub output_name: String,
    pub model_extension: String,
}

impl TaskConfig {
    pub fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    /// Non-object values produce an empty configuration.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn environment(&self) -> Option<&str> {
        self.0.get(ENVIRONMENT_KEY).and_then(Value::as_str)
    }

    pub fn expected_epochs(&self) -> Result<usize, TaskConfigError> {
        let value = self
            .0
            .get(EXPECTED_EPOCHS_KEY)
            .ok_or(TaskConfigError::Missing(EXPECTED_EPOCHS_KEY))?;
        let invalid = TaskConfigError::InvalidType {
            key: EXPECTED_EPOCHS_KEY,
            expected: "a non-negative integer",
        };
        // 表单提交时数字可能以字符串形式出现
        match value {
            Value::Number(n) => n.as_u64().map(|n| n as usize).ok_or(invalid),
            Value::String(s) => s.trim().parse::<usize>().map_err(|_| invalid),
            _ => Err(invalid),
        }
    }

    pub fn output_spec(&self) -> Result<OutputSpec, TaskConfigError> {
        Ok(OutputSpec {
            environment: self.required_str(ENVIRONMENT_KEY)?.to_string(),
            expected_epochs: self.expected_epochs()?,
            output_dir: self.required_str(OUTPUT_DIR_KEY)?.to_string(),
            output_name: self.required_str(OUTPUT_NAME_KEY)?.to_string(),
            model_extension: self.required_str(MODEL_EXTENSION_KEY)?.to_string(),
        })
    }

    fn required_str(&self, key: &'static str) -> Result<&str, TaskConfigError> {
        match self.0.get(key) {
            None => Err(TaskConfigError::Missing(key)),
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(_) => Err(TaskConfigError::InvalidType {
                key,
                expected: "a string",
            }),
        }
    }
}

impl From<Map<String, Value>> for TaskConfig {
    fn from(values: Map<String, Value>) -> Self {
        Self(values)
    }
}
