//! 后端 REST 接口的请求与响应结构。
//!
//! 后端字段统一为 snake_case，这里只通过 serde 属性完成映射，
//! 上层代码不再做任何字段名转换。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// 后端返回的标识符，可能是数字也可能是字符串。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteId {
    Number(u64),
    Text(String),
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteId::Number(n) => write!(f, "{n}"),
            RemoteId::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for RemoteId {
    fn from(value: &str) -> Self {
        RemoteId::Text(value.to_string())
    }
}

impl From<u64> for RemoteId {
    fn from(value: u64) -> Self {
        RemoteId::Number(value)
    }
}

// Upload 接口
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UploadResponse {
    pub task_id: RemoteId,
    #[serde(default)]
    pub video_id: Option<RemoteId>,
    #[serde(default)]
    pub status: Option<String>,
}

// Task 状态接口
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TaskStatusResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub current_operation: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// 一次状态查询归类后的结果。
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Pending,
    InProgress {
        progress: u8,
        operation: Option<String>,
    },
    Completed {
        result: Option<Value>,
    },
    Failed {
        error: Option<String>,
    },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed { .. } | TaskState::Failed { .. })
    }
}

impl TaskStatusResponse {
    /// 将原始响应归类为 [`TaskState`]。
    ///
    /// 缺失或无法识别的 status 一律视为 `Pending`，任务记录可能还没在后端可见。
    pub fn classify(self) -> TaskState {
        let status = self
            .status
            .as_deref()
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default();

        match status.as_str() {
            "progress" | "processing" | "downloading" | "started" | "running" => {
                TaskState::InProgress {
                    progress: clamp_percent(self.progress.unwrap_or(0.0)),
                    operation: self.current_operation.filter(|s| !s.trim().is_empty()),
                }
            }
            "completed" | "success" | "done" => TaskState::Completed {
                result: self.result,
            },
            "failed" | "failure" | "error" => TaskState::Failed {
                error: self.error.as_ref().and_then(value_to_message),
            },
            _ => TaskState::Pending,
        }
    }
}

fn clamp_percent(progress: f64) -> u8 {
    if progress.is_nan() {
        return 0;
    }
    progress.round().clamp(0.0, 100.0) as u8
}

/// 视频处理任务完成后 `result` 字段的内容
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProcessingResult {
    #[serde(default)]
    pub video_id: Option<RemoteId>,
    #[serde(default)]
    pub fragments_count: Option<u64>,
}

impl ProcessingResult {
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

// Search 接口
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub exact: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SearchQuery {
    /// 生成查询参数，`tags` 以重复键的形式展开
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("query", self.query.clone()),
            ("exact", self.exact.to_string()),
        ];
        for tag in &self.tags {
            pairs.push(("tags", tag.clone()));
        }
        pairs
    }
}

/// `/search` 的响应：部分后端直接给出结果，部分后端返回任务 ID 需要轮询。
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SearchReply {
    #[serde(default)]
    pub task_id: Option<RemoteId>,
    #[serde(default)]
    pub results: Option<Vec<SearchHit>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SearchHit {
    #[serde(default)]
    pub video_id: Option<RemoteId>,
    #[serde(default, alias = "name")]
    pub video_name: String,
    #[serde(default)]
    pub video_description: Option<String>,
    #[serde(default)]
    pub timecode_start: f64,
    #[serde(default)]
    pub timecode_end: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, alias = "s3_url")]
    pub presigned_url: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

impl SearchHit {
    /// 解析搜索任务的 `result`：既可能是数组，也可能是带 `results` 字段的对象。
    pub fn list_from_value(value: &Value) -> Result<Vec<SearchHit>, serde_json::Error> {
        match value {
            Value::Object(map) if map.contains_key("results") => {
                serde_json::from_value(map["results"].clone())
            }
            Value::Null => Ok(Vec::new()),
            other => serde_json::from_value(other.clone()),
        }
    }
}

// Video 接口
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub id: RemoteId,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub fragments_count: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct VideoListResponse {
    #[serde(default)]
    pub videos: Vec<VideoInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FragmentInfo {
    pub id: RemoteId,
    pub timecode_start: f64,
    pub timecode_end: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub s3_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VideoFragmentsResponse {
    pub video_id: RemoteId,
    #[serde(default)]
    pub fragments: Vec<FragmentInfo>,
}

/// `GET /health` 的响应，服务端在异常状态码下也会给出各组件的详情
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HealthReport {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub details: serde_json::Map<String, Value>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| s.trim().to_ascii_lowercase())
            .is_some_and(|s| matches!(s.as_str(), "ok" | "healthy" | "up" | "pass"))
    }
}

/// 错误响应体，`detail` 可能是字符串、对象或校验错误数组
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,
}

impl ErrorBody {
    /// 从原始响应文本中提取面向用户的错误描述
    pub fn message_from(text: &str) -> Option<String> {
        let body: ErrorBody = serde_json::from_str(text).ok()?;
        body.detail
            .as_ref()
            .and_then(value_to_message)
            .or_else(|| body.message.as_ref().and_then(value_to_message))
    }
}

fn value_to_message(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => {
            let message = map.get("message").and_then(value_to_message);
            let error = map.get("error").and_then(value_to_message);
            match (message, error) {
                (Some(m), Some(e)) => Some(format!("{m}: {e}")),
                (Some(m), None) => Some(m),
                (None, Some(e)) => Some(e),
                (None, None) => Some(value.to_string()),
            }
        }
        // FastAPI 的校验错误: [{"loc": [...], "msg": "..."}]
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item.get("msg") {
                    Some(msg) => value_to_message(msg),
                    None => value_to_message(item),
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        other => Some(other.to_string()),
    }
}
