use std::time::Duration;
use thiserror::Error;
use vidsearch_common::interface::ErrorBody;

/// 与后端交互时的底层错误
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// 请求未能完成（连接失败、超时、本地文件读取失败等）
    #[error("请求未能完成: {0}")]
    Transport(String),

    #[error("HTTP {status}: {}", .detail.as_deref().unwrap_or("<无详情>"))]
    Status { status: u16, detail: Option<String> },

    #[error("响应解析失败: {0}")]
    Decode(String),
}

impl ApiError {
    /// 根据状态码和响应体构造错误，尽量保留服务端给出的 detail
    pub fn from_status(status: u16, body: &str) -> Self {
        ApiError::Status {
            status,
            detail: ErrorBody::message_from(body),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 任务记录尚未可见
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// 轮询阶段可以在下一个周期重试的错误
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) | ApiError::Decode(_) => true,
            ApiError::Status { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// 一个上传或搜索任务的终止错误，会记录在任务的 `last_error` 上。
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskError {
    /// 本地校验失败，不会发出任何网络请求
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("网络请求失败: {0}")]
    Network(String),

    #[error("服务端拒绝请求 (HTTP {status}): {message}")]
    ServerRejected { status: u16, message: String },

    /// 后端报告任务本身失败
    #[error("服务端处理失败: {0}")]
    ServerFailure(String),

    #[error("等待任务结果超时 (已轮询 {attempts} 次, 耗时 {:.1} 秒)", .elapsed.as_secs_f64())]
    PollingTimeout { attempts: u32, elapsed: Duration },
}

impl TaskError {
    /// 将请求错误转换为终止错误，`fallback` 用于服务端没有给出 detail 的情况
    pub fn from_api(err: ApiError, fallback: &str) -> Self {
        match err {
            ApiError::Transport(msg) => TaskError::Network(msg),
            ApiError::Decode(msg) => TaskError::Network(format!("无法解析服务端响应: {msg}")),
            ApiError::Status { status, detail } => {
                let message = detail.unwrap_or_else(|| match status {
                    413 => "文件过大，服务端拒绝接收".to_string(),
                    _ => fallback.to_string(),
                });
                TaskError::ServerRejected { status, message }
            }
        }
    }

    pub fn server_failure(error: Option<String>) -> Self {
        TaskError::ServerFailure(error.unwrap_or_else(|| "未知错误".to_string()))
    }
}
