//! 内存中的脚本化后端，按预设顺序回放响应并统计调用次数。

#![allow(dead_code)]

use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use vidsearch::{ApiError, Backend, Config, MediaFile, ProgressSender, TransferProgress, VideoMetadata};
use vidsearch_common::interface::{
    HealthReport, RemoteId, SearchQuery, SearchReply, TaskStatusResponse, UploadResponse,
    VideoFragmentsResponse, VideoListResponse,
};

pub struct ScriptedBackend {
    progress_steps: Vec<u64>,
    upload_result: Result<UploadResponse, ApiError>,
    upload_gate: Option<Semaphore>,
    statuses: Mutex<VecDeque<Result<TaskStatusResponse, ApiError>>>,
    search_replies: Mutex<VecDeque<Result<SearchReply, ApiError>>>,
    pub upload_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
}

impl ScriptedBackend {
    /// 上传成功并返回远程任务 `task-1`，状态查询默认一直是 pending
    pub fn new() -> Self {
        Self {
            progress_steps: Vec::new(),
            upload_result: Ok(UploadResponse {
                task_id: RemoteId::Text("task-1".into()),
                video_id: None,
                status: Some("pending".into()),
            }),
            upload_gate: None,
            statuses: Mutex::new(VecDeque::new()),
            search_replies: Mutex::new(VecDeque::new()),
            upload_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
        }
    }

    /// 上传过程中依次报告的已发送字节数
    pub fn with_progress(mut self, steps: &[u64]) -> Self {
        self.progress_steps = steps.to_vec();
        self
    }

    pub fn with_upload_result(mut self, result: Result<UploadResponse, ApiError>) -> Self {
        self.upload_result = result;
        self
    }

    /// 上传请求会一直挂起，直到调用 [`ScriptedBackend::release_upload`]
    pub fn with_gated_upload(mut self) -> Self {
        self.upload_gate = Some(Semaphore::new(0));
        self
    }

    pub fn with_statuses(self, statuses: Vec<Result<TaskStatusResponse, ApiError>>) -> Self {
        self.statuses.lock().unwrap().extend(statuses);
        self
    }

    pub fn with_search_replies(self, replies: Vec<Result<SearchReply, ApiError>>) -> Self {
        self.search_replies.lock().unwrap().extend(replies);
        self
    }

    pub fn release_upload(&self) {
        if let Some(gate) = &self.upload_gate {
            gate.add_permits(1);
        }
    }

    pub fn uploads(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }
}

impl Backend for ScriptedBackend {
    async fn upload(
        &self,
        file: &MediaFile,
        _metadata: &VideoMetadata,
        progress: ProgressSender,
    ) -> Result<UploadResponse, ApiError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.upload_gate {
            gate.acquire().await.unwrap().forget();
        }
        for &loaded in &self.progress_steps {
            let _ = progress.send(TransferProgress {
                loaded,
                total: file.size,
            });
        }
        self.upload_result.clone()
    }

    async fn task_status(&self, _task_id: &str) -> Result<TaskStatusResponse, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.statuses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(status(json!({"status": "pending"}))))
    }

    async fn search(&self, _query: &SearchQuery) -> Result<SearchReply, ApiError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.search_replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(ApiError::Transport("no scripted search reply".into())))
    }

    async fn list_videos(&self) -> Result<VideoListResponse, ApiError> {
        Ok(VideoListResponse::default())
    }

    async fn video_fragments(&self, video_id: &str) -> Result<VideoFragmentsResponse, ApiError> {
        Ok(VideoFragmentsResponse {
            video_id: RemoteId::Text(video_id.to_string()),
            fragments: Vec::new(),
        })
    }

    async fn health(&self) -> Result<HealthReport, ApiError> {
        Ok(HealthReport {
            status: Some("ok".into()),
            ..Default::default()
        })
    }
}

pub fn status(value: Value) -> TaskStatusResponse {
    serde_json::from_value(value).unwrap()
}

pub fn ok_status(value: Value) -> Result<TaskStatusResponse, ApiError> {
    Ok(status(value))
}

pub fn http_error(code: u16) -> ApiError {
    ApiError::Status {
        status: code,
        detail: None,
    }
}

pub fn video(name: &str, size: u64) -> MediaFile {
    MediaFile::new(format!("/videos/{name}.mp4"), size, "video/mp4")
}

/// 测试用配置：1 秒轮询间隔
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.poll.interval_ms = 1000;
    config.poll.max_interval_ms = 8000;
    config.poll.backoff_factor = 2.0;
    config
}
