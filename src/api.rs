use crate::config::Config;
use crate::error::ApiError;
use crate::media::{MediaFile, VideoMetadata};
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, multipart};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::debug;
use vidsearch_common::interface::{
    HealthReport, SearchQuery, SearchReply, TaskStatusResponse, UploadResponse,
    VideoFragmentsResponse, VideoListResponse,
};

/// API 根地址中的版本前缀，健康检查挂在它之外
const API_PREFIX: &str = "/api/v1";

/// 上传过程中的字节级进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub loaded: u64,
    pub total: u64,
}

pub type ProgressSender = mpsc::UnboundedSender<TransferProgress>;

/// 远程视频处理服务
pub trait Backend: Send + Sync + 'static {
    /// 上传视频，过程中通过 `progress` 报告已发送的字节数
    fn upload(
        &self,
        file: &MediaFile,
        metadata: &VideoMetadata,
        progress: ProgressSender,
    ) -> impl Future<Output = Result<UploadResponse, ApiError>> + Send;

    fn task_status(
        &self,
        task_id: &str,
    ) -> impl Future<Output = Result<TaskStatusResponse, ApiError>> + Send;

    fn search(
        &self,
        query: &SearchQuery,
    ) -> impl Future<Output = Result<SearchReply, ApiError>> + Send;

    fn list_videos(&self) -> impl Future<Output = Result<VideoListResponse, ApiError>> + Send;

    fn video_fragments(
        &self,
        video_id: &str,
    ) -> impl Future<Output = Result<VideoFragmentsResponse, ApiError>> + Send;

    fn health(&self) -> impl Future<Output = Result<HealthReport, ApiError>> + Send;
}

/// 基于 reqwest 的后端实现
#[derive(Clone, Debug)]
pub struct HttpBackend {
    http: Client,
    base: String,
    request_timeout: Duration,
    upload_timeout: Option<Duration>,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(concat!("vidsearch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        debug!(base_url = %config.base_url, "创建 HTTP 客户端");

        Ok(Self {
            http,
            base: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout(),
            upload_timeout: config.upload_timeout(),
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    fn health_url(&self) -> String {
        let origin = self.base.strip_suffix(API_PREFIX).unwrap_or(&self.base);
        format!("{origin}/health")
    }

    /// 发送请求并解析 JSON，非 2xx 状态码转换为 [`ApiError::Status`]
    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), &text));
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn file_part(
        &self,
        file: &MediaFile,
        progress: ProgressSender,
    ) -> Result<multipart::Part, ApiError> {
        let handle = tokio::fs::File::open(&file.path)
            .await
            .map_err(|e| ApiError::Transport(format!("打开文件 '{}' 失败: {e}", file.path.display())))?;

        let total = file.size;
        let _ = progress.send(TransferProgress { loaded: 0, total });

        // 按读出的字节数近似上传进度
        let mut loaded = 0u64;
        let stream = ReaderStream::new(handle).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                loaded += bytes.len() as u64;
                let _ = progress.send(TransferProgress {
                    loaded: loaded.min(total),
                    total,
                });
            }
        });

        let part = multipart::Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
            .file_name(file.file_name.clone())
            .mime_str(&file.mime)?;
        Ok(part)
    }
}

impl Backend for HttpBackend {
    async fn upload(
        &self,
        file: &MediaFile,
        metadata: &VideoMetadata,
        progress: ProgressSender,
    ) -> Result<UploadResponse, ApiError> {
        let part = self.file_part(file, progress).await?;
        let tags = serde_json::to_string(&metadata.tags).map_err(|e| ApiError::Decode(e.to_string()))?;
        let form = multipart::Form::new()
            .part("video_file", part)
            .text("name", metadata.name.clone())
            .text("description", metadata.description.clone())
            .text("tags", tags);

        let mut request = self.http.post(self.url("/upload")).multipart(form);
        if let Some(timeout) = self.upload_timeout {
            request = request.timeout(timeout);
        }

        debug!(file = %file.path.display(), size = file.size, "开始上传");
        self.send_json(request).await
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatusResponse, ApiError> {
        let request = self
            .http
            .get(self.url(&format!("/tasks/{task_id}")))
            .timeout(self.request_timeout);
        self.send_json(request).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchReply, ApiError> {
        let request = self
            .http
            .get(self.url("/search"))
            .query(&query.to_pairs())
            .timeout(self.request_timeout);
        self.send_json(request).await
    }

    async fn list_videos(&self) -> Result<VideoListResponse, ApiError> {
        let request = self
            .http
            .get(self.url("/videos"))
            .timeout(self.request_timeout);
        self.send_json(request).await
    }

    async fn video_fragments(&self, video_id: &str) -> Result<VideoFragmentsResponse, ApiError> {
        let request = self
            .http
            .get(self.url(&format!("/videos/{video_id}/fragments")))
            .timeout(self.request_timeout);
        self.send_json(request).await
    }

    async fn health(&self) -> Result<HealthReport, ApiError> {
        let resp = self
            .http
            .get(self.health_url())
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;

        // 异常状态码下只要响应体可解析，仍然把详情交给调用方
        match serde_json::from_str::<HealthReport>(&text) {
            Ok(report) => {
                debug!(status = status.as_u16(), healthy = report.is_healthy(), "健康检查");
                Ok(report)
            }
            Err(_) if !status.is_success() => Err(ApiError::from_status(status.as_u16(), &text)),
            Err(e) => Err(ApiError::Decode(e.to_string())),
        }
    }
}
