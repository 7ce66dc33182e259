//! 视频上传与搜索客户端。
//!
//! 核心是上传任务的生命周期：选择文件、上传、等待服务端处理、完成或失败，
//! 以及随时取消。其余部分是对后端 REST 接口的薄封装。

pub mod api;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod error;
pub mod media;
pub mod poller;
pub mod search;
pub mod task;

pub use api::{Backend, HttpBackend, ProgressSender, TransferProgress};
pub use config::{Config, PollPolicy};
pub use coordinator::UploadCoordinator;
pub use error::{ApiError, TaskError};
pub use media::{MediaFile, VideoMetadata};
pub use task::{LifecycleEvent, Phase, TaskId, TaskUpdate, UploadTask};
