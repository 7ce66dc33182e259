//! 单个上传任务的记录与状态机。
//!
//! 状态只能通过 [`UploadTask::apply`] 改变。每个事件要么产生一条
//! [`TaskUpdate`]，要么什么都不改变并返回 `None`；进入终止状态后所有事件都被丢弃，
//! 因此重复的终止响应和取消之后才到达的响应都不会再影响任务。

use crate::error::TaskError;
use crate::media::{MediaFile, VideoMetadata};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;
use vidsearch_common::interface::{ProcessingResult, TaskState};

/// 客户端生成的关联 ID，同一进程内不会重复
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Uploading,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Cancelled)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "等待",
            Phase::Uploading => "上传中",
            Phase::Processing => "处理中",
            Phase::Completed => "已完成",
            Phase::Failed => "失败",
            Phase::Cancelled => "已取消",
        };
        f.write_str(s)
    }
}

/// 驱动状态机的事件
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    UploadStarted,
    UploadProgress {
        loaded: u64,
        total: u64,
    },
    UploadAccepted {
        remote_task_id: String,
        video_id: Option<String>,
    },
    Status(TaskState),
    Failed(TaskError),
    Cancelled,
}

/// 一次状态变化的增量，只包含发生变化的字段
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub id: TaskId,
    pub phase: Option<Phase>,
    pub remote_task_id: Option<String>,
    pub upload_progress: Option<u8>,
    pub processing_progress: Option<u8>,
    pub current_operation: Option<String>,
    pub result_video_id: Option<String>,
    pub result_fragment_count: Option<u64>,
    pub error: Option<TaskError>,
}

impl TaskUpdate {
    fn new(id: TaskId) -> Self {
        Self {
            id,
            phase: None,
            remote_task_id: None,
            upload_progress: None,
            processing_progress: None,
            current_operation: None,
            result_video_id: None,
            result_fragment_count: None,
            error: None,
        }
    }

    fn phase(id: TaskId, phase: Phase) -> Self {
        Self {
            phase: Some(phase),
            ..Self::new(id)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_some_and(Phase::is_terminal)
    }
}

#[derive(Debug, Clone)]
pub struct UploadTask {
    pub id: TaskId,
    pub file: MediaFile,
    pub display_name: String,
    pub metadata: VideoMetadata,
    pub remote_task_id: Option<String>,
    pub phase: Phase,
    pub upload_progress: u8,
    pub processing_progress: u8,
    pub current_operation: Option<String>,
    pub result_fragment_count: Option<u64>,
    pub result_video_id: Option<String>,
    pub last_error: Option<TaskError>,
    pub finished_at: Option<Instant>,
    accepted_video_id: Option<String>,
}

impl UploadTask {
    pub fn new(id: TaskId, file: MediaFile, metadata: VideoMetadata) -> Self {
        Self {
            id,
            display_name: metadata.name.clone(),
            file,
            metadata,
            remote_task_id: None,
            phase: Phase::Idle,
            upload_progress: 0,
            processing_progress: 0,
            current_operation: None,
            result_fragment_count: None,
            result_video_id: None,
            last_error: None,
            finished_at: None,
            accepted_video_id: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// 应用一个事件，返回需要通知视图层的增量
    pub fn apply(&mut self, event: LifecycleEvent) -> Option<TaskUpdate> {
        if self.is_terminal() {
            return None;
        }

        match event {
            LifecycleEvent::UploadStarted => {
                if self.phase != Phase::Idle {
                    return None;
                }
                self.phase = Phase::Uploading;
                self.upload_progress = 0;
                Some(TaskUpdate {
                    upload_progress: Some(0),
                    ..TaskUpdate::phase(self.id, Phase::Uploading)
                })
            }

            LifecycleEvent::UploadProgress { loaded, total } => {
                if self.phase != Phase::Uploading {
                    return None;
                }
                let percent = upload_percent(loaded, total);
                if percent <= self.upload_progress {
                    return None;
                }
                self.upload_progress = percent;
                Some(TaskUpdate {
                    upload_progress: Some(percent),
                    ..TaskUpdate::new(self.id)
                })
            }

            LifecycleEvent::UploadAccepted {
                remote_task_id,
                video_id,
            } => {
                if self.phase != Phase::Uploading || self.remote_task_id.is_some() {
                    return None;
                }
                self.remote_task_id = Some(remote_task_id.clone());
                self.accepted_video_id = video_id;
                self.phase = Phase::Processing;
                self.processing_progress = 0;
                self.current_operation = None;
                Some(TaskUpdate {
                    remote_task_id: Some(remote_task_id),
                    processing_progress: Some(0),
                    ..TaskUpdate::phase(self.id, Phase::Processing)
                })
            }

            LifecycleEvent::Status(state) => {
                if self.phase != Phase::Processing {
                    return None;
                }
                self.apply_status(state)
            }

            LifecycleEvent::Failed(error) => Some(self.fail(error)),

            LifecycleEvent::Cancelled => {
                self.phase = Phase::Cancelled;
                self.finished_at = Some(Instant::now());
                Some(TaskUpdate::phase(self.id, Phase::Cancelled))
            }
        }
    }

    fn apply_status(&mut self, state: TaskState) -> Option<TaskUpdate> {
        match state {
            TaskState::Pending => None,

            TaskState::InProgress {
                progress,
                operation,
            } => {
                let mut update = TaskUpdate::new(self.id);
                let mut changed = false;
                if progress != self.processing_progress {
                    self.processing_progress = progress;
                    update.processing_progress = Some(progress);
                    changed = true;
                }
                if operation.is_some() && operation != self.current_operation {
                    self.current_operation = operation.clone();
                    update.current_operation = operation;
                    changed = true;
                }
                changed.then_some(update)
            }

            TaskState::Completed { result } => Some(self.complete(result.as_ref())),

            TaskState::Failed { error } => Some(self.fail(TaskError::server_failure(error))),
        }
    }

    fn complete(&mut self, result: Option<&Value>) -> TaskUpdate {
        let parsed = result
            .and_then(ProcessingResult::from_value)
            .unwrap_or_default();

        self.phase = Phase::Completed;
        self.processing_progress = 100;
        self.result_video_id = parsed
            .video_id
            .map(|id| id.to_string())
            .or_else(|| self.accepted_video_id.clone());
        self.result_fragment_count = parsed.fragments_count;
        self.finished_at = Some(Instant::now());

        TaskUpdate {
            processing_progress: Some(100),
            result_video_id: self.result_video_id.clone(),
            result_fragment_count: self.result_fragment_count,
            ..TaskUpdate::phase(self.id, Phase::Completed)
        }
    }

    fn fail(&mut self, error: TaskError) -> TaskUpdate {
        self.phase = Phase::Failed;
        self.last_error = Some(error.clone());
        self.finished_at = Some(Instant::now());
        TaskUpdate {
            error: Some(error),
            ..TaskUpdate::phase(self.id, Phase::Failed)
        }
    }
}

fn upload_percent(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let loaded = loaded.min(total) as u128;
    ((loaded * 100) / total as u128) as u8
}
