use crate::api::{Backend, TransferProgress};
use crate::config::PollPolicy;
use crate::error::{ApiError, TaskError};
use crate::media::{MediaFile, VideoMetadata};
use crate::poller::{PollOutcome, poll_task};
use crate::task::{LifecycleEvent, TaskId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vidsearch_common::interface::{TaskState, UploadResponse};

/// 控制器发往协调器的事件，带有任务的关联 ID
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEvent {
    pub task: TaskId,
    pub event: LifecycleEvent,
}

/// 驱动一个已进入 `Uploading` 的任务直到终止状态
pub struct UploadController<B> {
    id: TaskId,
    backend: Arc<B>,
    file: MediaFile,
    metadata: VideoMetadata,
    policy: PollPolicy,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl<B: Backend> UploadController<B> {
    pub fn new(
        id: TaskId,
        backend: Arc<B>,
        file: MediaFile,
        metadata: VideoMetadata,
        policy: PollPolicy,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            id,
            backend,
            file,
            metadata,
            policy,
            cancel,
            events,
        }
    }

    pub async fn run(self) {
        let accepted = match self.upload().await {
            None => {
                info!(task = %self.id, "上传阶段被取消");
                return;
            }
            Some(Ok(resp)) => resp,
            Some(Err(e)) => {
                warn!(task = %self.id, "上传失败: {e}");
                self.emit(LifecycleEvent::Failed(TaskError::from_api(e, "上传视频失败")));
                return;
            }
        };

        let remote_task_id = accepted.task_id.to_string();
        info!(task = %self.id, remote_task = %remote_task_id, "上传完成，开始轮询处理进度");
        self.emit(LifecycleEvent::UploadAccepted {
            remote_task_id: remote_task_id.clone(),
            video_id: accepted.video_id.map(|v| v.to_string()),
        });

        let outcome = poll_task(
            self.backend.as_ref(),
            &remote_task_id,
            &self.policy,
            &self.cancel,
            |state| self.emit(LifecycleEvent::Status(state)),
        )
        .await;

        match outcome {
            Ok(PollOutcome::Finished(state)) => {
                if let TaskState::Failed { error } = &state {
                    warn!(task = %self.id, remote_task = %remote_task_id, ?error, "服务端报告处理失败");
                } else {
                    info!(task = %self.id, remote_task = %remote_task_id, "处理完成");
                }
                self.emit(LifecycleEvent::Status(state));
            }
            Ok(PollOutcome::Cancelled) => {
                info!(task = %self.id, "轮询被取消");
            }
            Err(e) => {
                warn!(task = %self.id, remote_task = %remote_task_id, "轮询终止: {e}");
                self.emit(LifecycleEvent::Failed(e));
            }
        }
    }

    /// 上传文件并转发进度，被取消时返回 `None`，进行中的请求随之被丢弃
    async fn upload(&self) -> Option<Result<UploadResponse, ApiError>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<TransferProgress>();
        let upload = self.backend.upload(&self.file, &self.metadata, tx);
        tokio::pin!(upload);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                Some(p) = rx.recv() => self.emit_progress(p),
                result = &mut upload => {
                    while let Ok(p) = rx.try_recv() {
                        self.emit_progress(p);
                    }
                    return Some(result);
                }
            }
        }
    }

    fn emit_progress(&self, p: TransferProgress) {
        self.emit(LifecycleEvent::UploadProgress {
            loaded: p.loaded,
            total: p.total,
        });
    }

    fn emit(&self, event: LifecycleEvent) {
        // 任务被取消后不再上报任何结果
        if self.cancel.is_cancelled() {
            return;
        }
        let _ = self.events.send(WorkerEvent {
            task: self.id,
            event,
        });
    }
}
