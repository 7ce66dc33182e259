//! 管理一组并发上传任务。
//!
//! 协调器独占所有 [`UploadTask`] 记录：视图层只能通过 `submit` / `cancel` /
//! `dismiss` 表达意图，通过 `snapshot` 读取只读副本，并在 `next_update` 上接收
//! 唯一的一条状态变化通道。

use crate::api::Backend;
use crate::config::Config;
use crate::controller::{UploadController, WorkerEvent};
use crate::error::TaskError;
use crate::media::{self, MediaFile, VideoMetadata};
use crate::task::{LifecycleEvent, Phase, TaskId, TaskUpdate, UploadTask};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Entry {
    task: UploadTask,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

pub struct UploadCoordinator<B> {
    backend: Arc<B>,
    config: Config,
    tasks: BTreeMap<TaskId, Entry>,
    pending: VecDeque<TaskUpdate>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl<B: Backend> UploadCoordinator<B> {
    pub fn new(backend: Arc<B>, config: Config) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            config,
            tasks: BTreeMap::new(),
            pending: VecDeque::new(),
            events_tx,
            events_rx,
        }
    }

    /// 校验并提交一个上传任务，需要在 tokio 运行时中调用。
    ///
    /// 校验失败时立即返回 [`TaskError::Validation`]，不会记录任务也不会发出请求。
    pub fn submit(&mut self, file: MediaFile, metadata: VideoMetadata) -> Result<TaskId, TaskError> {
        media::validate(&file, &metadata, &self.config)?;

        let id = TaskId::next();
        let mut task = UploadTask::new(id, file.clone(), metadata.clone());
        if let Some(update) = task.apply(LifecycleEvent::UploadStarted) {
            self.pending.push_back(update);
        }

        let cancel = CancellationToken::new();
        let controller = UploadController::new(
            id,
            Arc::clone(&self.backend),
            file,
            metadata,
            self.config.poll.clone(),
            cancel.clone(),
            self.events_tx.clone(),
        );
        let worker = tokio::spawn(controller.run());

        info!(task = %id, name = %task.display_name, "提交上传任务");
        self.tasks.insert(
            id,
            Entry {
                task,
                cancel,
                worker: Some(worker),
            },
        );
        Ok(id)
    }

    /// 取消一个未结束的任务，返回是否真的发生了取消
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let Some(entry) = self.tasks.get_mut(&id) else {
            return false;
        };
        if entry.task.is_terminal() {
            return false;
        }
        entry.cancel.cancel();
        if let Some(update) = entry.task.apply(LifecycleEvent::Cancelled) {
            self.pending.push_back(update);
        }
        info!(task = %id, "任务已取消");
        true
    }

    /// 取消所有未结束的任务
    pub fn cancel_all(&mut self) -> usize {
        let ids = self.active_ids();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// 从列表中移除任务，未结束的任务会先被取消
    pub fn dismiss(&mut self, id: TaskId) -> Option<UploadTask> {
        let mut entry = self.tasks.remove(&id)?;
        if !entry.task.is_terminal() {
            entry.cancel.cancel();
            entry.task.apply(LifecycleEvent::Cancelled);
        }
        if let Some(worker) = entry.worker.take() {
            if !worker.is_finished() {
                worker.abort();
            }
        }
        Some(entry.task)
    }

    /// 移除完成时间早于 `now - dismiss_after` 的已完成任务
    pub fn sweep(&mut self, now: Instant) -> Vec<TaskId> {
        let ttl = self.config.dismiss_after();
        let expired: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|e| e.task.phase == Phase::Completed)
            .filter(|e| e.task.finished_at.is_some_and(|at| at + ttl <= now))
            .map(|e| e.task.id)
            .collect();
        for id in &expired {
            self.tasks.remove(id);
            debug!(task = %id, "自动移除已完成任务");
        }
        expired
    }

    pub fn get(&self, id: TaskId) -> Option<&UploadTask> {
        self.tasks.get(&id).map(|e| &e.task)
    }

    /// 按提交顺序返回所有任务的副本
    pub fn snapshot(&self) -> Vec<UploadTask> {
        self.tasks.values().map(|e| e.task.clone()).collect()
    }

    pub fn active_ids(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|e| !e.task.is_terminal())
            .map(|e| e.task.id)
            .collect()
    }

    pub fn has_active(&self) -> bool {
        self.tasks.values().any(|e| !e.task.is_terminal())
    }

    /// 等待下一条状态变化；没有未结束的任务且没有待发送的变化时返回 `None`
    pub async fn next_update(&mut self) -> Option<TaskUpdate> {
        loop {
            if let Some(update) = self.pending.pop_front() {
                return Some(update);
            }
            if !self.has_active() {
                return None;
            }

            let WorkerEvent { task, event } = self.events_rx.recv().await?;
            let Some(entry) = self.tasks.get_mut(&task) else {
                debug!(task = %task, "丢弃已移除任务的事件");
                continue;
            };
            match entry.task.apply(event) {
                Some(update) => return Some(update),
                None => continue,
            }
        }
    }
}

impl<B> Drop for UploadCoordinator<B> {
    fn drop(&mut self) {
        for entry in self.tasks.values() {
            entry.cancel.cancel();
        }
    }
}
