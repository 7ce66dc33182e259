use crate::api::Backend;
use crate::config::PollPolicy;
use crate::error::TaskError;
use crate::poller::{PollOutcome, poll_task};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vidsearch_common::interface::{SearchHit, SearchQuery, TaskState};

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Hits(Vec<SearchHit>),
    Cancelled,
}

/// 执行一次搜索。
///
/// 后端直接返回 `results` 时立即结束；返回 `task_id` 时按上传任务同样的规则轮询，
/// `on_progress` 接收轮询过程中的非终止状态。
pub async fn search<B, F>(
    backend: &B,
    query: &SearchQuery,
    policy: &PollPolicy,
    cancel: &CancellationToken,
    on_progress: F,
) -> Result<SearchOutcome, TaskError>
where
    B: Backend,
    F: FnMut(TaskState),
{
    if query.query.trim().is_empty() {
        return Err(TaskError::Validation("搜索内容不能为空".into()));
    }

    let reply = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(SearchOutcome::Cancelled),
        r = backend.search(query) => r.map_err(|e| TaskError::from_api(e, "搜索视频失败"))?,
    };

    if let Some(results) = reply.results {
        debug!(hits = results.len(), "搜索结果直接返回");
        return Ok(SearchOutcome::Hits(results));
    }

    let Some(task_id) = reply.task_id else {
        let reason = reply
            .reason
            .or(reply.status)
            .unwrap_or_else(|| "响应中既没有结果也没有任务 ID".into());
        return Err(TaskError::ServerFailure(reason));
    };

    let task_id = task_id.to_string();
    info!(remote_task = %task_id, "搜索任务已创建，开始轮询");

    match poll_task(backend, &task_id, policy, cancel, on_progress).await? {
        PollOutcome::Cancelled => Ok(SearchOutcome::Cancelled),
        PollOutcome::Finished(TaskState::Completed { result }) => {
            let hits = match result {
                Some(value) => SearchHit::list_from_value(&value)
                    .map_err(|e| TaskError::Network(format!("无法解析搜索结果: {e}")))?,
                None => Vec::new(),
            };
            Ok(SearchOutcome::Hits(hits))
        }
        PollOutcome::Finished(TaskState::Failed { error }) => Err(TaskError::server_failure(error)),
        PollOutcome::Finished(other) => Err(TaskError::ServerFailure(format!(
            "意外的任务状态: {other:?}"
        ))),
    }
}
