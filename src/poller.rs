use crate::api::Backend;
use crate::config::PollPolicy;
use crate::error::TaskError;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vidsearch_common::interface::TaskState;

/// 轮询结束的方式
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// 后端给出了终止状态 (`Completed` 或 `Failed`)
    Finished(TaskState),
    Cancelled,
}

/// 反复查询任务状态直到终止、取消或超时。
///
/// 上一次请求返回后才会安排下一次，同一任务不会有并发的状态请求。
/// 非终止状态通过 `on_state` 交给调用方；404 视作 `Pending`；
/// 连接错误、408/429/5xx 在下个周期重试并按策略退避；其余 4xx 直接失败。
/// 第 `max_attempts` 次查询仍未终止时立即超时，到达 `max_elapsed` 时不再发出请求。
pub async fn poll_task<B, F>(
    backend: &B,
    remote_task_id: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut on_state: F,
) -> Result<PollOutcome, TaskError>
where
    B: Backend,
    F: FnMut(TaskState),
{
    let started = Instant::now();
    let deadline = started + policy.max_elapsed();
    let mut interval = policy.interval();
    let mut attempts: u32 = 0;

    let timed_out = |attempts: u32| TaskError::PollingTimeout {
        attempts,
        elapsed: started.elapsed(),
    };

    loop {
        let wake = (Instant::now() + interval).min(deadline);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
            _ = sleep_until(wake) => {}
        }

        if Instant::now() >= deadline || attempts >= policy.max_attempts {
            warn!(remote_task = remote_task_id, attempts, "轮询超出上限");
            return Err(timed_out(attempts));
        }

        attempts += 1;
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
            r = timeout_at(deadline, backend.task_status(remote_task_id)) => r,
        };

        let response = match response {
            Ok(r) => r,
            Err(_) => {
                warn!(remote_task = remote_task_id, attempts, "等待状态响应时超出时间上限");
                return Err(timed_out(attempts));
            }
        };

        match response {
            Ok(resp) => {
                interval = policy.interval();
                let state = resp.classify();
                debug!(remote_task = remote_task_id, attempts, ?state, "任务状态");
                if state.is_terminal() {
                    return Ok(PollOutcome::Finished(state));
                }
                on_state(state);
            }
            Err(e) if e.is_not_found() => {
                interval = policy.interval();
                debug!(remote_task = remote_task_id, "任务记录暂不可见，按 pending 处理");
                on_state(TaskState::Pending);
            }
            Err(e) if e.is_transient() => {
                interval = policy.backoff(interval);
                warn!(
                    remote_task = remote_task_id,
                    attempts,
                    next_in_ms = interval.as_millis() as u64,
                    "查询任务状态失败，稍后重试: {e}"
                );
            }
            Err(e) => return Err(TaskError::from_api(e, "查询任务状态失败")),
        }

        // 次数用尽后不再空等一个周期
        if attempts >= policy.max_attempts {
            warn!(remote_task = remote_task_id, attempts, "轮询次数用尽");
            return Err(timed_out(attempts));
        }
    }
}
