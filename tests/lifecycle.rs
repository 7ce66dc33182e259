//! 上传任务生命周期的集成测试，全部运行在暂停的虚拟时钟上。

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use vidsearch::{ApiError, Phase, TaskError, TaskUpdate, UploadCoordinator, VideoMetadata};

const MB: u64 = 1024 * 1024;

fn coordinator(backend: &Arc<ScriptedBackend>) -> UploadCoordinator<ScriptedBackend> {
    UploadCoordinator::new(Arc::clone(backend), test_config())
}

async fn drain(coord: &mut UploadCoordinator<ScriptedBackend>) -> Vec<TaskUpdate> {
    let mut updates = Vec::new();
    while let Some(update) = coord.next_update().await {
        updates.push(update);
    }
    updates
}

/// 一直读取更新直到出现满足条件的那一条
async fn wait_for(
    coord: &mut UploadCoordinator<ScriptedBackend>,
    pred: impl Fn(&TaskUpdate) -> bool,
) -> TaskUpdate {
    loop {
        let update = coord.next_update().await.expect("更新通道提前结束");
        if pred(&update) {
            return update;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn upload_then_process_to_completion() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_progress(&[0, 5 * MB, 10 * MB])
            .with_statuses(vec![
                ok_status(json!({"status": "pending"})),
                ok_status(json!({"status": "progress", "progress": 40})),
                ok_status(json!({
                    "status": "completed",
                    "result": {"video_id": 7, "fragments_count": 12}
                })),
            ]),
    );
    let mut coord = coordinator(&backend);

    let id = coord
        .submit(video("Lecture1", 10 * MB), VideoMetadata::named("Lecture1"))
        .unwrap();
    let updates = drain(&mut coord).await;

    assert!(updates.iter().all(|u| u.id == id));
    assert_eq!(updates[0].phase, Some(Phase::Uploading));

    let uploads: Vec<u8> = updates.iter().filter_map(|u| u.upload_progress).collect();
    assert_eq!(uploads, vec![0, 50, 100]);

    let processing_start = updates
        .iter()
        .position(|u| u.phase == Some(Phase::Processing))
        .unwrap();
    let processing = &updates[processing_start..];
    assert_eq!(processing.len(), 3);
    assert_eq!(processing[0].remote_task_id.as_deref(), Some("task-1"));
    assert_eq!(processing[1].processing_progress, Some(40));
    assert_eq!(processing[2].phase, Some(Phase::Completed));

    let task = coord.get(id).unwrap();
    assert_eq!(task.phase, Phase::Completed);
    assert_eq!(task.result_video_id.as_deref(), Some("7"));
    assert_eq!(task.result_fragment_count, Some(12));
    assert_eq!(task.processing_progress, 100);
    assert!(task.last_error.is_none());

    // 完成后不再轮询
    assert_eq!(backend.polls(), 3);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.polls(), 3);
}

#[tokio::test(start_paused = true)]
async fn never_skips_uploading_phase() {
    let backend = Arc::new(
        ScriptedBackend::new().with_statuses(vec![ok_status(json!({"status": "completed"}))]),
    );
    let mut coord = coordinator(&backend);

    coord
        .submit(video("clip", MB), VideoMetadata::named("clip"))
        .unwrap();
    let phases: Vec<Phase> = drain(&mut coord)
        .await
        .into_iter()
        .filter_map(|u| u.phase)
        .collect();
    assert_eq!(phases, vec![Phase::Uploading, Phase::Processing, Phase::Completed]);
}

#[tokio::test(start_paused = true)]
async fn empty_file_is_rejected_without_network() {
    let backend = Arc::new(ScriptedBackend::new());
    let mut coord = coordinator(&backend);

    let err = coord
        .submit(video("empty", 0), VideoMetadata::named("empty"))
        .unwrap_err();
    assert!(matches!(err, TaskError::Validation(_)));

    assert!(coord.snapshot().is_empty());
    assert!(coord.next_update().await.is_none());
    assert_eq!(backend.uploads(), 0);
    assert_eq!(backend.polls(), 0);
}

#[tokio::test(start_paused = true)]
async fn unsupported_type_and_oversize_are_rejected() {
    let backend = Arc::new(ScriptedBackend::new());
    let mut config = test_config();
    config.max_file_size = 100 * MB;
    let mut coord = UploadCoordinator::new(Arc::clone(&backend), config);

    let avi = vidsearch::MediaFile::new("/videos/old.avi", MB, "video/x-msvideo");
    assert!(matches!(
        coord.submit(avi, VideoMetadata::named("old")),
        Err(TaskError::Validation(_))
    ));
    assert!(matches!(
        coord.submit(video("huge", 101 * MB), VideoMetadata::named("huge")),
        Err(TaskError::Validation(_))
    ));
    assert!(matches!(
        coord.submit(video("unnamed", MB), VideoMetadata::named("  ")),
        Err(TaskError::Validation(_))
    ));
    assert_eq!(backend.uploads(), 0);
}

#[tokio::test(start_paused = true)]
async fn payload_too_large_fails_without_polling() {
    let backend = Arc::new(ScriptedBackend::new().with_upload_result(Err(http_error(413))));
    let mut coord = coordinator(&backend);

    let id = coord
        .submit(video("big", 10 * MB), VideoMetadata::named("big"))
        .unwrap();
    let updates = drain(&mut coord).await;
    let last = updates.last().unwrap();
    assert_eq!(last.phase, Some(Phase::Failed));

    let task = coord.get(id).unwrap();
    assert_eq!(task.phase, Phase::Failed);
    match task.last_error.as_ref().unwrap() {
        TaskError::ServerRejected { status, message } => {
            assert_eq!(*status, 413);
            assert!(message.contains("过大"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(backend.uploads(), 1);
    assert_eq!(backend.polls(), 0);
}

#[tokio::test(start_paused = true)]
async fn upload_transport_error_is_network_failure() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_upload_result(Err(ApiError::Transport("connection refused".into()))),
    );
    let mut coord = coordinator(&backend);

    let id = coord
        .submit(video("clip", MB), VideoMetadata::named("clip"))
        .unwrap();
    drain(&mut coord).await;

    let task = coord.get(id).unwrap();
    assert_eq!(task.phase, Phase::Failed);
    assert!(matches!(task.last_error, Some(TaskError::Network(_))));
    assert_eq!(backend.polls(), 0);
}

#[tokio::test(start_paused = true)]
async fn not_found_is_treated_as_pending() {
    let backend = Arc::new(ScriptedBackend::new().with_statuses(vec![
        Err(http_error(404)),
        ok_status(json!({"status": "progress", "progress": 10})),
    ]));
    let mut coord = coordinator(&backend);

    let id = coord
        .submit(video("clip", MB), VideoMetadata::named("clip"))
        .unwrap();
    wait_for(&mut coord, |u| u.processing_progress == Some(10)).await;

    let task = coord.get(id).unwrap();
    assert_eq!(task.phase, Phase::Processing);
    assert!(task.last_error.is_none());
    assert_eq!(backend.polls(), 2);

    assert!(coord.cancel(id));
}

#[tokio::test(start_paused = true)]
async fn backend_failure_is_reported_once() {
    let backend = Arc::new(ScriptedBackend::new().with_statuses(vec![
        ok_status(json!({"status": "processing", "progress": 30, "current_operation": "transcribing"})),
        ok_status(json!({"status": "failed", "error": "ffmpeg crashed"})),
        ok_status(json!({"status": "failed", "error": "ffmpeg crashed"})),
    ]));
    let mut coord = coordinator(&backend);

    let id = coord
        .submit(video("clip", MB), VideoMetadata::named("clip"))
        .unwrap();
    let updates = drain(&mut coord).await;

    let failed: Vec<_> = updates
        .iter()
        .filter(|u| u.phase == Some(Phase::Failed))
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(updates.iter().any(|u| u.current_operation.as_deref() == Some("transcribing")));

    let task = coord.get(id).unwrap();
    assert_eq!(
        task.last_error,
        Some(TaskError::ServerFailure("ffmpeg crashed".into()))
    );
    // 终止状态之后没有再次查询
    assert_eq!(backend.polls(), 2);
}

#[tokio::test(start_paused = true)]
async fn polling_gives_up_after_bound() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_statuses((0..30).map(|_| ok_status(json!({"status": "pending"}))).collect()),
    );
    let mut config = test_config();
    config.poll.max_elapsed_secs = 20;
    let mut coord = UploadCoordinator::new(Arc::clone(&backend), config);

    let started = Instant::now();
    let id = coord
        .submit(video("slow", MB), VideoMetadata::named("slow"))
        .unwrap();
    drain(&mut coord).await;
    let waited = started.elapsed();

    let task = coord.get(id).unwrap();
    assert_eq!(task.phase, Phase::Failed);
    match task.last_error.as_ref().unwrap() {
        TaskError::PollingTimeout { attempts, elapsed } => {
            assert_eq!(*attempts, 19);
            assert!(*elapsed >= Duration::from_secs(20));
            assert!(*elapsed < Duration::from_secs(21));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(waited >= Duration::from_secs(20) && waited < Duration::from_secs(21));
    assert_eq!(backend.polls(), 19);
}

#[tokio::test(start_paused = true)]
async fn polling_stops_at_attempt_limit_without_extra_wait() {
    let backend = Arc::new(ScriptedBackend::new());
    let mut config = test_config();
    config.poll.max_attempts = 3;
    let mut coord = UploadCoordinator::new(Arc::clone(&backend), config);

    let started = Instant::now();
    let id = coord
        .submit(video("slow", MB), VideoMetadata::named("slow"))
        .unwrap();
    drain(&mut coord).await;

    let task = coord.get(id).unwrap();
    assert_eq!(task.phase, Phase::Failed);
    assert_eq!(
        task.last_error,
        Some(TaskError::PollingTimeout {
            attempts: 3,
            elapsed: Duration::from_secs(3),
        })
    );
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(backend.polls(), 3);
}

#[tokio::test(start_paused = true)]
async fn transient_poll_errors_are_retried_with_backoff() {
    let backend = Arc::new(ScriptedBackend::new().with_statuses(vec![
        Err(ApiError::Transport("connection reset".into())),
        Err(http_error(503)),
        ok_status(json!({"status": "progress", "progress": 30})),
        ok_status(json!({"status": "completed", "result": {"video_id": "v-1"}})),
    ]));
    let mut coord = coordinator(&backend);

    let started = Instant::now();
    let id = coord
        .submit(video("clip", MB), VideoMetadata::named("clip"))
        .unwrap();
    let updates = drain(&mut coord).await;

    assert!(updates.iter().all(|u| u.error.is_none()));
    let task = coord.get(id).unwrap();
    assert_eq!(task.phase, Phase::Completed);
    assert_eq!(task.result_video_id.as_deref(), Some("v-1"));
    assert_eq!(backend.polls(), 4);
    // 1s, 退避到 2s 和 4s, 成功后恢复 1s
    assert_eq!(started.elapsed(), Duration::from_secs(8));
}

#[tokio::test(start_paused = true)]
async fn client_error_while_polling_is_terminal() {
    let backend = Arc::new(ScriptedBackend::new().with_statuses(vec![Err(ApiError::Status {
        status: 403,
        detail: Some("forbidden".into()),
    })]));
    let mut coord = coordinator(&backend);

    let id = coord
        .submit(video("clip", MB), VideoMetadata::named("clip"))
        .unwrap();
    drain(&mut coord).await;

    assert_eq!(
        coord.get(id).unwrap().last_error,
        Some(TaskError::ServerRejected {
            status: 403,
            message: "forbidden".into()
        })
    );
    assert_eq!(backend.polls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_upload_ignores_late_response() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_gated_upload()
            .with_progress(&[MB])
            .with_statuses(vec![ok_status(json!({"status": "completed"}))]),
    );
    let mut coord = coordinator(&backend);

    let first = coord
        .submit(video("clip", 2 * MB), VideoMetadata::named("clip"))
        .unwrap();
    let started = coord.next_update().await.unwrap();
    assert_eq!(started.phase, Some(Phase::Uploading));

    assert!(coord.cancel(first));
    assert!(!coord.cancel(first));
    let cancelled = coord.next_update().await.unwrap();
    assert_eq!((cancelled.id, cancelled.phase), (first, Some(Phase::Cancelled)));

    // 迟到的上传响应不会改变已取消的任务
    backend.release_upload();
    assert!(coord.next_update().await.is_none());
    tokio::time::sleep(Duration::from_secs(5)).await;
    let task = coord.get(first).unwrap();
    assert_eq!(task.phase, Phase::Cancelled);
    assert_eq!(task.upload_progress, 0);
    assert!(task.remote_task_id.is_none());
    assert_eq!(backend.polls(), 0);

    // 立即重新提交得到新的任务，互不影响
    let second = coord
        .submit(video("clip", 2 * MB), VideoMetadata::named("clip"))
        .unwrap();
    assert_ne!(first, second);
    backend.release_upload();
    let updates = drain(&mut coord).await;

    assert!(updates.iter().all(|u| u.id == second));
    assert_eq!(coord.get(second).unwrap().phase, Phase::Completed);
    assert_eq!(coord.get(first).unwrap().phase, Phase::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_processing_stops_polling() {
    let backend = Arc::new(ScriptedBackend::new());
    let mut coord = coordinator(&backend);

    let id = coord
        .submit(video("clip", MB), VideoMetadata::named("clip"))
        .unwrap();
    wait_for(&mut coord, |u| u.phase == Some(Phase::Processing)).await;
    tokio::time::sleep(Duration::from_millis(3500)).await;

    assert!(coord.cancel(id));
    let update = coord.next_update().await.unwrap();
    assert_eq!(update.phase, Some(Phase::Cancelled));
    assert!(coord.next_update().await.is_none());

    let polls = backend.polls();
    assert_eq!(polls, 3);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.polls(), polls);
    assert_eq!(coord.get(id).unwrap().phase, Phase::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn concurrent_uploads_are_independent() {
    let backend = Arc::new(ScriptedBackend::new().with_statuses(vec![
        ok_status(json!({"status": "completed", "result": {"video_id": 1}})),
        ok_status(json!({"status": "completed", "result": {"video_id": 2}})),
    ]));
    let mut coord = coordinator(&backend);

    let a = coord
        .submit(video("a", MB), VideoMetadata::named("a"))
        .unwrap();
    let b = coord
        .submit(video("b", MB), VideoMetadata::named("b"))
        .unwrap();
    assert_eq!(coord.active_ids(), vec![a, b]);

    let updates = drain(&mut coord).await;
    for id in [a, b] {
        let completed = updates
            .iter()
            .filter(|u| u.id == id && u.phase == Some(Phase::Completed))
            .count();
        assert_eq!(completed, 1);
        assert_eq!(coord.get(id).unwrap().phase, Phase::Completed);
    }

    let mut videos: Vec<String> = coord
        .snapshot()
        .into_iter()
        .filter_map(|t| t.result_video_id)
        .collect();
    videos.sort();
    assert_eq!(videos, vec!["1", "2"]);
    assert!(!coord.has_active());
}

#[tokio::test(start_paused = true)]
async fn completed_tasks_are_swept_after_delay() {
    let backend = Arc::new(
        ScriptedBackend::new().with_statuses(vec![ok_status(json!({"status": "done"}))]),
    );
    let mut coord = coordinator(&backend);

    let id = coord
        .submit(video("clip", MB), VideoMetadata::named("clip"))
        .unwrap();
    drain(&mut coord).await;

    assert!(coord.sweep(Instant::now()).is_empty());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(coord.sweep(Instant::now()), vec![id]);
    assert!(coord.get(id).is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_tasks_stay_until_dismissed() {
    let backend = Arc::new(ScriptedBackend::new().with_upload_result(Err(http_error(500))));
    let mut coord = coordinator(&backend);

    let id = coord
        .submit(video("clip", MB), VideoMetadata::named("clip"))
        .unwrap();
    drain(&mut coord).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(coord.sweep(Instant::now()).is_empty());

    let task = coord.dismiss(id).unwrap();
    assert_eq!(task.phase, Phase::Failed);
    assert!(coord.get(id).is_none());
    assert!(coord.dismiss(id).is_none());
}

#[tokio::test(start_paused = true)]
async fn dismissing_active_task_cancels_it() {
    let backend = Arc::new(ScriptedBackend::new());
    let mut coord = coordinator(&backend);

    let id = coord
        .submit(video("clip", MB), VideoMetadata::named("clip"))
        .unwrap();
    wait_for(&mut coord, |u| u.phase == Some(Phase::Processing)).await;

    let task = coord.dismiss(id).unwrap();
    assert_eq!(task.phase, Phase::Cancelled);
    assert!(coord.next_update().await.is_none());

    let polls = backend.polls();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.polls(), polls);
}
