use crate::args::{SearchArgs, UploadArgs};
use crate::ui;
use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vidsearch::search::{SearchOutcome, search};
use vidsearch::{
    Backend, Config, HttpBackend, MediaFile, Phase, TaskId, UploadCoordinator, VideoMetadata,
};
use vidsearch_common::interface::{SearchQuery, TaskState};
use vidsearch_common::utils::{format_size, format_timecode};

fn backend(config: &Config) -> Result<HttpBackend> {
    HttpBackend::new(config).context("创建 HTTP 客户端失败")
}

/// 把 `-t a,b -t c` 这类参数展开为标签列表
fn collect_tags(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|t| VideoMetadata::parse_tags(t))
        .collect()
}

/// 并发上传多个文件，任一文件失败时返回错误
pub async fn upload(config: &Config, args: UploadArgs) -> Result<()> {
    let backend = Arc::new(backend(config)?);
    let mut coordinator = UploadCoordinator::new(backend, config.clone());
    let mut bars: HashMap<TaskId, ui::TaskBar> = HashMap::new();
    let mut all_ok = true;
    let tags = collect_tags(&args.tags);
    let multiple = args.files.len() > 1;

    for (i, path) in args.files.iter().enumerate() {
        let file = match MediaFile::from_path(path) {
            Ok(f) => f,
            Err(e) => {
                ui::log_error(&format!("{e}"));
                all_ok = false;
                continue;
            }
        };

        let name = match &args.name {
            Some(n) if multiple => format!("{n} ({})", i + 1),
            Some(n) => n.clone(),
            None => file.stem(),
        };
        ui::log_info(&format!(
            "文件名称: {} (大小: {})",
            file.file_name,
            format_size(file.size)
        ));

        let metadata = VideoMetadata {
            name: name.clone(),
            description: args.description.clone(),
            tags: tags.clone(),
        };
        match coordinator.submit(file, metadata) {
            Ok(id) => {
                bars.insert(id, ui::TaskBar::new(&name));
            }
            Err(e) => {
                ui::log_error(&format!("{}: {e}", path.display()));
                all_ok = false;
            }
        }
    }

    if bars.is_empty() {
        bail!("没有可上传的文件");
    }

    let mut interrupted = false;
    loop {
        tokio::select! {
            update = coordinator.next_update() => {
                let Some(update) = update else { break };
                if let Some(bar) = bars.get(&update.id) {
                    bar.apply(&update);
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                let n = coordinator.cancel_all();
                ui::log_warn(&format!("收到中断信号，已取消 {n} 个任务"));
            }
        }
    }

    for task in coordinator.snapshot() {
        match task.phase {
            Phase::Completed => {}
            Phase::Failed => {
                all_ok = false;
                let reason = task
                    .last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "未知错误".into());
                ui::log_error(&format!("'{}' 上传失败: {reason}", task.display_name));
            }
            _ => all_ok = false,
        }
    }

    if !all_ok {
        bail!("部分文件未能完成上传");
    }
    Ok(())
}

pub async fn search_videos(config: &Config, args: SearchArgs) -> Result<()> {
    let backend = backend(config)?;
    let query = SearchQuery {
        query: args.query,
        exact: args.exact,
        tags: collect_tags(&args.tags),
    };

    let cancel = CancellationToken::new();
    let spinner = ui::Spinner::new("正在搜索...");

    let outcome = {
        let fut = search(&backend, &query, &config.poll, &cancel, |state| {
            if let TaskState::InProgress { progress, operation } = state {
                let op = operation.unwrap_or_else(|| "搜索中".into());
                spinner.set_message(format!("{op} ({progress}%)"));
            }
        });
        tokio::pin!(fut);
        loop {
            tokio::select! {
                r = &mut fut => break r,
                _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => cancel.cancel(),
            }
        }
    };
    spinner.finish();

    let hits = match outcome.context("搜索失败")? {
        SearchOutcome::Hits(hits) => hits,
        SearchOutcome::Cancelled => {
            ui::log_warn("搜索已取消");
            return Ok(());
        }
    };

    if hits.is_empty() {
        ui::log_info("没有找到匹配的片段");
        return Ok(());
    }

    ui::log_info(&format!("找到 {} 个片段:", hits.len()));
    for hit in hits {
        let tags = if hit.tags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", hit.tags.join(", "))
        };
        ui::log_info(&format!(
            "[{} - {}] {}: {}{}",
            format_timecode(hit.timecode_start),
            format_timecode(hit.timecode_end),
            hit.video_name,
            hit.text.trim(),
            tags
        ));
        if let Some(url) = hit.presigned_url {
            ui::log_info(&format!("    {url}"));
        }
    }
    Ok(())
}

pub async fn list_videos(config: &Config) -> Result<()> {
    let list = backend(config)?
        .list_videos()
        .await
        .context("获取视频列表失败")?;

    if list.videos.is_empty() {
        ui::log_info("服务端还没有视频");
        return Ok(());
    }
    for video in list.videos {
        ui::log_info(&format!(
            "{:>6}  {:<40} {:<12} {} 个片段",
            video.id.to_string(),
            video.name,
            video.status,
            video.fragments_count
        ));
    }
    Ok(())
}

pub async fn list_fragments(config: &Config, video_id: &str) -> Result<()> {
    let resp = backend(config)?
        .video_fragments(video_id)
        .await
        .with_context(|| format!("获取视频 {video_id} 的片段失败"))?;

    ui::log_info(&format!(
        "视频 {} 共 {} 个片段:",
        resp.video_id,
        resp.fragments.len()
    ));
    for fragment in resp.fragments {
        ui::log_info(&format!(
            "[{} - {}] {}",
            format_timecode(fragment.timecode_start),
            format_timecode(fragment.timecode_end),
            fragment.text.trim()
        ));
    }
    Ok(())
}

pub async fn task_status(config: &Config, task_id: &str) -> Result<()> {
    let resp = backend(config)?
        .task_status(task_id)
        .await
        .with_context(|| format!("查询任务 {task_id} 失败"))?;

    match resp.classify() {
        TaskState::Pending => ui::log_info("任务等待中"),
        TaskState::InProgress { progress, operation } => ui::log_info(&format!(
            "任务处理中: {progress}% {}",
            operation.unwrap_or_default()
        )),
        TaskState::Completed { result } => {
            let result = result.map(|v| v.to_string()).unwrap_or_default();
            ui::log_info(&format!("任务已完成 {result}"));
        }
        TaskState::Failed { error } => ui::log_error(&format!(
            "任务失败: {}",
            error.unwrap_or_else(|| "未知错误".into())
        )),
    }
    Ok(())
}

pub async fn health(config: &Config) -> Result<()> {
    let report = backend(config)?
        .health()
        .await
        .context("健康检查失败")?;

    let status = report.status.as_deref().unwrap_or("未知");
    ui::log_info(&format!("服务端状态: {status}"));
    for (key, value) in &report.details {
        let value = match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        };
        ui::log_info(&format!("  {key}: {value}"));
    }

    if !report.is_healthy() {
        bail!("服务端状态异常: {status}");
    }
    Ok(())
}
