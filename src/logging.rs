use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// 初始化文件日志，避免诊断输出打乱终端中的进度条。
///
/// 返回的 guard 必须存活到程序结束，否则缓冲中的日志会丢失。
pub fn init_logging(verbose: bool) -> Result<WorkerGuard> {
    let log_file = vidsearch::config::config_dir()?.join("vidsearch.log");

    // 每次运行覆盖旧文件
    let file = std::fs::File::create(&log_file)
        .with_context(|| format!("创建日志文件 '{}' 失败", log_file.display()))?;

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file);

    let default_level = if verbose { "vidsearch=debug" } else { "vidsearch=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking_writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("初始化日志系统失败: {e}"))?;

    Ok(guard)
}
