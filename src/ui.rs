use std::time::Duration;

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::OnceCell;
use vidsearch::task::{Phase, TaskUpdate};

static G_UI: OnceCell<Ui> = OnceCell::const_new();

const UPLOAD_TEMPLATE: &str =
    "{spinner:.green} {prefix:20!} 上传 [{bar:40.cyan/blue}] {percent:>3}% | {elapsed_precise} | {msg}";
const PROCESSING_TEMPLATE: &str =
    "{spinner:.green} {prefix:20!} 处理 [{bar:40.green/blue}] {percent:>3}% | {elapsed_precise} | {msg}";

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

pub struct Ui {
    log_level: LogLevel,
    mp: MultiProgress,
}

impl Ui {
    fn new(log_level: LogLevel) -> Self {
        Ui {
            log_level,
            mp: MultiProgress::new(),
        }
    }

    fn println(&self, msg: &str) {
        if self.mp.is_hidden() {
            println!("{msg}");
            return;
        }
        self.mp.println(msg).unwrap_or_else(|_| {
            println!("{msg}");
        });
    }

    fn log(&self, level: LogLevel, msg: &str) {
        if level <= self.log_level {
            if level == LogLevel::Info {
                self.println(msg);
            } else {
                let level_str = match level {
                    LogLevel::Error => "ERROR",
                    LogLevel::Warn => "WARN",
                    LogLevel::Info => "INFO",
                    LogLevel::Debug => "DEBUG",
                };
                let timestamp_str = chrono::Local::now().format("%H:%M:%S%.3f");
                self.println(&format!("[{timestamp_str}] [{level_str}] {msg}"));
            }
        }
    }
}

pub fn init_global_logger(verbose: bool) -> Result<()> {
    let log_level = if verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    G_UI.set(Ui::new(log_level))
        .map_err(|_| anyhow::anyhow!("全局输出模块已经初始化过了"))?;
    Ok(())
}

fn global() -> &'static Ui {
    G_UI.get()
        .expect("全局输出模块(G_UI)未初始化，请先调用 init_global_logger")
}

#[allow(unused)]
pub fn log_debug(msg: &str) {
    global().log(LogLevel::Debug, msg);
}

pub fn log_info(msg: &str) {
    global().log(LogLevel::Info, msg);
}

pub fn log_warn(msg: &str) {
    global().log(LogLevel::Warn, msg);
}

pub fn log_error(msg: &str) {
    global().log(LogLevel::Error, msg);
}

/// 一个上传任务在终端中的进度条
pub struct TaskBar {
    bar: ProgressBar,
}

impl TaskBar {
    pub fn new(name: &str) -> Self {
        let bar = global().mp.add(ProgressBar::new(100));
        bar.set_style(style(UPLOAD_TEMPLATE));
        bar.set_prefix(name.to_string());
        bar.set_message("等待开始");
        bar.enable_steady_tick(Duration::from_millis(200));
        Self { bar }
    }

    /// 把一条状态变化渲染到进度条上
    pub fn apply(&self, update: &TaskUpdate) {
        match update.phase {
            Some(Phase::Uploading) => {
                self.bar.set_style(style(UPLOAD_TEMPLATE));
                self.bar.set_position(0);
                self.bar.set_message("正在上传");
            }
            Some(Phase::Processing) => {
                self.bar.set_style(style(PROCESSING_TEMPLATE));
                self.bar.set_position(0);
                self.bar.set_message("等待服务端处理");
            }
            _ => {}
        }

        if let Some(p) = update.upload_progress {
            self.bar.set_position(p as u64);
        }
        if let Some(p) = update.processing_progress {
            self.bar.set_position(p as u64);
        }
        if let Some(op) = &update.current_operation {
            self.bar.set_message(op.clone());
        }

        match update.phase {
            Some(Phase::Completed) => {
                let video = update.result_video_id.as_deref().unwrap_or("?");
                let msg = match update.result_fragment_count {
                    Some(n) => format!("完成 (视频 {video}, {n} 个片段)"),
                    None => format!("完成 (视频 {video})"),
                };
                self.bar.finish_with_message(msg);
            }
            Some(Phase::Failed) => {
                let reason = update
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "未知错误".into());
                self.bar.abandon_with_message(format!("失败: {reason}"));
            }
            Some(Phase::Cancelled) => {
                self.bar.abandon_with_message("已取消");
            }
            _ => {}
        }
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

pub struct Spinner {
    sp: ProgressBar,
}

impl Spinner {
    pub fn new(msg: &str) -> Self {
        let spinner_style = ProgressStyle::with_template("{spinner:.green}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let sp = global().mp.add(ProgressBar::new_spinner());
        sp.set_style(spinner_style);
        sp.set_message(msg.to_string());
        sp.enable_steady_tick(Duration::from_millis(100));

        Self { sp }
    }

    pub fn set_message(&self, msg: String) {
        self.sp.set_message(msg);
    }

    pub fn finish(self) {
        self.sp.finish_and_clear();
    }
}
