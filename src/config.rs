use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::{env, fs, path::PathBuf, time::Duration};
use vidsearch_common::utils::parse_size;

/// 覆盖 `base_url` 的环境变量
pub const API_URL_ENV: &str = "VIDSEARCH_API_URL";

const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1";
const DEFAULT_MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    #[serde(deserialize_with = "size_from_toml")]
    pub max_file_size: u64,
    pub accepted_types: Vec<String>,
    pub request_timeout_secs: u64,
    /// 上传请求整体超时，默认一小时
    pub upload_timeout_secs: Option<u64>,
    /// 完成的任务在多少秒后自动移出列表
    pub dismiss_after_secs: u64,
    pub poll: PollPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            accepted_types: vec![
                "video/mp4".into(),
                "video/webm".into(),
                "video/ogg".into(),
                "video/quicktime".into(),
            ],
            request_timeout_secs: 30,
            upload_timeout_secs: Some(3600),
            dismiss_after_secs: 10,
            poll: PollPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(content).context("解析配置文件失败")?;
        Ok(cfg)
    }

    /// 应用环境变量覆盖
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.base_url = url.trim().to_string();
            }
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 上传请求整体超时，配置为 0 表示不限制
    pub fn upload_timeout(&self) -> Option<Duration> {
        self.upload_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn dismiss_after(&self) -> Duration {
        Duration::from_secs(self.dismiss_after_secs)
    }

    pub fn accepts(&self, mime: &str) -> bool {
        self.accepted_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(mime))
    }
}

/// 轮询任务状态的节奏与上限
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PollPolicy {
    pub interval_ms: u64,
    /// 连续出现临时错误时，间隔按 `backoff_factor` 增长，但不超过该值
    pub max_interval_ms: u64,
    pub backoff_factor: f64,
    pub max_attempts: u32,
    pub max_elapsed_secs: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_interval_ms: 8000,
            backoff_factor: 2.0,
            max_attempts: 600,
            max_elapsed_secs: 1800,
        }
    }
}

impl PollPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms).max(self.interval())
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_elapsed_secs)
    }

    /// 出现一次临时错误后的下一个轮询间隔
    pub fn backoff(&self, current: Duration) -> Duration {
        let factor = if self.backoff_factor.is_finite() {
            self.backoff_factor.max(1.0)
        } else {
            1.0
        };
        current.mul_f64(factor).min(self.max_interval())
    }
}

fn size_from_toml<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawSize {
        Bytes(u64),
        Text(String),
    }

    match RawSize::deserialize(deserializer)? {
        RawSize::Bytes(n) => Ok(n),
        RawSize::Text(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .context("无法确定配置目录")?;

    let dir = base.join("vidsearch");
    fs::create_dir_all(&dir).context("创建配置目录失败")?;
    Ok(dir)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// 加载配置文件，不存在时写入默认配置并返回默认值
pub fn load_or_create_config() -> Result<Config> {
    let path = config_path()?;
    let cfg = if path.exists() {
        let content = fs::read_to_string(&path).context("读取配置文件失败")?;
        Config::from_toml_str(&content)?
    } else {
        fs::write(&path, default_config_content()).context("写入默认配置失败")?;
        Config::default()
    };
    Ok(cfg.with_env_overrides())
}

/// 重置配置文件为默认内容
pub fn reset_config() -> Result<PathBuf> {
    let path = config_path()?;
    fs::write(&path, default_config_content()).context("写入默认配置失败")?;
    Ok(path)
}

pub fn default_config_content() -> String {
    let default = Config::default();
    let types = default
        .accepted_types
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"# ================ 后端服务配置 ================

# API 根地址 (可用环境变量 {env} 覆盖)
base_url = "{base_url}"

# 单个文件的最大大小, 支持 kb / mb / gb 单位
max_file_size = "500mb"

# 允许上传的视频类型
accepted_types = [{types}]

# 普通请求超时 (秒)
request_timeout_secs = {request_timeout}

# 上传请求超时 (秒), 设为 0 表示不限制
upload_timeout_secs = {upload_timeout}

# 完成的任务在多少秒后从列表中移除
dismiss_after_secs = {dismiss}

# ================ 任务轮询配置 ================

[poll]
# 轮询间隔 (毫秒)
interval_ms = {interval}

# 连续失败时退避的最大间隔 (毫秒)
max_interval_ms = {max_interval}

# 退避倍数
backoff_factor = {factor:.1}

# 最多轮询次数
max_attempts = {attempts}

# 最长等待时间 (秒)
max_elapsed_secs = {elapsed}
"#,
        env = API_URL_ENV,
        base_url = default.base_url,
        types = types,
        request_timeout = default.request_timeout_secs,
        upload_timeout = default.upload_timeout_secs.unwrap_or(0),
        dismiss = default.dismiss_after_secs,
        interval = default.poll.interval_ms,
        max_interval = default.poll.max_interval_ms,
        factor = default.poll.backoff_factor,
        attempts = default.poll.max_attempts,
        elapsed = default.poll.max_elapsed_secs,
    )
}
