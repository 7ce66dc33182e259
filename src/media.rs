use crate::config::Config;
use crate::error::TaskError;
use std::fs;
use std::path::{Path, PathBuf};
use vidsearch_common::utils::format_size;

/// 用户选择的一个本地视频文件
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub mime: String,
}

impl MediaFile {
    pub fn new(path: impl Into<PathBuf>, size: u64, mime: impl Into<String>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            file_name,
            size,
            mime: mime.into(),
        }
    }

    /// 读取文件元数据，根据扩展名推断 MIME 类型
    pub fn from_path(path: &Path) -> Result<Self, TaskError> {
        let meta = fs::metadata(path)
            .map_err(|e| TaskError::Validation(format!("无法读取文件 '{}': {e}", path.display())))?;
        if !meta.is_file() {
            return Err(TaskError::Validation(format!(
                "'{}' 不是一个文件",
                path.display()
            )));
        }
        let mime = mime_for_path(path).unwrap_or("application/octet-stream");
        Ok(Self::new(path, meta.len(), mime))
    }

    /// 去掉扩展名的文件名，作为默认显示名称
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_name.clone())
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "ogg" | "ogv" => "video/ogg",
        "mov" | "qt" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        _ => return None,
    };
    Some(mime)
}

/// 与文件一起提交的描述信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoMetadata {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
}

impl VideoMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// 解析逗号分隔的标签，去掉空白与空项
    pub fn parse_tags(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// 提交前的本地校验，失败时不会产生任何网络请求
pub fn validate(file: &MediaFile, metadata: &VideoMetadata, config: &Config) -> Result<(), TaskError> {
    if file.size == 0 {
        return Err(TaskError::Validation(format!("文件 '{}' 为空", file.file_name)));
    }
    if file.size > config.max_file_size {
        return Err(TaskError::Validation(format!(
            "文件 '{}' 过大 ({}), 最大允许 {}",
            file.file_name,
            format_size(file.size),
            format_size(config.max_file_size)
        )));
    }
    if !config.accepts(&file.mime) {
        return Err(TaskError::Validation(format!(
            "不支持的文件类型 '{}', 允许的类型: {}",
            file.mime,
            config.accepted_types.join(", ")
        )));
    }
    if metadata.name.trim().is_empty() {
        return Err(TaskError::Validation("请填写视频名称".into()));
    }
    Ok(())
}
