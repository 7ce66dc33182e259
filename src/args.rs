use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "视频上传与检索客户端", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// 打印详细输出
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(about = "重置配置文件")]
    Config,
    #[command(about = "上传视频并等待服务端处理完成")]
    Upload(UploadArgs),
    #[command(about = "在已处理的视频中搜索")]
    Search(SearchArgs),
    #[command(about = "列出服务端的所有视频")]
    Videos,
    #[command(about = "查看视频的所有片段")]
    Fragments {
        video_id: String,
    },
    #[command(about = "查询任务状态")]
    Status {
        task_id: String,
    },
    #[command(about = "检查服务端健康状态")]
    Health,
}

#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// 视频名称 (默认使用文件名)
    #[arg(long, short = 'n')]
    pub name: Option<String>,

    /// 视频描述
    #[arg(long, short = 'd', default_value = "")]
    pub description: String,

    /// 标签, 可重复或用逗号分隔
    #[arg(long = "tag", short = 't', value_name = "TAG")]
    pub tags: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    pub query: String,

    /// 精确匹配
    #[arg(long)]
    pub exact: bool,

    /// 按标签过滤, 可重复或用逗号分隔
    #[arg(long = "tag", short = 't', value_name = "TAG")]
    pub tags: Vec<String>,
}

pub fn get_cli_args() -> Cli {
    Cli::parse()
}
