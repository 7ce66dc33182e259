mod args;
mod client;
mod logging;
mod ui;

use anyhow::Result;
use args::{Command, get_cli_args};
use vidsearch::Config;
use vidsearch::config::{load_or_create_config, reset_config};

fn load_config() -> Result<Config> {
    let config = load_or_create_config()?;
    ui::log_debug(&format!("后端地址: {}", config.base_url));
    tracing::info!(base_url = %config.base_url, "客户端启动");
    Ok(config)
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Config => {
            let path = reset_config()?;
            ui::log_info(&format!("配置文件已重置: {}", path.display()));
            Ok(())
        }
        Command::Upload(upload_args) => client::upload(&load_config()?, upload_args).await,
        Command::Search(search_args) => client::search_videos(&load_config()?, search_args).await,
        Command::Videos => client::list_videos(&load_config()?).await,
        Command::Fragments { video_id } => client::list_fragments(&load_config()?, &video_id).await,
        Command::Status { task_id } => client::task_status(&load_config()?, &task_id).await,
        Command::Health => client::health(&load_config()?).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = get_cli_args();

    let _guard = logging::init_logging(args.verbose)?;
    ui::init_global_logger(args.verbose)?;

    let result = run(args.command).await;
    if let Err(e) = &result {
        tracing::error!("{e:#}");
    }
    result
}
