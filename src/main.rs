use anyhow::{Context, Result};
use clap::Parser;
use orchid_vision::{
    config::Config,
    web::{build_state, serve},
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orchid-vision")]
#[command(about = "ONNX-powered orchid classification and detection service")]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: String,

    /// Model configuration file (TOML or JSON)
    #[arg(long, default_value = "models.toml")]
    models_config: PathBuf,

    /// Number of worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// TTF font used for annotation labels (defaults to the bundled font)
    #[arg(long)]
    font: Option<PathBuf>,

    /// Enable development mode
    #[arg(long)]
    dev: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志系统
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting orchid vision service...");
    tracing::info!("Bind address: {}", args.bind);
    tracing::info!("Model config: {}", args.models_config.display());

    let config = Config::new(args.bind, args.models_config, args.workers, args.font, args.dev)?;

    // 模型在接收请求前全部加载完成，失败直接退出
    let state = build_state(&config).context("Failed to initialize models")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(serve(state))?;

    Ok(())
}
