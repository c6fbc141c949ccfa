mod cli;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use cli::{Cli, Command};
use log::{debug, info};

use downloader_core::config::HashAlgorithm;
use downloader_core::facade::{
    DownloadFileArgs, ListDownloadsArgs, ToolFacade, VerifyIntegrityArgs,
};
use downloader_core::orchestrator::{Orchestrator, DEFAULT_MAX_CONCURRENT_TASKS};
use downloader_core::progress::ProgressMonitor;
use downloader_core::registry::TaskRegistry;
use downloader_core::resume_store::{ResumeStore, DEFAULT_RESUME_DIR};
use downloader_core::session::SessionManager;
use downloader_core::task::Status;

const DEFAULT_REGISTRY_PATH: &str = "tasks.json";

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        log::error!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logger(&cli);
    debug!("CLI arguments: {:?}", cli);

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let registry = Arc::new(TaskRegistry::load(DEFAULT_REGISTRY_PATH).await);
    let resume_store = Arc::new(ResumeStore::new(DEFAULT_RESUME_DIR));
    let progress = Arc::new(ProgressMonitor::new());
    let sessions = Arc::new(SessionManager::new(client.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        client,
        registry,
        resume_store,
        progress,
        sessions.clone(),
        DEFAULT_MAX_CONCURRENT_TASKS,
    ));
    let facade = ToolFacade::new(orchestrator, sessions);

    let response = match cli.command {
        Command::Get {
            url,
            output,
            concurrency,
            no_resume,
            sha256,
            blocking,
        } => {
            facade
                .download_file(DownloadFileArgs {
                    url,
                    output_path: output,
                    filename: None,
                    max_concurrency: concurrency,
                    chunk_size: None,
                    timeout: None,
                    retry_count: None,
                    work_mode: Some(if blocking {
                        downloader_core::config::WorkMode::Blocking
                    } else {
                        downloader_core::config::WorkMode::NonBlocking
                    }),
                    enable_resume: Some(!no_resume),
                    session_id: None,
                    headers: None,
                    integrity: sha256.map(|expected| downloader_core::config::IntegrityConfig {
                        algorithm: HashAlgorithm::Sha256,
                        expected_checksum: Some(expected),
                        verify_segments: true,
                        verify_final: true,
                    }),
                })
                .await
        }
        Command::Status { task_id } => facade.get_download_status(&task_id).await,
        Command::Pause { task_id } => facade.pause_download(&task_id).await,
        Command::Resume { task_id } => facade.resume_download(&task_id).await,
        Command::Cancel { task_id } => facade.cancel_download(&task_id).await,
        Command::List { status, limit, offset } => {
            let status = match status {
                Some(raw) => Some(parse_status(&raw)?),
                None => None,
            };
            facade.list_downloads(ListDownloadsArgs { status, limit, offset }).await
        }
        Command::Verify { file_path, algorithm, expected } => {
            let algorithm = HashAlgorithm::from_str(&algorithm)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            facade
                .verify_integrity(VerifyIntegrityArgs {
                    file_path,
                    algorithm,
                    expected_checksum: expected,
                    generate_report: false,
                })
                .await
        }
    };

    let rendered = serde_json::to_string_pretty(&response).context("failed to render response")?;
    println!("{rendered}");
    if !response.success {
        std::process::exit(1);
    }
    info!("command completed");
    Ok(())
}

fn parse_status(raw: &str) -> Result<Status> {
    match raw.to_ascii_lowercase().as_str() {
        "pending" => Ok(Status::Pending),
        "downloading" => Ok(Status::Downloading),
        "paused" => Ok(Status::Paused),
        "completed" => Ok(Status::Completed),
        "failed" => Ok(Status::Failed),
        "cancelled" | "canceled" => Ok(Status::Cancelled),
        other => Err(anyhow::anyhow!("unknown status filter: {other}")),
    }
}

fn init_logger(cli: &Cli) {
    use env_logger::Env;
    use log::LevelFilter;

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    let level = if cli.quiet {
        LevelFilter::Error
    } else if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    builder.filter_level(level);
    if !cli.verbose {
        builder.format_timestamp_secs();
    }
    let _ = builder.try_init();
}
