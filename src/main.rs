use std::path::PathBuf;
use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uplink::config::{init_config, Config, CONFIG_FILE};
use uplink::uploader::get_uploader;
use uplink::utils::{format_bytes, format_duration, format_speed};
use uplink::{BatchOptions, UploadEntry, UploadStatus, UploaderEvent};

#[derive(Parser, Debug)]
#[command(name = "uplink", version, about = "Chunked WebDAV uploader")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Remote folder, relative to the configured endpoint
    destination: String,

    /// Files or directories to upload
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    init_config(config);

    let uploader = get_uploader()?;
    let mut events = uploader.subscribe();

    let entries = cli.paths.into_iter().map(UploadEntry::Path).collect();
    let uploads = uploader
        .batch_upload(&cli.destination, entries, BatchOptions::default())
        .await?;

    // 等待全部完成
    loop {
        match events.recv().await {
            Ok(UploaderEvent::Progress { uploaded_bytes, total_bytes, eta }) => {
                info!(
                    uploaded = %format_bytes(uploaded_bytes),
                    total = %format_bytes(total_bytes),
                    progress = eta.progress,
                    speed = %eta.speed.map(format_speed).unwrap_or_default(),
                    eta = %eta.eta.map(|secs| format_duration(std::time::Duration::from_secs(secs))).unwrap_or_default(),
                    "uploading"
                );
            }
            Ok(UploaderEvent::Finished { uploads, total_bytes }) => {
                info!(uploads, total = %format_bytes(total_bytes), "upload finished");
                break;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "progress events dropped"),
            Err(RecvError::Closed) => break,
        }
    }

    let mut failed = 0;
    for upload in &uploads {
        let status = upload.status();
        println!("{:<10} {}", status.to_string(), upload.source());
        if status != UploadStatus::Finished {
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{} of {} uploads did not finish", failed, uploads.len());
    }
    Ok(())
}
