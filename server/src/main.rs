use std::io;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use tts_core::{FfmpegConverter, VoiceService};
use tts_worker::config::WorkerConfig;
use tts_worker::dispatcher::Dispatcher;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    // stdout carries protocol frames only
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    run().await
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    info!(
        "Starting TTS worker (base dir {}, ffmpeg {})",
        config.base_dir.display(),
        config.ffmpeg_path.display()
    );

    let converter = FfmpegConverter::new(&config.ffmpeg_path);
    let service = VoiceService::new(config.service_config(), Box::new(converter));
    let mut dispatcher = Dispatcher::new(service, io::stdout());
    dispatcher
        .announce_ready()
        .context("Failed to announce readiness on stdout")?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    loop {
        let mut frame = Vec::new();
        let read = stdin
            .read_until(b'\n', &mut frame)
            .await
            .context("Failed to read from stdin")?;
        if read == 0 {
            break;
        }

        // Requests run to completion one at a time; the dispatcher moves onto
        // the blocking pool for each frame and comes back with the result.
        let (returned, written) = tokio::task::spawn_blocking(move || {
            let written = dispatcher.handle_frame(&frame);
            (dispatcher, written)
        })
        .await
        .context("Request task failed")?;
        dispatcher = returned;
        written.context("Failed to write response to stdout")?;
    }

    info!("stdin closed, shutting down");
    Ok(())
}
