//! AI/ML playground terminal client
//!
//! (c) Softlandia 2025

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{info, warn};
use playground_client::api::SessionRegistry;
use playground_client::api::sessions::schemas::{ChatState, UploadState};
use playground_client::core::chat::ConnectionState;
use playground_client::core::session::SessionState;
use playground_client::core::upload::{UploadFile, UploadStatus};
use playground_client::infrastructure::config::PlaygroundConfig;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::{Builder, Runtime};

#[derive(Parser)]
#[command(name = "playground-client")]
#[command(about = "Terminal client for the AI/ML playground demos")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a file to a demo and save the processed result
    Upload {
        /// Demo id or title, e.g. `ocr` or "face recognition"
        demo: String,

        /// File to process
        file: PathBuf,

        /// Where to write the result (defaults to `<file>.processed`)
        #[arg(long, short)]
        out: Option<PathBuf>,

        /// Content type to send instead of the one guessed from the extension
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Chat with the playground bot over its WebSocket channel
    Chat,
}

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = PlaygroundConfig::from_env()?;

    // sessions are driven by events on a single thread
    let runtime: Runtime = Builder::new_current_thread().enable_all().build()?;

    runtime.block_on(async {
        let mut registry = SessionRegistry::from_config(&config)?;
        match cli.command {
            Command::Upload {
                demo,
                file,
                out,
                content_type,
            } => upload(&mut registry, &demo, file, out, content_type).await,
            Command::Chat => chat(&mut registry).await,
        }
    })
}

async fn upload(
    registry: &mut SessionRegistry,
    demo: &str,
    path: PathBuf,
    out: Option<PathBuf>,
    content_type: Option<String>,
) -> anyhow::Result<()> {
    let mut file = UploadFile::open(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    if let Some(content_type) = content_type {
        file = file.with_content_type(content_type);
    }
    info!(
        "{} ({:.2} MB) ready for {demo} processing",
        file.name(),
        file.size_mb()
    );

    let out = out.unwrap_or_else(|| {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".processed");
        path.with_file_name(name)
    });

    let handle = registry.start_upload(file, demo);
    let mut updates = handle.subscribe();

    let snapshot = loop {
        let snapshot = updates.borrow_and_update().clone();
        if snapshot.status.is_terminal() {
            break snapshot;
        }
        info!("uploading... {}%", snapshot.progress);

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break handle.snapshot();
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("cancelling upload");
                handle.cancel();
            }
        }
    };

    if let (UploadStatus::Succeeded, Some(result)) = (snapshot.status, &snapshot.result) {
        tokio::fs::write(&out, result)
            .await
            .with_context(|| format!("failed to write {}", out.display()))?;
        info!("result written to {}", out.display());
    }

    println!("{}", serde_json::to_string_pretty(&UploadState::from(&snapshot))?);
    Ok(())
}

async fn chat(registry: &mut SessionRegistry) -> anyhow::Result<()> {
    let mut updates = registry.open_chat().subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printed = 0;

    println!("Please wait for connection...");

    loop {
        let snapshot = updates.borrow_and_update().clone();
        for message in &snapshot.transcript[printed..] {
            println!("{message}");
        }
        printed = snapshot.transcript.len();

        if snapshot.state == ConnectionState::Closed {
            break;
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            line = lines.next_line() => match line? {
                Some(line) if line.trim() == "/quit" => registry.close_chat(),
                Some(line) => {
                    if let Err(rejected) = registry.send_chat(&line).await {
                        warn!("not sent: {rejected}");
                    }
                }
                None => registry.close_chat(),
            },
        }
    }

    if let Some(snapshot) = registry.chat_snapshot() {
        if let Some(error) = &snapshot.error {
            warn!("{error}");
        }
        info!(
            "chat closed after {} messages",
            ChatState::from(&snapshot).transcript.len()
        );
    }
    Ok(())
}
