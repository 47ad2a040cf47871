mod render;

use anyhow::Context;
use base64::Engine;
use chatwire_client::{ChatConfig, ChatSession, FlowSettings, ProviderConfig, SendOutcome};
use chatwire_core::{Attachment, LastError};
use clap::{Parser, Subcommand};
use render::{render_sources, TurnRenderer};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the configured API key.
const API_KEY_ENV: &str = "CHATWIRE_API_KEY";

#[derive(Parser)]
#[command(name = "chatwire", about = "Chatwire: streaming chat client for flow backends")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "chatwire.toml")]
    config: PathBuf,

    /// JSON file with the latest flow settings (`chatflowId`, `overrideConfig`)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and stream the answer
    Ask {
        /// The message text
        message: String,
        /// Files to attach
        #[arg(short, long)]
        attach: Vec<PathBuf>,
    },
    /// Interactive conversation; Ctrl-C cancels the answer in progress
    Chat,
    /// Print the effective configuration with secrets redacted
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let config = load_config(&cli.config, cli.settings.as_deref())?;

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&redacted(config))?);
        }
        Commands::Ask { message, attach } => {
            let attachments = attach
                .iter()
                .map(|p| read_attachment(p))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let session = ChatSession::new(&config)?;
            if let SendOutcome::Failed(err) = run_turn(&session, message, attachments).await? {
                anyhow::bail!(describe_failure(&err));
            }
        }
        Commands::Chat => chat(config).await?,
    }

    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path, settings: Option<&Path>) -> anyhow::Result<ChatConfig> {
    let mut config = ChatConfig::load(path)?;

    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.is_empty() {
            config.provider.set_api_key(key);
        }
    }

    if let Some(settings_path) = settings {
        let raw = std::fs::read_to_string(settings_path).with_context(|| {
            format!("Failed to read settings file '{}'", settings_path.display())
        })?;
        let settings: FlowSettings = serde_json::from_str(&raw)?;
        let ProviderConfig::Predict(predict) = &mut config.provider else {
            anyhow::bail!("flow settings only apply to the predict protocol");
        };
        predict.apply_settings(settings);
        config.provider.validate()?;
    }

    info!(protocol = config.provider.protocol(), "Configuration loaded");
    Ok(config)
}

fn redacted(mut config: ChatConfig) -> ChatConfig {
    let key = match &mut config.provider {
        ProviderConfig::Predict(c) => &mut c.api_key,
        ProviderConfig::UiStream(c) => &mut c.api_key,
    };
    if key.is_some() {
        *key = Some("********".to_string());
    }
    config
}

async fn chat(config: ChatConfig) -> anyhow::Result<()> {
    let session = ChatSession::new(&config)?;
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    println!("Connected ({}). Type /quit to leave.", config.provider.protocol());
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            _ => {}
        }

        if let SendOutcome::Failed(err) = run_turn(&session, line.to_string(), vec![]).await? {
            eprintln!("{}", describe_failure(&err));
            session.clear_error();
        }
    }
    Ok(())
}

/// Sends one turn, rendering the answer as it streams.
async fn run_turn(
    session: &ChatSession,
    text: String,
    attachments: Vec<Attachment>,
) -> anyhow::Result<SendOutcome> {
    let mut updates = session.subscribe();
    let mut renderer = TurnRenderer::new();
    let mut stdout = std::io::stdout();

    let send = session.send(text, attachments);
    tokio::pin!(send);
    let mut watch_interrupts = true;
    let outcome = loop {
        tokio::select! {
            outcome = &mut send => break outcome,
            changed = updates.changed() => {
                if changed.is_ok() {
                    let snapshot = updates.borrow_and_update().clone();
                    renderer.render(&snapshot, &mut stdout)?;
                }
            }
            signal = tokio::signal::ctrl_c(), if watch_interrupts => {
                watch_interrupts = interrupted(signal);
                if watch_interrupts {
                    session.cancel();
                }
            }
        }
    };

    let snapshot = session.snapshot();
    renderer.render(&snapshot, &mut stdout)?;
    match &outcome {
        SendOutcome::Completed => {
            if let Some(turn) = snapshot.last_turn() {
                render_sources(turn, &mut stdout)?;
            }
            println!();
            if let Some(warning) = &snapshot.last_error {
                eprintln!("warning: {warning}");
            }
        }
        SendOutcome::Cancelled => println!("\n[cancelled]"),
        SendOutcome::Ignored | SendOutcome::Failed(_) => {}
    }
    Ok(outcome)
}

/// Whether a Ctrl-C wait ended with an actual interrupt. A failed handler
/// registration is logged and otherwise ignored.
fn interrupted(signal: std::io::Result<()>) -> bool {
    match signal {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Ctrl-C handler unavailable");
            false
        }
    }
}

fn describe_failure(err: &LastError) -> String {
    match err {
        LastError::Unauthenticated => format!(
            "Authentication required: set `api_key` in the config file or {API_KEY_ENV}"
        ),
        LastError::Message(message) => format!("error: {message}"),
    }
}

/// Reads a local file as an inline attachment.
fn read_attachment(path: &Path) -> anyhow::Result<Attachment> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read attachment '{}'", path.display()))?;
    let media_type = guess_media_type(path);
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(Attachment {
        url: format!("data:{media_type};base64,{encoded}"),
        media_type: media_type.to_string(),
        filename: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
    })
}

fn guess_media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "csv" => "text/csv",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        _ => "application/octet-stream",
    }
}
