mod render;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chat_widget::clock::SystemClock;
use chat_widget::services::{ConfigService, HttpBackend, ServiceError};
use chat_widget::settings::SettingsError;
use chat_widget::store::FileStore;
use chat_widget::transport::WsDialer;
use chat_widget::{Backends, Settings, Widget, WidgetError};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Widget(#[from] WidgetError),
    #[error("stdin read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Flags override the matching `CHAT_WIDGET_*` environment variables.
#[derive(Parser, Debug)]
#[command(name = "chat-cli", about = "Terminal host for the support chat widget")]
struct Cli {
    #[arg(long)]
    api_token: Option<String>,

    #[arg(long)]
    api_base_url: Option<String>,

    #[arg(long)]
    ws_url: Option<String>,

    #[arg(long, help = "json or socketio")]
    codec: Option<String>,

    #[arg(long, help = "connect or first_message")]
    auth_mode: Option<String>,

    #[arg(long)]
    storage_dir: Option<PathBuf>,

    #[arg(long, help = "Reject onboarding emails without an @")]
    validate_email: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive chat on stdin. Lines starting with `/` are commands:
    /// `/open`, `/close`, `/quit`.
    Chat,
    /// Print the widget configuration as JSON.
    Config,
}

impl Cli {
    fn overrides(&self) -> HashMap<&'static str, String> {
        let mut vars = HashMap::new();
        let mut put = |key: &'static str, value: Option<String>| {
            if let Some(value) = value {
                vars.insert(key, value);
            }
        };
        put("CHAT_WIDGET_API_TOKEN", self.api_token.clone());
        put("CHAT_WIDGET_API_BASE_URL", self.api_base_url.clone());
        put("CHAT_WIDGET_WS_URL", self.ws_url.clone());
        put("CHAT_WIDGET_CODEC", self.codec.clone());
        put("CHAT_WIDGET_AUTH_MODE", self.auth_mode.clone());
        put("CHAT_WIDGET_STORAGE_DIR", self.storage_dir.as_ref().map(|dir| dir.display().to_string()));
        put("CHAT_WIDGET_VALIDATE_EMAIL", self.validate_email.then(|| "true".to_owned()));
        vars
    }

    fn settings(&self) -> Result<Settings, SettingsError> {
        let overrides = self.overrides();
        Settings::from_lookup(|key| overrides.get(key).cloned().or_else(|| std::env::var(key).ok()))
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli.settings()?;
    let backend = Arc::new(HttpBackend::new(&settings.api_base_url, &settings.api_token, settings.request_timeout)?);

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(&settings, backend).await,
        Command::Config => run_config(backend.as_ref()).await,
    }
}

async fn run_config(backend: &HttpBackend) -> Result<(), CliError> {
    let config = backend.fetch_config().await?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn run_chat(settings: &Settings, backend: Arc<HttpBackend>) -> Result<(), CliError> {
    let backends = Backends {
        config: backend.clone(),
        tickets: backend,
        dialer: Arc::new(WsDialer::new(settings.ws_url.clone(), settings.codec.clone(), settings.auth_mode)),
        storage: Arc::new(FileStore::new(settings.storage_dir.clone())),
        clock: Arc::new(SystemClock),
    };
    let (widget, task) = Widget::start(settings.session_options(), settings.validator(), backends).await?;
    println!("{}", render::header(widget.config()));

    let mut events = widget.subscribe();
    let offset = settings.utc_offset;
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = render::render_event(&event, offset) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "cli: dropped events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    widget.open()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" => break,
            "/open" => widget.open()?,
            "/close" => widget.close()?,
            text => widget.submit(text)?,
        }
    }

    widget.shutdown()?;
    task.await?;
    drop(widget);
    printer.await?;
    Ok(())
}
