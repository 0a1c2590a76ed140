use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use read_status::cli::Args;
use read_status::subscription::Backoff;
use read_status::{
    subscribe_all, Config, HttpReadStatusApi, ReadStatusError, Session, SessionCommand, TerminalRenderer,
    WsEventSource,
};

fn load_config(args: &Args) -> Result<Config, ReadStatusError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    args.apply_to(&mut config);
    config.validate()?;
    Ok(config)
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Forward stdin lines as session commands until stdin or the session closes.
fn spawn_stdin_commands() -> mpsc::Receiver<SessionCommand> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "stopped reading commands from stdin");
                    break;
                }
            };
            let command = match line.trim() {
                "r" | "read" => SessionCommand::MarkLastMessageRead,
                "" => continue,
                other => {
                    tracing::warn!(input = other, "unknown command, use `r` to mark the last message as read");
                    continue;
                }
            };
            if tx.send(command).await.is_err() {
                break;
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config.log_filter);

    if args.no_color {
        colored::control::set_override(false);
    }

    let token = config
        .access_token
        .clone()
        .ok_or_else(|| ReadStatusError::Config("no access token; pass --access-token or set READ_STATUS_ACCESS_TOKEN".into()))?;

    let api = HttpReadStatusApi::builder(config.api_url.as_str())
        .access_token(token.as_str())
        .connect_timeout(config.http.connect_timeout())
        .request_timeout(config.http.request_timeout())
        .build()?;

    let events = WsEventSource::new(config.events_url.as_str(), token).backoff(Backoff::new(
        Duration::from_millis(config.events.reconnect_base_ms),
        Duration::from_millis(config.events.reconnect_max_ms),
    ));

    let (intake_tx, intake_rx) = mpsc::channel(config.events.intake_capacity);
    let subscriptions = subscribe_all(&events, &intake_tx).await?;
    drop(intake_tx);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    let mut session = Session::new(Arc::new(api), TerminalRenderer::stdout()).initial_fetch(config.initial_fetch);
    if args.mark_read {
        tracing::info!("enter `r` to mark the last message as read");
        session = session.commands(spawn_stdin_commands());
    }
    let state = session.run(intake_rx, shutdown).await?;

    for sub in &subscriptions {
        sub.cancel();
    }
    tracing::info!(
        read = state.read_count(),
        unread = state.unread_count(),
        "session ended"
    );
    Ok(())
}
