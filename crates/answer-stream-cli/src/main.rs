//! Ask questions, refresh channels, and build share links from the terminal.
//!
//! Configuration comes from `ANSWER_STREAM_*` variables, optionally loaded
//! from a `.env` file. Logs go to stderr; answers stream to stdout.

mod console;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use answer_stream::{
    ActionCoordinator, ChannelId, HttpTransport, HttpTransportConfig, RefreshCoordinator,
    RefreshOptions, RenderSink, SessionOutcome, ShareLinks, SlotId, SlotSession,
    init_observability,
};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::console::ConsoleSink;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "answer-stream", version, about = "Streamed answers from the terminal")]
struct Cli {
    /// Server origin; overrides `ANSWER_STREAM_BASE_URL`.
    #[arg(long, global = true, value_name = "URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask a question and stream the answer.
    Ask {
        #[arg(long)]
        channel: String,
        /// Regenerate the answer once after it completes.
        #[arg(long)]
        regenerate: bool,
        /// Print a share link that includes this conversation.
        #[arg(long)]
        share: bool,
        question: String,
    },
    /// Refresh a channel and wait for the background task.
    Refresh {
        channel_id: String,
        /// Stop waiting after this many status polls.
        #[arg(long)]
        max_polls: Option<u32>,
    },
    /// Print the share link for a channel.
    Share {
        #[arg(long)]
        channel: String,
    },
}

fn load_env() {
    let _ = dotenvy::from_path(Path::new(
        format!("{}/.env", env!("CARGO_MANIFEST_DIR")).as_str(),
    ));
    dotenvy::dotenv().ok();
}

fn transport(base_url: Option<String>) -> CliResult<Arc<HttpTransport>> {
    let mut config = HttpTransportConfig::from_env()?;
    if let Some(base_url) = base_url {
        config = config.base_url(base_url);
    }
    Ok(Arc::new(HttpTransport::new(config)?))
}

#[tokio::main]
async fn main() -> ExitCode {
    load_env();
    init_observability();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<bool> {
    let transport = transport(cli.base_url)?;
    match cli.command {
        Command::Ask {
            channel,
            regenerate,
            share,
            question,
        } => ask(transport, channel, question, regenerate, share).await,
        Command::Refresh {
            channel_id,
            max_polls,
        } => {
            let mut options = RefreshOptions::default();
            if let Some(max_polls) = max_polls {
                options = options.max_polls(max_polls);
            }
            let outcome = RefreshCoordinator::new(transport, options)
                .refresh(&channel_id)
                .await?;
            let message = outcome.message.as_deref().unwrap_or("");
            if outcome.succeeded {
                println!("refresh complete: {message}");
            } else {
                eprintln!("refresh failed: {message}");
            }
            Ok(outcome.succeeded)
        }
        Command::Share { channel } => {
            let base_url = transport.base_url().clone();
            let links = ShareLinks::new(base_url.as_str(), &ChannelId::new(channel), transport)?;
            println!("{}", links.base_link());
            Ok(true)
        }
    }
}

async fn ask(
    transport: Arc<HttpTransport>,
    channel: String,
    question: String,
    regenerate: bool,
    share: bool,
) -> CliResult<bool> {
    let channel = ChannelId::new(channel);
    let coordinator = ActionCoordinator::builder()
        .transport(transport.clone())
        .channel(channel.clone())
        .sink_factory(|_slot: SlotId| Arc::new(ConsoleSink::default()) as Arc<dyn RenderSink>)
        .build()?;

    let session = coordinator.submit(question)?;
    let mut outcome = wait(&coordinator, &session).await;
    if regenerate && matches!(outcome, SessionOutcome::Completed { .. }) {
        info!(slot = %session.slot(), "regenerating");
        eprintln!("--- regenerating ---");
        let session = coordinator.regenerate()?;
        outcome = wait(&coordinator, &session).await;
    }

    if share && matches!(outcome, SessionOutcome::Completed { .. }) {
        let base_url = transport.base_url().clone();
        let links = ShareLinks::new(base_url.as_str(), &channel, transport)?;
        println!("share: {}", links.link(true, &coordinator.transcript()).await?);
    }
    Ok(!matches!(outcome, SessionOutcome::Failed { .. }))
}

/// Waits for `session`, cancelling everything on Ctrl-C.
async fn wait(coordinator: &ActionCoordinator, session: &SlotSession) -> SessionOutcome {
    tokio::select! {
        outcome = session.outcome() => outcome,
        _ = tokio::signal::ctrl_c() => {
            coordinator.cancel_active();
            session.outcome().await
        }
    }
}
