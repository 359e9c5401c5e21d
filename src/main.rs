//! Sara Stream command line
//!
//! Streams agent sessions from the run API or replays the legacy feed, and
//! prints the reconciled transcript as it changes.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::collections::HashMap;

use anyhow::{Context, bail};
use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sara_stream::config::{AppConfig, Cli, Commands};
use sara_stream::error::TransportError;
use sara_stream::playback::legacy::{self, LegacyBoard, LegacyFrame};
use sara_stream::playback::{PlaybackOutcome, PlaybackSink};
use sara_stream::session::{ChatSession, ChatState, MessageKind, Reconciler};
use sara_stream::tasks::TaskCatalog;
use sara_stream::telemetry;
use sara_stream::transport::{ApiClient, StreamClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let cli = Cli::parse();
    telemetry::init(cli.log_json);

    let config = AppConfig::load(&cli).context("Failed to load configuration")?;
    info!(
        base_url = %config.backend.base_url,
        legacy_base_url = %config.backend.legacy_base_url,
        tool_errors = config.reconciler.tool_errors.as_str(),
        "Configuration loaded"
    );

    let api = ApiClient::new(&config.backend.base_url, &config.backend.legacy_base_url)
        .context("Invalid backend URL")?;

    match cli.command {
        Commands::Tasks => {
            let catalog = TaskCatalog::builtin().context("Built-in task catalog is invalid")?;
            for task in catalog.iter() {
                println!("{:<8} {:<18} {}", task.id, task.name, task.description);
            }
        }
        Commands::Questions => {
            let questions = api.questions().await.context("Failed to list questions")?;
            for question in questions {
                println!("{:<8} {}", question.id, question.question);
            }
        }
        Commands::Run {
            task_id,
            prompt,
            paced,
            json,
        } => {
            let catalog = TaskCatalog::builtin().context("Built-in task catalog is invalid")?;
            let Some(task) = catalog.get(&task_id) else {
                bail!("Unknown task: {task_id}");
            };
            let request = task.run_request(prompt);

            let (session, mut events) = ChatSession::new(
                api,
                config.transport.settings(),
                Reconciler::new(config.reconciler.tool_errors),
            );
            let printer = (!json).then(|| tokio::spawn(print_transcript(session.subscribe())));
            let cancel = cancel_on_ctrl_c();

            session.start(request).await;
            if paced {
                session
                    .run_paced(&mut events, config.playback.pacing(), &cancel)
                    .await;
            } else {
                session.run(&mut events, &cancel).await;
            }

            let state = session.snapshot().await;
            drop(session);
            if let Some(printer) = printer {
                let _ = printer.await;
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                print_summary(&state);
            }
        }
        Commands::Replay { question_id } => {
            let (client, mut events) = StreamClient::new(api, config.transport.settings());
            let cancel = cancel_on_ctrl_c();
            let mut console = ConsoleBoard::default();
            console.board.start();

            let outcome = legacy::replay(
                &client,
                &mut events,
                question_id,
                &mut console,
                config.playback.pacing(),
                &cancel,
            )
            .await;

            if outcome == PlaybackOutcome::Finished && !console.board.answer().is_empty() {
                println!();
                println!("Answer: {}", console.board.answer());
            }
        }
    }

    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping stream");
            token.cancel();
        }
    });
    cancel
}

fn label(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::User => "user",
        MessageKind::Assistant => "sara",
        MessageKind::ToolCall => "tool",
        MessageKind::Thinking => "...",
    }
}

/// Print transcript entries as they appear or change.
async fn print_transcript(mut updates: watch::Receiver<ChatState>) {
    let mut shown: HashMap<String, String> = HashMap::new();
    while updates.changed().await.is_ok() {
        let state = updates.borrow_and_update().clone();
        for message in &state.messages {
            if shown.get(&message.id) == Some(&message.content) {
                continue;
            }
            println!("[{}] {}", label(message.kind), message.content);
            shown.insert(message.id.clone(), message.content.clone());
        }
    }
}

fn print_summary(state: &ChatState) {
    if !state.workflow_steps.is_empty() {
        println!();
        println!("Workflow:");
        for step in &state.workflow_steps {
            println!("  [{:?}] {} ({})", step.status, step.description, step.action);
        }
    }
    if !state.artifacts.is_empty() {
        println!();
        println!("Artifacts:");
        for artifact in &state.artifacts {
            println!("  {} {}", artifact.kind, artifact.id);
        }
    }
    if let Some(answer) = &state.final_answer {
        println!();
        println!("Answer: {answer}");
    }
}

/// Legacy board that echoes each new log line.
#[derive(Debug, Default)]
struct ConsoleBoard {
    board: LegacyBoard,
}

#[async_trait::async_trait]
impl PlaybackSink<LegacyFrame> for ConsoleBoard {
    async fn reveal(&mut self, frame: LegacyFrame) {
        self.board.apply(frame);
        if let Some(entry) = self.board.latest() {
            println!("{}", entry.text);
        }
        let intermediate = self.board.intermediate();
        if !intermediate.is_empty() {
            println!("{intermediate}");
        }
    }

    async fn failed(&mut self, error: TransportError) {
        tracing::warn!(error = %error, "Legacy feed failed");
        self.board.fail();
        if let Some(entry) = self.board.latest() {
            println!("{}", entry.text);
        }
    }

    async fn ended(&mut self) {
        self.board.finish();
    }
}
