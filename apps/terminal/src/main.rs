use std::{
    collections::HashMap,
    io::Write,
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    config::load_settings, ChatError, ChatService, ChatSession, HttpChatService, SessionEvent,
    SubmitOutcome,
};
use shared::domain::{Message, Role, SessionId};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Talk to the Dream Weaver from a terminal")]
struct Args {
    /// Overrides the configured service url.
    #[arg(long)]
    api_url: Option<String>,
    /// Reuses an existing conversation instead of starting a new one.
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Checks that the service is reachable and exits.
    #[arg(long)]
    check: bool,
}

enum Command<'a> {
    Say(&'a str),
    Act(&'a str),
    History,
    Quit,
}

fn parse_command(line: &str) -> Command<'_> {
    let trimmed = line.trim();
    if trimmed == "/quit" {
        Command::Quit
    } else if trimmed == "/history" {
        Command::History
    } else if trimmed == "/act" {
        Command::Act("")
    } else if let Some(rest) = trimmed.strip_prefix("/act ") {
        Command::Act(rest.trim())
    } else {
        Command::Say(line)
    }
}

fn generate_user_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "user_{}_{}",
        chrono::Utc::now().timestamp_millis(),
        &suffix[..9]
    )
}

fn print_message(message: &Message) {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "weaver",
    };
    println!("{speaker}> {}", message.content);
}

fn spawn_event_printer(session: &ChatSession) -> JoinHandle<()> {
    let mut events = session.subscribe_events();
    tokio::spawn(async move {
        // Bytes already written for each revealing message.
        let mut printed: HashMap<usize, usize> = HashMap::new();
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("terminal: dropped {} session events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event {
                SessionEvent::MessageAppended { index, message } => {
                    if message.is_assistant() && message.content.is_empty() {
                        print!("weaver> ");
                        printed.insert(index, 0);
                    } else if message.is_assistant() {
                        print_message(&message);
                    }
                }
                SessionEvent::MessageRevealed { index, content } => {
                    let done = printed.entry(index).or_default();
                    if let Some(delta) = content.get(*done..) {
                        print!("{delta}");
                        *done = content.len();
                    }
                    let _ = std::io::stdout().flush();
                }
                SessionEvent::PhaseChanged(phase) => {
                    debug!("terminal: phase={:?}", phase);
                    if phase == client_core::TurnPhase::Idle && !printed.is_empty() {
                        println!();
                        printed.clear();
                    }
                }
                SessionEvent::PreambleStage { name, .. } => println!("  ~ {name}..."),
                SessionEvent::MilestoneReached(id) => {
                    println!("  * milestone {id} reached; anchor it with /act <what you will do>");
                }
                SessionEvent::ActionConfirmed(annotation) => {
                    println!("  * anchored to milestone {}: {}", annotation.target, annotation.text);
                }
                SessionEvent::ActionCleared(id) => debug!("terminal: milestone {} cleared", id),
                SessionEvent::TurnFailed(reason) => warn!("terminal: turn failed: {}", reason),
                SessionEvent::HistoryLoaded { count } => {
                    debug!("terminal: history loaded count={}", count)
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(url) = args.api_url {
        settings.api_base_url = url;
    }
    let service = Arc::new(
        HttpChatService::new(
            &settings.api_base_url,
            settings.request_timeout(),
            settings.history_limit,
        )
        .context("failed to configure chat service")?,
    );

    if args.check {
        let health = service.health().await?;
        println!("{} is {}", health.service, health.status);
        return Ok(());
    }

    let user_id = args.user_id.unwrap_or_else(generate_user_id);
    if let Err(err) = service.register_user(&user_id, &user_id).await {
        warn!("terminal: user registration failed user_id={} error={:#}", user_id, err);
    }

    let session = ChatSession::new(
        SessionId::new(user_id.clone()),
        Arc::clone(&service) as Arc<dyn ChatService>,
        settings.session_config(),
    );
    match session.load_history().await {
        Ok(_) => session.snapshot().iter().for_each(print_message),
        Err(err) => warn!("terminal: history unavailable: {}", err),
    }
    info!("terminal: connected user_id={} api={}", user_id, service.base_url());

    let printer = spawn_event_printer(&session);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Command::Quit => break,
            Command::History => session.snapshot().iter().for_each(print_message),
            Command::Act(text) => match session.action_capture().submit(text).await {
                Ok(SubmitOutcome::Recorded(_)) => {}
                Ok(SubmitOutcome::AlreadyConfirmed) => println!("  * already anchored"),
                Err(ChatError::Rejected(reason)) => debug!("terminal: action ignored: {}", reason),
                Err(err) => println!("  ! {err}"),
            },
            Command::Say(text) => {
                session.send(text).await;
                session.wait_until_idle().await;
            }
        }
    }

    session.shutdown();
    drop(session);
    printer.abort();
    Ok(())
}
