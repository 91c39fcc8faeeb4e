use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, AnswerSink, ClientSettings, DebouncedSyncQueue, DecisionOutbox,
    DecisionSink, MissingDecisionSink, ProfileSink, RemoteClient, SessionContext,
};
use shared::{
    domain::{ItemId, ProfileField, QuestionId, RoleConfigId},
    protocol::AnswerValue,
};
use storage::Storage;
use tracing_subscriber::EnvFilter;

mod review;

#[derive(Parser, Debug)]
#[command(about = "Review candidates and keep profile answers in sync")]
struct Cli {
    /// TOML settings file; `reviewer.toml` is picked up when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Swipe through the feed from stdin commands.
    Review {
        #[arg(long, default_value_t = 50)]
        max_items: usize,
    },
    /// Show the profile, or autosave `field=value` edits.
    Profile { edits: Vec<String> },
    /// List questionnaire questions.
    Questions,
    /// Save one answer; `value` is JSON (`4`, `"yes"`, `["a","b"]`).
    Answer { question_id: QuestionId, value: String },
    Shortlist,
    Note { item_id: ItemId, note: String },
    Roles,
    UseRole { role_config_id: RoleConfigId },
    Stats,
    Outbox {
        #[command(subcommand)]
        action: OutboxAction,
    },
}

#[derive(Subcommand, Debug)]
enum OutboxAction {
    Flush,
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(url) = cli.server_url {
        settings.server_url = Some(url);
    }
    if let Some(token) = cli.token {
        settings.session_token = Some(token);
    }
    if let Some(url) = cli.database_url {
        settings.outbox_database_url = url;
    }

    match cli.command {
        Command::Review { max_items } => {
            let client = remote(&settings)?;
            let outbox = open_outbox(&settings, Arc::new(client.clone())).await?;
            review::run(&client, Arc::new(outbox), &settings, max_items).await?;
        }
        Command::Profile { edits } => {
            let client = remote(&settings)?;
            if edits.is_empty() {
                let profile = client.profile().await?;
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                edit_profile(client, &settings, &edits).await?;
            }
        }
        Command::Questions => {
            let questionnaire = remote(&settings)?.questionnaire().await?;
            println!("{} (v{})", questionnaire.title, questionnaire.version);
            for question in questionnaire.questions {
                println!(
                    "{}  [{:?}]  {}",
                    question.id, question.question_type, question.text
                );
            }
        }
        Command::Answer { question_id, value } => {
            let value: AnswerValue =
                serde_json::from_str(&value).context("answer value must be JSON")?;
            save_answer(remote(&settings)?, &settings, question_id, value).await?;
        }
        Command::Shortlist => {
            let shortlist = remote(&settings)?.shortlist().await?;
            println!("{} liked candidates", shortlist.total);
            for candidate in shortlist.candidates {
                println!(
                    "{}  {:>5.1}  {}  {}",
                    candidate.seeker_profile_id,
                    candidate.fit_score,
                    candidate.headline.as_deref().unwrap_or("-"),
                    candidate.note.as_deref().unwrap_or("")
                );
            }
        }
        Command::Note { item_id, note } => {
            let ack = remote(&settings)?.add_shortlist_note(item_id, &note).await?;
            println!("{}", ack.message);
        }
        Command::Roles => {
            let roles = remote(&settings)?.role_configs().await?;
            for role in roles.configs {
                println!(
                    "{}  {}  {}",
                    role.id,
                    role.role_name,
                    role.description.as_deref().unwrap_or("")
                );
            }
        }
        Command::UseRole { role_config_id } => {
            let ack = remote(&settings)?.set_role_config(role_config_id).await?;
            println!("{}", ack.message);
        }
        Command::Stats => {
            let stats = remote(&settings)?.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats.stats)?);
        }
        Command::Outbox { action } => {
            let sink: Arc<dyn DecisionSink> = match remote(&settings) {
                Ok(client) => Arc::new(client),
                Err(_) => Arc::new(MissingDecisionSink),
            };
            let outbox = open_outbox(&settings, sink).await?;
            match action {
                OutboxAction::Flush => {
                    let report = outbox.flush().await?;
                    println!(
                        "delivered={} rejected={} failed={} remaining={}",
                        report.delivered, report.rejected, report.failed, report.remaining
                    );
                }
                OutboxAction::Status => {
                    let counts = outbox.counts().await?;
                    println!("pending={} settled={}", counts.pending, counts.settled);
                    for entry in outbox.pending().await? {
                        println!(
                            "{}  {}  attempts={}  {}",
                            entry.item_id,
                            entry.outcome,
                            entry.attempts,
                            entry.last_error.as_deref().unwrap_or("")
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

fn remote(settings: &ClientSettings) -> Result<RemoteClient> {
    let Some(url) = settings.server_url.as_deref() else {
        bail!("no server configured; pass --server-url or set REVIEWER_SERVER_URL");
    };
    let token = settings.session_token.clone().unwrap_or_default();
    Ok(RemoteClient::new(url, SessionContext::new(token))?.with_timeout(settings.request_timeout()))
}

async fn open_outbox(
    settings: &ClientSettings,
    sink: Arc<dyn DecisionSink>,
) -> Result<DecisionOutbox> {
    let database_url = settings.database_url();
    let storage = Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open outbox at '{database_url}'"))?;
    Ok(DecisionOutbox::new(storage, sink, settings.retry_policy()))
}

async fn edit_profile(client: RemoteClient, settings: &ClientSettings, edits: &[String]) -> Result<()> {
    let queue: DebouncedSyncQueue<ProfileField, String> =
        DebouncedSyncQueue::new(settings.profile_debounce(), Arc::new(ProfileSink::new(client)));
    for edit in edits {
        let Some((field, value)) = edit.split_once('=') else {
            bail!("expected field=value, got '{edit}'");
        };
        let field: ProfileField = field.parse().map_err(anyhow::Error::msg)?;
        queue.schedule(field, value.to_string()).await;
    }
    for (field, status) in queue.shutdown().await {
        println!("{field}: {}", status_label(status));
    }
    Ok(())
}

async fn save_answer(
    client: RemoteClient,
    settings: &ClientSettings,
    question_id: QuestionId,
    value: AnswerValue,
) -> Result<()> {
    let questionnaire = client.questionnaire().await?;
    let sink = Arc::new(AnswerSink::new(client).with_questions(questionnaire.questions));
    let queue: DebouncedSyncQueue<QuestionId, AnswerValue> =
        DebouncedSyncQueue::new(settings.answer_debounce(), sink.clone());
    queue.schedule(question_id, value).await;
    let status = queue.flush(&question_id).await;
    println!("{question_id}: {}", status_label(status));
    if let Some(progress) = sink.progress().await {
        println!(
            "answered {}/{} ({:.0}%)",
            progress.answered_questions, progress.total_questions, progress.completion_percent
        );
    }
    Ok(())
}

fn status_label(status: client_core::SyncStatus) -> &'static str {
    match status.label() {
        "" => "unchanged",
        label => label,
    }
}
