//! CLI command handlers.
//!
//! Each `run_*` function backs one `docqa` subcommand and prints to
//! stdout. [`Conversation`] carries one chat session's state between
//! turns: it is what `ask` and `chat` share.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use docqa_core::models::{Answer, ChatMessage, Role};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::engine::{extend_history, Engine, EngineOptions};
use crate::generation::create_model;
use crate::history::HistoryStore;
use crate::ingest::{ingest, IngestOptions};
use crate::loader::load_paths_blocking;
use crate::store::{open_store, VectorIndex};

/// Chat history store as configured.
pub fn history_store(config: &Config) -> HistoryStore {
    let store = HistoryStore::new(config.history.dir.clone());
    if config.history.sweep_on_list {
        store.with_sweep_on_list(config.history.retention_days)
    } else {
        store
    }
}

/// Open the index and wire the answering engine from configuration.
pub async fn open_engine(config: &Config) -> Result<Engine> {
    let store = open_store(&config.index)?;
    let embedder = create_provider(&config.embedding)?;
    let index = VectorIndex::new(store, embedder);
    let handle = index.load().await.with_context(|| {
        format!(
            "Failed to open collection '{}'; run `docqa ingest` first",
            index.collection()
        )
    })?;
    info!(collection = %handle.collection, passages = handle.count, "index loaded");
    let model = create_model(&config.generation)?;
    Ok(Engine::new(
        Arc::new(index.with_handle(handle)),
        model,
        EngineOptions::from_config(config),
    ))
}

/// `docqa ingest <paths..>`
pub async fn run_ingest(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let documents = load_paths_blocking(paths.to_vec()).await?;
    if documents.is_empty() {
        bail!("No supported documents found (expected .pdf, .txt or .md)");
    }
    let store = open_store(&config.index)?;
    let embedder = create_provider(&config.embedding)?;
    let index = VectorIndex::new(store, embedder);
    let report = ingest(&index, &documents, &IngestOptions::from_config(config)?).await?;

    println!("Ingest complete");
    println!("  collection: {}", report.handle.collection);
    println!("  documents:  {}", report.documents);
    println!("  passages:   {}", report.passages);
    println!("  batches:    {}", report.batches);
    println!("  dimensions: {}", report.handle.dims);
    Ok(())
}

/// One chat session: its id, owner and transcript so far.
pub struct Conversation<'a> {
    engine: &'a Engine,
    history: &'a HistoryStore,
    id: String,
    owner: Option<String>,
    title: Option<String>,
    messages: Vec<ChatMessage>,
}

impl<'a> Conversation<'a> {
    /// Resume `session` for `owner`, or start a fresh one when `session`
    /// is `None`.
    ///
    /// A session that is missing or belongs to someone else is an error;
    /// the message does not say which.
    pub async fn open(
        engine: &'a Engine,
        history: &'a HistoryStore,
        session: Option<&str>,
        owner: Option<&str>,
    ) -> Result<Conversation<'a>> {
        let (id, title, messages) = match session {
            Some(id) => {
                let existing = history
                    .load(id, owner)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("Session not found: {}", id))?;
                (existing.id, Some(existing.title), existing.messages)
            }
            None => (HistoryStore::new_session_id(), None, Vec::new()),
        };
        Ok(Conversation {
            engine,
            history,
            id,
            owner: owner.map(String::from),
            title,
            messages,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Answer `question`, append the turn and persist the session.
    ///
    /// A failed save is logged; the answer is still returned.
    pub async fn ask(&mut self, question: &str) -> docqa_core::Result<Answer> {
        let answer = self.engine.answer(question, &self.messages).await?;
        self.messages = extend_history(std::mem::take(&mut self.messages), question, &answer);
        match self
            .history
            .save(
                &self.id,
                &self.messages,
                self.owner.as_deref(),
                self.title.as_deref(),
            )
            .await
        {
            Ok(saved) => self.title = Some(saved.title),
            Err(e) => warn!(session = %self.id, error = %e, "failed to save session"),
        }
        Ok(answer)
    }
}

fn format_answer(answer: &Answer) -> String {
    let mut out = answer.answer.trim_end().to_string();
    if !answer.sources.is_empty() {
        let sources: Vec<&str> = answer.sources.iter().map(String::as_str).collect();
        out.push_str("\n\nSources: ");
        out.push_str(&sources.join(", "));
    }
    out
}

/// `docqa ask <question>`
pub async fn run_ask(
    config: &Config,
    question: &str,
    session: Option<&str>,
    user: Option<&str>,
) -> Result<()> {
    let engine = open_engine(config).await?;
    let history = history_store(config);
    let mut conversation = Conversation::open(&engine, &history, session, user).await?;
    let answer = conversation.ask(question).await?;
    println!("{}", format_answer(&answer));
    eprintln!("session: {}", conversation.id());
    Ok(())
}

/// `docqa chat`
pub async fn run_chat(config: &Config, session: Option<&str>, user: Option<&str>) -> Result<()> {
    let engine = open_engine(config).await?;
    let history = history_store(config);
    let mut conversation = Conversation::open(&engine, &history, session, user).await?;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    chat_loop(&mut conversation, stdin, tokio::io::stdout()).await
}

/// Read questions line by line until EOF or `/quit`.
///
/// Engine failures are printed and the loop keeps going.
pub async fn chat_loop<R, W>(conversation: &mut Conversation<'_>, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output
        .write_all(format!("Session {} (type /quit to leave)\n", conversation.id()).as_bytes())
        .await?;
    let mut lines = input.lines();
    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "/quit" || question == "/exit" {
            break;
        }
        let reply = match conversation.ask(question).await {
            Ok(answer) => format_answer(&answer),
            Err(e) => format!("Sorry, I could not answer that: {}", e),
        };
        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n\n").await?;
    }
    output.flush().await?;
    Ok(())
}

/// `docqa sessions list`
pub async fn run_sessions_list(config: &Config, user: Option<&str>) -> Result<()> {
    let sessions = history_store(config).list(user).await?;
    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }
    println!("{:<38} {:<22} TITLE", "ID", "UPDATED");
    for s in sessions {
        println!(
            "{:<38} {:<22} {}",
            s.id,
            s.updated_at.format("%Y-%m-%d %H:%M:%S"),
            s.title
        );
    }
    Ok(())
}

/// `docqa sessions show <id>`
pub async fn run_sessions_show(config: &Config, id: &str, user: Option<&str>) -> Result<()> {
    let session = history_store(config)
        .load(id, user)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Session not found: {}", id))?;
    println!("--- Session ---");
    println!("id:         {}", session.id);
    println!("title:      {}", session.title);
    println!("updated_at: {}", session.updated_at.to_rfc3339());
    for message in &session.messages {
        println!();
        let speaker = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        println!("[{}]", speaker);
        println!("{}", message.content.trim_end());
        if let Some(sources) = message.sources.as_ref().filter(|s| !s.is_empty()) {
            let sources: Vec<&str> = sources.iter().map(String::as_str).collect();
            println!("(sources: {})", sources.join(", "));
        }
    }
    Ok(())
}

/// `docqa sessions delete <id>`
pub async fn run_sessions_delete(config: &Config, id: &str, user: Option<&str>) -> Result<()> {
    let history = history_store(config);
    // Deleting requires the same ownership check as viewing.
    if history.load(id, user).await?.is_none() {
        bail!("Session not found: {}", id);
    }
    history.delete(id).await?;
    println!("Deleted session {}", id);
    Ok(())
}

/// `docqa sweep [--days N]`
pub async fn run_sweep(config: &Config, days: Option<u32>) -> Result<()> {
    let days = days.unwrap_or(config.history.retention_days);
    let removed = history_store(config).sweep(days).await?;
    println!("Removed {} session(s) inactive for more than {} day(s)", removed, days);
    Ok(())
}
