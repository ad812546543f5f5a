//! Chat history store: one JSON file per session.
//!
//! ```text
//! <dir>/<session-id>.json
//! {
//!   "id": "…", "username": "alice", "title": "…",
//!   "updated_at": "2026-10-14T09:30:00Z",
//!   "messages": [{ "role": "user", "content": "…" },
//!                { "role": "assistant", "content": "…", "sources": ["a.pdf"] }]
//! }
//! ```
//!
//! `load` treats a session owned by someone else exactly like a missing
//! one. Writes go to a temp file and are renamed into place; concurrent
//! saves of the same session are last-write-wins.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use docqa_core::models::{derive_title, ChatMessage, ChatSession, SessionSummary};
use docqa_core::{Error, Result};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_RETENTION_DAYS: u32 = 7;

const MAX_ID_LEN: usize = 128;

pub struct HistoryStore {
    dir: PathBuf,
    /// Retention in days applied before every `list`, when set.
    sweep_on_list: Option<u32>,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sweep_on_list: None,
        }
    }

    /// Run `sweep(max_age_days)` as part of every `list`.
    pub fn with_sweep_on_list(mut self, max_age_days: u32) -> Self {
        self.sweep_on_list = Some(max_age_days);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn new_session_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        valid_id(id).then(|| self.dir.join(format!("{}.json", id)))
    }

    /// Persist `messages` under `id`, stamped with the current time.
    ///
    /// Without an explicit `title` one is derived from the first user
    /// message.
    pub async fn save(
        &self,
        id: &str,
        messages: &[ChatMessage],
        owner: Option<&str>,
        title: Option<&str>,
    ) -> Result<ChatSession> {
        let session = ChatSession {
            id: id.to_string(),
            username: owner.map(String::from),
            title: title
                .filter(|t| !t.trim().is_empty())
                .map(String::from)
                .unwrap_or_else(|| derive_title(messages)),
            updated_at: Utc::now(),
            messages: messages.to_vec(),
        };
        self.write(&session).await?;
        Ok(session)
    }

    /// Write `session` exactly as given.
    pub async fn write(&self, session: &ChatSession) -> Result<()> {
        let path = self.path_for(&session.id).ok_or_else(|| invalid_id(&session.id))?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self
            .dir
            .join(format!(".{}.json.tmp-{}", session.id, Uuid::new_v4()));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(session)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(session = %session.id, messages = session.messages.len(), "session saved");
        Ok(())
    }

    /// The session, if it exists and belongs to `owner`.
    pub async fn load(&self, id: &str, owner: Option<&str>) -> Result<Option<ChatSession>> {
        let Some(path) = self.path_for(id) else {
            return Ok(None);
        };
        let Some(session) = read_session(&path).await? else {
            return Ok(None);
        };
        if session.username.as_deref() != owner {
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Summaries of `owner`'s sessions, most recently updated first.
    ///
    /// Unreadable files are skipped with a warning.
    pub async fn list(&self, owner: Option<&str>) -> Result<Vec<SessionSummary>> {
        if let Some(days) = self.sweep_on_list {
            self.sweep(days).await?;
        }
        let mut summaries: Vec<SessionSummary> = self
            .all_sessions()
            .await?
            .into_iter()
            .filter(|(_, s)| s.username.as_deref() == owner)
            .map(|(_, s)| SessionSummary::from(&s))
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Remove a session. Returns whether a file was deleted.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let Some(path) = self.path_for(id) else {
            return Ok(false);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete sessions not updated within `max_age_days`. Returns the
    /// number removed.
    pub async fn sweep(&self, max_age_days: u32) -> Result<usize> {
        self.sweep_older_than(Utc::now() - Duration::days(i64::from(max_age_days)))
            .await
    }

    /// Delete sessions whose `updated_at` is before `cutoff`.
    pub async fn sweep_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for (path, session) in self.all_sessions().await? {
            if session.updated_at < cutoff {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        if removed > 0 {
            info!(removed, cutoff = %cutoff, "expired sessions removed");
        }
        Ok(removed)
    }

    async fn all_sessions(&self) -> Result<Vec<(PathBuf, ChatSession)>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_session = path.extension().is_some_and(|e| e == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_session {
                continue;
            }
            match read_session(&path).await {
                Ok(Some(session)) => sessions.push((path, session)),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session"),
            }
        }
        Ok(sessions)
    }
}

async fn read_session(path: &Path) -> Result<Option<ChatSession>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn invalid_id(id: &str) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("invalid session id '{}'", id),
    ))
}
