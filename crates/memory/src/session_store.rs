use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use switchyard_core::{Message, Session, SessionFlags, SCHEMA_VERSION};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid session id: {0:?}")]
    InvalidId(String),
    #[error("Store task failed: {0}")]
    Task(String),
}

/// Durable home of sessions between turns.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError>;
    async fn persist(&self, session: &Session) -> Result<(), StoreError>;
}

/// First line of every session file.
#[derive(Debug, Serialize, Deserialize)]
struct SessionHeader {
    schema_version: u32,
    id: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    flags: SessionFlags,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// One JSONL file per session: a header line, then one line per message.
pub struct JsonlSessionStore {
    base_path: PathBuf,
}

impl JsonlSessionStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StoreError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    fn session_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        session_path(&self.base_path, id)
    }
}

fn session_path(base: &Path, id: &str) -> Result<PathBuf, StoreError> {
    if id.is_empty() || id.contains("..") || id.contains('/') || id.contains('\\') {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(base.join(format!("{}.jsonl", id)))
}

fn read_session(path: &Path) -> Result<Option<Session>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header: SessionHeader = match lines.next() {
        Some(line) => serde_json::from_str(&line?)?,
        None => return Ok(None),
    };
    if header.schema_version > SCHEMA_VERSION {
        warn!(
            "Session {} written by newer schema {}",
            header.id, header.schema_version
        );
    }

    let mut messages = Vec::new();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(&line) {
            Ok(message) => messages.push(message),
            Err(e) => warn!("Skipping corrupted message line in {}: {}", header.id, e),
        }
    }

    Ok(Some(Session {
        id: header.id,
        user_id: header.user_id,
        messages,
        flags: header.flags,
        created_at: header.created_at,
        updated_at: header.updated_at,
    }))
}

fn write_session(path: &Path, session: &Session) -> Result<(), StoreError> {
    let header = SessionHeader {
        schema_version: SCHEMA_VERSION,
        id: session.id.clone(),
        user_id: session.user_id.clone(),
        flags: session.flags.clone(),
        created_at: session.created_at,
        updated_at: session.updated_at,
    };

    // Each writer gets its own temp file; the rename decides the last writer.
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        writeln!(writer, "{}", serde_json::to_string(&header)?)?;
        for message in session.messages.iter().filter(|m| !m.ephemeral) {
            writeln!(writer, "{}", serde_json::to_string(message)?)?;
        }
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl SessionStore for JsonlSessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let path = self.session_path(id)?;
        tokio::task::spawn_blocking(move || read_session(&path))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    async fn persist(&self, session: &Session) -> Result<(), StoreError> {
        let path = self.session_path(&session.id)?;
        let snapshot = session.clone();
        tokio::task::spawn_blocking(move || write_session(&path, &snapshot))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;
        debug!("Persisted session {}", session.id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use switchyard_core::ThinkingLevel;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_round_trip_skips_ephemeral() {
        let dir = TempDir::new().unwrap();
        let store = JsonlSessionStore::new(dir.path()).unwrap();

        let mut session = Session::new("s1", Some("alice".into()));
        session.push(Message::system("be brief"));
        session.push(Message::user("hi"));
        session.push(Message::user("plan first").into_ephemeral());
        session.push(Message::assistant("hello"));
        session.flags.thinking_level = Some(ThinkingLevel::High);
        store.persist(&session).await.unwrap();

        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 3);
        assert!(loaded.messages.iter().all(|m| !m.ephemeral));
        assert_eq!(loaded.flags.thinking_level, Some(ThinkingLevel::High));
        assert_eq!(loaded.user_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_missing_session_is_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonlSessionStore::new(dir.path()).unwrap();
        assert!(store.load("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_persists_leave_a_whole_file() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(JsonlSessionStore::new(dir.path()).unwrap());

        let writers: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move {
                    let mut session = Session::new("shared", None);
                    for i in 0..=n {
                        session.push(Message::user(format!("writer {} line {}", n, i)));
                    }
                    store.persist(&session).await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let loaded = store.load("shared").await.unwrap().unwrap();
        let first = loaded.messages[0].text();
        let writer = first.split_whitespace().nth(1).unwrap().to_string();
        let expected: usize = writer.parse::<usize>().unwrap() + 1;
        assert_eq!(loaded.messages.len(), expected);
        assert!(loaded
            .messages
            .iter()
            .all(|m| m.text().starts_with(&format!("writer {} ", writer))));

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name != "shared.jsonl")
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[tokio::test]
    async fn test_invalid_ids_rejected() {
        let dir = TempDir::new().unwrap();
        let store = JsonlSessionStore::new(dir.path()).unwrap();
        for id in ["", "../etc", "a/b", "a\\b"] {
            assert!(matches!(store.load(id).await, Err(StoreError::InvalidId(_))), "{id:?}");
        }
    }

    #[tokio::test]
    async fn test_corrupted_line_skipped() {
        let dir = TempDir::new().unwrap();
        let store = JsonlSessionStore::new(dir.path()).unwrap();
        let mut session = Session::new("s2", None);
        session.push(Message::user("one"));
        store.persist(&session).await.unwrap();

        let path = dir.path().join("s2.jsonl");
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("{not json\n");
        std::fs::write(&path, text).unwrap();

        let loaded = store.load("s2").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);
    }
}
