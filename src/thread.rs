//! Ownership and replay of bot-managed conversation threads.
//!
//! A thread belongs to the user whose message started it. Only that user can
//! continue the conversation, and their history is replayed to the model as
//! role-tagged turns.

use crate::cache::ThreadOwnerCache;
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::history::SourceMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Read access to a single thread on the chat platform.
#[async_trait]
pub trait ThreadSource: Send + Sync {
    /// Up to `limit` of the thread's latest messages, newest first.
    async fn recent_messages(&self, limit: u8) -> Result<Vec<SourceMessage>>;

    /// The message the thread was started from, if it still exists.
    async fn starter_message(&self) -> Result<Option<SourceMessage>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub file_uri: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    File {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ThreadHistory {
    /// Chronological, starting with the thread's originating message.
    pub turns: Vec<Turn>,
    /// Messages left out because they failed validation.
    pub rejected: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAccess {
    Owner,
    Foreign { owner_id: u64 },
    Unmanaged,
}

pub struct ThreadContinuity {
    db: Database,
    owners: ThreadOwnerCache,
    bot_id: u64,
    window: u8,
}

impl ThreadContinuity {
    pub fn new(db: Database, bot_id: u64, window: u8, cache_capacity: usize) -> Self {
        Self {
            db,
            owners: ThreadOwnerCache::new(cache_capacity),
            bot_id,
            window: window.clamp(1, 100),
        }
    }

    pub fn from_config(db: Database, bot_id: u64, config: &Config) -> Self {
        Self::new(
            db,
            bot_id,
            config.thread_history_window,
            config.thread_cache_capacity,
        )
    }

    /// Records `owner_id` as the owner of a newly created thread.
    pub async fn start_thread(&self, thread_id: u64, owner_id: u64) -> Result<()> {
        self.db
            .run_blocking(move |db| db.create_thread(thread_id, owner_id))
            .await?;
        self.owners.insert(thread_id, owner_id);
        info!("Thread {} started by {}", thread_id, owner_id);
        Ok(())
    }

    pub async fn authorize(&self, thread_id: u64, author_id: u64) -> Result<ThreadAccess> {
        let owner_id = match self.owners.get(thread_id) {
            Some(owner_id) => Some(owner_id),
            None => {
                let thread = self
                    .db
                    .run_blocking(move |db| db.get_thread(thread_id))
                    .await?;
                if let Some(thread) = thread {
                    self.owners.insert(thread.thread_id, thread.author_id);
                }
                thread.map(|t| t.author_id)
            }
        };

        Ok(match owner_id {
            None => ThreadAccess::Unmanaged,
            Some(owner_id) if owner_id == author_id => ThreadAccess::Owner,
            Some(owner_id) => ThreadAccess::Foreign { owner_id },
        })
    }

    /// History for a follow-up message in a managed thread, or `None` when
    /// the author may not continue it. Nothing is read or written for
    /// non-owners.
    pub async fn continue_conversation<S: ThreadSource + ?Sized>(
        &self,
        source: &S,
        thread_id: u64,
        author_id: u64,
    ) -> Result<Option<ThreadHistory>> {
        match self.authorize(thread_id, author_id).await? {
            ThreadAccess::Owner => Ok(Some(self.reconstruct_history(source, author_id).await?)),
            ThreadAccess::Foreign { owner_id } => {
                debug!(
                    "Ignoring {} in thread {} owned by {}",
                    author_id, thread_id, owner_id
                );
                Ok(None)
            }
            ThreadAccess::Unmanaged => Ok(None),
        }
    }

    pub async fn reconstruct_history<S: ThreadSource + ?Sized>(
        &self,
        source: &S,
        owner_id: u64,
    ) -> Result<ThreadHistory> {
        let recent = source.recent_messages(self.window).await?;
        let starter = source.starter_message().await?;

        let mut messages: Vec<SourceMessage> = recent
            .into_iter()
            .filter(|m| m.author_id == owner_id || m.author_id == self.bot_id)
            .filter(has_payload)
            .collect();
        messages.reverse();

        if let Some(starter) = starter.filter(has_payload) {
            if !messages.iter().any(|m| m.id == starter.id) {
                messages.insert(0, starter);
            }
        }

        let mut history = ThreadHistory::default();
        for message in &messages {
            match turn_from_message(message, self.bot_id) {
                Ok(turn) => history.turns.push(turn),
                Err(e) => {
                    warn!("Leaving message out of thread history: {}", e);
                    history.rejected.push(message.id);
                }
            }
        }
        Ok(history)
    }
}

fn has_payload(message: &SourceMessage) -> bool {
    !message.text().is_empty() || !message.attachments.is_empty()
}

/// Maps one message to a turn: its text, then one file part per attachment.
pub fn turn_from_message(message: &SourceMessage, bot_id: u64) -> Result<Turn> {
    let mut parts = Vec::with_capacity(1 + message.attachments.len());
    if !message.text().is_empty() {
        parts.push(Part::Text {
            text: message.text().to_string(),
        });
    }

    for attachment in &message.attachments {
        let mime_type = attachment
            .content_type
            .clone()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| Error::MissingMimeType {
                message_id: message.id,
                url: attachment.url.clone(),
            })?;
        parts.push(Part::File {
            file_data: FileData {
                file_uri: attachment.url.clone(),
                mime_type,
            },
        });
    }

    let role = if message.author_id == bot_id {
        Role::Model
    } else {
        Role::User
    };
    Ok(Turn { role, parts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tests::message;
    use crate::history::SourceAttachment;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const BOT: u64 = 999;
    const OWNER: u64 = 7;
    const OTHER: u64 = 8;

    struct FakeThread {
        recent: Vec<SourceMessage>,
        starter: Option<SourceMessage>,
        reads: AtomicUsize,
    }

    impl FakeThread {
        /// `chronological` is given oldest first, as a reader would see it.
        fn new(chronological: Vec<SourceMessage>, starter: Option<SourceMessage>) -> Self {
            let mut recent = chronological;
            recent.reverse();
            Self {
                recent,
                starter,
                reads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ThreadSource for FakeThread {
        async fn recent_messages(&self, limit: u8) -> Result<Vec<SourceMessage>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.recent.iter().take(limit as usize).cloned().collect())
        }

        async fn starter_message(&self) -> Result<Option<SourceMessage>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.starter.clone())
        }
    }

    fn manager() -> (TempDir, Database, ThreadContinuity) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("threads.db"), 2).unwrap();
        db.execute_init().unwrap();
        let threads = ThreadContinuity::new(db.clone(), BOT, 100, 16);
        (dir, db, threads)
    }

    fn attachment(url: &str, mime: Option<&str>) -> SourceAttachment {
        SourceAttachment {
            url: url.to_string(),
            content_type: mime.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_authorize() {
        let (_dir, db, threads) = manager();
        threads.start_thread(500, OWNER).await.unwrap();

        assert_eq!(threads.authorize(500, OWNER).await.unwrap(), ThreadAccess::Owner);
        assert_eq!(
            threads.authorize(500, OTHER).await.unwrap(),
            ThreadAccess::Foreign { owner_id: OWNER }
        );
        assert_eq!(threads.authorize(501, OWNER).await.unwrap(), ThreadAccess::Unmanaged);

        // A fresh manager has an empty cache and falls back to the store.
        let cold = ThreadContinuity::new(db, BOT, 100, 16);
        assert_eq!(cold.authorize(500, OWNER).await.unwrap(), ThreadAccess::Owner);
    }

    #[tokio::test]
    async fn test_duplicate_start_keeps_owner() {
        let (_dir, _db, threads) = manager();
        threads.start_thread(500, OWNER).await.unwrap();

        let err = threads.start_thread(500, OTHER).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateThread(500)));
        assert_eq!(threads.authorize(500, OWNER).await.unwrap(), ThreadAccess::Owner);
    }

    #[tokio::test]
    async fn test_non_owner_is_ignored() {
        let (_dir, db, threads) = manager();
        threads.start_thread(500, OWNER).await.unwrap();
        let source = FakeThread::new(vec![message(1, OWNER, "hello")], None);

        let result = threads.continue_conversation(&source, 500, OTHER).await.unwrap();

        assert!(result.is_none());
        assert_eq!(source.reads.load(Ordering::SeqCst), 0);
        assert_eq!(db.get_thread(500).unwrap().unwrap().author_id, OWNER);
    }

    #[tokio::test]
    async fn test_history_reconstruction() {
        let (_dir, _db, threads) = manager();
        threads.start_thread(500, OWNER).await.unwrap();

        let starter = message(500, OWNER, "explain lifetimes");
        let source = FakeThread::new(
            vec![
                message(501, BOT, "Lifetimes describe..."),
                message(502, OTHER, "butting in"),
                message(503, OWNER, ""),
                message(504, OWNER, "and with structs?"),
                message(505, BOT, "Structs holding references..."),
            ],
            Some(starter),
        );

        let history = threads
            .continue_conversation(&source, 500, OWNER)
            .await
            .unwrap()
            .unwrap();

        let roles: Vec<_> = history.turns.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Model, Role::User, Role::Model]
        );
        assert_eq!(
            history.turns[0].parts,
            vec![Part::Text {
                text: "explain lifetimes".to_string()
            }]
        );
        assert_eq!(
            history.turns[2].parts,
            vec![Part::Text {
                text: "and with structs?".to_string()
            }]
        );
        assert!(history.rejected.is_empty());
    }

    #[tokio::test]
    async fn test_window_bounds_replay() {
        let (_dir, db, _) = manager();
        let threads = ThreadContinuity::new(db, BOT, 2, 16);
        let source = FakeThread::new(
            vec![
                message(1, OWNER, "one"),
                message(2, OWNER, "two"),
                message(3, OWNER, "three"),
            ],
            None,
        );

        let history = threads.reconstruct_history(&source, OWNER).await.unwrap();
        let texts: Vec<_> = history
            .turns
            .iter()
            .flat_map(|t| t.parts.iter())
            .map(|p| match p {
                Part::Text { text } => text.as_str(),
                Part::File { .. } => "",
            })
            .collect();
        assert_eq!(texts, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn test_attachments_become_file_parts() {
        let (_dir, _db, threads) = manager();
        let mut with_image = message(2, OWNER, "what is this?");
        with_image
            .attachments
            .push(attachment("https://cdn.example/cat.png", Some("image/png")));
        let mut broken = message(3, OWNER, "and this?");
        broken
            .attachments
            .push(attachment("https://cdn.example/blob", None));
        let source = FakeThread::new(vec![with_image, broken, message(4, BOT, "A cat.")], None);

        let history = threads.reconstruct_history(&source, OWNER).await.unwrap();

        assert_eq!(history.rejected, vec![3]);
        assert_eq!(history.turns.len(), 2);
        assert_eq!(
            history.turns[0].parts[1],
            Part::File {
                file_data: FileData {
                    file_uri: "https://cdn.example/cat.png".to_string(),
                    mime_type: "image/png".to_string(),
                }
            }
        );
    }

    #[test]
    fn test_turn_serialization() {
        let mut msg = message(1, OWNER, "hi");
        msg.attachments
            .push(attachment("https://cdn.example/a.pdf", Some("application/pdf")));
        let turn = turn_from_message(&msg, BOT).unwrap();

        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "role": "user",
                "parts": [
                    {"text": "hi"},
                    {"fileData": {"fileUri": "https://cdn.example/a.pdf", "mimeType": "application/pdf"}}
                ]
            })
        );

        let bot_turn = turn_from_message(&message(2, BOT, "hello"), BOT).unwrap();
        assert_eq!(bot_turn.role, Role::Model);
    }
}
