//! File-based conversation store: one JSON-lines file per conversation.
//!
//! Each line is a JSON-encoded `Turn`. The file is rewritten on every save.
//!
//! Storage location: `~/.tierbot/conversations/<readable-id>-<digest>.jsonl`,
//! where the digest is taken over the exact conversation id so ids that
//! sanitize to the same readable part still get distinct files.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tierbot_core::conversation::{ConversationId, Turn};
use tierbot_core::error::StoreError;
use tierbot_core::store::{ConversationStore, StoredConversation};
use tokio::sync::Mutex;
use tracing::debug;

/// Readable part of a file name is cut to this many chars.
const READABLE_ID_CHARS: usize = 48;

/// First line of every file; holds the owning user.
#[derive(serde::Serialize, serde::Deserialize)]
struct Header {
    conversation_id: ConversationId,
    user_id: String,
}

pub struct FileConversationStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileConversationStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    /// Default directory: `~/.tierbot/conversations`
    pub fn default_dir() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".tierbot").join("conversations")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &ConversationId) -> PathBuf {
        let digest = Sha256::digest(id.0.as_bytes());
        let readable: String = id
            .0
            .chars()
            .take(READABLE_ID_CHARS)
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir
            .join(format!("{readable}-{}.jsonl", hex::encode(&digest[..8])))
    }

    /// Parse a file, which must belong to conversation `expected`.
    fn parse(content: &str, expected: &ConversationId) -> Result<StoredConversation, StoreError> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header_line = lines
            .next()
            .ok_or_else(|| StoreError::Corrupt("empty conversation file".into()))?;
        let header: Header = serde_json::from_str(header_line)
            .map_err(|e| StoreError::Corrupt(format!("bad header: {e}")))?;
        if header.conversation_id != *expected {
            return Err(StoreError::Corrupt(format!(
                "file for '{}' holds conversation '{}'",
                expected, header.conversation_id
            )));
        }

        let turns = lines
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str::<Turn>(line)
                    .map_err(|e| StoreError::Corrupt(format!("bad turn on line {}: {e}", i + 2)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StoredConversation {
            id: header.conversation_id,
            user_id: header.user_id,
            turns,
        })
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, id: &ConversationId) -> Result<Option<StoredConversation>, StoreError> {
        let path = self.path_for(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        Self::parse(&content, id).map(Some)
    }

    async fn save(&self, conversation: StoredConversation) -> Result<(), StoreError> {
        let header = Header {
            conversation_id: conversation.id.clone(),
            user_id: conversation.user_id.clone(),
        };

        let mut content = serde_json::to_string(&header)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize header: {e}")))?;
        content.push('\n');
        for turn in &conversation.turns {
            let line = serde_json::to_string(turn)
                .map_err(|e| StoreError::Storage(format!("Failed to serialize turn: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StoreError::Storage(format!("Failed to create conversation directory: {e}"))
        })?;
        let path = self.path_for(&conversation.id);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to write {}: {e}", path.display())))?;

        debug!(
            conversation_id = %conversation.id,
            turns = conversation.turns.len(),
            "Conversation saved"
        );
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::Storage(e.to_string())),
        };
        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?
        {
            if entry.path().extension().is_some_and(|ext| ext == "jsonl") {
                count += 1;
            }
        }
        Ok(count)
    }
}
