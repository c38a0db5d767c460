//! JSON-file persistence for finished chats.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

use crate::models::{AiState, Chat};

const MAX_CHAT_ID_LEN: usize = 64;

/// Whether `id` is safe to use as a chat id (and file name).
pub fn is_valid_chat_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CHAT_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// One `<id>.json` file per chat under the chats directory.
///
/// The whole record is rewritten on every save; concurrent turns on the same
/// chat are last-writer-wins.
pub struct ChatStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ChatStore {
    pub fn open_or_create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create chats dir {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if !is_valid_chat_id(id) {
            anyhow::bail!("Invalid chat id: {id:?}");
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    /// Save the conversation for `user_id`, keeping the original creation time.
    pub fn save_state(&self, state: &AiState, user_id: &str) -> Result<Chat> {
        if state.messages.is_empty() {
            anyhow::bail!("Refusing to save chat {} with no messages", state.chat_id);
        }

        let path = self.path_for(&state.chat_id)?;
        let _guard = self.write_lock.lock();

        let created_at = self
            .load(&state.chat_id)?
            .map(|existing| existing.created_at)
            .unwrap_or_else(Utc::now);
        let chat = Chat::from_state(state, user_id, created_at);

        // Atomic write via temp file + rename
        let data = serde_json::to_string_pretty(&chat)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)?;

        tracing::debug!("Saved chat {} ({} messages)", chat.id, chat.messages.len());
        Ok(chat)
    }

    pub fn load(&self, id: &str) -> Result<Option<Chat>> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let chat = serde_json::from_str(&data)
            .with_context(|| format!("Corrupt chat record {}", path.display()))?;
        Ok(Some(chat))
    }

    /// All chats owned by `user_id`, newest first.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<Chat>> {
        let mut chats = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = match std::fs::read_to_string(&path) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!("Skipping unreadable chat {}: {e}", path.display());
                    continue;
                }
            };
            match serde_json::from_str::<Chat>(&data) {
                Ok(chat) if chat.user_id == user_id => chats.push(chat),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping corrupt chat {}: {e}", path.display()),
            }
        }
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(chats)
    }
}
