use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::chat::{
    Attachment, ChatRecord, Message, CHAT_RECORD_FILE, validate_attachment_name, validate_chat_id,
};
use crate::error::StoreError;

/// Durable chat, attachment and system-prompt state.
///
/// Every write is a whole-file overwrite: the new content fully replaces the
/// old, there is no partial-write visibility. At most one logical writer per
/// chat is assumed (single user, single tab).
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist a chat record. Merge-on-absence: a `None` or empty `name`
    /// keeps the stored name, a `None` message list keeps the stored
    /// messages; anything supplied overwrites wholesale. Saving over an
    /// existing id is last-writer-wins, never a conflict.
    async fn save_chat(
        &self,
        id: &str,
        name: Option<&str>,
        messages: Option<&[Message]>,
    ) -> Result<(), StoreError>;

    /// Messages of a chat; `[]` for an unknown id (absence is normal for a
    /// brand-new chat, not an error).
    async fn load_chat(&self, id: &str) -> Result<Vec<Message>, StoreError>;

    /// Every stored record, in store-enumeration order. Callers sort.
    async fn list_chats(&self) -> Result<Vec<ChatRecord>, StoreError>;

    /// Remove the chat and all its attachments. Idempotent.
    async fn delete_chat(&self, id: &str) -> Result<(), StoreError>;

    /// Replace the chat's attachment set with exactly `files`. Callers who
    /// want to keep unlisted files must pre-merge.
    async fn save_attachments(&self, id: &str, files: &[Attachment]) -> Result<(), StoreError>;

    /// All attachments of a chat; `[]` if it has none.
    async fn load_attachments(&self, id: &str) -> Result<Vec<Attachment>, StoreError>;

    /// Remove one attachment by name. `NotFound` if it does not exist.
    async fn delete_attachment(&self, id: &str, name: &str) -> Result<(), StoreError>;

    /// The single process-wide system prompt; empty string if never set.
    async fn load_system_prompt(&self) -> Result<String, StoreError>;

    async fn save_system_prompt(&self, prompt: &str) -> Result<(), StoreError>;
}

/// File-backed store: one directory per chat under `<data>/chats/`, holding
/// `chat.json` plus one file per attachment; `<data>/system_prompt.txt` as
/// the prompt singleton.
#[derive(Clone)]
pub struct FsChatStore {
    chats_dir: PathBuf,
    prompt_path: PathBuf,
}

impl FsChatStore {
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        let chats_dir = data_dir.join("chats");
        fs::create_dir_all(&chats_dir)?;
        let prompt_path = data_dir.join("system_prompt.txt");
        if !prompt_path.exists() {
            fs::write(&prompt_path, "")?;
            tracing::debug!(path = %prompt_path.display(), "created empty system prompt");
        }
        Ok(Self { chats_dir, prompt_path })
    }

    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(resolve_default_data_dir())
    }

    fn chat_dir(&self, id: &str) -> PathBuf {
        self.chats_dir.join(id)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.chat_dir(id).join(CHAT_RECORD_FILE)
    }

    fn read_record(&self, id: &str) -> Result<Option<ChatRecord>, StoreError> {
        let path = self.record_path(id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn write_record(&self, record: &ChatRecord) -> Result<(), StoreError> {
        let dir = self.chat_dir(&record.id);
        fs::create_dir_all(&dir)?;
        let raw = serde_json::to_string(record)?;
        fs::write(self.record_path(&record.id), raw)?;
        Ok(())
    }
}

fn resolve_default_data_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME").ok().map(PathBuf::from).unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local").join("share")
    });
    base.join("deepchat")
}

fn is_attachment(path: &Path) -> bool {
    path.is_file() && path.file_name().is_some_and(|n| n != CHAT_RECORD_FILE)
}

#[async_trait]
impl ChatStore for FsChatStore {
    async fn save_chat(
        &self,
        id: &str,
        name: Option<&str>,
        messages: Option<&[Message]>,
    ) -> Result<(), StoreError> {
        validate_chat_id(id)?;
        let existing = self.read_record(id)?;
        let name = match name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => existing.as_ref().map(|r| r.name.clone()).unwrap_or_default(),
        };
        let messages = match messages {
            Some(m) => m.to_vec(),
            None => existing.map(|r| r.messages).unwrap_or_default(),
        };
        let record = ChatRecord { id: id.to_string(), name, messages };
        self.write_record(&record)?;
        tracing::debug!(chat = %id, messages = record.messages.len(), "chat saved");
        Ok(())
    }

    async fn load_chat(&self, id: &str) -> Result<Vec<Message>, StoreError> {
        validate_chat_id(id)?;
        Ok(self.read_record(id)?.map(|r| r.messages).unwrap_or_default())
    }

    async fn list_chats(&self) -> Result<Vec<ChatRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.chats_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            match self.read_record(&id) {
                Ok(Some(record)) => records.push(record),
                // Directory without a readable record: skip, same as a
                // half-created chat that only has attachments so far.
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(chat = %id, error = %e, "skipping unreadable chat record");
                }
            }
        }
        Ok(records)
    }

    async fn delete_chat(&self, id: &str) -> Result<(), StoreError> {
        validate_chat_id(id)?;
        let dir = self.chat_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(chat = %id, "chat deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_attachments(&self, id: &str, files: &[Attachment]) -> Result<(), StoreError> {
        validate_chat_id(id)?;
        // Validate the whole set before touching disk, so a bad name cannot
        // leave a half-replaced attachment directory behind.
        for file in files {
            validate_attachment_name(&file.name)?;
        }
        let dir = self.chat_dir(id);
        // The attachment set may be written before the chat record exists.
        fs::create_dir_all(&dir)?;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if is_attachment(&path) {
                fs::remove_file(&path)?;
            }
        }
        for file in files {
            fs::write(dir.join(&file.name), &file.content)?;
        }
        tracing::debug!(chat = %id, files = files.len(), "attachment set replaced");
        Ok(())
    }

    async fn load_attachments(&self, id: &str) -> Result<Vec<Attachment>, StoreError> {
        validate_chat_id(id)?;
        let dir = self.chat_dir(id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !is_attachment(&path) {
                continue;
            }
            let Some(name) = path.file_name() else { continue };
            let content = fs::read_to_string(&path)?;
            files.push(Attachment { name: name.to_string_lossy().into_owned(), content });
        }
        Ok(files)
    }

    async fn delete_attachment(&self, id: &str, name: &str) -> Result<(), StoreError> {
        validate_chat_id(id)?;
        validate_attachment_name(name)?;
        let path = self.chat_dir(id).join(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(chat = %id, file = %name, "attachment deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_system_prompt(&self) -> Result<String, StoreError> {
        match fs::read_to_string(&self.prompt_path) {
            Ok(prompt) => Ok(prompt),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_system_prompt(&self, prompt: &str) -> Result<(), StoreError> {
        fs::write(&self.prompt_path, prompt)?;
        tracing::debug!(len = prompt.len(), "system prompt saved");
        Ok(())
    }
}
