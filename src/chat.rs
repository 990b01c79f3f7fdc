use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
}

/// One persisted conversation: the unit the store reads and writes whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content: String,
}

/// Reserved for the chat record inside each session directory; attachments
/// may not claim it.
pub const CHAT_RECORD_FILE: &str = "chat.json";

/// Chat ids become directory names, so reject anything that could escape
/// the store root or collide with path syntax.
pub fn validate_chat_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::Validation("chat id must not be empty".into()));
    }
    if id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
        return Err(StoreError::Validation(format!("invalid chat id: {id:?}")));
    }
    Ok(())
}

/// Attachment names become file names inside the session directory.
pub fn validate_attachment_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::Validation("attachment name must not be empty".into()));
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(StoreError::Validation(format!("invalid attachment name: {name:?}")));
    }
    if name == CHAT_RECORD_FILE {
        return Err(StoreError::Validation(format!("attachment name {CHAT_RECORD_FILE:?} is reserved")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let msg = Message::user("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hello"}"#);
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_role_rejected() {
        let err = serde_json::from_str::<Message>(r#"{"role":"tool","content":"x"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn record_without_messages_defaults_empty() {
        let rec: ChatRecord = serde_json::from_str(r#"{"id":"1","name":"n"}"#).unwrap();
        assert!(rec.messages.is_empty());
    }

    #[test]
    fn chat_id_path_components_rejected() {
        assert!(validate_chat_id("1739577600000").is_ok());
        assert!(validate_chat_id("").is_err());
        assert!(validate_chat_id("..").is_err());
        assert!(validate_chat_id("a/b").is_err());
        assert!(validate_chat_id("a\\b").is_err());
    }

    #[test]
    fn attachment_name_reserved_and_path_components_rejected() {
        assert!(validate_attachment_name("notes.txt").is_ok());
        assert!(validate_attachment_name("chat.json").is_err());
        assert!(validate_attachment_name("../escape").is_err());
        assert!(validate_attachment_name("").is_err());
    }
}
