use crate::error::ErrorKind;
use crate::settings::CHAT_STORAGE_KEY;
use crate::storage::{LocalStorage, StorageError};
use chrono::{DateTime, Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use uuid::Uuid;

/// Number of messages kept in persisted storage.
pub const MAX_PERSISTED_MESSAGES: usize = 25;

/// Who authored a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Bot,
}

/// A single chat message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    pub sender: Sender,
    pub text: String,
    /// Display time, e.g. `3.07 P.M`
    #[serde(default)]
    pub timestamp: String,
    /// Agent that produced a bot reply
    #[serde(default, rename = "agentUsed", skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            sender: Sender::User,
            text: text.into(),
            timestamp: format_time(&Local::now()),
            agent: None,
        }
    }

    pub fn bot(text: impl Into<String>, agent: Option<String>) -> Self {
        Self {
            id: new_message_id(),
            sender: Sender::Bot,
            text: text.into(),
            timestamp: format_time(&Local::now()),
            agent,
        }
    }

    pub fn with_timestamp(mut self, timestamp: String) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// One prior turn as the chat endpoint expects it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

pub fn new_message_id() -> String {
    format!("msg-{}", Uuid::new_v4())
}

/// Format a time as `H.MM A.M` / `H.MM P.M` on a 12 hour clock.
pub fn format_time<Tz: TimeZone>(time: &DateTime<Tz>) -> String {
    let hours = time.hour();
    let suffix = if hours >= 12 { "P.M" } else { "A.M" };
    let display_hours = match hours % 12 {
        0 => 12,
        h => h,
    };
    format!("{}.{:02} {}", display_hours, time.minute(), suffix)
}

/// Errors from the conversation store
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to serialize chat history: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Lock error: {0}")]
    Lock(String),
}

impl HistoryError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// Persisted shape: `{ "chatHistory": [...] }`
#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct HistoryData {
    chat_history: Vec<ChatMessage>,
}

/// Ordered conversation for the current session, persisted to local storage.
///
/// Memory holds the whole session; storage holds the most recent
/// [`MAX_PERSISTED_MESSAGES`].
pub struct ConversationStore {
    messages: RwLock<Vec<ChatMessage>>,
    storage: LocalStorage,
}

impl ConversationStore {
    /// Load the persisted conversation.
    ///
    /// Malformed persisted state is removed and an empty conversation returned.
    pub fn load(storage: LocalStorage) -> Self {
        let messages = Self::load_from_storage(&storage);
        Self {
            messages: RwLock::new(messages),
            storage,
        }
    }

    fn load_from_storage(storage: &LocalStorage) -> Vec<ChatMessage> {
        let content = match storage.get_item(CHAT_STORAGE_KEY) {
            Ok(Some(content)) => content,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::warn!("History: Failed to read saved messages: {}", e);
                return Vec::new();
            }
        };

        let data: HistoryData = match serde_json::from_str(&content) {
            Ok(data) => data,
            Err(e) => {
                log::error!("History: Discarding malformed saved messages: {}", e);
                if let Err(e) = storage.remove_item(CHAT_STORAGE_KEY) {
                    log::warn!("History: Failed to remove saved messages: {}", e);
                }
                return Vec::new();
            }
        };

        let stored = data.chat_history.len();
        let skip = stored.saturating_sub(MAX_PERSISTED_MESSAGES);
        let now = format_time(&Local::now());
        let messages: Vec<ChatMessage> = data
            .chat_history
            .into_iter()
            .skip(skip)
            .map(|mut msg| {
                if msg.timestamp.trim().is_empty() {
                    msg.timestamp = now.clone();
                }
                if msg.id.trim().is_empty() {
                    msg.id = new_message_id();
                }
                msg
            })
            .collect();

        if stored > MAX_PERSISTED_MESSAGES {
            log::info!(
                "History: Trimming {} saved messages to {}",
                stored,
                MAX_PERSISTED_MESSAGES
            );
            if let Err(e) = Self::persist(storage, &messages) {
                log::warn!("History: Failed to rewrite saved messages: {}", e);
            }
        }

        log::info!("History: Loaded {} messages", messages.len());
        messages
    }

    fn persist(storage: &LocalStorage, messages: &[ChatMessage]) -> Result<(), HistoryError> {
        let start = messages.len().saturating_sub(MAX_PERSISTED_MESSAGES);
        let data = HistoryData {
            chat_history: messages[start..].to_vec(),
        };
        let content = serde_json::to_string(&data)?;
        storage.set_item(CHAT_STORAGE_KEY, &content)?;
        Ok(())
    }

    /// Append a message and persist the most recent ones.
    ///
    /// The message stays in memory even if persisting fails.
    pub fn append(&self, message: ChatMessage) -> Result<(), HistoryError> {
        let mut messages = self
            .messages
            .write()
            .map_err(|e| HistoryError::Lock(e.to_string()))?;
        messages.push(message);
        Self::persist(&self.storage, &messages)
    }

    /// Empty the conversation and remove persisted state.
    pub fn clear(&self) -> Result<(), HistoryError> {
        self.messages
            .write()
            .map_err(|e| HistoryError::Lock(e.to_string()))?
            .clear();
        self.storage.remove_item(CHAT_STORAGE_KEY)?;
        Ok(())
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn find(&self, id: &str) -> Option<ChatMessage> {
        self.messages
            .read()
            .ok()?
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.messages.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Prior turns in chat endpoint form (`bot` becomes `assistant`).
    pub fn chat_history(&self) -> Vec<ChatTurn> {
        self.messages()
            .into_iter()
            .map(|m| ChatTurn {
                role: match m.sender {
                    Sender::User => "user".to_string(),
                    Sender::Bot => "assistant".to_string(),
                },
                content: m.text,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn store_in(dir: &tempfile::TempDir) -> ConversationStore {
        ConversationStore::load(LocalStorage::new(dir.path().to_path_buf()))
    }

    fn saved(dir: &tempfile::TempDir) -> serde_json::Value {
        let content = std::fs::read_to_string(dir.path().join("mas_chat_messages.json")).unwrap();
        serde_json::from_str(&content).unwrap()
    }

    #[test]
    fn test_format_time() {
        let at = |h, m| {
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(h, m, 0)
                .unwrap()
                .and_utc()
        };
        assert_eq!(format_time(&at(0, 5)), "12.05 A.M");
        assert_eq!(format_time(&at(9, 30)), "9.30 A.M");
        assert_eq!(format_time(&at(12, 0)), "12.00 P.M");
        assert_eq!(format_time(&at(15, 7)), "3.07 P.M");
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = ChatMessage::user("hi");
        let b = ChatMessage::user("hi");
        assert!(a.id.starts_with("msg-"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_serialized_shape() {
        let msg = ChatMessage {
            id: "msg-1".to_string(),
            sender: Sender::Bot,
            text: "Hi there".to_string(),
            timestamp: "3.07 P.M".to_string(),
            agent: Some("general".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({
                "id": "msg-1",
                "sender": "bot",
                "text": "Hi there",
                "timestamp": "3.07 P.M",
                "agentUsed": "general"
            })
        );
    }

    #[test]
    fn test_append_persists_most_recent_25() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        for i in 0..30 {
            store.append(ChatMessage::user(format!("m{}", i))).unwrap();
        }

        assert_eq!(store.len(), 30);
        let saved = saved(&dir);
        let history = saved["chatHistory"].as_array().unwrap();
        assert_eq!(history.len(), 25);
        assert_eq!(history[0]["text"], "m5");
        assert_eq!(history[24]["text"], "m29");
    }

    #[test]
    fn test_reload_round_trips_conversation() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store_in(&dir);
            store.append(ChatMessage::user("Hello")).unwrap();
            store
                .append(ChatMessage::bot("Hi there", Some("general".to_string())))
                .unwrap();
        }

        let store = store_in(&dir);
        let messages = store.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[1].agent.as_deref(), Some("general"));
    }

    #[test]
    fn test_load_trims_and_rewrites_oversized_history() {
        let dir = tempfile::tempdir().unwrap();
        let history: Vec<_> = (0..30)
            .map(|i| serde_json::json!({"sender": "user", "text": format!("m{}", i)}))
            .collect();
        std::fs::write(
            dir.path().join("mas_chat_messages.json"),
            serde_json::json!({ "chatHistory": history }).to_string(),
        )
        .unwrap();

        let store = store_in(&dir);
        let messages = store.messages();
        assert_eq!(messages.len(), 25);
        assert_eq!(messages[0].text, "m5");
        // Missing ids and timestamps are filled in
        assert!(messages.iter().all(|m| m.id.starts_with("msg-")));
        assert!(messages.iter().all(|m| !m.timestamp.is_empty()));

        assert_eq!(saved(&dir)["chatHistory"].as_array().unwrap().len(), 25);
    }

    #[test]
    fn test_malformed_state_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mas_chat_messages.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = store_in(&dir);
        assert!(store.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_clear_removes_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.append(ChatMessage::user("Hello")).unwrap();
        store.clear().unwrap();

        assert!(store.is_empty());
        assert!(!dir.path().join("mas_chat_messages.json").exists());
        assert!(store_in(&dir).is_empty());
    }

    #[test]
    fn test_chat_history_roles() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.append(ChatMessage::user("Hello")).unwrap();
        store.append(ChatMessage::bot("Hi there", None)).unwrap();

        assert_eq!(
            store.chat_history(),
            vec![
                ChatTurn {
                    role: "user".to_string(),
                    content: "Hello".to_string()
                },
                ChatTurn {
                    role: "assistant".to_string(),
                    content: "Hi there".to_string()
                },
            ]
        );
    }
}
