//! Telegram Bot API wire types and reply chunking.

use serde::{Deserialize, Serialize};

/// Telegram rejects messages longer than this.
pub const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub edited_message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// A text message addressed to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub chat_id: i64,
    pub user_id: i64,
    pub text: String,
}

impl Update {
    /// Extract the text message, if any. Messages from bots and updates
    /// without text (stickers, joins, ...) yield `None`. Without a sender the
    /// chat id stands in for the user.
    #[must_use]
    pub fn inbound(&self) -> Option<Inbound> {
        let message = self.message.as_ref().or(self.edited_message.as_ref())?;
        let text = message.text.as_deref()?;
        if message.from.as_ref().is_some_and(|u| u.is_bot) {
            return None;
        }
        Some(Inbound {
            chat_id: message.chat.id,
            user_id: message.from.as_ref().map_or(message.chat.id, |u| u.id),
            text: text.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct SendMessage<'a> {
    pub chat_id: i64,
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SetWebhook<'a> {
    pub url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_token: Option<&'a str>,
    pub allowed_updates: &'a [&'a str],
}

/// Split a long message into chunks of at most `max_len` bytes, preferring
/// newline, then space breaks.
#[must_use]
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }
        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        let head = &remaining[..limit];
        let split_at = match head.rfind('\n').or_else(|| head.rfind(' ')) {
            Some(idx) if idx > 0 => idx,
            _ if limit > 0 => limit,
            // max_len is smaller than the first character
            _ => remaining.chars().next().map_or(1, char::len_utf8),
        };
        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_from_message() {
        let raw = r#"{
            "update_id": 10,
            "message": {
                "message_id": 1,
                "from": {"id": 42, "is_bot": false, "first_name": "Ann"},
                "chat": {"id": 42, "type": "private"},
                "date": 1718445600,
                "text": "/start"
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        assert_eq!(
            update.inbound(),
            Some(Inbound {
                chat_id: 42,
                user_id: 42,
                text: "/start".to_string()
            })
        );
    }

    #[test]
    fn test_inbound_from_edited_message_in_group() {
        let raw = r#"{
            "update_id": 11,
            "edited_message": {
                "message_id": 2,
                "from": {"id": 7, "is_bot": false, "first_name": "Bo"},
                "chat": {"id": -100200, "type": "supergroup"},
                "text": "7,2"
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        let inbound = update.inbound().unwrap();
        assert_eq!(inbound.chat_id, -100_200);
        assert_eq!(inbound.user_id, 7);
    }

    #[test]
    fn test_inbound_ignores_non_text_and_bots() {
        let sticker = r#"{"update_id": 1, "message": {"message_id": 1, "chat": {"id": 5}, "sticker": {}}}"#;
        let update: Update = serde_json::from_str(sticker).unwrap();
        assert!(update.inbound().is_none());

        let bot = r#"{"update_id": 2, "message": {"message_id": 2, "from": {"id": 9, "is_bot": true}, "chat": {"id": 5}, "text": "hi"}}"#;
        let update: Update = serde_json::from_str(bot).unwrap();
        assert!(update.inbound().is_none());

        let other: Update = serde_json::from_str(r#"{"update_id": 3}"#).unwrap();
        assert!(other.inbound().is_none());
    }

    #[test]
    fn test_api_response_error() {
        let raw = r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#;
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        assert!(!resp.ok);
        assert!(resp.result.is_none());
        assert_eq!(resp.description.as_deref(), Some("Unauthorized"));
    }

    #[test]
    fn test_split_message_short() {
        assert_eq!(split_message("hello", 100), vec!["hello"]);
    }

    #[test]
    fn test_split_message_prefers_newline_break() {
        let msg = format!("{}\n{}", "a".repeat(60), "b".repeat(60));
        let chunks = split_message(&msg, 80);
        assert_eq!(chunks, vec!["a".repeat(60), "b".repeat(60)]);
    }

    #[test]
    fn test_split_message_over_boundary() {
        let msg = "word ".repeat(50);
        let chunks = split_message(msg.trim(), 100);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.len() <= 100));
    }

    #[test]
    fn test_split_message_respects_char_boundaries() {
        // Cyrillic letters are two bytes each
        let msg = "ж".repeat(100);
        let chunks = split_message(&msg, 51);
        assert!(chunks.iter().all(|c| c.len() <= 51));
        assert_eq!(chunks.concat(), msg);
    }
}
