//! Channel trait and the message types that cross it.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use uuid::Uuid;

use crate::error::ChannelError;

/// Stream of inbound events produced by a started channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// What kind of user action produced an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Typed text or a reply-keyboard button press.
    Text,
    /// Inline button press. `content` carries the opaque payload.
    Callback {
        callback_id: String,
        /// Message the pressed button belongs to.
        message_id: Option<i64>,
    },
}

/// An inbound event from a user.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: Uuid,
    pub channel: String,
    pub user_id: String,
    pub user_name: Option<String>,
    /// Message text, or the callback payload for `MessageKind::Callback`.
    pub content: String,
    pub kind: MessageKind,
    pub metadata: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn new(
        channel: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            user_id: user_id.into(),
            user_name: None,
            content: content.into(),
            kind: MessageKind::Text,
            metadata: serde_json::Value::Null,
            received_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn with_callback(mut self, callback_id: impl Into<String>, message_id: Option<i64>) -> Self {
        self.kind = MessageKind::Callback {
            callback_id: callback_id.into(),
            message_id,
        };
        self
    }

    /// Where replies go: the chat id when the transport supplied one,
    /// otherwise the user id.
    pub fn reply_address(&self) -> &str {
        self.metadata
            .get("chat_id")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.user_id)
    }

    fn meta_str(&self, key: &str) -> Option<String> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    pub fn username(&self) -> Option<String> {
        self.meta_str("username")
    }

    pub fn first_name(&self) -> Option<String> {
        self.meta_str("first_name").or_else(|| self.user_name.clone())
    }

    pub fn last_name(&self) -> Option<String> {
        self.meta_str("last_name")
    }
}

/// Text formatting of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Markup {
    #[default]
    Plain,
    /// `*bold*` and `_italic_` only.
    Markdown,
}

/// An inline button: label plus opaque callback payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub payload: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            payload: payload.into(),
        }
    }
}

/// Choice presentation attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
    /// Grid of choice labels shown in place of the text input.
    Reply {
        rows: Vec<Vec<String>>,
        one_time: bool,
    },
    /// Hide any reply keyboard.
    Remove,
    /// Buttons attached to the message itself.
    Inline { rows: Vec<Vec<InlineButton>> },
}

impl Keyboard {
    /// Labels of a reply keyboard, flattened.
    pub fn labels(&self) -> Vec<&str> {
        match self {
            Keyboard::Reply { rows, .. } => rows.iter().flatten().map(String::as_str).collect(),
            Keyboard::Inline { rows } => rows.iter().flatten().map(|b| b.label.as_str()).collect(),
            Keyboard::Remove => Vec::new(),
        }
    }
}

/// An outbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingResponse {
    pub content: String,
    pub markup: Markup,
    pub keyboard: Option<Keyboard>,
    /// Replace this earlier message instead of sending a new one.
    pub edit_message_id: Option<i64>,
}

impl OutgoingResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            markup: Markup::Plain,
            keyboard: None,
            edit_message_id: None,
        }
    }

    pub fn markdown(content: impl Into<String>) -> Self {
        Self {
            markup: Markup::Markdown,
            ..Self::text(content)
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn editing(mut self, message_id: Option<i64>) -> Self {
        self.edit_message_id = message_id;
        self
    }
}

/// Transient indicators that are not messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Typing,
}

/// A transport that delivers messages to and from users.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Begin receiving events.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Send a message to an address (chat id).
    async fn send(&self, address: &str, response: OutgoingResponse) -> Result<(), ChannelError>;

    /// Reply to an inbound event.
    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        self.send(msg.reply_address(), response).await
    }

    async fn send_status(&self, address: &str, status: StatusUpdate) -> Result<(), ChannelError>;

    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_address_prefers_chat_id() {
        let msg = IncomingMessage::new("telegram", "user123", "hello")
            .with_metadata(serde_json::json!({"chat_id": "99887766"}));
        assert_eq!(msg.reply_address(), "99887766");

        let bare = IncomingMessage::new("telegram", "user123", "hello");
        assert_eq!(bare.reply_address(), "user123");
    }

    #[test]
    fn callback_kind_carries_message_id() {
        let msg = IncomingMessage::new("telegram", "1", "prog_2").with_callback("cb-1", Some(42));
        assert_eq!(
            msg.kind,
            MessageKind::Callback {
                callback_id: "cb-1".into(),
                message_id: Some(42)
            }
        );
    }

    #[test]
    fn names_come_from_metadata() {
        let msg = IncomingMessage::new("telegram", "1", "hi")
            .with_metadata(serde_json::json!({"username": "yogi", "last_name": "K"}))
            .with_user_name("Iryna");
        assert_eq!(msg.username().as_deref(), Some("yogi"));
        assert_eq!(msg.first_name().as_deref(), Some("Iryna"));
        assert_eq!(msg.last_name().as_deref(), Some("K"));
    }

    #[test]
    fn keyboard_labels_flatten_rows() {
        let keyboard = Keyboard::Reply {
            rows: vec![vec!["a".into()], vec!["b".into(), "c".into()]],
            one_time: true,
        };
        assert_eq!(keyboard.labels(), vec!["a", "b", "c"]);
    }
}
