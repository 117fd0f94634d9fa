//! Telegram channel: long-polls the Bot API for updates.
//!
//! Handles text messages and inline-button callbacks, and renders reply
//! keyboards, inline keyboards and in-place edits on the way out.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::channels::{
    Channel, IncomingMessage, Keyboard, Markup, MessageStream, OutgoingResponse, StatusUpdate,
};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API, in UTF-16 code
/// units.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed poll before trying again.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Telegram channel: connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.bot_token, method)
    }

    fn send_failed(reason: impl Into<String>) -> ChannelError {
        ChannelError::SendFailed {
            name: "telegram".into(),
            reason: reason.into(),
        }
    }

    /// Send a message, splitting long text. The keyboard rides on the last
    /// chunk.
    async fn send_message(
        &self,
        chat_id: &str,
        response: &OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let chunks = split_message(&response.content, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i == last {
                response.keyboard.as_ref().map(reply_markup)
            } else {
                None
            };
            let mut body = json!({ "chat_id": chat_id, "text": chunk });
            if let Some(markup) = markup {
                body["reply_markup"] = markup;
            }
            self.post_with_fallback("sendMessage", body, response.markup)
                .await?;
        }
        Ok(())
    }

    /// Replace the text (and inline keyboard) of an earlier message.
    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: i64,
        response: &OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": truncate_utf16(&response.content, TELEGRAM_MAX_MESSAGE_LENGTH),
        });
        if let Some(keyboard) = response
            .keyboard
            .as_ref()
            .filter(|k| matches!(k, Keyboard::Inline { .. }))
        {
            body["reply_markup"] = reply_markup(keyboard);
        }
        self.post_with_fallback("editMessageText", body, response.markup)
            .await
    }

    /// POST `body`, first with Markdown when requested, then as plain text
    /// if Telegram rejects the formatting.
    async fn post_with_fallback(
        &self,
        method: &str,
        body: Value,
        markup: Markup,
    ) -> Result<(), ChannelError> {
        if markup == Markup::Markdown {
            let mut markdown_body = body.clone();
            markdown_body["parse_mode"] = json!("Markdown");

            let markdown_resp = self
                .client
                .post(self.api_url(method))
                .json(&markdown_body)
                .send()
                .await
                .map_err(|e| Self::send_failed(e.to_string()))?;

            if markdown_resp.status().is_success() {
                return Ok(());
            }

            let markdown_status = markdown_resp.status();
            let markdown_err = markdown_resp.text().await.unwrap_or_default();
            tracing::warn!(
                status = ?markdown_status,
                method,
                "Telegram {method} with Markdown failed; retrying without parse_mode: {markdown_err}"
            );
        }

        let plain_resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::send_failed(e.to_string()))?;

        if !plain_resp.status().is_success() {
            let status = plain_resp.status();
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(Self::send_failed(format!(
                "{method} failed ({status}): {plain_err}"
            )));
        }
        Ok(())
    }
}

fn api_url(token: &SecretString, method: &str) -> String {
    format!("https://api.telegram.org/bot{}/{method}", token.expose_secret())
}

/// Telegram `reply_markup` for a keyboard.
fn reply_markup(keyboard: &Keyboard) -> Value {
    match keyboard {
        Keyboard::Reply { rows, one_time } => json!({
            "keyboard": rows
                .iter()
                .map(|row| row.iter().map(|label| json!({ "text": label })).collect::<Vec<_>>())
                .collect::<Vec<_>>(),
            "resize_keyboard": true,
            "one_time_keyboard": one_time,
            "is_persistent": !one_time,
        }),
        Keyboard::Remove => json!({ "remove_keyboard": true }),
        Keyboard::Inline { rows } => json!({
            "inline_keyboard": rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| json!({ "text": b.label, "callback_data": b.payload }))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>(),
        }),
    }
}

/// Convert one `getUpdates` entry into an inbound event.
///
/// Returns `None` for update kinds the bot does not handle.
fn parse_update(update: &Value) -> Option<IncomingMessage> {
    if let Some(message) = update.get("message") {
        let text = message.get("text").and_then(Value::as_str)?;
        let from = message.get("from")?;
        let chat_id = message
            .get("chat")
            .and_then(|c| c.get("id"))
            .and_then(Value::as_i64)?;
        return Some(build_incoming(from, chat_id, text));
    }

    if let Some(callback) = update.get("callback_query") {
        let callback_id = callback.get("id").and_then(Value::as_str)?;
        let payload = callback.get("data").and_then(Value::as_str)?;
        let from = callback.get("from")?;
        let message = callback.get("message");
        let message_id = message
            .and_then(|m| m.get("message_id"))
            .and_then(Value::as_i64);
        let chat_id = message
            .and_then(|m| m.get("chat"))
            .and_then(|c| c.get("id"))
            .and_then(Value::as_i64)
            .or_else(|| from.get("id").and_then(Value::as_i64))?;
        return Some(build_incoming(from, chat_id, payload).with_callback(callback_id, message_id));
    }

    None
}

fn build_incoming(from: &Value, chat_id: i64, content: &str) -> IncomingMessage {
    let user_id = from
        .get("id")
        .and_then(Value::as_i64)
        .map_or_else(|| chat_id.to_string(), |id| id.to_string());
    let username = from.get("username").and_then(Value::as_str);
    let first_name = from.get("first_name").and_then(Value::as_str);
    let last_name = from.get("last_name").and_then(Value::as_str);

    let incoming = IncomingMessage::new("telegram", user_id, content).with_metadata(json!({
        "chat_id": chat_id.to_string(),
        "username": username,
        "first_name": first_name,
        "last_name": last_name,
    }));
    match first_name.or(username) {
        Some(name) => incoming.with_user_name(name),
        None => incoming,
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let bot_token = self.bot_token.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client
                    .post(api_url(&bot_token, "getUpdates"))
                    .json(&body)
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    tracing::warn!(response = %data, "Telegram getUpdates returned no result");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(incoming) = parse_update(update) else {
                        continue;
                    };

                    // Stop the button spinner right away; the reply follows.
                    if let crate::channels::MessageKind::Callback { callback_id, .. } =
                        &incoming.kind
                    {
                        let _ = client
                            .post(api_url(&bot_token, "answerCallbackQuery"))
                            .json(&json!({ "callback_query_id": callback_id }))
                            .send()
                            .await;
                    }

                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn send(&self, address: &str, response: OutgoingResponse) -> Result<(), ChannelError> {
        match response.edit_message_id {
            Some(message_id) => self.edit_message(address, message_id, &response).await,
            None => self.send_message(address, &response).await,
        }
    }

    async fn send_status(&self, address: &str, status: StatusUpdate) -> Result<(), ChannelError> {
        match status {
            StatusUpdate::Typing => {
                let _ = self
                    .client
                    .post(self.api_url("sendChatAction"))
                    .json(&json!({ "chat_id": address, "action": "typing" }))
                    .send()
                    .await;
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Byte index of the longest prefix of `text` that fits in `max_units`
/// UTF-16 code units. Telegram measures message length in those units, so
/// an astral-plane emoji costs two.
fn utf16_boundary(text: &str, max_units: usize) -> usize {
    let mut units = 0;
    for (i, c) in text.char_indices() {
        units += c.len_utf16();
        if units > max_units {
            return i;
        }
    }
    text.len()
}

fn truncate_utf16(text: &str, max_units: usize) -> &str {
    &text[..utf16_boundary(text, max_units)]
}

/// Split a message into chunks that fit Telegram's length limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_units: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    loop {
        let limit = utf16_boundary(remaining, max_units);
        if limit == remaining.len() {
            chunks.push(remaining.to_string());
            break;
        }

        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
        if remaining.is_empty() {
            break;
        }
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{InlineButton, MessageKind};

    fn channel() -> TelegramChannel {
        TelegramChannel::new(SecretString::from("fake-token".to_string()))
    }

    #[test]
    fn telegram_channel_name() {
        assert_eq!(channel().name(), "telegram");
    }

    #[test]
    fn telegram_api_url() {
        assert_eq!(
            channel().api_url("getUpdates"),
            "https://api.telegram.org/botfake-token/getUpdates"
        );
    }

    #[test]
    fn parse_text_update() {
        let update = json!({
            "update_id": 10,
            "message": {
                "message_id": 5,
                "from": {"id": 111, "username": "yogi", "first_name": "Iryna"},
                "chat": {"id": 111},
                "text": "/start"
            }
        });
        let msg = parse_update(&update).unwrap();
        assert_eq!(msg.user_id, "111");
        assert_eq!(msg.content, "/start");
        assert_eq!(msg.kind, MessageKind::Text);
        assert_eq!(msg.reply_address(), "111");
        assert_eq!(msg.user_name.as_deref(), Some("Iryna"));
        assert_eq!(msg.username().as_deref(), Some("yogi"));
    }

    #[test]
    fn parse_callback_update() {
        let update = json!({
            "update_id": 11,
            "callback_query": {
                "id": "cbq-1",
                "from": {"id": 222, "first_name": "Taras"},
                "message": {"message_id": 77, "chat": {"id": 222}},
                "data": "prog_2"
            }
        });
        let msg = parse_update(&update).unwrap();
        assert_eq!(msg.content, "prog_2");
        assert_eq!(
            msg.kind,
            MessageKind::Callback {
                callback_id: "cbq-1".into(),
                message_id: Some(77)
            }
        );
    }

    #[test]
    fn non_text_updates_ignored() {
        let sticker = json!({
            "update_id": 12,
            "message": {"from": {"id": 1}, "chat": {"id": 1}, "sticker": {}}
        });
        assert!(parse_update(&sticker).is_none());
        assert!(parse_update(&json!({"update_id": 13, "edited_message": {}})).is_none());
    }

    #[test]
    fn reply_keyboard_markup() {
        let markup = reply_markup(&Keyboard::Reply {
            rows: vec![vec!["A".into(), "B".into()]],
            one_time: true,
        });
        assert_eq!(markup["keyboard"][0][1]["text"], "B");
        assert_eq!(markup["one_time_keyboard"], true);
        assert_eq!(markup["is_persistent"], false);
    }

    #[test]
    fn inline_keyboard_markup() {
        let markup = reply_markup(&Keyboard::Inline {
            rows: vec![vec![InlineButton::new("Next »", "prog_2")]],
        });
        assert_eq!(markup["inline_keyboard"][0][0]["callback_data"], "prog_2");
        assert_eq!(reply_markup(&Keyboard::Remove)["remove_keyboard"], true);
    }

    // ── Message splitting tests ─────────────────────────────────────

    #[test]
    fn split_message_short() {
        assert_eq!(split_message("Hello", 4096), vec!["Hello"]);
    }

    #[test]
    fn split_message_exact_limit() {
        let msg = "a".repeat(4096);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks, vec!["a".repeat(2000), "b".repeat(3000)]);
    }

    #[test]
    fn split_message_no_good_split_point() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_counts_emoji_as_two_units() {
        let msg = "🧘".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 2048);
        assert_eq!(chunks[1].chars().count(), 2048);
        assert_eq!(chunks[2].chars().count(), 904);
        for chunk in &chunks {
            assert!(chunk.encode_utf16().count() <= 4096);
        }
    }

    #[test]
    fn split_message_mixed_text_stays_under_limit() {
        let msg = "stretch 🙏 ".repeat(600);
        let chunks = split_message(&msg, 4096);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.encode_utf16().count() <= 4096);
        }
    }

    #[test]
    fn truncate_counts_utf16_units() {
        assert_eq!(truncate_utf16("привіт", 3), "при");
        assert_eq!(truncate_utf16("hi", 10), "hi");
        assert_eq!(truncate_utf16("a🧘b", 2), "a");
        assert_eq!(truncate_utf16("a🧘b", 3), "a🧘");
    }
}
