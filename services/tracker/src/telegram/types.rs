//! Subset of the Telegram Bot API wire types the tracker consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope wrapping every Bot API response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub edited_message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    /// Unix seconds.
    pub date: i64,
    /// Unix seconds, set on edits such as live-location refreshes.
    pub edit_date: Option<i64>,
    pub text: Option<String>,
    pub location: Option<Location>,
}

impl Message {
    /// When the sender produced this version of the message.
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.edit_date.unwrap_or(self.date), 0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

impl User {
    /// Username if set, first name otherwise.
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.first_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub request_location: bool,
}

impl KeyboardButton {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            request_location: false,
        }
    }

    pub fn location(text: &str) -> Self {
        Self {
            text: text.to_string(),
            request_location: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineKeyboardButton {
    pub fn callback(text: &str, data: impl Into<String>) -> Self {
        Self {
            text: text.to_string(),
            callback_data: data.into(),
        }
    }
}

/// Custom keyboard attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReplyMarkup {
    Keyboard {
        keyboard: Vec<Vec<KeyboardButton>>,
        resize_keyboard: bool,
        one_time_keyboard: bool,
    },
    Inline {
        inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
    },
    Remove {
        remove_keyboard: bool,
    },
}

impl ReplyMarkup {
    pub fn keyboard(rows: Vec<Vec<KeyboardButton>>) -> Self {
        ReplyMarkup::Keyboard {
            keyboard: rows,
            resize_keyboard: true,
            one_time_keyboard: false,
        }
    }

    pub fn one_time(rows: Vec<Vec<KeyboardButton>>) -> Self {
        ReplyMarkup::Keyboard {
            keyboard: rows,
            resize_keyboard: true,
            one_time_keyboard: true,
        }
    }

    pub fn inline(rows: Vec<Vec<InlineKeyboardButton>>) -> Self {
        ReplyMarkup::Inline {
            inline_keyboard: rows,
        }
    }

    pub fn remove() -> Self {
        ReplyMarkup::Remove {
            remove_keyboard: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SendMessage<'a> {
    pub chat_id: &'a str,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<&'a ReplyMarkup>,
}
