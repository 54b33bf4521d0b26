//! Thin Bot API client over `reqwest`.
//!
//! Also serves as the outbound [`ReportingChannel`]: a location prompt is a
//! short message with an inline "send location" button whose callback is
//! answered by the dispatcher with a one-tap share keyboard.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use tracking::{ChannelError, DriverId, Principal, ReportingChannel};

use super::types::{
    ApiResponse, InlineKeyboardButton, KeyboardButton, ReplyMarkup, SendMessage, Update,
};

/// Seconds a `getUpdates` call may wait server-side for new updates.
pub const LONG_POLL_TIMEOUT: u64 = 30;

/// Request timeout, leaving headroom over the long-poll window.
const HTTP_TIMEOUT: Duration = Duration::from_secs(LONG_POLL_TIMEOUT + 10);

/// Text of the share keyboard and of an answered prompt.
pub const PROMPT_TEXT: &str = "📍";

/// Text of the periodic location prompt.
pub const PERIODIC_PROMPT_TEXT: &str = "📍 Please share your current location:";

/// Label of the inline button on the periodic prompt.
pub const SEND_LOCATION: &str = "📍 Send Location";

/// Prefix of callback data carried by inline "send location" buttons.
pub const LOCATION_CALLBACK_PREFIX: &str = "loc_";

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("Bot API error: {0}")]
    Api(String),
}

// The request URL carries the bot token.
impl From<reqwest::Error> for TelegramError {
    fn from(e: reqwest::Error) -> Self {
        TelegramError::Http(e.without_url())
    }
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self, TelegramError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, TelegramError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response: ApiResponse<T> = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .json(body)
            .send()
            .await?
            .json()
            .await?;

        match response {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(TelegramError::Api(
                description.unwrap_or_else(|| format!("{} failed", method)),
            )),
        }
    }

    /// Long-poll for updates with ids at or above `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": LONG_POLL_TIMEOUT,
                "allowed_updates": ["message", "edited_message", "callback_query"],
            }),
        )
        .await
    }

    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        reply_markup: Option<&ReplyMarkup>,
    ) -> Result<(), TelegramError> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                &SendMessage {
                    chat_id,
                    text,
                    reply_markup,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, callback_query_id: &str) -> Result<(), TelegramError> {
        let _: serde_json::Value = self
            .call(
                "answerCallbackQuery",
                &json!({ "callback_query_id": callback_query_id }),
            )
            .await?;
        Ok(())
    }

    /// Replace the text of a sent message and drop its inline keyboard.
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TelegramError> {
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                &json!({
                    "chat_id": chat_id,
                    "message_id": message_id,
                    "text": text,
                }),
            )
            .await?;
        Ok(())
    }
}

/// One-tap share keyboard offered once a prompt button is pressed.
pub fn share_keyboard() -> ReplyMarkup {
    ReplyMarkup::one_time(vec![vec![KeyboardButton::location(PROMPT_TEXT)]])
}

/// Inline button attached to every periodic prompt.
pub fn prompt_markup(driver_id: &DriverId) -> ReplyMarkup {
    ReplyMarkup::inline(vec![vec![InlineKeyboardButton::callback(
        SEND_LOCATION,
        format!("{}{}", LOCATION_CALLBACK_PREFIX, driver_id),
    )]])
}

#[async_trait]
impl ReportingChannel for TelegramClient {
    async fn request_location(
        &self,
        principal: &Principal,
        driver_id: &DriverId,
    ) -> Result<(), ChannelError> {
        self.send_message(
            principal.as_str(),
            PERIODIC_PROMPT_TEXT,
            Some(&prompt_markup(driver_id)),
        )
        .await
            .map_err(|e| match e {
                TelegramError::Http(e) => ChannelError::Unreachable(e.to_string()),
                TelegramError::Api(description) => ChannelError::Rejected(description),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_embeds_token() {
        let client = TelegramClient::new("https://api.telegram.org/", "123:abc").unwrap();
        assert_eq!(client.base_url, "https://api.telegram.org/bot123:abc");
    }

    #[test]
    fn periodic_prompt_carries_location_callback() {
        let markup = serde_json::to_value(prompt_markup(&DriverId::from("driver_42"))).unwrap();

        assert_eq!(
            markup,
            json!({
                "inline_keyboard": [[
                    {"text": SEND_LOCATION, "callback_data": "loc_driver_42"}
                ]]
            })
        );
    }

    #[tokio::test]
    async fn transport_errors_do_not_leak_the_token() {
        let client = TelegramClient::new("http://127.0.0.1:1", "123456:SECRETTOKEN").unwrap();

        let polled = client.get_updates(0).await.unwrap_err();
        assert!(matches!(polled, TelegramError::Http(_)));
        assert!(!polled.to_string().contains("SECRETTOKEN"));
        assert!(!format!("{:?}", polled).contains("SECRETTOKEN"));

        let prompted = client
            .request_location(&Principal::from(4242_i64), &DriverId::from("d-1"))
            .await
            .unwrap_err();
        assert!(matches!(prompted, ChannelError::Unreachable(_)));
        assert!(!prompted.to_string().contains("SECRETTOKEN"));
    }

    #[test]
    fn failed_envelope_keeps_description() {
        let raw = r#"{"ok": false, "error_code": 403, "description": "Forbidden: bot was blocked by the user"}"#;
        let response: ApiResponse<serde_json::Value> = serde_json::from_str(raw).unwrap();

        assert!(!response.ok);
        assert_eq!(
            response.description.as_deref(),
            Some("Forbidden: bot was blocked by the user")
        );
    }
}
