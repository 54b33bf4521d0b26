//! Inbound side of the Telegram adapter.
//!
//! Long-polls the Bot API, turns each update into an [`Inbound`] action and
//! runs it against the tracking core. Updates are handled one at a time so
//! reports from the same driver are ingested in arrival order.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracking::{DriverId, IngestionPipeline, Principal, TrackingSessionManager};

use super::client::{LOCATION_CALLBACK_PREFIX, PROMPT_TEXT, TelegramClient, share_keyboard};
use super::replies::{self, Reply, START_AUTO_TRACKING, STOP_AUTO_TRACKING};
use super::types::{Message, Update};

/// Pause after a failed poll before trying again.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Whether a `/start` payload can be a driver id.
pub fn is_valid_start_payload(payload: &str) -> bool {
    static PAYLOAD_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = PAYLOAD_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("Failed to compile start payload regex")
    });
    regex.is_match(payload)
}

/// Action derived from one update.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Claim {
        principal: Principal,
        display_name: String,
        driver_id: DriverId,
    },
    Stop {
        principal: Principal,
    },
    Report {
        principal: Principal,
        latitude: f64,
        longitude: f64,
        observed_at: Option<DateTime<Utc>>,
    },
    StartAutoTracking {
        principal: Principal,
    },
    StopAutoTracking {
        principal: Principal,
    },
    LocationCallback {
        principal: Principal,
        callback_id: String,
        chat_id: Option<i64>,
        message_id: Option<i64>,
    },
    Ignored,
}

/// Map an update to the action it asks for.
pub fn classify(update: &Update) -> Inbound {
    if let Some(query) = &update.callback_query {
        return match query.data.as_deref() {
            Some(data) if data.starts_with(LOCATION_CALLBACK_PREFIX) => Inbound::LocationCallback {
                principal: Principal::from(query.from.id),
                callback_id: query.id.clone(),
                chat_id: query.message.as_ref().map(|m| m.chat.id),
                message_id: query.message.as_ref().map(|m| m.message_id),
            },
            _ => Inbound::Ignored,
        };
    }

    if let Some(message) = &update.edited_message {
        return classify_report(message).unwrap_or(Inbound::Ignored);
    }

    let Some(message) = &update.message else {
        return Inbound::Ignored;
    };
    if let Some(report) = classify_report(message) {
        return report;
    }

    let (Some(from), Some(text)) = (&message.from, message.text.as_deref()) else {
        return Inbound::Ignored;
    };
    let principal = Principal::from(from.id);
    let text = text.trim();

    let mut words = text.split_whitespace();
    match words.next().map(command_name) {
        Some("/start") => match words.next() {
            Some(payload) if is_valid_start_payload(payload) => Inbound::Claim {
                principal,
                display_name: from.display_name().to_string(),
                driver_id: DriverId::from(payload),
            },
            _ => Inbound::Ignored,
        },
        Some("/stop") => Inbound::Stop { principal },
        _ if text == START_AUTO_TRACKING => Inbound::StartAutoTracking { principal },
        _ if text == STOP_AUTO_TRACKING => Inbound::StopAutoTracking { principal },
        _ => Inbound::Ignored,
    }
}

fn classify_report(message: &Message) -> Option<Inbound> {
    let location = message.location?;
    let from = message.from.as_ref()?;
    Some(Inbound::Report {
        principal: Principal::from(from.id),
        latitude: location.latitude,
        longitude: location.longitude,
        observed_at: message.observed_at(),
    })
}

/// Strip a `@botname` suffix from a command.
fn command_name(word: &str) -> &str {
    word.split('@').next().unwrap_or(word)
}

/// Runs updates from the Bot API against the tracking core.
pub struct BotDispatcher {
    client: TelegramClient,
    sessions: TrackingSessionManager,
    ingestion: IngestionPipeline,
}

impl BotDispatcher {
    pub fn new(
        client: TelegramClient,
        sessions: TrackingSessionManager,
        ingestion: IngestionPipeline,
    ) -> Self {
        Self {
            client,
            sessions,
            ingestion,
        }
    }

    /// Poll until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Telegram poller started");
        let mut offset: i64 = 0;

        loop {
            let updates = tokio::select! {
                _ = cancel.cancelled() => break,
                updates = self.client.get_updates(offset) => updates,
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.handle(&update).await;
                    }
                }
                Err(e) => {
                    error!("Failed to poll Telegram updates: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                    }
                }
            }
        }

        info!("Telegram poller stopped");
    }

    async fn handle(&self, update: &Update) {
        let inbound = classify(update);
        debug!("Update {} classified as {:?}", update.update_id, inbound);

        match inbound {
            Inbound::Claim {
                principal,
                display_name,
                driver_id,
            } => match self
                .sessions
                .claim(&driver_id, &principal, Some(display_name.as_str()))
                .await
            {
                Ok(outcome) => self.reply(&principal, replies::for_claim(&outcome)).await,
                Err(e) => error!("Failed to claim driver {}: {}", driver_id, e),
            },
            Inbound::Stop { principal } => {
                let reply = match self.sessions.stop(&principal).await {
                    Ok(outcome) => replies::for_stop(&outcome),
                    Err(e) => {
                        error!("Failed to stop tracking for principal {}: {}", principal, e);
                        Some(replies::stop_failed())
                    }
                };
                self.reply(&principal, reply).await;
            }
            Inbound::Report {
                principal,
                latitude,
                longitude,
                observed_at,
            } => match self
                .ingestion
                .ingest(&principal, latitude, longitude, observed_at)
                .await
            {
                Ok(outcome) => self.reply(&principal, replies::for_ingest(&outcome)).await,
                Err(e) => error!("Failed to store location from principal {}: {}", principal, e),
            },
            Inbound::StartAutoTracking { principal } => {
                match self.sessions.start_auto_prompt(&principal).await {
                    Ok(outcome) => {
                        let interval = self.sessions.prompts().interval();
                        self.reply(&principal, replies::for_auto_start(&outcome, interval))
                            .await
                    }
                    Err(e) => error!("Failed to start auto tracking for {}: {}", principal, e),
                }
            }
            Inbound::StopAutoTracking { principal } => {
                match self.sessions.stop_auto_prompt(&principal).await {
                    Ok(outcome) => self.reply(&principal, replies::for_auto_stop(&outcome)).await,
                    Err(e) => error!("Failed to stop auto tracking for {}: {}", principal, e),
                }
            }
            Inbound::LocationCallback {
                principal,
                callback_id,
                chat_id,
                message_id,
            } => {
                if let Err(e) = self.client.answer_callback_query(&callback_id).await {
                    debug!("Failed to answer callback {}: {}", callback_id, e);
                }
                if let (Some(chat_id), Some(message_id)) = (chat_id, message_id) {
                    if let Err(e) = self
                        .client
                        .edit_message_text(chat_id, message_id, PROMPT_TEXT)
                        .await
                    {
                        debug!("Failed to edit prompt message {}: {}", message_id, e);
                    }
                }
                let target = chat_id.map_or_else(|| principal.to_string(), |id| id.to_string());
                if let Err(e) = self
                    .client
                    .send_message(&target, PROMPT_TEXT, Some(&share_keyboard()))
                    .await
                {
                    warn!("Failed to offer share keyboard to principal {}: {}", principal, e);
                }
            }
            Inbound::Ignored => {}
        }
    }

    async fn reply(&self, principal: &Principal, reply: Option<Reply>) {
        let Some(reply) = reply else { return };
        if let Err(e) = self
            .client
            .send_message(principal.as_str(), &reply.text, reply.markup.as_ref())
            .await
        {
            warn!("Failed to send reply to principal {}: {}", principal, e);
        }
    }
}
