//! What, if anything, a driver is told after each action.
//!
//! Claiming and reporting stay silent whatever the outcome. Only explicit
//! stop and auto-tracking requests get a short notice.

use std::time::Duration;

use tracking::{AutoPromptOutcome, ClaimOutcome, IngestOutcome, StopOutcome};

use super::types::{KeyboardButton, ReplyMarkup};

pub const START_AUTO_TRACKING: &str = "🔄 Start Auto Tracking";
pub const STOP_AUTO_TRACKING: &str = "🛑 Stop Auto Tracking";
pub const SHARE_ONCE: &str = "📍 Share Location Once";

pub const TRACKING_STOPPED: &str = "🛑 Tracking stopped. Thank you for using Driver Tracking!";
pub const NOT_TRACKED: &str = "❌ You're not currently being tracked.";
pub const STOP_FAILED: &str = "❌ Failed to stop tracking.";
pub const NOT_REGISTERED: &str = "❌ You're not registered as a driver.";
pub const AUTO_ALREADY_RUNNING: &str = "⚠️ Auto tracking is already running!";
pub const AUTO_STOPPED: &str = "🛑 Auto tracking stopped!";
pub const AUTO_NOT_RUNNING: &str = "⚠️ Auto tracking is not running!";

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub markup: Option<ReplyMarkup>,
}

impl Reply {
    fn plain(text: &str) -> Self {
        Self {
            text: text.to_string(),
            markup: None,
        }
    }

    fn with_markup(text: impl Into<String>, markup: ReplyMarkup) -> Self {
        Self {
            text: text.into(),
            markup: Some(markup),
        }
    }
}

pub fn for_claim(_outcome: &ClaimOutcome) -> Option<Reply> {
    None
}

pub fn for_ingest(_outcome: &IngestOutcome) -> Option<Reply> {
    None
}

pub fn for_stop(outcome: &StopOutcome) -> Option<Reply> {
    match outcome {
        StopOutcome::Stopped(_) => Some(Reply::with_markup(TRACKING_STOPPED, ReplyMarkup::remove())),
        StopOutcome::Rejected(_) => Some(Reply::plain(NOT_TRACKED)),
    }
}

/// Notice for a stop request that failed on storage.
pub fn stop_failed() -> Reply {
    Reply::plain(STOP_FAILED)
}

pub fn for_auto_start(outcome: &AutoPromptOutcome, interval: Duration) -> Option<Reply> {
    match outcome {
        AutoPromptOutcome::Started => Some(Reply::with_markup(
            format!(
                "🔄 Auto tracking started!\n\n\
                 📍 I'll request your location every {} seconds\n\
                 ⚠️ Keep Telegram notifications ON\n\
                 ⚠️ Don't completely close Telegram\n\n\
                 You can minimize the app, but keep it running in background.",
                interval.as_secs()
            ),
            ReplyMarkup::keyboard(vec![vec![KeyboardButton::text(STOP_AUTO_TRACKING)]]),
        )),
        AutoPromptOutcome::AlreadyRunning => Some(Reply::plain(AUTO_ALREADY_RUNNING)),
        AutoPromptOutcome::Rejected(_) => Some(Reply::plain(NOT_REGISTERED)),
        AutoPromptOutcome::Stopped | AutoPromptOutcome::NotRunning => None,
    }
}

pub fn for_auto_stop(outcome: &AutoPromptOutcome) -> Option<Reply> {
    match outcome {
        AutoPromptOutcome::Stopped => Some(Reply::with_markup(
            AUTO_STOPPED,
            ReplyMarkup::keyboard(vec![
                vec![KeyboardButton::location(SHARE_ONCE)],
                vec![KeyboardButton::text(START_AUTO_TRACKING)],
            ]),
        )),
        AutoPromptOutcome::NotRunning => Some(Reply::plain(AUTO_NOT_RUNNING)),
        AutoPromptOutcome::Rejected(_) => Some(Reply::plain(NOT_REGISTERED)),
        AutoPromptOutcome::Started | AutoPromptOutcome::AlreadyRunning => None,
    }
}
