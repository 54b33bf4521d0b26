//! Telegram reporting-channel adapter

pub mod bot;
pub mod client;
pub mod replies;
pub mod types;

pub use bot::BotDispatcher;
pub use client::TelegramClient;
