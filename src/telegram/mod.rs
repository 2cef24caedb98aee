// Telegram Bot API: wire types and the HTTP transport.

pub mod client;
pub mod types;

pub use client::TelegramClient;
