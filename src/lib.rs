// timeline-relay: relay popular timeline media to a Telegram channel
//
// This is the library root. Each module corresponds to a major subsystem
// of the relay: admission and filtering, persistence, the outbound queue,
// near-duplicate detection, and the operator bot.

pub mod bot;
pub mod config;
pub mod correlation;
pub mod db;
pub mod error;
pub mod feed;
pub mod pipeline;
pub mod policy;
pub mod relay;
pub mod similar;
pub mod status;
pub mod telegram;
