use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::TimeDelta;

use crate::pipeline::{Retention, Schedule};
use crate::policy::admission::DEFAULT_WINDOW_HOURS;
use crate::policy::AdmissionPolicy;
use crate::telegram::client::DEFAULT_BOT_API_URL;

/// Central configuration loaded from environment variables.
///
/// All secrets come from env vars (never hardcoded). The .env file
/// is loaded automatically at startup via dotenvy.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite path, `sqlite://` URL, or `postgres://` URL.
    pub database_url: String,
    pub twitter_cookie: String,
    pub xcsrf_token: String,
    pub telegram_bot_token: String,
    /// Bot API endpoint; point at a self-hosted server to lift upload limits.
    pub bot_api_url: String,
    pub channel_chat_id: i64,
    pub group_chat_id: i64,
    pub owner_id: i64,
    /// Channel watched for near-duplicate photos, and where notices go.
    pub similar_channel_id: Option<i64>,
    pub similar_group_id: Option<i64>,
    pub tweet_factor: u64,
    pub retweet_factor: u64,
    pub admission_window_hours: u64,
    pub retention_days: i64,
    pub fingerprint_retention_days: i64,
    pub relay_pacing: Duration,
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} is not a valid number: {raw}")),
        None => Ok(None),
    }
}

/// Upper bound for the retention settings: one century.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Reject values outside `1..=max`. Zero or a negative retention would
/// sweep every record before each pass.
fn in_range<T>(name: &str, value: T, max: T) -> Result<T>
where
    T: PartialOrd + From<u8> + std::fmt::Display + Copy,
{
    if value < T::from(1) || value > max {
        bail!("{name} must be between 1 and {max}, got {value}");
    }
    Ok(value)
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source. Only DATABASE_URL is checked here;
    /// the relay settings are checked by `require_relay`, so `init` and
    /// `status` work with a bare database URL.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").unwrap_or_default();
        if database_url.is_empty() {
            bail!(
                "DATABASE_URL not set. Add it to your .env file.\n\
                 Use a SQLite path (./relay.db) or a postgres:// URL."
            );
        }

        let text = |name: &str| lookup(name).unwrap_or_default();

        Ok(Self {
            database_url,
            twitter_cookie: text("TWITTER_COOKIE"),
            xcsrf_token: text("XCSRF_TOKEN"),
            telegram_bot_token: text("TELEGRAM_BOT_TOKEN"),
            bot_api_url: lookup("BOT_API_URL")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_BOT_API_URL.to_string()),
            channel_chat_id: parse_var(&lookup, "CHANNEL_CHAT_ID")?.unwrap_or_default(),
            group_chat_id: parse_var(&lookup, "GROUP_CHAT_ID")?.unwrap_or_default(),
            owner_id: parse_var(&lookup, "OWNER_ID")?.unwrap_or_default(),
            similar_channel_id: parse_var(&lookup, "SIMILAR_CHANNEL_ID")?,
            similar_group_id: parse_var(&lookup, "SIMILAR_GROUP_ID")?,
            tweet_factor: parse_var(&lookup, "POPULAR_TWEET_FACTOR")?.unwrap_or_default(),
            retweet_factor: parse_var(&lookup, "POPULAR_RETWEET_FACTOR")?.unwrap_or_default(),
            admission_window_hours: in_range(
                "ADMISSION_WINDOW_HOURS",
                parse_var(&lookup, "ADMISSION_WINDOW_HOURS")?.unwrap_or(DEFAULT_WINDOW_HOURS),
                u64::MAX,
            )?,
            retention_days: in_range(
                "RETENTION_DAYS",
                parse_var(&lookup, "RETENTION_DAYS")?.unwrap_or(90),
                MAX_RETENTION_DAYS,
            )?,
            fingerprint_retention_days: in_range(
                "FINGERPRINT_RETENTION_DAYS",
                parse_var(&lookup, "FINGERPRINT_RETENTION_DAYS")?.unwrap_or(365),
                MAX_RETENTION_DAYS,
            )?,
            relay_pacing: Duration::from_secs(
                parse_var(&lookup, "RELAY_PACING_SECS")?.unwrap_or(10),
            ),
        })
    }

    /// Check everything `run` and `pass` need.
    pub fn require_relay(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("TWITTER_COOKIE", self.twitter_cookie.is_empty()),
            ("XCSRF_TOKEN", self.xcsrf_token.is_empty()),
            ("TELEGRAM_BOT_TOKEN", self.telegram_bot_token.is_empty()),
            ("CHANNEL_CHAT_ID", self.channel_chat_id == 0),
            ("GROUP_CHAT_ID", self.group_chat_id == 0),
            ("OWNER_ID", self.owner_id == 0),
            ("POPULAR_TWEET_FACTOR", self.tweet_factor == 0),
            ("POPULAR_RETWEET_FACTOR", self.retweet_factor == 0),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        if !missing.is_empty() {
            bail!(
                "Missing or zero settings: {}. Add them to your .env file.\n\
                 See .env.example for the required variables.",
                missing.join(", ")
            );
        }
        if self.similar_channel_id.is_some() != self.similar_group_id.is_some() {
            bail!("SIMILAR_CHANNEL_ID and SIMILAR_GROUP_ID must be set together");
        }
        Ok(())
    }

    pub fn admission_policy(&self) -> AdmissionPolicy {
        AdmissionPolicy::new(self.tweet_factor, self.retweet_factor)
            .with_window_hours(self.admission_window_hours)
    }

    pub fn retention(&self) -> Result<Retention> {
        let days = |name: &str, n: i64| {
            TimeDelta::try_days(n).with_context(|| format!("{name} out of range: {n}"))
        };
        Ok(Retention {
            relays: days("RETENTION_DAYS", self.retention_days)?,
            fingerprints: days("FINGERPRINT_RETENTION_DAYS", self.fingerprint_retention_days)?,
        })
    }

    pub fn schedule(&self) -> Schedule {
        Schedule::default()
    }

    /// Both similar-image chats, when the detector is enabled.
    pub fn similar_chats(&self) -> Option<(i64, i64)> {
        self.similar_channel_id.zip(self.similar_group_id)
    }
}
