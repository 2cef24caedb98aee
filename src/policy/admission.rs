// Decaying popularity threshold.
//
// An item is admitted if, for some whole hour h within the window, it is at
// most h hours old and has at least h × factor likes. The required
// engagement grows linearly with age, so fresh items need little traction
// and week-old items need a lot. Items older than the window are never
// admitted.

use chrono::{DateTime, Utc};

/// Which threshold applies to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The relaying account already follows the author, or was mentioned.
    Tweet,
    /// Surfaced by a repost or the ranking algorithm.
    Retweet,
}

/// Default look-back window: one week.
pub const DEFAULT_WINDOW_HOURS: u64 = 24 * 7;

#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    pub tweet_factor: u64,
    pub retweet_factor: u64,
    pub window_hours: u64,
}

impl AdmissionPolicy {
    pub fn new(tweet_factor: u64, retweet_factor: u64) -> Self {
        Self {
            tweet_factor,
            retweet_factor,
            window_hours: DEFAULT_WINDOW_HOURS,
        }
    }

    pub fn with_window_hours(mut self, window_hours: u64) -> Self {
        self.window_hours = window_hours;
        self
    }

    fn factor(&self, role: Role) -> u64 {
        match role {
            Role::Tweet => self.tweet_factor,
            Role::Retweet => self.retweet_factor,
        }
    }

    /// Evaluate against the current wall clock.
    pub fn should_admit(&self, created_at: DateTime<Utc>, engagement: u64, role: Role) -> bool {
        self.should_admit_at(Utc::now(), created_at, engagement, role)
    }

    /// Evaluate at a fixed instant.
    ///
    /// The threshold h × factor is increasing in h, so the smallest eligible
    /// h decides: h = max(1, floor(age in hours)). Timestamps in the future
    /// count as age zero.
    pub fn should_admit_at(
        &self,
        now: DateTime<Utc>,
        created_at: DateTime<Utc>,
        engagement: u64,
        role: Role,
    ) -> bool {
        let age_hours = (now - created_at).num_seconds().div_euclid(3600);
        let h = age_hours.max(1) as u64;
        if h > self.window_hours {
            return false;
        }
        engagement >= h.saturating_mul(self.factor(role))
    }
}
