// Ingestion pass: fetch, classify, admit, persist, filter, enqueue.
//
// Each pass drains the ranked timeline, waits a short gap, then drains the
// chronological one. Items are handled strictly in feed order and enqueued
// in that order. Per-item failures are reported to the operator and the
// loop moves on; a run of consecutive failures aborts the pass.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::correlation::CorrelationEntry;
use crate::db::models::RelayRecord;
use crate::db::Database;
use crate::error::{is_duplicate_key, RelayError};
use crate::feed::{ContentItem, FeedClient};
use crate::policy::{AdmissionPolicy, ContentFilter, Role};
use crate::relay::media::{build_payloads, MediaFetcher};
use crate::relay::{Notifier, OutboundJob, RelayQueue};

/// Items requested from each timeline per pass.
pub const FEED_LIMIT: usize = 100;

/// More consecutive errors than this abort the pass.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Pauses inside a pass.
#[derive(Debug, Clone, Copy)]
pub struct PassTiming {
    /// Between the ranked and the chronological timeline.
    pub feed_gap: Duration,
    /// After any item or fetch error.
    pub error_pause: Duration,
}

impl Default for PassTiming {
    fn default() -> Self {
        Self {
            feed_gap: Duration::from_secs(5),
            error_pause: Duration::from_secs(60),
        }
    }
}

/// Why an item was not relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoMedia,
    SelfRepost,
    AlreadySeen,
    BelowThreshold,
    Suppressed,
    NotCreator,
    Filtered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Relayed,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedKind {
    Ranked,
    Chronological,
}

impl FeedKind {
    fn name(self) -> &'static str {
        match self {
            FeedKind::Ranked => "ranked",
            FeedKind::Chronological => "chronological",
        }
    }
}

/// Consecutive-error counter for one pass.
#[derive(Debug, Default)]
struct ErrorBudget {
    consecutive: u32,
}

impl ErrorBudget {
    fn success(&mut self) {
        self.consecutive = 0;
    }

    /// Count an error; fails once the budget is spent.
    fn failure(&mut self) -> Result<()> {
        self.consecutive += 1;
        if self.consecutive > MAX_CONSECUTIVE_ERRORS {
            return Err(anyhow::Error::new(RelayError::ErrorBudgetExceeded(
                self.consecutive,
            )));
        }
        Ok(())
    }
}

/// How an item reaches the admission decision.
enum Route<'a> {
    /// A repost of someone else's item: the original is judged, with the
    /// reposter as the account whose mention lowers the bar.
    Repost {
        original: &'a ContentItem,
        reposter_id: &'a str,
    },
    /// Recommended, or by an author we don't follow.
    Unfamiliar(&'a ContentItem),
    /// An original by a followed author.
    Followed(&'a ContentItem),
}

fn classify(item: &ContentItem) -> Result<Route<'_>, SkipReason> {
    if !item.has_media() {
        return Err(SkipReason::NoMedia);
    }
    if let Some(original) = item.reposted.as_deref() {
        if original.author.id == item.author.id {
            return Err(SkipReason::SelfRepost);
        }
        if !original.has_media() {
            return Err(SkipReason::NoMedia);
        }
        return Ok(Route::Repost {
            original,
            reposter_id: &item.author.id,
        });
    }
    if item.recommended || !item.author.following {
        Ok(Route::Unfamiliar(item))
    } else {
        Ok(Route::Followed(item))
    }
}

pub struct Ingestor {
    feed: Arc<dyn FeedClient>,
    db: Arc<dyn Database>,
    policy: AdmissionPolicy,
    filter: ContentFilter,
    queue: RelayQueue,
    notifier: Notifier,
    fetcher: MediaFetcher,
    timing: PassTiming,
    feed_limit: usize,
}

impl Ingestor {
    pub fn new(
        feed: Arc<dyn FeedClient>,
        db: Arc<dyn Database>,
        policy: AdmissionPolicy,
        queue: RelayQueue,
        notifier: Notifier,
    ) -> Self {
        Self {
            feed,
            db,
            policy,
            filter: ContentFilter::new(),
            queue,
            notifier,
            fetcher: MediaFetcher::disabled(),
            timing: PassTiming::default(),
            feed_limit: FEED_LIMIT,
        }
    }

    pub fn with_fetcher(mut self, fetcher: MediaFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_timing(mut self, timing: PassTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_feed_limit(mut self, limit: usize) -> Self {
        self.feed_limit = limit;
        self
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// One pass over both timelines. Returns how many items were relayed.
    pub async fn run_pass(&self) -> Result<usize> {
        let mut budget = ErrorBudget::default();
        let mut relayed = self.drain(FeedKind::Ranked, &mut budget).await?;
        tokio::time::sleep(self.timing.feed_gap).await;
        relayed += self.drain(FeedKind::Chronological, &mut budget).await?;

        info!(relayed = relayed, "Ingestion pass complete");
        Ok(relayed)
    }

    async fn drain(&self, kind: FeedKind, budget: &mut ErrorBudget) -> Result<usize> {
        let mut items = match kind {
            FeedKind::Ranked => self.feed.ranked_timeline(self.feed_limit),
            FeedKind::Chronological => self.feed.chronological_timeline(self.feed_limit),
        };

        let mut relayed = 0;
        while let Some(next) = items.next().await {
            let item = match next {
                Ok(item) => item,
                Err(e) => {
                    let err = RelayError::FetchFailed(format!("{e:#}"));
                    warn!(feed = kind.name(), error = %err, "Timeline fetch failed");
                    self.notifier
                        .notify(&format!("{} timeline: {err}", kind.name()))
                        .await;
                    budget.failure()?;
                    tokio::time::sleep(self.timing.error_pause).await;
                    break;
                }
            };

            match self.process_item(&item).await {
                Ok(outcome) => {
                    budget.success();
                    if outcome == Outcome::Relayed {
                        relayed += 1;
                    }
                }
                Err(e) => {
                    let err = RelayError::ItemProcessing {
                        url: item.url.clone(),
                        reason: format!("{e:#}"),
                    };
                    warn!(feed = kind.name(), error = %err, "Item processing failed");
                    self.notifier.notify(&err.to_string()).await;
                    budget.failure()?;
                    tokio::time::sleep(self.timing.error_pause).await;
                }
            }
        }
        Ok(relayed)
    }

    /// Run one timeline item through classification and its admission path.
    pub async fn process_item(&self, item: &ContentItem) -> Result<Outcome> {
        let outcome = match classify(item) {
            Err(reason) => Outcome::Skipped(reason),
            Ok(Route::Repost {
                original,
                reposter_id,
            }) => self.judge_unfamiliar(original, Some(reposter_id)).await?,
            Ok(Route::Unfamiliar(item)) => self.judge_unfamiliar(item, None).await?,
            Ok(Route::Followed(item)) => self.judge_followed(item).await?,
        };
        debug!(id = %item.id, outcome = ?outcome, "Item evaluated");
        Ok(outcome)
    }

    /// Reposts, recommendations and items by authors we don't follow.
    async fn judge_unfamiliar(
        &self,
        item: &ContentItem,
        reposter_id: Option<&str>,
    ) -> Result<Outcome> {
        if self.db.relay_exists(&item.id).await? {
            return Ok(Outcome::Skipped(SkipReason::AlreadySeen));
        }

        // A creator tagging the reposter is treated like a followed post.
        let mentioned = reposter_id.is_some_and(|id| item.mentions_account(id));
        let role = if mentioned { Role::Tweet } else { Role::Retweet };
        if !self
            .policy
            .should_admit(item.created_at, item.favorite_count, role)
        {
            return Ok(Outcome::Skipped(SkipReason::BelowThreshold));
        }

        if !mentioned {
            if self.db.is_suppressed(&item.author.id).await? {
                return Ok(Outcome::Skipped(SkipReason::Suppressed));
            }
            if !self
                .filter
                .is_creator(&item.author.description, &item.author.url)
            {
                return Ok(Outcome::Skipped(SkipReason::NotCreator));
            }
            if !item.author.following {
                info!(
                    handle = %item.author.handle,
                    likes = item.favorite_count,
                    url = %item.url,
                    "Suggesting new creator"
                );
                self.notifier.suggest_follow(&item.author.handle).await;
                self.feed
                    .follow(&item.author.handle)
                    .await
                    .with_context(|| format!("Failed to follow {}", item.author.handle))?;
            }
        }

        self.persist_and_enqueue(item, role).await
    }

    async fn judge_followed(&self, item: &ContentItem) -> Result<Outcome> {
        if !self
            .policy
            .should_admit(item.created_at, item.favorite_count, Role::Tweet)
        {
            return Ok(Outcome::Skipped(SkipReason::BelowThreshold));
        }
        if self.db.relay_exists(&item.id).await? {
            return Ok(Outcome::Skipped(SkipReason::AlreadySeen));
        }
        self.persist_and_enqueue(item, Role::Tweet).await
    }

    /// Record the item, then relay it unless the filter rejects it. Filtered
    /// items are still recorded so they are not evaluated again.
    async fn persist_and_enqueue(&self, item: &ContentItem, role: Role) -> Result<Outcome> {
        if let Err(e) = self.db.persist_relay(&RelayRecord::from_item(item)).await {
            if is_duplicate_key(&e) {
                debug!(id = %item.id, "Item recorded concurrently, skipping");
                return Ok(Outcome::Skipped(SkipReason::AlreadySeen));
            }
            return Err(e);
        }

        if self.filter.is_repost(&item.text, &item.hashtags) {
            return Ok(Outcome::Skipped(SkipReason::Filtered));
        }

        info!(
            role = ?role,
            likes = item.favorite_count,
            views = ?item.view_count,
            url = %item.url,
            "Relaying item"
        );

        let payloads = build_payloads(item, &self.fetcher).await;
        let job = OutboundJob {
            payloads,
            correlation: Some(CorrelationEntry {
                author_handle: item.author.handle.clone(),
                content_id: item.id.clone(),
                media: item.media.clone(),
            }),
        };
        self.queue.enqueue(job).await?;
        Ok(Outcome::Relayed)
    }
}
