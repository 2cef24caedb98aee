// Bounded relay queue and the single paced worker that drains it.
//
// The queue holds at most one job, so the ingestion loop blocks on enqueue
// while the worker is busy or sleeping. That keeps the channel post rate at
// one job per pacing interval no matter how fast the feed produces items,
// and publication order equals enqueue order.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::{send_media, Notifier, OutboundMedia, Transport};
use crate::correlation::{CorrelationCache, CorrelationEntry};
use crate::error::RelayError;

pub const QUEUE_CAPACITY: usize = 1;
pub const DEFAULT_PACING: Duration = Duration::from_secs(10);

/// A publication unit: one item's payloads.
#[derive(Debug, Clone)]
pub struct OutboundJob {
    pub payloads: Vec<OutboundMedia>,
    pub correlation: Option<CorrelationEntry>,
}

/// Producer side of the relay queue.
#[derive(Clone)]
pub struct RelayQueue {
    tx: mpsc::Sender<OutboundJob>,
}

impl RelayQueue {
    /// Wait for room and enqueue. Fails only once the worker is gone.
    pub async fn enqueue(&self, job: OutboundJob) -> Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| anyhow::anyhow!("Relay worker has stopped"))
    }
}

/// Create the bounded queue and its receiving end.
pub fn channel() -> (RelayQueue, mpsc::Receiver<OutboundJob>) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    (RelayQueue { tx }, rx)
}

pub struct RelayWorker {
    transport: Arc<dyn Transport>,
    channel_id: i64,
    cache: CorrelationCache,
    notifier: Notifier,
    pacing: Duration,
}

impl RelayWorker {
    pub fn new(
        transport: Arc<dyn Transport>,
        channel_id: i64,
        cache: CorrelationCache,
        notifier: Notifier,
    ) -> Self {
        Self {
            transport,
            channel_id,
            cache,
            notifier,
            pacing: DEFAULT_PACING,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Deliver jobs until every RelayQueue handle is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<OutboundJob>) {
        info!(channel_id = self.channel_id, "Relay worker started");
        while let Some(job) = rx.recv().await {
            // Failures are already reported to the operator; keep going.
            let _ = self.deliver(job).await;
            tokio::time::sleep(self.pacing).await;
        }
        info!("Relay queue closed, worker exiting");
    }

    /// Publish one job. No retries: a failure is reported and the job dropped.
    pub async fn deliver(&self, job: OutboundJob) -> Result<Vec<i64>> {
        if job.payloads.is_empty() {
            warn!("Skipping relay job with no payloads");
            return Ok(Vec::new());
        }

        match send_media(self.transport.as_ref(), self.channel_id, &job.payloads, None).await {
            Ok(ids) => {
                info!(messages = ids.len(), "Relayed item");
                if let (Some(entry), Some(&first)) = (job.correlation, ids.first()) {
                    if !entry.media.is_empty() {
                        self.cache.put(first, entry);
                    }
                }
                Ok(ids)
            }
            Err(e) => {
                error!(error = %e, payloads = job.payloads.len(), "Relay delivery failed");
                self.notifier
                    .notify(&format!("{e:#}\n\n{:?}", job.payloads))
                    .await;
                Err(anyhow::Error::new(RelayError::Delivery(format!("{e:#}"))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Media;
    use crate::relay::{MediaSource, TextOptions};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Single(i64, String),
        Album(i64, Vec<String>),
        Text(i64, String),
    }

    /// Records calls; message ids count up from 500.
    struct FakeTransport {
        calls: Mutex<Vec<Call>>,
        next_id: AtomicI64,
        fail_sends: bool,
    }

    impl FakeTransport {
        fn new(fail_sends: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                next_id: AtomicI64::new(500),
                fail_sends,
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn url_of(m: &OutboundMedia) -> String {
        match m.source() {
            MediaSource::Url(u) => u.clone(),
            MediaSource::Upload { file_name, .. } => file_name.clone(),
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send_single(&self, chat_id: i64, media: &OutboundMedia, _: Option<i64>) -> Result<i64> {
            if self.fail_sends {
                anyhow::bail!("Bad Request: wrong file identifier");
            }
            self.calls.lock().unwrap().push(Call::Single(chat_id, url_of(media)));
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        async fn send_album(&self, chat_id: i64, media: &[OutboundMedia], _: Option<i64>) -> Result<Vec<i64>> {
            if self.fail_sends {
                anyhow::bail!("Bad Request: wrong file identifier");
            }
            self.calls
                .lock()
                .unwrap()
                .push(Call::Album(chat_id, media.iter().map(url_of).collect()));
            Ok(media
                .iter()
                .map(|_| self.next_id.fetch_add(1, Ordering::SeqCst))
                .collect())
        }

        async fn send_text(&self, chat_id: i64, text: &str, _: &TextOptions) -> Result<i64> {
            self.calls.lock().unwrap().push(Call::Text(chat_id, text.to_string()));
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        async fn answer_callback(&self, _: &str, _: &str, _: bool) -> Result<()> {
            Ok(())
        }

        async fn download_file(&self, _: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn photo(url: &str) -> OutboundMedia {
        OutboundMedia::Photo {
            source: MediaSource::Url(url.into()),
            caption: None,
        }
    }

    fn entry() -> CorrelationEntry {
        CorrelationEntry {
            author_handle: "artist".into(),
            content_id: "42".into(),
            media: vec![Media::photo("https://pbs.twimg.com/media/a.jpg")],
        }
    }

    fn worker(transport: Arc<FakeTransport>, cache: CorrelationCache) -> RelayWorker {
        let notifier = Notifier::new(transport.clone(), 1);
        RelayWorker::new(transport, -1001, cache, notifier).with_pacing(Duration::ZERO)
    }

    #[tokio::test]
    async fn jobs_are_published_in_enqueue_order() {
        let transport = FakeTransport::new(false);
        let (queue, rx) = channel();
        let handle = tokio::spawn(worker(transport.clone(), CorrelationCache::new()).run(rx));

        for url in ["a", "b", "c"] {
            queue
                .enqueue(OutboundJob {
                    payloads: vec![photo(url)],
                    correlation: None,
                })
                .await
                .unwrap();
        }
        drop(queue);
        handle.await.unwrap();

        assert_eq!(
            transport.calls(),
            vec![
                Call::Single(-1001, "a".into()),
                Call::Single(-1001, "b".into()),
                Call::Single(-1001, "c".into()),
            ]
        );
    }

    #[tokio::test]
    async fn album_correlates_first_message_id() {
        let transport = FakeTransport::new(false);
        let cache = CorrelationCache::new();
        let w = worker(transport.clone(), cache.clone());

        let ids = w
            .deliver(OutboundJob {
                payloads: vec![photo("a"), photo("b")],
                correlation: Some(entry()),
            })
            .await
            .unwrap();

        assert_eq!(ids, vec![500, 501]);
        assert_eq!(transport.calls(), vec![Call::Album(-1001, vec!["a".into(), "b".into()])]);
        assert_eq!(cache.take_if_present(500).unwrap().author_handle, "artist");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn failure_notifies_operator_and_skips_cache() {
        let transport = FakeTransport::new(true);
        let cache = CorrelationCache::new();
        let w = worker(transport.clone(), cache.clone());

        let err = w
            .deliver(OutboundJob {
                payloads: vec![photo("a")],
                correlation: Some(entry()),
            })
            .await
            .unwrap_err();

        assert!(matches!(err.downcast_ref::<RelayError>(), Some(RelayError::Delivery(_))));
        assert!(cache.is_empty());
        match &transport.calls()[..] {
            [Call::Text(1, text)] => {
                assert!(text.starts_with("Bad Request: wrong file identifier\n\n"));
                assert!(text.contains("Url(a)"));
            }
            other => panic!("unexpected calls {other:?}"),
        }
    }

    #[tokio::test]
    async fn entry_without_media_is_not_cached() {
        let transport = FakeTransport::new(false);
        let cache = CorrelationCache::new();
        let w = worker(transport, cache.clone());
        let mut e = entry();
        e.media.clear();
        w.deliver(OutboundJob {
            payloads: vec![photo("a")],
            correlation: Some(e),
        })
        .await
        .unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn enqueue_fails_after_worker_is_gone() {
        let (queue, rx) = channel();
        drop(rx);
        let job = OutboundJob {
            payloads: vec![photo("a")],
            correlation: None,
        };
        assert!(queue.enqueue(job).await.is_err());
    }
}
