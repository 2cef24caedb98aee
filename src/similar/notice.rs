// Similar-image notices: a bounded queue and one paced poster.
//
// The photo handler runs per update, so bursts of uploads to the scoped
// channel would otherwise post a burst of notices into the group. The
// worker posts one notice per pacing interval.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::relay::{TextOptions, Transport};

pub const NOTICE_QUEUE_CAPACITY: usize = 1;
pub const NOTICE_PACING: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct NoticeQueue {
    tx: mpsc::Sender<String>,
}

impl NoticeQueue {
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(NOTICE_QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    pub async fn push(&self, text: String) -> Result<()> {
        self.tx
            .send(text)
            .await
            .map_err(|_| anyhow::anyhow!("Notice worker has stopped"))
    }
}

pub struct NoticeWorker {
    transport: Arc<dyn Transport>,
    group_id: i64,
    pacing: Duration,
}

impl NoticeWorker {
    pub fn new(transport: Arc<dyn Transport>, group_id: i64) -> Self {
        Self {
            transport,
            group_id,
            pacing: NOTICE_PACING,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub async fn run(self, mut rx: mpsc::Receiver<String>) {
        info!(group_id = self.group_id, "Similar-image notice worker started");
        while let Some(text) = rx.recv().await {
            if let Err(e) = self
                .transport
                .send_text(self.group_id, &text, &TextOptions::default())
                .await
            {
                warn!(error = %e, "Failed to post similar-image notice");
            }
            tokio::time::sleep(self.pacing).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::OutboundMedia;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TextSink {
        sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl Transport for TextSink {
        async fn send_single(&self, _: i64, _: &OutboundMedia, _: Option<i64>) -> Result<i64> {
            anyhow::bail!("unexpected")
        }
        async fn send_album(&self, _: i64, _: &[OutboundMedia], _: Option<i64>) -> Result<Vec<i64>> {
            anyhow::bail!("unexpected")
        }
        async fn send_text(&self, chat_id: i64, text: &str, _: &TextOptions) -> Result<i64> {
            let mut sent = self.sent.lock().unwrap();
            sent.push((chat_id, text.to_string()));
            Ok(sent.len() as i64)
        }
        async fn answer_callback(&self, _: &str, _: &str, _: bool) -> Result<()> {
            Ok(())
        }
        async fn download_file(&self, _: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn notices_reach_the_group_in_order() {
        let sink = Arc::new(TextSink::default());
        let (queue, rx) = NoticeQueue::channel();
        let worker = NoticeWorker::new(sink.clone(), -100777).with_pacing(Duration::ZERO);
        let handle = tokio::spawn(worker.run(rx));

        queue.push("first".into()).await.unwrap();
        queue.push("second".into()).await.unwrap();
        drop(queue);
        handle.await.unwrap();

        let sent = sink.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![(-100777, "first".to_string()), (-100777, "second".to_string())]
        );
    }

    #[tokio::test]
    async fn push_fails_once_worker_is_gone() {
        let (queue, rx) = NoticeQueue::channel();
        drop(rx);
        assert!(queue.push("late".into()).await.is_err());
    }
}
