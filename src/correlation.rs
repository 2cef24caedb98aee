// Correlation cache: relayed channel post id → source item.
//
// When the relay worker publishes an album to the channel it records the
// first message id here. The channel's linked discussion group later
// receives an automatic forward of that post, carrying the same id as its
// forward origin; the forward handler takes the entry to reply with the
// original-resolution files and a link to the author. Entries are removed
// on read and are not persisted: a restart loses pending correlations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::feed::Media;

/// What the forward handler needs to know about a relayed post.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationEntry {
    pub author_handle: String,
    pub content_id: String,
    pub media: Vec<Media>,
}

/// Shared, cheaply cloneable cache. The lock is never held across an await.
#[derive(Debug, Clone, Default)]
pub struct CorrelationCache {
    entries: Arc<Mutex<HashMap<i64, CorrelationEntry>>>,
}

impl CorrelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, CorrelationEntry>> {
        // A panic while holding the guard can't leave the map half-updated.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn put(&self, message_id: i64, entry: CorrelationEntry) {
        self.lock().insert(message_id, entry);
    }

    /// Remove and return the entry for `message_id`, if any.
    pub fn take_if_present(&self, message_id: i64) -> Option<CorrelationEntry> {
        self.lock().remove(&message_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(handle: &str) -> CorrelationEntry {
        CorrelationEntry {
            author_handle: handle.into(),
            content_id: "1".into(),
            media: vec![Media::photo("https://pbs.twimg.com/media/a.jpg")],
        }
    }

    #[test]
    fn take_removes_entry() {
        let cache = CorrelationCache::new();
        cache.put(10, entry("artist"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.take_if_present(10).unwrap().author_handle, "artist");
        assert!(cache.take_if_present(10).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn missing_key_is_none() {
        let cache = CorrelationCache::new();
        assert!(cache.take_if_present(99).is_none());
    }

    #[test]
    fn put_overwrites() {
        let cache = CorrelationCache::new();
        cache.put(1, entry("a"));
        cache.put(1, entry("b"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.take_if_present(1).unwrap().author_handle, "b");
    }

    #[tokio::test]
    async fn concurrent_writers_and_readers() {
        let cache = CorrelationCache::new();
        let mut handles = Vec::new();
        for i in 0..32i64 {
            let c = cache.clone();
            handles.push(tokio::spawn(async move {
                c.put(i, entry(&format!("h{i}")));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(cache.len(), 32);

        let mut takers = Vec::new();
        for i in 0..32i64 {
            let c = cache.clone();
            takers.push(tokio::spawn(async move { c.take_if_present(i) }));
        }
        let mut taken = 0;
        for t in takers {
            if t.await.unwrap().is_some() {
                taken += 1;
            }
        }
        assert_eq!(taken, 32);
        assert!(cache.is_empty());
    }
}
