// Fingerprint index: segment pre-filter, Hamming ranking, notice text.
//
// Two 64-bit hashes within Hamming distance 5 differ in at most 5 of their
// 16 hex digits, so they usually, but not always, share one of the four
// 4-digit segments. Matching on any segment is an indexed equality lookup
// and catches nearly all near-duplicates without scanning every row.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::db::Database;

pub const MAX_DISTANCE: u32 = 5;

/// A 64-bit hash as four 4-hex-digit segments (`%016x`, split in order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintSegments(pub [String; 4]);

impl FingerprintSegments {
    pub fn from_hash(hash: u64) -> Self {
        let hex = format!("{hash:016x}");
        Self([
            hex[0..4].to_string(),
            hex[4..8].to_string(),
            hex[8..12].to_string(),
            hex[12..16].to_string(),
        ])
    }

    pub fn to_hash(&self) -> Result<u64> {
        let hex = self.0.concat();
        u64::from_str_radix(&hex, 16).with_context(|| format!("Bad fingerprint segments {hex}"))
    }

    pub fn as_array(&self) -> &[String; 4] {
        &self.0
    }
}

pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// An earlier post that looks like the new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimilarImage {
    pub chat_id: i64,
    pub message_id: i64,
    pub distance: u32,
}

pub struct NearDuplicateIndex {
    db: Arc<dyn Database>,
    max_distance: u32,
}

impl NearDuplicateIndex {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            max_distance: MAX_DISTANCE,
        }
    }

    /// Stored images in `chat_id` within the distance threshold, closest first.
    pub async fn candidates_near(&self, chat_id: i64, hash: u64) -> Result<Vec<SimilarImage>> {
        let segments = FingerprintSegments::from_hash(hash);
        let rows = self
            .db
            .fingerprint_candidates(chat_id, segments.as_array())
            .await?;

        let mut matches = Vec::new();
        for row in rows {
            let stored = FingerprintSegments(row.segments).to_hash()?;
            let distance = hamming(stored, hash);
            if distance <= self.max_distance {
                matches.push(SimilarImage {
                    chat_id: row.chat_id,
                    message_id: row.message_id,
                    distance,
                });
            }
        }
        matches.sort_by_key(|m| m.distance);

        debug!(chat_id = chat_id, hash = %format!("{hash:016x}"), matches = matches.len(), "Fingerprint lookup");
        Ok(matches)
    }

    /// Look up matches, then record this image. Querying first means an
    /// image never matches itself.
    pub async fn check_and_insert(
        &self,
        chat_id: i64,
        message_id: i64,
        hash: u64,
    ) -> Result<Vec<SimilarImage>> {
        let matches = self.candidates_near(chat_id, hash).await?;
        let segments = FingerprintSegments::from_hash(hash);
        self.db
            .insert_fingerprint(chat_id, message_id, segments.as_array())
            .await?;
        Ok(matches)
    }
}

/// `https://t.me/c/<chat>/<message>` with the `-100` channel prefix removed.
pub fn message_link(chat_id: i64, message_id: i64) -> String {
    let chat = chat_id.to_string();
    let chat = chat.strip_prefix("-100").unwrap_or(&chat);
    format!("https://t.me/c/{chat}/{message_id}")
}

pub fn render_notice(chat_id: i64, message_id: i64, matches: &[SimilarImage]) -> String {
    let mut out = format!("Similar images:\n{}\n", message_link(chat_id, message_id));
    for m in matches {
        out.push_str(&format!(
            "{} {}\n",
            message_link(m.chat_id, m.message_id),
            m.distance
        ));
    }
    out
}
