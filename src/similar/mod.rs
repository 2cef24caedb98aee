// Near-duplicate image detection for the scoped channel.

pub mod index;
pub mod notice;
pub mod phash;

pub use index::{FingerprintSegments, NearDuplicateIndex, SimilarImage};
pub use notice::{NoticeQueue, NoticeWorker};
