// Relay policy: the pure decisions the ingestion loop makes per item.

pub mod admission;
pub mod filter;

pub use admission::{AdmissionPolicy, Role};
pub use filter::ContentFilter;
