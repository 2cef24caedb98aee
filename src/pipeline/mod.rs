// Ingestion pipeline: one pass over both home timelines, and the scheduler
// that repeats passes with retention sweeps in between.

pub mod ingest;
pub mod scheduler;

pub use ingest::{Ingestor, Outcome, PassTiming, SkipReason};
pub use scheduler::{pass_after_sweep, run_forever, sweep, Retention, Schedule};
