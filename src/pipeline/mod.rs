//! Consumer side of the ingestion queue.

pub mod dead_letter;
pub mod ingest;
pub mod worker;

pub use dead_letter::DeadLetterSink;
pub use ingest::IngestionPipeline;
pub use worker::{WorkerPool, WorkerStats};

/// How a delivery must be settled with the broker.
///
/// Every handled delivery ends in exactly one of these; leaving a delivery
/// unsettled is reserved for a crashed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Success or benign skip: remove from the queue.
    Ack,
    /// Terminal failure: move to the dead-letter queue without requeueing.
    DeadLetter,
}
