mod queue;
mod transport;
mod worker;

pub use queue::{CycleReport, Outbox, PendingEntry, QueueStatus};
pub use transport::{ArchiveTransport, HttpTransport};
pub use worker::OutboxWorker;
