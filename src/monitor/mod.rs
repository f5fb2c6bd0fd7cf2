mod scheduler;
mod service;

pub use scheduler::{short_term_priority, AnalysisScheduler, HISTORY_CAPACITY};
pub use service::{EndSessionOutcome, EndSessionRequest, MonitorService};
