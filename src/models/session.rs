use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SESSION_ID: &str = "default";

/// The monitoring session that incoming telemetry is attributed to.
///
/// Passed by value into scoring and archiving so neither reads ambient state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionContext {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            started_at,
        }
    }

    /// A new session named after its start second, e.g. `session_1718000000`.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self::new(format!("session_{}", now.timestamp()), now)
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_ID, Utc::now())
    }
}
