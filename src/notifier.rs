//! Fan-out of typed monitoring events to any number of subscribers.
//!
//! Delivery is best effort: a subscriber whose queue is full misses the event,
//! a subscriber that has gone away is forgotten.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::scoring::{Finding, Priority, ScoreResult};

const ENABLE_LOGS: bool = true;
use crate::log_debug;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Medium,
    High,
}

/// Which analysis produced a `prediction` event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "pass", rename_all = "snake_case")]
pub enum PredictionPayload {
    Fast {
        priority: Priority,
        findings: Vec<Finding>,
    },
    Full {
        result: Box<ScoreResult>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    CtgData {
        sequence_id: u64,
        timestamp: DateTime<Utc>,
        bpm_value: f64,
        uterus_value: f64,
        device_time_bpm: String,
        device_time_uterus: String,
    },
    Prediction {
        session_id: String,
        analysis: PredictionPayload,
    },
    ShortTermAlert {
        session_id: String,
        severity: AlertSeverity,
        priority: Priority,
        decelerations: u32,
        deep_decelerations: u32,
        prolonged_decelerations: u32,
        message: String,
    },
    Alert {
        session_id: String,
        severity: AlertSeverity,
        priority: Priority,
        wellbeing_index: f64,
        message: String,
    },
    AnalysisInfo {
        session_id: String,
        records_collected: u64,
        records_required: u64,
        progress_percent: f64,
    },
    ArchiveSent {
        session_id: String,
        filename: String,
        status: u16,
    },
    SessionEnded {
        session_id: String,
        archive_file: String,
        total_records: u64,
    },
    SessionSwitched {
        previous_session_id: String,
        session_id: String,
    },
    System {
        message: String,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::CtgData { .. } => "ctg_data",
            Event::Prediction { .. } => "prediction",
            Event::ShortTermAlert { .. } => "short_term_alert",
            Event::Alert { .. } => "alert",
            Event::AnalysisInfo { .. } => "analysis_info",
            Event::ArchiveSent { .. } => "archive_sent",
            Event::SessionEnded { .. } => "session_ended",
            Event::SessionSwitched { .. } => "session_switched",
            Event::System { .. } => "system",
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Event::System {
            message: message.into(),
        }
    }
}

pub struct Notifier {
    subscribers: Mutex<Vec<mpsc::Sender<Event>>>,
    capacity: usize,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Delivers `event` to every live subscriber and returns how many got it.
    pub fn publish(&self, event: Event) -> usize {
        let mut delivered = 0;
        self.lock().retain(|subscriber| match subscriber.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                log_debug!("subscriber queue full, dropping {} event", event.kind());
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<Event>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_events() {
        let notifier = Notifier::default();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        assert_eq!(notifier.publish(Event::system("hello")), 2);

        assert!(matches!(first.recv().await, Some(Event::System { .. })));
        assert!(matches!(second.recv().await, Some(Event::System { .. })));
    }

    #[tokio::test]
    async fn closed_subscriber_is_removed() {
        let notifier = Notifier::default();
        let mut kept = notifier.subscribe();
        let dropped = notifier.subscribe();
        drop(dropped);

        assert_eq!(notifier.publish(Event::system("one")), 1);
        assert_eq!(notifier.subscriber_count(), 1);
        assert!(kept.recv().await.is_some());
    }

    #[tokio::test]
    async fn full_subscriber_misses_event_but_stays() {
        let notifier = Notifier::new(1);
        let mut slow = notifier.subscribe();

        assert_eq!(notifier.publish(Event::system("first")), 1);
        assert_eq!(notifier.publish(Event::system("second")), 0);
        assert_eq!(notifier.subscriber_count(), 1);

        match slow.recv().await {
            Some(Event::System { message }) => assert_eq!(message, "first"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(notifier.publish(Event::system("third")), 1);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let value = serde_json::to_value(Event::AnalysisInfo {
            session_id: "s".into(),
            records_collected: 120,
            records_required: 600,
            progress_percent: 20.0,
        })
        .unwrap();
        assert_eq!(value["type"], "analysis_info");
        assert_eq!(value["records_required"], 600);
    }
}
