//! In-process clinical record store, keyed by session id.

use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::models::PatientInfo;

#[derive(Default)]
pub struct ClinicalStore {
    records: RwLock<HashMap<String, PatientInfo>>,
}

impl ClinicalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, session_id: &str, info: PatientInfo) {
        self.write().insert(session_id.to_string(), info);
    }

    pub fn get(&self, session_id: &str) -> Option<PatientInfo> {
        self.read().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> Option<PatientInfo> {
        self.write().remove(session_id)
    }

    /// The only clinical input the scoring path consumes.
    pub fn risk_factor_count(&self, session_id: &str) -> usize {
        self.read()
            .get(session_id)
            .map(|info| info.risk_factors.len())
            .unwrap_or(0)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PatientInfo>> {
        match self.records.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, PatientInfo>> {
        match self.records.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_scoped_by_session() {
        let store = ClinicalStore::new();
        store.upsert(
            "a",
            PatientInfo {
                name: Some("Patient A".into()),
                risk_factors: vec!["preeclampsia".into(), "diabetes".into()],
                ..PatientInfo::default()
            },
        );

        assert_eq!(store.risk_factor_count("a"), 2);
        assert_eq!(store.risk_factor_count("b"), 0);
        assert_eq!(store.get("a").and_then(|p| p.name).as_deref(), Some("Patient A"));

        assert!(store.remove("a").is_some());
        assert_eq!(store.risk_factor_count("a"), 0);
    }
}
