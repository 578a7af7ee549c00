//! Incident state machine.
//!
//! Per target there are two states: Clear (no open incident) and Down
//! (exactly one open incident). The open incident row in the store is the
//! state, so a restart resumes where it left off. Results for one target
//! must be fed in timestamp order by a single caller at a time.

use std::sync::Arc;

use crate::db::{CheckResult, Incident, Store, StoreError};

/// A state change caused by one check result.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentTransition {
    /// Clear to Down.
    Opened(Incident),
    /// Down to Clear. The incident carries its duration.
    Resolved(Incident),
}

pub struct IncidentTracker {
    store: Arc<dyn Store>,
}

impl IncidentTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Apply one result. Incident times come from the result timestamp.
    pub fn update(&self, result: &CheckResult) -> Result<Option<IncidentTransition>, StoreError> {
        let open = self.store.open_incident(result.target_id)?;

        match (result.is_up, open) {
            (false, None) => {
                let mut incident = Incident::open(result.target_id, result.timestamp);
                self.store.append_or_update_incident(&mut incident)?;
                tracing::info!(
                    "IncidentTracker: target {} went down, incident {} opened",
                    result.target_id,
                    incident.id
                );
                Ok(Some(IncidentTransition::Opened(incident)))
            }
            (true, Some(mut incident)) => {
                incident.resolve(result.timestamp);
                self.store.append_or_update_incident(&mut incident)?;
                tracing::info!(
                    "IncidentTracker: target {} recovered, incident {} resolved after {}s",
                    result.target_id,
                    incident.id,
                    incident.duration_seconds.unwrap_or_default()
                );
                Ok(Some(IncidentTransition::Resolved(incident)))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn result(target_id: i64, at: DateTime<Utc>, is_up: bool) -> CheckResult {
        CheckResult {
            is_up,
            ..CheckResult::new(target_id, at)
        }
    }

    fn tracker() -> (Arc<SqliteStore>, IncidentTracker) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let tracker = IncidentTracker::new(store.clone());
        (store, tracker)
    }

    #[test]
    fn test_no_history_starts_clear() {
        let (store, tracker) = tracker();
        assert_eq!(tracker.update(&result(1, t0(), true)).unwrap(), None);
        assert!(store.incidents(Some(1), true, None).unwrap().is_empty());
    }

    #[test]
    fn test_down_down_up_sequence() {
        let (store, tracker) = tracker();
        let t1 = t0();
        let t2 = t1 + Duration::minutes(5);
        let t3 = t1 + Duration::seconds(725);

        let opened = tracker.update(&result(1, t1, false)).unwrap();
        let incident = match opened {
            Some(IncidentTransition::Opened(i)) => i,
            other => panic!("expected open, got {:?}", other),
        };
        assert_eq!(incident.start_time, t1);
        assert!(incident.id > 0);

        assert_eq!(tracker.update(&result(1, t2, false)).unwrap(), None);
        assert_eq!(store.incidents(Some(1), true, None).unwrap().len(), 1);

        match tracker.update(&result(1, t3, true)).unwrap() {
            Some(IncidentTransition::Resolved(i)) => {
                assert_eq!(i.id, incident.id);
                assert_eq!(i.end_time, Some(t3));
                assert_eq!(i.duration_seconds, Some(725));
                assert!(i.resolved);
            }
            other => panic!("expected resolve, got {:?}", other),
        }

        assert!(store.open_incident(1).unwrap().is_none());
        assert_eq!(tracker.update(&result(1, t3 + Duration::minutes(5), true)).unwrap(), None);
    }

    #[test]
    fn test_targets_are_independent() {
        let (store, tracker) = tracker();
        tracker.update(&result(1, t0(), false)).unwrap();
        tracker.update(&result(2, t0(), false)).unwrap();
        tracker.update(&result(1, t0() + Duration::minutes(1), true)).unwrap();

        assert!(store.open_incident(1).unwrap().is_none());
        assert!(store.open_incident(2).unwrap().is_some());
    }

    #[test]
    fn test_random_sequences_keep_one_open_incident() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..20 {
            let (store, tracker) = tracker();
            let mut at = t0();
            let mut previous_up = true;
            let mut expected_incidents = 0;

            for _ in 0..50 {
                let is_up = rng.gen_bool(0.6);
                if !is_up && previous_up {
                    expected_incidents += 1;
                }
                previous_up = is_up;

                tracker.update(&result(1, at, is_up)).unwrap();
                at += Duration::seconds(rng.gen_range(1..600));

                let all = store.incidents(Some(1), true, None).unwrap();
                let open = all.iter().filter(|i| !i.resolved).count();
                assert!(open <= 1);
                assert_eq!(open == 1, !is_up);
                for incident in all.iter().filter(|i| i.resolved) {
                    assert!(incident.duration_seconds.unwrap() >= 0);
                }
            }

            assert_eq!(store.incidents(Some(1), true, None).unwrap().len(), expected_incidents);
        }
    }
}
