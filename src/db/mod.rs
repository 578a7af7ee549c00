//! Persistence for targets, check results and incidents.
//!
//! The monitoring core only talks to the [`Store`] and [`TargetRegistry`]
//! traits. [`SqliteStore`] is the shipped implementation.

mod models;
mod store;

pub use models::*;
pub use store::*;

use chrono::{DateTime, Utc};

/// Append-only history of check results plus the incident log.
///
/// Every call is atomic with respect to other callers.
pub trait Store: Send + Sync {
    /// Durably append one result. Returns the row id.
    fn append_check_result(&self, result: &CheckResult) -> Result<i64, StoreError>;

    fn latest_check_result(&self, target_id: i64) -> Result<Option<CheckResult>, StoreError>;

    /// Results with `since <= timestamp <= until`, oldest first.
    fn check_results_in_range(
        &self,
        target_id: i64,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StoreError>;

    /// One page of a target's history, newest first.
    fn check_results(
        &self,
        target_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CheckResult>, StoreError>;

    /// The unresolved incident for a target, if any.
    fn open_incident(&self, target_id: i64) -> Result<Option<Incident>, StoreError>;

    /// Insert when `incident.id == 0` (the new id is written back),
    /// otherwise update the existing row.
    fn append_or_update_incident(&self, incident: &mut Incident) -> Result<(), StoreError>;

    /// Incidents, most recent first. `None` means every target.
    fn incidents(
        &self,
        target_id: Option<i64>,
        include_resolved: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Incident>, StoreError>;
}

/// Source of the targets to monitor.
pub trait TargetRegistry: Send + Sync {
    fn targets(&self) -> Result<Vec<Target>, StoreError>;

    fn target(&self, id: i64) -> Result<Target, StoreError>;
}
