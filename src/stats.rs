//! Uptime and response-time statistics derived from check history.
//!
//! The free functions are pure projections over a slice of results.
//! [`StatsAggregator`] loads the window from the store and applies them.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::{CheckResult, DailyStat, Incident, ResponseTimeStats, Store, StoreError};
use crate::probe::round2;

/// Percentage of up results. 100.0 when there are none.
pub fn uptime_percentage(results: &[CheckResult]) -> f64 {
    if results.is_empty() {
        return 100.0;
    }
    let up = results.iter().filter(|r| r.is_up).count();
    100.0 * up as f64 / results.len() as f64
}

/// Average, minimum and maximum response time over up results that have
/// one, each rounded to 2 decimals. All zero without samples.
pub fn response_time_stats(results: &[CheckResult]) -> ResponseTimeStats {
    let samples: Vec<f64> = results
        .iter()
        .filter(|r| r.is_up)
        .filter_map(|r| r.response_time_ms)
        .collect();

    if samples.is_empty() {
        return ResponseTimeStats::default();
    }

    let sum: f64 = samples.iter().sum();
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    ResponseTimeStats {
        average: round2(sum / samples.len() as f64),
        minimum: round2(min),
        maximum: round2(max),
    }
}

#[derive(Default)]
struct DayAccumulator {
    checks: u64,
    up: u64,
    response_sum: f64,
    response_count: u64,
    security_sum: f64,
    security_count: u64,
}

/// One entry per UTC calendar day that has results, ascending. Days
/// without results are absent.
pub fn daily_stats(results: &[CheckResult]) -> Vec<DailyStat> {
    let mut days: BTreeMap<NaiveDate, DayAccumulator> = BTreeMap::new();

    for result in results {
        let acc = days.entry(result.timestamp.date_naive()).or_default();
        acc.checks += 1;
        if result.is_up {
            acc.up += 1;
        }
        if let Some(ms) = result.response_time_ms {
            acc.response_sum += ms;
            acc.response_count += 1;
        }
        if let Some(score) = result.security_score {
            acc.security_sum += f64::from(score);
            acc.security_count += 1;
        }
    }

    days.into_iter()
        .map(|(day, acc)| DailyStat {
            day,
            checks: acc.checks,
            up_count: acc.up,
            uptime_percentage: if acc.checks == 0 {
                100.0
            } else {
                100.0 * acc.up as f64 / acc.checks as f64
            },
            avg_response_time: mean(acc.response_sum, acc.response_count),
            avg_security_score: mean(acc.security_sum, acc.security_count),
        })
        .collect()
}

fn mean(sum: f64, count: u64) -> Option<f64> {
    (count > 0).then(|| round2(sum / count as f64))
}

/// Dashboard view of one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetOverview {
    pub target_id: i64,
    pub latest: Option<CheckResult>,
    pub uptime_7d: f64,
    pub uptime_30d: f64,
    pub response_time_30d: ResponseTimeStats,
    pub recent_incidents: Vec<Incident>,
}

/// Computes statistics over the trailing `days` days of a target's history.
#[derive(Clone)]
pub struct StatsAggregator {
    store: Arc<dyn Store>,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn uptime_percentage(&self, target_id: i64, days: u32) -> Result<f64, StoreError> {
        self.uptime_percentage_at(target_id, days, Utc::now())
    }

    pub fn uptime_percentage_at(
        &self,
        target_id: i64,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        Ok(uptime_percentage(&self.window(target_id, days, now)?))
    }

    pub fn response_time_stats(
        &self,
        target_id: i64,
        days: u32,
    ) -> Result<ResponseTimeStats, StoreError> {
        self.response_time_stats_at(target_id, days, Utc::now())
    }

    pub fn response_time_stats_at(
        &self,
        target_id: i64,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<ResponseTimeStats, StoreError> {
        Ok(response_time_stats(&self.window(target_id, days, now)?))
    }

    pub fn daily_stats(&self, target_id: i64, days: u32) -> Result<Vec<DailyStat>, StoreError> {
        self.daily_stats_at(target_id, days, Utc::now())
    }

    pub fn daily_stats_at(
        &self,
        target_id: i64,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<DailyStat>, StoreError> {
        Ok(daily_stats(&self.window(target_id, days, now)?))
    }

    /// Latest check, 7 and 30 day uptime, 30 day response times and the
    /// five most recent incidents.
    pub fn target_overview(&self, target_id: i64) -> Result<TargetOverview, StoreError> {
        self.target_overview_at(target_id, Utc::now())
    }

    pub fn target_overview_at(
        &self,
        target_id: i64,
        now: DateTime<Utc>,
    ) -> Result<TargetOverview, StoreError> {
        let month = self.window(target_id, 30, now)?;
        let week_start = now - Duration::days(7);
        let week: Vec<CheckResult> = month
            .iter()
            .filter(|r| r.timestamp >= week_start)
            .cloned()
            .collect();

        Ok(TargetOverview {
            target_id,
            latest: self.store.latest_check_result(target_id)?,
            uptime_7d: round2(uptime_percentage(&week)),
            uptime_30d: round2(uptime_percentage(&month)),
            response_time_30d: response_time_stats(&month),
            recent_incidents: self.store.incidents(Some(target_id), true, Some(5))?,
        })
    }

    fn window(
        &self,
        target_id: i64,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let since = now - Duration::days(i64::from(days));
        self.store.check_results_in_range(target_id, since, now)
    }
}
