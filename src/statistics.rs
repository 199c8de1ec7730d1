//! Historical session statistics
//!
//! Reads every stored session of one assessment, reduces it to a mean error
//! and orders the results chronologically for charting.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::ProprioError;
use crate::geometry::mean;
use crate::storage::{KeyValueStore, ProprioStore, SessionResultRecord};

/// Time window applied to historical sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsFilter {
    #[default]
    All,
    Day,
    Week,
    Month,
}

impl StatsFilter {
    /// Look-back window, `None` for everything
    pub fn window(&self) -> Option<Duration> {
        match self {
            StatsFilter::All => None,
            StatsFilter::Day => Some(Duration::hours(24)),
            StatsFilter::Week => Some(Duration::days(7)),
            StatsFilter::Month => Some(Duration::days(30)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatsFilter::All => "all",
            StatsFilter::Day => "day",
            StatsFilter::Week => "week",
            StatsFilter::Month => "month",
        }
    }
}

impl fmt::Display for StatsFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatsFilter {
    type Err = ProprioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(StatsFilter::All),
            "day" => Ok(StatsFilter::Day),
            "week" => Ok(StatsFilter::Week),
            "month" => Ok(StatsFilter::Month),
            other => Err(ProprioError::InvalidConfig(format!(
                "unknown statistics filter '{other}' (expected all, day, week or month)"
            ))),
        }
    }
}

/// One stored session reduced to a single point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStat {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    /// Plain (unrounded) mean of the trial scores
    pub mean_error: f64,
    pub trials: usize,
}

/// Sessions of one assessment, oldest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionHistory {
    pub sessions: Vec<SessionStat>,
}

impl SessionHistory {
    /// Load every session stored for `user_id` under `assessment_name`.
    ///
    /// Records that fail to parse are skipped with a warning.
    pub fn load<S: KeyValueStore>(
        store: &ProprioStore<S>,
        user_id: &str,
        assessment_name: &str,
    ) -> Result<Self, ProprioError> {
        let mut sessions = Vec::new();

        for (session_id, raw) in store.session_entries(user_id, assessment_name)? {
            let record: SessionResultRecord = match serde_json::from_str(&raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!(%session_id, error = %e, "skipping unreadable session record");
                    continue;
                }
            };
            sessions.push(SessionStat {
                session_id,
                timestamp: record.timestamp,
                mean_error: mean(&record.data),
                trials: record.data.len(),
            });
        }

        sessions.sort_by_key(|s| s.timestamp);
        Ok(Self { sessions })
    }

    /// Sessions inside the filter window ending at `now`
    pub fn filter(&self, filter: StatsFilter, now: DateTime<Utc>) -> Vec<&SessionStat> {
        match filter.window() {
            None => self.sessions.iter().collect(),
            Some(window) => {
                let since = now - window;
                self.sessions.iter().filter(|s| s.timestamp >= since).collect()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Mean of the per-session means
    pub fn overall_mean(sessions: &[&SessionStat]) -> f64 {
        let means: Vec<f64> = sessions.iter().map(|s| s.mean_error).collect();
        mean(&means)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, GUEST_ID};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn seeded_store() -> ProprioStore<MemoryStore> {
        let mut store = ProprioStore::new(MemoryStore::new());
        let write = |store: &mut ProprioStore<MemoryStore>, id: &str, scores: &[f64], day: u32| {
            let ts = Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap();
            store
                .write_session_result(GUEST_ID, "YourProject", id, scores, ts)
                .unwrap();
        };
        write(&mut store, "session_c", &[3.0, 4.0], 20);
        write(&mut store, "session_a", &[10.0, 20.0, 30.0], 1);
        write(&mut store, "session_b", &[1.0, 2.0, 2.0], 15);
        // Different assessment, must not appear
        store
            .write_session_result(
                GUEST_ID,
                "Other",
                "session_x",
                &[99.0],
                Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap(),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_load_sorts_by_timestamp() {
        let store = seeded_store();
        let history = SessionHistory::load(&store, GUEST_ID, "YourProject").unwrap();

        let ids: Vec<&str> = history.sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["session_a", "session_b", "session_c"]);
        assert_eq!(history.sessions[0].mean_error, 20.0);
        assert!((history.sessions[1].mean_error - 5.0 / 3.0).abs() < 1e-12);
        assert_eq!(history.sessions[2].trials, 2);
    }

    #[test]
    fn test_filter_windows() {
        let store = seeded_store();
        let history = SessionHistory::load(&store, GUEST_ID, "YourProject").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 21, 0, 0, 0).unwrap();

        assert_eq!(history.filter(StatsFilter::All, now).len(), 3);
        assert_eq!(history.filter(StatsFilter::Day, now).len(), 1);
        assert_eq!(history.filter(StatsFilter::Week, now).len(), 2);
        assert_eq!(history.filter(StatsFilter::Month, now).len(), 3);
    }

    #[test]
    fn test_unreadable_records_are_skipped() {
        let mut kv = MemoryStore::new();
        kv.set("user_guest_YourProject_session_bad", "not json").unwrap();
        let mut store = ProprioStore::new(kv);
        store
            .write_session_result(
                GUEST_ID,
                "YourProject",
                "session_ok",
                &[5.0],
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            )
            .unwrap();

        let history = SessionHistory::load(&store, GUEST_ID, "YourProject").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.sessions[0].session_id, "session_ok");
    }

    #[test]
    fn test_filter_parse() {
        assert_eq!("Week".parse::<StatsFilter>().unwrap(), StatsFilter::Week);
        assert!("year".parse::<StatsFilter>().is_err());
    }
}
