use anyhow::Result;
use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::utils::time::days_before;

use super::{entities::TrackedTable, usage_store::UsageStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    pub cutoff: NaiveDate,
    pub deleted: Vec<(TrackedTable, usize)>,
    pub failed: Vec<TrackedTable>,
    pub compacted: bool,
}

impl RetentionReport {
    pub fn total_deleted(&self) -> usize {
        self.deleted.iter().map(|(_, count)| count).sum()
    }
}

/// First date that survives a cleanup run on `today`. Rows dated exactly on the cutoff are kept.
pub fn retention_cutoff(today: NaiveDate, retention_days: u32) -> NaiveDate {
    days_before(today, retention_days)
}

/// Deletes everything older than the retention window. A failing table doesn't stop the others
/// from being cleaned, and a failed compaction only gets logged.
pub fn apply_retention(
    store: &dyn UsageStore,
    today: NaiveDate,
    retention_days: u32,
) -> RetentionReport {
    let cutoff = retention_cutoff(today, retention_days);
    info!("Removing data older than {cutoff} ({retention_days} days)");

    let mut report = RetentionReport {
        cutoff,
        deleted: vec![],
        failed: vec![],
        compacted: false,
    };

    for table in TrackedTable::ALL {
        match store.delete_before(table, cutoff) {
            Ok(count) => report.deleted.push((table, count)),
            Err(e) => {
                error!("Failed to clean {}: {e:?}", table.table_name());
                report.failed.push(table);
            }
        }
    }

    report.compacted = compact(store).is_ok();
    info!("Retention removed {} rows", report.total_deleted());
    report
}

fn compact(store: &dyn UsageStore) -> Result<()> {
    store.compact().inspect_err(|e| warn!("Compaction failed {e:?}"))
}

#[cfg(test)]
mod tests {
    use anyhow::{Result, bail};
    use chrono::{DateTime, NaiveDate, Utc};

    use crate::storage::{
        entities::{
            ActiveCheckpoint, AppDailyStat, BrowsingDailyStat, Session, SessionWrite,
            StoreOverview, TrackedTable,
        },
        usage_store::{
            SqliteUsageStore, UsageStore,
            tests::{day, write},
        },
    };

    use super::{apply_retention, retention_cutoff};

    #[test]
    fn cutoff_is_today_minus_retention() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert_eq!(
            retention_cutoff(today, 7),
            NaiveDate::from_ymd_opt(2024, 2, 24).unwrap()
        );
        assert_eq!(
            retention_cutoff(today, 1),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
    }

    #[test]
    fn keeps_rows_on_and_after_cutoff() -> Result<()> {
        let store = SqliteUsageStore::open_in_memory()?;
        store.record_sessions(&[
            write("chrome.exe", "a", day(1), 10, Some("a")),
            write("chrome.exe", "b", day(3), 10, Some("b")),
            write("chrome.exe", "c", day(10), 10, Some("c")),
        ])?;

        let report = apply_retention(&store, day(10), 7);
        assert_eq!(report.cutoff, day(3));
        assert_eq!(report.total_deleted(), 3);
        assert!(report.failed.is_empty());
        assert!(report.compacted);
        assert_eq!(store.overview()?.oldest_date, Some(day(3)));
        Ok(())
    }

    /// Store whose session table can't be cleaned.
    struct BrokenSessions(SqliteUsageStore);

    impl UsageStore for BrokenSessions {
        fn record_sessions(&self, batch: &[SessionWrite]) -> Result<()> {
            self.0.record_sessions(batch)
        }
        fn app_stats_for(&self, date: NaiveDate) -> Result<Vec<AppDailyStat>> {
            self.0.app_stats_for(date)
        }
        fn app_stats_since(&self, cutoff: NaiveDate) -> Result<Vec<AppDailyStat>> {
            self.0.app_stats_since(cutoff)
        }
        fn browsing_stats_for(&self, date: NaiveDate) -> Result<Vec<BrowsingDailyStat>> {
            self.0.browsing_stats_for(date)
        }
        fn browsing_stats_since(&self, cutoff: NaiveDate) -> Result<Vec<BrowsingDailyStat>> {
            self.0.browsing_stats_since(cutoff)
        }
        fn sessions_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Session>> {
            self.0.sessions_between(from, to)
        }
        fn save_checkpoint(&self, checkpoint: &ActiveCheckpoint) -> Result<()> {
            self.0.save_checkpoint(checkpoint)
        }
        fn load_checkpoint(&self) -> Result<Option<ActiveCheckpoint>> {
            self.0.load_checkpoint()
        }
        fn clear_checkpoint(&self) -> Result<()> {
            self.0.clear_checkpoint()
        }
        fn contains_session(&self, executable_name: &str, start: DateTime<Utc>) -> Result<bool> {
            self.0.contains_session(executable_name, start)
        }
        fn delete_before(&self, table: TrackedTable, cutoff: NaiveDate) -> Result<usize> {
            if table == TrackedTable::Sessions {
                bail!("disk I/O error");
            }
            self.0.delete_before(table, cutoff)
        }
        fn compact(&self) -> Result<()> {
            bail!("database is locked")
        }
        fn overview(&self) -> Result<StoreOverview> {
            self.0.overview()
        }
        fn clear_date(&self, date: NaiveDate) -> Result<usize> {
            self.0.clear_date(date)
        }
        fn clear_all(&self) -> Result<usize> {
            self.0.clear_all()
        }
    }

    #[test]
    fn failures_are_isolated_per_table() -> Result<()> {
        let store = BrokenSessions(SqliteUsageStore::open_in_memory()?);
        store.record_sessions(&[write("chrome.exe", "a", day(1), 10, Some("a"))])?;

        let report = apply_retention(&store, day(10), 7);
        assert_eq!(report.failed, vec![TrackedTable::Sessions]);
        assert_eq!(report.total_deleted(), 2);
        assert!(!report.compacted);
        assert_eq!(store.overview()?.session_count, 1);
        assert!(store.app_stats_since(day(1))?.is_empty());
        Ok(())
    }
}
