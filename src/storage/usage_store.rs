use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::utils::time::{date_key, parse_date_key};

use super::entities::{
    ActiveCheckpoint, AppDailyStat, BrowsingDailyStat, OpenSession, Session, SessionWrite,
    StoreOverview, TrackedTable,
};

pub const DATABASE_FILE_NAME: &str = "usage.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  app_name TEXT NOT NULL,
  exe_name TEXT NOT NULL,
  window_title TEXT NOT NULL,
  start_time INTEGER NOT NULL,
  end_time INTEGER,
  duration_secs INTEGER NOT NULL,
  date TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_date ON sessions(date);
CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(exe_name, start_time);

CREATE TABLE IF NOT EXISTS apps_daily (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  date TEXT NOT NULL,
  app_name TEXT NOT NULL,
  exe_name TEXT NOT NULL,
  total_secs INTEGER NOT NULL DEFAULT 0,
  open_count INTEGER NOT NULL DEFAULT 0,
  UNIQUE(date, exe_name)
);

CREATE TABLE IF NOT EXISTS browsing_daily (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  date TEXT NOT NULL,
  title TEXT NOT NULL,
  total_secs INTEGER NOT NULL DEFAULT 0,
  visit_count INTEGER NOT NULL DEFAULT 0,
  UNIQUE(date, title)
);

CREATE TABLE IF NOT EXISTS active_session (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  app_name TEXT NOT NULL,
  exe_name TEXT NOT NULL,
  window_title TEXT NOT NULL,
  start_time INTEGER NOT NULL,
  last_seen INTEGER NOT NULL,
  date TEXT NOT NULL
);
"#;

/// Durable home of sessions, daily aggregates and the active-session checkpoint.
///
/// Every method is a short synchronous call. Async callers are expected to move them onto a
/// blocking thread.
pub trait UsageStore: Send + Sync {
    /// Persists a batch of closed sessions and folds each one into the daily aggregates.
    /// Either the whole batch lands or nothing does.
    fn record_sessions(&self, batch: &[SessionWrite]) -> Result<()>;

    fn app_stats_for(&self, date: NaiveDate) -> Result<Vec<AppDailyStat>>;

    /// Aggregate rows dated on or after `cutoff`.
    fn app_stats_since(&self, cutoff: NaiveDate) -> Result<Vec<AppDailyStat>>;

    fn browsing_stats_for(&self, date: NaiveDate) -> Result<Vec<BrowsingDailyStat>>;

    fn browsing_stats_since(&self, cutoff: NaiveDate) -> Result<Vec<BrowsingDailyStat>>;

    /// Raw sessions dated within `from..=to`, ordered by start.
    fn sessions_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Session>>;

    /// Replaces the single checkpoint slot.
    fn save_checkpoint(&self, checkpoint: &ActiveCheckpoint) -> Result<()>;

    /// Fails when the stored slot can't be turned back into a checkpoint.
    fn load_checkpoint(&self) -> Result<Option<ActiveCheckpoint>>;

    fn clear_checkpoint(&self) -> Result<()>;

    /// True when a session of `executable_name` that started at `start` is already stored.
    fn contains_session(&self, executable_name: &str, start: DateTime<Utc>) -> Result<bool>;

    /// Deletes rows of `table` dated strictly before `cutoff`. Returns the number of deleted rows.
    fn delete_before(&self, table: TrackedTable, cutoff: NaiveDate) -> Result<usize>;

    /// Reclaims space after deletions.
    fn compact(&self) -> Result<()>;

    fn overview(&self) -> Result<StoreOverview>;

    /// Removes every row dated `date` from all tracked tables.
    fn clear_date(&self, date: NaiveDate) -> Result<usize>;

    /// Removes all tracking rows including the checkpoint.
    fn clear_all(&self) -> Result<usize>;
}

/// [UsageStore] backed by a single SQLite file.
pub struct SqliteUsageStore {
    connection: Mutex<Connection>,
}

impl SqliteUsageStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let connection =
            Connection::open(path).with_context(|| format!("Failed to open database {path:?}"))?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        connection.execute_batch("PRAGMA journal_mode = WAL;\nPRAGMA synchronous = NORMAL;")?;
        Self::init(connection)
    }

    pub fn open_in(app_dir: &Path) -> Result<Self> {
        Self::open(&app_dir.join(DATABASE_FILE_NAME))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(connection: Connection) -> Result<Self> {
        connection
            .execute_batch(SCHEMA)
            .context("Failed to initialize schema")?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn query_app_stats(&self, condition: &str, date: NaiveDate) -> Result<Vec<AppDailyStat>> {
        let connection = self.connection();
        let mut statement = connection.prepare(&format!(
            "SELECT date, app_name, exe_name, total_secs, open_count FROM apps_daily
             WHERE {condition} ORDER BY date, total_secs DESC, exe_name"
        ))?;
        let rows = statement
            .query_map(params![date_key(date)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(date, app_name, executable_name, total_secs, open_count)| {
                Ok(AppDailyStat {
                    date: parse_date_key(&date)?,
                    app_name,
                    executable_name,
                    total_secs,
                    open_count,
                })
            })
            .collect()
    }

    fn query_browsing_stats(
        &self,
        condition: &str,
        date: NaiveDate,
    ) -> Result<Vec<BrowsingDailyStat>> {
        let connection = self.connection();
        let mut statement = connection.prepare(&format!(
            "SELECT date, title, total_secs, visit_count FROM browsing_daily
             WHERE {condition} ORDER BY date, total_secs DESC, title"
        ))?;
        let rows = statement
            .query_map(params![date_key(date)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(date, title, total_secs, visit_count)| {
                Ok(BrowsingDailyStat {
                    date: parse_date_key(&date)?,
                    title,
                    total_secs,
                    visit_count,
                })
            })
            .collect()
    }
}

fn instant(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).with_context(|| format!("Timestamp {secs} out of range"))
}

impl UsageStore for SqliteUsageStore {
    fn record_sessions(&self, batch: &[SessionWrite]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut connection = self.connection();
        let transaction = connection.transaction()?;
        for SessionWrite {
            session,
            browsing_key,
        } in batch
        {
            let date = date_key(session.date);
            transaction.execute(
                "INSERT INTO sessions
                 (app_name, exe_name, window_title, start_time, end_time, duration_secs, date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    session.app_name.as_ref(),
                    session.executable_name.as_ref(),
                    session.window_title.as_ref(),
                    session.start.timestamp(),
                    session.end.map(|v| v.timestamp()),
                    session.duration_secs,
                    date,
                ],
            )?;
            transaction.execute(
                "INSERT INTO apps_daily (date, app_name, exe_name, total_secs, open_count)
                 VALUES (?1, ?2, ?3, ?4, 1)
                 ON CONFLICT(date, exe_name) DO UPDATE SET
                   app_name = excluded.app_name,
                   total_secs = total_secs + excluded.total_secs,
                   open_count = open_count + 1",
                params![
                    date,
                    session.app_name.as_ref(),
                    session.executable_name.as_ref(),
                    session.duration_secs,
                ],
            )?;
            if let Some(title) = browsing_key {
                transaction.execute(
                    "INSERT INTO browsing_daily (date, title, total_secs, visit_count)
                     VALUES (?1, ?2, ?3, 1)
                     ON CONFLICT(date, title) DO UPDATE SET
                       total_secs = total_secs + excluded.total_secs,
                       visit_count = visit_count + 1",
                    params![date, title, session.duration_secs],
                )?;
            }
        }
        transaction.commit()?;
        debug!("Recorded {} sessions", batch.len());
        Ok(())
    }

    fn app_stats_for(&self, date: NaiveDate) -> Result<Vec<AppDailyStat>> {
        self.query_app_stats("date = ?1", date)
    }

    fn app_stats_since(&self, cutoff: NaiveDate) -> Result<Vec<AppDailyStat>> {
        self.query_app_stats("date >= ?1", cutoff)
    }

    fn browsing_stats_for(&self, date: NaiveDate) -> Result<Vec<BrowsingDailyStat>> {
        self.query_browsing_stats("date = ?1", date)
    }

    fn browsing_stats_since(&self, cutoff: NaiveDate) -> Result<Vec<BrowsingDailyStat>> {
        self.query_browsing_stats("date >= ?1", cutoff)
    }

    fn sessions_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Session>> {
        let connection = self.connection();
        let mut statement = connection.prepare(
            "SELECT app_name, exe_name, window_title, start_time, end_time, duration_secs, date
             FROM sessions WHERE date >= ?1 AND date <= ?2 ORDER BY start_time, id",
        )?;
        let rows = statement
            .query_map(params![date_key(from), date_key(to)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(app_name, exe_name, title, start, end, duration_secs, date)| {
                Ok(Session {
                    app_name: app_name.into(),
                    executable_name: exe_name.into(),
                    window_title: title.into(),
                    start: instant(start)?,
                    end: end.map(instant).transpose()?,
                    duration_secs,
                    date: parse_date_key(&date)?,
                })
            })
            .collect()
    }

    fn save_checkpoint(&self, checkpoint: &ActiveCheckpoint) -> Result<()> {
        let session = &checkpoint.session;
        self.connection().execute(
            "INSERT OR REPLACE INTO active_session
             (id, app_name, exe_name, window_title, start_time, last_seen, date)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.app_name.as_ref(),
                session.executable_name.as_ref(),
                session.window_title.as_ref(),
                session.start.timestamp(),
                checkpoint.last_seen.timestamp(),
                date_key(session.date),
            ],
        )?;
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<Option<ActiveCheckpoint>> {
        let row = self
            .connection()
            .query_row(
                "SELECT app_name, exe_name, window_title, start_time, last_seen, date
                 FROM active_session WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((app_name, exe_name, title, start, last_seen, date)) = row else {
            return Ok(None);
        };

        Ok(Some(ActiveCheckpoint {
            session: OpenSession {
                app_name: app_name.into(),
                executable_name: exe_name.into(),
                window_title: title.into(),
                start: instant(start)?,
                date: parse_date_key(&date)?,
            },
            last_seen: instant(last_seen)?,
        }))
    }

    fn clear_checkpoint(&self) -> Result<()> {
        self.connection()
            .execute("DELETE FROM active_session", [])?;
        Ok(())
    }

    fn contains_session(&self, executable_name: &str, start: DateTime<Utc>) -> Result<bool> {
        let found = self
            .connection()
            .query_row(
                "SELECT 1 FROM sessions WHERE exe_name = ?1 AND start_time = ?2 LIMIT 1",
                params![executable_name, start.timestamp()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn delete_before(&self, table: TrackedTable, cutoff: NaiveDate) -> Result<usize> {
        let deleted = self.connection().execute(
            &format!("DELETE FROM {} WHERE date < ?1", table.table_name()),
            params![date_key(cutoff)],
        )?;
        Ok(deleted)
    }

    fn compact(&self) -> Result<()> {
        self.connection().execute_batch("VACUUM;")?;
        info!("Compacted database");
        Ok(())
    }

    fn overview(&self) -> Result<StoreOverview> {
        let (oldest_date, session_count) = self.connection().query_row(
            "SELECT MIN(date), COUNT(*) FROM sessions",
            [],
            |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(StoreOverview {
            oldest_date: oldest_date.as_deref().map(parse_date_key).transpose()?,
            session_count,
        })
    }

    fn clear_date(&self, date: NaiveDate) -> Result<usize> {
        let mut connection = self.connection();
        let transaction = connection.transaction()?;
        let mut deleted = 0;
        for table in TrackedTable::ALL {
            deleted += transaction.execute(
                &format!("DELETE FROM {} WHERE date = ?1", table.table_name()),
                params![date_key(date)],
            )?;
        }
        transaction.commit()?;
        Ok(deleted)
    }

    fn clear_all(&self) -> Result<usize> {
        let mut connection = self.connection();
        let transaction = connection.transaction()?;
        let mut deleted = 0;
        for table in TrackedTable::ALL {
            deleted += transaction.execute(&format!("DELETE FROM {}", table.table_name()), [])?;
        }
        transaction.execute("DELETE FROM active_session", [])?;
        transaction.commit()?;
        Ok(deleted)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use anyhow::Result;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use tempfile::tempdir;

    use crate::storage::entities::{
        ActiveCheckpoint, OpenSession, Session, SessionWrite, TrackedTable,
    };

    use super::{SqliteUsageStore, UsageStore};

    pub fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    pub fn write(
        exe: &str,
        title: &str,
        date: NaiveDate,
        secs: i64,
        browsing_key: Option<&str>,
    ) -> SessionWrite {
        let start = date.and_hms_opt(9, 0, 0).unwrap().and_utc();
        SessionWrite {
            session: Session {
                app_name: exe.trim_end_matches(".exe").into(),
                executable_name: exe.into(),
                window_title: title.into(),
                start,
                end: Some(start + Duration::seconds(secs)),
                duration_secs: secs,
                date,
            },
            browsing_key: browsing_key.map(|v| v.to_string()),
        }
    }

    #[test]
    fn aggregates_are_additive() -> Result<()> {
        let store = SqliteUsageStore::open_in_memory()?;
        store.record_sessions(&[
            write("notepad.exe", "a.txt", day(1), 40, None),
            write("notepad.exe", "b.txt", day(1), 20, None),
            write("chrome.exe", "GitHub - Chrome", day(1), 30, Some("GitHub")),
        ])?;
        store.record_sessions(&[write(
            "chrome.exe",
            "GitHub - Chrome",
            day(1),
            10,
            Some("GitHub"),
        )])?;

        let apps = store.app_stats_for(day(1))?;
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].executable_name, "notepad.exe");
        assert_eq!(apps[0].total_secs, 60);
        assert_eq!(apps[0].open_count, 2);
        assert_eq!(apps[1].total_secs, 40);

        let browsing = store.browsing_stats_for(day(1))?;
        assert_eq!(browsing.len(), 1);
        assert_eq!(browsing[0].title, "GitHub");
        assert_eq!(browsing[0].total_secs, 40);
        assert_eq!(browsing[0].visit_count, 2);

        assert_eq!(store.sessions_between(day(1), day(1))?.len(), 4);
        assert!(store.app_stats_for(day(2))?.is_empty());
        Ok(())
    }

    #[test]
    fn checkpoint_slot_holds_one_row() -> Result<()> {
        let store = SqliteUsageStore::open_in_memory()?;
        assert_eq!(store.load_checkpoint()?, None);

        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut checkpoint = ActiveCheckpoint {
            session: OpenSession {
                app_name: "Code".into(),
                executable_name: "code.exe".into(),
                window_title: "main.rs".into(),
                start,
                date: day(1),
            },
            last_seen: start + Duration::seconds(30),
        };
        store.save_checkpoint(&checkpoint)?;
        checkpoint.last_seen = start + Duration::seconds(60);
        store.save_checkpoint(&checkpoint)?;

        assert_eq!(store.load_checkpoint()?, Some(checkpoint));
        store.clear_checkpoint()?;
        assert_eq!(store.load_checkpoint()?, None);
        Ok(())
    }

    /// Leaves a checkpoint row whose date key can't be parsed.
    pub fn corrupt_checkpoint(store: &SqliteUsageStore) -> Result<()> {
        store.connection().execute(
            "INSERT OR REPLACE INTO active_session
             (id, app_name, exe_name, window_title, start_time, last_seen, date)
             VALUES (1, 'VS Code', 'code.exe', 'main.rs', 1714557600, 1714557690, '01/05/2024')",
            [],
        )?;
        Ok(())
    }

    #[test]
    fn stored_sessions_are_found_by_start() -> Result<()> {
        let store = SqliteUsageStore::open_in_memory()?;
        let written = write("code.exe", "main.rs", day(1), 60, None);
        let start = written.session.start;
        store.record_sessions(&[written])?;

        assert!(store.contains_session("code.exe", start)?);
        assert!(!store.contains_session("slack.exe", start)?);
        assert!(!store.contains_session("code.exe", start + Duration::seconds(1))?);
        Ok(())
    }

    #[test]
    fn delete_before_keeps_cutoff_date() -> Result<()> {
        let store = SqliteUsageStore::open_in_memory()?;
        store.record_sessions(&[
            write("chrome.exe", "old", day(1), 10, Some("old")),
            write("chrome.exe", "edge", day(2), 10, Some("edge")),
            write("chrome.exe", "new", day(3), 10, Some("new")),
        ])?;

        assert_eq!(store.delete_before(TrackedTable::Sessions, day(2))?, 1);
        assert_eq!(store.delete_before(TrackedTable::AppsDaily, day(2))?, 1);
        assert_eq!(store.delete_before(TrackedTable::BrowsingDaily, day(2))?, 1);
        store.compact()?;

        let overview = store.overview()?;
        assert_eq!(overview.oldest_date, Some(day(2)));
        assert_eq!(overview.session_count, 2);
        assert_eq!(store.browsing_stats_since(day(1))?.len(), 2);
        Ok(())
    }

    #[test]
    fn clearing_removes_rows_everywhere() -> Result<()> {
        let store = SqliteUsageStore::open_in_memory()?;
        store.record_sessions(&[
            write("chrome.exe", "a", day(1), 10, Some("a")),
            write("chrome.exe", "b", day(2), 10, Some("b")),
        ])?;

        assert_eq!(store.clear_date(day(2))?, 3);
        assert!(store.app_stats_for(day(2))?.is_empty());
        assert_eq!(store.app_stats_since(day(1))?.len(), 1);

        store.clear_all()?;
        assert_eq!(store.overview()?.session_count, 0);
        assert_eq!(store.overview()?.oldest_date, None);
        Ok(())
    }

    #[test]
    fn data_survives_reopening() -> Result<()> {
        let dir = tempdir()?;
        {
            let store = SqliteUsageStore::open_in(dir.path())?;
            store.record_sessions(&[write("code.exe", "main.rs", day(4), 90, None)])?;
        }
        let store = SqliteUsageStore::open_in(dir.path())?;
        assert_eq!(store.app_stats_for(day(4))?[0].total_secs, 90);
        Ok(())
    }
}
