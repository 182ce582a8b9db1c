use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Sessions shorter than this are dropped instead of being persisted.
pub const MIN_SESSION_SECS: i64 = 1;

/// Session that is still receiving focus. Only the tracker holds one of these, and the
/// checkpoint slot mirrors it on disk.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct OpenSession {
    pub app_name: Arc<str>,
    pub executable_name: Arc<str>,
    pub window_title: Arc<str>,
    pub start: DateTime<Utc>,
    /// Local calendar date at `start`. A session belongs to the day it started on.
    pub date: NaiveDate,
}

impl OpenSession {
    /// Turns the open session into a finished one. Returns `None` when it lasted less than
    /// [MIN_SESSION_SECS], including clock jumps that make `end` precede `start`.
    pub fn close(self, end: DateTime<Utc>) -> Option<Session> {
        let duration_secs = (end - self.start).num_seconds();
        if duration_secs < MIN_SESSION_SECS {
            return None;
        }
        Some(Session {
            app_name: self.app_name,
            executable_name: self.executable_name,
            window_title: self.window_title,
            start: self.start,
            end: Some(end),
            duration_secs,
            date: self.date,
        })
    }
}

/// One contiguous interval during which a single executable held focus.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct Session {
    pub app_name: Arc<str>,
    pub executable_name: Arc<str>,
    pub window_title: Arc<str>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub duration_secs: i64,
    pub date: NaiveDate,
}

/// A closed session together with the browsing key it contributes to, if its executable is a
/// browser.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct SessionWrite {
    pub session: Session,
    pub browsing_key: Option<String>,
}

/// Durable mirror of the tracker's open session, refreshed periodically.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct ActiveCheckpoint {
    pub session: OpenSession,
    pub last_seen: DateTime<Utc>,
}

impl ActiveCheckpoint {
    /// The session as it looked the last time the tracker was known to be alive.
    pub fn into_session(self) -> Option<Session> {
        self.session.close(self.last_seen)
    }
}

/// Per (date, executable) totals.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct AppDailyStat {
    pub date: NaiveDate,
    pub app_name: String,
    pub executable_name: String,
    pub total_secs: i64,
    pub open_count: i64,
}

/// Per (date, cleaned title) totals of browser sessions.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct BrowsingDailyStat {
    pub date: NaiveDate,
    pub title: String,
    pub total_secs: i64,
    pub visit_count: i64,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum TrackedTable {
    Sessions,
    AppsDaily,
    BrowsingDaily,
}

impl TrackedTable {
    pub const ALL: [TrackedTable; 3] = [
        TrackedTable::Sessions,
        TrackedTable::AppsDaily,
        TrackedTable::BrowsingDaily,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            TrackedTable::Sessions => "sessions",
            TrackedTable::AppsDaily => "apps_daily",
            TrackedTable::BrowsingDaily => "browsing_daily",
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct StoreOverview {
    pub oldest_date: Option<NaiveDate>,
    pub session_count: i64,
}
