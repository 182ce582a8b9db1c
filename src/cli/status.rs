use std::fmt::Write;

use ansi_term::{Colour, Style};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::{
    classify::categories::CategoryTable,
    config::Settings,
    daemon::pomodoro::PomodoroStatus,
    report::{Aggregator, AppUsage},
    storage::usage_store::UsageStore,
    utils::time::date_key,
};

use super::stats::{format_duration, format_secs};

const STATUS_TOP_APPS: usize = 5;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub daemon_running: bool,
    pub paused: bool,
    pub consent_granted: bool,
    pub consent_timestamp: Option<DateTime<Utc>>,
    pub retention_days: u32,
    pub today_total_secs: i64,
    pub today_top_apps: Vec<AppUsage>,
    pub oldest_date: Option<NaiveDate>,
    pub session_count: i64,
    #[serde(skip)]
    pub pomodoro: Option<PomodoroStatus>,
}

impl StatusReport {
    pub fn collect(
        store: &dyn UsageStore,
        settings: &Settings,
        daemon_running: bool,
        pomodoro: PomodoroStatus,
        today: NaiveDate,
    ) -> Result<Self> {
        let summary = Aggregator::new(store, CategoryTable::default()).daily_summary(today)?;
        let overview = store.overview()?;
        Ok(Self {
            daemon_running,
            paused: settings.paused,
            consent_granted: settings.consent_granted,
            consent_timestamp: settings.consent_timestamp,
            retention_days: settings.retention_days(),
            today_total_secs: summary.total_secs,
            today_top_apps: summary
                .top_apps
                .into_iter()
                .take(STATUS_TOP_APPS)
                .collect(),
            oldest_date: overview.oldest_date,
            session_count: overview.session_count,
            pomodoro: pomodoro.active.then_some(pomodoro),
        })
    }

    pub fn render(&self) -> String {
        let bold = Style::new().bold();
        let mut out = String::new();

        let daemon = if self.daemon_running {
            Colour::Green.paint("running")
        } else {
            Colour::Red.paint("stopped")
        };
        let _ = writeln!(out, "{} {daemon}", bold.paint("Daemon:"));
        let tracking = match (self.consent_granted, self.paused) {
            (false, _) => "not enabled, run `focuslog init`",
            (true, true) => "paused",
            (true, false) => "active",
        };
        let _ = writeln!(out, "{} {tracking}", bold.paint("Tracking:"));
        if let Some(time) = self.consent_timestamp {
            let _ = writeln!(out, "Consent given {}", time.format("%Y-%m-%d %H:%M"));
        }
        let _ = writeln!(out, "Retention: {} days", self.retention_days);
        if let Some(pomodoro) = &self.pomodoro {
            let _ = writeln!(
                out,
                "Pomodoro: {} left of {} minutes",
                format_duration(pomodoro.remaining),
                pomodoro.total_minutes
            );
        }

        let _ = writeln!(
            out,
            "\n{} {}",
            bold.paint("Today:"),
            format_secs(self.today_total_secs)
        );
        for app in &self.today_top_apps {
            let _ = writeln!(out, "  {:>10}  {}", format_secs(app.total_secs), app.app_name);
        }

        let oldest = self
            .oldest_date
            .map(date_key)
            .unwrap_or_else(|| "none".into());
        let _ = writeln!(
            out,
            "\nStored sessions: {} (oldest day {oldest})",
            self.session_count
        );
        out
    }
}
