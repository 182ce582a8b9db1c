//! Turns the daily aggregates into ranked summaries. Raw sessions are never read here.

use std::collections::HashMap;

use anyhow::{Result, ensure};
use chrono::NaiveDate;
use serde::Serialize;

use crate::{
    classify::categories::{BrowsingGroup, CategoryTable},
    storage::{
        entities::{AppDailyStat, BrowsingDailyStat},
        usage_store::UsageStore,
    },
    utils::time::{date_key, days_before},
};

pub const TOP_ENTRIES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppUsage {
    pub app_name: String,
    pub executable_name: String,
    pub total_secs: i64,
    pub open_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteUsage {
    pub title: String,
    pub total_secs: i64,
    pub visit_count: i64,
}

/// Dates a period summary asked for and the dates it actually found data for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub requested_start: NaiveDate,
    pub requested_end: NaiveDate,
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl Coverage {
    /// True when the data starts later than the window does, e.g. for a new user.
    pub fn is_partial(&self) -> bool {
        self.first > self.requested_start
    }

    pub fn message(&self) -> String {
        if self.is_partial() {
            format!(
                "Note: You are a new user. Displaying available data from {} to {}.",
                date_key(self.first),
                date_key(self.last)
            )
        } else {
            format!("Data period: {} to {}", date_key(self.first), date_key(self.last))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub label: String,
    pub total_secs: i64,
    pub app_count: usize,
    pub top_apps: Vec<AppUsage>,
    pub top_sites: Vec<SiteUsage>,
    pub categories: Vec<BrowsingGroup>,
    /// Only set for summaries spanning several days that found any data.
    pub coverage: Option<Coverage>,
}

pub struct Aggregator<'a> {
    store: &'a dyn UsageStore,
    categories: CategoryTable,
}

impl<'a> Aggregator<'a> {
    pub fn new(store: &'a dyn UsageStore, categories: CategoryTable) -> Self {
        Self { store, categories }
    }

    pub fn daily_summary(&self, date: NaiveDate) -> Result<Summary> {
        let apps = self.store.app_stats_for(date)?;
        let sites = self.store.browsing_stats_for(date)?;
        Ok(self.summarize(date_key(date), apps, sites))
    }

    /// Summary over the `days` calendar days ending with `today`. A single day is the same as
    /// [Self::daily_summary].
    pub fn period_summary(&self, days: u32, today: NaiveDate) -> Result<Summary> {
        ensure!(days > 0, "A summary has to cover at least one day");
        if days == 1 {
            return self.daily_summary(today);
        }

        let cutoff = days_before(today, days - 1);
        let in_window = |date: &NaiveDate| *date >= cutoff && *date <= today;
        let apps = self
            .store
            .app_stats_since(cutoff)?
            .into_iter()
            .filter(|v| in_window(&v.date))
            .collect::<Vec<_>>();
        let sites = self
            .store
            .browsing_stats_since(cutoff)?
            .into_iter()
            .filter(|v| in_window(&v.date))
            .collect::<Vec<_>>();

        let dates = apps.iter().map(|v| v.date).chain(sites.iter().map(|v| v.date));
        let coverage = dates
            .clone()
            .min()
            .zip(dates.max())
            .map(|(first, last)| Coverage {
                requested_start: cutoff,
                requested_end: today,
                first,
                last,
            });

        let mut summary = self.summarize(format!("Last {days} days"), apps, sites);
        summary.coverage = coverage;
        Ok(summary)
    }

    fn summarize(
        &self,
        label: String,
        apps: Vec<AppDailyStat>,
        sites: Vec<BrowsingDailyStat>,
    ) -> Summary {
        let apps = merge_apps(apps);
        let sites = merge_sites(sites);
        let categories = self
            .categories
            .group(sites.iter().map(|v| (v.title.as_str(), v.total_secs)));

        Summary {
            label,
            total_secs: apps.iter().map(|v| v.total_secs).sum(),
            app_count: apps.len(),
            top_apps: apps.into_iter().take(TOP_ENTRIES).collect(),
            top_sites: sites.into_iter().take(TOP_ENTRIES).collect(),
            categories,
            coverage: None,
        }
    }
}

/// Sums rows of the same executable across days, ranked by total time.
fn merge_apps(rows: Vec<AppDailyStat>) -> Vec<AppUsage> {
    let mut map = HashMap::<String, (NaiveDate, AppUsage)>::new();
    for row in rows {
        let (latest, usage) = map.entry(row.executable_name.clone()).or_insert_with(|| {
            (
                row.date,
                AppUsage {
                    app_name: row.app_name.clone(),
                    executable_name: row.executable_name.clone(),
                    total_secs: 0,
                    open_count: 0,
                },
            )
        });
        usage.total_secs += row.total_secs;
        usage.open_count += row.open_count;
        // The display name of the most recent day wins.
        if row.date > *latest {
            *latest = row.date;
            usage.app_name = row.app_name;
        }
    }

    let mut usages = map.into_values().map(|(_, v)| v).collect::<Vec<_>>();
    usages.sort_by(|a, b| {
        b.total_secs
            .cmp(&a.total_secs)
            .then_with(|| a.executable_name.cmp(&b.executable_name))
    });
    usages
}

fn merge_sites(rows: Vec<BrowsingDailyStat>) -> Vec<SiteUsage> {
    let mut map = HashMap::<String, SiteUsage>::new();
    for row in rows {
        let usage = map.entry(row.title.clone()).or_insert_with(|| SiteUsage {
            title: row.title,
            total_secs: 0,
            visit_count: 0,
        });
        usage.total_secs += row.total_secs;
        usage.visit_count += row.visit_count;
    }

    let mut usages = map.into_values().collect::<Vec<_>>();
    usages.sort_by(|a, b| {
        b.total_secs
            .cmp(&a.total_secs)
            .then_with(|| a.title.cmp(&b.title))
    });
    usages
}
