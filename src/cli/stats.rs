use std::fmt::{self, Display, Write};

use ansi_term::{Colour, Style};
use anyhow::{Result, bail};
use chrono::{Duration, Local, NaiveDate};
use chrono_english::parse_date_string;
use clap::{Parser, ValueEnum};

use crate::{
    classify::categories::CategoryTable,
    report::{Aggregator, Summary},
    storage::usage_store::UsageStore,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

/// Parses dates like "yesterday", "3 days ago" or "15/03/2025" into a local calendar date.
pub fn parse_natural_date(value: &str, style: DateStyle) -> Result<NaiveDate> {
    match parse_date_string(value, Local::now(), style.into()) {
        Ok(v) => Ok(v.date_naive()),
        Err(e) => bail!("Failed to parse date {value:?}: {e}"),
    }
}

fn parse_period(value: &str) -> Result<u32, String> {
    match value {
        "1" | "7" | "30" => value.parse().map_err(|e| format!("{e}")),
        _ => Err(format!("Period must be 1, 7 or 30 days, got {value}")),
    }
}

#[derive(Debug, Parser)]
pub struct StatsCommand {
    #[arg(long, short, default_value = "1", value_parser = parse_period, help = "Number of days to summarize: 1, 7 or 30")]
    days: u32,
    #[arg(
        long,
        help = "Last day of the summary. Examples are \"yesterday\", \"3 days ago\", \"15/03/2025\""
    )]
    date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
    #[arg(long, help = "Print the summary as JSON")]
    json: bool,
}

pub fn process_stats_command(
    StatsCommand {
        days,
        date,
        date_style,
        json,
    }: StatsCommand,
    store: &dyn UsageStore,
) -> Result<()> {
    let last_day = match date {
        Some(date) => parse_natural_date(&date, date_style)?,
        None => Local::now().date_naive(),
    };

    let aggregator = Aggregator::new(store, CategoryTable::default());
    let summary = aggregator.period_summary(days, last_day)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", render_summary(&summary));
    }
    Ok(())
}

pub fn format_duration(v: Duration) -> String {
    if v.num_hours() > 0 {
        format!(
            "{}h{}m{}s",
            v.num_hours(),
            v.num_minutes() % 60,
            v.num_seconds() % 60
        )
    } else if v.num_minutes() > 0 {
        format!("{}m{}s", v.num_minutes() % 60, v.num_seconds() % 60)
    } else {
        format!("{}s", v.num_seconds() % 60)
    }
}

pub fn format_secs(secs: i64) -> String {
    format_duration(Duration::seconds(secs))
}

pub fn render_summary(summary: &Summary) -> String {
    let heading = Style::new().bold();
    let mut out = String::new();

    // Writing into a String can't fail.
    let _ = writeln!(out, "{}", heading.paint(&summary.label));
    if let Some(coverage) = &summary.coverage {
        let colour = if coverage.is_partial() {
            Colour::Yellow.normal()
        } else {
            Style::new().dimmed()
        };
        let _ = writeln!(out, "{}", colour.paint(coverage.message()));
    }

    if summary.app_count == 0 {
        let _ = writeln!(out, "No activity recorded.");
        return out;
    }

    let _ = writeln!(
        out,
        "Total {} across {} apps\n",
        format_secs(summary.total_secs),
        summary.app_count
    );

    let _ = writeln!(out, "{}", heading.paint("Top apps"));
    for app in &summary.top_apps {
        let _ = writeln!(
            out,
            "  {:>10}  {} ({}, opened {}x)",
            format_secs(app.total_secs),
            app.app_name,
            app.executable_name,
            app.open_count
        );
    }

    if !summary.top_sites.is_empty() {
        let _ = writeln!(out, "\n{}", heading.paint("Top sites"));
        for site in &summary.top_sites {
            let _ = writeln!(out, "  {:>10}  {}", format_secs(site.total_secs), site.title);
        }
    }

    if !summary.categories.is_empty() {
        let _ = writeln!(out, "\n{}", heading.paint("Browsing by category"));
        for group in &summary.categories {
            let _ = writeln!(
                out,
                "  {:>10}  {}",
                format_secs(group.total_secs),
                group.category
            );
            for member in &group.members {
                let _ = writeln!(
                    out,
                    "  {:>10}    - {}",
                    format_secs(member.total_secs),
                    member.title
                );
            }
        }
    }
    out
}
