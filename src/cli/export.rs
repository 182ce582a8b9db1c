use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
};

use anyhow::{Context, Result, ensure};
use chrono::{Local, NaiveDate, SecondsFormat};
use clap::Parser;
use tracing::info;

use crate::{
    storage::{entities::Session, usage_store::UsageStore},
    utils::time::date_key,
};

use super::stats::{DateStyle, parse_natural_date};

pub const CSV_HEADER: &str = "date,app,executable,title,start,end,duration_secs";

#[derive(Debug, Parser)]
pub struct ExportCommand {
    #[arg(long, help = "First day to export. Defaults to the oldest stored day")]
    from: Option<String>,
    #[arg(long, help = "Last day to export. Defaults to today")]
    to: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing")]
    date_style: DateStyle,
    #[arg(long, short, help = "Write into a file instead of stdout")]
    output: Option<PathBuf>,
}

pub fn process_export_command(command: ExportCommand, store: &dyn UsageStore) -> Result<()> {
    let today = Local::now().date_naive();
    let from = match command.from {
        Some(v) => parse_natural_date(&v, command.date_style)?,
        None => store.overview()?.oldest_date.unwrap_or(today),
    };
    let to = match command.to {
        Some(v) => parse_natural_date(&v, command.date_style)?,
        None => today,
    };

    let sessions = sessions_in_range(store, from, to)?;
    match command.output {
        Some(path) => {
            let file =
                File::create(&path).with_context(|| format!("Failed to create {path:?}"))?;
            let mut writer = BufWriter::new(file);
            write_csv(&mut writer, &sessions)?;
            writer.flush()?;
            info!("Exported {} sessions into {path:?}", sessions.len());
            println!("Exported {} sessions to {}", sessions.len(), path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            write_csv(&mut lock, &sessions)?;
        }
    }
    Ok(())
}

fn sessions_in_range(
    store: &dyn UsageStore,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<Session>> {
    ensure!(
        from <= to,
        "Start of the range {} is after its end {}",
        date_key(from),
        date_key(to)
    );
    store.sessions_between(from, to)
}

pub fn write_csv(out: &mut impl Write, sessions: &[Session]) -> Result<()> {
    writeln!(out, "{CSV_HEADER}")?;
    for session in sessions {
        let end = session
            .end
            .map(|v| v.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();
        writeln!(
            out,
            "{},{},{},{},{},{},{}",
            date_key(session.date),
            csv_escape(&session.app_name),
            csv_escape(&session.executable_name),
            csv_escape(&session.window_title),
            session.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            end,
            session.duration_secs
        )?;
    }
    Ok(())
}

/// Quotes a field when it holds a separator, a quote or a line break.
pub fn csv_escape(value: &str) -> String {
    let needs_quote = value.contains([',', '"', '\n', '\r']);
    if needs_quote {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
