pub mod export;
pub mod manage;
pub mod process;
pub mod stats;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use export::{ExportCommand, process_export_command};
use manage::{
    BreakCommand, BrowserCommand, LimitCommand, PomodoroCommand, WhitelistCommand,
    process_break_command, process_browser_command, process_limit_command,
    process_pomodoro_command, process_whitelist_command,
};
use process::{is_daemon_running, kill_daemons, start_daemon_process};
use stats::{StatsCommand, process_stats_command};
use status::StatusReport;
use tracing::{info, level_filters::LevelFilter};

use crate::{
    config::SettingsHandle,
    daemon::{pomodoro::PomodoroTimer, start_daemon},
    storage::usage_store::{SqliteUsageStore, UsageStore},
    utils::{
        dir::create_application_default_path,
        logging::{CLI_PREFIX, enable_logging},
    },
};

#[derive(Parser, Debug)]
#[command(name = "focuslog", version, long_about = None)]
#[command(about = "Tracks which window has focus and reports where the day went", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum ClearScope {
    #[command(about = "Delete everything recorded today")]
    Today,
    #[command(about = "Delete all tracked data")]
    All {
        #[arg(long, help = "Confirm deleting everything")]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Agree to tracking and start the daemon")]
    Init,
    #[command(about = "Start the daemon if it isn't running")]
    Start,
    #[command(about = "Stop currently running daemon")]
    Stop,
    #[command(
        about = "Run the tracker directly in current console. Used for debugging"
    )]
    Serve,
    #[command(about = "Show daemon state and today's usage")]
    Status {
        #[arg(long, help = "Print the status as JSON")]
        json: bool,
    },
    #[command(about = "Display usage summary for a day or a period")]
    Stats {
        #[command(flatten)]
        command: StatsCommand,
    },
    #[command(about = "Export recorded sessions as CSV")]
    Export {
        #[command(flatten)]
        command: ExportCommand,
    },
    #[command(about = "Stop recording until resumed")]
    Pause,
    Resume,
    #[command(about = "Show or change how many days of data are kept")]
    Retention { days: Option<u32> },
    #[command(subcommand, about = "Executables that are never tracked")]
    Whitelist(WhitelistCommand),
    #[command(subcommand, about = "Daily usage limits")]
    Limit(LimitCommand),
    #[command(subcommand, about = "Executables whose titles are tracked as sites")]
    Browser(BrowserCommand),
    #[command(subcommand, about = "Break reminders")]
    Break(BreakCommand),
    #[command(subcommand)]
    Pomodoro(PomodoroCommand),
    #[command(subcommand, about = "Delete tracked data")]
    Clear(ClearScope),
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();
    let app_dir = args
        .dir
        .clone()
        .map_or_else(create_application_default_path, Ok)?;

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &app_dir, logging_level, args.log)?;

    let settings = SettingsHandle::open_in(&app_dir)?;
    let explicit_dir = args.dir.as_deref();

    match args.commands {
        Commands::Init => {
            settings.update(|s| {
                s.grant_consent(Utc::now());
                Ok(())
            })?;
            println!("Tracking enabled. Data stays in {}", app_dir.display());
            restart_daemon(explicit_dir)
        }
        Commands::Start => {
            ensure!(
                settings.current().consent_granted,
                "Tracking isn't enabled yet. Run `focuslog init` first"
            );
            if is_daemon_running()? {
                println!("Daemon is already running");
                return Ok(());
            }
            start_daemon_process(explicit_dir)?;
            println!("Daemon started");
            Ok(())
        }
        Commands::Stop => {
            let stopped = kill_daemons()?;
            println!("Stopped {stopped} daemon(s)");
            Ok(())
        }
        Commands::Serve => start_daemon(&app_dir).await,
        Commands::Status { json } => {
            let store = open_store(&app_dir)?;
            let status = StatusReport::collect(
                &store,
                &settings.current(),
                is_daemon_running()?,
                PomodoroTimer::in_dir(&app_dir).status(Utc::now())?,
                Local::now().date_naive(),
            )?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", status.render());
            }
            Ok(())
        }
        Commands::Stats { command } => process_stats_command(command, &open_store(&app_dir)?),
        Commands::Export { command } => process_export_command(command, &open_store(&app_dir)?),
        Commands::Pause => {
            set_paused(&settings, true)?;
            println!("Tracking paused");
            Ok(())
        }
        Commands::Resume => {
            set_paused(&settings, false)?;
            println!("Tracking resumed");
            Ok(())
        }
        Commands::Retention { days } => {
            match days {
                Some(days) => {
                    settings.update(|s| s.set_retention_days(days))?;
                    println!("Keeping {days} days of data");
                }
                None => println!("Keeping {} days of data", settings.current().retention_days()),
            }
            Ok(())
        }
        Commands::Whitelist(command) => process_whitelist_command(command, &settings),
        Commands::Limit(command) => process_limit_command(command, &settings),
        Commands::Browser(command) => process_browser_command(command, &settings),
        Commands::Break(command) => process_break_command(command, &settings),
        Commands::Pomodoro(command) => {
            process_pomodoro_command(command, &settings, &PomodoroTimer::in_dir(&app_dir))
        }
        Commands::Clear(scope) => {
            let store = open_store(&app_dir)?;
            let deleted = clear(&store, scope)?;
            println!("Deleted {deleted} rows");
            Ok(())
        }
    }
}

fn open_store(app_dir: &Path) -> Result<SqliteUsageStore> {
    SqliteUsageStore::open_in(app_dir).context("Failed to open usage database")
}

fn restart_daemon(dir: Option<&Path>) -> Result<()> {
    let stopped = kill_daemons()?;
    if stopped > 0 {
        info!("Stopped {stopped} previous daemons");
    }
    start_daemon_process(dir)?;
    println!("Daemon started");
    Ok(())
}

fn set_paused(settings: &SettingsHandle, paused: bool) -> Result<()> {
    settings.update(|s| {
        s.paused = paused;
        Ok(())
    })
}

fn clear(store: &dyn UsageStore, scope: ClearScope) -> Result<usize> {
    let deleted = match scope {
        ClearScope::Today => store.clear_date(Local::now().date_naive())?,
        ClearScope::All { yes } => {
            ensure!(yes, "Pass --yes to delete all tracked data");
            store.clear_all()?
        }
    };
    store.compact()?;
    Ok(deleted)
}
