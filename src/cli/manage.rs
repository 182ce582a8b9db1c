//! Subcommands that edit settings or the pomodoro timer. The daemon picks the changes up on its
//! next settings reload.

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;

use crate::{classify::BrowserSet, config::SettingsHandle, daemon::pomodoro::PomodoroTimer};

use super::stats::format_duration;

#[derive(Subcommand, Debug)]
pub enum WhitelistCommand {
    #[command(about = "Never track this executable")]
    Add { executable: String },
    #[command(about = "Track this executable again")]
    Remove { executable: String },
    List,
}

#[derive(Subcommand, Debug)]
pub enum LimitCommand {
    #[command(about = "Set a daily limit in minutes")]
    Set {
        executable: String,
        #[arg(allow_negative_numbers = true)]
        minutes: i64,
    },
    Remove {
        executable: String,
    },
    List,
}

#[derive(Subcommand, Debug)]
pub enum BrowserCommand {
    #[command(about = "Treat an executable as a browser")]
    Add { executable: String },
    Remove { executable: String },
    #[command(about = "List default and custom browsers")]
    List,
}

#[derive(Subcommand, Debug)]
pub enum BreakCommand {
    #[command(about = "Remind to take a break after continuous use")]
    On {
        #[arg(long, allow_negative_numbers = true)]
        minutes: Option<i64>,
    },
    Off,
    #[command(about = "Set how long a dismissed reminder stays quiet")]
    Snooze {
        #[arg(allow_negative_numbers = true)]
        minutes: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum PomodoroCommand {
    #[command(about = "Start a timer. Uses the configured length when none is given")]
    Start {
        #[arg(allow_negative_numbers = true)]
        minutes: Option<i64>,
    },
    Stop,
    Status,
    #[command(about = "Change the default length")]
    Length {
        #[arg(allow_negative_numbers = true)]
        minutes: i64,
    },
}

pub fn process_whitelist_command(command: WhitelistCommand, settings: &SettingsHandle) -> Result<()> {
    match command {
        WhitelistCommand::Add { executable } => {
            if settings.update(|s| s.add_whitelist(&executable))? {
                println!("{executable} won't be tracked anymore");
            } else {
                println!("{executable} is already whitelisted");
            }
        }
        WhitelistCommand::Remove { executable } => {
            if settings.update(|s| Ok(s.remove_whitelist(&executable)))? {
                println!("{executable} will be tracked again");
            } else {
                println!("{executable} wasn't whitelisted");
            }
        }
        WhitelistCommand::List => {
            let current = settings.current();
            if current.whitelist().is_empty() {
                println!("Whitelist is empty");
            }
            for exe in current.whitelist() {
                println!("{exe}");
            }
        }
    }
    Ok(())
}

pub fn process_limit_command(command: LimitCommand, settings: &SettingsHandle) -> Result<()> {
    match command {
        LimitCommand::Set {
            executable,
            minutes,
        } => {
            settings.update(|s| s.set_app_limit(&executable, minutes))?;
            println!("Limit for {executable} set to {minutes} minutes a day");
        }
        LimitCommand::Remove { executable } => {
            if settings.update(|s| Ok(s.remove_app_limit(&executable)))? {
                println!("Removed limit for {executable}");
            } else {
                println!("{executable} has no limit");
            }
        }
        LimitCommand::List => {
            let current = settings.current();
            if current.app_limits().is_empty() {
                println!("No limits set");
            }
            for (exe, minutes) in current.app_limits() {
                println!("{exe}: {minutes} minutes");
            }
        }
    }
    Ok(())
}

pub fn process_browser_command(command: BrowserCommand, settings: &SettingsHandle) -> Result<()> {
    match command {
        BrowserCommand::Add { executable } => {
            let added = settings.update(|s| s.add_custom_browser(&executable))?;
            println!("{added} is now treated as a browser");
        }
        BrowserCommand::Remove { executable } => {
            settings.update(|s| s.remove_custom_browser(&executable))?;
            println!("{executable} is no longer treated as a browser");
        }
        BrowserCommand::List => {
            let current = settings.current();
            println!("Default: {}", BrowserSet::defaults().join(", "));
            if !current.custom_browsers().is_empty() {
                println!("Custom: {}", current.custom_browsers().join(", "));
            }
        }
    }
    Ok(())
}

pub fn process_break_command(command: BreakCommand, settings: &SettingsHandle) -> Result<()> {
    match command {
        BreakCommand::On { minutes } => {
            let interval = settings.update(|s| {
                s.set_break_reminder(true, minutes)?;
                Ok(s.break_reminder_minutes())
            })?;
            println!("Break reminder every {interval} minutes of continuous use");
        }
        BreakCommand::Off => {
            settings.update(|s| s.set_break_reminder(false, None))?;
            println!("Break reminder disabled");
        }
        BreakCommand::Snooze { minutes } => {
            settings.update(|s| s.set_snooze_minutes(minutes))?;
            println!("Dismissed reminders stay quiet for {minutes} minutes");
        }
    }
    Ok(())
}

pub fn process_pomodoro_command(
    command: PomodoroCommand,
    settings: &SettingsHandle,
    timer: &PomodoroTimer,
) -> Result<()> {
    let now = Utc::now();
    match command {
        PomodoroCommand::Start { minutes } => {
            let default_minutes = settings.current().pomodoro_minutes();
            let state = timer.start(minutes.unwrap_or(0), default_minutes, now)?;
            println!("Pomodoro started for {} minutes", state.duration_minutes);
        }
        PomodoroCommand::Stop => {
            if timer.stop()? {
                println!("Pomodoro stopped");
            } else {
                println!("No pomodoro is running");
            }
        }
        PomodoroCommand::Status => {
            let status = timer.status(now)?;
            if status.active {
                println!(
                    "{} left of {} minutes",
                    format_duration(status.remaining),
                    status.total_minutes
                );
            } else {
                println!("No pomodoro is running");
            }
        }
        PomodoroCommand::Length { minutes } => {
            settings.update(|s| s.set_pomodoro_minutes(minutes))?;
            println!("Default pomodoro length set to {minutes} minutes");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::Utc;
    use tempfile::tempdir;

    use crate::{config::SettingsHandle, daemon::pomodoro::PomodoroTimer};

    use super::{
        BreakCommand, LimitCommand, PomodoroCommand, WhitelistCommand, process_break_command,
        process_limit_command, process_pomodoro_command, process_whitelist_command,
    };

    #[test]
    fn rejected_limit_leaves_settings_untouched() -> Result<()> {
        let dir = tempdir()?;
        let settings = SettingsHandle::open_in(dir.path())?;
        let set = |minutes| LimitCommand::Set {
            executable: "slack".into(),
            minutes,
        };

        assert!(process_limit_command(set(0), &settings).is_err());
        assert!(process_limit_command(set(-5), &settings).is_err());
        assert!(SettingsHandle::open_in(dir.path())?.current().app_limits().is_empty());

        process_limit_command(set(30), &settings)?;
        assert_eq!(
            SettingsHandle::open_in(dir.path())?.current().app_limit("slack.exe"),
            Some(30)
        );
        Ok(())
    }

    #[test]
    fn whitelist_and_break_changes_are_persisted() -> Result<()> {
        let dir = tempdir()?;
        let settings = SettingsHandle::open_in(dir.path())?;
        process_whitelist_command(
            WhitelistCommand::Add {
                executable: "KeePass".into(),
            },
            &settings,
        )?;
        process_break_command(BreakCommand::On { minutes: Some(45) }, &settings)?;
        assert!(process_break_command(BreakCommand::Snooze { minutes: 0 }, &settings).is_err());

        let reopened = SettingsHandle::open_in(dir.path())?.current();
        assert!(reopened.is_whitelisted("keepass"));
        assert!(reopened.break_reminder.enabled);
        assert_eq!(reopened.break_reminder_minutes(), 45);
        Ok(())
    }

    #[test]
    fn pomodoro_uses_configured_length() -> Result<()> {
        let dir = tempdir()?;
        let settings = SettingsHandle::open_in(dir.path())?;
        let timer = PomodoroTimer::in_dir(dir.path());

        process_pomodoro_command(PomodoroCommand::Length { minutes: 50 }, &settings, &timer)?;
        process_pomodoro_command(PomodoroCommand::Start { minutes: None }, &settings, &timer)?;
        let status = timer.status(Utc::now())?;
        assert!(status.active);
        assert_eq!(status.total_minutes, 50);

        process_pomodoro_command(PomodoroCommand::Stop, &settings, &timer)?;
        assert!(!timer.status(Utc::now())?.active);
        Ok(())
    }
}
