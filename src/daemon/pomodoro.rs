use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const POMODORO_FILE_NAME: &str = "pomodoro.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PomodoroState {
    pub active: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    pub notified: bool,
}

impl PomodoroState {
    fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.start_time
            .map(|start| start + Duration::minutes(self.duration_minutes as i64))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PomodoroStatus {
    pub active: bool,
    pub remaining: Duration,
    pub total_minutes: u32,
}

/// Pomodoro timer shared between the CLI, which starts and stops it, and the daemon, which
/// notices completion. The state lives in a small JSON file.
pub struct PomodoroTimer {
    path: PathBuf,
}

impl PomodoroTimer {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_dir(app_dir: &Path) -> Self {
        Self::new(app_dir.join(POMODORO_FILE_NAME))
    }

    /// Starts a new timer. A non-positive length falls back to `default_minutes`.
    pub fn start(
        &self,
        minutes: i64,
        default_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<PomodoroState> {
        let duration_minutes = u32::try_from(minutes)
            .ok()
            .filter(|v| *v > 0)
            .unwrap_or(default_minutes);
        let state = PomodoroState {
            active: true,
            start_time: Some(now),
            duration_minutes,
            notified: false,
        };
        self.save(&state)?;
        Ok(state)
    }

    /// Returns false when no timer was running.
    pub fn stop(&self) -> Result<bool> {
        let mut state = self.load()?;
        let was_active = state.active;
        state.active = false;
        self.save(&state)?;
        Ok(was_active)
    }

    pub fn status(&self, now: DateTime<Utc>) -> Result<PomodoroStatus> {
        let state = self.load()?;
        let remaining = match state.ends_at() {
            Some(end) if state.active => (end - now).max(Duration::zero()),
            _ => Duration::zero(),
        };
        Ok(PomodoroStatus {
            active: state.active,
            remaining,
            total_minutes: state.duration_minutes,
        })
    }

    /// True when a running timer has elapsed and nobody was told about it yet.
    pub fn is_due(&self, now: DateTime<Utc>) -> Result<bool> {
        let state = self.load()?;
        Ok(state.active
            && !state.notified
            && state.ends_at().is_some_and(|end| now >= end))
    }

    /// Records that completion was announced. The timer stops, so it can't fire twice.
    pub fn mark_notified(&self) -> Result<()> {
        let mut state = self.load()?;
        state.notified = true;
        state.active = false;
        self.save(&state)
    }

    pub fn load(&self) -> Result<PomodoroState> {
        match fs::read(&self.path) {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(state) => Ok(state),
                Err(e) => {
                    warn!("Ignoring malformed pomodoro state {:?}: {e}", self.path);
                    Ok(PomodoroState::default())
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(PomodoroState::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {:?}", self.path)),
        }
    }

    fn save(&self, state: &PomodoroState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&serde_json::to_vec(state)?)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        debug!("Saved pomodoro state {state:?}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::tempdir;

    use super::PomodoroTimer;

    #[test]
    fn runs_and_fires_once() -> Result<()> {
        let dir = tempdir()?;
        let timer = PomodoroTimer::in_dir(dir.path());
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        let state = timer.start(0, 25, start)?;
        assert_eq!(state.duration_minutes, 25);

        let status = timer.status(start + Duration::minutes(10))?;
        assert!(status.active);
        assert_eq!(status.remaining, Duration::minutes(15));
        assert_eq!(status.total_minutes, 25);

        assert!(!timer.is_due(start + Duration::minutes(24))?);
        assert!(timer.is_due(start + Duration::minutes(25))?);
        timer.mark_notified()?;
        assert!(!timer.is_due(start + Duration::minutes(30))?);
        assert!(!timer.status(start + Duration::minutes(30))?.active);
        Ok(())
    }

    #[test]
    fn stop_cancels_running_timer() -> Result<()> {
        let dir = tempdir()?;
        let timer = PomodoroTimer::in_dir(dir.path());
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        assert!(!timer.stop()?);
        timer.start(50, 25, start)?;
        assert!(timer.stop()?);
        assert!(!timer.is_due(start + Duration::hours(2))?);
        assert_eq!(timer.status(start)?.remaining, Duration::zero());
        Ok(())
    }
}
