//! User settings. They live in a single JSON file inside the application directory and are
//! mutated only through explicit commands; the daemon observes changes through
//! [SettingsHandle::reload_if_changed].

use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::SystemTime,
};

use anyhow::{Context, Result, bail, ensure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classify::{BrowserSet, executable_stem, normalize_executable};

pub const SETTINGS_FILE_NAME: &str = "config.json";

pub const DEFAULT_RETENTION_DAYS: u32 = 7;
pub const MIN_RETENTION_DAYS: u32 = 1;
pub const MAX_RETENTION_DAYS: u32 = 30;

const DEFAULT_BREAK_MINUTES: u32 = 60;
const DEFAULT_POMODORO_MINUTES: u32 = 25;
const DEFAULT_SNOOZE_MINUTES: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakReminder {
    pub enabled: bool,
    pub minutes: u32,
}

impl Default for BreakReminder {
    fn default() -> Self {
        Self {
            enabled: false,
            minutes: DEFAULT_BREAK_MINUTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub consent_granted: bool,
    pub consent_timestamp: Option<DateTime<Utc>>,
    retention_days: u32,
    pub paused: bool,
    whitelist: Vec<String>,
    app_limits: BTreeMap<String, u32>,
    pub break_reminder: BreakReminder,
    pomodoro_minutes: u32,
    snooze_minutes: u32,
    custom_browsers: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            consent_granted: false,
            consent_timestamp: None,
            retention_days: DEFAULT_RETENTION_DAYS,
            paused: false,
            whitelist: vec![],
            app_limits: BTreeMap::new(),
            break_reminder: BreakReminder::default(),
            pomodoro_minutes: DEFAULT_POMODORO_MINUTES,
            snooze_minutes: DEFAULT_SNOOZE_MINUTES,
            custom_browsers: vec![],
        }
    }
}

impl Settings {
    /// Retention window in days. Hand edited files with values outside the allowed range fall
    /// back to the default instead of deleting more than the user asked for.
    pub fn retention_days(&self) -> u32 {
        if (MIN_RETENTION_DAYS..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            self.retention_days
        } else {
            DEFAULT_RETENTION_DAYS
        }
    }

    pub fn set_retention_days(&mut self, days: u32) -> Result<()> {
        ensure!(
            (MIN_RETENTION_DAYS..=MAX_RETENTION_DAYS).contains(&days),
            "Retention must be between {MIN_RETENTION_DAYS} and {MAX_RETENTION_DAYS} days, got {days}"
        );
        self.retention_days = days;
        Ok(())
    }

    pub fn grant_consent(&mut self, now: DateTime<Utc>) {
        self.consent_granted = true;
        self.consent_timestamp = Some(now);
    }

    pub fn is_whitelisted(&self, executable: &str) -> bool {
        let stem = executable_stem(executable);
        self.whitelist.iter().any(|v| executable_stem(v) == stem)
    }

    pub fn whitelist(&self) -> &[String] {
        &self.whitelist
    }

    /// Returns false when the executable was already whitelisted.
    pub fn add_whitelist(&mut self, executable: &str) -> Result<bool> {
        let executable = normalize_executable(executable)?;
        if self.is_whitelisted(&executable) {
            return Ok(false);
        }
        self.whitelist.push(executable);
        Ok(true)
    }

    pub fn remove_whitelist(&mut self, executable: &str) -> bool {
        let stem = executable_stem(executable);
        let before = self.whitelist.len();
        self.whitelist.retain(|v| executable_stem(v) != stem);
        before != self.whitelist.len()
    }

    /// Daily limit for an executable in minutes.
    pub fn app_limit(&self, executable: &str) -> Option<u32> {
        let stem = executable_stem(executable);
        self.app_limits
            .iter()
            .find(|(exe, _)| executable_stem(exe) == stem)
            .map(|(_, minutes)| *minutes)
    }

    pub fn app_limits(&self) -> &BTreeMap<String, u32> {
        &self.app_limits
    }

    pub fn set_app_limit(&mut self, executable: &str, minutes: i64) -> Result<()> {
        ensure!(minutes > 0, "Limit must be a positive number of minutes, got {minutes}");
        let minutes = u32::try_from(minutes).context("Limit is too large")?;
        let executable = normalize_executable(executable)?;
        self.remove_app_limit(&executable);
        self.app_limits.insert(executable, minutes);
        Ok(())
    }

    pub fn remove_app_limit(&mut self, executable: &str) -> bool {
        let stem = executable_stem(executable);
        let before = self.app_limits.len();
        self.app_limits.retain(|exe, _| executable_stem(exe) != stem);
        before != self.app_limits.len()
    }

    pub fn set_break_reminder(&mut self, enabled: bool, minutes: Option<i64>) -> Result<()> {
        if let Some(minutes) = minutes {
            ensure!(minutes > 0, "Break interval must be positive, got {minutes}");
            self.break_reminder.minutes = u32::try_from(minutes).context("Interval is too large")?;
        }
        self.break_reminder.enabled = enabled;
        Ok(())
    }

    pub fn break_reminder_minutes(&self) -> u32 {
        positive_or(self.break_reminder.minutes, DEFAULT_BREAK_MINUTES)
    }

    pub fn pomodoro_minutes(&self) -> u32 {
        positive_or(self.pomodoro_minutes, DEFAULT_POMODORO_MINUTES)
    }

    pub fn set_pomodoro_minutes(&mut self, minutes: i64) -> Result<()> {
        ensure!(minutes > 0, "Pomodoro length must be positive, got {minutes}");
        self.pomodoro_minutes = u32::try_from(minutes).context("Pomodoro length is too large")?;
        Ok(())
    }

    pub fn snooze_minutes(&self) -> u32 {
        positive_or(self.snooze_minutes, DEFAULT_SNOOZE_MINUTES)
    }

    pub fn set_snooze_minutes(&mut self, minutes: i64) -> Result<()> {
        ensure!(minutes > 0, "Snooze length must be positive, got {minutes}");
        self.snooze_minutes = u32::try_from(minutes).context("Snooze length is too large")?;
        Ok(())
    }

    pub fn custom_browsers(&self) -> &[String] {
        &self.custom_browsers
    }

    pub fn add_custom_browser(&mut self, executable: &str) -> Result<String> {
        let executable = normalize_executable(executable)?;
        if BrowserSet::is_default_browser(&executable) {
            bail!("{executable} is already a default browser");
        }
        let stem = executable_stem(&executable);
        if self.custom_browsers.iter().any(|v| executable_stem(v) == stem) {
            bail!("{executable} is already in the custom list");
        }
        self.custom_browsers.push(executable.clone());
        self.custom_browsers.sort();
        Ok(executable)
    }

    pub fn remove_custom_browser(&mut self, executable: &str) -> Result<()> {
        let stem = executable_stem(executable);
        let before = self.custom_browsers.len();
        self.custom_browsers.retain(|v| executable_stem(v) != stem);
        if before == self.custom_browsers.len() {
            bail!("{executable} is not in the custom list (default browsers can't be removed)");
        }
        Ok(())
    }

    pub fn browsers(&self) -> BrowserSet {
        BrowserSet::new(&self.custom_browsers)
    }

    pub fn load(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(data) => serde_json::from_slice(&data)
                .with_context(|| format!("Malformed settings file {path:?}")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read settings {path:?}")),
        }
    }

    /// Writes into a temporary file first so a crash never leaves a half written config.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(self)?;
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to replace settings {path:?}"))?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }
}

fn positive_or(value: u32, default: u32) -> u32 {
    if value == 0 { default } else { value }
}

/// Shared, explicitly refreshed view of [Settings].
pub struct SettingsHandle {
    path: PathBuf,
    state: RwLock<CachedSettings>,
}

struct CachedSettings {
    settings: Arc<Settings>,
    modified: Option<SystemTime>,
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|v| v.modified()).ok()
}

impl SettingsHandle {
    pub fn open(path: PathBuf) -> Result<Self> {
        let modified = modified_time(&path);
        let settings = Settings::load(&path)?;
        Ok(Self {
            path,
            state: RwLock::new(CachedSettings {
                settings: Arc::new(settings),
                modified,
            }),
        })
    }

    pub fn open_in(app_dir: &Path) -> Result<Self> {
        Self::open(app_dir.join(SETTINGS_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Arc<Settings> {
        match self.state.read() {
            Ok(state) => state.settings.clone(),
            Err(poisoned) => poisoned.into_inner().settings.clone(),
        }
    }

    /// Re-reads the file when its modification time moved. A malformed file keeps the previous
    /// snapshot in use.
    pub fn reload_if_changed(&self) -> bool {
        let modified = modified_time(&self.path);
        {
            let state = self.current_state();
            if state.modified == modified {
                return false;
            }
        }

        match Settings::load(&self.path) {
            Ok(settings) => {
                info!("Settings changed on disk, reloading");
                self.replace(settings, modified);
                true
            }
            Err(e) => {
                warn!("Keeping previous settings, reload failed {e:?}");
                false
            }
        }
    }

    /// Applies a validated mutation and persists it. Nothing is saved when `change` fails.
    pub fn update<T>(&self, change: impl FnOnce(&mut Settings) -> Result<T>) -> Result<T> {
        let mut settings = Settings::load(&self.path)?;
        let result = change(&mut settings)?;
        settings.save(&self.path)?;
        let modified = modified_time(&self.path);
        self.replace(settings, modified);
        Ok(result)
    }

    fn current_state(&self) -> std::sync::RwLockReadGuard<'_, CachedSettings> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn replace(&self, settings: Settings, modified: Option<SystemTime>) {
        let mut state = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.settings = Arc::new(settings);
        state.modified = modified;
    }
}
