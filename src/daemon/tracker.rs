use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::{
    classify::{BrowserSet, app_display_name, title::TitleCleaner},
    config::{Settings, SettingsHandle},
    storage::{
        entities::{ActiveCheckpoint, OpenSession, Session, SessionWrite},
        usage_store::UsageStore,
    },
    utils::{clock::Clock, time::local_date_of},
    window_api::{ForegroundWindow, WindowSource},
};

/// Browser detection and title cleaning, rebuilt when the custom browser list changes.
struct Classifier {
    custom_browsers: Vec<String>,
    browsers: BrowserSet,
    cleaner: TitleCleaner,
}

impl Classifier {
    fn new(custom_browsers: &[String]) -> Self {
        let browsers = BrowserSet::new(custom_browsers);
        let cleaner = TitleCleaner::new(&browsers).unwrap_or_else(|e| {
            warn!("Falling back to default title patterns {e:?}");
            TitleCleaner::default()
        });
        Self {
            custom_browsers: custom_browsers.to_vec(),
            browsers,
            cleaner,
        }
    }

    fn refresh(&mut self, settings: &Settings) {
        if self.custom_browsers != settings.custom_browsers() {
            info!("Browser list changed, rebuilding title patterns");
            *self = Self::new(settings.custom_browsers());
        }
    }

    fn browsing_key(&self, session: &Session) -> Option<String> {
        self.browsers
            .is_browser(&session.executable_name)
            .then(|| {
                self.cleaner
                    .clean(&session.window_title, &session.executable_name)
            })
    }
}

struct TrackerState {
    current: Option<OpenSession>,
    pending: VecDeque<Session>,
    /// Start of the current stretch of uninterrupted use. Cleared while tracking is paused.
    continuous_use_since: Option<DateTime<Utc>>,
    classifier: Classifier,
}

/// Splits focus observations into sessions and moves them into the store.
///
/// All mutable state sits behind one lock. Store calls happen outside of it, so a slow write
/// never blocks polling.
pub struct SessionTracker {
    store: Arc<dyn UsageStore>,
    settings: Arc<SettingsHandle>,
    clock: Arc<dyn Clock>,
    state: Mutex<TrackerState>,
    stopped: AtomicBool,
}

impl SessionTracker {
    pub fn new(
        store: Arc<dyn UsageStore>,
        settings: Arc<SettingsHandle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let classifier = Classifier::new(settings.current().custom_browsers());
        Self {
            store,
            settings,
            clock,
            state: Mutex::new(TrackerState {
                current: None,
                pending: VecDeque::new(),
                continuous_use_since: None,
                classifier,
            }),
            stopped: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Asks `source` for the focused window and feeds the answer into [Self::observe]. A failing
    /// source means there is no signal this tick, which is not a focus loss.
    pub fn poll(&self, source: &mut dyn WindowSource) {
        match source.get_foreground() {
            Ok(Some(window)) => self.observe(window),
            Ok(None) => debug!("Nothing usable holds focus"),
            Err(e) => warn!("Failed to query the focused window {e:?}"),
        }
    }

    pub fn observe(&self, window: ForegroundWindow) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        if window.title.trim().is_empty() || window.executable_name.trim().is_empty() {
            return;
        }

        let now = self.clock.time();
        let settings = self.settings.current();
        let mut state = self.state();

        if settings.paused {
            state.continuous_use_since = None;
            return;
        }
        state.continuous_use_since.get_or_insert(now);

        if settings.is_whitelisted(&window.executable_name) {
            return;
        }

        if let Some(current) = &state.current {
            if current.executable_name == window.executable_name {
                return;
            }
        }

        if let Some(previous) = state.current.take() {
            match previous.close(now) {
                Some(session) => {
                    debug!(
                        "Closed {} after {}s",
                        session.executable_name, session.duration_secs
                    );
                    state.pending.push_back(session);
                }
                None => debug!("Discarding sub-second session"),
            }
        }

        debug!("Focus moved to {}", window.executable_name);
        state.current = Some(OpenSession {
            app_name: app_display_name(&window.executable_name).into(),
            executable_name: window.executable_name,
            window_title: window.title,
            start: now,
            date: local_date_of(now),
        });
    }

    /// Moves every pending session into the store as one batch. The batch is dropped when the
    /// write fails; the checkpoint bounds what can be lost to the open session.
    pub fn flush(&self) -> Result<usize> {
        let batch = {
            let settings = self.settings.current();
            let mut state = self.state();
            if state.pending.is_empty() {
                return Ok(0);
            }
            state.classifier.refresh(&settings);
            let sessions = std::mem::take(&mut state.pending);
            sessions
                .into_iter()
                .map(|session| SessionWrite {
                    browsing_key: state.classifier.browsing_key(&session),
                    session,
                })
                .collect::<Vec<_>>()
        };

        let count = batch.len();
        self.store
            .record_sessions(&batch)
            .inspect_err(|e| error!("Dropping {count} sessions, flush failed {e:?}"))?;
        Ok(count)
    }

    /// Mirrors the open session into the checkpoint slot, or clears the slot when nothing is
    /// open.
    pub fn checkpoint(&self) -> Result<()> {
        let current = self.state().current.clone();
        match current {
            Some(session) => self.store.save_checkpoint(&ActiveCheckpoint {
                session,
                last_seen: self.clock.time(),
            }),
            None => self.store.clear_checkpoint(),
        }
    }

    /// Turns a checkpoint left behind by a crash into a session. The checkpoint is removed even
    /// when it was too short, unreadable or already stored.
    pub fn recover(&self) -> Result<Option<Session>> {
        let recovered = match self.store.load_checkpoint() {
            Ok(Some(checkpoint)) => self.unsaved(checkpoint)?,
            Ok(None) => None,
            Err(e) => {
                warn!("Discarding unreadable checkpoint {e:?}");
                None
            }
        };

        let recorded = match recovered {
            Some(session) => {
                info!(
                    "Recovered {}s of {} from the previous run",
                    session.duration_secs, session.executable_name
                );
                self.store
                    .record_sessions(&[SessionWrite {
                        session: session.clone(),
                        browsing_key: None,
                    }])
                    .map(|_| Some(session))
            }
            None => Ok(None),
        };

        self.store.clear_checkpoint()?;
        recorded
    }

    /// A checkpoint can outlive its session: the session may close and flush after the last
    /// checkpoint write, or a delayed write may land after the flush. Either way the time is
    /// already stored.
    fn unsaved(&self, checkpoint: ActiveCheckpoint) -> Result<Option<Session>> {
        let session = &checkpoint.session;
        if self
            .store
            .contains_session(&session.executable_name, session.start)?
        {
            info!(
                "Checkpoint of {} is already stored, skipping recovery",
                session.executable_name
            );
            return Ok(None);
        }
        Ok(checkpoint.into_session())
    }

    /// Closes the open session, flushes everything and removes the checkpoint. Only the first
    /// call does anything.
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown_at(self.clock.time())
    }

    /// Same as [Self::shutdown], but the open session ends at `end`, the moment stopping was
    /// requested.
    pub fn shutdown_at(&self, end: DateTime<Utc>) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        {
            let mut state = self.state();
            if let Some(session) = state.current.take().and_then(|v| v.close(end)) {
                state.pending.push_back(session);
            }
        }

        let flushed = self.flush();
        let cleared = self.store.clear_checkpoint();
        info!("Tracker stopped");
        flushed?;
        cleared
    }

    /// How long the user has been active without a pause.
    pub fn continuous_use(&self) -> Duration {
        let since = self.state().continuous_use_since;
        since.map_or(Duration::zero(), |since| self.clock.time() - since)
    }

    pub fn current_session(&self) -> Option<OpenSession> {
        self.state().current.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::{TempDir, tempdir};

    use crate::{
        config::SettingsHandle,
        storage::{
            entities::{ActiveCheckpoint, OpenSession},
            usage_store::{SqliteUsageStore, UsageStore, tests::corrupt_checkpoint},
        },
        utils::{
            clock::{Clock, ManualClock},
            logging::TEST_LOGGING,
            time::local_date_of,
        },
        window_api::{ForegroundWindow, MockWindowSource},
    };

    use super::SessionTracker;

    struct Fixture {
        _dir: TempDir,
        clock: ManualClock,
        store: Arc<SqliteUsageStore>,
        settings: Arc<SettingsHandle>,
        tracker: SessionTracker,
    }

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn fixture() -> Result<Fixture> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = ManualClock::new(start_time());
        let store = Arc::new(SqliteUsageStore::open_in_memory()?);
        let settings = Arc::new(SettingsHandle::open_in(dir.path())?);
        let tracker = SessionTracker::new(store.clone(), settings.clone(), Arc::new(clock.clone()));
        Ok(Fixture {
            _dir: dir,
            clock,
            store,
            settings,
            tracker,
        })
    }

    fn window(exe: &str, title: &str) -> ForegroundWindow {
        ForegroundWindow {
            title: title.into(),
            executable_name: exe.into(),
            pid: 42,
        }
    }

    #[test]
    fn segments_sessions_by_executable() -> Result<()> {
        let f = fixture()?;
        let mut source = MockWindowSource::new();
        let mut observations = vec![
            window("notepad.exe", "a.txt"),
            window("notepad.exe", "a.txt"),
            window("chrome.exe", "GitHub - Chrome"),
        ]
        .into_iter();
        source
            .expect_get_foreground()
            .times(3)
            .returning(move || Ok(observations.next()));

        for _ in 0..3 {
            f.tracker.poll(&mut source);
            f.clock.advance(Duration::seconds(1));
        }

        assert_eq!(f.tracker.pending_count(), 1);
        let open = f.tracker.current_session().unwrap();
        assert_eq!(open.executable_name.as_ref(), "chrome.exe");
        assert_eq!(open.start, start_time() + Duration::seconds(2));

        f.clock.advance(Duration::seconds(4));
        f.tracker.shutdown()?;

        let date = local_date_of(start_time());
        let apps = f.store.app_stats_for(date)?;
        let chrome = apps.iter().find(|v| v.executable_name == "chrome.exe").unwrap();
        let notepad = apps.iter().find(|v| v.executable_name == "notepad.exe").unwrap();
        assert_eq!(notepad.total_secs, 2);
        assert_eq!(notepad.app_name, "Notepad");
        assert_eq!(chrome.total_secs, 5);

        let browsing = f.store.browsing_stats_for(date)?;
        assert_eq!(browsing.len(), 1);
        assert_eq!(browsing[0].title, "GitHub");
        assert_eq!(browsing[0].total_secs, 5);
        Ok(())
    }

    #[test]
    fn source_failures_and_empty_titles_are_ignored() -> Result<()> {
        let f = fixture()?;
        let mut source = MockWindowSource::new();
        let mut step = 0;
        source.expect_get_foreground().returning(move || {
            step += 1;
            match step {
                1 => Ok(Some(window("code.exe", "main.rs"))),
                2 => Err(anyhow::anyhow!("X server went away")),
                3 => Ok(None),
                _ => Ok(Some(window("chrome.exe", "  "))),
            }
        });

        for _ in 0..4 {
            f.tracker.poll(&mut source);
            f.clock.advance(Duration::seconds(1));
        }

        assert_eq!(f.tracker.pending_count(), 0);
        assert_eq!(
            f.tracker.current_session().unwrap().executable_name.as_ref(),
            "code.exe"
        );
        Ok(())
    }

    #[test]
    fn sub_second_sessions_are_never_persisted() -> Result<()> {
        let f = fixture()?;
        f.tracker.observe(window("code.exe", "main.rs"));
        f.clock.advance(Duration::milliseconds(600));
        f.tracker.observe(window("slack.exe", "general"));
        assert_eq!(f.tracker.pending_count(), 0);

        f.clock.advance(Duration::milliseconds(300));
        f.tracker.shutdown()?;
        assert_eq!(f.store.overview()?.session_count, 0);
        assert!(f.store.app_stats_for(local_date_of(start_time()))?.is_empty());
        Ok(())
    }

    #[test]
    fn whitelisted_and_paused_observations_keep_the_open_session() -> Result<()> {
        let f = fixture()?;
        f.settings.update(|s| s.add_whitelist("keepass"))?;

        f.tracker.observe(window("code.exe", "main.rs"));
        f.clock.advance(Duration::seconds(3));
        f.tracker.observe(window("keepass.exe", "Vault"));
        assert_eq!(f.tracker.pending_count(), 0);
        assert!(f.tracker.continuous_use() > Duration::zero());

        f.settings.update(|s| {
            s.paused = true;
            Ok(())
        })?;
        f.tracker.observe(window("slack.exe", "general"));
        assert_eq!(f.tracker.pending_count(), 0);
        assert_eq!(f.tracker.continuous_use(), Duration::zero());
        assert_eq!(
            f.tracker.current_session().unwrap().executable_name.as_ref(),
            "code.exe"
        );
        Ok(())
    }

    #[test]
    fn checkpoint_follows_the_open_session() -> Result<()> {
        let f = fixture()?;
        f.tracker.checkpoint()?;
        assert_eq!(f.store.load_checkpoint()?, None);

        f.tracker.observe(window("code.exe", "main.rs"));
        f.clock.advance(Duration::seconds(30));
        f.tracker.checkpoint()?;
        let checkpoint = f.store.load_checkpoint()?.unwrap();
        assert_eq!(checkpoint.last_seen, start_time() + Duration::seconds(30));
        assert_eq!(checkpoint.session.start, start_time());

        f.tracker.shutdown()?;
        assert_eq!(f.store.load_checkpoint()?, None);
        Ok(())
    }

    fn left_behind(store: &SqliteUsageStore, length: Duration) -> Result<()> {
        store.save_checkpoint(&ActiveCheckpoint {
            session: OpenSession {
                app_name: "VS Code".into(),
                executable_name: "code.exe".into(),
                window_title: "main.rs".into(),
                start: start_time(),
                date: local_date_of(start_time()),
            },
            last_seen: start_time() + length,
        })
    }

    #[test]
    fn recovers_crashed_session_once() -> Result<()> {
        let f = fixture()?;
        left_behind(&f.store, Duration::seconds(90))?;

        let recovered = f.tracker.recover()?.unwrap();
        assert_eq!(recovered.duration_secs, 90);
        assert_eq!(f.store.load_checkpoint()?, None);
        assert_eq!(f.tracker.recover()?, None);

        assert_eq!(f.store.overview()?.session_count, 1);
        let apps = f.store.app_stats_for(local_date_of(start_time()))?;
        assert_eq!(apps[0].total_secs, 90);
        assert!(f.store.browsing_stats_for(local_date_of(start_time()))?.is_empty());
        Ok(())
    }

    #[test]
    fn short_checkpoint_is_cleared_without_a_session() -> Result<()> {
        let f = fixture()?;
        left_behind(&f.store, Duration::milliseconds(500))?;

        assert_eq!(f.tracker.recover()?, None);
        assert_eq!(f.store.load_checkpoint()?, None);
        assert_eq!(f.store.overview()?.session_count, 0);
        Ok(())
    }

    #[test]
    fn checkpoint_of_a_flushed_session_is_not_recovered() -> Result<()> {
        let f = fixture()?;
        f.tracker.observe(window("code.exe", "main.rs"));
        f.clock.advance(Duration::seconds(30));
        f.tracker.checkpoint()?;

        f.clock.advance(Duration::seconds(75));
        f.tracker.observe(window("slack.exe", "general"));
        assert_eq!(f.tracker.flush()?, 1);

        // Crash before the next checkpoint tick.
        assert_eq!(f.tracker.recover()?, None);
        assert_eq!(f.store.load_checkpoint()?, None);
        let apps = f.store.app_stats_for(local_date_of(start_time()))?;
        assert_eq!(apps[0].total_secs, 105);
        assert_eq!(f.store.overview()?.session_count, 1);
        Ok(())
    }

    #[test]
    fn checkpoint_written_after_the_flush_is_not_recovered() -> Result<()> {
        let f = fixture()?;
        f.tracker.observe(window("code.exe", "main.rs"));
        f.clock.advance(Duration::seconds(100));
        let stale = ActiveCheckpoint {
            session: f.tracker.current_session().unwrap(),
            last_seen: f.clock.time(),
        };

        f.clock.advance(Duration::seconds(5));
        f.tracker.observe(window("slack.exe", "general"));
        f.tracker.flush()?;
        // The write captured at 100s lands only now.
        f.store.save_checkpoint(&stale)?;

        assert_eq!(f.tracker.recover()?, None);
        let apps = f.store.app_stats_for(local_date_of(start_time()))?;
        let code = apps.iter().find(|v| v.executable_name == "code.exe").unwrap();
        assert_eq!(code.total_secs, 105);
        Ok(())
    }

    #[test]
    fn unreadable_checkpoint_is_discarded() -> Result<()> {
        let f = fixture()?;
        corrupt_checkpoint(&f.store)?;
        assert!(f.store.load_checkpoint().is_err());

        assert_eq!(f.tracker.recover()?, None);
        assert_eq!(f.store.load_checkpoint()?, None);
        assert_eq!(f.store.overview()?.session_count, 0);
        Ok(())
    }

    #[test]
    fn shutdown_runs_once_and_stops_tracking() -> Result<()> {
        let f = fixture()?;
        f.tracker.observe(window("code.exe", "main.rs"));
        f.clock.advance(Duration::seconds(10));
        f.tracker.shutdown()?;
        f.tracker.shutdown()?;

        f.tracker.observe(window("slack.exe", "general"));
        assert!(f.tracker.current_session().is_none());
        assert_eq!(f.store.overview()?.session_count, 1);
        Ok(())
    }

    #[test]
    fn aggregate_equals_sum_of_sessions() -> Result<()> {
        let f = fixture()?;
        let switches = [
            ("code.exe", 5),
            ("chrome.exe", 3),
            ("code.exe", 7),
            ("slack.exe", 1),
            ("code.exe", 2),
            ("chrome.exe", 4),
        ];
        for (exe, secs) in switches {
            f.tracker.observe(window(exe, "title"));
            f.clock.advance(Duration::seconds(secs));
            if secs > 3 {
                f.tracker.flush()?;
            }
        }
        f.tracker.shutdown()?;

        let date = local_date_of(start_time());
        let sessions = f.store.sessions_between(date, date)?;
        for stat in f.store.app_stats_for(date)? {
            let sum: i64 = sessions
                .iter()
                .filter(|v| v.executable_name.as_ref() == stat.executable_name)
                .map(|v| v.duration_secs)
                .sum();
            assert_eq!(sum, stat.total_secs, "{}", stat.executable_name);
        }
        assert_eq!(sessions.iter().map(|v| v.duration_secs).sum::<i64>(), 22);
        Ok(())
    }
}
