use std::{path::Path, sync::Arc};

use anyhow::{Context, Result, ensure};
use fs4::tokio::AsyncFileExt;
use notify::{NotificationGate, Notifier};
use scheduler::{Intervals, Scheduler};
use tokio::fs::File;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    config::SettingsHandle,
    storage::{open_with_retry, retention::apply_retention, usage_store::UsageStore},
    utils::clock::{Clock, DefaultClock},
    window_api::{GenericWindowSource, WindowSource},
};

pub mod args;
pub mod focus;
pub mod notify;
pub mod pomodoro;
pub mod scheduler;
pub mod shutdown;
pub mod tracker;

use focus::FocusMonitor;
use pomodoro::PomodoroTimer;
use tracker::SessionTracker;

pub const LOCK_FILE_NAME: &str = "daemon.lock";

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: &Path) -> Result<()> {
    let settings = Arc::new(SettingsHandle::open_in(dir)?);
    ensure!(
        settings.current().consent_granted,
        "Tracking consent wasn't granted. Run `focuslog init` first"
    );

    let lock = acquire_instance_lock(dir).await?;

    let store: Arc<dyn UsageStore> = Arc::new(
        open_with_retry(dir)
            .await
            .context("Can't track without a working store")?,
    );
    let source = GenericWindowSource::new()?;

    let result = run_tracking(
        dir,
        store,
        settings,
        Arc::new(DefaultClock),
        Box::new(source),
        default_notifier(),
        CancellationToken::new(),
    )
    .await;

    lock.unlock_async().await?;
    result
}

async fn acquire_instance_lock(dir: &Path) -> Result<File> {
    tokio::fs::create_dir_all(dir).await?;
    let file = File::options()
        .write(true)
        .create(true)
        .truncate(false)
        .open(dir.join(LOCK_FILE_NAME))
        .await?;
    file.try_lock_exclusive()
        .context("Another focuslog daemon is already running")?;
    Ok(file)
}

fn default_notifier() -> Box<dyn Notifier> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            Box::new(notify::DesktopNotifier::new())
        } else {
            Box::new(notify::LogNotifier)
        }
    }
}

/// Cleans old data, recovers what a crash left behind and then tracks until shutdown is
/// requested.
async fn run_tracking(
    dir: &Path,
    store: Arc<dyn UsageStore>,
    settings: Arc<SettingsHandle>,
    clock: Arc<dyn Clock>,
    source: Box<dyn WindowSource>,
    notifier: Box<dyn Notifier>,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let today = clock.local_date();
    let retention_days = settings.current().retention_days();
    let retention_store = store.clone();
    tokio::task::spawn_blocking(move || {
        apply_retention(retention_store.as_ref(), today, retention_days)
    })
    .await?;

    let tracker = Arc::new(SessionTracker::new(
        store.clone(),
        settings.clone(),
        clock.clone(),
    ));
    let recovering = tracker.clone();
    match tokio::task::spawn_blocking(move || recovering.recover()).await? {
        Ok(Some(session)) => info!("Recovered session of {}", session.executable_name),
        Ok(None) => (),
        Err(e) => error!("Crash recovery failed {e:?}"),
    }

    let focus = FocusMonitor::new(
        tracker.clone(),
        store.clone(),
        settings.clone(),
        PomodoroTimer::in_dir(dir),
        NotificationGate::new(notifier, clock.clone()),
        clock.clone(),
    );
    let scheduler = Scheduler::new(tracker, store, settings, clock, Intervals::default());

    info!("Tracking started");
    let (_, result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        scheduler.run(source, focus, shutdown_token.clone()),
    );
    result.inspect_err(|e| error!("Tracker shutdown failed {e:?}"))
}

#[cfg(test)]
mod daemon_tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use crate::{
        config::SettingsHandle,
        daemon::{acquire_instance_lock, notify::LogNotifier, run_tracking},
        storage::{
            entities::{ActiveCheckpoint, OpenSession},
            usage_store::{SqliteUsageStore, UsageStore},
        },
        utils::{
            clock::{Clock, TokioClock},
            logging::TEST_LOGGING,
            time::local_date_of,
        },
        window_api::{ForegroundWindow, MockWindowSource},
    };

    /// Runs the whole daemon against a crashed previous run and a scripted window source.
    #[tokio::test(start_paused = true)]
    async fn smoke_test_daemon() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let start_time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new(start_time));
        let date = local_date_of(start_time);

        let store = Arc::new(SqliteUsageStore::open_in(dir.path())?);
        store.save_checkpoint(&ActiveCheckpoint {
            session: OpenSession {
                app_name: "VS Code".into(),
                executable_name: "code.exe".into(),
                window_title: "main.rs".into(),
                start: start_time - ChronoDuration::minutes(10),
                date,
            },
            last_seen: start_time - ChronoDuration::minutes(8),
        })?;

        let settings = Arc::new(SettingsHandle::open_in(dir.path())?);
        settings.update(|s| {
            s.grant_consent(start_time);
            Ok(())
        })?;

        let mut source = MockWindowSource::new();
        source.expect_get_foreground().returning(|| {
            Ok(Some(ForegroundWindow {
                title: "(2) Inbox - Gmail - Google Chrome".into(),
                executable_name: "chrome.exe".into(),
                pid: 3,
            }))
        });

        let shutdown = CancellationToken::new();
        let (_, result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(15_500)).await;
                shutdown.cancel();
            },
            run_tracking(
                dir.path(),
                store.clone(),
                settings,
                clock,
                Box::new(source),
                Box::new(LogNotifier),
                shutdown.clone(),
            ),
        );
        result?;

        assert_eq!(store.load_checkpoint()?, None);
        let apps = store.app_stats_for(date)?;
        let code = apps.iter().find(|v| v.executable_name == "code.exe").unwrap();
        assert_eq!(code.total_secs, 120);
        let browsing = store.browsing_stats_for(date)?;
        assert_eq!(browsing.len(), 1);
        assert_eq!(browsing[0].title, "Inbox - Gmail");
        assert_eq!(store.overview()?.session_count, 2);
        Ok(())
    }

    #[tokio::test]
    async fn second_instance_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let _first = acquire_instance_lock(dir.path()).await?;
        assert!(acquire_instance_lock(dir.path()).await.is_err());
        Ok(())
    }
}
