//! Storage is organized around a single SQLite database through
//! [usage_store::SqliteUsageStore]. The basic idea is:
//!  - Every closed session is stored as a raw row.
//!  - Each session is also folded into per-day aggregates right away, so reports never scan
//!    raw sessions.
//!  - One slot holds a checkpoint of the session that is currently open, which is what makes
//!    crash recovery possible.
//!  - Everything is keyed by the local calendar date, and retention deletes by that date.

pub mod entities;
pub mod retention;
pub mod usage_store;

use std::{path::Path, time::Duration};

use anyhow::Result;
use tracing::warn;

use usage_store::SqliteUsageStore;

const OPEN_ATTEMPTS: u32 = 3;
const OPEN_BACKOFF: Duration = Duration::from_millis(100);

/// Opens the store, retrying with a growing pause when the file is briefly unavailable.
pub async fn open_with_retry(app_dir: &Path) -> Result<SqliteUsageStore> {
    let mut attempt = 1;
    loop {
        match SqliteUsageStore::open_in(app_dir) {
            Ok(store) => return Ok(store),
            Err(e) if attempt < OPEN_ATTEMPTS => {
                warn!("Failed to open store (attempt {attempt}/{OPEN_ATTEMPTS}) {e:?}");
                tokio::time::sleep(OPEN_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
