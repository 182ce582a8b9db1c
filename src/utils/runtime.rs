use anyhow::Result;

/// The daemon spends nearly all of its time asleep between ticks, so one thread is enough.
/// Storage calls still go through `spawn_blocking`.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .thread_name("focuslog-daemon")
        .enable_all()
        .build()?)
}
