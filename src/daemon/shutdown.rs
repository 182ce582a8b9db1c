use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Waits for a termination request and cancels `cancelation`. Returns early when the token is
/// cancelled by someone else.
///
/// On Windows detached processes can't receive console signals, so there the daemon is usually
/// stopped by terminating the process.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    tokio::select! {
        _ = cancelation.cancelled() => return,
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C"),
        _ = terminate() => info!("Received termination signal"),
    };
    cancelation.cancel();
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!("Can't listen for SIGTERM {e:?}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
