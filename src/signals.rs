/// Tells systemd the service is accepting requests.
pub fn notify_ready() {
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Unable to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            log::error!("Unable to listen for SIGTERM: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// Resolves on Ctrl-C (SIGINT) or SIGTERM, the signal systemd stops units with.
pub async fn shutdown_signal() {
    tokio::select! {
        _ = interrupt() => log::info!("Received SIGINT, shutting down"),
        _ = terminate() => log::info!("Received SIGTERM, shutting down"),
    }
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]);
}
