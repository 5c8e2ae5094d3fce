use tokio_util::sync::CancellationToken;

/// Block until SIGINT or SIGTERM, then cancel the hub.
///
/// The node role is logged alongside the signal: operators tailing mixed
/// leader/follower logs need to see which cluster member is going down,
/// since a leader shutdown stalls config sync while a follower shutdown
/// merely drops one worker.
pub async fn wait_for_signal(cancel: CancellationToken, role: &str) {
    let signal = shutdown_signal().await;
    hub_info!(
        sys,
        signal,
        role,
        "received signal, initiating graceful shutdown"
    );
    cancel.cancel();
}

/// Resolve which shutdown signal fired.
#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to listen for SIGTERM");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for Ctrl-C");
    "SIGINT"
}
