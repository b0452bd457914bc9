use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancel `cancel` on SIGINT or SIGTERM.
pub fn cancel_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!(error = %e, "could not install SIGTERM handler");
                    wait_for_ctrl_c().await;
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = wait_for_ctrl_c() => {}
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }

        #[cfg(not(unix))]
        wait_for_ctrl_c().await;

        cancel.cancel();
    });
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received SIGINT"),
        Err(e) => {
            error!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
