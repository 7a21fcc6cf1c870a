//! Shutdown signal handling.
//!
//! The first SIGINT / SIGTERM / SIGHUP cancels a shared
//! [`CancellationToken`]; the poll loop stops and upload workers drain.
//! A second signal exits immediately for the impatient operator.

use tokio_util::sync::CancellationToken;

/// Install the signal listener task and return the token it cancels.
pub(crate) fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();

    let handler_token = token.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        let (mut sigterm, mut sighup) = {
            use tokio::signal::unix::{signal, SignalKind};
            (
                signal(SignalKind::terminate()).expect("failed to register SIGTERM handler"),
                signal(SignalKind::hangup()).expect("failed to register SIGHUP handler"),
            )
        };

        let mut signals_seen = 0u32;
        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                    _ = sighup.recv() => {}
                }
            }

            #[cfg(not(unix))]
            {
                tokio::signal::ctrl_c()
                    .await
                    .expect("failed to listen for Ctrl+C");
            }

            signals_seen += 1;
            if signals_seen == 1 {
                tracing::info!("shutdown requested, draining in-flight transfers");
                tracing::info!("send the signal again to exit immediately");
                handler_token.cancel();
            } else {
                tracing::warn!("second shutdown signal, exiting now");
                std::process::exit(130);
            }
        }
    });

    token
}
