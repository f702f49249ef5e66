use std::future::Future;
use std::io;
use std::pin::Pin;

use cfg_if::cfg_if;
use futures::future::Shared;
use futures::FutureExt;
use tracing::{info, warn};

cfg_if! {
    if #[cfg(unix)] {
        use tokio::signal::unix::{signal, SignalKind};

        async fn wait_for_termination() -> io::Result<()> {
            let mut interrupt = signal(SignalKind::interrupt())?;
            let mut terminate = signal(SignalKind::terminate())?;
            let mut hangup = signal(SignalKind::hangup())?;
            tokio::select! {
                _ = interrupt.recv() => info!(signal = "SIGINT", "Termination signal received"),
                _ = terminate.recv() => info!(signal = "SIGTERM", "Termination signal received"),
                _ = hangup.recv() => info!(signal = "SIGHUP", "Termination signal received"),
            }
            Ok(())
        }
    } else if #[cfg(windows)] {
        use tokio::signal::windows::{ctrl_break, ctrl_c, ctrl_close, ctrl_shutdown};

        async fn wait_for_termination() -> io::Result<()> {
            let mut c = ctrl_c()?;
            let mut brk = ctrl_break()?;
            let mut close = ctrl_close()?;
            let mut shutdown = ctrl_shutdown()?;
            tokio::select! {
                _ = c.recv() => info!(signal = "ctrl_c", "Termination signal received"),
                _ = brk.recv() => info!(signal = "ctrl_break", "Termination signal received"),
                _ = close.recv() => info!(signal = "ctrl_close", "Termination signal received"),
                _ = shutdown.recv() => info!(signal = "ctrl_shutdown", "Termination signal received"),
            }
            Ok(())
        }
    } else {
        compile_error!("termination signals are only available on unix and windows targets");
    }
}

/// Resolves once the process is asked to terminate. Clones all resolve together.
pub type TerminationSignal = Shared<Pin<Box<dyn Future<Output = ()> + Send>>>;

/// Installs the OS signal handlers and returns a future completing on the first signal.
///
/// If the handlers cannot be installed the future never resolves, so the executor keeps
/// running until it is shut down explicitly.
pub fn termination_signal() -> TerminationSignal {
    async {
        if let Err(error) = wait_for_termination().await {
            warn!(%error, "Could not listen for termination signals");
            futures::future::pending::<()>().await;
        }
    }
    .boxed()
    .shared()
}
