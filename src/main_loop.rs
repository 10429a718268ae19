//! The gateway main loop.
//!
//! Once [`crate::initialize`] has bound the REST listener and restored state,
//! the main loop owns the process lifetime: it drives the periodic lease
//! reaper and turns termination signals into a graceful shutdown that writes
//! a final state snapshot before the server tasks are torn down.

use std::time::Duration;

use anyhow::Result;
use tokio::select;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;
use tracing::info;

use crate::models::timestamp::Timestamp;
use crate::pool_manager::WalletPoolManager;
use crate::state::GatewayStateLock;

/// The immutable part of the input for the main loop function
pub struct MainLoopHandler {
    state: GatewayStateLock,
    pool_manager: WalletPoolManager,
    task_handles: Vec<JoinHandle<()>>,
}

impl MainLoopHandler {
    pub(crate) fn new(
        state: GatewayStateLock,
        pool_manager: WalletPoolManager,
        task_handles: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            state,
            pool_manager,
            task_handles,
        }
    }

    /// Run the gateway until a termination signal arrives.
    ///
    /// The reaper timer must be reset every time it has run. Everything else
    /// in this process is request-driven and lives in the spawned server
    /// tasks.
    pub async fn run(mut self) -> Result<()> {
        let reap_interval = self.state.cli().reap_interval;
        let reap_timer = time::sleep(reap_interval);
        tokio::pin!(reap_timer);

        // Spawn tasks to monitor for SIGTERM and SIGQUIT. These signals are
        // only used on Unix systems.
        let (_tx_term, mut rx_term): (mpsc::Sender<()>, mpsc::Receiver<()>) =
            tokio::sync::mpsc::channel(2);
        let (_tx_quit, mut rx_quit): (mpsc::Sender<()>, mpsc::Receiver<()>) =
            tokio::sync::mpsc::channel(2);
        #[cfg(unix)]
        {
            use tokio::signal::unix::signal;
            use tokio::signal::unix::SignalKind;

            // Monitor for SIGTERM
            let mut sigterm = signal(SignalKind::terminate())?;
            tokio::spawn(async move {
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM");
                    let _ = _tx_term.send(()).await;
                }
            });

            // Monitor for SIGQUIT
            let mut sigquit = signal(SignalKind::quit())?;
            tokio::spawn(async move {
                if sigquit.recv().await.is_some() {
                    info!("Received SIGQUIT");
                    let _ = _tx_quit.send(()).await;
                }
            });
        }

        loop {
            select! {
                Ok(()) = signal::ctrl_c() => {
                    info!("Detected Ctrl+c signal.");
                    break;
                }

                // Monitor for SIGTERM and SIGQUIT.
                Some(_) = rx_term.recv() => {
                    info!("Detected SIGTERM signal.");
                    break;
                }
                Some(_) = rx_quit.recv() => {
                    info!("Detected SIGQUIT signal.");
                    break;
                }

                // Release expired leases and cancel stale pending intents.
                _ = &mut reap_timer => {
                    debug!("Timer: lease reaper");
                    self.pool_manager.reap_expired_leases(Timestamp::now()).await;

                    reap_timer.as_mut().reset(tokio::time::Instant::now() + reap_interval);
                }
            }
        }

        self.graceful_shutdown().await?;
        info!("Shutdown completed.");
        Ok(())
    }

    async fn graceful_shutdown(&mut self) -> Result<()> {
        info!("Shutdown initiated.");

        // Write a final snapshot so nothing confirmed in this session is lost.
        self.state.persist().await?;

        tokio::time::sleep(Duration::from_millis(50)).await;

        // Server tasks should be idle by now. If not, abort them violently.
        self.task_handles.iter().for_each(|jh| jh.abort());

        // wait for all to finish.
        futures::future::join_all(std::mem::take(&mut self.task_handles)).await;

        Ok(())
    }
}
