//! Application-master launcher.
//!
//! Launching a master process is slow, external work that must never run
//! under the scheduler's lock. The launcher takes launch/cleanup commands
//! on an unbounded internal queue; one dispatcher task drains the queue
//! into a bounded worker pool. Submission is fire-and-forget: the
//! scheduler side only knows that an application appeared or went away.
//!
//! Shutdown closes the intake, drains commands already queued, waits for
//! in-flight work, then joins. Cancelling an already-dispatched launch is
//! the launch callback's own concern.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use stratus_core::{ApplicationId, Service, ServiceFuture};

/// Work the launcher performs for one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterCommand {
    Launch {
        app_id: ApplicationId,
        user: String,
        queue: String,
    },
    Cleanup {
        app_id: ApplicationId,
    },
}

impl MasterCommand {
    pub fn app_id(&self) -> ApplicationId {
        match self {
            MasterCommand::Launch { app_id, .. } | MasterCommand::Cleanup { app_id } => *app_id,
        }
    }
}

impl fmt::Display for MasterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterCommand::Launch { app_id, .. } => write!(f, "launch {app_id}"),
            MasterCommand::Cleanup { app_id } => write!(f, "cleanup {app_id}"),
        }
    }
}

/// Future returned by launch work.
pub type LaunchFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// The work performed per command, supplied by the embedding daemon.
pub type LaunchCallback = Arc<dyn Fn(MasterCommand) -> LaunchFuture + Send + Sync>;

/// Cheap cloneable intake for submitting commands.
#[derive(Clone)]
pub struct LauncherHandle {
    tx: mpsc::UnboundedSender<MasterCommand>,
}

impl LauncherHandle {
    /// Enqueue a command. Returns `false` once the launcher has shut down.
    pub fn submit(&self, command: MasterCommand) -> bool {
        let accepted = self.tx.send(command).is_ok();
        if !accepted {
            debug!("launcher intake closed; command dropped");
        }
        accepted
    }
}

/// Dispatcher plus bounded worker pool for master launch work.
pub struct MasterLauncher {
    callback: LaunchCallback,
    workers: usize,
    tx: mpsc::UnboundedSender<MasterCommand>,
    rx: Option<mpsc::UnboundedReceiver<MasterCommand>>,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: Option<JoinHandle<()>>,
}

impl MasterLauncher {
    /// Create a launcher with `workers` concurrent launch slots.
    ///
    /// Commands may be submitted immediately; they sit in the intake queue
    /// until the launcher is started.
    pub fn new(workers: usize, callback: LaunchCallback) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            callback,
            workers: workers.max(1),
            tx,
            rx: Some(rx),
            shutdown_tx,
            dispatcher: None,
        }
    }

    pub fn handle(&self) -> LauncherHandle {
        LauncherHandle {
            tx: self.tx.clone(),
        }
    }

    async fn dispatch(
        mut rx: mpsc::UnboundedReceiver<MasterCommand>,
        mut shutdown_rx: watch::Receiver<bool>,
        callback: LaunchCallback,
        workers: usize,
    ) {
        let pool = Arc::new(Semaphore::new(workers));
        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => {
                        let permit = pool
                            .clone()
                            .acquire_owned()
                            .await
                            .expect("launcher pool semaphore is never closed");
                        let callback = callback.clone();
                        tokio::spawn(async move {
                            let label = command.to_string();
                            debug!(command = %label, "launcher worker starting");
                            if let Err(e) = (callback)(command).await {
                                warn!(command = %label, error = %e, "launch work failed");
                            }
                            drop(permit);
                        });
                    }
                    // Intake closed and fully drained.
                    None => break,
                },
                _ = shutdown_rx.changed() => {
                    // Stop accepting; whatever is already queued still runs.
                    rx.close();
                }
            }
        }
        // Wait for in-flight work before the dispatcher exits.
        let _ = pool.acquire_many(workers as u32).await;
        info!("launcher drained and stopped");
    }
}

impl Service for MasterLauncher {
    fn name(&self) -> &str {
        "master-launcher"
    }

    fn start(&mut self) -> ServiceFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            let rx = self
                .rx
                .take()
                .ok_or_else(|| anyhow::anyhow!("launcher already started"))?;
            let shutdown_rx = self.shutdown_tx.subscribe();
            let callback = self.callback.clone();
            let workers = self.workers;
            self.dispatcher = Some(tokio::spawn(Self::dispatch(
                rx,
                shutdown_rx,
                callback,
                workers,
            )));
            info!(workers, "launcher started");
            Ok(())
        })
    }

    fn stop(&mut self) -> ServiceFuture<'_, ()> {
        Box::pin(async move {
            let _ = self.shutdown_tx.send(true);
            if let Some(dispatcher) = self.dispatcher.take() {
                let _ = dispatcher.await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn app(seq: u32) -> ApplicationId {
        ApplicationId::new(1000, seq)
    }

    fn launch(seq: u32) -> MasterCommand {
        MasterCommand::Launch {
            app_id: app(seq),
            user: "alice".to_string(),
            queue: "root.default".to_string(),
        }
    }

    fn counting_callback(counter: Arc<AtomicUsize>) -> LaunchCallback {
        Arc::new(move |_| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn commands_queued_before_start_run_after_start() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut launcher = MasterLauncher::new(2, counting_callback(counter.clone()));
        let handle = launcher.handle();

        assert!(handle.submit(launch(1)));
        assert!(handle.submit(launch(2)));

        launcher.start().await.unwrap();
        launcher.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stop_drains_queued_commands() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut launcher = MasterLauncher::new(1, counting_callback(counter.clone()));
        let handle = launcher.handle();

        launcher.start().await.unwrap();
        for seq in 0..20 {
            handle.submit(launch(seq));
        }
        launcher.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn worker_pool_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (active2, peak2) = (active.clone(), peak.clone());

        let callback: LaunchCallback = Arc::new(move |_| {
            let active = active2.clone();
            let peak = peak2.clone();
            Box::pin(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        });

        let mut launcher = MasterLauncher::new(2, callback);
        let handle = launcher.handle();
        launcher.start().await.unwrap();
        for seq in 0..8 {
            handle.submit(launch(seq));
        }
        launcher.stop().await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn submit_after_stop_is_rejected() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut launcher = MasterLauncher::new(1, counting_callback(counter.clone()));
        let handle = launcher.handle();

        launcher.start().await.unwrap();
        launcher.stop().await;

        assert!(!handle.submit(launch(1)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn callback_errors_do_not_stop_the_pool() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        let callback: LaunchCallback = Arc::new(move |command| {
            let counter = counter2.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if command.app_id().id % 2 == 0 {
                    anyhow::bail!("launch failed");
                }
                Ok(())
            })
        });

        let mut launcher = MasterLauncher::new(1, callback);
        let handle = launcher.handle();
        launcher.start().await.unwrap();
        for seq in 1..=4 {
            handle.submit(launch(seq));
        }
        launcher.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
