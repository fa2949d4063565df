//! Long-running task loop fed by an mpsc channel.
//!
//! The confirm tracker runs on a `BackgroundWorker`: publishers push
//! confirm events into the channel, a timer drives housekeeping, and
//! `stop` lets queued events finish before the runnable shuts down.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Default task channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Work executed by a `BackgroundWorker`. All methods run on the worker
/// task, one at a time.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    async fn run(&mut self, task: Self::Task);

    /// Housekeeping on every tick interval.
    async fn on_tick(&mut self) {}

    /// Runs once, after the last task.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Handle to a spawned task loop driving a [`BackgroundRunnable`].
///
/// Tasks already queued when `stop` is called are still processed.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the worker with a fresh channel of `DEFAULT_CHANNEL_CAPACITY`.
    pub fn start(runnable: R, tick_interval_ms: u64) -> Self {
        let channel = mpsc::channel::<R::Task>(DEFAULT_CHANNEL_CAPACITY);
        Self::start_with_channel(runnable, channel, tick_interval_ms)
    }

    /// Start the worker on a channel created by the caller.
    ///
    /// Used when producers must hold a sender before the runnable exists,
    /// e.g. a publisher that both feeds and is used by the runnable.
    pub fn start_with_channel(
        mut runnable: R,
        (tx, mut rx): (mpsc::Sender<R::Task>, mpsc::Receiver<R::Task>),
        tick_interval_ms: u64,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut tick_interval =
                tokio::time::interval(std::time::Duration::from_millis(tick_interval_ms));
            // Skip the first immediate tick so on_tick doesn't fire at startup.
            tick_interval.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                    _ = tick_interval.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        rx.close();
                        while let Some(t) = rx.recv().await {
                            runnable.run(t).await;
                        }
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// A sender producers can use to feed the worker directly.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub fn sender(&self) -> anyhow::Result<mpsc::Sender<R::Task>> {
        self.tx
            .clone()
            .ok_or_else(|| anyhow::anyhow!("worker not running"))
    }

    /// Submit a task to the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped or the channel is closed.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Stop the worker, draining queued tasks, and wait for it to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
