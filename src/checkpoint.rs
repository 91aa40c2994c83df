use crate::persistence;
use crate::ring_buffer::RingBuffer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;

#[derive(Debug)]
enum CheckpointCommand {
    SaveNow,
}

/// Background task that periodically writes the history to disk.
///
/// Dropping the sender (via [`HistoryCheckpointer::shutdown`]) triggers one
/// final save before the task exits.
pub struct HistoryCheckpointer {
    sender: mpsc::UnboundedSender<CheckpointCommand>,
    handle: tokio::task::JoinHandle<()>,
}

impl HistoryCheckpointer {
    pub fn spawn(buffer: Arc<RingBuffer>, path: PathBuf, every: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            Self::checkpoint_worker(buffer, path, receiver, every).await;
        });

        Self { sender, handle }
    }

    pub fn save_now(&self) {
        if let Err(e) = self.sender.send(CheckpointCommand::SaveNow) {
            log::warn!("Failed to request history checkpoint: {e}");
        }
    }

    /// Stops the worker after a final save and waits for it to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.handle.await {
            log::error!("History checkpoint worker failed: {e}");
        }
    }

    async fn checkpoint_worker(
        buffer: Arc<RingBuffer>,
        path: PathBuf,
        mut receiver: mpsc::UnboundedReceiver<CheckpointCommand>,
        every: Duration,
    ) {
        let mut timer = interval(every);
        // The first tick completes immediately; nothing is worth saving yet.
        timer.tick().await;

        loop {
            tokio::select! {
                command = receiver.recv() => {
                    match command {
                        Some(CheckpointCommand::SaveNow) => {
                            Self::checkpoint(&buffer, &path);
                        }
                        None => {
                            Self::checkpoint(&buffer, &path);
                            break;
                        }
                    }
                }
                _ = timer.tick() => {
                    Self::checkpoint(&buffer, &path);
                }
            }
        }
    }

    fn checkpoint(buffer: &RingBuffer, path: &Path) {
        match persistence::save(buffer, path) {
            Ok(rows) => log::debug!("History checkpoint: {rows} rows written"),
            Err(e) => log::error!("Failed to checkpoint history: {e}"),
        }
    }
}
