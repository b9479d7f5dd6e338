use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{EngineSnapshot, Intent};

/// Broadcast snapshot stream type used by frontend subscribers.
pub type SnapshotStream = broadcast::Receiver<EngineSnapshot>;

/// Errors returned by engine channel operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The intent receiver side is closed.
    #[error("intent channel is closed")]
    IntentChannelClosed,
}

/// Intent/snapshot channel pair shared by the runtime and a frontend.
#[derive(Clone, Debug)]
pub struct EngineChannels {
    intent_tx: mpsc::Sender<Intent>,
    snapshot_tx: broadcast::Sender<EngineSnapshot>,
}

impl EngineChannels {
    /// Create a new channel set and return it with the intent receiver.
    pub fn new(intent_buffer: usize, snapshot_buffer: usize) -> (Self, mpsc::Receiver<Intent>) {
        let (intent_tx, intent_rx) = mpsc::channel(intent_buffer.max(1));
        let (snapshot_tx, _) = broadcast::channel(snapshot_buffer.max(1));

        (
            Self {
                intent_tx,
                snapshot_tx,
            },
            intent_rx,
        )
    }

    /// Clone the snapshot sender.
    pub fn snapshot_sender(&self) -> broadcast::Sender<EngineSnapshot> {
        self.snapshot_tx.clone()
    }

    /// Subscribe to engine snapshots.
    pub fn subscribe(&self) -> SnapshotStream {
        self.snapshot_tx.subscribe()
    }

    /// Queue one intent for the runtime.
    pub async fn send_intent(&self, intent: Intent) -> Result<(), ChannelError> {
        self.intent_tx
            .send(intent)
            .await
            .map_err(|_| ChannelError::IntentChannelClosed)
    }

    /// Publish a snapshot to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, snapshot: EngineSnapshot) {
        let _ = self.snapshot_tx.send(snapshot);
    }
}
