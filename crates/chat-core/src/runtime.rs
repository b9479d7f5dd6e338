//! Task that serializes intents and stream events through one engine.

use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    channel::{ChannelError, EngineChannels, SnapshotStream},
    engine::ChatEngine,
    types::{EngineSnapshot, Intent},
};

/// Frontend handle to a running engine task.
#[derive(Debug)]
pub struct RuntimeHandle {
    channels: EngineChannels,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl RuntimeHandle {
    pub async fn send(&self, intent: Intent) -> Result<(), ChannelError> {
        self.channels.send_intent(intent).await
    }

    pub fn subscribe(&self) -> SnapshotStream {
        self.channels.subscribe()
    }

    /// Stop the loop, close every stream and wait for the task to finish.
    pub async fn shutdown(self) {
        self.stop.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "engine task ended abnormally");
        }
    }
}

/// Move `engine` onto its own task. A snapshot is published after every
/// intent and every stream event.
///
/// The handle owns the only intent sender: dropping it without calling
/// [`RuntimeHandle::shutdown`] still stops the task and closes every stream.
pub fn spawn_runtime(
    engine: ChatEngine,
    intent_buffer: usize,
    snapshot_buffer: usize,
) -> RuntimeHandle {
    let (channels, intent_rx) = EngineChannels::new(intent_buffer, snapshot_buffer);
    let stop = CancellationToken::new();
    let runtime = EngineRuntime {
        engine,
        snapshot_tx: channels.snapshot_sender(),
        intent_rx,
        stop: stop.child_token(),
    };
    let task = tokio::spawn(async move {
        runtime.run().await;
    });

    RuntimeHandle {
        channels,
        stop,
        task,
    }
}

struct EngineRuntime {
    engine: ChatEngine,
    snapshot_tx: broadcast::Sender<EngineSnapshot>,
    intent_rx: mpsc::Receiver<Intent>,
    stop: CancellationToken,
}

impl EngineRuntime {
    async fn run(mut self) {
        let mut stream_events = self.engine.subscribe_stream_events();
        self.publish();

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                intent = self.intent_rx.recv() => match intent {
                    Some(intent) => self.engine.handle(intent).await,
                    None => {
                        debug!("all intent senders dropped");
                        break;
                    }
                },
                event = stream_events.recv() => match event {
                    Ok(event) => self.engine.apply_stream_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "stream event subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
            self.publish();
        }

        info!("engine runtime stopping");
        self.engine.shutdown().await;
    }

    fn publish(&self) {
        let _ = self.snapshot_tx.send(self.engine.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        backend::ChatBackend,
        engine::EngineConfig,
        retry::RetryPolicy,
        state_machine::View,
        test_support::{MockBackend, wait_until},
    };

    fn runtime_for(backend: &Arc<MockBackend>) -> RuntimeHandle {
        let config = EngineConfig {
            reconnect: RetryPolicy::fixed(60_000),
            request_timeout: Duration::from_secs(2),
            ..EngineConfig::default()
        };
        let engine = ChatEngine::new(Arc::clone(backend) as Arc<dyn ChatBackend>, config);
        spawn_runtime(engine, 8, 64)
    }

    async fn wait_for_snapshot<F>(snapshots: &mut SnapshotStream, mut matches: F) -> EngineSnapshot
    where
        F: FnMut(&EngineSnapshot) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match snapshots.recv().await {
                    Ok(snapshot) if matches(&snapshot) => return snapshot,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("snapshot channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for snapshot")
    }

    #[tokio::test]
    async fn intents_produce_snapshots() {
        let backend = Arc::new(MockBackend::new());
        let handle = runtime_for(&backend);
        let mut snapshots = handle.subscribe();

        handle
            .send(Intent::Input("alice".into()))
            .await
            .expect("intent should enqueue");
        handle.send(Intent::Submit).await.expect("intent should enqueue");

        let snapshot =
            wait_for_snapshot(&mut snapshots, |snapshot| snapshot.view == View::RoomList).await;
        assert_eq!(snapshot.username.as_deref(), Some("alice"));
        assert_eq!(snapshot.input, "");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn stream_loss_shows_up_in_status() {
        let backend = Arc::new(MockBackend::new());
        let handle = runtime_for(&backend);
        let mut snapshots = handle.subscribe();

        for intent in [
            Intent::Input("alice".into()),
            Intent::Submit,
            Intent::EnterJoinFlow,
            Intent::Input("lobby".into()),
            Intent::Submit,
        ] {
            handle.send(intent).await.expect("intent should enqueue");
        }
        wait_for_snapshot(&mut snapshots, |snapshot| {
            snapshot.view.current_room() == Some("lobby")
        })
        .await;

        backend.peer("lobby").fail();
        let snapshot =
            wait_for_snapshot(&mut snapshots, |snapshot| snapshot.status_text.is_some()).await;
        assert!(
            snapshot
                .status_text
                .is_some_and(|text| text.contains("lobby"))
        );
        assert_eq!(snapshot.joined_rooms, vec!["lobby".to_owned()]);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_room_streams() {
        let backend = Arc::new(MockBackend::new());
        let handle = runtime_for(&backend);
        let mut snapshots = handle.subscribe();

        for intent in [
            Intent::Input("alice".into()),
            Intent::Submit,
            Intent::CreateRoom,
            Intent::Submit,
        ] {
            handle.send(intent).await.expect("intent should enqueue");
        }
        wait_for_snapshot(&mut snapshots, |snapshot| {
            snapshot.view.current_room() == Some("r1")
        })
        .await;
        let peer = backend.peer("r1");

        handle.shutdown().await;

        // The supervisor dropped its read half, so nothing is listening.
        assert!(peer.is_detached());
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_runtime() {
        let backend = Arc::new(MockBackend::new());
        let handle = runtime_for(&backend);
        let mut snapshots = handle.subscribe();

        for intent in [
            Intent::Input("alice".into()),
            Intent::Submit,
            Intent::EnterJoinFlow,
            Intent::Input("lobby".into()),
            Intent::Submit,
        ] {
            handle.send(intent).await.expect("intent should enqueue");
        }
        wait_for_snapshot(&mut snapshots, |snapshot| {
            snapshot.view.current_room() == Some("lobby")
        })
        .await;
        let peer = backend.peer("lobby");

        drop(handle);

        wait_until(|| peer.is_detached()).await;
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match snapshots.recv().await {
                    Err(RecvError::Closed) => return,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "snapshot channel should close with the runtime");
    }
}
