use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::gateway::PersistenceGateway;
use crate::model::{Message, RoomRecord};

/// A write the store should eventually apply.
#[derive(Debug)]
pub enum Intent {
    UpsertRoom(RoomRecord),
    AppendMessage(Message),
    UpdateMessage(Message),
    /// Completes once every intent queued before it has been attempted.
    Barrier(oneshot::Sender<()>),
}

impl Intent {
    fn describe(&self) -> String {
        match self {
            Intent::UpsertRoom(room) => format!("upsert room {}", room.id),
            Intent::AppendMessage(msg) => format!("append message {}", msg.id),
            Intent::UpdateMessage(msg) => format!("update message {}", msg.id),
            Intent::Barrier(_) => "barrier".into(),
        }
    }

    fn apply(self, gateway: &dyn PersistenceGateway) -> Result<(), StoreError> {
        match self {
            Intent::UpsertRoom(room) => gateway.upsert_room(&room),
            Intent::AppendMessage(msg) => gateway.append_message(&msg),
            Intent::UpdateMessage(msg) => gateway.update_message(&msg),
            Intent::Barrier(done) => {
                let _ = done.send(());
                Ok(())
            }
        }
    }
}

/// Fire-and-forget queue in front of the persistence gateway.
///
/// A single worker applies intents in the order they were enqueued. Failures
/// are logged and dropped; in-memory room state is never rolled back.
#[derive(Clone)]
pub struct Outbox {
    tx: UnboundedSender<Intent>,
}

impl Outbox {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(gateway: Arc<dyn PersistenceGateway>) -> Self {
        let (outbox, rx) = Self::channel();
        tokio::spawn(run(gateway, rx));
        outbox
    }

    /// An outbox whose intents are handed to the caller instead of a worker.
    pub fn channel() -> (Self, UnboundedReceiver<Intent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, intent: Intent) {
        if let Err(err) = self.tx.send(intent) {
            warn!("persistence outbox closed, dropping {}", err.0.describe());
        }
    }

    /// Wait until everything enqueued so far has been attempted.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Intent::Barrier(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

async fn run(gateway: Arc<dyn PersistenceGateway>, mut rx: UnboundedReceiver<Intent>) {
    while let Some(intent) = rx.recv().await {
        if let Intent::Barrier(done) = intent {
            let _ = done.send(());
            continue;
        }
        let what = intent.describe();
        let gw = gateway.clone();
        match tokio::task::spawn_blocking(move || intent.apply(gw.as_ref())).await {
            Ok(Ok(())) => debug!("persisted: {what}"),
            Ok(Err(err)) => warn!("persistence failure ({what}): {err}"),
            Err(err) => warn!("persistence task failed ({what}): {err}"),
        }
    }
    debug!("persistence outbox stopped");
}
