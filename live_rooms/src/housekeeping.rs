use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::info;

use crate::engine::ChatEngine;
use crate::model::now_ms;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically evict rooms that ended longer than `retention` ago.
pub fn run_housekeeping(
    engine: Arc<ChatEngine>,
    retention: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(every);
        loop {
            tick.tick().await;
            let evicted = engine.evict_ended(retention, now_ms());
            if !evicted.is_empty() {
                info!(count = evicted.len(), "evicted ended rooms");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::engine::Limits;
    use room_api::{CreateRoom, EndStream, Identity, RoomSpec};

    #[tokio::test]
    async fn sweeper_evicts_ended_rooms() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = Arc::new(ChatEngine::new(store, Limits::default()));
        let (a, _rx) = engine.connect();
        let admin = Identity {
            uid: "a".into(),
            display_name: "A".into(),
            username: "a".into(),
            avatar: None,
        };
        engine
            .create_room(
                a.conn(),
                CreateRoom {
                    room: RoomSpec {
                        id: Some("r1".into()),
                        title: "t".into(),
                        ..Default::default()
                    },
                    user: admin,
                },
            )
            .await
            .unwrap();
        engine
            .end_stream(
                a.conn(),
                EndStream {
                    room_id: "r1".into(),
                    user: None,
                },
            )
            .unwrap();

        let sweeper = run_housekeeping(engine.clone(), Duration::ZERO, Duration::from_millis(10));
        for _ in 0..50 {
            if engine.registry().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweeper.abort();
        assert!(engine.registry().is_empty());
    }
}
