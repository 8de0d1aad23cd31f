use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use presence_protocol::RegisterMsg;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::constants::REGISTER_ATTEMPTS;
use crate::room::{ConnId, ConnSink, RegisterError, RoomHandle, RoomId, RoomInfo, RoomSummary};

#[derive(Default)]
pub struct RoomMetrics {
    pub rooms_created_total: AtomicU64,
    pub rooms_closed_total: AtomicU64,
    pub participants_registered_total: AtomicU64,
    pub participants_left_total: AtomicU64,
}

pub struct RoomManager {
    rooms: RwLock<HashMap<RoomId, Arc<RoomHandle>>>,
    next_generation: AtomicU64,
    closed_tx: mpsc::UnboundedSender<(RoomId, u64)>,
    pub metrics: RoomMetrics,
    server_started_at: Instant,
}

impl RoomManager {
    pub fn new(server_started_at: Instant) -> Arc<Self> {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            closed_tx,
            metrics: RoomMetrics::default(),
            server_started_at,
        });
        tokio::spawn(reap_closed_rooms(Arc::downgrade(&manager), closed_rx));
        manager
    }

    pub async fn register(
        &self,
        room_key: &str,
        conn_id: ConnId,
        msg: RegisterMsg,
        sink: ConnSink,
    ) -> Result<Arc<RoomHandle>, RegisterError> {
        for _ in 0..REGISTER_ATTEMPTS {
            let room = self.get_or_create_room(room_key).await;
            match room.register(conn_id, msg.clone(), sink.clone()).await {
                Ok(participant) => {
                    self.metrics
                        .participants_registered_total
                        .fetch_add(1, Ordering::Relaxed);
                    debug!(
                        room_id = room_key,
                        participant_id = participant.id.as_str(),
                        "registration accepted"
                    );
                    return Ok(room);
                }
                Err(RegisterError::RoomClosing) => {
                    // Raced with the last participant leaving; start a fresh room.
                    self.remove_room(room.id(), room.generation()).await;
                }
            }
        }
        Err(RegisterError::RoomClosing)
    }

    // Idempotent: a connection that already left is a no-op.
    pub async fn deregister(&self, room: &RoomHandle, conn_id: ConnId) {
        let outcome = room.deregister(conn_id).await;
        if outcome.removed.is_some() {
            self.metrics
                .participants_left_total
                .fetch_add(1, Ordering::Relaxed);
        }
        if outcome.room_empty {
            self.remove_room(room.id(), room.generation()).await;
        }
    }

    pub async fn get_room(&self, room_key: &str) -> Option<Arc<RoomHandle>> {
        self.rooms
            .read()
            .await
            .get(&RoomId::from(room_key))
            .cloned()
    }

    pub async fn list_rooms(&self) -> Vec<RoomSummary> {
        let handles: Vec<Arc<RoomHandle>> = self.rooms.read().await.values().cloned().collect();
        let mut out = Vec::new();
        for room in handles {
            if let Some(summary) = room.summary().await {
                out.push(summary);
            }
        }
        out.sort_by(|a, b| {
            b.current_participants
                .cmp(&a.current_participants)
                .then(b.last_activity_at_ms.cmp(&a.last_activity_at_ms))
        });
        out
    }

    pub async fn room_info(&self, room_key: &str) -> Option<RoomInfo> {
        self.get_room(room_key).await?.info().await
    }

    pub async fn current_rooms(&self) -> usize {
        self.rooms.read().await.len()
    }

    async fn get_or_create_room(&self, room_key: &str) -> Arc<RoomHandle> {
        let room_id = RoomId::from(room_key);
        if let Some(room) = self.rooms.read().await.get(&room_id) {
            return Arc::clone(room);
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(&room_id) {
            return Arc::clone(room);
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = RoomHandle::new(
            room_id.clone(),
            generation,
            self.server_started_at,
            Some(self.closed_tx.clone()),
        );
        rooms.insert(room_id, Arc::clone(&handle));
        self.metrics
            .rooms_created_total
            .fetch_add(1, Ordering::Relaxed);
        handle
    }

    // Only removes the generation it was given; a newer room under the same
    // key stays.
    async fn remove_room(&self, room_id: &RoomId, generation: u64) {
        let mut rooms = self.rooms.write().await;
        let is_current = rooms
            .get(room_id)
            .is_some_and(|room| room.generation() == generation);
        if is_current {
            rooms.remove(room_id);
            self.metrics
                .rooms_closed_total
                .fetch_add(1, Ordering::Relaxed);
            info!(room_id = room_id.as_str(), generation, "room discarded");
        }
    }
}

async fn reap_closed_rooms(
    manager: Weak<RoomManager>,
    mut closed_rx: mpsc::UnboundedReceiver<(RoomId, u64)>,
) {
    while let Some((room_id, generation)) = closed_rx.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.remove_room(&room_id, generation).await;
    }
}
