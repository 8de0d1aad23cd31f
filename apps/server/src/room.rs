use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use presence_protocol::{
    encode_evicted, encode_participant_left, encode_participant_update, encode_registered,
    MoveMsg, Participant, RegisterMsg,
};
use smallvec::SmallVec;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::constants::ROOM_COMMAND_CAPACITY;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ConnId(pub u64);

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RoomId(pub Arc<str>);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RoomId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RoomStatus {
    Created,
    Running,
    Closing,
    Closed,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RoomSummary {
    pub room_id: String,
    pub current_participants: usize,
    pub status: RoomStatus,
    pub created_at_ms: u64,
    pub last_activity_at_ms: u64,
}

#[derive(Clone, Debug)]
pub struct RoomInfo {
    pub summary: RoomSummary,
    pub participants: Vec<Participant>,
}

// Outbound side of one socket as a room sees it.
#[derive(Clone, Debug)]
pub struct ConnSink {
    pub tx: mpsc::Sender<Bytes>,
    pub close_tx: mpsc::Sender<Option<Bytes>>,
}

impl ConnSink {
    // Ends the socket session; `farewell` bypasses the outbound queue.
    pub fn close(&self, farewell: Option<Bytes>) {
        let _ = self.close_tx.try_send(farewell);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegisterError {
    RoomClosing,
}

impl RegisterError {
    pub fn reason(self) -> &'static str {
        match self {
            Self::RoomClosing => "room_closing",
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeregisterOutcome {
    pub removed: Option<String>,
    pub room_empty: bool,
}

enum RoomCmd {
    Register {
        conn_id: ConnId,
        msg: RegisterMsg,
        sink: ConnSink,
        response: oneshot::Sender<Result<Participant, RegisterError>>,
    },
    Move {
        conn_id: ConnId,
        msg: MoveMsg,
    },
    Deregister {
        conn_id: ConnId,
        response: oneshot::Sender<DeregisterOutcome>,
    },
    Summary {
        response: oneshot::Sender<RoomSummary>,
    },
    Info {
        response: oneshot::Sender<RoomInfo>,
    },
}

pub struct RoomHandle {
    id: RoomId,
    generation: u64,
    tx: mpsc::Sender<RoomCmd>,
}

impl RoomHandle {
    pub fn new(
        id: RoomId,
        generation: u64,
        server_started_at: Instant,
        closed_tx: Option<mpsc::UnboundedSender<(RoomId, u64)>>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(ROOM_COMMAND_CAPACITY);
        let handle = Arc::new(Self {
            id: id.clone(),
            generation,
            tx,
        });

        tokio::spawn(async move {
            let mut task = RoomTask::new(id.clone(), rx, server_started_at);
            task.run().await;
            if let Some(closed_tx) = closed_tx {
                let _ = closed_tx.send((id, generation));
            }
        });

        handle
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn register(
        &self,
        conn_id: ConnId,
        msg: RegisterMsg,
        sink: ConnSink,
    ) -> Result<Participant, RegisterError> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = RoomCmd::Register {
            conn_id,
            msg,
            sink,
            response: response_tx,
        };
        if self.tx.send(cmd).await.is_err() {
            return Err(RegisterError::RoomClosing);
        }
        response_rx.await.unwrap_or(Err(RegisterError::RoomClosing))
    }

    // Best-effort: a full room queue drops the move.
    pub fn relay(&self, conn_id: ConnId, msg: MoveMsg) {
        if self.tx.try_send(RoomCmd::Move { conn_id, msg }).is_err() {
            debug!(
                room_id = self.id.as_str(),
                conn_id = conn_id.0,
                "dropping move: room queue unavailable"
            );
        }
    }

    pub async fn deregister(&self, conn_id: ConnId) -> DeregisterOutcome {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = RoomCmd::Deregister {
            conn_id,
            response: response_tx,
        };
        if self.tx.send(cmd).await.is_err() {
            return DeregisterOutcome {
                removed: None,
                room_empty: true,
            };
        }
        response_rx.await.unwrap_or(DeregisterOutcome {
            removed: None,
            room_empty: true,
        })
    }

    pub async fn summary(&self) -> Option<RoomSummary> {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(RoomCmd::Summary { response: tx })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok()
    }

    pub async fn info(&self) -> Option<RoomInfo> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(RoomCmd::Info { response: tx }).await.is_err() {
            return None;
        }
        rx.await.ok()
    }
}

struct ConnEntry {
    conn_id: ConnId,
    sink: ConnSink,
}

// conns[i] owns records[i]; both indexes point at the same slot.
struct ParticipantStore {
    conns: Vec<ConnEntry>,
    records: Vec<Participant>,
    conn_index: HashMap<ConnId, usize>,
    id_index: HashMap<String, usize>,
}

impl ParticipantStore {
    fn new() -> Self {
        Self {
            conns: Vec::new(),
            records: Vec::new(),
            conn_index: HashMap::new(),
            id_index: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.conns.len()
    }

    fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    fn conns(&self) -> &[ConnEntry] {
        &self.conns
    }

    fn records(&self) -> &[Participant] {
        &self.records
    }

    fn slot_by_conn(&self, conn_id: ConnId) -> Option<usize> {
        self.conn_index.get(&conn_id).copied()
    }

    fn slot_by_id(&self, id: &str) -> Option<usize> {
        self.id_index.get(id).copied()
    }

    fn insert(&mut self, conn: ConnEntry, record: Participant) {
        let idx = self.conns.len();
        self.conn_index.insert(conn.conn_id, idx);
        self.id_index.insert(record.id.clone(), idx);
        self.conns.push(conn);
        self.records.push(record);
    }

    fn replace_conn(&mut self, idx: usize, conn: ConnEntry) -> ConnEntry {
        self.conn_index.remove(&self.conns[idx].conn_id);
        self.conn_index.insert(conn.conn_id, idx);
        std::mem::replace(&mut self.conns[idx], conn)
    }

    fn remove_conn(&mut self, conn_id: ConnId) -> Option<(ConnEntry, Participant)> {
        let idx = self.conn_index.remove(&conn_id)?;
        let last_idx = self.conns.len() - 1;
        let conn = self.conns.swap_remove(idx);
        let record = self.records.swap_remove(idx);
        self.id_index.remove(&record.id);

        if idx != last_idx {
            self.conn_index.insert(self.conns[idx].conn_id, idx);
            self.id_index.insert(self.records[idx].id.clone(), idx);
        }

        Some((conn, record))
    }

    fn validate(&self) {
        debug_assert_eq!(self.conns.len(), self.records.len());
        debug_assert_eq!(self.conns.len(), self.conn_index.len());
        debug_assert_eq!(self.records.len(), self.id_index.len());
        for (idx, conn) in self.conns.iter().enumerate() {
            debug_assert_eq!(self.conn_index.get(&conn.conn_id), Some(&idx));
            debug_assert_eq!(self.id_index.get(&self.records[idx].id), Some(&idx));
        }
    }
}

struct RoomTask {
    room_id: RoomId,
    status: RoomStatus,
    created_at: Instant,
    last_activity_at: Instant,
    server_started_at: Instant,
    rx: mpsc::Receiver<RoomCmd>,
    store: ParticipantStore,
    scratch_disconnected: SmallVec<[ConnId; 4]>,
}

impl RoomTask {
    fn new(room_id: RoomId, rx: mpsc::Receiver<RoomCmd>, server_started_at: Instant) -> Self {
        let now = Instant::now();
        Self {
            room_id,
            status: RoomStatus::Created,
            created_at: now,
            last_activity_at: now,
            server_started_at,
            rx,
            store: ParticipantStore::new(),
            scratch_disconnected: SmallVec::new(),
        }
    }

    async fn run(&mut self) {
        info!(room_id = self.room_id.as_str(), "room opened");
        while let Some(cmd) = self.rx.recv().await {
            self.handle_cmd(cmd);
            if self.status == RoomStatus::Closing {
                break;
            }
        }
        self.status = RoomStatus::Closed;
        info!(room_id = self.room_id.as_str(), "room closed");
    }

    fn handle_cmd(&mut self, cmd: RoomCmd) {
        match cmd {
            RoomCmd::Register {
                conn_id,
                msg,
                sink,
                response,
            } => {
                if matches!(self.status, RoomStatus::Closing | RoomStatus::Closed) {
                    let _ = response.send(Err(RegisterError::RoomClosing));
                    return;
                }
                let participant = self.handle_register(conn_id, msg, sink);
                let _ = response.send(Ok(participant));
            }
            RoomCmd::Move { conn_id, msg } => self.handle_move(conn_id, msg),
            RoomCmd::Deregister { conn_id, response } => {
                let removed = self.remove_conn(conn_id);
                if let Some(id) = removed.as_deref() {
                    self.broadcast(encode_participant_left(id));
                }
                self.transition_empty_if_needed();
                let _ = response.send(DeregisterOutcome {
                    removed,
                    room_empty: self.store.is_empty(),
                });
            }
            RoomCmd::Summary { response } => {
                let _ = response.send(self.summary());
            }
            RoomCmd::Info { response } => {
                let _ = response.send(RoomInfo {
                    summary: self.summary(),
                    participants: self.store.records().to_vec(),
                });
            }
        }
    }

    fn handle_register(
        &mut self,
        conn_id: ConnId,
        msg: RegisterMsg,
        sink: ConnSink,
    ) -> Participant {
        let participant = Participant::from_register(&msg);

        // Re-registering under a different name retires the old identity.
        if let Some(idx) = self.store.slot_by_conn(conn_id) {
            if self.store.records()[idx].id != participant.id {
                if let Some(old_id) = self.remove_conn(conn_id) {
                    self.broadcast_except(encode_participant_left(&old_id), conn_id);
                }
            }
        }

        match self.store.slot_by_id(&participant.id) {
            Some(idx) if self.store.conns()[idx].conn_id == conn_id => {
                self.store.conns[idx].sink = sink.clone();
                self.store.records[idx] = participant.clone();
            }
            Some(idx) => {
                // Last registration wins: the previous owner is detached.
                let previous = self.store.replace_conn(
                    idx,
                    ConnEntry {
                        conn_id,
                        sink: sink.clone(),
                    },
                );
                self.store.records[idx] = participant.clone();
                previous.sink.close(Some(encode_evicted()));
                warn!(
                    room_id = self.room_id.as_str(),
                    participant_id = participant.id.as_str(),
                    evicted_conn_id = previous.conn_id.0,
                    conn_id = conn_id.0,
                    "duplicate registration: previous connection evicted"
                );
            }
            None => {
                self.store
                    .insert(
                        ConnEntry {
                            conn_id,
                            sink: sink.clone(),
                        },
                        participant.clone(),
                    );
                info!(
                    room_id = self.room_id.as_str(),
                    participant_id = participant.id.as_str(),
                    conn_id = conn_id.0,
                    "participant registered"
                );
            }
        }
        self.store.validate();

        self.status = RoomStatus::Running;
        self.last_activity_at = Instant::now();

        // The ack goes out before any relay so the registrant sees its roster first.
        let roster = self.store.records().to_vec();
        if sink.tx.try_send(encode_registered(&participant, roster)).is_err() {
            debug!(
                room_id = self.room_id.as_str(),
                conn_id = conn_id.0,
                "registrant outbound unavailable for ack"
            );
        }
        self.broadcast_except(encode_participant_update(&participant), conn_id);
        participant
    }

    fn handle_move(&mut self, conn_id: ConnId, msg: MoveMsg) {
        let Some(idx) = self.store.slot_by_conn(conn_id) else {
            debug!(
                room_id = self.room_id.as_str(),
                conn_id = conn_id.0,
                "dropping move from unregistered connection"
            );
            return;
        };
        if self.store.records()[idx].id != msg.id {
            warn!(
                room_id = self.room_id.as_str(),
                conn_id = conn_id.0,
                claimed_id = msg.id.as_str(),
                "dropping move for participant not owned by sender"
            );
            return;
        }

        let record = &mut self.store.records[idx];
        record.apply_move(&msg);
        let payload = encode_participant_update(record);
        self.last_activity_at = Instant::now();
        self.broadcast_except(payload, conn_id);
    }

    fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.room_id.as_str().to_string(),
            current_participants: self.store.len(),
            status: self.status,
            created_at_ms: self
                .created_at
                .duration_since(self.server_started_at)
                .as_millis() as u64,
            last_activity_at_ms: self
                .last_activity_at
                .duration_since(self.server_started_at)
                .as_millis() as u64,
        }
    }

    fn remove_conn(&mut self, conn_id: ConnId) -> Option<String> {
        let (_, record) = self.store.remove_conn(conn_id)?;
        self.last_activity_at = Instant::now();
        self.store.validate();
        info!(
            room_id = self.room_id.as_str(),
            participant_id = record.id.as_str(),
            conn_id = conn_id.0,
            "participant left"
        );
        Some(record.id)
    }

    fn transition_empty_if_needed(&mut self) {
        if self.store.is_empty() && self.status != RoomStatus::Created {
            self.status = RoomStatus::Closing;
        }
    }

    fn broadcast(&mut self, payload: Bytes) {
        self.send_to_all(payload, None);
    }

    fn broadcast_except(&mut self, payload: Bytes, skip_conn_id: ConnId) {
        self.send_to_all(payload, Some(skip_conn_id));
    }

    fn send_to_all(&mut self, payload: Bytes, skip_conn_id: Option<ConnId>) {
        self.scratch_disconnected.clear();
        for conn in self.store.conns() {
            if Some(conn.conn_id) == skip_conn_id {
                continue;
            }
            let Err(err) = conn.sink.tx.try_send(payload.clone()) else {
                continue;
            };
            match err {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(
                        conn_id = conn.conn_id.0,
                        room_id = self.room_id.as_str(),
                        "dropping slow client: outbound channel full"
                    );
                }
                mpsc::error::TrySendError::Closed(_) => {
                    debug!(
                        conn_id = conn.conn_id.0,
                        room_id = self.room_id.as_str(),
                        "removing disconnected client: outbound channel closed"
                    );
                }
            }
            self.scratch_disconnected.push(conn.conn_id);
        }

        while let Some(conn_id) = self.scratch_disconnected.pop() {
            if let Some(idx) = self.store.slot_by_conn(conn_id) {
                // Close the socket with the record so the client re-registers.
                self.store.conns()[idx].sink.close(None);
            }
            if let Some(id) = self.remove_conn(conn_id) {
                self.broadcast_after_disconnect(encode_participant_left(&id));
            }
        }

        self.transition_empty_if_needed();
    }

    fn broadcast_after_disconnect(&mut self, payload: Bytes) {
        for conn in self.store.conns() {
            let _ = conn.sink.tx.try_send(payload.clone());
        }
    }
}
