use std::time::Duration;

use movement_core::{step_motion, InputState, Motion, Rect};
use presence_protocol::{ClientMsg, Direction, MoveMsg, MovementState, Participant, RegisterMsg, ServerMsg};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::connection::ConnectionTask;
use crate::error::SyncError;
use crate::layout::MapLayout;
use crate::state::ConnectionState;
use crate::transport::Connector;
use crate::view::ViewModel;

const OUTBOUND_CAPACITY: usize = 256;
const INBOUND_CAPACITY: usize = 1024;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// One participant's presence session.
///
/// The owner drives it from a single frame loop: [`SyncAgent::poll_network`]
/// applies whatever the server sent since the last frame, then
/// [`SyncAgent::tick`] moves the local player and publishes the result. The
/// socket lives in a background task that never touches the view model.
pub struct SyncAgent {
    local_id: String,
    color: String,
    speed: f32,
    idle_after: Duration,
    motion: Motion,
    boundaries: Vec<Rect>,
    view: ViewModel,
    outbound_tx: mpsc::Sender<ClientMsg>,
    inbound_rx: mpsc::Receiver<ServerMsg>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SyncAgent {
    /// Starts connecting to `config.room_id` and returns immediately. Use
    /// [`SyncAgent::wait_registered`] to wait for the server's ack.
    pub fn connect<C: Connector>(config: AgentConfig, connector: C) -> Self {
        Self::connect_with_layout(config, MapLayout::default(), connector)
    }

    pub fn connect_with_layout<C: Connector>(
        config: AgentConfig,
        layout: MapLayout,
        connector: C,
    ) -> Self {
        let color = config.resolved_color();
        let motion = Motion::at(layout.spawn);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = ConnectionTask {
            connector,
            url: config.room_url(),
            register: RegisterMsg {
                username: config.display_name.clone(),
                x: Some(motion.pos.x),
                y: Some(motion.pos.y),
                color: color.clone(),
            },
            retry: config.retry,
            ack_timeout: config.ack_timeout,
            outbound_rx,
            inbound_tx,
            state_tx,
            shutdown_rx,
        };
        let task = tokio::spawn(task.run());

        Self {
            view: ViewModel::new(config.display_name.clone()),
            local_id: config.display_name,
            color,
            speed: config.speed,
            idle_after: config.idle_after,
            motion,
            boundaries: layout.boundaries,
            outbound_tx,
            inbound_rx,
            state_rx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn view(&self) -> &ViewModel {
        &self.view
    }

    /// The local participant as peers see it.
    pub fn local(&self) -> Participant {
        Participant {
            id: self.local_id.clone(),
            x: self.motion.pos.x,
            y: self.motion.pos.y,
            direction: wire_direction(self.motion.direction),
            movement_state: if self.motion.running {
                MovementState::Running
            } else {
                MovementState::Idle
            },
            color: self.color.clone(),
        }
    }

    /// Resolves once the server acknowledged the registration, or fails once
    /// the agent gave up or was shut down.
    pub async fn wait_registered(&self) -> Result<(), SyncError> {
        let mut state_rx = self.state_rx.clone();
        loop {
            match &*state_rx.borrow_and_update() {
                ConnectionState::Connected { registered: true } => return Ok(()),
                ConnectionState::Failed { reason } => {
                    return Err(SyncError::Failed(reason.clone()))
                }
                _ => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(SyncError::Closed);
            }
        }
    }

    /// Applies every server message received since the last call and settles
    /// quiet remotes to idle. Returns how many messages were applied.
    pub fn poll_network(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(msg) = self.inbound_rx.try_recv() {
            self.on_server_message(msg);
            applied += 1;
        }
        self.view.settle_idle(Instant::now(), self.idle_after);
        applied
    }

    pub fn on_server_message(&mut self, msg: ServerMsg) {
        let now = Instant::now();
        match msg {
            ServerMsg::Registered { roster, .. } => self.view.replace_roster(roster, now),
            ServerMsg::ParticipantUpdate(participant) => self.on_remote_update(participant),
            ServerMsg::ParticipantLeft { id } => {
                if self.view.remove(&id) {
                    debug!(participant_id = id.as_str(), "participant left");
                }
            }
            ServerMsg::Evicted { reason } => {
                warn!(reason = reason.as_str(), "another session took over this identity");
            }
            ServerMsg::RegisterRejected { reason } => {
                debug!(reason = reason.as_str(), "registration rejected");
            }
        }
    }

    /// Upserts a remote participant; last write observed wins.
    pub fn on_remote_update(&mut self, participant: Participant) {
        self.view.upsert(participant, Instant::now());
    }

    /// Advances the local player by `dt` seconds. Publishes and returns the
    /// movement event when the player moved; idle ticks send nothing.
    pub fn tick(&mut self, input: InputState, dt: f32) -> Option<MoveMsg> {
        if !step_motion(&mut self.motion, input, self.speed, dt, &self.boundaries) {
            return None;
        }

        let movement = MoveMsg {
            id: self.local_id.clone(),
            x: self.motion.pos.x,
            y: self.motion.pos.y,
            direction: wire_direction(self.motion.direction),
        };
        // Fire and forget: a dropped move is superseded by the next tick.
        if self.outbound_tx.try_send(ClientMsg::Move(movement.clone())).is_err() {
            debug!("move not queued: connection task busy or gone");
        }
        Some(movement)
    }

    /// Closes the session and releases the socket. Safe to call more than once.
    pub async fn disconnect(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        let Some(mut task) = self.task.take() else {
            return;
        };
        if timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
            warn!("connection task did not stop in time, aborting");
            task.abort();
        }
    }
}

impl Drop for SyncAgent {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn wire_direction(direction: movement_core::Direction) -> Direction {
    match direction {
        movement_core::Direction::Up => Direction::Up,
        movement_core::Direction::Down => Direction::Down,
        movement_core::Direction::Left => Direction::Left,
        movement_core::Direction::Right => Direction::Right,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use presence_protocol::{
        decode_client_message, encode_evicted, encode_participant_left,
        encode_participant_update, encode_register_rejected, encode_registered, ClientMsg,
        Direction, MovementState, Participant,
    };
    use tokio::sync::watch;

    use super::SyncAgent;
    use crate::config::{AgentConfig, RetryPolicy};
    use crate::error::SyncError;
    use crate::state::ConnectionState;
    use crate::transport::{Connector, Transport};
    use crate::InputState;

    enum Step {
        Msg(String),
        Close,
        /// Holds the script until the gate opens.
        Gate(watch::Receiver<bool>),
    }

    /// Replays scripted server messages and records what the agent sent.
    struct MockTransport {
        incoming: VecDeque<Step>,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, text: String) -> Result<(), SyncError> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(text);
            }
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, SyncError>> {
            loop {
                match self.incoming.front_mut() {
                    None => return std::future::pending().await,
                    Some(Step::Gate(gate)) => {
                        let _ = gate.wait_for(|open| *open).await;
                    }
                    Some(_) => {}
                }
                match self.incoming.pop_front() {
                    Some(Step::Msg(text)) => return Some(Ok(text)),
                    Some(Step::Close) => return None,
                    Some(Step::Gate(_)) | None => continue,
                }
            }
        }

        async fn close(&mut self) -> Result<(), SyncError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Hands out one scripted transport per attempt; refuses once scripts run out.
    struct MockConnector {
        scripts: Mutex<VecDeque<Vec<Step>>>,
        attempts: Arc<AtomicU32>,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockConnector {
        fn new(scripts: Vec<Vec<Step>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into_iter().collect()),
                attempts: Arc::new(AtomicU32::new(0)),
                sent: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>, SyncError> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            let script = self.scripts.lock().ok().and_then(|mut s| s.pop_front());
            match script {
                Some(steps) => Ok(Box::new(MockTransport {
                    incoming: steps.into(),
                    sent: Arc::clone(&self.sent),
                    closed: Arc::clone(&self.closed),
                })),
                None => Err(SyncError::Connect("connection refused".to_string())),
            }
        }
    }

    fn participant(id: &str, x: f32) -> Participant {
        Participant {
            id: id.to_string(),
            x,
            y: 0.0,
            direction: Direction::Right,
            movement_state: MovementState::Running,
            color: "blue".to_string(),
        }
    }

    fn msg(bytes: impl AsRef<[u8]>) -> Step {
        Step::Msg(String::from_utf8_lossy(bytes.as_ref()).into_owned())
    }

    fn registered(me: &str, others: &[&str]) -> Step {
        let me = participant(me, 0.0);
        let mut roster = vec![me.clone()];
        roster.extend(others.iter().map(|id| participant(id, 0.0)));
        msg(encode_registered(&me, roster))
    }

    fn config(max_retries: u32) -> AgentConfig {
        let mut config = AgentConfig::new("ws://presence.test", "office-1", "alice");
        config.color = Some("blue".to_string());
        config.retry = RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        config
    }

    fn sent_messages(sent: &Arc<Mutex<Vec<String>>>) -> Vec<ClientMsg> {
        sent.lock()
            .map(|sent| {
                sent.iter()
                    .filter_map(|text| decode_client_message(text).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn let_task_run() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    const RIGHT: InputState = InputState {
        left: false,
        right: true,
        up: false,
        down: false,
    };

    #[tokio::test]
    async fn connect_registers_with_display_name_at_origin() {
        let connector = MockConnector::new(vec![vec![registered("alice", &[])]]);
        let sent = Arc::clone(&connector.sent);
        let mut agent = SyncAgent::connect(config(3), connector);

        agent.wait_registered().await.expect("registered");
        assert!(agent.state().is_registered());

        let messages = sent_messages(&sent);
        let Some(ClientMsg::Register(register)) = messages.first() else {
            panic!("first message must be register, got {messages:?}");
        };
        assert_eq!(register.username, "alice");
        assert_eq!((register.x, register.y), (Some(0.0), Some(0.0)));
        assert_eq!(register.color, "blue");

        agent.disconnect().await;
    }

    #[tokio::test]
    async fn remote_updates_flow_into_view_model() {
        let connector = MockConnector::new(vec![vec![
            registered("alice", &["bob"]),
            msg(encode_participant_update(&participant("bob", 5.0))),
            msg(encode_participant_update(&participant("carol", 1.0))),
            msg(encode_participant_left("carol")),
        ]]);
        let mut agent = SyncAgent::connect(config(3), connector);
        agent.wait_registered().await.expect("registered");
        let_task_run().await;

        assert_eq!(agent.poll_network(), 4);

        let bob = agent.view().get("bob").expect("bob in view");
        assert_eq!(bob.x, 5.0);
        assert_eq!(bob.direction, Direction::Right);
        assert_eq!(bob.movement_state, MovementState::Running);
        assert!(!agent.view().contains("carol"));
        assert!(!agent.view().contains("alice"));

        agent.disconnect().await;
    }

    #[tokio::test]
    async fn tick_publishes_only_while_moving() {
        let connector = MockConnector::new(vec![vec![registered("alice", &[])]]);
        let sent = Arc::clone(&connector.sent);
        let mut agent = SyncAgent::connect(config(3), connector);
        agent.wait_registered().await.expect("registered");

        assert!(agent.tick(InputState::default(), 0.1).is_none());
        assert_eq!(agent.local().movement_state, MovementState::Idle);

        let movement = agent.tick(RIGHT, 0.1).expect("moved");
        assert_eq!(movement.id, "alice");
        assert_eq!(movement.direction, Direction::Right);
        assert!((movement.x - 15.0).abs() < 1e-3);
        assert_eq!(agent.local().movement_state, MovementState::Running);

        assert!(agent.tick(InputState::default(), 0.1).is_none());
        assert_eq!(agent.local().movement_state, MovementState::Idle);

        let_task_run().await;
        let moves = sent_messages(&sent)
            .into_iter()
            .filter(|msg| matches!(msg, ClientMsg::Move(_)))
            .count();
        assert_eq!(moves, 1);

        agent.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retry_ceiling() {
        let connector = MockConnector::new(Vec::new());
        let attempts = Arc::clone(&connector.attempts);
        let agent = SyncAgent::connect(config(3), connector);

        let result = agent.wait_registered().await;
        assert!(matches!(result, Err(SyncError::Failed(_))));
        assert!(agent.state().is_terminal());
        assert_eq!(attempts.load(Ordering::Relaxed), 3);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_reregisters_at_last_position() {
        let (gate_tx, gate_rx) = watch::channel(false);
        let connector = MockConnector::new(vec![
            vec![registered("alice", &["bob"]), Step::Gate(gate_rx), Step::Close],
            vec![registered("alice", &[])],
        ]);
        let sent = Arc::clone(&connector.sent);
        let attempts = Arc::clone(&connector.attempts);
        let mut agent = SyncAgent::connect(config(3), connector);

        agent.wait_registered().await.expect("first registration");
        let _ = agent.tick(RIGHT, 1.0);
        let_task_run().await;

        let mut state_rx = agent.watch_state();
        state_rx.borrow_and_update();
        let _ = gate_tx.send(true);
        while !(attempts.load(Ordering::Relaxed) == 2 && agent.state().is_registered()) {
            if state_rx.changed().await.is_err() {
                break;
            }
        }
        assert_eq!(attempts.load(Ordering::Relaxed), 2);
        assert!(agent.state().is_registered());

        agent.poll_network();
        assert!(agent.view().is_empty(), "second roster replaced the first");

        let registers: Vec<_> = sent_messages(&sent)
            .into_iter()
            .filter_map(|msg| match msg {
                ClientMsg::Register(register) => Some(register),
                _ => None,
            })
            .collect();
        assert_eq!(registers.len(), 2);
        assert_eq!(registers[1].x, Some(150.0));

        agent.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_retry() {
        let connector = MockConnector::new(Vec::new());
        let attempts = Arc::clone(&connector.attempts);
        let mut agent = SyncAgent::connect(config(10), connector);
        let mut state_rx = agent.watch_state();

        while state_rx.changed().await.is_ok() {
            if matches!(
                *state_rx.borrow_and_update(),
                ConnectionState::Reconnecting { .. }
            ) {
                break;
            }
        }
        agent.disconnect().await;
        let after_disconnect = attempts.load(Ordering::Relaxed);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(attempts.load(Ordering::Relaxed), after_disconnect);
        assert_eq!(agent.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_closes_transport() {
        let connector = MockConnector::new(vec![vec![registered("alice", &[])]]);
        let closed = Arc::clone(&connector.closed);
        let mut agent = SyncAgent::connect(config(3), connector);
        agent.wait_registered().await.expect("registered");

        agent.disconnect().await;
        assert!(closed.load(Ordering::Relaxed));
        assert_eq!(agent.state(), ConnectionState::Disconnected);
        assert!(matches!(
            agent.wait_registered().await,
            Err(SyncError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_registration_times_out_and_retries() {
        let connector = MockConnector::new(vec![Vec::new(), vec![registered("alice", &[])]]);
        let attempts = Arc::clone(&connector.attempts);
        let closed = Arc::clone(&connector.closed);
        let mut agent = SyncAgent::connect(config(3), connector);

        agent.wait_registered().await.expect("second session registers");
        assert_eq!(attempts.load(Ordering::Relaxed), 2);
        assert!(closed.load(Ordering::Relaxed), "silent session must be closed");

        agent.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_exhausts_retries() {
        let connector = MockConnector::new(vec![Vec::new(), Vec::new()]);
        let agent = SyncAgent::connect(config(2), connector);

        let result = agent.wait_registered().await;
        assert!(matches!(result, Err(SyncError::Failed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_registration_is_retried() {
        let connector = MockConnector::new(vec![
            vec![msg(encode_register_rejected("room_closing"))],
            vec![registered("alice", &[])],
        ]);
        let attempts = Arc::clone(&connector.attempts);
        let mut agent = SyncAgent::connect(config(3), connector);

        agent.wait_registered().await.expect("registered after rejection");
        assert_eq!(attempts.load(Ordering::Relaxed), 2);

        agent.disconnect().await;
    }

    #[tokio::test]
    async fn eviction_is_terminal() {
        let connector = MockConnector::new(vec![vec![
            registered("alice", &[]),
            msg(encode_evicted()),
        ]]);
        let attempts = Arc::clone(&connector.attempts);
        let agent = SyncAgent::connect(config(3), connector);
        let mut state_rx = agent.watch_state();

        while !state_rx.borrow_and_update().is_terminal() {
            if state_rx.changed().await.is_err() {
                break;
            }
        }
        assert!(agent.state().is_terminal());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }
}
