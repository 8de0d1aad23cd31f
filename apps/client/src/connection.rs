use presence_protocol::{
    decode_server_message, encode_move, encode_register, ClientMsg, RegisterMsg, ServerMsg,
};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::state::ConnectionState;
use crate::transport::{Connector, Transport};

enum SessionEnd {
    Shutdown,
    AgentDropped,
    Evicted(String),
    Lost { registered: bool },
}

/// Owns the transport. Connects, registers, pumps messages both ways and
/// reconnects with backoff until the retry budget runs out.
pub(crate) struct ConnectionTask<C> {
    pub(crate) connector: C,
    pub(crate) url: String,
    pub(crate) register: RegisterMsg,
    pub(crate) retry: RetryPolicy,
    pub(crate) ack_timeout: Duration,
    pub(crate) outbound_rx: mpsc::Receiver<ClientMsg>,
    pub(crate) inbound_tx: mpsc::Sender<ServerMsg>,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) shutdown_rx: oneshot::Receiver<()>,
}

impl<C: Connector> ConnectionTask<C> {
    pub(crate) async fn run(mut self) {
        let mut failures = 0_u32;
        loop {
            self.set_state(ConnectionState::Connecting {
                attempt: failures + 1,
            });

            let connected = tokio::select! {
                result = self.connector.connect(&self.url) => result,
                _ = &mut self.shutdown_rx => {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
            };

            match connected {
                Ok(transport) => match self.run_session(transport).await {
                    SessionEnd::Shutdown => {
                        self.set_state(ConnectionState::Disconnected);
                        return;
                    }
                    SessionEnd::AgentDropped => return,
                    SessionEnd::Evicted(reason) => {
                        warn!(url = self.url.as_str(), reason, "evicted by server");
                        self.set_state(ConnectionState::Failed {
                            reason: format!("evicted: {reason}"),
                        });
                        return;
                    }
                    SessionEnd::Lost { registered } => {
                        if registered {
                            failures = 0;
                        }
                        warn!(url = self.url.as_str(), "connection lost");
                    }
                },
                Err(err) => {
                    warn!(url = self.url.as_str(), attempt = failures + 1, "{err}");
                }
            }

            failures += 1;
            if failures >= self.retry.max_retries {
                self.set_state(ConnectionState::Failed {
                    reason: format!("gave up after {failures} failed attempts"),
                });
                return;
            }

            let delay = self.retry.delay_for(failures);
            self.set_state(ConnectionState::Reconnecting {
                attempt: failures,
                delay,
            });
            tokio::select! {
                _ = sleep(delay) => {}
                _ = &mut self.shutdown_rx => {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
            }
        }
    }

    async fn run_session(&mut self, mut transport: Box<dyn Transport>) -> SessionEnd {
        // Moves queued while offline are stale; keep only where they ended up
        // so the registration lands at the current position.
        while let Ok(msg) = self.outbound_rx.try_recv() {
            self.note_position(&msg);
        }

        if let Err(err) = transport.send(encode_register(self.register.clone())).await {
            warn!(url = self.url.as_str(), "register send failed: {err}");
            return SessionEnd::Lost { registered: false };
        }
        self.set_state(ConnectionState::Connected { registered: false });
        let mut registered = false;
        let ack_deadline = sleep(self.ack_timeout);
        tokio::pin!(ack_deadline);

        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => {
                    let _ = transport.close().await;
                    return SessionEnd::Shutdown;
                }
                _ = &mut ack_deadline, if !registered => {
                    warn!(url = self.url.as_str(), "no registration ack, reconnecting");
                    let _ = transport.close().await;
                    return SessionEnd::Lost { registered: false };
                }
                incoming = transport.recv() => match incoming {
                    Some(Ok(text)) => {
                        let msg = match decode_server_message(&text) {
                            Ok(msg) => msg,
                            Err(err) => {
                                warn!("dropping undecodable server message: {err}");
                                continue;
                            }
                        };
                        let evicted = match &msg {
                            ServerMsg::Registered { participant, roster } => {
                                info!(
                                    participant_id = participant.id.as_str(),
                                    roster = roster.len(),
                                    "registered"
                                );
                                registered = true;
                                self.set_state(ConnectionState::Connected { registered: true });
                                None
                            }
                            ServerMsg::Evicted { reason } => Some(reason.clone()),
                            ServerMsg::RegisterRejected { reason } => {
                                warn!(
                                    url = self.url.as_str(),
                                    reason = reason.as_str(),
                                    "registration rejected"
                                );
                                let _ = transport.close().await;
                                return SessionEnd::Lost { registered: false };
                            }
                            _ => None,
                        };
                        self.forward(msg);
                        if let Some(reason) = evicted {
                            let _ = transport.close().await;
                            return SessionEnd::Evicted(reason);
                        }
                    }
                    Some(Err(err)) => {
                        warn!(url = self.url.as_str(), "receive failed: {err}");
                        return SessionEnd::Lost { registered };
                    }
                    None => {
                        debug!(url = self.url.as_str(), "server closed the connection");
                        return SessionEnd::Lost { registered };
                    }
                },
                outbound = self.outbound_rx.recv() => match outbound {
                    Some(msg) => {
                        self.note_position(&msg);
                        let text = match msg {
                            ClientMsg::Move(movement) => encode_move(movement),
                            ClientMsg::Register(register) => encode_register(register),
                        };
                        if let Err(err) = transport.send(text).await {
                            warn!(url = self.url.as_str(), "send failed: {err}");
                            return SessionEnd::Lost { registered };
                        }
                    }
                    None => {
                        let _ = transport.close().await;
                        return SessionEnd::AgentDropped;
                    }
                },
            }
        }
    }

    fn note_position(&mut self, msg: &ClientMsg) {
        if let ClientMsg::Move(movement) = msg {
            self.register.x = Some(movement.x);
            self.register.y = Some(movement.y);
        }
    }

    fn forward(&self, msg: ServerMsg) {
        match self.inbound_tx.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("inbound queue full, dropping server message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("inbound queue closed, agent dropped");
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(?state, "connection state");
        self.state_tx.send_replace(state);
    }
}
