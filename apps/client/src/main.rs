#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![deny(clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use presence_client::{
    AgentConfig, ConnectionState, InputState, MapLayout, SyncAgent, WsConnector,
};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

const DEFAULT_SERVER_URL: &str = "ws://localhost:9502";
const DEFAULT_ROOM_ID: &str = "lobby";
const DEFAULT_NAME: &str = "walker";
const FRAME: Duration = Duration::from_millis(16);
/// Frames spent on each leg of the patrol square.
const LEG_FRAMES: u32 = 90;

/// Walks a square around its spawn point and logs who else is in the room.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = config_from_env();
    let layout = match std::env::var("PRESENCE_MAP") {
        Ok(path) => match MapLayout::load(Path::new(&path)) {
            Ok(layout) => layout,
            Err(err) => {
                error!(path = path.as_str(), "failed to load map: {err}");
                return;
            }
        },
        Err(_) => MapLayout::default(),
    };

    info!(
        url = config.room_url().as_str(),
        name = config.display_name.as_str(),
        "connecting"
    );
    let mut agent = SyncAgent::connect_with_layout(config, layout, WsConnector);
    if let Err(err) = agent.wait_registered().await {
        error!("could not join room: {err}");
        return;
    }
    info!(participant_id = agent.local_id(), "joined");

    let mut frame = interval(FRAME);
    frame.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frame_no = 0_u32;
    let mut last_roster = roster_of(&agent);
    let mut state_rx = agent.watch_state();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = frame.tick() => {}
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                info!(indicator = ?state.indicator(), ?state, "connection state");
                if let ConnectionState::Failed { reason } = state {
                    warn!(reason = reason.as_str(), "giving up");
                    break;
                }
                continue;
            }
        }

        agent.poll_network();
        agent.tick(patrol_input(frame_no), FRAME.as_secs_f32());
        frame_no = frame_no.wrapping_add(1);

        let roster = roster_of(&agent);
        if roster != last_roster {
            info!(participants = ?roster, "room changed");
            last_roster = roster;
        }
    }

    agent.disconnect().await;
}

fn config_from_env() -> AgentConfig {
    let url = std::env::var("PRESENCE_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
    let room = std::env::var("PRESENCE_ROOM").unwrap_or_else(|_| DEFAULT_ROOM_ID.to_string());
    let name = std::env::var("PRESENCE_NAME").unwrap_or_else(|_| DEFAULT_NAME.to_string());

    let mut config = AgentConfig::new(url, room, name);
    config.color = std::env::var("PRESENCE_COLOR").ok();
    if let Some(max_retries) = std::env::var("PRESENCE_MAX_RETRIES")
        .ok()
        .and_then(|value| value.parse().ok())
    {
        config.retry.max_retries = max_retries;
    }
    config
}

/// Right, down, left, up, then a pause as long as one leg.
fn patrol_input(frame_no: u32) -> InputState {
    let mut input = InputState::default();
    match (frame_no / LEG_FRAMES) % 5 {
        0 => input.right = true,
        1 => input.down = true,
        2 => input.left = true,
        3 => input.up = true,
        _ => {}
    }
    input
}

fn roster_of(agent: &SyncAgent) -> Vec<String> {
    agent
        .view()
        .sorted_ids()
        .into_iter()
        .map(str::to_owned)
        .collect()
}
