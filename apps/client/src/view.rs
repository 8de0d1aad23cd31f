use std::collections::HashMap;
use std::time::Duration;

use presence_protocol::{MovementState, Participant};
use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq)]
pub struct RemoteParticipant {
    pub participant: Participant,
    pub last_seen: Instant,
}

/// The agent's picture of everybody else in the room, keyed by participant id.
/// Last write observed wins; the local participant is never stored here.
#[derive(Debug)]
pub struct ViewModel {
    local_id: String,
    remotes: HashMap<String, RemoteParticipant>,
}

impl ViewModel {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            remotes: HashMap::new(),
        }
    }

    /// Returns `false` when the update was about the local participant.
    pub fn upsert(&mut self, participant: Participant, now: Instant) -> bool {
        if participant.id == self.local_id {
            return false;
        }
        self.remotes.insert(
            participant.id.clone(),
            RemoteParticipant {
                participant,
                last_seen: now,
            },
        );
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.remotes.remove(id).is_some()
    }

    /// Replaces every remote with the server's roster.
    pub fn replace_roster(&mut self, roster: Vec<Participant>, now: Instant) {
        self.remotes.clear();
        for participant in roster {
            self.upsert(participant, now);
        }
    }

    /// Marks remotes without a recent update as idle. Returns how many changed.
    pub fn settle_idle(&mut self, now: Instant, idle_after: Duration) -> usize {
        let mut settled = 0;
        for remote in self.remotes.values_mut() {
            if remote.participant.movement_state == MovementState::Running
                && now.saturating_duration_since(remote.last_seen) >= idle_after
            {
                remote.participant.movement_state = MovementState::Idle;
                settled += 1;
            }
        }
        settled
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.remotes.get(id).map(|remote| &remote.participant)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.remotes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }

    pub fn sorted_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.remotes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use presence_protocol::{Direction, MovementState, Participant};
    use tokio::time::Instant;

    use super::ViewModel;

    fn participant(id: &str, x: f32, state: MovementState) -> Participant {
        Participant {
            id: id.to_string(),
            x,
            y: 0.0,
            direction: Direction::Right,
            movement_state: state,
            color: "red".to_string(),
        }
    }

    #[test]
    fn upsert_creates_then_overwrites() {
        let now = Instant::now();
        let mut view = ViewModel::new("alice");
        assert!(view.upsert(participant("bob", 1.0, MovementState::Idle), now));
        assert!(view.upsert(participant("bob", 2.0, MovementState::Running), now));
        assert_eq!(view.len(), 1);
        let bob = view.get("bob").expect("bob present");
        assert_eq!(bob.x, 2.0);
        assert_eq!(bob.movement_state, MovementState::Running);
    }

    #[test]
    fn local_participant_is_ignored() {
        let mut view = ViewModel::new("alice");
        assert!(!view.upsert(participant("alice", 9.0, MovementState::Running), Instant::now()));
        assert!(view.is_empty());
    }

    #[test]
    fn roster_replaces_stale_remotes() {
        let now = Instant::now();
        let mut view = ViewModel::new("alice");
        view.upsert(participant("ghost", 0.0, MovementState::Idle), now);
        view.replace_roster(
            vec![
                participant("alice", 0.0, MovementState::Idle),
                participant("bob", 0.0, MovementState::Idle),
            ],
            now,
        );
        assert_eq!(view.sorted_ids(), vec!["bob"]);
    }

    #[test]
    fn stale_runners_settle_to_idle() {
        let start = Instant::now();
        let mut view = ViewModel::new("alice");
        view.upsert(participant("bob", 0.0, MovementState::Running), start);

        assert_eq!(view.settle_idle(start, Duration::from_millis(250)), 0);
        let later = start + Duration::from_millis(300);
        assert_eq!(view.settle_idle(later, Duration::from_millis(250)), 1);
        assert_eq!(
            view.get("bob").map(|p| p.movement_state),
            Some(MovementState::Idle)
        );
    }
}
