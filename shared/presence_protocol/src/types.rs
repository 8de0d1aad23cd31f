use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Malformed(String),
    EmptyField(&'static str),
    FieldTooLong(&'static str),
    NonFiniteCoordinate,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Malformed(err) => write!(f, "malformed message: {err}"),
            DecodeError::EmptyField(field) => write!(f, "empty field: {field}"),
            DecodeError::FieldTooLong(field) => write!(f, "field too long: {field}"),
            DecodeError::NonFiniteCoordinate => write!(f, "non-finite coordinate"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementState {
    #[default]
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub movement_state: MovementState,
    pub color: String,
}

impl Participant {
    pub fn from_register(msg: &RegisterMsg) -> Self {
        Self {
            id: msg.username.clone(),
            x: msg.x.unwrap_or(0.0),
            y: msg.y.unwrap_or(0.0),
            direction: Direction::default(),
            movement_state: MovementState::Idle,
            color: msg.color.clone(),
        }
    }

    /// Applies a movement event. A move always means the mover was running.
    pub fn apply_move(&mut self, msg: &MoveMsg) {
        self.x = msg.x;
        self.y = msg.y;
        self.direction = msg.direction;
        self.movement_state = MovementState::Running;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterMsg {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveMsg {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
}

// Client-to-server messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    Register(RegisterMsg),
    Move(MoveMsg),
}

// Server-to-client messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    Registered {
        participant: Participant,
        roster: Vec<Participant>,
    },
    ParticipantUpdate(Participant),
    ParticipantLeft {
        id: String,
    },
    Evicted {
        reason: String,
    },
    RegisterRejected {
        reason: String,
    },
}
