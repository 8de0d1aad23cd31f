use bytes::Bytes;

use crate::constants::EVICTED_DUPLICATE_REGISTRATION;
use crate::types::{ClientMsg, MoveMsg, Participant, RegisterMsg, ServerMsg};

pub fn encode_register(msg: RegisterMsg) -> String {
    encode_client(&ClientMsg::Register(msg))
}

pub fn encode_move(msg: MoveMsg) -> String {
    encode_client(&ClientMsg::Move(msg))
}

pub fn encode_registered(participant: &Participant, roster: Vec<Participant>) -> Bytes {
    encode_server(&ServerMsg::Registered {
        participant: participant.clone(),
        roster,
    })
}

pub fn encode_participant_update(participant: &Participant) -> Bytes {
    encode_server(&ServerMsg::ParticipantUpdate(participant.clone()))
}

pub fn encode_participant_left(id: &str) -> Bytes {
    encode_server(&ServerMsg::ParticipantLeft { id: id.to_string() })
}

pub fn encode_evicted() -> Bytes {
    encode_server(&ServerMsg::Evicted {
        reason: EVICTED_DUPLICATE_REGISTRATION.to_string(),
    })
}

pub fn encode_register_rejected(reason: &str) -> Bytes {
    encode_server(&ServerMsg::RegisterRejected {
        reason: reason.to_string(),
    })
}

fn encode_client(msg: &ClientMsg) -> String {
    // Message types hold only strings, finite floats and unit enums.
    serde_json::to_string(msg).unwrap_or_default()
}

fn encode_server(msg: &ServerMsg) -> Bytes {
    Bytes::from(serde_json::to_vec(msg).unwrap_or_default())
}
