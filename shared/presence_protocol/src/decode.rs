use crate::constants::{MAX_COLOR_LEN, MAX_USERNAME_LEN};
use crate::types::{ClientMsg, DecodeError, MoveMsg, RegisterMsg, ServerMsg};

pub fn decode_client_message(text: &str) -> Result<ClientMsg, DecodeError> {
    let msg: ClientMsg = serde_json::from_str(text)?;
    match &msg {
        ClientMsg::Register(register) => validate_register(register)?,
        ClientMsg::Move(movement) => validate_move(movement)?,
    }
    Ok(msg)
}

pub fn decode_server_message(text: &str) -> Result<ServerMsg, DecodeError> {
    Ok(serde_json::from_str(text)?)
}

fn validate_register(msg: &RegisterMsg) -> Result<(), DecodeError> {
    check_text("username", &msg.username, MAX_USERNAME_LEN)?;
    check_text("color", &msg.color, MAX_COLOR_LEN)?;
    for coord in [msg.x, msg.y].into_iter().flatten() {
        check_coord(coord)?;
    }
    Ok(())
}

fn validate_move(msg: &MoveMsg) -> Result<(), DecodeError> {
    check_text("id", &msg.id, MAX_USERNAME_LEN)?;
    check_coord(msg.x)?;
    check_coord(msg.y)
}

fn check_text(field: &'static str, value: &str, max_len: usize) -> Result<(), DecodeError> {
    if value.trim().is_empty() {
        return Err(DecodeError::EmptyField(field));
    }
    if value.len() > max_len {
        return Err(DecodeError::FieldTooLong(field));
    }
    Ok(())
}

fn check_coord(value: f32) -> Result<(), DecodeError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(DecodeError::NonFiniteCoordinate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, MovementState};

    #[test]
    fn register_without_position_defaults_to_origin() {
        let msg = decode_client_message(r#"{"type":"register","username":"alice","color":"blue"}"#);
        let Ok(ClientMsg::Register(register)) = msg else {
            panic!("expected Register, got {msg:?}");
        };
        let participant = crate::types::Participant::from_register(&register);
        assert_eq!(participant.id, "alice");
        assert_eq!((participant.x, participant.y), (0.0, 0.0));
        assert_eq!(participant.direction, Direction::Down);
        assert_eq!(participant.movement_state, MovementState::Idle);
    }

    #[test]
    fn move_parses_lowercase_direction() {
        let msg = decode_client_message(
            r#"{"type":"move","id":"alice","x":5,"y":0,"direction":"right"}"#,
        );
        let Ok(ClientMsg::Move(movement)) = msg else {
            panic!("expected Move, got {msg:?}");
        };
        assert_eq!(movement.direction, Direction::Right);
        assert!((movement.x - 5.0).abs() < f32::EPSILON);
    }

    #[test]
    fn missing_fields_are_malformed() {
        let err = decode_client_message(r#"{"type":"move","id":"alice","x":5}"#);
        assert!(matches!(err, Err(DecodeError::Malformed(_))));

        let err = decode_client_message(r#"{"type":"teleport","id":"alice"}"#);
        assert!(matches!(err, Err(DecodeError::Malformed(_))));

        let err = decode_client_message("not json");
        assert!(matches!(err, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn rejects_blank_and_oversized_identity() {
        let err = decode_client_message(r#"{"type":"register","username":"  ","color":"blue"}"#);
        assert_eq!(err, Err(DecodeError::EmptyField("username")));

        let long = "a".repeat(MAX_USERNAME_LEN + 1);
        let text = format!(r#"{{"type":"move","id":"{long}","x":0,"y":0,"direction":"up"}}"#);
        assert_eq!(
            decode_client_message(&text),
            Err(DecodeError::FieldTooLong("id"))
        );

        let err = decode_client_message(r#"{"type":"register","username":"bob","color":""}"#);
        assert_eq!(err, Err(DecodeError::EmptyField("color")));
    }

    #[test]
    fn server_update_is_flat_participant() {
        let msg = decode_server_message(
            r#"{"type":"participant_update","id":"bob","x":1.5,"y":2,"direction":"up","movementState":"running","color":"red"}"#,
        );
        let Ok(ServerMsg::ParticipantUpdate(participant)) = msg else {
            panic!("expected ParticipantUpdate, got {msg:?}");
        };
        assert_eq!(participant.id, "bob");
        assert_eq!(participant.movement_state, MovementState::Running);
    }
}
