#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod constants;
pub mod decode;
pub mod encode;
pub mod types;

pub use constants::*;
pub use decode::{decode_client_message, decode_server_message};
pub use encode::{
    encode_evicted, encode_move, encode_participant_left, encode_participant_update,
    encode_register, encode_register_rejected, encode_registered,
};
pub use types::{
    ClientMsg, DecodeError, Direction, MoveMsg, MovementState, Participant, RegisterMsg,
    ServerMsg,
};
