#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod collision;
pub mod constants;
pub mod step;
pub mod types;

pub use collision::resolve_move;
pub use step::{movement_vector, step_motion};
pub use types::{Direction, InputState, Motion, Rect, Vec2};
