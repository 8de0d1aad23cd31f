/// Units per second.
pub const PLAYER_SPEED: f32 = 150.0;

pub const PLAYER_HALF_W: f32 = 16.0;
pub const PLAYER_HALF_H: f32 = 16.0;

pub const CANVAS_W: f32 = 800.0;
pub const CANVAS_H: f32 = 600.0;
