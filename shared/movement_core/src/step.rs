use std::f32::consts::FRAC_1_SQRT_2;

use crate::collision::resolve_move;
use crate::constants::{PLAYER_HALF_H, PLAYER_HALF_W};
use crate::types::{Direction, InputState, Motion, Rect, Vec2};

/// Velocity and facing for the held keys, or `None` when nothing is held.
///
/// Keys are evaluated left, right, up, down and each active one overwrites the
/// previous, so the last active key sets the facing and opposing keys on one
/// axis resolve to the later key instead of cancelling out. When both axes are
/// active the vector is scaled by `1/sqrt(2)` so its length stays `speed`.
pub fn movement_vector(input: InputState, speed: f32) -> Option<(Vec2, Direction)> {
    if input.is_idle() {
        return None;
    }

    let mut dx = 0.0_f32;
    let mut dy = 0.0_f32;
    let mut dir = Direction::Down;

    if input.left {
        dx = -1.0;
        dir = Direction::Left;
    }
    if input.right {
        dx = 1.0;
        dir = Direction::Right;
    }
    if input.up {
        dy = -1.0;
        dir = Direction::Up;
    }
    if input.down {
        dy = 1.0;
        dir = Direction::Down;
    }

    if dx != 0.0 && dy != 0.0 {
        dx *= FRAC_1_SQRT_2;
        dy *= FRAC_1_SQRT_2;
    }

    Some((Vec2::new(dx, dy).scale(speed), dir))
}

/// Advances `motion` by one tick. Returns `true` when the player moved and the
/// new position should be published.
pub fn step_motion(
    motion: &mut Motion,
    input: InputState,
    speed: f32,
    dt: f32,
    boundaries: &[Rect],
) -> bool {
    let Some((velocity, dir)) = movement_vector(input, speed) else {
        motion.running = false;
        return false;
    };

    let delta = velocity.scale(dt);
    motion.pos = resolve_move(motion.pos, delta, PLAYER_HALF_W, PLAYER_HALF_H, boundaries);
    motion.direction = dir;
    motion.running = true;
    true
}
