use crate::types::{Rect, Vec2};

/// Moves a `half_w` x `half_h` body by `delta`, one axis at a time, refusing
/// any axis step that would overlap a boundary. Blocking one axis still lets
/// the body slide along the other.
pub fn resolve_move(pos: Vec2, delta: Vec2, half_w: f32, half_h: f32, boundaries: &[Rect]) -> Vec2 {
    if boundaries.is_empty() {
        return Vec2::new(pos.x + delta.x, pos.y + delta.y);
    }

    let mut out = pos;

    let try_x = Vec2::new(out.x + delta.x, out.y);
    if !blocked(try_x, half_w, half_h, boundaries) {
        out = try_x;
    }

    let try_y = Vec2::new(out.x, out.y + delta.y);
    if !blocked(try_y, half_w, half_h, boundaries) {
        out = try_y;
    }

    out
}

fn blocked(center: Vec2, half_w: f32, half_h: f32, boundaries: &[Rect]) -> bool {
    let body = Rect::around(center, half_w, half_h);
    boundaries.iter().any(|wall| wall.overlaps(&body))
}
