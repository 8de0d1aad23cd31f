use std::fs;
use std::path::Path;

use movement_core::constants::{CANVAS_H, CANVAS_W};
use movement_core::{Rect, Vec2};
use serde::Deserialize;

use crate::error::SyncError;

const BOUNDARY_LAYER: &str = "boundaries";
const SPAWN_LAYER: &str = "spawnpoint";

/// Static layout of an office map: where the player appears and what it
/// cannot walk through. Read once before connecting.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapLayout {
    pub spawn: Vec2,
    pub boundaries: Vec<Rect>,
}

#[derive(Deserialize)]
struct TiledMap {
    #[serde(default)]
    layers: Vec<TiledLayer>,
}

#[derive(Deserialize)]
struct TiledLayer {
    name: String,
    #[serde(default)]
    objects: Vec<TiledObject>,
}

#[derive(Deserialize)]
struct TiledObject {
    x: f32,
    y: f32,
    #[serde(default)]
    width: f32,
    #[serde(default)]
    height: f32,
}

impl MapLayout {
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let content = fs::read_to_string(path)
            .map_err(|err| SyncError::Layout(format!("{}: {err}", path.display())))?;
        Self::from_json(&content)
    }

    /// Parses a Tiled JSON export. Without a spawn object the player starts in
    /// the middle of the canvas.
    pub fn from_json(text: &str) -> Result<Self, SyncError> {
        let map: TiledMap =
            serde_json::from_str(text).map_err(|err| SyncError::Layout(err.to_string()))?;

        let boundaries = map
            .layers
            .iter()
            .filter(|layer| layer.name == BOUNDARY_LAYER)
            .flat_map(|layer| layer.objects.iter())
            .map(|obj| Rect {
                x: obj.x,
                y: obj.y,
                w: obj.width,
                h: obj.height,
            })
            .collect();

        let spawn = map
            .layers
            .iter()
            .find(|layer| layer.name == SPAWN_LAYER)
            .and_then(|layer| layer.objects.first())
            .map(|obj| Vec2::new(obj.x, obj.y))
            .unwrap_or(Vec2::new(CANVAS_W / 2.0, CANVAS_H / 2.0));

        Ok(Self { spawn, boundaries })
    }
}
