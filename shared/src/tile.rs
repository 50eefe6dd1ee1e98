use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::events::TileUpdate;

/// Raw token value the push channel uses to mark a tile as unavailable.
pub const UNAVAILABLE_TOKEN: i64 = -1;

/// A position on the tile grid, without zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: i32,
    pub y: i32,
}

impl GridCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A tile on the display grid: position plus display zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoords {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl TileCoords {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub const fn grid(&self) -> GridCoord {
        GridCoord::new(self.x, self.y)
    }
}

impl std::fmt::Display for TileCoords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.x, self.y, self.z)
    }
}

/// Identity of one tile image on the server: layer, grid position and URL zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub layer: i32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl TileKey {
    pub const fn new(layer: i32, x: i32, y: i32, z: i32) -> Self {
        Self { layer, x, y, z }
    }
}

/// Availability state of a tile as last pushed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileAvailability {
    Unavailable,
    /// Opaque version token, only ever used as a cache-busting query value.
    Version(i64),
}

impl TileAvailability {
    pub const fn from_raw(raw: i64) -> Self {
        if raw == UNAVAILABLE_TOKEN {
            Self::Unavailable
        } else {
            Self::Version(raw)
        }
    }

    /// The token to substitute into `{cache}`, or `None` when the tile must not be fetched.
    ///
    /// A zero token carries no cache-busting value and is treated like a missing entry.
    pub const fn token(self) -> Option<i64> {
        match self {
            Self::Unavailable | Self::Version(0) => None,
            Self::Version(token) => Some(token),
        }
    }

    pub const fn is_renderable(self) -> bool {
        self.token().is_some()
    }
}

/// Session-wide tile availability map.
///
/// Entries are only written by the push channel and never expire; a later push for
/// the same key overwrites the earlier one.
#[derive(Debug, Clone, Default)]
pub struct TileAvailabilityCache {
    entries: HashMap<TileKey, TileAvailability>,
}

impl TileAvailabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, layer: i32, x: i32, y: i32, z: i32) -> Option<TileAvailability> {
        self.entries.get(&TileKey::new(layer, x, y, z)).copied()
    }

    pub fn set(&mut self, layer: i32, x: i32, y: i32, z: i32, token: i64) {
        self.entries
            .insert(TileKey::new(layer, x, y, z), TileAvailability::from_raw(token));
    }

    pub fn apply(&mut self, update: &TileUpdate) {
        self.set(update.layer, update.x, update.y, update.z, update.token);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
