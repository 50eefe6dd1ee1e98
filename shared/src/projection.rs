use serde::{Deserialize, Serialize};

use crate::options::{DEFAULT_MAX_ZOOM, DEFAULT_TILE_SIZE};

/// Map-space extent the geographic range is normalized against.
const WORLD_EXTENT: f64 = 2_500_000.0;

/// A point in map pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Pure transform between map pixel space and geographic coordinates.
pub trait Projection {
    fn project(&self, latlng: LatLng) -> Point;
    fn unproject(&self, point: Point) -> LatLng;
}

/// Fixed linear projection of the game map: pixel space at `zoom` scaled by
/// `2^zoom`, y axis flipped, then normalized per tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearProjection {
    zoom: i32,
    lat_per_unit: f64,
    lng_per_unit: f64,
}

impl LinearProjection {
    pub fn new(zoom: i32, tile_size: u32) -> Self {
        let tile_size = f64::from(tile_size);
        Self {
            zoom,
            lat_per_unit: 90.0 * tile_size / WORLD_EXTENT,
            lng_per_unit: 180.0 * tile_size / WORLD_EXTENT,
        }
    }

    fn scale(&self) -> f64 {
        2f64.powi(self.zoom)
    }
}

impl Default for LinearProjection {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ZOOM, DEFAULT_TILE_SIZE)
    }
}

impl Projection for LinearProjection {
    fn project(&self, latlng: LatLng) -> Point {
        let scale = self.scale();
        Point {
            x: latlng.lat / self.lat_per_unit * scale,
            y: -(latlng.lng / self.lng_per_unit) * scale,
        }
    }

    fn unproject(&self, point: Point) -> LatLng {
        let scale = self.scale();
        LatLng {
            lat: point.x / scale * self.lat_per_unit,
            lng: -point.y / scale * self.lng_per_unit,
        }
    }
}
