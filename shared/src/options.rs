use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TILE_URL: &str = "/map/grids/{layer}/{z}/{x}_{y}.png?{cache}";
pub const DEFAULT_TILE_SIZE: u32 = 100;
pub const DEFAULT_MIN_ZOOM: i32 = 1;
pub const DEFAULT_MAX_ZOOM: i32 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("min_zoom ({min}) is greater than max_zoom ({max})")]
    ZoomRange { min: i32, max: i32 },
    #[error("tile_size must be positive")]
    ZeroTileSize,
    #[error("at least one subdomain is required")]
    NoSubdomains,
}

/// Configuration of the tiled map layer. Every field has a default so partial
/// overrides deserialize cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileLayerOptions {
    pub url: String,
    pub min_zoom: i32,
    pub max_zoom: i32,
    pub zoom_offset: i32,
    pub zoom_reverse: bool,
    pub tile_size: u32,
    /// Tile matrix set addressing: `{y}` counts from the bottom of the grid.
    pub tms: bool,
    pub subdomains: Vec<String>,
    /// Source used for tiles with no availability. Never fetched.
    pub invalid_tile: String,
    /// Map id substituted into `{layer}` and `{map}`.
    pub layer: i32,
    /// Extra template values. Built-in parameters take precedence.
    pub params: BTreeMap<String, String>,
}

impl Default for TileLayerOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_TILE_URL.to_string(),
            min_zoom: DEFAULT_MIN_ZOOM,
            max_zoom: DEFAULT_MAX_ZOOM,
            zoom_offset: 0,
            zoom_reverse: true,
            tile_size: DEFAULT_TILE_SIZE,
            tms: false,
            subdomains: vec!["a".into(), "b".into(), "c".into()],
            invalid_tile: String::new(),
            layer: 0,
            params: BTreeMap::new(),
        }
    }
}

impl TileLayerOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.min_zoom > self.max_zoom {
            return Err(OptionsError::ZoomRange {
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        if self.tile_size == 0 {
            return Err(OptionsError::ZeroTileSize);
        }
        if self.subdomains.is_empty() {
            return Err(OptionsError::NoSubdomains);
        }
        Ok(())
    }

    /// Zoom level used in tile URLs and availability keys for a display zoom.
    pub fn zoom_for_url(&self, display_zoom: i32) -> i32 {
        let zoom = if self.zoom_reverse {
            self.max_zoom - display_zoom
        } else {
            display_zoom
        };
        zoom + self.zoom_offset
    }

    /// Display zoom for a URL zoom; the inverse of [`Self::zoom_for_url`].
    pub fn display_zoom_for_url(&self, url_zoom: i32) -> i32 {
        let zoom = url_zoom - self.zoom_offset;
        if self.zoom_reverse {
            self.max_zoom - zoom
        } else {
            zoom
        }
    }

    /// Subdomain for a tile, chosen round-robin along the tile diagonal.
    pub fn subdomain(&self, x: i32, y: i32) -> &str {
        if self.subdomains.is_empty() {
            return "";
        }
        let index = (i64::from(x) + i64::from(y)).unsigned_abs() % self.subdomains.len() as u64;
        &self.subdomains[index as usize]
    }
}
