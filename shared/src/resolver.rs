use std::collections::BTreeMap;

use thiserror::Error;

use crate::options::{OptionsError, TileLayerOptions};
use crate::template::{TemplateError, TemplateParams, UrlTemplate};
use crate::tile::{GridCoord, TileAvailability, TileAvailabilityCache, TileKey};

const RETINA_SUFFIX: &str = "@2x";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolverError {
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Extent of the map's coordinate system at the zoom being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinateSystem {
    #[default]
    Infinite,
    /// Bounded grid; `global_max_y` is the last tile row at the resolved zoom.
    Finite { global_max_y: i32 },
}

/// Host-supplied facts about the current view that feed URL resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolveContext {
    pub crs: CoordinateSystem,
    pub retina: bool,
}

/// Template parameters for one tile, derived fresh on every resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    pub subdomain: String,
    pub retina: bool,
    pub layer: i32,
    pub x: i32,
    /// Row used in the URL and the availability lookup (inverted under `tms`).
    pub y: i32,
    pub inverted_y: Option<i32>,
    pub z: i32,
    pub availability: Option<TileAvailability>,
}

impl TileRequest {
    pub const fn key(&self) -> TileKey {
        TileKey::new(self.layer, self.x, self.y, self.z)
    }

    /// Cache-busting token, or `None` when the tile has nothing to fetch.
    pub fn token(&self) -> Option<i64> {
        self.availability.and_then(TileAvailability::token)
    }

    fn params(&self, token: i64, extra: &BTreeMap<String, String>) -> TemplateParams {
        let mut params = TemplateParams::new();
        params.insert("s", &self.subdomain);
        params.insert("r", if self.retina { RETINA_SUFFIX } else { "" });
        params.insert("x", self.x);
        params.insert("y", self.y);
        params.insert("z", self.z);
        params.insert("layer", self.layer);
        params.insert("map", self.layer);
        params.insert("cache", token);
        if let Some(inverted_y) = self.inverted_y {
            params.insert("-y", inverted_y);
        }
        for (name, value) in extra {
            params.insert_missing(name, value);
        }
        params
    }
}

/// Outcome of resolving a tile: a fetchable URL or the invalid-tile marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileSource {
    Url(String),
    Invalid,
}

impl TileSource {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }

    /// Image source to assign, substituting the configured sentinel for invalid tiles.
    pub fn as_src<'a>(&'a self, invalid_tile: &'a str) -> &'a str {
        match self {
            Self::Url(url) => url,
            Self::Invalid => invalid_tile,
        }
    }
}

/// Decides the image URL for a tile from the layer options and the availability cache.
#[derive(Debug, Clone)]
pub struct TileUrlResolver {
    options: TileLayerOptions,
    template: UrlTemplate,
    cache: TileAvailabilityCache,
}

impl TileUrlResolver {
    pub fn new(options: TileLayerOptions) -> Result<Self, ResolverError> {
        Self::with_cache(options, TileAvailabilityCache::new())
    }

    pub fn with_cache(
        options: TileLayerOptions,
        cache: TileAvailabilityCache,
    ) -> Result<Self, ResolverError> {
        options.validate()?;
        let template = UrlTemplate::parse(&options.url)?;
        Ok(Self {
            options,
            template,
            cache,
        })
    }

    pub fn options(&self) -> &TileLayerOptions {
        &self.options
    }

    pub fn template(&self) -> &UrlTemplate {
        &self.template
    }

    pub fn cache(&self) -> &TileAvailabilityCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TileAvailabilityCache {
        &mut self.cache
    }

    pub fn layer(&self) -> i32 {
        self.options.layer
    }

    pub fn set_layer(&mut self, layer: i32) {
        self.options.layer = layer;
    }

    /// Build the template parameters and availability lookup for a tile at URL zoom `zoom`.
    pub fn request(&self, coords: GridCoord, zoom: i32, ctx: &ResolveContext) -> TileRequest {
        let mut y = coords.y;
        let mut inverted_y = None;
        if let CoordinateSystem::Finite { global_max_y } = ctx.crs {
            let inverted = global_max_y - coords.y;
            if self.options.tms {
                y = inverted;
            }
            inverted_y = Some(inverted);
        }

        let layer = self.options.layer;
        TileRequest {
            subdomain: self.options.subdomain(coords.x, coords.y).to_string(),
            retina: ctx.retina,
            layer,
            x: coords.x,
            y,
            inverted_y,
            z: zoom,
            availability: self.cache.get(layer, coords.x, y, zoom),
        }
    }

    pub fn resolve(
        &self,
        coords: GridCoord,
        zoom: i32,
        ctx: &ResolveContext,
    ) -> Result<TileSource, TemplateError> {
        let request = self.request(coords, zoom, ctx);
        let Some(token) = request.token() else {
            return Ok(TileSource::Invalid);
        };
        let url = self
            .template
            .render(&request.params(token, &self.options.params))?;
        Ok(TileSource::Url(url))
    }
}
