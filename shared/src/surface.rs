use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::events::TileUpdate;
use crate::resolver::{ResolveContext, TileSource, TileUrlResolver};
use crate::tile::{GridCoord, TileCoords};
use crate::viewport::TileRange;

/// Load state of one mounted tile element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    Unloaded,
    Loading,
    Loaded,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Errored,
}

/// Identifies one issued image load. A completion is only applied while the
/// element it was issued for is still mounted and has not been reissued since.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadTicket {
    pub coords: TileCoords,
    pub generation: u64,
}

/// A tile element currently mounted on the surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileElement {
    coords: TileCoords,
    src: String,
    state: TileState,
    visible: bool,
    generation: u64,
}

impl TileElement {
    fn new(coords: TileCoords) -> Self {
        Self {
            coords,
            src: String::new(),
            state: TileState::Unloaded,
            visible: false,
            generation: 0,
        }
    }

    pub fn coords(&self) -> TileCoords {
        self.coords
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    /// Hidden until the first successful load.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn has_error(&self) -> bool {
        self.state == TileState::Errored
    }
}

/// The rendering side of the tile grid: owns the actual image elements.
///
/// `begin_load` must not call back into the surface synchronously; completions are
/// reported later through [`TileSurface::complete_load`].
pub trait TileHost {
    fn mount(&mut self, coords: TileCoords);
    fn unmount(&mut self, coords: TileCoords);
    fn begin_load(&mut self, ticket: LoadTicket, url: &str);
    /// Show a source that must not be fetched (the invalid-tile sentinel).
    fn show_placeholder(&mut self, coords: TileCoords, src: &str);
}

/// Capability interface the hosting map calls by contract.
pub trait TileLayer {
    fn get_tile(&mut self, coords: TileCoords) -> &TileElement;
    fn refresh(&mut self, x: i32, y: i32, z: i32);
}

/// Grid positions a tile covers at the most detailed zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLabel {
    pub top_left: GridCoord,
    pub bottom_right: GridCoord,
}

impl fmt::Display for GridLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({};{})", self.top_left.x, self.top_left.y)?;
        if self.top_left != self.bottom_right {
            write!(f, "\n({};{})", self.bottom_right.x, self.bottom_right.y)?;
        }
        Ok(())
    }
}

pub struct TileSurface<H: TileHost> {
    resolver: TileUrlResolver,
    host: H,
    tiles: HashMap<TileCoords, TileElement>,
    ctx: ResolveContext,
    next_generation: u64,
    show_grid_coordinates: bool,
}

impl<H: TileHost> TileSurface<H> {
    pub fn new(resolver: TileUrlResolver, host: H) -> Self {
        Self {
            resolver,
            host,
            tiles: HashMap::new(),
            ctx: ResolveContext::default(),
            next_generation: 0,
            show_grid_coordinates: false,
        }
    }

    pub fn resolver(&self) -> &TileUrlResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut TileUrlResolver {
        &mut self.resolver
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn context(&self) -> ResolveContext {
        self.ctx
    }

    pub fn set_context(&mut self, ctx: ResolveContext) {
        self.ctx = ctx;
    }

    pub fn tile(&self, coords: TileCoords) -> Option<&TileElement> {
        self.tiles.get(&coords)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &TileElement> {
        self.tiles.values()
    }

    pub fn mounted_count(&self) -> usize {
        self.tiles.len()
    }

    /// URL zoom for a display zoom, applying `zoom_reverse` then `zoom_offset`.
    pub fn zoom_for_url(&self, display_zoom: i32) -> i32 {
        self.resolver.options().zoom_for_url(display_zoom)
    }

    pub fn show_grid_coordinates(&self) -> bool {
        self.show_grid_coordinates
    }

    pub fn set_show_grid_coordinates(&mut self, value: bool) {
        self.show_grid_coordinates = value;
    }

    pub fn grid_label(&self, coords: TileCoords) -> GridLabel {
        let levels = (self.resolver.options().max_zoom - coords.z).clamp(0, 30);
        let scale = 1i32 << levels;
        let top_left = GridCoord::new(coords.x * scale, coords.y * scale);
        GridLabel {
            top_left,
            bottom_right: GridCoord::new(top_left.x + scale - 1, top_left.y + scale - 1),
        }
    }

    pub fn remove_tile(&mut self, coords: TileCoords) -> bool {
        if self.tiles.remove(&coords).is_none() {
            return false;
        }
        self.host.unmount(coords);
        true
    }

    /// Mount tiles entering `range` (nearest the center first) and unmount the rest.
    /// Returns how many tiles were newly mounted.
    pub fn update_viewport(&mut self, range: &TileRange) -> usize {
        let stale: Vec<TileCoords> = self
            .tiles
            .keys()
            .copied()
            .filter(|coords| !range.contains(*coords))
            .collect();
        for coords in stale {
            self.remove_tile(coords);
        }

        let center_x = f64::from(range.min_x + range.max_x) * 0.5;
        let center_y = f64::from(range.min_y + range.max_y) * 0.5;
        let mut missing: Vec<TileCoords> = range
            .iter()
            .filter(|coords| !self.tiles.contains_key(coords))
            .collect();
        missing.sort_by(|a, b| {
            distance_sq(a, center_x, center_y)
                .total_cmp(&distance_sq(b, center_x, center_y))
                .then_with(|| a.cmp(b))
        });

        let mounted = missing.len();
        for coords in missing {
            self.get_tile(coords);
        }
        mounted
    }

    /// Apply the outcome of an image load. Returns `false` for a stale ticket, which
    /// leaves every element untouched.
    pub fn complete_load(&mut self, ticket: LoadTicket, outcome: LoadOutcome) -> bool {
        let Some(element) = self.tiles.get_mut(&ticket.coords) else {
            tracing::trace!(tile = %ticket.coords, "load finished for unmounted tile");
            return false;
        };
        if element.generation != ticket.generation {
            tracing::trace!(
                tile = %ticket.coords,
                ticket = ticket.generation,
                current = element.generation,
                "ignoring superseded tile load"
            );
            return false;
        }
        match outcome {
            LoadOutcome::Loaded => {
                element.state = TileState::Loaded;
                element.visible = true;
            }
            LoadOutcome::Errored => element.state = TileState::Errored,
        }
        true
    }

    /// Retry errored tiles in the 3x3 neighborhood of every changed grid position.
    /// Grid positions are at the most detailed display zoom. Returns the retry count.
    pub fn reload_tiles_around(&mut self, changed: &[GridCoord]) -> usize {
        let zoom = self.resolver.options().max_zoom;
        let neighbors: BTreeSet<TileCoords> = changed
            .iter()
            .flat_map(|gc| {
                (-1..=1).flat_map(move |dy| {
                    (-1..=1).map(move |dx| TileCoords::new(gc.x + dx, gc.y + dy, zoom))
                })
            })
            .collect();

        let url_zoom = self.zoom_for_url(zoom);
        let mut retried = 0;
        for coords in neighbors {
            if self.tiles.get(&coords).is_some_and(TileElement::has_error) {
                self.load(coords, coords.grid(), url_zoom);
                retried += 1;
            }
        }
        if retried > 0 {
            tracing::debug!(retried, changed = changed.len(), "re-probed errored tiles");
        }
        retried
    }

    /// Store pushed availability, refresh tiles of the active layer and re-probe
    /// their neighborhoods.
    pub fn apply_availability(&mut self, updates: &[TileUpdate]) {
        let layer = self.resolver.layer();
        let detail_zoom = self.zoom_for_url(self.resolver.options().max_zoom);
        let mut changed = Vec::new();

        for update in updates {
            self.resolver.cache_mut().apply(update);
            if update.layer != layer {
                continue;
            }
            self.refresh(update.x, update.y, update.z);
            if update.z == detail_zoom {
                changed.push(GridCoord::new(update.x, update.y));
            }
        }

        if !changed.is_empty() {
            self.reload_tiles_around(&changed);
        }
    }

    /// Switch the displayed map and reload every mounted tile for it.
    pub fn set_layer(&mut self, layer: i32) {
        if self.resolver.layer() == layer {
            return;
        }
        self.resolver.set_layer(layer);
        let mut mounted: Vec<TileCoords> = self.tiles.keys().copied().collect();
        mounted.sort();
        for coords in mounted {
            let url_zoom = self.zoom_for_url(coords.z);
            self.load(coords, coords.grid(), url_zoom);
        }
    }

    fn load(&mut self, coords: TileCoords, grid: GridCoord, url_zoom: i32) {
        let source = match self.resolver.resolve(grid, url_zoom, &self.ctx) {
            Ok(source) => source,
            Err(err) => {
                tracing::warn!(tile = %coords, error = %err, "tile url template failed");
                TileSource::Invalid
            }
        };

        let Some(element) = self.tiles.get_mut(&coords) else {
            return;
        };
        self.next_generation += 1;
        element.generation = self.next_generation;

        match source {
            TileSource::Url(url) => {
                element.src = url;
                element.state = TileState::Loading;
                let ticket = LoadTicket {
                    coords,
                    generation: element.generation,
                };
                self.host.begin_load(ticket, &element.src);
            }
            TileSource::Invalid => {
                element.src = self.resolver.options().invalid_tile.clone();
                element.state = TileState::Errored;
                element.visible = false;
                self.host.show_placeholder(coords, &element.src);
            }
        }
    }
}

impl<H: TileHost> TileLayer for TileSurface<H> {
    fn get_tile(&mut self, coords: TileCoords) -> &TileElement {
        if !self.tiles.contains_key(&coords) {
            self.tiles.insert(coords, TileElement::new(coords));
            self.host.mount(coords);
            let url_zoom = self.zoom_for_url(coords.z);
            self.load(coords, coords.grid(), url_zoom);
        }
        &self.tiles[&coords]
    }

    fn refresh(&mut self, x: i32, y: i32, z: i32) {
        let display_zoom = self.resolver.options().display_zoom_for_url(z);
        let coords = TileCoords::new(x, y, display_zoom);
        if !self.tiles.contains_key(&coords) {
            tracing::trace!(tile = %coords, "refresh skipped, tile not mounted");
            return;
        }
        self.load(coords, GridCoord::new(x, y), z);
    }
}

fn distance_sq(coords: &TileCoords, center_x: f64, center_y: f64) -> f64 {
    let dx = f64::from(coords.x) - center_x;
    let dy = f64::from(coords.y) - center_y;
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::TileLayerOptions;
    use crate::tile::UNAVAILABLE_TOKEN;

    #[derive(Debug, Default)]
    struct RecordingHost {
        mounted: Vec<TileCoords>,
        unmounted: Vec<TileCoords>,
        loads: Vec<(LoadTicket, String)>,
        placeholders: Vec<(TileCoords, String)>,
    }

    impl TileHost for RecordingHost {
        fn mount(&mut self, coords: TileCoords) {
            self.mounted.push(coords);
        }

        fn unmount(&mut self, coords: TileCoords) {
            self.unmounted.push(coords);
        }

        fn begin_load(&mut self, ticket: LoadTicket, url: &str) {
            self.loads.push((ticket, url.to_string()));
        }

        fn show_placeholder(&mut self, coords: TileCoords, src: &str) {
            self.placeholders.push((coords, src.to_string()));
        }
    }

    fn surface() -> TileSurface<RecordingHost> {
        let options = TileLayerOptions {
            layer: 2,
            invalid_tile: "data:blank".to_string(),
            ..TileLayerOptions::default()
        };
        let resolver = TileUrlResolver::new(options).unwrap();
        TileSurface::new(resolver, RecordingHost::default())
    }

    fn last_ticket(surface: &TileSurface<RecordingHost>) -> LoadTicket {
        surface.host().loads.last().expect("a load was issued").0
    }

    #[test]
    fn get_tile_loads_available_tile() {
        let mut surface = surface();
        // display zoom 6 maps to url zoom 0 with zoom_reverse
        surface.resolver_mut().cache_mut().set(2, 4, 7, 0, 1_000);
        let coords = TileCoords::new(4, 7, 6);
        let element = surface.get_tile(coords);
        assert_eq!(element.state(), TileState::Loading);
        assert_eq!(element.src(), "/map/grids/2/0/4_7.png?1000");
        assert!(!element.is_visible());
        assert_eq!(surface.host().mounted, vec![coords]);
        assert_eq!(surface.host().loads.len(), 1);

        let ticket = last_ticket(&surface);
        assert!(surface.complete_load(ticket, LoadOutcome::Loaded));
        let element = surface.tile(coords).unwrap();
        assert_eq!(element.state(), TileState::Loaded);
        assert!(element.is_visible());
    }

    #[test]
    fn get_tile_is_idempotent() {
        let mut surface = surface();
        let coords = TileCoords::new(0, 0, 6);
        surface.get_tile(coords);
        surface.get_tile(coords);
        assert_eq!(surface.mounted_count(), 1);
        assert_eq!(surface.host().mounted.len(), 1);
    }

    #[test]
    fn invalid_tile_never_reaches_the_loader() {
        let mut surface = surface();
        let coords = TileCoords::new(1, 1, 6);
        let element = surface.get_tile(coords);
        assert_eq!(element.state(), TileState::Errored);
        assert_eq!(element.src(), "data:blank");
        assert!(surface.host().loads.is_empty());
        assert_eq!(
            surface.host().placeholders,
            vec![(coords, "data:blank".to_string())]
        );
    }

    #[test]
    fn refresh_reloads_mounted_tile_with_new_token() {
        let mut surface = surface();
        surface.resolver_mut().cache_mut().set(2, 3, 3, 1, 10);
        let coords = TileCoords::new(3, 3, 5);
        surface.get_tile(coords);
        let first = last_ticket(&surface);

        surface.resolver_mut().cache_mut().set(2, 3, 3, 1, 11);
        surface.refresh(3, 3, 1);
        assert_eq!(surface.host().loads.len(), 2);
        assert_eq!(surface.tile(coords).unwrap().src(), "/map/grids/2/1/3_3.png?11");

        // the first load resolving late must not overwrite the refreshed state
        assert!(!surface.complete_load(first, LoadOutcome::Errored));
        assert_eq!(surface.tile(coords).unwrap().state(), TileState::Loading);
    }

    #[test]
    fn refresh_of_unmounted_tile_is_a_no_op() {
        let mut surface = surface();
        surface.get_tile(TileCoords::new(0, 0, 6));
        let before: Vec<_> = surface.tiles().cloned().collect();
        surface.refresh(9, 9, 0);
        surface.refresh(0, 0, 3);
        let after: Vec<_> = surface.tiles().cloned().collect();
        assert_eq!(before, after);
        assert!(surface.host().loads.is_empty());
    }

    #[test]
    fn completion_after_unmount_is_ignored() {
        let mut surface = surface();
        surface.resolver_mut().cache_mut().set(2, 0, 0, 0, 5);
        let coords = TileCoords::new(0, 0, 6);
        surface.get_tile(coords);
        let ticket = last_ticket(&surface);
        assert!(surface.remove_tile(coords));
        assert!(!surface.complete_load(ticket, LoadOutcome::Loaded));
        assert!(surface.tile(coords).is_none());
        assert_eq!(surface.host().unmounted, vec![coords]);

        // a remount gets a fresh generation, so the old ticket stays stale
        surface.get_tile(coords);
        assert!(!surface.complete_load(ticket, LoadOutcome::Loaded));
        assert_eq!(surface.tile(coords).unwrap().state(), TileState::Loading);
    }

    #[test]
    fn reload_around_retries_only_errored_neighbors() {
        let mut surface = surface();
        let cache = surface.resolver_mut().cache_mut();
        cache.set(2, 10, 10, 0, 1);
        cache.set(2, 11, 10, 0, 1);

        let ok = TileCoords::new(10, 10, 6);
        let failed = TileCoords::new(11, 10, 6);
        let missing = TileCoords::new(9, 11, 6);
        let far = TileCoords::new(20, 20, 6);
        for coords in [ok, failed, missing, far] {
            surface.get_tile(coords);
        }
        let loads = surface.host().loads.clone();
        for (ticket, _) in &loads {
            let outcome = if ticket.coords == ok {
                LoadOutcome::Loaded
            } else {
                LoadOutcome::Errored
            };
            surface.complete_load(*ticket, outcome);
        }
        assert!(surface.tile(far).unwrap().has_error());

        surface.resolver_mut().cache_mut().set(2, 9, 11, 0, 2);
        let retried = surface.reload_tiles_around(&[GridCoord::new(10, 10)]);
        assert_eq!(retried, 2);
        assert_eq!(surface.tile(ok).unwrap().state(), TileState::Loaded);
        assert_eq!(surface.tile(failed).unwrap().state(), TileState::Loading);
        assert_eq!(surface.tile(missing).unwrap().state(), TileState::Loading);
        assert_eq!(surface.tile(missing).unwrap().src(), "/map/grids/2/0/9_11.png?2");
        assert!(surface.tile(far).unwrap().has_error());
    }

    #[test]
    fn overlapping_neighborhoods_retry_once() {
        let mut surface = surface();
        let coords = TileCoords::new(5, 5, 6);
        surface.get_tile(coords);
        let retried =
            surface.reload_tiles_around(&[GridCoord::new(4, 5), GridCoord::new(6, 5)]);
        assert_eq!(retried, 1);
    }

    #[test]
    fn apply_availability_refreshes_active_layer_only() {
        let mut surface = surface();
        let coords = TileCoords::new(1, 2, 6);
        surface.get_tile(coords);
        assert!(surface.tile(coords).unwrap().has_error());

        surface.apply_availability(&[
            TileUpdate {
                layer: 7,
                x: 1,
                y: 2,
                z: 0,
                token: 50,
            },
            TileUpdate {
                layer: 2,
                x: 1,
                y: 2,
                z: 0,
                token: 60,
            },
        ]);

        assert_eq!(surface.resolver().cache().len(), 2);
        let element = surface.tile(coords).unwrap();
        assert_eq!(element.state(), TileState::Loading);
        assert_eq!(element.src(), "/map/grids/2/0/1_2.png?60");
        // refresh issued the load; the re-probe saw it no longer errored
        assert_eq!(surface.host().loads.len(), 1);
    }

    #[test]
    fn apply_availability_marks_unavailable_tiles_errored() {
        let mut surface = surface();
        surface.resolver_mut().cache_mut().set(2, 0, 0, 0, 3);
        let coords = TileCoords::new(0, 0, 6);
        surface.get_tile(coords);
        surface.apply_availability(&[TileUpdate {
            layer: 2,
            x: 0,
            y: 0,
            z: 0,
            token: UNAVAILABLE_TOKEN,
        }]);
        assert!(surface.tile(coords).unwrap().has_error());
    }

    #[test]
    fn loaded_tile_turning_unavailable_is_hidden() {
        let mut surface = surface();
        surface.resolver_mut().cache_mut().set(2, 0, 0, 0, 3);
        let coords = TileCoords::new(0, 0, 6);
        surface.get_tile(coords);
        let ticket = last_ticket(&surface);
        assert!(surface.complete_load(ticket, LoadOutcome::Loaded));
        assert!(surface.tile(coords).unwrap().is_visible());

        surface.apply_availability(&[TileUpdate {
            layer: 2,
            x: 0,
            y: 0,
            z: 0,
            token: UNAVAILABLE_TOKEN,
        }]);
        let element = surface.tile(coords).unwrap();
        assert!(element.has_error());
        assert!(!element.is_visible());
    }

    #[test]
    fn pushed_availability_reaches_tiles_under_forward_zoom_offset() {
        let options = TileLayerOptions {
            layer: 0,
            zoom_reverse: false,
            zoom_offset: 1,
            ..TileLayerOptions::default()
        };
        let resolver = TileUrlResolver::new(options).unwrap();
        let mut surface = TileSurface::new(resolver, RecordingHost::default());
        let coords = TileCoords::new(2, 2, 3);
        assert_eq!(surface.zoom_for_url(coords.z), 4);
        assert!(surface.get_tile(coords).has_error());

        surface.apply_availability(&[TileUpdate {
            layer: 0,
            x: 2,
            y: 2,
            z: 4,
            token: 9,
        }]);
        let element = surface.tile(coords).unwrap();
        assert_eq!(element.state(), TileState::Loading);
        assert_eq!(element.src(), "/map/grids/0/4/2_2.png?9");
        assert_eq!(surface.host().loads.len(), 1);
    }

    #[test]
    fn update_viewport_mounts_center_first_and_unmounts_outside() {
        let mut surface = surface();
        let range = TileRange {
            z: 6,
            min_x: 0,
            min_y: 0,
            max_x: 2,
            max_y: 2,
        };
        assert_eq!(surface.update_viewport(&range), 9);
        assert_eq!(surface.host().mounted[0], TileCoords::new(1, 1, 6));
        assert_eq!(surface.update_viewport(&range), 0);

        let shifted = TileRange {
            min_x: 1,
            max_x: 3,
            ..range
        };
        assert_eq!(surface.update_viewport(&shifted), 3);
        assert_eq!(surface.mounted_count(), 9);
        assert_eq!(surface.host().unmounted.len(), 3);
        assert!(surface.host().unmounted.iter().all(|coords| coords.x == 0));
    }

    #[test]
    fn set_layer_reloads_mounted_tiles() {
        let mut surface = surface();
        surface.resolver_mut().cache_mut().set(3, 0, 0, 0, 8);
        let coords = TileCoords::new(0, 0, 6);
        surface.get_tile(coords);
        assert!(surface.tile(coords).unwrap().has_error());

        surface.set_layer(3);
        assert_eq!(surface.tile(coords).unwrap().src(), "/map/grids/3/0/0_0.png?8");
        surface.set_layer(3);
        assert_eq!(surface.host().loads.len(), 1);
    }

    #[test]
    fn grid_label_spans_covered_positions() {
        let surface = surface();
        let detail = surface.grid_label(TileCoords::new(3, -2, 6));
        assert_eq!(detail.to_string(), "(3;-2)");

        let zoomed_out = surface.grid_label(TileCoords::new(1, -1, 4));
        assert_eq!(zoomed_out.top_left, GridCoord::new(4, -4));
        assert_eq!(zoomed_out.bottom_right, GridCoord::new(7, -1));
        assert_eq!(zoomed_out.to_string(), "(4;-4)\n(7;-1)");
    }
}
