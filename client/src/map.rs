use std::cell::RefCell;
use std::rc::{Rc, Weak};

use web_sys::{Document, HtmlElement};

use hnhmap_shared::entity::{CharacterData, EntityId, EntityLayer, EventKind, MarkerData};
use hnhmap_shared::events::TileUpdate;
use hnhmap_shared::options::TileLayerOptions;
use hnhmap_shared::projection::{LinearProjection, Point};
use hnhmap_shared::reconcile::{ReconcileError, ReconcileSummary};
use hnhmap_shared::resolver::{ResolveContext, TileUrlResolver};
use hnhmap_shared::surface::TileSurface;
use hnhmap_shared::viewport::Viewport;

use crate::overlay::DomOverlay;
use crate::tiles::{DomTileHost, SharedTileSurface};

pub(crate) type SharedMap = Rc<RefCell<MapView>>;

/// Everything drawn in the map container: the tile surface, the entity overlay and
/// the view they share.
pub(crate) struct MapView {
    viewport: Viewport,
    tiles: SharedTileSurface,
    overlay: DomOverlay,
    characters: EntityLayer<CharacterData, DomOverlay>,
    markers: EntityLayer<MarkerData, DomOverlay>,
    tile_size: u32,
}

impl MapView {
    pub(crate) fn new(
        document: Document,
        tile_pane: HtmlElement,
        overlay_pane: HtmlElement,
        options: TileLayerOptions,
        width: f64,
        height: f64,
    ) -> Result<Self, String> {
        let viewport = Viewport::new(&options, width, height);
        let tile_size = options.tile_size;
        let projection = LinearProjection::new(options.max_zoom, tile_size);
        let layer = options.layer;
        let resolver = TileUrlResolver::new(options).map_err(|e| e.to_string())?;

        let tiles = Rc::new_cyclic(|weak| {
            let host = DomTileHost::new(document.clone(), tile_pane, tile_size, weak.clone());
            RefCell::new(TileSurface::new(resolver, host))
        });
        let overlay = DomOverlay::new(document, overlay_pane, layer, projection, viewport.clone());

        Ok(Self {
            viewport,
            tiles,
            overlay,
            characters: EntityLayer::new(),
            markers: EntityLayer::new(),
            tile_size,
        })
    }

    pub(crate) fn layer(&self) -> i32 {
        self.tiles.borrow().resolver().layer()
    }

    pub(crate) fn zoom(&self) -> i32 {
        self.viewport.zoom
    }

    pub(crate) fn size(&self) -> (f64, f64) {
        (self.viewport.width, self.viewport.height)
    }

    pub(crate) fn set_retina(&mut self, retina: bool) {
        let mut tiles = self.tiles.borrow_mut();
        let ctx = ResolveContext {
            retina,
            ..tiles.context()
        };
        tiles.set_context(ctx);
    }

    /// Sync tiles, labels and entity positions with the current viewport.
    pub(crate) fn redraw(&mut self) {
        let range = self.viewport.tile_range(self.tile_size);
        {
            let mut tiles = self.tiles.borrow_mut();
            let mounted = tiles.update_viewport(&range);
            if mounted > 0 {
                tracing::trace!(mounted, z = range.z, "mounted tiles");
            }

            let show = tiles.show_grid_coordinates();
            let labels: Vec<_> = tiles
                .tiles()
                .map(|tile| {
                    let coords = tile.coords();
                    (coords, show.then(|| tiles.grid_label(coords)))
                })
                .collect();
            let host = tiles.host_mut();
            for (coords, label) in labels {
                host.set_label(coords, label);
            }
            host.set_offset(self.viewport.offset_x, self.viewport.offset_y);
        }
        self.overlay.relayout(&self.viewport);
    }

    pub(crate) fn pan(&mut self, dx: f64, dy: f64) {
        self.viewport.pan(dx, dy);
        self.redraw();
    }

    pub(crate) fn zoom_at(&mut self, levels: i32, screen_x: f64, screen_y: f64) {
        if self.viewport.zoom_at(levels, screen_x, screen_y) {
            self.redraw();
        }
    }

    pub(crate) fn resize(&mut self, width: f64, height: f64) {
        self.viewport.resize(width, height);
        self.redraw();
    }

    pub(crate) fn center_on(&mut self, world: Point) {
        self.viewport.center_on(world);
        self.redraw();
    }

    pub(crate) fn set_show_grid_coordinates(&mut self, show: bool) {
        self.tiles.borrow_mut().set_show_grid_coordinates(show);
        self.redraw();
    }

    pub(crate) fn apply_availability(&mut self, updates: &[TileUpdate]) {
        self.tiles.borrow_mut().apply_availability(updates);
    }

    /// Switch the displayed map: tiles reload and entities re-attach for it.
    pub(crate) fn set_layer(&mut self, layer: i32) {
        if self.layer() == layer {
            return;
        }
        tracing::info!(layer, "switching map layer");
        self.tiles.borrow_mut().set_layer(layer);
        self.overlay.set_layer(layer);
        self.characters.switch_layer(&mut self.overlay);
        self.markers.switch_layer(&mut self.overlay);
    }

    pub(crate) fn reconcile_characters(
        &mut self,
        snapshot: Vec<CharacterData>,
    ) -> Result<ReconcileSummary, ReconcileError> {
        self.characters.reconcile(snapshot, &mut self.overlay)
    }

    pub(crate) fn reconcile_markers(
        &mut self,
        snapshot: Vec<MarkerData>,
    ) -> Result<ReconcileSummary, ReconcileError> {
        self.markers.reconcile(snapshot, &mut self.overlay)
    }

    /// Center on a marker, if it is drawn on the active layer.
    pub(crate) fn jump_to_marker(&mut self, id: EntityId) -> bool {
        let Some(position) = self
            .markers
            .get(id)
            .and_then(|marker| marker.jump_to(&mut self.overlay))
        else {
            return false;
        };
        let world = self.overlay.world_point(position);
        self.center_on(world);
        true
    }

    pub(crate) fn jump_to_character(&mut self, id: EntityId) -> bool {
        let Some(position) = self
            .characters
            .get(id)
            .and_then(|character| character.jump_to(&mut self.overlay))
        else {
            return false;
        };
        let world = self.overlay.world_point(position);
        self.center_on(world);
        true
    }

    /// Give every presenter that has none yet its click handlers.
    pub(crate) fn bind_entity_handlers(&self, map: &Weak<RefCell<MapView>>) {
        for marker in self.markers.iter() {
            if marker.has_handler(EventKind::Click) {
                continue;
            }
            let id = marker.data().id;
            let weak = map.clone();
            marker.set_click_callback(move |_| {
                with_map(&weak, |map| {
                    map.jump_to_marker(id);
                });
            });
            let name = marker.data().name.clone();
            marker.set_context_menu(move |event| {
                tracing::info!(id, name = %name, x = event.screen.x, y = event.screen.y, "marker context menu");
            });
        }
        for character in self.characters.iter() {
            if character.has_handler(EventKind::Click) {
                continue;
            }
            let id = character.data().id;
            let weak = map.clone();
            character.set_click_callback(move |_| {
                with_map(&weak, |map| {
                    map.jump_to_character(id);
                });
            });
        }
    }
}

/// Run `f` against the map if it is still alive and not already borrowed.
pub(crate) fn with_map(map: &Weak<RefCell<MapView>>, f: impl FnOnce(&mut MapView)) {
    let Some(map) = map.upgrade() else {
        return;
    };
    let Ok(mut map) = map.try_borrow_mut() else {
        tracing::debug!("map busy; dropping event");
        return;
    };
    f(&mut map);
}
