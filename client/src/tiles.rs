use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use js_sys::Reflect;
use wasm_bindgen::JsCast;
use wasm_bindgen::JsValue;
use wasm_bindgen::prelude::*;
use web_sys::{Document, HtmlElement, HtmlImageElement};

use hnhmap_shared::surface::{GridLabel, LoadOutcome, LoadTicket, TileHost, TileSurface};
use hnhmap_shared::tile::TileCoords;

const ONLOAD_HANDLE_KEY: &str = "__hnhmapTileOnload";
const ONERROR_HANDLE_KEY: &str = "__hnhmapTileOnerror";

const TILE_STYLE: &str = "position: absolute; image-rendering: pixelated; user-select: none; pointer-events: none; visibility: hidden;";
const LABEL_STYLE: &str = "position: absolute; pointer-events: none; white-space: pre; font-family: 'JetBrains Mono', monospace; font-size: 0.65rem; color: #e2e0d8; text-shadow: 0 0 2px #000; padding: 2px;";

pub(crate) type SharedTileSurface = Rc<RefCell<TileSurface<DomTileHost>>>;

struct MountedTile {
    image: HtmlImageElement,
    label: Option<HtmlElement>,
}

/// Tile host backed by absolutely positioned `<img>` elements inside one pane.
pub(crate) struct DomTileHost {
    document: Document,
    pane: HtmlElement,
    tile_size: u32,
    surface: Weak<RefCell<TileSurface<DomTileHost>>>,
    tiles: HashMap<TileCoords, MountedTile>,
}

impl DomTileHost {
    pub(crate) fn new(
        document: Document,
        pane: HtmlElement,
        tile_size: u32,
        surface: Weak<RefCell<TileSurface<DomTileHost>>>,
    ) -> Self {
        Self {
            document,
            pane,
            tile_size,
            surface,
            tiles: HashMap::new(),
        }
    }

    /// Translate the whole pane; tiles keep their grid position inside it.
    pub(crate) fn set_offset(&self, offset_x: f64, offset_y: f64) {
        let _ = self.pane.style().set_property(
            "transform",
            &format!("translate({offset_x}px, {offset_y}px)"),
        );
    }

    pub(crate) fn set_label(&mut self, coords: TileCoords, label: Option<GridLabel>) {
        let Some(tile) = self.tiles.get_mut(&coords) else {
            return;
        };
        match (label, tile.label.as_ref()) {
            (Some(label), Some(el)) => el.set_text_content(Some(&label.to_string())),
            (Some(label), None) => {
                let Some(el) = create_element(&self.document, "div") else {
                    return;
                };
                el.style().set_css_text(LABEL_STYLE);
                place(&el, coords, self.tile_size);
                el.set_text_content(Some(&label.to_string()));
                let _ = self.pane.append_child(&el);
                tile.label = Some(el);
            }
            (None, _) => {
                if let Some(el) = tile.label.take() {
                    el.remove();
                }
            }
        }
    }

    fn image(&self, coords: TileCoords) -> Option<&HtmlImageElement> {
        self.tiles.get(&coords).map(|tile| &tile.image)
    }

    fn finish(&self, coords: TileCoords, outcome: LoadOutcome) {
        let Some(image) = self.image(coords) else {
            return;
        };
        let style = image.style();
        match outcome {
            LoadOutcome::Loaded => {
                let _ = style.set_property("visibility", "visible");
                let _ = image.class_list().remove_1("load-error");
            }
            LoadOutcome::Errored => {
                let _ = image.class_list().add_1("load-error");
            }
        }
    }
}

impl TileHost for DomTileHost {
    fn mount(&mut self, coords: TileCoords) {
        let Ok(image) = HtmlImageElement::new() else {
            tracing::warn!(tile = %coords, "could not create tile image");
            return;
        };
        image.style().set_css_text(TILE_STYLE);
        image.set_width(self.tile_size);
        image.set_height(self.tile_size);
        place(&image, coords, self.tile_size);
        let _ = self.pane.append_child(&image);
        self.tiles.insert(coords, MountedTile { image, label: None });
    }

    fn unmount(&mut self, coords: TileCoords) {
        if let Some(tile) = self.tiles.remove(&coords) {
            clear_image_handlers(&tile.image);
            tile.image.remove();
            if let Some(label) = tile.label {
                label.remove();
            }
        }
    }

    fn begin_load(&mut self, ticket: LoadTicket, url: &str) {
        let Some(image) = self.image(ticket.coords) else {
            return;
        };
        clear_image_handlers(image);

        let onload = completion(self.surface.clone(), image.clone(), ticket, LoadOutcome::Loaded);
        let onerror = completion(self.surface.clone(), image.clone(), ticket, LoadOutcome::Errored);
        let onload_js = onload.into_js_value();
        let onerror_js = onerror.into_js_value();
        image.set_onload(Some(onload_js.unchecked_ref()));
        image.set_onerror(Some(onerror_js.unchecked_ref()));
        let _ = Reflect::set(
            image.as_ref(),
            &JsValue::from_str(ONLOAD_HANDLE_KEY),
            &onload_js,
        );
        let _ = Reflect::set(
            image.as_ref(),
            &JsValue::from_str(ONERROR_HANDLE_KEY),
            &onerror_js,
        );
        image.set_src(url);
    }

    fn show_placeholder(&mut self, coords: TileCoords, src: &str) {
        let Some(image) = self.image(coords) else {
            return;
        };
        clear_image_handlers(image);
        let _ = image.class_list().add_1("load-error");
        let _ = image.style().set_property("visibility", "hidden");
        image.set_src(src);
    }
}

/// Image callback reporting one load outcome back to the surface. Completions
/// for torn-down surfaces or reissued tiles are dropped.
fn completion(
    surface: Weak<RefCell<TileSurface<DomTileHost>>>,
    image: HtmlImageElement,
    ticket: LoadTicket,
    outcome: LoadOutcome,
) -> Closure<dyn FnMut()> {
    Closure::<dyn FnMut()>::new(move || {
        clear_image_handlers(&image);
        let Some(surface) = surface.upgrade() else {
            return;
        };
        let Ok(mut surface) = surface.try_borrow_mut() else {
            tracing::warn!(tile = %ticket.coords, "tile surface busy; dropping load completion");
            return;
        };
        if surface.complete_load(ticket, outcome) {
            surface.host().finish(ticket.coords, outcome);
        }
    })
}

fn clear_image_handlers(image: &HtmlImageElement) {
    image.set_onload(None);
    image.set_onerror(None);
    let _ = Reflect::delete_property(image.as_ref(), &JsValue::from_str(ONLOAD_HANDLE_KEY));
    let _ = Reflect::delete_property(image.as_ref(), &JsValue::from_str(ONERROR_HANDLE_KEY));
}

fn place(element: &HtmlElement, coords: TileCoords, tile_size: u32) {
    let size = i64::from(tile_size);
    let style = element.style();
    let _ = style.set_property("left", &format!("{}px", i64::from(coords.x) * size));
    let _ = style.set_property("top", &format!("{}px", i64::from(coords.y) * size));
}

pub(crate) fn create_element(document: &Document, tag: &str) -> Option<HtmlElement> {
    document
        .create_element(tag)
        .ok()
        .and_then(|el| el.dyn_into::<HtmlElement>().ok())
}
