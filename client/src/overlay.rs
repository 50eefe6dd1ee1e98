use std::collections::HashMap;

use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{Document, HtmlElement, MouseEvent};

use hnhmap_shared::entity::{EntityEvent, EventCallback, EventKind, Icon, VisualSurface};
use hnhmap_shared::projection::{LatLng, LinearProjection, Point, Projection};
use hnhmap_shared::viewport::Viewport;

use crate::tiles::create_element;

const HANDLE_STYLE: &str =
    "position: absolute; pointer-events: auto; cursor: pointer; user-select: none;";
const DOT_STYLE: &str = "display: inline-block; width: 10px; height: 10px; margin: -5px 0 0 -5px; border-radius: 50%; background: #f5c542; box-shadow: 0 0 4px rgba(0,0,0,0.8);";
const NAME_STYLE: &str = "margin-left: 4px; font-family: 'Inter', system-ui, sans-serif; font-size: 0.7rem; color: #e2e0d8; text-shadow: 0 0 2px #000; white-space: nowrap;";

/// Identifies one element mounted on the overlay.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct OverlayHandle(u32);

struct Mounted {
    element: HtmlElement,
    position: LatLng,
    anchor: [u32; 2],
    listeners: Vec<(EventKind, Closure<dyn Fn(MouseEvent)>)>,
}

/// Entity overlay drawn as absolutely positioned elements above the tile pane.
pub(crate) struct DomOverlay {
    document: Document,
    pane: HtmlElement,
    layer: i32,
    projection: LinearProjection,
    viewport: Viewport,
    next_handle: u32,
    mounted: HashMap<u32, Mounted>,
}

impl DomOverlay {
    pub(crate) fn new(
        document: Document,
        pane: HtmlElement,
        layer: i32,
        projection: LinearProjection,
        viewport: Viewport,
    ) -> Self {
        Self {
            document,
            pane,
            layer,
            projection,
            viewport,
            next_handle: 0,
            mounted: HashMap::new(),
        }
    }

    pub(crate) fn set_layer(&mut self, layer: i32) {
        self.layer = layer;
    }

    /// Map pixel position of a geographic coordinate.
    pub(crate) fn world_point(&self, position: LatLng) -> Point {
        self.projection.project(position)
    }

    /// Re-place every mounted element for a new view.
    pub(crate) fn relayout(&mut self, viewport: &Viewport) {
        self.viewport = viewport.clone();
        for mounted in self.mounted.values() {
            place(&self.viewport, &self.projection, mounted);
        }
    }

    fn build_element(&self, icon: Option<&Icon>, title: &str) -> Option<HtmlElement> {
        let element = create_element(&self.document, "div")?;
        element.style().set_css_text(HANDLE_STYLE);
        element.set_title(title);

        match icon {
            Some(icon) => {
                let image = create_element(&self.document, "img")?;
                let _ = image.set_attribute("src", &icon.url);
                let _ = image.set_attribute("alt", title);
                let style = image.style();
                let _ = style.set_property("width", &format!("{}px", icon.size[0]));
                let _ = style.set_property("height", &format!("{}px", icon.size[1]));
                let _ = element.append_child(&image);
            }
            None => {
                let dot = create_element(&self.document, "span")?;
                dot.style().set_css_text(DOT_STYLE);
                let name = create_element(&self.document, "span")?;
                name.style().set_css_text(NAME_STYLE);
                name.set_text_content(Some(title));
                let _ = element.append_child(&dot);
                let _ = element.append_child(&name);
            }
        }
        Some(element)
    }
}

impl VisualSurface for DomOverlay {
    type Handle = OverlayHandle;

    fn active_layer(&self) -> i32 {
        self.layer
    }

    fn unproject(&self, point: Point) -> LatLng {
        self.projection.unproject(point)
    }

    fn mount(&mut self, position: LatLng, icon: Option<&Icon>, title: &str) -> OverlayHandle {
        self.next_handle += 1;
        let id = self.next_handle;
        let Some(element) = self.build_element(icon, title) else {
            tracing::warn!(title, "could not create overlay element");
            return OverlayHandle(id);
        };
        let _ = self.pane.append_child(&element);
        let mounted = Mounted {
            element,
            position,
            anchor: icon.map_or([0, 0], |icon| icon.anchor),
            listeners: Vec::new(),
        };
        place(&self.viewport, &self.projection, &mounted);
        self.mounted.insert(id, mounted);
        OverlayHandle(id)
    }

    fn unmount(&mut self, handle: OverlayHandle) {
        let Some(mounted) = self.mounted.remove(&handle.0) else {
            return;
        };
        for (kind, listener) in &mounted.listeners {
            let _ = mounted.element.remove_event_listener_with_callback(
                kind.dom_name(),
                listener.as_ref().unchecked_ref(),
            );
        }
        mounted.element.remove();
    }

    fn reposition(&mut self, handle: &OverlayHandle, position: LatLng) {
        let Some(mounted) = self.mounted.get_mut(&handle.0) else {
            return;
        };
        mounted.position = position;
        place(&self.viewport, &self.projection, mounted);
    }

    fn on_event(&mut self, handle: &OverlayHandle, kind: EventKind, callback: EventCallback) {
        let Some(mounted) = self.mounted.get_mut(&handle.0) else {
            return;
        };
        let listener = Closure::<dyn Fn(MouseEvent)>::new(move |e: MouseEvent| {
            e.stop_propagation();
            if kind == EventKind::ContextMenu {
                e.prevent_default();
            }
            callback(&EntityEvent {
                kind,
                screen: Point::new(f64::from(e.client_x()), f64::from(e.client_y())),
            });
        });
        let _ = mounted
            .element
            .add_event_listener_with_callback(kind.dom_name(), listener.as_ref().unchecked_ref());
        mounted.listeners.push((kind, listener));
    }
}

fn place(viewport: &Viewport, projection: &LinearProjection, mounted: &Mounted) {
    let corner = anchored_corner(viewport, projection, mounted.position, mounted.anchor);
    let style = mounted.element.style();
    let _ = style.set_property("left", &format!("{}px", corner.x));
    let _ = style.set_property("top", &format!("{}px", corner.y));
}

/// Screen position of a handle's top-left corner, so its anchor sits on `position`.
fn anchored_corner(
    viewport: &Viewport,
    projection: &LinearProjection,
    position: LatLng,
    anchor: [u32; 2],
) -> Point {
    let screen = viewport.world_to_screen(projection.project(position));
    Point::new(
        screen.x - f64::from(anchor[0]),
        screen.y - f64::from(anchor[1]),
    )
}
