use std::cell::{Cell, RefCell};
use std::rc::Rc;

use leptos::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::HtmlElement;

use crate::config::{self, Settings};
use crate::feed;
use crate::map::{MapView, SharedMap, with_map};
use crate::sse::{self, ConnectionStatus};

struct KeydownBinding {
    window: web_sys::Window,
    _handler: Closure<dyn Fn(web_sys::KeyboardEvent)>,
}

struct ResizeBinding {
    window: web_sys::Window,
    _handler: Closure<dyn Fn()>,
}

thread_local! {
    static MAP: RefCell<Option<SharedMap>> = const { RefCell::new(None) };
    static KEYDOWN_BINDING: RefCell<Option<KeydownBinding>> = const { RefCell::new(None) };
    static RESIZE_BINDING: RefCell<Option<ResizeBinding>> = const { RefCell::new(None) };
}

fn with_mounted_map(f: impl FnOnce(&mut MapView)) {
    let Some(map) = MAP.with(|slot| slot.borrow().clone()) else {
        return;
    };
    with_map(&Rc::downgrade(&map), f);
}

fn element_size(element: &HtmlElement) -> (f64, f64) {
    (
        f64::from(element.client_width().max(1)),
        f64::from(element.client_height().max(1)),
    )
}

/// Root application component: the map container and a small status panel.
#[component]
pub fn App() -> impl IntoView {
    let options = config::load_tile_options();
    let saved = config::load_settings();

    let connection: RwSignal<ConnectionStatus> = RwSignal::new(ConnectionStatus::Connecting);
    let show_grid: RwSignal<bool> = RwSignal::new(saved.show_grid_coordinates);
    let layer: RwSignal<i32> = RwSignal::new(saved.layer.unwrap_or(options.layer));
    let zoom: RwSignal<i32> = RwSignal::new(options.min_zoom);

    let map_ref = NodeRef::<leptos::html::Div>::new();
    let tile_ref = NodeRef::<leptos::html::Div>::new();
    let overlay_ref = NodeRef::<leptos::html::Div>::new();

    // Build the map once the container elements exist.
    Effect::new(move || {
        let (Some(container), Some(tile_pane), Some(overlay_pane)) =
            (map_ref.get(), tile_ref.get(), overlay_ref.get())
        else {
            return;
        };
        if MAP.with(|slot| slot.borrow().is_some()) {
            return;
        }
        let Some(window) = web_sys::window() else {
            return;
        };
        let Some(document) = window.document() else {
            return;
        };

        let container: HtmlElement = container.unchecked_into();
        let (width, height) = element_size(&container);
        let mut view = match MapView::new(
            document,
            tile_pane.unchecked_into(),
            overlay_pane.unchecked_into(),
            options.clone(),
            width,
            height,
        ) {
            Ok(view) => view,
            Err(e) => {
                tracing::error!(error = %e, "invalid tile layer options");
                return;
            }
        };
        view.set_retina(window.device_pixel_ratio() > 1.0);
        view.set_layer(layer.get_untracked());
        view.set_show_grid_coordinates(show_grid.get_untracked());
        view.redraw();
        zoom.set(view.zoom());

        let map: SharedMap = Rc::new(RefCell::new(view));
        MAP.with(|slot| *slot.borrow_mut() = Some(map.clone()));
        tracing::info!(width, height, "map mounted");

        sse::connect(Rc::downgrade(&map), connection);
        feed::start(Rc::downgrade(&map));
        on_cleanup(|| {
            sse::disconnect();
            feed::stop();
            MAP.with(|slot| slot.borrow_mut().take());
        });
    });

    // Persist settings and push them into the map on any change
    Effect::new(move || {
        let settings = Settings {
            show_grid_coordinates: show_grid.get(),
            layer: Some(layer.get()),
        };
        config::save_settings(&settings);
        with_mounted_map(|map| {
            map.set_layer(layer.get_untracked());
            map.set_show_grid_coordinates(show_grid.get_untracked());
        });
    });

    // Track window size
    Effect::new(move || {
        let Some(window) = web_sys::window() else {
            return;
        };

        RESIZE_BINDING.with(|slot| {
            if let Some(old) = slot.borrow_mut().take() {
                let _ = old.window.remove_event_listener_with_callback(
                    "resize",
                    old._handler.as_ref().unchecked_ref(),
                );
            }
        });

        let handler = Closure::<dyn Fn()>::new(move || {
            let Some(container) = map_ref.get_untracked() else {
                return;
            };
            let container: HtmlElement = container.unchecked_into();
            let (width, height) = element_size(&container);
            with_mounted_map(|map| map.resize(width, height));
        });
        let _ = window
            .add_event_listener_with_callback("resize", handler.as_ref().unchecked_ref());
        RESIZE_BINDING.with(|slot| {
            *slot.borrow_mut() = Some(ResizeBinding {
                window: window.clone(),
                _handler: handler,
            });
        });
    });

    // Keyboard shortcuts
    Effect::new(move || {
        let Some(window) = web_sys::window() else {
            return;
        };

        KEYDOWN_BINDING.with(|slot| {
            if let Some(old) = slot.borrow_mut().take() {
                let _ = old.window.remove_event_listener_with_callback(
                    "keydown",
                    old._handler.as_ref().unchecked_ref(),
                );
            }
        });

        let handler =
            Closure::<dyn Fn(web_sys::KeyboardEvent)>::new(move |e: web_sys::KeyboardEvent| {
                let target_tag = e
                    .target()
                    .and_then(|t| t.dyn_into::<HtmlElement>().ok())
                    .map(|el| el.tag_name())
                    .unwrap_or_default();
                // Don't intercept when typing in an input
                if target_tag == "INPUT" {
                    return;
                }
                match e.key().as_str() {
                    "g" => show_grid.update(|v| *v = !*v),
                    "+" | "=" => zoom_by(zoom, 1),
                    "-" => zoom_by(zoom, -1),
                    _ => {}
                }
            });
        let _ = window
            .add_event_listener_with_callback("keydown", handler.as_ref().unchecked_ref());
        KEYDOWN_BINDING.with(|slot| {
            *slot.borrow_mut() = Some(KeydownBinding {
                window: window.clone(),
                _handler: handler,
            });
        });
    });

    // Track drag state
    let drag_last: Rc<Cell<Option<(f64, f64)>>> = Rc::new(Cell::new(None));

    let on_pointer_down = {
        let drag_last = drag_last.clone();
        move |e: web_sys::PointerEvent| {
            drag_last.set(Some((f64::from(e.client_x()), f64::from(e.client_y()))));
        }
    };

    let on_pointer_move = {
        let drag_last = drag_last.clone();
        move |e: web_sys::PointerEvent| {
            let Some((last_x, last_y)) = drag_last.get() else {
                return;
            };
            let (x, y) = (f64::from(e.client_x()), f64::from(e.client_y()));
            drag_last.set(Some((x, y)));
            with_mounted_map(|map| map.pan(x - last_x, y - last_y));
        }
    };

    let on_pointer_up = {
        let drag_last = drag_last.clone();
        move |_: web_sys::PointerEvent| drag_last.set(None)
    };

    let on_pointer_leave = move |_: web_sys::PointerEvent| drag_last.set(None);

    let on_wheel = move |e: web_sys::WheelEvent| {
        e.prevent_default();
        let levels = if e.delta_y() < 0.0 { 1 } else { -1 };
        let (mut x, mut y) = (f64::from(e.client_x()), f64::from(e.client_y()));
        if let Some(container) = map_ref.get_untracked() {
            let rect = container.get_bounding_client_rect();
            x -= rect.left();
            y -= rect.top();
        }
        with_mounted_map(|map| {
            map.zoom_at(levels, x, y);
            zoom.set(map.zoom());
        });
    };

    let on_layer_change = move |e: web_sys::Event| {
        let Some(input) = e
            .target()
            .and_then(|t| t.dyn_into::<web_sys::HtmlInputElement>().ok())
        else {
            return;
        };
        if let Ok(value) = input.value().trim().parse::<i32>() {
            layer.set(value);
        }
    };

    view! {
        <div
            node_ref=map_ref
            style="position: relative; width: 100%; height: 100%; overflow: hidden; background: #0b0d14; touch-action: none; cursor: grab;"
            on:pointerdown=on_pointer_down
            on:pointermove=on_pointer_move
            on:pointerup=on_pointer_up
            on:pointerleave=on_pointer_leave
            on:wheel=on_wheel
        >
            <div node_ref=tile_ref style="position: absolute; left: 0; top: 0;" />
            <div node_ref=overlay_ref style="position: absolute; inset: 0; pointer-events: none;" />
            <div
                style="position: absolute; top: 8px; right: 8px; display: flex; gap: 10px; align-items: center; padding: 6px 10px; background: #1a1d2a; border: 1px solid #282c3e; border-radius: 4px; color: #e2e0d8; font-family: 'JetBrains Mono', monospace; font-size: 0.7rem; cursor: default;"
                on:pointerdown=|e: web_sys::PointerEvent| e.stop_propagation()
            >
                <span style=move || {
                    if connection.get() == ConnectionStatus::Live {
                        "color: #50c878;"
                    } else {
                        "color: #f5c542;"
                    }
                }>
                    {move || connection.get().label()}
                </span>
                <span>{move || format!("z{}", zoom.get())}</span>
                <label>
                    "Grid "
                    <input
                        type="checkbox"
                        prop:checked=move || show_grid.get()
                        on:change=move |_| show_grid.update(|v| *v = !*v)
                    />
                </label>
                <label>
                    "Map "
                    <input
                        type="number"
                        style="width: 4em; background: #0b0d14; color: #e2e0d8; border: 1px solid #282c3e;"
                        prop:value=move || layer.get().to_string()
                        on:change=on_layer_change
                    />
                </label>
            </div>
        </div>
    }
}

/// Zoom around the container center.
fn zoom_by(zoom: RwSignal<i32>, levels: i32) {
    with_mounted_map(|map| {
        let (width, height) = map.size();
        map.zoom_at(levels, width / 2.0, height / 2.0);
        zoom.set(map.zoom());
    });
}
