use std::cell::RefCell;
use std::rc::Weak;

use leptos::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{EventSource, MessageEvent};

use hnhmap_shared::events::parse_tile_batch;

use crate::config;
use crate::map::{MapView, with_map};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Live,
    Reconnecting,
}

impl ConnectionStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::Live => "Live",
            Self::Reconnecting => "Reconnecting",
        }
    }
}

struct SseConnection {
    es: EventSource,
    _on_open: Closure<dyn Fn()>,
    _on_error: Closure<dyn Fn()>,
    _on_message: Closure<dyn Fn(MessageEvent)>,
}

impl SseConnection {
    fn close(self) {
        self.es.set_onopen(None);
        self.es.set_onerror(None);
        self.es.set_onmessage(None);
        self.es.close();
    }
}

thread_local! {
    static SSE_CONNECTION: RefCell<Option<SseConnection>> = const { RefCell::new(None) };
}

pub fn disconnect() {
    SSE_CONNECTION.with(|slot| {
        if let Some(connection) = slot.borrow_mut().take() {
            connection.close();
        }
    });
}

/// Subscribe to tile availability pushes and feed them to the map. The browser
/// reconnects on its own after errors.
pub(crate) fn connect(map: Weak<RefCell<MapView>>, connection: RwSignal<ConnectionStatus>) {
    connection.set(ConnectionStatus::Connecting);

    let es = match EventSource::new(config::TILE_UPDATES_URL) {
        Ok(es) => es,
        Err(_) => {
            tracing::warn!(url = config::TILE_UPDATES_URL, "could not open tile update stream");
            connection.set(ConnectionStatus::Reconnecting);
            return;
        }
    };

    let conn = connection;
    let on_open = Closure::<dyn Fn()>::new(move || {
        tracing::debug!("tile update stream open");
        conn.set(ConnectionStatus::Live);
    });
    es.set_onopen(Some(on_open.as_ref().unchecked_ref()));

    let on_message = Closure::<dyn Fn(MessageEvent)>::new(move |e: MessageEvent| {
        let Some(data) = e.data().as_string() else {
            return;
        };
        let updates = match parse_tile_batch(&data) {
            Ok(updates) => updates,
            Err(err) => {
                tracing::warn!(error = %err, "malformed tile update batch");
                return;
            }
        };
        if updates.is_empty() {
            return;
        }
        tracing::trace!(count = updates.len(), "tile update batch");
        with_map(&map, |map| map.apply_availability(&updates));
    });
    es.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

    let conn = connection;
    let on_error = Closure::<dyn Fn()>::new(move || {
        conn.set(ConnectionStatus::Reconnecting);
    });
    es.set_onerror(Some(on_error.as_ref().unchecked_ref()));

    // Replace any existing connection, ensuring handlers are unregistered cleanly.
    SSE_CONNECTION.with(|slot| {
        let mut slot = slot.borrow_mut();
        if let Some(old) = slot.take() {
            old.close();
        }
        *slot = Some(SseConnection {
            es,
            _on_open: on_open,
            _on_error: on_error,
            _on_message: on_message,
        });
    });
}
