use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use gloo_timers::future::TimeoutFuture;
use serde::de::DeserializeOwned;
use wasm_bindgen_futures::spawn_local;

use hnhmap_shared::entity::{CharacterData, MarkerData};
use hnhmap_shared::reconcile::{ReconcileError, ReconcileSummary};

use crate::config;
use crate::map::MapView;

thread_local! {
    static FEED_GENERATION: Cell<u64> = const { Cell::new(0) };
}

/// Fetch a full entity snapshot.
pub async fn fetch_snapshot<T: DeserializeOwned>(url: &str) -> Result<Vec<T>, String> {
    let resp = gloo_net::http::Request::get(url)
        .send()
        .await
        .map_err(|e| format!("fetch error: {e}"))?;

    if !resp.ok() {
        return Err(format!("HTTP {}", resp.status()));
    }

    resp.json::<Vec<T>>()
        .await
        .map_err(|e| format!("parse error: {e}"))
}

fn poll_backoff_ms(interval_ms: u32, consecutive_failures: u32) -> u32 {
    let exponent = consecutive_failures.min(6);
    interval_ms
        .saturating_mul(1 << exponent)
        .min(config::FEED_RETRY_MAX_MS.max(interval_ms))
}

type Apply<T> = fn(&mut MapView, Vec<T>) -> Result<ReconcileSummary, ReconcileError>;

/// Start polling both entity snapshots. A later call stops the earlier loops.
pub(crate) fn start(map: Weak<RefCell<MapView>>) {
    let generation = FEED_GENERATION.with(|g| {
        g.set(g.get().wrapping_add(1));
        g.get()
    });

    let apply_characters: Apply<CharacterData> = MapView::reconcile_characters;
    let apply_markers: Apply<MarkerData> = MapView::reconcile_markers;
    spawn_local(poll(
        map.clone(),
        generation,
        config::CHARACTERS_URL,
        config::CHARACTER_POLL_MS,
        apply_characters,
    ));
    spawn_local(poll(
        map,
        generation,
        config::MARKERS_URL,
        config::MARKER_POLL_MS,
        apply_markers,
    ));
}

pub(crate) fn stop() {
    FEED_GENERATION.with(|g| g.set(g.get().wrapping_add(1)));
}

fn is_current(generation: u64) -> bool {
    FEED_GENERATION.with(|g| g.get() == generation)
}

async fn poll<T: DeserializeOwned + 'static>(
    map: Weak<RefCell<MapView>>,
    generation: u64,
    url: &'static str,
    interval_ms: u32,
    apply: Apply<T>,
) {
    let mut failures = 0u32;
    while is_current(generation) {
        match fetch_snapshot::<T>(url).await {
            Ok(snapshot) => {
                failures = 0;
                let Some(map) = map.upgrade() else {
                    return;
                };
                if !is_current(generation) {
                    return;
                }
                match map.try_borrow_mut() {
                    Ok(mut view) => {
                        if apply(&mut *view, snapshot).is_ok() {
                            view.bind_entity_handlers(&Rc::downgrade(&map));
                        }
                    }
                    Err(_) => tracing::debug!(url, "map busy; skipping snapshot"),
                }
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                tracing::warn!(url, attempt = failures, error = %e, "entity snapshot fetch failed");
            }
        }
        TimeoutFuture::new(poll_backoff_ms(interval_ms, failures)).await;
    }
}
