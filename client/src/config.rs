use gloo_storage::Storage;
use hnhmap_shared::TileLayerOptions;

pub(crate) const TILE_UPDATES_URL: &str = "/map/api/updates";
pub(crate) const CHARACTERS_URL: &str = "/map/api/v1/characters";
pub(crate) const MARKERS_URL: &str = "/map/api/v1/markers";

/// Characters move constantly; markers rarely change.
pub(crate) const CHARACTER_POLL_MS: u32 = 2_000;
pub(crate) const MARKER_POLL_MS: u32 = 60_000;
pub(crate) const FEED_RETRY_MAX_MS: u32 = 30_000;

pub(crate) const TILE_OPTIONS_KEY: &str = "hnhmap_tile_options";
pub(crate) const LOG_LEVEL_KEY: &str = "hnhmap_log_level";
pub(crate) const SETTINGS_KEY: &str = "hnhmap_settings";
pub(crate) const DEFAULT_LOG_LEVEL: &str = "info";

/// Tile layer options, with any overrides saved in local storage. Overrides that
/// fail to parse or validate are ignored.
pub(crate) fn load_tile_options() -> TileLayerOptions {
    let Ok(options) = gloo_storage::LocalStorage::get::<TileLayerOptions>(TILE_OPTIONS_KEY) else {
        return TileLayerOptions::default();
    };
    match options.validate() {
        Ok(()) => options,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring stored tile options");
            TileLayerOptions::default()
        }
    }
}

pub(crate) fn log_directive() -> String {
    gloo_storage::LocalStorage::get::<String>(LOG_LEVEL_KEY)
        .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
}

/// Persisted view settings.
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub(crate) struct Settings {
    pub show_grid_coordinates: bool,
    pub layer: Option<i32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            show_grid_coordinates: false,
            layer: None,
        }
    }
}

pub(crate) fn load_settings() -> Settings {
    gloo_storage::LocalStorage::get(SETTINGS_KEY).unwrap_or_default()
}

pub(crate) fn save_settings(settings: &Settings) {
    let _ = gloo_storage::LocalStorage::set(SETTINGS_KEY, settings);
}
