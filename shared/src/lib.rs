pub mod entity;
pub mod events;
pub mod options;
pub mod projection;
pub mod reconcile;
pub mod resolver;
pub mod surface;
pub mod template;
pub mod tile;
pub mod viewport;

pub use entity::{
    Character, CharacterData, EntityData, EntityEvent, EntityLayer, EntityPresenter, EventKind,
    Marker, MarkerData, MarkerKind, Position, VisualSurface,
};
pub use events::*;
pub use options::TileLayerOptions;
pub use projection::{LatLng, LinearProjection, Point, Projection};
pub use reconcile::{Keyed, ReconcileError, ReconcileHandler, ReconcileSummary, UniqueList};
pub use resolver::{ResolveContext, TileSource, TileUrlResolver};
pub use surface::{LoadOutcome, LoadTicket, TileHost, TileLayer, TileSurface};
pub use tile::*;
pub use viewport::{TileRange, Viewport};
