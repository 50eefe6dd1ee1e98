use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::projection::{LatLng, Point};
use crate::reconcile::{Keyed, ReconcileError, ReconcileHandler, ReconcileSummary, UniqueList};

pub type EntityId = i64;

pub const MARKER_ICON_SIZE: [u32; 2] = [32, 32];
pub const MARKER_ICON_ANCHOR: [u32; 2] = [16, 16];

const TERRAIN_OBJECT_PREFIX: &str = "gfx/terobjs/mm/";
const QUEST_IMAGES: &[&str] = &["gfx/invobjs/small/bush", "gfx/invobjs/small/bumling"];

/// Entity position in map pixel space at the most detailed zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl From<Position> for Point {
    fn from(position: Position) -> Self {
        Point::new(f64::from(position.x), f64::from(position.y))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerData {
    pub id: EntityId,
    pub name: String,
    pub position: Position,
    pub image: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub map: i32,
}

impl MarkerData {
    pub fn kind(&self) -> MarkerKind {
        MarkerKind::detect(&self.image)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterData {
    pub id: EntityId,
    pub name: String,
    pub position: Position,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub map: i32,
}

/// Marker category derived from its image resource path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerKind {
    Quest,
    Custom,
    Named(String),
}

impl MarkerKind {
    pub fn detect(image: &str) -> Self {
        if QUEST_IMAGES.contains(&image) {
            return Self::Quest;
        }
        if image == "custom" {
            return Self::Custom;
        }
        let name = image.strip_prefix(TERRAIN_OBJECT_PREFIX).unwrap_or(image);
        Self::Named(name.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    pub url: String,
    pub size: [u32; 2],
    pub anchor: [u32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Click,
    ContextMenu,
}

impl EventKind {
    pub const fn dom_name(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::ContextMenu => "contextmenu",
        }
    }
}

/// A pointer event on an entity's visual handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityEvent {
    pub kind: EventKind,
    pub screen: Point,
}

pub type EventCallback = Rc<dyn Fn(&EntityEvent)>;

/// Settable callback slot. The surface holds a trampoline into the slot, so
/// replacing the callback never touches the mounted handle.
#[derive(Clone, Default)]
pub struct HandlerSlot(Rc<RefCell<Option<EventCallback>>>);

impl HandlerSlot {
    pub fn set(&self, callback: Option<EventCallback>) {
        *self.0.borrow_mut() = callback;
    }

    pub fn is_set(&self) -> bool {
        self.0.borrow().is_some()
    }

    /// Forward to the current callback. Returns `false` when none is set.
    pub fn dispatch(&self, event: &EntityEvent) -> bool {
        // Clone out first so the callback may replace itself.
        let callback = self.0.borrow().clone();
        match callback {
            Some(callback) => {
                callback(event);
                true
            }
            None => false,
        }
    }

    fn trampoline(&self) -> EventCallback {
        let slot = self.clone();
        Rc::new(move |event: &EntityEvent| {
            slot.dispatch(event);
        })
    }
}

/// The map overlay that entity handles are drawn on.
pub trait VisualSurface {
    type Handle;

    /// Map id currently displayed.
    fn active_layer(&self) -> i32;
    fn unproject(&self, point: Point) -> LatLng;
    fn mount(&mut self, position: LatLng, icon: Option<&Icon>, title: &str) -> Self::Handle;
    fn unmount(&mut self, handle: Self::Handle);
    fn reposition(&mut self, handle: &Self::Handle, position: LatLng);
    fn on_event(&mut self, handle: &Self::Handle, kind: EventKind, callback: EventCallback);
}

/// Record types that can be presented on a [`VisualSurface`].
pub trait EntityData {
    /// Events whose callbacks can be set on the presenter.
    const EVENTS: &'static [EventKind];

    fn id(&self) -> EntityId;
    fn title(&self) -> &str;
    fn position(&self) -> Position;
    fn map(&self) -> i32;

    fn hidden(&self) -> bool {
        false
    }

    fn icon(&self) -> Option<Icon> {
        None
    }
}

impl EntityData for MarkerData {
    const EVENTS: &'static [EventKind] = &[EventKind::Click, EventKind::ContextMenu];

    fn id(&self) -> EntityId {
        self.id
    }

    fn title(&self) -> &str {
        &self.name
    }

    fn position(&self) -> Position {
        self.position
    }

    fn map(&self) -> i32 {
        self.map
    }

    fn hidden(&self) -> bool {
        self.hidden
    }

    fn icon(&self) -> Option<Icon> {
        Some(Icon {
            url: format!("{}.png", self.image),
            size: MARKER_ICON_SIZE,
            anchor: MARKER_ICON_ANCHOR,
        })
    }
}

impl EntityData for CharacterData {
    const EVENTS: &'static [EventKind] = &[EventKind::Click];

    fn id(&self) -> EntityId {
        self.id
    }

    fn title(&self) -> &str {
        &self.name
    }

    fn position(&self) -> Position {
        self.position
    }

    fn map(&self) -> i32 {
        self.map
    }
}

/// One live entity and the visual handle it owns while attached.
pub struct EntityPresenter<D, S: VisualSurface> {
    data: D,
    handle: Option<S::Handle>,
    on_click: HandlerSlot,
    on_context: HandlerSlot,
}

pub type Marker<S> = EntityPresenter<MarkerData, S>;
pub type Character<S> = EntityPresenter<CharacterData, S>;

impl<D: EntityData, S: VisualSurface> EntityPresenter<D, S> {
    pub fn new(data: D) -> Self {
        Self {
            data,
            handle: None,
            on_click: HandlerSlot::default(),
            on_context: HandlerSlot::default(),
        }
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn into_data(self) -> D {
        self.data
    }

    pub fn is_attached(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&S::Handle> {
        self.handle.as_ref()
    }

    fn belongs_on(&self, surface: &S) -> bool {
        !self.data.hidden() && self.data.map() == surface.active_layer()
    }

    fn projected(&self, surface: &S) -> LatLng {
        surface.unproject(self.data.position().into())
    }

    pub fn add(&mut self, surface: &mut S) {
        if self.handle.is_some() || !self.belongs_on(surface) {
            return;
        }
        let position = self.projected(surface);
        let icon = self.data.icon();
        let handle = surface.mount(position, icon.as_ref(), self.data.title());
        for &kind in D::EVENTS {
            surface.on_event(&handle, kind, self.slot(kind).trampoline());
        }
        self.handle = Some(handle);
    }

    pub fn remove(&mut self, surface: &mut S) {
        if let Some(handle) = self.handle.take() {
            surface.unmount(handle);
        }
    }

    pub fn update(&mut self, surface: &mut S, updated: D) {
        if self.data.map() != updated.map() || updated.hidden() {
            self.remove(surface);
        }
        self.data = updated;

        match &self.handle {
            Some(handle) => {
                let position = self.projected(surface);
                surface.reposition(handle, position);
            }
            None => self.add(surface),
        }
    }

    /// Re-apply the stored position to the handle and return where it sits, or
    /// `None` while detached.
    pub fn jump_to(&self, surface: &mut S) -> Option<LatLng> {
        let handle = self.handle.as_ref()?;
        let position = self.projected(surface);
        surface.reposition(handle, position);
        Some(position)
    }

    fn slot(&self, kind: EventKind) -> &HandlerSlot {
        match kind {
            EventKind::Click => &self.on_click,
            EventKind::ContextMenu => &self.on_context,
        }
    }

    pub fn set_handler(&self, kind: EventKind, callback: Option<EventCallback>) {
        self.slot(kind).set(callback);
    }

    pub fn has_handler(&self, kind: EventKind) -> bool {
        self.slot(kind).is_set()
    }

    pub fn set_click_callback(&self, callback: impl Fn(&EntityEvent) + 'static) {
        self.set_handler(EventKind::Click, Some(Rc::new(callback)));
    }

    pub fn set_context_menu(&self, callback: impl Fn(&EntityEvent) + 'static) {
        self.set_handler(EventKind::ContextMenu, Some(Rc::new(callback)));
    }
}

impl<D: EntityData, S: VisualSurface> Keyed for EntityPresenter<D, S> {
    type Id = EntityId;

    fn id(&self) -> EntityId {
        self.data.id()
    }
}

struct PresenterSync<'a, S> {
    surface: &'a mut S,
}

impl<D: EntityData, S: VisualSurface> ReconcileHandler<EntityPresenter<D, S>>
    for PresenterSync<'_, S>
{
    fn on_remove(&mut self, old: &mut EntityPresenter<D, S>) {
        old.remove(self.surface);
    }

    fn on_update(&mut self, old: &mut EntityPresenter<D, S>, new: EntityPresenter<D, S>) {
        old.update(self.surface, new.into_data());
    }

    fn on_add(&mut self, new: &mut EntityPresenter<D, S>) {
        new.add(self.surface);
    }
}

/// A reconciled set of presenters of one kind, drawn on one surface.
pub struct EntityLayer<D: EntityData, S: VisualSurface> {
    entities: UniqueList<EntityPresenter<D, S>>,
}

impl<D: EntityData, S: VisualSurface> Default for EntityLayer<D, S> {
    fn default() -> Self {
        Self {
            entities: UniqueList::new(),
        }
    }
}

impl<D: EntityData, S: VisualSurface> EntityLayer<D, S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the layer in line with a complete snapshot of live entities.
    pub fn reconcile(
        &mut self,
        snapshot: Vec<D>,
        surface: &mut S,
    ) -> Result<ReconcileSummary, ReconcileError> {
        let presenters = snapshot.into_iter().map(EntityPresenter::new).collect();
        let mut sync = PresenterSync { surface };
        match self.entities.update(presenters, &mut sync) {
            Ok(summary) => {
                tracing::debug!(
                    added = summary.added,
                    updated = summary.updated,
                    removed = summary.removed,
                    "reconciled entity snapshot"
                );
                Ok(summary)
            }
            Err(err) => {
                tracing::warn!(error = %err, "rejected entity snapshot");
                Err(err)
            }
        }
    }

    /// Detach everything and re-add what belongs to the surface's active layer.
    pub fn switch_layer(&mut self, surface: &mut S) {
        for entity in self.entities.elements_mut() {
            entity.remove(surface);
            entity.add(surface);
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityPresenter<D, S>> {
        self.entities.by_id(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityPresenter<D, S>> {
        self.entities.elements()
    }

    pub fn attached_count(&self) -> usize {
        self.iter().filter(|entity| entity.is_attached()).count()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::projection::{LinearProjection, Projection};

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Mount(u32, String, Option<String>),
        Unmount(u32),
        Reposition(u32, LatLng),
        Listen(u32, EventKind),
    }

    #[derive(Default)]
    struct RecordingSurface {
        layer: i32,
        next_handle: u32,
        ops: Vec<Op>,
        listeners: Vec<(u32, EventKind, EventCallback)>,
    }

    impl RecordingSurface {
        fn on_layer(layer: i32) -> Self {
            Self {
                layer,
                ..Self::default()
            }
        }

        fn fire(&self, handle: u32, kind: EventKind) {
            let event = EntityEvent {
                kind,
                screen: Point::new(1.0, 2.0),
            };
            for (h, k, callback) in &self.listeners {
                if *h == handle && *k == kind {
                    callback(&event);
                }
            }
        }

        fn take_ops(&mut self) -> Vec<Op> {
            std::mem::take(&mut self.ops)
        }
    }

    impl VisualSurface for RecordingSurface {
        type Handle = u32;

        fn active_layer(&self) -> i32 {
            self.layer
        }

        fn unproject(&self, point: Point) -> LatLng {
            LinearProjection::default().unproject(point)
        }

        fn mount(&mut self, _position: LatLng, icon: Option<&Icon>, title: &str) -> u32 {
            self.next_handle += 1;
            self.ops.push(Op::Mount(
                self.next_handle,
                title.to_string(),
                icon.map(|icon| icon.url.clone()),
            ));
            self.next_handle
        }

        fn unmount(&mut self, handle: u32) {
            self.ops.push(Op::Unmount(handle));
        }

        fn reposition(&mut self, handle: &u32, position: LatLng) {
            self.ops.push(Op::Reposition(*handle, position));
        }

        fn on_event(&mut self, handle: &u32, kind: EventKind, callback: EventCallback) {
            self.ops.push(Op::Listen(*handle, kind));
            self.listeners.push((*handle, kind, callback));
        }
    }

    fn marker(id: EntityId, x: i32, y: i32, map: i32) -> MarkerData {
        MarkerData {
            id,
            name: format!("marker {id}"),
            position: Position { x, y },
            image: "gfx/terobjs/mm/cave".to_string(),
            hidden: false,
            map,
        }
    }

    fn character(id: EntityId, x: i32, y: i32, map: i32) -> CharacterData {
        CharacterData {
            id,
            name: format!("char {id}"),
            position: Position { x, y },
            kind: "player".to_string(),
            map,
        }
    }

    fn at(x: i32, y: i32) -> LatLng {
        LinearProjection::default().unproject(Point::new(f64::from(x), f64::from(y)))
    }

    #[test]
    fn marker_kind_detection() {
        assert_eq!(MarkerKind::detect("gfx/invobjs/small/bush"), MarkerKind::Quest);
        assert_eq!(MarkerKind::detect("gfx/invobjs/small/bumling"), MarkerKind::Quest);
        assert_eq!(MarkerKind::detect("custom"), MarkerKind::Custom);
        assert_eq!(
            MarkerKind::detect("gfx/terobjs/mm/cave"),
            MarkerKind::Named("cave".to_string())
        );
        assert_eq!(
            MarkerKind::detect("gfx/other/thing"),
            MarkerKind::Named("gfx/other/thing".to_string())
        );
    }

    #[test]
    fn decodes_feed_records() {
        let markers: Vec<MarkerData> = serde_json::from_str(
            r#"[{"id":4,"name":"Cave","position":{"x":10,"y":-20},"image":"gfx/terobjs/mm/cave","hidden":true,"map":2}]"#,
        )
        .expect("markers parse");
        assert!(markers[0].hidden);
        assert_eq!(markers[0].position, Position { x: 10, y: -20 });
        assert_eq!(markers[0].kind(), MarkerKind::Named("cave".to_string()));

        let chars: Vec<CharacterData> = serde_json::from_str(
            r#"[{"name":"Bob","id":7,"position":{"x":1,"y":2},"type":"player"}]"#,
        )
        .expect("characters parse");
        assert_eq!(chars[0].kind, "player");
        assert_eq!(chars[0].map, 0);
    }

    #[test]
    fn add_attaches_only_on_active_layer() {
        let mut surface = RecordingSurface::on_layer(2);
        let mut elsewhere: Marker<RecordingSurface> = EntityPresenter::new(marker(1, 0, 0, 3));
        elsewhere.add(&mut surface);
        assert!(!elsewhere.is_attached());
        assert!(surface.ops.is_empty());

        let mut here: Marker<RecordingSurface> = EntityPresenter::new(marker(2, 64, 0, 2));
        here.add(&mut surface);
        assert!(here.is_attached());
        assert_eq!(
            surface.take_ops(),
            vec![
                Op::Mount(
                    1,
                    "marker 2".to_string(),
                    Some("gfx/terobjs/mm/cave.png".to_string())
                ),
                Op::Listen(1, EventKind::Click),
                Op::Listen(1, EventKind::ContextMenu),
            ]
        );

        here.add(&mut surface);
        assert!(surface.ops.is_empty());
    }

    #[test]
    fn hidden_marker_stays_detached() {
        let mut surface = RecordingSurface::on_layer(0);
        let mut hidden: Marker<RecordingSurface> = EntityPresenter::new(MarkerData {
            hidden: true,
            ..marker(1, 0, 0, 0)
        });
        hidden.add(&mut surface);
        assert!(!hidden.is_attached());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut surface = RecordingSurface::on_layer(0);
        let mut ch: Character<RecordingSurface> = EntityPresenter::new(character(1, 0, 0, 0));
        ch.add(&mut surface);
        surface.take_ops();
        ch.remove(&mut surface);
        ch.remove(&mut surface);
        assert_eq!(surface.take_ops(), vec![Op::Unmount(1)]);
        assert!(!ch.is_attached());
    }

    #[test]
    fn update_repositions_without_recreating() {
        let mut surface = RecordingSurface::on_layer(0);
        let mut ch: Character<RecordingSurface> = EntityPresenter::new(character(1, 0, 0, 0));
        ch.add(&mut surface);
        surface.take_ops();

        ch.update(&mut surface, character(1, 640, -64, 0));
        ch.update(&mut surface, character(1, 640, -64, 0));
        assert_eq!(
            surface.take_ops(),
            vec![
                Op::Reposition(1, at(640, -64)),
                Op::Reposition(1, at(640, -64)),
            ]
        );
        assert_eq!(ch.data().position, Position { x: 640, y: -64 });
    }

    #[test]
    fn update_across_layers_detaches_and_reattaches() {
        let mut surface = RecordingSurface::on_layer(0);
        let mut ch: Character<RecordingSurface> = EntityPresenter::new(character(1, 0, 0, 0));
        ch.add(&mut surface);
        surface.take_ops();

        ch.update(&mut surface, character(1, 5, 5, 9));
        assert!(!ch.is_attached());
        assert_eq!(surface.take_ops(), vec![Op::Unmount(1)]);
        assert_eq!(ch.data().map, 9);

        ch.update(&mut surface, character(1, 6, 6, 0));
        assert!(ch.is_attached());
        assert_eq!(
            surface.take_ops(),
            vec![
                Op::Mount(2, "char 1".to_string(), None),
                Op::Listen(2, EventKind::Click),
            ]
        );
    }

    #[test]
    fn hiding_and_unhiding_marker_gets_fresh_handle() {
        let mut surface = RecordingSurface::on_layer(0);
        let mut m: Marker<RecordingSurface> = EntityPresenter::new(marker(1, 0, 0, 0));
        m.add(&mut surface);
        surface.take_ops();

        m.update(
            &mut surface,
            MarkerData {
                hidden: true,
                ..marker(1, 0, 0, 0)
            },
        );
        assert!(!m.is_attached());
        assert_eq!(surface.take_ops(), vec![Op::Unmount(1)]);

        m.update(&mut surface, marker(1, 0, 0, 0));
        assert_eq!(m.handle(), Some(&2));
    }

    #[test]
    fn click_dispatch_follows_latest_callback() {
        let mut surface = RecordingSurface::on_layer(0);
        let mut m: Marker<RecordingSurface> = EntityPresenter::new(marker(1, 0, 0, 0));
        m.add(&mut surface);

        // no callback set yet: dropped silently
        surface.fire(1, EventKind::Click);

        let first = Rc::new(Cell::new(0));
        let second = Rc::new(Cell::new(0));
        let counter = first.clone();
        m.set_click_callback(move |_| counter.set(counter.get() + 1));
        surface.fire(1, EventKind::Click);

        let counter = second.clone();
        m.set_click_callback(move |_| counter.set(counter.get() + 1));
        surface.fire(1, EventKind::Click);
        surface.fire(1, EventKind::ContextMenu);

        assert_eq!((first.get(), second.get()), (1, 1));
        assert!(m.has_handler(EventKind::Click));
        assert!(!m.has_handler(EventKind::ContextMenu));

        let context = Rc::new(Cell::new(false));
        let flag = context.clone();
        m.set_context_menu(move |event| flag.set(event.kind == EventKind::ContextMenu));
        surface.fire(1, EventKind::ContextMenu);
        assert!(context.get());

        m.set_handler(EventKind::Click, None);
        surface.fire(1, EventKind::Click);
        assert_eq!(second.get(), 1);
    }

    #[test]
    fn jump_to_only_moves_attached_handles() {
        let mut surface = RecordingSurface::on_layer(0);
        let mut m: Marker<RecordingSurface> = EntityPresenter::new(marker(1, 128, 64, 1));
        assert_eq!(m.jump_to(&mut surface), None);

        surface.layer = 1;
        m.add(&mut surface);
        surface.take_ops();
        assert_eq!(m.jump_to(&mut surface), Some(at(128, 64)));
        assert_eq!(surface.take_ops(), vec![Op::Reposition(1, at(128, 64))]);
    }

    #[test]
    fn layer_reconcile_drives_presenters() {
        let mut surface = RecordingSurface::on_layer(0);
        let mut layer: EntityLayer<CharacterData, RecordingSurface> = EntityLayer::new();

        layer
            .reconcile(vec![character(1, 0, 0, 0), character(2, 0, 0, 0)], &mut surface)
            .unwrap();
        assert_eq!(layer.attached_count(), 2);
        surface.take_ops();

        let summary = layer
            .reconcile(vec![character(2, 64, 64, 0), character(3, 0, 0, 0)], &mut surface)
            .unwrap();
        assert_eq!(
            summary,
            ReconcileSummary {
                added: 1,
                updated: 1,
                removed: 1
            }
        );
        assert_eq!(
            surface.take_ops(),
            vec![
                Op::Unmount(1),
                Op::Reposition(2, at(64, 64)),
                Op::Mount(3, "char 3".to_string(), None),
                Op::Listen(3, EventKind::Click),
            ]
        );
        assert_eq!(layer.iter().map(|c| c.data().id).collect::<Vec<_>>(), vec![2, 3]);
        assert!(layer.get(1).is_none());
    }

    #[test]
    fn layer_rejects_duplicate_snapshot() {
        let mut surface = RecordingSurface::on_layer(0);
        let mut layer: EntityLayer<MarkerData, RecordingSurface> = EntityLayer::new();
        let result = layer.reconcile(vec![marker(1, 0, 0, 0), marker(1, 5, 5, 0)], &mut surface);
        assert_eq!(result, Err(ReconcileError::DuplicateId("1".to_string())));
        assert!(layer.is_empty());
        assert!(surface.ops.is_empty());
    }

    #[test]
    fn switch_layer_reattaches_matching_entities() {
        let mut surface = RecordingSurface::on_layer(0);
        let mut layer: EntityLayer<MarkerData, RecordingSurface> = EntityLayer::new();
        layer
            .reconcile(vec![marker(1, 0, 0, 0), marker(2, 0, 0, 1)], &mut surface)
            .unwrap();
        assert_eq!(layer.attached_count(), 1);

        surface.layer = 1;
        layer.switch_layer(&mut surface);
        assert!(!layer.get(1).unwrap().is_attached());
        assert!(layer.get(2).unwrap().is_attached());
    }
}
