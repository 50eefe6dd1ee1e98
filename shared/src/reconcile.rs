use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

/// Anything with a stable identity.
pub trait Keyed {
    type Id: Ord + Clone + fmt::Display;

    fn id(&self) -> Self::Id;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("snapshot lists id {0} more than once")]
    DuplicateId(String),
}

/// Side effects driven by [`UniqueList::update`].
///
/// Calls arrive removals first (collection order), then updates and additions
/// (both in snapshot order). The collection is committed only after the last call.
pub trait ReconcileHandler<T> {
    fn on_remove(&mut self, old: &mut T);
    fn on_update(&mut self, old: &mut T, new: T);
    fn on_add(&mut self, new: &mut T);
}

/// Closure-backed [`ReconcileHandler`].
pub struct Callbacks<A, R, U> {
    pub on_add: A,
    pub on_remove: R,
    pub on_update: U,
}

impl<T, A, R, U> ReconcileHandler<T> for Callbacks<A, R, U>
where
    A: FnMut(&mut T),
    R: FnMut(&mut T),
    U: FnMut(&mut T, T),
{
    fn on_remove(&mut self, old: &mut T) {
        (self.on_remove)(old);
    }

    fn on_update(&mut self, old: &mut T, new: T) {
        (self.on_update)(old, new);
    }

    fn on_add(&mut self, new: &mut T) {
        (self.on_add)(new);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Collection of elements with unique ids, kept in step with full snapshots.
pub struct UniqueList<T: Keyed> {
    elements: BTreeMap<T::Id, T>,
}

impl<T: Keyed> Default for UniqueList<T> {
    fn default() -> Self {
        Self {
            elements: BTreeMap::new(),
        }
    }
}

impl<T: Keyed> UniqueList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `snapshot` against the current elements and drive `handler`.
    ///
    /// A snapshot repeating an id is rejected before any callback runs.
    pub fn update<H>(
        &mut self,
        snapshot: Vec<T>,
        handler: &mut H,
    ) -> Result<ReconcileSummary, ReconcileError>
    where
        H: ReconcileHandler<T> + ?Sized,
    {
        let mut incoming = BTreeSet::new();
        for element in &snapshot {
            let id = element.id();
            if !incoming.insert(id.clone()) {
                return Err(ReconcileError::DuplicateId(id.to_string()));
            }
        }

        let to_remove: Vec<T::Id> = self
            .elements
            .keys()
            .filter(|id| !incoming.contains(*id))
            .cloned()
            .collect();
        for id in &to_remove {
            if let Some(old) = self.elements.get_mut(id) {
                handler.on_remove(old);
            }
        }

        let mut to_add = Vec::new();
        let mut updated = 0;
        for element in snapshot {
            match self.elements.get_mut(&element.id()) {
                Some(old) => {
                    handler.on_update(old, element);
                    updated += 1;
                }
                None => to_add.push(element),
            }
        }
        for element in &mut to_add {
            handler.on_add(element);
        }

        let summary = ReconcileSummary {
            added: to_add.len(),
            updated,
            removed: to_remove.len(),
        };
        for id in &to_remove {
            self.elements.remove(id);
        }
        for element in to_add {
            self.elements.insert(element.id(), element);
        }
        Ok(summary)
    }

    pub fn elements(&self) -> impl Iterator<Item = &T> {
        self.elements.values()
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.elements.values_mut()
    }

    pub fn by_id(&self, id: &T::Id) -> Option<&T> {
        self.elements.get(id)
    }

    pub fn by_id_mut(&mut self, id: &T::Id) -> Option<&mut T> {
        self.elements.get_mut(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &T::Id> {
        self.elements.keys()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
