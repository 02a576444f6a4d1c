//! The user's persisted selections, independent of the current search.
//!
//! A selected item may drop out of the latest search results while still
//! needing to render with its name and description. The store therefore keeps
//! each selected id together with the last-seen value for it, in a single map:
//! an id can only enter the store paired with its value, so a lookup for a
//! selected id never fails.

use std::collections::BTreeMap;

use crate::models::Selectable;

/// Unique set of selected items keyed by [`Selectable::id`].
#[derive(Debug, Clone)]
pub struct SelectionStore<T: Selectable> {
    items: BTreeMap<T::Id, T>,
}

impl<T: Selectable> Default for SelectionStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Selectable> SelectionStore<T> {
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }

    /// Flip membership of `item`. Returns `true` if the item is now selected.
    pub fn toggle(&mut self, item: T) -> bool {
        let id = item.id();
        if self.items.remove(&id).is_some() {
            false
        } else {
            self.items.insert(id, item);
            true
        }
    }

    /// Select `item`, replacing any cached value for the same id.
    pub fn insert(&mut self, item: T) {
        self.items.insert(item.id(), item);
    }

    pub fn contains(&self, id: &T::Id) -> bool {
        self.items.contains_key(id)
    }

    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.items.get(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Update cached values for already-selected ids that appear in `seen`.
    /// Never adds new ids.
    pub fn refresh<'a>(&mut self, seen: impl IntoIterator<Item = &'a T>) {
        for item in seen {
            if let Some(cached) = self.items.get_mut(&item.id()) {
                *cached = item.clone();
            }
        }
    }

    /// Iterate selected items in id order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    /// Selected items sorted by display name (case-sensitive ascending),
    /// ties broken by id so the order is fully deterministic.
    pub fn sorted(&self) -> Vec<T> {
        let mut out: Vec<T> = self.items.values().cloned().collect();
        out.sort_by(|a, b| {
            a.display_name()
                .cmp(&b.display_name())
                .then_with(|| a.id().cmp(&b.id()))
        });
        out
    }
}
