//! Identity Set
//!
//! A set of node identities backed by a dense slot array. It exists for one
//! job: holding the subscribers of an observable or computed, where a
//! notification pass must visit every subscriber while clearing each slot as
//! it goes.
//!
//! # Draining
//!
//! Between [`IdentitySet::begin_drain`] and [`IdentitySet::end_drain`] the
//! owner walks slot indices and calls [`IdentitySet::take`] on each. Slot
//! positions never move while a drain is open: removals just empty their
//! slot, and insertions append past the length captured at the start.
//!
//! # Capacity
//!
//! Growing and shrinking on every notification would churn the allocator for
//! hot nodes. Instead the owner remembers the largest size reached during a
//! cycle and, when the drain closes, storage is resized to
//! [`IdentitySet::desired_capacity`] of that figure. Compaction happens in
//! place, and storage is only reallocated when that capacity changes, so a
//! node notified at a steady fan-out reuses the same buffers every cycle.

use std::collections::HashMap;
use std::hash::Hash;

/// Dense, slot-addressed set of identities.
#[derive(Debug, Clone)]
pub struct IdentitySet<K> {
    slots: Vec<Option<K>>,
    positions: HashMap<K, usize>,
    draining: bool,
}

impl<K> Default for IdentitySet<K> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            positions: HashMap::new(),
            draining: false,
        }
    }
}

impl<K> IdentitySet<K>
where
    K: Copy + Eq + Hash,
{
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty set with room for `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
            draining: false,
        }
    }

    /// Insert `item`. Returns `true` iff it was not already present.
    pub fn add(&mut self, item: K) -> bool {
        if self.positions.contains_key(&item) {
            return false;
        }
        if !self.draining && self.slots.len() == self.slots.capacity() && self.holes() > self.size() {
            self.compact(self.slots.capacity());
        }
        self.positions.insert(item, self.slots.len());
        self.slots.push(Some(item));
        true
    }

    /// Remove `item`, leaving its slot empty. Returns `true` if it was present.
    pub fn remove(&mut self, item: &K) -> bool {
        match self.positions.remove(item) {
            Some(slot) => {
                self.slots[slot] = None;
                true
            }
            None => false,
        }
    }

    /// Whether `item` is in the set.
    pub fn contains(&self, item: &K) -> bool {
        self.positions.contains_key(item)
    }

    /// Number of live items.
    pub fn size(&self) -> usize {
        self.positions.len()
    }

    /// Whether the set holds no live items.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// The backing slot array. Cleared slots read as `None`.
    pub fn items(&self) -> &[Option<K>] {
        &self.slots
    }

    /// Live items, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = K> + '_ {
        self.slots.iter().filter_map(|slot| *slot)
    }

    /// Capacity to reserve for the next cycle given the largest size seen
    /// in this one. Zero stays zero; anything else rounds up to a power of
    /// two no smaller than `floor`.
    pub fn desired_capacity(max_observed: usize, floor: usize) -> usize {
        if max_observed == 0 {
            0
        } else {
            max_observed.next_power_of_two().max(floor)
        }
    }

    /// Compact live items to the front and size storage to `capacity`
    /// (never below the live count).
    pub fn resize(&mut self, capacity: usize) {
        debug_assert!(!self.draining, "resize during an open drain");
        self.compact(capacity);
    }

    /// Open a destructive pass. Returns the number of slots to visit.
    pub fn begin_drain(&mut self) -> usize {
        self.draining = true;
        self.slots.len()
    }

    /// Clear `slot` and return the item it held, if any.
    pub fn take(&mut self, slot: usize) -> Option<K> {
        let item = self.slots.get_mut(slot)?.take()?;
        self.positions.remove(&item);
        Some(item)
    }

    /// Close a destructive pass and resize storage to `capacity`.
    pub fn end_drain(&mut self, capacity: usize) {
        self.draining = false;
        self.compact(capacity);
    }

    fn holes(&self) -> usize {
        self.slots.len() - self.positions.len()
    }

    fn compact(&mut self, capacity: usize) {
        if self.holes() > 0 {
            self.slots.retain(Option::is_some);
            let positions = &mut self.positions;
            for (slot, item) in self.slots.iter().enumerate() {
                if let Some(position) = item.as_ref().and_then(|item| positions.get_mut(item)) {
                    *position = slot;
                }
            }
        }
        self.fit(capacity);
    }

    /// Grow or shrink storage to `capacity`. Both calls are no-ops when the
    /// buffers already have that size.
    fn fit(&mut self, capacity: usize) {
        let capacity = capacity.max(self.positions.len());
        if capacity > self.slots.capacity() {
            self.slots.reserve_exact(capacity - self.slots.len());
        } else {
            self.slots.shrink_to(capacity);
        }
        if capacity > self.positions.capacity() {
            self.positions.reserve(capacity - self.positions.len());
        } else {
            self.positions.shrink_to(capacity);
        }
    }
}
