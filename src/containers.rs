// Copyright (C) 2020-2023 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of dmodel.
//
// dmodel is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// dmodel is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with dmodel.  If not, see <http://www.gnu.org/licenses/>. *
//! The value a field slot actually holds, and the change-tracking array/map/id-map
//! containers built on top of it.

use std::collections::HashSet;

use crate::record::RecordRef;
use crate::value::PrimitiveValue;

/// What's actually stored in a record's field slot. A scalar reference field stores an oid
/// until the decoder's resolver binds it to a `Record` handle.
#[derive(Clone)]
pub enum FieldValue {
    Primitive(PrimitiveValue),
    Record(RecordRef),
    /// An unresolved (or resolved-but-projected-for-encode) reference, keyed by target oid.
    Ref(PrimitiveValue),
    Array(ArrayContainer),
    Map(MapContainer),
    IdMap(IdMapContainer),
}

/// Ordered, change-tracked sequence. A single dirty bit covers the whole container; mutating
/// methods also propagate `set_changed` to element records/containers so a subsequent delta
/// encode sees them, matching the "any mutator broadcasts to every element" rule -- with the
/// sole exception of `sort_by`, which marks the array dirty without broadcasting.
#[derive(Clone, Default)]
pub struct ArrayContainer {
    items: Vec<FieldValue>,
    dirty: bool,
}

impl ArrayContainer {
    pub fn new() -> Self {
        ArrayContainer {
            items: Vec::new(),
            dirty: false,
        }
    }

    pub fn from_vec_silent(items: Vec<FieldValue>) -> Self {
        ArrayContainer {
            items,
            dirty: false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldValue> {
        self.items.iter()
    }

    pub fn get(&self, i: usize) -> Option<&FieldValue> {
        self.items.get(i)
    }

    fn mark_element_changed(v: &FieldValue) {
        match v {
            FieldValue::Record(r) => r.borrow_mut().set_changed_all(),
            FieldValue::Array(a) => {
                // broadcasting into a nested array means marking it (and its own elements)
                // dirty in turn
                for e in &a.items {
                    Self::mark_element_changed(e);
                }
            }
            FieldValue::Map(m) => m.broadcast_changed(),
            FieldValue::IdMap(m) => m.inner.broadcast_changed(),
            _ => (),
        }
    }

    pub fn broadcast_changed(&self) {
        for v in &self.items {
            Self::mark_element_changed(v);
        }
    }

    pub fn push(&mut self, v: FieldValue) {
        Self::mark_element_changed(&v);
        self.items.push(v);
        self.broadcast_changed();
        self.dirty = true;
    }

    pub fn push_silent(&mut self, v: FieldValue) {
        self.items.push(v);
    }

    /// Overwrites an element in place without marking the array dirty or broadcasting change --
    /// used by the decoder's deferred-reference resolver to patch a resolved handle into a
    /// `ref` array slot after the fact.
    pub fn set_silent(&mut self, i: usize, v: FieldValue) {
        if i < self.items.len() {
            self.items[i] = v;
        }
    }

    pub fn set(&mut self, i: usize, v: FieldValue) {
        Self::mark_element_changed(&v);
        if i < self.items.len() {
            self.items[i] = v;
        } else {
            self.items.push(v);
        }
        self.broadcast_changed();
        self.dirty = true;
    }

    pub fn remove(&mut self, i: usize) -> Option<FieldValue> {
        if i >= self.items.len() {
            return None;
        }
        let v = self.items.remove(i);
        self.broadcast_changed();
        self.dirty = true;
        Some(v)
    }

    pub fn insert(&mut self, i: usize, v: FieldValue) {
        Self::mark_element_changed(&v);
        self.items.insert(i.min(self.items.len()), v);
        self.broadcast_changed();
        self.dirty = true;
    }

    pub fn pop(&mut self) -> Option<FieldValue> {
        let v = self.items.pop();
        if v.is_some() {
            self.broadcast_changed();
            self.dirty = true;
        }
        v
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = FieldValue>) {
        let before = self.items.len();
        self.items.extend(items);
        if self.items.len() != before {
            self.broadcast_changed();
            self.dirty = true;
        }
    }

    pub fn replace_all(&mut self, items: Vec<FieldValue>) {
        self.items = items;
        self.broadcast_changed();
        self.dirty = true;
    }

    /// Marks the array dirty but deliberately does not broadcast per-element change.
    pub fn sort_by<F: FnMut(&FieldValue, &FieldValue) -> std::cmp::Ordering>(&mut self, mut f: F) {
        self.items.sort_by(|a, b| f(a, b));
        self.dirty = true;
    }

    pub fn has_changed(&self, recursive: bool) -> bool {
        if self.dirty {
            return true;
        }
        if recursive {
            return self.items.iter().any(|v| value_has_changed(v, true));
        }
        false
    }

    pub fn clear_changed(&mut self, recursive: bool) {
        self.dirty = false;
        if recursive {
            for v in &mut self.items {
                value_clear_changed(v, true);
            }
        }
    }
}

/// Keyed, change-tracked collection. Carries a `removed` tombstone set so a delta encode can
/// emit deletions (dictionary form only -- the binary form cannot represent them).
#[derive(Clone, Default)]
pub struct MapContainer {
    items: std::collections::HashMap<PrimitiveValue, FieldValue>,
    dirty: bool,
    removed: HashSet<PrimitiveValue>,
    /// Keys whose value was directly (re)assigned since the last clear; lets an only-changed
    /// encode emit just the touched entries of a primitive-valued map instead of the whole
    /// thing, since (unlike arrays) maps support true key-level sync.
    changed_keys: HashSet<PrimitiveValue>,
}

impl MapContainer {
    pub fn new() -> Self {
        MapContainer {
            items: std::collections::HashMap::new(),
            dirty: false,
            removed: HashSet::new(),
            changed_keys: HashSet::new(),
        }
    }

    pub fn changed_keys(&self) -> &HashSet<PrimitiveValue> {
        &self.changed_keys
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, k: &PrimitiveValue) -> Option<&FieldValue> {
        self.items.get(k)
    }

    pub fn iter(&self) -> std::collections::hash_map::Iter<'_, PrimitiveValue, FieldValue> {
        self.items.iter()
    }

    pub fn removed(&self) -> &HashSet<PrimitiveValue> {
        &self.removed
    }

    pub fn insert_silent(&mut self, k: PrimitiveValue, v: FieldValue) {
        self.removed.remove(&k);
        self.items.insert(k, v);
    }

    /// `Map.__setitem__`: marks only the newly-set value changed, not the whole map.
    pub fn insert(&mut self, k: PrimitiveValue, v: FieldValue) {
        ArrayContainer::mark_element_changed(&v);
        self.removed.remove(&k);
        self.changed_keys.insert(k.clone());
        self.items.insert(k, v);
        self.dirty = true;
    }

    /// `Map.update`: like repeated `insert` but broadcasts change to every value in the map,
    /// matching the asymmetry in the reference implementation.
    pub fn update(&mut self, entries: impl IntoIterator<Item = (PrimitiveValue, FieldValue)>) {
        for (k, v) in entries {
            self.removed.remove(&k);
            self.changed_keys.insert(k.clone());
            self.items.insert(k, v);
        }
        self.dirty = true;
        self.broadcast_changed();
        for k in self.items.keys() {
            self.changed_keys.insert(k.clone());
        }
    }

    pub fn remove(&mut self, k: &PrimitiveValue) -> Option<FieldValue> {
        let v = self.items.remove(k);
        if v.is_some() {
            self.removed.insert(k.clone());
            self.changed_keys.remove(k);
            self.dirty = true;
        }
        v
    }

    pub fn clear(&mut self) {
        for k in self.items.keys() {
            self.removed.insert(k.clone());
        }
        self.changed_keys.clear();
        self.items.clear();
        self.dirty = true;
    }

    pub fn entry_or_insert_with(&mut self, k: PrimitiveValue, f: impl FnOnce() -> FieldValue) -> &mut FieldValue {
        self.dirty = true;
        self.removed.remove(&k);
        self.items.entry(k).or_insert_with(f)
    }

    pub fn broadcast_changed(&self) {
        for v in self.items.values() {
            ArrayContainer::mark_element_changed(v);
        }
    }

    pub fn has_changed(&self, recursive: bool) -> bool {
        if self.dirty || !self.removed.is_empty() {
            return true;
        }
        if recursive {
            return self.items.values().any(|v| value_has_changed(v, true));
        }
        false
    }

    pub fn clear_changed(&mut self, recursive: bool) {
        self.dirty = false;
        self.removed.clear();
        if recursive {
            for v in self.items.values_mut() {
                value_clear_changed(v, true);
            }
        }
    }
}

/// A map whose key is always the value record's `oid` field. `add`/`remove` derive the key
/// from the record itself rather than taking it explicitly.
#[derive(Clone, Default)]
pub struct IdMapContainer {
    inner: MapContainer,
}

impl IdMapContainer {
    pub fn new() -> Self {
        IdMapContainer {
            inner: MapContainer::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, k: &PrimitiveValue) -> Option<&FieldValue> {
        self.inner.get(k)
    }

    pub fn iter(&self) -> std::collections::hash_map::Iter<'_, PrimitiveValue, FieldValue> {
        self.inner.iter()
    }

    pub fn removed(&self) -> &HashSet<PrimitiveValue> {
        self.inner.removed()
    }

    pub fn insert_silent(&mut self, oid: PrimitiveValue, v: RecordRef) {
        self.inner.insert_silent(oid, FieldValue::Record(v));
    }

    /// Like `insert_silent`, but for a raw `FieldValue` -- needed to park an unresolved
    /// `FieldValue::Ref` placeholder in a `ref` id-map until the decoder resolves it.
    pub fn insert_silent_value(&mut self, oid: PrimitiveValue, v: FieldValue) {
        self.inner.insert_silent(oid, v);
    }

    pub fn changed_keys(&self) -> &HashSet<PrimitiveValue> {
        self.inner.changed_keys()
    }

    pub fn add(&mut self, oid: PrimitiveValue, v: RecordRef) {
        self.inner.insert(oid, FieldValue::Record(v));
    }

    pub fn remove(&mut self, oid: &PrimitiveValue) -> Option<RecordRef> {
        match self.inner.remove(oid) {
            Some(FieldValue::Record(r)) => Some(r),
            _ => None,
        }
    }

    pub fn has_changed(&self, recursive: bool) -> bool {
        self.inner.has_changed(recursive)
    }

    pub fn clear_changed(&mut self, recursive: bool) {
        self.inner.clear_changed(recursive)
    }

    pub fn broadcast_changed(&self) {
        self.inner.broadcast_changed()
    }
}

pub(crate) fn value_has_changed(v: &FieldValue, recursive: bool) -> bool {
    match v {
        FieldValue::Record(r) => r.borrow().has_changed(None, recursive),
        FieldValue::Array(a) => a.has_changed(recursive),
        FieldValue::Map(m) => m.has_changed(recursive),
        FieldValue::IdMap(m) => m.has_changed(recursive),
        FieldValue::Primitive(_) | FieldValue::Ref(_) => false,
    }
}

pub(crate) fn value_clear_changed(v: &mut FieldValue, recursive: bool) {
    match v {
        FieldValue::Record(r) => r.borrow_mut().clear_changed_all(recursive),
        FieldValue::Array(a) => a.clear_changed(recursive),
        FieldValue::Map(m) => m.clear_changed(recursive),
        FieldValue::IdMap(m) => m.clear_changed(recursive),
        FieldValue::Primitive(_) | FieldValue::Ref(_) => (),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_push_marks_dirty() {
        let mut a = ArrayContainer::new();
        assert!(!a.has_changed(false));
        a.push(FieldValue::Primitive(PrimitiveValue::Int32(1)));
        assert!(a.has_changed(false));
        a.clear_changed(false);
        assert!(!a.has_changed(false));
    }

    #[test]
    fn map_remove_tombstones_key() {
        let mut m = MapContainer::new();
        m.insert_silent(PrimitiveValue::UInt32(1), FieldValue::Primitive(PrimitiveValue::Bool(true)));
        m.remove(&PrimitiveValue::UInt32(1));
        assert!(m.removed().contains(&PrimitiveValue::UInt32(1)));
        assert!(m.has_changed(false));
    }

    #[test]
    fn sort_does_not_broadcast() {
        let mut a = ArrayContainer::new();
        a.push_silent(FieldValue::Primitive(PrimitiveValue::Int32(2)));
        a.push_silent(FieldValue::Primitive(PrimitiveValue::Int32(1)));
        a.sort_by(|x, y| match (x, y) {
            (FieldValue::Primitive(PrimitiveValue::Int32(a)), FieldValue::Primitive(PrimitiveValue::Int32(b))) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        });
        assert!(a.has_changed(false));
        assert_eq!(a.len(), 2);
    }
}
