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
//! The per-record mutation tracker.
//!
//! Three states: clean, a concrete set of dirty field indices, or "wildcard" (every field is
//! considered changed, the state `set_changed()` with no names produces).

use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSet {
    Clean,
    Indices(HashSet<u16>),
    Wildcard,
}

impl Default for ChangeSet {
    fn default() -> Self {
        ChangeSet::Clean
    }
}

impl ChangeSet {
    pub fn new() -> Self {
        ChangeSet::Clean
    }

    pub fn is_changed(&self, index: u16) -> bool {
        match self {
            ChangeSet::Clean => false,
            ChangeSet::Wildcard => true,
            ChangeSet::Indices(set) => set.contains(&index),
        }
    }

    pub fn any_changed(&self) -> bool {
        match self {
            ChangeSet::Clean => false,
            ChangeSet::Wildcard => true,
            ChangeSet::Indices(set) => !set.is_empty(),
        }
    }

    pub fn mark(&mut self, index: u16) {
        match self {
            ChangeSet::Wildcard => (),
            ChangeSet::Indices(set) => {
                set.insert(index);
            }
            ChangeSet::Clean => {
                let mut set = HashSet::new();
                set.insert(index);
                *self = ChangeSet::Indices(set);
            }
        }
    }

    pub fn mark_all(&mut self) {
        *self = ChangeSet::Wildcard;
    }

    pub fn clear(&mut self, index: u16) {
        match self {
            ChangeSet::Clean => (),
            ChangeSet::Wildcard => (), // clearing one field out of "all changed" is ambiguous;
            // the original semantics only ever clear everything or a concrete set, so a
            // wildcard is left untouched by a single-field clear. Callers that need this
            // should clear_all() first.
            ChangeSet::Indices(set) => {
                set.remove(&index);
            }
        }
    }

    pub fn clear_all(&mut self) {
        *self = ChangeSet::Clean;
    }

    pub fn changed_indices(&self, all: &[u16]) -> Vec<u16> {
        match self {
            ChangeSet::Clean => Vec::new(),
            ChangeSet::Wildcard => all.to_vec(),
            ChangeSet::Indices(set) => {
                let mut v: Vec<u16> = set.iter().copied().collect();
                v.sort_unstable();
                v
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clean() {
        let cs = ChangeSet::new();
        assert!(!cs.any_changed());
        assert!(!cs.is_changed(3));
    }

    #[test]
    fn mark_and_clear() {
        let mut cs = ChangeSet::new();
        cs.mark(3);
        assert!(cs.is_changed(3));
        assert!(!cs.is_changed(4));
        cs.clear(3);
        assert!(!cs.is_changed(3));
    }

    #[test]
    fn wildcard_covers_everything() {
        let mut cs = ChangeSet::new();
        cs.mark_all();
        assert!(cs.is_changed(1));
        assert!(cs.is_changed(9999));
        assert_eq!(cs.changed_indices(&[1, 2, 3]), vec![1, 2, 3]);
    }
}
