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
//! The self-describing dictionary form: a record becomes a `serde_json::Value::Object` keyed
//! by field name. This module only defines the wire shape; the walk that decides which
//! fields to visit lives in [`crate::encode`] and [`crate::decode`].

/// Sentinel used to tombstone a map/id-map key in the dictionary form of a delta: the key maps
/// to JSON `null`.
pub const TOMBSTONE: serde_json::Value = serde_json::Value::Null;
