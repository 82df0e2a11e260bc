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
//! dmodel
//!
//! # Introduction
//!
//! A schema-driven data-model engine: declarative record schemas with typed fields,
//! in-memory instantiation with default values, dual-format serialization (a
//! self-describing dictionary form and a compact tag-indexed binary form), incremental
//! change tracking so a record graph can be serialized as a delta of only the fields and
//! container entries that actually mutated, and reference fields that store a pointer by
//! identifier to an entity owned elsewhere.
//!
//! This crate does not itself choose between a native-compiled and an interpreted
//! implementation of the engine -- callers that need to run this logic on both sides of
//! such a split are expected to gate on their own process-wide configuration knob and
//! present identical surface semantics either way (see the `pack`/`unpack` methods on
//! [`RecordOps`] below for that surface).
//!
//! # Discussion
//!
//! ## Schemas and Records
//!
//! A [`schema::Schema`] is a named, flat list of [`schema::FieldDesc`]s, each carrying a
//! stable numeric `index` (the tag used on the wire), a name, a type, a cardinality
//! (scalar / array / map / id-map) and a handful of optional attributes (default value,
//! arithmetic bounds, reference semantics, a decode-time `create` hook, and so on). Call
//! [`schema::Schema::define`] once per record type, typically at process startup, and hand
//! the resulting `Arc<Schema>` to every [`record::Record`] of that type.
//!
//! A [`record::Record`] instance is always held behind a [`record::RecordRef`]
//! (`Rc<RefCell<Record>>`) rather than owned outright: a reference field and the map or
//! id-map that actually owns its target must, after a `sync` decode, observe the literal
//! same instance, and only a shared handle can make that true. Construct one with
//! [`record::Record::new`], then read and write fields through the generic accessors on
//! `Record` -- there are no per-field generated methods; a single polymorphic
//! getter/setter pair, consulted against the schema, stands in for them.
//!
//! ## Packing and Unpacking
//!
//! [`RecordOps`], implemented for [`record::RecordRef`], is the crate's public
//! serialization surface:
//!
//! ```ignore
//! rec.pack(Format::Dict, EncodeOpts::new())?;
//! rec.unpack(Format::Dict, &Packed::Dict(json), DecodeMode::Override, None, false)?;
//! ```
//!
//! Both wire formats are driven by the same recursive schema walk (see [`encode`] and
//! [`decode`]); only the shape of the bytes differs. A decode returns the oids that could
//! not be resolved against either a caller-supplied `resolve_ref` callback or the
//! per-decode known-objects table built up from id-map entries as they are decoded.

pub mod buffer;
pub mod changeset;
pub mod codec;
pub mod containers;
pub mod decode;
pub mod dict;
pub mod encode;
pub mod error;
pub mod record;
pub mod schema;
pub mod value;

pub use error::{Cause, Error, Result};
pub use record::{Record, RecordRef};
pub use schema::{Cardinality, FieldDef, FieldDesc, FieldFilter, Schema};
pub use value::{PrimitiveType, PrimitiveValue};

pub use decode::{DecodeMode, ResolveRef};
pub use encode::EncodeOpts;

use serde_json::Value as Json;

/// The two wire formats a record can be packed to or unpacked from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// The self-describing dictionary form: nested `serde_json` objects/arrays keyed by
    /// field name.
    Dict,
    /// The compact tag-indexed binary form described in the module docs for [`encode`].
    Bin,
}

impl std::str::FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Format> {
        match s {
            "dict" => Ok(Format::Dict),
            "bin" => Ok(Format::Bin),
            _ => Err(Error::new(Cause::BadFormat(s.to_string()))),
        }
    }
}

/// The result of a [`RecordOps::pack`] call: the dictionary form as a `serde_json::Value`,
/// or the binary form as a byte vector.
#[derive(Debug, Clone)]
pub enum Packed {
    Dict(Json),
    Bin(Vec<u8>),
}

impl Packed {
    pub fn format(&self) -> Format {
        match self {
            Packed::Dict(_) => Format::Dict,
            Packed::Bin(_) => Format::Bin,
        }
    }

    pub fn as_dict(&self) -> Result<&Json> {
        match self {
            Packed::Dict(v) => Ok(v),
            Packed::Bin(_) => Err(Error::new(Cause::BadFormat(String::from("bin")))),
        }
    }

    pub fn as_bin(&self) -> Result<&[u8]> {
        match self {
            Packed::Bin(v) => Ok(v),
            Packed::Dict(_) => Err(Error::new(Cause::BadFormat(String::from("dict")))),
        }
    }
}

/// The public `pack`/`unpack`/change-tracking surface, implemented for [`RecordRef`] so
/// application code never has to reach into [`encode`]/[`decode`] directly.
pub trait RecordOps {
    fn pack(&self, format: Format, opts: &EncodeOpts) -> Result<Packed>;
    fn unpack(
        &self,
        packed: &Packed,
        mode: DecodeMode,
        resolve_ref: Option<&ResolveRef>,
        mark_change: bool,
    ) -> Result<Vec<PrimitiveValue>>;

    fn has_changed(&self, name: Option<&str>, recursive: bool) -> bool;
    fn set_changed(&self, names: &[&str]) -> Result<()>;
    fn clear_changed(&self, names: &[&str], recursive: bool) -> Result<()>;
    fn is_default_value(&self, name: &str) -> Result<bool>;
    fn clear_data(&self);
}

impl RecordOps for RecordRef {
    fn pack(&self, format: Format, opts: &EncodeOpts) -> Result<Packed> {
        match format {
            Format::Dict => {
                let (json, _have_data) = encode::encode_dict(self, opts, true)?;
                Ok(Packed::Dict(json))
            }
            Format::Bin => {
                let mut buf = buffer::WriteBuffer::new();
                encode::encode_bin(self, opts, &mut buf)?;
                Ok(Packed::Bin(buf.into_vec()))
            }
        }
    }

    fn unpack(
        &self,
        packed: &Packed,
        mode: DecodeMode,
        resolve_ref: Option<&ResolveRef>,
        mark_change: bool,
    ) -> Result<Vec<PrimitiveValue>> {
        match packed {
            Packed::Dict(json) => decode::unpack_dict(self, json, mode, resolve_ref, mark_change),
            Packed::Bin(bytes) => decode::unpack_bin(self, bytes, mode, resolve_ref, mark_change),
        }
    }

    fn has_changed(&self, name: Option<&str>, recursive: bool) -> bool {
        self.borrow().has_changed(name, recursive)
    }

    fn set_changed(&self, names: &[&str]) -> Result<()> {
        self.borrow_mut().set_changed(names)
    }

    fn clear_changed(&self, names: &[&str], recursive: bool) -> Result<()> {
        self.borrow_mut().clear_changed(names, recursive)
    }

    fn is_default_value(&self, name: &str) -> Result<bool> {
        self.borrow().is_default_value(name)
    }

    fn clear_data(&self) {
        self.borrow_mut().clear_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::FieldValue;
    use std::str::FromStr;

    fn point_schema() -> std::sync::Arc<Schema> {
        Schema::define(
            "Point",
            &[],
            vec![
                FieldDef::scalar(1, "x", PrimitiveType::Int32),
                FieldDef::scalar(2, "y", PrimitiveType::Int32),
            ],
        )
        .unwrap()
    }

    #[test]
    fn format_parses_known_strings_and_rejects_others() {
        assert_eq!(Format::from_str("dict").unwrap(), Format::Dict);
        assert_eq!(Format::from_str("bin").unwrap(), Format::Bin);
        assert!(Format::from_str("xml").is_err());
    }

    #[test]
    fn pack_unpack_round_trips_through_the_public_surface() {
        let schema = point_schema();
        let src = Record::new(schema.clone());
        src.borrow_mut()
            .set("x", FieldValue::Primitive(PrimitiveValue::Int32(1)))
            .unwrap();
        src.borrow_mut()
            .set("y", FieldValue::Primitive(PrimitiveValue::Int32(2)))
            .unwrap();

        let packed = src.pack(Format::Dict, &EncodeOpts::new()).unwrap();

        let dst = Record::new(schema);
        let unsolved = dst
            .unpack(&packed, DecodeMode::Override, None, false)
            .unwrap();
        assert!(unsolved.is_empty());
        match dst.borrow().get("x").unwrap() {
            FieldValue::Primitive(PrimitiveValue::Int32(1)) => (),
            _ => panic!("expected x=1"),
        }
    }

    #[test]
    fn delta_idempotence_after_clear_changed() {
        let schema = point_schema();
        let rec = Record::new(schema);
        rec.borrow_mut()
            .set("x", FieldValue::Primitive(PrimitiveValue::Int32(1)))
            .unwrap();
        RecordOps::clear_changed(&rec, &[], true).unwrap();
        assert!(!RecordOps::has_changed(&rec, None, true));

        let mut opts = EncodeOpts::new();
        opts.only_changed = true;
        let packed = rec.pack(Format::Dict, &opts).unwrap();
        assert_eq!(packed.as_dict().unwrap(), &serde_json::json!({}));
    }
}
