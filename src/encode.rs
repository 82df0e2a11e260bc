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
//! The two encoders: a recursive walk over a [`Record`] and its [`Schema`] that either builds a
//! `serde_json::Value::Object` (dictionary form) or appends tagged bytes to a [`WriteBuffer`]
//! (binary form). Both walks are parameterized the same way: `recursive`, `only_changed`,
//! `clear_changed` and an optional [`FieldFilter`].
//!
//! `recursive=false` stops at this record's own fields: a nested scalar record, or a record held
//! in an array/map/id-map element, is not walked further -- only this record's directly-stored
//! primitive and reference fields are emitted. There is no textual precedent for this choice in
//! the distilled spec (§9 lists it as ambiguous); it is the most natural reading of the
//! `has_changed`/`clear_changed` `recursive` flag carried over to `pack`.

use log::debug;
use serde_json::{Map as JsonMap, Value as Json};

use crate::buffer::WriteBuffer;
use crate::codec::{self, FIELD_TERMINATOR, HEAD_ARRAY, HEAD_ID_MAP, HEAD_MAP};
use crate::containers::FieldValue;
use crate::dict::TOMBSTONE;
use crate::error::{Cause, Error, Result};
use crate::record::RecordRef;
use crate::schema::{Cardinality, FieldDesc, FieldFilter, FieldKind};
use crate::value::PrimitiveValue;

#[derive(Clone)]
pub struct EncodeOpts {
    pub recursive: bool,
    pub only_changed: bool,
    pub clear_changed: bool,
    pub field_filter: Option<FieldFilter>,
}

impl EncodeOpts {
    pub fn new() -> Self {
        EncodeOpts {
            recursive: true,
            only_changed: false,
            clear_changed: false,
            field_filter: None,
        }
    }

    fn allows(&self, name: &str) -> bool {
        self.field_filter.as_ref().map(|f| f.allows(name)).unwrap_or(true)
    }

    /// A copy of these options with an additional filter ANDed in (used by id-maps to exclude
    /// `oid` from the element payload without disturbing the caller's own filter).
    fn with_extra_filter(&self, extra: FieldFilter) -> Self {
        let combined = match &self.field_filter {
            Some(existing) => existing.and(&extra),
            None => extra,
        };
        EncodeOpts {
            field_filter: Some(combined),
            ..self.clone()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          dictionary form                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Encode `rec` into the dictionary form. Returns `(value, have_data)`; `have_data` is the
/// "skip-from-pack" signal a caller one level up uses to decide whether an empty nested delta
/// should be dropped from its own output.
pub fn encode_dict(rec: &RecordRef, opts: &EncodeOpts, with_skip_from_pack: bool) -> Result<(Json, bool)> {
    let schema = rec.borrow().schema().clone();
    let mut obj = JsonMap::new();
    let mut have_data = false;

    for field in schema.fields.iter() {
        if !opts.allows(&field.name) {
            continue;
        }
        if field.skip_changed && opts.only_changed {
            continue;
        }
        let is_default = rec.borrow().is_default_value(&field.name)?;
        if is_default && !matches!(field.cardinality, Cardinality::Array | Cardinality::Map { .. } | Cardinality::IdMap { .. }) {
            // Absent scalar field: nothing stored, nothing to emit.
            continue;
        }
        let is_container = matches!(
            field.cardinality,
            Cardinality::Array | Cardinality::Map { .. } | Cardinality::IdMap { .. }
        );
        if opts.only_changed && !is_container && !rec.borrow().has_changed(Some(&field.name), false) {
            // Containers carry their own dirty bit (checked inside `encode_field_dict`); a
            // record's own change-set only tracks scalar/reference fields set directly.
            continue;
        }

        let value = rec.borrow().get(&field.name)?;
        if let Some((json, wrote)) = encode_field_dict(field, &value, opts)? {
            if wrote || !opts.only_changed {
                obj.insert(field.name.clone(), json);
                have_data = true;
            }
        }
    }

    if opts.clear_changed {
        rec.borrow_mut().clear_changed(&[], false)?;
    }

    let _ = with_skip_from_pack;
    Ok((Json::Object(obj), have_data))
}

/// Encode a single field's stored value. Returns `None` when the field should be dropped
/// entirely (an only-changed nested record delta that produced nothing); `Some((json, wrote))`
/// otherwise, where `wrote` tells the caller whether this constitutes "real" data for the
/// purposes of the only-changed filter.
fn encode_field_dict(field: &FieldDesc, value: &FieldValue, opts: &EncodeOpts) -> Result<Option<(Json, bool)>> {
    if field.reference {
        return encode_ref_field_dict(field, value, opts);
    }
    match (&field.kind, &field.cardinality) {
        (FieldKind::Primitive(_), Cardinality::Scalar) => match value {
            FieldValue::Primitive(v) => Ok(Some((v.to_json(), true))),
            _ => Err(Error::new(Cause::PackError(
                field.name.clone(),
                String::from("primitive field did not hold a primitive value"),
            ))),
        },
        (FieldKind::Record(_), Cardinality::Scalar) => match value {
            FieldValue::Record(nested) => {
                if !opts.recursive {
                    return Ok(Some((Json::Object(JsonMap::new()), false)));
                }
                let (json, have_data) = encode_dict(nested, opts, true)?;
                if opts.only_changed && !have_data {
                    Ok(None)
                } else {
                    Ok(Some((json, have_data)))
                }
            }
            _ => Err(Error::new(Cause::PackError(
                field.name.clone(),
                String::from("nested record field did not hold a record"),
            ))),
        },
        (_, Cardinality::Array) => match value {
            FieldValue::Array(arr) => {
                if opts.only_changed && !arr.has_changed(false) {
                    return Ok(None);
                }
                if !opts.recursive && matches!(field.kind, FieldKind::Record(_)) {
                    return Ok(Some((Json::Array(Vec::new()), true)));
                }
                let mut elems = Vec::with_capacity(arr.len());
                for elem in arr.iter() {
                    elems.push(encode_array_elem_dict(field, elem, opts)?);
                }
                Ok(Some((Json::Array(elems), true)))
            }
            _ => unreachable!("array field must hold Array"),
        },
        (_, Cardinality::Map { .. }) => match value {
            FieldValue::Map(map) => {
                let mut obj = JsonMap::new();
                let mut wrote = false;
                for (k, v) in map.iter() {
                    if opts.only_changed && !map.changed_keys().contains(k) && !matches!(field.kind, FieldKind::Record(_)) {
                        continue;
                    }
                    let encoded = encode_map_value_dict(field, v, opts)?;
                    if let Some(json) = encoded {
                        obj.insert(k.as_string_key(), json);
                        wrote = true;
                    }
                }
                if opts.only_changed {
                    for k in map.removed() {
                        obj.insert(k.as_string_key(), TOMBSTONE);
                        wrote = true;
                    }
                    if !wrote {
                        return Ok(None);
                    }
                }
                Ok(Some((Json::Object(obj), wrote)))
            }
            _ => unreachable!("map field must hold Map"),
        },
        (_, Cardinality::IdMap { .. }) => match value {
            FieldValue::IdMap(map) => {
                let elem_opts = opts.with_extra_filter(FieldFilter::exclude("oid"));
                let mut obj = JsonMap::new();
                let mut wrote = false;
                for (k, v) in map.iter() {
                    let encoded = encode_map_value_dict(field, v, &elem_opts)?;
                    if let Some(json) = encoded {
                        obj.insert(k.as_string_key(), json);
                        wrote = true;
                    }
                }
                if opts.only_changed {
                    for k in map.removed() {
                        obj.insert(k.as_string_key(), TOMBSTONE);
                        wrote = true;
                    }
                    if !wrote {
                        return Ok(None);
                    }
                }
                Ok(Some((Json::Object(obj), wrote)))
            }
            _ => unreachable!("id-map field must hold IdMap"),
        },
    }
}

/// Projects a reference field's stored value to the target record's oid, whether it's still
/// unresolved (`FieldValue::Ref`) or already bound (`FieldValue::Record`).
fn ref_oid_json(field: &FieldDesc, v: &FieldValue) -> Result<Json> {
    match v {
        FieldValue::Ref(oid) => Ok(oid.to_json()),
        FieldValue::Record(target) => Ok(target.borrow().oid()?.to_json()),
        _ => Err(Error::new(Cause::PackError(
            field.name.clone(),
            String::from("reference field did not hold an oid or record"),
        ))),
    }
}

/// Encodes a `reference` field of any cardinality: a scalar reference is just the target's oid;
/// a reference array/map/id-map is an array/object of oids, never the owned nested records.
fn encode_ref_field_dict(field: &FieldDesc, value: &FieldValue, opts: &EncodeOpts) -> Result<Option<(Json, bool)>> {
    match (&field.cardinality, value) {
        (Cardinality::Scalar, v) => Ok(Some((ref_oid_json(field, v)?, true))),
        (Cardinality::Array, FieldValue::Array(arr)) => {
            if opts.only_changed && !arr.has_changed(false) {
                return Ok(None);
            }
            let mut elems = Vec::with_capacity(arr.len());
            for elem in arr.iter() {
                elems.push(ref_oid_json(field, elem)?);
            }
            Ok(Some((Json::Array(elems), true)))
        }
        (Cardinality::Map { .. }, FieldValue::Map(map)) => {
            let mut obj = JsonMap::new();
            let mut wrote = false;
            for (k, v) in map.iter() {
                if opts.only_changed && !map.changed_keys().contains(k) {
                    continue;
                }
                obj.insert(k.as_string_key(), ref_oid_json(field, v)?);
                wrote = true;
            }
            if opts.only_changed {
                for k in map.removed() {
                    obj.insert(k.as_string_key(), TOMBSTONE);
                    wrote = true;
                }
                if !wrote {
                    return Ok(None);
                }
            }
            Ok(Some((Json::Object(obj), wrote)))
        }
        (Cardinality::IdMap { .. }, FieldValue::IdMap(map)) => {
            let mut obj = JsonMap::new();
            let mut wrote = false;
            for (k, v) in map.iter() {
                if opts.only_changed && !map.changed_keys().contains(k) {
                    continue;
                }
                obj.insert(k.as_string_key(), ref_oid_json(field, v)?);
                wrote = true;
            }
            if opts.only_changed {
                for k in map.removed() {
                    obj.insert(k.as_string_key(), TOMBSTONE);
                    wrote = true;
                }
                if !wrote {
                    return Ok(None);
                }
            }
            Ok(Some((Json::Object(obj), wrote)))
        }
        _ => unreachable!("reference field cardinality/value mismatch"),
    }
}

fn encode_array_elem_dict(field: &FieldDesc, elem: &FieldValue, opts: &EncodeOpts) -> Result<Json> {
    match (&field.kind, elem) {
        (FieldKind::Primitive(_), FieldValue::Primitive(v)) => Ok(v.to_json()),
        (FieldKind::Record(_), FieldValue::Record(nested)) => {
            // with_skip_from_pack=false: an empty delta inside a collection is still emitted as
            // an explicit empty object, never dropped.
            let (json, _) = encode_dict(nested, opts, false)?;
            Ok(json)
        }
        _ => Err(Error::new(Cause::PackError(
            field.name.clone(),
            String::from("array element type mismatch"),
        ))),
    }
}

/// Encode one map/id-map value. Returns `None` only when `only_changed` and a nested record
/// produced no delta (the map entry itself is then omitted, not tombstoned).
fn encode_map_value_dict(field: &FieldDesc, v: &FieldValue, opts: &EncodeOpts) -> Result<Option<Json>> {
    match (&field.kind, v) {
        (FieldKind::Primitive(_), FieldValue::Primitive(pv)) => Ok(Some(pv.to_json())),
        (FieldKind::Record(_), FieldValue::Record(nested)) => {
            let (json, have_data) = encode_dict(nested, opts, true)?;
            if opts.only_changed && !have_data {
                Ok(None)
            } else {
                Ok(Some(json))
            }
        }
        _ => Err(Error::new(Cause::PackError(
            field.name.clone(),
            String::from("map value type mismatch"),
        ))),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            binary form                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Encode `rec` into the binary form, appending to `buf`. Returns whether any field was written.
pub fn encode_bin(rec: &RecordRef, opts: &EncodeOpts, buf: &mut WriteBuffer) -> Result<bool> {
    let schema = rec.borrow().schema().clone();
    let mut have_data = false;

    for field in schema.fields.iter() {
        if !opts.allows(&field.name) {
            continue;
        }
        if field.skip_changed && opts.only_changed {
            continue;
        }
        let is_default = rec.borrow().is_default_value(&field.name)?;
        let is_container = matches!(
            field.cardinality,
            Cardinality::Array | Cardinality::Map { .. } | Cardinality::IdMap { .. }
        );
        if is_default && !is_container {
            continue;
        }
        if opts.only_changed && !rec.borrow().has_changed(Some(&field.name), false) && !is_container {
            continue;
        }

        let value = rec.borrow().get(&field.name)?;
        let mut field_buf = WriteBuffer::new();
        if encode_field_bin(field, &value, opts, &mut field_buf)? {
            buf.write_u16(field.index);
            buf.write_bytes(field_buf.as_slice());
            have_data = true;
        }
    }

    buf.write_u16(FIELD_TERMINATOR);

    if opts.clear_changed {
        rec.borrow_mut().clear_changed(&[], false)?;
    }

    Ok(have_data)
}

/// Encode one field's body. Returns whether anything was written (an only-changed nested record
/// delta that produced nothing writes nothing and returns false).
fn encode_field_bin(field: &FieldDesc, value: &FieldValue, opts: &EncodeOpts, buf: &mut WriteBuffer) -> Result<bool> {
    if field.reference {
        return encode_ref_field_bin(field, value, opts, buf);
    }
    match (&field.kind, &field.cardinality) {
        (FieldKind::Primitive(_), Cardinality::Scalar) => match value {
            FieldValue::Primitive(v) => {
                codec::encode_primitive(buf, v)?;
                Ok(true)
            }
            _ => Err(Error::new(Cause::PackError(
                field.name.clone(),
                String::from("primitive field did not hold a primitive value"),
            ))),
        },
        (FieldKind::Record(_), Cardinality::Scalar) => match value {
            FieldValue::Record(nested) => {
                if !opts.recursive {
                    buf.write_u16(FIELD_TERMINATOR);
                    return Ok(true);
                }
                let mut sub = WriteBuffer::new();
                let have_data = encode_bin(nested, opts, &mut sub)?;
                if opts.only_changed && !have_data {
                    return Ok(false);
                }
                buf.write_bytes(sub.as_slice());
                Ok(true)
            }
            _ => Err(Error::new(Cause::PackError(
                field.name.clone(),
                String::from("nested record field did not hold a record"),
            ))),
        },
        (_, Cardinality::Array) => match value {
            FieldValue::Array(arr) => {
                if opts.only_changed && !arr.has_changed(false) {
                    return Ok(false);
                }
                buf.write_u8(HEAD_ARRAY);
                buf.write_u32(arr.len() as u32);
                for elem in arr.iter() {
                    encode_array_elem_bin(field, elem, opts, buf)?;
                }
                Ok(true)
            }
            _ => unreachable!("array field must hold Array"),
        },
        (_, Cardinality::Map { .. }) => match value {
            FieldValue::Map(map) => {
                let (bytes, n) = encode_map_entries_bin(field, map, opts)?;
                buf.write_u8(HEAD_MAP);
                buf.write_u32(n);
                buf.write_bytes(&bytes);
                Ok(true)
            }
            _ => unreachable!("map field must hold Map"),
        },
        (_, Cardinality::IdMap { .. }) => match value {
            FieldValue::IdMap(map) => {
                let elem_opts = opts.with_extra_filter(FieldFilter::exclude("oid"));
                let (bytes, n) = encode_idmap_entries_bin(field, map, &elem_opts)?;
                buf.write_u8(HEAD_ID_MAP);
                buf.write_u32(n);
                buf.write_bytes(&bytes);
                Ok(true)
            }
            _ => unreachable!("id-map field must hold IdMap"),
        },
    }
}

fn ref_oid_value(field: &FieldDesc, v: &FieldValue) -> Result<PrimitiveValue> {
    match v {
        FieldValue::Ref(oid) => Ok(oid.clone()),
        FieldValue::Record(target) => target.borrow().oid(),
        _ => Err(Error::new(Cause::PackError(
            field.name.clone(),
            String::from("reference field did not hold an oid or record"),
        ))),
    }
}

/// Binary-form counterpart of `encode_ref_field_dict`: a reference container is a tagged
/// sequence of oids, not owned nested records.
fn encode_ref_field_bin(field: &FieldDesc, value: &FieldValue, opts: &EncodeOpts, buf: &mut WriteBuffer) -> Result<bool> {
    match (&field.cardinality, value) {
        (Cardinality::Scalar, v) => {
            codec::encode_primitive(buf, &ref_oid_value(field, v)?)?;
            Ok(true)
        }
        (Cardinality::Array, FieldValue::Array(arr)) => {
            if opts.only_changed && !arr.has_changed(false) {
                return Ok(false);
            }
            buf.write_u8(HEAD_ARRAY);
            buf.write_u32(arr.len() as u32);
            for elem in arr.iter() {
                codec::encode_primitive(buf, &ref_oid_value(field, elem)?)?;
            }
            Ok(true)
        }
        (Cardinality::Map { .. }, FieldValue::Map(map)) => {
            let mut body = WriteBuffer::new();
            let mut n = 0u32;
            for (k, v) in map.iter() {
                if opts.only_changed && !map.changed_keys().contains(k) {
                    continue;
                }
                codec::encode_primitive(&mut body, k)?;
                codec::encode_primitive(&mut body, &ref_oid_value(field, v)?)?;
                n += 1;
            }
            buf.write_u8(HEAD_MAP);
            buf.write_u32(n);
            buf.write_bytes(body.as_slice());
            Ok(true)
        }
        (Cardinality::IdMap { .. }, FieldValue::IdMap(map)) => {
            let mut body = WriteBuffer::new();
            let mut n = 0u32;
            for (k, v) in map.iter() {
                if opts.only_changed && !map.changed_keys().contains(k) {
                    continue;
                }
                codec::encode_primitive(&mut body, k)?;
                codec::encode_primitive(&mut body, &ref_oid_value(field, v)?)?;
                n += 1;
            }
            buf.write_u8(HEAD_ID_MAP);
            buf.write_u32(n);
            buf.write_bytes(body.as_slice());
            Ok(true)
        }
        _ => unreachable!("reference field cardinality/value mismatch"),
    }
}

fn encode_array_elem_bin(field: &FieldDesc, elem: &FieldValue, opts: &EncodeOpts, buf: &mut WriteBuffer) -> Result<()> {
    match (&field.kind, elem) {
        (FieldKind::Primitive(_), FieldValue::Primitive(v)) => codec::encode_primitive(buf, v),
        (FieldKind::Record(_), FieldValue::Record(nested)) => {
            encode_bin(nested, opts, buf)?;
            Ok(())
        }
        _ => Err(Error::new(Cause::PackError(
            field.name.clone(),
            String::from("array element type mismatch"),
        ))),
    }
}

fn encode_map_entries_bin(
    field: &FieldDesc,
    map: &crate::containers::MapContainer,
    opts: &EncodeOpts,
) -> Result<(Vec<u8>, u32)> {
    let mut buf = WriteBuffer::new();
    let mut n = 0u32;
    for (k, v) in map.iter() {
        if opts.only_changed && !map.changed_keys().contains(k) && !matches!(field.kind, FieldKind::Record(_)) {
            continue;
        }
        match (&field.kind, v) {
            (FieldKind::Primitive(_), FieldValue::Primitive(pv)) => {
                codec::encode_primitive(&mut buf, k)?;
                codec::encode_primitive(&mut buf, pv)?;
                n += 1;
            }
            (FieldKind::Record(_), FieldValue::Record(nested)) => {
                let mut sub = WriteBuffer::new();
                let have_data = encode_bin(nested, opts, &mut sub)?;
                if opts.only_changed && !have_data {
                    continue;
                }
                codec::encode_primitive(&mut buf, k)?;
                buf.write_bytes(sub.as_slice());
                n += 1;
            }
            _ => {
                return Err(Error::new(Cause::PackError(
                    field.name.clone(),
                    String::from("map value type mismatch"),
                )))
            }
        }
    }
    Ok((buf.into_vec(), n))
}

fn encode_idmap_entries_bin(
    field: &FieldDesc,
    map: &crate::containers::IdMapContainer,
    opts: &EncodeOpts,
) -> Result<(Vec<u8>, u32)> {
    let mut buf = WriteBuffer::new();
    let mut n = 0u32;
    for (k, v) in map.iter() {
        match v {
            FieldValue::Record(nested) => {
                let mut sub = WriteBuffer::new();
                let have_data = encode_bin(nested, opts, &mut sub)?;
                if opts.only_changed && !have_data {
                    continue;
                }
                codec::encode_primitive(&mut buf, k)?;
                buf.write_bytes(sub.as_slice());
                n += 1;
            }
            _ => {
                return Err(Error::new(Cause::PackError(
                    field.name.clone(),
                    String::from("id-map value must be a record"),
                )))
            }
        }
    }
    debug!("encoded {} id-map entr{} for field '{}'", n, if n == 1 { "y" } else { "ies" }, field.name);
    Ok((buf.into_vec(), n))
}

