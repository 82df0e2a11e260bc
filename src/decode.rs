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
//! The decoder: a [`DecodeContext`] accumulates deferred reference bindings and a known-objects
//! table across one `unpack` call, in either `override` (replace) or `sync` (patch-in-place)
//! mode. Both wire formats feed the same per-field dispatch; only the terminal "is this value
//! absent/deleted" test differs (JSON `null` vs. the binary form's total inability to represent
//! either).

use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, warn};
use serde_json::Value as Json;

use crate::buffer::ReadBuffer;
use crate::codec::{self, FIELD_TERMINATOR, HEAD_ARRAY, HEAD_ID_MAP, HEAD_MAP};
use crate::containers::{ArrayContainer, FieldValue, IdMapContainer, MapContainer};
use crate::error::{Cause, Error, Result};
use crate::record::{Record, RecordRef};
use crate::schema::{Cardinality, FieldDesc, FieldKind, Schema};
use crate::value::PrimitiveValue;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    Override,
    Sync,
}

pub type ResolveRef<'a> = dyn Fn(&PrimitiveValue) -> Option<RecordRef> + 'a;

/// A reference field (or map/id-map entry) whose target oid did not resolve to a `RecordRef`
/// while it was decoded. `setter` is called once the resolver finds (or is given) a binding.
struct UnsolvedRef {
    oid: PrimitiveValue,
    setter: Box<dyn FnOnce(RecordRef)>,
}

pub struct DecodeContext<'a> {
    mode: DecodeMode,
    resolve_ref: Option<&'a ResolveRef<'a>>,
    mark_change: bool,
    known_objects: HashMap<PrimitiveValue, RecordRef>,
    unsolved_refs: Vec<UnsolvedRef>,
}

impl<'a> DecodeContext<'a> {
    pub fn new(mode: DecodeMode, resolve_ref: Option<&'a ResolveRef<'a>>, mark_change: bool) -> Self {
        DecodeContext {
            mode,
            resolve_ref,
            mark_change,
            known_objects: HashMap::new(),
            unsolved_refs: Vec::new(),
        }
    }

    /// Bind every deferred reference, consulting the caller's `resolve_ref` first and falling
    /// back to this decode's own known-objects table (populated from id-map entries as they
    /// were decoded). Returns the oids that still have nothing to bind to.
    fn resolve(self) -> Vec<PrimitiveValue> {
        let DecodeContext {
            resolve_ref,
            known_objects,
            unsolved_refs,
            ..
        } = self;
        let mut unsolved = Vec::new();
        for pending in unsolved_refs {
            let bound = resolve_ref
                .and_then(|f| f(&pending.oid))
                .or_else(|| known_objects.get(&pending.oid).cloned());
            match bound {
                Some(target) => (pending.setter)(target),
                None => {
                    warn!("unresolved reference to oid '{}'", pending.oid);
                    unsolved.push(pending.oid);
                }
            }
        }
        unsolved
    }
}

/// Apply a field's `create` hook, if any, to a fully-decoded staging record: per §4's custom-
/// create-hook contract, the hook sees the staging record's fields *before* the result is
/// installed, and the decoder copies those fields onto whatever the hook returns.
fn apply_create_hook(field: &FieldDesc, staging: RecordRef) -> RecordRef {
    match &field.create {
        Some(hook) => {
            let real = hook(&staging);
            if !Rc::ptr_eq(&real, &staging) {
                real.borrow_mut().adopt_from(&staging.borrow());
            }
            real
        }
        None => staging,
    }
}

fn store_and_mark(rec: &RecordRef, field: &FieldDesc, value: FieldValue, ctx: &DecodeContext) -> Result<()> {
    rec.borrow_mut().set_silent_by_index(field.index, value)?;
    if ctx.mark_change {
        rec.borrow_mut().set_changed(&[field.name.as_str()])?;
    }
    Ok(())
}

fn nested_schema(field: &FieldDesc) -> Result<Arc<Schema>> {
    match &field.kind {
        FieldKind::Record(s) => Ok(s.clone()),
        FieldKind::Primitive(_) => Err(Error::new(Cause::UnpackError(
            field.name.clone(),
            String::from("expected a record-typed field"),
        ))),
    }
}

/// Defers resolution of one `ref` array slot: the element is stored as `FieldValue::Ref(oid)`
/// up front, and this closure patches in the resolved handle once the oid binds to a target.
fn register_array_ref(rec: &RecordRef, field: &FieldDesc, pos: usize, oid: PrimitiveValue, ctx: &mut DecodeContext) {
    let target_rec = rec.clone();
    let field_name = field.name.clone();
    ctx.unsolved_refs.push(UnsolvedRef {
        oid,
        setter: Box::new(move |resolved: RecordRef| {
            if let Ok(mut r) = target_rec.try_borrow_mut() {
                if let Ok(arr) = r.array_mut(&field_name) {
                    arr.set_silent(pos, FieldValue::Record(resolved));
                }
            }
        }),
    });
}

/// Defers resolution of one `ref` map entry, keyed by `key`.
fn register_map_ref(rec: &RecordRef, field: &FieldDesc, key: PrimitiveValue, oid: PrimitiveValue, ctx: &mut DecodeContext) {
    let target_rec = rec.clone();
    let field_name = field.name.clone();
    ctx.unsolved_refs.push(UnsolvedRef {
        oid,
        setter: Box::new(move |resolved: RecordRef| {
            if let Ok(mut r) = target_rec.try_borrow_mut() {
                if let Ok(m) = r.map_mut(&field_name) {
                    m.insert_silent(key.clone(), FieldValue::Record(resolved));
                }
            }
        }),
    });
}

/// Defers resolution of one `ref` id-map entry, keyed by `key`.
fn register_idmap_ref(rec: &RecordRef, field: &FieldDesc, key: PrimitiveValue, oid: PrimitiveValue, ctx: &mut DecodeContext) {
    let target_rec = rec.clone();
    let field_name = field.name.clone();
    ctx.unsolved_refs.push(UnsolvedRef {
        oid,
        setter: Box::new(move |resolved: RecordRef| {
            if let Ok(mut r) = target_rec.try_borrow_mut() {
                if let Ok(m) = r.id_map_mut(&field_name) {
                    m.insert_silent_value(key.clone(), FieldValue::Record(resolved));
                }
            }
        }),
    });
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          dictionary form                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

pub fn unpack_dict(
    rec: &RecordRef,
    json: &Json,
    mode: DecodeMode,
    resolve_ref: Option<&ResolveRef>,
    mark_change: bool,
) -> Result<Vec<PrimitiveValue>> {
    let mut ctx = DecodeContext::new(mode, resolve_ref, mark_change);
    decode_dict_into(rec, json, &mut ctx)?;
    Ok(ctx.resolve())
}

fn decode_dict_into(rec: &RecordRef, json: &Json, ctx: &mut DecodeContext) -> Result<()> {
    let obj = json.as_object().ok_or_else(|| {
        Error::new(Cause::UnpackError(
            String::from("<record>"),
            String::from("expected a JSON object"),
        ))
    })?;
    let schema = rec.borrow().schema().clone();

    for (name, value) in obj.iter() {
        let field = match schema.field_by_name(name) {
            Some(f) => f.clone(),
            None => {
                debug!("unknown field '{}' in dictionary payload for '{}'; stashing as extra", name, schema.name);
                rec.borrow_mut().set_extra(name, value.clone());
                continue;
            }
        };
        decode_field_dict(rec, &field, value, ctx)?;
    }
    Ok(())
}

fn decode_field_dict(rec: &RecordRef, field: &FieldDesc, value: &Json, ctx: &mut DecodeContext) -> Result<()> {
    if field.reference && matches!(field.cardinality, Cardinality::Scalar) {
        if value.is_null() {
            return Ok(());
        }
        let oid_ty = nested_schema(field)?.oid_type()?;
        let oid = PrimitiveValue::from_json(oid_ty, value)?;
        store_and_mark(rec, field, FieldValue::Ref(oid.clone()), ctx)?;
        let target_rec = rec.clone();
        let idx = field.index;
        ctx.unsolved_refs.push(UnsolvedRef {
            oid,
            setter: Box::new(move |resolved: RecordRef| {
                let _ = target_rec.borrow_mut().set_silent_by_index(idx, FieldValue::Record(resolved));
            }),
        });
        return Ok(());
    }

    match &field.cardinality {
        Cardinality::Scalar => match &field.kind {
            FieldKind::Primitive(ty) => {
                if value.is_null() {
                    return Ok(());
                }
                let v = PrimitiveValue::from_json(*ty, value)?;
                store_and_mark(rec, field, FieldValue::Primitive(v), ctx)
            }
            FieldKind::Record(schema) => {
                if value.is_null() {
                    return Ok(());
                }
                match ctx.mode {
                    DecodeMode::Sync => {
                        let existing = if rec.borrow().is_default_value(&field.name)? {
                            None
                        } else {
                            Some(rec.borrow().record_field(&field.name)?)
                        };
                        let target = match existing {
                            Some(r) => r,
                            None => {
                                let fresh = Record::new(schema.clone());
                                rec.borrow_mut().set_silent(&field.name, FieldValue::Record(fresh.clone()))?;
                                fresh
                            }
                        };
                        decode_dict_into(&target, value, ctx)?;
                        if ctx.mark_change {
                            rec.borrow_mut().set_changed(&[field.name.as_str()])?;
                        }
                        Ok(())
                    }
                    DecodeMode::Override => {
                        let staging = Record::new(schema.clone());
                        decode_dict_into(&staging, value, ctx)?;
                        let real = apply_create_hook(field, staging);
                        store_and_mark(rec, field, FieldValue::Record(real), ctx)
                    }
                }
            }
        },
        Cardinality::Array => {
            if value.is_null() {
                return Ok(());
            }
            let arr = value.as_array().ok_or_else(|| {
                Error::new(Cause::UnpackError(field.name.clone(), String::from("expected a JSON array")))
            })?;
            if field.reference {
                let oid_ty = nested_schema(field)?.oid_type()?;
                let mut items = Vec::with_capacity(arr.len());
                let mut oids = Vec::with_capacity(arr.len());
                for elem in arr {
                    let oid = PrimitiveValue::from_json(oid_ty, elem)?;
                    oids.push(oid.clone());
                    items.push(FieldValue::Ref(oid));
                }
                let container = ArrayContainer::from_vec_silent(items);
                store_and_mark(rec, field, FieldValue::Array(container), ctx)?;
                for (pos, oid) in oids.into_iter().enumerate() {
                    register_array_ref(rec, field, pos, oid, ctx);
                }
                return Ok(());
            }
            let mut items = Vec::with_capacity(arr.len());
            for elem in arr {
                items.push(decode_array_elem_dict(field, elem, ctx)?);
            }
            let container = ArrayContainer::from_vec_silent(items);
            store_and_mark(rec, field, FieldValue::Array(container), ctx)
        }
        Cardinality::Map { key } => {
            if value.is_null() {
                return Ok(());
            }
            let obj = value.as_object().ok_or_else(|| {
                Error::new(Cause::UnpackError(field.name.clone(), String::from("expected a JSON object")))
            })?;
            if field.reference {
                let oid_ty = nested_schema(field)?.oid_type()?;
                match ctx.mode {
                    DecodeMode::Override => {
                        let mut container = MapContainer::new();
                        let mut entries = Vec::new();
                        for (k, v) in obj.iter() {
                            if v.is_null() {
                                continue;
                            }
                            let key_val = PrimitiveValue::from_string_key(*key, k)?;
                            let oid = PrimitiveValue::from_json(oid_ty, v)?;
                            container.insert_silent(key_val.clone(), FieldValue::Ref(oid.clone()));
                            entries.push((key_val, oid));
                        }
                        store_and_mark(rec, field, FieldValue::Map(container), ctx)?;
                        for (key_val, oid) in entries {
                            register_map_ref(rec, field, key_val, oid, ctx);
                        }
                    }
                    DecodeMode::Sync => {
                        let _ = rec.borrow_mut().map_mut(&field.name)?;
                        for (k, v) in obj.iter() {
                            let key_val = PrimitiveValue::from_string_key(*key, k)?;
                            if v.is_null() {
                                rec.borrow_mut().map_mut(&field.name)?.remove(&key_val);
                                continue;
                            }
                            let oid = PrimitiveValue::from_json(oid_ty, v)?;
                            rec.borrow_mut()
                                .map_mut(&field.name)?
                                .insert_silent(key_val.clone(), FieldValue::Ref(oid.clone()));
                            register_map_ref(rec, field, key_val, oid, ctx);
                        }
                    }
                }
                if ctx.mark_change {
                    rec.borrow_mut().set_changed(&[field.name.as_str()])?;
                }
                return Ok(());
            }
            match ctx.mode {
                DecodeMode::Override => {
                    let mut container = MapContainer::new();
                    for (k, v) in obj.iter() {
                        if v.is_null() {
                            continue;
                        }
                        let key_val = PrimitiveValue::from_string_key(*key, k)?;
                        let fv = decode_map_value_dict_fresh(field, v, ctx)?;
                        container.insert_silent(key_val, fv);
                    }
                    store_and_mark(rec, field, FieldValue::Map(container), ctx)
                }
                DecodeMode::Sync => {
                    let _ = rec.borrow_mut().map_mut(&field.name)?;
                    for (k, v) in obj.iter() {
                        let key_val = PrimitiveValue::from_string_key(*key, k)?;
                        if v.is_null() {
                            rec.borrow_mut().map_mut(&field.name)?.remove(&key_val);
                            continue;
                        }
                        match &field.kind {
                            FieldKind::Primitive(ty) => {
                                let pv = PrimitiveValue::from_json(*ty, v)?;
                                rec.borrow_mut()
                                    .map_mut(&field.name)?
                                    .insert_silent(key_val, FieldValue::Primitive(pv));
                            }
                            FieldKind::Record(schema) => {
                                let existing = {
                                    let got = rec.borrow().get(&field.name)?;
                                    match got {
                                        FieldValue::Map(m) => m.get(&key_val).cloned(),
                                        _ => unreachable!("map field must hold Map"),
                                    }
                                };
                                match existing {
                                    Some(FieldValue::Record(target)) => decode_dict_into(&target, v, ctx)?,
                                    _ => {
                                        let staging = Record::new(schema.clone());
                                        decode_dict_into(&staging, v, ctx)?;
                                        let real = apply_create_hook(field, staging);
                                        rec.borrow_mut()
                                            .map_mut(&field.name)?
                                            .insert_silent(key_val, FieldValue::Record(real));
                                    }
                                }
                            }
                        }
                    }
                    if ctx.mark_change {
                        rec.borrow_mut().set_changed(&[field.name.as_str()])?;
                    }
                    Ok(())
                }
            }
        }
        Cardinality::IdMap { key } => {
            if value.is_null() {
                return Ok(());
            }
            let obj = value.as_object().ok_or_else(|| {
                Error::new(Cause::UnpackError(field.name.clone(), String::from("expected a JSON object")))
            })?;
            if field.reference {
                let oid_ty = nested_schema(field)?.oid_type()?;
                match ctx.mode {
                    DecodeMode::Override => {
                        let mut container = IdMapContainer::new();
                        let mut entries = Vec::new();
                        for (k, v) in obj.iter() {
                            if v.is_null() {
                                continue;
                            }
                            let key_val = PrimitiveValue::from_string_key(*key, k)?;
                            let oid = PrimitiveValue::from_json(oid_ty, v)?;
                            container.insert_silent_value(key_val.clone(), FieldValue::Ref(oid.clone()));
                            entries.push((key_val, oid));
                        }
                        store_and_mark(rec, field, FieldValue::IdMap(container), ctx)?;
                        for (key_val, oid) in entries {
                            register_idmap_ref(rec, field, key_val, oid, ctx);
                        }
                    }
                    DecodeMode::Sync => {
                        let _ = rec.borrow_mut().id_map_mut(&field.name)?;
                        for (k, v) in obj.iter() {
                            let key_val = PrimitiveValue::from_string_key(*key, k)?;
                            if v.is_null() {
                                rec.borrow_mut().id_map_mut(&field.name)?.remove(&key_val);
                                continue;
                            }
                            let oid = PrimitiveValue::from_json(oid_ty, v)?;
                            rec.borrow_mut()
                                .id_map_mut(&field.name)?
                                .insert_silent_value(key_val.clone(), FieldValue::Ref(oid.clone()));
                            register_idmap_ref(rec, field, key_val, oid, ctx);
                        }
                    }
                }
                if ctx.mark_change {
                    rec.borrow_mut().set_changed(&[field.name.as_str()])?;
                }
                return Ok(());
            }
            let schema = nested_schema(field)?;
            match ctx.mode {
                DecodeMode::Override => {
                    let mut container = IdMapContainer::new();
                    for (k, v) in obj.iter() {
                        if v.is_null() {
                            continue;
                        }
                        let key_val = PrimitiveValue::from_string_key(*key, k)?;
                        let staging = Record::new(schema.clone());
                        decode_dict_into(&staging, v, ctx)?;
                        staging.borrow_mut().set_silent("oid", FieldValue::Primitive(key_val.clone()))?;
                        let real = apply_create_hook(field, staging);
                        container.insert_silent(key_val.clone(), real.clone());
                        ctx.known_objects.insert(key_val, real);
                    }
                    store_and_mark(rec, field, FieldValue::IdMap(container), ctx)
                }
                DecodeMode::Sync => {
                    let _ = rec.borrow_mut().id_map_mut(&field.name)?;
                    for (k, v) in obj.iter() {
                        let key_val = PrimitiveValue::from_string_key(*key, k)?;
                        if v.is_null() {
                            rec.borrow_mut().id_map_mut(&field.name)?.remove(&key_val);
                            continue;
                        }
                        let existing = {
                            let got = rec.borrow().get(&field.name)?;
                            match got {
                                FieldValue::IdMap(m) => m.get(&key_val).cloned(),
                                _ => unreachable!("id-map field must hold IdMap"),
                            }
                        };
                        let target = match existing {
                            Some(FieldValue::Record(r)) => {
                                decode_dict_into(&r, v, ctx)?;
                                r
                            }
                            _ => {
                                let staging = Record::new(schema.clone());
                                decode_dict_into(&staging, v, ctx)?;
                                staging.borrow_mut().set_silent("oid", FieldValue::Primitive(key_val.clone()))?;
                                let real = apply_create_hook(field, staging);
                                rec.borrow_mut().id_map_mut(&field.name)?.add(key_val.clone(), real.clone());
                                real
                            }
                        };
                        ctx.known_objects.insert(key_val, target);
                    }
                    if ctx.mark_change {
                        rec.borrow_mut().set_changed(&[field.name.as_str()])?;
                    }
                    Ok(())
                }
            }
        }
    }
}

fn decode_array_elem_dict(field: &FieldDesc, elem: &Json, ctx: &mut DecodeContext) -> Result<FieldValue> {
    match &field.kind {
        FieldKind::Primitive(ty) => Ok(FieldValue::Primitive(PrimitiveValue::from_json(*ty, elem)?)),
        FieldKind::Record(schema) => {
            let staging = Record::new(schema.clone());
            decode_dict_into(&staging, elem, ctx)?;
            Ok(FieldValue::Record(apply_create_hook(field, staging)))
        }
    }
}

/// Decode a map entry's value, always constructing nested records fresh (used by the `override`
/// map/id-map path, which replaces the whole container).
fn decode_map_value_dict_fresh(field: &FieldDesc, v: &Json, ctx: &mut DecodeContext) -> Result<FieldValue> {
    match &field.kind {
        FieldKind::Primitive(ty) => Ok(FieldValue::Primitive(PrimitiveValue::from_json(*ty, v)?)),
        FieldKind::Record(schema) => {
            let staging = Record::new(schema.clone());
            decode_dict_into(&staging, v, ctx)?;
            Ok(FieldValue::Record(apply_create_hook(field, staging)))
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            binary form                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

pub fn unpack_bin(
    rec: &RecordRef,
    bytes: &[u8],
    mode: DecodeMode,
    resolve_ref: Option<&ResolveRef>,
    mark_change: bool,
) -> Result<Vec<PrimitiveValue>> {
    let mut ctx = DecodeContext::new(mode, resolve_ref, mark_change);
    let mut buf = ReadBuffer::new(bytes);
    decode_bin_into(rec, &mut buf, &mut ctx)?;
    Ok(ctx.resolve())
}

fn decode_bin_into(rec: &RecordRef, buf: &mut ReadBuffer, ctx: &mut DecodeContext) -> Result<()> {
    let schema = rec.borrow().schema().clone();
    loop {
        let idx = buf.read_u16()?;
        if idx == FIELD_TERMINATOR {
            break;
        }
        let field = schema.require_by_index(idx)?.clone();
        decode_field_bin(rec, &field, buf, ctx)?;
    }
    Ok(())
}

fn decode_field_bin(rec: &RecordRef, field: &FieldDesc, buf: &mut ReadBuffer, ctx: &mut DecodeContext) -> Result<()> {
    if field.reference && matches!(field.cardinality, Cardinality::Scalar) {
        let oid_ty = nested_schema(field)?.oid_type()?;
        let oid = codec::decode_primitive(buf, oid_ty)?;
        store_and_mark(rec, field, FieldValue::Ref(oid.clone()), ctx)?;
        let target_rec = rec.clone();
        let idx = field.index;
        ctx.unsolved_refs.push(UnsolvedRef {
            oid,
            setter: Box::new(move |resolved: RecordRef| {
                let _ = target_rec.borrow_mut().set_silent_by_index(idx, FieldValue::Record(resolved));
            }),
        });
        return Ok(());
    }

    match &field.cardinality {
        Cardinality::Scalar => match &field.kind {
            FieldKind::Primitive(ty) => {
                let v = codec::decode_primitive(buf, *ty)?;
                store_and_mark(rec, field, FieldValue::Primitive(v), ctx)
            }
            FieldKind::Record(schema) => match ctx.mode {
                DecodeMode::Sync => {
                    let existing = if rec.borrow().is_default_value(&field.name)? {
                        None
                    } else {
                        Some(rec.borrow().record_field(&field.name)?)
                    };
                    let target = match existing {
                        Some(r) => r,
                        None => {
                            let fresh = Record::new(schema.clone());
                            rec.borrow_mut().set_silent(&field.name, FieldValue::Record(fresh.clone()))?;
                            fresh
                        }
                    };
                    decode_bin_into(&target, buf, ctx)?;
                    if ctx.mark_change {
                        rec.borrow_mut().set_changed(&[field.name.as_str()])?;
                    }
                    Ok(())
                }
                DecodeMode::Override => {
                    let staging = Record::new(schema.clone());
                    decode_bin_into(&staging, buf, ctx)?;
                    let real = apply_create_hook(field, staging);
                    store_and_mark(rec, field, FieldValue::Record(real), ctx)
                }
            },
        },
        Cardinality::Array => {
            let head = buf.read_u8()?;
            if head != HEAD_ARRAY {
                return Err(Error::new(Cause::Malformed(format!(
                    "expected array marker 0x{:02x} for field '{}', got 0x{:02x}",
                    HEAD_ARRAY, field.name, head
                ))));
            }
            let count = buf.read_u32()? as usize;
            if field.reference {
                let oid_ty = nested_schema(field)?.oid_type()?;
                let mut items = Vec::with_capacity(count);
                let mut oids = Vec::with_capacity(count);
                for _ in 0..count {
                    let oid = codec::decode_primitive(buf, oid_ty)?;
                    oids.push(oid.clone());
                    items.push(FieldValue::Ref(oid));
                }
                let container = ArrayContainer::from_vec_silent(items);
                store_and_mark(rec, field, FieldValue::Array(container), ctx)?;
                for (pos, oid) in oids.into_iter().enumerate() {
                    register_array_ref(rec, field, pos, oid, ctx);
                }
                return Ok(());
            }
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_array_elem_bin(field, buf, ctx)?);
            }
            let container = ArrayContainer::from_vec_silent(items);
            store_and_mark(rec, field, FieldValue::Array(container), ctx)
        }
        Cardinality::Map { key } => {
            let head = buf.read_u8()?;
            if head != HEAD_MAP {
                return Err(Error::new(Cause::Malformed(format!(
                    "expected map marker 0x{:02x} for field '{}', got 0x{:02x}",
                    HEAD_MAP, field.name, head
                ))));
            }
            let count = buf.read_u32()? as usize;
            if field.reference {
                let oid_ty = nested_schema(field)?.oid_type()?;
                match ctx.mode {
                    DecodeMode::Override => {
                        let mut container = MapContainer::new();
                        let mut entries = Vec::with_capacity(count);
                        for _ in 0..count {
                            let key_val = codec::decode_primitive(buf, *key)?;
                            let oid = codec::decode_primitive(buf, oid_ty)?;
                            container.insert_silent(key_val.clone(), FieldValue::Ref(oid.clone()));
                            entries.push((key_val, oid));
                        }
                        store_and_mark(rec, field, FieldValue::Map(container), ctx)?;
                        for (key_val, oid) in entries {
                            register_map_ref(rec, field, key_val, oid, ctx);
                        }
                    }
                    DecodeMode::Sync => {
                        let _ = rec.borrow_mut().map_mut(&field.name)?;
                        for _ in 0..count {
                            let key_val = codec::decode_primitive(buf, *key)?;
                            let oid = codec::decode_primitive(buf, oid_ty)?;
                            rec.borrow_mut()
                                .map_mut(&field.name)?
                                .insert_silent(key_val.clone(), FieldValue::Ref(oid.clone()));
                            register_map_ref(rec, field, key_val, oid, ctx);
                        }
                    }
                }
                if ctx.mark_change {
                    rec.borrow_mut().set_changed(&[field.name.as_str()])?;
                }
                return Ok(());
            }
            match ctx.mode {
                DecodeMode::Override => {
                    let mut container = MapContainer::new();
                    for _ in 0..count {
                        let key_val = codec::decode_primitive(buf, *key)?;
                        let fv = decode_map_value_bin_fresh(field, buf, ctx)?;
                        container.insert_silent(key_val, fv);
                    }
                    store_and_mark(rec, field, FieldValue::Map(container), ctx)
                }
                DecodeMode::Sync => {
                    let _ = rec.borrow_mut().map_mut(&field.name)?;
                    for _ in 0..count {
                        let key_val = codec::decode_primitive(buf, *key)?;
                        match &field.kind {
                            FieldKind::Primitive(ty) => {
                                let pv = codec::decode_primitive(buf, *ty)?;
                                rec.borrow_mut()
                                    .map_mut(&field.name)?
                                    .insert_silent(key_val, FieldValue::Primitive(pv));
                            }
                            FieldKind::Record(schema) => {
                                let existing = {
                                    let got = rec.borrow().get(&field.name)?;
                                    match got {
                                        FieldValue::Map(m) => m.get(&key_val).cloned(),
                                        _ => unreachable!("map field must hold Map"),
                                    }
                                };
                                match existing {
                                    Some(FieldValue::Record(target)) => decode_bin_into(&target, buf, ctx)?,
                                    _ => {
                                        let staging = Record::new(schema.clone());
                                        decode_bin_into(&staging, buf, ctx)?;
                                        let real = apply_create_hook(field, staging);
                                        rec.borrow_mut()
                                            .map_mut(&field.name)?
                                            .insert_silent(key_val, FieldValue::Record(real));
                                    }
                                }
                            }
                        }
                    }
                    if ctx.mark_change {
                        rec.borrow_mut().set_changed(&[field.name.as_str()])?;
                    }
                    Ok(())
                }
            }
        }
        Cardinality::IdMap { key } => {
            let head = buf.read_u8()?;
            if head != HEAD_ID_MAP {
                return Err(Error::new(Cause::Malformed(format!(
                    "expected id-map marker 0x{:02x} for field '{}', got 0x{:02x}",
                    HEAD_ID_MAP, field.name, head
                ))));
            }
            let count = buf.read_u32()? as usize;
            if field.reference {
                let oid_ty = nested_schema(field)?.oid_type()?;
                match ctx.mode {
                    DecodeMode::Override => {
                        let mut container = IdMapContainer::new();
                        let mut entries = Vec::with_capacity(count);
                        for _ in 0..count {
                            let key_val = codec::decode_primitive(buf, *key)?;
                            let oid = codec::decode_primitive(buf, oid_ty)?;
                            container.insert_silent_value(key_val.clone(), FieldValue::Ref(oid.clone()));
                            entries.push((key_val, oid));
                        }
                        store_and_mark(rec, field, FieldValue::IdMap(container), ctx)?;
                        for (key_val, oid) in entries {
                            register_idmap_ref(rec, field, key_val, oid, ctx);
                        }
                    }
                    DecodeMode::Sync => {
                        let _ = rec.borrow_mut().id_map_mut(&field.name)?;
                        for _ in 0..count {
                            let key_val = codec::decode_primitive(buf, *key)?;
                            let oid = codec::decode_primitive(buf, oid_ty)?;
                            rec.borrow_mut()
                                .id_map_mut(&field.name)?
                                .insert_silent_value(key_val.clone(), FieldValue::Ref(oid.clone()));
                            register_idmap_ref(rec, field, key_val, oid, ctx);
                        }
                    }
                }
                if ctx.mark_change {
                    rec.borrow_mut().set_changed(&[field.name.as_str()])?;
                }
                return Ok(());
            }
            let schema = nested_schema(field)?;
            match ctx.mode {
                DecodeMode::Override => {
                    let mut container = IdMapContainer::new();
                    for _ in 0..count {
                        let key_val = codec::decode_primitive(buf, *key)?;
                        let staging = Record::new(schema.clone());
                        decode_bin_into(&staging, buf, ctx)?;
                        staging.borrow_mut().set_silent("oid", FieldValue::Primitive(key_val.clone()))?;
                        let real = apply_create_hook(field, staging);
                        container.insert_silent(key_val.clone(), real.clone());
                        ctx.known_objects.insert(key_val, real);
                    }
                    store_and_mark(rec, field, FieldValue::IdMap(container), ctx)
                }
                DecodeMode::Sync => {
                    let _ = rec.borrow_mut().id_map_mut(&field.name)?;
                    for _ in 0..count {
                        let key_val = codec::decode_primitive(buf, *key)?;
                        let existing = {
                            let got = rec.borrow().get(&field.name)?;
                            match got {
                                FieldValue::IdMap(m) => m.get(&key_val).cloned(),
                                _ => unreachable!("id-map field must hold IdMap"),
                            }
                        };
                        let target = match existing {
                            Some(FieldValue::Record(r)) => {
                                decode_bin_into(&r, buf, ctx)?;
                                r
                            }
                            _ => {
                                let staging = Record::new(schema.clone());
                                decode_bin_into(&staging, buf, ctx)?;
                                staging.borrow_mut().set_silent("oid", FieldValue::Primitive(key_val.clone()))?;
                                let real = apply_create_hook(field, staging);
                                rec.borrow_mut().id_map_mut(&field.name)?.add(key_val.clone(), real.clone());
                                real
                            }
                        };
                        ctx.known_objects.insert(key_val, target);
                    }
                    if ctx.mark_change {
                        rec.borrow_mut().set_changed(&[field.name.as_str()])?;
                    }
                    Ok(())
                }
            }
        }
    }
}

fn decode_array_elem_bin(field: &FieldDesc, buf: &mut ReadBuffer, ctx: &mut DecodeContext) -> Result<FieldValue> {
    match &field.kind {
        FieldKind::Primitive(ty) => Ok(FieldValue::Primitive(codec::decode_primitive(buf, *ty)?)),
        FieldKind::Record(schema) => {
            let staging = Record::new(schema.clone());
            decode_bin_into(&staging, buf, ctx)?;
            Ok(FieldValue::Record(apply_create_hook(field, staging)))
        }
    }
}

fn decode_map_value_bin_fresh(field: &FieldDesc, buf: &mut ReadBuffer, ctx: &mut DecodeContext) -> Result<FieldValue> {
    match &field.kind {
        FieldKind::Primitive(ty) => Ok(FieldValue::Primitive(codec::decode_primitive(buf, *ty)?)),
        FieldKind::Record(schema) => {
            let staging = Record::new(schema.clone());
            decode_bin_into(&staging, buf, ctx)?;
            Ok(FieldValue::Record(apply_create_hook(field, staging)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{encode_dict, EncodeOpts};
    use crate::schema::FieldDef;
    use crate::value::PrimitiveType;
    use std::sync::Arc as StdArc;

    fn point_schema() -> StdArc<Schema> {
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
    fn dict_round_trip_override() {
        let schema = point_schema();
        let src = Record::new(schema.clone());
        src.borrow_mut().set("x", FieldValue::Primitive(PrimitiveValue::Int32(3))).unwrap();
        src.borrow_mut().set("y", FieldValue::Primitive(PrimitiveValue::Int32(4))).unwrap();

        let (json, _) = encode_dict(&src, &EncodeOpts::new(), true).unwrap();

        let dst = Record::new(schema);
        let unsolved = unpack_dict(&dst, &json, DecodeMode::Override, None, false).unwrap();
        assert!(unsolved.is_empty());
        match dst.borrow().get("x").unwrap() {
            FieldValue::Primitive(PrimitiveValue::Int32(3)) => (),
            _ => panic!("expected x=3"),
        }
        match dst.borrow().get("y").unwrap() {
            FieldValue::Primitive(PrimitiveValue::Int32(4)) => (),
            _ => panic!("expected y=4"),
        }
    }

    #[test]
    fn null_scalar_is_ignored_in_override() {
        let schema = point_schema();
        let dst = Record::new(schema);
        dst.borrow_mut().set("x", FieldValue::Primitive(PrimitiveValue::Int32(9))).unwrap();
        let json = serde_json::json!({"x": null, "y": 2});
        unpack_dict(&dst, &json, DecodeMode::Override, None, false).unwrap();
        match dst.borrow().get("x").unwrap() {
            FieldValue::Primitive(PrimitiveValue::Int32(9)) => (),
            _ => panic!("null should not have overwritten x"),
        }
    }
}
