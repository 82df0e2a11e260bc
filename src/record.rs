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
//! Record instances: sparse field storage, the change-set, and the generic
//! getter/setter/arithmetic surface consulted through a [`Schema`] rather than per-field
//! generated accessors.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as Json};

use crate::changeset::ChangeSet;
use crate::containers::{ArrayContainer, FieldValue, IdMapContainer, MapContainer};
use crate::error::{Cause, Error, Result};
use crate::schema::{Cardinality, FieldKind, Schema};
use crate::value::{PrimitiveType, PrimitiveValue};

/// Every record instance is held behind this handle. A reference field and the map/id-map
/// that actually owns a target must, after a sync decode, observe the same instance -- only a
/// shared handle can make that true.
pub type RecordRef = Rc<RefCell<Record>>;

pub struct Record {
    schema: Arc<Schema>,
    values: HashMap<u16, FieldValue>,
    changed: ChangeSet,
    /// Attributes/fields the schema doesn't know about; stored rather than rejected unless
    /// strict-init is requested by the caller.
    extra: JsonMap<String, Json>,
}

impl Record {
    pub fn new(schema: Arc<Schema>) -> RecordRef {
        Rc::new(RefCell::new(Record {
            schema,
            values: HashMap::new(),
            changed: ChangeSet::new(),
            extra: JsonMap::new(),
        }))
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn default_for(&self, field: &crate::schema::FieldDesc) -> FieldValue {
        match (&field.kind, &field.cardinality) {
            (_, Cardinality::Array) => FieldValue::Array(ArrayContainer::new()),
            (_, Cardinality::Map { .. }) => FieldValue::Map(MapContainer::new()),
            (_, Cardinality::IdMap { .. }) => FieldValue::IdMap(IdMapContainer::new()),
            (FieldKind::Primitive(ty), Cardinality::Scalar) => FieldValue::Primitive(
                field.default.clone().unwrap_or_else(|| ty.default_value()),
            ),
            (FieldKind::Record(schema), Cardinality::Scalar) => {
                if field.reference {
                    // An unbound reference defaults to the zero value of the target schema's
                    // own oid type, not an arbitrary width.
                    let oid_ty = schema.oid_type().unwrap_or(PrimitiveType::UInt32);
                    FieldValue::Ref(oid_ty.default_value())
                } else {
                    // `create` is a decode-time subtype hook, not a default-value factory; a
                    // plain accessor always materializes the schema's own record type.
                    FieldValue::Record(Record::new(schema.clone()))
                }
            }
        }
    }

    /// Materialize the stored value for `name`, or its default if absent.
    pub fn get(&self, name: &str) -> Result<FieldValue> {
        let field = self.schema.require_by_name(name)?;
        Ok(self
            .values
            .get(&field.index)
            .cloned()
            .unwrap_or_else(|| self.default_for(field)))
    }

    pub fn get_by_index(&self, index: u16) -> Result<FieldValue> {
        let field = self.schema.require_by_index(index)?;
        Ok(self
            .values
            .get(&field.index)
            .cloned()
            .unwrap_or_else(|| self.default_for(field)))
    }

    /// Materialize (inserting the default if absent) and return mutable access to an array
    /// field's container, so callers can mutate it in place and have the container's own
    /// dirty-tracking apply.
    pub fn array_mut(&mut self, name: &str) -> Result<&mut ArrayContainer> {
        let field = self.schema.require_by_name(name)?;
        if !matches!(field.cardinality, Cardinality::Array) {
            return Err(Error::new(Cause::OperateError(
                name.to_string(),
                String::from("field is not an array"),
            )));
        }
        let index = field.index;
        self.values
            .entry(index)
            .or_insert_with(|| FieldValue::Array(ArrayContainer::new()));
        match self.values.get_mut(&index) {
            Some(FieldValue::Array(a)) => Ok(a),
            _ => unreachable!("entry just inserted an Array"),
        }
    }

    pub fn map_mut(&mut self, name: &str) -> Result<&mut MapContainer> {
        let field = self.schema.require_by_name(name)?;
        if !matches!(field.cardinality, Cardinality::Map { .. }) {
            return Err(Error::new(Cause::OperateError(
                name.to_string(),
                String::from("field is not a map"),
            )));
        }
        let index = field.index;
        self.values
            .entry(index)
            .or_insert_with(|| FieldValue::Map(MapContainer::new()));
        match self.values.get_mut(&index) {
            Some(FieldValue::Map(m)) => Ok(m),
            _ => unreachable!("entry just inserted a Map"),
        }
    }

    pub fn id_map_mut(&mut self, name: &str) -> Result<&mut IdMapContainer> {
        let field = self.schema.require_by_name(name)?;
        if !matches!(field.cardinality, Cardinality::IdMap { .. }) {
            return Err(Error::new(Cause::OperateError(
                name.to_string(),
                String::from("field is not an id-map"),
            )));
        }
        let index = field.index;
        self.values
            .entry(index)
            .or_insert_with(|| FieldValue::IdMap(IdMapContainer::new()));
        match self.values.get_mut(&index) {
            Some(FieldValue::IdMap(m)) => Ok(m),
            _ => unreachable!("entry just inserted an IdMap"),
        }
    }

    /// Scalar nested-record field accessor: since `RecordRef` is a shared handle, cloning it
    /// is cheap and the clone aliases the same underlying instance.
    pub fn record_field(&self, name: &str) -> Result<RecordRef> {
        match self.get(name)? {
            FieldValue::Record(r) => Ok(r),
            _ => Err(Error::new(Cause::OperateError(
                name.to_string(),
                String::from("field is not a resolved nested/reference record"),
            ))),
        }
    }

    /// Like `record_field`, but for an owned (non-reference) scalar nested record that may
    /// never have been written: materializes the default and inserts it into `values` before
    /// returning it, mirroring `array_mut`/`map_mut`/`id_map_mut`. A caller that mutates the
    /// returned handle sees that mutation persist on a later `get`/pack, since the handle
    /// aliases the stored instance rather than a detached copy.
    pub fn record_field_mut(&mut self, name: &str) -> Result<RecordRef> {
        let field = self.schema.require_by_name(name)?;
        if !matches!(field.cardinality, Cardinality::Scalar) || field.reference {
            return Err(Error::new(Cause::OperateError(
                name.to_string(),
                String::from("field is not an owned scalar nested-record field"),
            )));
        }
        let schema = match &field.kind {
            FieldKind::Record(s) => s.clone(),
            FieldKind::Primitive(_) => {
                return Err(Error::new(Cause::OperateError(
                    name.to_string(),
                    String::from("field is not a nested record"),
                )))
            }
        };
        let index = field.index;
        self.values
            .entry(index)
            .or_insert_with(|| FieldValue::Record(Record::new(schema)));
        match self.values.get(&index) {
            Some(FieldValue::Record(r)) => Ok(r.clone()),
            _ => unreachable!("entry just inserted a Record"),
        }
    }

    /// True if a reference field still holds an unresolved oid rather than a bound handle.
    pub fn is_unresolved_ref(&self, name: &str) -> Result<bool> {
        Ok(matches!(self.get(name)?, FieldValue::Ref(_)))
    }

    /// Write a value without touching the change-set; used by construction and by the
    /// decoder's "silent" population path.
    pub fn set_silent(&mut self, name: &str, value: FieldValue) -> Result<()> {
        let index = self.schema.require_by_name(name)?.index;
        self.values.insert(index, value);
        Ok(())
    }

    pub fn set_silent_by_index(&mut self, index: u16, value: FieldValue) -> Result<()> {
        self.schema.require_by_index(index)?;
        self.values.insert(index, value);
        Ok(())
    }

    /// Ordinary mutating setter: writes the value and marks the field changed if it differs
    /// from what was previously stored.
    pub fn set(&mut self, name: &str, value: FieldValue) -> Result<()> {
        let index = self.schema.require_by_name(name)?.index;
        let differs = match (self.values.get(&index), &value) {
            (Some(FieldValue::Primitive(old)), FieldValue::Primitive(new)) => old != new,
            (Some(FieldValue::Ref(old)), FieldValue::Ref(new)) => old != new,
            _ => true,
        };
        self.values.insert(index, value);
        if differs {
            self.changed.mark(index);
        }
        Ok(())
    }

    pub fn is_default_value(&self, name: &str) -> Result<bool> {
        let index = self.schema.require_by_name(name)?.index;
        Ok(!self.values.contains_key(&index))
    }

    pub fn clear_data(&mut self) {
        self.values.clear();
    }

    /// Copy another record's field storage onto this one, wholesale. Used by the decoder after
    /// a `create` hook returns a different instance than the staging record it was handed: the
    /// staged fields must still land on whatever the hook picked.
    pub fn adopt_from(&mut self, other: &Record) {
        self.values = other.values.clone();
        self.extra = other.extra.clone();
    }

    pub fn extra(&self) -> &JsonMap<String, Json> {
        &self.extra
    }

    pub fn set_extra(&mut self, key: &str, value: Json) {
        self.extra.insert(key.to_string(), value);
    }

    /// `has_changed()` with no field name: true iff anything on this record (or, if
    /// `recursive`, anything it owns) has changed.
    pub fn has_changed(&self, name: Option<&str>, recursive: bool) -> bool {
        match name {
            Some(name) => {
                let field = match self.schema.field_by_name(name) {
                    Some(f) => f,
                    None => return false,
                };
                if field.skip_changed {
                    return false;
                }
                if self.changed.is_changed(field.index) {
                    return true;
                }
                if recursive {
                    if let Some(v) = self.values.get(&field.index) {
                        let nested = !field.reference && recursive;
                        return crate::containers::value_has_changed(v, nested);
                    }
                }
                false
            }
            None => {
                if self.changed.any_changed() {
                    return true;
                }
                if recursive {
                    for field in &self.schema.fields {
                        if field.skip_changed {
                            continue;
                        }
                        if let Some(v) = self.values.get(&field.index) {
                            let nested = !field.reference && recursive;
                            if crate::containers::value_has_changed(v, nested) {
                                return true;
                            }
                        }
                    }
                }
                false
            }
        }
    }

    pub fn set_changed(&mut self, names: &[&str]) -> Result<()> {
        if names.is_empty() {
            self.changed.mark_all();
            return Ok(());
        }
        for name in names {
            let index = self.schema.require_by_name(name)?.index;
            self.changed.mark(index);
        }
        Ok(())
    }

    pub fn set_changed_all(&mut self) {
        self.changed.mark_all();
    }

    pub fn clear_changed(&mut self, names: &[&str], recursive: bool) -> Result<()> {
        if names.is_empty() {
            return Ok(self.clear_changed_all(recursive));
        }
        for name in names {
            let field = self.schema.require_by_name(name)?;
            if field.skip_changed {
                continue;
            }
            let index = field.index;
            let is_ref = field.reference;
            self.changed.clear(index);
            if recursive && !is_ref {
                if let Some(v) = self.values.get_mut(&index) {
                    crate::containers::value_clear_changed(v, true);
                }
            }
        }
        Ok(())
    }

    pub fn clear_changed_all(&mut self, recursive: bool) {
        self.changed.clear_all();
        if recursive {
            for field in self.schema.fields.clone() {
                if field.skip_changed || field.reference {
                    continue;
                }
                if let Some(v) = self.values.get_mut(&field.index) {
                    crate::containers::value_clear_changed(v, true);
                }
            }
        }
    }

    /// Convenience accessor for the conventional `oid` field used by id-maps.
    pub fn oid(&self) -> Result<PrimitiveValue> {
        match self.get("oid")? {
            FieldValue::Primitive(v) => Ok(v),
            _ => Err(Error::new(Cause::OperateError(
                String::from("oid"),
                String::from("oid field must be a scalar primitive"),
            ))),
        }
    }

    fn arithmetic_field(&self, name: &str) -> Result<&crate::schema::FieldDesc> {
        let field = self.schema.require_by_name(name)?;
        if !field.arithm {
            return Err(Error::new(Cause::OperateError(
                name.to_string(),
                String::from("field is not declared arithm"),
            )));
        }
        Ok(field)
    }

    /// Generic equivalent of an `add_<field>` helper: returns `(delta_applied, new_value)`.
    /// Rejects a result that would overflow the field's underlying integer width.
    pub fn add_field(&mut self, name: &str, delta: &PrimitiveValue) -> Result<(bool, PrimitiveValue)> {
        let field = self.arithmetic_field(name)?.clone();
        let current = match self.get(name)? {
            FieldValue::Primitive(v) => v,
            _ => {
                return Err(Error::new(Cause::OperateError(
                    name.to_string(),
                    String::from("arithmetic field must hold a primitive value"),
                )))
            }
        };
        let new_value = checked_add(&current, delta)
            .ok_or_else(|| Error::new(Cause::Overflow(name.to_string())))?;
        self.set(name, FieldValue::Primitive(new_value.clone()))?;
        let _ = field;
        Ok((true, new_value))
    }

    /// Generic equivalent of a `sub_<field>` helper. Unsigned fields default `min_value` to
    /// zero and raise on underflow; signed fields with no explicit `min_value` are unchecked,
    /// matching the reference implementation.
    pub fn sub_field(&mut self, name: &str, delta: &PrimitiveValue) -> Result<(bool, PrimitiveValue)> {
        let field = self.arithmetic_field(name)?.clone();
        let current = match self.get(name)? {
            FieldValue::Primitive(v) => v,
            _ => {
                return Err(Error::new(Cause::OperateError(
                    name.to_string(),
                    String::from("arithmetic field must hold a primitive value"),
                )))
            }
        };
        let min_value = field.min_value.clone().or_else(|| {
            if current.type_of().is_integral() && !is_signed(current.type_of()) {
                Some(current.type_of().default_value())
            } else {
                None
            }
        });
        let new_value = checked_sub(&current, delta)
            .ok_or_else(|| Error::new(Cause::Overflow(name.to_string())))?;
        if let Some(min) = &min_value {
            if compare_numeric(&new_value, min) == std::cmp::Ordering::Less {
                return Err(Error::new(Cause::Underflow(
                    name.to_string(),
                    current.to_string(),
                    delta.to_string(),
                    min.to_string(),
                )));
            }
        }
        self.set(name, FieldValue::Primitive(new_value.clone()))?;
        Ok((true, new_value))
    }

    /// A bounded, logging-friendly short representation: schema name plus the first few
    /// scalar primitive fields.
    pub fn short_repr(&self) -> String {
        let mut parts = Vec::new();
        for field in self.schema.fields.iter().take(4) {
            if let FieldKind::Primitive(_) = field.kind {
                if let Some(FieldValue::Primitive(v)) = self.values.get(&field.index) {
                    parts.push(format!("{}={}", field.name, v));
                }
            }
        }
        format!("{}({})", self.schema.name, parts.join(", "))
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_repr())
    }
}

fn is_signed(ty: PrimitiveType) -> bool {
    matches!(
        ty,
        PrimitiveType::Int8
            | PrimitiveType::Int16
            | PrimitiveType::Int32
            | PrimitiveType::Int64
            | PrimitiveType::Float
            | PrimitiveType::Double
    )
}

fn compare_numeric(a: &PrimitiveValue, b: &PrimitiveValue) -> std::cmp::Ordering {
    fn as_f64(v: &PrimitiveValue) -> f64 {
        match v {
            PrimitiveValue::Int8(x) => *x as f64,
            PrimitiveValue::UInt8(x) => *x as f64,
            PrimitiveValue::Int16(x) => *x as f64,
            PrimitiveValue::UInt16(x) => *x as f64,
            PrimitiveValue::Int32(x) => *x as f64,
            PrimitiveValue::UInt32(x) => *x as f64,
            PrimitiveValue::Int64(x) => *x as f64,
            PrimitiveValue::UInt64(x) => *x as f64,
            PrimitiveValue::Float(x) => *x as f64,
            PrimitiveValue::Double(x) => *x,
            _ => 0.0,
        }
    }
    as_f64(a).partial_cmp(&as_f64(b)).unwrap_or(std::cmp::Ordering::Equal)
}

macro_rules! checked_arith {
    ($fname:ident, $op:ident) => {
        fn $fname(a: &PrimitiveValue, b: &PrimitiveValue) -> Option<PrimitiveValue> {
            use PrimitiveValue::*;
            Some(match (a, b) {
                (Int8(x), Int8(y)) => Int8(x.$op(*y)?),
                (UInt8(x), UInt8(y)) => UInt8(x.$op(*y)?),
                (Int16(x), Int16(y)) => Int16(x.$op(*y)?),
                (UInt16(x), UInt16(y)) => UInt16(x.$op(*y)?),
                (Int32(x), Int32(y)) => Int32(x.$op(*y)?),
                (UInt32(x), UInt32(y)) => UInt32(x.$op(*y)?),
                (Int64(x), Int64(y)) => Int64(x.$op(*y)?),
                (UInt64(x), UInt64(y)) => UInt64(x.$op(*y)?),
                (Float(x), Float(y)) => Float(x + if stringify!($op) == "checked_sub" { -y } else { *y }),
                (Double(x), Double(y)) => Double(x + if stringify!($op) == "checked_sub" { -y } else { *y }),
                _ => return None,
            })
        }
    };
}

checked_arith!(checked_add, checked_add);
checked_arith!(checked_sub, checked_sub);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;

    fn counter_schema() -> Arc<Schema> {
        Schema::define(
            "Counter",
            &[],
            vec![FieldDef::scalar(1, "n", PrimitiveType::UInt32)
                .arithm()
                .default(PrimitiveValue::UInt32(0))],
        )
        .unwrap()
    }

    #[test]
    fn get_materializes_default() {
        let schema = counter_schema();
        let rec = Record::new(schema);
        match rec.borrow().get("n").unwrap() {
            FieldValue::Primitive(PrimitiveValue::UInt32(0)) => (),
            _ => panic!("expected default 0"),
        }
    }

    #[test]
    fn set_marks_changed() {
        let schema = counter_schema();
        let rec = Record::new(schema);
        assert!(!rec.borrow().has_changed(None, false));
        rec.borrow_mut()
            .set("n", FieldValue::Primitive(PrimitiveValue::UInt32(5)))
            .unwrap();
        assert!(rec.borrow().has_changed(None, false));
    }

    #[test]
    fn sub_underflow_on_unsigned_default_min() {
        let schema = counter_schema();
        let rec = Record::new(schema);
        let r = rec
            .borrow_mut()
            .sub_field("n", &PrimitiveValue::UInt32(1));
        assert!(r.is_err());
    }

    #[test]
    fn add_then_sub_round_trips() {
        let schema = counter_schema();
        let rec = Record::new(schema);
        rec.borrow_mut().add_field("n", &PrimitiveValue::UInt32(10)).unwrap();
        let (applied, v) = rec.borrow_mut().sub_field("n", &PrimitiveValue::UInt32(4)).unwrap();
        assert!(applied);
        match v {
            PrimitiveValue::UInt32(6) => (),
            _ => panic!("expected 6"),
        }
    }
}
