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
//! Declarative record schemas: field descriptors, cardinality and the registry that compiles
//! a set of [`FieldDef`]s (plus inherited ancestor fields) into a [`Schema`].

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use serde_json::{Map as JsonMap, Value as Json};

use crate::error::{Cause, Error, Result};
use crate::record::RecordRef;
use crate::value::{PrimitiveType, PrimitiveValue};

/// A factory hook consulted by the decoder when constructing a nested record from scratch.
/// Receives a staging record already populated with every field the wire data supplied, so a
/// discriminator field can steer the choice of concrete subtype; the returned record need not
/// be the staging instance itself (the decoder copies the staged fields onto it afterwards).
pub type CreateHook = Arc<dyn Fn(&RecordRef) -> RecordRef + Send + Sync>;

#[derive(Clone)]
pub enum FieldKind {
    Primitive(PrimitiveType),
    Record(Arc<Schema>),
}

impl std::fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::Primitive(p) => write!(f, "Primitive({})", p),
            FieldKind::Record(s) => write!(f, "Record({})", s.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cardinality {
    Scalar,
    Array,
    Map { key: PrimitiveType },
    IdMap { key: PrimitiveType },
}

/// A single field's compiled descriptor. Built from a [`FieldDef`] by [`Schema::define`].
#[derive(Clone)]
pub struct FieldDesc {
    pub index: u16,
    pub name: String,
    pub kind: FieldKind,
    pub cardinality: Cardinality,
    pub reference: bool,
    pub arithm: bool,
    pub skip_changed: bool,
    pub default: Option<PrimitiveValue>,
    pub min_value: Option<PrimitiveValue>,
    pub create: Option<CreateHook>,
    /// `conf_name` and any other caller-supplied attributes, kept verbatim.
    pub attrs: JsonMap<String, Json>,
}

impl std::fmt::Debug for FieldDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDesc")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("cardinality", &self.cardinality)
            .field("reference", &self.reference)
            .finish()
    }
}

/// Builder for a field, passed to [`Schema::define`]. Mirrors the attribute set documented
/// for the schema-declaration surface: `index`, `desc`, `arithm`, `default`, `create`,
/// `min_value`, `skip_changed`, `ref`, plus pass-through user attributes such as `conf_name`.
pub struct FieldDef {
    pub index: u16,
    pub name: String,
    pub kind: FieldKind,
    pub cardinality: Cardinality,
    pub reference: bool,
    pub arithm: bool,
    pub skip_changed: bool,
    pub default: Option<PrimitiveValue>,
    pub min_value: Option<PrimitiveValue>,
    pub create: Option<CreateHook>,
    pub attrs: JsonMap<String, Json>,
}

impl FieldDef {
    fn base(index: u16, name: &str, kind: FieldKind, cardinality: Cardinality) -> Self {
        FieldDef {
            index,
            name: name.to_string(),
            kind,
            cardinality,
            reference: false,
            arithm: false,
            skip_changed: false,
            default: None,
            min_value: None,
            create: None,
            attrs: JsonMap::new(),
        }
    }

    pub fn scalar(index: u16, name: &str, ty: PrimitiveType) -> Self {
        Self::base(index, name, FieldKind::Primitive(ty), Cardinality::Scalar)
    }

    pub fn scalar_record(index: u16, name: &str, schema: Arc<Schema>) -> Self {
        Self::base(
            index,
            name,
            FieldKind::Record(schema),
            Cardinality::Scalar,
        )
    }

    pub fn array(index: u16, name: &str, ty: PrimitiveType) -> Self {
        Self::base(index, name, FieldKind::Primitive(ty), Cardinality::Array)
    }

    pub fn array_record(index: u16, name: &str, schema: Arc<Schema>) -> Self {
        Self::base(index, name, FieldKind::Record(schema), Cardinality::Array)
    }

    pub fn map(index: u16, name: &str, key: PrimitiveType, ty: PrimitiveType) -> Self {
        Self::base(
            index,
            name,
            FieldKind::Primitive(ty),
            Cardinality::Map { key },
        )
    }

    pub fn map_record(index: u16, name: &str, key: PrimitiveType, schema: Arc<Schema>) -> Self {
        Self::base(
            index,
            name,
            FieldKind::Record(schema),
            Cardinality::Map { key },
        )
    }

    pub fn id_map(index: u16, name: &str, key: PrimitiveType, schema: Arc<Schema>) -> Self {
        Self::base(
            index,
            name,
            FieldKind::Record(schema),
            Cardinality::IdMap { key },
        )
    }

    pub fn reference(mut self) -> Self {
        self.reference = true;
        self
    }

    pub fn arithm(mut self) -> Self {
        self.arithm = true;
        self
    }

    pub fn skip_changed(mut self) -> Self {
        self.skip_changed = true;
        self
    }

    pub fn default(mut self, v: PrimitiveValue) -> Self {
        self.default = Some(v);
        self
    }

    pub fn min_value(mut self, v: PrimitiveValue) -> Self {
        self.min_value = Some(v);
        self
    }

    pub fn create(mut self, f: impl Fn(&RecordRef) -> RecordRef + Send + Sync + 'static) -> Self {
        self.create = Some(Arc::new(f));
        self
    }

    pub fn attr(mut self, key: &str, value: Json) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    pub fn conf_name(self, name: &str) -> Self {
        self.attr("conf_name", Json::from(name))
    }

    /// Documentation string for this field, stashed in `attrs` like any other pass-through
    /// attribute -- `desc` has no behavioral effect on the engine.
    pub fn desc(self, text: &str) -> Self {
        self.attr("desc", Json::from(text))
    }

    fn validate(&self) -> Result<()> {
        if self.index == 0 || self.index > 65535 {
            return Err(Error::new(Cause::InvalidIndex(self.index as u32)));
        }
        if self.arithm {
            let numeric = matches!(self.kind, FieldKind::Primitive(p) if p.is_numeric());
            if !numeric || self.cardinality != Cardinality::Scalar {
                return Err(Error::new(Cause::DefineError(
                    self.name.clone(),
                    String::from("arithm is only valid on a scalar numeric field"),
                )));
            }
        }
        if self.reference {
            if !matches!(self.kind, FieldKind::Record(_)) {
                return Err(Error::new(Cause::DefineError(
                    self.name.clone(),
                    String::from("ref is only valid on a field whose element type is a record"),
                )));
            }
        }
        Ok(())
    }

    fn into_desc(self) -> FieldDesc {
        FieldDesc {
            index: self.index,
            name: self.name,
            kind: self.kind,
            cardinality: self.cardinality,
            reference: self.reference,
            arithm: self.arithm,
            skip_changed: self.skip_changed,
            default: self.default,
            min_value: self.min_value,
            create: self.create,
            attrs: self.attrs,
        }
    }
}

/// A composable `AND` of field-name predicates, used to restrict which fields an encode walk
/// visits (e.g. an id-map's element encoder composes a caller-supplied filter with one that
/// always excludes the `oid` field).
#[derive(Clone, Default)]
pub struct FieldFilter {
    predicates: Vec<Arc<dyn Fn(&str) -> bool + Send + Sync>>,
}

impl FieldFilter {
    pub fn new() -> Self {
        FieldFilter {
            predicates: Vec::new(),
        }
    }

    pub fn from_fn(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        FieldFilter {
            predicates: vec![Arc::new(f)],
        }
    }

    pub fn exclude(name: &str) -> Self {
        let owned = name.to_string();
        Self::from_fn(move |n| n != owned)
    }

    /// AND this filter with another, returning a new composed filter. Mirrors the original's
    /// `FieldFilter(*filters)` conjunction.
    pub fn and(&self, other: &FieldFilter) -> FieldFilter {
        let mut predicates = self.predicates.clone();
        predicates.extend(other.predicates.iter().cloned());
        FieldFilter { predicates }
    }

    pub fn allows(&self, name: &str) -> bool {
        self.predicates.iter().all(|p| p(name))
    }
}

pub struct Schema {
    pub name: String,
    pub fields: Vec<FieldDesc>,
    by_index: HashMap<u16, usize>,
    by_name: HashMap<String, usize>,
}

impl Schema {
    pub fn define(name: &str, parents: &[Arc<Schema>], defs: Vec<FieldDef>) -> Result<Arc<Schema>> {
        // (index -> (FieldDesc, originating schema name)), preserving first-seen order.
        let mut order: Vec<u16> = Vec::new();
        let mut slots: HashMap<u16, (FieldDesc, String)> = HashMap::new();
        let mut names: HashMap<String, u16> = HashMap::new();

        for parent in parents {
            for fd in &parent.fields {
                Self::merge_inherited(&mut order, &mut slots, &mut names, fd, &parent.name)?;
            }
        }

        for def in defs {
            def.validate()?;
            let desc = def.into_desc();
            if let Some((_, origin)) = slots.get(&desc.index) {
                return Err(Error::new(Cause::DuplicateIndex(
                    desc.index,
                    format!("already declared on '{}'", origin),
                )));
            }
            if names.contains_key(&desc.name) {
                return Err(Error::new(Cause::DuplicateName(desc.name.clone())));
            }
            names.insert(desc.name.clone(), desc.index);
            order.push(desc.index);
            slots.insert(desc.index, (desc, name.to_string()));
        }

        let mut fields: Vec<FieldDesc> = order
            .into_iter()
            .map(|idx| slots.remove(&idx).unwrap().0)
            .collect();
        fields.sort_by_key(|f| f.index);

        let mut by_index = HashMap::new();
        let mut by_name = HashMap::new();
        for (i, f) in fields.iter().enumerate() {
            by_index.insert(f.index, i);
            by_name.insert(f.name.clone(), i);
        }

        debug!("defined schema '{}' with {} field(s)", name, fields.len());

        Ok(Arc::new(Schema {
            name: name.to_string(),
            fields,
            by_index,
            by_name,
        }))
    }

    fn merge_inherited(
        order: &mut Vec<u16>,
        slots: &mut HashMap<u16, (FieldDesc, String)>,
        names: &mut HashMap<String, u16>,
        fd: &FieldDesc,
        origin: &str,
    ) -> Result<()> {
        if let Some((_, existing_origin)) = slots.get(&fd.index) {
            if existing_origin == origin {
                // Same ancestor already contributed this field via another inheritance path;
                // dedup silently.
                return Ok(());
            }
            return Err(Error::new(Cause::DuplicateIndex(
                fd.index,
                format!(
                    "inherited from both '{}' and '{}'",
                    existing_origin, origin
                ),
            )));
        }
        if let Some(existing_idx) = names.get(&fd.name) {
            if *existing_idx != fd.index {
                return Err(Error::new(Cause::DuplicateName(fd.name.clone())));
            }
        }
        names.insert(fd.name.clone(), fd.index);
        order.push(fd.index);
        slots.insert(fd.index, (fd.clone(), origin.to_string()));
        Ok(())
    }

    pub fn field_by_index(&self, index: u16) -> Option<&FieldDesc> {
        self.by_index.get(&index).map(|i| &self.fields[*i])
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDesc> {
        self.by_name.get(name).map(|i| &self.fields[*i])
    }

    pub fn require_by_name(&self, name: &str) -> Result<&FieldDesc> {
        self.field_by_name(name)
            .ok_or_else(|| Error::new(Cause::NoField(name.to_string())))
    }

    pub fn require_by_index(&self, index: u16) -> Result<&FieldDesc> {
        self.field_by_index(index)
            .ok_or_else(|| Error::new(Cause::UnknownFieldIndex(index, self.name.clone())))
    }

    pub fn indices(&self) -> Vec<u16> {
        self.fields.iter().map(|f| f.index).collect()
    }

    /// The primitive type backing this schema's `oid` field, used by the decoder to parse a
    /// reference target's oid out of the wire form before a binding exists.
    pub fn oid_type(&self) -> Result<PrimitiveType> {
        match &self.require_by_name("oid")?.kind {
            FieldKind::Primitive(ty) => Ok(*ty),
            FieldKind::Record(_) => Err(Error::new(Cause::DefineError(
                self.name.clone(),
                String::from("oid field must be a scalar primitive"),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_index_zero() {
        let r = Schema::define("Bad", &[], vec![FieldDef::scalar(0, "x", PrimitiveType::Int32)]);
        assert!(r.is_err());
    }

    #[test]
    fn rejects_duplicate_index() {
        let r = Schema::define(
            "Bad",
            &[],
            vec![
                FieldDef::scalar(1, "x", PrimitiveType::Int32),
                FieldDef::scalar(1, "y", PrimitiveType::Int32),
            ],
        );
        assert!(r.is_err());
    }

    #[test]
    fn inherits_and_dedups_shared_ancestor_field() {
        let base = Schema::define(
            "Base",
            &[],
            vec![FieldDef::scalar(1, "oid", PrimitiveType::UInt32)],
        )
        .unwrap();
        let child = Schema::define(
            "Child",
            &[base.clone(), base.clone()],
            vec![FieldDef::scalar(2, "name", PrimitiveType::String)],
        )
        .unwrap();
        assert_eq!(child.fields.len(), 2);
        assert!(child.field_by_name("oid").is_some());
    }
}
