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
//! End-to-end scenarios against the public `pack`/`unpack` surface: a scalar delta, a
//! nested-record delta, an array mutation, a map tombstone synced across a graph, an
//! id-map round-trip, and reference resolution.

use std::sync::Arc;

use dmodel::containers::FieldValue;
use dmodel::{
    DecodeMode, EncodeOpts, FieldDef, Format, PrimitiveType, PrimitiveValue, Record, RecordOps,
    Schema,
};

fn counter_schema() -> Arc<Schema> {
    Schema::define(
        "Counter",
        &[],
        vec![
            FieldDef::scalar(1, "oid", PrimitiveType::UInt32),
            FieldDef::scalar(2, "n", PrimitiveType::Int32).default(PrimitiveValue::Int32(0)),
        ],
    )
    .unwrap()
}

fn point_schema() -> Arc<Schema> {
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

fn shape_schema(point: Arc<Schema>) -> Arc<Schema> {
    Schema::define(
        "Shape",
        &[],
        vec![
            FieldDef::scalar(1, "name", PrimitiveType::String),
            FieldDef::scalar_record(2, "origin", point),
        ],
    )
    .unwrap()
}

fn bag_schema() -> Arc<Schema> {
    Schema::define(
        "Bag",
        &[],
        vec![FieldDef::array(1, "items", PrimitiveType::Int32)],
    )
    .unwrap()
}

fn tag_map_schema() -> Arc<Schema> {
    Schema::define(
        "Tags",
        &[],
        vec![FieldDef::map(
            1,
            "labels",
            PrimitiveType::UInt32,
            PrimitiveType::String,
        )],
    )
    .unwrap()
}

fn track_schema() -> Arc<Schema> {
    Schema::define(
        "Track",
        &[],
        vec![
            FieldDef::scalar(1, "oid", PrimitiveType::UInt32),
            FieldDef::scalar(2, "title", PrimitiveType::String),
        ],
    )
    .unwrap()
}

fn coord_schema() -> Arc<Schema> {
    Schema::define(
        "Coord",
        &[],
        vec![
            FieldDef::scalar(1, "oid", PrimitiveType::UInt32),
            FieldDef::scalar(2, "label", PrimitiveType::String),
        ],
    )
    .unwrap()
}

fn atlas_schema(coord: Arc<Schema>) -> Arc<Schema> {
    Schema::define(
        "Atlas",
        &[],
        vec![
            FieldDef::scalar(1, "oid", PrimitiveType::UInt32),
            FieldDef::id_map(2, "coords", PrimitiveType::UInt32, coord.clone()),
            FieldDef::map_record(3, "refs", PrimitiveType::UInt32, coord).reference(),
        ],
    )
    .unwrap()
}

fn playlist_schema(track: Arc<Schema>) -> Arc<Schema> {
    Schema::define(
        "Playlist",
        &[],
        vec![
            FieldDef::scalar(1, "oid", PrimitiveType::UInt32),
            FieldDef::id_map(2, "tracks", PrimitiveType::UInt32, track.clone()),
            FieldDef::scalar_record(3, "favorite", track).reference(),
        ],
    )
    .unwrap()
}

/// S1: a scalar delta. Mutate one field, pack with `only_changed`, and confirm the delta
/// carries exactly that field.
#[test]
fn s1_scalar_delta() {
    let schema = counter_schema();
    let rec = Record::new(schema);
    rec.borrow_mut()
        .set("oid", FieldValue::Primitive(PrimitiveValue::UInt32(7)))
        .unwrap();
    RecordOps::clear_changed(&rec, &[], true).unwrap();

    rec.borrow_mut()
        .set("n", FieldValue::Primitive(PrimitiveValue::Int32(42)))
        .unwrap();

    let mut opts = EncodeOpts::new();
    opts.only_changed = true;
    let packed = rec.pack(Format::Dict, &opts).unwrap();
    let json = packed.as_dict().unwrap();
    assert_eq!(json, &serde_json::json!({"n": 42}));
}

/// S2: a nested-record delta. Mutating a field on the nested record surfaces through the
/// parent's `only_changed` encode; the unrelated sibling field at the top level is absent.
#[test]
fn s2_nested_delta() {
    let point = point_schema();
    let shape = shape_schema(point);
    let rec = Record::new(shape);
    rec.borrow_mut()
        .set(
            "name",
            FieldValue::Primitive(PrimitiveValue::String(String::from("circle"))),
        )
        .unwrap();
    RecordOps::clear_changed(&rec, &[], true).unwrap();

    let origin = rec.borrow_mut().record_field_mut("origin").unwrap();
    origin
        .borrow_mut()
        .set("x", FieldValue::Primitive(PrimitiveValue::Int32(5)))
        .unwrap();

    let mut opts = EncodeOpts::new();
    opts.only_changed = true;
    let packed = rec.pack(Format::Dict, &opts).unwrap();
    let json = packed.as_dict().unwrap();
    assert_eq!(json, &serde_json::json!({"origin": {"x": 5}}));
}

/// S3: array mutation marks the whole container dirty and a subsequent pack re-emits the
/// full sequence (arrays have no per-index sync semantics).
#[test]
fn s3_array_mutation() {
    let schema = bag_schema();
    let rec = Record::new(schema);
    rec.borrow_mut()
        .array_mut("items")
        .unwrap()
        .push(FieldValue::Primitive(PrimitiveValue::Int32(1)));
    RecordOps::clear_changed(&rec, &[], true).unwrap();
    assert!(!RecordOps::has_changed(&rec, None, true));

    rec.borrow_mut()
        .array_mut("items")
        .unwrap()
        .push(FieldValue::Primitive(PrimitiveValue::Int32(2)));
    assert!(RecordOps::has_changed(&rec, Some("items"), true));

    let mut opts = EncodeOpts::new();
    opts.only_changed = true;
    let packed = rec.pack(Format::Dict, &opts).unwrap();
    assert_eq!(
        packed.as_dict().unwrap(),
        &serde_json::json!({"items": [1, 2]})
    );
}

/// S4: a map tombstone replays through a sync decode, deleting the key from the
/// destination graph rather than ignoring it.
#[test]
fn s4_map_tombstone_sync() {
    let schema = tag_map_schema();
    let src = Record::new(schema.clone());
    src.borrow_mut()
        .map_mut("labels")
        .unwrap()
        .insert_silent(
            PrimitiveValue::UInt32(1),
            FieldValue::Primitive(PrimitiveValue::String(String::from("a"))),
        );
    src.borrow_mut()
        .map_mut("labels")
        .unwrap()
        .insert_silent(
            PrimitiveValue::UInt32(2),
            FieldValue::Primitive(PrimitiveValue::String(String::from("b"))),
        );

    let dst = Record::new(schema);
    dst.unpack(
        &src.pack(Format::Dict, &EncodeOpts::new()).unwrap(),
        DecodeMode::Override,
        None,
        false,
    )
    .unwrap();

    RecordOps::clear_changed(&src, &[], true).unwrap();
    src.borrow_mut()
        .map_mut("labels")
        .unwrap()
        .remove(&PrimitiveValue::UInt32(1));

    let mut opts = EncodeOpts::new();
    opts.only_changed = true;
    let delta = src.pack(Format::Dict, &opts).unwrap();

    dst.unpack(&delta, DecodeMode::Sync, None, false).unwrap();

    let labels = match dst.borrow().get("labels").unwrap() {
        FieldValue::Map(m) => m,
        _ => panic!("expected a map"),
    };
    assert!(labels.get(&PrimitiveValue::UInt32(1)).is_none());
    assert!(labels.get(&PrimitiveValue::UInt32(2)).is_some());
}

/// S5: id-map round-trip. Every decoded entry's stored `oid` equals the key it was filed
/// under, and the count survives an override round-trip.
#[test]
fn s5_id_map_round_trip() {
    let track = track_schema();
    let playlist = playlist_schema(track.clone());

    let src = Record::new(playlist.clone());
    for (oid, title) in [(1u32, "a"), (2, "b"), (3, "c")] {
        let t = Record::new(track.clone());
        t.borrow_mut()
            .set("oid", FieldValue::Primitive(PrimitiveValue::UInt32(oid)))
            .unwrap();
        t.borrow_mut()
            .set(
                "title",
                FieldValue::Primitive(PrimitiveValue::String(title.to_string())),
            )
            .unwrap();
        src.borrow_mut()
            .id_map_mut("tracks")
            .unwrap()
            .add(PrimitiveValue::UInt32(oid), t);
    }

    let packed = src.pack(Format::Dict, &EncodeOpts::new()).unwrap();
    let dst = Record::new(playlist);
    dst.unpack(&packed, DecodeMode::Override, None, false)
        .unwrap();

    let tracks = match dst.borrow().get("tracks").unwrap() {
        FieldValue::IdMap(m) => m,
        _ => panic!("expected an id-map"),
    };
    assert_eq!(tracks.len(), 3);
    for (k, v) in tracks.iter() {
        match v {
            FieldValue::Record(r) => assert_eq!(&r.borrow().oid().unwrap(), k),
            _ => panic!("expected a record entry"),
        }
    }
}

/// S6: reference resolution. A scalar reference field's oid binds, post-decode, to the
/// literal same instance the id-map owns (not merely an equal copy).
#[test]
fn s6_reference_resolution() {
    let track = track_schema();
    let playlist = playlist_schema(track.clone());

    let src = Record::new(playlist.clone());
    let t = Record::new(track.clone());
    t.borrow_mut()
        .set("oid", FieldValue::Primitive(PrimitiveValue::UInt32(9)))
        .unwrap();
    t.borrow_mut()
        .set(
            "title",
            FieldValue::Primitive(PrimitiveValue::String(String::from("favorite track"))),
        )
        .unwrap();
    src.borrow_mut()
        .id_map_mut("tracks")
        .unwrap()
        .add(PrimitiveValue::UInt32(9), t.clone());
    src.borrow_mut()
        .set("favorite", FieldValue::Ref(PrimitiveValue::UInt32(9)))
        .unwrap();

    let packed = src.pack(Format::Dict, &EncodeOpts::new()).unwrap();
    let dst = Record::new(playlist);
    let unsolved = dst
        .unpack(&packed, DecodeMode::Override, None, false)
        .unwrap();
    assert!(unsolved.is_empty());

    let tracks = match dst.borrow().get("tracks").unwrap() {
        FieldValue::IdMap(m) => m,
        _ => panic!("expected an id-map"),
    };
    let owned = match tracks.get(&PrimitiveValue::UInt32(9)) {
        Some(FieldValue::Record(r)) => r.clone(),
        _ => panic!("expected the id-map to own a resolved Track"),
    };
    let favorite = dst.borrow().record_field("favorite").unwrap();
    assert!(std::rc::Rc::ptr_eq(&owned, &favorite));
}

/// S6b: a `ref` *map* (not merely a scalar reference) resolves every entry to the literal
/// instance the sibling id-map owns: `refs['3']` binds to the same handle as `coords['3']`.
#[test]
fn s6_map_of_references_resolves() {
    let coord = coord_schema();
    let atlas = atlas_schema(coord.clone());

    let src = Record::new(atlas.clone());
    for (oid, label) in [(1u32, "a"), (2, "b"), (3, "c")] {
        let c = Record::new(coord.clone());
        c.borrow_mut()
            .set("oid", FieldValue::Primitive(PrimitiveValue::UInt32(oid)))
            .unwrap();
        c.borrow_mut()
            .set(
                "label",
                FieldValue::Primitive(PrimitiveValue::String(label.to_string())),
            )
            .unwrap();
        src.borrow_mut()
            .id_map_mut("coords")
            .unwrap()
            .add(PrimitiveValue::UInt32(oid), c);
    }
    src.borrow_mut()
        .map_mut("refs")
        .unwrap()
        .insert_silent(PrimitiveValue::UInt32(3), FieldValue::Ref(PrimitiveValue::UInt32(3)));

    let packed = src.pack(Format::Dict, &EncodeOpts::new()).unwrap();
    let json = packed.as_dict().unwrap();
    assert_eq!(json["refs"], serde_json::json!({"3": 3}));

    let dst = Record::new(atlas);
    let unsolved = dst
        .unpack(&packed, DecodeMode::Override, None, false)
        .unwrap();
    assert!(unsolved.is_empty());

    let coords = match dst.borrow().get("coords").unwrap() {
        FieldValue::IdMap(m) => m,
        _ => panic!("expected an id-map"),
    };
    let owned = match coords.get(&PrimitiveValue::UInt32(3)) {
        Some(FieldValue::Record(r)) => r.clone(),
        _ => panic!("expected the id-map to own a resolved Coord"),
    };
    let refs = match dst.borrow().get("refs").unwrap() {
        FieldValue::Map(m) => m,
        _ => panic!("expected a map"),
    };
    let via_ref = match refs.get(&PrimitiveValue::UInt32(3)) {
        Some(FieldValue::Record(r)) => r.clone(),
        _ => panic!("expected refs['3'] to resolve to a Record"),
    };
    assert!(std::rc::Rc::ptr_eq(&owned, &via_ref));
}

/// Property 1: encoding then decoding in `override` mode into a fresh record reproduces the
/// source's values.
#[test]
fn round_trip_preserves_values_across_both_formats() {
    let schema = counter_schema();
    let src = Record::new(schema.clone());
    src.borrow_mut()
        .set("oid", FieldValue::Primitive(PrimitiveValue::UInt32(11)))
        .unwrap();
    src.borrow_mut()
        .set("n", FieldValue::Primitive(PrimitiveValue::Int32(-3)))
        .unwrap();

    for format in [Format::Dict, Format::Bin] {
        let packed = src.pack(format, &EncodeOpts::new()).unwrap();
        let dst = Record::new(schema.clone());
        dst.unpack(&packed, DecodeMode::Override, None, false)
            .unwrap();
        assert_eq!(dst.borrow().oid().unwrap(), PrimitiveValue::UInt32(11));
        match dst.borrow().get("n").unwrap() {
            FieldValue::Primitive(PrimitiveValue::Int32(-3)) => (),
            other => panic!("unexpected value: {:?}", other),
        }
    }
}

/// Property 6: arithmetic bounds. `sub_field` on a `uint32` field with the implicit zero
/// minimum raises rather than wrapping; `add_field` past the field width raises rather than
/// silently wrapping.
#[test]
fn arithmetic_enforces_bounds() {
    let schema = Schema::define(
        "Meter",
        &[],
        vec![FieldDef::scalar(1, "reading", PrimitiveType::UInt32)
            .arithm()
            .default(PrimitiveValue::UInt32(0))],
    )
    .unwrap();
    let rec = Record::new(schema);

    assert!(rec
        .borrow_mut()
        .sub_field("reading", &PrimitiveValue::UInt32(1))
        .is_err());

    rec.borrow_mut()
        .set(
            "reading",
            FieldValue::Primitive(PrimitiveValue::UInt32(u32::MAX)),
        )
        .unwrap();
    assert!(rec
        .borrow_mut()
        .add_field("reading", &PrimitiveValue::UInt32(1))
        .is_err());
}
