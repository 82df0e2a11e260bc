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
//! `dmodel-demo`: a small CLI that builds a sample `Track`/`Playlist` schema pair, mutates a
//! record graph, and shows what the pack/unpack surface actually produces on the wire.

use std::sync::Arc;

use clap::{value_parser, Arg, Command};
use env_logger::Env;
use log::info;
use parse_display::Display;

use dmodel::{
    DecodeMode, EncodeOpts, FieldDef, Format, PrimitiveType, PrimitiveValue, Record, RecordOps,
    Schema,
};

#[derive(Debug, Display)]
enum Cause {
    #[display("{0}")]
    Dmodel(String),
    #[display("unrecognized output format '{0}' (expected 'dict' or 'bin')")]
    BadFormat(String),
}

#[derive(Debug, Display)]
#[display("demo error: {cause}")]
struct Error {
    cause: Cause,
}

impl Error {
    fn new(cause: Cause) -> Error {
        Error { cause }
    }
}

impl std::error::Error for Error {}

impl From<dmodel::Error> for Error {
    fn from(err: dmodel::Error) -> Error {
        Error::new(Cause::Dmodel(err.to_string()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::new(Cause::Dmodel(err.to_string()))
    }
}

type Result<T> = std::result::Result<T, Error>;

/// A `Track` record, held as an entry in a `Playlist`'s `tracks` id-map.
fn track_schema() -> Arc<Schema> {
    Schema::define(
        "Track",
        &[],
        vec![
            FieldDef::scalar(1, "oid", PrimitiveType::UInt32),
            FieldDef::scalar(2, "title", PrimitiveType::String),
            FieldDef::scalar(3, "play_count", PrimitiveType::UInt32)
                .arithm()
                .default(PrimitiveValue::UInt32(0)),
        ],
    )
    .expect("Track schema is internally consistent")
}

fn playlist_schema(track: Arc<Schema>) -> Arc<Schema> {
    Schema::define(
        "Playlist",
        &[],
        vec![
            FieldDef::scalar(1, "oid", PrimitiveType::UInt32),
            FieldDef::scalar(2, "name", PrimitiveType::String),
            FieldDef::id_map(3, "tracks", PrimitiveType::UInt32, track),
        ],
    )
    .expect("Playlist schema is internally consistent")
}

fn build_sample() -> dmodel::RecordRef {
    let track = track_schema();
    let playlist = playlist_schema(track.clone());

    let list = Record::new(playlist);
    list.borrow_mut()
        .set(
            "name",
            dmodel::containers::FieldValue::Primitive(PrimitiveValue::String(String::from(
                "Late Night Drive",
            ))),
        )
        .expect("name is a valid field");

    for (oid, title) in [(1u32, "Nightcall"), (2, "Tension")] {
        let t = Record::new(track.clone());
        t.borrow_mut()
            .set("oid", dmodel::containers::FieldValue::Primitive(PrimitiveValue::UInt32(oid)))
            .unwrap();
        t.borrow_mut()
            .set(
                "title",
                dmodel::containers::FieldValue::Primitive(PrimitiveValue::String(title.to_string())),
            )
            .unwrap();
        list.borrow_mut()
            .id_map_mut("tracks")
            .expect("tracks is an id-map field")
            .add(PrimitiveValue::UInt32(oid), t);
    }

    list
}

fn cmd_pack(format: Format, only_changed: bool) -> Result<()> {
    let list = build_sample();
    RecordOps::clear_changed(&list, &[], true)?;

    // Mutate one track so an only-changed pack has something to show.
    if let dmodel::containers::FieldValue::IdMap(tracks) = list.borrow().get("tracks")? {
        if let Some(dmodel::containers::FieldValue::Record(t)) =
            tracks.get(&PrimitiveValue::UInt32(1)).cloned()
        {
            t.borrow_mut().add_field("play_count", &PrimitiveValue::UInt32(1))?;
        }
    }

    let mut opts = EncodeOpts::new();
    opts.only_changed = only_changed;
    let packed = list.pack(format, &opts)?;
    match packed {
        dmodel::Packed::Dict(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        dmodel::Packed::Bin(bytes) => {
            info!("packed {} byte(s) in binary form", bytes.len());
            println!("{}", bytes.iter().map(|b| format!("{:02x}", b)).collect::<String>());
        }
    }
    Ok(())
}

fn cmd_round_trip() -> Result<()> {
    let src = build_sample();
    let packed = src.pack(Format::Dict, &EncodeOpts::new())?;

    let dst_tracks = track_schema();
    let dst_playlist = playlist_schema(dst_tracks);
    let dst = Record::new(dst_playlist);
    let unsolved = dst.unpack(&packed, DecodeMode::Override, None, false)?;
    if !unsolved.is_empty() {
        info!("{} reference(s) left unresolved after decode", unsolved.len());
    }

    println!(
        "round-tripped playlist '{}' with {} track(s)",
        match dst.borrow().get("name")? {
            dmodel::containers::FieldValue::Primitive(PrimitiveValue::String(s)) => s,
            _ => String::new(),
        },
        match dst.borrow().get("tracks")? {
            dmodel::containers::FieldValue::IdMap(m) => m.len(),
            _ => 0,
        }
    );
    Ok(())
}

fn run() -> Result<()> {
    let matches = Command::new("dmodel-demo")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Demonstrate the dmodel schema/record/pack/unpack surface")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("enable debug-level logging")
                .action(clap::ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("pack")
                .about("build a sample record graph and pack it")
                .arg(
                    Arg::new("format")
                        .short('f')
                        .long("format")
                        .value_parser(value_parser!(String))
                        .default_value("dict")
                        .help("output format: 'dict' or 'bin'"),
                )
                .arg(
                    Arg::new("only-changed")
                        .long("only-changed")
                        .help("emit only the fields that changed since construction")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("round-trip")
                .about("pack a sample graph to dictionary form and unpack it back"),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    env_logger::init_from_env(Env::default().filter_or(
        "RUST_LOG",
        if verbose { "debug" } else { "info" },
    ));

    match matches.subcommand() {
        Some(("pack", sub)) => {
            let format_str = sub.get_one::<String>("format").unwrap();
            let format: Format = format_str
                .parse()
                .map_err(|_| Error::new(Cause::BadFormat(format_str.clone())))?;
            let only_changed = sub.get_flag("only-changed");
            cmd_pack(format, only_changed)
        }
        Some(("round-trip", _)) => cmd_round_trip(),
        _ => cmd_round_trip(),
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
