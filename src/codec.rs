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
//! Binary-form primitive codec: `PrimitiveValue` <-> big-endian bytes.
//!
//! Container head markers and the field terminator live here too, since they are just
//! reserved `u16`/`u8` values read and written through the same [`crate::buffer`] cursors.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::Result;
use crate::value::{PrimitiveType, PrimitiveValue};

/// Marks the start of an array body: `0xD0 (u32 count) (element)*`.
pub const HEAD_ARRAY: u8 = 0xD0;
/// Marks the start of a map body: `0xD1 (u32 count) ((key)(value))*`.
pub const HEAD_MAP: u8 = 0xD1;
/// Marks the start of an id-map body: `0xD2 (u32 count) ((oid)(value))*`.
pub const HEAD_ID_MAP: u8 = 0xD2;
/// Terminates a record's field list.
pub const FIELD_TERMINATOR: u16 = 0x0000;

pub fn encode_primitive(buf: &mut WriteBuffer, v: &PrimitiveValue) -> Result<()> {
    match v {
        PrimitiveValue::Int8(x) => buf.write_i8(*x),
        PrimitiveValue::UInt8(x) => buf.write_u8(*x),
        PrimitiveValue::Int16(x) => buf.write_i16(*x),
        PrimitiveValue::UInt16(x) => buf.write_u16(*x),
        PrimitiveValue::Int32(x) => buf.write_i32(*x),
        PrimitiveValue::UInt32(x) => buf.write_u32(*x),
        PrimitiveValue::Int64(x) => buf.write_i64(*x),
        PrimitiveValue::UInt64(x) => buf.write_u64(*x),
        PrimitiveValue::Float(x) => buf.write_f32(*x),
        PrimitiveValue::Double(x) => buf.write_f64(*x),
        PrimitiveValue::Bool(x) => buf.write_bool(*x),
        PrimitiveValue::String(x) => buf.write_string(x)?,
    }
    Ok(())
}

pub fn decode_primitive(buf: &mut ReadBuffer, ty: PrimitiveType) -> Result<PrimitiveValue> {
    Ok(match ty {
        PrimitiveType::Int8 => PrimitiveValue::Int8(buf.read_i8()?),
        PrimitiveType::UInt8 => PrimitiveValue::UInt8(buf.read_u8()?),
        PrimitiveType::Int16 => PrimitiveValue::Int16(buf.read_i16()?),
        PrimitiveType::UInt16 => PrimitiveValue::UInt16(buf.read_u16()?),
        PrimitiveType::Int32 => PrimitiveValue::Int32(buf.read_i32()?),
        PrimitiveType::UInt32 => PrimitiveValue::UInt32(buf.read_u32()?),
        PrimitiveType::Int64 => PrimitiveValue::Int64(buf.read_i64()?),
        PrimitiveType::UInt64 => PrimitiveValue::UInt64(buf.read_u64()?),
        PrimitiveType::Float => PrimitiveValue::Float(buf.read_f32()?),
        PrimitiveType::Double => PrimitiveValue::Double(buf.read_f64()?),
        PrimitiveType::Bool => PrimitiveValue::Bool(buf.read_bool()?),
        PrimitiveType::String => PrimitiveValue::String(buf.read_string()?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_round_trip() -> std::result::Result<(), String> {
        let values = vec![
            PrimitiveValue::Int8(-5),
            PrimitiveValue::UInt32(0xdeadbeef),
            PrimitiveValue::Double(1.5),
            PrimitiveValue::Bool(true),
            PrimitiveValue::String(String::from("xyzzy")),
        ];
        for v in values {
            let mut wb = WriteBuffer::new();
            encode_primitive(&mut wb, &v).map_err(|e| format!("{}", e))?;
            let bytes = wb.into_vec();
            let mut rb = ReadBuffer::new(&bytes);
            let back = decode_primitive(&mut rb, v.type_of()).map_err(|e| format!("{}", e))?;
            assert_eq!(v, back);
        }
        Ok(())
    }
}
