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
//! Primitive field types and the tagged value that holds one of them.

use std::fmt;

use parse_display::Display;
use serde_json::Value as Json;

use crate::error::{Cause, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PrimitiveType {
    #[display("int8")]
    Int8,
    #[display("uint8")]
    UInt8,
    #[display("int16")]
    Int16,
    #[display("uint16")]
    UInt16,
    #[display("int32")]
    Int32,
    #[display("uint32")]
    UInt32,
    #[display("int64")]
    Int64,
    #[display("uint64")]
    UInt64,
    #[display("float")]
    Float,
    #[display("double")]
    Double,
    #[display("bool")]
    Bool,
    #[display("string")]
    String,
}

impl PrimitiveType {
    /// Canonical zero value, per the "canonical default" invariant.
    pub fn default_value(self) -> PrimitiveValue {
        match self {
            PrimitiveType::Int8 => PrimitiveValue::Int8(0),
            PrimitiveType::UInt8 => PrimitiveValue::UInt8(0),
            PrimitiveType::Int16 => PrimitiveValue::Int16(0),
            PrimitiveType::UInt16 => PrimitiveValue::UInt16(0),
            PrimitiveType::Int32 => PrimitiveValue::Int32(0),
            PrimitiveType::UInt32 => PrimitiveValue::UInt32(0),
            PrimitiveType::Int64 => PrimitiveValue::Int64(0),
            PrimitiveType::UInt64 => PrimitiveValue::UInt64(0),
            PrimitiveType::Float => PrimitiveValue::Float(0.0),
            PrimitiveType::Double => PrimitiveValue::Double(0.0),
            PrimitiveType::Bool => PrimitiveValue::Bool(false),
            PrimitiveType::String => PrimitiveValue::String(String::new()),
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, PrimitiveType::Bool | PrimitiveType::String)
    }

    pub fn is_integral(self) -> bool {
        self.is_numeric() && !matches!(self, PrimitiveType::Float | PrimitiveType::Double)
    }
}

/// A value of one of the primitive wire types.
///
/// `Eq`/`Hash` are implemented by hand below (floats compare/hash on their bit pattern) so a
/// `PrimitiveValue` can serve as a map key, matching the spec's requirement that map/id-map
/// keys be primitive.
#[derive(Debug, Clone)]
pub enum PrimitiveValue {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    String(String),
}

impl PrimitiveValue {
    pub fn type_of(&self) -> PrimitiveType {
        match self {
            PrimitiveValue::Int8(_) => PrimitiveType::Int8,
            PrimitiveValue::UInt8(_) => PrimitiveType::UInt8,
            PrimitiveValue::Int16(_) => PrimitiveType::Int16,
            PrimitiveValue::UInt16(_) => PrimitiveType::UInt16,
            PrimitiveValue::Int32(_) => PrimitiveType::Int32,
            PrimitiveValue::UInt32(_) => PrimitiveType::UInt32,
            PrimitiveValue::Int64(_) => PrimitiveType::Int64,
            PrimitiveValue::UInt64(_) => PrimitiveType::UInt64,
            PrimitiveValue::Float(_) => PrimitiveType::Float,
            PrimitiveValue::Double(_) => PrimitiveType::Double,
            PrimitiveValue::Bool(_) => PrimitiveType::Bool,
            PrimitiveValue::String(_) => PrimitiveType::String,
        }
    }

    pub fn as_string_key(&self) -> String {
        match self {
            PrimitiveValue::Int8(v) => v.to_string(),
            PrimitiveValue::UInt8(v) => v.to_string(),
            PrimitiveValue::Int16(v) => v.to_string(),
            PrimitiveValue::UInt16(v) => v.to_string(),
            PrimitiveValue::Int32(v) => v.to_string(),
            PrimitiveValue::UInt32(v) => v.to_string(),
            PrimitiveValue::Int64(v) => v.to_string(),
            PrimitiveValue::UInt64(v) => v.to_string(),
            PrimitiveValue::Float(v) => v.to_string(),
            PrimitiveValue::Double(v) => v.to_string(),
            PrimitiveValue::Bool(v) => v.to_string(),
            PrimitiveValue::String(v) => v.clone(),
        }
    }

    pub fn from_string_key(ty: PrimitiveType, s: &str) -> Result<PrimitiveValue> {
        let bad = || Error::new(Cause::Malformed(format!("'{}' is not a valid {} key", s, ty)));
        Ok(match ty {
            PrimitiveType::Int8 => PrimitiveValue::Int8(s.parse().map_err(|_| bad())?),
            PrimitiveType::UInt8 => PrimitiveValue::UInt8(s.parse().map_err(|_| bad())?),
            PrimitiveType::Int16 => PrimitiveValue::Int16(s.parse().map_err(|_| bad())?),
            PrimitiveType::UInt16 => PrimitiveValue::UInt16(s.parse().map_err(|_| bad())?),
            PrimitiveType::Int32 => PrimitiveValue::Int32(s.parse().map_err(|_| bad())?),
            PrimitiveType::UInt32 => PrimitiveValue::UInt32(s.parse().map_err(|_| bad())?),
            PrimitiveType::Int64 => PrimitiveValue::Int64(s.parse().map_err(|_| bad())?),
            PrimitiveType::UInt64 => PrimitiveValue::UInt64(s.parse().map_err(|_| bad())?),
            PrimitiveType::Float => PrimitiveValue::Float(s.parse().map_err(|_| bad())?),
            PrimitiveType::Double => PrimitiveValue::Double(s.parse().map_err(|_| bad())?),
            PrimitiveType::Bool => PrimitiveValue::Bool(s.parse().map_err(|_| bad())?),
            PrimitiveType::String => PrimitiveValue::String(s.to_string()),
        })
    }

    pub fn to_json(&self) -> Json {
        match self {
            PrimitiveValue::Int8(v) => Json::from(*v),
            PrimitiveValue::UInt8(v) => Json::from(*v),
            PrimitiveValue::Int16(v) => Json::from(*v),
            PrimitiveValue::UInt16(v) => Json::from(*v),
            PrimitiveValue::Int32(v) => Json::from(*v),
            PrimitiveValue::UInt32(v) => Json::from(*v),
            PrimitiveValue::Int64(v) => Json::from(*v),
            PrimitiveValue::UInt64(v) => Json::from(*v),
            PrimitiveValue::Float(v) => serde_json::Number::from_f64(*v as f64)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            PrimitiveValue::Double(v) => serde_json::Number::from_f64(*v)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            PrimitiveValue::Bool(v) => Json::from(*v),
            PrimitiveValue::String(v) => Json::from(v.clone()),
        }
    }

    pub fn from_json(ty: PrimitiveType, v: &Json) -> Result<PrimitiveValue> {
        let bad = || Error::new(Cause::Malformed(format!("expected a {} value, got {}", ty, v)));
        Ok(match ty {
            PrimitiveType::Int8 => PrimitiveValue::Int8(v.as_i64().ok_or_else(bad)? as i8),
            PrimitiveType::UInt8 => PrimitiveValue::UInt8(v.as_u64().ok_or_else(bad)? as u8),
            PrimitiveType::Int16 => PrimitiveValue::Int16(v.as_i64().ok_or_else(bad)? as i16),
            PrimitiveType::UInt16 => PrimitiveValue::UInt16(v.as_u64().ok_or_else(bad)? as u16),
            PrimitiveType::Int32 => PrimitiveValue::Int32(v.as_i64().ok_or_else(bad)? as i32),
            PrimitiveType::UInt32 => PrimitiveValue::UInt32(v.as_u64().ok_or_else(bad)? as u32),
            PrimitiveType::Int64 => PrimitiveValue::Int64(v.as_i64().ok_or_else(bad)?),
            PrimitiveType::UInt64 => PrimitiveValue::UInt64(v.as_u64().ok_or_else(bad)?),
            PrimitiveType::Float => PrimitiveValue::Float(v.as_f64().ok_or_else(bad)? as f32),
            PrimitiveType::Double => PrimitiveValue::Double(v.as_f64().ok_or_else(bad)?),
            PrimitiveType::Bool => PrimitiveValue::Bool(v.as_bool().ok_or_else(bad)?),
            PrimitiveType::String => {
                PrimitiveValue::String(v.as_str().ok_or_else(bad)?.to_string())
            }
        })
    }
}

impl fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string_key())
    }
}

impl PartialEq for PrimitiveValue {
    fn eq(&self, other: &Self) -> bool {
        use PrimitiveValue::*;
        match (self, other) {
            (Int8(a), Int8(b)) => a == b,
            (UInt8(a), UInt8(b)) => a == b,
            (Int16(a), Int16(b)) => a == b,
            (UInt16(a), UInt16(b)) => a == b,
            (Int32(a), Int32(b)) => a == b,
            (UInt32(a), UInt32(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (UInt64(a), UInt64(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (Bool(a), Bool(b)) => a == b,
            (String(a), String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for PrimitiveValue {}

impl std::hash::Hash for PrimitiveValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        use PrimitiveValue::*;
        std::mem::discriminant(self).hash(state);
        match self {
            Int8(v) => v.hash(state),
            UInt8(v) => v.hash(state),
            Int16(v) => v.hash(state),
            UInt16(v) => v.hash(state),
            Int32(v) => v.hash(state),
            UInt32(v) => v.hash(state),
            Int64(v) => v.hash(state),
            UInt64(v) => v.hash(state),
            Float(v) => v.to_bits().hash(state),
            Double(v) => v.to_bits().hash(state),
            Bool(v) => v.hash(state),
            String(v) => v.hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let v = PrimitiveValue::Int32(-42);
        let j = v.to_json();
        let back = PrimitiveValue::from_json(PrimitiveType::Int32, &j).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn string_key_round_trip() {
        let v = PrimitiveValue::UInt64(123456789);
        let s = v.as_string_key();
        let back = PrimitiveValue::from_string_key(PrimitiveType::UInt64, &s).unwrap();
        assert_eq!(v, back);
    }
}
