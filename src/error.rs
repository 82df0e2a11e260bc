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
//! Crate-wide error type.
//!
//! Every fallible operation in this crate returns [`Result`], whose error variant is a single
//! [`Error`] carrying an enumerated [`Cause`], an optional boxed source and an optional
//! backtrace. This mirrors the way a single hand-rolled module error is built up elsewhere in
//! this codebase's lineage, just consolidated into one module since the whole engine is one
//! cohesive library.

use parse_display::Display;

#[derive(Debug, Display)]
pub enum Cause {
    /// An error in another crate propagated through this one-- cf. source.
    #[display("An error in another crate-- cf. source.")]
    Other,
    /// A field index fell outside [1, 65535], or was zero.
    #[display("field index {0} is out of range (must be in [1, 65535])")]
    InvalidIndex(u32),
    /// Two fields on the same schema share an index.
    #[display("duplicate field index {0} ('{1}' collides with an existing field)")]
    DuplicateIndex(u16, String),
    /// Two fields on the same schema share a name.
    #[display("duplicate field name '{0}'")]
    DuplicateName(String),
    /// A field was declared with contradictory cardinality or type attributes.
    #[display("field '{0}' has a contradictory definition: {1}")]
    DefineError(String, String),
    /// `by_name`/`by_index` lookup failed.
    #[display("no such field: '{0}'")]
    NoField(String),
    /// An operation was attempted against a field that does not support it (e.g. arithmetic on
    /// a non-numeric field, or assigning a scalar to a container field).
    #[display("operation not valid on field '{0}': {1}")]
    OperateError(String, String),
    /// `sub_field` would drive an arithmetic field below its configured minimum.
    #[display("arithmetic underflow on field '{0}': {1} - {2} < min {3}")]
    Underflow(String, String, String, String),
    /// `add_field` would overflow the field's underlying integer width.
    #[display("arithmetic overflow on field '{0}'")]
    Overflow(String),
    /// A string exceeded the 65535-byte limit the binary form's length prefix can express.
    #[display("string of {0} bytes exceeds the 65535-byte limit for the binary form")]
    StringTooLong(usize),
    /// The binary decoder encountered a field index not present in the target schema.
    #[display("unknown field index {0} in binary stream for schema '{1}'")]
    UnknownFieldIndex(u16, String),
    /// The binary decoder ran out of bytes before a value was fully read.
    #[display("unexpected end of input while decoding")]
    Eof,
    /// A malformed tag byte (neither a recognized container marker nor a valid field index).
    #[display("malformed binary stream: {0}")]
    Malformed(String),
    /// `pack`/`unpack` was asked for a format string it doesn't recognize.
    #[display("unrecognized format '{0}' (expected 'dict' or 'bin')")]
    BadFormat(String),
    /// Encode or decode failed for a reason specific to one field.
    #[display("failed to pack field '{0}': {1}")]
    PackError(String, String),
    #[display("failed to unpack field '{0}': {1}")]
    UnpackError(String, String),
}

#[derive(Debug, Display)]
#[display("{cause} Source (if any): {source} Stack trace (if any): {trace}")]
pub struct Error {
    /// Enumerated status code
    #[display("dmodel error: {}.")]
    cause: Cause,
    // Still unclear exactly how this satisfies the 'static lifetime bound on
    // std::error::Error::source, but it does.
    #[display("caused by {:#?}.")]
    source: Option<Box<dyn std::error::Error>>,
    #[display("backtrace: {:#?}.")]
    trace: Option<backtrace::Backtrace>,
}

impl Error {
    pub(crate) fn new(cause: Cause) -> Error {
        Error {
            cause,
            source: None,
            trace: Some(backtrace::Backtrace::new()),
        }
    }

    pub(crate) fn with_source<E: std::error::Error + 'static>(cause: Cause, source: E) -> Error {
        Error {
            cause,
            source: Some(Box::new(source)),
            trace: Some(backtrace::Backtrace::new()),
        }
    }

    pub fn cause(&self) -> &Cause {
        &self.cause
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            Some(bx) => Some(bx.as_ref()),
            None => None,
        }
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::with_source(Cause::Other, err)
    }
}

impl std::convert::From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(Cause::Other, err)
    }
}

impl std::convert::From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::with_source(Cause::Other, err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
