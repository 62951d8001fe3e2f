//! FlexGet Schema - configuration validation engine
//!
//! This crate validates user configuration against JSON-Schema documents:
//! - Schema registry with `$ref` resolution and schema factories
//! - Draft-4 validator that also fills `default` values
//! - Branch selection for readable `oneOf`/`anyOf` errors
//! - Named `format` checkers (intervals, sizes, qualities, paths, ...)
//! - Parse helpers shared with the rest of the application

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod check;
pub mod error;
pub mod formats;
pub mod helpers;
pub mod messages;
pub mod parse;
pub mod quality;
pub mod registry;
mod validator;

pub use check::check_schema;
pub use error::{ParseError, PathSegment, Result, SchemaError, ValidationError};
pub use formats::{expand_user, FormatChecker, FormatRegistry};
pub use helpers::{as_list, one_or_more};
pub use parse::{
    parse_episode_identifier, parse_interval, parse_percent, parse_size, parse_size_str,
    parse_time, EpisodeIdKind,
};
pub use quality::{Quality, Requirements};
pub use registry::{SchemaFactory, SchemaRegistry, SCHEMA_DIALECT};
