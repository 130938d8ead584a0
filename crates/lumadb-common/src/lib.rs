//! LumaDB Common - Shared utilities and types for the item mapper
//!
//! This crate provides the functionality every mapper crate leans on:
//! - Error taxonomy (mapping, schema, collaborator and format failures)
//! - Configuration management
//! - Tracing initialisation

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::MapperConfig;
pub use error::{Direction, Error, FormatError, HookError, MappingError, Result, SchemaError};
