//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads and writes the client's TOML settings file
//! and supplies defaults on first run, so the rest of the client never deals
//! with paths or file formats.

pub mod config;
