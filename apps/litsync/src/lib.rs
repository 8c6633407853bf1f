//! # litsync
//!
//! Command-line front end for `litsync-core`.
//!
//! - `cli`: clap commands and their implementations
//! - `config`: `litsync.toml` loading and flag overrides
//! - `mirror`: HTTP index mirroring into a work directory
//! - `incident`: JSON-lines incident log reporter

pub mod cli;
pub mod config;
pub mod incident;
pub mod mirror;
