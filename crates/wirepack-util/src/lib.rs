#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for wirepack.
//!
//! Pure helpers with no logging/tracing dependencies; the CLI owns logging.

pub mod fs;
pub mod hash;
