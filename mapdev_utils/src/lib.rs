//! # mapdev utilities
//!
//! This library contains the register-layout side of the `mapdev` crates: the
//! textual map-file grammar, the numeric-addressed register catalogue it
//! produces, and the register-path type shared by both.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod catalogue;
pub mod mapfile;
pub mod path;
