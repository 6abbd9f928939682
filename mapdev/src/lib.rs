//! # mapdev
//!
//! Register-level access to memory-mapped FPGA/VME/PCIe boards whose address
//! space is described by a textual map file. The crate turns symbolic
//! register accesses into correctly typed values over pluggable transports,
//! and delivers hardware-interrupt driven updates to subscribers through a
//! push pipeline.
//!
//! The usual flow: parse a map file (via [`mapdev_utils::mapfile`]), wrap a
//! [`transport::Transport`] in a [`device::Device`], then create synchronous
//! [`accessor::RegisterAccessor`]s or push subscriptions
//! ([`device::Device::subscribe`]).

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod accessor;
pub mod codec;
pub mod device;
pub mod error;
pub mod prelude;
pub mod push;
pub mod transport;
pub mod types;

pub use error::{Error, Result};

pub use mapdev_utils::catalogue;
pub use mapdev_utils::mapfile;
pub use mapdev_utils::path::RegisterPath;
