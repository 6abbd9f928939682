//! Prelude (helpful reexports) for this package

pub use crate::accessor::RegisterAccessor;
pub use crate::codec::Cooked;
pub use crate::device::Device;
pub use crate::error::{Error, Result};
pub use crate::push::manager::AsyncAccessor;
pub use crate::transport::{mock::Mock, uio::Uio, Transport};
pub use crate::types::{AccessFlags, DataValidity, VersionNumber, Void};
pub use mapdev_utils::mapfile::{parse_file, parse_str};
pub use mapdev_utils::path::RegisterPath;
