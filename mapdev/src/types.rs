//! Small value types shared across the crate.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// The cooked type of registers that carry no data (pure triggers).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Void;

/// Whether a value delivered to a consumer is trustworthy.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum DataValidity {
    #[default]
    Ok,
    Faulty,
}

/// Globally unique, strictly monotonic stamp attached to every distributed
/// value. Consumers observe non-decreasing version numbers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionNumber(u64);

static VERSION_COUNTER: AtomicU64 = AtomicU64::new(1);

impl VersionNumber {
    /// The version smaller than every generated one, marking "no data yet".
    pub const ZERO: VersionNumber = VersionNumber(0);

    /// Draws the next version from the process-wide counter.
    #[allow(clippy::new_without_default)]
    #[must_use]
    pub fn new() -> Self {
        VersionNumber(VERSION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Unique identity of one accessor instance; keys the subscription maps.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TransferElementId(u64);

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

impl TransferElementId {
    #[allow(clippy::new_without_default)]
    #[must_use]
    pub fn new() -> Self {
        TransferElementId(ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Options selecting how an accessor is created.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct AccessFlags {
    /// Subscribe to the push path instead of polling.
    pub wait_for_new_data: bool,
    /// Disable all cooked conversion; the user type must be `i32`.
    pub raw: bool,
}

impl AccessFlags {
    #[must_use]
    pub fn raw() -> Self {
        AccessFlags {
            raw: true,
            ..AccessFlags::default()
        }
    }

    #[must_use]
    pub fn wait_for_new_data() -> Self {
        AccessFlags {
            wait_for_new_data: true,
            ..AccessFlags::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_numbers_increase() {
        let a = VersionNumber::new();
        let b = VersionNumber::new();
        assert!(b > a);
        assert!(a > VersionNumber::ZERO);
    }

    #[test]
    fn test_transfer_element_ids_unique() {
        assert_ne!(TransferElementId::new(), TransferElementId::new());
    }
}
