//! The numeric-addressed register catalogue: immutable register descriptors
//! keyed by path, produced once by the map-file parser and read-only
//! afterwards.

use crate::path::RegisterPath;
use kstring::KString;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// First path component of on-demand numeric addresses
/// (`BAR/<bar>/<offset>[*<nBytes>]`).
pub const NUMERIC_ADDRESS_PREFIX: &str = "BAR";

#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("no register `{0}` in the catalogue")]
    NoSuchRegister(RegisterPath),
    #[error("register `{0}` is defined twice")]
    DuplicateRegister(RegisterPath),
    #[error("illegal numeric address `{path}`: {reason}")]
    BadNumericAddress { path: RegisterPath, reason: String },
}

/// How a register may be accessed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
    WriteOnly,
    /// Push-type register driven by a hardware interrupt.
    Interrupt,
}

impl Access {
    #[must_use]
    pub fn is_readable(self) -> bool {
        !matches!(self, Access::WriteOnly)
    }

    #[must_use]
    pub fn is_writeable(self) -> bool {
        matches!(self, Access::ReadWrite | Access::WriteOnly)
    }
}

/// On-device data interpretation of a register (or of one channel of a 2-D
/// register).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataType {
    FixedPoint,
    Ieee754,
    Void,
    Ascii,
}

/// Layout of a single channel inside one block of a 2-D multiplexed register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Offset of the channel word from the start of the block, in bits.
    pub bit_offset: u32,
    pub data_type: DataType,
    pub width: u32,
    pub fractional_bits: i32,
    pub signed: bool,
}

/// Immutable description of one register.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterInfo {
    pub path: RegisterPath,
    pub n_elements: u32,
    /// Byte offset within `bar`.
    pub address: u64,
    pub n_bytes: u32,
    pub bar: u64,
    pub access: Access,
    /// Ordered controller-line path; empty for polled registers.
    pub interrupt_id: Vec<u32>,
    /// Exactly one entry for scalar and 1-D registers.
    pub channels: Vec<ChannelInfo>,
    /// Samples per channel; 0 unless 2-D.
    pub n_blocks: u32,
    /// Bytes of one sample across all channels; 0 unless 2-D.
    pub bytes_per_block: u32,
}

impl RegisterInfo {
    /// Describes a scalar or 1-D register.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new_1d(
        path: RegisterPath,
        n_elements: u32,
        address: u64,
        n_bytes: u32,
        bar: u64,
        width: u32,
        fractional_bits: i32,
        signed: bool,
        access: Access,
        data_type: DataType,
        interrupt_id: Vec<u32>,
    ) -> Self {
        RegisterInfo {
            path,
            n_elements,
            address,
            n_bytes,
            bar,
            access,
            interrupt_id,
            channels: vec![ChannelInfo {
                bit_offset: 0,
                data_type,
                width,
                fractional_bits,
                signed,
            }],
            n_blocks: 0,
            bytes_per_block: 0,
        }
    }

    /// Describes a 2-D multiplexed register.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new_2d(
        path: RegisterPath,
        address: u64,
        n_bytes: u32,
        bar: u64,
        n_blocks: u32,
        bytes_per_block: u32,
        channels: Vec<ChannelInfo>,
        access: Access,
        interrupt_id: Vec<u32>,
    ) -> Self {
        let n_channels = u32::try_from(channels.len()).unwrap_or(u32::MAX);
        RegisterInfo {
            path,
            n_elements: n_blocks * n_channels,
            address,
            n_bytes,
            bar,
            access,
            interrupt_id,
            channels,
            n_blocks,
            bytes_per_block,
        }
    }

    #[must_use]
    pub fn is_2d(&self) -> bool {
        self.n_blocks > 0
    }

    #[must_use]
    pub fn n_dimensions(&self) -> usize {
        if self.is_2d() {
            2
        } else if self.n_elements > 1 {
            1
        } else {
            0
        }
    }

    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.channels[0].data_type
    }

    /// Push-type subscriptions are only possible on interrupt registers.
    #[must_use]
    pub fn supports_wait_for_new_data(&self) -> bool {
        self.access == Access::Interrupt
    }

    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.access.is_readable()
    }

    /// VOID interrupt registers accept writes as a documented no-op, so they
    /// count as writeable.
    #[must_use]
    pub fn is_writeable(&self) -> bool {
        self.access.is_writeable()
            || (self.access == Access::Interrupt && self.data_type() == DataType::Void)
    }
}

/// The default set of valid physical address windows.
#[must_use]
pub fn bar_index_valid(bar: u64) -> bool {
    bar <= 5 || bar == 13
}

/// Mapping from register path to [`RegisterInfo`], unique keys, iterable in
/// insertion order.
#[derive(Debug, Default)]
pub struct RegisterCatalogue {
    index: HashMap<KString, usize>,
    registers: Vec<RegisterInfo>,
    interrupts: BTreeSet<Vec<u32>>,
}

impl RegisterCatalogue {
    #[must_use]
    pub fn new() -> Self {
        RegisterCatalogue::default()
    }

    /// Adds a register descriptor.
    ///
    /// # Errors
    /// Fails if a register of the same path is already present.
    pub fn add(&mut self, info: RegisterInfo) -> Result<(), CatalogueError> {
        let key = KString::from_ref(info.path.as_str());
        if self.index.contains_key(&key) {
            return Err(CatalogueError::DuplicateRegister(info.path));
        }
        if !info.interrupt_id.is_empty() {
            self.interrupts.insert(info.interrupt_id.clone());
        }
        self.index.insert(key, self.registers.len());
        self.registers.push(info);
        Ok(())
    }

    #[must_use]
    pub fn has_register(&self, path: &RegisterPath) -> bool {
        self.index.contains_key(path.as_str())
    }

    /// Looks up a stored register by exact path.
    #[must_use]
    pub fn find(&self, path: &RegisterPath) -> Option<&RegisterInfo> {
        self.index.get(path.as_str()).map(|&i| &self.registers[i])
    }

    /// Resolves a path to a register descriptor.
    ///
    /// Numeric addresses of the form `BAR/<bar>/<offset>[*<nBytes>]` are
    /// synthesized on demand as flat int32 registers without entering the
    /// persistent store.
    ///
    /// # Errors
    /// Fails for unknown paths and malformed numeric addresses.
    pub fn get(&self, path: &RegisterPath) -> Result<RegisterInfo, CatalogueError> {
        if path.first_component() == NUMERIC_ADDRESS_PREFIX {
            return synthesize_numeric(path);
        }
        self.find(path)
            .cloned()
            .ok_or_else(|| CatalogueError::NoSuchRegister(path.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterInfo> {
        self.registers.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// All interrupt ids known to the catalogue, ordered.
    #[must_use]
    pub fn interrupt_ids(&self) -> &BTreeSet<Vec<u32>> {
        &self.interrupts
    }

    /// The set of primary interrupt lines (first id level).
    #[must_use]
    pub fn primary_interrupts(&self) -> BTreeSet<u32> {
        self.interrupts.iter().map(|id| id[0]).collect()
    }
}

impl PartialEq for RegisterCatalogue {
    fn eq(&self, other: &Self) -> bool {
        self.registers == other.registers
    }
}

fn synthesize_numeric(path: &RegisterPath) -> Result<RegisterInfo, CatalogueError> {
    let bad = |reason: &str| CatalogueError::BadNumericAddress {
        path: path.clone(),
        reason: reason.to_string(),
    };

    let components: Vec<&str> = path.components().collect();
    if components.len() != 3 {
        return Err(bad("expected BAR/<bar>/<offset>[*<nBytes>]"));
    }
    let bar: u64 = components[1].parse().map_err(|_| bad("bar is not a number"))?;
    if !bar_index_valid(bar) {
        return Err(bad("bar index out of range"));
    }
    let (offset_str, n_bytes) = match components[2].split_once('*') {
        Some((offset, len)) => {
            let n: u32 = len.parse().map_err(|_| bad("byte count is not a number"))?;
            (offset, n)
        }
        None => (components[2], 4),
    };
    let address: u64 = offset_str.parse().map_err(|_| bad("offset is not a number"))?;
    if n_bytes == 0 || n_bytes % 4 != 0 {
        return Err(bad("byte count must be a non-zero multiple of 4"));
    }
    Ok(RegisterInfo::new_1d(
        path.clone(),
        n_bytes / 4,
        address,
        n_bytes,
        bar,
        32,
        0,
        true,
        Access::ReadWrite,
        DataType::FixedPoint,
        Vec::new(),
    ))
}

/// Metadata lines (`@<key> <value>`) from a map file, stored verbatim.
/// Keys may repeat, e.g. one `INTERRUPT_HANDLER` entry per controller.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MetadataCatalogue {
    entries: Vec<(KString, String)>,
}

impl MetadataCatalogue {
    pub fn add(&mut self, key: &str, value: String) {
        self.entries.push((KString::from_ref(key), value));
    }

    /// First value stored for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values stored for `key`, in file order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(name: &str) -> RegisterInfo {
        RegisterInfo::new_1d(
            RegisterPath::new(name),
            1,
            0,
            4,
            0,
            32,
            0,
            true,
            Access::ReadWrite,
            DataType::FixedPoint,
            Vec::new(),
        )
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut cat = RegisterCatalogue::new();
        cat.add(flat("A")).unwrap();
        assert!(matches!(
            cat.add(flat("A")),
            Err(CatalogueError::DuplicateRegister(_))
        ));
    }

    #[test]
    fn test_insertion_order() {
        let mut cat = RegisterCatalogue::new();
        cat.add(flat("B")).unwrap();
        cat.add(flat("A")).unwrap();
        let names: Vec<_> = cat.iter().map(|r| r.path.as_str().to_string()).collect();
        assert_eq!(names, ["B", "A"]);
    }

    #[test]
    fn test_numeric_address() {
        let cat = RegisterCatalogue::new();
        let info = cat.get(&RegisterPath::new("BAR/0/32")).unwrap();
        assert_eq!(info.bar, 0);
        assert_eq!(info.address, 32);
        assert_eq!(info.n_bytes, 4);
        assert_eq!(info.n_elements, 1);
        assert!(!cat.has_register(&RegisterPath::new("BAR/0/32")));

        let info = cat.get(&RegisterPath::new("BAR/13/8*16")).unwrap();
        assert_eq!(info.bar, 13);
        assert_eq!(info.n_bytes, 16);
        assert_eq!(info.n_elements, 4);
    }

    #[test]
    fn test_numeric_address_rejects() {
        let cat = RegisterCatalogue::new();
        for path in ["BAR/0", "BAR/6/0", "BAR/0/0*3", "BAR/0/0*0", "BAR/0/x"] {
            assert!(cat.get(&RegisterPath::new(path)).is_err(), "{path}");
        }
    }

    #[test]
    fn test_interrupt_ids() {
        let mut cat = RegisterCatalogue::new();
        let mut info = flat("IRQ");
        info.access = Access::Interrupt;
        info.interrupt_id = vec![0, 5];
        cat.add(info).unwrap();
        assert_eq!(cat.interrupt_ids().len(), 1);
        assert!(cat.primary_interrupts().contains(&0));
    }
}
