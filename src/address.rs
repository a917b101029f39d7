//! Address newtypes.
//!
//! A `GlobalAddress` is unique per object file, but not per process: it is
//! the address as recorded in the DWARF/ELF data. A `RelocatedAddress` is a
//! `GlobalAddress` plus the subordinate's PIE load offset, i.e. the address
//! actually observed in the running process's registers and memory maps.
//! Keeping them as distinct types prevents accidentally comparing a
//! breakpoint's stored (pre-load) address against a live register value.

use std::fmt::{Display, Formatter};

/// Address as observed in a live, running subordinate.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug, Default, PartialOrd, Ord)]
pub struct RelocatedAddress(usize);

impl RelocatedAddress {
    #[inline(always)]
    pub fn remove_load_offset(self, load_addr: usize) -> GlobalAddress {
        GlobalAddress(self.0 - load_addr)
    }

    #[inline(always)]
    pub fn offset(self, offset: isize) -> RelocatedAddress {
        if offset >= 0 {
            self.0 + offset as usize
        } else {
            self.0 - offset.unsigned_abs()
        }
        .into()
    }

    #[inline(always)]
    pub fn as_u64(self) -> u64 {
        u64::from(self)
    }

    #[inline(always)]
    pub fn as_usize(self) -> usize {
        usize::from(self)
    }
}

impl From<usize> for RelocatedAddress {
    fn from(addr: usize) -> Self {
        RelocatedAddress(addr)
    }
}

impl From<u64> for RelocatedAddress {
    fn from(addr: u64) -> Self {
        RelocatedAddress(addr as usize)
    }
}

impl From<RelocatedAddress> for usize {
    fn from(addr: RelocatedAddress) -> Self {
        addr.0
    }
}

impl From<RelocatedAddress> for u64 {
    fn from(addr: RelocatedAddress) -> Self {
        addr.0 as u64
    }
}

impl Display for RelocatedAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:#016X}", self.0))
    }
}

/// Address as recorded in the target's debug information, before the PIE
/// load offset of any particular run is applied.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Debug, Default)]
pub struct GlobalAddress(usize);

impl GlobalAddress {
    #[inline(always)]
    pub fn relocate(self, load_addr: usize) -> RelocatedAddress {
        RelocatedAddress(self.0 + load_addr)
    }

    pub fn in_range(self, range: &gimli::Range) -> bool {
        u64::from(self) >= range.begin && u64::from(self) < range.end
    }

    pub fn in_ranges(self, ranges: &[gimli::Range]) -> bool {
        ranges.iter().any(|range| self.in_range(range))
    }
}

impl From<usize> for GlobalAddress {
    fn from(addr: usize) -> Self {
        GlobalAddress(addr)
    }
}

impl From<u64> for GlobalAddress {
    fn from(addr: u64) -> Self {
        GlobalAddress(addr as usize)
    }
}

impl From<GlobalAddress> for usize {
    fn from(addr: GlobalAddress) -> Self {
        addr.0
    }
}

impl From<GlobalAddress> for u64 {
    fn from(addr: GlobalAddress) -> Self {
        addr.0 as u64
    }
}

impl Display for GlobalAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:#016X}", self.0))
    }
}

/// Either kind of address, for call sites that accept both (e.g. logging,
/// diagnostics) without committing to one representation.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub enum Address {
    Relocated(RelocatedAddress),
    Global(GlobalAddress),
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Relocated(addr) => addr.fmt(f),
            Address::Global(addr) => addr.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relocate_round_trips_through_load_offset() {
        let global = GlobalAddress::from(0x1000u64);
        let relocated = global.relocate(0x5555_0000);
        assert_eq!(relocated.remove_load_offset(0x5555_0000), global);
    }

    #[test]
    fn offset_moves_forward_and_backward() {
        let addr = RelocatedAddress::from(0x1000usize);
        assert_eq!(addr.offset(1), RelocatedAddress::from(0x1001usize));
        assert_eq!(addr.offset(-1), RelocatedAddress::from(0x0fffusize));
    }
}
