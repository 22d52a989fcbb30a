//! Addressing primitives for RISC-V virtual-memory translation.
//!
//! Bit-exact codecs for SATP, virtual/physical addresses, and page-table
//! entries across the three paged addressing modes (Sv32/Sv39/Sv48). All
//! field widths are static functions of mode and level — nothing here is
//! recomputed ad hoc.

pub mod pa;
pub mod pte;
pub mod satp;
pub mod va;

pub use pa::Pa;
pub use pte::{Pte, PteFlag, PteFlags};
pub use satp::Satp;
pub use va::Va;

use serde::{Deserialize, Serialize};

/// Page offset is 12 bits in every mode.
pub const PAGE_OFFSET_BITS: u32 = 12;
/// Base page size (4 KiB).
pub const PAGE_SIZE: u64 = 1 << PAGE_OFFSET_BITS;

/// Low-bit mask helper.
pub fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Paged address-translation mode. Serialized as the bare integer
/// (32/39/48) the way hardware specs name them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum Mode {
    Sv32,
    Sv39,
    Sv48,
}

impl Mode {
    /// Number of page-table levels.
    pub fn levels(self) -> usize {
        match self {
            Mode::Sv32 => 2,
            Mode::Sv39 => 3,
            Mode::Sv48 => 4,
        }
    }

    /// Virtual-page-number segment widths, low level first.
    pub fn vpn_widths(self) -> &'static [u32] {
        match self {
            Mode::Sv32 => &[10, 10],
            Mode::Sv39 => &[9, 9, 9],
            Mode::Sv48 => &[9, 9, 9, 9],
        }
    }

    /// Physical-page-number segment widths, low level first. The top
    /// segment is wider than its VPN counterpart — the physical address
    /// space outgrows the virtual one.
    pub fn ppn_widths(self) -> &'static [u32] {
        match self {
            Mode::Sv32 => &[10, 12],
            Mode::Sv39 => &[9, 9, 17],
            Mode::Sv48 => &[9, 9, 9, 17],
        }
    }

    /// Width of the SATP root PPN field.
    pub fn satp_ppn_width(self) -> u32 {
        match self {
            Mode::Sv32 => 22,
            Mode::Sv39 | Mode::Sv48 => 44,
        }
    }

    /// SATP ASID field width.
    pub fn asid_width(self) -> u32 {
        match self {
            Mode::Sv32 => 9,
            Mode::Sv39 | Mode::Sv48 => 16,
        }
    }

    /// Encoding of the SATP MODE field for this mode.
    pub fn satp_mode_code(self) -> u64 {
        match self {
            Mode::Sv32 => 1,
            Mode::Sv39 => 8,
            Mode::Sv48 => 9,
        }
    }

    /// Virtual address width in bits.
    pub fn va_bits(self) -> u32 {
        match self {
            Mode::Sv32 => 32,
            Mode::Sv39 => 39,
            Mode::Sv48 => 48,
        }
    }

    /// Physical address width in bits (offset plus all PPN segments).
    pub fn pa_bits(self) -> u32 {
        PAGE_OFFSET_BITS + self.ppn_widths().iter().sum::<u32>()
    }

    /// One past the largest representable physical address.
    pub fn max_pa(self) -> u64 {
        1u64 << self.pa_bits()
    }
}

impl TryFrom<u64> for Mode {
    type Error = String;

    fn try_from(v: u64) -> Result<Self, Self::Error> {
        match v {
            32 => Ok(Mode::Sv32),
            39 => Ok(Mode::Sv39),
            48 => Ok(Mode::Sv48),
            other => Err(format!("unsupported translation mode Sv{}", other)),
        }
    }
}

impl From<Mode> for u64 {
    fn from(m: Mode) -> u64 {
        match m {
            Mode::Sv32 => 32,
            Mode::Sv39 => 39,
            Mode::Sv48 => 48,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sv{}", u64::from(*self))
    }
}

/// Leaf page size for a walk. Determines how many table levels the walk
/// consumes before terminating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSize {
    #[serde(rename = "4K")]
    Size4K,
    #[serde(rename = "2M")]
    Size2M,
    #[serde(rename = "4M")]
    Size4M,
    #[serde(rename = "1G")]
    Size1G,
    #[serde(rename = "512G")]
    Size512G,
}

impl PageSize {
    /// Levels skipped by a leaf of this size (0 = deepest table level).
    pub fn levels_consumed(self) -> usize {
        match self {
            PageSize::Size4K => 0,
            PageSize::Size2M | PageSize::Size4M => 1,
            PageSize::Size1G => 2,
            PageSize::Size512G => 3,
        }
    }

    /// Page size in bytes.
    pub fn bytes(self) -> u64 {
        match self {
            PageSize::Size4K => 0x1000,
            PageSize::Size2M => 0x20_0000,
            PageSize::Size4M => 0x40_0000,
            PageSize::Size1G => 1 << 30,
            PageSize::Size512G => 1 << 39,
        }
    }

    /// Whether this page size exists in the given mode.
    pub fn valid_for(self, mode: Mode) -> bool {
        match self {
            PageSize::Size4K => true,
            PageSize::Size4M => mode == Mode::Sv32,
            PageSize::Size2M => mode != Mode::Sv32,
            PageSize::Size1G => mode != Mode::Sv32,
            PageSize::Size512G => mode == Mode::Sv48,
        }
    }
}

impl std::fmt::Display for PageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PageSize::Size4K => "4K",
            PageSize::Size2M => "2M",
            PageSize::Size4M => "4M",
            PageSize::Size1G => "1G",
            PageSize::Size512G => "512G",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_tables_are_consistent() {
        for mode in [Mode::Sv32, Mode::Sv39, Mode::Sv48] {
            assert_eq!(mode.vpn_widths().len(), mode.levels());
            assert_eq!(mode.ppn_widths().len(), mode.levels());
            let va_bits: u32 = PAGE_OFFSET_BITS + mode.vpn_widths().iter().sum::<u32>();
            assert_eq!(va_bits, mode.va_bits());
        }
        assert_eq!(Mode::Sv32.pa_bits(), 34);
        assert_eq!(Mode::Sv39.pa_bits(), 47);
        assert_eq!(Mode::Sv48.pa_bits(), 56);
    }

    #[test]
    fn pagesize_mode_validity() {
        assert!(PageSize::Size4M.valid_for(Mode::Sv32));
        assert!(!PageSize::Size4M.valid_for(Mode::Sv39));
        assert!(!PageSize::Size2M.valid_for(Mode::Sv32));
        assert!(PageSize::Size512G.valid_for(Mode::Sv48));
        assert!(!PageSize::Size512G.valid_for(Mode::Sv39));
    }

    #[test]
    fn mode_roundtrips_through_integer() {
        for raw in [32u64, 39, 48] {
            let mode = Mode::try_from(raw).unwrap();
            assert_eq!(u64::from(mode), raw);
        }
        assert!(Mode::try_from(57).is_err());
    }
}
