//! Page-table entry — one level's record in the radix table.

use serde::{Deserialize, Serialize};

use super::{mask, Mode};
use crate::error::Violation;

/// Width of the attribute field at the bottom of every PTE encoding
/// (V/R/W/X/U/G/A/D plus the 2-bit RSW field).
const ATTR_BITS: u32 = 10;

/// Flag-name keys, used only at the configuration-ingestion boundary to
/// address individual bits of [`PteFlags`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PteFlag {
    V,
    R,
    W,
    X,
    U,
    G,
    A,
    D,
}

/// The single-bit attribute bundle of a PTE. Each bit is individually
/// unset until assigned; RSW is hardwired to zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PteFlags {
    pub v: Option<bool>,
    pub r: Option<bool>,
    pub w: Option<bool>,
    pub x: Option<bool>,
    pub u: Option<bool>,
    pub g: Option<bool>,
    pub a: Option<bool>,
    pub d: Option<bool>,
}

impl PteFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the low attribute bits of a raw PTE word.
    pub fn set_raw(&mut self, raw: u64) {
        self.v = Some(raw & 1 != 0);
        self.r = Some(raw >> 1 & 1 != 0);
        self.w = Some(raw >> 2 & 1 != 0);
        self.x = Some(raw >> 3 & 1 != 0);
        self.u = Some(raw >> 4 & 1 != 0);
        self.g = Some(raw >> 5 & 1 != 0);
        self.a = Some(raw >> 6 & 1 != 0);
        self.d = Some(raw >> 7 & 1 != 0);
    }

    /// Encode the attribute bits. Defined only when every flag is set.
    pub fn encode(&self) -> Option<u64> {
        Some(
            self.v? as u64
                | (self.r? as u64) << 1
                | (self.w? as u64) << 2
                | (self.x? as u64) << 3
                | (self.u? as u64) << 4
                | (self.g? as u64) << 5
                | (self.a? as u64) << 6
                | (self.d? as u64) << 7,
        )
    }

    pub fn get(&self, flag: PteFlag) -> Option<bool> {
        match flag {
            PteFlag::V => self.v,
            PteFlag::R => self.r,
            PteFlag::W => self.w,
            PteFlag::X => self.x,
            PteFlag::U => self.u,
            PteFlag::G => self.g,
            PteFlag::A => self.a,
            PteFlag::D => self.d,
        }
    }

    pub fn set(&mut self, flag: PteFlag, value: bool) {
        let slot = match flag {
            PteFlag::V => &mut self.v,
            PteFlag::R => &mut self.r,
            PteFlag::W => &mut self.w,
            PteFlag::X => &mut self.x,
            PteFlag::U => &mut self.u,
            PteFlag::G => &mut self.g,
            PteFlag::A => &mut self.a,
            PteFlag::D => &mut self.d,
        };
        *slot = Some(value);
    }

    pub fn is_complete(&self) -> bool {
        self.encode().is_some()
    }
}

/// One page-table entry: its own storage address (the unique key in the
/// session's tables), per-level PPN segments, and the attribute bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pte {
    pub mode: Mode,
    /// Physical location of this entry's storage. Unset until allocated.
    pub address: Option<u64>,
    /// PPN segments, low level first; widths follow [`Mode::ppn_widths`].
    pub ppn: Vec<Option<u64>>,
    pub flags: PteFlags,
}

impl Pte {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            address: None,
            ppn: vec![None; mode.levels()],
            flags: PteFlags::new(),
        }
    }

    /// Decode a raw PTE word at the given storage address.
    pub fn set(&mut self, address: u64, raw: u64) {
        self.address = Some(address);
        self.flags.set_raw(raw & mask(ATTR_BITS));
        let mut rest = raw >> ATTR_BITS;
        self.ppn.clear();
        for &width in self.mode.ppn_widths() {
            self.ppn.push(Some(rest & mask(width)));
            rest >>= width;
        }
    }

    /// Encode the 32/64-bit PTE word. Requires a fully defined PPN and
    /// fully defined attributes.
    pub fn data(&self) -> Option<u64> {
        let mut value = self.flags.encode()?;
        let mut shift = ATTR_BITS;
        for (seg, &width) in self.ppn.iter().zip(self.mode.ppn_widths()) {
            value |= (*seg)? << shift;
            shift += width;
        }
        Some(value)
    }

    /// The full PPN as one integer. Defined only when every segment is set.
    pub fn ppn_value(&self) -> Option<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        for (seg, &width) in self.ppn.iter().zip(self.mode.ppn_widths()) {
            value |= (*seg)? << shift;
            shift += width;
        }
        Some(value)
    }

    /// Spread a full PPN across the segments from `start_level` up.
    /// Only unset segments are assigned: below `start_level` they become
    /// zero, at or above it they take the matching slice of `ppn`. A
    /// segment that already holds a value keeps it — planted sub-leaf
    /// garbage and partial per-level overrides both survive.
    pub fn broadcast_ppn(&mut self, ppn: u64, start_level: usize) {
        let widths = self.mode.ppn_widths();
        for i in 0..start_level.min(widths.len()) {
            if self.ppn[i].is_none() {
                self.ppn[i] = Some(0);
            }
        }
        let mut rest = ppn >> widths[..start_level.min(widths.len())]
            .iter()
            .sum::<u32>();
        for i in start_level..widths.len() {
            if self.ppn[i].is_none() {
                self.ppn[i] = Some(rest & mask(widths[i]));
            }
            rest >>= widths[i];
        }
    }

    /// A leaf carries at least one of R/W/X.
    pub fn is_leaf(&self) -> bool {
        self.flags.r == Some(true) || self.flags.w == Some(true) || self.flags.x == Some(true)
    }

    /// Turn this entry into a pointer to the next table level: clears
    /// X/W/R and D/A/U. Fails if the entry is currently a leaf, or if any
    /// of U/A/D is set (reserved for pointers — software must clear them).
    pub fn set_pointer(&mut self) -> Result<(), Violation> {
        if self.is_leaf() {
            return Err(Violation::UnexpectedLeaf);
        }
        if self.flags.u == Some(true) || self.flags.a == Some(true) || self.flags.d == Some(true) {
            return Err(Violation::InvalidDau);
        }
        self.flags.x = Some(false);
        self.flags.w = Some(false);
        self.flags.r = Some(false);
        self.flags.d = Some(false);
        self.flags.a = Some(false);
        self.flags.u = Some(false);
        Ok(())
    }

    /// Check the leaf-entry rules, in priority order: invalid bit, then
    /// write-without-read, then leaf-encoded-as-pointer.
    pub fn validate_leaf(&self) -> Result<(), Violation> {
        if self.flags.v != Some(true) {
            return Err(Violation::PteMarkedInvalid);
        }
        if self.flags.w == Some(true) && self.flags.r != Some(true) {
            return Err(Violation::WriteNoRead);
        }
        if !self.is_leaf() {
            return Err(Violation::LeafMarkedAsPointer);
        }
        Ok(())
    }

    /// Global-bit propagation: once a level carries G, every deeper level
    /// must too.
    pub fn assert_global(&self, expect: bool) -> Result<(), Violation> {
        if expect && self.flags.g != Some(true) {
            return Err(Violation::NonGlobalAfterGlobal);
        }
        Ok(())
    }
}
