//! Virtual address — VPN segments plus the 12-bit page offset.

use super::{mask, Mode, PAGE_OFFSET_BITS};

/// A virtual address split into its per-level VPN segments. Segments are
/// stored low level first and are individually unset until assigned —
/// unset is an explicit state, never zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Va {
    pub mode: Mode,
    pub vpn: Vec<Option<u64>>,
    pub offset: Option<u64>,
}

impl Va {
    /// A fully unset address.
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            vpn: vec![None; mode.levels()],
            offset: None,
        }
    }

    pub fn from_data(mode: Mode, data: u64) -> Self {
        let mut va = Self::new(mode);
        va.set(data);
        va
    }

    /// Decode a flat address into offset and VPN segments.
    pub fn set(&mut self, data: u64) {
        self.offset = Some(data & mask(PAGE_OFFSET_BITS));
        let mut rest = data >> PAGE_OFFSET_BITS;
        self.vpn.clear();
        for &width in self.mode.vpn_widths() {
            self.vpn.push(Some(rest & mask(width)));
            rest >>= width;
        }
    }

    /// Re-flatten the address. Defined only when every segment and the
    /// offset are set.
    pub fn data(&self) -> Option<u64> {
        let mut value = self.offset?;
        let mut shift = PAGE_OFFSET_BITS;
        for (seg, &width) in self.vpn.iter().zip(self.mode.vpn_widths()) {
            value |= (*seg)? << shift;
            shift += width;
        }
        Some(value)
    }

    pub fn is_complete(&self) -> bool {
        self.offset.is_some() && self.vpn.iter().all(|s| s.is_some())
    }

    /// Offset plus every VPN segment below `level`, packed as one wide
    /// offset — the in-page portion of the address for a superpage leaf
    /// at that level.
    pub fn wide_offset(&self, level: usize) -> Option<u64> {
        let mut value = self.offset?;
        let mut shift = PAGE_OFFSET_BITS;
        for (seg, &width) in self.vpn.iter().zip(self.mode.vpn_widths()).take(level) {
            value |= (*seg)? << shift;
            shift += width;
        }
        Some(value)
    }

    /// Assign the offset and every VPN segment below `level` from a wide
    /// in-page offset.
    pub fn set_wide_offset(&mut self, level: usize, data: u64) {
        self.offset = Some(data & mask(PAGE_OFFSET_BITS));
        let mut rest = data >> PAGE_OFFSET_BITS;
        let widths = self.mode.vpn_widths();
        for i in 0..level.min(widths.len()) {
            self.vpn[i] = Some(rest & mask(widths[i]));
            rest >>= widths[i];
        }
    }
}
