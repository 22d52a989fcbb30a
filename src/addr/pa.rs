//! Physical address — PPN segments plus the 12-bit page offset.

use super::{mask, Mode, PAGE_OFFSET_BITS};

/// A physical address split into its per-level PPN segments. Mirrors
/// [`super::Va`] structurally, but the top segment is wider — see
/// [`Mode::ppn_widths`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pa {
    pub mode: Mode,
    pub ppn: Vec<Option<u64>>,
    pub offset: Option<u64>,
}

impl Pa {
    /// A fully unset address.
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ppn: vec![None; mode.levels()],
            offset: None,
        }
    }

    pub fn from_data(mode: Mode, data: u64) -> Self {
        let mut pa = Self::new(mode);
        pa.set(data);
        pa
    }

    /// Decode a flat address into offset and PPN segments.
    pub fn set(&mut self, data: u64) {
        self.offset = Some(data & mask(PAGE_OFFSET_BITS));
        let mut rest = data >> PAGE_OFFSET_BITS;
        self.ppn.clear();
        for &width in self.mode.ppn_widths() {
            self.ppn.push(Some(rest & mask(width)));
            rest >>= width;
        }
    }

    /// Re-flatten the address. Defined only when every segment and the
    /// offset are set.
    pub fn data(&self) -> Option<u64> {
        let mut value = self.offset?;
        let mut shift = PAGE_OFFSET_BITS;
        for (seg, &width) in self.ppn.iter().zip(self.mode.ppn_widths()) {
            value |= (*seg)? << shift;
            shift += width;
        }
        Some(value)
    }

    pub fn is_complete(&self) -> bool {
        self.offset.is_some() && self.ppn.iter().all(|s| s.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sv32_roundtrip() {
        // 34-bit physical address space
        let pa = Pa::from_data(Mode::Sv32, 0x3_8765_4321);
        assert_eq!(pa.data(), Some(0x3_8765_4321));
    }

    #[test]
    fn sv48_top_segment_is_wide() {
        let pa = Pa::from_data(Mode::Sv48, (1u64 << 55) | 0xFFF);
        // bit 55 lands in the 17-bit top segment (shift 12+9+9+9 = 39)
        assert_eq!(pa.ppn[3], Some(1 << 16));
        assert_eq!(pa.data(), Some((1u64 << 55) | 0xFFF));
    }

    #[test]
    fn unset_segment_blocks_data() {
        let mut pa = Pa::new(Mode::Sv39);
        pa.offset = Some(0);
        pa.ppn[0] = Some(1);
        pa.ppn[1] = Some(2);
        assert_eq!(pa.data(), None);
    }
}
