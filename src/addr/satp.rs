//! SATP — the root page-table pointer register.

use super::{mask, Mode};

/// Supervisor address-translation-and-protection register. Holds the
/// physical page number of the root page table. Immutable once a walk has
/// been built against it; many walks may share one SATP.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Satp {
    pub mode: Mode,
    pub asid: u64,
    /// Root-table PPN. `None` until assigned.
    pub ppn: Option<u64>,
}

impl Satp {
    pub fn new(mode: Mode, asid: u64, ppn: Option<u64>) -> Self {
        Self { mode, asid, ppn }
    }

    /// Decode a raw register value into the ASID and PPN fields.
    pub fn set(&mut self, raw: u64) {
        let ppn_w = self.mode.satp_ppn_width();
        let asid_w = self.mode.asid_width();
        self.ppn = Some(raw & mask(ppn_w));
        self.asid = (raw >> ppn_w) & mask(asid_w);
    }

    /// Encode the register value: MODE | ASID | PPN. Defined only once
    /// the PPN has been assigned.
    pub fn data(&self) -> Option<u64> {
        let ppn = self.ppn?;
        let ppn_w = self.mode.satp_ppn_width();
        let asid_w = self.mode.asid_width();
        let mode_shift = ppn_w + asid_w;
        Some(
            (self.mode.satp_mode_code() << mode_shift)
                | ((self.asid & mask(asid_w)) << ppn_w)
                | (ppn & mask(ppn_w)),
        )
    }

    /// Physical address of the root table (PPN shifted by the page size).
    pub fn root_address(&self) -> Option<u64> {
        self.ppn.map(|p| p << super::PAGE_OFFSET_BITS)
    }
}
