//! Constraint resolver — allocates collision-free physical storage.
//!
//! Every random draw in a session goes through the one `StdRng` owned
//! here, so a fixed seed reproduces the whole session bit-for-bit.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::addr::{Mode, PAGE_OFFSET_BITS};
use crate::error::GenError;

/// How many uniform draws we spend looking for a free slot before
/// declaring the constraints unsatisfiable.
pub const MAX_ALLOC_ATTEMPTS: usize = 64;

/// Allocates addresses for page-table storage and leaf pages inside the
/// configured bounds, avoiding anything the caller reports as occupied.
#[derive(Debug)]
pub struct ConstraintResolver {
    pub mode: Mode,
    pub memory_size: u64,
    pub lower_bound: u64,
    pub pte_min: u64,
    pub pte_max: u64,
    rng: StdRng,
}

impl ConstraintResolver {
    pub fn new(
        mode: Mode,
        memory_size: u64,
        lower_bound: u64,
        pte_min: u64,
        pte_max: u64,
        seed: Option<u64>,
    ) -> Result<Self, GenError> {
        if lower_bound >= memory_size {
            return Err(GenError::BadSpec(format!(
                "lower_bound {:#x} >= memory_size {:#x}",
                lower_bound, memory_size
            )));
        }
        if pte_min >= pte_max || pte_max > memory_size {
            return Err(GenError::BadSpec(format!(
                "PTE bounds [{:#x}, {:#x}) do not fit in memory of size {:#x}",
                pte_min, pte_max, memory_size
            )));
        }
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            mode,
            memory_size,
            lower_bound,
            pte_min,
            pte_max,
            rng,
        })
    }

    /// The session RNG. The walk builder borrows it for segment fills.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// One probability draw: true with probability `p` (clamped to [0,1]).
    pub fn chance(&mut self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        self.rng.gen::<f64>() < p
    }

    /// Uniform address in `[lower_bound, memory_size)`, no collision check.
    /// Used as the fallback when a caller leaves a field unspecified.
    pub fn random_address(&mut self) -> u64 {
        self.rng.gen_range(self.lower_bound..self.memory_size)
    }

    /// Uniform address in `[lower_bound, min(memory_size, limit))` — for
    /// values that must also fit the virtual address space. The memory
    /// bounds may lie entirely above `limit`, leaving nothing to draw.
    pub fn random_address_below(&mut self, limit: u64) -> Result<u64, GenError> {
        let hi = self.memory_size.min(limit);
        if self.lower_bound >= hi {
            return Err(GenError::InvalidConstraints(format!(
                "no address in [{:#x}, {:#x})",
                self.lower_bound, hi
            )));
        }
        Ok(self.rng.gen_range(self.lower_bound..hi))
    }

    /// A free, 4 KiB-aligned address in `[pte_min, pte_max)` for page-table
    /// storage. Retries on collision up to the attempt bound.
    pub fn pte_address(&mut self, in_use: impl Fn(u64) -> bool) -> Result<u64, GenError> {
        let first_page = (self.pte_min + (1 << PAGE_OFFSET_BITS) - 1) >> PAGE_OFFSET_BITS;
        let end_page = self.pte_max >> PAGE_OFFSET_BITS;
        if first_page >= end_page {
            return Err(GenError::InvalidConstraints(format!(
                "no page-aligned slot in PTE range [{:#x}, {:#x})",
                self.pte_min, self.pte_max
            )));
        }
        for _ in 0..MAX_ALLOC_ATTEMPTS {
            let addr = self.rng.gen_range(first_page..end_page) << PAGE_OFFSET_BITS;
            if !in_use(addr) {
                return Ok(addr);
            }
        }
        Err(GenError::InvalidConstraints(format!(
            "PTE range [{:#x}, {:#x}) exhausted after {} attempts",
            self.pte_min, self.pte_max, MAX_ALLOC_ATTEMPTS
        )))
    }

    /// Root PPN for the default SATP when the caller supplies none: a
    /// random page-aligned table address divided by the page size.
    pub fn default_root_ppn(&mut self) -> Result<u64, GenError> {
        Ok(self.pte_address(|_| false)? >> PAGE_OFFSET_BITS)
    }
}
