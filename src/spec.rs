//! Structured specification consumed from the front end.
//!
//! Everything here is plain serde data: integers stay integers (hex
//! rendering is a presentation concern outside the core), probabilities
//! are floats in [0, 1].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::addr::{Mode, PageSize, PteFlag};

/// Forced-violation kinds selectable in an `errors` block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectKind {
    MarkInvalid,
    WriteNoRead,
    LeafAsPointer,
    UnclearedSuperpage,
}

/// SATP override: either the bare root PPN or an explicit field bundle.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SatpSpec {
    Ppn(u64),
    Fields {
        #[serde(default)]
        ppn: Option<u64>,
        #[serde(default)]
        asid: Option<u64>,
    },
}

/// Address override: a flat value or partial fields. `segments` holds the
/// VPN (for a VA) or PPN (for a PA) array, low level first; entries may be
/// omitted from the tail.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AddrSpec {
    Value(u64),
    Fields {
        #[serde(default)]
        offset: Option<u64>,
        #[serde(default, alias = "vpn", alias = "ppn")]
        segments: Vec<u64>,
    },
}

/// Per-level PTE override.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PteSpec {
    pub address: Option<u64>,
    /// PPN segments, low level first.
    pub ppns: Option<Vec<u64>>,
    /// Flag probabilities by name; 0/1 pin a bit, anything between is a
    /// per-case coin flip.
    pub attributes: BTreeMap<PteFlag, f64>,
}

/// Error-injection block: either a gate probability with a weighted type
/// choice, or direct per-kind probabilities.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ErrorsSpec {
    pub p: Option<f64>,
    pub types: Vec<InjectKind>,
    pub weights: Option<Vec<f64>>,
    pub mark_invalid: Option<f64>,
    pub write_no_read: Option<f64>,
    pub leaf_as_pointer: Option<f64>,
    pub uncleared_superpage: Option<f64>,
}

/// One or several page sizes; a set is sampled uniformly per case.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PageSizeSpec {
    One(PageSize),
    Choice(Vec<PageSize>),
}

/// Deterministic PA sweep over an interval.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PageRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub step: Option<u64>,
    pub num_pages: Option<u64>,
}

/// Knob overrides applied at specific iteration indices of a bulk case.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SpecialCase {
    pub index: u64,
    #[serde(flatten)]
    pub overrides: TestCaseOverride,
}

/// The optional-field mirror of [`TestCase`], used for `special` merging.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TestCaseOverride {
    pub same_va_pa: Option<f64>,
    pub aliasing: Option<f64>,
    pub reuse_pte: Option<f64>,
    pub pagesize: Option<PageSizeSpec>,
    pub va: Option<AddrSpec>,
    pub pa: Option<AddrSpec>,
    pub ptes: Option<Vec<PteSpec>>,
    pub satp: Option<SatpSpec>,
    pub errors: Option<ErrorsSpec>,
}

/// One probabilistic test-case request.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TestCase {
    /// Probability of forcing VA = PA.
    pub same_va_pa: f64,
    /// Probability of reusing an already-allocated PA.
    pub aliasing: f64,
    /// Probability of splicing a previously recorded PTE into the chain.
    pub reuse_pte: f64,
    pub pagesize: Option<PageSizeSpec>,
    pub va: Option<AddrSpec>,
    pub pa: Option<AddrSpec>,
    pub ptes: Option<Vec<PteSpec>>,
    pub satp: Option<SatpSpec>,
    pub errors: Option<ErrorsSpec>,
    pub repeats: Option<u64>,
    pub page_range: Option<PageRange>,
    pub special: Vec<SpecialCase>,
}

impl TestCase {
    /// Apply per-index overrides on top of this case.
    pub fn merged(&self, ov: &TestCaseOverride) -> TestCase {
        let mut out = self.clone();
        if let Some(v) = ov.same_va_pa {
            out.same_va_pa = v;
        }
        if let Some(v) = ov.aliasing {
            out.aliasing = v;
        }
        if let Some(v) = ov.reuse_pte {
            out.reuse_pte = v;
        }
        if let Some(v) = &ov.pagesize {
            out.pagesize = Some(v.clone());
        }
        if let Some(v) = &ov.va {
            out.va = Some(v.clone());
        }
        if let Some(v) = &ov.pa {
            out.pa = Some(v.clone());
        }
        if let Some(v) = &ov.ptes {
            out.ptes = Some(v.clone());
        }
        if let Some(v) = &ov.satp {
            out.satp = Some(v.clone());
        }
        if let Some(v) = &ov.errors {
            out.errors = Some(v.clone());
        }
        out
    }
}

/// The full session request: mode, bounds, default SATP, test cases.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SessionSpec {
    pub mode: Mode,
    #[serde(default)]
    pub memory_size: Option<u64>,
    #[serde(default)]
    pub lower_bound: u64,
    #[serde(default)]
    pub pte_min: u64,
    #[serde(default)]
    pub pte_max: Option<u64>,
    #[serde(default)]
    pub satp: Option<SatpSpec>,
    /// RNG seed; omit for an entropy-seeded session.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}
