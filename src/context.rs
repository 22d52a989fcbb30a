//! Session context — owns every allocation table and turns probabilistic
//! test-case requests into concrete, self-consistent walks.

use std::collections::BTreeMap;

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::addr::{Mode, Pa, PageSize, Pte, Satp, Va, PAGE_OFFSET_BITS};
use crate::error::{GenError, Violation};
use crate::resolver::ConstraintResolver;
use crate::spec::{
    AddrSpec, ErrorsSpec, InjectKind, PageSizeSpec, SatpSpec, SessionSpec, TestCase,
};
use crate::walk::{self, Walk, WalkData};

/// Attempts at finding a depth-compatible donor PTE before giving up.
pub const PTE_REUSE_MAX_ATTEMPTS: usize = 5;
/// Attempts per test case before the bulk operation fails.
pub const ADD_CASE_MAX_ATTEMPTS: usize = 5;

/// What a physical address in the session table is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Page,
    PageTable,
}

/// One immutable-growing test session: global allocation tables, walk
/// history, reference counters, and the probabilistic generator. Tables
/// are only ever appended to — nothing is removed between creation and
/// final serialization.
#[derive(Debug)]
pub struct Context {
    pub mode: Mode,
    pub memory_size: u64,
    pub lower_bound: u64,
    pub pte_min: u64,
    pub pte_max: u64,
    pub default_satp: Satp,
    resolver: ConstraintResolver,
    /// Union of every allocated PTE/PA storage address, for collision
    /// detection.
    pub address_table: BTreeMap<u64, EntityKind>,
    pub vas: BTreeMap<u64, Va>,
    pub pas: BTreeMap<u64, Pa>,
    pub ptes: BTreeMap<u64, Pte>,
    pub satps: Vec<Satp>,
    pub walks: Vec<Walk>,
    /// Recorded-walk use counts by physical address (pages and tables).
    pub pa_refs: BTreeMap<u64, u64>,
    /// Recorded-walk use counts by virtual address.
    pub va_refs: BTreeMap<u64, u64>,
}

impl Context {
    /// Create a session. `memory_size` defaults to the mode's full
    /// physical address space, `pte_max` to `memory_size`; the default
    /// SATP gets a random page-aligned root when none is supplied.
    pub fn new(
        mode: Mode,
        memory_size: Option<u64>,
        lower_bound: u64,
        pte_min: u64,
        pte_max: Option<u64>,
        satp: Option<Satp>,
        seed: Option<u64>,
    ) -> Result<Self, GenError> {
        let memory_size = memory_size.unwrap_or_else(|| mode.max_pa());
        if memory_size > mode.max_pa() {
            return Err(GenError::BadSpec(format!(
                "memory_size {:#x} exceeds the {} physical address space",
                memory_size, mode
            )));
        }
        let pte_max = pte_max.unwrap_or(memory_size);
        let mut resolver =
            ConstraintResolver::new(mode, memory_size, lower_bound, pte_min, pte_max, seed)?;
        let default_satp = match satp {
            Some(s) => s,
            None => Satp::new(mode, 0, Some(resolver.default_root_ppn()?)),
        };
        Ok(Self {
            mode,
            memory_size,
            lower_bound,
            pte_min,
            pte_max,
            default_satp,
            resolver,
            address_table: BTreeMap::new(),
            vas: BTreeMap::new(),
            pas: BTreeMap::new(),
            ptes: BTreeMap::new(),
            satps: Vec::new(),
            walks: Vec::new(),
            pa_refs: BTreeMap::new(),
            va_refs: BTreeMap::new(),
        })
    }

    /// Build a session straight from a parsed spec (test cases not yet run).
    pub fn from_spec(spec: &SessionSpec) -> Result<Self, GenError> {
        let satp = spec
            .satp
            .as_ref()
            .map(|s| satp_from_spec(spec.mode, s))
            .transpose()?;
        Self::new(
            spec.mode,
            spec.memory_size,
            spec.lower_bound,
            spec.pte_min,
            spec.pte_max,
            satp,
            spec.seed,
        )
    }

    /// Number of PTEs in a walk with the given leaf page size.
    pub fn num_ptes(&self, pagesize: PageSize) -> usize {
        walk::pte_count(self.mode, pagesize)
    }

    /// Register a valid walk built by the resolver. No validation is
    /// repeated here; the caller guarantees the walk came out of
    /// [`walk::resolve`].
    pub fn add_walk(&mut self, data: WalkData) {
        let va_value = data.va.data().expect("recorded VA is fully specified");
        let pa_value = data.pa.data().expect("recorded PA is fully specified");
        self.vas.insert(va_value, data.va.clone());
        self.address_table.insert(pa_value, EntityKind::Page);
        self.pas.insert(pa_value, data.pa.clone());
        self.satps.push(data.satp.clone());
        for pte in &data.ptes {
            let addr = pte.address.expect("recorded PTE has storage");
            self.address_table.insert(addr, EntityKind::PageTable);
            self.ptes.insert(addr, pte.clone());
            *self.pa_refs.entry(addr).or_insert(0) += 1;
        }
        *self.pa_refs.entry(pa_value).or_insert(0) += 1;
        *self.va_refs.entry(va_value).or_insert(0) += 1;
        log::debug!(
            "recorded walk #{}: va={:#x} pa={:#x} ({} PTEs)",
            self.walks.len(),
            va_value,
            pa_value,
            data.ptes.len()
        );
        self.walks.push(Walk::Valid(data));
    }

    /// Register an invalid walk. Only the entities it actually defines are
    /// recorded; the target PA stays out of the page tables.
    pub fn add_invalid_walk(&mut self, data: WalkData, violation: Violation) {
        if let Some(va_value) = data.va.data() {
            self.vas.insert(va_value, data.va.clone());
            *self.va_refs.entry(va_value).or_insert(0) += 1;
        }
        self.satps.push(data.satp.clone());
        for pte in &data.ptes {
            if let Some(addr) = pte.address {
                self.address_table.insert(addr, EntityKind::PageTable);
                self.ptes.insert(addr, pte.clone());
                *self.pa_refs.entry(addr).or_insert(0) += 1;
            }
        }
        log::debug!(
            "recorded invalid walk #{}: {}",
            self.walks.len(),
            violation
        );
        self.walks.push(Walk::Invalid(data, violation));
    }

    /// The probabilistic generator: one knob bundle in, one recorded walk
    /// out (or a hard failure, in which case nothing is recorded).
    pub fn add_test_case(&mut self, case: &TestCase) -> Result<(), GenError> {
        let same_va_pa = self.resolver.chance(case.same_va_pa);
        let aliasing = self.resolver.chance(case.aliasing);
        let reuse_pte = self.resolver.chance(case.reuse_pte);

        let satp = match &case.satp {
            None => self.default_satp.clone(),
            Some(s) => {
                let mut satp = satp_from_spec(self.mode, s)?;
                if satp.ppn.is_none() {
                    satp.ppn = Some(self.resolver.default_root_ppn()?);
                }
                satp
            }
        };

        let pagesize = match &case.pagesize {
            None => PageSize::Size4K,
            Some(PageSizeSpec::One(p)) => *p,
            Some(PageSizeSpec::Choice(set)) => *set
                .choose(self.resolver.rng())
                .ok_or_else(|| GenError::BadSpec("empty pagesize set".into()))?,
        };
        if !pagesize.valid_for(self.mode) {
            return Err(GenError::BadSpec(format!(
                "page size {} does not exist in {}",
                pagesize, self.mode
            )));
        }

        // Materialize the PA: explicit value, aliased reuse, or fresh.
        let mut pa = match &case.pa {
            Some(AddrSpec::Value(v)) => match self.pas.get(v) {
                Some(existing) => existing.clone(),
                None => Pa::from_data(self.mode, *v),
            },
            Some(AddrSpec::Fields { offset, segments }) => {
                let mut pa = Pa::new(self.mode);
                pa.offset = *offset;
                for (i, seg) in segments.iter().enumerate().take(self.mode.levels()) {
                    pa.ppn[i] = Some(*seg);
                }
                pa
            }
            None if aliasing && !self.pas.is_empty() => {
                let keys: Vec<u64> = self.pas.keys().copied().collect();
                let pick = *keys.choose(self.resolver.rng()).expect("pas is non-empty");
                self.pas[&pick].clone()
            }
            None => Pa::new(self.mode),
        };

        // Materialize the VA: explicit, derived from the PA, or fresh.
        let mut va = match &case.va {
            Some(AddrSpec::Value(v)) => match self.vas.get(v) {
                Some(existing) => existing.clone(),
                None => Va::from_data(self.mode, *v),
            },
            Some(AddrSpec::Fields { offset, segments }) => {
                let mut va = Va::new(self.mode);
                va.offset = *offset;
                for (i, seg) in segments.iter().enumerate().take(self.mode.levels()) {
                    va.vpn[i] = Some(*seg);
                }
                va
            }
            None => Va::new(self.mode),
        };

        if same_va_pa {
            match (pa.data(), va.data()) {
                (Some(_), Some(_)) => {}
                (Some(p), None) => va.set(p),
                (None, Some(v)) => pa.set(v),
                (None, None) => {
                    let addr = self
                        .resolver
                        .random_address_below(1u64 << self.mode.va_bits())?;
                    va.set(addr);
                    pa.set(addr);
                }
            }
        }

        // Materialize the PTE chain.
        let count = self.num_ptes(pagesize);
        let mut slots: Vec<Option<Pte>> = vec![None; count];
        if reuse_pte {
            self.splice_reused_pte(pagesize, aliasing, &mut slots, &mut pa)?;
        } else if let Some(pte_specs) = &case.ptes {
            if pte_specs.len() > count {
                return Err(GenError::BadSpec(format!(
                    "{} PTE overrides for a {}-level chain",
                    pte_specs.len(),
                    count
                )));
            }
            for (i, ps) in pte_specs.iter().enumerate() {
                let mut pte = match ps.address.and_then(|a| self.ptes.get(&a)) {
                    // Same storage address means the same entry — reuse,
                    // never double-define.
                    Some(existing) => existing.clone(),
                    None => {
                        let mut pte = Pte::new(self.mode);
                        pte.address = ps.address;
                        if let Some(ppns) = &ps.ppns {
                            for (j, seg) in ppns.iter().enumerate().take(self.mode.levels()) {
                                pte.ppn[j] = Some(*seg);
                            }
                        }
                        pte
                    }
                };
                for (flag, p) in &ps.attributes {
                    let value = self.resolver.chance(*p);
                    pte.flags.set(*flag, value);
                }
                slots[i] = Some(pte);
            }
        }
        let mut ptes: Vec<Pte> = slots
            .into_iter()
            .map(|s| s.unwrap_or_else(|| Pte::new(self.mode)))
            .collect();

        // Forced error mutations on the terminal PTE.
        let injected = self.roll_injections(case.errors.as_ref(), pagesize)?;
        for kind in &injected {
            let leaf = ptes.last_mut().expect("chain is non-empty");
            match kind {
                InjectKind::MarkInvalid => leaf.flags.v = Some(false),
                InjectKind::WriteNoRead => {
                    leaf.flags.r = Some(false);
                    leaf.flags.w = Some(true);
                }
                InjectKind::LeafAsPointer => {
                    leaf.flags.x = Some(false);
                    leaf.flags.w = Some(false);
                    leaf.flags.r = Some(false);
                }
                InjectKind::UnclearedSuperpage => {
                    leaf.ppn[0] = Some(self.resolver.rng().gen_range(10..=200));
                }
            }
        }

        let table = &self.address_table;
        let built = walk::resolve(
            &mut self.resolver,
            |a| table.contains_key(&a),
            pagesize,
            satp,
            va,
            pa,
            ptes,
        )?;

        match (built, injected.is_empty()) {
            (Walk::Valid(data), true) => {
                self.add_walk(data);
                Ok(())
            }
            (Walk::Invalid(data, violation), false) => {
                self.add_invalid_walk(data, violation);
                Ok(())
            }
            (Walk::Invalid(_, violation), true) => {
                Err(GenError::UnexpectedViolation(violation))
            }
            (Walk::Valid(_), false) => Err(GenError::InvalidConstraints(
                "forced error did not produce an invalid walk".into(),
            )),
        }
    }

    /// Pick a donor PTE from a previously recorded walk and splice it into
    /// the new chain. The donor's depth must be compatible with the slot:
    /// a leaf slot takes only another chain's leaf (and under aliasing
    /// adopts that walk's PA), interior slots take only interior entries.
    fn splice_reused_pte(
        &mut self,
        pagesize: PageSize,
        aliasing: bool,
        slots: &mut [Option<Pte>],
        pa: &mut Pa,
    ) -> Result<(), GenError> {
        if self.walks.is_empty() {
            return Err(GenError::InvalidConstraints(
                "PTE reuse requested but no walks are recorded".into(),
            ));
        }
        let leaf_index = self.num_ptes(pagesize) - 1;
        for _ in 0..PTE_REUSE_MAX_ATTEMPTS {
            let donor_walk = self
                .walks
                .choose(self.resolver.rng())
                .expect("walks is non-empty");
            let donor_ptes = &donor_walk.data().ptes;
            let donor_leaf = donor_ptes.len() - 1;
            let picked = self.resolver.rng().gen_range(0..=donor_leaf);

            let slot = if picked == donor_leaf {
                // Donor leaf goes into our leaf slot, and only when the
                // chains have the same depth.
                if donor_leaf != leaf_index {
                    continue;
                }
                if aliasing {
                    if let Some(pa_value) = donor_walk.data().pa.data() {
                        if let Some(existing) = self.pas.get(&pa_value) {
                            *pa = existing.clone();
                        }
                    }
                }
                leaf_index
            } else if leaf_index == 0 {
                // Our chain is all leaf; an interior donor cannot fit.
                continue;
            } else {
                self.resolver.rng().gen_range(0..leaf_index)
            };

            let addr = donor_ptes[picked].address.expect("recorded PTE has storage");
            let donor = self.ptes[&addr].clone();
            slots[slot] = Some(donor);
            return Ok(());
        }
        Err(GenError::InvalidConstraints(format!(
            "no depth-compatible donor PTE in {} attempts",
            PTE_REUSE_MAX_ATTEMPTS
        )))
    }

    /// Resolve an `errors` block into the set of mutations to apply.
    fn roll_injections(
        &mut self,
        errors: Option<&ErrorsSpec>,
        pagesize: PageSize,
    ) -> Result<Vec<InjectKind>, GenError> {
        let Some(errs) = errors else {
            return Ok(Vec::new());
        };
        let mut applied = Vec::new();
        if let Some(p) = errs.p {
            // Gate probability, then one weighted choice among the types.
            if self.resolver.chance(p) {
                if errs.types.is_empty() {
                    return Err(GenError::BadSpec(
                        "errors.p given without errors.types".into(),
                    ));
                }
                let kind = match &errs.weights {
                    Some(weights) => {
                        if weights.len() != errs.types.len() {
                            return Err(GenError::BadSpec(format!(
                                "{} error weights for {} types",
                                weights.len(),
                                errs.types.len()
                            )));
                        }
                        let dist = WeightedIndex::new(weights).map_err(|e| {
                            GenError::BadSpec(format!("bad error weights: {}", e))
                        })?;
                        errs.types[dist.sample(self.resolver.rng())]
                    }
                    None => *errs
                        .types
                        .choose(self.resolver.rng())
                        .expect("types is non-empty"),
                };
                applied.push(kind);
            }
        } else {
            // Direct per-kind probabilities; each fires independently.
            let direct = [
                (InjectKind::MarkInvalid, errs.mark_invalid),
                (InjectKind::WriteNoRead, errs.write_no_read),
                (InjectKind::LeafAsPointer, errs.leaf_as_pointer),
                (InjectKind::UnclearedSuperpage, errs.uncleared_superpage),
            ];
            for (kind, p) in direct {
                if self.resolver.chance(p.unwrap_or(0.0)) {
                    applied.push(kind);
                }
            }
        }
        if applied.contains(&InjectKind::UnclearedSuperpage)
            && pagesize.levels_consumed() == 0
        {
            // Re-rolled by the per-case retry loop; a different pagesize
            // pick or gate roll may still satisfy the request.
            return Err(GenError::InvalidConstraints(
                "uncleared_superpage injection requires a superpage leaf".into(),
            ));
        }
        Ok(applied)
    }

    /// One bulk entry from the spec: a repeat loop or a PA sweep, with
    /// per-index `special` overrides and bounded per-case retries.
    pub fn run_case(&mut self, case: &TestCase) -> Result<(), GenError> {
        let special: BTreeMap<u64, &crate::spec::TestCaseOverride> = case
            .special
            .iter()
            .map(|s| (s.index, &s.overrides))
            .collect();

        if let Some(range) = &case.page_range {
            let start = range.start.unwrap_or(self.lower_bound);
            let end = range.end.unwrap_or(self.memory_size);
            let mut addr = start;
            let mut iters = 0u64;
            while addr < end && range.num_pages.map_or(true, |n| iters < n) {
                let mut use_case = match special.get(&iters) {
                    Some(ov) => case.merged(ov),
                    None => case.clone(),
                };
                use_case.pa = Some(AddrSpec::Value(addr));
                self.try_case(&use_case)?;
                let step = range.step.unwrap_or_else(|| {
                    self.walks
                        .last()
                        .map(|w| w.data().pagesize.bytes())
                        .unwrap_or(1 << PAGE_OFFSET_BITS)
                });
                addr += step;
                iters += 1;
            }
        } else {
            for i in 0..case.repeats.unwrap_or(1) {
                let use_case = match special.get(&i) {
                    Some(ov) => case.merged(ov),
                    None => case.clone(),
                };
                self.try_case(&use_case)?;
            }
        }
        Ok(())
    }

    /// Run every test case of a spec in order.
    pub fn run(&mut self, cases: &[TestCase]) -> Result<(), GenError> {
        for (i, case) in cases.iter().enumerate() {
            log::info!("running test case {} of {}", i + 1, cases.len());
            self.run_case(case)?;
        }
        log::info!("session complete: {} walks recorded", self.walks.len());
        Ok(())
    }

    /// Retry loop around one case: constraint exhaustion and accidental
    /// superpage violations are re-rolled, anything else is fatal.
    fn try_case(&mut self, case: &TestCase) -> Result<(), GenError> {
        let mut last = None;
        for _ in 0..ADD_CASE_MAX_ATTEMPTS {
            match self.add_test_case(case) {
                Ok(()) => return Ok(()),
                Err(
                    e @ (GenError::InvalidConstraints(_)
                    | GenError::UnexpectedViolation(Violation::SuperPageNotCleared)),
                ) => last = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(GenError::InvalidConstraints(format!(
            "could not satisfy constraints after {} attempts (last: {})",
            ADD_CASE_MAX_ATTEMPTS,
            last.expect("at least one attempt ran")
        )))
    }
}

fn satp_from_spec(mode: Mode, spec: &SatpSpec) -> Result<Satp, GenError> {
    let satp = match spec {
        SatpSpec::Ppn(ppn) => Satp::new(mode, 0, Some(*ppn)),
        SatpSpec::Fields { ppn, asid } => Satp::new(mode, asid.unwrap_or(0), *ppn),
    };
    if let Some(ppn) = satp.ppn {
        if ppn >= (1u64 << mode.satp_ppn_width()) {
            return Err(GenError::BadSpec(format!(
                "SATP PPN {:#x} does not fit {} bits",
                ppn,
                mode.satp_ppn_width()
            )));
        }
    }
    Ok(satp)
}
