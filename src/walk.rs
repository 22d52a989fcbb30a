//! Translation-walk builder — chains PTEs level by level, completes the
//! arithmetic, and classifies the result.

use std::collections::BTreeSet;

use rand::Rng;

use crate::addr::{mask, Mode, Pa, PageSize, Pte, Satp, Va, PAGE_OFFSET_BITS, PAGE_SIZE};
use crate::error::{GenError, Violation};
use crate::resolver::ConstraintResolver;

/// The entity tuple of one walk, root-to-leaf.
#[derive(Clone, Debug)]
pub struct WalkData {
    pub mode: Mode,
    pub pagesize: PageSize,
    pub satp: Satp,
    pub va: Va,
    pub pa: Pa,
    /// Ordered root→leaf; length = `pte_count(mode, pagesize)`.
    pub ptes: Vec<Pte>,
}

/// A classified walk. The builder always returns this tagged form — there
/// is no separate invalid-walk type to test for.
#[derive(Clone, Debug)]
pub enum Walk {
    Valid(WalkData),
    Invalid(WalkData, Violation),
}

impl Walk {
    pub fn data(&self) -> &WalkData {
        match self {
            Walk::Valid(d) | Walk::Invalid(d, _) => d,
        }
    }

    pub fn violation(&self) -> Option<Violation> {
        match self {
            Walk::Valid(_) => None,
            Walk::Invalid(_, v) => Some(*v),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Walk::Valid(_))
    }
}

/// Number of PTEs in a walk of the given page size.
pub fn pte_count(mode: Mode, pagesize: PageSize) -> usize {
    mode.levels() - pagesize.levels_consumed()
}

/// Complete and classify a walk.
///
/// Fills every structurally incomplete field — unset VA segments, the PA
/// (coupled to the VA below the leaf level, random above it), missing PTE
/// storage addresses, PPN fields derived from the next entity in the
/// chain — then validates the RISC-V walk rules level by level.
///
/// `occupied` is the session's occupancy view; freshly allocated addresses
/// are staged locally and never collide with it or each other. The caller
/// commits them by recording the returned walk, so a rejected walk leaks
/// nothing.
pub fn resolve(
    resolver: &mut ConstraintResolver,
    occupied: impl Fn(u64) -> bool,
    pagesize: PageSize,
    satp: Satp,
    mut va: Va,
    mut pa: Pa,
    mut ptes: Vec<Pte>,
) -> Result<Walk, GenError> {
    let mode = resolver.mode;
    if !pagesize.valid_for(mode) {
        return Err(GenError::BadSpec(format!(
            "page size {} does not exist in {}",
            pagesize, mode
        )));
    }
    let expected = pte_count(mode, pagesize);
    if ptes.len() != expected {
        return Err(GenError::BadSpec(format!(
            "walk needs {} PTEs for a {} page in {}, got {}",
            expected,
            pagesize,
            mode,
            ptes.len()
        )));
    }
    let leaf_level = pagesize.levels_consumed();
    let levels = mode.levels();
    let mut staged: BTreeSet<u64> = BTreeSet::new();

    // Complete the VA, taking segments the PA pins down where they overlap.
    if va.offset.is_none() {
        va.offset = Some(match pa.offset {
            Some(off) => off,
            None => resolver.rng().gen_range(0..PAGE_SIZE),
        });
    }
    for i in 0..levels {
        if va.vpn[i].is_none() {
            // Below the leaf level the VPN and PPN segments are the same
            // width and must agree.
            va.vpn[i] = match pa.ppn.get(i).copied().flatten() {
                Some(seg) if i < leaf_level => Some(seg),
                _ => Some(resolver.rng().gen::<u64>() & mask(mode.vpn_widths()[i])),
            };
        }
    }

    // Couple the PA to the VA: equal offset, equal segments below the leaf.
    if pa.offset.is_none() {
        pa.offset = va.offset;
    }
    for i in 0..leaf_level {
        if pa.ppn[i].is_none() {
            pa.ppn[i] = va.vpn[i];
        }
    }
    // Randomize the remaining top segments within the memory bounds.
    if !pa.is_complete() {
        let mut placed = false;
        for _ in 0..crate::resolver::MAX_ALLOC_ATTEMPTS {
            let draw = Pa::from_data(mode, resolver.random_address());
            let mut cand = pa.clone();
            for i in leaf_level..levels {
                if cand.ppn[i].is_none() {
                    cand.ppn[i] = draw.ppn[i];
                }
            }
            let value = cand.data().expect("candidate PA is fully specified");
            if value >= resolver.lower_bound
                && value < resolver.memory_size
                && !occupied(value)
                && !staged.contains(&value)
            {
                pa = cand;
                placed = true;
                break;
            }
        }
        if !placed {
            return Err(GenError::InvalidConstraints(
                "no free physical page for the walk target".into(),
            ));
        }
    }
    let pa_value = pa.data().expect("PA is fully specified");

    // Allocate storage for every PTE that does not have it yet.
    for pte in &mut ptes {
        match pte.address {
            Some(addr) => {
                if !occupied(addr) {
                    staged.insert(addr);
                }
            }
            None => {
                let addr = resolver
                    .pte_address(|a| occupied(a) || staged.contains(&a) || a == pa_value)?;
                pte.address = Some(addr);
                staged.insert(addr);
            }
        }
    }

    // Derive PPN fields: each interior entry points at the next one's
    // storage; the leaf takes the PA's segments at and above its level and
    // zeroes below it (planted sub-leaf garbage survives to validation).
    let last = ptes.len() - 1;
    for i in 0..last {
        if ptes[i].ppn_value().is_none() {
            let next = ptes[i + 1].address.expect("chain addresses are resolved");
            ptes[i].broadcast_ppn(next >> PAGE_OFFSET_BITS, 0);
        }
    }
    for i in 0..leaf_level {
        if ptes[last].ppn[i].is_none() {
            ptes[last].ppn[i] = Some(0);
        }
    }
    for i in leaf_level..levels {
        if ptes[last].ppn[i].is_none() {
            ptes[last].ppn[i] = pa.ppn[i];
        }
    }

    // Fill unset attribute bits: interior entries become pointers, the
    // leaf gets a readable mapping with random W/X/U texture.
    for pte in ptes.iter_mut().take(last) {
        let f = &mut pte.flags;
        f.v.get_or_insert(true);
        for slot in [
            &mut f.r, &mut f.w, &mut f.x, &mut f.u, &mut f.g, &mut f.a, &mut f.d,
        ] {
            slot.get_or_insert(false);
        }
    }
    {
        let rng = resolver.rng();
        let f = &mut ptes[last].flags;
        let readable = *f.r.get_or_insert(true);
        f.v.get_or_insert(true);
        f.a.get_or_insert(true);
        f.d.get_or_insert(true);
        f.g.get_or_insert(false);
        if f.w.is_none() {
            f.w = Some(readable && rng.gen_bool(0.5));
        }
        if f.x.is_none() {
            f.x = Some(rng.gen_bool(0.5));
        }
        if f.u.is_none() {
            f.u = Some(rng.gen_bool(0.5));
        }
    }

    let violation = validate_chain(&mut ptes, leaf_level);
    let data = WalkData {
        mode,
        pagesize,
        satp,
        va,
        pa,
        ptes,
    };
    Ok(match violation {
        None => Walk::Valid(data),
        Some(v) => Walk::Invalid(data, v),
    })
}

/// Level-by-level rule check, root to leaf, rules in fixed priority order:
/// invalid bit, write-without-read, leaf-as-pointer, uncleared superpage,
/// non-global-after-global. Returns the first violation found.
fn validate_chain(ptes: &mut [Pte], leaf_level: usize) -> Option<Violation> {
    let last = ptes.len() - 1;
    let mut global_seen = false;
    for i in 0..=last {
        if i < last {
            if ptes[i].flags.v != Some(true) {
                return Some(Violation::PteMarkedInvalid);
            }
            if let Err(v) = ptes[i].set_pointer() {
                return Some(v);
            }
        } else {
            if let Err(v) = ptes[i].validate_leaf() {
                return Some(v);
            }
            for j in 0..leaf_level {
                if ptes[i].ppn[j] != Some(0) {
                    return Some(Violation::SuperPageNotCleared);
                }
            }
        }
        if let Err(v) = ptes[i].assert_global(global_seen) {
            return Some(v);
        }
        if ptes[i].flags.g == Some(true) {
            global_seen = true;
        }
    }
    None
}
