//! Machine-readable session snapshot — the core's output boundary.
//!
//! A snapshot carries mode, bounds, the default SATP, and every recorded
//! walk with its full entity data. The front end renders it; the core can
//! also restore a session from it without re-validating anything.

use serde::{Deserialize, Serialize};

use crate::addr::{Mode, Pa, PageSize, Pte, PteFlags, Satp, Va};
use crate::context::Context;
use crate::error::{GenError, Violation};
use crate::walk::{Walk, WalkData};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SatpSnapshot {
    pub mode: Mode,
    pub asid: u64,
    pub ppn: Option<u64>,
}

/// One VA or PA: the flat value (when fully specified) plus the raw
/// segment array, low level first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddrSnapshot {
    pub value: Option<u64>,
    pub offset: Option<u64>,
    pub segments: Vec<Option<u64>>,
}

/// Decoded attribute bits, 0/1, in PTE order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlagsSnapshot {
    pub v: Option<u8>,
    pub r: Option<u8>,
    pub w: Option<u8>,
    pub x: Option<u8>,
    pub u: Option<u8>,
    pub g: Option<u8>,
    pub a: Option<u8>,
    pub d: Option<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PteSnapshot {
    pub address: Option<u64>,
    pub ppn: Vec<Option<u64>>,
    pub ppn_value: Option<u64>,
    pub attributes: FlagsSnapshot,
    /// The encoded 32/64-bit PTE word.
    pub data: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalkSnapshot {
    pub pagesize: PageSize,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<Violation>,
    pub satp: SatpSnapshot,
    pub va: AddrSnapshot,
    pub pa: AddrSnapshot,
    pub ptes: Vec<PteSnapshot>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub mode: Mode,
    pub memory_size: u64,
    pub lower_bound: u64,
    pub pte_min: u64,
    pub pte_max: u64,
    pub satp: SatpSnapshot,
    pub walks: Vec<WalkSnapshot>,
}

fn snapshot_satp(satp: &Satp) -> SatpSnapshot {
    SatpSnapshot {
        mode: satp.mode,
        asid: satp.asid,
        ppn: satp.ppn,
    }
}

fn snapshot_va(va: &Va) -> AddrSnapshot {
    AddrSnapshot {
        value: va.data(),
        offset: va.offset,
        segments: va.vpn.clone(),
    }
}

fn snapshot_pa(pa: &Pa) -> AddrSnapshot {
    AddrSnapshot {
        value: pa.data(),
        offset: pa.offset,
        segments: pa.ppn.clone(),
    }
}

fn snapshot_flags(flags: &PteFlags) -> FlagsSnapshot {
    let bit = |b: Option<bool>| b.map(u8::from);
    FlagsSnapshot {
        v: bit(flags.v),
        r: bit(flags.r),
        w: bit(flags.w),
        x: bit(flags.x),
        u: bit(flags.u),
        g: bit(flags.g),
        a: bit(flags.a),
        d: bit(flags.d),
    }
}

fn snapshot_pte(pte: &Pte) -> PteSnapshot {
    PteSnapshot {
        address: pte.address,
        ppn: pte.ppn.clone(),
        ppn_value: pte.ppn_value(),
        attributes: snapshot_flags(&pte.flags),
        data: pte.data(),
    }
}

fn snapshot_walk(walk: &Walk) -> WalkSnapshot {
    let d = walk.data();
    WalkSnapshot {
        pagesize: d.pagesize,
        valid: walk.is_valid(),
        error_type: walk.violation(),
        satp: snapshot_satp(&d.satp),
        va: snapshot_va(&d.va),
        pa: snapshot_pa(&d.pa),
        ptes: d.ptes.iter().map(snapshot_pte).collect(),
    }
}

impl Context {
    /// Produce the structured snapshot of the whole session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.mode,
            memory_size: self.memory_size,
            lower_bound: self.lower_bound,
            pte_min: self.pte_min,
            pte_max: self.pte_max,
            satp: snapshot_satp(&self.default_satp),
            walks: self.walks.iter().map(snapshot_walk).collect(),
        }
    }

    /// Rebuild a session from a snapshot: tables and counters are
    /// repopulated by re-registering every walk, with no re-validation.
    pub fn restore(snap: &SessionSnapshot) -> Result<Self, GenError> {
        let satp = restore_satp(snap.mode, &snap.satp);
        let mut ctx = Context::new(
            snap.mode,
            Some(snap.memory_size),
            snap.lower_bound,
            snap.pte_min,
            Some(snap.pte_max),
            Some(satp),
            None,
        )?;
        for (i, w) in snap.walks.iter().enumerate() {
            let data = restore_walk(snap.mode, w)?;
            if w.valid {
                if !data.va.is_complete() || !data.pa.is_complete() {
                    return Err(GenError::BadSpec(format!(
                        "snapshot walk {} is marked valid but underspecified",
                        i
                    )));
                }
                if data.ptes.iter().any(|p| p.address.is_none()) {
                    return Err(GenError::BadSpec(format!(
                        "snapshot walk {} is marked valid but has a PTE without storage",
                        i
                    )));
                }
                ctx.add_walk(data);
            } else {
                let violation = w.error_type.ok_or_else(|| {
                    GenError::BadSpec(format!("snapshot walk {} lacks an error tag", i))
                })?;
                ctx.add_invalid_walk(data, violation);
            }
        }
        Ok(ctx)
    }
}

fn restore_satp(mode: Mode, snap: &SatpSnapshot) -> Satp {
    Satp::new(mode, snap.asid, snap.ppn)
}

fn restore_flags(snap: &FlagsSnapshot) -> PteFlags {
    let bit = |b: Option<u8>| b.map(|v| v != 0);
    PteFlags {
        v: bit(snap.v),
        r: bit(snap.r),
        w: bit(snap.w),
        x: bit(snap.x),
        u: bit(snap.u),
        g: bit(snap.g),
        a: bit(snap.a),
        d: bit(snap.d),
    }
}

fn restore_segments(mode: Mode, segments: &[Option<u64>]) -> Vec<Option<u64>> {
    let mut out = vec![None; mode.levels()];
    for (i, seg) in segments.iter().enumerate().take(mode.levels()) {
        out[i] = *seg;
    }
    out
}

fn restore_walk(mode: Mode, snap: &WalkSnapshot) -> Result<WalkData, GenError> {
    if !snap.pagesize.valid_for(mode) {
        return Err(GenError::BadSpec(format!(
            "snapshot walk has page size {} in {}",
            snap.pagesize, mode
        )));
    }
    let va = Va {
        mode,
        vpn: restore_segments(mode, &snap.va.segments),
        offset: snap.va.offset,
    };
    let pa = Pa {
        mode,
        ppn: restore_segments(mode, &snap.pa.segments),
        offset: snap.pa.offset,
    };
    let ptes = snap
        .ptes
        .iter()
        .map(|p| Pte {
            mode,
            address: p.address,
            ppn: restore_segments(mode, &p.ppn),
            flags: restore_flags(&p.attributes),
        })
        .collect();
    Ok(WalkData {
        mode,
        pagesize: snap.pagesize,
        satp: restore_satp(mode, &snap.satp),
        va,
        pa,
        ptes,
    })
}
