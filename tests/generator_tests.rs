use std::collections::BTreeSet;

use walkgen::addr::Mode;
use walkgen::context::Context;
use walkgen::error::{GenError, Violation};
use walkgen::spec::{AddrSpec, ErrorsSpec, InjectKind, PageRange, PageSizeSpec, SessionSpec, TestCase};
use walkgen::walk::Walk;

/// Helper: a session with PTE storage fenced away from low memory so
/// sweep targets never collide with table allocations.
fn session(mode: Mode, memory_size: u64, seed: u64) -> Context {
    Context::new(
        mode,
        Some(memory_size),
        0,
        0x10_0000,
        Some(0x80_0000),
        None,
        Some(seed),
    )
    .unwrap()
}

fn case() -> TestCase {
    TestCase::default()
}

// ============== Spec scenarios ==============

#[test]
fn sv39_same_va_pa_4k_walk() {
    let mut ctx = session(Mode::Sv39, 1 << 34, 11);
    let tc = TestCase {
        same_va_pa: 1.0,
        pagesize: Some(PageSizeSpec::One(walkgen::addr::PageSize::Size4K)),
        ..case()
    };
    ctx.run(std::slice::from_ref(&tc)).unwrap();

    assert_eq!(ctx.walks.len(), 1);
    let walk = &ctx.walks[0];
    assert!(walk.is_valid());
    let d = walk.data();
    assert_eq!(d.va.data().unwrap(), d.pa.data().unwrap());
    assert_eq!(d.ptes.len(), 3);
    assert!(d.ptes[2].is_leaf());
    assert!(!d.ptes[0].is_leaf());
    assert!(!d.ptes[1].is_leaf());
}

#[test]
fn sv32_page_range_sweep_produces_ordered_walks() {
    let mut ctx = session(Mode::Sv32, 1 << 30, 5);
    let tc = TestCase {
        page_range: Some(PageRange {
            start: Some(0x1000),
            end: Some(0x5000),
            step: Some(0x1000),
            num_pages: None,
        }),
        ..case()
    };
    ctx.run(std::slice::from_ref(&tc)).unwrap();

    assert_eq!(ctx.walks.len(), 4);
    for (i, walk) in ctx.walks.iter().enumerate() {
        assert!(walk.is_valid());
        assert_eq!(walk.data().pa.data().unwrap(), 0x1000 * (i as u64 + 1));
    }
}

// ============== Chain consistency ==============

#[test]
fn recorded_chains_are_arithmetically_consistent() {
    let mut ctx = session(Mode::Sv48, 1 << 36, 23);
    let tc = TestCase {
        pagesize: Some(PageSizeSpec::Choice(vec![
            walkgen::addr::PageSize::Size4K,
            walkgen::addr::PageSize::Size2M,
            walkgen::addr::PageSize::Size1G,
        ])),
        repeats: Some(12),
        ..case()
    };
    ctx.run(std::slice::from_ref(&tc)).unwrap();
    assert_eq!(ctx.walks.len(), 12);

    for walk in &ctx.walks {
        let d = walk.data();
        assert!(walk.is_valid());
        let last = d.ptes.len() - 1;
        for i in 0..last {
            assert_eq!(
                d.ptes[i].ppn_value().unwrap() << 12,
                d.ptes[i + 1].address.unwrap(),
                "interior PTE must point at the next entry's storage"
            );
        }
        // Leaf PPN above the leaf level plus the VA's in-page bits
        // reproduce the PA.
        let leaf_level = d.pagesize.levels_consumed();
        let leaf_ppn = d.ptes[last].ppn_value().unwrap();
        let wide = d.va.wide_offset(leaf_level).unwrap();
        assert_eq!((leaf_ppn << 12) | wide, d.pa.data().unwrap());
        // Leaf/pointer exclusivity.
        assert!(d.ptes[last].is_leaf());
        for pte in &d.ptes[..last] {
            assert!(!pte.is_leaf());
            assert_eq!(pte.flags.d, Some(false));
            assert_eq!(pte.flags.a, Some(false));
            assert_eq!(pte.flags.u, Some(false));
        }
    }
}

#[test]
fn no_two_recorded_ptes_share_storage() {
    let mut ctx = session(Mode::Sv39, 1 << 34, 31);
    let tc = TestCase {
        repeats: Some(10),
        ..case()
    };
    ctx.run(std::slice::from_ref(&tc)).unwrap();

    let mut seen = BTreeSet::new();
    let mut total = 0usize;
    for walk in &ctx.walks {
        for pte in &walk.data().ptes {
            seen.insert(pte.address.unwrap());
            total += 1;
        }
    }
    assert_eq!(seen.len(), total);
}

// ============== Allocation exhaustion ==============

#[test]
fn tiny_pte_range_fails_with_invalid_constraints() {
    // One page-aligned slot, but a 4K Sv32 walk needs two PTEs.
    let mut ctx = Context::new(
        Mode::Sv32,
        Some(1 << 30),
        0,
        0x1000,
        Some(0x2000),
        None,
        Some(3),
    )
    .unwrap();
    let err = ctx.run(&[case()]).unwrap_err();
    assert!(matches!(err, GenError::InvalidConstraints(_)));
    assert!(ctx.walks.is_empty(), "failed case must record nothing");
}

#[test]
fn sv32_bounds_above_the_va_space_fail_cleanly() {
    // 34-bit physical space with every usable address above the 32-bit
    // virtual space: a VA-bounded draw has nothing to pick from.
    let mut ctx = Context::new(
        Mode::Sv32,
        Some(1 << 34),
        1 << 33,
        0x10_0000,
        Some(0x80_0000),
        None,
        Some(71),
    )
    .unwrap();
    let tc = TestCase {
        same_va_pa: 1.0,
        ..case()
    };
    let err = ctx.run(std::slice::from_ref(&tc)).unwrap_err();
    assert!(matches!(err, GenError::InvalidConstraints(_)));
    assert!(ctx.walks.is_empty());
}

// ============== Aliasing and reference counts ==============

#[test]
fn aliasing_reuses_the_existing_pa() {
    let mut ctx = session(Mode::Sv39, 1 << 34, 17);
    ctx.run(&[case()]).unwrap();
    assert_eq!(ctx.pas.len(), 1);
    let pa_value = *ctx.pas.keys().next().unwrap();
    assert_eq!(ctx.pa_refs[&pa_value], 1);

    let tc = TestCase {
        aliasing: 1.0,
        ..case()
    };
    ctx.run(std::slice::from_ref(&tc)).unwrap();

    assert_eq!(ctx.pas.len(), 1, "no new PA entity under aliasing");
    assert_eq!(ctx.pa_refs[&pa_value], 2);
    assert_eq!(ctx.walks[1].data().pa.data(), Some(pa_value));
}

// ============== PTE reuse ==============

#[test]
fn reuse_pte_splices_a_recorded_entry() {
    let mut ctx = session(Mode::Sv32, 1 << 30, 29);
    ctx.run(&[case()]).unwrap();
    let first: BTreeSet<u64> = ctx.walks[0]
        .data()
        .ptes
        .iter()
        .map(|p| p.address.unwrap())
        .collect();

    let tc = TestCase {
        reuse_pte: 1.0,
        ..case()
    };
    ctx.run(std::slice::from_ref(&tc)).unwrap();
    let second: BTreeSet<u64> = ctx.walks[1]
        .data()
        .ptes
        .iter()
        .map(|p| p.address.unwrap())
        .collect();

    assert!(
        first.intersection(&second).next().is_some(),
        "reuse must splice an entry from the donor chain"
    );
}

#[test]
fn reuse_pte_without_history_is_constraint_exhaustion() {
    let mut ctx = session(Mode::Sv39, 1 << 34, 37);
    let tc = TestCase {
        reuse_pte: 1.0,
        ..case()
    };
    let err = ctx.run(std::slice::from_ref(&tc)).unwrap_err();
    assert!(matches!(err, GenError::InvalidConstraints(_)));
}

// ============== Error injection ==============

#[test]
fn forced_write_no_read_always_yields_the_tagged_invalid_walk() {
    let mut ctx = session(Mode::Sv39, 1 << 34, 41);
    let tc = TestCase {
        errors: Some(ErrorsSpec {
            p: Some(1.0),
            types: vec![InjectKind::WriteNoRead],
            weights: Some(vec![1.0]),
            ..ErrorsSpec::default()
        }),
        repeats: Some(5),
        ..case()
    };
    ctx.run(std::slice::from_ref(&tc)).unwrap();

    assert_eq!(ctx.walks.len(), 5);
    for walk in &ctx.walks {
        assert_eq!(walk.violation(), Some(Violation::WriteNoRead));
        let leaf = walk.data().ptes.last().unwrap();
        assert_eq!(leaf.flags.r, Some(false));
        assert_eq!(leaf.flags.w, Some(true));
    }
    // Invalid walks never register their target PA.
    assert!(ctx.pas.is_empty());
}

#[test]
fn forced_superpage_garbage_is_tagged() {
    let mut ctx = session(Mode::Sv39, 1 << 34, 43);
    let tc = TestCase {
        pagesize: Some(PageSizeSpec::One(walkgen::addr::PageSize::Size2M)),
        errors: Some(ErrorsSpec {
            uncleared_superpage: Some(1.0),
            ..ErrorsSpec::default()
        }),
        ..case()
    };
    ctx.run(std::slice::from_ref(&tc)).unwrap();

    let walk = &ctx.walks[0];
    assert_eq!(walk.violation(), Some(Violation::SuperPageNotCleared));
    let leaf = walk.data().ptes.last().unwrap();
    let planted = leaf.ppn[0].unwrap();
    assert!((10..=200).contains(&planted));
}

#[test]
fn mark_invalid_beats_other_leaf_rules() {
    let mut ctx = session(Mode::Sv32, 1 << 30, 47);
    let tc = TestCase {
        errors: Some(ErrorsSpec {
            mark_invalid: Some(1.0),
            write_no_read: Some(1.0),
            ..ErrorsSpec::default()
        }),
        ..case()
    };
    ctx.run(std::slice::from_ref(&tc)).unwrap();
    // Both mutations land on the leaf; the invalid bit is checked first.
    assert_eq!(
        ctx.walks[0].violation(),
        Some(Violation::PteMarkedInvalid)
    );
}

// ============== Special overrides ==============

#[test]
fn special_overrides_apply_at_their_index_only() {
    let mut ctx = session(Mode::Sv39, 1 << 34, 53);
    let spec_text = r#"{
        "same_va_pa": 0,
        "repeats": 3,
        "special": [{"index": 1, "same_va_pa": 1}]
    }"#;
    let tc: TestCase = serde_json::from_str(spec_text).unwrap();
    ctx.run(std::slice::from_ref(&tc)).unwrap();

    assert_eq!(ctx.walks.len(), 3);
    let d = ctx.walks[1].data();
    assert_eq!(d.va.data().unwrap(), d.pa.data().unwrap());
}

// ============== Determinism and serialization ==============

#[test]
fn seeded_sessions_reproduce_bit_for_bit() {
    let cases = vec![TestCase {
        same_va_pa: 0.5,
        aliasing: 0.3,
        pagesize: Some(PageSizeSpec::Choice(vec![
            walkgen::addr::PageSize::Size4K,
            walkgen::addr::PageSize::Size2M,
        ])),
        errors: Some(ErrorsSpec {
            p: Some(0.4),
            types: vec![InjectKind::MarkInvalid, InjectKind::WriteNoRead],
            weights: Some(vec![2.0, 1.0]),
            ..ErrorsSpec::default()
        }),
        repeats: Some(8),
        ..case()
    }];

    let mut a = session(Mode::Sv39, 1 << 34, 99);
    let mut b = session(Mode::Sv39, 1 << 34, 99);
    a.run(&cases).unwrap();
    b.run(&cases).unwrap();

    let ja = serde_json::to_string(&a.snapshot()).unwrap();
    let jb = serde_json::to_string(&b.snapshot()).unwrap();
    assert_eq!(ja, jb);
}

#[test]
fn snapshot_roundtrips_and_restores_the_session() {
    let mut ctx = session(Mode::Sv48, 1 << 36, 61);
    let cases = vec![
        TestCase {
            repeats: Some(3),
            ..case()
        },
        TestCase {
            errors: Some(ErrorsSpec {
                p: Some(1.0),
                types: vec![InjectKind::LeafAsPointer],
                ..ErrorsSpec::default()
            }),
            ..case()
        },
    ];
    ctx.run(&cases).unwrap();

    let snap = ctx.snapshot();
    let text = serde_json::to_string(&snap).unwrap();
    let parsed: walkgen::report::SessionSnapshot = serde_json::from_str(&text).unwrap();

    let restored = Context::restore(&parsed).unwrap();
    assert_eq!(restored.walks.len(), ctx.walks.len());
    assert_eq!(restored.pa_refs, ctx.pa_refs);
    assert_eq!(restored.va_refs, ctx.va_refs);
    assert_eq!(
        serde_json::to_string(&restored.snapshot()).unwrap(),
        text
    );
}

#[test]
fn restore_rejects_a_valid_walk_missing_pte_storage() {
    let mut ctx = session(Mode::Sv39, 1 << 34, 73);
    ctx.run(&[case()]).unwrap();
    let mut snap = ctx.snapshot();
    snap.walks[0].ptes[0].address = None;
    let err = Context::restore(&snap).unwrap_err();
    assert!(matches!(err, GenError::BadSpec(_)));
}

#[test]
fn session_spec_drives_a_full_run() {
    let text = r#"{
        "mode": 32,
        "memory_size": 1073741824,
        "pte_min": 1048576,
        "pte_max": 8388608,
        "seed": 7,
        "test_cases": [
            {"same_va_pa": 1, "repeats": 2},
            {"page_range": {"start": 4096, "end": 16384, "step": 4096}}
        ]
    }"#;
    let spec: SessionSpec = serde_json::from_str(text).unwrap();
    let mut ctx = Context::from_spec(&spec).unwrap();
    ctx.run(&spec.test_cases).unwrap();

    assert_eq!(ctx.walks.len(), 5);
    for walk in &ctx.walks {
        assert!(matches!(walk, Walk::Valid(_)));
    }
    let snap = ctx.snapshot();
    assert_eq!(snap.walks.len(), 5);
    assert_eq!(u64::from(snap.mode), 32);
}

#[test]
fn explicit_pa_value_is_honored() {
    let mut ctx = session(Mode::Sv39, 1 << 34, 67);
    let tc = TestCase {
        pa: Some(AddrSpec::Value(0xBEEF_000)),
        ..case()
    };
    ctx.run(std::slice::from_ref(&tc)).unwrap();
    assert_eq!(ctx.walks[0].data().pa.data(), Some(0xBEEF_000));
}
