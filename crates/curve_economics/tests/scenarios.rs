//! End-to-end purchase scenarios against the default curve
//!
//! Starting from the genesis snapshot, these cover the genesis mint, deferred
//! allocation carried across calls, multi-segment purchases, partial fills and
//! the per-call segment cap.

use rust_decimal::Decimal;
use segcurve_economics::*;

fn whole(text: &str) -> Micro {
    fixed::parse_deposit(text).unwrap()
}

fn within(actual: Micro, expected_whole: &str, tolerance_whole: &str) -> bool {
    let actual = fixed::micro_to_whole(actual).unwrap();
    let expected: Decimal = expected_whole.parse().unwrap();
    let tolerance: Decimal = tolerance_whole.parse().unwrap();
    (actual - expected).abs() <= tolerance
}

fn after_genesis(params: &CurveParameters) -> CurveState {
    SegmentResolver::new(params)
        .unwrap()
        .resolve(&CurveState::genesis(params), whole("1"))
        .unwrap()
        .final_state
}

#[test]
fn genesis_mints_first_segment() {
    let params = CurveParameters::default();
    let resolver = SegmentResolver::new(&params).unwrap();
    let result = resolver
        .resolve(&CurveState::genesis(&params), whole("1"))
        .unwrap();

    assert_eq!(result.total_user_tokens, 100_000_000_000);
    assert_eq!(result.segments_processed, 1);
    assert_eq!(result.remaining_funds, 0);
    assert_eq!(result.segment_details.len(), 1);
    assert_eq!(result.segment_details[0].deferred_allocation_distributed, 0);
    assert_eq!(result.final_state.pending_deferred_allocation, whole("10"));
    assert_eq!(result.final_state.price, Decimal::new(1001, 7));
    assert_eq!(result.final_state.reserve_balance, whole("1"));
    assert!(audit_result(&result, whole("1")).is_clean());
}

#[test]
fn deferred_allocation_distributed_at_next_segment() {
    let params = CurveParameters {
        deferred_allocation_basis: DeferredAllocationBasis::TotalSupply,
        ..Default::default()
    };
    let state = CurveState {
        segment: 1,
        price: Decimal::new(1001, 7),
        total_supply: whole("100000"),
        reserve_balance: whole("1"),
        pending_deferred_allocation: whole("10"),
        segment_minted: 0,
    };
    let resolver = SegmentResolver::new(&params).unwrap();
    let result = resolver.resolve(&state, whole("0.0011")).unwrap();

    let record = &result.segment_details[0];
    assert!(record.is_complete);
    assert_eq!(record.segment_number, 1);
    assert_eq!(record.deferred_allocation_distributed, whole("10"));
    assert!(within(record.user_tokens, "10.99", "0.1"));
    assert!(within(
        result.final_state.pending_deferred_allocation,
        "10.002",
        "0.01"
    ));
    assert_eq!(result.total_tokens_bought, record.user_tokens + whole("10"));
}

#[test]
fn segment_minted_basis_sizes_allocation_on_segment() {
    let params = CurveParameters::default();
    let resolver = SegmentResolver::new(&params).unwrap();
    let result = resolver
        .resolve(&after_genesis(&params), whole("0.0011"))
        .unwrap();

    let record = &result.segment_details[0];
    assert_eq!(record.user_tokens, 10_990_009);
    assert_eq!(record.cost, 1_100);
    // 0.0001 × (10 990 009 bought + 10 000 000 injected)
    assert_eq!(result.final_state.pending_deferred_allocation, 2_099);
}

#[test]
fn multi_segment_purchase_from_genesis() {
    let params = CurveParameters::default();
    let resolver = SegmentResolver::new(&params).unwrap();
    let deposit = whole("1.002312");
    let result = resolver
        .resolve(&CurveState::genesis(&params), deposit)
        .unwrap();

    assert_eq!(result.segments_processed, 3);
    let completed: Vec<_> = result.completed_segments().collect();
    assert_eq!(completed.len(), 3);
    assert_eq!(completed[0].deferred_allocation_distributed, 0);
    for pair in completed.windows(2) {
        let expected = fixed::mul_price(pair[0].tokens_bought, params.deferred_allocation_rate)
            .unwrap();
        assert_eq!(pair[1].deferred_allocation_distributed, expected);
        assert_eq!(pair[0].deferred_allocation_accrued, expected);
    }

    let last = result.segment_details.last().unwrap();
    assert!(!last.is_complete);
    assert_eq!(last.segment_number, 3);
    assert_eq!(last.deferred_allocation_distributed, 0);
    assert_eq!(result.final_state.segment, 3);
    assert_eq!(result.total_cost + result.remaining_funds, deposit);
    assert!(audit_result(&result, deposit).is_clean());
}

#[test]
fn total_supply_basis_ends_on_boundary() {
    let params = CurveParameters {
        deferred_allocation_basis: DeferredAllocationBasis::TotalSupply,
        ..Default::default()
    };
    let resolver = SegmentResolver::new(&params).unwrap();
    let deposit = whole("1.002312");
    let result = resolver
        .resolve(&CurveState::genesis(&params), deposit)
        .unwrap();

    assert_eq!(result.segments_processed, 3);
    assert_eq!(result.segment_details.len(), 3);
    assert!(result.ends_on_boundary());
    assert!(result.remaining_funds <= DUST_EPSILON);
    assert_eq!(result.termination, Termination::FundsExhausted);
}

#[test]
fn partial_segment_consumes_all_funds() {
    let params = CurveParameters::default();
    let resolver = SegmentResolver::new(&params).unwrap();
    let state = after_genesis(&params);
    let result = resolver.resolve(&state, whole("0.0005")).unwrap();

    assert_eq!(result.segments_processed, 0);
    assert_eq!(result.remaining_funds, 0);
    let record = &result.segment_details[0];
    assert!(!record.is_complete);
    assert!(record.tokens_still_needed_to_complete > 0);
    assert_eq!(record.deferred_allocation_distributed, 0);
    assert_eq!(result.final_state.segment, state.segment);
    assert_eq!(
        result.final_state.pending_deferred_allocation,
        state.pending_deferred_allocation
    );
}

#[test]
fn partial_fills_accumulate_into_completion() {
    let params = CurveParameters::default();
    let resolver = SegmentResolver::new(&params).unwrap();
    let first = resolver
        .resolve(&after_genesis(&params), whole("0.0005"))
        .unwrap();
    let second = resolver.resolve(&first.final_state, whole("0.0007")).unwrap();

    let record = &second.segment_details[0];
    assert!(record.is_complete);
    assert_eq!(record.segment_number, 1);
    assert_eq!(record.deferred_allocation_distributed, whole("10"));
    assert!(audit_result(&second, whole("0.0007")).is_clean());

    // The whole segment, across both calls, sizes the allocation.
    let minted = first.total_user_tokens + record.user_tokens + whole("10");
    assert_eq!(
        record.deferred_allocation_accrued,
        fixed::mul_price(minted, params.deferred_allocation_rate).unwrap()
    );
    assert_eq!(
        second.final_state.pending_deferred_allocation,
        record.deferred_allocation_accrued
    );
}

#[test]
fn segment_cap_refunds_remainder() {
    let params = CurveParameters {
        max_segments_per_call: 3,
        ..Default::default()
    };
    let resolver = SegmentResolver::new(&params).unwrap();
    let deposit = whole("10");
    let result = resolver
        .resolve(&CurveState::genesis(&params), deposit)
        .unwrap();

    assert_eq!(result.segments_processed, 3);
    assert_eq!(result.termination, Termination::SegmentLimitReached);
    assert!(result.remaining_funds > 0);
    assert_eq!(result.total_cost + result.remaining_funds, deposit);
    assert!(result.ends_on_boundary());
}

#[test]
fn resolution_is_deterministic() {
    let params = CurveParameters::default();
    let resolver = SegmentResolver::new(&params).unwrap();
    let state = after_genesis(&params);
    let a = resolver.resolve(&state, 12_345).unwrap();
    let b = resolver.resolve(&state, 12_345).unwrap();
    assert_eq!(a, b);
}

#[test]
fn chained_purchases_keep_reserve_ratio() {
    let params = CurveParameters::default();
    let resolver = SegmentResolver::new(&params).unwrap();
    let mut state = CurveState::genesis(&params);
    for deposit in [250_000, 750_000, 3_000, 777, 15_000, 1] {
        let result = resolver.resolve(&state, deposit).unwrap();
        let report = audit_result(&result, deposit);
        assert!(report.is_clean(), "{:?}", report.violations);
        assert!(result.final_state.price >= state.price);
        state = result.final_state;
    }
    let info = segment_info(&state, &params).unwrap();
    let ratio = info.reserve_ratio_actual;
    assert!(ratio > Decimal::new(99, 3) && ratio < Decimal::new(101, 3));
}
