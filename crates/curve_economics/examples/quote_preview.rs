//! Quote a range of deposits against a freshly seeded curve
//!
//! Run with `RUST_LOG=debug` to see each segment step.

use segcurve_economics::*;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let params = CurveParameters::default();
    let resolver = SegmentResolver::new(&params)?;
    let selector = HybridSelector::new(&params)?;
    let estimator = ClosedFormEstimator::new(&params)?;

    println!("Segmented Bonding Curve - Quote Preview\n");
    println!("  Base price:      {}", params.base_price);
    println!("  Increment:       {}", params.price_increment);
    println!("  Reserve ratio:   {}", params.reserve_ratio);
    println!("  Deferred rate:   {}", params.deferred_allocation_rate);
    println!("  Genesis supply:  {}", fixed::format_micro(params.genesis_supply));
    println!();

    let seeded = resolver
        .resolve(&CurveState::genesis(&params), fixed::parse_deposit("1")?)?
        .final_state;
    let info = segment_info(&seeded, &params)?;
    println!(
        "After genesis: segment {} at {}, {} to complete",
        info.segment,
        info.price,
        fixed::format_micro(info.cost_to_complete)
    );
    println!();

    for amount in ["0.0005", "0.0011", "0.01", "0.05", "0.5"] {
        let deposit = fixed::parse_deposit(amount)?;
        let quote = selector.resolve_optimal(&seeded, deposit)?;
        let fast = estimator.estimate_from_state(&seeded, deposit)?;
        println!(
            "Deposit {:>8}: {:>16} tokens, {:>2} segments, refund {} ({:?}, {:?})",
            amount,
            fixed::format_micro(quote.total_user_tokens),
            quote.segments_processed,
            fixed::format_micro(quote.remaining_funds),
            quote.method,
            quote.termination
        );
        println!(
            "    closed form: {:>16} tokens, {:>2} segments",
            fixed::format_micro(fast.tokens_bought),
            fast.segments_completed
        );
    }

    Ok(())
}
