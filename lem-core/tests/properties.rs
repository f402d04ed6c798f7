//! Properties every mechanism must keep on arbitrary books.
//!
//! Books are drawn from a seeded RNG so failures reproduce; the seed is in
//! every assertion message.

use lem_core::{
    BidRecord, BidSet, MechanismKind, Phase, RoundOutcome, SettlementConfig, Side,
    TwoPhaseSettlement, clear_uniform, find_clearing_point,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const TOL: f64 = 1e-6;

// === TEST FIXTURES ===

/// A random book of up to `max_bids` bids with whole-unit quantities and
/// prices that straddle the default bounds.
fn random_book(seed: u64, max_bids: u64) -> Vec<BidRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = rng.random_range(0..=max_bids);
    (1..=n)
        .map(|id| {
            let quantity = rng.random_range(1..=10) as f64;
            let price = (rng.random_range(0.05..0.30_f64) * 100.0).round() / 100.0;
            if rng.random_bool(0.5) {
                BidRecord::buy(id, quantity, price)
            } else {
                BidRecord::sell(id, quantity, price)
            }
        })
        .collect()
}

fn settle_all(records: &[BidRecord], config: &SettlementConfig) -> Vec<(MechanismKind, RoundOutcome)> {
    let engine = TwoPhaseSettlement::with_builtin();
    MechanismKind::ALL
        .iter()
        .map(|&kind| {
            let round = engine
                .settle(records, kind.as_str(), config)
                .unwrap_or_else(|e| panic!("{kind} failed: {e}"));
            (kind, round)
        })
        .collect()
}

fn side_volume(round: &RoundOutcome, side: Side, primary: bool) -> f64 {
    round
        .ledger
        .in_phase(primary)
        .filter(|t| t.side == side)
        .map(|t| t.quantity)
        .sum()
}

// === PROPERTIES ===

#[test]
fn property_no_bid_trades_more_than_it_offered() {
    let config = SettlementConfig::default();
    for seed in 0..40 {
        let records = random_book(seed, 10);
        for (kind, round) in settle_all(&records, &config) {
            for record in &records {
                let traded = round.ledger.quantity_for(record.id);
                assert!(
                    traded <= record.quantity + TOL,
                    "seed {seed} {kind}: bid {} traded {traded} of {}",
                    record.id,
                    record.quantity
                );
            }
        }
    }
}

#[test]
fn property_every_phase_balances_buys_and_sells() {
    let config = SettlementConfig::default();
    for seed in 100..140 {
        let records = random_book(seed, 10);
        for (kind, round) in settle_all(&records, &config) {
            for primary in [true, false] {
                let bought = side_volume(&round, Side::Buy, primary);
                let sold = side_volume(&round, Side::Sell, primary);
                assert!(
                    (bought - sold).abs() < TOL,
                    "seed {seed} {kind} primary={primary}: bought {bought}, sold {sold}"
                );
            }
        }
    }
}

#[test]
fn property_residual_prices_stay_within_bounds() {
    let config = SettlementConfig::with_bounds(0.12, 0.22);
    for seed in 200..240 {
        let records = random_book(seed, 10);
        for (kind, round) in settle_all(&records, &config) {
            for t in round.ledger.in_phase(false) {
                assert!(
                    config.bounds.contains(t.price),
                    "seed {seed} {kind}: residual trade at {} outside [0.12, 0.22]",
                    t.price
                );
            }
            if let Some(p) = round.summary.residual_price.filter(|_| round.summary.residual_quantity > 0.0) {
                assert!(config.bounds.contains(p), "seed {seed} {kind}: reported price {p}");
            }
        }
    }
}

#[test]
fn property_primary_phase_is_the_same_for_every_mechanism() {
    let config = SettlementConfig::default();
    for seed in 300..330 {
        let records = random_book(seed, 12);
        let rounds = settle_all(&records, &config);
        let (_, first) = &rounds[0];
        for (kind, round) in &rounds[1..] {
            assert_eq!(round.summary.primary_price, first.summary.primary_price, "seed {seed} {kind}");
            assert!(
                (round.summary.primary_quantity - first.summary.primary_quantity).abs() < TOL,
                "seed {seed} {kind}"
            );
            let primary: Vec<_> = round.ledger.in_phase(true).collect();
            assert!(primary.iter().all(|t| t.phase == Phase::Primary));
        }
    }
}

#[test]
fn property_covering_mechanisms_trade_the_whole_short_side() {
    let config = SettlementConfig::default();
    for seed in 400..440 {
        let records = random_book(seed, 8);
        for (kind, round) in settle_all(&records, &config) {
            if !kind.covers_short_side() {
                continue;
            }
            let diag = &round.summary.diagnostics;
            let short = diag
                .get_f64("uncovered_buy")
                .unwrap_or(0.0)
                .min(diag.get_f64("uncovered_sell").unwrap_or(0.0));
            assert!(
                (round.summary.residual_quantity - short).abs() < TOL,
                "seed {seed} {kind}: residual {} vs short side {short}",
                round.summary.residual_quantity
            );
            assert!(
                (round.summary.total_quantity - round.summary.primary_quantity - round.summary.residual_quantity).abs()
                    < TOL
            );
        }
    }
}

#[test]
fn property_uniform_clearing_leaves_nothing_crossing() {
    for seed in 500..560 {
        let records = random_book(seed, 15);
        let mut bids = BidSet::from_records(&records).unwrap();
        let first = clear_uniform(&mut bids, Phase::Primary);
        assert!(
            find_clearing_point(&bids).is_none(),
            "seed {seed}: second pass found volume after clearing {:?}",
            first.point
        );

        let again = clear_uniform(&mut bids, Phase::Primary);
        assert!(again.transactions.is_empty(), "seed {seed}");
        assert_eq!(again.quantity(), 0.0);
    }
}

#[test]
fn property_unmatched_books_never_trade_in_primary() {
    // All asks above all bids: nothing can clear at a single price.
    for seed in 600..620 {
        let mut rng = StdRng::seed_from_u64(seed);
        let records: Vec<BidRecord> = (1..=8)
            .map(|id| {
                let q = rng.random_range(1..=5) as f64;
                if id % 2 == 0 {
                    BidRecord::buy(id, q, rng.random_range(0.10..0.15))
                } else {
                    BidRecord::sell(id, q, rng.random_range(0.16..0.25))
                }
            })
            .collect();
        let round = TwoPhaseSettlement::with_builtin()
            .settle(&records, "uniform", &SettlementConfig::default())
            .unwrap();
        assert_eq!(round.summary.primary_price, None, "seed {seed}");
        assert!(round.ledger.is_empty(), "seed {seed}");
    }
}
