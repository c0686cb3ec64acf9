//! Coin selector gate.
//!
//! Bounds the candidate set handed to the assembly engine. The engine does
//! the final subset selection; the gate only makes sure it never has to
//! consider an unbounded pool. Candidates are taken largest first until more
//! than [`MAX_CANDIDATE_COINS`] have been taken *and* their sum exceeds the
//! requested total, so a thin account may still yield more coins than the
//! cutoff.

use std::collections::HashSet;

use tracing::debug;

use coinsmith_core::coin::SpendableCoin;
use coinsmith_core::constants::MAX_CANDIDATE_COINS;
use coinsmith_core::traits::AssemblyEngine;
use coinsmith_core::types::OutPoint;

use crate::error::WalletError;
use crate::reservation::InputReservations;

/// Explicit input requirements of a build.
#[derive(Debug, Clone, Copy)]
pub struct InputConstraint<'a> {
    /// Outpoints that must be spent.
    pub required: &'a [OutPoint],
    /// Whether coins outside `required` may join the pool.
    pub allow_other: bool,
}

impl InputConstraint<'_> {
    /// No required inputs; any coin may be used.
    pub const fn any() -> Self {
        Self {
            required: &[],
            allow_other: true,
        }
    }
}

/// Choose the bounded candidate pool for a build.
///
/// `coins` is the account's spendable set, already filtered by confirmations.
/// Coins under a live lease in `reservations` are not candidates.
pub fn select_coins<C: SpendableCoin>(
    coins: Vec<C>,
    total: u64,
    constraint: InputConstraint<'_>,
    reservations: &InputReservations,
) -> Result<Vec<C>, WalletError> {
    let leased_required: Vec<&OutPoint> = constraint
        .required
        .iter()
        .filter(|op| reservations.is_reserved(op))
        .collect();

    let coins: Vec<C> = coins
        .into_iter()
        .filter(|c| !reservations.is_reserved(c.outpoint()))
        .collect();

    if coins.is_empty() {
        return Err(WalletError::insufficient("no spendable transactions found"));
    }

    let available = coins
        .iter()
        .fold(0u64, |acc, c| acc.saturating_add(c.amount()));
    if available < total {
        return Err(WalletError::InsufficientFunds {
            reason: format!("not enough funds: available {available}, requested {total}"),
            missing: Some(total - available),
        });
    }

    let mut coins = coins;
    if !constraint.required.is_empty() {
        let present: HashSet<&OutPoint> = coins.iter().map(|c| c.outpoint()).collect();
        if let Some(missing) = constraint.required.iter().find(|op| !present.contains(op)) {
            if leased_required.contains(&missing) {
                return Err(WalletError::InvalidInput(format!(
                    "input {missing} is reserved by another build"
                )));
            }
            return Err(WalletError::InvalidInput(format!(
                "input {missing} is not spendable by this account"
            )));
        }

        if !constraint.allow_other {
            let required: HashSet<&OutPoint> = constraint.required.iter().collect();
            coins.retain(|c| required.contains(c.outpoint()));
        }
    }

    // Stable sort keeps the index order among equal amounts.
    coins.sort_by(|a, b| b.amount().cmp(&a.amount()));

    let mut selected: Vec<C> = Vec::new();
    let mut rest: Vec<C> = Vec::new();
    let mut sum: u64 = 0;
    let mut iter = coins.into_iter();
    for coin in iter.by_ref() {
        sum = sum.saturating_add(coin.amount());
        selected.push(coin);
        if selected.len() > MAX_CANDIDATE_COINS && sum > total {
            break;
        }
    }
    rest.extend(iter);

    // Required inputs cut off by the bound still go to the engine.
    if !constraint.required.is_empty() && !rest.is_empty() {
        let required: HashSet<&OutPoint> = constraint.required.iter().collect();
        let cut: Vec<C> = rest
            .into_iter()
            .filter(|c| required.contains(c.outpoint()))
            .collect();
        selected.extend(cut);
    }

    debug!(
        candidates = selected.len(),
        available,
        requested = total,
        "coin candidates selected"
    );
    Ok(selected)
}

/// Hand the candidates to the engine's pool and pin the required inputs.
pub fn register_coins<C: SpendableCoin>(
    engine: &mut dyn AssemblyEngine,
    coins: &[C],
    required: &[OutPoint],
) {
    engine.add_coins(coins.iter().map(|c| c.to_pool_coin()).collect());
    for op in required {
        engine.require_input(op.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinsmith_core::coin::WalletCoin;
    use coinsmith_core::types::Hash256;
    use proptest::prelude::*;

    fn coin(id: u32, amount: u64) -> WalletCoin {
        let mut txid = [0u8; 32];
        txid[..4].copy_from_slice(&id.to_le_bytes());
        WalletCoin::new(OutPoint::new(Hash256(txid), 0), amount, Hash256([7; 32]), 6)
    }

    fn coins(amounts: &[u64]) -> Vec<WalletCoin> {
        amounts
            .iter()
            .enumerate()
            .map(|(i, a)| coin(i as u32, *a))
            .collect()
    }

    fn outpoints(coins: &[WalletCoin]) -> Vec<OutPoint> {
        coins.iter().map(|c| c.outpoint.clone()).collect()
    }

    #[test]
    fn empty_set_is_insufficient() {
        let err = select_coins::<WalletCoin>(
            Vec::new(),
            10,
            InputConstraint::any(),
            &InputReservations::default(),
        )
        .unwrap_err();
        assert_eq!(err, WalletError::insufficient("no spendable transactions found"));
    }

    #[test]
    fn balance_below_request_reports_missing() {
        let err = select_coins(
            coins(&[300, 200]),
            600,
            InputConstraint::any(),
            &InputReservations::default(),
        )
        .unwrap_err();
        assert_eq!(err.missing_funds(), Some(100));
    }

    #[test]
    fn sorted_largest_first() {
        let picked = select_coins(
            coins(&[100, 500, 300]),
            50,
            InputConstraint::any(),
            &InputReservations::default(),
        )
        .unwrap();
        let amounts: Vec<u64> = picked.iter().map(|c| c.amount).collect();
        assert_eq!(amounts, vec![500, 300, 100]);
    }

    #[test]
    fn missing_required_input_is_invalid_either_way() {
        let set = coins(&[100, 200]);
        let foreign = coin(99, 1).outpoint;
        for allow_other in [false, true] {
            let err = select_coins(
                set.clone(),
                50,
                InputConstraint {
                    required: std::slice::from_ref(&foreign),
                    allow_other,
                },
                &InputReservations::default(),
            )
            .unwrap_err();
            assert!(matches!(err, WalletError::InvalidInput(_)));
        }
    }

    #[test]
    fn restriction_keeps_exactly_required() {
        let set = coins(&[100, 200, 300, 400]);
        let required = vec![set[0].outpoint.clone(), set[2].outpoint.clone()];
        let picked = select_coins(
            set,
            50,
            InputConstraint {
                required: &required,
                allow_other: false,
            },
            &InputReservations::default(),
        )
        .unwrap();
        let mut got = outpoints(&picked);
        got.sort();
        let mut want = required.clone();
        want.sort();
        assert_eq!(got, want);
    }

    #[test]
    fn cutoff_stops_after_threshold_once_covered() {
        let set = coins(&vec![10; 800]);
        let picked = select_coins(set, 100, InputConstraint::any(), &InputReservations::default())
            .unwrap();
        assert_eq!(picked.len(), MAX_CANDIDATE_COINS + 1);
    }

    #[test]
    fn cutoff_is_soft_when_funds_are_thin() {
        // 700 coins of 1; a request of 650 is only exceeded at coin 651.
        let set = coins(&vec![1; 700]);
        let picked = select_coins(set, 650, InputConstraint::any(), &InputReservations::default())
            .unwrap();
        assert_eq!(picked.len(), 651);
    }

    #[test]
    fn cutoff_can_skip_coins_the_fee_needs() {
        // Early stop at 501 coins covers the request but leaves no margin
        // for a fee; the remaining coins never reach the engine.
        let set = coins(&vec![2; 600]);
        let picked = select_coins(set, 1001, InputConstraint::any(), &InputReservations::default())
            .unwrap();
        assert_eq!(picked.len(), 501);
        assert_eq!(picked.iter().map(|c| c.amount).sum::<u64>(), 1002);
    }

    #[test]
    fn required_coin_past_cutoff_is_appended() {
        let mut set = coins(&vec![10; 600]);
        set.push(coin(9999, 1));
        let required = vec![coin(9999, 1).outpoint];
        let picked = select_coins(
            set,
            100,
            InputConstraint {
                required: &required,
                allow_other: true,
            },
            &InputReservations::default(),
        )
        .unwrap();
        assert_eq!(picked.len(), MAX_CANDIDATE_COINS + 2);
        assert_eq!(picked.last().map(|c| c.amount), Some(1));
    }

    #[test]
    fn leased_coins_are_skipped() {
        let set = coins(&[100, 200]);
        let reservations = InputReservations::default();
        reservations.reserve([&set[1].outpoint]);
        let picked = select_coins(set, 50, InputConstraint::any(), &reservations).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].amount, 100);
    }

    #[test]
    fn leased_required_input_is_invalid() {
        let set = coins(&[100, 200]);
        let reservations = InputReservations::default();
        reservations.reserve([&set[0].outpoint]);
        let required = vec![set[0].outpoint.clone()];
        let err = select_coins(
            set,
            50,
            InputConstraint {
                required: &required,
                allow_other: true,
            },
            &reservations,
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::InvalidInput(m) if m.contains("reserved")));
    }

    proptest! {
        #[test]
        fn cutoff_bound_holds(
            amounts in prop::collection::vec(1u64..1_000, 1..1_200),
            request_fraction in 0u64..=100,
        ) {
            let set = coins(&amounts);
            let available: u64 = amounts.iter().sum();
            let total = available * request_fraction / 100;
            let picked = select_coins(set, total, InputConstraint::any(), &InputReservations::default())
                .unwrap();

            let sum: u64 = picked.iter().map(|c| c.amount).sum();
            prop_assert!(sum >= total);
            if picked.len() > MAX_CANDIDATE_COINS + 1 {
                // Beyond the cutoff only while the running sum had not yet
                // exceeded the request.
                let before_last: u64 = picked[..picked.len() - 1].iter().map(|c| c.amount).sum();
                prop_assert!(before_last <= total);
            }
            for pair in picked.windows(2) {
                prop_assert!(pair[0].amount >= pair[1].amount);
            }
        }

        #[test]
        fn restricted_pool_equals_required_set(
            amounts in prop::collection::vec(1u64..1_000, 1..60),
            mask in prop::collection::vec(any::<bool>(), 60),
        ) {
            let set = coins(&amounts);
            let mut required: Vec<OutPoint> = set
                .iter()
                .zip(mask.iter())
                .filter(|(_, keep)| **keep)
                .map(|(c, _)| c.outpoint.clone())
                .collect();
            prop_assume!(!required.is_empty());

            let picked = select_coins(
                set,
                1,
                InputConstraint { required: &required, allow_other: false },
                &InputReservations::default(),
            )
            .unwrap();
            let mut got = outpoints(&picked);
            got.sort();
            required.sort();
            prop_assert_eq!(got, required);
        }
    }
}
