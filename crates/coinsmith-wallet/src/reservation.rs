//! Short-lived input leases shared by concurrent builds.
//!
//! A signed build leases the outpoints it spends so a second build running
//! against the same index snapshot does not pick them again. Leases expire
//! after a TTL; expired entries are purged lazily on the next access.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use coinsmith_core::constants::DEFAULT_RESERVATION_TTL_SECS;
use coinsmith_core::types::{OutPoint, Transaction};

/// Lease table keyed by outpoint.
#[derive(Debug)]
pub struct InputReservations {
    ttl: Duration,
    leases: Mutex<HashMap<OutPoint, Instant>>,
}

impl Default for InputReservations {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_RESERVATION_TTL_SECS))
    }
}

impl InputReservations {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            leases: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Lease every outpoint in `outpoints`, refreshing existing leases.
    pub fn reserve<'a>(&self, outpoints: impl IntoIterator<Item = &'a OutPoint>) {
        let expires = Instant::now() + self.ttl;
        let mut leases = self.leases.lock();
        let mut count = 0usize;
        for op in outpoints {
            leases.insert(op.clone(), expires);
            count += 1;
        }
        debug!(count, total = leases.len(), "inputs reserved");
    }

    /// Lease every input of `tx`, or none of them.
    ///
    /// Fails with the first input already under a live lease. The check and
    /// the insert happen under one lock, so two builds racing for the same
    /// coin cannot both succeed.
    pub fn try_reserve_transaction(&self, tx: &Transaction) -> Result<(), OutPoint> {
        let now = Instant::now();
        let mut leases = self.leases.lock();
        if let Some(taken) = tx
            .inputs
            .iter()
            .map(|i| &i.previous_output)
            .find(|op| leases.get(*op).is_some_and(|expires| *expires > now))
        {
            return Err(taken.clone());
        }
        let expires = now + self.ttl;
        for input in &tx.inputs {
            leases.insert(input.previous_output.clone(), expires);
        }
        debug!(count = tx.inputs.len(), total = leases.len(), "inputs reserved");
        Ok(())
    }

    /// Whether `outpoint` is under a live lease.
    pub fn is_reserved(&self, outpoint: &OutPoint) -> bool {
        let now = Instant::now();
        let mut leases = self.leases.lock();
        match leases.get(outpoint) {
            Some(expires) if *expires > now => true,
            Some(_) => {
                leases.remove(outpoint);
                false
            }
            None => false,
        }
    }

    /// Free the leases held by `tx`'s inputs.
    pub fn release(&self, tx: &Transaction) -> usize {
        let mut leases = self.leases.lock();
        let released = tx
            .inputs
            .iter()
            .filter(|i| leases.remove(&i.previous_output).is_some())
            .count();
        debug!(released, "inputs released");
        released
    }

    /// Drop every expired lease. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut leases = self.leases.lock();
        let before = leases.len();
        leases.retain(|_, expires| *expires > now);
        before - leases.len()
    }

    /// Number of live leases.
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.leases.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinsmith_core::types::{Hash256, TxInput};

    fn op(b: u8) -> OutPoint {
        OutPoint::new(Hash256([b; 32]), 0)
    }

    #[test]
    fn reserve_and_release() {
        let r = InputReservations::default();
        let tx = Transaction {
            inputs: vec![TxInput::unsigned(op(1)), TxInput::unsigned(op(2))],
            ..Transaction::new()
        };
        r.try_reserve_transaction(&tx).unwrap();
        assert!(r.is_reserved(&op(1)));
        assert!(r.is_reserved(&op(2)));
        assert!(!r.is_reserved(&op(3)));
        assert_eq!(r.len(), 2);

        assert_eq!(r.release(&tx), 2);
        assert!(!r.is_reserved(&op(1)));
        assert!(r.is_empty());
    }

    #[test]
    fn conflicting_transaction_reserves_nothing() {
        let r = InputReservations::default();
        r.reserve([&op(2)]);
        let tx = Transaction {
            inputs: vec![TxInput::unsigned(op(1)), TxInput::unsigned(op(2))],
            ..Transaction::new()
        };
        assert_eq!(r.try_reserve_transaction(&tx), Err(op(2)));
        assert!(!r.is_reserved(&op(1)));
    }

    #[test]
    fn expired_lease_does_not_block() {
        let r = InputReservations::new(Duration::ZERO);
        r.reserve([&op(1)]);
        let tx = Transaction {
            inputs: vec![TxInput::unsigned(op(1))],
            ..Transaction::new()
        };
        assert!(r.try_reserve_transaction(&tx).is_ok());
    }

    #[test]
    fn zero_ttl_leases_expire_immediately() {
        let r = InputReservations::new(Duration::ZERO);
        r.reserve([&op(1)]);
        assert!(!r.is_reserved(&op(1)));
        assert!(r.is_empty());
    }

    #[test]
    fn purge_counts_expired() {
        let r = InputReservations::new(Duration::ZERO);
        r.reserve([&op(1), &op(2)]);
        assert_eq!(r.purge_expired(), 2);
    }

    #[test]
    fn release_ignores_unleased_inputs() {
        let r = InputReservations::default();
        r.reserve([&op(1)]);
        let tx = Transaction {
            inputs: vec![TxInput::unsigned(op(1)), TxInput::unsigned(op(9))],
            ..Transaction::new()
        };
        assert_eq!(r.release(&tx), 1);
    }
}
