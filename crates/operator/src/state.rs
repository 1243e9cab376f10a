//! The operator's owned rollup state and how ledger records mutate it.

use accum::AccountTable;
use circuit::{CircuitError, PendingUpdate};
use pasta_curves::Fp;
use primitives::{LedgerOp, TxRecord};
use tracing::*;

/// Table plus the witnesses captured since the last anchored root.
/// Cloned as a snapshot before each block and restored if the block fails.
#[derive(Clone, Debug)]
pub struct RollupState {
    pub table: AccountTable,
    pub pending: Vec<PendingUpdate>,
    /// Root the anchor holds for the last committed block.
    pub committed_root: Fp,
}

/// What a single record did to the state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RecordOutcome {
    Applied,
    Ignored,
    Dropped,
}

impl RollupState {
    pub fn new(table: AccountTable) -> Self {
        let committed_root = table.root();
        Self { table, pending: Vec::new(), committed_root }
    }

    pub fn latest_root(&self) -> Fp { self.table.root() }

    /// Apply one record. Records the table refuses are dropped and logged;
    /// only a witness that cannot be captured is an error.
    pub fn apply_record(&mut self, block: u64, record: &TxRecord) -> Result<RecordOutcome, CircuitError> {
        let op = match LedgerOp::parse(record) {
            Ok(op) => op,
            Err(e) => {
                warn!(%block, tx = %record.tx_id, %e, "dropping malformed record");
                return Ok(RecordOutcome::Dropped);
            }
        };
        let applied = match op {
            LedgerOp::CreateAccount { id } => self.table.create_account(id),
            LedgerOp::BalanceChange { id, delta } => self.table.apply_delta(id, delta),
            LedgerOp::Acknowledged(method) | LedgerOp::Unrecognized(method) => {
                trace!(%block, tx = %record.tx_id, %method, "no state effect");
                return Ok(RecordOutcome::Ignored);
            }
        };
        match applied {
            Ok(transition) => {
                debug!(%block, tx = %record.tx_id, slot = transition.index, "applied");
                self.pending.push(PendingUpdate::from_transition(&transition)?);
                Ok(RecordOutcome::Applied)
            }
            Err(e) => {
                warn!(%block, tx = %record.tx_id, %e, "record dropped");
                Ok(RecordOutcome::Dropped)
            }
        }
    }

    /// Mark the current table as anchored.
    pub fn seal(&mut self) {
        self.pending.clear();
        self.committed_root = self.table.root();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitives::{ops, Player};

    fn state(depth: usize, players: &[(u64, u64)]) -> RollupState {
        let players: Vec<Player> =
            players.iter().map(|&(id, balance)| Player { id, balance, usd_balance: 0 }).collect();
        RollupState::new(AccountTable::bootstrap(depth, &players).unwrap())
    }

    #[test]
    fn full_table_drops_create_and_keeps_root() {
        let mut s = state(1, &[(1, 10), (2, 20)]);
        let root = s.latest_root();
        let outcome = s.apply_record(2, &TxRecord::new("t", &[ops::CREATE_PLAYER, "3"])).unwrap();
        assert_eq!(outcome, RecordOutcome::Dropped);
        assert_eq!(s.latest_root(), root);
        assert_eq!(s.table.dummy_cursor(), 2);
        assert!(s.pending.is_empty());
    }

    #[test]
    fn lookup_and_balance_faults_are_dropped() {
        let mut s = state(2, &[(1, 10)]);
        let root = s.latest_root();
        let unknown = TxRecord::new("t1", &[ops::EXCHANGE, "9", "5"]);
        let overdraw = TxRecord::new("t2", &[ops::EXCHANGE, "1", "-11"]);
        let garbled = TxRecord::new("t3", &[ops::EXCHANGE, "1"]);
        for r in [&unknown, &overdraw, &garbled] {
            assert_eq!(s.apply_record(3, r).unwrap(), RecordOutcome::Dropped);
        }
        assert_eq!(s.latest_root(), root);
    }

    #[test]
    fn applied_records_accumulate_witnesses() {
        let mut s = state(2, &[(1, 10)]);
        let start = s.latest_root();
        let records = [
            TxRecord::new("a", &[ops::CREATE_PLAYER, "5"]),
            TxRecord::new("b", &[ops::RECORD_BANK_TX, "5", "100", "1"]),
            TxRecord::new("c", &[ops::EXCHANGE, "5", "100"]),
            TxRecord::new("d", &["CurrencyContract:SetExchangeRate", "900"]),
        ];
        let outcomes: Vec<_> = records.iter().map(|r| s.apply_record(4, r).unwrap()).collect();
        assert_eq!(outcomes, vec![
            RecordOutcome::Applied,
            RecordOutcome::Ignored,
            RecordOutcome::Applied,
            RecordOutcome::Ignored
        ]);
        assert_eq!(s.pending.len(), 2);
        assert_eq!(s.pending[0].old_root(), start);
        assert_eq!(s.committed_root, start);

        s.seal();
        assert!(s.pending.is_empty());
        assert_eq!(s.committed_root, s.latest_root());
        assert_ne!(s.committed_root, start);
    }
}
