use std::fmt::Write;

use crate::{clock::LogicalTime, ParticipantId};

pub type Balance = i16;

// the BALANCE_HISTORY payload counts its states with a single byte, so the
// last representable slot index keeps length <= u8::MAX
pub const MAX_T: LogicalTime = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOrder {
    pub src: ParticipantId,
    pub dst: ParticipantId,
    pub amount: Balance,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BalanceState {
    pub balance: Balance,
    pub time: LogicalTime,
    pub pending_in: Balance,
}

/// Per-worker record of the balance at every logical time slot since start.
/// Slot `t` always sits at index `t`; slots between explicitly recorded
/// events carry the last known balance forward with zero pending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceHistory {
    owner: ParticipantId,
    states: Vec<BalanceState>,
}

impl BalanceHistory {
    pub fn new(owner: ParticipantId, initial: Balance) -> Self {
        Self {
            owner,
            states: vec![BalanceState {
                balance: initial,
                time: 0,
                pending_in: 0,
            }],
        }
    }

    /// Reassemble a history received off the wire. The slots must already
    /// satisfy `time == index`; the codec checks that before calling
    pub fn from_parts(owner: ParticipantId, states: Vec<BalanceState>) -> Self {
        Self { owner, states }
    }

    pub fn owner(&self) -> ParticipantId {
        self.owner
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &[BalanceState] {
        &self.states
    }

    pub fn last_balance(&self) -> Balance {
        self.states.last().map(|state| state.balance).unwrap_or(0)
    }

    fn materialize(&mut self, to: LogicalTime) {
        let to = to.min(MAX_T);
        while self.states.len() <= to as usize {
            let carried = self.last_balance();
            self.states.push(BalanceState {
                balance: carried,
                time: self.states.len() as LogicalTime,
                pending_in: 0,
            })
        }
    }

    /// Record `balance` over every slot in `[from, to]` (clamped to
    /// `MAX_T`), materializing any implicit slots before `from` with the
    /// carried-forward balance
    pub fn update(&mut self, balance: Balance, from: LogicalTime, to: LogicalTime, pending: Balance) {
        let to = to.min(MAX_T);
        self.materialize(to);
        for t in from..=to {
            self.states[t as usize] = BalanceState {
                balance,
                time: t,
                pending_in: pending,
            }
        }
    }

    /// Flag `amount` as in transit over the half-open interval
    /// `[from, until)`: deducted at the sender, not yet credited here.
    /// At `until` the credit is already reflected in the balance
    pub fn mark_pending(&mut self, amount: Balance, from: LogicalTime, until: LogicalTime) {
        let end = until.min(MAX_T + 1);
        if from >= end {
            return;
        }
        self.materialize(end - 1);
        for t in from..end {
            self.states[t as usize].pending_in = amount
        }
    }

    /// Carry the trailing balance forward so the history covers slot `t`
    pub fn extend_to(&mut self, t: LogicalTime) {
        self.materialize(t)
    }
}

/// Every worker's history, assembled at the coordinator after STOP
#[derive(Debug, Default, derive_more::Deref)]
pub struct AllHistory(Vec<BalanceHistory>);

impl AllHistory {
    pub fn push(&mut self, history: BalanceHistory) {
        self.0.push(history)
    }

    pub fn total_balance(&self) -> i64 {
        self.0
            .iter()
            .map(|history| history.last_balance() as i64)
            .sum()
    }
}

/// Tabular dump of the aggregated histories, one row per logical time slot,
/// one column per worker. A `+n` suffix marks money pending in flight
pub fn render_history(all: &AllHistory) -> String {
    let slots = all.iter().map(BalanceHistory::len).max().unwrap_or(0);
    let mut out = String::new();
    let _ = write!(out, "time");
    for history in all.iter() {
        let _ = write!(out, " {:>8}", format!("p{}", history.owner()));
    }
    let _ = writeln!(out);
    for t in 0..slots {
        let _ = write!(out, "{t:>4}");
        for history in all.iter() {
            // trailing balance carries past each worker's own final slot
            let state = history
                .states()
                .get(t)
                .copied()
                .or_else(|| history.states().last().copied())
                .unwrap_or_default();
            let cell = if state.pending_in != 0 {
                format!("{}+{}", state.balance, state.pending_in)
            } else {
                format!("{}", state.balance)
            };
            let _ = write!(out, " {cell:>8}");
        }
        let _ = writeln!(out);
    }
    out
}

/// The default coordinator workload: a chain transfer from every worker to
/// its successor, then one closing transfer back to worker 1. Callers may
/// substitute any plan of their own, including an empty one
pub fn bank_operations(max_id: ParticipantId) -> Vec<TransferOrder> {
    let mut plan = Vec::new();
    for i in 1..max_id {
        plan.push(TransferOrder {
            src: i,
            dst: i + 1,
            amount: i as Balance,
        })
    }
    if max_id > 1 {
        plan.push(TransferOrder {
            src: max_id,
            dst: 1,
            amount: 1,
        })
    }
    plan
}
