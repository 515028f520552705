// which of the four cores a run exercises, and the runner that wires a
// full mesh of participants and drives them to completion. every
// participant is one task; the coordinator's task yields the aggregated
// histories and the first failed task aborts the whole run

use std::sync::Arc;

use tokio::task::JoinSet;

use crate::{
    bank::{self, AllHistory, Balance, TransferOrder},
    coordinator::Coordinator,
    journal::Journal,
    net,
    worker::Worker,
    MAX_PROCESS_ID,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Synchronized start and termination only
    Barrier,
    /// Barrier plus the banking transfer flow
    Banking,
    /// Banking with pending-in-flight windows recorded over the lamport
    /// interval between send and receive
    BankingLamport,
    /// Barrier plus ricart-agrawala mutual exclusion over the print loop
    Mutex,
}

impl Scenario {
    pub fn banking(self) -> bool {
        matches!(self, Self::Banking | Self::BankingLamport)
    }

    pub fn pending_windows(self) -> bool {
        matches!(self, Self::BankingLamport)
    }

    pub fn mutex(self) -> bool {
        matches!(self, Self::Mutex)
    }
}

#[derive(Debug)]
pub struct Config {
    pub scenario: Scenario,
    pub workers: u8,
    /// One initial balance per worker; ignored outside banking runs
    pub balances: Vec<Balance>,
    /// The coordinator's transfer plan; ignored outside banking runs
    pub plan: Vec<TransferOrder>,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.workers >= 1, "at least one worker");
        anyhow::ensure!(
            self.workers <= MAX_PROCESS_ID,
            "at most {MAX_PROCESS_ID} workers",
        );
        if self.scenario.banking() {
            anyhow::ensure!(
                self.balances.len() == self.workers as usize,
                "one balance per worker, got {} for {}",
                self.balances.len(),
                self.workers,
            );
        }
        Ok(())
    }
}

/// Run one full simulation to completion and hand back the aggregated
/// balance histories (empty outside banking runs)
pub async fn run(config: Config, journal: Arc<Journal>) -> anyhow::Result<AllHistory> {
    config.validate()?;
    let mut endpoints = net::mesh(config.workers as usize + 1);
    let mut tasks = JoinSet::<anyhow::Result<Option<AllHistory>>>::new();

    for endpoint in endpoints.drain(1..).collect::<Vec<_>>() {
        let balance = config
            .balances
            .get(endpoint.self_id() as usize - 1)
            .copied()
            .unwrap_or(0);
        let worker = Worker::new(endpoint, journal.clone(), config.scenario, balance);
        tasks.spawn(async move { worker.run().await.map(|()| None) });
    }
    let plan = if config.scenario.banking() {
        config.plan
    } else {
        Vec::new()
    };
    let coordinator = Coordinator::new(endpoints.remove(0), config.scenario, plan);
    tasks.spawn(async move { coordinator.run().await.map(Some) });

    let mut all = AllHistory::default();
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(Some(histories)) => all = histories,
            Ok(None) => {}
            Err(err) => {
                // one violated participant kills the run; the survivors
                // would block on its silence forever
                tasks.abort_all();
                return Err(err);
            }
        }
    }
    Ok(all)
}

/// The CLI's mapping: `--mutexl` wins, balances select the lamport-clocked
/// banking core, anything else is a bare barrier run
pub fn select(mutexl: bool, balances: &[Balance]) -> Scenario {
    if mutexl {
        Scenario::Mutex
    } else if balances.is_empty() {
        Scenario::Barrier
    } else {
        Scenario::BankingLamport
    }
}

/// The default banking configuration over `workers` workers
pub fn banking_config(workers: u8, balances: Vec<Balance>) -> Config {
    Config {
        scenario: Scenario::BankingLamport,
        workers,
        balances,
        plan: bank::bank_operations(workers),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_matches_the_cli_surface() {
        assert_eq!(select(true, &[]), Scenario::Mutex);
        assert_eq!(select(true, &[10]), Scenario::Mutex);
        assert_eq!(select(false, &[10, 20]), Scenario::BankingLamport);
        assert_eq!(select(false, &[]), Scenario::Barrier);
    }

    #[test]
    fn banking_needs_one_balance_per_worker() {
        let config = banking_config(3, vec![10, 20]);
        assert!(config.validate().is_err());
        let config = banking_config(3, vec![10, 20, 30]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn worker_count_is_bounded() {
        let config = Config {
            scenario: Scenario::Barrier,
            workers: 16,
            balances: Vec::new(),
            plan: Vec::new(),
        };
        assert!(config.validate().is_err());
    }
}
