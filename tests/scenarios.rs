// end-to-end runs of the simulator over the in-memory mesh, checking the
// protocol invariants from the outside: what lands in the event and pipe
// logs and what the coordinator's aggregated histories say

use std::{
    io::Write,
    sync::{Arc, Mutex},
};

use concordia::{
    bank::{self, TransferOrder},
    journal::Journal,
    scenario::{self, Config, Scenario},
};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn captured_journal() -> (Arc<Journal>, Capture, Capture) {
    let events = Capture::default();
    let pipes = Capture::default();
    let journal = Journal::with_sinks(Box::new(events.clone()), Box::new(pipes.clone()));
    (Arc::new(journal), events, pipes)
}

#[tokio::test(flavor = "multi_thread")]
async fn barrier_only_run_with_an_empty_plan() {
    let (journal, events, _) = captured_journal();
    let config = Config {
        scenario: Scenario::BankingLamport,
        workers: 3,
        balances: vec![10, 10, 10],
        plan: Vec::new(),
    };
    let all = scenario::run(config, journal).await.unwrap();

    // balances never move without transfers
    assert_eq!(all.len(), 3);
    for history in all.iter() {
        assert_eq!(history.last_balance(), 10);
        assert!(history
            .states()
            .iter()
            .all(|state| state.balance == 10 && state.pending_in == 0));
    }

    let lines = events.lines();
    for id in 1..=3u8 {
        let of_worker = |needle: &str| {
            lines
                .iter()
                .filter(|line| line.contains(&format!("process {id} ")) && line.contains(needle))
                .count()
        };
        // the announcement and the barrier completion both mention STARTED
        assert_eq!(of_worker("STARTED"), 2);
        assert_eq!(of_worker("received all STARTED messages"), 1);
        assert_eq!(of_worker("has DONE"), 1);
        assert_eq!(of_worker("received all DONE messages"), 1);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn chain_transfers_move_the_money_and_conserve_it() {
    let (journal, events, _) = captured_journal();
    let config = scenario::banking_config(3, vec![10, 20, 30]);
    let all = scenario::run(config, journal).await.unwrap();

    let finals = all
        .iter()
        .map(|history| (history.owner(), history.last_balance()))
        .collect::<Vec<_>>();
    assert_eq!(finals, vec![(1, 10), (2, 19), (3, 31)]);
    assert_eq!(all.total_balance(), 60);

    // per-worker event timestamps never run backwards
    for id in 1..=3u8 {
        let stamps = events
            .lines()
            .iter()
            .filter(|line| line.contains(&format!("process {id} ")))
            .map(|line| {
                line.split(':')
                    .next()
                    .unwrap()
                    .parse::<u16>()
                    .unwrap()
            })
            .collect::<Vec<_>>();
        assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]), "{stamps:?}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn histories_have_no_gaps_and_pending_covers_the_flight_window() {
    let (journal, _, _) = captured_journal();
    let config = scenario::banking_config(3, vec![10, 20, 30]);
    let all = scenario::run(config, journal).await.unwrap();

    for history in all.iter() {
        for (index, state) in history.states().iter().enumerate() {
            assert_eq!(state.time as usize, index);
        }
    }

    // worker 2 receives exactly one incoming transfer ($1 from worker 1);
    // the flight window shows up as a run of pending slots at the old
    // balance, closed by the slot where the credit lands
    let history = &all[1];
    let pending = history
        .states()
        .iter()
        .filter(|state| state.pending_in != 0)
        .collect::<Vec<_>>();
    assert!(!pending.is_empty());
    assert!(pending.iter().all(|state| state.pending_in == 1 && state.balance == 20));
    let last = pending.last().unwrap().time as usize;
    assert_eq!(history.states()[last + 1].balance, 21);
    assert_eq!(history.states()[last + 1].pending_in, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn one_worker_in_the_critical_section_at_a_time() {
    let (journal, _, pipes) = captured_journal();
    let config = Config {
        scenario: Scenario::Mutex,
        workers: 3,
        balances: Vec::new(),
        plan: Vec::new(),
    };
    let all = scenario::run(config, journal).await.unwrap();
    assert_eq!(all.len(), 0);

    // the pipe sink's lock makes the captured order the real interleaving
    let mut holder: Option<u8> = None;
    let mut iterations = [0usize; 4];
    for line in pipes.lines() {
        let id = line
            .strip_prefix("process ")
            .and_then(|rest| rest.split(' ').next())
            .unwrap()
            .parse::<u8>()
            .unwrap();
        if line.contains("entered critical section") {
            assert_eq!(holder, None, "{line}");
            holder = Some(id)
        } else if line.contains("left critical section") {
            assert_eq!(holder, Some(id), "{line}");
            holder = None
        } else {
            assert!(line.contains("iteration out of"), "{line}");
            assert_eq!(holder, Some(id), "print outside the critical section");
            iterations[id as usize] += 1
        }
    }
    assert_eq!(holder, None);
    // worker i performs 5 * i iterations
    assert_eq!(iterations, [0, 5, 10, 15]);
}

#[tokio::test(flavor = "multi_thread")]
async fn plain_banking_records_no_pending_windows() {
    let (journal, _, _) = captured_journal();
    let config = Config {
        scenario: Scenario::Banking,
        workers: 3,
        balances: vec![10, 20, 30],
        plan: bank::bank_operations(3),
    };
    let all = scenario::run(config, journal).await.unwrap();
    let finals = all
        .iter()
        .map(|history| history.last_balance())
        .collect::<Vec<_>>();
    assert_eq!(finals, vec![10, 19, 31]);
    for history in all.iter() {
        assert!(history.states().iter().all(|state| state.pending_in == 0));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn bare_barrier_runs_collect_no_histories() {
    let (journal, events, pipes) = captured_journal();
    let config = Config {
        scenario: Scenario::Barrier,
        workers: 2,
        balances: Vec::new(),
        plan: Vec::new(),
    };
    let all = scenario::run(config, journal).await.unwrap();
    assert_eq!(all.len(), 0);
    assert!(pipes.lines().is_empty());
    assert_eq!(
        events
            .lines()
            .iter()
            .filter(|line| line.contains("received all DONE"))
            .count(),
        2,
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn a_custom_plan_replaces_the_default_workload() {
    let (journal, _, _) = captured_journal();
    let config = Config {
        scenario: Scenario::BankingLamport,
        workers: 2,
        balances: vec![5, 5],
        plan: vec![
            TransferOrder { src: 2, dst: 1, amount: 3 },
            TransferOrder { src: 2, dst: 1, amount: 2 },
        ],
    };
    let all = scenario::run(config, journal).await.unwrap();
    assert_eq!(all[0].last_balance(), 10);
    assert_eq!(all[1].last_balance(), 0);
    assert_eq!(all.total_balance(), 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn overdraft_is_the_workload_generators_problem() {
    // the core does not police balances; a plan that overdraws still
    // conserves the total
    let (journal, _, _) = captured_journal();
    let config = Config {
        scenario: Scenario::BankingLamport,
        workers: 2,
        balances: vec![1, 1],
        plan: vec![TransferOrder { src: 1, dst: 2, amount: 5 }],
    };
    let all = scenario::run(config, journal).await.unwrap();
    assert_eq!(all[0].last_balance(), -4);
    assert_eq!(all[1].last_balance(), 6);
    assert_eq!(all.total_balance(), 2);
}

#[test]
fn default_plan_matches_the_documented_chain() {
    assert_eq!(
        bank::bank_operations(4),
        vec![
            TransferOrder { src: 1, dst: 2, amount: 1 },
            TransferOrder { src: 2, dst: 3, amount: 2 },
            TransferOrder { src: 3, dst: 4, amount: 3 },
            TransferOrder { src: 4, dst: 1, amount: 1 },
        ],
    );
}
