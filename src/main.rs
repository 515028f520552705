use std::sync::Arc;

use clap::Parser;
use concordia::{bank, journal::Journal, scenario};

/// Distributed-process simulator: a coordinator plus N workers exchanging
/// timestamped frames, running a synchronized barrier, a banking transfer
/// protocol with balance histories, or ricart-agrawala mutual exclusion
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of worker processes
    #[arg(short = 'p')]
    processes: u8,

    /// Run the workers' print loops under distributed mutual exclusion
    #[arg(long)]
    mutexl: bool,

    /// Initial balance for each worker, one per worker (selects the
    /// banking protocol)
    balances: Vec<i16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let scenario = scenario::select(args.mutexl, &args.balances);
    let config = scenario::Config {
        scenario,
        workers: args.processes,
        plan: if scenario.banking() {
            bank::bank_operations(args.processes)
        } else {
            Vec::new()
        },
        balances: args.balances,
    };
    let journal = Arc::new(Journal::open()?);

    let all = scenario::run(config, journal).await?;
    if scenario.banking() {
        print!("{}", bank::render_history(&all))
    }
    Ok(())
}
