// the two product log sinks of a run: `events.log` for protocol events and
// `pipes.log` for per-iteration traces of the critical-section workload.
// both are process-wide and line-atomic; tasks share one `Journal` behind
// an Arc and each line is written under the sink's lock. diagnostics go
// through `tracing` instead and never end up here

use std::{
    fs::OpenOptions,
    io::Write,
    sync::Mutex,
};

use crate::{bank::Balance, clock::LogicalTime, ParticipantId};

pub const EVENTS_LOG: &str = "events.log";
pub const PIPES_LOG: &str = "pipes.log";

pub struct Journal {
    events: Mutex<Box<dyn Write + Send>>,
    pipes: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Journal {{ .. }}")
    }
}

impl Journal {
    pub fn open() -> anyhow::Result<Self> {
        let open = |path| {
            anyhow::Ok(OpenOptions::new().create(true).append(true).open(path)?)
        };
        Ok(Self::with_sinks(
            Box::new(open(EVENTS_LOG)?),
            Box::new(open(PIPES_LOG)?),
        ))
    }

    pub fn with_sinks(
        events: Box<dyn Write + Send>,
        pipes: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            events: Mutex::new(events),
            pipes: Mutex::new(pipes),
        }
    }

    pub fn event(&self, line: &str) -> anyhow::Result<()> {
        Self::append(&self.events, line)
    }

    pub fn pipe(&self, line: &str) -> anyhow::Result<()> {
        Self::append(&self.pipes, line)
    }

    fn append(sink: &Mutex<Box<dyn Write + Send>>, line: &str) -> anyhow::Result<()> {
        let mut sink = sink
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned log sink"))?;
        writeln!(sink, "{line}")?;
        sink.flush()?;
        Ok(())
    }
}

pub fn started_line(
    t: LogicalTime,
    id: ParticipantId,
    pid: i32,
    ppid: i32,
    balance: Balance,
) -> String {
    format!("{t}: process {id} (pid {pid:5}, parent {ppid:5}) has STARTED with balance ${balance:2}")
}

pub fn received_all_started_line(t: LogicalTime, id: ParticipantId) -> String {
    format!("{t}: process {id} received all STARTED messages")
}

pub fn transfer_out_line(
    t: LogicalTime,
    id: ParticipantId,
    amount: Balance,
    dst: ParticipantId,
) -> String {
    format!("{t}: process {id} transferred ${amount:2} to process {dst}")
}

pub fn transfer_in_line(
    t: LogicalTime,
    id: ParticipantId,
    amount: Balance,
    src: ParticipantId,
) -> String {
    format!("{t}: process {id} received ${amount:2} from process {src}")
}

pub fn done_line(t: LogicalTime, id: ParticipantId, balance: Balance) -> String {
    format!("{t}: process {id} has DONE with balance ${balance:2}")
}

pub fn received_all_done_line(t: LogicalTime, id: ParticipantId) -> String {
    format!("{t}: process {id} received all DONE messages")
}

pub fn loop_operation_line(id: ParticipantId, iteration: usize, total: usize) -> String {
    format!("process {id} is doing {iteration} iteration out of {total}")
}

// bracketing markers around each loop print, so a reader of the pipe log
// can check that no two workers ever hold the critical section at once
pub fn cs_enter_line(id: ParticipantId, iteration: usize) -> String {
    format!("process {id} entered critical section (iteration {iteration})")
}

pub fn cs_leave_line(id: ParticipantId, iteration: usize) -> String {
    format!("process {id} left critical section (iteration {iteration})")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn lines_land_in_their_sink() {
        let events = Capture::default();
        let pipes = Capture::default();
        let journal = Journal::with_sinks(Box::new(events.clone()), Box::new(pipes.clone()));
        journal.event(&started_line(0, 1, 100, 99, 10)).unwrap();
        journal.pipe(&loop_operation_line(1, 1, 5)).unwrap();
        let events = String::from_utf8(events.0.lock().unwrap().clone()).unwrap();
        let pipes = String::from_utf8(pipes.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            events,
            "0: process 1 (pid   100, parent    99) has STARTED with balance $10\n",
        );
        assert_eq!(pipes, "process 1 is doing 1 iteration out of 5\n");
    }
}
