// the per-worker protocol engine. one task per worker, one receive loop,
// one logical clock. every protocol the worker speaks (the STARTED/DONE
// barrier, banking transfers, ricart-agrawala) funnels its ingress through
// `route`, so frames of one protocol arriving while the worker blocks
// inside another are never lost. the clock observes every received stamp
// before any dispatch on content

use std::{mem::replace, sync::Arc};

use tracing::debug;

use crate::{
    bank::{Balance, BalanceHistory, TransferOrder},
    clock::{LamportClock, LogicalTime},
    journal::{self, Journal},
    message::{fill_message, Body, Message, ProtocolViolation},
    net::Endpoint,
    ricart_agrawala::{Arbitration, MutexState},
    scenario::Scenario,
    ParticipantId, PARENT_ID,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Started,
    Done,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Done => "DONE",
        }
    }
}

#[derive(Debug)]
pub struct Worker {
    endpoint: Endpoint,
    journal: Arc<Journal>,
    scenario: Scenario,
    clock: LamportClock,
    balance: Balance,
    history: BalanceHistory,
    mutex: MutexState,
    started_from: Vec<bool>,
    done_from: Vec<bool>,
    stopped: bool,
}

impl Worker {
    pub fn new(
        endpoint: Endpoint,
        journal: Arc<Journal>,
        scenario: Scenario,
        balance: Balance,
    ) -> Self {
        let participants = endpoint.participants();
        let self_id = endpoint.self_id();
        Self {
            endpoint,
            journal,
            scenario,
            clock: LamportClock::new(),
            balance,
            history: BalanceHistory::new(self_id, balance),
            mutex: MutexState::new(self_id, participants),
            started_from: vec![false; participants],
            done_from: vec![false; participants],
            stopped: false,
        }
    }

    fn self_id(&self) -> ParticipantId {
        self.endpoint.self_id()
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        self.announce_started()?;
        self.await_phase(Phase::Started).await?;

        if self.scenario.mutex() {
            self.loop_iterations().await?
        } else {
            // banking and barrier runs idle here until the coordinator's
            // STOP; transfers are handled by `route` as they arrive
            while !self.stopped {
                let (from, message) = self.recv_synced().await?;
                self.route(from, message)?
            }
        }

        self.announce_done()?;
        self.await_phase(Phase::Done).await?;

        if self.scenario.banking() {
            self.send_history()?
        }
        Ok(())
    }

    fn announce_started(&mut self) -> anyhow::Result<()> {
        let pid = rustix::process::getpid().as_raw_nonzero().get();
        let ppid = rustix::process::getppid().map(|p| p.as_raw_nonzero().get());
        let line = journal::started_line(
            self.clock.now(),
            self.self_id(),
            pid,
            ppid.unwrap_or(0),
            self.balance,
        );
        self.journal.event(&line)?;
        let message = fill_message(&mut self.clock, |_| Body::Started(line));
        self.endpoint.multicast(&message)
    }

    fn announce_done(&mut self) -> anyhow::Result<()> {
        // the DONE record is an autonomous local event and counts on the
        // clock by itself, then the multicast stamps one tick later
        self.clock.tick();
        let line = journal::done_line(self.clock.now(), self.self_id(), self.balance);
        self.journal.event(&line)?;
        let message = fill_message(&mut self.clock, |_| Body::Done(line));
        self.endpoint.multicast(&message)
    }

    /// Block until `phase` has been confirmed by every other worker,
    /// routing whatever else arrives in the meantime
    async fn await_phase(&mut self, phase: Phase) -> anyhow::Result<()> {
        while !self.phase_satisfied(phase) {
            let (from, message) = self.recv_synced().await?;
            self.route(from, message)?
        }
        let line = match phase {
            Phase::Started => journal::received_all_started_line(self.clock.now(), self.self_id()),
            Phase::Done => journal::received_all_done_line(self.clock.now(), self.self_id()),
        };
        self.journal.event(&line)
    }

    fn phase_satisfied(&self, phase: Phase) -> bool {
        let set = match phase {
            Phase::Started => &self.started_from,
            Phase::Done => &self.done_from,
        };
        // every worker except ourselves; the coordinator never announces
        let expected = self.endpoint.participants() - 2;
        set.iter().filter(|seen| **seen).count() >= expected
    }

    async fn recv_synced(&mut self) -> anyhow::Result<(ParticipantId, Message)> {
        let (from, message) = self.endpoint.recv_any().await?;
        self.clock.observe(message.local_time);
        Ok((from, message))
    }

    /// The single dispatcher. Every inbound frame of every phase lands
    /// here once the clock has observed its stamp
    fn route(&mut self, from: ParticipantId, message: Message) -> anyhow::Result<()> {
        debug!("{} <<< {from} {:?}", self.self_id(), message.body);
        match message.body {
            Body::Started(_) => self.mark_phase(Phase::Started, from),
            Body::Done(_) => self.mark_phase(Phase::Done, from),
            Body::Stop => {
                self.stopped = true;
                Ok(())
            }
            Body::Transfer(order) => self.on_transfer(order, message.local_time),
            Body::CsRequest => self.on_cs_request(from, message.local_time),
            Body::CsReply => {
                self.mutex.record_reply()?;
                Ok(())
            }
            Body::Ack | Body::BalanceHistory(_) | Body::CsRelease => {
                Err(ProtocolViolation::UnexpectedMessage(message.body.name()).into())
            }
        }
    }

    fn mark_phase(&mut self, phase: Phase, from: ParticipantId) -> anyhow::Result<()> {
        if from == PARENT_ID {
            return Err(ProtocolViolation::UnexpectedMessage(phase.name()).into());
        }
        let seen = match phase {
            Phase::Started => &mut self.started_from,
            Phase::Done => &mut self.done_from,
        }
        .get_mut(from as usize)
        .ok_or(anyhow::anyhow!("participant {from} out of range"))?;
        if replace(seen, true) {
            return Err(ProtocolViolation::DuplicatePhase {
                phase: phase.name(),
                from,
            }
            .into());
        }
        Ok(())
    }

    fn on_transfer(&mut self, order: TransferOrder, sent_at: LogicalTime) -> anyhow::Result<()> {
        if !self.scenario.banking() || self.stopped {
            return Err(ProtocolViolation::UnexpectedMessage("TRANSFER").into());
        }
        let id = self.self_id();
        if order.src == id {
            // outgoing leg. stamping first makes the debit land exactly on
            // the send timestamp
            let message = fill_message(&mut self.clock, |_| Body::Transfer(order));
            let send_t = self.clock.now();
            self.balance -= order.amount;
            self.history.update(self.balance, send_t, send_t, 0);
            self.journal
                .event(&journal::transfer_out_line(send_t, id, order.amount, order.dst))?;
            self.endpoint.send(order.dst, &message)
        } else if order.dst == id {
            // incoming leg; the clock already observed the stamp, so `now`
            // is the receive time and [sent_at, now) is the flight window
            let recv_t = self.clock.now();
            if self.scenario.pending_windows() {
                self.history.mark_pending(order.amount, sent_at, recv_t)
            }
            self.balance += order.amount;
            self.history.update(self.balance, recv_t, recv_t, 0);
            self.journal
                .event(&journal::transfer_in_line(recv_t, id, order.amount, order.src))?;
            let ack = fill_message(&mut self.clock, |_| Body::Ack);
            self.endpoint.send(PARENT_ID, &ack)
        } else {
            Err(ProtocolViolation::MisroutedTransfer {
                src: order.src,
                dst: order.dst,
                to: id,
            }
            .into())
        }
    }

    fn on_cs_request(
        &mut self,
        from: ParticipantId,
        request_time: LogicalTime,
    ) -> anyhow::Result<()> {
        match self.mutex.arbitrate(from, request_time) {
            Arbitration::ReplyNow => {
                let reply = fill_message(&mut self.clock, |_| Body::CsReply);
                self.endpoint.send(from, &reply)
            }
            Arbitration::Defer => Ok(()),
        }
    }

    async fn loop_iterations(&mut self) -> anyhow::Result<()> {
        let id = self.self_id();
        let total = id as usize * 5;
        for iteration in 1..=total {
            self.enter_critical_section().await?;
            self.journal.pipe(&journal::cs_enter_line(id, iteration))?;
            self.journal
                .pipe(&journal::loop_operation_line(id, iteration, total))?;
            self.journal.pipe(&journal::cs_leave_line(id, iteration))?;
            self.leave_critical_section()?
        }
        Ok(())
    }

    /// Broadcast one timestamped request and collect a reply from every
    /// other participant, the coordinator included. Requests, DONEs and
    /// replies interleave freely while we wait
    async fn enter_critical_section(&mut self) -> anyhow::Result<()> {
        let request = fill_message(&mut self.clock, |_| Body::CsRequest);
        self.mutex.begin_request(request.local_time)?;
        self.endpoint.multicast(&request)?;
        let expected = self.endpoint.participants() - 1;
        while self.mutex.replies() < expected {
            let (from, message) = self.recv_synced().await?;
            self.route(from, message)?
        }
        Ok(())
    }

    fn leave_critical_section(&mut self) -> anyhow::Result<()> {
        for peer in self.mutex.end_request() {
            let reply = fill_message(&mut self.clock, |_| Body::CsReply);
            self.endpoint.send(peer, &reply)?
        }
        Ok(())
    }

    fn send_history(&mut self) -> anyhow::Result<()> {
        // one more tick for the finalization event, then the trailing
        // balance is carried out to the final logical time
        self.clock.tick();
        self.history.extend_to(self.clock.now());
        let message = fill_message(&mut self.clock, |_| {
            Body::BalanceHistory(self.history.clone())
        });
        self.endpoint.send(PARENT_ID, &message)
    }
}
