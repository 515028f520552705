// the parent's driver. it never announces STARTED/DONE itself: it gathers
// the workers' announcements, runs the transfer plan (banking runs) or
// grants every critical-section request on sight (mutex runs), fences the
// run with STOP, and finally assembles the balance histories. it shares
// the workers' clock discipline: every received stamp is observed before
// anything dispatches on the frame

use tracing::debug;

use crate::{
    bank::{AllHistory, BalanceHistory, TransferOrder},
    clock::LamportClock,
    message::{fill_message, Body, Message, ProtocolViolation},
    net::Endpoint,
    scenario::Scenario,
    ParticipantId,
};

#[derive(Debug)]
pub struct Coordinator {
    endpoint: Endpoint,
    scenario: Scenario,
    clock: LamportClock,
    plan: Vec<TransferOrder>,
}

impl Coordinator {
    pub fn new(endpoint: Endpoint, scenario: Scenario, plan: Vec<TransferOrder>) -> Self {
        Self {
            endpoint,
            scenario,
            clock: LamportClock::new(),
            plan,
        }
    }

    fn workers(&self) -> usize {
        self.endpoint.participants() - 1
    }

    pub async fn run(mut self) -> anyhow::Result<AllHistory> {
        self.collect_announcements("STARTED").await?;

        if self.scenario.mutex() {
            // no STOP in mutex runs; the workers retire on their own once
            // their iterations are done
            self.grant_until_all_done().await?;
            return Ok(AllHistory::default());
        }

        for order in std::mem::take(&mut self.plan) {
            self.transfer(order).await?
        }
        let stop = fill_message(&mut self.clock, |_| Body::Stop);
        self.endpoint.multicast(&stop)?;
        self.collect_announcements("DONE").await?;

        let mut all = AllHistory::default();
        if self.scenario.banking() {
            for peer in 1..=self.workers() as ParticipantId {
                all.push(self.collect_history(peer).await?)
            }
        }
        Ok(all)
    }

    /// Gather one STARTED (resp. DONE) per worker, in worker order. Each
    /// worker's first frame in the phase must be the announcement; its
    /// remaining traffic stays queued on the other links
    async fn collect_announcements(&mut self, phase: &'static str) -> anyhow::Result<()> {
        for peer in 1..=self.workers() as ParticipantId {
            let message = self.recv_synced_from(peer).await?;
            match (&message.body, phase) {
                (Body::Started(_), "STARTED") | (Body::Done(_), "DONE") => {
                    debug!("0 <<< {peer} {phase}")
                }
                _ => return Err(ProtocolViolation::UnexpectedMessage(message.body.name()).into()),
            }
        }
        Ok(())
    }

    /// Hand the order to its source worker, then drain frames until the
    /// destination's ACK confirms the money landed. The ACK fences the
    /// plan: the next order only leaves after it
    async fn transfer(&mut self, order: TransferOrder) -> anyhow::Result<()> {
        anyhow::ensure!(order.src != order.dst, "transfer to self");
        anyhow::ensure!(order.amount > 0, "non-positive transfer");
        let within = 1..=self.workers() as ParticipantId;
        anyhow::ensure!(
            within.contains(&order.src) && within.contains(&order.dst),
            "transfer outside the worker set",
        );
        let message = fill_message(&mut self.clock, |_| Body::Transfer(order));
        self.endpoint.send(order.src, &message)?;
        loop {
            let (_, message) = self.recv_synced().await?;
            if matches!(message.body, Body::Ack) {
                return Ok(());
            }
        }
    }

    /// Mutex-mode tail: reply to every request on sight (the coordinator
    /// never competes for the critical section) until every worker has
    /// announced DONE
    async fn grant_until_all_done(&mut self) -> anyhow::Result<()> {
        let mut done_from = vec![false; self.endpoint.participants()];
        let mut remaining = self.workers();
        while remaining > 0 {
            let (from, message) = self.recv_synced().await?;
            match message.body {
                Body::CsRequest => {
                    let reply = fill_message(&mut self.clock, |_| Body::CsReply);
                    self.endpoint.send(from, &reply)?
                }
                Body::Done(_) => {
                    if std::mem::replace(&mut done_from[from as usize], true) {
                        return Err(ProtocolViolation::DuplicatePhase {
                            phase: "DONE",
                            from,
                        }
                        .into());
                    }
                    remaining -= 1
                }
                _ => {
                    return Err(
                        ProtocolViolation::UnexpectedMessage(message.body.name()).into()
                    )
                }
            }
        }
        Ok(())
    }

    async fn collect_history(&mut self, peer: ParticipantId) -> anyhow::Result<BalanceHistory> {
        let message = self.recv_synced_from(peer).await?;
        match message.body {
            Body::BalanceHistory(history) => {
                anyhow::ensure!(
                    history.owner() == peer,
                    "history owned by {} arrived from {peer}",
                    history.owner(),
                );
                Ok(history)
            }
            other => Err(ProtocolViolation::UnexpectedMessage(other.name()).into()),
        }
    }

    async fn recv_synced(&mut self) -> anyhow::Result<(ParticipantId, Message)> {
        let (from, message) = self.endpoint.recv_any().await?;
        self.clock.observe(message.local_time);
        Ok((from, message))
    }

    async fn recv_synced_from(&mut self, peer: ParticipantId) -> anyhow::Result<Message> {
        let message = self.endpoint.recv_from(peer).await?;
        self.clock.observe(message.local_time);
        Ok(message)
    }
}
