// in-memory rendition of the pipe mesh: one unidirectional link per ordered
// participant pair, realized as clones of a fan-in mpsc sender per
// destination. per-sender FIFO holds because every (sender, receiver) pair
// is a single sender handle; ordering across different senders is
// unspecified, exactly like the pipe array it stands in for. frames travel
// encoded, so every hop exercises the codec and magic check

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::{
    message::{self, Message},
    ParticipantId,
};

type Frame = (ParticipantId, Bytes);

#[derive(Debug)]
pub struct Endpoint {
    self_id: ParticipantId,
    // indexed by destination; None at self_id
    links: Vec<Option<UnboundedSender<Frame>>>,
    inbox: UnboundedReceiver<Frame>,
    // frames set aside by recv_from, indexed by sender
    stash: Vec<VecDeque<Bytes>>,
}

/// Build the full mesh for `count` participants. `endpoints[i]` belongs to
/// participant `i`; dropping one tears its links down
pub fn mesh(count: usize) -> Vec<Endpoint> {
    let mut senders = Vec::with_capacity(count);
    let mut inboxes = Vec::with_capacity(count);
    for _ in 0..count {
        let (sender, inbox) = unbounded_channel();
        senders.push(sender);
        inboxes.push(inbox)
    }
    inboxes
        .into_iter()
        .enumerate()
        .map(|(id, inbox)| Endpoint {
            self_id: id as ParticipantId,
            links: senders
                .iter()
                .enumerate()
                .map(|(dest, sender)| (dest != id).then(|| sender.clone()))
                .collect(),
            inbox,
            stash: vec![VecDeque::new(); count],
        })
        .collect()
}

impl Endpoint {
    pub fn self_id(&self) -> ParticipantId {
        self.self_id
    }

    pub fn participants(&self) -> usize {
        self.links.len()
    }

    pub fn send(&self, to: ParticipantId, message: &Message) -> anyhow::Result<()> {
        let frame = message::encode(message)?;
        self.send_frame(to, frame)
    }

    /// Fan the same stamped frame out to every other participant, without
    /// re-ticking per destination
    pub fn multicast(&self, message: &Message) -> anyhow::Result<()> {
        let frame = message::encode(message)?;
        for dest in 0..self.links.len() as ParticipantId {
            if dest != self.self_id {
                self.send_frame(dest, frame.clone())?
            }
        }
        Ok(())
    }

    fn send_frame(&self, to: ParticipantId, frame: Bytes) -> anyhow::Result<()> {
        debug!("{} >>> {to} {} bytes", self.self_id, frame.len());
        let link = self
            .links
            .get(to as usize)
            .and_then(Option::as_ref)
            .ok_or(anyhow::anyhow!("no link {} -> {to}", self.self_id))?;
        link.send((self.self_id, frame))
            .map_err(|_| anyhow::anyhow!("channel closed"))
    }

    /// Block until any inbound link has a frame; stashed frames drain
    /// first, in sender order, so `recv_from` never reorders a channel
    pub async fn recv_any(&mut self) -> anyhow::Result<(ParticipantId, Message)> {
        if let Some(from) = self.stash.iter().position(|queue| !queue.is_empty()) {
            let frame = self.stash[from].pop_front().unwrap();
            return Ok((from as ParticipantId, message::decode(frame)?));
        }
        let (from, frame) = self
            .inbox
            .recv()
            .await
            .ok_or(anyhow::anyhow!("channel closed"))?;
        Ok((from, message::decode(frame)?))
    }

    /// Block until the next frame on the link from `peer`, stashing frames
    /// from other senders for later delivery
    pub async fn recv_from(&mut self, peer: ParticipantId) -> anyhow::Result<Message> {
        if let Some(frame) = self.stash[peer as usize].pop_front() {
            return Ok(message::decode(frame)?);
        }
        loop {
            let (from, frame) = self
                .inbox
                .recv()
                .await
                .ok_or(anyhow::anyhow!("channel closed"))?;
            if from == peer {
                return Ok(message::decode(frame)?);
            }
            self.stash[from as usize].push_back(frame)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::message::Body;

    use super::*;

    fn message(local_time: u16) -> Message {
        Message {
            local_time,
            body: Body::Ack,
        }
    }

    #[tokio::test]
    async fn per_sender_order_is_preserved() {
        let mut mesh = mesh(3);
        let c = mesh.remove(2);
        let b = mesh.remove(1);
        let mut a = mesh.remove(0);
        b.send(0, &message(1)).unwrap();
        c.send(0, &message(2)).unwrap();
        b.send(0, &message(3)).unwrap();
        let mut from_b = Vec::new();
        for _ in 0..3 {
            let (from, msg) = a.recv_any().await.unwrap();
            if from == 1 {
                from_b.push(msg.local_time)
            }
        }
        assert_eq!(from_b, vec![1, 3]);
    }

    #[tokio::test]
    async fn recv_from_stashes_other_senders() {
        let mut mesh = mesh(3);
        let c = mesh.remove(2);
        let b = mesh.remove(1);
        let mut a = mesh.remove(0);
        c.send(0, &message(7)).unwrap();
        c.send(0, &message(8)).unwrap();
        b.send(0, &message(9)).unwrap();
        let msg = a.recv_from(1).await.unwrap();
        assert_eq!(msg.local_time, 9);
        // the stashed frames from c come back first, still in order
        let (from, msg) = a.recv_any().await.unwrap();
        assert_eq!((from, msg.local_time), (2, 7));
        let (from, msg) = a.recv_any().await.unwrap();
        assert_eq!((from, msg.local_time), (2, 8));
    }

    #[tokio::test]
    async fn no_link_to_self() {
        let mut mesh = mesh(2);
        let a = mesh.remove(0);
        assert!(a.send(0, &message(1)).is_err());
    }
}
