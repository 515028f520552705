// the optimal algorithm of
// An Optimal Algorithm for Mutual Exclusion in Computer Networks
// (Commun. ACM'81)
// a requester broadcasts one timestamped CS_REQUEST and may enter once
// every other participant has replied. a participant that is itself
// requesting withholds its reply from any request that loses the
// (timestamp, id) comparison and pays the debt when it leaves the critical
// section. no separate RELEASE message exists; the deferred replies are
// the release
// (the module is named for the algorithm, `mutex` alone would claim too
// much)

use std::mem::replace;

use crate::{
    clock::LogicalTime,
    message::ProtocolViolation,
    ParticipantId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arbitration {
    ReplyNow,
    Defer,
}

#[derive(Debug)]
pub struct MutexState {
    self_id: ParticipantId,
    am_requesting: bool,
    my_request_time: LogicalTime,
    replies_received: usize,
    deferred: Vec<bool>,
}

impl MutexState {
    pub fn new(self_id: ParticipantId, participants: usize) -> Self {
        Self {
            self_id,
            am_requesting: false,
            my_request_time: 0,
            replies_received: 0,
            deferred: vec![false; participants],
        }
    }

    pub fn is_requesting(&self) -> bool {
        self.am_requesting
    }

    pub fn replies(&self) -> usize {
        self.replies_received
    }

    /// Arm the state for one outbound request stamped `request_time`
    pub fn begin_request(&mut self, request_time: LogicalTime) -> anyhow::Result<()> {
        let replaced = replace(&mut self.am_requesting, true);
        anyhow::ensure!(!replaced, "concurrent request");
        self.my_request_time = request_time;
        self.replies_received = 0;
        self.deferred.fill(false);
        Ok(())
    }

    pub fn record_reply(&mut self) -> Result<usize, ProtocolViolation> {
        if !self.am_requesting {
            return Err(ProtocolViolation::StrayReply);
        }
        self.replies_received += 1;
        Ok(self.replies_received)
    }

    /// Decide the fate of a request from `from` stamped `request_time`:
    /// reply at once unless our own outstanding request wins the
    /// (timestamp, id) comparison, in which case the reply is deferred
    /// until we leave the critical section
    pub fn arbitrate(&mut self, from: ParticipantId, request_time: LogicalTime) -> Arbitration {
        let loses_to_us = self.am_requesting
            && (request_time, from) > (self.my_request_time, self.self_id);
        if loses_to_us {
            self.deferred[from as usize] = true;
            Arbitration::Defer
        } else {
            Arbitration::ReplyNow
        }
    }

    /// Disarm the request and surrender the deferred replies, in id order
    pub fn end_request(&mut self) -> Vec<ParticipantId> {
        self.am_requesting = false;
        let mut owed = Vec::new();
        for (peer, deferred) in self.deferred.iter_mut().enumerate() {
            if replace(deferred, false) {
                owed.push(peer as ParticipantId)
            }
        }
        owed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_processes_always_reply() {
        let mut state = MutexState::new(2, 4);
        assert_eq!(state.arbitrate(1, 5), Arbitration::ReplyNow);
        assert_eq!(state.arbitrate(3, 1), Arbitration::ReplyNow);
    }

    #[test]
    fn earlier_requests_win() {
        let mut state = MutexState::new(2, 4);
        state.begin_request(5).unwrap();
        assert_eq!(state.arbitrate(3, 4), Arbitration::ReplyNow);
        assert_eq!(state.arbitrate(3, 6), Arbitration::Defer);
    }

    #[test]
    fn equal_timestamps_break_toward_the_smaller_id() {
        let mut state = MutexState::new(2, 4);
        state.begin_request(5).unwrap();
        assert_eq!(state.arbitrate(1, 5), Arbitration::ReplyNow);
        assert_eq!(state.arbitrate(3, 5), Arbitration::Defer);
    }

    #[test]
    fn deferred_replies_drain_on_release() {
        let mut state = MutexState::new(1, 4);
        state.begin_request(2).unwrap();
        assert_eq!(state.arbitrate(3, 7), Arbitration::Defer);
        assert_eq!(state.arbitrate(2, 9), Arbitration::Defer);
        assert_eq!(state.end_request(), vec![2, 3]);
        assert_eq!(state.end_request(), vec![]);
    }

    #[test]
    fn replies_only_count_while_requesting() {
        let mut state = MutexState::new(1, 3);
        assert_eq!(state.record_reply(), Err(ProtocolViolation::StrayReply));
        state.begin_request(1).unwrap();
        assert_eq!(state.record_reply(), Ok(1));
        assert_eq!(state.record_reply(), Ok(2));
    }

    #[test]
    fn no_nested_requests() {
        let mut state = MutexState::new(1, 3);
        state.begin_request(1).unwrap();
        assert!(state.begin_request(2).is_err());
    }
}
