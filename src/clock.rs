// the logical clock of
// Time, Clocks, and the Ordering of Events in a Distributed System
// (Commun. ACM'78)
// IR1: increment between any two successive local events, done by `tick`
// before every locally initiated send and every autonomously logged event.
// IR2 (b): upon receiving a message stamped T_m, set the counter greater
// than or equal to its present value and greater than T_m. `observe` takes
// max + 1 so that the receive itself already counts as an event; callers
// must invoke it exactly once per received frame, before dispatching on
// the frame's content

pub type LogicalTime = u16;

#[derive(Debug, Default, Clone, Copy)]
pub struct LamportClock(LogicalTime);

impl LamportClock {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn now(&self) -> LogicalTime {
        self.0
    }

    pub fn tick(&mut self) -> LogicalTime {
        self.0 += 1;
        self.0
    }

    pub fn observe(&mut self, remote: LogicalTime) -> LogicalTime {
        self.0 = self.0.max(remote) + 1;
        self.0
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Tick,
        Observe(LogicalTime),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Tick),
            (0u16..1000).prop_map(Op::Observe),
        ]
    }

    proptest! {
        #[test]
        fn strictly_increasing(ops in proptest::collection::vec(op(), 1..200)) {
            let mut clock = LamportClock::new();
            let mut previous = clock.now();
            for op in ops {
                let next = match op {
                    Op::Tick => clock.tick(),
                    Op::Observe(remote) => {
                        let next = clock.observe(remote);
                        prop_assert!(next > remote);
                        next
                    }
                };
                prop_assert!(next > previous);
                prop_assert_eq!(next, clock.now());
                previous = next;
            }
        }
    }

    #[test]
    fn observe_takes_max_plus_one() {
        let mut clock = LamportClock::new();
        assert_eq!(clock.observe(7), 8);
        assert_eq!(clock.observe(3), 9);
        assert_eq!(clock.tick(), 10);
    }
}
