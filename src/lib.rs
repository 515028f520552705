// a small distributed-process simulator: a parent coordinator plus a fixed
// set of workers, one task each, exchanging length-delimited frames over
// point-to-point links. the workers run three protocols over one dispatch
// loop and one logical clock: a two-phase STARTED/DONE barrier, a banking
// transfer flow with lamport-ordered pending accounting, and
// ricart-agrawala mutual exclusion

pub mod bank;
pub mod clock;
pub mod coordinator;
pub mod journal;
pub mod message;
pub mod net;
pub mod ricart_agrawala;
pub mod scenario;
pub mod worker;

/// Index of a participant in the run. 0 is the coordinator, 1..=N are
/// workers. Stable for the whole run.
pub type ParticipantId = u8;

pub const PARENT_ID: ParticipantId = 0;

/// Largest worker id the wire format can express (history payloads index
/// workers with a single byte alongside the length).
pub const MAX_PROCESS_ID: ParticipantId = 15;
