// wire codec for the simulator's frames. the layout is fixed: an 8 byte
// header of four host-endian u16 fields (magic, type, payload length,
// sender's lamport time) followed by the payload. frames only ever travel
// between participants of one run, so host endianness is fine

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::{
    bank::{BalanceHistory, BalanceState, TransferOrder},
    clock::{LamportClock, LogicalTime},
    ParticipantId,
};

pub const MESSAGE_MAGIC: u16 = 0xAFAF;
pub const HEADER_LEN: usize = 8;
pub const MAX_PAYLOAD_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub local_time: LogicalTime,
    pub body: Body,
}

/// The closed set of frame types. Adding a variant forces every dispatcher
/// in the crate to handle it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Worker announcement that it reached the start barrier. Carries the
    /// formatted event-log line as payload
    Started(String),
    /// Worker announcement that it reached the termination barrier, with
    /// its log line as payload
    Done(String),
    Ack,
    Stop,
    Transfer(TransferOrder),
    BalanceHistory(BalanceHistory),
    CsRequest,
    CsReply,
    // reserved by the wire format, never sent by ricart-agrawala
    CsRelease,
}

impl Body {
    pub fn kind(&self) -> u16 {
        match self {
            Self::Started(_) => 1,
            Self::Done(_) => 2,
            Self::Ack => 3,
            Self::Stop => 4,
            Self::Transfer(_) => 5,
            Self::BalanceHistory(_) => 6,
            Self::CsRequest => 7,
            Self::CsReply => 8,
            Self::CsRelease => 9,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Started(_) => "STARTED",
            Self::Done(_) => "DONE",
            Self::Ack => "ACK",
            Self::Stop => "STOP",
            Self::Transfer(_) => "TRANSFER",
            Self::BalanceHistory(_) => "BALANCE_HISTORY",
            Self::CsRequest => "CS_REQUEST",
            Self::CsReply => "CS_REPLY",
            Self::CsRelease => "CS_RELEASE",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("bad magic {0:#06x}")]
    BadMagic(u16),
    #[error("unknown message type {0}")]
    UnknownType(u16),
    #[error("payload length {0} exceeds the {MAX_PAYLOAD_LEN} byte bound")]
    OversizedPayload(usize),
    #[error("truncated frame: {got} bytes where {want} were announced")]
    Truncated { got: usize, want: usize },
    #[error("malformed {kind} payload")]
    MalformedPayload { kind: &'static str },
    #[error("unexpected {0} in this phase")]
    UnexpectedMessage(&'static str),
    #[error("duplicate {phase} from process {from}")]
    DuplicatePhase {
        phase: &'static str,
        from: ParticipantId,
    },
    #[error("CS_REPLY with no outstanding request")]
    StrayReply,
    #[error("transfer {src} -> {dst} routed to process {to}")]
    MisroutedTransfer {
        src: ParticipantId,
        dst: ParticipantId,
        to: ParticipantId,
    },
}

/// The single place that ticks the clock and stamps an outbound frame. The
/// body closure receives the post-tick timestamp so log-line payloads can
/// embed the same value the header carries
pub fn fill_message(
    clock: &mut LamportClock,
    body: impl FnOnce(LogicalTime) -> Body,
) -> Message {
    let local_time = clock.tick();
    Message {
        local_time,
        body: body(local_time),
    }
}

pub fn encode(message: &Message) -> Result<Bytes, ProtocolViolation> {
    let mut payload = BytesMut::new();
    match &message.body {
        Body::Started(line) | Body::Done(line) => payload.put_slice(line.as_bytes()),
        Body::Transfer(order) => {
            payload.put_u8(order.src);
            payload.put_u8(order.dst);
            payload.put_i16_ne(order.amount)
        }
        Body::BalanceHistory(history) => {
            payload.put_u8(history.owner());
            payload.put_u8(
                history
                    .len()
                    .try_into()
                    .map_err(|_| ProtocolViolation::OversizedPayload(history.len()))?,
            );
            for state in history.states() {
                payload.put_i16_ne(state.balance);
                payload.put_u16_ne(state.time);
                payload.put_i16_ne(state.pending_in)
            }
        }
        Body::Ack | Body::Stop | Body::CsRequest | Body::CsReply | Body::CsRelease => {}
    }
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolViolation::OversizedPayload(payload.len()));
    }
    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u16_ne(MESSAGE_MAGIC);
    frame.put_u16_ne(message.body.kind());
    frame.put_u16_ne(payload.len() as u16);
    frame.put_u16_ne(message.local_time);
    frame.put_slice(&payload);
    Ok(frame.freeze())
}

pub fn decode(mut frame: Bytes) -> Result<Message, ProtocolViolation> {
    if frame.len() < HEADER_LEN {
        return Err(ProtocolViolation::Truncated {
            got: frame.len(),
            want: HEADER_LEN,
        });
    }
    let magic = frame.get_u16_ne();
    if magic != MESSAGE_MAGIC {
        return Err(ProtocolViolation::BadMagic(magic));
    }
    let kind = frame.get_u16_ne();
    let payload_len = frame.get_u16_ne() as usize;
    let local_time = frame.get_u16_ne();
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtocolViolation::OversizedPayload(payload_len));
    }
    if frame.len() != payload_len {
        return Err(ProtocolViolation::Truncated {
            got: frame.len() + HEADER_LEN,
            want: HEADER_LEN + payload_len,
        });
    }
    let body = decode_payload(kind, frame)?;
    Ok(Message { local_time, body })
}

fn decode_payload(kind: u16, mut payload: Bytes) -> Result<Body, ProtocolViolation> {
    let text = |payload: Bytes, kind| {
        String::from_utf8(payload.to_vec())
            .map_err(|_| ProtocolViolation::MalformedPayload { kind })
    };
    let body = match kind {
        1 => Body::Started(text(payload, "STARTED")?),
        2 => Body::Done(text(payload, "DONE")?),
        3 => expect_empty(Body::Ack, &payload)?,
        4 => expect_empty(Body::Stop, &payload)?,
        5 => {
            if payload.len() != 4 {
                return Err(ProtocolViolation::MalformedPayload { kind: "TRANSFER" });
            }
            Body::Transfer(TransferOrder {
                src: payload.get_u8(),
                dst: payload.get_u8(),
                amount: payload.get_i16_ne(),
            })
        }
        6 => {
            let malformed = ProtocolViolation::MalformedPayload {
                kind: "BALANCE_HISTORY",
            };
            if payload.len() < 2 {
                return Err(malformed);
            }
            let owner = payload.get_u8();
            let len = payload.get_u8() as usize;
            if payload.len() != len * 6 {
                return Err(malformed);
            }
            let mut states = Vec::with_capacity(len);
            for index in 0..len {
                let state = BalanceState {
                    balance: payload.get_i16_ne(),
                    time: payload.get_u16_ne(),
                    pending_in: payload.get_i16_ne(),
                };
                // a history slot always sits at its own timestamp's index
                if state.time as usize != index {
                    return Err(malformed);
                }
                states.push(state)
            }
            Body::BalanceHistory(BalanceHistory::from_parts(owner, states))
        }
        7 => expect_empty(Body::CsRequest, &payload)?,
        8 => expect_empty(Body::CsReply, &payload)?,
        9 => expect_empty(Body::CsRelease, &payload)?,
        other => return Err(ProtocolViolation::UnknownType(other)),
    };
    Ok(body)
}

fn expect_empty(body: Body, payload: &Bytes) -> Result<Body, ProtocolViolation> {
    if payload.is_empty() {
        Ok(body)
    } else {
        Err(ProtocolViolation::MalformedPayload { kind: body.name() })
    }
}
