//! 802.11 frames as structured values.
//!
//! Frames never get serialized to bytes; their size only feeds airtime
//! arithmetic. The `duration` field announces how long the medium stays
//! reserved after the frame ends and drives virtual carrier sense (NAV).

use std::fmt;

use crate::net::Packet;
use crate::simulation::time::SimTime;
use crate::simulation::types::RadioId;

pub const RTS_SIZE: usize = 20;
pub const CTS_SIZE: usize = 14;
pub const ACK_SIZE: usize = 14;
pub const DATA_HEADER_SIZE: usize = 34;
/// Sequence numbers wrap at this value.
pub const MAX_SEQ: u16 = 4096;

/// Link-layer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress(pub u32);

impl MacAddress {
    /// Broadcast.
    pub const ANY: MacAddress = MacAddress(u32::MAX);
    /// Loopback.
    pub const LOOP: MacAddress = MacAddress(u32::MAX - 1);
    /// No address. Ids from here up are reserved.
    pub const NULL: MacAddress = MacAddress(u32::MAX - 2);
}

impl From<RadioId> for MacAddress {
    fn from(id: RadioId) -> Self {
        MacAddress(id.0)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MacAddress::ANY => write!(f, "ANY"),
            MacAddress::LOOP => write!(f, "LOOP"),
            MacAddress::NULL => write!(f, "NULL"),
            MacAddress(a) => write!(f, "{a}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Rts,
    Cts,
    Ack,
    Data,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MacFrame {
    Rts {
        dst: MacAddress,
        src: MacAddress,
        duration: SimTime,
    },
    Cts {
        dst: MacAddress,
        duration: SimTime,
    },
    Ack {
        dst: MacAddress,
        duration: SimTime,
    },
    Data {
        dst: MacAddress,
        src: MacAddress,
        duration: SimTime,
        /// `None` on broadcast frames.
        seq: Option<u16>,
        retry: bool,
        body: Packet,
    },
}

impl MacFrame {
    pub fn kind(&self) -> FrameKind {
        match self {
            MacFrame::Rts { .. } => FrameKind::Rts,
            MacFrame::Cts { .. } => FrameKind::Cts,
            MacFrame::Ack { .. } => FrameKind::Ack,
            MacFrame::Data { .. } => FrameKind::Data,
        }
    }

    pub fn dst(&self) -> MacAddress {
        match self {
            MacFrame::Rts { dst, .. } | MacFrame::Cts { dst, .. } | MacFrame::Ack { dst, .. } | MacFrame::Data { dst, .. } => *dst,
        }
    }

    pub fn duration(&self) -> SimTime {
        match self {
            MacFrame::Rts { duration, .. } | MacFrame::Cts { duration, .. } | MacFrame::Ack { duration, .. } | MacFrame::Data { duration, .. } => *duration,
        }
    }

    /// Size on the air in bytes.
    pub fn size(&self) -> usize {
        match self {
            MacFrame::Rts { .. } => RTS_SIZE,
            MacFrame::Cts { .. } => CTS_SIZE,
            MacFrame::Ack { .. } => ACK_SIZE,
            MacFrame::Data { body, .. } => DATA_HEADER_SIZE + body.size(),
        }
    }
}

impl fmt::Display for MacFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacFrame::Rts { dst, src, duration } => write!(f, "RTS {src}->{dst} dur={duration}"),
            MacFrame::Cts { dst, duration } => write!(f, "CTS ->{dst} dur={duration}"),
            MacFrame::Ack { dst, duration } => write!(f, "ACK ->{dst} dur={duration}"),
            MacFrame::Data {
                dst,
                src,
                seq,
                retry,
                body,
                ..
            } => {
                write!(f, "DATA {src}->{dst} ")?;
                match seq {
                    Some(seq) => write!(f, "seq={seq}")?,
                    None => write!(f, "bcast")?,
                }
                write!(f, " retry={retry} len={}", body.size())
            }
        }
    }
}
