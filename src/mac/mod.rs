//! IEEE 802.11 distributed coordination function.
//!
//! The MAC sits between the network layer and one radio. It defers to
//! physical carrier sense (radio mode), virtual carrier sense (NAV) and a
//! random backoff before sending; unicast DATA is acknowledged and large
//! payloads are protected by an RTS/CTS exchange. Failed exchanges are
//! retried with a doubling contention window until a retry limit drops the
//! packet.
//!
//! Everything the MAC does to the outside world goes through `MacContext`.
//! Work that has to happen once a transmission is over is posted back to
//! the MAC itself as `MacEvent::StartTimer` or `MacEvent::CfDone`; timers
//! are cancelled by bumping an epoch so stale `Timeout`s are ignored.

mod config;
mod dcf;
pub mod frame;

pub use config::{MacConfig, MacTiming, NavPolicy, Phy};
pub use dcf::Mac802_11;
pub use frame::{ACK_SIZE, CTS_SIZE, DATA_HEADER_SIZE, FrameKind, MAX_SEQ, MacAddress, MacFrame, RTS_SIZE};

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::net::Packet;
use crate::radio::RadioMode;
use crate::simulation::time::SimTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacMode {
    Idle,
    /// Waiting out DIFS or EIFS.
    Difs,
    Backoff,
    /// Deferring to a NAV reservation.
    Nav,
    /// Deferring to a reservation announced by an overheard RTS that may
    /// still be released early.
    NavRts,
    WaitCts,
    WaitData,
    WaitAck,
    TxRts,
    TxCts,
    TxUnicast,
    TxBroadcast,
    TxAck,
}

impl MacMode {
    pub fn is_awaiting_response(self) -> bool {
        matches!(self, MacMode::WaitCts | MacMode::WaitData | MacMode::WaitAck)
    }
}

impl fmt::Display for MacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MacMode::Idle => "IDLE",
            MacMode::Difs => "DIFS",
            MacMode::Backoff => "BO",
            MacMode::Nav => "NAV",
            MacMode::NavRts => "NAV_RTS",
            MacMode::WaitCts => "WF_CTS",
            MacMode::WaitData => "WF_DATA",
            MacMode::WaitAck => "WF_ACK",
            MacMode::TxRts => "X_RTS",
            MacMode::TxCts => "X_CTS",
            MacMode::TxUnicast => "X_UNICAST",
            MacMode::TxBroadcast => "X_BROADCAST",
            MacMode::TxAck => "X_ACK",
        };
        f.write_str(name)
    }
}

/// Work items addressed to one MAC.
#[derive(Debug, Clone)]
pub enum MacEvent {
    /// From the network layer.
    Send { packet: Packet, next_hop: MacAddress },
    /// From the radio: a signal was locked on.
    Peek,
    /// From the radio: a frame was fully received.
    Receive(Arc<MacFrame>),
    /// From the radio: its mode changed.
    RadioMode(RadioMode),
    /// Self-posted at the end of a transmission.
    StartTimer { delay: SimTime, mode: MacMode },
    Timeout(u64),
    /// Self-posted at the end of a transmission that needs no response.
    CfDone { backoff: bool, drop_packet: bool },
}

/// Everything a MAC may do to the rest of the simulation.
pub trait MacContext {
    fn now(&self) -> SimTime;

    /// Uniform draw from `0..bound`.
    fn random_below(&mut self, bound: u32) -> u32;

    fn schedule(&mut self, delay: SimTime, event: MacEvent);

    /// Ask the radio to put `frame` on the air after `delay`.
    fn radio_transmit(&mut self, frame: MacFrame, delay: SimTime, duration: SimTime);

    fn net_receive(&mut self, packet: Packet, src: MacAddress, promiscuous: bool);

    /// The current packet is done with; the network layer may send another.
    fn net_pump(&mut self);
}

#[derive(Debug, Error, PartialEq)]
pub enum MacError {
    #[error("MAC {0} already holds a packet")]
    PacketInFlight(MacAddress),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MacStats {
    pub broadcasts_sent: u64,
    /// Unicast DATA transmissions, retransmissions included.
    pub unicasts_sent: u64,
    /// Unicast packets acknowledged.
    pub delivered: u64,
    pub rts_sent: u64,
    pub cts_sent: u64,
    pub acks_sent: u64,
    pub retries: u64,
    /// Packets given up after exhausting a retry limit.
    pub drops: u64,
    pub duplicates: u64,
    pub received: u64,
    pub snooped: u64,
}
