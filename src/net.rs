//! Network-layer boundary of the MAC.
//!
//! The MAC hands received payloads up through `NetInterface::receive` and
//! asks for the next outgoing packet through `NetInterface::pump` once the
//! previous one is done (delivered or dropped). `QueuedNet` is a bounded
//! FIFO implementation good enough to drive traffic in scenarios and tests.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;

use crate::mac::MacAddress;
use crate::simulation::time::SimTime;
use crate::simulation::types::ConfigError;

/// Network-layer packet carried as a DATA frame body.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    size: usize,
    payload: Arc<[u8]>,
}

impl Packet {
    pub fn new(payload: impl Into<Arc<[u8]>>) -> Self {
        let payload = payload.into();
        Packet { size: payload.len(), payload }
    }

    /// Packet with a nominal size and no actual content.
    pub fn sized(size: usize) -> Self {
        Packet {
            size,
            payload: Arc::from(Vec::new()),
        }
    }

    /// Packet whose on-air size is at least `size`, padding the payload virtually.
    pub fn padded(payload: impl Into<Arc<[u8]>>, size: usize) -> Self {
        let payload = payload.into();
        Packet {
            size: size.max(payload.len()),
            payload,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// What a network layer may do while handling a MAC callback.
pub trait NetContext {
    fn now(&self) -> SimTime;

    /// Hand a packet to this node's MAC.
    fn mac_send(&mut self, packet: Packet, next_hop: MacAddress);
}

pub trait NetInterface {
    /// Packet handed down by an upper layer (traffic source).
    fn send(&mut self, packet: Packet, next_hop: MacAddress, ctx: &mut dyn NetContext);

    /// Packet delivered by the MAC. `promiscuous` marks overheard unicast frames.
    fn receive(&mut self, packet: Packet, src: MacAddress, interface: u8, promiscuous: bool, ctx: &mut dyn NetContext);

    /// The MAC finished with its current packet and can take the next one.
    fn pump(&mut self, interface: u8, ctx: &mut dyn NetContext);
}

/// A packet handed up by the MAC.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub at: SimTime,
    pub src: MacAddress,
    pub packet: Packet,
    pub promiscuous: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetStats {
    pub enqueued: u64,
    pub dropped_queue_full: u64,
    pub handed_to_mac: u64,
    pub received: u64,
    pub snooped: u64,
}

/// Bounded FIFO in front of the MAC. Keeps at most one packet inside the
/// MAC at a time and records everything delivered to it.
#[derive(Debug, Clone)]
pub struct QueuedNet {
    capacity: usize,
    queue: VecDeque<(Packet, MacAddress)>,
    mac_busy: bool,
    deliveries: Vec<Delivery>,
    stats: NetStats,
}

impl QueuedNet {
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::Net("queue capacity must be positive".to_string()));
        }
        Ok(QueuedNet {
            capacity,
            queue: VecDeque::with_capacity(capacity),
            mac_busy: false,
            deliveries: Vec::new(),
            stats: NetStats::default(),
        })
    }

    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    pub fn stats(&self) -> &NetStats {
        &self.stats
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn feed_mac(&mut self, ctx: &mut dyn NetContext) {
        if self.mac_busy {
            return;
        }
        if let Some((packet, next_hop)) = self.queue.pop_front() {
            self.mac_busy = true;
            self.stats.handed_to_mac += 1;
            ctx.mac_send(packet, next_hop);
        }
    }
}

impl NetInterface for QueuedNet {
    fn send(&mut self, packet: Packet, next_hop: MacAddress, ctx: &mut dyn NetContext) {
        if self.queue.len() >= self.capacity {
            self.stats.dropped_queue_full += 1;
            log::debug!("net queue full, dropping {} byte packet for {next_hop}", packet.size());
            return;
        }
        self.stats.enqueued += 1;
        self.queue.push_back((packet, next_hop));
        self.feed_mac(ctx);
    }

    fn receive(&mut self, packet: Packet, src: MacAddress, _interface: u8, promiscuous: bool, ctx: &mut dyn NetContext) {
        if promiscuous {
            self.stats.snooped += 1;
        } else {
            self.stats.received += 1;
        }
        self.deliveries.push(Delivery {
            at: ctx.now(),
            src,
            packet,
            promiscuous,
        });
    }

    fn pump(&mut self, _interface: u8, ctx: &mut dyn NetContext) {
        self.mac_busy = false;
        self.feed_mac(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        now: SimTime,
        sent: Vec<(Packet, MacAddress)>,
    }

    impl NetContext for Recorder {
        fn now(&self) -> SimTime {
            self.now
        }

        fn mac_send(&mut self, packet: Packet, next_hop: MacAddress) {
            self.sent.push((packet, next_hop));
        }
    }

    #[test]
    fn zero_capacity_is_a_config_error() {
        assert!(QueuedNet::new(0).is_err());
    }

    #[test]
    fn one_packet_at_a_time_reaches_the_mac() {
        let mut net = QueuedNet::new(4).unwrap();
        let mut ctx = Recorder::default();
        net.send(Packet::new(vec![1]), MacAddress(2), &mut ctx);
        net.send(Packet::new(vec![2]), MacAddress(3), &mut ctx);
        assert_eq!(ctx.sent.len(), 1);
        assert_eq!(net.queued(), 1);
        net.pump(0, &mut ctx);
        assert_eq!(ctx.sent.len(), 2);
        assert_eq!(ctx.sent[1].1, MacAddress(3));
        // pump with an empty queue leaves the MAC idle
        net.pump(0, &mut ctx);
        assert_eq!(ctx.sent.len(), 2);
    }

    #[test]
    fn overflow_is_counted() {
        let mut net = QueuedNet::new(1).unwrap();
        let mut ctx = Recorder::default();
        // first goes straight to the MAC, second waits, third overflows
        for _ in 0..3 {
            net.send(Packet::sized(10), MacAddress::ANY, &mut ctx);
        }
        assert_eq!(net.stats().dropped_queue_full, 1);
        assert_eq!(net.stats().enqueued, 2);
    }

    #[test]
    fn deliveries_record_time_and_mode() {
        let mut net = QueuedNet::new(1).unwrap();
        let mut ctx = Recorder {
            now: SimTime::from_micros(42),
            ..Recorder::default()
        };
        net.receive(Packet::new(vec![9, 9]), MacAddress(5), 0, false, &mut ctx);
        net.receive(Packet::new(vec![8]), MacAddress(6), 0, true, &mut ctx);
        assert_eq!(net.deliveries().len(), 2);
        assert_eq!(net.deliveries()[0].at, SimTime::from_micros(42));
        assert!(net.deliveries()[1].promiscuous);
        assert_eq!(net.stats().snooped, 1);
    }

    #[test]
    fn padded_packets_keep_nominal_size() {
        let p = Packet::padded(vec![1, 2, 3], 1500);
        assert_eq!(p.size(), 1500);
        assert_eq!(p.payload(), &[1, 2, 3]);
        assert_eq!(Packet::padded(vec![0; 8], 2).size(), 8);
    }
}
