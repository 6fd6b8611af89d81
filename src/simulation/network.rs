//! The simulation loop.
//!
//! `Simulation` owns the event queue, the seeded random generator, the
//! field and one node (radio, MAC, network layer) per registered radio.
//! Components never call each other: whatever one component does to
//! another is posted as an `Event`, at delay zero for plain cross-component
//! calls, and dispatched in (time, insertion) order by `step`.
//!
//! High-level flow per event:
//! 1) Pop the earliest event and advance the clock to it.
//! 2) Route it to the field or to the addressed node's radio, MAC or network layer.
//! 3) The component reacts through a `Ctx`, which turns its calls into new events.

use std::sync::Arc;

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use thiserror::Error;

use crate::field::{Field, FieldConfig, FieldContext, FieldError, MobilityStep};
use crate::mac::{Mac802_11, MacAddress, MacConfig, MacContext, MacError, MacEvent, MacFrame};
use crate::net::{NetContext, NetInterface, Packet, QueuedNet};
use crate::radio::{Radio, RadioContext, RadioError, RadioEvent, RadioMode, ReceptionModel};

use super::geometry::Location;
use super::scheduler::Scheduler;
use super::time::SimTime;
use super::types::{ConfigError, RadioId, RadioInfo, RadioProperties};

/// Every node has a single network interface.
const NET_INTERFACE: u8 = 0;

#[derive(Debug, Clone)]
pub enum FieldEvent {
    Transmit { src: RadioId, frame: Arc<MacFrame>, duration: SimTime },
    Move { id: RadioId, step: MobilityStep },
}

#[derive(Debug, Clone)]
pub enum NetEvent {
    Send { packet: Packet, next_hop: MacAddress },
    Receive { packet: Packet, src: MacAddress, promiscuous: bool },
    Pump,
}

#[derive(Debug, Clone)]
pub enum Event {
    Field(FieldEvent),
    Radio { id: RadioId, event: RadioEvent },
    Mac { id: RadioId, event: MacEvent },
    Net { id: RadioId, event: NetEvent },
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Radio(#[from] RadioError),

    #[error(transparent)]
    Mac(#[from] MacError),

    /// Ids are never reused, not even after the node is removed.
    #[error("{0} is already taken")]
    DuplicateNode(RadioId),

    #[error("{0} is not a live node")]
    UnknownNode(RadioId),
}

/// One simulated station.
#[derive(Debug)]
pub struct Node<N> {
    pub radio: Radio,
    pub mac: Mac802_11,
    pub net: N,
}

#[derive(Debug)]
enum Slot<N> {
    Vacant,
    Live(Node<N>),
    Removed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimulationStats {
    pub events: u64,
    pub transmissions: u64,
    /// Signals handed to radios by the field.
    pub receptions: u64,
    /// Events addressed to removed nodes.
    pub dropped_events: u64,
}

pub struct Simulation<N: NetInterface = QueuedNet> {
    scheduler: Scheduler<Event>,
    rng: ChaCha8Rng,
    field: Field,
    nodes: Vec<Slot<N>>,
    stats: SimulationStats,
}

impl<N: NetInterface> Simulation<N> {
    pub fn new(field: &FieldConfig, seed: u64) -> Result<Self, SimError> {
        Ok(Simulation {
            scheduler: Scheduler::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            field: Field::new(field)?,
            nodes: Vec::new(),
            stats: SimulationStats::default(),
        })
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn pending_events(&self) -> usize {
        self.scheduler.len()
    }

    pub fn rng(&mut self) -> &mut dyn RngCore {
        &mut self.rng
    }

    pub fn node(&self, id: RadioId) -> Option<&Node<N>> {
        match self.nodes.get(id.index()) {
            Some(Slot::Live(node)) => Some(node),
            _ => None,
        }
    }

    /// Live nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = (RadioId, &Node<N>)> {
        self.nodes.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Live(node) => Some((RadioId(i as u32), node)),
            _ => None,
        })
    }

    /// Register a station: its radio joins the field at `location` and its
    /// MAC address is the radio id.
    pub fn add_node(
        &mut self,
        id: RadioId,
        location: Location,
        properties: Arc<RadioProperties>,
        reception: ReceptionModel,
        mac: &MacConfig,
        net: N,
    ) -> Result<(), SimError> {
        if !matches!(self.nodes.get(id.index()), None | Some(Slot::Vacant)) {
            return Err(SimError::DuplicateNode(id));
        }
        let mac = Mac802_11::new(MacAddress::from(id), mac, properties.bytes_per_second())?;
        let info = RadioInfo::new(id, properties);
        let mut ctx = Ctx {
            id,
            scheduler: &mut self.scheduler,
            rng: &mut self.rng,
        };
        self.field.add_radio(info.clone(), location, &mut ctx)?;
        if self.nodes.len() <= id.index() {
            self.nodes.resize_with(id.index() + 1, || Slot::Vacant);
        }
        self.nodes[id.index()] = Slot::Live(Node {
            radio: Radio::new(info, reception),
            mac,
            net,
        });
        log::info!("node {id} joined at {location}");
        Ok(())
    }

    /// Take a station out of the field. Events still queued for it are dropped.
    pub fn remove_node(&mut self, id: RadioId) -> Result<Node<N>, SimError> {
        let slot = self.nodes.get_mut(id.index()).ok_or(SimError::UnknownNode(id))?;
        if !matches!(slot, Slot::Live(_)) {
            return Err(SimError::UnknownNode(id));
        }
        self.field.del_radio(id)?;
        match std::mem::replace(slot, Slot::Removed) {
            Slot::Live(node) => {
                log::info!("node {id} left");
                Ok(node)
            }
            _ => Err(SimError::UnknownNode(id)),
        }
    }

    /// Hand `packet` to the network layer of `id` at time `at`.
    pub fn send(&mut self, at: SimTime, id: RadioId, packet: Packet, next_hop: MacAddress) -> Result<(), SimError> {
        self.node(id).ok_or(SimError::UnknownNode(id))?;
        self.scheduler.schedule_at(at, Event::Net {
            id,
            event: NetEvent::Send { packet, next_hop },
        });
        Ok(())
    }

    pub fn set_sleep(&mut self, at: SimTime, id: RadioId, sleep: bool) -> Result<(), SimError> {
        self.node(id).ok_or(SimError::UnknownNode(id))?;
        self.scheduler.schedule_at(at, Event::Radio {
            id,
            event: RadioEvent::Sleep(sleep),
        });
        Ok(())
    }

    /// Process one event. Returns `false` once the queue is empty.
    pub fn step(&mut self) -> Result<bool, SimError> {
        let Some((now, event)) = self.scheduler.pop() else {
            return Ok(false);
        };
        self.stats.events += 1;
        log::trace!("{now} {event:?}");
        self.dispatch(event)?;
        Ok(true)
    }

    /// Process every event up to and including `end`. Returns the number of
    /// events processed.
    pub fn run_until(&mut self, end: SimTime) -> Result<u64, SimError> {
        let before = self.stats.events;
        while self.scheduler.peek_time().is_some_and(|t| t <= end) {
            self.step()?;
        }
        Ok(self.stats.events - before)
    }

    fn dispatch(&mut self, event: Event) -> Result<(), SimError> {
        match event {
            Event::Field(FieldEvent::Transmit { src, frame, duration }) => {
                let mut ctx = Ctx {
                    id: src,
                    scheduler: &mut self.scheduler,
                    rng: &mut self.rng,
                };
                match self.field.transmit(src, frame, duration, &mut ctx) {
                    Ok(reached) => {
                        self.stats.transmissions += 1;
                        self.stats.receptions += reached as u64;
                    }
                    Err(FieldError::UnknownRadio(_)) => self.stats.dropped_events += 1,
                    Err(e) => return Err(e.into()),
                }
            }
            Event::Field(FieldEvent::Move { id, step }) => {
                let mut ctx = Ctx {
                    id,
                    scheduler: &mut self.scheduler,
                    rng: &mut self.rng,
                };
                match self.field.apply_step(id, step, &mut ctx) {
                    Ok(()) => {}
                    Err(FieldError::UnknownRadio(_)) => self.stats.dropped_events += 1,
                    Err(e) => return Err(e.into()),
                }
            }
            Event::Radio { id, event } => {
                let Some(Slot::Live(node)) = self.nodes.get_mut(id.index()) else {
                    self.stats.dropped_events += 1;
                    return Ok(());
                };
                let mut ctx = Ctx {
                    id,
                    scheduler: &mut self.scheduler,
                    rng: &mut self.rng,
                };
                node.radio.handle(event, &mut ctx)?;
            }
            Event::Mac { id, event } => {
                let Some(Slot::Live(node)) = self.nodes.get_mut(id.index()) else {
                    self.stats.dropped_events += 1;
                    return Ok(());
                };
                let mut ctx = Ctx {
                    id,
                    scheduler: &mut self.scheduler,
                    rng: &mut self.rng,
                };
                node.mac.handle(event, &mut ctx)?;
            }
            Event::Net { id, event } => {
                let Some(Slot::Live(node)) = self.nodes.get_mut(id.index()) else {
                    self.stats.dropped_events += 1;
                    return Ok(());
                };
                let mut ctx = Ctx {
                    id,
                    scheduler: &mut self.scheduler,
                    rng: &mut self.rng,
                };
                match event {
                    NetEvent::Send { packet, next_hop } => node.net.send(packet, next_hop, &mut ctx),
                    NetEvent::Receive { packet, src, promiscuous } => node.net.receive(packet, src, NET_INTERFACE, promiscuous, &mut ctx),
                    NetEvent::Pump => node.net.pump(NET_INTERFACE, &mut ctx),
                }
            }
        }
        Ok(())
    }
}

/// The view of the simulation handed to the component handling an event
/// for node `id`.
struct Ctx<'a> {
    id: RadioId,
    scheduler: &'a mut Scheduler<Event>,
    rng: &'a mut ChaCha8Rng,
}

impl Ctx<'_> {
    fn post(&mut self, delay: SimTime, event: Event) {
        self.scheduler.schedule_after(delay, event);
    }

    fn to_mac(&mut self, event: MacEvent) {
        let id = self.id;
        self.post(SimTime::ZERO, Event::Mac { id, event });
    }

    fn to_net(&mut self, event: NetEvent) {
        let id = self.id;
        self.post(SimTime::ZERO, Event::Net { id, event });
    }
}

impl RadioContext for Ctx<'_> {
    fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    fn rng(&mut self) -> &mut dyn RngCore {
        &mut *self.rng
    }

    fn schedule(&mut self, delay: SimTime, event: RadioEvent) {
        let id = self.id;
        self.post(delay, Event::Radio { id, event });
    }

    fn propagate(&mut self, delay: SimTime, frame: Arc<MacFrame>, duration: SimTime) {
        let src = self.id;
        self.post(delay, Event::Field(FieldEvent::Transmit { src, frame, duration }));
    }

    fn mac_radio_mode(&mut self, mode: RadioMode) {
        self.to_mac(MacEvent::RadioMode(mode));
    }

    fn mac_peek(&mut self) {
        self.to_mac(MacEvent::Peek);
    }

    fn mac_receive(&mut self, frame: Arc<MacFrame>) {
        self.to_mac(MacEvent::Receive(frame));
    }
}

impl MacContext for Ctx<'_> {
    fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    fn random_below(&mut self, bound: u32) -> u32 {
        self.rng.gen_range(0..bound.max(1))
    }

    fn schedule(&mut self, delay: SimTime, event: MacEvent) {
        let id = self.id;
        self.post(delay, Event::Mac { id, event });
    }

    fn radio_transmit(&mut self, frame: MacFrame, delay: SimTime, duration: SimTime) {
        let id = self.id;
        self.post(SimTime::ZERO, Event::Radio {
            id,
            event: RadioEvent::Transmit { frame, delay, duration },
        });
    }

    fn net_receive(&mut self, packet: Packet, src: MacAddress, promiscuous: bool) {
        self.to_net(NetEvent::Receive { packet, src, promiscuous });
    }

    fn net_pump(&mut self) {
        self.to_net(NetEvent::Pump);
    }
}

impl NetContext for Ctx<'_> {
    fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    fn mac_send(&mut self, packet: Packet, next_hop: MacAddress) {
        self.to_mac(MacEvent::Send { packet, next_hop });
    }
}

impl FieldContext for Ctx<'_> {
    fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    fn rng(&mut self) -> &mut dyn RngCore {
        &mut *self.rng
    }

    fn deliver(&mut self, dst: RadioId, frame: Arc<MacFrame>, power_mw: f64, duration: SimTime) {
        self.post(SimTime::ZERO, Event::Radio {
            id: dst,
            event: RadioEvent::Receive { frame, power_mw, duration },
        });
    }

    fn schedule_move(&mut self, delay: SimTime, id: RadioId, step: MobilityStep) {
        self.post(delay, Event::Field(FieldEvent::Move { id, step }));
    }
}
