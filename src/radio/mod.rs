//! Radio reception models.
//!
//! A radio sits between the field and the MAC. The field hands it every
//! signal that reached it above sensitivity; the radio tracks interference,
//! decides which frame (if any) it is locked on, and tells the MAC about
//! mode changes, carrier detection (peek) and fully received frames.
//!
//! Two models share one state machine:
//! - `Independent`: each signal is judged against background noise alone
//! - `Additive`: signals are judged against the sum of all power on the
//!   channel, optionally followed by a bit-error check from a `BerTable`
//!
//! Signals end through a `RadioEvent::EndReceive` carrying the token handed
//! out when the signal arrived; only the end of the locked signal delivers.

mod additive;
pub mod ber;
mod independent;

pub use additive::Additive;
pub use ber::{BerTable, BerTableError};
pub use independent::Independent;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mac::MacFrame;
use crate::simulation::signal_calculations::dbm_to_mw;
use crate::simulation::time::SimTime;
use crate::simulation::types::{RadioId, RadioInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    Idle,
    Sensing,
    Receiving,
    Transmitting,
    Sleep,
}

impl fmt::Display for RadioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RadioMode::Idle => "IDLE",
            RadioMode::Sensing => "SENSING",
            RadioMode::Receiving => "RECEIVING",
            RadioMode::Transmitting => "TRANSMITTING",
            RadioMode::Sleep => "SLEEP",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RadioError {
    #[error("{0} asked to transmit while already transmitting")]
    AlreadyTransmitting(RadioId),
}

/// Work items addressed to one radio.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// From the MAC: put `frame` on the air after `delay` for `duration`.
    Transmit { frame: MacFrame, delay: SimTime, duration: SimTime },
    EndTransmit,
    /// From the field: a signal starts arriving.
    Receive { frame: Arc<MacFrame>, power_mw: f64, duration: SimTime },
    EndReceive { power_mw: f64, token: u64 },
    Sleep(bool),
}

/// Everything a radio may do to the rest of the simulation.
pub trait RadioContext {
    fn now(&self) -> SimTime;

    fn rng(&mut self) -> &mut dyn RngCore;

    fn schedule(&mut self, delay: SimTime, event: RadioEvent);

    /// Hand `frame` to the field after `delay`.
    fn propagate(&mut self, delay: SimTime, frame: Arc<MacFrame>, duration: SimTime);

    fn mac_radio_mode(&mut self, mode: RadioMode);

    /// A signal was locked on; the MAC learns the medium is in use.
    fn mac_peek(&mut self);

    fn mac_receive(&mut self, frame: Arc<MacFrame>);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RadioStats {
    pub transmitted: u64,
    pub delivered: u64,
    /// Locked signal replaced by a stronger one.
    pub captured: u64,
    /// Locked signal swamped by interference (additive, no BER table).
    pub interfered: u64,
    /// Dropped by the bit-error check.
    pub corrupted: u64,
}

/// Reception model selection as it appears in scene files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReceptionConfig {
    Independent {
        #[serde(default = "default_snr_db")]
        snr_threshold_db: f64,
    },
    Additive {
        #[serde(default = "default_snr_db")]
        snr_threshold_db: f64,
        #[serde(default)]
        ber_table: Option<PathBuf>,
    },
}

fn default_snr_db() -> f64 {
    10.0
}

impl Default for ReceptionConfig {
    fn default() -> Self {
        ReceptionConfig::Independent {
            snr_threshold_db: default_snr_db(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ReceptionModel {
    Independent(Independent),
    Additive(Additive),
}

impl ReceptionModel {
    /// Build the model, loading the BER table when one is configured.
    pub fn from_config(config: &ReceptionConfig) -> Result<Self, BerTableError> {
        Ok(match config {
            ReceptionConfig::Independent { snr_threshold_db } => ReceptionModel::Independent(Independent::new(dbm_to_mw(*snr_threshold_db))),
            ReceptionConfig::Additive { snr_threshold_db, ber_table } => {
                let ber = ber_table.as_ref().map(BerTable::from_file).transpose()?.map(Arc::new);
                ReceptionModel::Additive(Additive::new(dbm_to_mw(*snr_threshold_db), ber))
            }
        })
    }
}

/// The signal the radio is currently locked on. `frame` is `None` when the
/// signal is too weak to decode or a transmission wiped the buffer.
#[derive(Debug, Clone, Default)]
pub(crate) struct LockedSignal {
    pub(crate) frame: Option<Arc<MacFrame>>,
    pub(crate) power_mw: f64,
    pub(crate) finish: Option<SimTime>,
    pub(crate) token: Option<u64>,
}

/// State shared by both reception models.
#[derive(Debug, Clone)]
pub(crate) struct RadioState {
    pub(crate) info: RadioInfo,
    pub(crate) mode: RadioMode,
    pub(crate) locked: LockedSignal,
    /// Signals currently arriving.
    pub(crate) signals: u32,
    next_token: u64,
    pub(crate) stats: RadioStats,
}

impl RadioState {
    /// Switch modes, telling the MAC only about actual changes.
    pub(crate) fn set_mode(&mut self, mode: RadioMode, ctx: &mut dyn RadioContext) {
        if self.mode != mode {
            log::trace!("{} {} -> {}", self.info.id, self.mode, mode);
            self.mode = mode;
            ctx.mac_radio_mode(mode);
        }
    }

    pub(crate) fn issue_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    pub(crate) fn lock_signal(&mut self, frame: Option<Arc<MacFrame>>, power_mw: f64, duration: SimTime, token: u64, ctx: &mut dyn RadioContext) {
        self.locked = LockedSignal {
            frame,
            power_mw,
            finish: Some(ctx.now() + duration),
            token: Some(token),
        };
        ctx.mac_peek();
    }

    pub(crate) fn unlock_signal(&mut self) {
        self.locked = LockedSignal::default();
    }

    /// Count one signal as over. Signals ending that never started mean the
    /// event bookkeeping is broken.
    pub(crate) fn signal_ended(&mut self) {
        self.signals = match self.signals.checked_sub(1) {
            Some(n) => n,
            None => panic!("{}: signal ended with no signal in progress", self.info.id),
        };
    }

    /// Take the locked frame if `token` names the locked signal, unlocking it.
    pub(crate) fn take_locked(&mut self, token: u64, now: SimTime) -> Option<Option<Arc<MacFrame>>> {
        if self.locked.token != Some(token) {
            return None;
        }
        debug_assert_eq!(self.locked.finish, Some(now));
        let frame = self.locked.frame.take();
        self.unlock_signal();
        Some(frame)
    }

    pub(crate) fn deliver(&mut self, frame: Arc<MacFrame>, ctx: &mut dyn RadioContext) {
        self.stats.delivered += 1;
        ctx.mac_receive(frame);
    }
}

#[derive(Debug, Clone)]
pub struct Radio {
    state: RadioState,
    model: ReceptionModel,
}

impl Radio {
    pub fn new(info: RadioInfo, mut model: ReceptionModel) -> Self {
        if let ReceptionModel::Additive(additive) = &mut model {
            additive.reset(info.properties.background_mw);
        }
        Radio {
            state: RadioState {
                info,
                mode: RadioMode::Idle,
                locked: LockedSignal::default(),
                signals: 0,
                next_token: 0,
                stats: RadioStats::default(),
            },
            model,
        }
    }

    pub fn id(&self) -> RadioId {
        self.state.info.id
    }

    pub fn info(&self) -> &RadioInfo {
        &self.state.info
    }

    pub fn mode(&self) -> RadioMode {
        self.state.mode
    }

    pub fn signals(&self) -> u32 {
        self.state.signals
    }

    pub fn stats(&self) -> &RadioStats {
        &self.state.stats
    }

    /// Total power on the channel, tracked by the additive model only.
    pub fn total_power_mw(&self) -> Option<f64> {
        match &self.model {
            ReceptionModel::Additive(a) => Some(a.total_power_mw()),
            ReceptionModel::Independent(_) => None,
        }
    }

    pub fn handle(&mut self, event: RadioEvent, ctx: &mut dyn RadioContext) -> Result<(), RadioError> {
        match event {
            RadioEvent::Transmit { frame, delay, duration } => self.transmit(frame, delay, duration, ctx)?,
            RadioEvent::EndTransmit => self.end_transmit(ctx),
            RadioEvent::Receive { frame, power_mw, duration } => self.receive(frame, power_mw, duration, ctx),
            RadioEvent::EndReceive { power_mw, token } => self.end_receive(power_mw, token, ctx),
            RadioEvent::Sleep(sleep) => self.set_sleep(sleep, ctx),
        }
        Ok(())
    }

    /// Start a transmission. Ignored while asleep; any partially received
    /// frame is lost.
    pub fn transmit(&mut self, frame: MacFrame, delay: SimTime, duration: SimTime, ctx: &mut dyn RadioContext) -> Result<(), RadioError> {
        match self.state.mode {
            RadioMode::Sleep => {
                log::debug!("{} asleep, dropping {frame}", self.id());
                return Ok(());
            }
            RadioMode::Transmitting => return Err(RadioError::AlreadyTransmitting(self.id())),
            _ => {}
        }
        self.state.locked.frame = None;
        self.state.set_mode(RadioMode::Transmitting, ctx);
        self.state.stats.transmitted += 1;
        log::trace!("{} transmit {frame} for {duration}", self.id());
        ctx.propagate(delay, Arc::new(frame), duration);
        ctx.schedule(delay + duration, RadioEvent::EndTransmit);
        Ok(())
    }

    pub fn end_transmit(&mut self, ctx: &mut dyn RadioContext) {
        match self.state.mode {
            RadioMode::Sleep => {}
            RadioMode::Transmitting => {
                let next = match &self.model {
                    ReceptionModel::Independent(_) => Independent::after_transmit(&self.state),
                    ReceptionModel::Additive(a) => a.after_transmit(&self.state),
                };
                self.state.set_mode(next, ctx);
            }
            other => panic!("{}: transmission ended in mode {other}", self.id()),
        }
    }

    pub fn receive(&mut self, frame: Arc<MacFrame>, power_mw: f64, duration: SimTime, ctx: &mut dyn RadioContext) {
        match &mut self.model {
            ReceptionModel::Independent(m) => m.receive(&mut self.state, frame, power_mw, duration, ctx),
            ReceptionModel::Additive(m) => m.receive(&mut self.state, frame, power_mw, duration, ctx),
        }
    }

    pub fn end_receive(&mut self, power_mw: f64, token: u64, ctx: &mut dyn RadioContext) {
        match &mut self.model {
            ReceptionModel::Independent(m) => m.end_receive(&mut self.state, power_mw, token, ctx),
            ReceptionModel::Additive(m) => m.end_receive(&mut self.state, power_mw, token, ctx),
        }
    }

    pub fn set_sleep(&mut self, sleep: bool, ctx: &mut dyn RadioContext) {
        if sleep {
            self.state.unlock_signal();
            self.state.set_mode(RadioMode::Sleep, ctx);
        } else if self.state.mode == RadioMode::Sleep {
            let next = match &self.model {
                ReceptionModel::Independent(_) => RadioMode::Idle,
                ReceptionModel::Additive(a) => a.carrier_mode(&self.state),
            };
            self.state.set_mode(next, ctx);
        }
    }
}
