use std::sync::Arc;

use crate::mac::MacFrame;
use crate::simulation::time::SimTime;

use super::ber::BerTable;
use super::{RadioContext, RadioEvent, RadioMode, RadioState};

/// Signals are judged against the total power on the channel, background
/// noise included. Without a BER table a locked frame is lost as soon as
/// the rest of the channel climbs within the SNR threshold of it; with a
/// table, interference is instead applied as a bit-error draw at the end.
#[derive(Debug, Clone)]
pub struct Additive {
    snr_threshold: f64,
    ber: Option<Arc<BerTable>>,
    background_mw: f64,
    total_power_mw: f64,
}

impl Additive {
    pub fn new(snr_threshold: f64, ber: Option<Arc<BerTable>>) -> Self {
        Additive {
            snr_threshold,
            ber,
            background_mw: 0.0,
            total_power_mw: 0.0,
        }
    }

    pub(crate) fn reset(&mut self, background_mw: f64) {
        self.background_mw = background_mw;
        self.total_power_mw = background_mw;
    }

    pub fn total_power_mw(&self) -> f64 {
        self.total_power_mw
    }

    /// Mode an otherwise unoccupied radio settles in given the channel power.
    pub(crate) fn carrier_mode(&self, state: &RadioState) -> RadioMode {
        if self.total_power_mw >= state.info.properties.sensitivity_mw {
            RadioMode::Sensing
        } else {
            RadioMode::Idle
        }
    }

    pub(crate) fn after_transmit(&self, state: &RadioState) -> RadioMode {
        self.carrier_mode(state)
    }

    fn can_lock(&self, state: &RadioState, power_mw: f64) -> bool {
        power_mw >= state.info.properties.threshold_mw && power_mw >= self.total_power_mw * self.snr_threshold
    }

    pub(crate) fn receive(&mut self, state: &mut RadioState, frame: Arc<MacFrame>, power_mw: f64, duration: SimTime, ctx: &mut dyn RadioContext) {
        let token = state.issue_token();
        match state.mode {
            RadioMode::Idle => {
                if self.can_lock(state, power_mw) {
                    state.lock_signal(Some(frame), power_mw, duration, token, ctx);
                    state.set_mode(RadioMode::Receiving, ctx);
                } else if self.total_power_mw + power_mw > state.info.properties.sensitivity_mw {
                    state.set_mode(RadioMode::Sensing, ctx);
                }
            }
            RadioMode::Sensing => {
                if self.can_lock(state, power_mw) {
                    state.lock_signal(Some(frame), power_mw, duration, token, ctx);
                    state.set_mode(RadioMode::Receiving, ctx);
                }
            }
            RadioMode::Receiving => {
                let locked = state.locked.power_mw;
                if power_mw > locked && power_mw >= self.total_power_mw * self.snr_threshold {
                    state.stats.captured += 1;
                    state.lock_signal(Some(frame), power_mw, duration, token, ctx);
                } else if self.ber.is_none() && locked < (self.total_power_mw - locked + power_mw) * self.snr_threshold {
                    state.stats.interfered += 1;
                    state.unlock_signal();
                    state.set_mode(RadioMode::Sensing, ctx);
                }
            }
            RadioMode::Transmitting | RadioMode::Sleep => {}
        }
        state.signals += 1;
        self.total_power_mw += power_mw;
        ctx.schedule(duration, RadioEvent::EndReceive { power_mw, token });
    }

    pub(crate) fn end_receive(&mut self, state: &mut RadioState, power_mw: f64, token: u64, ctx: &mut dyn RadioContext) {
        state.signal_ended();
        self.total_power_mw = if state.signals == 0 {
            self.background_mw
        } else {
            self.total_power_mw - power_mw
        };
        match state.mode {
            RadioMode::Receiving => {
                let signal_mw = state.locked.power_mw;
                if let Some(frame) = state.take_locked(token, ctx.now()) {
                    if let Some(frame) = frame {
                        if self.corrupted(signal_mw, &frame, ctx) {
                            state.stats.corrupted += 1;
                            log::trace!("{} bit errors in {frame}", state.info.id);
                        } else {
                            state.deliver(frame, ctx);
                        }
                    }
                    let next = self.carrier_mode(state);
                    state.set_mode(next, ctx);
                }
            }
            RadioMode::Sensing => {
                if self.total_power_mw < state.info.properties.sensitivity_mw {
                    state.set_mode(RadioMode::Idle, ctx);
                }
            }
            RadioMode::Idle | RadioMode::Transmitting | RadioMode::Sleep => {}
        }
    }

    fn corrupted(&self, signal_mw: f64, frame: &MacFrame, ctx: &mut dyn RadioContext) -> bool {
        match &self.ber {
            Some(table) if self.total_power_mw > 0.0 => table.should_drop(signal_mw / self.total_power_mw, 8 * frame.size(), ctx.rng()),
            _ => false,
        }
    }
}
