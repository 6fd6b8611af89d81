use std::sync::Arc;

use crate::mac::MacFrame;
use crate::simulation::time::SimTime;

use super::{RadioContext, RadioEvent, RadioMode, RadioState};

/// Each arriving signal is judged alone against background noise. A
/// stronger signal can capture the receiver from the one it is locked on.
#[derive(Debug, Clone)]
pub struct Independent {
    /// Linear power ratio.
    snr_threshold: f64,
}

impl Independent {
    pub fn new(snr_threshold: f64) -> Self {
        Independent { snr_threshold }
    }

    pub fn snr_threshold(&self) -> f64 {
        self.snr_threshold
    }

    pub(crate) fn after_transmit(state: &RadioState) -> RadioMode {
        if state.signals > 0 { RadioMode::Receiving } else { RadioMode::Idle }
    }

    pub(crate) fn receive(&mut self, state: &mut RadioState, frame: Arc<MacFrame>, power_mw: f64, duration: SimTime, ctx: &mut dyn RadioContext) {
        let props = *state.info.properties;
        if power_mw < props.sensitivity_mw {
            return;
        }
        let token = state.issue_token();
        let decodable = power_mw >= props.threshold_mw && power_mw >= props.background_mw * self.snr_threshold;
        match state.mode {
            RadioMode::Idle => {
                // undecodable signals still trip carrier detection
                if decodable {
                    state.set_mode(RadioMode::Receiving, ctx);
                }
                state.lock_signal(decodable.then_some(frame), power_mw, duration, token, ctx);
            }
            RadioMode::Receiving => {
                if power_mw >= props.threshold_mw && power_mw > state.locked.power_mw * self.snr_threshold {
                    state.stats.captured += 1;
                    state.lock_signal(decodable.then_some(frame), power_mw, duration, token, ctx);
                }
            }
            RadioMode::Sensing => unreachable!("{}: independent reception never senses", state.info.id),
            RadioMode::Transmitting | RadioMode::Sleep => {}
        }
        state.signals += 1;
        ctx.schedule(duration, RadioEvent::EndReceive { power_mw, token });
    }

    pub(crate) fn end_receive(&mut self, state: &mut RadioState, _power_mw: f64, token: u64, ctx: &mut dyn RadioContext) {
        state.signal_ended();
        if state.mode == RadioMode::Sleep {
            return;
        }
        if let Some(frame) = state.take_locked(token, ctx.now()) {
            if let (Some(frame), RadioMode::Receiving) = (frame, state.mode) {
                state.deliver(frame, ctx);
            }
        }
        if state.mode == RadioMode::Receiving && state.signals == 0 {
            state.set_mode(RadioMode::Idle, ctx);
        }
    }
}
