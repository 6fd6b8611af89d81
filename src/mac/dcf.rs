use std::collections::VecDeque;

use crate::net::Packet;
use crate::radio::RadioMode;
use crate::simulation::time::{EPSILON_DELAY, SimTime};
use crate::simulation::types::ConfigError;

use super::config::{MacConfig, MacTiming, NavPolicy};
use super::frame::{ACK_SIZE, CTS_SIZE, DATA_HEADER_SIZE, MAX_SEQ, MacAddress, MacFrame};
use super::{MacContext, MacError, MacEvent, MacMode, MacStats};

/// Senders remembered for duplicate detection.
const SEQ_CACHE_SIZE: usize = 5;

#[derive(Debug, Clone)]
struct Outgoing {
    packet: Packet,
    next_hop: MacAddress,
    /// Assigned on the first unicast transmission, reused on retries.
    seq: Option<u16>,
}

/// One 802.11 DCF entity.
#[derive(Debug, Clone)]
pub struct Mac802_11 {
    addr: MacAddress,
    timing: MacTiming,
    promiscuous: bool,
    nav_policy: NavPolicy,
    cts_resets_cw: bool,
    ns2_retry_count: bool,
    bytes_per_second: u64,

    mode: MacMode,
    radio_mode: RadioMode,
    need_eifs: bool,
    timer_epoch: u64,

    /// Remaining backoff and when the current backoff countdown started.
    bo: SimTime,
    bo_start: SimTime,
    cw: u32,

    /// Medium reserved until this instant; `ZERO` when clear.
    nav: SimTime,
    /// Early release point of a NAV set by an RTS (standard policy only).
    nav_rts_release: Option<SimTime>,

    seq: u16,
    /// Most recently used first.
    seq_cache: VecDeque<(MacAddress, u16)>,

    short_retry: u32,
    long_retry: u32,
    outgoing: Option<Outgoing>,
    stats: MacStats,
}

impl Mac802_11 {
    pub fn new(addr: MacAddress, config: &MacConfig, bytes_per_second: u64) -> Result<Self, ConfigError> {
        let timing = config.timing()?;
        if bytes_per_second == 0 {
            return Err(ConfigError::Mac("radio bandwidth must be positive".to_string()));
        }
        Ok(Mac802_11 {
            addr,
            timing,
            promiscuous: config.promiscuous,
            nav_policy: config.nav_policy,
            cts_resets_cw: config.cts_resets_cw,
            ns2_retry_count: config.ns2_retry_count,
            bytes_per_second,
            mode: MacMode::Idle,
            radio_mode: RadioMode::Idle,
            need_eifs: false,
            timer_epoch: 0,
            bo: SimTime::ZERO,
            bo_start: SimTime::ZERO,
            cw: timing.cw_min,
            nav: SimTime::ZERO,
            nav_rts_release: None,
            seq: 0,
            seq_cache: VecDeque::with_capacity(SEQ_CACHE_SIZE),
            short_retry: 0,
            long_retry: 0,
            outgoing: None,
            stats: MacStats::default(),
        })
    }

    pub fn addr(&self) -> MacAddress {
        self.addr
    }

    pub fn timing(&self) -> &MacTiming {
        &self.timing
    }

    pub fn mode(&self) -> MacMode {
        self.mode
    }

    pub fn cw(&self) -> u32 {
        self.cw
    }

    pub fn nav(&self) -> SimTime {
        self.nav
    }

    /// Remaining backoff.
    pub fn backoff_remaining(&self) -> SimTime {
        self.bo
    }

    /// Short and long retry counters.
    pub fn retries(&self) -> (u32, u32) {
        (self.short_retry, self.long_retry)
    }

    pub fn has_packet(&self) -> bool {
        self.outgoing.is_some()
    }

    pub fn stats(&self) -> &MacStats {
        &self.stats
    }

    pub fn handle(&mut self, event: MacEvent, ctx: &mut dyn MacContext) -> Result<(), MacError> {
        match event {
            MacEvent::Send { packet, next_hop } => self.send(packet, next_hop, ctx)?,
            MacEvent::Peek => self.peek(ctx),
            MacEvent::Receive(frame) => self.receive(&frame, ctx),
            MacEvent::RadioMode(mode) => self.set_radio_mode(mode, ctx),
            MacEvent::StartTimer { delay, mode } => self.start_timer(delay, mode, ctx),
            MacEvent::Timeout(epoch) => self.timeout(epoch, ctx),
            MacEvent::CfDone { backoff, drop_packet } => self.cf_done(backoff, drop_packet, ctx),
        }
        Ok(())
    }

    // ----- timing helpers -----

    fn bytes_time(&self, bytes: usize) -> SimTime {
        SimTime::for_bytes(bytes, self.bytes_per_second)
    }

    fn transmit_time(&self, bytes: usize) -> SimTime {
        self.timing.sync + self.bytes_time(bytes)
    }

    fn is_radio_idle(&self) -> bool {
        self.radio_mode == RadioMode::Idle
    }

    fn waiting_nav(&self, now: SimTime) -> bool {
        self.nav > now
    }

    fn is_carrier_idle(&self, now: SimTime) -> bool {
        !self.waiting_nav(now) && self.is_radio_idle()
    }

    fn should_rts(&self, out: &Outgoing) -> bool {
        out.packet.size() > self.timing.rts_threshold && out.next_hop != MacAddress::ANY
    }

    // ----- modes and timers -----

    fn set_mode(&mut self, mode: MacMode) {
        if self.mode != mode {
            log::trace!("mac {} {} -> {}", self.addr, self.mode, mode);
            self.mode = mode;
        }
    }

    pub fn start_timer(&mut self, delay: SimTime, mode: MacMode, ctx: &mut dyn MacContext) {
        self.cancel_timer();
        self.set_mode(mode);
        ctx.schedule(delay, MacEvent::Timeout(self.timer_epoch));
    }

    fn cancel_timer(&mut self) {
        self.timer_epoch += 1;
    }

    fn idle(&mut self) {
        self.cancel_timer();
        self.set_mode(MacMode::Idle);
    }

    pub fn timeout(&mut self, epoch: u64, ctx: &mut dyn MacContext) {
        if epoch != self.timer_epoch {
            return;
        }
        match self.mode {
            MacMode::Idle => self.idle(),
            MacMode::Difs => {
                if self.bo > SimTime::ZERO {
                    self.backoff(ctx);
                } else if self.has_packet() {
                    self.send_packet(ctx);
                } else {
                    self.idle();
                }
            }
            MacMode::Backoff => {
                debug_assert_eq!(self.bo_start + self.bo, ctx.now(), "backoff expired off schedule");
                self.bo = SimTime::ZERO;
                if self.has_packet() {
                    self.send_packet(ctx);
                } else {
                    self.idle();
                }
            }
            MacMode::Nav | MacMode::NavRts => {
                self.reset_nav();
                self.do_difs(ctx);
            }
            MacMode::WaitData => {
                self.set_backoff(ctx);
                self.do_difs(ctx);
            }
            MacMode::WaitCts | MacMode::WaitAck => self.retry(ctx),
            mode => panic!("mac {}: timer fired while in {mode}", self.addr),
        }
    }

    // ----- backoff and NAV -----

    fn set_backoff(&mut self, ctx: &mut dyn MacContext) {
        if self.bo == SimTime::ZERO {
            self.bo = self.timing.slot * u64::from(ctx.random_below(self.cw));
        }
    }

    fn pause_backoff(&mut self, now: SimTime) {
        let elapsed = now - self.bo_start;
        assert!(elapsed <= self.bo, "mac {}: backoff overran by {}", self.addr, elapsed - self.bo);
        self.bo = self.bo - elapsed;
    }

    fn backoff(&mut self, ctx: &mut dyn MacContext) {
        self.bo_start = ctx.now();
        self.start_timer(self.bo, MacMode::Backoff, ctx);
    }

    fn reset_nav(&mut self) {
        self.nav = SimTime::ZERO;
        self.nav_rts_release = None;
    }

    /// Defer until the NAV expires, or until an RTS-only reservation lapses.
    fn nav_timer(&mut self, ctx: &mut dyn MacContext) {
        let now = ctx.now();
        match self.nav_rts_release {
            Some(release) if release < self.nav => self.start_timer(release - now, MacMode::NavRts, ctx),
            _ => self.start_timer(self.nav - now, MacMode::Nav, ctx),
        }
    }

    fn do_difs(&mut self, ctx: &mut dyn MacContext) {
        if !self.is_radio_idle() {
            self.idle();
        } else if self.waiting_nav(ctx.now()) {
            self.nav_timer(ctx);
        } else {
            let wait = if self.need_eifs { self.timing.eifs } else { self.timing.difs };
            self.start_timer(wait, MacMode::Difs, ctx);
        }
    }

    // ----- sending -----

    /// Accept a packet from the network layer. Only one may be in flight.
    pub fn send(&mut self, packet: Packet, next_hop: MacAddress, ctx: &mut dyn MacContext) -> Result<(), MacError> {
        if self.has_packet() {
            log::warn!("mac {} rejected a packet for {next_hop}: one already in flight", self.addr);
            return Err(MacError::PacketInFlight(self.addr));
        }
        self.outgoing = Some(Outgoing {
            packet,
            next_hop,
            seq: None,
        });
        if self.mode == MacMode::Idle {
            if !self.is_carrier_idle(ctx.now()) {
                self.set_backoff(ctx);
            }
            self.do_difs(ctx);
        }
        Ok(())
    }

    pub fn cf_done(&mut self, backoff: bool, drop_packet: bool, ctx: &mut dyn MacContext) {
        if backoff {
            self.set_backoff(ctx);
        }
        self.do_difs(ctx);
        if drop_packet {
            self.outgoing = None;
            ctx.net_pump();
        }
    }

    fn send_packet(&mut self, ctx: &mut dyn MacContext) {
        let Some(out) = &self.outgoing else {
            return self.idle();
        };
        if self.should_rts(out) {
            let (next_hop, size) = (out.next_hop, out.packet.size());
            self.send_rts(next_hop, size, ctx);
        } else {
            self.send_data(false, ctx);
        }
    }

    /// Put `frame` on the air after `delay`, returning when it will be done.
    fn transmit(&mut self, mode: MacMode, frame: MacFrame, delay: SimTime, ctx: &mut dyn MacContext) -> SimTime {
        self.set_mode(mode);
        let duration = self.transmit_time(frame.size());
        log::trace!("mac {} sends {frame}", self.addr);
        ctx.radio_transmit(frame, delay, duration);
        delay + duration
    }

    fn send_rts(&mut self, next_hop: MacAddress, packet_size: usize, ctx: &mut dyn MacContext) {
        let t = self.timing;
        let duration = self.bytes_time(ACK_SIZE + CTS_SIZE + DATA_HEADER_SIZE) + t.propagation * 4 + t.sifs * 3 + t.sync * 2 + self.transmit_time(packet_size);
        let rts = MacFrame::Rts {
            dst: next_hop,
            src: self.addr,
            duration,
        };
        let done = self.transmit(MacMode::TxRts, rts, t.turnaround, ctx);
        self.stats.rts_sent += 1;
        let wait = self.bytes_time(CTS_SIZE) + t.sync + t.propagation + t.sifs + t.slot + t.propagation + EPSILON_DELAY;
        ctx.schedule(done, MacEvent::StartTimer {
            delay: wait,
            mode: MacMode::WaitCts,
        });
    }

    fn send_cts(&mut self, dst: MacAddress, rts_duration: SimTime, ctx: &mut dyn MacContext) {
        let t = self.timing;
        let duration = rts_duration - self.bytes_time(CTS_SIZE) - t.sync - t.propagation - t.sifs;
        let done = self.transmit(MacMode::TxCts, MacFrame::Cts { dst, duration }, t.sifs, ctx);
        self.stats.cts_sent += 1;
        let wait = duration - self.bytes_time(ACK_SIZE) - (t.sync + t.propagation + t.sifs) + t.slot + EPSILON_DELAY;
        ctx.schedule(done, MacEvent::StartTimer {
            delay: wait,
            mode: MacMode::WaitData,
        });
    }

    fn send_data(&mut self, after_cts: bool, ctx: &mut dyn MacContext) {
        let Some(out) = &self.outgoing else {
            panic!("mac {}: DATA requested without a packet", self.addr);
        };
        if out.next_hop == MacAddress::ANY {
            self.send_data_broadcast(ctx);
        } else {
            self.send_data_unicast(after_cts, ctx);
        }
    }

    fn send_data_broadcast(&mut self, ctx: &mut dyn MacContext) {
        let Some(out) = &self.outgoing else { return };
        let data = MacFrame::Data {
            dst: out.next_hop,
            src: self.addr,
            duration: SimTime::ZERO,
            seq: None,
            retry: false,
            body: out.packet.clone(),
        };
        let done = self.transmit(MacMode::TxBroadcast, data, self.timing.turnaround, ctx);
        self.stats.broadcasts_sent += 1;
        ctx.schedule(done, MacEvent::CfDone {
            backoff: true,
            drop_packet: true,
        });
    }

    fn send_data_unicast(&mut self, after_cts: bool, ctx: &mut dyn MacContext) {
        let t = self.timing;
        let rts = self.outgoing.as_ref().is_some_and(|out| self.should_rts(out));
        let Some(out) = self.outgoing.as_mut() else { return };
        let seq = match out.seq {
            Some(seq) => seq,
            None => {
                self.seq = (self.seq + 1) % MAX_SEQ;
                out.seq = Some(self.seq);
                self.seq
            }
        };
        let retry = (if rts { self.long_retry } else { self.short_retry }) > 0;
        let ack_time = SimTime::for_bytes(ACK_SIZE, self.bytes_per_second);
        let data = MacFrame::Data {
            dst: out.next_hop,
            src: self.addr,
            duration: ack_time + t.sync + t.propagation + t.sifs + t.propagation,
            seq: Some(seq),
            retry,
            body: out.packet.clone(),
        };
        let delay = if after_cts { t.sifs } else { t.turnaround };
        let done = self.transmit(MacMode::TxUnicast, data, delay, ctx);
        self.stats.unicasts_sent += 1;
        ctx.schedule(done, MacEvent::StartTimer {
            delay: ack_time + t.sync + t.propagation + t.sifs + t.slot + t.propagation,
            mode: MacMode::WaitAck,
        });
    }

    fn send_ack(&mut self, dst: MacAddress, ctx: &mut dyn MacContext) {
        let ack = MacFrame::Ack {
            dst,
            duration: SimTime::ZERO,
        };
        let done = self.transmit(MacMode::TxAck, ack, self.timing.sifs, ctx);
        self.stats.acks_sent += 1;
        ctx.schedule(done, MacEvent::CfDone {
            backoff: false,
            drop_packet: false,
        });
    }

    // ----- retry -----

    fn retry(&mut self, ctx: &mut dyn MacContext) {
        let rts = self.outgoing.as_ref().is_some_and(|out| self.should_rts(out));
        // CTS timeouts always count against the short limit
        let (counter, limit) = if rts && self.mode != MacMode::WaitCts {
            (&mut self.long_retry, self.timing.retry_limit_long)
        } else {
            (&mut self.short_retry, self.timing.retry_limit_short)
        };
        let give_up = if self.ns2_retry_count {
            if *counter < limit {
                *counter += 1;
                false
            } else {
                true
            }
        } else {
            *counter += 1;
            *counter >= limit
        };

        if give_up {
            self.short_retry = 0;
            self.long_retry = 0;
            self.stats.drops += 1;
            if let Some(out) = &self.outgoing {
                log::debug!("mac {} dropping {} byte packet for {} after retry limit", self.addr, out.packet.size(), out.next_hop);
            }
            self.cw = self.timing.cw_min;
            self.cf_done(true, true, ctx);
        } else {
            self.stats.retries += 1;
            self.cw = (2 * self.cw + 1).min(self.timing.cw_max);
            log::trace!("mac {} retry, cw {}", self.addr, self.cw);
            self.set_backoff(ctx);
            self.do_difs(ctx);
        }
    }

    // ----- receiving -----

    /// The radio locked on a signal whose frame is not known yet.
    pub fn peek(&mut self, ctx: &mut dyn MacContext) {
        self.need_eifs = true;
        if self.mode == MacMode::NavRts {
            // activity after the RTS: the reservation is real
            self.nav_rts_release = None;
            if self.is_radio_idle() {
                // undecodable signals leave the radio idle, so no idle
                // transition will come to restart DIFS
                self.nav_timer(ctx);
            } else {
                self.idle();
            }
        }
    }

    pub fn receive(&mut self, frame: &MacFrame, ctx: &mut dyn MacContext) {
        self.need_eifs = false;
        let dst = frame.dst();
        if dst == self.addr {
            match frame {
                MacFrame::Rts { src, duration, .. } => self.receive_rts(*src, *duration, ctx),
                MacFrame::Cts { .. } => self.receive_cts(ctx),
                MacFrame::Ack { .. } => self.receive_ack(ctx),
                MacFrame::Data { .. } => self.receive_data(frame, ctx),
            }
        } else if dst == MacAddress::ANY {
            match frame {
                MacFrame::Data { .. } => self.receive_data(frame, ctx),
                other => panic!("mac {}: {other} addressed to broadcast", self.addr),
            }
        } else {
            self.receive_foreign(frame, ctx);
        }
    }

    fn receive_rts(&mut self, src: MacAddress, duration: SimTime, ctx: &mut dyn MacContext) {
        if !self.mode.is_awaiting_response() && !self.waiting_nav(ctx.now()) {
            self.cancel_timer();
            self.send_cts(src, duration, ctx);
        }
    }

    fn receive_cts(&mut self, ctx: &mut dyn MacContext) {
        if self.mode == MacMode::WaitCts {
            self.cancel_timer();
            self.short_retry = 0;
            if self.cts_resets_cw {
                self.cw = self.timing.cw_min;
            }
            self.send_data(true, ctx);
        }
    }

    fn receive_ack(&mut self, ctx: &mut dyn MacContext) {
        if self.mode == MacMode::WaitAck {
            self.cancel_timer();
            self.short_retry = 0;
            self.long_retry = 0;
            self.cw = self.timing.cw_min;
            self.stats.delivered += 1;
            self.cf_done(true, true, ctx);
        }
    }

    fn receive_data(&mut self, frame: &MacFrame, ctx: &mut dyn MacContext) {
        let MacFrame::Data {
            dst, src, seq, retry, body, ..
        } = frame
        else {
            return;
        };
        if self.mode != MacMode::WaitData && self.mode.is_awaiting_response() {
            return;
        }
        if *dst == MacAddress::ANY {
            self.stats.received += 1;
            ctx.net_receive(body.clone(), *src, false);
            self.cf_done(false, false, ctx);
            return;
        }

        self.cancel_timer();
        self.send_ack(*src, ctx);
        let duplicate = *retry && seq.is_some() && self.cached_seq(*src) == *seq;
        if duplicate {
            self.stats.duplicates += 1;
            log::debug!("mac {} suppressed duplicate {frame}", self.addr);
            return;
        }
        if let Some(seq) = seq {
            self.update_seq(*src, *seq);
        }
        self.stats.received += 1;
        ctx.net_receive(body.clone(), *src, false);
    }

    fn receive_foreign(&mut self, frame: &MacFrame, ctx: &mut dyn MacContext) {
        let now = ctx.now();
        let t = self.timing;
        let nav = now + frame.duration() + EPSILON_DELAY;
        let is_rts = matches!(frame, MacFrame::Rts { .. });
        if !is_rts {
            self.nav_rts_release = None;
        }
        if nav > self.nav {
            self.nav = nav;
            if is_rts && self.nav_policy == NavPolicy::Standard {
                // no CTS or DATA by then means the exchange never started
                self.nav_rts_release = Some(now + t.propagation + t.sifs + t.sync + self.bytes_time(CTS_SIZE) + t.propagation + t.slot * 2);
            }
            if self.is_radio_idle() && self.has_packet() {
                match self.mode {
                    MacMode::Backoff => {
                        self.pause_backoff(now);
                        self.nav_timer(ctx);
                    }
                    MacMode::Idle | MacMode::Difs | MacMode::Nav | MacMode::NavRts => self.nav_timer(ctx),
                    _ => {}
                }
            }
        }
        if self.promiscuous {
            if let MacFrame::Data { src, body, .. } = frame {
                self.stats.snooped += 1;
                ctx.net_receive(body.clone(), *src, true);
            }
        }
    }

    fn cached_seq(&mut self, src: MacAddress) -> Option<u16> {
        let pos = self.seq_cache.iter().position(|(addr, _)| *addr == src)?;
        let entry = self.seq_cache.remove(pos)?;
        self.seq_cache.push_front(entry);
        Some(entry.1)
    }

    fn update_seq(&mut self, src: MacAddress, seq: u16) {
        if let Some(pos) = self.seq_cache.iter().position(|(addr, _)| *addr == src) {
            self.seq_cache.remove(pos);
        }
        self.seq_cache.push_front((src, seq));
        self.seq_cache.truncate(SEQ_CACHE_SIZE);
    }

    // ----- radio mode -----

    pub fn set_radio_mode(&mut self, mode: RadioMode, ctx: &mut dyn MacContext) {
        self.radio_mode = mode;
        match mode {
            RadioMode::Idle => self.radio_idle(ctx),
            RadioMode::Sensing | RadioMode::Receiving | RadioMode::Sleep => self.radio_busy(ctx.now()),
            RadioMode::Transmitting => {}
        }
    }

    fn radio_idle(&mut self, ctx: &mut dyn MacContext) {
        if matches!(self.mode, MacMode::Idle | MacMode::Nav) {
            self.do_difs(ctx);
        }
    }

    fn radio_busy(&mut self, now: SimTime) {
        match self.mode {
            MacMode::Backoff => {
                self.pause_backoff(now);
                self.idle();
            }
            MacMode::Difs | MacMode::Nav => self.idle(),
            MacMode::NavRts => {
                self.nav_rts_release = None;
                self.idle();
            }
            MacMode::Idle
            | MacMode::WaitCts
            | MacMode::WaitData
            | MacMode::WaitAck
            | MacMode::TxBroadcast
            | MacMode::TxUnicast
            | MacMode::TxAck => {}
            MacMode::TxRts | MacMode::TxCts => {
                log::warn!("mac {}: radio busy while in {}", self.addr, self.mode);
                if cfg!(debug_assertions) {
                    panic!("mac {}: radio busy while in {}", self.addr, self.mode);
                }
            }
        }
    }
}
