//! 802.11 DCF parameters.
//!
//! `MacConfig` is what scene files carry: a PHY preset plus optional
//! overrides and behaviour flags. `MacConfig::timing` resolves it into the
//! concrete `MacTiming` the state machine runs on.

use serde::{Deserialize, Serialize};

use crate::simulation::time::SimTime;
use crate::simulation::types::ConfigError;

use super::frame::ACK_SIZE;

/// Physical layer flavour the timing presets come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phy {
    #[default]
    Dsss,
    Fhss,
}

/// How an overheard RTS reserves the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavPolicy {
    /// Every overheard duration is honoured in full.
    #[default]
    Ns2,
    /// A NAV set by an RTS is released when no CTS follows in time.
    Standard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacConfig {
    pub phy: Phy,
    /// Overrides of the PHY preset, microseconds.
    pub slot_us: Option<u64>,
    pub sifs_us: Option<u64>,
    pub cw_min: Option<u32>,
    pub cw_max: u32,
    pub preamble_us: u64,
    pub plcp_header_us: u64,
    pub turnaround_us: u64,
    pub propagation_us: u64,
    /// Payloads above this many bytes go through RTS/CTS.
    pub rts_threshold: usize,
    pub retry_limit_short: u32,
    pub retry_limit_long: u32,
    /// Hand overheard unicast DATA up as well.
    pub promiscuous: bool,
    pub nav_policy: NavPolicy,
    /// Reset the contention window when a CTS arrives.
    pub cts_resets_cw: bool,
    /// Compare a retry counter before incrementing it, allowing one attempt
    /// beyond the limit.
    pub ns2_retry_count: bool,
}

impl Default for MacConfig {
    fn default() -> Self {
        MacConfig {
            phy: Phy::Dsss,
            slot_us: None,
            sifs_us: None,
            cw_min: None,
            cw_max: 1023,
            preamble_us: 144,
            plcp_header_us: 48,
            turnaround_us: 5,
            propagation_us: 1,
            rts_threshold: 3000,
            retry_limit_short: 7,
            retry_limit_long: 4,
            promiscuous: false,
            nav_policy: NavPolicy::Ns2,
            cts_resets_cw: false,
            ns2_retry_count: false,
        }
    }
}

impl MacConfig {
    pub fn fhss() -> Self {
        MacConfig {
            phy: Phy::Fhss,
            ..MacConfig::default()
        }
    }

    pub fn timing(&self) -> Result<MacTiming, ConfigError> {
        let (slot, sifs, cw_min) = match self.phy {
            Phy::Dsss => (20, 10, 31),
            Phy::Fhss => (50, 28, 15),
        };
        let slot = SimTime::from_micros(self.slot_us.unwrap_or(slot));
        let sifs = SimTime::from_micros(self.sifs_us.unwrap_or(sifs));
        let cw_min = self.cw_min.unwrap_or(cw_min);
        let turnaround = SimTime::from_micros(self.turnaround_us);

        if slot == SimTime::ZERO || sifs == SimTime::ZERO {
            return Err(ConfigError::Mac("slot time and SIFS must be positive".to_string()));
        }
        if turnaround > sifs {
            return Err(ConfigError::Mac(format!("turnaround {turnaround} exceeds SIFS {sifs}")));
        }
        if cw_min == 0 || self.cw_max < cw_min {
            return Err(ConfigError::Mac(format!("contention window {cw_min}..{} is empty", self.cw_max)));
        }
        if self.retry_limit_short == 0 || self.retry_limit_long == 0 {
            return Err(ConfigError::Mac("retry limits must be positive".to_string()));
        }

        let sync = SimTime::from_micros(self.preamble_us + self.plcp_header_us);
        let difs = sifs + slot * 2;
        Ok(MacTiming {
            slot,
            sifs,
            difs,
            // ACK airtime at the 1 Mb/s basic rate
            eifs: sifs + difs + sync + SimTime::from_micros(8 * ACK_SIZE as u64),
            sync,
            turnaround,
            propagation: SimTime::from_micros(self.propagation_us),
            cw_min,
            cw_max: self.cw_max,
            rts_threshold: self.rts_threshold,
            retry_limit_short: self.retry_limit_short,
            retry_limit_long: self.retry_limit_long,
        })
    }
}

/// Resolved protocol intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacTiming {
    pub slot: SimTime,
    pub sifs: SimTime,
    pub difs: SimTime,
    pub eifs: SimTime,
    /// Preamble plus PLCP header.
    pub sync: SimTime,
    pub turnaround: SimTime,
    pub propagation: SimTime,
    pub cw_min: u32,
    pub cw_max: u32,
    pub rts_threshold: usize,
    pub retry_limit_short: u32,
    pub retry_limit_long: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsss_intervals() {
        let t = MacConfig::default().timing().unwrap();
        assert_eq!(t.difs, SimTime::from_micros(50));
        assert_eq!(t.sync, SimTime::from_micros(192));
        // 10 + 50 + 192 + 112
        assert_eq!(t.eifs, SimTime::from_micros(364));
        assert_eq!(t.cw_min, 31);
    }

    #[test]
    fn fhss_intervals() {
        let t = MacConfig::fhss().timing().unwrap();
        assert_eq!(t.slot, SimTime::from_micros(50));
        assert_eq!(t.difs, SimTime::from_micros(128));
        assert_eq!(t.cw_min, 15);
    }

    #[test]
    fn overrides_and_validation() {
        let cfg: MacConfig = serde_json::from_str(r#"{"phy":"fhss","slot_us":9,"sifs_us":16,"cw_min":15}"#).unwrap();
        let t = cfg.timing().unwrap();
        assert_eq!(t.difs, SimTime::from_micros(34));

        let bad = MacConfig {
            cw_min: Some(64),
            cw_max: 32,
            ..MacConfig::default()
        };
        assert!(matches!(bad.timing(), Err(ConfigError::Mac(_))));
        let bad = MacConfig {
            turnaround_us: 20,
            ..MacConfig::default()
        };
        assert!(bad.timing().is_err());
        let bad = MacConfig {
            retry_limit_long: 0,
            ..MacConfig::default()
        };
        assert!(bad.timing().is_err());
    }
}
