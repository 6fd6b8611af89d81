//! Type definitions shared across the simulation.
//!
//! Contains:
//! - Radio identifiers and the shared (flyweight) radio properties
//! - Physical constants and the default radio parameters
//! - Configuration errors raised while a simulation is being assembled

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::signal_calculations::dbm_to_mw;

/// Speed of light in m/s.
pub const SPEED_OF_LIGHT: f64 = 2.99792458e8;
/// Boltzmann's constant in J/K.
pub const BOLTZMANN: f64 = 1.3807e-23;

pub const FREQUENCY_DEFAULT: f64 = 2.4e9;
/// Bits per second.
pub const BANDWIDTH_DEFAULT: u64 = 1_000_000;
pub const TRANSMIT_DEFAULT: f64 = 15.0;
pub const GAIN_DEFAULT: f64 = 0.0;
pub const SENSITIVITY_DEFAULT: f64 = -91.0;
pub const THRESHOLD_DEFAULT: f64 = -81.0;
pub const TEMPERATURE_DEFAULT: f64 = 290.0;
pub const TEMPERATURE_FACTOR_DEFAULT: f64 = 10.0;
pub const AMBIENT_NOISE_DEFAULT: f64 = 0.0;
/// Linear power ratio (10 dB) a signal needs over noise or a locked signal.
pub const SNR_THRESHOLD_DEFAULT: f64 = 10.0;
/// Below this signal strength (dBm) a spatial bin is assumed to hold no receivers.
pub const PROPAGATION_LIMIT_DEFAULT: f64 = -111.0;
pub const ANTENNA_HEIGHT_DEFAULT: f64 = 1.5;

/// Errors raised while a simulation is being configured. These are fatal:
/// nothing is simulated with a half-built setup.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid radio configuration: {0}")]
    Radio(String),

    #[error("invalid MAC configuration: {0}")]
    Mac(String),

    #[error("invalid network configuration: {0}")]
    Net(String),

    #[error("invalid field configuration: {0}")]
    Field(String),
}

/// Stable radio identifier. Doubles as the index into the field registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RadioId(pub u32);

impl RadioId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RadioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "radio#{}", self.0)
    }
}

/// User-facing radio parameters, in the units engineers quote them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub frequency_hz: f64,
    pub bandwidth_bps: u64,
    pub transmit_dbm: f64,
    pub gain_db: f64,
    pub sensitivity_dbm: f64,
    pub threshold_dbm: f64,
    pub temperature_k: f64,
    pub thermal_factor: f64,
    pub ambient_noise_mw: f64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        RadioConfig {
            frequency_hz: FREQUENCY_DEFAULT,
            bandwidth_bps: BANDWIDTH_DEFAULT,
            transmit_dbm: TRANSMIT_DEFAULT,
            gain_db: GAIN_DEFAULT,
            sensitivity_dbm: SENSITIVITY_DEFAULT,
            threshold_dbm: THRESHOLD_DEFAULT,
            temperature_k: TEMPERATURE_DEFAULT,
            thermal_factor: TEMPERATURE_FACTOR_DEFAULT,
            ambient_noise_mw: AMBIENT_NOISE_DEFAULT,
        }
    }
}

impl RadioConfig {
    /// Derive the shared radio properties, rejecting physically meaningless input.
    pub fn build(&self) -> Result<RadioProperties, ConfigError> {
        if !(self.frequency_hz > 0.0) {
            return Err(ConfigError::Radio(format!("frequency {} Hz must be positive", self.frequency_hz)));
        }
        if self.bandwidth_bps == 0 {
            return Err(ConfigError::Radio("bandwidth must be positive".to_string()));
        }
        if self.temperature_k < 0.0 || self.thermal_factor < 0.0 || self.ambient_noise_mw < 0.0 {
            return Err(ConfigError::Radio("noise parameters must be non-negative".to_string()));
        }
        if self.threshold_dbm < self.sensitivity_dbm {
            return Err(ConfigError::Radio(format!(
                "threshold {} dBm is below sensitivity {} dBm",
                self.threshold_dbm, self.sensitivity_dbm
            )));
        }
        // thermal noise density in mW/Hz, times the channel bandwidth
        let thermal_mw = BOLTZMANN * self.temperature_k * self.thermal_factor * 1000.0;
        Ok(RadioProperties {
            wavelength: SPEED_OF_LIGHT / self.frequency_hz,
            bandwidth: self.bandwidth_bps,
            transmit: self.transmit_dbm,
            gain: self.gain_db,
            sensitivity_mw: dbm_to_mw(self.sensitivity_dbm),
            threshold_mw: dbm_to_mw(self.threshold_dbm),
            background_mw: (self.ambient_noise_mw + thermal_mw) * self.bandwidth_bps as f64,
        })
    }
}

/// Immutable radio properties. One instance is typically shared by every
/// radio of the same hardware type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadioProperties {
    /// Meters.
    pub wavelength: f64,
    /// Bits per second.
    pub bandwidth: u64,
    /// Transmit power, dBm.
    pub transmit: f64,
    /// Antenna gain, dB.
    pub gain: f64,
    pub sensitivity_mw: f64,
    pub threshold_mw: f64,
    pub background_mw: f64,
}

impl RadioProperties {
    /// Payload throughput in bytes per second.
    pub fn bytes_per_second(&self) -> u64 {
        self.bandwidth / 8
    }
}

impl Default for RadioProperties {
    fn default() -> Self {
        // defaults are always valid
        match RadioConfig::default().build() {
            Ok(props) => props,
            Err(e) => unreachable!("default radio configuration rejected: {e}"),
        }
    }
}

/// A radio's identity paired with its shared properties.
#[derive(Debug, Clone)]
pub struct RadioInfo {
    pub id: RadioId,
    pub properties: Arc<RadioProperties>,
}

impl RadioInfo {
    pub fn new(id: RadioId, properties: Arc<RadioProperties>) -> Self {
        RadioInfo { id, properties }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_properties_match_classic_values() {
        let props = RadioProperties::default();
        assert!((props.wavelength - 0.1249).abs() < 1e-3);
        assert_eq!(props.bytes_per_second(), 125_000);
        assert!((props.sensitivity_mw - 7.943e-10).abs() < 1e-12);
        // kT·F·B ≈ 4e-11 mW, roughly -104 dBm
        assert!((props.background_mw - 4.004e-11).abs() < 1e-13);
    }

    #[test]
    fn invalid_radio_configs_are_rejected() {
        let cfg = RadioConfig {
            bandwidth_bps: 0,
            ..RadioConfig::default()
        };
        assert!(matches!(cfg.build(), Err(ConfigError::Radio(_))));

        let cfg = RadioConfig {
            threshold_dbm: -95.0,
            ..RadioConfig::default()
        };
        assert!(cfg.build().is_err());

        let cfg = RadioConfig {
            frequency_hz: f64::NAN,
            ..RadioConfig::default()
        };
        assert!(cfg.build().is_err());
    }
}
