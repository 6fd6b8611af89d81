//! Radio signal calculations.
//!
//! Contains helpers for:
//! - Power unit conversion (dBm ↔ mW)
//! - Path loss models (free space, two-ray ground reflection, log-distance)
//! - Fading models (Rayleigh, Rician, log-normal shadowing)
//!
//! Units:
//! - Power: dBm, mW (conversion provided)
//! - Gains and losses: dB
//! - Distance: meters

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::geometry::Location;
use super::types::RadioProperties;

/// Convert power from dBm (decibels relative to 1 milliwatt) to milliwatts.
///
/// # Formula
///
/// ```text
/// P(mW) = 10^(P(dBm) / 10)
/// ```
///
/// # Examples
///
/// ```text
/// 0 dBm   → 1 mW
/// 10 dBm  → 10 mW
/// -10 dBm → 0.1 mW
/// ```
pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

/// Convert power from milliwatts to dBm.
///
/// # Formula
///
/// ```text
/// P(dBm) = 10 × log₁₀(P(mW))
/// ```
///
/// # Notes
///
/// - This is the inverse operation of `dbm_to_mw()`
/// - For `mw <= 0` the result is -∞ or NaN; powers should always be positive
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}

/// Path loss model applied between a transmitter and a receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathLoss {
    /// Friis free-space propagation.
    FreeSpace,
    /// Two-ray ground reflection. Uses the plane-earth term once it exceeds
    /// the free-space term (beyond the crossover distance).
    TwoRay,
    /// Log-distance model with an explicit reference loss at 1 meter.
    LogDistance {
        /// Path loss exponent (n). 2.0 for free space, 2.7-3.5 for urban.
        path_loss_exponent: f64,
        /// Path loss at the reference distance d₀ = 1 m, in dB.
        path_loss_at_reference_distance: f64,
    },
}

impl Default for PathLoss {
    fn default() -> Self {
        PathLoss::FreeSpace
    }
}

impl PathLoss {
    /// Calculate the path loss (in dB) between two radios, antenna gains included.
    ///
    /// # Formula
    ///
    /// ```text
    /// FreeSpace:   PL = -G_s - G_d + 20 × log₁₀(4πd / λ)
    /// TwoRay:      PL = -G_s - G_d + 20 × log₁₀(max(4πd / λ, d² / (h_s × h_d)))
    /// LogDistance: PL = -G_s - G_d + PL(d₀) + 10 × n × log₁₀(d)
    /// ```
    ///
    /// The logarithmic term is only applied when its argument exceeds 1 (or the
    /// distance exceeds the 1 m reference), so very close radios never see a
    /// negative loss.
    pub fn compute(&self, src: &RadioProperties, src_loc: &Location, dst: &RadioProperties, dst_loc: &Location) -> f64 {
        let dist = src_loc.distance(dst_loc);
        let gains = -src.gain - dst.gain;
        match self {
            PathLoss::FreeSpace => gains + free_space_term(dist, src.wavelength),
            PathLoss::TwoRay => {
                let free_space = 4.0 * PI * dist / src.wavelength;
                let plane_earth = dist * dist / (src_loc.height * dst_loc.height);
                let value = free_space.max(plane_earth);
                if value > 1.0 { gains + 20.0 * value.log10() } else { gains }
            }
            PathLoss::LogDistance {
                path_loss_exponent,
                path_loss_at_reference_distance,
            } => {
                if dist < 1.0 {
                    gains + path_loss_at_reference_distance
                } else {
                    gains + path_loss_at_reference_distance + 10.0 * path_loss_exponent * dist.log10()
                }
            }
        }
    }

    /// Lower bound of [`compute`](Self::compute) for a receiver with antenna gain
    /// `dst_gain` standing at `point`, whatever its antenna height.
    ///
    /// Used for spatial pruning, where the receiver is hypothetical.
    pub fn min_loss(&self, src: &RadioProperties, src_loc: &Location, dst_gain: f64, point: &Location) -> f64 {
        let dist = src_loc.distance(point);
        let gains = -src.gain - dst_gain;
        match self {
            PathLoss::FreeSpace | PathLoss::TwoRay => gains + free_space_term(dist, src.wavelength),
            PathLoss::LogDistance { .. } => {
                let receiver = RadioProperties { gain: dst_gain, ..*src };
                self.compute(src, src_loc, &receiver, point)
            }
        }
    }
}

fn free_space_term(dist: f64, wavelength: f64) -> f64 {
    let value = 4.0 * PI * dist / wavelength;
    if value > 1.0 { 20.0 * value.log10() } else { 0.0 }
}

/// Random per-link fading, in dB, added to the received power.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fading {
    None,
    Rayleigh,
    Rician {
        /// Ratio of direct-path power to scattered power.
        k_factor: f64,
    },
    /// Log-normal shadowing: Normal(0, σ) in dB.
    Shadowing { sigma: f64 },
}

impl Default for Fading {
    fn default() -> Self {
        Fading::None
    }
}

impl Fading {
    /// Sample a fading value in dB.
    ///
    /// # Formula
    ///
    /// ```text
    /// Rayleigh: 5 × log₁₀(-2 × (2/π) × ln U),  U ~ Uniform(0, 1)
    /// Rician:   5 × log₁₀((a + x)² + y²),  a = √(2kσ²), (x, y) ~ N(0, σ)
    /// ```
    pub fn compute<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            Fading::None => 0.0,
            Fading::Rayleigh => {
                let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
                5.0 * (-2.0 * 0.6366197723676 * u.ln()).log10()
            }
            Fading::Rician { k_factor } => {
                let stddev = rician_stddev(*k_factor);
                let a = (2.0 * k_factor * stddev * stddev).sqrt();
                let Ok(normal) = Normal::new(0.0, stddev) else {
                    return 0.0;
                };
                let i = a + normal.sample(rng);
                let q = normal.sample(rng);
                5.0 * (i * i + q * q).log10()
            }
            Fading::Shadowing { sigma } => {
                if *sigma <= 0.0 {
                    return 0.0;
                }
                match Normal::new(0.0, *sigma) {
                    Ok(normal) => normal.sample(rng),
                    Err(_) => 0.0,
                }
            }
        }
    }

    /// Whether this model can ever add a positive amount to the received power.
    pub fn is_deterministic(&self) -> bool {
        matches!(self, Fading::None) || matches!(self, Fading::Shadowing { sigma } if *sigma <= 0.0)
    }
}

/// Standard deviation normalising the Rician envelope to unit mean power.
fn rician_stddev(k: f64) -> f64 {
    1.0 / ((PI / 2.0).sqrt() * (-k / 2.0).exp() * ((1.0 + k) * bessel_i0(k / 2.0) + k * bessel_i1(k / 2.0)))
}

// Polynomial approximations of the modified Bessel functions (Abramowitz & Stegun 9.8).
fn bessel_i0(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 3.75 {
        let y = (x / 3.75).powi(2);
        1.0 + y * (3.5156229 + y * (3.0899424 + y * (1.2067492 + y * (0.2659732 + y * (0.360768e-1 + y * 0.45813e-2)))))
    } else {
        let y = 3.75 / ax;
        (ax.exp() / ax.sqrt())
            * (0.39894228
                + y * (0.1328592e-1
                    + y * (0.225319e-2
                        + y * (-0.157565e-2 + y * (0.916281e-2 + y * (-0.2057706e-1 + y * (0.2635537e-1 + y * (-0.1647633e-1 + y * 0.392377e-2))))))))
    }
}

fn bessel_i1(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 3.75 {
        let y = (x / 3.75).powi(2);
        x * (0.5 + y * (0.87890494 + y * (0.51498869 + y * (0.15084934 + y * (0.2658733e-1 + y * (0.301532e-2 + y * 0.32411e-3))))))
    } else {
        let y = 3.75 / ax;
        ((ax.exp() / ax.sqrt())
            * (0.39894228
                + y * (-0.3988024e-1
                    + y * (-0.362018e-2 + y * (0.163801e-2 + y * (-0.1031555e-1 + y * (0.2282967e-1 + y * (-0.2895312e-1 + y * (0.1787654e-1 - y * 0.420059e-2)))))))))
            .abs()
    }
}
