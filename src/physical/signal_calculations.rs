//! Radio signal calculations.
//!
//! Contains helpers for:
//! - Power unit conversion (dBm, mW)
//! - Thermal noise of a receiver
//! - Free-space and log-distance path loss
//! - Bit error rates of binary modulation and the error-correction budget of a code
//!
//! Units:
//! - Power: dBm, mW (conversion provided)
//! - Distance: meters, frequency and bandwidth: Hz
//! - Time: seconds (f64) in formulas, `std::time::Duration` at the API boundary

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use std::time::Duration;

/// Boltzmann constant in J/K, at the precision the noise model uses.
pub const BOLTZMANN_CONSTANT: f64 = 1.38e-23;

/// Receiver temperature assumed for thermal noise, in °C.
pub const DEFAULT_TEMPERATURE_CELSIUS: f64 = 20.0;

/// Constant of the free-space path loss formula for meters and Hz.
///
/// `20·log10(4π/c) ≈ −147.55 dB`.
pub const FSPL_CONSTANT: f64 = -147.55;

/// Parameters of the log-distance path loss model.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct PathLossParameters {
    /// Path loss exponent (n).
    ///
    /// - n = 2.0: Free space
    /// - n = 2.7 to 3.5: Urban areas
    /// - n = 3.0 to 5.0: Indoor obstructed environments
    pub path_loss_exponent: f64,

    /// Standard deviation of log-normal shadowing (σ) in dB. 0.0 disables shadowing.
    #[serde(default)]
    pub shadowing_sigma: f64,

    /// Path loss at the 1 m reference distance, in dB.
    pub path_loss_at_reference_distance: f64,
}

/// Convert dBm to milliwatts.
pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

/// Convert milliwatts to dBm.
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}

/// Thermal noise power spectral density `k·T` in W/Hz.
pub fn thermal_noise_density(temperature_celsius: f64) -> f64 {
    BOLTZMANN_CONSTANT * (temperature_celsius + 273.15)
}

/// Thermal noise power over `bandwidth` Hz, in mW.
pub fn thermal_noise_mw(bandwidth: f64, temperature_celsius: f64) -> f64 {
    thermal_noise_density(temperature_celsius) * bandwidth * 1000.0
}

/// Free-space path loss in dB.
///
/// # Formula
///
/// ```text
/// FSPL(d, f) = 20·log10(d) + 20·log10(f) − 147.55
/// ```
///
/// # Returns
///
/// `None` for a zero distance, where the formula is undefined.
pub fn free_space_path_loss(distance: f64, frequency: f64) -> Option<f64> {
    if distance <= 0.0 {
        return None;
    }
    Some(20.0 * distance.log10() + 20.0 * frequency.log10() + FSPL_CONSTANT)
}

/// Calculate the path loss (in dB) at a given distance using a log-distance
/// path loss model with log-normal shadowing.
///
/// # Formula
///
/// ```text
/// PL(d) = PL(d₀) + 10 × n × log₁₀(d/d₀) + X_σ
/// where d₀ = 1 meter (reference distance)
/// ```
///
/// # Parameters
///
/// - `distance`: The distance between transmitter and receiver in meters
/// - `params`: Path loss model parameters including exponent, shadowing sigma, and reference loss
/// - `rng`: Source for the shadowing term, seeded by the caller so runs are reproducible
///
/// # Notes
///
/// - For distances < 1.0 meter, returns the reference path loss without further attenuation
/// - Each call samples a new shadowing value
pub fn log_distance_path_loss<R: Rng + ?Sized>(distance: f64, params: &PathLossParameters, rng: &mut R) -> f64 {
    if distance < 1.0 {
        return params.path_loss_at_reference_distance;
    }
    let path_loss = params.path_loss_at_reference_distance + 10.0 * params.path_loss_exponent * distance.log10();
    let shadowing = match Normal::new(0.0, params.shadowing_sigma) {
        Ok(normal) if params.shadowing_sigma > 0.0 => normal.sample(rng),
        _ => 0.0,
    };
    path_loss + shadowing
}

/// Energy per bit over noise density, linear.
///
/// `noise_dbm` is the total noise (and interference) power over `bandwidth`; the
/// density is recovered by dividing by the bandwidth, so
/// `Eb/N0 = SNR · bandwidth / bit_rate`.
pub fn eb_n0_ratio(signal_dbm: f64, noise_dbm: f64, bandwidth: f64, bit_rate: f64) -> f64 {
    let snr_db = signal_dbm - noise_dbm;
    10f64.powf(snr_db / 10.0) * bandwidth / bit_rate
}

/// Approximation of the Gaussian tail function Q(x) for x ≥ 0.
///
/// # Formula
///
/// ```text
/// Q(x) ≈ (1 − e^{−1.4x}) · e^{−x²/2} / (1.135 · √(2π) · x)
/// ```
///
/// Returns 0.5 at x = 0, the limit of the exact function.
pub fn q_function(x: f64) -> f64 {
    if x <= 0.0 {
        return 0.5;
    }
    (1.0 - (-1.4 * x).exp()) * (-x * x / 2.0).exp() / (1.135 * (2.0 * std::f64::consts::PI).sqrt() * x)
}

/// Binomial coefficient C(n, k), or `None` when it does not fit in a `u64`.
pub fn binomial(n: u32, k: u32) -> Option<u64> {
    if k > n {
        return Some(0);
    }
    let k = k.min(n - k);
    let mut acc = 1u128;
    for i in 0..k {
        // C(n, i) · (n − i) / (i + 1) = C(n, i + 1), exact at every step.
        acc = acc.checked_mul(u128::from(n - i))? / u128::from(i + 1);
        if acc > u128::from(u64::MAX) {
            return None;
        }
    }
    u64::try_from(acc).ok()
}

/// Share of bit errors a code with rate k/n can correct, by the Varshamov–Gilbert bound.
///
/// Adds up `C(n, 0), C(n, 1), …` while the running sum stays within `2^(n−k)`;
/// with t terms added by the time it exceeds the bound, up to t − 1 errors per
/// block of n bits are correctable. An uncoded scheme (k ≥ n) corrects nothing.
///
/// The sum is kept as a natural logarithm, so any `n` representable as `u32`
/// works without overflow; terms are exact up to the rounding of `f64::ln`.
pub fn max_correctable_ber(k: u32, n: u32) -> f64 {
    if n == 0 || k >= n {
        return 0.0;
    }
    let ln_bound = f64::from(n - k) * std::f64::consts::LN_2;
    let mut ln_term = 0.0;
    let mut ln_sum = f64::NEG_INFINITY;
    let mut t = 0;
    while t <= n {
        if t > 0 {
            ln_term += f64::from(n - t + 1).ln() - f64::from(t).ln();
        }
        ln_sum = ln_add(ln_sum, ln_term);
        t += 1;
        if ln_sum > ln_bound + 1e-9 {
            break;
        }
    }
    f64::from(t - 1) / f64::from(n)
}

/// ln(e^a + e^b) without leaving the log domain.
fn ln_add(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    let (high, low) = if a > b { (a, b) } else { (b, a) };
    high + (low - high).exp().ln_1p()
}

/// Time needed to send `bits` at `rate` bit/s.
///
/// A non-empty payload always takes at least one nanosecond.
pub fn bits_duration(bits: usize, rate: f64) -> Duration {
    if bits == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(bits as f64 / rate).max(Duration::from_nanos(1))
}
