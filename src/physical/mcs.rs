//! Modulation and coding schemes.

use std::fmt;

use super::frequency_band::FrequencyBandSpec;
use super::signal_calculations::{eb_n0_ratio, max_correctable_ber, q_function};

/// A modulation and coding scheme: how fast bits go out and how many errors survive decoding.
pub trait Mcs: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Raw (coded) bits per second on the air.
    fn bit_rate(&self) -> f64;

    /// Code rate as (k, n): k data bits per n coded bits.
    fn code_rate(&self) -> (u32, u32);

    /// Data bits per second after coding.
    fn data_rate(&self) -> f64 {
        let (k, n) = self.code_rate();
        self.bit_rate() * f64::from(k) / f64::from(n)
    }

    /// Bit error rate at the given signal and noise (plus interference) power.
    fn calculate_bit_error_rate(&self, signal_dbm: f64, noise_dbm: f64) -> f64;

    /// Largest bit error rate the code can still correct.
    fn max_correctable_ber(&self) -> f64 {
        let (k, n) = self.code_rate();
        max_correctable_ber(k, n)
    }
}

/// Binary phase-shift keying: one bit per symbol, symbol rate equal to the bandwidth.
#[derive(Debug, Clone)]
pub struct BpskMcs {
    band: FrequencyBandSpec,
    code_rate: (u32, u32),
}

impl BpskMcs {
    pub const DEFAULT_CODE_RATE: (u32, u32) = (3, 4);

    pub fn new(band: FrequencyBandSpec) -> Self {
        Self::with_code_rate(band, Self::DEFAULT_CODE_RATE)
    }

    pub fn with_code_rate(band: FrequencyBandSpec, code_rate: (u32, u32)) -> Self {
        Self { band, code_rate }
    }
}

impl Mcs for BpskMcs {
    fn name(&self) -> &'static str {
        "BPSK"
    }

    fn bit_rate(&self) -> f64 {
        self.band.bandwidth
    }

    fn code_rate(&self) -> (u32, u32) {
        self.code_rate
    }

    /// `Q(√(2·Eb/N0))`, or 0.5 when the signal does not rise above the noise.
    fn calculate_bit_error_rate(&self, signal_dbm: f64, noise_dbm: f64) -> f64 {
        if signal_dbm <= noise_dbm {
            return 0.5;
        }
        let ratio = eb_n0_ratio(signal_dbm, noise_dbm, self.band.bandwidth, self.bit_rate());
        q_function((2.0 * ratio).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpsk_rates_follow_the_band() {
        let mcs = BpskMcs::new(FrequencyBandSpec::default());
        assert_eq!(mcs.bit_rate(), 22e6);
        assert!((mcs.data_rate() - 16.5e6).abs() < 1e-6);
        assert_eq!(mcs.max_correctable_ber(), 0.25);
    }

    #[test]
    fn bpsk_error_rate_drops_with_snr() {
        let mcs = BpskMcs::new(FrequencyBandSpec::default());
        assert_eq!(mcs.calculate_bit_error_rate(-90.0, -90.0), 0.5);
        assert_eq!(mcs.calculate_bit_error_rate(-95.0, -90.0), 0.5);
        let low = mcs.calculate_bit_error_rate(-87.0, -90.0);
        let high = mcs.calculate_bit_error_rate(-80.0, -90.0);
        assert!(low > high);
        assert!(high < 1e-5);
        // 0 dB Eb/N0: Q(√2) ≈ 0.0786
        let just_above = mcs.calculate_bit_error_rate(-89.999_999, -90.0);
        assert!((just_above - 0.0786).abs() < 0.002);
    }
}
