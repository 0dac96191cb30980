//! Clock quantization.
//!
//! Every clocked function on the board (sample clocks, PWM, the SPI bit
//! clock) derives its frequency from the FPGA base clock through a
//! prescaler ("divisor") and a counter ("top"). [`quantize`] picks the
//! divisor/counter pair that lands closest to a requested frequency; the
//! per-function tables live in [`ClockParams`] presets.
//!
//! # Counting modes
//!
//! ```text
//! asymmetric:     actual = base / (divisor * (top + 1))
//! phase-correct:  actual = base / (2 * divisor * top)
//! ```

use tracing::{debug, trace, warn};

use crate::error::{ElvisError, Result};

/// FPGA base clock shared by the sample clocks and PWM.
pub const BASE_CLOCK_HZ: f64 = 40_000_000.0;

/// Base clock of the SPI engine.
pub const SPI_BASE_CLOCK_HZ: f64 = 20_000_000.0;

/// Parameters of one clocked function.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockParams {
    /// Allowed prescaler values, scanned in order
    pub divisors: Vec<u32>,
    /// Symmetric (phase-correct) counting instead of asymmetric
    pub phase_correct: bool,
    /// Lowest accepted frequency (inclusive)
    pub min_frequency: f64,
    /// Highest accepted frequency (inclusive)
    pub max_frequency: f64,
    /// Input clock of the prescaler
    pub base_clock_hz: f64,
    /// Smallest usable counter value
    pub min_counter: u32,
    /// Largest usable counter value
    pub max_counter: u32,
    /// Reject out-of-range requests instead of clamping them
    pub coerce_range: bool,
}

impl ClockParams {
    /// Sample clock of an analog bank: a single divisor, counter loaded with
    /// the tick count, out-of-range rates clamped.
    pub fn sample_clock(base_clock_hz: f64, min_frequency: f64, max_frequency: f64) -> Self {
        Self {
            divisors: vec![1],
            phase_correct: false,
            min_frequency,
            max_frequency,
            base_clock_hz,
            min_counter: 0,
            max_counter: u32::MAX - 1,
            coerce_range: false,
        }
    }

    /// PWM generator clock.
    pub fn pwm(base_clock_hz: f64) -> Self {
        Self {
            divisors: vec![1, 2, 4, 8, 16, 32, 64],
            phase_correct: false,
            min_frequency: 40.0,
            max_frequency: 40_000.0,
            base_clock_hz,
            min_counter: 100,
            max_counter: 65_535,
            coerce_range: true,
        }
    }

    /// SPI bit clock.
    pub fn spi() -> Self {
        Self {
            divisors: vec![1, 2, 4, 8],
            phase_correct: false,
            min_frequency: 40.0,
            max_frequency: 4_000_000.0,
            base_clock_hz: SPI_BASE_CLOCK_HZ,
            min_counter: 1,
            max_counter: 65_535,
            coerce_range: true,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.divisors.is_empty() || self.divisors.contains(&0) {
            return Err(ElvisError::invalid_parameter(
                "clock divisor table must be non-empty and non-zero",
            ));
        }
        if !(self.base_clock_hz > 0.0) || !(self.min_frequency > 0.0) {
            return Err(ElvisError::invalid_parameter(
                "base clock and minimum frequency must be positive",
            ));
        }
        if self.min_frequency > self.max_frequency || self.min_counter > self.max_counter {
            return Err(ElvisError::invalid_parameter("clock bounds are inverted"));
        }
        Ok(())
    }

    fn frequency(&self, divisor: u32, top: u32) -> f64 {
        if self.phase_correct {
            self.base_clock_hz / (2.0 * f64::from(divisor) * f64::from(top))
        } else {
            self.base_clock_hz / (f64::from(divisor) * (f64::from(top) + 1.0))
        }
    }

    fn counter_for(&self, divisor: u32, frequency: f64) -> u32 {
        let d = f64::from(divisor);
        let top = if self.phase_correct {
            (self.base_clock_hz / (2.0 * d * frequency)).round().max(1.0)
        } else {
            ((self.base_clock_hz / (d * frequency)).round() - 1.0).max(0.0)
        };
        // Float-to-int `as` saturates
        top as u32
    }
}

/// Result of a quantization. Derived per call, never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSetting {
    /// Frequency the caller asked for (after clamping, if any)
    pub requested: f64,
    /// Selected prescaler
    pub divisor: u32,
    /// Position of `divisor` in the table
    pub divisor_index: usize,
    /// Counter value
    pub top: u32,
    /// Frequency the hardware will produce
    pub actual: f64,
}

impl ClockSetting {
    /// Base-clock ticks per period for an asymmetric counter.
    pub fn ticks(&self) -> u32 {
        self.top.saturating_add(1)
    }
}

/// Map `requested` Hz onto the closest divisor/counter pair.
///
/// Divisors are scanned in table order. A candidate whose counter lies in
/// `[min_counter, max_counter]` always beats one that does not; otherwise a
/// later candidate replaces the best so far only when its frequency error
/// is strictly smaller. Scanning stops on an exact in-range match or once the
/// counter falls below `min_counter`.
pub fn quantize(requested: f64, params: &ClockParams) -> Result<ClockSetting> {
    params.validate()?;
    if !requested.is_finite() || requested <= 0.0 {
        return Err(ElvisError::invalid_parameter(format!(
            "frequency must be positive and finite, got {requested}"
        )));
    }

    let in_bounds = (params.min_frequency..=params.max_frequency).contains(&requested);
    if !in_bounds && params.coerce_range {
        return Err(ElvisError::OutOfRange {
            requested,
            min: params.min_frequency,
            max: params.max_frequency,
        });
    }
    let requested = requested.clamp(params.min_frequency, params.max_frequency);

    let mut best: Option<(ClockSetting, bool)> = None;
    for (divisor_index, &divisor) in params.divisors.iter().enumerate() {
        let top = params.counter_for(divisor, requested);
        let actual = params.frequency(divisor, top);
        let in_range = (params.min_counter..=params.max_counter).contains(&top);
        let candidate = ClockSetting {
            requested,
            divisor,
            divisor_index,
            top,
            actual,
        };
        trace!(divisor, top, actual, in_range, "Clock candidate");

        let accept = match &best {
            None => true,
            Some((current, current_in_range)) => match (in_range, *current_in_range) {
                (true, false) => true,
                (false, true) => false,
                _ => (requested - actual).abs() < (requested - current.actual).abs(),
            },
        };
        if accept {
            best = Some((candidate, in_range));
        }

        if (in_range && actual == requested) || top < params.min_counter {
            break;
        }
    }

    let (mut setting, in_range) = match best {
        Some(found) => found,
        None => {
            return Err(ElvisError::invalid_parameter("clock divisor table is empty"));
        }
    };

    if !in_range {
        setting.top = setting.top.clamp(params.min_counter, params.max_counter);
        if params.phase_correct {
            setting.top = setting.top.max(1);
        }
        setting.actual = params.frequency(setting.divisor, setting.top);
    }

    debug!(
        requested = setting.requested,
        actual = setting.actual,
        divisor = setting.divisor,
        top = setting.top,
        "Quantized clock"
    );
    Ok(setting)
}

/// Bounds of an analog bank's aggregate sample clock.
pub const AI_CLOCK_RANGE: (f64, f64) = (1.0, 1_000_000.0);

/// Bounds of an analog-output sample rate.
pub const AO_RATE_RANGE: (f64, f64) = (1_000.0, 1_600_000.0);

/// Quantize a bank sample clock, clamping `rate` into `range`.
///
/// The counter register of the bank receives [`ClockSetting::ticks`].
pub fn sample_clock(base_clock_hz: f64, rate: f64, range: (f64, f64)) -> Result<ClockSetting> {
    let (min, max) = range;
    if rate < min || rate > max {
        warn!(requested = rate, min, max, "Sample clock coerced into range");
    }
    quantize(rate, &ClockParams::sample_clock(base_clock_hz, min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_clock_exact() {
        let params = ClockParams::sample_clock(BASE_CLOCK_HZ, 1.0, 1_000_000.0);
        let s = quantize(1_000.0, &params).unwrap();
        assert_eq!(s.divisor, 1);
        assert_eq!(s.ticks(), 40_000);
        assert_eq!(s.actual, 1_000.0);
    }

    #[test]
    fn test_sample_clock_clamps_silently() {
        let params = ClockParams::sample_clock(BASE_CLOCK_HZ, 1.0, 1_000_000.0);
        let s = quantize(2_000_000.0, &params).unwrap();
        assert_eq!(s.requested, 1_000_000.0);
        assert_eq!(s.ticks(), 40);
    }

    #[test]
    fn test_sample_clock_for_output_rates() {
        let s = sample_clock(BASE_CLOCK_HZ, 500.0, AO_RATE_RANGE).unwrap();
        assert_eq!(s.ticks(), 40_000);
        let s = sample_clock(BASE_CLOCK_HZ, 1_600_000.0, AO_RATE_RANGE).unwrap();
        assert_eq!(s.ticks(), 25);
    }

    #[test]
    fn test_coerced_range_rejects() {
        let err = quantize(20.0, &ClockParams::pwm(BASE_CLOCK_HZ)).unwrap_err();
        assert!(matches!(err, ElvisError::OutOfRange { .. }));

        let err = quantize(5_000_000.0, &ClockParams::spi()).unwrap_err();
        assert!(matches!(err, ElvisError::OutOfRange { .. }));
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        let params = ClockParams::pwm(BASE_CLOCK_HZ);
        assert!(quantize(40.0, &params).is_ok());
        assert!(quantize(40_000.0, &params).is_ok());
    }

    #[test]
    fn test_pwm_low_frequency_moves_to_larger_divisor() {
        // 40e6 / 100 Hz = 400_000 ticks: divisor 1, 2 and 4 overflow the counter
        let s = quantize(100.0, &ClockParams::pwm(BASE_CLOCK_HZ)).unwrap();
        assert_eq!(s.divisor, 8);
        assert_eq!(s.top, 49_999);
        assert_eq!(s.actual, 100.0);
        assert_eq!(s.divisor_index, 3);
    }

    #[test]
    fn test_pwm_exact_match_stops_at_first_divisor() {
        let s = quantize(10_000.0, &ClockParams::pwm(BASE_CLOCK_HZ)).unwrap();
        assert_eq!(s.divisor, 1);
        assert_eq!(s.top, 3_999);
    }

    #[test]
    fn test_spi_clock() {
        let s = quantize(1_000_000.0, &ClockParams::spi()).unwrap();
        assert_eq!(s.divisor, 1);
        assert_eq!(s.top, 19);
        assert_eq!(s.actual, 1_000_000.0);
    }

    #[test]
    fn test_phase_correct_counting() {
        let params = ClockParams {
            phase_correct: true,
            ..ClockParams::pwm(BASE_CLOCK_HZ)
        };
        let s = quantize(1_000.0, &params).unwrap();
        assert_eq!(s.divisor, 1);
        assert_eq!(s.top, 20_000);
        assert_eq!(s.actual, 1_000.0);
    }

    #[test]
    fn test_out_of_counter_range_is_clamped() {
        // Nothing in the table reaches 40 Hz with a 16-bit counter at divisor <= 4
        let params = ClockParams {
            divisors: vec![1, 2, 4],
            ..ClockParams::pwm(BASE_CLOCK_HZ)
        };
        let s = quantize(40.0, &params).unwrap();
        assert_eq!(s.top, 65_535);
        assert!(s.actual > 40.0);
    }

    #[test]
    fn test_rejects_bad_requests() {
        let params = ClockParams::spi();
        assert!(quantize(f64::NAN, &params).unwrap_err().is_validation());
        assert!(quantize(-5.0, &params).unwrap_err().is_validation());

        let empty = ClockParams {
            divisors: Vec::new(),
            ..ClockParams::spi()
        };
        assert!(quantize(1_000.0, &empty).is_err());
    }
}
