// Pair-end statistics value passed to paired alignment calls.
//
// Mirror of the engine's mem_pestat_t: the summary of an empirical
// insert-size distribution, or a sentinel meaning "inference failed /
// do not infer".

use crate::error::{BwaMemError, Result};
use crate::ffi::PeStatsRaw;

/// Low/high proper-pair bounds sit this many standard deviations from the
/// average when they aren't given explicitly.
pub const DEFAULT_LOW_AND_HIGH_SIGMA: f64 = 4.0;

/// Standard deviation assumed when only the average is known.
pub const DEFAULT_STD_TO_AVERAGE_RATIO: f64 = 0.1;

/// Immutable summary of an insert-size distribution.
///
/// `low` and `high` bound the insert sizes considered "properly paired".
#[derive(Debug, Clone, Copy)]
pub struct PairEndStats {
    average: f64,
    std: f64,
    low: i32,
    high: i32,
    failed: bool,
}

impl PairEndStats {
    /// Sentinel meaning inference failed, or that the engine should not
    /// attempt to infer the distribution itself.
    pub const FAILED: PairEndStats = PairEndStats {
        average: f64::NAN,
        std: f64::NAN,
        low: i32::MAX,
        high: i32::MIN,
        failed: true,
    };

    /// Builds stats from the average alone, assuming a standard deviation of
    /// one tenth of the average.
    pub fn from_average(average: f64) -> Result<Self> {
        check_average(average)?;
        Self::from_average_and_std(average, average * DEFAULT_STD_TO_AVERAGE_RATIO)
    }

    /// Builds stats from the average and standard deviation, deriving the
    /// proper-pair bounds as `round(average -/+ 4 sigma)`, floored at 1.
    pub fn from_average_and_std(average: f64, std: f64) -> Result<Self> {
        check_average(average)?;
        check_std(std)?;
        let low = clamp_bound(average - DEFAULT_LOW_AND_HIGH_SIGMA * std);
        let high = clamp_bound(average + DEFAULT_LOW_AND_HIGH_SIGMA * std);
        Ok(PairEndStats {
            average,
            std,
            low,
            high,
            failed: false,
        })
    }

    /// Fully explicit constructor.
    pub fn new(average: f64, std: f64, low: i32, high: i32) -> Result<Self> {
        check_average(average)?;
        check_std(std)?;
        if f64::from(low) > average {
            return Err(BwaMemError::InvalidArgument(format!(
                "the low limit {low} cannot be larger than the average {average}"
            )));
        }
        if f64::from(high) < average {
            return Err(BwaMemError::InvalidArgument(format!(
                "the high limit {high} cannot be smaller than the average {average}"
            )));
        }
        Ok(PairEndStats {
            average,
            std,
            low,
            high,
            failed: false,
        })
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn std(&self) -> f64 {
        self.std
    }

    pub fn low(&self) -> i32 {
        self.low
    }

    pub fn high(&self) -> i32 {
        self.high
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub(crate) fn to_raw(self) -> PeStatsRaw {
        PeStatsRaw {
            low: self.low,
            high: self.high,
            failed: i32::from(self.failed),
            avg: self.average,
            std: self.std,
        }
    }
}

fn check_average(average: f64) -> Result<()> {
    if !average.is_finite() || average < 1.0 {
        return Err(BwaMemError::InvalidArgument(format!(
            "invalid insert-size average: {average}"
        )));
    }
    Ok(())
}

fn check_std(std: f64) -> Result<()> {
    if !std.is_finite() || std < 0.0 {
        return Err(BwaMemError::InvalidArgument(format!(
            "invalid insert-size std. deviation: {std}"
        )));
    }
    Ok(())
}

fn clamp_bound(value: f64) -> i32 {
    (value.round() as i32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_average_derives_std_and_bounds() {
        let stats = PairEndStats::from_average(500.0).unwrap();
        assert!(!stats.is_failed());
        assert_eq!(stats.average(), 500.0);
        assert_eq!(stats.std(), 50.0);
        assert_eq!(stats.low(), 300);
        assert_eq!(stats.high(), 700);
    }

    #[test]
    fn bounds_bracket_the_average() {
        for &(avg, std) in &[(1.0, 0.0), (10.0, 2.5), (350.5, 40.0), (10_000.0, 3_000.0)] {
            let stats = PairEndStats::from_average_and_std(avg, std).unwrap();
            assert!(stats.low() <= avg.round() as i32, "low for avg={avg} std={std}");
            assert!(stats.high() >= avg.round() as i32, "high for avg={avg} std={std}");
            assert!(stats.low() >= 1);
        }
    }

    #[test]
    fn bound_width_grows_with_std() {
        let mut last_width = -1i64;
        for std in [0.0, 1.0, 10.0, 50.0, 250.0] {
            let stats = PairEndStats::from_average_and_std(1000.0, std).unwrap();
            let width = i64::from(stats.high()) - i64::from(stats.low());
            assert!(width >= last_width, "width shrank at std={std}");
            last_width = width;
        }
    }

    #[test]
    fn zero_std_collapses_bounds_to_average() {
        let stats = PairEndStats::from_average_and_std(250.0, 0.0).unwrap();
        assert_eq!(stats.low(), 250);
        assert_eq!(stats.high(), 250);
    }

    #[test]
    fn low_is_floored_at_one() {
        let stats = PairEndStats::from_average_and_std(2.0, 10.0).unwrap();
        assert_eq!(stats.low(), 1);
    }

    #[test]
    fn explicit_constructor_validates_bounds() {
        assert!(PairEndStats::new(100.0, 10.0, 50, 150).is_ok());
        assert!(PairEndStats::new(100.0, 10.0, 101, 150).is_err());
        assert!(PairEndStats::new(100.0, 10.0, 50, 99).is_err());
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(PairEndStats::from_average(0.5).is_err());
        assert!(PairEndStats::from_average(-10.0).is_err());
        assert!(PairEndStats::from_average(f64::NAN).is_err());
        assert!(PairEndStats::from_average_and_std(100.0, -1.0).is_err());
        assert!(PairEndStats::from_average_and_std(100.0, f64::INFINITY).is_err());
    }

    #[test]
    fn failed_sentinel() {
        let stats = PairEndStats::FAILED;
        assert!(stats.is_failed());
        let raw = stats.to_raw();
        assert_eq!(raw.failed, 1);
        assert_eq!(raw.low, i32::MAX);
        assert_eq!(raw.high, i32::MIN);
    }
}
