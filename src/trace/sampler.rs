//! Head-based sampling decisions.

use crate::error::{Error, Result};

/// A sampling rate within `0.0..=1.0`.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Rate(f64);

impl Rate {
    /// # Errors
    ///
    /// `Error::InvalidSampler` when `rate` is NaN or outside `0.0..=1.0`.
    pub fn new(rate: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(Error::InvalidSampler(format!("rate must be between 0 and 1, got {rate}")));
        }
        Ok(Self(rate))
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

/// Decides whether a new trace is recorded and reported.
///
/// The decision is made once per trace, when its first span starts. An
/// unsampled trace can still be promoted later with
/// [`Span::force_sample`](crate::Span::force_sample).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Sampler {
    #[default]
    Always,
    Never,
    /// Samples the given share of traces, `0.0..=1.0`.
    Percentage(Rate),
}

impl Sampler {
    /// Percentage sampler.
    ///
    /// # Errors
    ///
    /// `Error::InvalidSampler` when `rate` is not within `0.0..=1.0`.
    pub fn percentage(rate: f64) -> Result<Self> {
        Rate::new(rate).map(Self::Percentage)
    }

    /// Builds a sampler from its configuration name.
    ///
    /// # Errors
    ///
    /// `Error::InvalidSampler` for an unknown kind or an out-of-range rate.
    pub fn from_kind(kind: &str, rate: f64) -> Result<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "always" | "binary" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            "percentage" => Self::percentage(rate),
            other => Err(Error::InvalidSampler(format!(
                "expected `always`, `never` or `percentage`, got `{other}`"
            ))),
        }
    }

    pub fn is_sampled(&self) -> bool {
        match *self {
            Self::Always => true,
            Self::Never => false,
            Self::Percentage(rate) => rand::random_bool(rate.get()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_samplers() {
        assert!(Sampler::Always.is_sampled());
        assert!(!Sampler::Never.is_sampled());
        assert!(Sampler::percentage(1.0).unwrap().is_sampled());
        assert!(!Sampler::percentage(0.0).unwrap().is_sampled());
    }

    #[test]
    fn rejects_bad_rates_and_kinds() {
        assert!(matches!(Sampler::percentage(1.5), Err(Error::InvalidSampler(_))));
        assert!(matches!(Sampler::percentage(f64::NAN), Err(Error::InvalidSampler(_))));
        assert!(matches!(Sampler::from_kind("sometimes", 0.5), Err(Error::InvalidSampler(_))));
        assert_eq!(Sampler::from_kind("Never", 0.5).unwrap(), Sampler::Never);
    }

    #[test]
    fn rates_are_checked_before_any_span_starts() {
        assert!(matches!(Rate::new(1.5), Err(Error::InvalidSampler(_))));
        assert!(matches!(Rate::new(-0.1), Err(Error::InvalidSampler(_))));
        assert!(matches!(Rate::new(f64::NAN), Err(Error::InvalidSampler(_))));
        assert_eq!(Rate::new(0.25).unwrap().get(), 0.25);

        let half = Sampler::Percentage(Rate::new(0.5).unwrap());
        for _ in 0..100 {
            let _ = half.is_sampled();
        }
        assert_eq!(Sampler::from_kind("percentage", 1.0).unwrap(), Sampler::Percentage(Rate::new(1.0).unwrap()));
    }
}
