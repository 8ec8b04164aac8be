use crate::error::ScopeError;
use serde::{Deserialize, Serialize};

/// One acquired record of a channel, scaled to volts.
///
/// Sample `i` was taken at `x_origin + i * x_increment` seconds relative
/// to the trigger. Samples the instrument marks as holes are `NaN`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    pub channel: String,
    pub x_origin: f64,
    pub x_increment: f64,
    pub samples: Vec<f64>,
}

impl Waveform {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn time_at(&self, index: usize) -> f64 {
        self.x_origin + index as f64 * self.x_increment
    }

    /// `(time, value)` pairs
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.samples
            .iter()
            .enumerate()
            .map(|(i, &v)| (self.time_at(i), v))
    }

    /// Difference between the largest and smallest valid sample
    pub fn peak_to_peak(&self) -> Option<f64> {
        let valid = self.samples.iter().copied().filter(|v| !v.is_nan());
        let (min, max) = valid.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        (min <= max).then_some(max - min)
    }

    /// Split a peak detect record, which holds a minimum and a maximum per
    /// interval, into its lower and upper envelopes.
    pub fn split_min_max(&self) -> (Waveform, Waveform) {
        let (min, max): (Vec<f64>, Vec<f64>) = self
            .samples
            .chunks_exact(2)
            .map(|pair| (pair[0].min(pair[1]), pair[0].max(pair[1])))
            .unzip();
        let envelope = |samples: Vec<f64>| Waveform {
            channel: self.channel.clone(),
            x_origin: self.x_origin,
            x_increment: self.x_increment * 2.0,
            samples,
        };
        (envelope(min), envelope(max))
    }
}

/// Measurement reference levels in percent of the signal amplitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLevels {
    pub high: f64,
    pub middle: f64,
    pub low: f64,
}

impl Default for ReferenceLevels {
    fn default() -> Self {
        Self {
            high: 90.0,
            middle: 50.0,
            low: 10.0,
        }
    }
}

impl ReferenceLevels {
    /// Levels must lie within 0..=100 percent with low < middle < high.
    pub fn validate(&self) -> Result<(), ScopeError> {
        let levels = [self.low, self.middle, self.high];
        if levels.iter().any(|l| !(0.0..=100.0).contains(l)) {
            return Err(ScopeError::OutOfRange(format!(
                "reference levels {self:?} outside 0..=100 percent"
            )));
        }
        if !(self.low < self.middle && self.middle < self.high) {
            return Err(ScopeError::OutOfRange(format!(
                "reference levels {self:?} must satisfy low < middle < high"
            )));
        }
        Ok(())
    }
}

/// Scaling parameters from `:waveform:preamble?`
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformPreamble {
    pub format: i32,
    pub acquisition_type: i32,
    pub points: usize,
    pub count: u32,
    pub x_increment: f64,
    pub x_origin: f64,
    pub x_reference: f64,
    pub y_increment: f64,
    pub y_origin: f64,
    pub y_reference: f64,
}
