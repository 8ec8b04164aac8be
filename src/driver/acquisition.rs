use super::RigolDs1054;
use crate::cache::Cached;
use crate::error::ScopeError;
use crate::mapping::{AcquisitionType, SampleMode};
use crate::scpi::{format_float, parse_f64, parse_i32};
use std::ops::RangeInclusive;

/// Horizontal divisions on screen
const HORIZONTAL_DIVISIONS: f64 = 10.0;
/// Divisions between the left screen edge and the time reference
const REFERENCE_DIVISIONS: f64 = 5.0;

pub const AVERAGES_RANGE: RangeInclusive<i32> = 2..=65536;
pub const ENVELOPES_RANGE: RangeInclusive<i32> = 1..=65536;

#[derive(Debug, Clone)]
pub(crate) struct AcquisitionState {
    time_per_record: Cached<f64>,
    position: Cached<f64>,
    acquisition_type: Cached<AcquisitionType>,
    number_of_averages: Cached<i32>,
    sample_mode: Cached<SampleMode>,
    /// Held by the driver; the instrument has no envelope acquisition
    number_of_envelopes: i32,
    record_length: usize,
    sample_rate: f64,
}

impl Default for AcquisitionState {
    fn default() -> Self {
        Self {
            time_per_record: Cached::new(1e-3),
            position: Cached::new(0.0),
            acquisition_type: Cached::new(AcquisitionType::Normal),
            number_of_averages: Cached::new(2),
            sample_mode: Cached::new(SampleMode::RealTime),
            number_of_envelopes: 1,
            record_length: 1200,
            sample_rate: 1e9,
        }
    }
}

impl AcquisitionState {
    pub(crate) fn invalidate(&mut self) {
        self.time_per_record.invalidate();
        self.position.invalidate();
        self.acquisition_type.invalidate();
        self.number_of_averages.invalidate();
        self.sample_mode.invalidate();
    }
}

impl RigolDs1054 {
    /// Time between the reference point and the left screen edge
    fn reference_offset(time_per_record: f64) -> f64 {
        time_per_record * REFERENCE_DIVISIONS / HORIZONTAL_DIVISIONS
    }

    /// Duration of one record in seconds (`:timebase:range`)
    pub fn acquisition_time_per_record(&mut self) -> Result<f64, ScopeError> {
        self.get_attribute(|d| &mut d.acquisition.time_per_record, ":timebase:range?", parse_f64)
    }

    pub fn set_acquisition_time_per_record(&mut self, seconds: f64) -> Result<(), ScopeError> {
        if !(seconds > 0.0 && seconds.is_finite()) {
            return Err(ScopeError::OutOfRange(format!(
                "time per record must be positive, got {seconds}"
            )));
        }
        let command = format!(":timebase:range {}", format_float(seconds));
        self.set_attribute(|d| &mut d.acquisition.time_per_record, &command, seconds)
    }

    /// Time of the first sample relative to the trigger.
    ///
    /// The instrument reports the position of its time reference, which sits
    /// half a record to the right of the first sample.
    pub fn acquisition_start_time(&mut self) -> Result<f64, ScopeError> {
        let time_per_record = self.acquisition_time_per_record()?;
        let position = self.get_attribute(
            |d| &mut d.acquisition.position,
            ":timebase:position?",
            parse_f64,
        )?;
        Ok(position - Self::reference_offset(time_per_record))
    }

    pub fn set_acquisition_start_time(&mut self, start_time: f64) -> Result<(), ScopeError> {
        let time_per_record = self.acquisition_time_per_record()?;
        let position = start_time + Self::reference_offset(time_per_record);
        let command = format!(":timebase:position {}", format_float(position));
        self.set_attribute(|d| &mut d.acquisition.position, &command, position)
    }

    pub fn acquisition_type(&mut self) -> Result<AcquisitionType, ScopeError> {
        self.get_attribute(
            |d| &mut d.acquisition.acquisition_type,
            ":acquire:type?",
            AcquisitionType::from_scpi,
        )
    }

    pub fn set_acquisition_type(&mut self, kind: AcquisitionType) -> Result<(), ScopeError> {
        let command = format!(":acquire:type {}", kind.to_scpi());
        self.set_attribute(|d| &mut d.acquisition.acquisition_type, &command, kind)
    }

    pub fn acquisition_number_of_averages(&mut self) -> Result<i32, ScopeError> {
        self.get_attribute(
            |d| &mut d.acquisition.number_of_averages,
            ":acquire:count?",
            parse_i32,
        )
    }

    pub fn set_acquisition_number_of_averages(&mut self, count: i32) -> Result<(), ScopeError> {
        if !AVERAGES_RANGE.contains(&count) {
            return Err(ScopeError::OutOfRange(format!(
                "number of averages {count} outside {}..={}",
                AVERAGES_RANGE.start(),
                AVERAGES_RANGE.end()
            )));
        }
        let command = format!(":acquire:count {count}");
        self.set_attribute(|d| &mut d.acquisition.number_of_averages, &command, count)
    }

    pub fn acquisition_sample_mode(&mut self) -> Result<SampleMode, ScopeError> {
        self.get_attribute(
            |d| &mut d.acquisition.sample_mode,
            ":acquire:mode?",
            SampleMode::from_scpi,
        )
    }

    pub fn set_acquisition_sample_mode(&mut self, mode: SampleMode) -> Result<(), ScopeError> {
        let command = format!(":acquire:mode {}", mode.to_scpi());
        self.set_attribute(|d| &mut d.acquisition.sample_mode, &command, mode)
    }

    pub fn acquisition_number_of_envelopes(&self) -> i32 {
        self.acquisition.number_of_envelopes
    }

    pub fn set_acquisition_number_of_envelopes(&mut self, count: i32) -> Result<(), ScopeError> {
        if !ENVELOPES_RANGE.contains(&count) {
            return Err(ScopeError::OutOfRange(format!(
                "number of envelopes {count} outside {}..={}",
                ENVELOPES_RANGE.start(),
                ENVELOPES_RANGE.end()
            )));
        }
        self.acquisition.number_of_envelopes = count;
        Ok(())
    }

    /// Points in the next waveform transfer; always read from the instrument
    pub fn acquisition_record_length(&mut self) -> Result<usize, ScopeError> {
        if self.options.simulate {
            return Ok(self.acquisition.record_length);
        }
        let points = parse_i32(&self.ask(":waveform:points?")?)?;
        usize::try_from(points)
            .map_err(|_| ScopeError::Parse(format!("negative record length {points}")))
    }

    /// Current sample rate in samples per second; always read from the instrument
    pub fn acquisition_sample_rate(&mut self) -> Result<f64, ScopeError> {
        if self.options.simulate {
            return Ok(self.acquisition.sample_rate);
        }
        parse_f64(&self.ask(":acquire:srate?")?)
    }
}
