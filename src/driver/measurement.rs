use super::RigolDs1054;
use super::channel::ChannelSelector;
use crate::cache::Cached;
use crate::error::ScopeError;
use crate::mapping::{AcquisitionStatus, AcquisitionType, MeasurementFunction};
use crate::scpi::{INVALID_MEASUREMENT, format_float, parse_f64, parse_i32};
use crate::types::{ReferenceLevels, Waveform, WaveformPreamble};
use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, info, warn};
use std::io::Cursor;

/// Operation status condition bit set while the instrument is running
const RUN_BIT: i32 = 1 << 3;

#[derive(Debug, Clone, Default)]
pub(crate) struct MeasurementState {
    continuous: Cached<bool>,
    reference_levels: ReferenceLevels,
}

impl MeasurementState {
    pub(crate) fn invalidate(&mut self) {
        self.continuous.invalidate();
    }

    /// Reference levels return to their power-on values with `*RST`
    pub(crate) fn restore_defaults(&mut self) {
        self.reference_levels = ReferenceLevels::default();
    }
}

/// Parse the ten comma separated `:waveform:preamble?` fields.
pub fn parse_preamble(reply: &str) -> Result<WaveformPreamble, ScopeError> {
    let fields: Vec<&str> = reply.trim().split(',').map(str::trim).collect();
    if fields.len() != 10 {
        return Err(ScopeError::Parse(format!(
            "expected 10 preamble fields, got {}",
            fields.len()
        )));
    }
    let points = parse_i32(fields[2])?;
    let count = parse_i32(fields[3])?;
    Ok(WaveformPreamble {
        format: parse_i32(fields[0])?,
        acquisition_type: parse_i32(fields[1])?,
        points: usize::try_from(points)
            .map_err(|_| ScopeError::Parse(format!("negative point count {points}")))?,
        count: u32::try_from(count)
            .map_err(|_| ScopeError::Parse(format!("negative average count {count}")))?,
        x_increment: parse_f64(fields[4])?,
        x_origin: parse_f64(fields[5])?,
        x_reference: parse_f64(fields[6])?,
        y_increment: parse_f64(fields[7])?,
        y_origin: parse_f64(fields[8])?,
        y_reference: parse_f64(fields[9])?,
    })
}

/// Scale little-endian unsigned 16 bit words to volts; raw 0 marks a hole.
pub fn decode_word_samples(
    data: &[u8],
    preamble: &WaveformPreamble,
) -> Result<Vec<f64>, ScopeError> {
    if data.len() % 2 != 0 {
        return Err(ScopeError::Parse(format!(
            "word data has odd length {}",
            data.len()
        )));
    }
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while (cursor.position() as usize) < data.len() {
        let raw = cursor.read_u16::<LittleEndian>()?;
        samples.push(if raw == 0 {
            f64::NAN
        } else {
            (f64::from(raw) - preamble.y_reference) * preamble.y_increment + preamble.y_origin
        });
    }
    Ok(samples)
}

impl RigolDs1054 {
    /// Start a single acquisition.
    pub fn initiate(&mut self) -> Result<(), ScopeError> {
        self.write(":acquire:complete 100")?;
        self.write(":digitize")?;
        self.measurement.continuous.set(false);
        Ok(())
    }

    pub fn abort(&mut self) -> Result<(), ScopeError> {
        self.write(":stop")?;
        self.measurement.continuous.set(false);
        Ok(())
    }

    pub fn acquisition_status(&mut self) -> Result<AcquisitionStatus, ScopeError> {
        if self.options.simulate {
            return Ok(AcquisitionStatus::Unknown);
        }
        let condition = parse_i32(&self.ask(":operegister:condition?")?)?;
        Ok(if condition & RUN_BIT != 0 {
            AcquisitionStatus::InProgress
        } else {
            AcquisitionStatus::Complete
        })
    }

    /// Let the instrument pick vertical, horizontal and trigger settings.
    pub fn auto_setup(&mut self) -> Result<(), ScopeError> {
        info!("Running auto setup");
        self.write(":autoscale")?;
        self.invalidate_all_attributes();
        Ok(())
    }

    /// Whether the instrument keeps acquiring after each trigger.
    pub fn continuous_acquisition(&mut self) -> Result<bool, ScopeError> {
        self.get_derived_attribute(
            |d| &mut d.measurement.continuous,
            |d| Ok(parse_i32(&d.ask(":operegister:condition?")?)? & RUN_BIT != 0),
        )
    }

    pub fn set_continuous_acquisition(&mut self, continuous: bool) -> Result<(), ScopeError> {
        let command = if continuous { ":run" } else { ":stop" };
        self.set_attribute(|d| &mut d.measurement.continuous, command, continuous)
    }

    pub fn measurement_reference_levels(&self) -> ReferenceLevels {
        self.measurement.reference_levels
    }

    /// Set the high, middle and low reference levels used by rise time,
    /// fall time, width and delay measurements.
    pub fn set_measurement_reference_levels(
        &mut self,
        levels: ReferenceLevels,
    ) -> Result<(), ScopeError> {
        levels.validate()?;
        self.write(&format!(
            ":measure:define thresholds,{},{},{}",
            format_float(levels.high),
            format_float(levels.middle),
            format_float(levels.low)
        ))?;
        self.measurement.reference_levels = levels;
        Ok(())
    }

    pub fn reference_level_high(&self) -> f64 {
        self.measurement.reference_levels.high
    }

    pub fn set_reference_level_high(&mut self, percent: f64) -> Result<(), ScopeError> {
        self.set_measurement_reference_levels(ReferenceLevels {
            high: percent,
            ..self.measurement.reference_levels
        })
    }

    pub fn reference_level_middle(&self) -> f64 {
        self.measurement.reference_levels.middle
    }

    pub fn set_reference_level_middle(&mut self, percent: f64) -> Result<(), ScopeError> {
        self.set_measurement_reference_levels(ReferenceLevels {
            middle: percent,
            ..self.measurement.reference_levels
        })
    }

    pub fn reference_level_low(&self) -> f64 {
        self.measurement.reference_levels.low
    }

    pub fn set_reference_level_low(&mut self, percent: f64) -> Result<(), ScopeError> {
        self.set_measurement_reference_levels(ReferenceLevels {
            low: percent,
            ..self.measurement.reference_levels
        })
    }

    pub fn display_clear(&mut self) -> Result<(), ScopeError> {
        self.write(":display:clear")
    }

    /// Transfer the last acquired record of an analog channel.
    pub fn fetch_waveform(
        &mut self,
        channel: impl Into<ChannelSelector>,
    ) -> Result<Waveform, ScopeError> {
        let index = self.analog_index(channel, "waveform fetch")?;
        let name = self.channels[index].name.clone();

        if self.options.simulate {
            let time_per_record = self.acquisition_time_per_record()?;
            let record_length = self.acquisition_record_length()?;
            return Ok(Waveform {
                channel: name,
                x_origin: self.acquisition_start_time()?,
                x_increment: time_per_record / record_length.max(1) as f64,
                samples: Vec::new(),
            });
        }

        let source = self.channels[index].kind.source();
        self.write(&format!(":waveform:source {source}"))?;
        self.write(":waveform:format word")?;
        self.write(":waveform:byteorder lsbfirst")?;
        self.write(":waveform:unsigned 1")?;

        let preamble = parse_preamble(&self.ask(":waveform:preamble?")?)?;
        let data = self.ask_block(":waveform:data?")?;
        let samples = decode_word_samples(&data, &preamble)?;
        if samples.len() != preamble.points {
            warn!(
                "Preamble announced {} points, received {}",
                preamble.points,
                samples.len()
            );
        }
        debug!("Fetched {} samples from {name}", samples.len());

        Ok(Waveform {
            channel: name,
            x_origin: preamble.x_origin,
            x_increment: preamble.x_increment,
            samples,
        })
    }

    /// Initiate an acquisition and fetch the record.
    pub fn read_waveform(
        &mut self,
        channel: impl Into<ChannelSelector>,
    ) -> Result<Waveform, ScopeError> {
        self.initiate()?;
        self.fetch_waveform(channel)
    }

    /// Fetch the lower and upper envelopes of the last peak detect record.
    pub fn fetch_waveform_min_max(
        &mut self,
        channel: impl Into<ChannelSelector>,
    ) -> Result<(Waveform, Waveform), ScopeError> {
        let kind = self.acquisition_type()?;
        if kind != AcquisitionType::PeakDetect {
            return Err(ScopeError::NotSupported(format!(
                "min/max waveform in {kind} acquisition"
            )));
        }
        let record = self.fetch_waveform(channel)?;
        if record.len() % 2 != 0 {
            warn!("Peak detect record has an odd length {}", record.len());
        }
        Ok(record.split_min_max())
    }

    pub fn read_waveform_min_max(
        &mut self,
        channel: impl Into<ChannelSelector>,
    ) -> Result<(Waveform, Waveform), ScopeError> {
        self.initiate()?;
        self.fetch_waveform_min_max(channel)
    }

    /// Query an automatic measurement on the last acquisition.
    ///
    /// Phase and delay compare against `reference`. A reply of 9.9e37 means
    /// the instrument could not measure and becomes `MeasurementInvalid`.
    pub fn fetch_waveform_measurement(
        &mut self,
        channel: impl Into<ChannelSelector>,
        function: MeasurementFunction,
        reference: Option<ChannelSelector>,
    ) -> Result<f64, ScopeError> {
        let index = self.channel_index(channel)?;
        let mut sources = self.channels[index].kind.source();
        if function.needs_reference() {
            let reference = reference.ok_or_else(|| {
                ScopeError::InvalidArgument(format!("{function} needs a reference channel"))
            })?;
            let other = self.channel_index(reference)?;
            sources = format!("{sources},{}", self.channels[other].kind.source());
        }

        if self.options.simulate {
            return Ok(0.0);
        }

        let value = parse_f64(&self.ask(&format!(":measure:{}? {sources}", function.to_scpi()))?)?;
        if value.abs() >= INVALID_MEASUREMENT {
            return Err(ScopeError::MeasurementInvalid(format!(
                "{function} on {}",
                self.channels[index].name
            )));
        }
        Ok(value)
    }

    pub fn read_waveform_measurement(
        &mut self,
        channel: impl Into<ChannelSelector>,
        function: MeasurementFunction,
        reference: Option<ChannelSelector>,
    ) -> Result<f64, ScopeError> {
        self.initiate()?;
        self.fetch_waveform_measurement(channel, function, reference)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::MockInstrument;
    use super::*;

    const PREAMBLE: &str = "+0,+0,+4,+1,+1.000000E-06,-5.000000E-04,+0,+2.0E-03,+0.0E+00,+32768";

    fn words(raw: &[u16]) -> Vec<u8> {
        raw.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn live() -> (MockInstrument, RigolDs1054) {
        let mock = MockInstrument::rigol();
        let scope = RigolDs1054::builder().session(mock.session()).build().unwrap();
        (mock, scope)
    }

    #[test]
    fn test_parse_preamble() {
        let preamble = parse_preamble(PREAMBLE).unwrap();
        assert_eq!(preamble.points, 4);
        assert_eq!(preamble.count, 1);
        assert_eq!(preamble.x_increment, 1e-6);
        assert_eq!(preamble.x_origin, -5e-4);
        assert_eq!(preamble.y_reference, 32768.0);
        assert!(parse_preamble("+0,+0,+4").is_err());
    }

    #[test]
    fn test_decode_word_samples() {
        let preamble = parse_preamble(PREAMBLE).unwrap();
        let samples = decode_word_samples(&words(&[32768, 33268, 0, 32268]), &preamble).unwrap();
        assert_eq!(samples[0], 0.0);
        assert!((samples[1] - 1.0).abs() < 1e-12);
        assert!(samples[2].is_nan());
        assert!((samples[3] + 1.0).abs() < 1e-12);

        assert!(decode_word_samples(&[1, 2, 3], &preamble).is_err());
    }

    #[test]
    fn test_fetch_waveform() {
        let (mock, mut scope) = live();
        mock.reply(":waveform:preamble?", PREAMBLE);
        mock.block(":waveform:data?", words(&[32768, 33268, 0, 32268]));

        let waveform = scope.fetch_waveform("channel2").unwrap();
        assert_eq!(waveform.channel, "channel2");
        assert_eq!(waveform.len(), 4);
        assert_eq!(waveform.x_origin, -5e-4);
        assert!((waveform.peak_to_peak().unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(
            mock.written()[1..],
            [
                ":waveform:source chan2",
                ":waveform:format word",
                ":waveform:byteorder lsbfirst",
                ":waveform:unsigned 1",
                ":waveform:preamble?",
                ":waveform:data?",
            ]
        );
    }

    #[test]
    fn test_read_waveform_initiates_first() {
        let (mock, mut scope) = live();
        mock.reply(":waveform:preamble?", PREAMBLE);
        mock.block(":waveform:data?", words(&[1, 2, 3, 4]));
        scope.read_waveform(0).unwrap();
        assert_eq!(mock.written()[1..3], [":acquire:complete 100", ":digitize"]);
    }

    #[test]
    fn test_fetch_waveform_digital_not_supported() {
        let (_, mut scope) = live();
        assert!(matches!(
            scope.fetch_waveform("channel6"),
            Err(ScopeError::NotSupported(_))
        ));
    }

    #[test]
    fn test_simulated_waveform_is_empty() {
        let mut scope = RigolDs1054::builder().simulate(true).build().unwrap();
        scope.set_acquisition_time_per_record(1e-3).unwrap();
        let waveform = scope.read_waveform("channel1").unwrap();
        assert!(waveform.is_empty());
        assert!((waveform.x_origin - (-5e-4)).abs() < 1e-15);
        assert!(waveform.x_increment > 0.0);
    }

    #[test]
    fn test_waveform_measurement() {
        let (mock, mut scope) = live();
        mock.reply(":measure:vpp? chan1", "+2.04E+00");
        let vpp = scope
            .fetch_waveform_measurement(0, MeasurementFunction::VoltagePeakToPeak, None)
            .unwrap();
        assert_eq!(vpp, 2.04);

        mock.reply(":measure:phase? chan1,chan2", "+9.0E+01");
        let phase = scope
            .fetch_waveform_measurement(
                "channel1",
                MeasurementFunction::Phase,
                Some("channel2".into()),
            )
            .unwrap();
        assert_eq!(phase, 90.0);
    }

    #[test]
    fn test_invalid_measurement() {
        let (mock, mut scope) = live();
        mock.reply(":measure:frequency? chan3", "9.9E+37");
        assert!(matches!(
            scope.fetch_waveform_measurement(2, MeasurementFunction::Frequency, None),
            Err(ScopeError::MeasurementInvalid(_))
        ));
        assert!(matches!(
            scope.fetch_waveform_measurement(0, MeasurementFunction::Delay, None),
            Err(ScopeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_acquisition_status_bit() {
        let (mock, mut scope) = live();
        mock.reply(":operegister:condition?", "+8");
        assert_eq!(scope.acquisition_status().unwrap(), AcquisitionStatus::InProgress);
        mock.reply(":operegister:condition?", "+0");
        assert_eq!(scope.acquisition_status().unwrap(), AcquisitionStatus::Complete);

        let mut simulated = RigolDs1054::builder().simulate(true).build().unwrap();
        assert_eq!(simulated.acquisition_status().unwrap(), AcquisitionStatus::Unknown);
    }

    #[test]
    fn test_control_commands() {
        let (mock, mut scope) = live();
        mock.reply(":timebase:range?", "+1.0E-03");
        scope.acquisition_time_per_record().unwrap();

        scope.abort().unwrap();
        scope.set_continuous_acquisition(true).unwrap();
        scope.display_clear().unwrap();
        scope.auto_setup().unwrap();
        scope.acquisition_time_per_record().unwrap();

        assert_eq!(
            mock.written()[2..],
            [":stop", ":run", ":display:clear", ":autoscale", ":timebase:range?"]
        );
    }

    #[test]
    fn test_continuous_acquisition_state() {
        let (mock, mut scope) = live();
        mock.reply(":operegister:condition?", "+8");
        assert!(scope.continuous_acquisition().unwrap());

        scope.initiate().unwrap();
        assert!(!scope.continuous_acquisition().unwrap());
        scope.set_continuous_acquisition(true).unwrap();
        assert!(scope.continuous_acquisition().unwrap());
        scope.abort().unwrap();
        assert!(!scope.continuous_acquisition().unwrap());
        assert_eq!(mock.count(":operegister:condition?"), 1);

        let mut simulated = RigolDs1054::builder().simulate(true).build().unwrap();
        assert!(!simulated.continuous_acquisition().unwrap());
        simulated.set_continuous_acquisition(true).unwrap();
        assert!(simulated.continuous_acquisition().unwrap());
    }

    #[test]
    fn test_reference_levels() {
        let (mock, mut scope) = live();
        assert_eq!(scope.measurement_reference_levels(), ReferenceLevels::default());

        scope.set_reference_level_high(80.0).unwrap();
        assert_eq!(
            mock.written().last().unwrap(),
            ":measure:define thresholds,8.000000e+01,5.000000e+01,1.000000e+01"
        );
        scope.set_reference_level_low(20.0).unwrap();
        assert_eq!(scope.reference_level_high(), 80.0);
        assert_eq!(scope.reference_level_middle(), 50.0);
        assert_eq!(scope.reference_level_low(), 20.0);

        let before = mock.written().len();
        assert!(matches!(
            scope.set_reference_level_middle(85.0),
            Err(ScopeError::OutOfRange(_))
        ));
        assert_eq!(mock.written().len(), before);
        assert_eq!(scope.reference_level_middle(), 50.0);

        scope.reset().unwrap();
        assert_eq!(scope.measurement_reference_levels(), ReferenceLevels::default());
    }

    #[test]
    fn test_fetch_waveform_min_max() {
        let (mock, mut scope) = live();
        mock.reply(":acquire:type?", "PEAK");
        mock.reply(":waveform:preamble?", PREAMBLE);
        mock.block(":waveform:data?", words(&[32268, 33268, 33268, 32768]));

        let (min, max) = scope.fetch_waveform_min_max("channel1").unwrap();
        assert_eq!(min.len(), 2);
        assert!((min.samples[0] + 1.0).abs() < 1e-12);
        assert!((max.samples[0] - 1.0).abs() < 1e-12);
        assert_eq!(min.samples[1], 0.0);
        assert!((max.samples[1] - 1.0).abs() < 1e-12);
        assert_eq!(max.x_increment, 2e-6);
        assert_eq!(min.x_origin, -5e-4);
    }

    #[test]
    fn test_min_max_needs_peak_detect() {
        let (mock, mut scope) = live();
        mock.reply(":acquire:type?", "NORM");
        assert!(matches!(
            scope.fetch_waveform_min_max(0),
            Err(ScopeError::NotSupported(_))
        ));
        assert_eq!(mock.count(":waveform:data?"), 0);

        scope.set_acquisition_type(AcquisitionType::PeakDetect).unwrap();
        mock.reply(":waveform:preamble?", PREAMBLE);
        mock.block(":waveform:data?", words(&[1, 2]));
        let (min, max) = scope.read_waveform_min_max(0).unwrap();
        assert_eq!((min.len(), max.len()), (1, 1));
        assert_eq!(mock.count(":digitize"), 1);
    }
}
