use super::{ANALOG_CHANNEL_COUNT, DIGITAL_CHANNEL_COUNT, RigolDs1054};
use crate::cache::Cached;
use crate::error::ScopeError;
use crate::mapping::{InputImpedance, VerticalCoupling};
use crate::scpi::{format_bool, format_float, parse_bool, parse_f64, unquote};

const MAX_LABEL_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Analog input, numbered 1-4 on the instrument
    Analog(u32),
    /// Logic analyzer input, numbered 0-15 on the instrument
    Digital(u32),
}

impl ChannelKind {
    /// SCPI subsystem prefix, e.g. `:channel1` or `:digital0`
    pub fn prefix(self) -> String {
        match self {
            ChannelKind::Analog(n) => format!(":channel{n}"),
            ChannelKind::Digital(n) => format!(":digital{n}"),
        }
    }

    /// Waveform and measurement source keyword
    pub fn source(self) -> String {
        match self {
            ChannelKind::Analog(n) => format!("chan{n}"),
            ChannelKind::Digital(n) => format!("dig{n}"),
        }
    }
}

/// Channel addressed by 0-based index or by name (`"channel1"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSelector {
    Index(usize),
    Name(String),
}

impl From<usize> for ChannelSelector {
    fn from(index: usize) -> Self {
        ChannelSelector::Index(index)
    }
}

impl From<&str> for ChannelSelector {
    fn from(name: &str) -> Self {
        ChannelSelector::Name(name.to_string())
    }
}

impl From<String> for ChannelSelector {
    fn from(name: String) -> Self {
        ChannelSelector::Name(name)
    }
}

impl From<&String> for ChannelSelector {
    fn from(name: &String) -> Self {
        ChannelSelector::Name(name.clone())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Channel {
    pub(crate) name: String,
    pub(crate) kind: ChannelKind,
    label: Cached<String>,
    enabled: Cached<bool>,
    coupling: Cached<VerticalCoupling>,
    offset: Cached<f64>,
    range: Cached<f64>,
    input_impedance: Cached<InputImpedance>,
    probe_attenuation: Cached<f64>,
    bandwidth_limit: Cached<bool>,
    invert: Cached<bool>,
}

impl Channel {
    fn new(index: usize) -> Self {
        let kind = if index < ANALOG_CHANNEL_COUNT {
            ChannelKind::Analog(index as u32 + 1)
        } else {
            ChannelKind::Digital((index - ANALOG_CHANNEL_COUNT) as u32)
        };
        Self {
            name: format!("channel{}", index + 1),
            kind,
            label: Cached::new((index + 1).to_string()),
            enabled: Cached::new(index == 0),
            coupling: Cached::new(VerticalCoupling::Dc),
            offset: Cached::new(0.0),
            range: Cached::new(8.0),
            input_impedance: Cached::new(InputImpedance::OneMegohm),
            probe_attenuation: Cached::new(10.0),
            bandwidth_limit: Cached::new(false),
            invert: Cached::new(false),
        }
    }

    pub(crate) fn invalidate(&mut self) {
        self.label.invalidate();
        self.enabled.invalidate();
        self.coupling.invalidate();
        self.offset.invalidate();
        self.range.invalidate();
        self.input_impedance.invalidate();
        self.probe_attenuation.invalidate();
        self.bandwidth_limit.invalidate();
        self.invert.invalidate();
    }
}

fn validate_label(label: &str) -> Result<(), ScopeError> {
    if !label.is_ascii() || label.contains('"') {
        return Err(ScopeError::InvalidArgument(format!(
            "channel label {label:?} must be ASCII without quotes"
        )));
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(ScopeError::OutOfRange(format!(
            "channel label {label:?} is longer than {MAX_LABEL_LEN} characters"
        )));
    }
    Ok(())
}

fn require_positive(what: &str, value: f64) -> Result<(), ScopeError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ScopeError::OutOfRange(format!("{what} must be positive, got {value}")))
    }
}

impl RigolDs1054 {
    pub(crate) fn init_channels(&mut self) {
        self.channels = (0..ANALOG_CHANNEL_COUNT + DIGITAL_CHANNEL_COUNT)
            .map(Channel::new)
            .collect();
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Names in instrument order, `channel1` to `channel20`
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }

    pub fn channel_name(&self, index: usize) -> Result<String, ScopeError> {
        self.channels
            .get(index)
            .map(|c| c.name.clone())
            .ok_or_else(|| ScopeError::UnknownChannel(index.to_string()))
    }

    /// Resolve a selector to a 0-based channel index.
    pub fn channel_index(&self, channel: impl Into<ChannelSelector>) -> Result<usize, ScopeError> {
        match channel.into() {
            ChannelSelector::Index(i) if i < self.channels.len() => Ok(i),
            ChannelSelector::Index(i) => Err(ScopeError::UnknownChannel(i.to_string())),
            ChannelSelector::Name(name) => self
                .channels
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(name.trim()))
                .ok_or(ScopeError::UnknownChannel(name)),
        }
    }

    pub fn channel_kind(
        &self,
        channel: impl Into<ChannelSelector>,
    ) -> Result<ChannelKind, ScopeError> {
        let index = self.channel_index(channel)?;
        Ok(self.channels[index].kind)
    }

    /// Index of an analog channel; digital channels fail with `NotSupported`.
    pub(super) fn analog_index(
        &self,
        channel: impl Into<ChannelSelector>,
        property: &str,
    ) -> Result<usize, ScopeError> {
        let index = self.channel_index(channel)?;
        match self.channels[index].kind {
            ChannelKind::Analog(_) => Ok(index),
            ChannelKind::Digital(_) => Err(ScopeError::NotSupported(format!(
                "{property} on digital channel {}",
                self.channels[index].name
            ))),
        }
    }

    fn channel_prefix(&self, index: usize) -> String {
        self.channels[index].kind.prefix()
    }

    pub fn channel_enabled(
        &mut self,
        channel: impl Into<ChannelSelector>,
    ) -> Result<bool, ScopeError> {
        let i = self.channel_index(channel)?;
        let query = format!("{}:display?", self.channel_prefix(i));
        self.get_attribute(|d| &mut d.channels[i].enabled, &query, parse_bool)
    }

    pub fn set_channel_enabled(
        &mut self,
        channel: impl Into<ChannelSelector>,
        enabled: bool,
    ) -> Result<(), ScopeError> {
        let i = self.channel_index(channel)?;
        let command = format!("{}:display {}", self.channel_prefix(i), format_bool(enabled));
        self.set_attribute(|d| &mut d.channels[i].enabled, &command, enabled)
    }

    pub fn channel_label(
        &mut self,
        channel: impl Into<ChannelSelector>,
    ) -> Result<String, ScopeError> {
        let i = self.channel_index(channel)?;
        let query = format!("{}:label?", self.channel_prefix(i));
        self.get_attribute(|d| &mut d.channels[i].label, &query, |r| Ok(unquote(r)))
    }

    /// Set the on-screen label (up to 10 ASCII characters).
    pub fn set_channel_label(
        &mut self,
        channel: impl Into<ChannelSelector>,
        label: &str,
    ) -> Result<(), ScopeError> {
        let i = self.channel_index(channel)?;
        validate_label(label)?;
        let command = format!("{}:label \"{label}\"", self.channel_prefix(i));
        self.set_attribute(|d| &mut d.channels[i].label, &command, label.to_string())
    }

    pub fn channel_coupling(
        &mut self,
        channel: impl Into<ChannelSelector>,
    ) -> Result<VerticalCoupling, ScopeError> {
        let i = self.analog_index(channel, "coupling")?;
        let query = format!("{}:coupling?", self.channel_prefix(i));
        self.get_attribute(|d| &mut d.channels[i].coupling, &query, VerticalCoupling::from_scpi)
    }

    pub fn set_channel_coupling(
        &mut self,
        channel: impl Into<ChannelSelector>,
        coupling: VerticalCoupling,
    ) -> Result<(), ScopeError> {
        let i = self.analog_index(channel, "coupling")?;
        let command = format!("{}:coupling {}", self.channel_prefix(i), coupling.to_scpi());
        self.set_attribute(|d| &mut d.channels[i].coupling, &command, coupling)
    }

    /// Vertical offset in volts
    pub fn channel_offset(
        &mut self,
        channel: impl Into<ChannelSelector>,
    ) -> Result<f64, ScopeError> {
        let i = self.analog_index(channel, "offset")?;
        let query = format!("{}:offset?", self.channel_prefix(i));
        self.get_attribute(|d| &mut d.channels[i].offset, &query, parse_f64)
    }

    pub fn set_channel_offset(
        &mut self,
        channel: impl Into<ChannelSelector>,
        offset: f64,
    ) -> Result<(), ScopeError> {
        let i = self.analog_index(channel, "offset")?;
        let command = format!("{}:offset {}", self.channel_prefix(i), format_float(offset));
        self.set_attribute(|d| &mut d.channels[i].offset, &command, offset)
    }

    /// Full-scale vertical range in volts
    pub fn channel_range(
        &mut self,
        channel: impl Into<ChannelSelector>,
    ) -> Result<f64, ScopeError> {
        let i = self.analog_index(channel, "range")?;
        let query = format!("{}:range?", self.channel_prefix(i));
        self.get_attribute(|d| &mut d.channels[i].range, &query, parse_f64)
    }

    pub fn set_channel_range(
        &mut self,
        channel: impl Into<ChannelSelector>,
        range: f64,
    ) -> Result<(), ScopeError> {
        let i = self.analog_index(channel, "range")?;
        require_positive("vertical range", range)?;
        let command = format!("{}:range {}", self.channel_prefix(i), format_float(range));
        self.set_attribute(|d| &mut d.channels[i].range, &command, range)
    }

    pub fn channel_input_impedance(
        &mut self,
        channel: impl Into<ChannelSelector>,
    ) -> Result<InputImpedance, ScopeError> {
        let i = self.analog_index(channel, "input impedance")?;
        let query = format!("{}:impedance?", self.channel_prefix(i));
        self.get_attribute(
            |d| &mut d.channels[i].input_impedance,
            &query,
            InputImpedance::from_scpi,
        )
    }

    pub fn set_channel_input_impedance(
        &mut self,
        channel: impl Into<ChannelSelector>,
        impedance: InputImpedance,
    ) -> Result<(), ScopeError> {
        let i = self.analog_index(channel, "input impedance")?;
        let command = format!("{}:impedance {}", self.channel_prefix(i), impedance.to_scpi());
        self.set_attribute(|d| &mut d.channels[i].input_impedance, &command, impedance)
    }

    pub fn channel_probe_attenuation(
        &mut self,
        channel: impl Into<ChannelSelector>,
    ) -> Result<f64, ScopeError> {
        let i = self.analog_index(channel, "probe attenuation")?;
        let query = format!("{}:probe?", self.channel_prefix(i));
        self.get_attribute(|d| &mut d.channels[i].probe_attenuation, &query, parse_f64)
    }

    pub fn set_channel_probe_attenuation(
        &mut self,
        channel: impl Into<ChannelSelector>,
        attenuation: f64,
    ) -> Result<(), ScopeError> {
        let i = self.analog_index(channel, "probe attenuation")?;
        require_positive("probe attenuation", attenuation)?;
        let command = format!("{}:probe {}", self.channel_prefix(i), format_float(attenuation));
        self.set_attribute(|d| &mut d.channels[i].probe_attenuation, &command, attenuation)
    }

    pub fn channel_bandwidth_limit(
        &mut self,
        channel: impl Into<ChannelSelector>,
    ) -> Result<bool, ScopeError> {
        let i = self.analog_index(channel, "bandwidth limit")?;
        let query = format!("{}:bwlimit?", self.channel_prefix(i));
        self.get_attribute(|d| &mut d.channels[i].bandwidth_limit, &query, parse_bool)
    }

    pub fn set_channel_bandwidth_limit(
        &mut self,
        channel: impl Into<ChannelSelector>,
        limit: bool,
    ) -> Result<(), ScopeError> {
        let i = self.analog_index(channel, "bandwidth limit")?;
        let command = format!("{}:bwlimit {}", self.channel_prefix(i), format_bool(limit));
        self.set_attribute(|d| &mut d.channels[i].bandwidth_limit, &command, limit)
    }

    pub fn channel_invert(
        &mut self,
        channel: impl Into<ChannelSelector>,
    ) -> Result<bool, ScopeError> {
        let i = self.analog_index(channel, "invert")?;
        let query = format!("{}:invert?", self.channel_prefix(i));
        self.get_attribute(|d| &mut d.channels[i].invert, &query, parse_bool)
    }

    pub fn set_channel_invert(
        &mut self,
        channel: impl Into<ChannelSelector>,
        invert: bool,
    ) -> Result<(), ScopeError> {
        let i = self.analog_index(channel, "invert")?;
        let command = format!("{}:invert {}", self.channel_prefix(i), format_bool(invert));
        self.set_attribute(|d| &mut d.channels[i].invert, &command, invert)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::MockInstrument;
    use super::*;

    fn live() -> (MockInstrument, RigolDs1054) {
        let mock = MockInstrument::rigol();
        let scope = RigolDs1054::builder().session(mock.session()).build().unwrap();
        (mock, scope)
    }

    #[test]
    fn test_channel_names_and_kinds() {
        let scope = RigolDs1054::builder().simulate(true).build().unwrap();
        let names = scope.channel_names();
        assert_eq!(names.first().map(String::as_str), Some("channel1"));
        assert_eq!(names.last().map(String::as_str), Some("channel20"));
        assert_eq!(scope.channel_kind(3).unwrap(), ChannelKind::Analog(4));
        assert_eq!(scope.channel_kind("channel5").unwrap(), ChannelKind::Digital(0));
        assert_eq!(scope.channel_kind("CHANNEL20").unwrap(), ChannelKind::Digital(15));
        assert_eq!(scope.channel_name(19).unwrap(), "channel20");
    }

    #[test]
    fn test_unknown_channel() {
        let mut scope = RigolDs1054::builder().simulate(true).build().unwrap();
        assert!(matches!(scope.channel_index(20), Err(ScopeError::UnknownChannel(_))));
        assert!(matches!(
            scope.channel_offset("channel21"),
            Err(ScopeError::UnknownChannel(_))
        ));
        assert!(matches!(scope.channel_name(42), Err(ScopeError::UnknownChannel(_))));
    }

    #[test]
    fn test_default_labels_when_simulating() {
        let mut scope = RigolDs1054::builder().simulate(true).build().unwrap();
        assert_eq!(scope.channel_label(0).unwrap(), "1");
        assert_eq!(scope.channel_label("channel20").unwrap(), "20");
    }

    #[test]
    fn test_analog_commands() {
        let (mock, mut scope) = live();
        scope.set_channel_enabled("channel1", true).unwrap();
        scope.set_channel_coupling("channel1", VerticalCoupling::Dc).unwrap();
        scope.set_channel_offset("channel1", 1.0).unwrap();
        scope.set_channel_range(1, 4.0).unwrap();
        scope.set_channel_input_impedance(2, InputImpedance::Fifty).unwrap();
        scope.set_channel_probe_attenuation(3, 1.0).unwrap();
        scope.set_channel_bandwidth_limit(0, true).unwrap();
        scope.set_channel_invert(0, false).unwrap();
        scope.set_channel_label(0, "CLK").unwrap();

        assert_eq!(
            mock.written()[1..],
            [
                ":channel1:display 1",
                ":channel1:coupling dc",
                ":channel1:offset 1.000000e+00",
                ":channel2:range 4.000000e+00",
                ":channel3:impedance fift",
                ":channel4:probe 1.000000e+00",
                ":channel1:bwlimit 1",
                ":channel1:invert 0",
                ":channel1:label \"CLK\"",
            ]
        );
    }

    #[test]
    fn test_reads_parse_instrument_replies() {
        let (mock, mut scope) = live();
        mock.reply(":channel1:coupling?", "AC");
        mock.reply(":channel1:display?", "1");
        mock.reply(":channel1:impedance?", "ONEM");
        mock.reply(":channel1:label?", "\"SDA\"");
        mock.reply(":channel1:probe?", "+1.0E+01");

        assert_eq!(scope.channel_coupling(0).unwrap(), VerticalCoupling::Ac);
        assert!(scope.channel_enabled(0).unwrap());
        assert_eq!(scope.channel_input_impedance(0).unwrap(), InputImpedance::OneMegohm);
        assert_eq!(scope.channel_label(0).unwrap(), "SDA");
        assert_eq!(scope.channel_probe_attenuation(0).unwrap(), 10.0);
    }

    #[test]
    fn test_unmapped_coupling_reply() {
        let (mock, mut scope) = live();
        mock.reply(":channel2:coupling?", "XYZ");
        assert!(matches!(
            scope.channel_coupling(1),
            Err(ScopeError::UnknownValue { domain: "vertical coupling", .. })
        ));
    }

    #[test]
    fn test_digital_channels() {
        let (mock, mut scope) = live();
        scope.set_channel_enabled("channel5", true).unwrap();
        scope.set_channel_label("channel20", "D15").unwrap();
        assert_eq!(mock.written()[1..], [":digital0:display 1", ":digital15:label \"D15\""]);

        assert!(matches!(
            scope.set_channel_offset("channel5", 0.5),
            Err(ScopeError::NotSupported(_))
        ));
        assert!(matches!(scope.channel_coupling(10), Err(ScopeError::NotSupported(_))));
    }

    #[test]
    fn test_label_validation() {
        let (mock, mut scope) = live();
        assert!(matches!(
            scope.set_channel_label(0, "ELEVENCHARS"),
            Err(ScopeError::OutOfRange(_))
        ));
        assert!(matches!(
            scope.set_channel_label(0, "say \"hi\""),
            Err(ScopeError::InvalidArgument(_))
        ));
        assert!(matches!(scope.set_channel_range(0, 0.0), Err(ScopeError::OutOfRange(_))));
        assert_eq!(mock.written(), vec!["*CLS"]);
    }
}
