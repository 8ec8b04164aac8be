use super::{ANALOG_CHANNEL_COUNT, DIGITAL_CHANNEL_COUNT, RigolDs1054};
use crate::cache::Cached;
use crate::error::ScopeError;
use crate::mapping::{
    EdgeCoupling, GlitchCondition, GlitchQualifier, Polarity, Slope, TriggerCoupling,
    TriggerMode, TriggerModifier, TriggerType, TvEvent, TvStandard, WidthCondition,
};
use crate::scpi::{format_bool, format_float, parse_bool, parse_f64, parse_i32};
use std::fmt;
use std::str::FromStr;

/// Where the trigger engine takes its signal from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerSource {
    /// 0-based channel index, analog channels first
    Channel(usize),
    External,
    Line,
}

impl TriggerSource {
    pub fn to_scpi(self) -> Result<String, ScopeError> {
        match self {
            TriggerSource::Channel(i) if i < ANALOG_CHANNEL_COUNT => Ok(format!("chan{}", i + 1)),
            TriggerSource::Channel(i) if i < ANALOG_CHANNEL_COUNT + DIGITAL_CHANNEL_COUNT => {
                Ok(format!("dig{}", i - ANALOG_CHANNEL_COUNT))
            }
            TriggerSource::Channel(i) => Err(ScopeError::UnknownChannel(i.to_string())),
            TriggerSource::External => Ok("ext".to_string()),
            TriggerSource::Line => Ok("line".to_string()),
        }
    }

    /// Parse a reply such as `CHAN1`, `CHANNEL1`, `DIG3` or `EXT`.
    pub fn from_scpi(reply: &str) -> Result<Self, ScopeError> {
        let upper = reply.trim().trim_matches('"').to_ascii_uppercase();
        let numbered = |long: &str, short: &str| -> Option<usize> {
            upper
                .strip_prefix(long)
                .or_else(|| upper.strip_prefix(short))
                .and_then(|n| n.parse().ok())
        };

        if let Some(n) = numbered("CHANNEL", "CHAN") {
            if (1..=ANALOG_CHANNEL_COUNT).contains(&n) {
                return Ok(TriggerSource::Channel(n - 1));
            }
        } else if let Some(n) = numbered("DIGITAL", "DIG") {
            if n < DIGITAL_CHANNEL_COUNT {
                return Ok(TriggerSource::Channel(ANALOG_CHANNEL_COUNT + n));
            }
        } else if upper == "EXT" || upper == "EXTERNAL" {
            return Ok(TriggerSource::External);
        } else if upper == "LINE" {
            return Ok(TriggerSource::Line);
        }
        Err(ScopeError::unknown("trigger source", reply.trim()))
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Channel(i) => write!(f, "channel{}", i + 1),
            TriggerSource::External => f.write_str("external"),
            TriggerSource::Line => f.write_str("line"),
        }
    }
}

impl FromStr for TriggerSource {
    type Err = ScopeError;

    /// Parse an IVI source name (`channel1`, `external`, `line`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "external" => Ok(TriggerSource::External),
            "line" => Ok(TriggerSource::Line),
            _ => lower
                .strip_prefix("channel")
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| (1..=ANALOG_CHANNEL_COUNT + DIGITAL_CHANNEL_COUNT).contains(n))
                .map(|n| TriggerSource::Channel(n - 1))
                .ok_or_else(|| ScopeError::unknown("trigger source", s.trim())),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TriggerState {
    trigger_type: Cached<TriggerType>,
    source: Cached<TriggerSource>,
    coupling: Cached<TriggerCoupling>,
    level: Cached<f64>,
    slope: Cached<Slope>,
    holdoff: Cached<f64>,
    modifier: Cached<TriggerModifier>,
    pulse_polarity: Cached<Polarity>,
    glitch_condition: Cached<GlitchCondition>,
    less_than: Cached<f64>,
    greater_than: Cached<f64>,
    tv_standard: Cached<TvStandard>,
    tv_polarity: Cached<Polarity>,
    tv_event: Cached<TvEvent>,
    tv_line_number: Cached<i32>,
}

impl Default for TriggerState {
    fn default() -> Self {
        Self {
            trigger_type: Cached::new(TriggerType::Edge),
            source: Cached::new(TriggerSource::Channel(0)),
            coupling: Cached::new(TriggerCoupling::Dc),
            level: Cached::new(0.0),
            slope: Cached::new(Slope::Positive),
            holdoff: Cached::new(0.0),
            modifier: Cached::new(TriggerModifier::Auto),
            pulse_polarity: Cached::new(Polarity::Positive),
            glitch_condition: Cached::new(GlitchCondition::LessThan),
            less_than: Cached::new(2e-9),
            greater_than: Cached::new(2e-9),
            tv_standard: Cached::new(TvStandard::Ntsc),
            tv_polarity: Cached::new(Polarity::Positive),
            tv_event: Cached::new(TvEvent::AnyField),
            tv_line_number: Cached::new(1),
        }
    }
}

impl TriggerState {
    pub(crate) fn invalidate(&mut self) {
        self.trigger_type.invalidate();
        self.source.invalidate();
        self.coupling.invalidate();
        self.level.invalidate();
        self.slope.invalidate();
        self.holdoff.invalidate();
        self.modifier.invalidate();
        self.pulse_polarity.invalidate();
        self.glitch_condition.invalidate();
        self.less_than.invalidate();
        self.greater_than.invalidate();
        self.tv_standard.invalidate();
        self.tv_polarity.invalidate();
        self.tv_event.invalidate();
        self.tv_line_number.invalidate();
    }
}

fn glitch_qualifier(condition: GlitchCondition) -> GlitchQualifier {
    match condition {
        GlitchCondition::LessThan => GlitchQualifier::LessThan,
        GlitchCondition::GreaterThan => GlitchQualifier::GreaterThan,
    }
}

fn require_non_negative(what: &str, value: f64) -> Result<(), ScopeError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ScopeError::OutOfRange(format!("{what} must not be negative, got {value}")))
    }
}

impl RigolDs1054 {
    /// Trigger type derived from the trigger mode and its settings.
    ///
    /// AC line is an edge trigger on the `line` source; width is the glitch
    /// engine with the range qualifier.
    pub fn trigger_type(&mut self) -> Result<TriggerType, ScopeError> {
        self.get_derived_attribute(
            |d| &mut d.trigger.trigger_type,
            |d| match TriggerMode::from_scpi(&d.ask(":trigger:mode?")?)? {
                TriggerMode::Edge => {
                    let source = TriggerSource::from_scpi(&d.ask(":trigger:edge:source?")?)?;
                    d.trigger.source.set(source);
                    Ok(if source == TriggerSource::Line {
                        TriggerType::AcLine
                    } else {
                        TriggerType::Edge
                    })
                }
                TriggerMode::Glitch => {
                    let qualifier =
                        GlitchQualifier::from_scpi(&d.ask(":trigger:glitch:qualifier?")?)?;
                    Ok(if qualifier == GlitchQualifier::Range {
                        TriggerType::Width
                    } else {
                        TriggerType::Glitch
                    })
                }
                TriggerMode::Tv => Ok(TriggerType::Tv),
                TriggerMode::Runt => Ok(TriggerType::Runt),
                TriggerMode::Pattern => Err(ScopeError::NotSupported(
                    "pattern trigger has no IVI trigger type".to_string(),
                )),
            },
        )
    }

    pub fn set_trigger_type(&mut self, trigger_type: TriggerType) -> Result<(), ScopeError> {
        // The source register belongs to the trigger mode
        let source = match trigger_type {
            TriggerType::Edge => {
                self.write(":trigger:mode edge")?;
                let source = self.edge_source()?;
                if source == TriggerSource::Line {
                    self.write(":trigger:edge:source chan1")?;
                    Some(TriggerSource::Channel(0))
                } else {
                    Some(source)
                }
            }
            TriggerType::AcLine => {
                self.write(":trigger:mode edge")?;
                self.write(":trigger:edge:source line")?;
                Some(TriggerSource::Line)
            }
            TriggerType::Glitch => {
                let condition = match self.trigger_glitch_condition() {
                    Ok(condition) => condition,
                    // Coming from a width trigger, the qualifier holds no condition
                    Err(ScopeError::NotSupported(_)) => self.trigger.glitch_condition.value(),
                    Err(e) => return Err(e),
                };
                self.write(":trigger:mode glit")?;
                self.write(&format!(
                    ":trigger:glitch:qualifier {}",
                    glitch_qualifier(condition).to_scpi()
                ))?;
                self.trigger.glitch_condition.set(condition);
                None
            }
            TriggerType::Width => {
                self.write(":trigger:mode glit")?;
                self.write(":trigger:glitch:qualifier rang")?;
                self.trigger.glitch_condition.invalidate();
                None
            }
            TriggerType::Tv => {
                self.write(":trigger:mode tv")?;
                None
            }
            TriggerType::Runt => {
                self.write(":trigger:mode runt")?;
                None
            }
        };

        match source {
            Some(source) => self.trigger.source.set(source),
            // Only the edge engine has a line source
            None if self.options.simulate && self.trigger.source.value() == TriggerSource::Line => {
                self.trigger.source.set(TriggerSource::Channel(0))
            }
            None => self.trigger.source.invalidate(),
        }
        self.trigger.trigger_type.set(trigger_type);
        Ok(())
    }

    /// Current edge trigger source, read from the instrument
    fn edge_source(&mut self) -> Result<TriggerSource, ScopeError> {
        if self.options.simulate {
            return Ok(self.trigger.source.value());
        }
        TriggerSource::from_scpi(&self.ask(":trigger:edge:source?")?)
    }

    /// SCPI subsystem holding the source of the current trigger type
    fn trigger_source_subsystem(&mut self) -> Result<&'static str, ScopeError> {
        Ok(match self.trigger_type()? {
            TriggerType::Edge | TriggerType::AcLine => ":trigger:edge",
            TriggerType::Glitch | TriggerType::Width => ":trigger:glitch",
            TriggerType::Tv => ":trigger:tv",
            TriggerType::Runt => ":trigger:runt",
        })
    }

    pub fn trigger_source(&mut self) -> Result<TriggerSource, ScopeError> {
        let query = format!("{}:source?", self.trigger_source_subsystem()?);
        self.get_attribute(|d| &mut d.trigger.source, &query, TriggerSource::from_scpi)
    }

    pub fn set_trigger_source(&mut self, source: TriggerSource) -> Result<(), ScopeError> {
        let keyword = source.to_scpi()?;
        let command = format!("{}:source {keyword}", self.trigger_source_subsystem()?);
        self.set_attribute(|d| &mut d.trigger.source, &command, source)
    }

    /// Trigger coupling; HF and noise reject read as DC coupling plus a filter.
    pub fn trigger_coupling(&mut self) -> Result<TriggerCoupling, ScopeError> {
        self.get_derived_attribute(
            |d| &mut d.trigger.coupling,
            |d| match EdgeCoupling::from_scpi(&d.ask(":trigger:edge:coupling?")?)? {
                EdgeCoupling::Ac => Ok(TriggerCoupling::Ac),
                EdgeCoupling::LfReject => Ok(TriggerCoupling::LfReject),
                EdgeCoupling::Dc => {
                    if parse_bool(&d.ask(":trigger:hfreject?")?)? {
                        Ok(TriggerCoupling::HfReject)
                    } else if parse_bool(&d.ask(":trigger:nreject?")?)? {
                        Ok(TriggerCoupling::NoiseReject)
                    } else {
                        Ok(TriggerCoupling::Dc)
                    }
                }
            },
        )
    }

    pub fn set_trigger_coupling(&mut self, coupling: TriggerCoupling) -> Result<(), ScopeError> {
        let (edge, hf_reject, noise_reject) = match coupling {
            TriggerCoupling::Ac => (EdgeCoupling::Ac, false, false),
            TriggerCoupling::Dc => (EdgeCoupling::Dc, false, false),
            TriggerCoupling::LfReject => (EdgeCoupling::LfReject, false, false),
            TriggerCoupling::HfReject => (EdgeCoupling::Dc, true, false),
            TriggerCoupling::NoiseReject => (EdgeCoupling::Dc, false, true),
        };
        self.write(&format!(":trigger:edge:coupling {}", edge.to_scpi()))?;
        self.write(&format!(":trigger:hfreject {}", format_bool(hf_reject)))?;
        self.write(&format!(":trigger:nreject {}", format_bool(noise_reject)))?;
        self.trigger.coupling.set(coupling);
        Ok(())
    }

    /// Trigger level in volts
    pub fn trigger_level(&mut self) -> Result<f64, ScopeError> {
        self.get_attribute(|d| &mut d.trigger.level, ":trigger:edge:level?", parse_f64)
    }

    pub fn set_trigger_level(&mut self, level: f64) -> Result<(), ScopeError> {
        let command = format!(":trigger:edge:level {}", format_float(level));
        self.set_attribute(|d| &mut d.trigger.level, &command, level)
    }

    pub fn trigger_edge_slope(&mut self) -> Result<Slope, ScopeError> {
        self.get_attribute(|d| &mut d.trigger.slope, ":trigger:edge:slope?", Slope::from_scpi)
    }

    pub fn set_trigger_edge_slope(&mut self, slope: Slope) -> Result<(), ScopeError> {
        let command = format!(":trigger:edge:slope {}", slope.to_scpi());
        self.set_attribute(|d| &mut d.trigger.slope, &command, slope)
    }

    /// Holdoff in seconds
    pub fn trigger_holdoff(&mut self) -> Result<f64, ScopeError> {
        self.get_attribute(|d| &mut d.trigger.holdoff, ":trigger:holdoff?", parse_f64)
    }

    pub fn set_trigger_holdoff(&mut self, holdoff: f64) -> Result<(), ScopeError> {
        require_non_negative("holdoff", holdoff)?;
        let command = format!(":trigger:holdoff {}", format_float(holdoff));
        self.set_attribute(|d| &mut d.trigger.holdoff, &command, holdoff)
    }

    pub fn trigger_modifier(&mut self) -> Result<TriggerModifier, ScopeError> {
        self.get_attribute(
            |d| &mut d.trigger.modifier,
            ":trigger:sweep?",
            TriggerModifier::from_scpi,
        )
    }

    pub fn set_trigger_modifier(&mut self, modifier: TriggerModifier) -> Result<(), ScopeError> {
        let command = format!(":trigger:sweep {}", modifier.to_scpi());
        self.set_attribute(|d| &mut d.trigger.modifier, &command, modifier)
    }

    fn pulse_polarity(&mut self) -> Result<Polarity, ScopeError> {
        self.get_attribute(
            |d| &mut d.trigger.pulse_polarity,
            ":trigger:glitch:polarity?",
            Polarity::from_scpi,
        )
    }

    fn set_pulse_polarity(&mut self, polarity: Polarity) -> Result<(), ScopeError> {
        let command = format!(":trigger:glitch:polarity {}", polarity.to_scpi());
        self.set_attribute(|d| &mut d.trigger.pulse_polarity, &command, polarity)
    }

    fn glitch_less_than(&mut self) -> Result<f64, ScopeError> {
        self.get_attribute(|d| &mut d.trigger.less_than, ":trigger:glitch:lessthan?", parse_f64)
    }

    fn set_glitch_less_than(&mut self, seconds: f64) -> Result<(), ScopeError> {
        require_non_negative("pulse width", seconds)?;
        let command = format!(":trigger:glitch:lessthan {}", format_float(seconds));
        self.set_attribute(|d| &mut d.trigger.less_than, &command, seconds)
    }

    fn glitch_greater_than(&mut self) -> Result<f64, ScopeError> {
        self.get_attribute(
            |d| &mut d.trigger.greater_than,
            ":trigger:glitch:greaterthan?",
            parse_f64,
        )
    }

    fn set_glitch_greater_than(&mut self, seconds: f64) -> Result<(), ScopeError> {
        require_non_negative("pulse width", seconds)?;
        let command = format!(":trigger:glitch:greaterthan {}", format_float(seconds));
        self.set_attribute(|d| &mut d.trigger.greater_than, &command, seconds)
    }

    pub fn trigger_glitch_polarity(&mut self) -> Result<Polarity, ScopeError> {
        self.pulse_polarity()
    }

    pub fn set_trigger_glitch_polarity(&mut self, polarity: Polarity) -> Result<(), ScopeError> {
        self.set_pulse_polarity(polarity)
    }

    pub fn trigger_glitch_condition(&mut self) -> Result<GlitchCondition, ScopeError> {
        self.get_derived_attribute(
            |d| &mut d.trigger.glitch_condition,
            |d| match GlitchQualifier::from_scpi(&d.ask(":trigger:glitch:qualifier?")?)? {
                GlitchQualifier::LessThan => Ok(GlitchCondition::LessThan),
                GlitchQualifier::GreaterThan => Ok(GlitchCondition::GreaterThan),
                GlitchQualifier::Range => Err(ScopeError::NotSupported(
                    "range qualifier is a width trigger, not a glitch condition".to_string(),
                )),
            },
        )
    }

    pub fn set_trigger_glitch_condition(
        &mut self,
        condition: GlitchCondition,
    ) -> Result<(), ScopeError> {
        let command = format!(
            ":trigger:glitch:qualifier {}",
            glitch_qualifier(condition).to_scpi()
        );
        self.set_attribute(|d| &mut d.trigger.glitch_condition, &command, condition)
    }

    /// Glitch width in seconds, compared according to the glitch condition
    pub fn trigger_glitch_width(&mut self) -> Result<f64, ScopeError> {
        match self.trigger_glitch_condition()? {
            GlitchCondition::LessThan => self.glitch_less_than(),
            GlitchCondition::GreaterThan => self.glitch_greater_than(),
        }
    }

    pub fn set_trigger_glitch_width(&mut self, seconds: f64) -> Result<(), ScopeError> {
        match self.trigger_glitch_condition()? {
            GlitchCondition::LessThan => self.set_glitch_less_than(seconds),
            GlitchCondition::GreaterThan => self.set_glitch_greater_than(seconds),
        }
    }

    pub fn trigger_width_polarity(&mut self) -> Result<Polarity, ScopeError> {
        self.pulse_polarity()
    }

    pub fn set_trigger_width_polarity(&mut self, polarity: Polarity) -> Result<(), ScopeError> {
        self.set_pulse_polarity(polarity)
    }

    /// Only pulses within the thresholds can be triggered on.
    pub fn trigger_width_condition(&self) -> WidthCondition {
        WidthCondition::Within
    }

    pub fn set_trigger_width_condition(
        &mut self,
        condition: WidthCondition,
    ) -> Result<(), ScopeError> {
        match condition {
            WidthCondition::Within => Ok(()),
            WidthCondition::Outside => Err(ScopeError::NotSupported(
                "width trigger outside the thresholds".to_string(),
            )),
        }
    }

    /// Lower pulse width threshold in seconds
    pub fn trigger_width_threshold_low(&mut self) -> Result<f64, ScopeError> {
        self.glitch_greater_than()
    }

    pub fn set_trigger_width_threshold_low(&mut self, seconds: f64) -> Result<(), ScopeError> {
        self.set_glitch_greater_than(seconds)
    }

    /// Upper pulse width threshold in seconds
    pub fn trigger_width_threshold_high(&mut self) -> Result<f64, ScopeError> {
        self.glitch_less_than()
    }

    pub fn set_trigger_width_threshold_high(&mut self, seconds: f64) -> Result<(), ScopeError> {
        self.set_glitch_less_than(seconds)
    }

    pub fn trigger_tv_standard(&mut self) -> Result<TvStandard, ScopeError> {
        self.get_attribute(
            |d| &mut d.trigger.tv_standard,
            ":trigger:tv:standard?",
            TvStandard::from_scpi,
        )
    }

    pub fn set_trigger_tv_standard(&mut self, standard: TvStandard) -> Result<(), ScopeError> {
        let command = format!(":trigger:tv:standard {}", standard.to_scpi());
        self.set_attribute(|d| &mut d.trigger.tv_standard, &command, standard)
    }

    pub fn trigger_tv_polarity(&mut self) -> Result<Polarity, ScopeError> {
        self.get_attribute(
            |d| &mut d.trigger.tv_polarity,
            ":trigger:tv:polarity?",
            Polarity::from_scpi,
        )
    }

    pub fn set_trigger_tv_polarity(&mut self, polarity: Polarity) -> Result<(), ScopeError> {
        let command = format!(":trigger:tv:polarity {}", polarity.to_scpi());
        self.set_attribute(|d| &mut d.trigger.tv_polarity, &command, polarity)
    }

    pub fn trigger_tv_event(&mut self) -> Result<TvEvent, ScopeError> {
        self.get_attribute(|d| &mut d.trigger.tv_event, ":trigger:tv:mode?", TvEvent::from_scpi)
    }

    pub fn set_trigger_tv_event(&mut self, event: TvEvent) -> Result<(), ScopeError> {
        let command = format!(":trigger:tv:mode {}", event.to_scpi());
        self.set_attribute(|d| &mut d.trigger.tv_event, &command, event)
    }

    /// Line used by the `line_number` TV event
    pub fn trigger_tv_line_number(&mut self) -> Result<i32, ScopeError> {
        self.get_attribute(|d| &mut d.trigger.tv_line_number, ":trigger:tv:line?", parse_i32)
    }

    pub fn set_trigger_tv_line_number(&mut self, line: i32) -> Result<(), ScopeError> {
        if line < 1 {
            return Err(ScopeError::OutOfRange(format!("TV line number {line} below 1")));
        }
        let command = format!(":trigger:tv:line {line}");
        self.set_attribute(|d| &mut d.trigger.tv_line_number, &command, line)
    }
}
