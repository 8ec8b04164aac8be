//! Lookup tables between IVI attribute values and the instrument's SCPI
//! keywords.
//!
//! Each table pairs an IVI value name (`"average"`) with the keyword the
//! instrument accepts and echoes back (`"aver"`). Forward lookups are total
//! by construction; reverse lookups are case-insensitive, accept the long
//! form of a keyword and fail with [`ScopeError::UnknownValue`] for
//! anything outside the table.

use crate::error::ScopeError;

macro_rules! scpi_mapping {
    (
        $(#[$meta:meta])*
        $name:ident, $domain:literal {
            $($(#[$vmeta:meta])* $variant:ident => ($ivi:literal, $scpi:literal)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
            pub const DOMAIN: &'static str = $domain;

            /// IVI name of the value
            pub fn ivi_name(self) -> &'static str {
                match self {
                    $($name::$variant => $ivi),+
                }
            }

            /// Keyword sent to the instrument
            pub fn to_scpi(self) -> &'static str {
                match self {
                    $($name::$variant => $scpi),+
                }
            }

            /// Value for an instrument reply
            pub fn from_scpi(reply: &str) -> Result<Self, ScopeError> {
                reverse_lookup(Self::ALL, reply, Self::to_scpi, Self::DOMAIN)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ScopeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.ivi_name().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| ScopeError::unknown(Self::DOMAIN, wanted))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.ivi_name())
            }
        }
    };
}

/// IVI values that do not correspond to a single instrument keyword; the
/// driver derives them from several settings.
macro_rules! ivi_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $domain:literal {
            $($(#[$vmeta:meta])* $variant:ident => $ivi:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
            pub const DOMAIN: &'static str = $domain;

            pub fn ivi_name(self) -> &'static str {
                match self {
                    $($name::$variant => $ivi),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ScopeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.ivi_name().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| ScopeError::unknown(Self::DOMAIN, wanted))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.ivi_name())
            }
        }
    };
}

fn reverse_lookup<T: Copy>(
    all: &[T],
    reply: &str,
    keyword: fn(T) -> &'static str,
    domain: &'static str,
) -> Result<T, ScopeError> {
    let reply = reply.trim().trim_matches('"');
    if let Some(v) = all.iter().copied().find(|&v| keyword(v).eq_ignore_ascii_case(reply)) {
        return Ok(v);
    }

    // Long-form reply, e.g. "AVERAGE" for "aver"
    let upper = reply.to_ascii_uppercase();
    let mut candidates = all
        .iter()
        .copied()
        .filter(|&v| upper.starts_with(&keyword(v).to_ascii_uppercase()));
    match (candidates.next(), candidates.next()) {
        (Some(v), None) => Ok(v),
        _ => Err(ScopeError::unknown(domain, reply)),
    }
}

scpi_mapping! {
    /// Acquisition type (`:acquire:type`)
    AcquisitionType, "acquisition type" {
        Normal => ("normal", "norm"),
        PeakDetect => ("peak_detect", "peak"),
        HighResolution => ("high_resolution", "hres"),
        Average => ("average", "aver"),
    }
}

scpi_mapping! {
    /// Analog channel input coupling (`:channel<n>:coupling`)
    VerticalCoupling, "vertical coupling" {
        Ac => ("ac", "ac"),
        Dc => ("dc", "dc"),
        Gnd => ("gnd", "gnd"),
    }
}

scpi_mapping! {
    /// Analog channel input impedance (`:channel<n>:impedance`)
    InputImpedance, "input impedance" {
        OneMegohm => ("one_megohm", "onem"),
        Fifty => ("fifty", "fift"),
    }
}

scpi_mapping! {
    /// Trigger engine mode as the instrument reports it (`:trigger:mode`)
    TriggerMode, "trigger mode" {
        Edge => ("edge", "edge"),
        Glitch => ("glitch", "glit"),
        Tv => ("tv", "tv"),
        Runt => ("runt", "runt"),
        Pattern => ("pattern", "patt"),
    }
}

scpi_mapping! {
    /// Edge trigger coupling keyword (`:trigger:edge:coupling`)
    EdgeCoupling, "edge trigger coupling" {
        Ac => ("ac", "ac"),
        Dc => ("dc", "dc"),
        LfReject => ("lf_reject", "lfr"),
    }
}

scpi_mapping! {
    /// Edge trigger slope (`:trigger:edge:slope`)
    Slope, "trigger slope" {
        Positive => ("positive", "pos"),
        Negative => ("negative", "neg"),
        Either => ("either", "eith"),
        Alternating => ("alternating", "alt"),
    }
}

scpi_mapping! {
    /// Trigger sweep (`:trigger:sweep`)
    TriggerModifier, "trigger modifier" {
        None => ("none", "norm"),
        Auto => ("auto", "auto"),
    }
}

scpi_mapping! {
    /// Glitch qualifier (`:trigger:glitch:qualifier`)
    GlitchQualifier, "glitch qualifier" {
        LessThan => ("less_than", "less"),
        GreaterThan => ("greater_than", "gre"),
        Range => ("range", "rang"),
    }
}

scpi_mapping! {
    /// Pulse polarity for glitch, width and TV triggers
    Polarity, "polarity" {
        Positive => ("positive", "pos"),
        Negative => ("negative", "neg"),
    }
}

scpi_mapping! {
    /// TV trigger standard (`:trigger:tv:standard`)
    TvStandard, "TV trigger standard" {
        Ntsc => ("ntsc", "ntsc"),
        Pal => ("pal", "pal"),
        PalM => ("pal_m", "palm"),
        Secam => ("secam", "sec"),
    }
}

scpi_mapping! {
    /// TV trigger event (`:trigger:tv:mode`)
    TvEvent, "TV trigger event" {
        Field1 => ("field1", "fie1"),
        Field2 => ("field2", "fie2"),
        AnyField => ("any_field", "afi"),
        AnyLine => ("any_line", "alin"),
        LineNumber => ("line_number", "line"),
    }
}

scpi_mapping! {
    /// Acquisition sample mode (`:acquire:mode`)
    SampleMode, "sample mode" {
        RealTime => ("real_time", "rtim"),
        EquivalentTime => ("equivalent_time", "etim"),
    }
}

scpi_mapping! {
    /// Automatic waveform measurement (`:measure:<keyword>?`)
    MeasurementFunction, "measurement function" {
        RiseTime => ("rise_time", "risetime"),
        FallTime => ("fall_time", "falltime"),
        Frequency => ("frequency", "frequency"),
        Period => ("period", "period"),
        VoltageRms => ("voltage_rms", "vrms"),
        VoltagePeakToPeak => ("voltage_peak_to_peak", "vpp"),
        VoltageMax => ("voltage_max", "vmax"),
        VoltageMin => ("voltage_min", "vmin"),
        VoltageHigh => ("voltage_high", "vtop"),
        VoltageLow => ("voltage_low", "vbase"),
        VoltageAverage => ("voltage_average", "vaverage"),
        WidthNegative => ("width_negative", "nwidth"),
        WidthPositive => ("width_positive", "pwidth"),
        DutyCycleNegative => ("duty_cycle_negative", "nduty"),
        DutyCyclePositive => ("duty_cycle_positive", "duty"),
        Amplitude => ("amplitude", "vamplitude"),
        Overshoot => ("overshoot", "overshoot"),
        Preshoot => ("preshoot", "preshoot"),
        Phase => ("phase", "phase"),
        Delay => ("delay", "delay"),
    }
}

impl MeasurementFunction {
    /// Whether the measurement compares two sources
    pub fn needs_reference(self) -> bool {
        matches!(self, MeasurementFunction::Phase | MeasurementFunction::Delay)
    }
}

ivi_enum! {
    /// Trigger type: edge and AC line share the edge engine, glitch and
    /// width share the glitch engine
    TriggerType, "trigger type" {
        Edge => "edge",
        Tv => "tv",
        Glitch => "glitch",
        Width => "width",
        AcLine => "ac_line",
        Runt => "runt",
    }
}

ivi_enum! {
    /// Trigger coupling: HF and noise reject are DC coupling plus a filter
    TriggerCoupling, "trigger coupling" {
        Ac => "ac",
        Dc => "dc",
        HfReject => "hf_reject",
        LfReject => "lf_reject",
        NoiseReject => "noise_reject",
    }
}

ivi_enum! {
    GlitchCondition, "glitch condition" {
        LessThan => "less_than",
        GreaterThan => "greater_than",
    }
}

ivi_enum! {
    WidthCondition, "width condition" {
        Within => "within",
        Outside => "outside",
    }
}

ivi_enum! {
    AcquisitionStatus, "acquisition status" {
        Complete => "complete",
        InProgress => "in_progress",
        Unknown => "unknown",
    }
}
