pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod mapping;
pub mod plotting;
pub mod resource;
pub mod scpi;
pub mod session;
pub mod types;

pub use config::{AppConfig, load_config, load_config_or_default, read_config};
pub use driver::{
    ANALOG_CHANNEL_COUNT, ChannelKind, ChannelSelector, DIGITAL_CHANNEL_COUNT, DriverIdentity,
    DriverOptions, RigolDs1054, RigolDs1054Builder, TriggerSource,
};
pub use error::ScopeError;
pub use mapping::{
    AcquisitionStatus, AcquisitionType, GlitchCondition, InputImpedance, MeasurementFunction,
    Polarity, SampleMode, Slope, TriggerCoupling, TriggerModifier, TriggerType, TvEvent,
    TvStandard, VerticalCoupling, WidthCondition,
};
pub use plotting::plot_waveform;
pub use resource::Resource;
pub use session::{ConnectionConfig, Session, StreamSession, TcpSession, UsbTmcSession};
pub use types::{ReferenceLevels, Waveform, WaveformPreamble};
