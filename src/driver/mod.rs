use crate::cache::Cached;
use crate::error::ScopeError;
use crate::resource::Resource;
use crate::scpi::parse_error_reply;
use crate::session::{self, ConnectionConfig, Session};
use log::{debug, info, warn};
use std::time::Duration;

pub mod acquisition;
pub mod channel;
pub mod identity;
pub mod measurement;
pub mod trigger;
pub mod utility;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{ChannelKind, ChannelSelector};
pub use identity::DriverIdentity;
pub use trigger::TriggerSource;

pub const ANALOG_CHANNEL_COUNT: usize = 4;
pub const DIGITAL_CHANNEL_COUNT: usize = 16;
/// Prefix the instrument model must start with when the ID is checked
pub const DEFAULT_INSTRUMENT_ID: &str = "DS1054";
pub const BANDWIDTH_HZ: f64 = 50e6;
pub const SIMULATION_PLACEHOLDER: &str = "Not available while simulating";

/// Driver operation switches.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Never touch the instrument, serve everything from driver state
    pub simulate: bool,
    /// Serve reads from valid cached values
    pub cache: bool,
    /// Check the instrument error queue after every command
    pub query_instrument_status: bool,
    /// Model prefix expected by the ID query
    pub instrument_id: String,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            simulate: false,
            cache: true,
            query_instrument_status: false,
            instrument_id: DEFAULT_INSTRUMENT_ID.to_string(),
        }
    }
}

/// Builder for [`RigolDs1054`].
///
/// # Examples
///
/// ```
/// use rusty_scope::RigolDs1054;
///
/// let mut scope = RigolDs1054::builder()
///     .resource("USB0::6833::1230::INSTR")
///     .simulate(true)
///     .build()?;
/// assert_eq!(scope.channel_count(), 20);
/// assert_eq!(
///     scope.identity_instrument_model()?,
///     "Not available while simulating"
/// );
/// # Ok::<(), rusty_scope::ScopeError>(())
/// ```
#[derive(Default)]
pub struct RigolDs1054Builder {
    resource: Option<String>,
    options: DriverOptions,
    connection: ConnectionConfig,
    id_query: bool,
    reset: bool,
    session: Option<Box<dyn Session>>,
}

impl RigolDs1054Builder {
    pub fn resource(mut self, resource: &str) -> Self {
        self.resource = Some(resource.to_string());
        self
    }

    pub fn simulate(mut self, simulate: bool) -> Self {
        self.options.simulate = simulate;
        self
    }

    /// Check the instrument model during initialization
    pub fn id_query(mut self, id_query: bool) -> Self {
        self.id_query = id_query;
        self
    }

    /// Reset the instrument during initialization
    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.options.cache = cache;
        self
    }

    pub fn query_instrument_status(mut self, enabled: bool) -> Self {
        self.options.query_instrument_status = enabled;
        self
    }

    pub fn instrument_id(mut self, id: &str) -> Self {
        self.options.instrument_id = id.to_string();
        self
    }

    pub fn options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the full connection configuration
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.connection = config;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connection.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.connection.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.connection.write_timeout = timeout;
        self
    }

    /// Use an already open session instead of opening the resource
    pub fn session(mut self, session: Box<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn build(self) -> Result<RigolDs1054, ScopeError> {
        let mut driver = RigolDs1054::new(self.options);
        match self.session {
            Some(session) => driver.initialize_with_session(session, self.id_query, self.reset)?,
            None => driver.initialize(
                self.resource.as_deref(),
                &self.connection,
                self.id_query,
                self.reset,
            )?,
        }
        Ok(driver)
    }
}

/// Driver for the Rigol DS1054 oscilloscope family.
///
/// Properties are grouped the way the IVI oscilloscope class groups them:
/// identity and utility operations, channels, acquisition, trigger, and
/// measurement. Each property read is one SCPI query (or a cache hit), each
/// write one SCPI command. With [`DriverOptions::simulate`] set the driver
/// never touches the session and answers from its own state.
///
/// Channels are named `channel1` to `channel20`: the four analog inputs
/// followed by the sixteen digital inputs `D0`-`D15`.
pub struct RigolDs1054 {
    session: Option<Box<dyn Session>>,
    resource: Option<Resource>,
    options: DriverOptions,
    identity: identity::IdentityState,
    channels: Vec<channel::Channel>,
    acquisition: acquisition::AcquisitionState,
    trigger: trigger::TriggerState,
    measurement: measurement::MeasurementState,
    initialized: bool,
}

impl RigolDs1054 {
    /// Create an uninitialized driver; no I/O happens until `initialize`.
    pub fn new(options: DriverOptions) -> Self {
        let mut driver = Self {
            session: None,
            resource: None,
            options,
            identity: identity::IdentityState::default(),
            channels: Vec::new(),
            acquisition: acquisition::AcquisitionState::default(),
            trigger: trigger::TriggerState::default(),
            measurement: measurement::MeasurementState::default(),
            initialized: false,
        };
        driver.init_channels();
        driver
    }

    pub fn builder() -> RigolDs1054Builder {
        RigolDs1054Builder::default()
    }

    /// Open an I/O session to the instrument.
    ///
    /// In simulation the resource is only validated (if given). Otherwise
    /// the session is opened, the interface cleared, the model optionally
    /// checked against the expected ID and the instrument optionally reset.
    pub fn initialize(
        &mut self,
        resource: Option<&str>,
        connection: &ConnectionConfig,
        id_query: bool,
        reset: bool,
    ) -> Result<(), ScopeError> {
        let resource = resource.map(str::parse::<Resource>).transpose()?;
        if !self.options.simulate {
            let target = resource
                .as_ref()
                .ok_or_else(|| ScopeError::InvalidResource("no resource given".to_string()))?;
            info!("Opening session to {target}");
            self.session = Some(session::open(target, connection)?);
        }
        self.resource = resource;
        self.finish_initialize(id_query, reset)
    }

    /// Initialize over a session opened elsewhere.
    pub fn initialize_with_session(
        &mut self,
        session: Box<dyn Session>,
        id_query: bool,
        reset: bool,
    ) -> Result<(), ScopeError> {
        self.session = Some(session);
        self.finish_initialize(id_query, reset)
    }

    fn finish_initialize(&mut self, id_query: bool, reset: bool) -> Result<(), ScopeError> {
        if !self.options.simulate {
            self.session_mut()?.clear()?;
        }

        if id_query && !self.options.simulate {
            let model = self.identity_instrument_model()?;
            let expected = self.options.instrument_id.clone();
            let actual: String = model.chars().take(expected.chars().count()).collect();
            if actual != expected {
                warn!("Instrument ID mismatch: expected {expected}, got {actual}");
                return Err(ScopeError::IdMismatch { expected, actual });
            }
        }

        if reset {
            self.reset()?;
        }

        self.initialized = true;
        info!(
            "Driver initialized ({}, {} channels)",
            if self.options.simulate { "simulated" } else { "live" },
            self.channel_count()
        );
        Ok(())
    }

    /// Drop the session; later instrument access fails with `NotConnected`.
    pub fn close(&mut self) {
        if self.session.take().is_some() {
            info!("Session closed");
        }
        self.initialized = false;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_simulating(&self) -> bool {
        self.options.simulate
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    pub fn resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    /// Maximum input bandwidth in Hz
    pub fn bandwidth(&self) -> f64 {
        BANDWIDTH_HZ
    }

    /// Mark every cached attribute invalid so the next read asks the instrument
    pub fn invalidate_all_attributes(&mut self) {
        debug!("Invalidating all cached attributes");
        self.identity.invalidate();
        for channel in &mut self.channels {
            channel.invalidate();
        }
        self.acquisition.invalidate();
        self.trigger.invalidate();
        self.measurement.invalidate();
    }

    /// Send an arbitrary command
    pub fn write_raw(&mut self, command: &str) -> Result<(), ScopeError> {
        self.session_mut()?.write(command)
    }

    /// Send an arbitrary query and return the reply line
    pub fn ask_raw(&mut self, query: &str) -> Result<String, ScopeError> {
        self.session_mut()?.ask(query)
    }

    fn session_mut(&mut self) -> Result<&mut Box<dyn Session>, ScopeError> {
        self.session.as_mut().ok_or(ScopeError::NotConnected)
    }

    pub(crate) fn write(&mut self, command: &str) -> Result<(), ScopeError> {
        if self.options.simulate {
            debug!("(simulated) >> {command}");
            return Ok(());
        }
        self.session_mut()?.write(command)?;
        if self.options.query_instrument_status {
            self.check_instrument_status()?;
        }
        Ok(())
    }

    pub(crate) fn ask(&mut self, query: &str) -> Result<String, ScopeError> {
        if self.options.simulate {
            warn!("Query {query} issued while simulating");
            return Err(ScopeError::NotConnected);
        }
        self.session_mut()?.ask(query)
    }

    pub(crate) fn ask_block(&mut self, query: &str) -> Result<Vec<u8>, ScopeError> {
        if self.options.simulate {
            warn!("Query {query} issued while simulating");
            return Err(ScopeError::NotConnected);
        }
        self.session_mut()?.ask_block(query)
    }

    fn check_instrument_status(&mut self) -> Result<(), ScopeError> {
        let reply = self.session_mut()?.ask(":system:error?")?;
        let (code, message) = parse_error_reply(&reply)?;
        if code != 0 {
            return Err(ScopeError::Instrument { code, message });
        }
        Ok(())
    }

    /// Read an attribute through its cache entry.
    ///
    /// Served from the cache when caching is on and the entry is valid,
    /// from the stored value when simulating, otherwise queried and cached.
    pub(crate) fn get_attribute<T, F, P>(
        &mut self,
        slot: F,
        query: &str,
        parse: P,
    ) -> Result<T, ScopeError>
    where
        T: Clone,
        F: Fn(&mut Self) -> &mut Cached<T>,
        P: FnOnce(&str) -> Result<T, ScopeError>,
    {
        self.get_derived_attribute(slot, |d| parse(&d.ask(query)?))
    }

    /// Like `get_attribute`, for values that take more than one query.
    pub(crate) fn get_derived_attribute<T, F, C>(
        &mut self,
        slot: F,
        compute: C,
    ) -> Result<T, ScopeError>
    where
        T: Clone,
        F: Fn(&mut Self) -> &mut Cached<T>,
        C: FnOnce(&mut Self) -> Result<T, ScopeError>,
    {
        if self.options.cache {
            if let Some(value) = slot(self).get() {
                return Ok(value);
            }
        }
        if self.options.simulate {
            return Ok(slot(self).value());
        }
        let value = compute(self)?;
        slot(self).set(value.clone());
        Ok(value)
    }

    /// Write an attribute and store it as valid.
    pub(crate) fn set_attribute<T, F>(
        &mut self,
        slot: F,
        command: &str,
        value: T,
    ) -> Result<(), ScopeError>
    where
        T: Clone,
        F: Fn(&mut Self) -> &mut Cached<T>,
    {
        self.write(command)?;
        slot(self).set(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockInstrument;
    use super::*;

    #[test]
    fn test_channel_count_after_initialization() {
        let scope = RigolDs1054::builder().simulate(true).build().unwrap();
        assert_eq!(scope.channel_count(), ANALOG_CHANNEL_COUNT + DIGITAL_CHANNEL_COUNT);
        assert_eq!(scope.channel_count(), 20);
        assert!(scope.is_initialized());
    }

    #[test]
    fn test_simulation_never_touches_session() {
        let mock = MockInstrument::rigol();
        let mut scope = RigolDs1054::builder()
            .simulate(true)
            .reset(true)
            .id_query(true)
            .session(mock.session())
            .build()
            .unwrap();

        assert_eq!(scope.identity_instrument_manufacturer().unwrap(), SIMULATION_PLACEHOLDER);
        assert_eq!(scope.identity_instrument_model().unwrap(), SIMULATION_PLACEHOLDER);
        assert_eq!(
            scope.identity_instrument_firmware_revision().unwrap(),
            SIMULATION_PLACEHOLDER
        );
        scope.set_channel_offset("channel1", 1.0).unwrap();
        assert_eq!(scope.channel_offset("channel1").unwrap(), 1.0);
        scope.set_acquisition_start_time(1e-4).unwrap();
        assert_eq!(scope.self_test().unwrap(), (0, "Self test passed".to_string()));
        assert_eq!(scope.error_query().unwrap(), (0, "No error".to_string()));
        scope.initiate().unwrap();
        scope.fetch_waveform("channel1").unwrap();

        assert!(mock.written().is_empty(), "unexpected I/O: {:?}", mock.written());
    }

    #[test]
    fn test_live_initialize_clears_and_checks_id() {
        let mock = MockInstrument::rigol();
        let scope = RigolDs1054::builder()
            .session(mock.session())
            .id_query(true)
            .build()
            .unwrap();
        assert!(scope.is_initialized());
        assert_eq!(mock.written(), vec!["*CLS", "*IDN?"]);
    }

    #[test]
    fn test_id_mismatch_is_error() {
        let mock = MockInstrument::new();
        mock.reply("*IDN?", "AGILENT TECHNOLOGIES,MSO7104A,MY00000000,06.00.0000");
        let result = RigolDs1054::builder()
            .session(mock.session())
            .id_query(true)
            .build();
        match result {
            Err(ScopeError::IdMismatch { expected, actual }) => {
                assert_eq!(expected, "DS1054");
                assert_eq!(actual, "MSO710");
            }
            other => panic!("expected IdMismatch, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_initialize_reset_sends_rst() {
        let mock = MockInstrument::rigol();
        RigolDs1054::builder()
            .session(mock.session())
            .reset(true)
            .build()
            .unwrap();
        assert_eq!(mock.written(), vec!["*CLS", "*RST"]);
    }

    #[test]
    fn test_live_initialize_without_resource_fails() {
        let result = RigolDs1054::builder().build();
        assert!(matches!(result, Err(ScopeError::InvalidResource(_))));

        let result = RigolDs1054::builder().resource("GPIB0::1::INSTR").build();
        assert!(matches!(result, Err(ScopeError::InvalidResource(_))));
    }

    #[test]
    fn test_cache_serves_repeated_reads() {
        let mock = MockInstrument::rigol();
        mock.reply(":channel1:offset?", "+1.50000E+00");
        let mut scope = RigolDs1054::builder().session(mock.session()).build().unwrap();

        assert_eq!(scope.channel_offset(0).unwrap(), 1.5);
        assert_eq!(scope.channel_offset("channel1").unwrap(), 1.5);
        assert_eq!(mock.count(":channel1:offset?"), 1);

        scope.invalidate_all_attributes();
        scope.channel_offset(0).unwrap();
        assert_eq!(mock.count(":channel1:offset?"), 2);
    }

    #[test]
    fn test_cache_disabled_always_queries() {
        let mock = MockInstrument::rigol();
        mock.reply(":channel2:range?", "+8.0E+00");
        let mut scope = RigolDs1054::builder()
            .session(mock.session())
            .cache(false)
            .build()
            .unwrap();

        scope.channel_range(1).unwrap();
        scope.channel_range(1).unwrap();
        assert_eq!(mock.count(":channel2:range?"), 2);
    }

    #[test]
    fn test_query_instrument_status_reports_errors() {
        let mock = MockInstrument::rigol();
        mock.reply(":system:error?", "-221,\"Settings conflict\"");
        let mut scope = RigolDs1054::builder()
            .session(mock.session())
            .query_instrument_status(true)
            .build()
            .unwrap();

        let result = scope.display_clear();
        match result {
            Err(ScopeError::Instrument { code, message }) => {
                assert_eq!(code, -221);
                assert_eq!(message, "Settings conflict");
            }
            other => panic!("expected instrument error, got {other:?}"),
        }
    }

    #[test]
    fn test_closed_driver_is_not_connected() {
        let mock = MockInstrument::rigol();
        let mut scope = RigolDs1054::builder().session(mock.session()).build().unwrap();
        scope.close();
        assert!(!scope.is_initialized());
        assert!(matches!(scope.display_clear(), Err(ScopeError::NotConnected)));
        assert!(matches!(scope.ask_raw("*IDN?"), Err(ScopeError::NotConnected)));
    }

    #[test]
    fn test_raw_pass_through() {
        let mock = MockInstrument::rigol();
        mock.reply(":acquire:srate?", "+1.0E+09");
        let mut scope = RigolDs1054::builder().session(mock.session()).build().unwrap();
        scope.write_raw(":run").unwrap();
        assert_eq!(scope.ask_raw(":acquire:srate?").unwrap(), "+1.0E+09");
        assert_eq!(mock.written()[1..], [":run", ":acquire:srate?"]);
    }
}
