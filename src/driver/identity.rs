use super::{RigolDs1054, SIMULATION_PLACEHOLDER};
use crate::cache::Cached;
use crate::error::ScopeError;
use crate::scpi::parse_idn;

/// Static information about this driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverIdentity {
    pub description: &'static str,
    pub identifier: &'static str,
    pub revision: &'static str,
    pub vendor: &'static str,
    pub instrument_manufacturer: &'static str,
    pub specification_major_version: u32,
    pub specification_minor_version: u32,
    pub supported_instrument_models: &'static [&'static str],
}

pub static DRIVER_IDENTITY: DriverIdentity = DriverIdentity {
    description: "Rigol DS1054 IVI oscilloscope driver",
    identifier: "rusty-scope",
    revision: env!("CARGO_PKG_VERSION"),
    vendor: "",
    instrument_manufacturer: "Rigol Technologies",
    specification_major_version: 4,
    specification_minor_version: 1,
    supported_instrument_models: &["DS1054", "DS1054Z", "DS1074Z", "DS1104Z"],
};

/// Cached `*IDN?` fields
#[derive(Debug, Default)]
pub(crate) struct IdentityState {
    manufacturer: Cached<String>,
    model: Cached<String>,
    serial_number: Cached<String>,
    firmware_revision: Cached<String>,
}

impl IdentityState {
    pub(crate) fn invalidate(&mut self) {
        self.manufacturer.invalidate();
        self.model.invalidate();
        self.serial_number.invalidate();
        self.firmware_revision.invalidate();
    }
}

impl RigolDs1054 {
    pub fn driver_identity(&self) -> &'static DriverIdentity {
        &DRIVER_IDENTITY
    }

    /// Return one identity field, querying `*IDN?` once for all four.
    fn identity_field<F>(&mut self, slot: F) -> Result<String, ScopeError>
    where
        F: Fn(&mut IdentityState) -> &mut Cached<String>,
    {
        if self.options.simulate {
            return Ok(SIMULATION_PLACEHOLDER.to_string());
        }
        if self.options.cache {
            if let Some(value) = slot(&mut self.identity).get() {
                return Ok(value);
            }
        }

        let idn = parse_idn(&self.ask("*IDN?")?)?;
        self.identity.manufacturer.set(idn.manufacturer);
        self.identity.model.set(idn.model);
        self.identity.serial_number.set(idn.serial_number);
        self.identity.firmware_revision.set(idn.firmware_revision);
        Ok(slot(&mut self.identity).value())
    }

    pub fn identity_instrument_manufacturer(&mut self) -> Result<String, ScopeError> {
        self.identity_field(|s| &mut s.manufacturer)
    }

    pub fn identity_instrument_model(&mut self) -> Result<String, ScopeError> {
        self.identity_field(|s| &mut s.model)
    }

    pub fn identity_instrument_serial_number(&mut self) -> Result<String, ScopeError> {
        self.identity_field(|s| &mut s.serial_number)
    }

    pub fn identity_instrument_firmware_revision(&mut self) -> Result<String, ScopeError> {
        self.identity_field(|s| &mut s.firmware_revision)
    }
}
