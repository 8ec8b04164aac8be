use super::RigolDs1054;
use crate::error::ScopeError;
use crate::scpi::{parse_error_reply, parse_i32};
use log::{info, warn};

impl RigolDs1054 {
    /// Reset the instrument to its power-on state and drop all cached values.
    pub fn reset(&mut self) -> Result<(), ScopeError> {
        if self.options.simulate {
            return Ok(());
        }
        info!("Resetting instrument");
        self.write("*RST")?;
        self.invalidate_all_attributes();
        self.measurement.restore_defaults();
        Ok(())
    }

    pub fn reset_with_defaults(&mut self) -> Result<(), ScopeError> {
        self.reset()
    }

    /// Run the instrument self test; returns the result code and a message.
    pub fn self_test(&mut self) -> Result<(i32, String), ScopeError> {
        if self.options.simulate {
            return Ok((0, "Self test passed".to_string()));
        }
        let code = parse_i32(&self.ask("*TST?")?)?;
        let message = if code == 0 {
            "Self test passed"
        } else {
            warn!("Self test failed with code {code}");
            "Self test failed"
        };
        Ok((code, message.to_string()))
    }

    /// Pop the oldest entry of the instrument error queue.
    pub fn error_query(&mut self) -> Result<(i32, String), ScopeError> {
        if self.options.simulate {
            return Ok((0, "No error".to_string()));
        }
        parse_error_reply(&self.ask(":system:error?")?)
    }

    pub fn lock_object(&mut self) {}

    pub fn unlock_object(&mut self) {}

    pub fn disable(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::super::testing::MockInstrument;
    use super::*;

    #[test]
    fn test_self_test_messages() {
        let mock = MockInstrument::rigol();
        let mut scope = RigolDs1054::builder().session(mock.session()).build().unwrap();
        assert_eq!(scope.self_test().unwrap(), (0, "Self test passed".to_string()));

        mock.reply("*TST?", "+3");
        assert_eq!(scope.self_test().unwrap(), (3, "Self test failed".to_string()));
    }

    #[test]
    fn test_error_query_strips_quotes() {
        let mock = MockInstrument::rigol();
        mock.reply(":system:error?", "-113,\"Undefined header\"");
        let mut scope = RigolDs1054::builder().session(mock.session()).build().unwrap();
        assert_eq!(scope.error_query().unwrap(), (-113, "Undefined header".to_string()));
    }

    #[test]
    fn test_reset_invalidates_cache() {
        let mock = MockInstrument::rigol();
        mock.reply(":timebase:range?", "+1.0E-03");
        let mut scope = RigolDs1054::builder().session(mock.session()).build().unwrap();

        scope.acquisition_time_per_record().unwrap();
        scope.acquisition_time_per_record().unwrap();
        assert_eq!(mock.count(":timebase:range?"), 1);

        scope.reset().unwrap();
        scope.acquisition_time_per_record().unwrap();
        assert_eq!(mock.count("*RST"), 1);
        assert_eq!(mock.count(":timebase:range?"), 2);
    }

    #[test]
    fn test_lock_and_disable_are_silent() {
        let mock = MockInstrument::rigol();
        let mut scope = RigolDs1054::builder().session(mock.session()).build().unwrap();
        scope.lock_object();
        scope.unlock_object();
        scope.disable();
        assert_eq!(mock.written(), vec!["*CLS"]);
    }
}
