//! Scripted in-memory instrument for driver tests.

use crate::error::ScopeError;
use crate::session::Session;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const RIGOL_IDN: &str = "RIGOL TECHNOLOGIES,DS1054Z,DS1ZA000000001,00.04.04.SP4";

#[derive(Default)]
struct MockState {
    replies: HashMap<String, String>,
    blocks: HashMap<String, Vec<u8>>,
    written: Vec<String>,
    pending: Option<String>,
}

/// Records every command and answers queries from a reply table keyed by
/// the full query text.
///
/// A setting command `X value` also stores `value` as the reply to `X?`,
/// so reads after writes behave like a real instrument.
#[derive(Clone, Default)]
pub struct MockInstrument {
    state: Arc<Mutex<MockState>>,
}

impl MockInstrument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock that answers the identity, self test and error queries
    pub fn rigol() -> Self {
        let mock = Self::new();
        mock.reply("*IDN?", RIGOL_IDN);
        mock.reply("*TST?", "0");
        mock.reply(":system:error?", "+0,\"No error\"");
        mock
    }

    pub fn reply(&self, query: &str, reply: &str) {
        let mut state = self.state.lock().unwrap();
        state.replies.insert(query.to_string(), reply.to_string());
    }

    pub fn block(&self, query: &str, payload: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state.blocks.insert(query.to_string(), payload);
    }

    pub fn written(&self) -> Vec<String> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.written().iter().filter(|c| c.as_str() == command).count()
    }

    pub fn session(&self) -> Box<dyn Session> {
        Box::new(MockSession {
            state: Arc::clone(&self.state),
        })
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    fn take_pending(state: &mut MockState) -> Result<String, ScopeError> {
        state.pending.take().ok_or(ScopeError::Timeout)
    }
}

impl Session for MockSession {
    fn write(&mut self, command: &str) -> Result<(), ScopeError> {
        let mut state = self.state.lock().unwrap();
        state.written.push(command.to_string());
        let header = command.split(' ').next().unwrap_or_default();
        if header.ends_with('?') {
            state.pending = Some(command.to_string());
        } else if let Some((header, value)) = command.split_once(' ') {
            state.replies.insert(format!("{header}?"), value.to_string());
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, ScopeError> {
        let mut state = self.state.lock().unwrap();
        let query = Self::take_pending(&mut state)?;
        state.replies.get(&query).cloned().ok_or(ScopeError::Timeout)
    }

    fn read_block(&mut self) -> Result<Vec<u8>, ScopeError> {
        let mut state = self.state.lock().unwrap();
        let query = Self::take_pending(&mut state)?;
        state.blocks.get(&query).cloned().ok_or(ScopeError::Timeout)
    }
}
