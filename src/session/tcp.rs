use super::{ConnectionConfig, Session, StreamSession};
use crate::error::ScopeError;
use log::{debug, warn};
use std::net::{TcpStream, ToSocketAddrs};

/// SCPI over a raw TCP socket
pub struct TcpSession {
    inner: StreamSession<TcpStream>,
}

impl TcpSession {
    pub fn connect(host: &str, port: u16, config: &ConnectionConfig) -> Result<Self, ScopeError> {
        let address = format!("{host}:{port}");
        let socket_addr = address
            .to_socket_addrs()
            .map_err(|_| ScopeError::InvalidResource(address.clone()))?
            .next()
            .ok_or_else(|| ScopeError::InvalidResource(address.clone()))?;

        debug!("Connecting to instrument at {address}");

        let stream = TcpStream::connect_timeout(&socket_addr, config.connect_timeout).map_err(|e| {
            warn!("Failed to connect to {address}: {e}");
            if e.kind() == std::io::ErrorKind::TimedOut {
                ScopeError::Timeout
            } else {
                ScopeError::Io {
                    source: e,
                    context: format!("Failed to connect to {address}"),
                }
            }
        })?;

        stream.set_read_timeout(Some(config.read_timeout))?;
        stream.set_write_timeout(Some(config.write_timeout))?;
        stream.set_nodelay(true)?;

        debug!("Connected to {address}");

        Ok(Self {
            inner: StreamSession::new(stream),
        })
    }
}

impl Session for TcpSession {
    fn write(&mut self, command: &str) -> Result<(), ScopeError> {
        self.inner.write(command)
    }

    fn read_line(&mut self) -> Result<String, ScopeError> {
        self.inner.read_line()
    }

    fn read_block(&mut self) -> Result<Vec<u8>, ScopeError> {
        self.inner.read_block()
    }
}
