use crate::error::ScopeError;
use crate::resource::Resource;
use crate::scpi::{block_size_hint, parse_block};
use log::{debug, trace};
use std::io::{BufRead, BufReader, Read, Write};
use std::time::Duration;

pub mod tcp;
pub mod usbtmc;

pub use tcp::TcpSession;
pub use usbtmc::{BulkPipe, UsbPipe, UsbTmcSession};

/// Longest block header accepted before giving up (`#9` + 9 digits + slack)
const MAX_BLOCK_HEADER: usize = 64;

/// Timeouts for an instrument session.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rusty_scope::ConnectionConfig;
///
/// let config = ConnectionConfig {
///     read_timeout: Duration::from_secs(30),
///     ..Default::default()
/// };
/// assert_eq!(config.connect_timeout, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for establishing the TCP connection
    pub connect_timeout: Duration,
    /// Timeout for reading a reply
    pub read_timeout: Duration,
    /// Timeout for writing a command
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// A blocking, message-oriented I/O session to one instrument.
///
/// Commands and replies are newline terminated text, except for the
/// IEEE 488.2 blocks returned by waveform data queries.
pub trait Session: Send {
    /// Send one command
    fn write(&mut self, command: &str) -> Result<(), ScopeError>;

    /// Read one reply line without its terminator
    fn read_line(&mut self) -> Result<String, ScopeError>;

    /// Read one definite-length block reply and return its payload
    fn read_block(&mut self) -> Result<Vec<u8>, ScopeError>;

    fn ask(&mut self, query: &str) -> Result<String, ScopeError> {
        self.write(query)?;
        self.read_line()
    }

    fn ask_block(&mut self, query: &str) -> Result<Vec<u8>, ScopeError> {
        self.write(query)?;
        self.read_block()
    }

    /// Clear the instrument's status and error queue
    fn clear(&mut self) -> Result<(), ScopeError> {
        self.write("*CLS")
    }
}

/// Open a session for a parsed resource string.
pub fn open(
    resource: &Resource,
    config: &ConnectionConfig,
) -> Result<Box<dyn Session>, ScopeError> {
    match resource {
        Resource::Tcp { host, port, .. } => Ok(Box::new(TcpSession::connect(host, *port, config)?)),
        Resource::Usb {
            vendor_id,
            product_id,
            serial_number,
            ..
        } => Ok(Box::new(UsbTmcSession::open(
            *vendor_id,
            *product_id,
            serial_number.as_deref(),
            config,
        )?)),
    }
}

/// Session over any byte stream that delivers replies in order.
pub struct StreamSession<IO: Read + Write> {
    reader: BufReader<IO>,
    /// A block was read without its trailing newline
    pending_terminator: bool,
}

impl<IO: Read + Write> StreamSession<IO> {
    pub fn new(io: IO) -> Self {
        Self {
            reader: BufReader::new(io),
            pending_terminator: false,
        }
    }

    pub fn get_ref(&self) -> &IO {
        self.reader.get_ref()
    }

    fn read_byte(&mut self) -> Result<u8, ScopeError> {
        let mut byte = [0u8; 1];
        self.reader.read_exact(&mut byte)?;
        Ok(byte[0])
    }
}

impl<IO: Read + Write + Send> Session for StreamSession<IO> {
    fn write(&mut self, command: &str) -> Result<(), ScopeError> {
        debug!(">> {command}");
        let io = self.reader.get_mut();
        io.write_all(command.as_bytes())?;
        io.write_all(b"\n")?;
        io.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, ScopeError> {
        loop {
            let mut line = Vec::new();
            let n = self.reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                return Err(ScopeError::Io {
                    source: std::io::ErrorKind::UnexpectedEof.into(),
                    context: "instrument closed the session".to_string(),
                });
            }
            let text = String::from_utf8_lossy(&line)
                .trim_end_matches(['\n', '\r'])
                .to_string();

            if self.pending_terminator {
                self.pending_terminator = false;
                if text.is_empty() {
                    continue;
                }
            }
            debug!("<< {text}");
            return Ok(text);
        }
    }

    fn read_block(&mut self) -> Result<Vec<u8>, ScopeError> {
        let mut data = Vec::new();

        // Skip anything before the '#', e.g. a terminator left by a previous block
        loop {
            let byte = self.read_byte()?;
            if byte == b'#' {
                data.push(byte);
                break;
            }
        }
        self.pending_terminator = false;

        let total = loop {
            data.push(self.read_byte()?);
            if data.len() == 2 && data[1] == b'0' {
                // Indefinite length: payload runs up to the newline
                self.reader.read_until(b'\n', &mut data)?;
                let payload = parse_block(&data)?.to_vec();
                trace!("<< #0 block ({} bytes)", payload.len());
                return Ok(payload);
            }
            if let Some(total) = block_size_hint(&data) {
                break total;
            }
            if data.len() > MAX_BLOCK_HEADER {
                return Err(ScopeError::Parse("block header too long".to_string()));
            }
        };

        let header_len = data.len();
        data.resize(total, 0);
        self.reader.read_exact(&mut data[header_len..])?;

        // Swallow the terminator if it already arrived, otherwise remember it
        match self.reader.buffer().first() {
            Some(b'\n') => self.reader.consume(1),
            _ => self.pending_terminator = true,
        }

        let payload = parse_block(&data)?.to_vec();
        debug!("<< block ({} bytes)", payload.len());
        Ok(payload)
    }
}
