use crate::error::ScopeError;
use std::fmt;
use std::str::FromStr;

/// Raw SCPI socket port of the DS1000Z family
pub const DEFAULT_SOCKET_PORT: u16 = 5555;

/// A VISA-style resource string naming an instrument session.
///
/// Supported forms:
/// - `USB0::6833::1230::INSTR` (vendor and product id, decimal or `0x` hex)
/// - `USB0::0x1AB1::0x04CE::DS1ZA000000001::INSTR` (with serial number)
/// - `TCPIP0::192.168.1.104::INSTR` (raw socket on port 5555)
/// - `TCPIP0::192.168.1.104::5555::SOCKET`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Usb {
        board: u16,
        vendor_id: u16,
        product_id: u16,
        serial_number: Option<String>,
    },
    Tcp {
        board: u16,
        host: String,
        port: u16,
    },
}

fn parse_board(prefix: &str, part: &str) -> Option<u16> {
    let digits = &part[prefix.len()..];
    if digits.is_empty() {
        Some(0)
    } else {
        digits.parse().ok()
    }
}

fn parse_id(s: &str) -> Option<u16> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

impl FromStr for Resource {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScopeError::InvalidResource(s.to_string());
        let parts: Vec<&str> = s.trim().split("::").collect();
        if parts.len() < 3 {
            return Err(invalid());
        }
        let interface = parts[0].to_ascii_uppercase();
        let class = parts[parts.len() - 1].to_ascii_uppercase();

        if interface.starts_with("USB") {
            if class != "INSTR" || !(4..=6).contains(&parts.len()) {
                return Err(invalid());
            }
            let board = parse_board("USB", &interface).ok_or_else(invalid)?;
            let vendor_id = parse_id(parts[1]).ok_or_else(invalid)?;
            let product_id = parse_id(parts[2]).ok_or_else(invalid)?;
            let serial_number = (parts.len() >= 5).then(|| parts[3].to_string());
            Ok(Resource::Usb {
                board,
                vendor_id,
                product_id,
                serial_number,
            })
        } else if interface.starts_with("TCPIP") {
            let board = parse_board("TCPIP", &interface).ok_or_else(invalid)?;
            let host = parts[1].to_string();
            if host.is_empty() {
                return Err(invalid());
            }
            let port = match (class.as_str(), parts.len()) {
                // TCPIP0::host::INSTR or TCPIP0::host::inst0::INSTR
                ("INSTR", 3 | 4) => DEFAULT_SOCKET_PORT,
                ("SOCKET", 4) => parts[2].parse().map_err(|_| invalid())?,
                _ => return Err(invalid()),
            };
            Ok(Resource::Tcp { board, host, port })
        } else {
            Err(invalid())
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Usb {
                board,
                vendor_id,
                product_id,
                serial_number: Some(serial),
            } => write!(f, "USB{board}::{vendor_id}::{product_id}::{serial}::INSTR"),
            Resource::Usb {
                board,
                vendor_id,
                product_id,
                serial_number: None,
            } => write!(f, "USB{board}::{vendor_id}::{product_id}::INSTR"),
            Resource::Tcp { board, host, port } => {
                write!(f, "TCPIP{board}::{host}::{port}::SOCKET")
            }
        }
    }
}
