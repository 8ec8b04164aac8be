//! Helpers for the textual side of SCPI: number formatting, reply parsing
//! and IEEE 488.2 definite-length blocks.

use crate::error::ScopeError;

/// Value the instrument returns when a measurement cannot be made.
pub const INVALID_MEASUREMENT: f64 = 9.9e37;

/// Format a float the way C's `%e` does (`1.000000e-03`).
pub fn format_float(value: f64) -> String {
    let formatted = format!("{value:.6e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.abs())
        }
        None => formatted,
    }
}

pub fn format_bool(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

pub fn parse_f64(reply: &str) -> Result<f64, ScopeError> {
    let trimmed = reply.trim();
    trimmed
        .parse::<f64>()
        .map_err(|_| ScopeError::Parse(format!("expected a number, got {trimmed:?}")))
}

pub fn parse_i32(reply: &str) -> Result<i32, ScopeError> {
    let trimmed = reply.trim().trim_start_matches('+');
    if let Ok(v) = trimmed.parse::<i32>() {
        return Ok(v);
    }
    // Some firmware answers integer queries in NR3 notation
    let v = parse_f64(trimmed)?;
    if v.fract() == 0.0 && v >= i32::MIN as f64 && v <= i32::MAX as f64 {
        Ok(v as i32)
    } else {
        Err(ScopeError::Parse(format!("expected an integer, got {trimmed:?}")))
    }
}

pub fn parse_bool(reply: &str) -> Result<bool, ScopeError> {
    match reply.trim().to_ascii_uppercase().as_str() {
        "1" | "ON" => Ok(true),
        "0" | "OFF" => Ok(false),
        other => Err(ScopeError::Parse(format!("expected a boolean, got {other:?}"))),
    }
}

pub fn unquote(reply: &str) -> String {
    reply.trim_matches(|c| c == ' ' || c == '"' || c == '\n' || c == '\r').to_string()
}

/// Split a `:system:error?` reply (`-113,"Undefined header"`) into code and message.
pub fn parse_error_reply(reply: &str) -> Result<(i32, String), ScopeError> {
    let (code, message) = reply
        .split_once(',')
        .ok_or_else(|| ScopeError::Parse(format!("malformed error reply {reply:?}")))?;
    Ok((parse_i32(code)?, unquote(message)))
}

/// Fields of an `*IDN?` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdnFields {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_revision: String,
}

pub fn parse_idn(reply: &str) -> Result<IdnFields, ScopeError> {
    let fields: Vec<&str> = reply.trim().split(',').map(str::trim).collect();
    if fields.len() < 4 {
        return Err(ScopeError::Parse(format!(
            "expected 4 comma separated identity fields, got {reply:?}"
        )));
    }
    Ok(IdnFields {
        manufacturer: fields[0].to_string(),
        model: fields[1].to_string(),
        serial_number: fields[2].to_string(),
        firmware_revision: fields[3].to_string(),
    })
}

/// Extract the payload of an IEEE 488.2 block (`#<n><len><payload>`).
///
/// `#0` (indefinite length) takes everything up to the trailing newline.
pub fn parse_block(data: &[u8]) -> Result<&[u8], ScopeError> {
    let start = data
        .iter()
        .position(|&b| b == b'#')
        .ok_or_else(|| ScopeError::Parse("block header '#' not found".to_string()))?;
    let digits_len = data
        .get(start + 1)
        .filter(|b| b.is_ascii_digit())
        .map(|b| (b - b'0') as usize)
        .ok_or_else(|| ScopeError::Parse("block header length digit missing".to_string()))?;

    let header_end = start + 2 + digits_len;
    if digits_len == 0 {
        let body = &data[header_end..];
        let end = body
            .iter()
            .rposition(|&b| b != b'\n' && b != b'\r')
            .map_or(0, |p| p + 1);
        return Ok(&body[..end]);
    }

    let len_field = data
        .get(start + 2..header_end)
        .ok_or_else(|| ScopeError::Parse("block header truncated".to_string()))?;
    let payload_len: usize = std::str::from_utf8(len_field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ScopeError::Parse(format!("invalid block length {len_field:?}")))?;

    data.get(header_end..header_end + payload_len).ok_or_else(|| {
        ScopeError::Parse(format!(
            "block truncated: expected {payload_len} bytes, got {}",
            data.len().saturating_sub(header_end)
        ))
    })
}

/// Total size in bytes of a definite-length block once its header is known,
/// or `None` when more header bytes are needed.
pub fn block_size_hint(header: &[u8]) -> Option<usize> {
    let start = header.iter().position(|&b| b == b'#')?;
    let digits_len = (*header.get(start + 1)? as char).to_digit(10)? as usize;
    if digits_len == 0 {
        return None;
    }
    let len_field = header.get(start + 2..start + 2 + digits_len)?;
    let payload_len: usize = std::str::from_utf8(len_field).ok()?.parse().ok()?;
    Some(start + 2 + digits_len + payload_len)
}
