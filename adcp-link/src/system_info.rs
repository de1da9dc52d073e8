//! ADCP identification parsed from the wake-up banner

use crate::error::CommFailure;

/// Serial number and firmware version of the host instrument.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemInfo {
    pub serial_number: String,
    pub firmware: String,
}

impl SystemInfo {
    /// Parse the banner the ADCP prints after a break.
    ///
    /// Looks for `SN:` and `FW:` markers; the value is the next
    /// whitespace-delimited token, whether or not it is separated from the
    /// marker by a space. The firmware field is optional.
    pub fn parse(banner: &str) -> Result<Self, CommFailure> {
        let serial_number = token_after(banner, "SN:").ok_or_else(|| {
            CommFailure::Handshake(format!(
                "no serial number in banner ({} bytes)",
                banner.len()
            ))
        })?;
        let firmware = token_after(banner, "FW:").unwrap_or_default();

        Ok(Self {
            serial_number,
            firmware,
        })
    }
}

fn token_after(text: &str, marker: &str) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    text[start..]
        .split_whitespace()
        .next()
        .map(|token| token.to_string())
}
