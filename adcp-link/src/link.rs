use tokio::sync::mpsc::UnboundedSender;

use crate::error::CommFailure;
use crate::system_info::SystemInfo;

/// Channel on which a link delivers raw bytes read from the compass.
pub type InboundBytes = UnboundedSender<Vec<u8>>;

/// Byte-level access to the compass through the ADCP.
///
/// Implementations push everything received while in compass mode onto the
/// [`InboundBytes`] channel they were built with. Framing and decoding are
/// left to the consumer.
pub trait DeviceLink: Send {
    /// Wake the ADCP and read its serial number and firmware version.
    fn system_info(&mut self) -> Result<SystemInfo, CommFailure>;

    /// Switch the ADCP into compass pass-through mode.
    fn connect(&mut self) -> Result<(), CommFailure>;

    /// Leave pass-through mode and return the ADCP to its console.
    fn disconnect(&mut self) -> Result<(), CommFailure>;

    /// Write one encoded frame to the compass.
    fn send(&mut self, bytes: &[u8]) -> Result<(), CommFailure>;

    /// Assert a serial break.
    fn send_break(&mut self) -> Result<(), CommFailure>;
}

impl<L: DeviceLink + ?Sized> DeviceLink for Box<L> {
    fn system_info(&mut self) -> Result<SystemInfo, CommFailure> {
        (**self).system_info()
    }

    fn connect(&mut self) -> Result<(), CommFailure> {
        (**self).connect()
    }

    fn disconnect(&mut self) -> Result<(), CommFailure> {
        (**self).disconnect()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), CommFailure> {
        (**self).send(bytes)
    }

    fn send_break(&mut self) -> Result<(), CommFailure> {
        (**self).send_break()
    }
}
