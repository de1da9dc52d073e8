//! Transport to the compass module inside an ADCP
//!
//! The compass is not wired to the host directly. The ADCP console has to be
//! woken with a break, then switched into a pass-through mode in which bytes
//! are relayed verbatim between the serial port and the compass. A second
//! break returns the console to normal operation.
//!
//! [`DeviceLink`] is the seam the calibration engine talks to, [`SerialLink`]
//! is the hardware implementation and [`CompassMode`] pairs every entry into
//! pass-through mode with an exit.

mod error;
mod link;
mod mode;
mod serial;
mod system_info;

pub use error::CommFailure;
pub use link::{DeviceLink, InboundBytes};
pub use mode::CompassMode;
pub use serial::{SerialLink, COMPASS_PASS_THROUGH};
pub use system_info::SystemInfo;
