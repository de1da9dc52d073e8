//! Scoped compass pass-through mode

use tracing::{debug, warn};

use crate::error::CommFailure;
use crate::link::DeviceLink;

/// Owns a link and tracks whether it is in compass pass-through mode.
///
/// [`acquire`](Self::acquire) and [`release`](Self::release) are idempotent,
/// so a release on an error path after an explicit release is harmless. If
/// the guard is dropped while still in compass mode, the ADCP is returned to
/// its console before the link goes away.
pub struct CompassMode<L: DeviceLink> {
    link: L,
    active: bool,
}

impl<L: DeviceLink> CompassMode<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Enter compass mode if not already there.
    pub fn acquire(&mut self) -> Result<(), CommFailure> {
        if self.active {
            return Ok(());
        }
        self.link.connect()?;
        self.active = true;
        debug!("Compass pass-through mode entered");
        Ok(())
    }

    /// Leave compass mode if currently in it.
    ///
    /// The guard counts as released even when the disconnect fails, so the
    /// ADCP is never sent a second exit sequence from `Drop`.
    pub fn release(&mut self) -> Result<(), CommFailure> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.link.disconnect()?;
        debug!("Compass pass-through mode left");
        Ok(())
    }

    /// Send a frame to the compass. Fails unless compass mode is held.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), CommFailure> {
        if !self.active {
            return Err(CommFailure::Disconnected);
        }
        self.link.send(bytes)
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Direct access to the link, for console-level operations such as
    /// reading system info outside compass mode.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}

impl<L: DeviceLink> Drop for CompassMode<L> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to leave compass mode on drop: {}", e);
        }
    }
}
