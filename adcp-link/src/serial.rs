//! ADCP console over a serial port

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::{debug, info, warn};

use crate::error::CommFailure;
use crate::link::{DeviceLink, InboundBytes};
use crate::system_info::SystemInfo;

/// Console command that relays the serial port to the compass module.
pub const COMPASS_PASS_THROUGH: &[u8] = b"DIAGCPT\r";

/// Poll interval of the reader thread; also the port read timeout.
const READ_POLL: Duration = Duration::from_millis(50);

/// Timing used when driving the ADCP console.
#[derive(Debug, Clone)]
struct LinkSettings {
    /// How long the break condition is held
    break_hold: Duration,
    /// Upper bound on waiting for the wake-up banner
    banner_timeout: Duration,
    /// Banner is considered complete after this much silence
    banner_quiet: Duration,
    /// Delay after the pass-through command before compass traffic starts
    pass_through_settle: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            break_hold: Duration::from_millis(300),
            banner_timeout: Duration::from_secs(3),
            banner_quiet: Duration::from_millis(250),
            pass_through_settle: Duration::from_millis(200),
        }
    }
}

struct ReaderThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// [`DeviceLink`] over a local serial port.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    port_name: String,
    settings: LinkSettings,
    inbound: InboundBytes,
    reader: Option<ReaderThread>,
}

impl SerialLink {
    /// Open `port_name` at `baud` (8N1). Inbound compass bytes go to `inbound`.
    pub fn open(port_name: &str, baud: u32, inbound: InboundBytes) -> Result<Self, CommFailure> {
        let port = serialport::new(port_name, baud)
            .timeout(READ_POLL)
            .open()
            .map_err(|e| CommFailure::Open {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;
        info!("Opened {} at {} baud", port_name, baud);

        Ok(Self {
            port,
            port_name: port_name.to_string(),
            settings: LinkSettings::default(),
            inbound,
            reader: None,
        })
    }

    /// Collect console output until it goes quiet or the banner timeout passes.
    fn read_banner(&mut self) -> Result<String, CommFailure> {
        let start = Instant::now();
        let mut last_data = Instant::now();
        let mut text = Vec::new();
        let mut buf = [0u8; 256];

        while start.elapsed() < self.settings.banner_timeout {
            match self.port.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    text.extend_from_slice(&buf[..n]);
                    last_data = Instant::now();
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => return Err(CommFailure::Read(e.to_string())),
            }
            if !text.is_empty() && last_data.elapsed() >= self.settings.banner_quiet {
                break;
            }
        }

        let banner = String::from_utf8_lossy(&text).into_owned();
        debug!("ADCP banner: {:?}", banner);
        Ok(banner)
    }

    fn start_reader(&mut self) -> Result<(), CommFailure> {
        let mut port = self
            .port
            .try_clone()
            .map_err(|e| CommFailure::Handshake(format!("cannot clone port: {e}")))?;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let inbound = self.inbound.clone();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 512];
            while !stop_flag.load(Ordering::Relaxed) {
                match port.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        if inbound.send(buf[..n].to_vec()).is_err() {
                            debug!("Inbound channel closed, stopping serial reader");
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::TimedOut => {}
                    Err(e) => {
                        warn!("Serial read failed, stopping reader: {}", e);
                        break;
                    }
                }
            }
        });

        self.reader = Some(ReaderThread { stop, handle });
        Ok(())
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stop.store(true, Ordering::Relaxed);
            if reader.handle.join().is_err() {
                warn!("Serial reader thread panicked");
            }
        }
    }
}

impl DeviceLink for SerialLink {
    fn system_info(&mut self) -> Result<SystemInfo, CommFailure> {
        if self.reader.is_some() {
            return Err(CommFailure::Handshake(
                "system info unavailable in compass mode".to_string(),
            ));
        }
        self.send_break()?;
        let banner = self.read_banner()?;
        let info = SystemInfo::parse(&banner)?;
        info!(
            "ADCP serial number {} firmware {}",
            info.serial_number, info.firmware
        );
        Ok(info)
    }

    fn connect(&mut self) -> Result<(), CommFailure> {
        self.send_break()?;
        self.read_banner()?;
        self.port
            .write_all(COMPASS_PASS_THROUGH)
            .and_then(|_| self.port.flush())
            .map_err(|e| CommFailure::Write(e.to_string()))?;
        thread::sleep(self.settings.pass_through_settle);
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| CommFailure::Handshake(e.to_string()))?;
        self.start_reader()?;
        info!("Compass pass-through enabled on {}", self.port_name);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), CommFailure> {
        self.stop_reader();
        self.send_break()?;
        self.read_banner()?;
        info!("Compass pass-through disabled on {}", self.port_name);
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), CommFailure> {
        self.port
            .write_all(bytes)
            .and_then(|_| self.port.flush())
            .map_err(|e| CommFailure::Write(e.to_string()))
    }

    fn send_break(&mut self) -> Result<(), CommFailure> {
        self.port
            .set_break()
            .map_err(|e| CommFailure::Break(e.to_string()))?;
        thread::sleep(self.settings.break_hold);
        self.port
            .clear_break()
            .map_err(|e| CommFailure::Break(e.to_string()))
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.stop_reader();
    }
}
