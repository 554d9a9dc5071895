//! Clearing the open node tty after a flash.
//!
//! A freshly booted firmware prints to its serial line before anyone listens.
//! Those bytes must not leak into the redirected experiment stream.

use std::path::Path;

use log::error;
#[cfg(feature = "serial")]
use log::{debug, warn};

use super::capability::SerialLine;

/// Opens the tty, discards the input buffer and closes it again.
#[cfg(feature = "serial")]
#[derive(Debug, Default, Clone, Copy)]
pub struct TtyLine;

#[cfg(feature = "serial")]
impl SerialLine for TtyLine {
    fn clear_input(&self, tty: &Path, baudrate: u32) -> u32 {
        let name = tty.to_string_lossy();
        let port = match serialport::new(name.as_ref(), baudrate).open() {
            Ok(port) => port,
            Err(e) => {
                error!("No serial port found: {}: {}", tty.display(), e);
                return 1;
            }
        };
        match port.clear(serialport::ClearBuffer::Input) {
            Ok(()) => debug!("Cleared input buffer of {}", tty.display()),
            Err(e) => warn!("Could not clear input buffer of {}: {}", tty.display(), e),
        }
        0
    }
}

/// Stand-in when the crate is built without serial support.
#[cfg(not(feature = "serial"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSerial;

#[cfg(not(feature = "serial"))]
impl SerialLine for NoSerial {
    fn clear_input(&self, tty: &Path, _baudrate: u32) -> u32 {
        error!("Serial support not compiled in, cannot clear {}", tty.display());
        1
    }
}

#[cfg(all(test, feature = "serial"))]
mod tests {
    use super::*;

    #[test]
    fn missing_tty_counts_one_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tty = dir.path().join("ttyON_missing");
        assert_eq!(TtyLine.clear_input(&tty, 115_200), 1);
    }
}
