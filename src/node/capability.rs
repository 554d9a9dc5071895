//! Capability interfaces the lifecycle controller drives.
//!
//! Every call reports an error count rather than failing: zero is success,
//! anything else is folded into the calling operation's total.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::board::BoardDescriptor;
use super::openocd::OpenOcd;
use super::redirect::SerialRedirection;
use crate::common::{FsPresence, PresenceProbe};
use crate::config::ToolsConfig;

#[async_trait]
pub trait Flasher: Send + Sync {
    async fn flash(&self, firmware: &Path) -> u32;
}

#[async_trait]
pub trait Resetter: Send + Sync {
    async fn reset(&self) -> u32;
}

/// Debug server control. Both calls are idempotent.
#[async_trait]
pub trait Debugger: Send + Sync {
    async fn debug_start(&self) -> u32;
    async fn debug_stop(&self) -> u32;
}

/// Bridge between the node tty and the experiment's serial consumers.
#[async_trait]
pub trait Redirector: Send + Sync {
    async fn start(&self) -> u32;
    async fn stop(&self) -> u32;
}

/// Drops whatever the board printed into the tty input buffer.
pub trait SerialLine: Send + Sync {
    fn clear_input(&self, tty: &Path, baudrate: u32) -> u32;
}

/// Capability table for one open node.
#[derive(Clone)]
pub struct Capabilities {
    pub flasher: Arc<dyn Flasher>,
    pub resetter: Arc<dyn Resetter>,
    pub debugger: Arc<dyn Debugger>,
    pub redirector: Arc<dyn Redirector>,
    pub serial: Arc<dyn SerialLine>,
    pub presence: Arc<dyn PresenceProbe>,
}

impl Capabilities {
    /// Real hardware: OpenOCD for flash/reset/debug, socat for redirection.
    pub fn hardware(board: &BoardDescriptor, tools: &ToolsConfig) -> Self {
        let openocd = Arc::new(OpenOcd::new(
            &tools.openocd_path,
            &board.openocd_cfg,
            tools.flash_timeout(),
        ));
        let redirection = Arc::new(SerialRedirection::new(
            &tools.socat_path,
            &board.tty,
            board.baudrate,
            tools.redirect_port,
        ));
        Self {
            flasher: openocd.clone(),
            resetter: openocd.clone(),
            debugger: openocd,
            redirector: redirection,
            serial: default_serial_line(),
            presence: Arc::new(FsPresence),
        }
    }
}

#[cfg(feature = "serial")]
fn default_serial_line() -> Arc<dyn SerialLine> {
    Arc::new(super::serial::TtyLine)
}

#[cfg(not(feature = "serial"))]
fn default_serial_line() -> Arc<dyn SerialLine> {
    Arc::new(super::serial::NoSerial)
}
