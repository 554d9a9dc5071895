//! # Open Node Lifecycle
//!
//! One generic controller drives every board type. What differs between
//! boards lives in a [`BoardDescriptor`] (tty, baud rate, firmware images,
//! OpenOCD config) and a [`Capabilities`] table (flash, reset, debug,
//! redirection, tty clearing, presence probing).
//!
//! Every operation returns the number of failed sub-steps. Steps are never
//! skipped because an earlier one failed, so a single call can report several
//! failures; the detail is in the logs. The only hard error is
//! [`GatewayError::Busy`](crate::error::GatewayError::Busy), returned when
//! another operation is already running on the same node.

pub mod board;
pub mod capability;
pub mod openocd;
pub mod redirect;
pub mod serial;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::info;
use serde::Serialize;

use crate::common::{logged_call, wait_device_absent, wait_device_present, InstanceGuard, Waits};
use crate::error::Result;

pub use board::{BoardDescriptor, StatusCheck};
pub use capability::{Capabilities, Debugger, Flasher, Redirector, Resetter, SerialLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    Unknown,
    DeviceAbsent,
    DevicePresent,
    Flashed,
    Redirecting,
    Debugging,
    TornDown,
}

/// Mutable state of one attached board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSession {
    pub phase: NodePhase,
    pub redirecting: bool,
    pub debugging: bool,
    /// Last image flashed successfully.
    pub firmware: Option<PathBuf>,
}

impl Default for NodeSession {
    fn default() -> Self {
        Self {
            phase: NodePhase::Unknown,
            redirecting: false,
            debugging: false,
            firmware: None,
        }
    }
}

pub struct OpenNode {
    board: BoardDescriptor,
    caps: Capabilities,
    waits: Waits,
    guard: InstanceGuard,
    session: Mutex<NodeSession>,
    log_target: String,
}

impl OpenNode {
    pub fn new(board: BoardDescriptor, caps: Capabilities, waits: Waits) -> Self {
        let log_target = format!("nodegate::node::{}", board.name);
        let guard = InstanceGuard::new(format!("open node {}", board.name));
        Self {
            board,
            caps,
            waits,
            guard,
            session: Mutex::new(NodeSession::default()),
            log_target,
        }
    }

    pub fn board(&self) -> &BoardDescriptor {
        &self.board
    }

    pub fn session(&self) -> NodeSession {
        self.session_mut().clone()
    }

    pub fn phase(&self) -> NodePhase {
        self.session_mut().phase
    }

    /// True while a lifecycle operation is running.
    pub fn is_busy(&self) -> bool {
        self.guard.is_held()
    }

    fn session_mut(&self) -> MutexGuard<'_, NodeSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn label(&self, action: &str) -> String {
        format!("Node {} : {} of {} node", self.board.name.to_uppercase(), action, self.board.name)
    }

    /// Wait for the tty to appear, flash `firmware` (idle if `None`) and start redirection.
    pub async fn setup(&self, firmware: Option<&Path>) -> Result<u32> {
        let _lease = self.guard.try_enter()?;
        let ret = logged_call(&self.log_target, &self.label("Setup"), async {
            let mut ret = 0;
            // The board may still be settling from a previous power cycle.
            self.wait_absent().await;
            ret += self.wait_present().await;
            ret += self.do_flash(firmware).await;
            ret += self.do_redirect_start().await;
            ret
        })
        .await;
        Ok(ret)
    }

    /// Stop debugger and redirection, then leave the idle firmware on the board.
    pub async fn teardown(&self) -> Result<u32> {
        let _lease = self.guard.try_enter()?;
        let ret = logged_call(&self.log_target, &self.label("teardown"), async {
            let mut ret = 0;
            // A node restarted during control node teardown drops and
            // re-enumerates its tty in the first seconds.
            self.wait_absent().await;
            ret += self.wait_present().await;
            ret += self.do_debug_stop().await;
            ret += self.do_redirect_stop().await;
            ret += self.do_flash(None).await;
            self.session_mut().phase = NodePhase::TornDown;
            ret
        })
        .await;
        Ok(ret)
    }

    /// Flash `firmware`, or the idle image when `None`.
    pub async fn flash(&self, firmware: Option<&Path>) -> Result<u32> {
        let _lease = self.guard.try_enter()?;
        Ok(logged_call(&self.log_target, &self.label("flash"), self.do_flash(firmware)).await)
    }

    pub async fn reset(&self) -> Result<u32> {
        let _lease = self.guard.try_enter()?;
        Ok(logged_call(&self.log_target, &self.label("reset"), async {
            info!(target: self.log_target.as_str(), "Reset {} node", self.board.name);
            self.caps.resetter.reset().await
        })
        .await)
    }

    pub async fn debug_start(&self) -> Result<u32> {
        let _lease = self.guard.try_enter()?;
        info!(target: self.log_target.as_str(), "{} Node debugger start", self.board.name);
        let ret = self.caps.debugger.debug_start().await;
        if ret == 0 {
            let mut session = self.session_mut();
            session.debugging = true;
            session.phase = NodePhase::Debugging;
        }
        Ok(ret)
    }

    pub async fn debug_stop(&self) -> Result<u32> {
        let _lease = self.guard.try_enter()?;
        Ok(self.do_debug_stop().await)
    }

    /// Quick health check; does not wait and does not take the guard.
    pub fn status(&self) -> u32 {
        match self.board.status_check {
            // Called while the node is unpowered: nothing to probe.
            StatusCheck::Assume => 0,
            StatusCheck::DevicePresent => {
                u32::from(!self.caps.presence.is_present(&self.board.tty))
            }
        }
    }

    async fn wait_absent(&self) {
        if wait_device_absent(self.caps.presence.as_ref(), &self.board.tty, self.waits).await {
            self.session_mut().phase = NodePhase::DeviceAbsent;
        }
    }

    async fn wait_present(&self) -> u32 {
        let found = wait_device_present(self.caps.presence.as_ref(), &self.board.tty, self.waits).await;
        if found {
            self.session_mut().phase = NodePhase::DevicePresent;
        }
        u32::from(!found)
    }

    async fn do_flash(&self, firmware: Option<&Path>) -> u32 {
        let firmware = self.board.firmware_or_idle(firmware);
        info!(
            target: self.log_target.as_str(),
            "Flash firmware on {}: {}",
            self.board.name,
            firmware.display()
        );
        let mut ret = self.caps.flasher.flash(firmware).await;
        // Boot chatter must not reach the redirection or the experiment logs.
        ret += self.caps.serial.clear_input(&self.board.tty, self.board.baudrate);
        if ret == 0 {
            let mut session = self.session_mut();
            session.phase = if session.debugging {
                NodePhase::Debugging
            } else if session.redirecting {
                NodePhase::Redirecting
            } else {
                NodePhase::Flashed
            };
            session.firmware = Some(firmware.to_path_buf());
        }
        ret
    }

    async fn do_debug_stop(&self) -> u32 {
        info!(target: self.log_target.as_str(), "{} Node debugger stop", self.board.name);
        let ret = self.caps.debugger.debug_stop().await;
        if ret == 0 {
            let mut session = self.session_mut();
            session.debugging = false;
            if session.phase == NodePhase::Debugging {
                session.phase = if session.redirecting {
                    NodePhase::Redirecting
                } else {
                    NodePhase::Flashed
                };
            }
        }
        ret
    }

    async fn do_redirect_start(&self) -> u32 {
        let ret = self.caps.redirector.start().await;
        if ret == 0 {
            let mut session = self.session_mut();
            session.redirecting = true;
            session.phase = NodePhase::Redirecting;
        }
        ret
    }

    async fn do_redirect_stop(&self) -> u32 {
        let ret = self.caps.redirector.stop().await;
        if ret == 0 {
            self.session_mut().redirecting = false;
        }
        ret
    }
}
