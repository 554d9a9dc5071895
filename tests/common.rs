//! Test doubles for the open node capability table.
//! Every fake appends to a shared event log so tests can assert call order.
#![allow(dead_code)] // Each test binary uses a different subset.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nodegate::common::{PresenceProbe, Waits};
use nodegate::node::{
    BoardDescriptor, Capabilities, Debugger, Flasher, OpenNode, Redirector, Resetter, SerialLine,
};

pub const FAKE_TTY: &str = "/dev/fake/ttyON_TEST";

#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Return code of one fake step, adjustable while the node is running.
#[derive(Clone, Default)]
pub struct Ret(Arc<AtomicU32>);

impl Ret {
    pub fn set(&self, ret: u32) {
        self.0.store(ret, Ordering::SeqCst);
    }

    fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct FakeFlasher {
    events: Events,
    ret: Ret,
    delay: Duration,
}

#[async_trait]
impl Flasher for FakeFlasher {
    async fn flash(&self, firmware: &Path) -> u32 {
        self.events.push(format!("flash:{}", firmware.display()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.ret.get()
    }
}

pub struct FakeResetter {
    events: Events,
    ret: Ret,
}

#[async_trait]
impl Resetter for FakeResetter {
    async fn reset(&self) -> u32 {
        self.events.push("reset");
        self.ret.get()
    }
}

pub struct FakeDebugger {
    events: Events,
    start_ret: Ret,
    stop_ret: Ret,
}

#[async_trait]
impl Debugger for FakeDebugger {
    async fn debug_start(&self) -> u32 {
        self.events.push("debug_start");
        self.start_ret.get()
    }

    async fn debug_stop(&self) -> u32 {
        self.events.push("debug_stop");
        self.stop_ret.get()
    }
}

pub struct FakeRedirector {
    events: Events,
    start_ret: Ret,
    stop_ret: Ret,
}

#[async_trait]
impl Redirector for FakeRedirector {
    async fn start(&self) -> u32 {
        self.events.push("redirect_start");
        self.start_ret.get()
    }

    async fn stop(&self) -> u32 {
        self.events.push("redirect_stop");
        self.stop_ret.get()
    }
}

pub struct FakeSerial {
    events: Events,
    ret: Ret,
}

impl SerialLine for FakeSerial {
    fn clear_input(&self, tty: &Path, _baudrate: u32) -> u32 {
        self.events.push(format!("clear:{}", tty.display()));
        self.ret.get()
    }
}

#[derive(Clone, Default)]
pub struct FakePresence(Arc<AtomicBool>);

impl FakePresence {
    pub fn set(&self, present: bool) {
        self.0.store(present, Ordering::SeqCst);
    }
}

impl PresenceProbe for FakePresence {
    fn is_present(&self, _path: &Path) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handles onto every knob of a fake node.
#[derive(Clone, Default)]
pub struct Rig {
    pub events: Events,
    pub presence: FakePresence,
    pub flash_ret: Ret,
    pub reset_ret: Ret,
    pub debug_start_ret: Ret,
    pub debug_stop_ret: Ret,
    pub redirect_start_ret: Ret,
    pub redirect_stop_ret: Ret,
    pub clear_ret: Ret,
    pub flash_delay: Duration,
}

impl Rig {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            flasher: Arc::new(FakeFlasher {
                events: self.events.clone(),
                ret: self.flash_ret.clone(),
                delay: self.flash_delay,
            }),
            resetter: Arc::new(FakeResetter {
                events: self.events.clone(),
                ret: self.reset_ret.clone(),
            }),
            debugger: Arc::new(FakeDebugger {
                events: self.events.clone(),
                start_ret: self.debug_start_ret.clone(),
                stop_ret: self.debug_stop_ret.clone(),
            }),
            redirector: Arc::new(FakeRedirector {
                events: self.events.clone(),
                start_ret: self.redirect_start_ret.clone(),
                stop_ret: self.redirect_stop_ret.clone(),
            }),
            serial: Arc::new(FakeSerial {
                events: self.events.clone(),
                ret: self.clear_ret.clone(),
            }),
            presence: Arc::new(self.presence.clone()),
        }
    }

    pub fn node(&self, board: BoardDescriptor) -> OpenNode {
        OpenNode::new(board, self.capabilities(), fast_waits())
    }
}

pub fn fast_waits() -> Waits {
    Waits {
        tty_detect_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
    }
}

pub fn test_board() -> BoardDescriptor {
    let mut board = BoardDescriptor::st_lrwan1(Path::new("/static"));
    board.tty = PathBuf::from(FAKE_TTY);
    board
}

pub fn idle_fw() -> String {
    test_board().fw_idle.display().to_string()
}
