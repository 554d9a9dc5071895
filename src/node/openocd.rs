//! OpenOCD driven as an external process.
//!
//! Flash and reset are one-shot runs (`init`, `targets`, commands,
//! `shutdown`). Debugging keeps a long-running OpenOCD serving GDB until
//! `debug_stop` kills it.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};

use super::capability::{Debugger, Flasher, Resetter};
use crate::logutil::escape_log;

pub const GDB_PORT: u16 = 3333;

/// Upper bound for a reset run.
const RESET_TIMEOUT: Duration = Duration::from_secs(10);

pub struct OpenOcd {
    binary: PathBuf,
    cfg_file: PathBuf,
    flash_timeout: Duration,
    debug_server: Mutex<Option<Child>>,
}

fn flash_commands(firmware: &Path) -> Vec<String> {
    let fw = firmware.display();
    vec![
        "reset halt".to_string(),
        "reset init".to_string(),
        format!("flash write_image erase {}", fw),
        format!("verify_image {}", fw),
        "reset run".to_string(),
    ]
}

impl OpenOcd {
    pub fn new(binary: &Path, cfg_file: &Path, flash_timeout: Duration) -> Self {
        Self {
            binary: binary.to_path_buf(),
            cfg_file: cfg_file.to_path_buf(),
            flash_timeout,
            debug_server: Mutex::new(None),
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--debug=0").arg("-f").arg(&self.cfg_file);
        cmd
    }

    /// Command arguments of a one-shot run executing `commands`.
    pub fn oneshot_args(commands: &[String]) -> Vec<String> {
        let mut args: Vec<String> = ["-c", "init", "-c", "targets"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for c in commands {
            args.push("-c".to_string());
            args.push(c.clone());
        }
        args.push("-c".to_string());
        args.push("shutdown".to_string());
        args
    }

    async fn run(&self, what: &str, commands: &[String], limit: Duration) -> u32 {
        let mut cmd = self.base_command();
        cmd.args(Self::oneshot_args(commands))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        debug!("openocd {}: {:?}", what, cmd);
        match timeout(limit, cmd.output()).await {
            Err(_) => {
                error!("openocd {} timed out after {:?}", what, limit);
                1
            }
            Ok(Err(e)) => {
                error!("Could not run {}: {}", self.binary.display(), e);
                1
            }
            Ok(Ok(out)) if out.status.success() => {
                debug!("openocd {} ok: {}", what, escape_log(&out.stderr));
                0
            }
            Ok(Ok(out)) => {
                error!(
                    "openocd {} failed ({}): {}",
                    what,
                    out.status,
                    escape_log(&out.stderr)
                );
                1
            }
        }
    }
}

#[async_trait]
impl Flasher for OpenOcd {
    async fn flash(&self, firmware: &Path) -> u32 {
        self.run("flash", &flash_commands(firmware), self.flash_timeout).await
    }
}

#[async_trait]
impl Resetter for OpenOcd {
    async fn reset(&self) -> u32 {
        self.run("reset", &["reset run".to_string()], RESET_TIMEOUT).await
    }
}

#[async_trait]
impl Debugger for OpenOcd {
    async fn debug_start(&self) -> u32 {
        let mut server = self.debug_server.lock().await;
        if let Some(child) = server.as_mut() {
            match child.try_wait() {
                Ok(None) => {
                    info!("Debugger already running");
                    return 0;
                }
                Ok(Some(status)) => warn!("Previous debugger exited: {}", status),
                Err(e) => warn!("Could not poll previous debugger: {}", e),
            }
            *server = None;
        }
        let mut cmd = self.base_command();
        cmd.arg("-c")
            .arg(format!("gdb_port {}", GDB_PORT))
            .args(["-c", "init", "-c", "targets", "-c", "reset halt"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        match cmd.spawn() {
            Ok(child) => {
                info!("Debugger started, gdb port {}", GDB_PORT);
                *server = Some(child);
                0
            }
            Err(e) => {
                error!("Could not start debugger {}: {}", self.binary.display(), e);
                1
            }
        }
    }

    async fn debug_stop(&self) -> u32 {
        let Some(mut child) = self.debug_server.lock().await.take() else {
            debug!("Debugger not running");
            return 0;
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!("Debugger had already exited: {}", status);
            return 0;
        }
        match child.kill().await {
            Ok(()) => {
                info!("Debugger stopped");
                0
            }
            Err(e) => {
                error!("Could not stop debugger: {}", e);
                1
            }
        }
    }
}
