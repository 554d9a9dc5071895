//! Serial redirection: exposes the open node tty on a TCP port through socat.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::capability::Redirector;

pub struct SerialRedirection {
    socat: PathBuf,
    tty: PathBuf,
    baudrate: u32,
    port: u16,
    child: Mutex<Option<Child>>,
}

impl SerialRedirection {
    pub fn new(socat: &Path, tty: &Path, baudrate: u32, port: u16) -> Self {
        Self {
            socat: socat.to_path_buf(),
            tty: tty.to_path_buf(),
            baudrate,
            port,
            child: Mutex::new(None),
        }
    }

    /// socat address pair bridging the TCP listener and the tty.
    ///
    /// `fork` keeps the listener up across client disconnects.
    pub fn socat_args(&self) -> [String; 3] {
        [
            "-d".to_string(),
            format!("TCP4-LISTEN:{},reuseaddr,fork", self.port),
            format!("open:{},b{},echo=0,raw", self.tty.display(), self.baudrate),
        ]
    }

    pub async fn is_running(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

#[async_trait]
impl Redirector for SerialRedirection {
    async fn start(&self) -> u32 {
        let mut slot = self.child.lock().await;
        if let Some(child) = slot.as_mut() {
            if let Ok(None) = child.try_wait() {
                debug!("Serial redirection already running on port {}", self.port);
                return 0;
            }
            warn!("Serial redirection had exited, restarting");
        }
        let spawned = Command::new(&self.socat)
            .args(self.socat_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        match spawned {
            Ok(child) => {
                info!(
                    "Serial redirection {} <-> tcp:{} started",
                    self.tty.display(),
                    self.port
                );
                *slot = Some(child);
                0
            }
            Err(e) => {
                error!("Could not start serial redirection ({}): {}", self.socat.display(), e);
                *slot = None;
                1
            }
        }
    }

    async fn stop(&self) -> u32 {
        let Some(mut child) = self.child.lock().await.take() else {
            debug!("Serial redirection not running");
            return 0;
        };
        if let Ok(Some(status)) = child.try_wait() {
            debug!("Serial redirection had already exited: {}", status);
            return 0;
        }
        match child.kill().await {
            Ok(()) => {
                info!("Serial redirection stopped");
                0
            }
            Err(e) => {
                error!("Could not stop serial redirection: {}", e);
                1
            }
        }
    }
}
