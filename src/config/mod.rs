//! # Configuration Management Module
//!
//! Gateway configuration is a single TOML file describing the control node
//! link, the attached open node, the board descriptor table and the external
//! tools used to drive the hardware.
//!
//! ## Configuration Structure
//!
//! - [`GatewayConfig`] - paths shared by every board (static firmware directory)
//! - [`ControlNodeConfig`] - control node serial link and dispatcher tuning
//! - [`OpenNodeConfig`] - which board type is attached
//! - [`BoardDescriptor`] table - per-board-type data (`[[boards]]`)
//! - [`WaitConfig`] - tty detection deadline and polling interval
//! - [`ToolsConfig`] - OpenOCD and socat locations
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use nodegate::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("nodegate.toml").await?;
//!     config.validate()?;
//!     println!("Open node: {}", config.open_node.board);
//!     println!("Control node: {}", config.control_node.port);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [gateway]
//! static_dir = "/var/lib/gateway_code/static"
//!
//! [control_node]
//! port = "/dev/ttyCN"
//! baud_rate = 500000
//! measures_mask = 240
//! answer_timeout_ms = 1000
//! telemetry_capacity = 1024
//!
//! [open_node]
//! board = "st_lrwan1"
//!
//! [waits]
//! tty_detect_timeout_ms = 3000
//! poll_interval_ms = 100
//! ```
//!
//! Boards listed under `[[boards]]` replace the built-in table; relative
//! firmware and OpenOCD paths are resolved against `gateway.static_dir`.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::common::Waits;
use crate::control::dispatch::{DEFAULT_ANSWER_TIMEOUT, DEFAULT_MEASURES_MASK};
use crate::node::BoardDescriptor;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub control_node: ControlNodeConfig,
    pub open_node: OpenNodeConfig,
    #[serde(default = "default_boards")]
    pub boards: Vec<BoardDescriptor>,
    #[serde(default)]
    pub waits: WaitConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Directory holding idle/autotest firmwares and OpenOCD board configs.
    pub static_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlNodeConfig {
    /// Serial device of the control node. Empty disables the control link.
    pub port: String,
    pub baud_rate: u32,
    /// Header bits identifying telemetry packets.
    #[serde(default = "default_measures_mask")]
    pub measures_mask: u8,
    #[serde(default = "default_answer_timeout_ms")]
    pub answer_timeout_ms: u64,
    #[serde(default = "default_telemetry_capacity")]
    pub telemetry_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenNodeConfig {
    /// Board type name, looked up in `boards`.
    pub board: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConfig {
    pub tty_detect_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub openocd_path: PathBuf,
    /// Upper bound for one OpenOCD flash run (seconds).
    pub flash_timeout_secs: u64,
    pub socat_path: PathBuf,
    /// TCP port exposing the open node serial line.
    pub redirect_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

fn default_measures_mask() -> u8 {
    DEFAULT_MEASURES_MASK
}

fn default_answer_timeout_ms() -> u64 {
    DEFAULT_ANSWER_TIMEOUT.as_millis() as u64
}

fn default_telemetry_capacity() -> usize {
    1024
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("/var/lib/gateway_code/static")
}

fn default_boards() -> Vec<BoardDescriptor> {
    // Relative names, anchored at gateway.static_dir by Config::board().
    vec![BoardDescriptor::st_lrwan1(std::path::Path::new(""))]
}

impl Default for WaitConfig {
    fn default() -> Self {
        let waits = Waits::default();
        Self {
            tty_detect_timeout_ms: waits.tty_detect_timeout.as_millis() as u64,
            poll_interval_ms: waits.poll_interval.as_millis() as u64,
        }
    }
}

impl WaitConfig {
    pub fn waits(&self) -> Waits {
        Waits {
            tty_detect_timeout: Duration::from_millis(self.tty_detect_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            openocd_path: PathBuf::from("/opt/openocd-0.10.0/bin/openocd"),
            flash_timeout_secs: 100,
            socat_path: PathBuf::from("/usr/bin/socat"),
            redirect_port: 20000,
        }
    }
}

impl ToolsConfig {
    pub fn flash_timeout(&self) -> Duration {
        Duration::from_secs(self.flash_timeout_secs)
    }
}

impl ControlNodeConfig {
    pub fn answer_timeout(&self) -> Duration {
        Duration::from_millis(self.answer_timeout_ms)
    }

    pub fn enabled(&self) -> bool {
        !self.port.trim().is_empty()
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Descriptor of the attached board, paths resolved against `static_dir`.
    pub fn board(&self) -> Result<BoardDescriptor> {
        let board = BoardDescriptor::find(&self.boards, &self.open_node.board)?;
        Ok(board.resolved(&self.gateway.static_dir))
    }

    pub fn validate(&self) -> Result<()> {
        self.board()?.validate()?;
        if self.control_node.answer_timeout_ms == 0 {
            return Err(anyhow!("control_node.answer_timeout_ms must be nonzero"));
        }
        if self.control_node.telemetry_capacity == 0 {
            return Err(anyhow!("control_node.telemetry_capacity must be nonzero"));
        }
        if self.waits.tty_detect_timeout_ms == 0 || self.waits.poll_interval_ms == 0 {
            return Err(anyhow!("waits timeouts must be nonzero"));
        }
        if self.control_node.enabled() && self.control_node.baud_rate == 0 {
            return Err(anyhow!("control_node.baud_rate must be nonzero"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gateway: GatewayConfig {
                static_dir: default_static_dir(),
            },
            control_node: ControlNodeConfig {
                port: "/dev/ttyCN".to_string(),
                baud_rate: 500_000,
                measures_mask: default_measures_mask(),
                answer_timeout_ms: default_answer_timeout_ms(),
                telemetry_capacity: default_telemetry_capacity(),
            },
            open_node: OpenNodeConfig {
                board: "st_lrwan1".to_string(),
            },
            boards: default_boards(),
            waits: WaitConfig::default(),
            tools: ToolsConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("nodegate.log".to_string()),
            },
        }
    }
}
