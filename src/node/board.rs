//! Board descriptors: the per-board-type data the generic lifecycle runs on.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Self-tests every board must offer.
pub const MANDATORY_AUTOTESTS: [&str; 2] = ["echo", "get_time"];

/// How `status()` judges a board that is not running an experiment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCheck {
    /// Board cannot be probed while unpowered; report success.
    #[default]
    Assume,
    /// Board is healthy when its tty is enumerated.
    DevicePresent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardDescriptor {
    /// Board type, e.g. `st_lrwan1`.
    pub name: String,
    pub tty: PathBuf,
    pub baudrate: u32,
    pub fw_idle: PathBuf,
    pub fw_autotest: PathBuf,
    /// OpenOCD configuration file used to flash, reset and debug the board.
    pub openocd_cfg: PathBuf,
    pub autotest: Vec<String>,
    #[serde(default)]
    pub status_check: StatusCheck,
}

impl BoardDescriptor {
    /// STM32 LRWAN1 discovery board, files looked up under `static_dir`.
    pub fn st_lrwan1(static_dir: &Path) -> Self {
        Self {
            name: "st_lrwan1".to_string(),
            tty: PathBuf::from("/dev/iotlab/ttyON_ST_LRWAN1"),
            baudrate: 115_200,
            fw_idle: static_dir.join("st_lrwan1_idle.elf"),
            fw_autotest: static_dir.join("st_lrwan1_autotest.elf"),
            openocd_cfg: static_dir.join("iot-lab-st-lrwan1.cfg"),
            autotest: ["echo", "get_time", "leds_on", "leds_off"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            status_check: StatusCheck::Assume,
        }
    }

    /// Copy with relative firmware and tool paths anchored at `static_dir`.
    pub fn resolved(&self, static_dir: &Path) -> Self {
        let anchor = |p: &Path| {
            if p.is_relative() {
                static_dir.join(p)
            } else {
                p.to_path_buf()
            }
        };
        Self {
            fw_idle: anchor(&self.fw_idle),
            fw_autotest: anchor(&self.fw_autotest),
            openocd_cfg: anchor(&self.openocd_cfg),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::Config("board name is empty".to_string()));
        }
        if self.baudrate == 0 {
            return Err(GatewayError::Config(format!("{}: baudrate must be nonzero", self.name)));
        }
        for required in MANDATORY_AUTOTESTS {
            if !self.supports_autotest(required) {
                return Err(GatewayError::Config(format!(
                    "{}: mandatory autotest '{}' missing",
                    self.name, required
                )));
            }
        }
        Ok(())
    }

    pub fn supports_autotest(&self, name: &str) -> bool {
        self.autotest.iter().any(|t| t == name)
    }

    /// Firmware to flash: the given one, or the idle image.
    pub fn firmware_or_idle<'a>(&'a self, firmware: Option<&'a Path>) -> &'a Path {
        firmware.unwrap_or(self.fw_idle.as_path())
    }

    /// Look a board up by type name in a descriptor table.
    pub fn find<'a>(boards: &'a [BoardDescriptor], name: &str) -> Result<&'a BoardDescriptor> {
        boards
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| GatewayError::UnknownBoard(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn st_lrwan1_is_valid() {
        let board = BoardDescriptor::st_lrwan1(Path::new("/var/lib/gateway_code/static"));
        board.validate().expect("valid");
        assert_eq!(
            board.fw_idle,
            Path::new("/var/lib/gateway_code/static/st_lrwan1_idle.elf")
        );
        assert!(board.supports_autotest("leds_on"));
        assert!(!board.supports_autotest("radio_ping_pong"));
    }

    #[test]
    fn missing_mandatory_autotest_is_rejected() {
        let mut board = BoardDescriptor::st_lrwan1(Path::new("/static"));
        board.autotest.retain(|t| t != "get_time");
        let err = board.validate().unwrap_err();
        assert!(err.to_string().contains("get_time"), "{}", err);
    }

    #[test]
    fn idle_firmware_substituted_when_none() {
        let board = BoardDescriptor::st_lrwan1(Path::new("/static"));
        assert_eq!(board.firmware_or_idle(None), Path::new("/static/st_lrwan1_idle.elf"));
        let custom = Path::new("/tmp/exp.elf");
        assert_eq!(board.firmware_or_idle(Some(custom)), custom);
    }

    #[test]
    fn relative_paths_anchor_at_static_dir() {
        let mut board = BoardDescriptor::st_lrwan1(Path::new(""));
        board.fw_autotest = PathBuf::from("/opt/fw/autotest.elf");
        let resolved = board.resolved(Path::new("/static"));
        assert_eq!(resolved.fw_idle, Path::new("/static/st_lrwan1_idle.elf"));
        assert_eq!(resolved.fw_autotest, Path::new("/opt/fw/autotest.elf"));
        assert_eq!(resolved.tty, board.tty);
    }

    #[test]
    fn find_reports_unknown_board() {
        let boards = vec![BoardDescriptor::st_lrwan1(Path::new("/static"))];
        assert!(BoardDescriptor::find(&boards, "st_lrwan1").is_ok());
        assert!(matches!(
            BoardDescriptor::find(&boards, "m3"),
            Err(GatewayError::UnknownBoard(name)) if name == "m3"
        ));
    }

    #[test]
    fn descriptor_reads_from_toml() {
        let board: BoardDescriptor = toml::from_str(
            r#"
            name = "custom"
            tty = "/dev/ttyON"
            baudrate = 500000
            fw_idle = "idle.elf"
            fw_autotest = "autotest.elf"
            openocd_cfg = "custom.cfg"
            autotest = ["echo", "get_time"]
            status_check = "device_present"
            "#,
        )
        .expect("parse");
        assert_eq!(board.status_check, StatusCheck::DevicePresent);
        board.validate().expect("valid");
    }
}
