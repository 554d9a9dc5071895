use thiserror::Error;

/// Errors surfaced by the gateway control plane.
///
/// Expected hardware conditions (a tty that never shows up, a flash that
/// fails) are not errors: lifecycle operations fold them into a failure
/// count instead. The variants here are the hard failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Another operation already holds the per-object guard.
    #[error("resource busy: {resource}")]
    Busy { resource: String },

    /// `send` was called before a packet writer was installed.
    #[error("control node writer is not configured")]
    WriterNotConfigured,

    /// Writing a command to the control node failed.
    #[error("transport write failed: {0}")]
    Transport(#[source] std::io::Error),

    /// A frame could not be built from the given payload.
    #[error("invalid frame: {0}")]
    Frame(String),

    #[error("unknown board type: {0}")]
    UnknownBoard(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    SerialPort(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
