use std::path::PathBuf;

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// A state frame had the wrong length or was not valid hex
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to bind gadget to UDC {udc}: {reason}")]
    BindFailure { udc: String, reason: String },

    /// Reported by the serial bridge, not raised locally
    #[error("Remote reported buffer overrun")]
    BufferOverrun,

    #[error("Remote is not responding")]
    RemoteUnresponsive,

    /// Teardown stopped because an endpoint file is still held open
    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("ConfigFS {op} failed on {}: {source}", path.display())]
    ConfigFs {
        path: PathBuf,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Serial error [{port}]: {reason}")]
    Serial { port: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the relay has to stop when this error surfaces
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AppError::MalformedFrame(_)
                | AppError::BufferOverrun
                | AppError::RemoteUnresponsive
                | AppError::ResourceBusy(_)
                | AppError::ProtocolViolation(_)
        )
    }

    pub(crate) fn configfs(path: impl Into<PathBuf>, op: &'static str, source: std::io::Error) -> Self {
        AppError::ConfigFs {
            path: path.into(),
            op,
            source,
        }
    }
}

impl From<nix::Error> for AppError {
    fn from(e: nix::Error) -> Self {
        AppError::Io(std::io::Error::from(e))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!AppError::BufferOverrun.is_fatal());
        assert!(!AppError::ResourceBusy("ep1".into()).is_fatal());
        assert!(!AppError::MalformedFrame("odd length".into()).is_fatal());
        assert!(AppError::DeviceNotFound("/dev/ttyUSB0".into()).is_fatal());
        assert!(AppError::BindFailure {
            udc: "dummy_udc.0".into(),
            reason: "busy".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_configfs_error_message() {
        let err = AppError::configfs(
            "/sys/kernel/config/usb_gadget/padlink",
            "rmdir",
            std::io::Error::from_raw_os_error(libc::ENOTEMPTY),
        );
        let msg = err.to_string();
        assert!(msg.contains("rmdir"));
        assert!(msg.contains("/sys/kernel/config/usb_gadget/padlink"));
    }
}
