//! Errors raised by the server binary around the capture core.

use thiserror::Error;
use vncd_core::VncdError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The capture pipeline failed.
    #[error(transparent)]
    Core(#[from] VncdError),

    /// Socket or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// The configuration could not be rendered.
    #[error("cannot serialise configuration: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// A `host[:port]` argument did not parse.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A client broke the RFB protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl From<ServerError> for VncdError {
    fn from(e: ServerError) -> Self {
        match e {
            ServerError::Core(inner) => inner,
            ServerError::Io(io) => VncdError::Io(io),
            other => VncdError::Bridge(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_pass_through() {
        let e = ServerError::from(VncdError::EmptySnapshot);
        assert_eq!(e.to_string(), VncdError::EmptySnapshot.to_string());
        assert!(matches!(VncdError::from(e), VncdError::EmptySnapshot));
    }

    #[test]
    fn protocol_errors_become_bridge_errors() {
        let e: VncdError = ServerError::Protocol("bad version".into()).into();
        assert!(matches!(e, VncdError::Bridge(ref m) if m.contains("bad version")));
    }
}
