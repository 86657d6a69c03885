//! Service-control restart requests.
//!
//! The process never rebuilds its geometry in place. When the pipeline
//! decides a rebuild is needed it asks the host supervisor (init, or a
//! systemd unit) to restart the service and then exits.

use std::process::Command;

use tracing::{info, warn};
use vncd_core::{RestartRequester, VncdError};

/// Runs a configured command line to request a restart.
#[derive(Debug, Clone)]
pub struct CommandRestarter {
    argv: Vec<String>,
}

impl CommandRestarter {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl RestartRequester for CommandRestarter {
    fn request_restart(&mut self, reason: &str) -> Result<(), VncdError> {
        let Some((program, args)) = self.argv.split_first() else {
            warn!("no restart command configured; exiting without a restart ({reason})");
            return Ok(());
        };

        info!("requesting restart via `{}`: {reason}", self.argv.join(" "));
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|e| VncdError::Restart(format!("{program}: {e}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(VncdError::Restart(format!("{program} exited with {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_a_no_op() {
        let mut r = CommandRestarter::new(Vec::new());
        assert!(r.request_restart("rotation").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_is_checked() {
        let mut ok = CommandRestarter::new(vec!["true".into()]);
        assert!(ok.request_restart("test").is_ok());

        let mut failing = CommandRestarter::new(vec!["false".into()]);
        assert!(matches!(
            failing.request_restart("test"),
            Err(VncdError::Restart(_))
        ));
    }

    #[test]
    fn missing_program_is_an_error() {
        let mut r = CommandRestarter::new(vec!["/nonexistent/vncd-restart".into()]);
        assert!(matches!(r.request_restart("test"), Err(VncdError::Restart(_))));
    }
}
