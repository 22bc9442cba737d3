//! Run the target as a plain subprocess.

use std::process::ExitStatus;

use async_trait::async_trait;
use tokio::process::Command;

use crate::drivers::{Driver, DriverKind, Launch};
use crate::error::DriverError;

/// Runs an executable on this machine with the service environment added
/// to forklift's own.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDriver;

#[async_trait]
impl Driver for DirectDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Direct
    }

    async fn run(&self, launch: &Launch) -> Result<i32, DriverError> {
        let mut command = Command::new(&launch.target);
        command.args(&launch.args).envs(&launch.environment);
        supervise(command, &launch.target).await
    }
}

/// Spawn `command` with inherited stdio and wait for it to exit.
///
/// The child shares forklift's terminal, so Ctrl-C reaches it directly;
/// forklift keeps waiting so that cleanup can run once the child is gone.
/// A second Ctrl-C kills the child.
pub(crate) async fn supervise(mut command: Command, program: &str) -> Result<i32, DriverError> {
    tracing::debug!("Running {:?}", command.as_std());
    let mut child = command.spawn().map_err(|source| DriverError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let mut interrupted = false;
    let status = loop {
        tokio::select! {
            status = child.wait() => break status?,
            signal = tokio::signal::ctrl_c() => {
                signal?;
                if interrupted {
                    tracing::warn!("Killing {}", program);
                    child.start_kill()?;
                } else {
                    interrupted = true;
                    eprintln!("Waiting for {program} to exit (Ctrl-C again to kill it)");
                }
            }
        }
    };

    Ok(exit_code(status))
}

/// The exit code, or `128 + signal` when the child was killed by a signal.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
