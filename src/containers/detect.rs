//! Working out why the Docker daemon did not answer.
//!
//! A failed connection is either a machine without Docker at all or one
//! where the daemon is simply stopped. The two need different fixes, and the
//! fix is reported as the remediation command of
//! [`ContainerError::DaemonUnavailable`](super::ContainerError).

use crate::drivers::find_executable;

/// Why the container provider cannot reach Docker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonProblem {
    /// No `docker` binary on `PATH`.
    NotInstalled,
    /// The binary exists but the daemon did not answer a ping.
    NotRunning,
}

impl DaemonProblem {
    /// Diagnose a connection that has already failed.
    pub fn diagnose() -> Self {
        Self::from_binary_found(find_executable("docker").is_some())
    }

    fn from_binary_found(found: bool) -> Self {
        if found {
            Self::NotRunning
        } else {
            Self::NotInstalled
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::NotInstalled => "Docker is not installed",
            Self::NotRunning => "Docker is installed but the daemon is not running",
        }
    }

    /// Command that fixes the problem on this machine.
    pub fn fix(self) -> &'static str {
        self.fix_on(std::env::consts::OS)
    }

    /// Command that fixes the problem on `os`, named as in
    /// [`std::env::consts::OS`].
    fn fix_on(self, os: &str) -> &'static str {
        match (self, os) {
            (Self::NotInstalled, "macos") => "brew install --cask docker",
            (Self::NotInstalled, "windows") => "winget install Docker.DockerDesktop",
            (Self::NotInstalled, _) => "curl -fsSL https://get.docker.com | sh",
            (Self::NotRunning, "macos") => "open -a Docker",
            (Self::NotRunning, "windows") => "docker desktop start",
            (Self::NotRunning, _) => "sudo systemctl start docker",
        }
    }
}
