//! Execution back ends.
//!
//! A driver launches the target with the environment describing every
//! provisioned service. The environment is built in layers, later ones
//! winning:
//!
//! 1. the base environment (`ENVIRONMENT`, `DEVNAME`, `SITE_*`)
//! 2. each service, in the order it was requested
//! 3. variables given explicitly in configuration

pub mod direct;
pub mod docker;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::DriverError;
use crate::services::ServiceInstance;

pub use direct::DirectDriver;
pub use docker::{DockerDriver, DockerOptions};

/// Which driver runs the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(try_from = "String")]
pub enum DriverKind {
    /// Run an executable on this machine.
    Direct,
    /// `docker run` an image.
    Docker,
}

impl DriverKind {
    /// Pick a driver for `target`: direct if it is an executable on `PATH`
    /// or an existing file, docker otherwise.
    pub fn detect(target: &str) -> Self {
        if find_executable(target).is_some() || Path::new(target).is_file() {
            Self::Direct
        } else {
            Self::Docker
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Docker => "docker",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "docker" => Ok(Self::Docker),
            _ => Err(format!(
                "invalid driver '{}', expected 'direct' or 'docker'",
                s
            )),
        }
    }
}

impl TryFrom<String> for DriverKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

/// What to run and with which environment.
#[derive(Debug, Clone)]
pub struct Launch {
    /// Executable or image.
    pub target: String,
    pub args: Vec<String>,
    pub environment: BTreeMap<String, String>,
    /// Port the application is expected to serve on.
    pub serve_port: u16,
}

/// A way of running the target.
#[async_trait]
pub trait Driver: Send + Sync {
    fn kind(&self) -> DriverKind;

    /// Adjust the provisioned services before the environment is built.
    fn prepare(&self, _services: &mut [ServiceInstance]) -> Result<(), DriverError> {
        Ok(())
    }

    /// Run the target to completion and return its exit code.
    async fn run(&self, launch: &Launch) -> Result<i32, DriverError>;
}

/// Build the driver for `kind`.
pub fn driver_for(kind: DriverKind, docker: DockerOptions) -> Box<dyn Driver> {
    match kind {
        DriverKind::Direct => Box::new(DirectDriver),
        DriverKind::Docker => Box::new(DockerDriver::new(docker)),
    }
}

/// Search `PATH` for an executable named `name`.
///
/// Names containing a path separator are checked as given.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    if name.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// A TCP port nothing is listening on right now.
pub fn free_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("0.0.0.0", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Login name of the current user.
pub fn login_name() -> String {
    ["USER", "LOGNAME", "USERNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Variables every target gets, whatever services it uses.
pub fn base_environment(serve_port: u16) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("ENVIRONMENT".to_string(), "dev_local".to_string()),
        ("DEVNAME".to_string(), login_name()),
        ("SITE_PROTOCOL".to_string(), "http".to_string()),
        ("SITE_DOMAIN".to_string(), format!("localhost:{serve_port}")),
    ])
}

/// The full environment for the target.
pub fn environment(
    serve_port: u16,
    services: &[ServiceInstance],
    extra: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env = base_environment(serve_port);
    for service in services {
        env.extend(service.environment());
    }
    env.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}
