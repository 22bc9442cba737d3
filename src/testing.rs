//! Test doubles for the container runtime and for services.
//!
//! Provides:
//! - [`FakeRuntime`]: an in-memory [`ContainerRuntime`] with call counters
//! - [`StubService`]: a [`Service`] whose probe follows a script
//! - [`ScriptedProbe`]: the script, shareable so tests can count probes
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use forklift::containers::ContainerManager;
//! use forklift::testing::FakeRuntime;
//!
//! let runtime = Arc::new(FakeRuntime::new().with_image("redis"));
//! let manager = ContainerManager::new(runtime.clone());
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

use crate::containers::{ContainerError, ContainerRuntime, ContainerSpec, ContainerStatus};
use crate::error::ConfigError;
use crate::services::{Availability, OverrideValue, Service, ServiceError};

#[derive(Debug, Clone)]
struct FakeContainer {
    port: u16,
    running: bool,
}

/// In-memory container runtime.
///
/// Created containers are stopped until started. A running container
/// forwards its port to the configured host port.
#[derive(Debug)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, FakeContainer>>,
    images: Mutex<HashSet<String>>,
    host_port: u16,
    daemon_down: AtomicBool,
    last_spec: Mutex<Option<ContainerSpec>>,
    created: AtomicU32,
    started: AtomicU32,
    stopped: AtomicU32,
    removed: AtomicU32,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            images: Mutex::new(HashSet::new()),
            host_port: 49153,
            daemon_down: AtomicBool::new(false),
            last_spec: Mutex::new(None),
            created: AtomicU32::new(0),
            started: AtomicU32::new(0),
            stopped: AtomicU32::new(0),
            removed: AtomicU32::new(0),
        }
    }

    /// A runtime whose daemon cannot be reached.
    pub fn unavailable() -> Self {
        let runtime = Self::new();
        runtime.daemon_down.store(true, Ordering::SeqCst);
        runtime
    }

    /// Make an image available locally.
    pub fn with_image(self, image: &str) -> Self {
        self.lock_images().insert(image.to_string());
        self
    }

    /// Host port every running container forwards to.
    pub fn with_host_port(mut self, port: u16) -> Self {
        self.host_port = port;
        self
    }

    /// Pretend a container already exists.
    pub fn with_existing(self, name: &str, port: u16, running: bool) -> Self {
        self.lock_containers()
            .insert(name.to_string(), FakeContainer { port, running });
        self
    }

    pub fn created_count(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn started_count(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped_count(&self) -> u32 {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn removed_count(&self) -> u32 {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn has_container(&self, name: &str) -> bool {
        self.lock_containers().contains_key(name)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.lock_containers().get(name).is_some_and(|c| c.running)
    }

    /// The spec of the most recently created container.
    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.last_spec
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock_containers(&self) -> std::sync::MutexGuard<'_, HashMap<String, FakeContainer>> {
        self.containers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_images(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.images.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_daemon(&self) -> Result<(), ContainerError> {
        if self.daemon_down.load(Ordering::SeqCst) {
            return Err(ContainerError::DaemonUnavailable {
                reason: "fake daemon is down".to_string(),
                fix: None,
            });
        }
        Ok(())
    }

    fn missing(operation: &'static str, name: &str) -> ContainerError {
        ContainerError::Api {
            operation,
            name: name.to_string(),
            reason: "no such container".to_string(),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerStatus>, ContainerError> {
        self.check_daemon()?;
        Ok(self.lock_containers().get(name).map(|c| {
            let mut ports = HashMap::new();
            if c.running {
                ports.insert(c.port, self.host_port);
            }
            ContainerStatus {
                running: c.running,
                ports,
                ip_address: Some("172.17.0.2".to_string()),
            }
        }))
    }

    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
        self.check_daemon()?;
        Ok(self.lock_images().contains(image))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<(), ContainerError> {
        self.check_daemon()?;
        self.lock_containers().insert(
            spec.name.clone(),
            FakeContainer {
                port: spec.port,
                running: false,
            },
        );
        *self.last_spec.lock().unwrap_or_else(|e| e.into_inner()) = Some(spec.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<(), ContainerError> {
        self.check_daemon()?;
        let mut containers = self.lock_containers();
        let container = containers
            .get_mut(name)
            .ok_or_else(|| Self::missing("start", name))?;
        container.running = true;
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<(), ContainerError> {
        self.check_daemon()?;
        if let Some(container) = self.lock_containers().get_mut(name) {
            container.running = false;
        }
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<(), ContainerError> {
        self.check_daemon()?;
        self.lock_containers().remove(name);
        self.removed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One scripted probe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStep {
    Ready,
    Retry,
    Fatal,
    /// An unexpected probe failure.
    Error,
}

/// A probe that replays a script. Once the script runs out the last step
/// repeats; an empty script is always ready.
#[derive(Debug)]
pub struct ScriptedProbe {
    steps: Vec<ProbeStep>,
    calls: AtomicU32,
}

impl ScriptedProbe {
    pub fn new(steps: Vec<ProbeStep>) -> Self {
        Self {
            steps,
            calls: AtomicU32::new(0),
        }
    }

    pub fn always(step: ProbeStep) -> Self {
        Self::new(vec![step])
    }

    /// How many times the probe ran.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> ProbeStep {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        self.steps
            .get(call)
            .or_else(|| self.steps.last())
            .copied()
            .unwrap_or(ProbeStep::Ready)
    }
}

/// A service with a fixed environment and a scripted probe.
///
/// Every override key is accepted and can be read back.
#[derive(Debug)]
pub struct StubService {
    name: &'static str,
    env: BTreeMap<String, String>,
    probe: Arc<ScriptedProbe>,
    values: BTreeMap<String, OverrideValue>,
}

impl StubService {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            env: BTreeMap::new(),
            probe: Arc::new(ScriptedProbe::new(Vec::new())),
            values: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_probe(mut self, probe: Arc<ScriptedProbe>) -> Self {
        self.probe = probe;
        self
    }
}

#[async_trait]
impl Service for StubService {
    fn name(&self) -> &'static str {
        self.name
    }

    fn environment(&self) -> BTreeMap<String, String> {
        self.env.clone()
    }

    async fn check_available(&self) -> Result<Availability, ServiceError> {
        match self.probe.next() {
            ProbeStep::Ready => Ok(Availability::Ready),
            ProbeStep::Retry => Ok(Availability::Retry("not yet".to_string())),
            ProbeStep::Fatal => Ok(Availability::Fatal("never".to_string())),
            ProbeStep::Error => Err(ServiceError::Probe("scripted failure".to_string())),
        }
    }

    fn apply_override(&mut self, key: &str, value: &OverrideValue) -> Result<(), ConfigError> {
        self.values.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn get_override(&self, key: &str) -> Option<OverrideValue> {
        self.values.get(key).cloned()
    }
}
