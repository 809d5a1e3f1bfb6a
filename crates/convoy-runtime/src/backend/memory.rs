//! In-process backend that simulates a container engine.
//!
//! Every call is recorded so callers can assert on exactly what the
//! reconciler asked the runtime to do. Exit codes, logs, and failures can
//! be scripted per container-name prefix.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use convoy_common::error::{ConvoyError, Result};

use super::{ContainerBackend, CreateRequest, InspectInfo, normalize_port};

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// `image_exists(image)`.
    ImageExists(String),
    /// `pull_image(image)`.
    PullImage(String),
    /// `container_exists(name)`.
    ContainerExists(String),
    /// `container_running(name)`.
    ContainerRunning(String),
    /// `inspect(name)`.
    Inspect(String),
    /// `create(request)`.
    Create(CreateRequest),
    /// `start(name)`.
    Start(String),
    /// `stop(name, timeout)`.
    Stop(String, Duration),
    /// `remove(name)`.
    Remove(String),
    /// `wait_for_exit(name, timeout)`.
    WaitForExit(String),
    /// `fetch_logs(name)`.
    FetchLogs(String),
}

impl BackendCall {
    /// Returns `true` for calls that change runtime state.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::PullImage(_) | Self::Create(_) | Self::Start(_) | Self::Stop(..) | Self::Remove(_)
        )
    }

    /// Name of the container or image the call targeted.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Create(request) => &request.name,
            Self::ImageExists(t)
            | Self::PullImage(t)
            | Self::ContainerExists(t)
            | Self::ContainerRunning(t)
            | Self::Inspect(t)
            | Self::Start(t)
            | Self::Stop(t, _)
            | Self::Remove(t)
            | Self::WaitForExit(t)
            | Self::FetchLogs(t) => t,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    images: BTreeSet<String>,
    containers: BTreeMap<String, InspectInfo>,
    calls: Vec<BackendCall>,
    exit_codes: Vec<(String, i64)>,
    logs: Vec<(String, String)>,
    failures: Vec<(&'static str, String)>,
}

impl State {
    fn scripted<'a, T>(entries: &'a [(String, T)], name: &str) -> Option<&'a T> {
        entries
            .iter()
            .rev()
            .find(|(prefix, _)| name.starts_with(prefix.as_str()))
            .map(|(_, value)| value)
    }

    fn check_failure(&self, operation: &'static str, target: &str) -> Result<()> {
        let injected = self
            .failures
            .iter()
            .any(|(op, prefix)| *op == operation && target.starts_with(prefix.as_str()));
        if injected {
            return Err(ConvoyError::runtime(target, operation, "injected failure"));
        }
        Ok(())
    }

    fn container_mut(&mut self, operation: &'static str, name: &str) -> Result<&mut InspectInfo> {
        self.containers
            .get_mut(name)
            .ok_or_else(|| ConvoyError::runtime(name, operation, "no such container"))
    }
}

/// Simulated container engine.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl InMemoryBackend {
    /// Creates an engine with no images and no containers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an image as present locally.
    #[must_use]
    pub fn with_image(self, image: impl Into<String>) -> Self {
        let _ = self.lock().images.insert(image.into());
        self
    }

    /// Adds an existing container created from `image`.
    #[must_use]
    pub fn with_container(self, name: impl Into<String>, image: impl Into<String>, running: bool) -> Self {
        let image = image.into();
        {
            let mut state = self.lock();
            let _ = state.images.insert(image.clone());
            let _ = state.containers.insert(
                name.into(),
                InspectInfo {
                    image,
                    running,
                    ..InspectInfo::default()
                },
            );
        }
        self
    }

    /// Adds an existing container with fully observed configuration.
    #[must_use]
    pub fn with_inspected(self, name: impl Into<String>, info: InspectInfo) -> Self {
        {
            let mut state = self.lock();
            let _ = state.images.insert(info.image.clone());
            let _ = state.containers.insert(name.into(), info);
        }
        self
    }

    /// Containers whose name starts with `prefix` exit with `code`.
    #[must_use]
    pub fn with_exit_code(self, prefix: impl Into<String>, code: i64) -> Self {
        self.lock().exit_codes.push((prefix.into(), code));
        self
    }

    /// Containers whose name starts with `prefix` print `logs`.
    #[must_use]
    pub fn with_logs(self, prefix: impl Into<String>, logs: impl Into<String>) -> Self {
        self.lock().logs.push((prefix.into(), logs.into()));
        self
    }

    /// `operation` fails for every target starting with `prefix`.
    ///
    /// Operation names match those carried by
    /// [`ConvoyError::Runtime`]: `pull`, `create`, `start`, `stop`,
    /// `remove`, `wait`, `logs`, `inspect`. The pseudo-operation `timeout`
    /// makes bounded waits fail with [`ConvoyError::HookTimeout`].
    #[must_use]
    pub fn failing(self, operation: &'static str, prefix: impl Into<String>) -> Self {
        self.lock().failures.push((operation, prefix.into()));
        self
    }

    /// All calls so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Calls that changed runtime state.
    #[must_use]
    pub fn mutating_calls(&self) -> Vec<BackendCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.is_mutating())
            .cloned()
            .collect()
    }

    /// Names of existing containers.
    #[must_use]
    pub fn container_names(&self) -> Vec<String> {
        self.lock().containers.keys().cloned().collect()
    }

    /// Observed state of a container, if it exists.
    #[must_use]
    pub fn container(&self, name: &str) -> Option<InspectInfo> {
        self.lock().containers.get(name).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, call: BackendCall) -> MutexGuard<'_, State> {
        let mut state = self.lock();
        state.calls.push(call);
        state
    }
}

impl ContainerBackend for InMemoryBackend {
    fn image_exists(&self, image: &str) -> Result<bool> {
        let state = self.record(BackendCall::ImageExists(image.to_string()));
        Ok(state.images.contains(image))
    }

    fn pull_image(&self, image: &str) -> Result<()> {
        let mut state = self.record(BackendCall::PullImage(image.to_string()));
        state.check_failure("pull", image)?;
        let _ = state.images.insert(image.to_string());
        Ok(())
    }

    fn container_exists(&self, name: &str) -> Result<bool> {
        let state = self.record(BackendCall::ContainerExists(name.to_string()));
        Ok(state.containers.contains_key(name))
    }

    fn container_running(&self, name: &str) -> Result<bool> {
        let mut state = self.record(BackendCall::ContainerRunning(name.to_string()));
        Ok(state.container_mut("inspect", name)?.running)
    }

    fn inspect(&self, name: &str) -> Result<InspectInfo> {
        let mut state = self.record(BackendCall::Inspect(name.to_string()));
        state.check_failure("inspect", name)?;
        Ok(state.container_mut("inspect", name)?.clone())
    }

    fn create(&self, request: &CreateRequest) -> Result<()> {
        let mut state = self.record(BackendCall::Create(request.clone()));
        state.check_failure("create", &request.name)?;
        if state.containers.contains_key(&request.name) {
            return Err(ConvoyError::runtime(&request.name, "create", "name already in use"));
        }
        let info = InspectInfo {
            image: request.image.clone(),
            running: false,
            env: Some(request.env.clone()),
            exposed_ports: Some(request.exposed_ports.iter().map(|p| normalize_port(p)).collect()),
            volumes: Some(request.volumes.iter().cloned().collect()),
            links: Some(request.link_specs()),
        };
        let _ = state.containers.insert(request.name.clone(), info);
        Ok(())
    }

    fn start(&self, name: &str) -> Result<()> {
        let mut state = self.record(BackendCall::Start(name.to_string()));
        state.check_failure("start", name)?;
        state.container_mut("start", name)?.running = true;
        Ok(())
    }

    fn stop(&self, name: &str, timeout: Duration) -> Result<()> {
        let mut state = self.record(BackendCall::Stop(name.to_string(), timeout));
        state.check_failure("stop", name)?;
        state.container_mut("stop", name)?.running = false;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let mut state = self.record(BackendCall::Remove(name.to_string()));
        state.check_failure("remove", name)?;
        if state.container_mut("remove", name)?.running {
            return Err(ConvoyError::runtime(name, "remove", "container is running"));
        }
        let _ = state.containers.remove(name);
        Ok(())
    }

    fn wait_for_exit(&self, name: &str, timeout: Option<Duration>) -> Result<i64> {
        let mut state = self.record(BackendCall::WaitForExit(name.to_string()));
        state.check_failure("wait", name)?;
        if let Some(timeout) = timeout {
            if state.failures.iter().any(|(op, p)| *op == "timeout" && name.starts_with(p.as_str())) {
                return Err(ConvoyError::HookTimeout {
                    container: name.to_string(),
                    timeout,
                });
            }
        }
        let code = State::scripted(&state.exit_codes, name).copied().unwrap_or(0);
        state.container_mut("wait", name)?.running = false;
        Ok(code)
    }

    fn fetch_logs(&self, name: &str) -> Result<String> {
        let mut state = self.record(BackendCall::FetchLogs(name.to_string()));
        state.check_failure("logs", name)?;
        let _ = state.container_mut("logs", name)?;
        Ok(State::scripted(&state.logs, name).cloned().unwrap_or_default())
    }
}
