//! Reconciliation of the host's containers against a manifest.
//!
//! Containers are processed one at a time in dependency order. For each,
//! the observed state is read fresh from the backend and the transitions
//! needed to reach the desired state are applied:
//!
//! 1. forced pull: pull, then remove any existing container;
//! 2. otherwise, if the deployed container drifted: remove it;
//! 3. if absent: pull a missing image, run pre-start hooks, create;
//! 4. if stopped: start; if running and a restart is forced: restart.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use convoy_common::constants::{DEFAULT_STOP_TIMEOUT_SECS, ONE_OFF_CONTAINER_INFIX};
use convoy_common::error::{ConvoyError, Result};
use convoy_common::types::ContainerState;
use convoy_manifest::environment::{self, Fetch, ResolvedEnvironment};
use convoy_manifest::{ContainerSpec, Manifest, graph, validator};

use crate::backend::{ContainerBackend, CreateRequest};
use crate::drift::{Drift, DriftComparator, ImageComparator};
use crate::hooks::{self, HookReport, PreparedHook, TransientLimits, TransientOutput};
use crate::options::{self, HostContext};
use crate::status::{self, StatusReport};

/// Per-run switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFlags {
    /// Pull every image and recreate its container.
    pub force_pull: bool,
    /// Restart containers that are already running and up to date.
    pub force_restart: bool,
    /// Reconcile only this container.
    pub target: Option<String>,
}

/// Timeouts used by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Grace period before a stopping container is killed.
    pub stop_timeout: Duration,
    /// Deadline for each pre-start hook; `None` waits indefinitely.
    pub hook_timeout: Option<Duration>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
            hook_timeout: None,
        }
    }
}

/// A lifecycle transition applied to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The image was pulled.
    Pull,
    /// The container was stopped.
    Stop,
    /// The container was removed.
    Remove,
    /// The container was created.
    Create,
    /// The container was started.
    Start,
    /// The running container was restarted.
    Restart,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pull => "pull",
            Self::Stop => "stop",
            Self::Remove => "remove",
            Self::Create => "create",
            Self::Start => "start",
            Self::Restart => "restart",
        };
        f.write_str(name)
    }
}

/// What reconciliation did to one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerReport {
    /// Container name.
    pub name: String,
    /// State observed before any action.
    pub initial: ContainerState,
    /// Actions applied, in order.
    pub actions: Vec<Action>,
    /// Drift reason, if the container was recreated because of drift.
    pub drift: Option<String>,
    /// Pre-start hooks that ran.
    pub hooks: Vec<HookReport>,
}

impl ContainerReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            initial: ContainerState::Absent,
            actions: Vec::new(),
            drift: None,
            hooks: Vec::new(),
        }
    }

    /// Returns `true` if nothing had to change.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Result of reconciling one container within a run.
#[derive(Debug)]
pub enum ContainerOutcome {
    /// Reconciliation finished.
    Reconciled(ContainerReport),
    /// Reconciliation aborted.
    Failed {
        /// Container name.
        name: String,
        /// Why it failed.
        error: ConvoyError,
    },
    /// Not attempted because a dependency failed.
    Skipped {
        /// Container name.
        name: String,
        /// The failed container it (transitively) links to.
        blocked_by: String,
    },
}

impl ContainerOutcome {
    /// Container name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Reconciled(report) => &report.name,
            Self::Failed { name, .. } | Self::Skipped { name, .. } => name,
        }
    }

    /// Returns `true` unless the container failed or was skipped.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Reconciled(_))
    }
}

/// Summary of a reconciliation run.
#[derive(Debug)]
pub struct ReconcileReport {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// One outcome per processed container, in execution order.
    pub outcomes: Vec<ContainerOutcome>,
}

impl ReconcileReport {
    /// Returns `true` if every processed container was reconciled.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(ContainerOutcome::is_success)
    }

    /// Outcomes that are not successes.
    pub fn failures(&self) -> impl Iterator<Item = &ContainerOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// Everything needed to reconcile one container, computed before the
/// runtime is touched.
struct Prepared<'m> {
    spec: &'m ContainerSpec,
    request: CreateRequest,
    hooks: Vec<PreparedHook>,
}

/// Converges the host's containers to a manifest.
pub struct Reconciler<'a> {
    backend: &'a dyn ContainerBackend,
    fetcher: &'a dyn Fetch,
    host: HostContext,
    comparator: Box<dyn DriftComparator + 'a>,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler that detects drift by image only.
    #[must_use]
    pub fn new(backend: &'a dyn ContainerBackend, fetcher: &'a dyn Fetch, host: HostContext) -> Self {
        Self {
            backend,
            fetcher,
            host,
            comparator: Box::new(ImageComparator),
            options: ReconcileOptions::default(),
        }
    }

    /// Replaces the drift comparator.
    #[must_use]
    pub fn with_comparator(mut self, comparator: impl DriftComparator + 'a) -> Self {
        self.comparator = Box::new(comparator);
        self
    }

    /// Replaces the timeouts.
    #[must_use]
    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    const fn limits(&self) -> TransientLimits {
        TransientLimits {
            wait: self.options.hook_timeout,
            stop: self.options.stop_timeout,
        }
    }

    /// Validates the manifest and returns its execution order.
    ///
    /// Never touches the runtime.
    ///
    /// # Errors
    ///
    /// Returns manifest, environment-function, or cycle errors.
    pub fn plan(&self, manifest: &Manifest) -> Result<Vec<String>> {
        validator::validate(manifest)?;
        graph::execution_order(manifest)
    }

    /// Reconciles every container (or only `flags.target`).
    ///
    /// Validation, ordering, environment resolution (pre-start hook overlays
    /// included), and option normalization all happen before the first
    /// runtime call, so a bad manifest or an unreachable environment source
    /// leaves the host untouched. After that, a container that
    /// fails is recorded and every container linking to it is skipped;
    /// unrelated containers still run.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures detected before the runtime is
    /// touched. Runtime failures are reported in the [`ReconcileReport`].
    pub fn reconcile(&self, manifest: &Manifest, flags: &RunFlags) -> Result<ReconcileReport> {
        let started_at = Utc::now();
        let order = self.plan(manifest)?;

        let selected: Vec<&str> = match flags.target.as_deref() {
            Some(target) if manifest.contains(target) => vec![target],
            Some(target) => {
                return Err(ConvoyError::NotFound {
                    kind: "container",
                    id: target.to_string(),
                });
            }
            None => order.iter().map(String::as_str).collect(),
        };

        let prepared = selected
            .iter()
            .filter_map(|name| manifest.get(name))
            .map(|spec| self.prepare(spec))
            .collect::<Result<Vec<_>>>()?;

        let mut blocked: BTreeMap<String, String> = BTreeMap::new();
        let mut outcomes = Vec::with_capacity(prepared.len());
        for item in &prepared {
            let name = &item.spec.name;
            if let Some(blocker) = blocked.get(name) {
                tracing::warn!(container = %name, blocked_by = %blocker, "skipping: dependency failed");
                outcomes.push(ContainerOutcome::Skipped {
                    name: name.clone(),
                    blocked_by: blocker.clone(),
                });
                continue;
            }
            match self.reconcile_prepared(item, flags) {
                Ok(report) => outcomes.push(ContainerOutcome::Reconciled(report)),
                Err(error) => {
                    tracing::error!(container = %name, %error, "reconciliation failed");
                    for dependent in graph::dependents_of(manifest, name) {
                        let _ = blocked.entry(dependent).or_insert_with(|| name.clone());
                    }
                    outcomes.push(ContainerOutcome::Failed {
                        name: name.clone(),
                        error,
                    });
                }
            }
        }

        Ok(ReconcileReport {
            started_at,
            finished_at: Utc::now(),
            outcomes,
        })
    }

    /// Reconciles a single container whose dependencies are already running.
    ///
    /// # Errors
    ///
    /// Returns environment, configuration, or runtime errors for this container.
    pub fn reconcile_container(&self, spec: &ContainerSpec, flags: &RunFlags) -> Result<ContainerReport> {
        let prepared = self.prepare(spec)?;
        self.reconcile_prepared(&prepared, flags)
    }

    /// Reports the state of every manifest container without changing anything.
    ///
    /// # Errors
    ///
    /// Returns manifest or cycle errors, or the first runtime query failure.
    pub fn status(&self, manifest: &Manifest) -> Result<StatusReport> {
        let order = self.plan(manifest)?;
        status::check_status(self.backend, &order)
    }

    /// Runs a command in a throwaway copy of a manifest container.
    ///
    /// The copy gets the container's image, resolved environment, hostname,
    /// volumes, links, and network, but publishes no ports. It is removed
    /// when the command finishes, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ConvoyError::NotFound`] for unknown containers, and
    /// environment, configuration, or runtime errors.
    pub fn run_once(&self, manifest: &Manifest, name: &str, command: &[String]) -> Result<TransientOutput> {
        validator::validate(manifest)?;
        let spec = manifest.get(name).ok_or_else(|| ConvoyError::NotFound {
            kind: "container",
            id: name.to_string(),
        })?;
        let (_, primary) = self.primary_request(spec)?;
        self.ensure_image(&spec.image)?;

        let request = CreateRequest {
            name: hooks::transient_name(name, ONE_OFF_CONTAINER_INFIX),
            command: command.to_vec(),
            port_bindings: BTreeMap::new(),
            exposed_ports: Vec::new(),
            ..primary
        };
        tracing::info!(container = %name, transient = %request.name, ?command, "running one-off command");
        hooks::run_transient(self.backend, &request, self.limits())
    }

    fn primary_request(&self, spec: &ContainerSpec) -> Result<(ResolvedEnvironment, CreateRequest)> {
        let env = environment::resolve_environment(&spec.name, &spec.environment, self.fetcher)?;
        let request = options::build_create_request(spec, &env, &self.host)?;
        Ok((env, request))
    }

    /// Resolves the container and every hook overlay; makes no runtime call.
    fn prepare<'m>(&self, spec: &'m ContainerSpec) -> Result<Prepared<'m>> {
        let (env, request) = self.primary_request(spec)?;
        let hooks = hooks::prepare_pre_start_hooks(self.fetcher, spec, &env, &request)?;
        Ok(Prepared { spec, request, hooks })
    }

    fn reconcile_prepared(&self, prepared: &Prepared<'_>, flags: &RunFlags) -> Result<ContainerReport> {
        let spec = prepared.spec;
        let name = spec.name.as_str();
        let mut report = ContainerReport::new(name);

        let observed = if self.backend.container_exists(name)? {
            Some(self.backend.inspect(name)?)
        } else {
            None
        };
        let mut state = observed.as_ref().map_or(ContainerState::Absent, |info| {
            ContainerState::from_flags(true, info.running)
        });
        report.initial = state;
        tracing::debug!(container = %name, %state, "observed");

        if flags.force_pull {
            self.pull(&spec.image, &mut report)?;
            if state != ContainerState::Absent {
                self.remove_existing(name, state, &mut report)?;
                state = ContainerState::Absent;
            }
        } else if let Some(info) = &observed {
            if let Drift::Detected(reason) = self.comparator.compare(&prepared.request, info) {
                tracing::info!(container = %name, %reason, "configuration drift; recreating");
                report.drift = Some(reason);
                self.remove_existing(name, state, &mut report)?;
                state = ContainerState::Absent;
            }
        }

        if state == ContainerState::Absent {
            if !report.actions.contains(&Action::Pull) && !self.backend.image_exists(&spec.image)? {
                self.pull(&spec.image, &mut report)?;
            }
            report.hooks =
                hooks::run_pre_start_hooks(self.backend, name, &prepared.hooks, self.limits())?;
            tracing::info!(container = %name, image = %spec.image, "creating container");
            self.backend.create(&prepared.request)?;
            report.actions.push(Action::Create);
            state = ContainerState::Stopped;
        }

        match state {
            ContainerState::Stopped => {
                tracing::info!(container = %name, "starting container");
                self.backend.start(name)?;
                report.actions.push(Action::Start);
            }
            ContainerState::Running if flags.force_restart => {
                tracing::info!(
                    container = %name,
                    grace_secs = self.options.stop_timeout.as_secs(),
                    "restarting container"
                );
                self.backend.stop(name, self.options.stop_timeout)?;
                self.backend.start(name)?;
                report.actions.push(Action::Restart);
            }
            ContainerState::Running => {
                tracing::info!(container = %name, "container up to date");
            }
            ContainerState::Absent => {}
        }
        Ok(report)
    }

    fn ensure_image(&self, image: &str) -> Result<()> {
        if !self.backend.image_exists(image)? {
            tracing::info!(image, "pulling missing image");
            self.backend.pull_image(image)?;
        }
        Ok(())
    }

    fn pull(&self, image: &str, report: &mut ContainerReport) -> Result<()> {
        tracing::info!(container = %report.name, image, "pulling image");
        self.backend.pull_image(image)?;
        report.actions.push(Action::Pull);
        Ok(())
    }

    fn remove_existing(&self, name: &str, state: ContainerState, report: &mut ContainerReport) -> Result<()> {
        if state == ContainerState::Running {
            tracing::info!(container = %name, "stopping container");
            self.backend.stop(name, self.options.stop_timeout)?;
            report.actions.push(Action::Stop);
        }
        tracing::info!(container = %name, "removing container");
        self.backend.remove(name)?;
        report.actions.push(Action::Remove);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use convoy_manifest::model::{Command, EnvValue, PreStartHook};

    use super::*;
    use crate::backend::memory::{BackendCall, InMemoryBackend};
    use crate::drift::StructuredComparator;

    struct StaticFetcher;

    impl Fetch for StaticFetcher {
        fn fetch(&self, location: &str) -> Result<String> {
            match location {
                "http://x/secret" => Ok("hunter2".into()),
                other => Err(ConvoyError::EnvironmentFetch {
                    location: other.into(),
                    message: "HTTP 404 Not Found".into(),
                }),
            }
        }
    }

    fn host() -> HostContext {
        HostContext::new("node-7", Some("use1a".into()))
    }

    fn manifest(specs: Vec<ContainerSpec>) -> Manifest {
        let mut manifest = Manifest::new();
        for spec in specs {
            manifest.insert(spec).expect("unique");
        }
        manifest
    }

    fn linked(name: &str, image: &str, deps: &[&str]) -> ContainerSpec {
        let mut spec = ContainerSpec::new(name, image);
        for dep in deps {
            let _ = spec.links.insert((*dep).to_string(), None);
        }
        spec
    }

    fn mutating_names(backend: &InMemoryBackend) -> Vec<String> {
        backend
            .mutating_calls()
            .iter()
            .map(|call| {
                let verb = match call {
                    BackendCall::PullImage(_) => "pull",
                    BackendCall::Create(_) => "create",
                    BackendCall::Start(_) => "start",
                    BackendCall::Stop(..) => "stop",
                    BackendCall::Remove(_) => "remove",
                    _ => "query",
                };
                format!("{verb}:{}", call.target())
            })
            .collect()
    }

    #[test]
    fn running_matching_container_is_untouched() {
        let backend = InMemoryBackend::new().with_container("web", "nginx:1", true);
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let report = reconciler
            .reconcile(&manifest(vec![ContainerSpec::new("web", "nginx:1")]), &RunFlags::default())
            .expect("reconcile");

        assert!(report.is_success());
        assert!(backend.mutating_calls().is_empty());
        match &report.outcomes[0] {
            ContainerOutcome::Reconciled(r) => assert!(r.is_unchanged()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn absent_container_is_created_and_started() {
        let backend = InMemoryBackend::new().with_image("nginx:1");
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let report = reconciler
            .reconcile_container(&ContainerSpec::new("web", "nginx:1"), &RunFlags::default())
            .expect("reconcile");

        assert_eq!(report.initial, ContainerState::Absent);
        assert_eq!(report.actions, vec![Action::Create, Action::Start]);
        assert_eq!(mutating_names(&backend), vec!["create:web", "start:web"]);
        assert!(backend.container("web").expect("exists").running);
    }

    #[test]
    fn missing_image_is_pulled_before_create() {
        let backend = InMemoryBackend::new();
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let report = reconciler
            .reconcile_container(&ContainerSpec::new("web", "nginx:1"), &RunFlags::default())
            .expect("reconcile");
        assert_eq!(report.actions, vec![Action::Pull, Action::Create, Action::Start]);
    }

    #[test]
    fn stopped_container_is_started() {
        let backend = InMemoryBackend::new().with_container("web", "nginx:1", false);
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let report = reconciler
            .reconcile_container(&ContainerSpec::new("web", "nginx:1"), &RunFlags::default())
            .expect("reconcile");
        assert_eq!(report.actions, vec![Action::Start]);
        assert_eq!(mutating_names(&backend), vec!["start:web"]);
    }

    #[test]
    fn image_drift_recreates_running_container() {
        let backend = InMemoryBackend::new()
            .with_container("web", "nginx:1", true)
            .with_image("nginx:2");
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let report = reconciler
            .reconcile_container(&ContainerSpec::new("web", "nginx:2"), &RunFlags::default())
            .expect("reconcile");

        assert_eq!(
            report.actions,
            vec![Action::Stop, Action::Remove, Action::Create, Action::Start]
        );
        assert!(report.drift.as_deref().is_some_and(|r| r.contains("nginx:1")));
        assert_eq!(
            mutating_names(&backend),
            vec!["stop:web", "remove:web", "create:web", "start:web"]
        );
        assert_eq!(backend.container("web").expect("exists").image, "nginx:2");
    }

    #[test]
    fn image_drift_on_stopped_container_skips_stop() {
        let backend = InMemoryBackend::new()
            .with_container("web", "nginx:1", false)
            .with_image("nginx:2");
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let report = reconciler
            .reconcile_container(&ContainerSpec::new("web", "nginx:2"), &RunFlags::default())
            .expect("reconcile");
        assert_eq!(report.actions, vec![Action::Remove, Action::Create, Action::Start]);
    }

    #[test]
    fn force_pull_recreates_even_without_drift() {
        let backend = InMemoryBackend::new().with_container("web", "nginx:1", true);
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let flags = RunFlags {
            force_pull: true,
            ..RunFlags::default()
        };
        let report = reconciler
            .reconcile_container(&ContainerSpec::new("web", "nginx:1"), &flags)
            .expect("reconcile");
        assert_eq!(
            report.actions,
            vec![Action::Pull, Action::Stop, Action::Remove, Action::Create, Action::Start]
        );
        let image_checks = backend
            .calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::ImageExists(_)))
            .count();
        assert_eq!(image_checks, 0, "a forced pull needs no presence check");
    }

    #[test]
    fn force_restart_uses_grace_period() {
        let backend = InMemoryBackend::new().with_container("web", "nginx:1", true);
        let options = ReconcileOptions {
            stop_timeout: Duration::from_secs(12),
            hook_timeout: None,
        };
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host()).with_options(options);
        let flags = RunFlags {
            force_restart: true,
            ..RunFlags::default()
        };
        let report = reconciler
            .reconcile_container(&ContainerSpec::new("web", "nginx:1"), &flags)
            .expect("reconcile");

        assert_eq!(report.actions, vec![Action::Restart]);
        assert_eq!(
            backend.mutating_calls(),
            vec![
                BackendCall::Stop("web".into(), Duration::from_secs(12)),
                BackendCall::Start("web".into()),
            ]
        );
    }

    #[test]
    fn force_restart_does_not_restart_freshly_started_container() {
        let backend = InMemoryBackend::new().with_container("web", "nginx:1", false);
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let flags = RunFlags {
            force_restart: true,
            ..RunFlags::default()
        };
        let report = reconciler
            .reconcile_container(&ContainerSpec::new("web", "nginx:1"), &flags)
            .expect("reconcile");
        assert_eq!(report.actions, vec![Action::Start]);
    }

    #[test]
    fn hooks_run_before_create_and_leave_nothing_behind() {
        let backend = InMemoryBackend::new()
            .with_image("app:1")
            .with_exit_code("web-prestart-0", 1);
        let mut spec = ContainerSpec::new("web", "app:1");
        spec.pre_start.push(PreStartHook {
            command: Command::Line("./migrate".into()),
            environment: Default::default(),
        });
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let report = reconciler.reconcile_container(&spec, &RunFlags::default()).expect("reconcile");

        assert_eq!(report.hooks.len(), 1);
        assert_eq!(report.hooks[0].exit_code, 1);
        assert_eq!(report.actions, vec![Action::Create, Action::Start]);
        assert_eq!(backend.container_names(), vec!["web"]);

        let calls = backend.calls();
        let hook_removed = calls
            .iter()
            .position(|c| matches!(c, BackendCall::Remove(n) if n.starts_with("web-prestart-0")))
            .expect("hook removed");
        let primary_created = calls
            .iter()
            .position(|c| matches!(c, BackendCall::Create(r) if r.name == "web"))
            .expect("primary created");
        assert!(hook_removed < primary_created);
    }

    #[test]
    fn hooks_do_not_run_for_existing_containers() {
        let backend = InMemoryBackend::new().with_container("web", "app:1", false);
        let mut spec = ContainerSpec::new("web", "app:1");
        spec.pre_start.push(PreStartHook {
            command: Command::Line("./migrate".into()),
            environment: Default::default(),
        });
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let report = reconciler.reconcile_container(&spec, &RunFlags::default()).expect("reconcile");
        assert!(report.hooks.is_empty());
    }

    #[test]
    fn failing_hook_overlay_fetch_leaves_drifted_container_running() {
        let backend = InMemoryBackend::new()
            .with_container("web", "app:1", true)
            .with_image("app:2");
        let mut spec = ContainerSpec::new("web", "app:2");
        let mut hook = PreStartHook {
            command: Command::Line("./migrate".into()),
            environment: Default::default(),
        };
        let _ = hook
            .environment
            .insert("TOKEN".into(), EnvValue::directive("fetch", "http://x/unavailable"));
        spec.pre_start.push(hook);

        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let err = reconciler
            .reconcile(&manifest(vec![spec]), &RunFlags::default())
            .unwrap_err();

        assert!(matches!(err, ConvoyError::EnvironmentFetch { .. }), "got: {err}");
        assert!(backend.mutating_calls().is_empty());
        let web = backend.container("web").expect("still exists");
        assert_eq!(web.image, "app:1");
        assert!(web.running);
    }

    #[test]
    fn resolved_and_derived_environment_reach_create() {
        let backend = InMemoryBackend::new().with_image("app:1");
        let mut spec = ContainerSpec::new("web", "app:1");
        let _ = spec
            .environment
            .insert("SECRET".into(), EnvValue::directive("fetch", "http://x/secret"));
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let _ = reconciler.reconcile_container(&spec, &RunFlags::default()).expect("reconcile");

        let env = backend.container("web").expect("exists").env.expect("env");
        assert_eq!(env["SECRET"], "hunter2");
        assert_eq!(env["DATACENTER"], "use1a");
        assert_eq!(env["HOST_HOSTNAME"], "node-7");
        assert_eq!(env["SYSLOG_ADDRESS"], "172.17.0.1:514");
    }

    #[test]
    fn cycle_produces_no_backend_calls() {
        let backend = InMemoryBackend::new();
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let result = reconciler.reconcile(
            &manifest(vec![linked("a", "img", &["b"]), linked("b", "img", &["a"])]),
            &RunFlags::default(),
        );
        assert!(matches!(result, Err(ConvoyError::DependencyCycle { .. })));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn unknown_function_produces_no_backend_calls() {
        let backend = InMemoryBackend::new();
        let mut spec = ContainerSpec::new("web", "app:1");
        let _ = spec
            .environment
            .insert("X".into(), EnvValue::directive("unknown-fn", "x"));
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let result = reconciler.reconcile(
            &manifest(vec![ContainerSpec::new("db", "pg"), spec]),
            &RunFlags::default(),
        );
        assert!(matches!(result, Err(ConvoyError::UnknownEnvironmentFunction { .. })));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn fetch_failure_produces_no_backend_calls() {
        let backend = InMemoryBackend::new();
        let mut spec = ContainerSpec::new("web", "app:1");
        let _ = spec
            .environment
            .insert("X".into(), EnvValue::directive("fetch", "http://x/missing"));
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let result = reconciler.reconcile(&manifest(vec![spec]), &RunFlags::default());
        assert!(matches!(result, Err(ConvoyError::EnvironmentFetch { .. })));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn containers_are_processed_in_dependency_order() {
        let backend = InMemoryBackend::new().with_image("img");
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let report = reconciler
            .reconcile(
                &manifest(vec![
                    linked("api", "img", &["db", "cache"]),
                    linked("cache", "img", &[]),
                    linked("db", "img", &[]),
                ]),
                &RunFlags::default(),
            )
            .expect("reconcile");

        let names: Vec<_> = report.outcomes.iter().map(ContainerOutcome::name).collect();
        assert_eq!(names, vec!["cache", "db", "api"]);
        let created: Vec<_> = backend
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::Create(r) => Some(r.name),
                _ => None,
            })
            .collect();
        assert_eq!(created, vec!["cache", "db", "api"]);
    }

    #[test]
    fn failure_skips_dependents_but_not_independent_containers() {
        let backend = InMemoryBackend::new().with_image("img").failing("create", "db");
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let report = reconciler
            .reconcile(
                &manifest(vec![
                    linked("db", "img", &[]),
                    linked("api", "img", &["db"]),
                    linked("web", "img", &["api"]),
                    linked("metrics", "img", &[]),
                ]),
                &RunFlags::default(),
            )
            .expect("reconcile");

        assert!(!report.is_success());
        let summary: Vec<(String, bool)> = report
            .outcomes
            .iter()
            .map(|o| (o.name().to_string(), o.is_success()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("db".to_string(), false),
                ("api".to_string(), false),
                ("metrics".to_string(), true),
                ("web".to_string(), false),
            ]
        );
        match &report.outcomes[1] {
            ContainerOutcome::Skipped { blocked_by, .. } => assert_eq!(blocked_by, "db"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        match &report.outcomes[0] {
            ContainerOutcome::Failed { error, .. } => assert!(error.is_runtime_error()),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(report.failures().count(), 3);
    }

    #[test]
    fn target_filter_reconciles_one_container() {
        let backend = InMemoryBackend::new().with_image("img");
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let flags = RunFlags {
            target: Some("web".into()),
            ..RunFlags::default()
        };
        let report = reconciler
            .reconcile(
                &manifest(vec![linked("db", "img", &[]), linked("web", "img", &["db"])]),
                &flags,
            )
            .expect("reconcile");
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(backend.container_names(), vec!["web"]);
    }

    #[test]
    fn unknown_target_is_not_found() {
        let backend = InMemoryBackend::new();
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let flags = RunFlags {
            target: Some("nope".into()),
            ..RunFlags::default()
        };
        let err = reconciler
            .reconcile(&manifest(vec![linked("db", "img", &[])]), &flags)
            .unwrap_err();
        assert!(matches!(err, ConvoyError::NotFound { .. }));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn structured_comparator_detects_environment_drift() {
        let mut observed_env = BTreeMap::new();
        let _ = observed_env.insert("MODE".to_string(), "old".to_string());
        let backend = InMemoryBackend::new().with_inspected(
            "web",
            crate::backend::InspectInfo {
                image: "app:1".into(),
                running: true,
                env: Some(observed_env),
                ..Default::default()
            },
        );
        let mut spec = ContainerSpec::new("web", "app:1");
        let _ = spec.environment.insert("MODE".into(), EnvValue::literal("new"));

        let reconciler = Reconciler::new(&backend, &StaticFetcher, host())
            .with_comparator(StructuredComparator::all());
        let report = reconciler.reconcile_container(&spec, &RunFlags::default()).expect("reconcile");
        assert!(report.drift.as_deref().is_some_and(|r| r.contains("MODE")));
        assert_eq!(
            report.actions,
            vec![Action::Stop, Action::Remove, Action::Create, Action::Start]
        );
    }

    #[test]
    fn run_once_cleans_up_and_returns_exit_code() {
        let backend = InMemoryBackend::new()
            .with_image("app:1")
            .with_exit_code("web-run", 3)
            .with_logs("web-run", "done\n");
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let output = reconciler
            .run_once(
                &manifest(vec![ContainerSpec::new("web", "app:1")]),
                "web",
                &["rake".into(), "db:seed".into()],
            )
            .expect("run");

        assert_eq!(output.exit_code, 3);
        assert_eq!(output.logs, "done\n");
        assert!(backend.container_names().is_empty());
    }

    #[test]
    fn run_once_unknown_container_is_not_found() {
        let backend = InMemoryBackend::new();
        let reconciler = Reconciler::new(&backend, &StaticFetcher, host());
        let err = reconciler
            .run_once(&Manifest::new(), "web", &["true".into()])
            .unwrap_err();
        assert!(matches!(err, ConvoyError::NotFound { .. }));
    }
}
