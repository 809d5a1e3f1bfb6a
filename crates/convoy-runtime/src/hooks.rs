//! Transient run-to-completion containers.
//!
//! Pre-start hooks and one-off commands both run as a throwaway container
//! that is created, started, waited on, and then removed on every exit
//! path, so nothing is ever left behind on the host.

use std::collections::BTreeMap;
use std::time::Duration;

use convoy_common::constants::HOOK_CONTAINER_INFIX;
use convoy_common::error::Result;
use convoy_manifest::ContainerSpec;
use convoy_manifest::environment::{self, Fetch, ResolvedEnvironment};

use crate::backend::{ContainerBackend, CreateRequest};

/// Outcome of one transient container run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientOutput {
    /// Exit code of the command.
    pub exit_code: i64,
    /// Combined output of the command.
    pub logs: String,
}

/// What happened when a pre-start hook ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookReport {
    /// Position of the hook in the owner's list.
    pub index: usize,
    /// Name of the transient container.
    pub container: String,
    /// Command that ran.
    pub command: String,
    /// Exit code of the command.
    pub exit_code: i64,
    /// Combined output of the command.
    pub logs: String,
}

impl HookReport {
    /// Returns `true` if the hook exited with status zero.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Timeouts applied to transient containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransientLimits {
    /// Deadline for the container to exit; `None` waits forever.
    pub wait: Option<Duration>,
    /// Grace period when a container must be stopped before removal.
    pub stop: Duration,
}

/// Generates a unique name for a transient container.
#[must_use]
pub fn transient_name(owner: &str, infix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{owner}-{infix}-{}", &suffix[..12])
}

/// Runs a transient container to completion and removes it.
///
/// Nothing is removed if creation fails, because nothing exists. Once the
/// container is created, removal is attempted exactly once regardless of
/// how the run ended. A run error takes precedence over a removal error.
///
/// # Errors
///
/// Returns the first adapter error from the run, or the removal error if
/// the run itself succeeded.
pub fn run_transient(
    backend: &dyn ContainerBackend,
    request: &CreateRequest,
    limits: TransientLimits,
) -> Result<TransientOutput> {
    backend.create(request)?;
    tracing::debug!(container = %request.name, "transient container created");

    let outcome = run_created(backend, &request.name, limits.wait);
    let cleanup = remove_transient(backend, &request.name, limits.stop);

    match (outcome, cleanup) {
        (Err(run_err), Err(cleanup_err)) => {
            tracing::error!(
                container = %request.name,
                error = %cleanup_err,
                "failed to remove transient container"
            );
            Err(run_err)
        }
        (Err(err), Ok(())) | (Ok(_), Err(err)) => Err(err),
        (Ok(output), Ok(())) => Ok(output),
    }
}

fn run_created(
    backend: &dyn ContainerBackend,
    name: &str,
    wait: Option<Duration>,
) -> Result<TransientOutput> {
    backend.start(name)?;
    let exit_code = backend.wait_for_exit(name, wait)?;
    let logs = backend.fetch_logs(name)?;
    Ok(TransientOutput { exit_code, logs })
}

fn remove_transient(backend: &dyn ContainerBackend, name: &str, grace: Duration) -> Result<()> {
    match backend.container_running(name) {
        Ok(true) => {
            if let Err(e) = backend.stop(name, grace) {
                tracing::warn!(container = %name, error = %e, "failed to stop transient container");
            }
        }
        Ok(false) => {}
        Err(e) => tracing::warn!(container = %name, error = %e, "cannot query transient container"),
    }
    backend.remove(name)?;
    tracing::debug!(container = %name, "transient container removed");
    Ok(())
}

/// A pre-start hook with its environment resolved and its transient
/// container described, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedHook {
    /// Position of the hook in the owner's list.
    pub index: usize,
    /// Command as written in the manifest.
    pub command: String,
    /// Transient container to create.
    pub request: CreateRequest,
}

/// Resolves every pre-start hook of `spec` into a [`PreparedHook`].
///
/// Each hook container is built from `primary` (the owner's create
/// request) with the hook's command, no published ports, and the owner's
/// resolved environment overlaid with the hook's own. Overlay directives
/// are fetched here, so this runs before anything on the host changes.
///
/// # Errors
///
/// Returns the first overlay resolution or command splitting error.
pub fn prepare_pre_start_hooks(
    fetcher: &dyn Fetch,
    spec: &ContainerSpec,
    owner_env: &ResolvedEnvironment,
    primary: &CreateRequest,
) -> Result<Vec<PreparedHook>> {
    spec.pre_start
        .iter()
        .enumerate()
        .map(|(index, hook)| {
            let owner = format!("{}/pre_start[{index}]", spec.name);
            let env = environment::hook_environment(&owner, owner_env, &hook.environment, fetcher)?;
            let request = CreateRequest {
                name: transient_name(&spec.name, &format!("{HOOK_CONTAINER_INFIX}-{index}")),
                command: hook.command.argv()?,
                env,
                port_bindings: BTreeMap::new(),
                exposed_ports: Vec::new(),
                ..primary.clone()
            };
            Ok(PreparedHook {
                index,
                command: hook.command.to_string(),
                request,
            })
        })
        .collect()
}

/// Runs prepared pre-start hooks of `owner`, in order.
///
/// A non-zero exit is logged and recorded but does not stop the remaining
/// hooks.
///
/// # Errors
///
/// Returns the first adapter error. The failing hook's container has
/// already been removed when this returns.
pub fn run_pre_start_hooks(
    backend: &dyn ContainerBackend,
    owner: &str,
    hooks: &[PreparedHook],
    limits: TransientLimits,
) -> Result<Vec<HookReport>> {
    let mut reports = Vec::with_capacity(hooks.len());
    for hook in hooks {
        let index = hook.index;
        tracing::info!(container = %owner, hook = index, command = %hook.command, "running pre-start hook");

        let output = run_transient(backend, &hook.request, limits)?;
        if output.exit_code == 0 {
            tracing::info!(container = %owner, hook = index, "pre-start hook succeeded");
        } else {
            tracing::warn!(
                container = %owner,
                hook = index,
                exit_code = output.exit_code,
                logs = %output.logs.trim_end(),
                "pre-start hook failed; continuing"
            );
        }
        reports.push(HookReport {
            index,
            container: hook.request.name.clone(),
            command: hook.command.clone(),
            exit_code: output.exit_code,
            logs: output.logs,
        });
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use convoy_common::error::ConvoyError;
    use convoy_manifest::model::{Command, EnvValue, PreStartHook};

    use super::*;
    use crate::backend::memory::{BackendCall, InMemoryBackend};

    struct NoFetch;

    impl Fetch for NoFetch {
        fn fetch(&self, location: &str) -> Result<String> {
            Ok(format!("body-of-{location}"))
        }
    }

    const LIMITS: TransientLimits = TransientLimits {
        wait: None,
        stop: Duration::from_secs(30),
    };

    fn spec_with_hooks(commands: &[&str]) -> ContainerSpec {
        let mut spec = ContainerSpec::new("web", "web:2");
        for command in commands {
            spec.pre_start.push(PreStartHook {
                command: Command::Line((*command).to_string()),
                environment: Default::default(),
            });
        }
        spec
    }

    fn primary() -> CreateRequest {
        CreateRequest {
            name: "web".into(),
            image: "web:2".into(),
            hostname: Some("node-7".into()),
            port_bindings: [("80/tcp".to_string(), "8080".to_string())].into_iter().collect(),
            exposed_ports: vec!["80/tcp".into()],
            ..CreateRequest::default()
        }
    }

    fn run_hooks(
        backend: &InMemoryBackend,
        spec: &ContainerSpec,
        owner_env: &ResolvedEnvironment,
        limits: TransientLimits,
    ) -> Result<Vec<HookReport>> {
        let hooks = prepare_pre_start_hooks(&NoFetch, spec, owner_env, &primary())?;
        run_pre_start_hooks(backend, &spec.name, &hooks, limits)
    }

    fn removals(backend: &InMemoryBackend) -> Vec<String> {
        backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Remove(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    fn created(backend: &InMemoryBackend) -> Vec<CreateRequest> {
        backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Create(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn transient_name_is_unique_and_prefixed() {
        let a = transient_name("web", "prestart-0");
        let b = transient_name("web", "prestart-0");
        assert!(a.starts_with("web-prestart-0-"));
        assert_ne!(a, b);
    }

    #[test]
    fn hooks_run_in_order_and_are_removed() {
        let backend = InMemoryBackend::new();
        let spec = spec_with_hooks(&["./migrate", "./seed"]);
        let reports =
            run_hooks(&backend, &spec, &ResolvedEnvironment::new(), LIMITS)
                .expect("hooks");

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].command, "./migrate");
        assert_eq!(reports[1].command, "./seed");
        assert_eq!(
            removals(&backend),
            vec![reports[0].container.clone(), reports[1].container.clone()]
        );
        assert!(backend.container_names().is_empty());
    }

    #[test]
    fn hook_container_uses_owner_hostname_without_ports() {
        let backend = InMemoryBackend::new();
        let spec = spec_with_hooks(&["./migrate"]);
        let _ = run_hooks(&backend, &spec, &ResolvedEnvironment::new(), LIMITS)
            .expect("hooks");

        let request = &created(&backend)[0];
        assert_eq!(request.hostname.as_deref(), Some("node-7"));
        assert_eq!(request.image, "web:2");
        assert_eq!(request.command, vec!["./migrate"]);
        assert!(request.port_bindings.is_empty());
        assert!(request.exposed_ports.is_empty());
    }

    #[test]
    fn hook_environment_overlays_owner() {
        let backend = InMemoryBackend::new();
        let mut spec = spec_with_hooks(&["./migrate"]);
        let _ = spec.pre_start[0]
            .environment
            .insert("MODE".into(), EnvValue::literal("migrate"));
        let _ = spec.pre_start[0]
            .environment
            .insert("TOKEN".into(), EnvValue::directive("fetch", "http://x/t"));
        let owner_env: ResolvedEnvironment = [("MODE", "serve"), ("DB", "db:5432")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let _ = run_hooks(&backend, &spec, &owner_env, LIMITS).expect("hooks");
        let env = &created(&backend)[0].env;
        assert_eq!(env["MODE"], "migrate");
        assert_eq!(env["DB"], "db:5432");
        assert_eq!(env["TOKEN"], "body-of-http://x/t");
    }

    #[test]
    fn failed_overlay_fetch_fails_preparation() {
        struct Unreachable;

        impl Fetch for Unreachable {
            fn fetch(&self, location: &str) -> Result<String> {
                Err(ConvoyError::EnvironmentFetch {
                    location: location.into(),
                    message: "HTTP 503".into(),
                })
            }
        }

        let mut spec = spec_with_hooks(&["./migrate"]);
        let _ = spec.pre_start[0]
            .environment
            .insert("TOKEN".into(), EnvValue::directive("fetch", "http://x/t"));
        let err = prepare_pre_start_hooks(&Unreachable, &spec, &ResolvedEnvironment::new(), &primary())
            .unwrap_err();
        assert!(matches!(err, ConvoyError::EnvironmentFetch { .. }), "got: {err}");
    }

    #[test]
    fn quoted_hook_command_keeps_its_words() {
        let spec = spec_with_hooks(&["sh -c 'rake db:migrate && rake db:seed'"]);
        let hooks = prepare_pre_start_hooks(&NoFetch, &spec, &ResolvedEnvironment::new(), &primary())
            .expect("prepare");
        assert_eq!(
            hooks[0].request.command,
            vec!["sh", "-c", "rake db:migrate && rake db:seed"]
        );
        assert_eq!(hooks[0].command, "sh -c 'rake db:migrate && rake db:seed'");
    }

    #[test]
    fn non_zero_exit_is_recorded_and_does_not_stop_later_hooks() {
        let backend = InMemoryBackend::new()
            .with_exit_code("web-prestart-0", 2)
            .with_logs("web-prestart-0", "relation exists\n");
        let spec = spec_with_hooks(&["./migrate", "./seed"]);
        let reports =
            run_hooks(&backend, &spec, &ResolvedEnvironment::new(), LIMITS)
                .expect("hooks");

        assert!(!reports[0].succeeded());
        assert_eq!(reports[0].logs, "relation exists\n");
        assert!(reports[1].succeeded());
        assert_eq!(removals(&backend).len(), 2);
    }

    #[test]
    fn adapter_error_still_removes_container_once() {
        let backend = InMemoryBackend::new().failing("logs", "web-prestart-0");
        let spec = spec_with_hooks(&["./migrate", "./seed"]);
        let err = run_hooks(&backend, &spec, &ResolvedEnvironment::new(), LIMITS)
            .unwrap_err();

        assert!(err.is_runtime_error());
        assert_eq!(removals(&backend).len(), 1, "only the first hook ran");
        assert!(backend.container_names().is_empty());
    }

    #[test]
    fn start_failure_still_removes_container() {
        let backend = InMemoryBackend::new().failing("start", "web-prestart");
        let spec = spec_with_hooks(&["./migrate"]);
        assert!(
            run_hooks(&backend, &spec, &ResolvedEnvironment::new(), LIMITS)
                .is_err()
        );
        assert_eq!(removals(&backend).len(), 1);
        assert!(backend.container_names().is_empty());
    }

    #[test]
    fn timeout_stops_then_removes() {
        let backend = InMemoryBackend::new().failing("timeout", "web-prestart");
        let spec = spec_with_hooks(&["./migrate"]);
        let limits = TransientLimits {
            wait: Some(Duration::from_secs(5)),
            ..LIMITS
        };
        let err = run_hooks(&backend, &spec, &ResolvedEnvironment::new(), limits)
            .unwrap_err();

        assert!(matches!(err, ConvoyError::HookTimeout { .. }));
        let calls = backend.calls();
        assert!(calls.iter().any(|c| matches!(c, BackendCall::Stop(..))));
        assert_eq!(removals(&backend).len(), 1);
        assert!(backend.container_names().is_empty());
    }

    #[test]
    fn create_failure_removes_nothing() {
        let backend = InMemoryBackend::new().failing("create", "web-prestart");
        let spec = spec_with_hooks(&["./migrate"]);
        assert!(
            run_hooks(&backend, &spec, &ResolvedEnvironment::new(), LIMITS)
                .is_err()
        );
        assert!(removals(&backend).is_empty());
    }
}
