//! Translation of a container definition into a [`CreateRequest`].
//!
//! This is where manifest values written loosely (strings for numbers and
//! booleans, hostname markers) become the exact options handed to the
//! runtime, and where host-derived environment values are added.

use convoy_common::constants::{
    ENV_DATACENTER, ENV_HOST_HOSTNAME, ENV_SYSLOG_ADDRESS, SYSLOG_BRIDGE_GATEWAY, SYSLOG_LOOPBACK,
    SYSLOG_PORT,
};
use convoy_common::error::{ConvoyError, Result};
use convoy_manifest::ContainerSpec;
use convoy_manifest::environment::ResolvedEnvironment;
use convoy_manifest::model::HostnameDirective;

use crate::backend::{CreateRequest, UlimitSetting, normalize_port};

/// Facts about the host the containers run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    /// The host's own hostname.
    pub hostname: String,
    /// Placement zone code, supplied by the provisioning layer.
    pub zone: Option<String>,
}

impl HostContext {
    /// Creates a context from known values.
    #[must_use]
    pub fn new(hostname: impl Into<String>, zone: Option<String>) -> Self {
        Self {
            hostname: hostname.into(),
            zone,
        }
    }

    /// Reads the hostname from the kernel unless `hostname` overrides it.
    ///
    /// # Errors
    ///
    /// Returns [`ConvoyError::Config`] if the hostname cannot be read.
    pub fn detect(zone: Option<String>, hostname: Option<String>) -> Result<Self> {
        let hostname = match hostname {
            Some(name) => name,
            None => nix::unistd::gethostname()
                .map_err(|e| ConvoyError::Config {
                    message: format!("cannot read host hostname: {e}"),
                })?
                .to_string_lossy()
                .into_owned(),
        };
        tracing::debug!(%hostname, ?zone, "host context");
        Ok(Self { hostname, zone })
    }
}

/// Resolves a container's hostname directive.
///
/// Returns `None` when the engine should pick its default.
///
/// # Errors
///
/// Returns [`ConvoyError::UnknownHostnameFormat`] for unrecognized shapes.
pub fn resolve_hostname(spec: &ContainerSpec, host: &HostContext) -> Result<Option<String>> {
    match &spec.hostname {
        HostnameDirective::HostDefault => Ok(Some(host.hostname.clone())),
        HostnameDirective::EngineDefault => Ok(None),
        HostnameDirective::Literal(name) => Ok(Some(name.clone())),
        HostnameDirective::Invalid(found) => Err(ConvoyError::UnknownHostnameFormat {
            container: spec.name.clone(),
            found: found.clone(),
        }),
    }
}

/// Syslog address reachable from a network mode.
///
/// An unset mode is the engine's default bridge network. Modes without a
/// known route to the host return `None`.
#[must_use]
pub fn syslog_address(network_mode: Option<&str>) -> Option<String> {
    match network_mode.unwrap_or("bridge") {
        "host" => Some(format!("{SYSLOG_LOOPBACK}:{SYSLOG_PORT}")),
        "bridge" => Some(format!("{SYSLOG_BRIDGE_GATEWAY}:{SYSLOG_PORT}")),
        _ => None,
    }
}

/// Host-derived variables added to every primary container.
#[must_use]
pub fn derived_environment(spec: &ContainerSpec, host: &HostContext) -> ResolvedEnvironment {
    let mut env = ResolvedEnvironment::new();
    if let Some(zone) = &host.zone {
        let _ = env.insert(ENV_DATACENTER.to_string(), zone.clone());
    }
    let _ = env.insert(ENV_HOST_HOSTNAME.to_string(), host.hostname.clone());
    match syslog_address(spec.network_mode.as_deref()) {
        Some(address) => {
            let _ = env.insert(ENV_SYSLOG_ADDRESS.to_string(), address);
        }
        None => tracing::warn!(
            container = %spec.name,
            network_mode = spec.network_mode.as_deref().unwrap_or_default(),
            "no syslog route for network mode; {ENV_SYSLOG_ADDRESS} not set"
        ),
    }
    env
}

/// Builds the request that creates the primary container.
///
/// `resolved` is the container's environment with directives resolved.
/// Derived host variables are added underneath it: a variable the manifest
/// sets itself keeps the manifest's value.
///
/// # Errors
///
/// Returns a configuration error for an invalid hostname, privileged flag,
/// ulimit, or cpu share value.
pub fn build_create_request(
    spec: &ContainerSpec,
    resolved: &ResolvedEnvironment,
    host: &HostContext,
) -> Result<CreateRequest> {
    let mut env = derived_environment(spec, host);
    env.extend(resolved.iter().map(|(k, v)| (k.clone(), v.clone())));

    let privileged = spec
        .privileged
        .as_ref()
        .map(convoy_manifest::model::PrivilegedFlag::to_bool)
        .transpose()
        .map_err(|e| in_container(spec, &e))?
        .unwrap_or(false);

    let cpu_shares = spec
        .cpu_shares
        .as_ref()
        .map(|shares| {
            let value = shares.to_i64("cpu_shares")?;
            u64::try_from(value).map_err(|_| ConvoyError::Config {
                message: format!("cpu_shares: must not be negative, got {value}"),
            })
        })
        .transpose()
        .map_err(|e| in_container(spec, &e))?;

    let ulimits = spec
        .ulimits
        .iter()
        .map(|ulimit| {
            Ok(UlimitSetting {
                name: ulimit.name.clone(),
                soft: ulimit.soft.to_i64(&format!("ulimit {} soft", ulimit.name))?,
                hard: ulimit.hard.to_i64(&format!("ulimit {} hard", ulimit.name))?,
            })
        })
        .collect::<Result<Vec<_>>>()
        .map_err(|e| in_container(spec, &e))?;

    let command = spec
        .command
        .as_ref()
        .map(convoy_manifest::model::Command::argv)
        .transpose()?
        .unwrap_or_default();

    Ok(CreateRequest {
        name: spec.name.clone(),
        image: spec.image.clone(),
        command,
        env,
        hostname: resolve_hostname(spec, host)?,
        volumes: spec.volumes.clone(),
        port_bindings: spec
            .ports
            .iter()
            .map(|(port, binding)| (normalize_port(port), binding.to_string()))
            .collect(),
        exposed_ports: exposed_ports(spec),
        links: spec
            .links
            .iter()
            .map(|(name, alias)| (name.clone(), alias.clone().unwrap_or_else(|| name.clone())))
            .collect(),
        privileged,
        cpu_shares,
        ulimits,
        network_mode: spec.network_mode.clone(),
        ipc_mode: spec.ipc_mode.clone(),
        pid_mode: spec.pid_mode.clone(),
    })
}

/// Ports to expose, taken from the port-binding keys.
///
/// Exposing them explicitly lets bindings work for ports the image did not
/// declare at build time.
#[must_use]
pub fn exposed_ports(spec: &ContainerSpec) -> Vec<String> {
    spec.ports.keys().map(|port| normalize_port(port)).collect()
}

fn in_container(spec: &ContainerSpec, err: &ConvoyError) -> ConvoyError {
    ConvoyError::Config {
        message: format!("container \"{}\": {err}", spec.name),
    }
}
